use anyhow::Context;
use clap::{Parser, Subcommand};
use outage_synth::config::SynthConfig;
use outage_synth::correlator::CorrelationStats;
use outage_synth::directory::{Customer, CustomerDirectory};
use outage_synth::logging;
use outage_synth::pipeline::{read_json_records, write_json, SynthesisPipeline};
use outage_synth::rng::seeded_rng;
use outage_synth::types::{CallRecord, ClassifiedCall, InputRecord};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "outage_synth")]
#[command(about = "Synthesize call records correlated with service outage windows")]
#[command(version = "0.1.0")]
struct Cli {
    /// TOML config file (defaults to ./synth.toml, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured seed
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assign timestamps to records that already carry geo-keys
    Timestamps {
        /// JSON array of {record_id, geo_key, category}
        #[arg(long)]
        records: PathBuf,
        #[arg(long, default_value = "output/timestamps.json")]
        out: PathBuf,
    },
    /// Assign customers to calls using the event-targeted allocation
    Identities {
        #[arg(long)]
        calls: PathBuf,
        #[arg(long)]
        customers: PathBuf,
        #[arg(long, default_value = "output/identities.json")]
        out: PathBuf,
    },
    /// Pair records into synthetic numeric identities (no events)
    Pairs {
        #[arg(long)]
        records: PathBuf,
        #[arg(long, default_value = "output/pairs.json")]
        out: PathBuf,
    },
    /// Full run: identities, geo-key join, timestamps and volume summary
    Run {
        #[arg(long)]
        calls: PathBuf,
        #[arg(long)]
        customers: PathBuf,
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,
    },
    /// Validate the configuration and print what it resolves to
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();

    let mut config = SynthConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    let context = config.build().context("validating configuration")?;

    match cli.command {
        Commands::Timestamps { records, out } => {
            let records: Vec<InputRecord> = read_json_records(&records)
                .with_context(|| format!("reading records from {}", records.display()))?;
            let mut rng = seeded_rng(context.seed);
            let assignments = context.correlate(&records, &mut rng).await?;
            write_json(&assignments, &out)?;

            let stats = CorrelationStats::collect(&context.correlator, &records);
            println!("\n🕒 Timestamps assigned:");
            println!("   Records: {}", stats.records);
            println!("   Outage path: {}", stats.outage_path);
            println!("   Background path: {}", stats.background_path);
            println!("   Missing key: {}", stats.missing_key);
            println!("   Unowned key: {}", stats.unowned_key);
            println!("   Output file: {}", out.display());
        }
        Commands::Identities { calls, customers, out } => {
            let calls: Vec<CallRecord> = read_json_records(&calls)
                .with_context(|| format!("reading calls from {}", calls.display()))?;
            let customers: Vec<Customer> = read_json_records(&customers)
                .with_context(|| format!("reading customers from {}", customers.display()))?;
            let directory = CustomerDirectory::new(customers)?;
            let classified = ClassifiedCall::classify(&calls, &context.outage_call_reason);

            let mut rng = seeded_rng(context.seed);
            let outcome = context
                .allocator
                .allocate(&classified, &context.plans, &directory, &mut rng)?;
            write_json(&outcome.assignments, &out)?;

            println!("\n👥 Identities assigned: {}", outcome.assignments.len());
            for report in &outcome.reports {
                println!(
                    "   Event {}: target {}, pool {}, restricted {}, shortfall {}, unfilled {}",
                    report.event_id,
                    report.target,
                    report.restricted_pool_size,
                    report.drawn_restricted,
                    report.shortfall,
                    report.unfilled
                );
            }
            println!("   Output file: {}", out.display());
        }
        Commands::Pairs { records, out } => {
            let records: Vec<InputRecord> = read_json_records(&records)
                .with_context(|| format!("reading records from {}", records.display()))?;
            let mut rng = seeded_rng(context.seed);
            let (assignments, stats) = context.allocator.pair_sequential(
                &records,
                context.repeat_probability,
                context.pairing_scope,
                &mut rng,
            )?;
            write_json(&assignments, &out)?;

            println!("\n🔗 Pairing results:");
            println!("   Records: {}", stats.records);
            println!("   Identities: {}", stats.identities);
            println!("   Single: {}", stats.single);
            println!("   Double: {}", stats.double);
            println!("   Output file: {}", out.display());
        }
        Commands::Run { calls, customers, output_dir } => {
            println!("🔄 Running synthesis pipeline...");
            let calls: Vec<CallRecord> = read_json_records(&calls)
                .with_context(|| format!("reading calls from {}", calls.display()))?;
            let customers: Vec<Customer> = read_json_records(&customers)
                .with_context(|| format!("reading customers from {}", customers.display()))?;

            match SynthesisPipeline::run(&context, &calls, customers, &output_dir).await {
                Ok(result) => {
                    info!("Pipeline finished");
                    println!("\n📊 Pipeline Results (run {}):", result.run_id);
                    println!("   Seed: {}", result.seed);
                    println!("   Total calls: {}", result.total_calls);
                    println!("   Outage related: {}", result.outage_related);
                    println!("   Identity shortfall: {}", result.identity_shortfall);
                    println!("   Outage path: {}", result.correlation.outage_path);
                    println!("   Background path: {}", result.correlation.background_path);
                    if let Some(peak) = &result.surge.peak {
                        println!("   Peak bin: {} ({} calls)", peak.start, peak.count);
                    }
                    println!("   Dataset sha256: {}", result.dataset_sha256);
                    println!("   Output file: {}", result.output_file);
                    println!("   Summary file: {}", result.summary_file);
                }
                Err(e) => {
                    error!("Pipeline failed: {}", e);
                    println!("❌ Pipeline failed: {}", e);
                    return Err(e.into());
                }
            }
        }
        Commands::CheckConfig => {
            println!("✅ Configuration is valid");
            println!("   Seed: {}", context.seed);
            println!("   Workers: {}", context.workers);
            println!("   Batched: {}", context.batched);
            let (start, end) = context.correlator.background_range();
            println!("   Background range: {} .. {}", start, end);
            for event in context.catalog.events() {
                let keys: Vec<&str> = event.geo_keys().iter().map(|k| k.as_str()).collect();
                let target = context
                    .plans
                    .iter()
                    .find(|p| p.event_id == event.event_id())
                    .map(|p| p.target_calls)
                    .unwrap_or(0);
                println!(
                    "   Event {}: {} .. {} keys [{}] target {}",
                    event.event_id(),
                    event.window_start(),
                    event.window_end(),
                    keys.join(", "),
                    target
                );
            }
        }
    }

    Ok(())
}
