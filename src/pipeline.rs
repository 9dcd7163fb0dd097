use crate::config::SynthContext;
use crate::correlator::CorrelationStats;
use crate::directory::{Customer, CustomerDirectory};
use crate::error::Result;
use crate::geo_key::GeoKey;
use crate::identity::EventAllocationReport;
use crate::rng::{fingerprint, seeded_rng};
use crate::surge::SurgeSummary;
use crate::types::{
    datetime_format, CallRecord, CategoryFlag, ClassifiedCall, InputRecord, TimestampAssignment,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use metrics::{counter, histogram};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// One fully synthesized call row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedCall {
    pub call_id: String,
    pub customer_id: String,
    pub call_reason: String,
    pub geo_key: Option<GeoKey>,
    pub outage_event_id: Option<u32>,
    #[serde(with = "datetime_format")]
    pub call_datetime: NaiveDateTime,
}

/// In-memory result of a synthesis run
#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    pub calls: Vec<SynthesizedCall>,
    pub records: Vec<InputRecord>,
    pub timestamps: Vec<TimestampAssignment>,
    pub identity_reports: Vec<EventAllocationReport>,
    pub correlation: CorrelationStats,
    pub surge: SurgeSummary,
    pub missing_key: usize,
}

/// Summary of a complete pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub seed: u64,
    pub started_at: DateTime<Utc>,
    pub total_calls: usize,
    pub outage_related: usize,
    pub identity_shortfall: usize,
    pub identity_reports: Vec<EventAllocationReport>,
    pub correlation: CorrelationStats,
    pub surge: SurgeSummary,
    pub dataset_sha256: String,
    pub output_file: String,
    pub summary_file: String,
}

pub struct SynthesisPipeline;

impl SynthesisPipeline {
    /// Allocate owners, join geo-keys, draw timestamps and aggregate.
    ///
    /// Draw order: identity allocation, then correlation, from one generator
    /// seeded with the configured seed. With more than one worker the
    /// correlation step uses per-chunk derived generators instead.
    #[instrument(skip_all, fields(calls = calls.len(), customers = customers.len(), seed = context.seed))]
    pub async fn synthesize(
        context: &SynthContext,
        calls: &[CallRecord],
        customers: Vec<Customer>,
    ) -> Result<SynthesisOutput> {
        let mut rng = seeded_rng(context.seed);

        let directory = CustomerDirectory::new(customers)?;
        let classified = ClassifiedCall::classify(calls, &context.outage_call_reason);
        let outage_related = classified
            .iter()
            .filter(|c| c.category == CategoryFlag::OutageRelated)
            .count();
        info!(
            "Synthesizing {} calls ({} outage related) for {} customers",
            calls.len(),
            outage_related,
            directory.len()
        );

        // Step 1: owners
        let allocation = context
            .allocator
            .allocate(&classified, &context.plans, &directory, &mut rng)?;
        counter!("synth_identity_shortfall_total").increment(allocation.total_shortfall() as u64);
        if allocation.total_unfilled() > 0 {
            warn!(
                "{} targeted draws left unfilled: not enough outage-related calls",
                allocation.total_unfilled()
            );
        }

        // Step 2: geo-keys from owners
        let joined = directory.join(calls, &allocation.assignments, &context.outage_call_reason)?;

        // Step 3: timestamps
        let timestamps = context.correlate(&joined.records, &mut rng).await?;

        let correlation = CorrelationStats::collect(&context.correlator, &joined.records);
        counter!("synth_records_total").increment(joined.records.len() as u64);
        counter!("synth_outage_records_total").increment(correlation.outage_path as u64);

        // Step 4: volume summary over the outage-related calls only
        let outage_timestamps: Vec<TimestampAssignment> = joined
            .records
            .iter()
            .zip(&timestamps)
            .filter(|(r, _)| r.category == CategoryFlag::OutageRelated)
            .map(|(_, t)| t.clone())
            .collect();
        let surge = SurgeSummary::from_assignments(&outage_timestamps, &context.catalog, context.bin_minutes)?;

        let calls_out = calls
            .iter()
            .zip(&allocation.assignments)
            .zip(joined.records.iter().zip(&timestamps))
            .map(|((call, owner), (record, stamp))| SynthesizedCall {
                call_id: call.call_id.clone(),
                customer_id: owner.identity_token.clone(),
                call_reason: call.call_reason.clone(),
                geo_key: record.geo_key.clone(),
                outage_event_id: stamp.event_id,
                call_datetime: stamp.instant,
            })
            .collect();

        Ok(SynthesisOutput {
            calls: calls_out,
            records: joined.records,
            timestamps,
            identity_reports: allocation.reports,
            correlation,
            surge,
            missing_key: joined.missing_key,
        })
    }

    /// Run the complete pipeline and persist the dataset and summary as JSON
    #[instrument(skip_all, fields(output_dir = %output_dir.display()))]
    pub async fn run(
        context: &SynthContext,
        calls: &[CallRecord],
        customers: Vec<Customer>,
        output_dir: &Path,
    ) -> Result<PipelineResult> {
        let started_at = Utc::now();
        let t_pipeline = std::time::Instant::now();
        info!("🚀 Starting synthesis run (seed {})", context.seed);

        let output = Self::synthesize(context, calls, customers).await?;

        let dataset = serde_json::to_string_pretty(&output.calls)?;
        let dataset_sha256 = fingerprint(dataset.as_bytes());
        let output_file = Self::persist(&dataset, "call_records", started_at, output_dir)?;
        info!("💾 Saved {} calls to {}", output.calls.len(), output_file);

        let mut result = PipelineResult {
            run_id: Uuid::new_v4(),
            seed: context.seed,
            started_at,
            total_calls: output.calls.len(),
            outage_related: output
                .records
                .iter()
                .filter(|r| r.category == CategoryFlag::OutageRelated)
                .count(),
            identity_shortfall: output.identity_reports.iter().map(|r| r.shortfall).sum(),
            identity_reports: output.identity_reports,
            correlation: output.correlation,
            surge: output.surge,
            dataset_sha256,
            output_file,
            summary_file: String::new(),
        };

        let summary_path = Self::file_path("run_summary", started_at, output_dir);
        result.summary_file = summary_path.to_string_lossy().to_string();
        fs::write(&summary_path, serde_json::to_string_pretty(&result)?)?;
        info!("💾 Saved run summary to {}", result.summary_file);

        histogram!("synth_pipeline_duration_seconds").record(t_pipeline.elapsed().as_secs_f64());
        Ok(result)
    }

    fn file_path(prefix: &str, at: DateTime<Utc>, output_dir: &Path) -> std::path::PathBuf {
        let timestamp = at.format("%Y%m%d_%H%M%S");
        output_dir.join(format!("{prefix}_{timestamp}.json"))
    }

    fn persist(content: &str, prefix: &str, at: DateTime<Utc>, output_dir: &Path) -> Result<String> {
        fs::create_dir_all(output_dir)?;
        let filepath = Self::file_path(prefix, at, output_dir);
        fs::write(&filepath, content)?;
        Ok(filepath.to_string_lossy().to_string())
    }
}

/// Read a JSON array of records from disk
pub fn read_json_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Write any serializable value as pretty JSON, creating parent directories
pub fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}
