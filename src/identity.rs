use crate::catalog::{EventCatalog, OutageEvent};
use crate::directory::CustomerDirectory;
use crate::error::{Result, SynthError};
use crate::geo_key::GeoKey;
use crate::types::{Categorized, CategoryFlag, IdentityAssignment};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, instrument, warn};

/// Outage-related calls each demo event should attract
pub const DEFAULT_TARGET_CALLS: [(u32, usize); 5] = [(1, 88), (2, 50), (3, 62), (4, 40), (5, 40)];

/// Default probability that a customer calls twice in a row
pub const DEFAULT_REPEAT_PROBABILITY: f64 = 0.35;

/// How many outage-related records an event should claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPlan {
    pub event_id: u32,
    pub geo_keys: BTreeSet<GeoKey>,
    pub target_calls: usize,
}

impl EventPlan {
    pub fn for_event(event: &OutageEvent, target_calls: usize) -> Self {
        Self {
            event_id: event.event_id(),
            geo_keys: event.geo_keys().clone(),
            target_calls,
        }
    }

    /// One plan per catalog event, in catalog order; events without a target get 0
    pub fn from_catalog(catalog: &EventCatalog, targets: &HashMap<u32, usize>) -> Vec<Self> {
        catalog
            .events()
            .iter()
            .map(|e| Self::for_event(e, targets.get(&e.event_id()).copied().unwrap_or(0)))
            .collect()
    }
}

/// Sampling discipline inside an event's restricted sub-pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestrictedDraw {
    /// Repeat contacts allowed; only an empty pool runs short
    #[default]
    WithReplacement,
    /// Each customer is drawn at most once per event
    Distinct,
}

/// What to do when the restricted sub-pool cannot satisfy a draw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortfallPolicy {
    /// Count the shortfall and draw from the global pool instead
    #[default]
    FallBack,
    /// Abort the allocation
    Fail,
}

/// Whether back-to-back pairs may span call categories
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingScope {
    #[default]
    AnyCategory,
    SameCategory,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorOptions {
    pub restricted_draw: RestrictedDraw,
    pub shortfall: ShortfallPolicy,
}

/// Per-event outcome of the targeted allocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAllocationReport {
    pub event_id: u32,
    pub target: usize,
    pub restricted_pool_size: usize,
    pub drawn_restricted: usize,
    /// Draws the restricted pool could not satisfy (fell back to the global pool)
    pub shortfall: usize,
    /// Target draws left over because the record stream ran out
    pub unfilled: usize,
}

#[derive(Debug, Clone, Default)]
pub struct AllocationOutcome {
    /// One per input record, in input order
    pub assignments: Vec<IdentityAssignment>,
    pub reports: Vec<EventAllocationReport>,
}

impl AllocationOutcome {
    pub fn total_shortfall(&self) -> usize {
        self.reports.iter().map(|r| r.shortfall).sum()
    }

    pub fn total_unfilled(&self) -> usize {
        self.reports.iter().map(|r| r.unfilled).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingStats {
    pub records: usize,
    pub identities: usize,
    pub single: usize,
    pub double: usize,
}

/// Hands out customer identities to call records
#[derive(Debug, Clone, Default)]
pub struct IdentityAllocator {
    options: AllocatorOptions,
}

fn pick<R: Rng + ?Sized>(pool: &[String], rng: &mut R) -> Option<String> {
    if pool.is_empty() {
        None
    } else {
        Some(pool[rng.gen_range(0..pool.len())].clone())
    }
}

impl IdentityAllocator {
    pub fn new(options: AllocatorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> AllocatorOptions {
        self.options
    }

    /// Event-targeted allocation.
    ///
    /// Outage-related records are consumed in input order: each plan in turn
    /// claims up to `target_calls` of them from its restricted sub-pool. The
    /// rest, and every other record, draw from the global pool.
    #[instrument(skip_all, fields(records = records.len(), events = plans.len()))]
    pub fn allocate<T: Categorized, R: Rng + ?Sized>(
        &self,
        records: &[T],
        plans: &[EventPlan],
        directory: &CustomerDirectory,
        rng: &mut R,
    ) -> Result<AllocationOutcome> {
        let global = directory.global_pool();
        let outage_positions: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.category() == CategoryFlag::OutageRelated)
            .map(|(i, _)| i)
            .collect();

        info!(
            "Allocating identities: {} outage-related of {} records, {} customers",
            outage_positions.len(),
            records.len(),
            global.len()
        );

        let mut slots: Vec<Option<(String, Option<u32>)>> = vec![None; records.len()];
        let mut reports = Vec::with_capacity(plans.len());
        let mut cursor = 0;

        for plan in plans {
            let pool = directory.restricted_pool(&plan.geo_keys);
            let mut remaining = pool.clone();
            let mut report = EventAllocationReport {
                event_id: plan.event_id,
                target: plan.target_calls,
                restricted_pool_size: pool.len(),
                ..Default::default()
            };
            debug!(
                "Event {}: {} customers in restricted pool, target {}",
                plan.event_id,
                pool.len(),
                plan.target_calls
            );

            for drawn in 0..plan.target_calls {
                let Some(&position) = outage_positions.get(cursor) else {
                    report.unfilled = plan.target_calls - drawn;
                    warn!(
                        "Ran out of outage-related records for event {} ({} unfilled)",
                        plan.event_id, report.unfilled
                    );
                    break;
                };
                cursor += 1;

                let restricted = match self.options.restricted_draw {
                    RestrictedDraw::WithReplacement => pick(&pool, rng),
                    RestrictedDraw::Distinct if remaining.is_empty() => None,
                    RestrictedDraw::Distinct => {
                        let i = rng.gen_range(0..remaining.len());
                        Some(remaining.swap_remove(i))
                    }
                };

                let token = match restricted {
                    Some(token) => {
                        report.drawn_restricted += 1;
                        token
                    }
                    None => {
                        report.shortfall += 1;
                        if self.options.shortfall == ShortfallPolicy::Fail {
                            return Err(SynthError::RestrictedPoolExhausted {
                                event_id: plan.event_id,
                                shortfall: plan.target_calls - report.drawn_restricted,
                            });
                        }
                        pick(&global, rng).ok_or(SynthError::EmptyIdentityPool)?
                    }
                };
                slots[position] = Some((token, Some(plan.event_id)));
            }

            if report.shortfall > 0 {
                warn!(
                    "Event {}: {} draws fell back to the global pool",
                    plan.event_id, report.shortfall
                );
            }
            reports.push(report);
        }

        let leftover = outage_positions.len() - cursor;
        debug!("Assigning {} leftover outage-related records to the global pool", leftover);
        for &position in &outage_positions[cursor..] {
            let token = pick(&global, rng).ok_or(SynthError::EmptyIdentityPool)?;
            slots[position] = Some((token, None));
        }

        for slot in slots.iter_mut().filter(|s| s.is_none()) {
            let token = pick(&global, rng).ok_or(SynthError::EmptyIdentityPool)?;
            *slot = Some((token, None));
        }

        let assignments = records
            .iter()
            .zip(slots)
            .map(|(record, slot)| {
                let (identity_token, event_id) = slot.unwrap_or_default();
                IdentityAssignment {
                    record_id: record.record_id().to_string(),
                    identity_token,
                    event_id,
                }
            })
            .collect();

        Ok(AllocationOutcome { assignments, reports })
    }

    /// Generic allocation without events.
    ///
    /// Records are shuffled and walked; each step opens a fresh numeric
    /// identity and, with `repeat_probability`, hands the following record
    /// to the same identity. No identity gets more than two records.
    #[instrument(skip_all, fields(records = records.len()))]
    pub fn pair_sequential<T: Categorized, R: Rng + ?Sized>(
        &self,
        records: &[T],
        repeat_probability: f64,
        scope: PairingScope,
        rng: &mut R,
    ) -> Result<(Vec<IdentityAssignment>, PairingStats)> {
        if !(0.0..=1.0).contains(&repeat_probability) {
            return Err(SynthError::Config(format!(
                "repeat probability {repeat_probability} is outside [0, 1]"
            )));
        }

        let mut order: Vec<usize> = (0..records.len()).collect();
        order.shuffle(rng);

        let groups: Vec<Vec<usize>> = match scope {
            PairingScope::AnyCategory => vec![order],
            PairingScope::SameCategory => {
                let mut groups: Vec<(CategoryFlag, Vec<usize>)> = Vec::new();
                for i in order {
                    let category = records[i].category();
                    match groups.iter_mut().find(|(c, _)| *c == category) {
                        Some((_, group)) => group.push(i),
                        None => groups.push((category, vec![i])),
                    }
                }
                groups.into_iter().map(|(_, g)| g).collect()
            }
        };

        let mut assignments = Vec::with_capacity(records.len());
        let mut stats = PairingStats {
            records: records.len(),
            ..Default::default()
        };
        let mut next_token: u64 = 1;

        for group in groups {
            let mut i = 0;
            while i < group.len() {
                let token = next_token.to_string();
                next_token += 1;
                stats.identities += 1;

                let take = if i + 1 < group.len() && rng.gen_bool(repeat_probability) {
                    stats.double += 1;
                    2
                } else {
                    stats.single += 1;
                    1
                };
                for &position in &group[i..i + take] {
                    assignments.push(IdentityAssignment {
                        record_id: records[position].record_id().to_string(),
                        identity_token: token.clone(),
                        event_id: None,
                    });
                }
                i += take;
            }
        }

        info!(
            "Paired {} records onto {} identities ({} single, {} double)",
            stats.records, stats.identities, stats.single, stats.double
        );
        Ok((assignments, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Customer;
    use crate::types::InputRecord;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn keys(raw: &[&str]) -> BTreeSet<GeoKey> {
        raw.iter().map(|k| GeoKey::normalize(k)).collect()
    }

    fn records(outage: usize, other: usize) -> Vec<InputRecord> {
        let mut out: Vec<InputRecord> = (0..outage)
            .map(|i| InputRecord::new(format!("T{i}"), None, CategoryFlag::OutageRelated))
            .collect();
        out.extend((0..other).map(|i| InputRecord::new(format!("B{i}"), None, CategoryFlag::Other)));
        out
    }

    fn directory() -> CustomerDirectory {
        let mut customers = vec![
            Customer::new("E1", Some("06604")),
            Customer::new("E2", Some("6604")),
            Customer::new("E3", Some("06673.0")),
        ];
        customers.extend((0..20).map(|i| Customer::new(format!("G{i}"), Some("98101"))));
        CustomerDirectory::new(customers).unwrap()
    }

    fn plan(target: usize) -> EventPlan {
        EventPlan {
            event_id: 2,
            geo_keys: keys(&["06673", "06604"]),
            target_calls: target,
        }
    }

    #[test]
    fn test_targeted_draws_come_from_restricted_pool() {
        let allocator = IdentityAllocator::default();
        let recs = records(8, 4);
        let mut rng = StdRng::seed_from_u64(42);
        let outcome = allocator.allocate(&recs, &[plan(5)], &directory(), &mut rng).unwrap();

        assert_eq!(outcome.assignments.len(), 12);
        for a in &outcome.assignments[..5] {
            assert!(a.identity_token.starts_with('E'), "{a:?}");
            assert_eq!(a.event_id, Some(2));
        }
        for a in &outcome.assignments[5..] {
            assert_eq!(a.event_id, None);
        }
        assert_eq!(outcome.reports[0].drawn_restricted, 5);
        assert_eq!(outcome.total_shortfall(), 0);
    }

    #[test]
    fn test_distinct_draws_report_exact_shortfall() {
        let allocator = IdentityAllocator::new(AllocatorOptions {
            restricted_draw: RestrictedDraw::Distinct,
            shortfall: ShortfallPolicy::FallBack,
        });
        let recs = records(5, 0);
        let mut rng = StdRng::seed_from_u64(42);
        let outcome = allocator.allocate(&recs, &[plan(5)], &directory(), &mut rng).unwrap();

        let report = &outcome.reports[0];
        assert_eq!(report.restricted_pool_size, 3);
        assert_eq!(report.drawn_restricted, 3);
        assert_eq!(report.shortfall, 2);

        let restricted: BTreeSet<&str> = outcome.assignments[..3]
            .iter()
            .map(|a| a.identity_token.as_str())
            .collect();
        assert_eq!(restricted.len(), 3);
        assert_eq!(outcome.assignments.len(), 5);
    }

    #[test]
    fn test_fail_policy_raises_on_shortfall() {
        let allocator = IdentityAllocator::new(AllocatorOptions {
            restricted_draw: RestrictedDraw::Distinct,
            shortfall: ShortfallPolicy::Fail,
        });
        let recs = records(5, 0);
        let mut rng = StdRng::seed_from_u64(42);
        match allocator.allocate(&recs, &[plan(5)], &directory(), &mut rng) {
            Err(SynthError::RestrictedPoolExhausted { event_id, shortfall }) => {
                assert_eq!(event_id, 2);
                assert_eq!(shortfall, 2);
            }
            other => panic!("expected exhausted pool, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_restricted_pool_with_replacement_counts_every_draw() {
        let allocator = IdentityAllocator::default();
        let empty = EventPlan {
            event_id: 7,
            geo_keys: keys(&["11111"]),
            target_calls: 4,
        };
        let recs = records(4, 0);
        let mut rng = StdRng::seed_from_u64(1);
        let outcome = allocator.allocate(&recs, &[empty], &directory(), &mut rng).unwrap();
        assert_eq!(outcome.reports[0].shortfall, 4);
        assert_eq!(outcome.reports[0].drawn_restricted, 0);
    }

    #[test]
    fn test_unfilled_targets_are_reported() {
        let allocator = IdentityAllocator::default();
        let recs = records(3, 2);
        let mut rng = StdRng::seed_from_u64(1);
        let outcome = allocator.allocate(&recs, &[plan(5)], &directory(), &mut rng).unwrap();
        assert_eq!(outcome.reports[0].drawn_restricted, 3);
        assert_eq!(outcome.total_unfilled(), 2);
        assert_eq!(outcome.assignments.len(), 5);
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let allocator = IdentityAllocator::default();
        let dir = CustomerDirectory::new(Vec::new()).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let err = allocator.allocate(&records(0, 2), &[], &dir, &mut rng).unwrap_err();
        assert!(matches!(err, SynthError::EmptyIdentityPool));
    }

    #[test]
    fn test_pairing_gives_each_identity_at_most_two_records() {
        let allocator = IdentityAllocator::default();
        let recs = records(40, 60);
        let mut rng = StdRng::seed_from_u64(42);
        let (assignments, stats) = allocator
            .pair_sequential(&recs, DEFAULT_REPEAT_PROBABILITY, PairingScope::AnyCategory, &mut rng)
            .unwrap();

        assert_eq!(assignments.len(), 100);
        let mut per_token: HashMap<&str, usize> = HashMap::new();
        for a in &assignments {
            *per_token.entry(a.identity_token.as_str()).or_default() += 1;
        }
        assert!(per_token.values().all(|&n| n == 1 || n == 2));
        assert_eq!(stats.identities, per_token.len());
        assert_eq!(stats.single + 2 * stats.double, 100);
        assert!(stats.double > 0 && stats.single > 0);

        let ids: BTreeSet<&str> = assignments.iter().map(|a| a.record_id.as_str()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_pairing_extremes() {
        let allocator = IdentityAllocator::default();
        let recs = records(5, 0);
        let mut rng = StdRng::seed_from_u64(3);

        let (_, never) = allocator
            .pair_sequential(&recs, 0.0, PairingScope::AnyCategory, &mut rng)
            .unwrap();
        assert_eq!((never.single, never.double), (5, 0));

        // Odd count: the last record is always single
        let (_, always) = allocator
            .pair_sequential(&recs, 1.0, PairingScope::AnyCategory, &mut rng)
            .unwrap();
        assert_eq!((always.single, always.double), (1, 2));

        assert!(allocator
            .pair_sequential(&recs, 1.5, PairingScope::AnyCategory, &mut rng)
            .is_err());
    }

    #[test]
    fn test_category_aware_pairing_never_mixes_categories() {
        let allocator = IdentityAllocator::default();
        let recs = records(31, 47);
        let mut rng = StdRng::seed_from_u64(9);
        let (assignments, _) = allocator
            .pair_sequential(&recs, 0.9, PairingScope::SameCategory, &mut rng)
            .unwrap();

        let category: HashMap<&str, CategoryFlag> =
            recs.iter().map(|r| (r.record_id.as_str(), r.category)).collect();
        let mut token_category: HashMap<&str, CategoryFlag> = HashMap::new();
        for a in &assignments {
            let c = category[a.record_id.as_str()];
            let seen = token_category.entry(a.identity_token.as_str()).or_insert(c);
            assert_eq!(*seen, c);
        }
    }

    #[test]
    fn test_plans_from_catalog() {
        let catalog = crate::catalog::default_catalog().unwrap();
        let targets: HashMap<u32, usize> = DEFAULT_TARGET_CALLS.into_iter().collect();
        let plans = EventPlan::from_catalog(&catalog, &targets);
        let got: Vec<(u32, usize)> = plans.iter().map(|p| (p.event_id, p.target_calls)).collect();
        assert_eq!(got, DEFAULT_TARGET_CALLS.to_vec());
        assert_eq!(plans.iter().map(|p| p.target_calls).sum::<usize>(), 280);
    }
}
