use crate::error::{Result, SynthError};
use crate::geo_key::GeoKey;
use crate::types::{CallRecord, CategoryFlag, IdentityAssignment, InputRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// A customer who can own call records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: String,
    #[serde(default, deserialize_with = "crate::geo_key::blank_as_none")]
    pub geo_key: Option<GeoKey>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

impl Customer {
    pub fn new(customer_id: impl Into<String>, geo_key: Option<&str>) -> Self {
        Self {
            customer_id: customer_id.into(),
            geo_key: GeoKey::parse_optional(geo_key),
            name: None,
            city: None,
        }
    }
}

/// Customers indexed by normalized geo-key
#[derive(Debug, Clone, Default)]
pub struct CustomerDirectory {
    customers: Vec<Customer>,
    by_id: HashMap<String, usize>,
    by_key: HashMap<GeoKey, Vec<usize>>,
}

/// Call records with the owning customer's geo-key attached
#[derive(Debug, Clone, Default)]
pub struct JoinOutcome {
    pub records: Vec<InputRecord>,
    /// Calls whose customer was unknown or had no geo-key
    pub missing_key: usize,
}

impl CustomerDirectory {
    /// Customer ids must be unique so the call join stays many-to-one
    pub fn new(customers: Vec<Customer>) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(customers.len());
        let mut by_key: HashMap<GeoKey, Vec<usize>> = HashMap::new();

        for (position, customer) in customers.iter().enumerate() {
            let id = customer.customer_id.trim().to_string();
            if by_id.insert(id.clone(), position).is_some() {
                return Err(SynthError::Join {
                    message: format!("customer id {} appears more than once", id),
                });
            }
            if let Some(key) = customer.geo_key.as_ref().filter(|k| !k.is_empty()) {
                by_key.entry(key.clone()).or_default().push(position);
            }
        }

        debug!(
            "Loaded {} customers across {} geo-keys",
            customers.len(),
            by_key.len()
        );
        Ok(Self {
            customers,
            by_id,
            by_key,
        })
    }

    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }

    pub fn customers(&self) -> &[Customer] {
        &self.customers
    }

    pub fn get(&self, customer_id: &str) -> Option<&Customer> {
        self.by_id.get(customer_id.trim()).map(|&i| &self.customers[i])
    }

    /// Every customer id, in directory order
    pub fn global_pool(&self) -> Vec<String> {
        self.customers.iter().map(|c| c.customer_id.clone()).collect()
    }

    /// Customers living in any of the given keys, grouped by key in key order
    pub fn restricted_pool(&self, keys: &BTreeSet<GeoKey>) -> Vec<String> {
        let mut pool = Vec::new();
        for key in keys {
            match self.by_key.get(key) {
                Some(positions) => {
                    debug!("Geo-key {}: {} customers", key, positions.len());
                    pool.extend(positions.iter().map(|&i| self.customers[i].customer_id.clone()));
                }
                None => warn!("Geo-key {}: no customers found", key),
            }
        }
        pool
    }

    pub fn key_counts(&self) -> Vec<(GeoKey, usize)> {
        let mut counts: Vec<(GeoKey, usize)> = self
            .by_key
            .iter()
            .map(|(k, v)| (k.clone(), v.len()))
            .collect();
        counts.sort();
        counts
    }

    /// Left join of calls onto their assigned customer's geo-key.
    ///
    /// Every call must have an identity assignment; a customer missing from
    /// the directory leaves the record without a key.
    pub fn join(
        &self,
        calls: &[CallRecord],
        assignments: &[IdentityAssignment],
        outage_reason: &str,
    ) -> Result<JoinOutcome> {
        let owner: HashMap<&str, &str> = assignments
            .iter()
            .map(|a| (a.record_id.as_str(), a.identity_token.as_str()))
            .collect();

        let mut outcome = JoinOutcome {
            records: Vec::with_capacity(calls.len()),
            missing_key: 0,
        };

        for call in calls {
            let customer_id = owner.get(call.call_id.as_str()).ok_or_else(|| SynthError::Join {
                message: format!("call {} has no customer assignment", call.call_id),
            })?;
            let geo_key = self
                .get(customer_id)
                .and_then(|c| c.geo_key.clone())
                .filter(|k| !k.is_empty());
            if geo_key.is_none() {
                outcome.missing_key += 1;
            }
            outcome.records.push(InputRecord {
                record_id: call.call_id.clone(),
                geo_key,
                category: CategoryFlag::from_call_reason(&call.call_reason, outage_reason),
            });
        }

        if outcome.missing_key > 0 {
            warn!("{} calls have no geo-key (customer not found)", outcome.missing_key);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OUTAGE_CALL_REASON;

    fn directory() -> CustomerDirectory {
        CustomerDirectory::new(vec![
            Customer::new("C1", Some("6604")),
            Customer::new("C2", Some("06604")),
            Customer::new("C3", Some("75201.0")),
            Customer::new("C4", None),
        ])
        .unwrap()
    }

    #[test]
    fn test_restricted_pool_matches_any_representation() {
        let dir = directory();
        let keys: BTreeSet<GeoKey> = ["06604", "06673"].into_iter().map(GeoKey::from).collect();
        assert_eq!(dir.restricted_pool(&keys), vec!["C1", "C2"]);
        assert_eq!(dir.global_pool().len(), 4);
    }

    #[test]
    fn test_duplicate_customer_ids_are_rejected() {
        let err = CustomerDirectory::new(vec![
            Customer::new("C1", Some("1")),
            Customer::new(" C1 ", Some("2")),
        ])
        .unwrap_err();
        assert!(matches!(err, SynthError::Join { .. }));
    }

    #[test]
    fn test_join_attaches_keys_and_categories() {
        let dir = directory();
        let calls = vec![
            CallRecord { call_id: "A".into(), call_reason: "technical_support".into() },
            CallRecord { call_id: "B".into(), call_reason: "billing_inquiry".into() },
            CallRecord { call_id: "C".into(), call_reason: "technical_support".into() },
            CallRecord { call_id: "D".into(), call_reason: "account_management".into() },
        ];
        let assign = |call: &str, customer: &str| IdentityAssignment {
            record_id: call.to_string(),
            identity_token: customer.to_string(),
            event_id: None,
        };
        let assignments = vec![assign("A", "C1"), assign("B", "C3"), assign("C", "C4"), assign("D", "C99")];

        let outcome = dir.join(&calls, &assignments, OUTAGE_CALL_REASON).unwrap();
        assert_eq!(outcome.records.len(), 4);
        assert_eq!(outcome.missing_key, 2);
        assert_eq!(outcome.records[0].geo_key.as_ref().unwrap().as_str(), "06604");
        assert_eq!(outcome.records[0].category, CategoryFlag::OutageRelated);
        assert_eq!(outcome.records[1].category, CategoryFlag::Other);
        assert_eq!(outcome.records[2].geo_key, None);
    }

    #[test]
    fn test_join_requires_an_assignment_per_call() {
        let dir = directory();
        let calls = vec![CallRecord { call_id: "A".into(), call_reason: "billing_inquiry".into() }];
        assert!(dir.join(&calls, &[], OUTAGE_CALL_REASON).is_err());
    }
}
