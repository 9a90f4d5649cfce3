//! Conditional Bucketer
//!
//! Classification is pushed into the source query: a single `CASE` projection
//! labels every row with the destination of the first condition it satisfies.
//! Client-side, rows are appended to the list named by their label. Rows that
//! satisfy no condition get a NULL label and are left out of every bucket.

use std::collections::HashSet;

use serde_json::Value;

use crate::entity::{Instance, Slot};
use crate::error::{PoolingError, PoolingResult};
use crate::query::{Annotation, Condition, Query};

/// Route rows satisfying `condition` into the list named `to_attr`
#[derive(Debug, Clone, PartialEq)]
pub struct MapRelatedCondition {
    pub condition: Condition,
    pub to_attr: String,
}

impl MapRelatedCondition {
    pub fn new(condition: Condition, to_attr: &str) -> Self {
        Self {
            condition,
            to_attr: to_attr.to_string(),
        }
    }
}

/// An ordered set of bucket conditions and the label column they project
#[derive(Debug, Clone, PartialEq)]
pub struct Bucketing {
    conditions: Vec<MapRelatedCondition>,
    label_column: String,
}

impl Bucketing {
    pub fn new(conditions: Vec<MapRelatedCondition>) -> PoolingResult<Self> {
        if conditions.is_empty() {
            return Err(PoolingError::Configuration(
                "Bucketing needs at least one condition".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for condition in &conditions {
            if condition.to_attr.is_empty() || !seen.insert(condition.to_attr.as_str()) {
                return Err(PoolingError::Configuration(format!(
                    "Bucket name '{}' is empty or used twice",
                    condition.to_attr
                )));
            }
        }

        let names: Vec<&str> = conditions.iter().map(|c| c.to_attr.as_str()).collect();
        let label_column = format!("_{}", names.join("_"));
        Ok(Self {
            conditions,
            label_column,
        })
    }

    /// Column carrying each row's bucket name
    pub fn label_column(&self) -> &str {
        &self.label_column
    }

    pub fn destinations(&self) -> impl Iterator<Item = &str> {
        self.conditions.iter().map(|c| c.to_attr.as_str())
    }

    /// The `CASE WHEN ... THEN '<to_attr>' ... ELSE NULL END` projection
    pub fn projection(&self) -> Annotation {
        let whens = self
            .conditions
            .iter()
            .map(|c| (c.condition.clone(), Value::String(c.to_attr.clone())))
            .collect();
        Annotation::case(&self.label_column, whens, Value::Null)
    }

    pub fn annotate(&self, query: Query) -> Query {
        query.annotate(self.projection())
    }

    /// Give a target an empty list under every destination
    pub fn initialize(&self, target: &Instance) {
        for name in self.destinations() {
            target.set_slot(name, Slot::Many(Vec::new()));
        }
    }

    /// Destination named by a labelled row, if it matched any condition
    pub fn destination(&self, row: &Instance) -> Option<String> {
        match row.get(&self.label_column) {
            Some(Value::String(label)) if self.destinations().any(|d| d == label) => Some(label),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::instance;
    use serde_json::json;

    fn by_make() -> Bucketing {
        Bucketing::new(vec![
            MapRelatedCondition::new(Condition::eq("make", "bmw"), "bmw_vehicles"),
            MapRelatedCondition::new(Condition::eq("make", "ford"), "ford_vehicles"),
        ])
        .unwrap()
    }

    #[test]
    fn test_label_column_joins_destinations() {
        assert_eq!(by_make().label_column(), "_bmw_vehicles_ford_vehicles");
    }

    #[test]
    fn test_projection_orders_conditions() {
        match by_make().projection() {
            Annotation::Case { alias, whens, default } => {
                assert_eq!(alias, "_bmw_vehicles_ford_vehicles");
                assert_eq!(whens[0].1, json!("bmw_vehicles"));
                assert_eq!(whens[1].1, json!("ford_vehicles"));
                assert_eq!(default, Value::Null);
            }
            other => panic!("expected a CASE projection, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_empty_and_duplicate_buckets() {
        assert!(matches!(Bucketing::new(vec![]), Err(PoolingError::Configuration(_))));
        let duplicate = vec![
            MapRelatedCondition::new(Condition::eq("make", "bmw"), "cars"),
            MapRelatedCondition::new(Condition::eq("make", "ford"), "cars"),
        ];
        assert!(matches!(Bucketing::new(duplicate), Err(PoolingError::Configuration(_))));
    }

    #[test]
    fn test_initialize_and_destination() {
        let bucketing = by_make();
        let user = instance("User", json!({"id": 1}));
        bucketing.initialize(&user);
        assert_eq!(user.list("bmw_vehicles"), Some(vec![]));
        assert_eq!(user.list("ford_vehicles"), Some(vec![]));

        let labelled = instance("Vehicle", json!({"id": 3, "_bmw_vehicles_ford_vehicles": "ford_vehicles"}));
        assert_eq!(bucketing.destination(&labelled).as_deref(), Some("ford_vehicles"));

        let unmatched = instance("Vehicle", json!({"id": 4, "_bmw_vehicles_ford_vehicles": null}));
        assert_eq!(bucketing.destination(&unmatched), None);
    }
}
