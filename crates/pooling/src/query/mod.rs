//! Query Value - Immutable description of a single fetch
//!
//! A [`Query`] is built by value: every builder method consumes the query and
//! returns the extended copy, so a clone taken earlier never observes later
//! changes. Nothing is executed here; a [`Store`](crate::store::Store) runs it.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::KeyValue;

pub mod condition;
pub mod types;

pub use condition::{compare_json, Condition};
pub use types::{Distinct, OrderBy, OrderDirection, QueryOperator};

/// Computed column added to every fetched row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Annotation {
    /// Value of the first matching condition, else `default`
    Case {
        alias: String,
        whens: Vec<(Condition, Value)>,
        default: Value,
    },
    /// Number of rows reachable through a to-many relation
    Count { alias: String, relation: String },
}

impl Annotation {
    pub fn case(alias: &str, whens: Vec<(Condition, Value)>, default: Value) -> Self {
        Annotation::Case {
            alias: alias.to_string(),
            whens,
            default,
        }
    }

    pub fn count(alias: &str, relation: &str) -> Self {
        Annotation::Count {
            alias: alias.to_string(),
            relation: relation.to_string(),
        }
    }

    pub fn alias(&self) -> &str {
        match self {
            Annotation::Case { alias, .. } | Annotation::Count { alias, .. } => alias,
        }
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Annotation::Case { alias, whens, default } => {
                write!(f, "CASE")?;
                for (condition, value) in whens {
                    write!(f, " WHEN {} THEN {}", condition, value)?;
                }
                write!(f, " ELSE {} END AS {}", default, alias)
            }
            Annotation::Count { alias, relation } => write!(f, "COUNT({}) AS {}", relation, alias),
        }
    }
}

/// Collection prefetch directive, optionally with its own query and destination slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prefetch {
    pub path: String,
    pub query: Option<Query>,
    pub to_attr: Option<String>,
}

impl Prefetch {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            query: None,
            to_attr: None,
        }
    }

    pub fn with_query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }

    pub fn to_attr(mut self, name: &str) -> Self {
        self.to_attr = Some(name.to_string());
        self
    }

    /// Slot written on each owner: `to_attr` or the final path segment
    pub fn slot_name(&self) -> &str {
        match &self.to_attr {
            Some(name) => name,
            None => self.path.rsplit('.').next().unwrap_or(&self.path),
        }
    }

    /// Path of the destination, with `to_attr` replacing the final segment
    pub fn prefetch_to(&self) -> String {
        match (&self.to_attr, self.path.rfind('.')) {
            (Some(name), Some(cut)) => format!("{}.{}", &self.path[..cut], name),
            (Some(name), None) => name.clone(),
            (None, _) => self.path.clone(),
        }
    }
}

impl From<&str> for Prefetch {
    fn from(path: &str) -> Self {
        Prefetch::new(path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    entity: String,
    conditions: Vec<Condition>,
    order_by: Vec<OrderBy>,
    distinct: Distinct,
    select_related: Vec<String>,
    prefetches: Vec<Prefetch>,
    annotations: Vec<Annotation>,
    limit: Option<usize>,
}

impl Query {
    /// All rows of an entity type
    pub fn new(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            conditions: Vec::new(),
            order_by: Vec::new(),
            distinct: Distinct::None,
            select_related: Vec::new(),
            prefetches: Vec::new(),
            annotations: Vec::new(),
            limit: None,
        }
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Restrict `column` to a set of keys
    pub fn filter_in<I>(self, column: &str, keys: I) -> Self
    where
        I: IntoIterator<Item = KeyValue>,
    {
        self.filter(Condition::is_in(column, keys))
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by.push(OrderBy {
            column: column.to_string(),
            direction: OrderDirection::Asc,
        });
        self
    }

    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.order_by.push(OrderBy {
            column: column.to_string(),
            direction: OrderDirection::Desc,
        });
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = Distinct::All;
        self
    }

    pub fn distinct_on<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.distinct = Distinct::On(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Join a to-one path into the same fetch
    pub fn select_related(mut self, path: &str) -> Self {
        if !self.select_related.iter().any(|p| p == path) {
            self.select_related.push(path.to_string());
        }
        self
    }

    pub fn clear_select_related(mut self) -> Self {
        self.select_related.clear();
        self
    }

    pub fn prefetch_related(mut self, prefetch: impl Into<Prefetch>) -> Self {
        self.prefetches.push(prefetch.into());
        self
    }

    pub fn annotate(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn distinct_clause(&self) -> &Distinct {
        &self.distinct
    }

    pub fn joins(&self) -> &[String] {
        &self.select_related
    }

    pub fn prefetches(&self) -> &[Prefetch] {
        &self.prefetches
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn row_limit(&self) -> Option<usize> {
        self.limit
    }

    /// Same query without collection prefetches; stores never see them
    pub(crate) fn without_prefetches(&self) -> Self {
        Self {
            prefetches: Vec::new(),
            ..self.clone()
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;
        match &self.distinct {
            Distinct::None => {}
            Distinct::All => write!(f, "DISTINCT ")?,
            Distinct::On(columns) => write!(f, "DISTINCT ON ({}) ", columns.join(", "))?,
        }
        write!(f, "*")?;
        for annotation in &self.annotations {
            write!(f, ", {}", annotation)?;
        }
        write!(f, " FROM {}", self.entity)?;
        for path in &self.select_related {
            write!(f, " JOIN {}", path)?;
        }
        if !self.conditions.is_empty() {
            let rendered: Vec<String> = self.conditions.iter().map(|c| c.to_string()).collect();
            write!(f, " WHERE {}", rendered.join(" AND "))?;
        }
        if !self.order_by.is_empty() {
            let rendered: Vec<String> = self.order_by.iter().map(|o| o.to_string()).collect();
            write!(f, " ORDER BY {}", rendered.join(", "))?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {}", limit)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_is_by_value() {
        let base = Query::new("Vehicle").filter(Condition::eq("make", "bmw"));
        let derived = base.clone().order_by_desc("id").limit(2);

        assert!(base.ordering().is_empty());
        assert_eq!(base.row_limit(), None);
        assert_eq!(derived.conditions().len(), 1);
        assert_eq!(derived.row_limit(), Some(2));
    }

    #[test]
    fn test_select_related_is_deduplicated() {
        let query = Query::new("Ride")
            .select_related("driver")
            .select_related("driver")
            .select_related("vehicle.owner");
        assert_eq!(query.joins(), ["driver", "vehicle.owner"]);
        assert!(query.clear_select_related().joins().is_empty());
    }

    #[test]
    fn test_prefetch_destination() {
        let plain = Prefetch::new("vehicle.rides");
        assert_eq!(plain.slot_name(), "rides");
        assert_eq!(plain.prefetch_to(), "vehicle.rides");

        let renamed = Prefetch::new("vehicle.rides").to_attr("recent_rides");
        assert_eq!(renamed.slot_name(), "recent_rides");
        assert_eq!(renamed.prefetch_to(), "vehicle.recent_rides");
    }

    #[test]
    fn test_display() {
        let query = Query::new("Ride")
            .distinct_on(["vehicle_id"])
            .select_related("driver")
            .filter_in("vehicle_id", [KeyValue::Int(1), KeyValue::Int(2)])
            .annotate(Annotation::case(
                "_label",
                vec![(Condition::eq("driver_id", 3), json!("mine"))],
                Value::Null,
            ))
            .order_by("vehicle_id")
            .limit(10);

        assert_eq!(
            query.to_string(),
            "SELECT DISTINCT ON (vehicle_id) *, CASE WHEN driver_id = 3 THEN \"mine\" ELSE null END AS _label \
             FROM Ride JOIN driver WHERE vehicle_id IN (1, 2) ORDER BY vehicle_id ASC LIMIT 10"
        );
    }
}
