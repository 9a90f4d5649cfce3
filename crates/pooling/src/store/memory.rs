//! In-memory store
//!
//! Tables are plain vectors of JSON rows evaluated in-process. Every `fetch` counts
//! as one round trip and is recorded in a query log, which makes the store suitable
//! for asserting how many queries a pipeline issues.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};

use super::{Row, Store};
use crate::entity::KeyValue;
use crate::error::{PoolingError, PoolingResult};
use crate::path::RelationPath;
use crate::query::{compare_json, Annotation, Distinct, OrderDirection, Query};
use crate::schema::{RelationshipMetadata, RelationshipType, Schema};

type Table = Vec<Map<String, Value>>;

/// Thread-safe in-memory store with a query counter
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
    queries: AtomicUsize,
    log: Mutex<Vec<String>>,
    distinct_on: bool,
    primary_keys: HashMap<String, String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            queries: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
            distinct_on: true,
            primary_keys: HashMap::new(),
        }
    }

    /// Take primary key columns from the schema; undeclared entities keep `id`
    pub fn with_schema(mut self, schema: &Schema) -> Self {
        self.primary_keys = schema
            .entities()
            .map(|entity| (entity.name.clone(), entity.primary_key.clone()))
            .collect();
        self
    }

    /// A store that cannot keep the first row per key
    pub fn without_distinct_on() -> Self {
        Self {
            distinct_on: false,
            ..Self::new()
        }
    }

    fn key_column<'a>(&'a self, entity: &str) -> &'a str {
        self.primary_keys.get(entity).map_or("id", String::as_str)
    }

    /// Insert a row, assigning the next integer primary key when the row has none
    pub fn insert(&self, entity: &str, columns: Value) -> PoolingResult<KeyValue> {
        let Value::Object(mut columns) = columns else {
            return Err(PoolingError::Serialization(format!(
                "Rows for '{}' must be JSON objects",
                entity
            )));
        };

        let key_column = self.key_column(entity);
        let mut tables = self.tables.write();
        let table = tables.entry(entity.to_string()).or_default();
        if columns.get(key_column).map_or(true, Value::is_null) {
            let next = table
                .iter()
                .filter_map(|row| row.get(key_column).and_then(Value::as_i64))
                .max()
                .unwrap_or(0)
                + 1;
            columns.insert(key_column.to_string(), Value::from(next));
        }

        let key = columns
            .get(key_column)
            .and_then(KeyValue::from_json)
            .ok_or_else(|| PoolingError::MissingPrimaryKey(entity.to_string()))?;
        table.push(columns);
        Ok(key)
    }

    /// Overwrite one column of the row with the given primary key
    pub fn update(&self, entity: &str, key: &KeyValue, column: &str, value: Value) -> PoolingResult<()> {
        let key_column = self.key_column(entity);
        let mut tables = self.tables.write();
        let row = tables
            .get_mut(entity)
            .and_then(|table| {
                table
                    .iter_mut()
                    .find(|row| row.get(key_column).and_then(KeyValue::from_json).as_ref() == Some(key))
            })
            .ok_or_else(|| PoolingError::NotFound(entity.to_string()))?;
        row.insert(column.to_string(), value);
        Ok(())
    }

    pub fn len(&self, entity: &str) -> usize {
        self.tables.read().get(entity).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().values().all(Vec::is_empty)
    }

    /// Number of fetches executed so far
    pub fn query_count(&self) -> usize {
        self.queries.load(AtomicOrdering::SeqCst)
    }

    /// Rendered queries in execution order
    pub fn queries(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn reset_queries(&self) {
        self.queries.store(0, AtomicOrdering::SeqCst);
        self.log.lock().clear();
    }

    fn run(&self, schema: &Schema, query: &Query) -> PoolingResult<Vec<Row>> {
        let number = self.queries.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        let rendered = query.to_string();
        tracing::debug!("MemoryStore query #{}: {}", number, rendered);
        self.log.lock().push(rendered);

        let entity = query.entity();
        schema.entity(entity)?;

        let tables = self.tables.read();
        let mut rows: Table = tables
            .get(entity)
            .map(|table| {
                table
                    .iter()
                    .filter(|row| query.conditions().iter().all(|c| c.matches(row)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        for annotation in query.annotations() {
            for row in rows.iter_mut() {
                let value = annotate(schema, &tables, entity, annotation, row)?;
                row.insert(annotation.alias().to_string(), value);
            }
        }

        if !query.ordering().is_empty() {
            rows.sort_by(|a, b| {
                for order in query.ordering() {
                    let left = a.get(&order.column).unwrap_or(&Value::Null);
                    let right = b.get(&order.column).unwrap_or(&Value::Null);
                    let ordering = compare_json(left, right).unwrap_or(Ordering::Equal);
                    let ordering = match order.direction {
                        OrderDirection::Asc => ordering,
                        OrderDirection::Desc => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        match query.distinct_clause() {
            Distinct::None => {}
            Distinct::All => {
                let mut seen = HashSet::new();
                rows.retain(|row| seen.insert(Value::Object(row.clone()).to_string()));
            }
            Distinct::On(columns) => {
                if !self.distinct_on {
                    return Err(PoolingError::UnsupportedQuery(
                        "this store does not support DISTINCT ON".to_string(),
                    ));
                }
                let mut seen = HashSet::new();
                rows.retain(|row| {
                    let key: Vec<Value> = columns
                        .iter()
                        .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                        .collect();
                    seen.insert(Value::Array(key).to_string())
                });
            }
        }

        if let Some(limit) = query.row_limit() {
            rows.truncate(limit);
        }

        let joins = query
            .joins()
            .iter()
            .map(|path| RelationPath::compile(schema, entity, path))
            .collect::<PoolingResult<Vec<_>>>()?;

        let mut result: Vec<Row> = rows.into_iter().map(Row::new).collect();
        for path in &joins {
            path.require_to_one()?;
            for row in result.iter_mut() {
                join(&tables, row, path.segments());
            }
        }

        tracing::trace!("MemoryStore query #{} returned {} rows", number, result.len());
        Ok(result)
    }
}

fn annotate(
    schema: &Schema,
    tables: &HashMap<String, Table>,
    entity: &str,
    annotation: &Annotation,
    row: &Map<String, Value>,
) -> PoolingResult<Value> {
    match annotation {
        Annotation::Case { whens, default, .. } => Ok(whens
            .iter()
            .find(|(condition, _)| condition.matches(row))
            .map(|(_, value)| value.clone())
            .unwrap_or_else(|| default.clone())),
        Annotation::Count { relation, .. } => {
            let metadata = schema.relation(entity, relation)?;
            let count = related_rows(tables, metadata, row).len();
            Ok(Value::from(count))
        }
    }
}

/// Rows linked to `row` through one relationship
fn related_rows<'a>(
    tables: &'a HashMap<String, Table>,
    metadata: &RelationshipMetadata,
    row: &Map<String, Value>,
) -> Vec<&'a Map<String, Value>> {
    let Some(link) = row.get(metadata.owner_column()).filter(|v| !v.is_null()) else {
        return Vec::new();
    };
    tables
        .get(&metadata.related_model)
        .map(|table| {
            table
                .iter()
                .filter(|candidate| {
                    candidate
                        .get(metadata.related_column())
                        .and_then(|value| compare_json(value, link))
                        == Some(Ordering::Equal)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn join(tables: &HashMap<String, Table>, row: &mut Row, segments: &[RelationshipMetadata]) {
    let Some((segment, rest)) = segments.split_first() else {
        return;
    };

    if !row.related.contains_key(&segment.name) {
        let found = match segment.relationship_type {
            RelationshipType::HasMany => None,
            RelationshipType::BelongsTo | RelationshipType::HasOne => related_rows(tables, segment, &row.columns)
                .first()
                .map(|columns| Row::new((*columns).clone())),
        };
        row.related.insert(segment.name.clone(), found);
    }

    if let Some(Some(child)) = row.related.get_mut(&segment.name) {
        join(tables, child, rest);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn fetch(&self, schema: &Schema, query: &Query) -> PoolingResult<Vec<Row>> {
        self.run(schema, query)
    }

    fn supports_distinct_on(&self) -> bool {
        self.distinct_on
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Condition;
    use crate::schema::EntitySchema;
    use crate::test_support::demo_schema;
    use serde_json::json;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert("Address", json!({})).unwrap();
        store.insert("User", json!({"address_id": 1})).unwrap();
        store.insert("User", json!({"address_id": null})).unwrap();
        for (owner, make) in [(1, "bmw"), (1, "ford"), (2, "bmw")] {
            store
                .insert("Vehicle", json!({"owner_id": owner, "parking_address_id": 1, "make": make}))
                .unwrap();
        }
        store
    }

    #[test]
    fn test_insert_assigns_ids() {
        let store = MemoryStore::new();
        assert_eq!(store.insert("User", json!({"address_id": 1})).unwrap(), KeyValue::Int(1));
        assert_eq!(store.insert("User", json!({"id": 7})).unwrap(), KeyValue::Int(7));
        assert_eq!(store.insert("User", json!({})).unwrap(), KeyValue::Int(8));
        assert!(store.insert("User", json!([1])).is_err());
        assert_eq!(store.len("User"), 3);
    }

    #[test]
    fn test_insert_uses_declared_primary_key() {
        let schema = demo_schema()
            .with_entity(EntitySchema::new("Currency").with_primary_key("code"))
            .with_entity(EntitySchema::new("Ledger").with_primary_key("number"));
        let store = MemoryStore::new().with_schema(&schema);

        assert_eq!(
            store.insert("Currency", json!({"code": "EUR", "name": "euro"})).unwrap(),
            KeyValue::Text("EUR".to_string())
        );
        assert_eq!(store.insert("Ledger", json!({"name": "cash"})).unwrap(), KeyValue::Int(1));
        assert_eq!(store.insert("Ledger", json!({"number": 40})).unwrap(), KeyValue::Int(40));
        assert_eq!(store.insert("Ledger", json!({})).unwrap(), KeyValue::Int(41));

        store
            .update("Currency", &KeyValue::Text("EUR".to_string()), "name", json!("Euro"))
            .unwrap();
        assert!(matches!(
            store.update("Currency", &KeyValue::Int(1), "name", json!("x")),
            Err(PoolingError::NotFound(_))
        ));
        // entities without a custom key use `id`
        assert_eq!(store.insert("User", json!({})).unwrap(), KeyValue::Int(1));
    }

    #[tokio::test]
    async fn test_fetch_counts_and_logs_queries() {
        let store = seeded();
        let schema = demo_schema();

        let query = Query::new("Vehicle").filter(Condition::eq("make", "bmw"));
        let rows = store.fetch(&schema, &query).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(store.query_count(), 1);
        assert_eq!(store.queries(), vec![query.to_string()]);

        store.reset_queries();
        assert_eq!(store.query_count(), 0);
    }

    #[tokio::test]
    async fn test_distinct_on_keeps_first_row_per_key() {
        let store = seeded();
        let schema = demo_schema();

        let query = Query::new("Vehicle").order_by_desc("id").distinct_on(["owner_id"]);
        let rows = store.fetch(&schema, &query).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.get("id").cloned()).collect();
        assert_eq!(ids, vec![Some(json!(3)), Some(json!(2))]);

        let limited = MemoryStore::without_distinct_on();
        assert!(!limited.supports_distinct_on());
        assert!(matches!(
            limited.fetch(&schema, &query).await,
            Err(PoolingError::UnsupportedQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_annotations() {
        let store = seeded();
        let schema = demo_schema();

        let query = Query::new("User")
            .annotate(Annotation::count("vehicle_count", "vehicles"))
            .annotate(Annotation::case(
                "has_address",
                vec![(Condition::is_not_null("address_id"), json!(true))],
                json!(false),
            ));
        let rows = store.fetch(&schema, &query).await.unwrap();

        assert_eq!(rows[0].get("vehicle_count"), Some(&json!(2)));
        assert_eq!(rows[1].get("vehicle_count"), Some(&json!(1)));
        assert_eq!(rows[0].get("has_address"), Some(&json!(true)));
        assert_eq!(rows[1].get("has_address"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_select_related_nests_rows() {
        let store = seeded();
        let schema = demo_schema();

        let query = Query::new("Vehicle").select_related("owner.address");
        let rows = store.fetch(&schema, &query).await.unwrap();
        assert_eq!(store.query_count(), 1);

        let owner = rows[0].related["owner"].as_ref().unwrap();
        assert_eq!(owner.get("id"), Some(&json!(1)));
        assert!(owner.related["address"].is_some());

        let orphan_owner = rows[2].related["owner"].as_ref().unwrap();
        assert_eq!(orphan_owner.related["address"], None);

        let rejected = Query::new("User").select_related("vehicles");
        assert!(matches!(
            store.fetch(&schema, &rejected).await,
            Err(PoolingError::InvalidRelation { .. })
        ));
    }
}
