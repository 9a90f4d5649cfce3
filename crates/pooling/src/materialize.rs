//! Row Materialization - Turning fetched rows into instances
//!
//! A native join returns the same related row once per parent that references it.
//! How those repeats are materialized is decided by a [`PopulateStrategy`]:
//! [`FreshPopulate`] builds a new instance every time, [`PooledPopulate`] reuses the
//! instance built for the first occurrence of a key at the same join path.
//!
//! A strategy value lives for exactly one evaluation. It is passed into the fetch
//! path explicitly and dropped afterwards, so concurrent evaluations never share
//! a cache.

use std::collections::{BTreeMap, HashMap};

use crate::entity::{Entity, Instance, KeyValue, Slot};
use crate::error::PoolingResult;
use crate::schema::Schema;
use crate::store::Row;

/// Materialization-time cache consulted for every joined row
pub trait PopulateStrategy: Send {
    /// A previously built instance for this join path and key
    fn cached(&mut self, join_path: &str, key: &KeyValue) -> Option<Instance>;

    /// Remember an instance built for this join path
    fn store(&mut self, join_path: &str, instance: &Instance);

    fn name(&self) -> &'static str;
}

/// Build every joined row as its own instance
#[derive(Debug, Default, Clone, Copy)]
pub struct FreshPopulate;

impl PopulateStrategy for FreshPopulate {
    fn cached(&mut self, _join_path: &str, _key: &KeyValue) -> Option<Instance> {
        None
    }

    fn store(&mut self, _join_path: &str, _instance: &Instance) {}

    fn name(&self) -> &'static str {
        "fresh"
    }
}

/// Reuse one instance per (join path, primary key) within a single evaluation
#[derive(Debug, Default)]
pub struct PooledPopulate {
    cache: HashMap<(String, KeyValue), Instance>,
    hits: usize,
}

impl PooledPopulate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joined rows that were served from the cache
    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl PopulateStrategy for PooledPopulate {
    fn cached(&mut self, join_path: &str, key: &KeyValue) -> Option<Instance> {
        let found = self.cache.get(&(join_path.to_string(), key.clone())).cloned();
        if found.is_some() {
            self.hits += 1;
        }
        found
    }

    fn store(&mut self, join_path: &str, instance: &Instance) {
        self.cache
            .insert((join_path.to_string(), instance.key()), instance.clone());
    }

    fn name(&self) -> &'static str {
        "pooled"
    }
}

/// Builds root instances and their joined relations from store rows
pub struct Materializer<'a> {
    schema: &'a Schema,
    strategy: &'a mut dyn PopulateStrategy,
}

impl<'a> Materializer<'a> {
    pub fn new(schema: &'a Schema, strategy: &'a mut dyn PopulateStrategy) -> Self {
        Self { schema, strategy }
    }

    /// Root rows are always built fresh; joined rows go through the strategy
    pub fn materialize(&mut self, entity: &str, rows: Vec<Row>) -> PoolingResult<Vec<Instance>> {
        let schema = self.schema;
        let entity_schema = schema.entity(entity)?;
        let mut instances = Vec::with_capacity(rows.len());
        for row in rows {
            let root = Instance::new(Entity::from_columns(entity_schema, row.columns)?);
            self.populate(&root, entity, row.related, "")?;
            instances.push(root);
        }
        tracing::trace!(
            "Materialized {} '{}' rows with the {} strategy",
            instances.len(),
            entity,
            self.strategy.name()
        );
        Ok(instances)
    }

    fn populate(
        &mut self,
        owner: &Instance,
        owner_type: &str,
        related: BTreeMap<String, Option<Row>>,
        prefix: &str,
    ) -> PoolingResult<()> {
        let schema = self.schema;
        for (name, child) in related {
            let metadata = schema.relation(owner_type, &name)?;
            let join_path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", prefix, name)
            };

            let instance = match child {
                None => None,
                Some(child) => {
                    let related_schema = schema.entity(&metadata.related_model)?;
                    let entity = Entity::from_columns(related_schema, child.columns)?;
                    match self.strategy.cached(&join_path, entity.key()) {
                        Some(existing) => Some(existing),
                        None => {
                            let built = Instance::new(entity);
                            self.populate(&built, &metadata.related_model, child.related, &join_path)?;
                            self.strategy.store(&join_path, &built);
                            Some(built)
                        }
                    }
                }
            };
            owner.set_slot(&name, Slot::One(instance));
        }
        Ok(())
    }
}
