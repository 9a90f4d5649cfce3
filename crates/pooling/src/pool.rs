//! Instance Pool - One shared instance per identity
//!
//! `pool_related` replaces per-row relation loading with one query per related
//! entity type. Keys are collected from the foreign key columns at the end of
//! every registered path, the related rows are fetched once into an
//! [`InstancePool`], and each path is rewritten to point at the pooled instance.
//! Rows that reference the same key end up holding the very same object.

use std::collections::{BTreeSet, HashMap};

use crate::entity::{Instance, KeyValue};
use crate::error::{PoolingError, PoolingResult};
use crate::manager::Manager;
use crate::path::RelationPath;
use crate::query::Query;
use crate::schema::Schema;

/// Canonical instances keyed by entity type and key
#[derive(Debug, Default, Clone)]
pub struct InstancePool {
    entries: HashMap<String, HashMap<KeyValue, Instance>>,
}

impl InstancePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an instance under its primary key. An instance already pooled for
    /// that key is kept and returned.
    pub fn insert(&mut self, instance: Instance) -> Instance {
        let key = instance.key();
        self.insert_as(key, instance)
    }

    /// Add an instance under an arbitrary key of its type
    pub fn insert_as(&mut self, key: KeyValue, instance: Instance) -> Instance {
        self.entries
            .entry(instance.entity_type())
            .or_default()
            .entry(key)
            .or_insert(instance)
            .clone()
    }

    pub fn get(&self, entity: &str, key: &KeyValue) -> Option<Instance> {
        self.entries.get(entity)?.get(key).cloned()
    }

    pub fn contains(&self, entity: &str, key: &KeyValue) -> bool {
        self.entries.get(entity).is_some_and(|by_key| by_key.contains_key(key))
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Explicit query used to build the pool for one entity type
#[derive(Debug, Clone, PartialEq)]
pub struct PoolRelatedCall {
    pub query: Query,
    pub related_paths: Vec<String>,
}

impl PoolRelatedCall {
    pub fn new<I, S>(query: Query, related_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            query,
            related_paths: related_paths.into_iter().map(Into::into).collect(),
        }
    }
}

/// A single `pool_related` argument
#[derive(Debug, Clone, PartialEq)]
pub enum PoolTarget {
    Path(String),
    Call(PoolRelatedCall),
}

impl From<&str> for PoolTarget {
    fn from(path: &str) -> Self {
        PoolTarget::Path(path.to_string())
    }
}

impl From<String> for PoolTarget {
    fn from(path: String) -> Self {
        PoolTarget::Path(path)
    }
}

impl From<PoolRelatedCall> for PoolTarget {
    fn from(call: PoolRelatedCall) -> Self {
        PoolTarget::Call(call)
    }
}

/// Every path pooled from one query
#[derive(Debug, Clone)]
struct RelationsToPool {
    entity: String,
    key_column: String,
    paths: Vec<RelationPath>,
    explicit: Option<Query>,
}

impl RelationsToPool {
    fn add_path(&mut self, path: RelationPath) {
        if !self.paths.iter().any(|p| p.as_str() == path.as_str()) {
            self.paths.push(path);
        }
    }

    fn pools(&self, raw: &str) -> bool {
        self.paths.iter().any(|p| p.as_str() == raw)
    }

    /// Whether any path walks through a slot another entry assigns
    fn depends_on(&self, other: &RelationsToPool) -> bool {
        self.paths.iter().any(|path| {
            let mut prefix = path.parent();
            while let Some(level) = prefix {
                if other.pools(level.as_str()) {
                    return true;
                }
                prefix = level.parent();
            }
            false
        })
    }
}

/// Pooling registrations of one query, grouped by related type in registration order
/// and evaluated in path-dependency order
#[derive(Debug, Clone, Default)]
pub struct PoolRequests {
    entries: Vec<RelationsToPool>,
}

impl PoolRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of pool queries evaluation will issue at most
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Compile and record one target. Only foreign-key paths can be pooled.
    pub fn register(&mut self, schema: &Schema, root: &str, target: PoolTarget) -> PoolingResult<()> {
        match target {
            PoolTarget::Path(raw) => {
                let path = schema.compile_path(root, &raw)?;
                path.require_forward()?;
                self.entry(&path).add_path(path);
            }
            PoolTarget::Call(call) => {
                if call.related_paths.is_empty() {
                    return Err(PoolingError::Configuration(format!(
                        "PoolRelatedCall for '{}' names no paths",
                        call.query.entity()
                    )));
                }
                let mut paths = Vec::with_capacity(call.related_paths.len());
                for raw in &call.related_paths {
                    let path = schema.compile_path(root, raw)?;
                    path.require_forward()?;
                    if path.target() != call.query.entity() {
                        return Err(PoolingError::invalid_relation(
                            raw,
                            format!(
                                "leads to '{}' but the pool query selects '{}'",
                                path.target(),
                                call.query.entity()
                            ),
                        ));
                    }
                    paths.push(path);
                }
                for path in paths {
                    let entry = self.entry(&path);
                    entry.explicit = Some(call.query.clone());
                    entry.add_path(path);
                }
            }
        }
        Ok(())
    }

    fn entry(&mut self, path: &RelationPath) -> &mut RelationsToPool {
        let entity = path.target();
        let key_column = &path.last().referenced_key;
        let position = self
            .entries
            .iter()
            .position(|e| e.entity == entity && &e.key_column == key_column);
        let index = match position {
            Some(index) => index,
            None => {
                self.entries.push(RelationsToPool {
                    entity: entity.to_string(),
                    key_column: key_column.clone(),
                    paths: Vec::new(),
                    explicit: None,
                });
                self.entries.len() - 1
            }
        };
        &mut self.entries[index]
    }

    /// Entries ordered so each pool runs after the pools filling its path prefixes.
    /// Registration order breaks ties; entries caught in a cycle keep it too.
    fn evaluation_order(&self) -> Vec<&RelationsToPool> {
        let mut pending: Vec<&RelationsToPool> = self.entries.iter().collect();
        let mut ordered = Vec::with_capacity(pending.len());
        while !pending.is_empty() {
            let ready = pending
                .iter()
                .position(|entry| {
                    !pending
                        .iter()
                        .any(|other| !std::ptr::eq(*other, *entry) && entry.depends_on(other))
                })
                .unwrap_or(0);
            ordered.push(pending.remove(ready));
        }
        ordered
    }

    /// Build one pool per related type and rewrite every registered path
    pub async fn evaluate(&self, manager: &Manager, results: &[Instance]) -> PoolingResult<()> {
        if results.is_empty() {
            return Ok(());
        }

        for entry in self.evaluation_order() {
            let mut ids = BTreeSet::new();
            for path in &entry.paths {
                for result in results {
                    if let Some(id) = path.related_id(result)? {
                        ids.insert(id);
                    }
                }
            }

            let mut pool = InstancePool::new();
            if ids.is_empty() && manager.config().skip_empty_lookups {
                tracing::debug!("No '{}' keys to pool; skipping its query", entry.entity);
            } else {
                let id_count = ids.len();
                let query = entry
                    .explicit
                    .clone()
                    .unwrap_or_else(|| Query::new(&entry.entity))
                    .filter_in(&entry.key_column, ids);
                let fetched = manager
                    .fetch_instances(&query, manager.config().pool_select_related)
                    .await?;
                tracing::debug!(
                    "Pooled {} '{}' instances for {} keys across {} paths",
                    fetched.len(),
                    entry.entity,
                    id_count,
                    entry.paths.len()
                );
                for instance in fetched {
                    if let Some(key) = instance.get_key(&entry.key_column) {
                        pool.insert_as(key, instance);
                    }
                }
            }

            for path in &entry.paths {
                for result in results {
                    path.assign_from_pool(result, &pool)?;
                }
            }
        }
        Ok(())
    }
}
