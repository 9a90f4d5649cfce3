//! Unrelated/Related Mapper
//!
//! Attaches rows of a secondary query to a batch by plain value equality:
//! `source.group_by_attr == target.map_by_attr`. No declared relationship is
//! required, so the same machinery serves loosely linked columns (an unconstrained
//! `user_id`) and natural keys. Every pass costs exactly one extra query.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

use crate::bucket::{Bucketing, MapRelatedCondition};
use crate::entity::{Instance, KeyValue, Slot};
use crate::error::{PoolingError, PoolingResult};
use crate::manager::Manager;
use crate::pipeline::callback::{EvaluationCallback, EvaluationContext};
use crate::query::Query;
use crate::schema::{RelationshipType, Schema};

/// Map rows of `query` onto a batch
#[derive(Debug, Clone, PartialEq)]
pub struct PrefetchUnrelatedCall {
    pub query: Query,
    /// Column on the source rows
    pub group_by_attr: String,
    /// Column on the targets
    pub map_by_attr: String,
    /// List slot written on every target
    pub map_to_attr: String,
}

impl PrefetchUnrelatedCall {
    pub fn new(query: Query, group_by_attr: &str, map_by_attr: &str, map_to_attr: &str) -> Self {
        Self {
            query,
            group_by_attr: group_by_attr.to_string(),
            map_by_attr: map_by_attr.to_string(),
            map_to_attr: map_to_attr.to_string(),
        }
    }
}

/// Targets grouped by the key they are matched on
fn targets_by_key(targets: &[Instance], map_by_attr: &str) -> HashMap<KeyValue, Vec<Instance>> {
    let mut by_key: HashMap<KeyValue, Vec<Instance>> = HashMap::new();
    for target in targets {
        if let Some(key) = target.get_key(map_by_attr) {
            by_key.entry(key).or_default().push(target.clone());
        }
    }
    by_key
}

/// Collect source rows into `map_to_attr` on every target sharing their key.
/// Every target ends with a list under `map_to_attr`, empty when nothing matched.
pub async fn map_instances(
    manager: &Manager,
    targets: &[Instance],
    source: &Query,
    group_by_attr: &str,
    map_by_attr: &str,
    map_to_attr: &str,
) -> PoolingResult<()> {
    for target in targets {
        target.set_slot(map_to_attr, Slot::Many(Vec::new()));
    }

    let by_key = targets_by_key(targets, map_by_attr);
    if by_key.is_empty() && manager.config().skip_empty_lookups {
        tracing::debug!("No '{}' values to map '{}' by; skipping its query", map_by_attr, map_to_attr);
        return Ok(());
    }

    let keys: BTreeSet<KeyValue> = by_key.keys().cloned().collect();
    let query = source.clone().filter_in(group_by_attr, keys);
    let rows = manager
        .fetch_instances(&query, manager.config().pool_select_related)
        .await?;
    tracing::debug!(
        "Mapped {} '{}' rows onto {} targets as '{}'",
        rows.len(),
        source.entity(),
        targets.len(),
        map_to_attr
    );

    for row in rows {
        let Some(key) = row.get_key(group_by_attr) else {
            continue;
        };
        for target in by_key.get(&key).into_iter().flatten() {
            target.push_to(map_to_attr, row.clone());
        }
    }
    Ok(())
}

#[async_trait]
impl EvaluationCallback for PrefetchUnrelatedCall {
    async fn on_evaluated(
        &self,
        ctx: &EvaluationContext,
        results: &[Instance],
    ) -> PoolingResult<Option<Vec<Instance>>> {
        map_instances(
            ctx.manager(),
            results,
            &self.query,
            &self.group_by_attr,
            &self.map_by_attr,
            &self.map_to_attr,
        )
        .await?;
        Ok(None)
    }

    fn describe(&self) -> String {
        format!("prefetch_unrelated({} -> {})", self.query.entity(), self.map_to_attr)
    }
}

/// Source of a `map_related` pass
#[derive(Debug, Clone, PartialEq)]
pub struct MapRelatedCall {
    pub query: Query,
    pub group_by_attr: String,
    pub map_by_attr: String,
}

impl MapRelatedCall {
    /// Targets are matched on their `id`
    pub fn new(query: Query, group_by_attr: &str) -> Self {
        Self {
            query,
            group_by_attr: group_by_attr.to_string(),
            map_by_attr: "id".to_string(),
        }
    }

    pub fn with_map_by(mut self, map_by_attr: &str) -> Self {
        self.map_by_attr = map_by_attr.to_string();
        self
    }

    /// Derive the call from a reverse relation declared on `root`
    pub fn for_relation(schema: &Schema, root: &str, relation: &str) -> PoolingResult<Self> {
        let metadata = schema.relation(root, relation)?;
        if metadata.relationship_type == RelationshipType::BelongsTo {
            return Err(PoolingError::invalid_relation(
                relation,
                "map_related needs a relation whose rows point back at this entity",
            ));
        }
        Ok(Self::new(Query::new(&metadata.related_model), &metadata.foreign_key)
            .with_map_by(&metadata.referenced_key))
    }
}

/// Either a relation name or an explicit call
#[derive(Debug, Clone, PartialEq)]
pub enum MapSource {
    Relation(String),
    Call(MapRelatedCall),
}

impl From<&str> for MapSource {
    fn from(relation: &str) -> Self {
        MapSource::Relation(relation.to_string())
    }
}

impl From<MapRelatedCall> for MapSource {
    fn from(call: MapRelatedCall) -> Self {
        MapSource::Call(call)
    }
}

impl MapSource {
    pub(crate) fn resolve(self, schema: &Schema, root: &str) -> PoolingResult<MapRelatedCall> {
        match self {
            MapSource::Relation(relation) => MapRelatedCall::for_relation(schema, root, &relation),
            MapSource::Call(call) => {
                schema.entity(call.query.entity())?;
                Ok(call)
            }
        }
    }
}

/// A `map_related` stage: one labelled query split into buckets
#[derive(Debug, Clone)]
pub struct MapRelatedStage {
    call: MapRelatedCall,
    bucketing: Bucketing,
}

impl MapRelatedStage {
    pub fn new(call: MapRelatedCall, conditions: Vec<MapRelatedCondition>) -> PoolingResult<Self> {
        Ok(Self {
            call,
            bucketing: Bucketing::new(conditions)?,
        })
    }

    pub fn bucketing(&self) -> &Bucketing {
        &self.bucketing
    }
}

#[async_trait]
impl EvaluationCallback for MapRelatedStage {
    async fn on_evaluated(
        &self,
        ctx: &EvaluationContext,
        results: &[Instance],
    ) -> PoolingResult<Option<Vec<Instance>>> {
        if results.is_empty() {
            return Ok(None);
        }

        for target in results {
            self.bucketing.initialize(target);
        }
        let by_key = targets_by_key(results, &self.call.map_by_attr);
        if by_key.is_empty() && ctx.config().skip_empty_lookups {
            return Ok(None);
        }

        let keys: BTreeSet<KeyValue> = by_key.keys().cloned().collect();
        let query = self
            .bucketing
            .annotate(self.call.query.clone())
            .filter_in(&self.call.group_by_attr, keys);
        let rows = ctx
            .manager()
            .fetch_instances(&query, ctx.config().pool_select_related)
            .await?;

        let mut dropped = 0usize;
        for row in &rows {
            let (Some(key), Some(bucket)) = (
                row.get_key(&self.call.group_by_attr),
                self.bucketing.destination(row),
            ) else {
                tracing::trace!("{:?} matched no bucket condition; dropping it", row);
                dropped += 1;
                continue;
            };
            for target in by_key.get(&key).into_iter().flatten() {
                target.push_to(&bucket, row.clone());
            }
        }
        tracing::debug!(
            "Bucketed {} '{}' rows into {} lists ({} unmatched)",
            rows.len() - dropped,
            self.call.query.entity(),
            self.bucketing.destinations().count(),
            dropped
        );
        Ok(None)
    }

    fn describe(&self) -> String {
        format!("map_related({} -> {})", self.call.query.entity(), self.bucketing.label_column())
    }
}
