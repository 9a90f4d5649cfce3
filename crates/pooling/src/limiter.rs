//! Prefetch Limiter
//!
//! Caps how many children a collection prefetch materializes per parent.
//! With an explicit limit the collection is prefetched in full and truncated
//! client-side once loaded. Without one, a store that keeps the first row per key
//! is asked for `DISTINCT ON (<foreign key>)`, so each parent receives at most one
//! child from the same round trip; other stores fall back to truncating to one.

use async_trait::async_trait;

use crate::entity::Instance;
use crate::error::{PoolingError, PoolingResult};
use crate::manager::Manager;
use crate::path::RelationPath;
use crate::pipeline::callback::{EvaluationCallback, EvaluationContext};
use crate::query::{Distinct, Prefetch, Query};

/// One collection to limit
#[derive(Debug, Clone, PartialEq)]
pub enum LimitTarget {
    Path(String),
    Prefetch(Prefetch),
}

impl LimitTarget {
    fn into_prefetch(self) -> Prefetch {
        match self {
            LimitTarget::Path(path) => Prefetch::new(&path),
            LimitTarget::Prefetch(prefetch) => prefetch,
        }
    }
}

impl From<&str> for LimitTarget {
    fn from(path: &str) -> Self {
        LimitTarget::Path(path.to_string())
    }
}

impl From<Prefetch> for LimitTarget {
    fn from(prefetch: Prefetch) -> Self {
        LimitTarget::Prefetch(prefetch)
    }
}

#[derive(Debug, Clone)]
struct LimitedSlot {
    path: RelationPath,
    slot: String,
    limit: usize,
}

/// Truncates prefetched collections once the batch is loaded
#[derive(Debug, Clone, Default)]
pub struct PrefetchLimiter {
    slots: Vec<LimitedSlot>,
}

impl PrefetchLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, path: RelationPath, slot: &str, limit: usize) {
        self.slots.push(LimitedSlot {
            path,
            slot: slot.to_string(),
            limit,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Cut every limited slot reachable from `instance`
    pub fn apply(&self, instance: &Instance) -> PoolingResult<()> {
        for limited in &self.slots {
            for owner in limited.path.owners(instance)? {
                if !owner.truncate(&limited.slot, limited.limit) {
                    return Err(PoolingError::RelationNotLoaded {
                        entity: owner.entity_type(),
                        relation: limited.slot.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EvaluationCallback for PrefetchLimiter {
    async fn on_evaluated(
        &self,
        _ctx: &EvaluationContext,
        results: &[Instance],
    ) -> PoolingResult<Option<Vec<Instance>>> {
        for result in results {
            self.apply(result)?;
        }
        Ok(None)
    }

    fn describe(&self) -> String {
        let slots: Vec<String> = self
            .slots
            .iter()
            .map(|s| format!("{}<={}", s.slot, s.limit))
            .collect();
        format!("prefetch_limiter({})", slots.join(", "))
    }
}

/// Prefetches to add and the truncation pass to register, if any
#[derive(Debug, Clone)]
pub(crate) struct LimitPlan {
    pub prefetches: Vec<Prefetch>,
    pub limiter: Option<PrefetchLimiter>,
}

/// Validate every target and choose a strategy. Only collections can be limited.
pub(crate) fn plan(
    manager: &Manager,
    root: &str,
    targets: Vec<LimitTarget>,
    limit: Option<usize>,
) -> PoolingResult<LimitPlan> {
    let use_distinct_on =
        limit.is_none() && manager.store().supports_distinct_on() && manager.config().prefer_distinct_on;
    if limit.is_none() && !use_distinct_on {
        tracing::debug!("DISTINCT ON unavailable for '{}'; limiting prefetches client-side", root);
    }

    let mut prefetches = Vec::with_capacity(targets.len());
    let mut limiter = PrefetchLimiter::new();
    for target in targets {
        let mut prefetch = target.into_prefetch();
        let path = manager.schema().compile_path(root, &prefetch.path)?;
        path.require_collection_tail()?;

        let relation = path.last();
        if let Some(query) = &prefetch.query {
            if query.entity() != relation.related_model {
                return Err(PoolingError::Configuration(format!(
                    "Prefetch query for '{}' selects '{}' instead of '{}'",
                    prefetch.path,
                    query.entity(),
                    relation.related_model
                )));
            }
        }

        if limit.is_none() {
            let query = prefetch
                .query
                .take()
                .unwrap_or_else(|| Query::new(&relation.related_model));
            let distinct = query.distinct_clause();
            let on_foreign_key = matches!(
                distinct,
                Distinct::On(columns) if columns.len() == 1 && columns[0] == relation.foreign_key
            );
            if distinct.is_set() && !on_foreign_key {
                return Err(PoolingError::UnsupportedQuery(format!(
                    "'{}' already uses {:?}; limiting needs DISTINCT ON ({})",
                    prefetch.path, distinct, relation.foreign_key
                )));
            }
            prefetch.query = Some(if use_distinct_on {
                query.distinct_on([relation.foreign_key.as_str()])
            } else {
                query
            });
        }

        if !use_distinct_on {
            limiter.push(path.clone(), prefetch.slot_name(), limit.unwrap_or(1));
        }
        prefetches.push(prefetch);
    }

    Ok(LimitPlan {
        prefetches,
        limiter: if limiter.is_empty() { None } else { Some(limiter) },
    })
}
