//! Collection Prefetch - One query per relationship level
//!
//! For every [`Prefetch`] directive the owners of the final relation are collected,
//! their linking keys are sent in a single `IN` query, and the fetched rows are
//! grouped back onto the owners client-side. Intermediate levels of a dotted path
//! that are not loaded yet are prefetched first.

use std::collections::{BTreeSet, HashMap};

use crate::entity::{Instance, KeyValue, Slot};
use crate::error::{PoolingError, PoolingResult};
use crate::manager::Manager;
use crate::path::RelationPath;
use crate::query::{Prefetch, Query};
use crate::schema::{RelationshipMetadata, RelationshipType};

/// Run every prefetch directive against a materialized batch, in order
pub(crate) async fn prefetch_all(
    manager: &Manager,
    root: &str,
    instances: &[Instance],
    prefetches: &[Prefetch],
) -> PoolingResult<()> {
    if instances.is_empty() {
        return Ok(());
    }

    for prefetch in prefetches {
        let path = manager.schema().compile_path(root, &prefetch.path)?;
        load_missing_levels(manager, instances, &path).await?;

        let owners = owners_of(instances, &path)?;
        prefetch_level(
            manager,
            &owners,
            path.last(),
            prefetch.query.as_ref(),
            prefetch.slot_name(),
        )
        .await?;
    }
    Ok(())
}

async fn load_missing_levels(
    manager: &Manager,
    instances: &[Instance],
    path: &RelationPath,
) -> PoolingResult<()> {
    let mut levels = Vec::new();
    let mut current = path.parent();
    while let Some(level) = current {
        current = level.parent();
        levels.push(level);
    }

    for level in levels.into_iter().rev() {
        let name = &level.last().name;
        let unloaded: Vec<Instance> = owners_of(instances, &level)?
            .into_iter()
            .filter(|owner| !owner.is_loaded(name))
            .collect();
        if !unloaded.is_empty() {
            tracing::debug!("Prefetching intermediate level '{}'", level.as_str());
            prefetch_level(manager, &unloaded, level.last(), None, name).await?;
        }
    }
    Ok(())
}

fn owners_of(instances: &[Instance], path: &RelationPath) -> PoolingResult<Vec<Instance>> {
    let mut owners = Vec::with_capacity(instances.len());
    for instance in instances {
        owners.extend(path.owners(instance)?);
    }
    Ok(owners)
}

/// Load one relationship for a set of owners with a single query and write the
/// results into `slot_name` on every owner
pub(crate) async fn prefetch_level(
    manager: &Manager,
    owners: &[Instance],
    relation: &RelationshipMetadata,
    query: Option<&Query>,
    slot_name: &str,
) -> PoolingResult<()> {
    let keys: BTreeSet<KeyValue> = owners
        .iter()
        .filter_map(|owner| owner.get_key(relation.owner_column()))
        .collect();

    let mut grouped: HashMap<KeyValue, Vec<Instance>> = HashMap::new();
    if keys.is_empty() {
        tracing::debug!("No keys for '{}'; skipping its prefetch query", relation.name);
    } else {
        let base = match query {
            Some(query) if query.entity() != relation.related_model => {
                return Err(PoolingError::Configuration(format!(
                    "Prefetch query for '{}' selects '{}' instead of '{}'",
                    relation.name,
                    query.entity(),
                    relation.related_model
                )))
            }
            Some(query) => query.clone(),
            None => Query::new(&relation.related_model),
        };

        let key_count = keys.len();
        let query = base.filter_in(relation.related_column(), keys);
        let pooled_joins = manager.config().pool_select_related;
        let related = manager.fetch_instances(&query, pooled_joins).await?;
        tracing::debug!(
            "Prefetched {} '{}' rows for {} keys through '{}'",
            related.len(),
            relation.related_model,
            key_count,
            relation.name
        );

        for instance in related {
            if let Some(key) = instance.get_key(relation.related_column()) {
                grouped.entry(key).or_default().push(instance);
            }
        }
    }

    for owner in owners {
        let group = owner
            .get_key(relation.owner_column())
            .and_then(|key| grouped.get(&key));
        let slot = match relation.relationship_type {
            RelationshipType::HasMany => Slot::Many(group.cloned().unwrap_or_default()),
            RelationshipType::HasOne | RelationshipType::BelongsTo => {
                Slot::One(group.and_then(|items| items.first().cloned()))
            }
        };
        owner.set_slot(slot_name, slot);
    }
    Ok(())
}
