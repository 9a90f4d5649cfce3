//! Path Resolver - Compiled relationship paths
//!
//! A [`RelationPath`] is a dotted sequence of relationship names (`"vehicle.owner.address"`)
//! resolved once against the [`Schema`] into the chain of [`RelationshipMetadata`] it
//! traverses. The compiled path is then reused for every instance in a batch:
//! reading the related key at the end of the path, returning whatever the final slot
//! holds, or rewriting that slot from an [`InstancePool`].
//!
//! Walking never loads anything. An intermediate slot that was not loaded is reported
//! as [`PoolingError::RelationNotLoaded`].

use std::fmt;

use crate::entity::{Instance, KeyValue, Slot};
use crate::error::{PoolingError, PoolingResult};
use crate::pool::InstancePool;
use crate::schema::{RelationshipMetadata, Schema};

pub const PATH_SEPARATOR: char = '.';

/// What a relationship path currently holds on a concrete instance
#[derive(Debug, Clone)]
pub enum RelationValue {
    One(Option<Instance>),
    Many(Vec<Instance>),
    /// The slot at this relationship has not been loaded
    Unloaded(RelationshipMetadata),
}

impl RelationValue {
    /// Loaded instances in order; empty when unloaded
    pub fn instances(&self) -> Vec<Instance> {
        match self {
            RelationValue::One(Some(instance)) => vec![instance.clone()],
            RelationValue::Many(items) => items.clone(),
            RelationValue::One(None) | RelationValue::Unloaded(_) => Vec::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        !matches!(self, RelationValue::Unloaded(_))
    }
}

/// A relationship path compiled against a schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationPath {
    root: String,
    raw: String,
    segments: Vec<RelationshipMetadata>,
}

impl RelationPath {
    /// Resolve every segment of `path` starting at `root`
    pub fn compile(schema: &Schema, root: &str, path: &str) -> PoolingResult<Self> {
        schema.entity(root)?;

        let mut segments = Vec::new();
        let mut current = root.to_string();
        for segment in path.split(PATH_SEPARATOR) {
            let metadata = schema
                .entity(&current)?
                .relationship(segment)
                .ok_or_else(|| PoolingError::UnknownPath {
                    entity: root.to_string(),
                    path: path.to_string(),
                    segment: segment.to_string(),
                })?;
            current = metadata.related_model.clone();
            segments.push(metadata.clone());
        }

        tracing::trace!("Compiled path '{}' from '{}' to '{}'", path, root, current);
        Ok(Self {
            root: root.to_string(),
            raw: path.to_string(),
            segments,
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[RelationshipMetadata] {
        &self.segments
    }

    /// The relationship named by the final segment
    pub fn last(&self) -> &RelationshipMetadata {
        // compile() always yields at least one segment
        &self.segments[self.segments.len() - 1]
    }

    /// Entity type reachable at the end of the path
    pub fn target(&self) -> &str {
        &self.last().related_model
    }

    /// Entity type owning the final relationship slot
    pub fn owner_type(&self) -> &str {
        match self.segments.len() {
            1 => &self.root,
            n => &self.segments[n - 2].related_model,
        }
    }

    /// The path without its final segment, if any
    pub fn parent(&self) -> Option<RelationPath> {
        if self.segments.len() < 2 {
            return None;
        }
        let cut = self.raw.rfind(PATH_SEPARATOR)?;
        Some(Self {
            root: self.root.clone(),
            raw: self.raw[..cut].to_string(),
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// True when the path only follows foreign keys held by the traversed entities
    pub fn is_forward(&self) -> bool {
        self.segments.iter().all(|s| s.relationship_type.is_forward())
    }

    /// Every segment must be a foreign-key reference (pooling reads the key column)
    pub fn require_forward(&self) -> PoolingResult<()> {
        match self.segments.iter().find(|s| !s.relationship_type.is_forward()) {
            Some(segment) => Err(PoolingError::invalid_relation(
                &self.raw,
                format!(
                    "'{}' is a reverse relation; only foreign-key references can be pooled",
                    segment.name
                ),
            )),
            None => Ok(()),
        }
    }

    /// No segment may be a collection (joins only follow single-valued relations)
    pub fn require_to_one(&self) -> PoolingResult<()> {
        match self.segments.iter().find(|s| s.is_collection()) {
            Some(segment) => Err(PoolingError::invalid_relation(
                &self.raw,
                format!("'{}' is multi-valued and cannot be joined", segment.name),
            )),
            None => Ok(()),
        }
    }

    /// The final segment must be a collection
    pub fn require_collection_tail(&self) -> PoolingResult<()> {
        if self.last().is_collection() {
            Ok(())
        } else {
            Err(PoolingError::invalid_relation(
                &self.raw,
                format!(
                    "'{}' is single-valued; it always loads zero or one instance",
                    self.last().name
                ),
            ))
        }
    }

    /// Instances owning the final slot, reached by walking every segment but the last.
    /// Null references are skipped; collections along the way are flattened.
    pub fn owners(&self, instance: &Instance) -> PoolingResult<Vec<Instance>> {
        let prefix = &self.segments[..self.segments.len() - 1];
        let mut current = vec![instance.clone()];
        for segment in prefix {
            let mut next = Vec::with_capacity(current.len());
            for owner in &current {
                match owner.slot(&segment.name) {
                    Some(Slot::One(Some(related))) => next.push(related),
                    Some(Slot::One(None)) => {}
                    Some(Slot::Many(items)) => next.extend(items),
                    None => {
                        return Err(PoolingError::RelationNotLoaded {
                            entity: owner.entity_type(),
                            relation: segment.name.clone(),
                        })
                    }
                }
            }
            current = next;
        }
        Ok(current)
    }

    /// Key of the instance referenced at the end of the path, read from the foreign key
    /// column so the final relation itself never needs to be loaded
    pub fn related_id(&self, instance: &Instance) -> PoolingResult<Option<KeyValue>> {
        self.require_forward()?;
        let column = &self.last().foreign_key;
        Ok(self
            .owners(instance)?
            .first()
            .and_then(|owner| owner.get_key(column)))
    }

    /// Whatever the final slot holds, walking every segment
    pub fn relation(&self, instance: &Instance) -> PoolingResult<RelationValue> {
        let mut current = vec![instance.clone()];
        let mut many = false;
        for segment in &self.segments {
            many |= segment.is_collection();
            let mut next = Vec::with_capacity(current.len());
            for owner in &current {
                match owner.slot(&segment.name) {
                    Some(Slot::One(Some(related))) => next.push(related),
                    Some(Slot::One(None)) => {}
                    Some(Slot::Many(items)) => next.extend(items),
                    None => return Ok(RelationValue::Unloaded(segment.clone())),
                }
            }
            current = next;
        }

        if many {
            Ok(RelationValue::Many(current))
        } else {
            Ok(RelationValue::One(current.into_iter().next()))
        }
    }

    /// Point the final slot at the pooled instance named by its foreign key.
    /// A null foreign key clears the slot to an empty reference.
    pub fn assign_from_pool(&self, instance: &Instance, pool: &InstancePool) -> PoolingResult<()> {
        let last = self.last();
        for owner in self.owners(instance)? {
            let shared = match owner.get_key(&last.foreign_key) {
                Some(key) => Some(pool.get(&last.related_model, &key).ok_or_else(|| {
                    PoolingError::PoolMiss {
                        entity: last.related_model.clone(),
                        key: key.clone(),
                        path: self.raw.clone(),
                    }
                })?),
                None => None,
            };
            owner.set_slot(&last.name, Slot::One(shared));
        }
        Ok(())
    }
}

impl fmt::Display for RelationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.root, self.raw)
    }
}

impl Schema {
    /// Entity type reached by following `path` from `root`
    pub fn resolve_type(&self, root: &str, path: &str) -> PoolingResult<String> {
        Ok(self.compile_path(root, path)?.target().to_string())
    }

    pub fn compile_path(&self, root: &str, path: &str) -> PoolingResult<RelationPath> {
        RelationPath::compile(self, root, path)
    }
}
