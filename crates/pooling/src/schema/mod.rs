//! Schema Description - Entity types and their relationship slots
//!
//! The schema is owned by the object mapper; this crate only reads it to
//! resolve relationship paths and to decide which columns link two types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{PoolingError, PoolingResult};

pub mod metadata;

pub use metadata::{RelationshipMetadata, RelationshipType};

/// Description of a single entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub name: String,
    pub primary_key: String,
    relationships: BTreeMap<String, RelationshipMetadata>,
}

impl EntitySchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: "id".to_string(),
            relationships: BTreeMap::new(),
        }
    }

    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    pub fn with_relationship(mut self, metadata: RelationshipMetadata) -> Self {
        self.relationships.insert(metadata.name.clone(), metadata);
        self
    }

    pub fn belongs_to(self, name: &str, related_model: &str, foreign_key: &str) -> Self {
        self.with_relationship(RelationshipMetadata::belongs_to(name, related_model, foreign_key))
    }

    pub fn has_one(self, name: &str, related_model: &str, foreign_key: &str) -> Self {
        self.with_relationship(RelationshipMetadata::has_one(name, related_model, foreign_key))
    }

    pub fn has_many(self, name: &str, related_model: &str, foreign_key: &str) -> Self {
        self.with_relationship(RelationshipMetadata::has_many(name, related_model, foreign_key))
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipMetadata> {
        self.relationships.get(name)
    }

    pub fn relationships(&self) -> impl Iterator<Item = &RelationshipMetadata> {
        self.relationships.values()
    }
}

/// Registry of every entity type known to the mapper
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    entities: BTreeMap<String, EntitySchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity: EntitySchema) -> Self {
        self.register(entity);
        self
    }

    pub fn register(&mut self, entity: EntitySchema) {
        self.entities.insert(entity.name.clone(), entity);
    }

    pub fn entity(&self, name: &str) -> PoolingResult<&EntitySchema> {
        self.entities
            .get(name)
            .ok_or_else(|| PoolingError::UnknownEntity(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntitySchema> {
        self.entities.values()
    }

    /// Look up a relationship slot on an entity type
    pub fn relation(&self, entity: &str, name: &str) -> PoolingResult<&RelationshipMetadata> {
        self.entity(entity)?
            .relationship(name)
            .ok_or_else(|| PoolingError::UnknownPath {
                entity: entity.to_string(),
                path: name.to_string(),
                segment: name.to_string(),
            })
    }

    /// Check every relationship for consistency and for a registered target type
    pub fn validate(&self) -> PoolingResult<()> {
        for entity in self.entities.values() {
            for relation in entity.relationships() {
                relation.validate()?;
                if !self.contains(&relation.related_model) {
                    return Err(PoolingError::Configuration(format!(
                        "Relationship '{}.{}' points at unregistered entity '{}'",
                        entity.name, relation.name, relation.related_model
                    )));
                }
            }
        }
        Ok(())
    }
}
