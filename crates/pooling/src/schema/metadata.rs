//! Relationship Metadata - How two entity types are linked

use serde::{Deserialize, Serialize};

use crate::error::{PoolingError, PoolingResult};

/// Defines the type of relationship between entity types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipType {
    /// Many-to-one or one-to-one where this entity holds the foreign key
    BelongsTo,
    /// One-to-one where the related entity holds the foreign key
    HasOne,
    /// One-to-many where the related entity holds the foreign key
    HasMany,
}

impl RelationshipType {
    /// Returns true if this relationship returns a collection
    pub fn is_collection(self) -> bool {
        matches!(self, Self::HasMany)
    }

    /// Returns true if the foreign key column lives on the owning entity
    pub fn is_forward(self) -> bool {
        matches!(self, Self::BelongsTo)
    }
}

/// Relationship metadata for a single named slot
///
/// For [`RelationshipType::BelongsTo`] the `foreign_key` column is on the
/// owning entity and points at `referenced_key` on the related entity. For
/// [`RelationshipType::HasOne`] and [`RelationshipType::HasMany`] the
/// `foreign_key` column is on the related entity and points at
/// `referenced_key` on the owning entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipMetadata {
    pub relationship_type: RelationshipType,
    /// Slot name on the owning entity
    pub name: String,
    /// The related entity type
    pub related_model: String,
    pub foreign_key: String,
    pub referenced_key: String,
}

impl RelationshipMetadata {
    pub fn new(
        relationship_type: RelationshipType,
        name: impl Into<String>,
        related_model: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            relationship_type,
            name: name.into(),
            related_model: related_model.into(),
            foreign_key: foreign_key.into(),
            referenced_key: "id".to_string(),
        }
    }

    pub fn belongs_to(
        name: impl Into<String>,
        related_model: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(RelationshipType::BelongsTo, name, related_model, foreign_key)
    }

    pub fn has_one(
        name: impl Into<String>,
        related_model: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(RelationshipType::HasOne, name, related_model, foreign_key)
    }

    pub fn has_many(
        name: impl Into<String>,
        related_model: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(RelationshipType::HasMany, name, related_model, foreign_key)
    }

    /// Override the referenced column (defaults to "id")
    pub fn with_referenced_key(mut self, referenced_key: impl Into<String>) -> Self {
        self.referenced_key = referenced_key.into();
        self
    }

    pub fn is_collection(&self) -> bool {
        self.relationship_type.is_collection()
    }

    /// Column read on the owning entity to find related rows
    pub fn owner_column(&self) -> &str {
        match self.relationship_type {
            RelationshipType::BelongsTo => &self.foreign_key,
            RelationshipType::HasOne | RelationshipType::HasMany => &self.referenced_key,
        }
    }

    /// Column on the related entity matched against [`Self::owner_column`]
    pub fn related_column(&self) -> &str {
        match self.relationship_type {
            RelationshipType::BelongsTo => &self.referenced_key,
            RelationshipType::HasOne | RelationshipType::HasMany => &self.foreign_key,
        }
    }

    /// Validate the relationship metadata for consistency
    pub fn validate(&self) -> PoolingResult<()> {
        if self.name.is_empty() {
            return Err(PoolingError::Configuration(
                "Relationship name cannot be empty".to_string(),
            ));
        }
        if self.name.contains('.') {
            return Err(PoolingError::Configuration(format!(
                "Relationship name '{}' cannot contain '.'",
                self.name
            )));
        }
        if self.foreign_key.is_empty() || self.referenced_key.is_empty() {
            return Err(PoolingError::Configuration(format!(
                "Relationship '{}' must name both key columns",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relationship_type_properties() {
        assert!(RelationshipType::HasMany.is_collection());
        assert!(!RelationshipType::HasOne.is_collection());
        assert!(!RelationshipType::BelongsTo.is_collection());
        assert!(RelationshipType::BelongsTo.is_forward());
        assert!(!RelationshipType::HasMany.is_forward());
    }

    #[test]
    fn test_key_columns_follow_direction() {
        let owner = RelationshipMetadata::belongs_to("owner", "User", "owner_id");
        assert_eq!(owner.owner_column(), "owner_id");
        assert_eq!(owner.related_column(), "id");

        let rides = RelationshipMetadata::has_many("rides", "Ride", "vehicle_id");
        assert_eq!(rides.owner_column(), "id");
        assert_eq!(rides.related_column(), "vehicle_id");

        let by_code = RelationshipMetadata::has_many("orders", "Order", "customer_code")
            .with_referenced_key("code");
        assert_eq!(by_code.owner_column(), "code");
    }

    #[test]
    fn test_validate_rejects_dotted_names() {
        let rel = RelationshipMetadata::belongs_to("owner.address", "Address", "address_id");
        assert!(matches!(rel.validate(), Err(PoolingError::Configuration(_))));
    }
}
