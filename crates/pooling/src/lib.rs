//! # elif-pooling: Object Pooling and Result Reshaping for elif.rs
//!
//! A performance layer over the ORM's query surface. It removes N+1 access
//! patterns the native eager loading cannot express:
//!
//! - `pool_related`: one shared instance per related identity, one query per type
//! - `select_related_pooled`: joined rows materialized once per key
//! - `prefetch_unrelated` / `map_related`: attach rows by value equality, optionally
//!   split into buckets by a server-side `CASE` label
//! - `prefetch_related_with_limit`: cap children per parent
//! - `with_evaluation_callbacks`: arbitrary post-materialization transforms
//!
//! All of these are stages of an [`ExtendedQuery`], evaluated once on first access.

pub mod bucket;
pub mod config;
pub mod descriptor;
pub mod entity;
pub mod error;
pub mod limiter;
pub mod manager;
pub mod mapping;
pub mod materialize;
pub mod path;
pub mod pipeline;
pub mod pool;
mod prefetch;
pub mod query;
pub mod schema;
pub mod store;


#[cfg(test)]
mod test_support;

// Re-export the public surface
pub use bucket::{Bucketing, MapRelatedCondition};
pub use config::PoolingConfig;
pub use descriptor::{FnLoader, InstanceLoader, PrefetchedProperty, PropertyValue};
pub use entity::{Entity, Instance, KeyValue, Slot};
pub use error::{PoolingError, PoolingResult};
pub use limiter::{LimitTarget, PrefetchLimiter};
pub use manager::Manager;
pub use mapping::{map_instances, MapRelatedCall, MapSource, PrefetchUnrelatedCall};
pub use materialize::{FreshPopulate, Materializer, PooledPopulate, PopulateStrategy};
pub use path::{RelationPath, RelationValue};
pub use pipeline::{from_fn, EvaluationCallback, EvaluationContext, EvaluationState, ExtendedQuery};
pub use pool::{InstancePool, PoolRelatedCall, PoolRequests, PoolTarget};
pub use query::{Annotation, Condition, Distinct, Prefetch, Query};
pub use schema::{EntitySchema, RelationshipMetadata, RelationshipType, Schema};
pub use store::{MemoryStore, Row, Store};
