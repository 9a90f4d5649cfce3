//! Store Abstraction
//!
//! The store is the relational mapper's execution side: it runs a [`Query`] in a
//! single round trip and returns raw rows. Joined to-one rows requested with
//! `select_related` come back nested under the row that owns them. Collection
//! prefetches are never passed to a store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PoolingResult;
use crate::query::Query;
use crate::schema::Schema;

pub mod memory;

pub use memory::MemoryStore;

/// One fetched row with its joined to-one rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub columns: Map<String, Value>,
    /// Joined rows keyed by relationship name; `None` for a null reference
    pub related: BTreeMap<String, Option<Row>>,
}

impl Row {
    pub fn new(columns: Map<String, Value>) -> Self {
        Self {
            columns,
            related: BTreeMap::new(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }
}

/// Abstract query executor
#[async_trait]
pub trait Store: Send + Sync {
    /// Run one query: filters, annotations, ordering, distinct, limit and joins
    async fn fetch(&self, schema: &Schema, query: &Query) -> PoolingResult<Vec<Row>>;

    /// Whether `Distinct::On` keeps the first row per key
    fn supports_distinct_on(&self) -> bool {
        true
    }
}

#[async_trait]
impl<S> Store for Arc<S>
where
    S: Store + ?Sized,
{
    async fn fetch(&self, schema: &Schema, query: &Query) -> PoolingResult<Vec<Row>> {
        (**self).fetch(schema, query).await
    }

    fn supports_distinct_on(&self) -> bool {
        (**self).supports_distinct_on()
    }
}
