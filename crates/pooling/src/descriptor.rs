//! Prefetched Properties
//!
//! A [`PrefetchedProperty`] pairs a query-shaping method, which loads a value for
//! a whole batch at once, with a loader for a single instance that was fetched
//! without it. The value lives in an explicit per-instance cache: a list slot or a
//! scalar field named `cache_attr` (`"_<name>"` unless overridden).
//!
//! ```ignore
//! let parked_here = PrefetchedProperty::new(
//!     "vehicles_parked_on_user_address",
//!     |users| users.prefetch_unrelated([PrefetchUnrelatedCall::new(
//!         Query::new("Vehicle"),
//!         "parking_address_id",
//!         "address_id",
//!         "_vehicles_parked_on_user_address",
//!     )]),
//!     FnLoader::new(|manager, user| async move { ... }),
//! );
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::entity::{Instance, Slot};
use crate::error::PoolingResult;
use crate::manager::Manager;
use crate::pipeline::ExtendedQuery;

/// A cached property value
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Entities(Vec<Instance>),
    Scalar(Value),
}

impl PropertyValue {
    pub fn entities(&self) -> Option<&[Instance]> {
        match self {
            PropertyValue::Entities(items) => Some(items),
            PropertyValue::Scalar(_) => None,
        }
    }

    pub fn scalar(&self) -> Option<&Value> {
        match self {
            PropertyValue::Scalar(value) => Some(value),
            PropertyValue::Entities(_) => None,
        }
    }
}

/// Computes a property for one instance
#[async_trait]
pub trait InstanceLoader: Send + Sync {
    async fn load(&self, manager: &Manager, instance: &Instance) -> PoolingResult<PropertyValue>;
}

/// Adapter for async closures taking owned handles
pub struct FnLoader<F>(F);

impl<F> FnLoader<F> {
    pub fn new(func: F) -> Self {
        FnLoader(func)
    }
}

#[async_trait]
impl<F, Fut> InstanceLoader for FnLoader<F>
where
    F: Fn(Manager, Instance) -> Fut + Send + Sync,
    Fut: Future<Output = PoolingResult<PropertyValue>> + Send,
{
    async fn load(&self, manager: &Manager, instance: &Instance) -> PoolingResult<PropertyValue> {
        (self.0)(manager.clone(), instance.clone()).await
    }
}

type QueryShaper = Arc<dyn Fn(&ExtendedQuery) -> PoolingResult<ExtendedQuery> + Send + Sync>;

#[derive(Clone)]
pub struct PrefetchedProperty {
    name: String,
    cache_attr: String,
    shaper: QueryShaper,
    loader: Arc<dyn InstanceLoader>,
}

impl PrefetchedProperty {
    pub fn new<S, L>(name: &str, shaper: S, loader: L) -> Self
    where
        S: Fn(&ExtendedQuery) -> PoolingResult<ExtendedQuery> + Send + Sync + 'static,
        L: InstanceLoader + 'static,
    {
        Self {
            name: name.to_string(),
            cache_attr: format!("_{}", name),
            shaper: Arc::new(shaper),
            loader: Arc::new(loader),
        }
    }

    /// Read and write the cache under a custom name, e.g. an annotation alias
    pub fn with_cache_attr(mut self, cache_attr: &str) -> Self {
        self.cache_attr = cache_attr.to_string();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache_attr(&self) -> &str {
        &self.cache_attr
    }

    /// Shape a query so the property is loaded for the whole batch
    pub fn apply(&self, query: &ExtendedQuery) -> PoolingResult<ExtendedQuery> {
        (self.shaper)(query)
    }

    pub fn cached(&self, instance: &Instance) -> Option<PropertyValue> {
        match instance.slot(&self.cache_attr) {
            Some(slot) => Some(PropertyValue::Entities(slot.instances())),
            None => instance.get(&self.cache_attr).map(PropertyValue::Scalar),
        }
    }

    /// The cached value, or the single-instance loader's result, which is then cached
    pub async fn load(&self, manager: &Manager, instance: &Instance) -> PoolingResult<PropertyValue> {
        if let Some(value) = self.cached(instance) {
            return Ok(value);
        }

        tracing::debug!("Loading '{}' for {:?} on its own", self.name, instance);
        let value = self.loader.load(manager, instance).await?;
        self.set(instance, value.clone());
        Ok(value)
    }

    pub fn set(&self, instance: &Instance, value: PropertyValue) {
        match value {
            PropertyValue::Entities(items) => instance.set_slot(&self.cache_attr, Slot::Many(items)),
            PropertyValue::Scalar(value) => instance.set(&self.cache_attr, value),
        }
    }

    pub fn clear(&self, instance: &Instance) {
        instance.clear_slot(&self.cache_attr);
        instance.unset(&self.cache_attr);
    }
}

impl fmt::Debug for PrefetchedProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefetchedProperty")
            .field("name", &self.name)
            .field("cache_attr", &self.cache_attr)
            .finish_non_exhaustive()
    }
}
