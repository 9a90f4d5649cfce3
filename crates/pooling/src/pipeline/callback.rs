//! Evaluation Callbacks - Post-materialization transforms
//!
//! A callback receives the batch produced so far. Returning `Some(batch)` replaces
//! it for every later stage and for the caller; returning `None` keeps the current
//! batch, possibly mutated in place.

use std::fmt;

use async_trait::async_trait;

use crate::config::PoolingConfig;
use crate::entity::Instance;
use crate::error::PoolingResult;
use crate::manager::Manager;
use crate::schema::Schema;

/// What a callback may use while it runs
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    manager: Manager,
    entity: String,
}

impl EvaluationContext {
    pub(crate) fn new(manager: Manager, entity: &str) -> Self {
        Self {
            manager,
            entity: entity.to_string(),
        }
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn schema(&self) -> &Schema {
        self.manager.schema()
    }

    pub fn config(&self) -> &PoolingConfig {
        self.manager.config()
    }

    /// Entity type of the evaluated batch
    pub fn entity(&self) -> &str {
        &self.entity
    }
}

#[async_trait]
pub trait EvaluationCallback: Send + Sync {
    async fn on_evaluated(
        &self,
        ctx: &EvaluationContext,
        results: &[Instance],
    ) -> PoolingResult<Option<Vec<Instance>>>;

    /// Short label used in logs
    fn describe(&self) -> String {
        "callback".to_string()
    }
}

/// Adapter for synchronous closures
pub struct FnCallback<F> {
    name: String,
    func: F,
}

impl<F> fmt::Debug for FnCallback<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCallback").field("name", &self.name).finish()
    }
}

/// Wrap a closure as an [`EvaluationCallback`]
pub fn from_fn<F>(name: &str, func: F) -> FnCallback<F>
where
    F: Fn(&[Instance]) -> PoolingResult<Option<Vec<Instance>>> + Send + Sync,
{
    FnCallback {
        name: name.to_string(),
        func,
    }
}

#[async_trait]
impl<F> EvaluationCallback for FnCallback<F>
where
    F: Fn(&[Instance]) -> PoolingResult<Option<Vec<Instance>>> + Send + Sync,
{
    async fn on_evaluated(
        &self,
        _ctx: &EvaluationContext,
        results: &[Instance],
    ) -> PoolingResult<Option<Vec<Instance>>> {
        (self.func)(results)
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
