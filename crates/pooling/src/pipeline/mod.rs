//! Result Pipeline - A lazily evaluated query with registered transform stages
//!
//! [`ExtendedQuery`] wraps a [`Query`] together with pooling registrations and an
//! ordered list of [`EvaluationCallback`] stages. Building never performs I/O:
//! every builder method returns a new, unevaluated query carrying all prior stages,
//! so two queries derived from a common base never observe each other's changes.
//!
//! The first terminal call (`all`, `count`, `nth`, `first`, `get`) evaluates, in order:
//!
//! 1. the base fetch, with joined rows built through pooled materialization when
//!    requested, followed by native collection prefetches
//! 2. every pooling registration, one query per related type
//! 3. every stage, in registration order; a stage returning a batch replaces it
//!
//! The finished batch is cached. Later terminal calls on the same value reuse it
//! without any I/O. A failed evaluation caches nothing.

use std::fmt;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::bucket::MapRelatedCondition;
use crate::entity::Instance;
use crate::error::{PoolingError, PoolingResult};
use crate::limiter::{self, LimitTarget};
use crate::manager::Manager;
use crate::mapping::{MapRelatedStage, MapSource, PrefetchUnrelatedCall};
use crate::pool::{PoolRequests, PoolTarget};
use crate::query::{Annotation, Condition, Prefetch, Query};

pub mod callback;

pub use callback::{from_fn, EvaluationCallback, EvaluationContext, FnCallback};

/// Whether a query has produced its results yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationState {
    Building,
    Evaluated,
}

pub struct ExtendedQuery {
    manager: Manager,
    query: Query,
    pool_requests: PoolRequests,
    pool_select_related: bool,
    stages: Vec<Arc<dyn EvaluationCallback>>,
    results: OnceCell<Vec<Instance>>,
}

/// Clones carry every stage but never the evaluated results
impl Clone for ExtendedQuery {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            query: self.query.clone(),
            pool_requests: self.pool_requests.clone(),
            pool_select_related: self.pool_select_related,
            stages: self.stages.clone(),
            results: OnceCell::new(),
        }
    }
}

impl ExtendedQuery {
    pub(crate) fn new(manager: Manager, query: Query) -> Self {
        Self {
            manager,
            query,
            pool_requests: PoolRequests::new(),
            pool_select_related: false,
            stages: Vec::new(),
            results: OnceCell::new(),
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn entity(&self) -> &str {
        self.query.entity()
    }

    pub fn pool_requests(&self) -> &PoolRequests {
        &self.pool_requests
    }

    /// Whether joined rows are materialized through the pooled strategy
    pub fn pools_select_related(&self) -> bool {
        self.pool_select_related
    }

    /// Labels of the registered stages, in order
    pub fn stages(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.describe()).collect()
    }

    fn derive(&self, f: impl FnOnce(Query) -> Query) -> Self {
        let mut clone = self.clone();
        clone.query = f(clone.query);
        clone
    }

    pub fn filter(&self, condition: Condition) -> Self {
        self.derive(|q| q.filter(condition))
    }

    pub fn order_by(&self, column: &str) -> Self {
        self.derive(|q| q.order_by(column))
    }

    pub fn order_by_desc(&self, column: &str) -> Self {
        self.derive(|q| q.order_by_desc(column))
    }

    pub fn annotate(&self, annotation: Annotation) -> Self {
        self.derive(|q| q.annotate(annotation))
    }

    pub fn limit(&self, limit: usize) -> Self {
        self.derive(|q| q.limit(limit))
    }

    pub fn distinct(&self) -> Self {
        self.derive(Query::distinct)
    }

    /// Join a to-one path into the base fetch
    pub fn select_related(&self, path: &str) -> PoolingResult<Self> {
        self.manager
            .schema()
            .compile_path(self.entity(), path)?
            .require_to_one()?;
        Ok(self.derive(|q| q.select_related(path)))
    }

    /// Join to-one paths and build repeated joined rows as one shared instance per key
    pub fn select_related_pooled<I, S>(&self, paths: I) -> PoolingResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut clone = self.clone();
        for path in paths {
            clone = clone.select_related(path.as_ref())?;
        }
        clone.pool_select_related = !clone.query.joins().is_empty();
        Ok(clone)
    }

    /// Drop every join and turn pooled joins off
    pub fn clear_select_related(&self) -> Self {
        let mut clone = self.derive(Query::clear_select_related);
        clone.pool_select_related = false;
        clone
    }

    pub fn prefetch_related(&self, prefetch: impl Into<Prefetch>) -> PoolingResult<Self> {
        let prefetch = prefetch.into();
        self.manager.schema().compile_path(self.entity(), &prefetch.path)?;
        Ok(self.derive(|q| q.prefetch_related(prefetch)))
    }

    /// Pool foreign-key paths (or explicit per-type queries) into shared instances
    pub fn pool_related<I, T>(&self, targets: I) -> PoolingResult<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<PoolTarget>,
    {
        let mut clone = self.clone();
        for target in targets {
            clone
                .pool_requests
                .register(self.manager.schema(), self.entity(), target.into())?;
        }
        Ok(clone)
    }

    pub fn clear_pool_related(&self) -> Self {
        let mut clone = self.clone();
        clone.pool_requests.clear();
        clone
    }

    /// Prefetch collections keeping at most `limit` children per parent,
    /// or one child when `limit` is `None`
    pub fn prefetch_related_with_limit<I, T>(&self, targets: I, limit: Option<usize>) -> PoolingResult<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<LimitTarget>,
    {
        let targets: Vec<LimitTarget> = targets.into_iter().map(Into::into).collect();
        let plan = limiter::plan(&self.manager, self.entity(), targets, limit)?;

        let mut clone = self.clone();
        for prefetch in plan.prefetches {
            clone.query = clone.query.prefetch_related(prefetch);
        }
        if let Some(limiter) = plan.limiter {
            clone.stages.push(Arc::new(limiter));
        }
        Ok(clone)
    }

    /// Load related rows in one query, split into buckets by condition
    pub fn map_related(
        &self,
        source: impl Into<MapSource>,
        conditions: Vec<MapRelatedCondition>,
    ) -> PoolingResult<Self> {
        let call = source.into().resolve(self.manager.schema(), self.entity())?;
        let stage = MapRelatedStage::new(call, conditions)?;
        Ok(self.with_evaluation_callback(stage))
    }

    /// Attach rows of unrelated queries by value equality
    pub fn prefetch_unrelated<I>(&self, calls: I) -> PoolingResult<Self>
    where
        I: IntoIterator<Item = PrefetchUnrelatedCall>,
    {
        let mut clone = self.clone();
        for call in calls {
            self.manager.schema().entity(call.query.entity())?;
            clone.stages.push(Arc::new(call));
        }
        Ok(clone)
    }

    pub fn with_evaluation_callback(&self, callback: impl EvaluationCallback + 'static) -> Self {
        let mut clone = self.clone();
        clone.stages.push(Arc::new(callback));
        clone
    }

    pub fn with_evaluation_callbacks<I>(&self, callbacks: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn EvaluationCallback>>,
    {
        let mut clone = self.clone();
        clone.stages.extend(callbacks);
        clone
    }

    pub fn state(&self) -> EvaluationState {
        if self.results.initialized() {
            EvaluationState::Evaluated
        } else {
            EvaluationState::Building
        }
    }

    pub fn is_evaluated(&self) -> bool {
        self.state() == EvaluationState::Evaluated
    }

    /// Evaluate once and return the cached batch
    pub async fn all(&self) -> PoolingResult<&[Instance]> {
        let results = self.results.get_or_try_init(|| self.evaluate()).await?;
        Ok(results.as_slice())
    }

    pub async fn count(&self) -> PoolingResult<usize> {
        Ok(self.all().await?.len())
    }

    pub async fn nth(&self, index: usize) -> PoolingResult<Option<Instance>> {
        Ok(self.all().await?.get(index).cloned())
    }

    pub async fn first(&self) -> PoolingResult<Option<Instance>> {
        self.nth(0).await
    }

    /// Evaluate a filtered copy and return its only result
    pub async fn get(&self, condition: Condition) -> PoolingResult<Instance> {
        let filtered = self.filter(condition);
        let results = filtered.all().await?;
        match results {
            [only] => Ok(only.clone()),
            [] => Err(PoolingError::NotFound(self.entity().to_string())),
            many => Err(PoolingError::MultipleResults {
                entity: self.entity().to_string(),
                count: many.len(),
            }),
        }
    }

    async fn evaluate(&self) -> PoolingResult<Vec<Instance>> {
        let pooled_joins = self.pool_select_related || self.manager.config().pool_select_related;
        tracing::debug!(
            "Evaluating {} with {} pool types and {} stages",
            self.query,
            self.pool_requests.len(),
            self.stages.len()
        );

        let mut batch = self.manager.fetch_instances(&self.query, pooled_joins).await?;
        self.pool_requests.evaluate(&self.manager, &batch).await?;

        let ctx = EvaluationContext::new(self.manager.clone(), self.entity());
        for stage in &self.stages {
            if let Some(replaced) = stage.on_evaluated(&ctx, &batch).await? {
                tracing::debug!(
                    "Stage {} replaced the batch ({} -> {} rows)",
                    stage.describe(),
                    batch.len(),
                    replaced.len()
                );
                batch = replaced;
            }
        }
        Ok(batch)
    }
}

impl fmt::Debug for ExtendedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedQuery")
            .field("query", &self.query.to_string())
            .field("pool_requests", &self.pool_requests)
            .field("pool_select_related", &self.pool_select_related)
            .field("stages", &self.stages())
            .field("state", &self.state())
            .finish()
    }
}
