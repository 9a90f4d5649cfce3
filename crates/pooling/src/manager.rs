//! Manager - Entry point binding a store, a schema and a configuration
//!
//! ```ignore
//! let manager = Manager::new(Arc::new(store), schema)?;
//! let rides = manager
//!     .query("Ride")?
//!     .pool_related(["driver", "passenger"])?
//!     .all()
//!     .await?;
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::PoolingConfig;
use crate::entity::Instance;
use crate::error::PoolingResult;
use crate::materialize::{FreshPopulate, Materializer, PooledPopulate, PopulateStrategy};
use crate::pipeline::ExtendedQuery;
use crate::prefetch;
use crate::query::Query;
use crate::schema::Schema;
use crate::store::Store;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Cheap to clone; every clone shares the same store, schema and config
#[derive(Clone)]
pub struct Manager {
    store: Arc<dyn Store>,
    schema: Arc<Schema>,
    config: Arc<PoolingConfig>,
}

impl Manager {
    /// Validate the schema and bind it to a store with the default configuration
    pub fn new(store: Arc<dyn Store>, schema: Schema) -> PoolingResult<Self> {
        schema.validate()?;
        Ok(Self {
            store,
            schema: Arc::new(schema),
            config: Arc::new(PoolingConfig::default()),
        })
    }

    pub fn with_config(mut self, config: PoolingConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &PoolingConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// Start an unevaluated query over every row of `entity`
    pub fn query(&self, entity: &str) -> PoolingResult<ExtendedQuery> {
        self.schema.entity(entity)?;
        Ok(ExtendedQuery::new(self.clone(), Query::new(entity)))
    }

    /// Wrap an existing query value
    pub fn wrap(&self, query: Query) -> PoolingResult<ExtendedQuery> {
        self.schema.entity(query.entity())?;
        Ok(ExtendedQuery::new(self.clone(), query))
    }

    /// Fetch and materialize a plain query, including its collection prefetches
    pub async fn fetch(&self, query: &Query) -> PoolingResult<Vec<Instance>> {
        self.fetch_instances(query, self.config.pool_select_related).await
    }

    /// One store round trip for the rows, then one per prefetch level
    pub(crate) fn fetch_instances<'a>(
        &'a self,
        query: &'a Query,
        pooled_joins: bool,
    ) -> BoxFuture<'a, PoolingResult<Vec<Instance>>> {
        Box::pin(async move {
            let rows = self.store.fetch(&self.schema, &query.without_prefetches()).await?;

            let instances = {
                let mut fresh = FreshPopulate;
                let mut pooled = PooledPopulate::new();
                let strategy: &mut dyn PopulateStrategy = if pooled_joins && !query.joins().is_empty() {
                    &mut pooled
                } else {
                    &mut fresh
                };
                let instances = Materializer::new(&self.schema, strategy).materialize(query.entity(), rows)?;
                if pooled.hits() > 0 {
                    tracing::debug!(
                        "Pooled joins reused {} instances while materializing '{}'",
                        pooled.hits(),
                        query.entity()
                    );
                }
                instances
            };

            prefetch::prefetch_all(self, query.entity(), &instances, query.prefetches()).await?;
            Ok(instances)
        })
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("schema", &self.schema)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
