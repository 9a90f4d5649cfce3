/// Configuration for pooling and prefetch passes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolingConfig {
    /// Use the store's distinct-on capability for limit-less limited prefetches
    pub prefer_distinct_on: bool,
    /// Treat every `select_related` as `select_related_pooled`
    pub pool_select_related: bool,
    /// Skip secondary queries when a pass collected no keys
    pub skip_empty_lookups: bool,
}

impl Default for PoolingConfig {
    fn default() -> Self {
        Self {
            prefer_distinct_on: true,
            pool_select_related: false,
            skip_empty_lookups: true,
        }
    }
}

impl PoolingConfig {
    pub const PREFER_DISTINCT_ON_VAR: &'static str = "ELIF_POOLING_PREFER_DISTINCT_ON";
    pub const SELECT_RELATED_VAR: &'static str = "ELIF_POOLING_SELECT_RELATED";
    pub const SKIP_EMPTY_LOOKUPS_VAR: &'static str = "ELIF_POOLING_SKIP_EMPTY_LOOKUPS";

    /// Build a configuration from `ELIF_POOLING_*` environment variables,
    /// falling back to defaults for unset or unparsable values
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let flag = |name: &str, default: bool| match lookup(name) {
            Some(raw) => parse_flag(&raw).unwrap_or_else(|| {
                tracing::warn!("Ignoring unparsable value '{}' for {}", raw, name);
                default
            }),
            None => default,
        };

        Self {
            prefer_distinct_on: flag(Self::PREFER_DISTINCT_ON_VAR, defaults.prefer_distinct_on),
            pool_select_related: flag(Self::SELECT_RELATED_VAR, defaults.pool_select_related),
            skip_empty_lookups: flag(Self::SKIP_EMPTY_LOOKUPS_VAR, defaults.skip_empty_lookups),
        }
    }

    pub fn with_prefer_distinct_on(mut self, enabled: bool) -> Self {
        self.prefer_distinct_on = enabled;
        self
    }

    pub fn with_pool_select_related(mut self, enabled: bool) -> Self {
        self.pool_select_related = enabled;
        self
    }

    pub fn with_skip_empty_lookups(mut self, enabled: bool) -> Self {
        self.skip_empty_lookups = enabled;
        self
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
