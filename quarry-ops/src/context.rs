use quarry_core::{
    create_object_store, Config, ConfigError, ObjectStore, OllamaProvider, Provider,
};
use quarry_rpc::OperationError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Everything an operation needs besides its arguments.
///
/// Buckets and regions named by callers are resolved here; a name with no
/// registered backend is an input error, never a fallback.
pub struct ServiceContext {
    config: Config,
    buckets: HashMap<String, Arc<dyn ObjectStore>>,
    providers: HashMap<String, Arc<dyn Provider>>,
    build_locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl ServiceContext {
    /// Context with no buckets or regions registered.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            buckets: HashMap::new(),
            providers: HashMap::new(),
            build_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Context wired from configuration: one store per configured bucket
    /// and one Ollama provider per configured region.
    pub fn from_config(config: Config) -> quarry_core::Result<Self> {
        config.validate()?;

        let mut context = Self::new(config.clone());
        for (name, mode) in &config.storage.buckets {
            context = context.with_bucket(name.clone(), create_object_store(mode));
        }
        for region in config.provider.regions.keys() {
            let Some(provider) = OllamaProvider::for_region(&config.provider, region) else {
                continue;
            };
            let provider = provider.map_err(|e| {
                ConfigError::Invalid(format!("provider for region {}: {}", region, e))
            })?;
            debug!(region = %region, base_url = %provider.base_url(), "Registered provider");
            context = context.with_provider(region.clone(), Arc::new(provider));
        }
        Ok(context)
    }

    pub fn with_bucket(mut self, name: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.buckets.insert(name.into(), store);
        self
    }

    pub fn with_provider(mut self, region: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(region.into(), provider);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, OperationError> {
        self.buckets
            .get(bucket)
            .cloned()
            .ok_or_else(|| OperationError::InputValidation(format!("unknown bucket: {}", bucket)))
    }

    /// Provider for `region`, or for the default region when `None`.
    pub fn provider(&self, region: Option<&str>) -> Result<Arc<dyn Provider>, OperationError> {
        let region = region.unwrap_or(&self.config.provider.default_region);
        self.providers
            .get(region)
            .cloned()
            .ok_or_else(|| OperationError::InputValidation(format!("unknown region: {}", region)))
    }

    /// Sorted names of the registered buckets.
    pub fn bucket_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.buckets.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Holds the build slot for one index until the guard is dropped.
    pub async fn lock_index(&self, bucket: &str, index_key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self.build_locks.lock().await;
            locks
                .entry((bucket.to_string(), index_key.to_string()))
                .or_default()
                .clone()
        };
        slot.lock_owned().await
    }
}
