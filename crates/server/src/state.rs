//! Application state shared across handlers.

use crate::cache::ObjectCache;
use crate::metrics::Metrics;
use crate::proxy::RangeProxy;
use depot_client::{
    PaymentRequirements, RetryPolicy, StaticPaymentGate, StoreProvider, UploadManager,
};
use depot_core::config::AppConfig;
use depot_storage::ObjectStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Hot object cache.
    pub cache: Arc<ObjectCache>,
    /// Metrics collector.
    pub metrics: Arc<Metrics>,
    /// Retrieval proxy.
    pub proxy: Arc<RangeProxy>,
    /// Upload session manager writing into `storage`.
    pub uploads: Arc<UploadManager>,
    /// Cancelled when the server shuts down.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create new application state.
    pub fn new(config: AppConfig, storage: Arc<dyn ObjectStore>, metrics: Arc<Metrics>) -> Self {
        let cache = Arc::new(ObjectCache::new(&config.server.cache));
        let proxy = Arc::new(RangeProxy::new(
            Arc::clone(&storage),
            Arc::clone(&cache),
            Arc::clone(&metrics),
        ));

        let provider = StoreProvider::new(config.server.provider_name.clone(), Arc::clone(&storage))
            .with_max_object_size(config.transfer.max_object_size)
            .with_channel_depth(config.transfer.channel_depth)
            .with_cdn(true);
        let uploads = UploadManager::new(
            config.transfer.clone(),
            Arc::new(StaticPaymentGate::from_config(&config.payment)),
            PaymentRequirements::from_config(&config.payment),
        )
        .with_provider(Arc::new(provider))
        // Request bodies cannot be replayed.
        .with_retry_policy(RetryPolicy::none());

        Self {
            config: Arc::new(config),
            storage,
            cache,
            metrics,
            proxy,
            uploads: Arc::new(uploads),
            shutdown: CancellationToken::new(),
        }
    }
}
