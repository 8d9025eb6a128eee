use std::sync::Arc;

use config::Config;
use database::{LinkStore, ResourceDirectory};
use middleware::RateLimiter;
use preview::PreviewService;
use signing::UrlSigner;
use store::KvStore;

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod middleware;
pub mod preview;
pub mod routes;
pub mod signing;
pub mod store;
pub mod sweeper;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub limiter: Arc<RateLimiter>,
    pub cache: Arc<cache::ResponseCache>,
    pub signer: Arc<UrlSigner>,
    pub previews: Arc<PreviewService>,
    pub resources: Arc<dyn ResourceDirectory>,
}

impl AppState {
    /// Wires every component to the injected stores.
    pub fn new(
        config: Config,
        kv: Arc<dyn KvStore>,
        links: Arc<dyn LinkStore>,
        resources: Arc<dyn ResourceDirectory>,
    ) -> Self {
        let timeout = config.store_timeout();
        Self {
            limiter: Arc::new(RateLimiter::new(kv.clone(), config.quota.clone(), timeout)),
            cache: Arc::new(cache::ResponseCache::new(kv, timeout)),
            signer: Arc::new(UrlSigner::new(
                config.signing_secret.clone(),
                config.media_base_url.clone(),
            )),
            previews: Arc::new(PreviewService::new(links, resources.clone(), timeout)),
            resources,
            config: Arc::new(config),
        }
    }
}
