use std::sync::Arc;

use crate::{
    client_key::{ClientKeyExtractor, ForwardedFor, PeerAddress},
    config::Config,
    rate_limit::InMemoryRateLimiter,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub limiter: Arc<InMemoryRateLimiter>,
    pub client_keys: Arc<dyn ClientKeyExtractor>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let limiter = Arc::new(InMemoryRateLimiter::new(config.rate_limit));
        Self::with_limiter(config, limiter)
    }

    pub fn with_limiter(config: Config, limiter: Arc<InMemoryRateLimiter>) -> Self {
        let client_keys: Arc<dyn ClientKeyExtractor> = if config.trust_proxy {
            Arc::new(ForwardedFor)
        } else {
            Arc::new(PeerAddress)
        };

        Self {
            config: Arc::new(config),
            limiter,
            client_keys,
        }
    }
}
