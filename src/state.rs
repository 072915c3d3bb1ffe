// src/state.rs

use crate::cache::CacheStore;
use crate::config::ProxyConfig;
use crate::error::Result;
use crate::origin::OriginClientPool;
use std::sync::Arc;

/// Everything one labeled `cache_config.json` entry needs: its own cache, its own
/// origin client pool, its own default TTL. No state is shared between proxies in
/// the same process. `cache` is held behind its own `Arc` so the expiry sweeper can
/// hold a handle to it independently of the rest of the state.
pub struct ProxyState {
    pub label: String,
    pub cache: Arc<CacheStore>,
    pub origins: OriginClientPool,
    pub default_ttl: u64,
}

impl ProxyState {
    pub fn new(label: String, config: &ProxyConfig) -> Result<Self> {
        Ok(Self {
            label,
            cache: Arc::new(CacheStore::new(config.cache_size)),
            origins: OriginClientPool::new(config)?,
            default_ttl: config.ttl,
        })
    }
}
