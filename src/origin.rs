// src/origin.rs

use crate::config::ProxyConfig;
use crate::error::{AppError, Result};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;

const ORIGIN_TIMEOUT: Duration = Duration::from_secs(5);

/// One persistent, keep-alive HTTP client per distinct configured origin, plus the
/// route table used to pick an origin for a given request path. Every origin is
/// fetched over HTTPS unless the operator spells out an explicit `http://` scheme
/// in its configuration (e.g. for a local origin behind a trusted network).
pub struct OriginClientPool {
    clients: HashMap<String, Client>,
    base_urls: HashMap<String, String>,
    routes: Vec<(String, String)>,
    default_origin: String,
}

impl OriginClientPool {
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        let mut clients = HashMap::new();
        let mut base_urls = HashMap::new();

        // The raw (unstripped) origins, in the same order `all_origin_hosts` derives
        // its de-duplicated host list from, so each host can be matched back to the
        // origin string that carries its scheme (if any).
        let raw_origins: Vec<&str> = std::iter::once(config.origin_url.as_str())
            .chain(config.routes.iter().map(|r| r.origin.as_str()))
            .collect();

        for host in config.all_origin_hosts() {
            let origin = raw_origins
                .iter()
                .find(|raw| strip_scheme(raw) == host)
                .copied()
                .unwrap_or(host.as_str());

            let client = Client::builder()
                .connect_timeout(ORIGIN_TIMEOUT)
                .timeout(ORIGIN_TIMEOUT)
                .pool_idle_timeout(Duration::from_secs(90))
                .build()
                .map_err(|e| AppError::Internal(format!("building origin client: {e}")))?;
            base_urls.insert(host.clone(), base_url(origin));
            clients.insert(host, client);
        }

        let routes = config
            .routes
            .iter()
            .map(|r| (r.prefix.clone(), strip_scheme(&r.origin)))
            .collect();

        Ok(Self {
            clients,
            base_urls,
            routes,
            default_origin: config.origin_host(),
        })
    }

    /// Returns the origin host for `path`: the first route whose prefix matches,
    /// declaration order, otherwise the default origin.
    #[must_use]
    pub fn select(&self, path: &str) -> &str {
        for (prefix, origin) in &self.routes {
            if path.starts_with(prefix.as_str()) {
                return origin;
            }
        }
        &self.default_origin
    }

    /// Looks up the pre-built client for `origin_host`. Every configured origin is
    /// pre-registered at construction, so this should never miss in practice.
    pub fn client_for(&self, origin_host: &str) -> Result<&Client> {
        self.clients.get(origin_host).ok_or(AppError::UnknownOrigin)
    }

    /// The scheme-qualified base URL (e.g. `https://example.com`) to prepend to a
    /// request path for `origin_host`.
    pub fn base_url_for(&self, origin_host: &str) -> Result<&str> {
        self.base_urls
            .get(origin_host)
            .map(String::as_str)
            .ok_or(AppError::UnknownOrigin)
    }
}

fn strip_scheme(origin: &str) -> String {
    origin
        .strip_prefix("https://")
        .or_else(|| origin.strip_prefix("http://"))
        .unwrap_or(origin)
        .to_string()
}

/// Normalizes a configured origin into a scheme-qualified base URL, defaulting a
/// bare host (no scheme given) to HTTPS.
fn base_url(origin: &str) -> String {
    if origin.starts_with("https://") || origin.starts_with("http://") {
        origin.to_string()
    } else {
        format!("https://{origin}")
    }
}
