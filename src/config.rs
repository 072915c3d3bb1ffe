// src/config.rs

use crate::error::{AppError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// A single route override: requests whose path starts with `prefix` go to `origin`
/// instead of the proxy's default origin. Declaration order matters (first match wins).
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    pub prefix: String,
    pub origin: String,
}

/// One labeled entry of `cache_config.json`. `port`, `origin-url`, `cache-size`, and
/// `ttl` are mandatory; a missing field is a fatal configuration error (caught by
/// `serde` at deserialization time since none of them carry a `#[serde(default)]`).
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    pub port: u16,
    #[serde(rename = "origin-url")]
    pub origin_url: String,
    #[serde(rename = "cache-size")]
    pub cache_size: usize,
    pub ttl: u64,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl ProxyConfig {
    /// Strips a leading `http://` or `https://` scheme from `origin_url`, matching the
    /// original proxy's convention of storing origins as bare hosts.
    #[must_use]
    pub fn origin_host(&self) -> String {
        strip_scheme(&self.origin_url)
    }

    /// All distinct origin hosts this proxy needs a client for: the default origin
    /// plus every route's origin, each scheme-stripped.
    #[must_use]
    pub fn all_origin_hosts(&self) -> Vec<String> {
        let mut hosts = vec![self.origin_host()];
        for route in &self.routes {
            let host = strip_scheme(&route.origin);
            if !hosts.contains(&host) {
                hosts.push(host);
            }
        }
        hosts
    }
}

fn strip_scheme(origin: &str) -> String {
    origin
        .strip_prefix("https://")
        .or_else(|| origin.strip_prefix("http://"))
        .unwrap_or(origin)
        .to_string()
}

/// The full `cache_config.json` document: an arbitrary label mapped to a per-proxy
/// configuration. Each entry starts an independent proxy instance.
pub type ProxyConfigMap = HashMap<String, ProxyConfig>;

/// Reads and parses `cache_config.json` (or the path given on the CLI). A missing
/// file, invalid JSON, or a document missing any mandatory field is a fatal error.
pub fn load_config(path: &Path) -> Result<ProxyConfigMap> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("reading {}: {e}", path.display())))?;

    let config: ProxyConfigMap = serde_json::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parsing {}: {e}", path.display())))?;

    if config.is_empty() {
        return Err(AppError::Config(format!(
            "{} declares no proxy instances",
            path.display()
        )));
    }

    for (label, proxy) in &config {
        if proxy.origin_url.trim().is_empty() {
            return Err(AppError::Config(format!(
                "proxy '{label}': origin-url must not be empty"
            )));
        }
        if proxy.cache_size == 0 {
            return Err(AppError::Config(format!(
                "proxy '{label}': cache-size must be greater than zero"
            )));
        }
    }

    info!(
        proxies = config.len(),
        labels = ?config.keys().collect::<Vec<_>>(),
        "configuration loaded"
    );

    Ok(config)
}
