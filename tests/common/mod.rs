//! Shared fixtures for integration tests: a `wiremock` origin plus a running
//! `ProxyInstance` bound to an ephemeral port.

use cachebreak_proxy::config::{ProxyConfig, RouteConfig};
use cachebreak_proxy::ProxyInstance;
use std::net::TcpListener as StdTcpListener;
use std::time::Duration;
use wiremock::MockServer;

/// A running proxy instance in front of a `wiremock` origin, both on loopback.
pub struct TestProxy {
    pub origin: MockServer,
    pub base_url: String,
    _shutdown_tx: tokio::sync::watch::Sender<()>,
}

impl TestProxy {
    /// Starts a mock origin and a proxy pointed at it with the given cache size/TTL.
    pub async fn start(cache_size: usize, ttl: u64) -> Self {
        Self::start_with_routes(cache_size, ttl, vec![]).await
    }

    pub async fn start_with_routes(cache_size: usize, ttl: u64, routes: Vec<RouteConfig>) -> Self {
        let origin = MockServer::start().await;
        let port = free_port();

        let config = ProxyConfig {
            port,
            origin_url: origin.uri(),
            cache_size,
            ttl,
            routes,
        };

        let instance = ProxyInstance::new("test".into(), config).expect("build proxy instance");
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
        tokio::spawn(instance.run(shutdown_rx));

        // Give the listener a moment to bind before the first request lands.
        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            base_url: format!("http://127.0.0.1:{port}"),
            origin,
            _shutdown_tx: shutdown_tx,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn free_port() -> u16 {
    StdTcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral port")
        .local_addr()
        .expect("local addr")
        .port()
}
