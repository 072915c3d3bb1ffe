// src/proxy.rs

use crate::config::ProxyConfig;
use crate::control;
use crate::error::{AppError, Result};
use crate::pipeline;
use crate::state::ProxyState;
use crate::sweeper;
use axum::body::Body;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Client request bodies above this size are rejected with the server's default 413
/// at the `tower_http` layer, before any handler runs.
const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// One independently-configured, independently-listening proxy: its own `ProxyState`,
/// listener, and expiry sweeper task. A single binary invocation runs one of these
/// per labeled `cache_config.json` entry.
pub struct ProxyInstance {
    label: String,
    port: u16,
    state: Arc<ProxyState>,
}

impl ProxyInstance {
    pub fn new(label: String, config: ProxyConfig) -> Result<Self> {
        let port = config.port;
        let state = Arc::new(ProxyState::new(label.clone(), &config)?);
        Ok(Self { label, port, state })
    }

    /// Spawns the background expiry sweeper, binds the listener on `localhost:<port>`,
    /// and serves until `shutdown` fires. Binding failure is logged and returned to
    /// the caller rather than panicking the whole process.
    pub async fn run(self, shutdown: tokio::sync::watch::Receiver<()>) -> Result<()> {
        let sweeper_shutdown = Arc::new(AtomicBool::new(false));
        let _sweeper = sweeper::spawn(self.state.cache.clone(), sweeper_shutdown.clone());

        let app = Router::new()
            .merge(control::routes())
            .route("/*path", get(pipeline::handle))
            .route("/", get(pipeline::handle))
            .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BYTES))
            .layer(middleware::from_fn(trace_requests))
            .with_state(self.state.clone());

        let addr: SocketAddr = ([127, 0, 0, 1], self.port).into();
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!(proxy = %self.label, %addr, error = %e, "failed to bind listener");
            AppError::BindFailed(e)
        })?;
        info!(proxy = %self.label, %addr, "proxy listening");

        let mut shutdown = shutdown;
        let result = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await;

        if let Err(e) = result {
            error!(proxy = %self.label, error = %e, "server loop ended with an error");
            return Err(AppError::Internal(e.to_string()));
        }

        sweeper_shutdown.store(true, Ordering::Relaxed);
        info!(proxy = %self.label, "proxy shut down");
        Ok(())
    }
}

/// Tags every request with a correlation id and logs method/path/status/duration,
/// in the same shape as the teacher's `trace_requests` middleware.
async fn trace_requests(req: Request<Body>, next: Next) -> AxumResponse {
    let request_id = Uuid::new_v4();
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let span = info_span!(
        "request",
        request_id = %request_id,
        http.method = %method,
        url.path = %path,
    );

    async move {
        let mut response = next.run(req).await;
        response.headers_mut().insert(
            "x-request-id",
            HeaderValue::from_str(&request_id.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("invalid")),
        );
        info!(
            http.status_code = response.status().as_u16(),
            http.duration = ?start.elapsed(),
            "finished processing request"
        );
        response
    }
    .instrument(span)
    .await
    .into_response()
}
