// src/control.rs

use crate::state::ProxyState;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Reserved control paths, registered ahead of the catch-all proxy route so axum's
/// router matches them first. None of these ever touch cache admission.
pub fn routes() -> Router<Arc<ProxyState>> {
    Router::new()
        .route("/stats", get(stats))
        .route("/clear-cache", get(clear_cache))
        .route("/healthz", get(healthz))
        .route("/favicon.ico", get(favicon))
}

#[derive(Serialize)]
struct UrlStatsJson {
    hits: u64,
    misses: u64,
}

async fn stats(State(state): State<Arc<ProxyState>>, headers: HeaderMap) -> Response {
    let hits = state.cache.hits();
    let misses = state.cache.misses();
    let compliant_misses = state.cache.compliant_misses();
    let per_url = state.cache.per_url_stats().await;

    if per_url.is_empty() && compliant_misses == 0 {
        return "No cache activity yet.\n".into_response();
    }

    let wants_json = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"));

    if wants_json {
        let url_hits_and_misses: std::collections::HashMap<String, UrlStatsJson> = per_url
            .iter()
            .map(|(url, s)| {
                (
                    url.clone(),
                    UrlStatsJson {
                        hits: s.hits,
                        misses: s.misses,
                    },
                )
            })
            .collect();
        return axum::Json(json!({
            "hits": hits,
            "misses": misses,
            "compliant_misses": compliant_misses,
            "url_hits_and_misses": url_hits_and_misses,
        }))
        .into_response();
    }

    let mut body = format!(
        "Hits: {hits}\nMisses: {misses}\nCompliant Misses: {compliant_misses}\nHits and misses (non-compliant) broken down by url:\n"
    );
    for (url, s) in &per_url {
        body.push_str(&format!("{url}: Hits: {}, Misses: {}\n", s.hits, s.misses));
    }
    body.into_response()
}

async fn clear_cache(State(state): State<Arc<ProxyState>>) -> &'static str {
    state.cache.clear().await;
    "Cache cleared.\n"
}

async fn healthz() -> &'static str {
    "OK"
}

async fn favicon() -> StatusCode {
    StatusCode::OK
}
