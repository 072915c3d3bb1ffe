// src/pipeline.rs

use crate::cache::{make_cache_key, now_secs, CachedResponse};
use crate::error::{AppError, Result};
use crate::state::ProxyState;
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::BytesMut;
use futures_util::TryStreamExt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Response bodies from the origin are capped at this size; the download is aborted
/// and the request fails with 413 once it would be exceeded.
const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024;

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

const X_CACHE: &str = "x-cache";

/// Entry point wired into the router for every non-control `GET`.
pub async fn handle(State(state): State<Arc<ProxyState>>, req: Request) -> Result<Response> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map_or("", |pq| pq.as_str())
        .to_string();
    let key = make_cache_key(&path_and_query, req.headers());

    match state.cache.get(&key).await {
        Some(cached) if cached.expires_at >= now_secs() => {
            state.cache.record_hit(&key).await;
            serve_cached(&cached, "HIT")
        }
        Some(cached) => revalidate(&state, &key, &path_and_query, cached).await,
        None => fetch_and_admit(&state, &key, &path_and_query).await,
    }
}

/// Issues a conditional GET against the origin for a stale entry. A 304 refreshes
/// the cached entry and serves it; a transport failure is a 502; any other status
/// falls through to a fresh miss-path fetch rather than splicing in the conditional
/// response (the original source's `CheckCacheForResponse` never touches a non-304
/// response and simply returns, leaving the caller to re-fetch).
async fn revalidate(
    state: &ProxyState,
    key: &str,
    path_and_query: &str,
    cached: CachedResponse,
) -> Result<Response> {
    let origin = state.origins.select(path_and_query);
    let client = state.origins.client_for(origin)?;
    let base_url = state.origins.base_url_for(origin)?;
    let url = format!("{base_url}{path_and_query}");

    let mut request = client.get(&url);
    if let Some(etag) = cached.header("etag") {
        request = request.header("if-none-match", etag);
    }
    if let Some(last_modified) = cached.header("last-modified") {
        request = request.header("if-modified-since", last_modified);
    }

    let response = match request.send().await {
        Ok(resp) => resp,
        Err(e) => {
            warn!(error = %e, %key, "revalidation request failed");
            return Err(AppError::RevalidationFailed);
        }
    };

    if response.status() != StatusCode::NOT_MODIFIED {
        debug!(status = %response.status(), %key, "revalidation returned a fresh status, falling through to miss path");
        return fetch_and_admit(state, key, path_and_query).await;
    }

    let refreshed = CachedResponse {
        expires_at: now_secs() + state.default_ttl as i64,
        ..cached
    };
    state.cache.put(key.to_string(), refreshed.clone()).await;
    state.cache.record_hit(key).await;
    serve_cached(&refreshed, "HIT (revalidated)")
}

/// The miss path: selects an origin, issues a full GET bounded to `MAX_RESPONSE_BYTES`,
/// filters hop-by-hop headers, and decides cache admission from `Cache-Control`.
async fn fetch_and_admit(state: &ProxyState, key: &str, path_and_query: &str) -> Result<Response> {
    let origin = state.origins.select(path_and_query);
    let client = state.origins.client_for(origin)?;
    let base_url = state.origins.base_url_for(origin)?;
    let url = format!("{base_url}{path_and_query}");

    let response = client
        .get(&url)
        .header("host", origin)
        .header("connection", "close")
        .send()
        .await
        .map_err(|e| AppError::OriginUnreachable(e.to_string()))?;

    let status = response.status();
    let origin_headers = response.headers().clone();

    let body = read_bounded_body(response).await?;

    let cache_control = origin_headers
        .get("cache-control")
        .and_then(|v| v.to_str().ok());
    let ttl = effective_ttl(cache_control, state.default_ttl);

    let filtered = filter_headers(&origin_headers, body.len());
    let client_response = build_response(status, &filtered, "MISS", body.clone())?;

    if ttl == 0 {
        state.cache.record_compliant_miss();
        return Ok(client_response);
    }

    let mut stored_headers = filtered;
    stored_headers.push((X_CACHE.to_string(), "HIT".to_string()));
    let cached = CachedResponse {
        status: status.as_u16(),
        headers: stored_headers,
        body,
        expires_at: now_secs() + ttl as i64,
    };
    state.cache.put(key.to_string(), cached).await;
    state.cache.record_miss(key).await;

    Ok(client_response)
}

async fn read_bounded_body(response: reqwest::Response) -> Result<Bytes> {
    let mut buffer = BytesMut::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream
        .try_next()
        .await
        .map_err(|e| AppError::OriginUnreachable(e.to_string()))?
    {
        if buffer.len() + chunk.len() > MAX_RESPONSE_BYTES {
            return Err(AppError::ResponseTooLarge);
        }
        buffer.extend_from_slice(&chunk);
    }

    Ok(buffer.freeze())
}

/// Drops hop-by-hop headers (case-insensitive) and appends a freshly computed
/// `Content-Length` for the body that was actually received.
fn filter_headers(headers: &HeaderMap, body_len: usize) -> Vec<(String, String)> {
    let mut filtered: Vec<(String, String)> = headers
        .iter()
        .filter_map(|(name, value)| {
            let lower = name.as_str().to_ascii_lowercase();
            if HOP_BY_HOP_HEADERS.contains(&lower.as_str()) {
                None
            } else {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            }
        })
        .collect();
    filtered.push(("content-length".to_string(), body_len.to_string()));
    filtered
}

/// Parses `Cache-Control` directives (comma-separated, case-insensitive, trimmed) into
/// an effective TTL: `no-store`/`no-cache` force zero; a well-formed `max-age=<n>` is
/// used as-is; anything else, including a malformed `max-age`, falls back to `default`.
fn effective_ttl(cache_control: Option<&str>, default: u64) -> u64 {
    let Some(value) = cache_control else {
        return default;
    };

    let mut max_age = None;
    for raw in value.split(',') {
        let directive = raw.trim_matches(|c: char| c == ' ' || c == '\t');
        let lower = directive.to_ascii_lowercase();
        if lower == "no-store" || lower == "no-cache" {
            return 0;
        }
        if let Some(rest) = lower.strip_prefix("max-age=") {
            if let Ok(n) = rest.parse::<u64>() {
                max_age = Some(n);
            }
        }
    }
    max_age.unwrap_or(default)
}

fn serve_cached(cached: &CachedResponse, tag: &str) -> Result<Response> {
    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK);
    build_response(status, &cached.headers, tag, cached.body.clone())
}

fn build_response(
    status: StatusCode,
    headers: &[(String, String)],
    cache_tag: &str,
    body: Bytes,
) -> Result<Response> {
    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        if name.eq_ignore_ascii_case(X_CACHE) {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder = builder.header(X_CACHE, HeaderValue::from_str(cache_tag).unwrap());

    builder
        .body(Body::from(body))
        .map_err(|e| AppError::Internal(format!("building response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_ttl_defaults_when_header_absent() {
        assert_eq!(effective_ttl(None, 30), 30);
    }

    #[test]
    fn effective_ttl_respects_max_age() {
        assert_eq!(effective_ttl(Some("max-age=120"), 30), 120);
    }

    #[test]
    fn effective_ttl_zero_on_no_store() {
        assert_eq!(effective_ttl(Some("no-store"), 30), 0);
    }

    #[test]
    fn effective_ttl_zero_on_no_cache() {
        assert_eq!(effective_ttl(Some("no-cache"), 30), 0);
    }

    #[test]
    fn effective_ttl_zero_on_max_age_zero() {
        assert_eq!(effective_ttl(Some("max-age=0"), 30), 0);
    }

    #[test]
    fn effective_ttl_falls_back_on_malformed_max_age() {
        assert_eq!(effective_ttl(Some("max-age=not-a-number"), 30), 30);
    }

    #[test]
    fn effective_ttl_trims_whitespace_between_directives() {
        assert_eq!(effective_ttl(Some(" max-age=60 , private "), 30), 60);
    }

    #[test]
    fn filter_headers_drops_hop_by_hop_and_recomputes_length() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("content-length", HeaderValue::from_static("999"));

        let filtered = filter_headers(&headers, 3);
        assert!(filtered
            .iter()
            .any(|(k, v)| k == "content-type" && v == "text/plain"));
        assert!(!filtered.iter().any(|(k, _)| k == "connection"));
        assert!(filtered
            .iter()
            .any(|(k, v)| k == "content-length" && v == "3"));
    }

    fn state_for(origin_uri: String) -> ProxyState {
        let config = crate::config::ProxyConfig {
            port: 0,
            origin_url: origin_uri,
            cache_size: 10,
            ttl: 30,
            routes: vec![],
        };
        ProxyState::new("t".into(), &config).unwrap()
    }

    #[tokio::test]
    async fn revalidation_304_refreshes_ttl_and_serves_cached_body() {
        let origin = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/r"))
            .and(wiremock::matchers::header("if-none-match", "\"v1\""))
            .respond_with(wiremock::ResponseTemplate::new(304))
            .mount(&origin)
            .await;

        let state = state_for(origin.uri());
        let cached = CachedResponse {
            status: 200,
            headers: vec![("etag".to_string(), "\"v1\"".to_string())],
            body: Bytes::from_static(b"stale-but-valid-body"),
            expires_at: now_secs() - 1,
        };

        let response = revalidate(&state, "/r", "/r", cached).await.unwrap();
        assert_eq!(response.headers()["x-cache"], "HIT (revalidated)");

        let refreshed = state.cache.get("/r").await.unwrap();
        assert!(refreshed.expires_at > now_secs());
    }

    #[tokio::test]
    async fn revalidation_non_304_falls_through_to_a_fresh_fetch() {
        let origin = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/r"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("brand-new"))
            .mount(&origin)
            .await;

        let state = state_for(origin.uri());
        let cached = CachedResponse {
            status: 200,
            headers: vec![("etag".to_string(), "\"v1\"".to_string())],
            body: Bytes::from_static(b"old-body"),
            expires_at: now_secs() - 1,
        };

        let response = revalidate(&state, "/r", "/r", cached).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"brand-new");
    }
}
