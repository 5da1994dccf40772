//! Shared fixtures for the integration suites
//!
//! Samples are literal so every suite is deterministic. The stub servers
//! bind 127.0.0.1:0 and speak the KV REST contract.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use repid_cascade::{AgentId, CascadeConfig, Claim, ClaimType};
use serde::Deserialize;
use tokio::sync::Mutex;

pub fn agent(name: &str) -> AgentId {
    AgentId::new(name).unwrap()
}

/// 30 values oscillating within 10 +/- 0.5: a strong t-test, a flat
/// chi-square, stable groups and folds.
pub fn steady_sample() -> Vec<f64> {
    vec![
        10.0, 10.496, 9.872, 9.537, 10.247, 10.399, 9.65, 9.691, 10.43, 10.198, 9.519, 9.926,
        10.5, 9.946, 9.514, 10.18, 10.44, 9.707, 9.636, 10.387, 10.265, 9.545, 9.853, 10.493,
        10.02, 9.502, 10.108, 10.47, 9.771, 9.589,
    ]
}

/// Scores 0.70: significance fails on the flat chi-square, everything else passes
pub fn steady_claim() -> Claim {
    Claim::new(
        "recurring pattern in harmonic oscillation amplitudes",
        ClaimType::Pattern,
        steady_sample(),
        0.95,
    )
    .unwrap()
}

/// Ten draws from U(0, 1)
pub fn uniform_sample() -> Vec<f64> {
    vec![0.374, 0.951, 0.732, 0.599, 0.156, 0.156, 0.058, 0.866, 0.601, 0.708]
}

pub fn overclaim() -> Claim {
    Claim::new(
        "100% perfect pattern in the uniform draws",
        ClaimType::Pattern,
        uniform_sample(),
        0.95,
    )
    .unwrap()
}

/// 99 values cycling 50/100/150: every phase passes, confidence 1.0
pub fn breakthrough_sample() -> Vec<f64> {
    [50.0, 100.0, 150.0].iter().copied().cycle().take(99).collect()
}

pub fn breakthrough_claim() -> Claim {
    Claim::new(
        "three-level pattern in resonance amplitudes",
        ClaimType::Pattern,
        breakthrough_sample(),
        0.95,
    )
    .unwrap()
}

/// Defaults with millisecond backoff so failure paths stay fast
pub fn fast_config() -> CascadeConfig {
    let mut config = CascadeConfig::default();
    config.store.initial_backoff_ms = 5;
    config.store.max_backoff_ms = 20;
    config.store.request_timeout_ms = 2_000;
    config
}

// ============================================================================
// Stub KV servers
// ============================================================================

pub async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Answers 503 to everything; returns the address and a hit counter
pub async fn unavailable_server() -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().fallback(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            StatusCode::SERVICE_UNAVAILABLE
        }
    });
    (serve(app).await, hits)
}

/// Accepts connections but never answers in time
pub async fn stalled_server(delay: Duration) -> SocketAddr {
    let app = Router::new().fallback(move || async move {
        tokio::time::sleep(delay).await;
        StatusCode::OK
    });
    serve(app).await
}

type Entries = Arc<Mutex<BTreeMap<String, String>>>;

#[derive(Deserialize)]
struct KeysQuery {
    prefix: Option<String>,
}

async fn get_value(State(entries): State<Entries>, Path(key): Path<String>) -> Result<String, StatusCode> {
    entries
        .lock()
        .await
        .get(&key)
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)
}

async fn put_value(State(entries): State<Entries>, Path(key): Path<String>, body: String) -> StatusCode {
    entries.lock().await.insert(key, body);
    StatusCode::OK
}

async fn list_keys(State(entries): State<Entries>, Query(query): Query<KeysQuery>) -> Json<Vec<String>> {
    let prefix = query.prefix.unwrap_or_default();
    let keys = entries
        .lock()
        .await
        .keys()
        .filter(|k| k.starts_with(&prefix))
        .cloned()
        .collect();
    Json(keys)
}

/// Working in-memory KV server; returns the address and its backing map
pub async fn kv_server() -> (SocketAddr, Entries) {
    let entries: Entries = Arc::new(Mutex::new(BTreeMap::new()));
    let app = Router::new()
        .route("/values/:key", get(get_value).put(put_value))
        .route("/keys", get(list_keys))
        .with_state(entries.clone());
    (serve(app).await, entries)
}
