#![allow(dead_code)] // each test binary uses its own subset of these helpers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use collector::event::CollectionFrame;
use tokio::net::TcpListener;

/// Everything the stub ingestion endpoint has observed.
#[derive(Clone, Default)]
pub struct Ingested {
    batches: Arc<Mutex<Vec<Vec<CollectionFrame>>>>,
    auth_headers: Arc<Mutex<Vec<String>>>,
    started: Arc<AtomicUsize>,
    stall: Arc<Mutex<Duration>>,
}

impl Ingested {
    /// Completed POSTs, one entry per request body.
    pub fn batches(&self) -> Vec<Vec<CollectionFrame>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn auth_headers(&self) -> Vec<String> {
        self.auth_headers.lock().unwrap().clone()
    }

    /// POSTs that reached the endpoint, including ones still stalled.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Makes future requests hold for `stall` before answering. Requests
    /// already in flight keep the stall they entered with.
    pub fn set_stall(&self, stall: Duration) {
        *self.stall.lock().unwrap() = stall;
    }

    /// All metrics across every completed batch, in arrival order.
    pub fn metric_names(&self) -> Vec<String> {
        self.batches()
            .iter()
            .flatten()
            .flat_map(|frame| frame.metrics.iter().map(|metric| metric.name.clone()))
            .collect()
    }
}

async fn ingest(
    State(state): State<Ingested>,
    headers: HeaderMap,
    Json(frames): Json<Vec<CollectionFrame>>,
) -> StatusCode {
    state.started.fetch_add(1, Ordering::SeqCst);
    if let Some(auth) = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()) {
        state.auth_headers.lock().unwrap().push(auth.to_owned());
    }

    let stall = *state.stall.lock().unwrap();
    if !stall.is_zero() {
        tokio::time::sleep(stall).await;
    }

    state.batches.lock().unwrap().push(frames);
    StatusCode::OK
}

/// Spins up a recording ingestion endpoint, returning its handle and the
/// URL to point a collector at.
pub async fn start_ingest() -> (Ingested, String) {
    let state = Ingested::default();
    let app = Router::new()
        .route("/api/report", post(ingest))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind stub ingest listener");
    let addr = listener.local_addr().expect("listener has no local addr");
    tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("stub ingest server failed");
    });

    (state, format!("http://{addr}/api/report"))
}

/// Polls `condition` every 10ms until it holds or `deadline` passes.
pub async fn wait_for(deadline: Duration, condition: impl Fn() -> bool) -> bool {
    let give_up = tokio::time::Instant::now() + deadline;
    while tokio::time::Instant::now() < give_up {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
