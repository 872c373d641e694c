//! Out-of-band frame upload.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use metrics::counter;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use url::Url;

use crate::event::CollectionFrame;
use crate::{panics, stacktrace};

/// Ships rotated frames to the ingestion endpoint.
///
/// At most one upload is in flight at a time: the single semaphore permit
/// travels into the detached upload task and is released when it finishes.
/// The client timeout bounds how long a stalled upload can hold it.
pub(crate) struct Uploader {
    client: reqwest::Client,
    api_url: Url,
    token: String,
    debug: bool,
    in_flight: Arc<Semaphore>,
}

impl Uploader {
    pub(crate) fn new(api_url: Url, token: String, upload_timeout: Duration, debug: bool) -> Self {
        let client = reqwest::Client::builder()
            .timeout(upload_timeout)
            .build()
            .expect("failed to construct reqwest client for frame uploads");

        Self {
            client,
            api_url,
            token,
            debug,
            in_flight: Arc::new(Semaphore::new(1)),
        }
    }

    /// Claims the upload slot, or returns `None` while an upload is still
    /// in flight.
    pub(crate) fn try_begin(&self) -> Option<OwnedSemaphorePermit> {
        self.in_flight.clone().try_acquire_owned().ok()
    }

    /// Spawns the detached upload task. Never blocks the caller; any
    /// failure discards the batch.
    pub(crate) fn dispatch(&self, permit: OwnedSemaphorePermit, frames: Vec<CollectionFrame>) {
        let client = self.client.clone();
        let api_url = self.api_url.clone();
        let token = self.token.clone();
        let debug = self.debug;

        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(send_frames(client, api_url, token, frames, debug))
                .catch_unwind()
                .await;
            if let Err(payload) = outcome {
                counter!("collector_upload_failures_total", "cause" => "panic").increment(1);
                if debug {
                    let frames = panics::take_captured_stack().unwrap_or_default();
                    tracing::error!(
                        "frame upload task panicked: {}",
                        stacktrace::format_panic_with_stack(payload.as_ref(), &frames)
                    );
                }
            }
            drop(permit);
        });
    }
}

async fn send_frames(
    client: reqwest::Client,
    api_url: Url,
    token: String,
    frames: Vec<CollectionFrame>,
    debug: bool,
) {
    let body = match serde_json::to_vec(&frames) {
        Ok(body) => body,
        Err(e) => {
            counter!("collector_upload_failures_total", "cause" => "serialize").increment(1);
            if debug {
                tracing::error!("failed to serialize collection frames: {e}");
            }
            return;
        }
    };

    let result = client
        .post(api_url)
        .header(CONTENT_TYPE, "application/json")
        .bearer_auth(&token)
        .body(body)
        .send()
        .await
        .and_then(|response| response.error_for_status());

    match result {
        Ok(_) => {
            counter!("collector_uploads_total").increment(1);
        }
        Err(e) => {
            counter!("collector_upload_failures_total", "cause" => "request").increment(1);
            if debug {
                tracing::error!("failed to upload collection frames: {e}");
            }
        }
    }
}
