//! Public capture API and the process-wide collector instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use metrics::counter;
use once_cell::sync::OnceCell;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::config::{self, Options};
use crate::event::{Event, ExceptionStackTrace, MetricsRecord, Transaction};
use crate::panics;
use crate::router::Router;
use crate::stacktrace;
use crate::uploader::Uploader;

static COLLECTOR: OnceCell<Collector> = OnceCell::new();

/// Init-time configuration errors.
#[derive(Error, Debug)]
pub enum InitError {
    #[error("collector is already initialized")]
    AlreadyInitialized,
    #[error("connection string is missing the '@' separator")]
    MissingSeparator,
    #[error("invalid ingestion url: {0}")]
    InvalidApiUrl(#[from] url::ParseError),
}

/// A running collector: the capture side of the event channel plus the
/// handles needed to stop the router task.
///
/// Most services use the process-global instance through [`init`] and the
/// free capture functions; embedders and tests can run isolated instances
/// via [`Collector::new`].
pub struct Collector {
    events: mpsc::Sender<Event>,
    stop: watch::Sender<bool>,
    dropped_frames: Arc<AtomicU64>,
    debug: bool,
}

impl Collector {
    /// Parses a `token@api_url` connection string, spawns the router task
    /// and returns the capture handle. Must be called within a tokio
    /// runtime.
    pub fn new(connection_string: &str, options: Options) -> Result<Self, InitError> {
        let (token, api_url) = config::parse_connection_string(connection_string)?;

        panics::install_hook();

        let (event_tx, event_rx) = mpsc::channel(options.capture_queue_size);
        let (stop_tx, stop_rx) = watch::channel(false);
        let dropped_frames = Arc::new(AtomicU64::new(0));

        let uploader = Uploader::new(api_url, token, options.upload_timeout, options.debug);
        Router::spawn(
            event_rx,
            stop_rx,
            uploader,
            options.max_collection_frames,
            options.collection_interval,
            Arc::clone(&dropped_frames),
        );

        Ok(Self {
            events: event_tx,
            stop: stop_tx,
            dropped_frames,
            debug: options.debug,
        })
    }

    /// Captures `err` together with the call-site stack.
    pub fn capture_exception<E: std::error::Error>(&self, err: &E) {
        let frames = stacktrace::capture_stack(1);
        self.send(Event::Exception(ExceptionStackTrace {
            transaction_id: None,
            stack_trace: stacktrace::format_error_with_stack(err, &frames),
            recorded_at: OffsetDateTime::now_utc(),
        }));
    }

    pub fn capture_metric(&self, name: impl Into<String>, value: f32) {
        self.send(Event::Metric(MetricsRecord {
            name: name.into(),
            value,
            recorded_at: OffsetDateTime::now_utc(),
        }));
    }

    /// Records one request's lifecycle. The middleware builds these; hosts
    /// with custom servers can construct and capture their own.
    pub fn capture_transaction(&self, transaction: Transaction) {
        self.send(Event::Transaction(transaction));
    }

    /// Attaches a pre-formatted stack trace to the transaction that was in
    /// flight when a request panicked.
    pub fn capture_transaction_exception(&self, transaction_id: Uuid, stack_trace: String) {
        self.send(Event::Exception(ExceptionStackTrace {
            transaction_id: Some(transaction_id),
            stack_trace,
            recorded_at: OffsetDateTime::now_utc(),
        }));
    }

    /// Number of frames evicted from the send queue since startup.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Stops the router task. The current frame and anything still queued
    /// are abandoned, not flushed.
    pub fn shutdown(&self) {
        let _ = self.stop.send(true);
    }

    fn send(&self, event: Event) {
        if let Err(e) = self.events.try_send(event) {
            counter!("collector_events_dropped_total").increment(1);
            if self.debug {
                tracing::warn!("dropping capture event: {e}");
            }
        }
    }
}

/// Initializes the process-global collector. `connection_string` is
/// `token@api_url`. A second call fails with
/// [`InitError::AlreadyInitialized`] and leaves the running collector
/// untouched.
pub fn init(connection_string: &str, options: Options) -> Result<(), InitError> {
    let collector = Collector::new(connection_string, options)?;
    COLLECTOR
        .set(collector)
        .map_err(|_| InitError::AlreadyInitialized)
}

/// The process-global collector, if [`init`] has run.
pub fn global() -> Option<&'static Collector> {
    COLLECTOR.get()
}

/// Captures an exception on the global collector. A no-op before [`init`].
pub fn capture_exception<E: std::error::Error>(err: &E) {
    if let Some(collector) = global() {
        collector.capture_exception(err);
    }
}

/// Captures a named metric sample on the global collector. A no-op before
/// [`init`].
pub fn capture_metric(name: impl Into<String>, value: f32) {
    if let Some(collector) = global() {
        collector.capture_metric(name, value);
    }
}

/// Captures a transaction on the global collector. A no-op before [`init`].
pub fn capture_transaction(transaction: Transaction) {
    if let Some(collector) = global() {
        collector.capture_transaction(transaction);
    }
}

/// Captures a pre-formatted exception tied to `transaction_id` on the
/// global collector. A no-op before [`init`].
pub fn capture_transaction_exception(transaction_id: Uuid, stack_trace: String) {
    if let Some(collector) = global() {
        collector.capture_transaction_exception(transaction_id, stack_trace);
    }
}

/// Emits a pre-formatted exception with no stack recapture; the panic
/// paths use this.
pub(crate) fn emit_exception(transaction_id: Option<Uuid>, stack_trace: String) {
    if let Some(collector) = global() {
        collector.send(Event::Exception(ExceptionStackTrace {
            transaction_id,
            stack_trace,
            recorded_at: OffsetDateTime::now_utc(),
        }));
    }
}
