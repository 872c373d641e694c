//! Axum middleware that records one transaction per request and captures
//! handler panics.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_client_ip::InsecureClientIp;
use futures::FutureExt;
use http_body::Body as _;
use time::OffsetDateTime;
use uuid::Uuid;

use collector::event::Transaction;
use collector::{panics, stacktrace};

/// Records a transaction for every request passing through, panics
/// included.
///
/// Install with `axum::middleware::from_fn(track_requests)` after
/// [`collector::init`]; serve with
/// `into_make_service_with_connect_info::<SocketAddr>()` so client IPs
/// resolve.
///
/// A panicking handler is answered with an empty 500 and the panic is
/// swallowed, never re-raised. Hosts that rely on an outer recovery layer
/// (e.g. `tower_http`'s catch-panic) for their 500 responses must mount
/// this middleware inside that layer.
pub async fn track_requests(
    client_ip: Option<InsecureClientIp>,
    request: Request,
    next: Next,
) -> Response {
    let started_at = OffsetDateTime::now_utc();
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let query = request.uri().query().map(str::to_owned);
    let client_ip = client_ip
        .map(|InsecureClientIp(ip)| ip.to_string())
        .unwrap_or_default();
    let transaction_id = Uuid::new_v4();

    let outcome = AssertUnwindSafe(next.run(request)).catch_unwind().await;

    let duration = start.elapsed();
    let (response, panic_stack) = match outcome {
        Ok(response) => (response, None),
        Err(payload) => {
            let frames = panics::take_captured_stack().unwrap_or_default();
            let stack_trace = stacktrace::format_panic_with_stack(payload.as_ref(), &frames);
            (
                StatusCode::INTERNAL_SERVER_ERROR.into_response(),
                Some(stack_trace),
            )
        }
    };

    let endpoint = match query {
        Some(query) => format!("{method} {path}?{query}"),
        None => format!("{method} {path}"),
    };

    collector::capture_transaction(Transaction {
        id: transaction_id,
        endpoint,
        duration,
        recorded_at: started_at,
        status_code: response.status().as_u16(),
        body_size: response
            .body()
            .size_hint()
            .exact()
            .map_or(-1, |size| size as i64),
        client_ip,
    });

    if let Some(stack_trace) = panic_stack {
        collector::capture_transaction_exception(transaction_id, stack_trace);
    }

    response
}
