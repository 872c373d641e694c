use std::time::Duration;

use url::Url;

use crate::api::InitError;

/// Collector tuning knobs. Construct with struct-update syntax over
/// `Options::default()`.
#[derive(Debug, Clone)]
pub struct Options {
    /// Log collector-internal failures (upload errors, dropped events).
    pub debug: bool,
    /// Capacity of the frame send queue. Overflow discards the oldest
    /// queued frame.
    pub max_collection_frames: usize,
    /// How long a collection frame accumulates before rotation.
    pub collection_interval: Duration,
    /// Per-upload deadline. A stalled upload is abandoned after this long,
    /// freeing the upload slot.
    pub upload_timeout: Duration,
    /// Capacity of the capture channel. A full channel drops the incoming
    /// event (drop-newest) rather than blocking the caller.
    pub capture_queue_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            debug: false,
            max_collection_frames: 5,
            collection_interval: Duration::from_secs(60),
            upload_timeout: Duration::from_secs(2),
            capture_queue_size: 2048,
        }
    }
}

/// Splits a `token@api_url` connection string on the first `@` and
/// validates the URL part.
pub(crate) fn parse_connection_string(connection_string: &str) -> Result<(String, Url), InitError> {
    let (token, api_url) = connection_string
        .split_once('@')
        .ok_or(InitError::MissingSeparator)?;
    let api_url = Url::parse(api_url)?;
    Ok((token.to_owned(), api_url))
}
