//! The event router: a single background task owning the current frame and
//! the frame send queue.
//!
//! All mutation of the current frame, the send queue and the upload gate
//! happens on this task, so none of them need locks. The capture channel is
//! the only cross-task synchronization.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::event::{CollectionFrame, Event};
use crate::ring::Ring;
use crate::uploader::Uploader;

pub(crate) struct Router {
    events: mpsc::Receiver<Event>,
    stop: watch::Receiver<bool>,
    uploader: Uploader,
    send_queue: Ring<CollectionFrame>,
    current: Option<CollectionFrame>,
    opened_at: Instant,
    collection_interval: Duration,
    dropped_frames: Arc<AtomicU64>,
}

impl Router {
    pub(crate) fn spawn(
        events: mpsc::Receiver<Event>,
        stop: watch::Receiver<bool>,
        uploader: Uploader,
        max_collection_frames: usize,
        collection_interval: Duration,
        dropped_frames: Arc<AtomicU64>,
    ) -> tokio::task::JoinHandle<()> {
        let router = Router {
            events,
            stop,
            uploader,
            send_queue: Ring::new(max_collection_frames),
            current: None,
            opened_at: Instant::now(),
            collection_interval,
            dropped_frames,
        };
        tokio::spawn(router.run())
    }

    async fn run(mut self) {
        let mut ticker = time::interval_at(
            Instant::now() + self.collection_interval,
            self.collection_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                // the current frame and anything still queued are abandoned
                _ = self.stop.changed() => return,
                _ = ticker.tick() => self.on_tick(),
                event = self.events.recv() => match event {
                    Some(event) => self.on_event(event),
                    // all capture handles are gone, nothing left to route
                    None => return,
                },
            }
        }
    }

    fn on_event(&mut self, event: Event) {
        if self.current.is_none() {
            self.current = Some(CollectionFrame::default());
            self.opened_at = Instant::now();
        }
        if let Some(frame) = self.current.as_mut() {
            frame.append(event);
        }
    }

    // Rotate only frames older than a full interval; a frame opened by a
    // burst just before the tick keeps accumulating until the next one.
    fn on_tick(&mut self) {
        let now = Instant::now();
        if self.current.is_some() {
            if now.duration_since(self.opened_at) > self.collection_interval {
                self.rotate_current_frame();
                self.process_send_queue();
            }
        } else if !self.send_queue.is_empty() {
            self.process_send_queue();
        }
    }

    fn rotate_current_frame(&mut self) {
        if let Some(frame) = self.current.take() {
            if self.send_queue.push(frame).is_some() {
                self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                counter!("collector_frames_dropped_total").increment(1);
            }
        }
    }

    fn process_send_queue(&mut self) {
        if self.send_queue.is_empty() {
            return;
        }
        // Snapshot only once the upload slot is ours; otherwise the frames
        // stay queued for the next tick.
        if let Some(permit) = self.uploader.try_begin() {
            let frames = self.send_queue.read_all();
            self.uploader.dispatch(permit, frames);
        }
    }
}
