//! Push-based progress reporting.
//!
//! A scan driver talks to exactly one listener. The listener may be invoked
//! from any worker's thread; delivery is ordered only within one worker's
//! own stream. Completion is implicit: after cancellation is honored or the
//! scan is exhausted, no further calls occur.

use super::types::{ProgressUpdate, SearchProgress};
use crossbeam_channel::{Receiver, Sender};
use log::warn;

/// Listener side of the search progress protocol.
pub trait SearchProgressListener: Send + Sync {
    /// Sent once before any data.
    fn progress_will_begin(&self, progress: &SearchProgress);

    /// Sent repeatedly as buffers are sealed. The number of calls is not
    /// fixed; listeners must not assume any particular batching.
    fn progress_advanced(&self, progress: &SearchProgress, update: ProgressUpdate);
}

/// A listener that swallows all events. Useful for headless scans where the
/// caller only wants the final `SearchResults`.
#[derive(Debug, Default)]
pub struct NullProgressListener;

impl SearchProgressListener for NullProgressListener {
    fn progress_will_begin(&self, _progress: &SearchProgress) {}
    fn progress_advanced(&self, _progress: &SearchProgress, _update: ProgressUpdate) {}
}

/// Progress events as queue messages, for consumers that drain a channel
/// from a presentation task instead of taking callbacks on worker threads.
#[derive(Debug)]
pub enum ProgressEvent {
    WillBegin {
        max_progress: u64,
    },
    Advanced {
        regions_done: u64,
        num_results: u64,
        update: ProgressUpdate,
    },
}

/// Channel-backed listener. Events from one worker stay in order (channel
/// FIFO); interleaving across workers is unspecified, matching the
/// listener contract.
pub struct ChannelProgressListener {
    sender: Sender<ProgressEvent>,
}

impl ChannelProgressListener {
    /// Bounded channel; a stalled consumer applies backpressure to the
    /// scan workers rather than buffering unboundedly.
    pub fn bounded(capacity: usize) -> (Self, Receiver<ProgressEvent>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        (Self { sender }, receiver)
    }

    pub fn unbounded() -> (Self, Receiver<ProgressEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }
}

impl SearchProgressListener for ChannelProgressListener {
    fn progress_will_begin(&self, progress: &SearchProgress) {
        if self
            .sender
            .send(ProgressEvent::WillBegin {
                max_progress: progress.max_progress(),
            })
            .is_err()
        {
            warn!("progress receiver dropped before scan began");
        }
    }

    fn progress_advanced(&self, progress: &SearchProgress, update: ProgressUpdate) {
        if self
            .sender
            .send(ProgressEvent::Advanced {
                regions_done: progress.progress(),
                num_results: progress.num_results(),
                update,
            })
            .is_err()
        {
            // Receiver gone; the scan keeps running and later updates are
            // dropped the same way.
            warn!("progress receiver dropped mid-scan");
        }
    }
}
