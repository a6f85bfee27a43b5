use crate::params::DataType;
use crate::results::ResultType;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Where a match address lives, from the point of view of address
/// stability across relaunches of the target process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    /// Ordinary (dynamic) memory.
    Regular,
    /// Statically addressable inside the main executable image.
    StaticMainExecutable,
    /// Statically addressable inside another loaded library.
    StaticOtherLibrary,
}

/// One incremental delivery of sealed result-set buffers.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Sealed buffers in this worker's discovery order.
    pub result_sets: Vec<Vec<u8>>,
    /// Sum of the buffer byte lengths, precomputed for listeners that only
    /// track volume.
    pub total_result_set_length: usize,
    pub result_type: ResultType,
    pub data_type: DataType,
    pub address_type: AddressType,
    pub stride: u64,
    /// Present when static-segment classification was requested.
    pub header_addresses: Option<Vec<u64>>,
}

/// Shared scan-progress state, updated from any worker and polled by the
/// owner. Cancellation is cooperative and coarse: drivers check the flag
/// between regions, never inside one.
#[derive(Debug, Default)]
pub struct SearchProgress {
    initiated: AtomicBool,
    max_progress: AtomicU64,
    progress: AtomicU64,
    num_results: AtomicU64,
    cancel: AtomicBool,
}

impl SearchProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once by the driver before any progress events.
    pub fn begin(&self, max_progress: u64) {
        self.max_progress.store(max_progress, Ordering::Relaxed);
        self.progress.store(0, Ordering::Relaxed);
        self.num_results.store(0, Ordering::Relaxed);
        self.initiated.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_initiated(&self) -> bool {
        self.initiated.load(Ordering::Acquire)
    }

    /// Total work units (regions) of the current pass.
    #[inline]
    pub fn max_progress(&self) -> u64 {
        self.max_progress.load(Ordering::Relaxed)
    }

    /// Completed work units.
    #[inline]
    pub fn progress(&self) -> u64 {
        self.progress.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn num_results(&self) -> u64 {
        self.num_results.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn advance(&self, regions_done: u64, results_found: u64) {
        self.progress.fetch_add(regions_done, Ordering::Relaxed);
        self.num_results.fetch_add(results_found, Ordering::Relaxed);
    }

    /// Request cooperative cancellation. Safe from any thread.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}
