//! Async scan coordination.
//!
//! One manager runs at most one scan at a time. `start_*_async` returns
//! immediately; the scan runs on rayon inside a blocking task on the shared
//! runtime, reports through the caller's listener, and parks its outcome
//! for `take_results`. Cancellation is cooperative: the token and the
//! progress flag are both honored between regions.

use super::driver::{run_direct_search, StaticMetadata};
use super::indirect::run_indirect_search;
use crate::core::globals::TOKIO_RUNTIME;
use crate::core::MemoryAccess;
use crate::error::ScanError;
use crate::params::SearchParameters;
use crate::progress::{SearchProgress, SearchProgressListener};
use crate::results::SearchResults;
use log::{debug, error, info};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Caller-supplied comparison predicate and its metadata. The engine does
/// not define predicate semantics; it only needs the candidate width, an
/// optional exact byte needle for the anchored fast path, and the closure.
#[derive(Clone)]
pub struct ValueSearchSpec {
    pub value_size: usize,
    pub needle: Option<Vec<u8>>,
    pub matcher: Arc<dyn Fn(&[u8]) -> bool + Send + Sync>,
}

impl ValueSearchSpec {
    /// Exact byte-pattern search.
    pub fn exact(bytes: Vec<u8>) -> Self {
        let needle = bytes.clone();
        Self {
            value_size: bytes.len(),
            needle: Some(bytes),
            matcher: Arc::new(move |candidate| candidate == needle.as_slice()),
        }
    }

    /// Arbitrary predicate over `value_size`-byte windows.
    pub fn predicate(value_size: usize, matcher: Arc<dyn Fn(&[u8]) -> bool + Send + Sync>) -> Self {
        Self {
            value_size,
            needle: None,
            matcher,
        }
    }
}

impl std::fmt::Debug for ValueSearchSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueSearchSpec")
            .field("value_size", &self.value_size)
            .field("needle", &self.needle)
            .finish_non_exhaustive()
    }
}

/// Manages one scan at a time against one target process.
pub struct ScanManager {
    progress: Arc<SearchProgress>,
    cancel_token: Option<CancellationToken>,
    scan_handle: Option<JoinHandle<()>>,
    outcome: Arc<Mutex<Option<Result<SearchResults, ScanError>>>>,
}

impl ScanManager {
    pub fn new() -> Self {
        Self {
            progress: Arc::new(SearchProgress::new()),
            cancel_token: None,
            scan_handle: None,
            outcome: Arc::new(Mutex::new(None)),
        }
    }

    /// Shared progress state, for pollers.
    pub fn progress(&self) -> Arc<SearchProgress> {
        Arc::clone(&self.progress)
    }

    pub fn is_scanning(&self) -> bool {
        if let Some(ref handle) = self.scan_handle {
            !handle.is_finished()
        } else {
            false
        }
    }

    /// Request cooperative cancellation of the current scan.
    pub fn request_cancel(&self) {
        if let Some(ref token) = self.cancel_token {
            token.cancel();
        }
        self.progress.cancel();
    }

    /// Take the finished scan's outcome, if any.
    pub fn take_results(&self) -> Option<Result<SearchResults, ScanError>> {
        self.outcome.lock().ok()?.take()
    }

    fn begin_scan(&mut self) -> Result<(Arc<SearchProgress>, CancellationToken), ScanError> {
        if self.is_scanning() {
            return Err(ScanError::invalid_configuration("scan already in progress"));
        }

        // Fresh progress per pass so pollers never see stale counters.
        self.progress = Arc::new(SearchProgress::new());
        let cancel_token = CancellationToken::new();
        self.cancel_token = Some(cancel_token.clone());

        if let Ok(mut slot) = self.outcome.lock() {
            slot.take();
        }

        Ok((Arc::clone(&self.progress), cancel_token))
    }

    /// Start an async direct value search. Returns immediately; fatal
    /// configuration errors are still reported synchronously here.
    pub fn start_value_search_async<M>(
        &mut self,
        memory: Arc<M>,
        pid: i32,
        params: SearchParameters,
        spec: ValueSearchSpec,
        static_metadata: Option<StaticMetadata>,
        listener: Arc<dyn SearchProgressListener>,
    ) -> Result<(), ScanError>
    where
        M: MemoryAccess + 'static,
    {
        params.validate()?;
        let (progress, cancel_token) = self.begin_scan()?;
        let outcome = Arc::clone(&self.outcome);

        let handle = TOKIO_RUNTIME.spawn(async move {
            let token = cancel_token.clone();
            let bridge_progress = Arc::clone(&progress);
            // Bridge the token onto the cooperative flag the driver polls.
            let bridge = TOKIO_RUNTIME.spawn(async move {
                token.cancelled().await;
                bridge_progress.cancel();
            });

            let result = tokio::task::spawn_blocking(move || {
                run_direct_search(
                    memory.as_ref(),
                    pid,
                    &params,
                    spec.value_size,
                    spec.needle.as_deref(),
                    spec.matcher.as_ref(),
                    static_metadata.as_ref(),
                    progress.as_ref(),
                    listener.as_ref(),
                )
            })
            .await;

            bridge.abort();
            Self::store_outcome(&outcome, result);
        });

        self.scan_handle = Some(handle);
        Ok(())
    }

    /// Start an async indirect (pointer-chain) search for `target_address`.
    pub fn start_address_search_async<M>(
        &mut self,
        memory: Arc<M>,
        pid: i32,
        params: SearchParameters,
        target_address: u64,
        listener: Arc<dyn SearchProgressListener>,
    ) -> Result<(), ScanError>
    where
        M: MemoryAccess + 'static,
    {
        params.validate()?;
        let (progress, cancel_token) = self.begin_scan()?;
        let outcome = Arc::clone(&self.outcome);

        let handle = TOKIO_RUNTIME.spawn(async move {
            let token = cancel_token.clone();
            let bridge_progress = Arc::clone(&progress);
            let bridge = TOKIO_RUNTIME.spawn(async move {
                token.cancelled().await;
                bridge_progress.cancel();
            });

            let result = tokio::task::spawn_blocking(move || {
                run_indirect_search(memory.as_ref(), pid, &params, target_address, progress.as_ref(), listener.as_ref())
            })
            .await;

            bridge.abort();
            Self::store_outcome(&outcome, result);
        });

        self.scan_handle = Some(handle);
        Ok(())
    }

    fn store_outcome(
        outcome: &Mutex<Option<Result<SearchResults, ScanError>>>,
        result: Result<Result<SearchResults, ScanError>, tokio::task::JoinError>,
    ) {
        let stored = match result {
            Ok(Ok(results)) => {
                info!("scan finished with {} results", results.count());
                Ok(results)
            },
            Ok(Err(scan_error)) => {
                error!("scan failed: {}", scan_error);
                Err(scan_error)
            },
            Err(join_error) => {
                error!("scan task panicked: {:?}", join_error);
                Err(ScanError::Io(std::io::Error::other(join_error)))
            },
        };
        match outcome.lock() {
            Ok(mut slot) => *slot = Some(stored),
            Err(poisoned) => debug!("outcome mutex poisoned: {:?}", poisoned),
        }
    }
}

impl Default for ScanManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::progress::NullProgressListener;
    use crate::scan::tests::mock_memory::MockMemory;
    use std::time::{Duration, Instant};

    fn wait_until_done(manager: &ScanManager) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while manager.is_scanning() {
            assert!(Instant::now() < deadline, "scan did not finish in time");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn invalid_configuration_is_reported_synchronously() {
        let mut manager = ScanManager::new();
        let mut params = SearchParameters::default();
        params.pointer_size = 2;

        let err = manager
            .start_value_search_async(
                Arc::new(MockMemory::new()),
                std::process::id() as i32,
                params,
                ValueSearchSpec::exact(vec![1, 2, 3, 4]),
                None,
                Arc::new(NullProgressListener),
            )
            .unwrap_err();

        assert!(matches!(err, ScanError::InvalidConfiguration(_)));
        assert!(!manager.is_scanning());
        assert!(manager.take_results().is_none());
    }

    #[test]
    fn async_scan_completes_and_parks_its_outcome() {
        let mut manager = ScanManager::new();
        // The region list comes from this test process; every read goes to
        // the mock and fails, so the scan completes empty either way.
        let mut params = SearchParameters::default();
        params.begin_address = 0x1000;
        params.end_address = 0x2000;

        manager
            .start_value_search_async(
                Arc::new(MockMemory::new()),
                std::process::id() as i32,
                params,
                ValueSearchSpec::exact(vec![0xAB, 0xCD, 0xEF, 0x01]),
                None,
                Arc::new(NullProgressListener),
            )
            .unwrap();

        wait_until_done(&manager);
        let results = manager.take_results().expect("outcome parked").expect("scan succeeds");
        assert_eq!(results.count(), 0);
        // The outcome is taken exactly once.
        assert!(manager.take_results().is_none());
    }
}
