use lazy_static::lazy_static;
use tokio::runtime::Runtime;

lazy_static! {
    /// Shared tokio runtime for async scan tasks. Scans themselves run on
    /// rayon inside `spawn_blocking`; this runtime only hosts the task
    /// shells and cancellation plumbing.
    pub static ref TOKIO_RUNTIME: Runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("memscan-task")
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");
}
