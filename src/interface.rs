//! Background save and load.
//!
//! A thread-per-call runner: the work runs on its own thread against a
//! shared [`Store`] and the caller keeps a [`TaskHandle`] to cancel it or
//! wait for the result. Cancellation is cooperative via an `Arc<AtomicBool>`;
//! the engines look at it between batches and chunks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{EavaultError, Result};
use crate::instance::EntityInstance;
use crate::registry::EntityTypeId;
use crate::save::SaveReport;
use crate::store::Store;

/// Cancellation token shared with the worker thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(EavaultError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Handle to a running or completed background call.
pub struct TaskHandle<T> {
    cancel: CancelToken,
    started: Instant,
    join: JoinHandle<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Request cancellation. The worker stops at its next batch boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
    /// Elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
    /// Waits for the call to finish and hands back its outcome.
    pub fn join(self) -> Result<T> {
        self.join
            .join()
            .map_err(|_| EavaultError::Backend("background task panicked".to_string()))?
    }
}

fn spawn<T, F>(task: &'static str, work: F) -> TaskHandle<T>
where
    T: Send + 'static,
    F: FnOnce(&CancelToken) -> Result<T> + Send + 'static,
{
    let cancel = CancelToken::new();
    let for_thread = cancel.clone();
    let join = std::thread::spawn(move || {
        let outcome = work(&for_thread);
        debug!(task, ok = outcome.is_ok(), "background task finished");
        outcome
    });
    TaskHandle {
        cancel,
        started: Instant::now(),
        join,
    }
}

/// Saves the instances on a background thread.
pub fn spawn_save(store: Arc<Store>, instances: Vec<EntityInstance>) -> TaskHandle<SaveReport> {
    spawn("save", move |cancel| store.save_with(&instances, cancel))
}

/// Loads instances of one entity type on a background thread; `None` loads
/// every instance of the type.
pub fn spawn_load(
    store: Arc<Store>,
    type_id: EntityTypeId,
    guids: Option<Vec<String>>,
) -> TaskHandle<Vec<EntityInstance>> {
    spawn("load", move |cancel| {
        store.load_with(type_id, guids.as_deref(), cancel)
    })
}
