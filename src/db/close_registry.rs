//! Teardown callback registry.
//!
//! A [`CloseRegistry`] is an append-only list of teardown callbacks shared by
//! every owner of one resource. Cloning the registry shares the list, so a
//! collaborator that wraps a handle can keep a clone and register its own
//! teardown without going through the handle.
//!
//! # Concurrency
//!
//! - `register` takes a short `std::sync::Mutex` and never awaits
//! - `drain_and_run` snapshots the list under that mutex, then runs the snapshot
//!   outside it, so registrations made during a drain are never lost (they are
//!   picked up by the next drain)
//! - drains are serialized by an async mutex; two concurrent drains run one
//!   after the other, never interleaved
//!
//! Draining does not remove entries.
//!
//! # Sealing
//!
//! [`CloseRegistry::seal_and_run`] marks the registry sealed in the same
//! critical section that takes the snapshot. [`CloseRegistry::try_register`]
//! checks the seal under that lock too, so a conditional registration either
//! lands in the final snapshot or is refused; it is never silently skipped.

use crate::error::DbResult;
use crate::models::ClosePolicy;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// A zero-argument teardown operation that may fail.
pub trait CloseCallback: Send + Sync {
    fn call(&self) -> BoxFuture<'static, DbResult<()>>;
}

impl<F, Fut> CloseCallback for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = DbResult<()>> + Send + 'static,
{
    fn call(&self) -> BoxFuture<'static, DbResult<()>> {
        Box::pin(self())
    }
}

/// Outcome of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Callbacks that completed successfully.
    pub succeeded: usize,
    /// Callbacks that failed and were skipped over (lenient policy only).
    pub failed: usize,
}

#[derive(Default)]
struct Entries {
    callbacks: Vec<Arc<dyn CloseCallback>>,
    sealed: bool,
}

struct RegistryInner {
    entries: Mutex<Entries>,
    drain_lock: tokio::sync::Mutex<()>,
}

#[derive(Clone)]
pub struct CloseRegistry {
    inner: Arc<RegistryInner>,
}

impl CloseRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: Mutex::new(Entries::default()),
                drain_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Create a registry pre-seeded with one callback.
    pub fn with_callback<F, Fut>(callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DbResult<()>> + Send + 'static,
    {
        let registry = Self::new();
        registry.register(callback);
        registry
    }

    /// Append a callback. Registering the same callback twice runs it twice.
    pub fn register<F, Fut>(&self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DbResult<()>> + Send + 'static,
    {
        self.register_arc(Arc::new(callback));
    }

    pub fn register_arc(&self, callback: Arc<dyn CloseCallback>) {
        let mut entries = self.entries();
        entries.callbacks.push(callback);
        debug!(registered = entries.callbacks.len(), "Close callback registered");
    }

    /// Append a callback unless the registry has been sealed.
    ///
    /// Returns `false`, dropping the callback, once [`CloseRegistry::seal_and_run`]
    /// has taken its snapshot.
    #[must_use]
    pub fn try_register<F, Fut>(&self, callback: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DbResult<()>> + Send + 'static,
    {
        let mut entries = self.entries();
        if entries.sealed {
            debug!("Close callback refused, registry sealed");
            return false;
        }
        entries.callbacks.push(Arc::new(callback));
        debug!(registered = entries.callbacks.len(), "Close callback registered");
        true
    }

    pub fn len(&self) -> usize {
        self.entries().callbacks.len()
    }

    pub fn is_sealed(&self) -> bool {
        self.entries().sealed
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both values share the same callback list.
    pub fn same_registry(&self, other: &CloseRegistry) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run every callback registered before this call, in registration order.
    ///
    /// Under [`ClosePolicy::Strict`] the first failure stops the drain and is
    /// returned unchanged. Under [`ClosePolicy::Lenient`] failures are logged,
    /// counted in the report, and the remaining callbacks still run.
    pub async fn drain_and_run(&self, policy: ClosePolicy) -> DbResult<DrainReport> {
        let _drain = self.inner.drain_lock.lock().await;
        let snapshot = self.entries().callbacks.clone();
        Self::run(snapshot, policy).await
    }

    /// Seal the registry and drain it.
    ///
    /// Behaves like [`CloseRegistry::drain_and_run`], except that every later
    /// [`CloseRegistry::try_register`] is refused.
    pub async fn seal_and_run(&self, policy: ClosePolicy) -> DbResult<DrainReport> {
        let _drain = self.inner.drain_lock.lock().await;
        let snapshot = {
            let mut entries = self.entries();
            entries.sealed = true;
            entries.callbacks.clone()
        };
        Self::run(snapshot, policy).await
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(snapshot: Vec<Arc<dyn CloseCallback>>, policy: ClosePolicy) -> DbResult<DrainReport> {
        let total = snapshot.len();
        let mut report = DrainReport::default();
        for (index, callback) in snapshot.into_iter().enumerate() {
            match callback.call().await {
                Ok(()) => report.succeeded += 1,
                Err(e) => match policy {
                    ClosePolicy::Strict => {
                        warn!(
                            index,
                            total,
                            error = %e,
                            "Close callback failed, skipping remaining callbacks"
                        );
                        return Err(e);
                    }
                    ClosePolicy::Lenient => {
                        warn!(index, total, error = %e, "Close callback failed, continuing");
                        report.failed += 1;
                    }
                },
            }
        }

        debug!(
            succeeded = report.succeeded,
            failed = report.failed,
            %policy,
            "Close callbacks drained"
        );
        Ok(report)
    }
}

impl Default for CloseRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CloseRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloseRegistry")
            .field("callbacks", &self.len())
            .finish()
    }
}
