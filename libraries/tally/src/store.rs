//! The remote document store, as seen by the counter.

use futures::future::LocalBoxFuture;

use crate::error::StoreError;
use crate::path::DocumentPath;
use crate::snapshot::DocumentSnapshot;

/// Called with the latest snapshot on subscribe and again on every change, or with an error if the stream breaks.
pub type SnapshotListener = Box<dyn FnMut(Result<DocumentSnapshot, StoreError>)>;

pub trait DocumentStore {
    /// Atomically add `delta` to a numeric field, evaluated by the store itself.
    /// Creates the document (with the field set to `delta`) if it doesn't exist; other fields are left alone.
    fn increment(
        &self,
        path: &DocumentPath,
        field: &str,
        delta: u64,
    ) -> LocalBoxFuture<'static, Result<(), StoreError>>;

    /// Point read.
    fn get(&self, path: &DocumentPath) -> LocalBoxFuture<'static, Result<DocumentSnapshot, StoreError>>;

    /// Standing subscription to one document. The current state is delivered right away.
    /// Dropping the returned handle stops delivery.
    fn subscribe(&self, path: &DocumentPath, listener: SnapshotListener) -> Subscription;
}

/// Releases a standing listener when dropped.
#[must_use = "dropping a Subscription immediately unsubscribes"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A subscription with nothing to release.
    pub fn detached() -> Self {
        Self { release: None }
    }

    pub fn cancel(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}
