//! This is a library for keeping a globally shared page-view counter in sync across every open viewer.
//! It was created for a single-page news site, so it doesn't include much that was not needed for that project.
//!
//! Counting strategy:
//! 1. On start, the session tries to establish an identity (a supplied token first, an anonymous session otherwise).
//!    Success or failure, the session becomes "ready" exactly once, after that attempt has settled.
//! 2. Once the session is ready and the counter document's path is known, the session asks the store to
//!    atomically increment `count` by one. This happens at most once per session, no matter how often readiness toggles.
//! 3. At the same point the session opens a standing subscription to the counter document. Every pushed snapshot
//!    (including the first, delivered on subscribe) replaces the local mirror of `count`.
//! 4. The presentation layer subscribes to mirror changes and renders whatever the mirror holds.
//!
//! The counter is never read-then-written. The only mutation is the server-side increment, so concurrent viewers can't lose updates.

pub mod capability;
pub mod config;
pub mod counter;
pub mod error;
pub mod identity;
pub mod listeners;
pub mod memory;
pub mod path;
pub mod session;
pub mod snapshot;
pub mod store;

#[cfg(feature = "firestore")]
pub mod firebase_auth;
#[cfg(feature = "firestore")]
pub mod firestore;
#[cfg(feature = "firestore")]
pub mod spawn;
#[cfg(all(test, feature = "firestore"))]
mod test_server;

pub use capability::Capabilities;
pub use config::{CounterConfig, StoreConfig};
pub use counter::{IncrementState, MirrorValue, ViewCounter};
pub use error::{ConfigError, IdentityError, StoreError};
pub use identity::{IdentityGate, IdentityProvider, LocalIdentityProvider, SessionIdentity};
pub use listeners::ListenerKey;
pub use memory::MemoryStore;
pub use path::DocumentPath;
pub use session::CounterSession;
pub use snapshot::{COUNT_FIELD, DocumentSnapshot};
pub use store::{DocumentStore, SnapshotListener, Subscription};
