//! The view-count synchronizer.
//!
//! Two independent signals gate everything here: identity readiness (`set_auth_ready`) and store readiness
//! (`set_store_path`). The first instant both hold, the counter fires its one increment and opens its one mirror
//! subscription. Readiness may toggle any number of times afterwards; the increment never fires again, and the
//! subscription is released while readiness is lost and re-opened when it comes back.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use futures::task::{LocalSpawn, LocalSpawnExt as _};

use crate::error::{ConfigError, StoreError};
use crate::listeners::{ListenerKey, Listeners};
use crate::path::DocumentPath;
use crate::snapshot::{COUNT_FIELD, DocumentSnapshot};
use crate::store::{DocumentStore, Subscription};

/// Lifecycle of the one increment a session is allowed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum IncrementState {
    AwaitingReadiness,
    /// The write has been issued and hasn't settled yet.
    Attempting,
    /// The write settled, successfully or not. Terminal.
    Done,
}

/// The locally held copy of the shared count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct MirrorValue {
    pub count: u64,
    /// False until the first snapshot arrives.
    pub loaded: bool,
}

enum Mirror {
    Closed,
    Opening,
    Open(Subscription),
}

#[derive(Clone)]
pub struct ViewCounter {
    inner: Rc<Inner>,
}

struct Inner {
    backend: Option<Backend>,
    disabled: Option<ConfigError>,
    state: RefCell<State>,
    observers: Listeners<MirrorValue>,
}

struct Backend {
    store: Rc<dyn DocumentStore>,
    spawner: Rc<dyn LocalSpawn>,
}

struct State {
    auth_ready: bool,
    path: Option<DocumentPath>,
    suspended: bool,
    increment: IncrementState,
    mirror: Mirror,
    // bumped on every open so late deliveries from a released subscription are ignored
    generation: u64,
    value: MirrorValue,
}

impl State {
    fn ready(&self) -> bool {
        self.auth_ready && self.path.is_some()
    }

    fn may_proceed(&self) -> bool {
        self.ready() && !self.suspended
    }
}

impl ViewCounter {
    /// `spawner` runs the fire-and-forget increment write.
    pub fn new(store: Rc<dyn DocumentStore>, spawner: Rc<dyn LocalSpawn>) -> Self {
        Self::build(Some(Backend { store, spawner }), None)
    }

    /// A counter that never writes or subscribes. Its mirror stays at the default.
    pub fn disabled(reason: ConfigError) -> Self {
        log::error!("Configuration error, page views will not be counted: {reason}");
        Self::build(None, Some(reason))
    }

    fn build(backend: Option<Backend>, disabled: Option<ConfigError>) -> Self {
        Self {
            inner: Rc::new(Inner {
                backend,
                disabled,
                state: RefCell::new(State {
                    auth_ready: false,
                    path: None,
                    suspended: false,
                    increment: IncrementState::AwaitingReadiness,
                    mirror: Mirror::Closed,
                    generation: 0,
                    value: MirrorValue::default(),
                }),
                observers: Listeners::default(),
            }),
        }
    }

    pub fn disabled_reason(&self) -> Option<&ConfigError> {
        self.inner.disabled.as_ref()
    }

    pub fn set_auth_ready(&self, ready: bool) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.auth_ready == ready {
                return;
            }
            state.auth_ready = ready;
        }
        log::debug!("Identity readiness is now {ready}");
        self.evaluate();
    }

    /// Store readiness: `Some` once the counter document's path can be computed.
    pub fn set_store_path(&self, path: Option<DocumentPath>) {
        let released = {
            let mut state = self.inner.state.borrow_mut();
            if state.path == path {
                return;
            }
            state.path = path;
            // a subscription on the old path is no longer wanted
            std::mem::replace(&mut state.mirror, Mirror::Closed)
        };
        drop(released);
        self.evaluate();
    }

    /// Both gating conditions hold.
    pub fn is_ready(&self) -> bool {
        self.inner.state.borrow().ready()
    }

    pub fn increment_state(&self) -> IncrementState {
        self.inner.state.borrow().increment
    }

    pub fn mirror(&self) -> MirrorValue {
        self.inner.state.borrow().value
    }

    pub fn is_mirror_open(&self) -> bool {
        !matches!(self.inner.state.borrow().mirror, Mirror::Closed)
    }

    /// Register a callback for every mirror update. Keep the key to unsubscribe on teardown.
    pub fn subscribe(&self, callback: impl FnMut(MirrorValue) + 'static) -> ListenerKey {
        let mut callback = callback;
        self.inner
            .observers
            .register(move |value: &MirrorValue| callback(*value))
    }

    pub fn unsubscribe(&self, key: ListenerKey) {
        self.inner.observers.unregister(key);
    }

    /// Release the mirror subscription (e.g. the owning view went away). The increment guard is unaffected.
    pub fn suspend(&self) {
        self.inner.state.borrow_mut().suspended = true;
        self.evaluate();
    }

    pub fn resume(&self) {
        self.inner.state.borrow_mut().suspended = false;
        self.evaluate();
    }

    fn evaluate(&self) {
        self.record_view();
        self.sync_mirror();
    }

    /// Issue the one atomic `count += 1` for this session, if readiness allows and it hasn't been issued yet.
    ///
    /// Returns whether a write was issued. The write runs in the background; its result is only logged, and the
    /// mirror only ever changes through the subscription.
    pub fn record_view(&self) -> bool {
        let Some(backend) = &self.inner.backend else {
            return false;
        };

        let path = {
            let mut state = self.inner.state.borrow_mut();
            if state.increment != IncrementState::AwaitingReadiness || !state.may_proceed() {
                return false;
            }
            let Some(path) = state.path.clone() else {
                return false;
            };
            state.increment = IncrementState::Attempting;
            path
        };

        log::info!("Recording page view on {path}");
        let write = backend.store.increment(&path, COUNT_FIELD, 1);
        let inner = Rc::downgrade(&self.inner);
        let spawned = backend.spawner.spawn_local(async move {
            match write.await {
                Ok(()) => log::info!("Page view recorded on {path}"),
                Err(e) => log::warn!("Failed to record page view on {path}: {e}"),
            }
            if let Some(inner) = inner.upgrade() {
                inner.state.borrow_mut().increment = IncrementState::Done;
            }
        });

        if let Err(e) = spawned {
            log::error!("Could not schedule page view write: {e}");
            self.inner.state.borrow_mut().increment = IncrementState::Done;
        }
        true
    }

    fn sync_mirror(&self) {
        let Some(backend) = &self.inner.backend else {
            return;
        };

        let (open, released) = {
            let mut state = self.inner.state.borrow_mut();
            let wanted = state.may_proceed();
            let closed = matches!(state.mirror, Mirror::Closed);
            if closed && wanted {
                state.mirror = Mirror::Opening;
                state.generation += 1;
                let generation = state.generation;
                (state.path.clone().map(|p| (p, generation)), None)
            } else if !closed && !wanted {
                (None, Some(std::mem::replace(&mut state.mirror, Mirror::Closed)))
            } else {
                (None, None)
            }
        };

        if released.is_some() {
            log::debug!("Releasing counter subscription");
        }
        drop(released);

        let Some((path, generation)) = open else {
            return;
        };

        log::debug!("Subscribing to {path}");
        let weak: Weak<Inner> = Rc::downgrade(&self.inner);
        let subscription = backend.store.subscribe(
            &path,
            Box::new(move |update| {
                if let Some(inner) = weak.upgrade() {
                    Inner::on_update(&inner, generation, update);
                }
            }),
        );

        let stale = {
            let mut state = self.inner.state.borrow_mut();
            if state.generation == generation && matches!(state.mirror, Mirror::Opening) {
                state.mirror = Mirror::Open(subscription);
                None
            } else {
                // readiness was lost while subscribing
                Some(subscription)
            }
        };
        drop(stale);
    }
}

impl Inner {
    fn on_update(inner: &Rc<Inner>, generation: u64, update: Result<DocumentSnapshot, StoreError>) {
        let value = {
            let mut state = inner.state.borrow_mut();
            if state.generation != generation || matches!(state.mirror, Mirror::Closed) {
                return;
            }
            match update {
                Ok(snapshot) => {
                    if !snapshot.exists() {
                        log::debug!("Counter document {} does not exist yet", snapshot.path());
                    }
                    state.value = MirrorValue {
                        count: snapshot.count(),
                        loaded: true,
                    };
                    state.value
                }
                Err(e) => {
                    log::warn!(
                        "Counter subscription error, keeping last known count {}: {e}",
                        state.value.count
                    );
                    return;
                }
            }
        };
        inner.observers.notify(&value);
    }
}
