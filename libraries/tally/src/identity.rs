//! Session identity and the one-shot bootstrap gate.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::FutureExt as _;
use futures::future::LocalBoxFuture;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::IdentityError;
use crate::listeners::{ListenerKey, Listeners};
use crate::store::Subscription;

/// An opaque identifier for the current viewer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SessionIdentity {
    uid: String,
    anonymous: bool,
}

impl SessionIdentity {
    pub fn new(uid: impl Into<String>, anonymous: bool) -> Self {
        Self {
            uid: uid.into(),
            anonymous,
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }
}

pub type IdentityListener = Box<dyn FnMut(Option<SessionIdentity>)>;

/// Supplies session identities. Owns the identity; everyone else only observes it.
pub trait IdentityProvider {
    fn sign_in_with_token(&self, token: &str) -> LocalBoxFuture<'static, Result<SessionIdentity, IdentityError>>;

    fn sign_in_anonymously(&self) -> LocalBoxFuture<'static, Result<SessionIdentity, IdentityError>>;

    fn sign_out(&self);

    fn current(&self) -> Option<SessionIdentity>;

    /// Called on every sign-in and sign-out until the returned handle is dropped.
    fn on_change(&self, listener: IdentityListener) -> Subscription;
}

/// An identity provider that never leaves the process.
///
/// Anonymous sessions get a fresh uuid; token sessions get a uid derived from a hash of the token, so the token
/// itself is never displayed.
#[derive(Clone, Default)]
pub struct LocalIdentityProvider {
    inner: Rc<LocalInner>,
}

#[derive(Default)]
struct LocalInner {
    current: RefCell<Option<SessionIdentity>>,
    failure: RefCell<Option<IdentityError>>,
    sign_in_attempts: Cell<usize>,
    listeners: Listeners<Option<SessionIdentity>>,
}

impl LocalIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sign-in attempt fails with `error`.
    pub fn failing(error: IdentityError) -> Self {
        let provider = Self::default();
        *provider.inner.failure.borrow_mut() = Some(error);
        provider
    }

    pub fn sign_in_attempts(&self) -> usize {
        self.inner.sign_in_attempts.get()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    fn settle(&self, identity: SessionIdentity) -> LocalBoxFuture<'static, Result<SessionIdentity, IdentityError>> {
        let inner = self.inner.clone();
        async move {
            inner.sign_in_attempts.set(inner.sign_in_attempts.get() + 1);
            if let Some(error) = inner.failure.borrow().clone() {
                return Err(error);
            }
            *inner.current.borrow_mut() = Some(identity.clone());
            inner.listeners.notify(&Some(identity.clone()));
            Ok(identity)
        }
        .boxed_local()
    }
}

impl IdentityProvider for LocalIdentityProvider {
    fn sign_in_with_token(&self, token: &str) -> LocalBoxFuture<'static, Result<SessionIdentity, IdentityError>> {
        if token.trim().is_empty() {
            let inner = self.inner.clone();
            return async move {
                inner.sign_in_attempts.set(inner.sign_in_attempts.get() + 1);
                Err(IdentityError::Rejected("empty token".to_string()))
            }
            .boxed_local();
        }
        let uid = format!("token-{:016x}", xxh3_64(token.as_bytes()));
        self.settle(SessionIdentity::new(uid, false))
    }

    fn sign_in_anonymously(&self) -> LocalBoxFuture<'static, Result<SessionIdentity, IdentityError>> {
        let uid = format!("anon-{}", uuid::Uuid::new_v4());
        self.settle(SessionIdentity::new(uid, true))
    }

    fn sign_out(&self) {
        let previous = self.inner.current.borrow_mut().take();
        if previous.is_some() {
            self.inner.listeners.notify(&None);
        }
    }

    fn current(&self) -> Option<SessionIdentity> {
        self.inner.current.borrow().clone()
    }

    fn on_change(&self, mut listener: IdentityListener) -> Subscription {
        let key = self
            .inner
            .listeners
            .register(move |identity: &Option<SessionIdentity>| listener(identity.clone()));
        let inner = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.listeners.unregister(key);
            }
        })
    }
}

/// Runs the identity bootstrap once and reports when it has settled.
///
/// Readiness flips to true exactly once, after the sign-in attempt resolves or fails. It never goes back.
#[derive(Clone, Default)]
pub struct IdentityGate {
    inner: Rc<GateInner>,
}

#[derive(Default)]
struct GateInner {
    identity: RefCell<Option<SessionIdentity>>,
    started: Cell<bool>,
    ready: Cell<bool>,
    torn_down: Cell<bool>,
    provider_listener: RefCell<Option<Subscription>>,
    ready_listeners: Listeners<()>,
    identity_listeners: Listeners<Option<SessionIdentity>>,
}

impl IdentityGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.get()
    }

    pub fn identity(&self) -> Option<SessionIdentity> {
        self.inner.identity.borrow().clone()
    }

    /// Establish a session: `token` first if there is one, an anonymous session otherwise.
    ///
    /// Only the first call does anything; there are no retries. Failures are logged and leave the identity absent.
    /// Readiness is set only once the attempt has settled.
    pub async fn bootstrap(&self, provider: &dyn IdentityProvider, token: Option<&str>) {
        if self.inner.started.replace(true) {
            log::warn!("Identity bootstrap already ran; ignoring repeat call");
            return;
        }

        // standing listener, independent of the one-shot attempt below
        if !self.inner.torn_down.get() {
            let weak = Rc::downgrade(&self.inner);
            let listener = provider.on_change(Box::new(move |identity| {
                if let Some(inner) = weak.upgrade() {
                    GateInner::set_identity(&inner, identity);
                }
            }));
            *self.inner.provider_listener.borrow_mut() = Some(listener);
        }

        let attempt = match token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => provider.sign_in_with_token(token),
            None => provider.sign_in_anonymously(),
        };

        match attempt.await {
            Ok(identity) => {
                log::info!(
                    "Signed in as {} ({})",
                    identity.uid(),
                    if identity.is_anonymous() { "anonymous" } else { "token" }
                );
                GateInner::set_identity(&self.inner, Some(identity));
            }
            Err(e) => {
                log::error!("Identity bootstrap failed, continuing without a session: {e}");
            }
        }

        self.mark_ready();
    }

    /// Conclude the bootstrap without an identity provider (e.g. the store config was unusable).
    pub fn settle_without_provider(&self) {
        if self.inner.started.replace(true) {
            return;
        }
        log::info!("No identity provider available; marking identity bootstrap as settled");
        self.mark_ready();
    }

    fn mark_ready(&self) {
        if self.inner.ready.replace(true) {
            return;
        }
        log::debug!("Identity bootstrap settled");
        self.inner.ready_listeners.notify(&());
    }

    /// Called once when readiness is reached. If it already has been, the callback runs immediately.
    pub fn on_ready(&self, mut callback: impl FnMut() + 'static) -> Option<ListenerKey> {
        if self.is_ready() {
            callback();
            return None;
        }
        Some(self.inner.ready_listeners.register(move |_| callback()))
    }

    pub fn on_identity_change(
        &self,
        callback: impl FnMut(&Option<SessionIdentity>) + 'static,
    ) -> ListenerKey {
        self.inner.identity_listeners.register(callback)
    }

    pub fn unsubscribe_identity(&self, key: ListenerKey) {
        self.inner.identity_listeners.unregister(key);
    }

    pub fn cancel_on_ready(&self, key: ListenerKey) {
        self.inner.ready_listeners.unregister(key);
    }

    /// Release the standing provider listener. Readiness and the last known identity are kept.
    ///
    /// A bootstrap that hasn't started yet still signs in, but no longer registers a listener.
    pub fn teardown(&self) {
        self.inner.torn_down.set(true);
        let listener = self.inner.provider_listener.borrow_mut().take();
        drop(listener);
    }
}

impl GateInner {
    fn set_identity(inner: &Rc<GateInner>, identity: Option<SessionIdentity>) {
        let changed = {
            let mut current = inner.identity.borrow_mut();
            let changed = *current != identity;
            *current = identity.clone();
            changed
        };
        if changed {
            inner.identity_listeners.notify(&identity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn test_anonymous_bootstrap() {
        let provider = LocalIdentityProvider::new();
        let gate = IdentityGate::new();
        assert!(!gate.is_ready());

        block_on(gate.bootstrap(&provider, None));

        assert!(gate.is_ready());
        let identity = gate.identity().unwrap();
        assert!(identity.is_anonymous());
        assert!(identity.uid().starts_with("anon-"));
        assert_eq!(provider.sign_in_attempts(), 1);
    }

    #[test]
    fn test_token_takes_priority() {
        let provider = LocalIdentityProvider::new();
        let gate = IdentityGate::new();
        block_on(gate.bootstrap(&provider, Some("issued-token")));

        let identity = gate.identity().unwrap();
        assert!(!identity.is_anonymous());
        assert!(identity.uid().starts_with("token-"));
        assert!(!identity.uid().contains("issued-token"));
    }

    #[test]
    fn test_blank_token_falls_back_to_anonymous() {
        let provider = LocalIdentityProvider::new();
        let gate = IdentityGate::new();
        block_on(gate.bootstrap(&provider, Some("   ")));
        assert!(gate.identity().unwrap().is_anonymous());
    }

    #[test]
    fn test_failure_still_becomes_ready() {
        let provider =
            LocalIdentityProvider::failing(IdentityError::Unavailable("offline".to_string()));
        let gate = IdentityGate::new();
        block_on(gate.bootstrap(&provider, None));

        assert!(gate.is_ready());
        assert_eq!(gate.identity(), None);
    }

    #[test]
    fn test_bootstrap_runs_once() {
        let provider = LocalIdentityProvider::new();
        let gate = IdentityGate::new();
        block_on(gate.bootstrap(&provider, None));
        let first = gate.identity();
        block_on(gate.bootstrap(&provider, None));

        assert_eq!(provider.sign_in_attempts(), 1);
        assert_eq!(gate.identity(), first);
    }

    #[test]
    fn test_ready_only_after_attempt_settles() {
        let provider = LocalIdentityProvider::new();
        let gate = IdentityGate::new();
        let seen_identity_when_ready = Rc::new(RefCell::new(None));
        gate.on_ready({
            let gate = gate.clone();
            let seen = seen_identity_when_ready.clone();
            move || *seen.borrow_mut() = Some(gate.identity())
        });

        let mut bootstrap = Box::pin(gate.bootstrap(&provider, None));
        // not polled yet: nothing settled
        assert!(!gate.is_ready());
        block_on(bootstrap.as_mut());

        let seen = seen_identity_when_ready.borrow().clone();
        assert!(matches!(seen, Some(Some(_))));
    }

    #[test]
    fn test_on_ready_after_ready_runs_immediately() {
        let gate = IdentityGate::new();
        gate.settle_without_provider();
        let ran = Rc::new(Cell::new(false));
        let key = gate.on_ready({
            let ran = ran.clone();
            move || ran.set(true)
        });
        assert!(ran.get());
        assert!(key.is_none());
    }

    #[test]
    fn test_tracks_sign_out() {
        let provider = LocalIdentityProvider::new();
        let gate = IdentityGate::new();
        block_on(gate.bootstrap(&provider, None));

        let changes = Rc::new(RefCell::new(Vec::new()));
        gate.on_identity_change({
            let changes = changes.clone();
            move |identity| changes.borrow_mut().push(identity.is_some())
        });

        provider.sign_out();
        assert_eq!(gate.identity(), None);
        block_on(provider.sign_in_anonymously()).unwrap();
        assert!(gate.identity().is_some());
        assert_eq!(*changes.borrow(), vec![false, true]);
    }

    #[test]
    fn test_teardown_releases_provider_listener() {
        let provider = LocalIdentityProvider::new();
        let gate = IdentityGate::new();
        block_on(gate.bootstrap(&provider, None));
        assert_eq!(provider.listener_count(), 1);

        gate.teardown();
        assert_eq!(provider.listener_count(), 0);
        assert!(gate.is_ready());

        provider.sign_out();
        assert!(gate.identity().is_some());
    }
}
