//! Wires the identity gate, the store and the view counter together for one page session.

use std::rc::Rc;

use futures::task::{LocalSpawn, LocalSpawnExt as _};

use crate::capability::Capabilities;
use crate::config::CounterConfig;
use crate::counter::ViewCounter;
use crate::identity::{IdentityGate, IdentityProvider};
use crate::store::DocumentStore;

pub struct CounterSession {
    gate: IdentityGate,
    counter: ViewCounter,
    identity: Rc<dyn IdentityProvider>,
}

impl CounterSession {
    /// Start the session: validate the config, kick off the identity bootstrap, and arm the counter.
    ///
    /// Never fails. An unusable config disables the counter for the rest of the session, but readiness is still
    /// reached so nothing waiting on it is blocked.
    pub fn start(
        config: CounterConfig,
        store: Rc<dyn DocumentStore>,
        identity: Rc<dyn IdentityProvider>,
        spawner: Rc<dyn LocalSpawn>,
    ) -> Self {
        let gate = IdentityGate::new();

        let path = match config.counter_path() {
            Ok(path) => path,
            Err(e) => {
                let counter = ViewCounter::disabled(e);
                gate.settle_without_provider();
                counter.set_auth_ready(gate.is_ready());
                return Self {
                    gate,
                    counter,
                    identity,
                };
            }
        };

        let counter = ViewCounter::new(store, spawner.clone());
        counter.set_store_path(Some(path));

        gate.on_ready({
            let counter = counter.clone();
            move || counter.set_auth_ready(true)
        });

        let bootstrap = {
            let gate = gate.clone();
            let identity = identity.clone();
            let token = config.bootstrap_token().map(str::to_string);
            async move { gate.bootstrap(identity.as_ref(), token.as_deref()).await }
        };
        if let Err(e) = spawner.spawn_local(bootstrap) {
            log::error!("Could not schedule identity bootstrap: {e}");
            gate.settle_without_provider();
        }

        Self {
            gate,
            counter,
            identity,
        }
    }

    pub fn counter(&self) -> &ViewCounter {
        &self.counter
    }

    pub fn gate(&self) -> &IdentityGate {
        &self.gate
    }

    pub fn identity_provider(&self) -> &Rc<dyn IdentityProvider> {
        &self.identity
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities::for_session(self.gate.identity().as_ref())
    }

    /// Release the standing listeners. An increment already in flight is left to finish on its own.
    pub fn teardown(&self) {
        self.counter.suspend();
        self.gate.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::counter::{IncrementState, MirrorValue};
    use crate::error::{ConfigError, IdentityError};
    use crate::identity::LocalIdentityProvider;
    use crate::memory::MemoryStore;
    use futures::executor::LocalPool;

    fn config() -> CounterConfig {
        CounterConfig::new(StoreConfig {
            api_key: Some("key".to_string()),
            ..Default::default()
        })
        .with_app_id("session-test")
    }

    #[test]
    fn test_start_counts_and_mirrors() {
        let mut pool = LocalPool::new();
        let store = MemoryStore::new();
        let identity = LocalIdentityProvider::new();
        let session = CounterSession::start(
            config(),
            Rc::new(store.clone()),
            Rc::new(identity.clone()),
            Rc::new(pool.spawner()),
        );

        assert!(!session.gate().is_ready());
        assert_eq!(session.counter().mirror(), MirrorValue::default());

        pool.run_until_stalled();

        assert!(session.gate().is_ready());
        assert!(session.capabilities().elevated_view);
        assert_eq!(store.increment_calls(), 1);
        assert_eq!(session.counter().mirror(), MirrorValue { count: 1, loaded: true });
    }

    #[test]
    fn test_bad_config_disables_counter() {
        let mut pool = LocalPool::new();
        let store = MemoryStore::new();
        let identity = LocalIdentityProvider::new();
        let session = CounterSession::start(
            CounterConfig::new(StoreConfig::default()),
            Rc::new(store.clone()),
            Rc::new(identity.clone()),
            Rc::new(pool.spawner()),
        );
        pool.run_until_stalled();

        assert!(session.gate().is_ready());
        assert_eq!(
            session.counter().disabled_reason(),
            Some(&ConfigError::MissingField("apiKey"))
        );
        assert_eq!(store.increment_calls(), 0);
        assert_eq!(identity.sign_in_attempts(), 0);
        assert_eq!(session.counter().increment_state(), IncrementState::AwaitingReadiness);
    }

    #[test]
    fn test_identity_failure_still_counts() {
        let mut pool = LocalPool::new();
        let store = MemoryStore::new();
        let identity = LocalIdentityProvider::failing(IdentityError::Rejected("nope".to_string()));
        let session = CounterSession::start(
            config().with_bootstrap_token("bad-token"),
            Rc::new(store.clone()),
            Rc::new(identity),
            Rc::new(pool.spawner()),
        );
        pool.run_until_stalled();

        assert!(session.gate().is_ready());
        assert_eq!(session.gate().identity(), None);
        assert!(!session.capabilities().elevated_view);
        assert_eq!(store.increment_calls(), 1);
    }

    #[test]
    fn test_teardown_releases_listeners() {
        let mut pool = LocalPool::new();
        let store = MemoryStore::new();
        let identity = LocalIdentityProvider::new();
        let session = CounterSession::start(
            config(),
            Rc::new(store.clone()),
            Rc::new(identity.clone()),
            Rc::new(pool.spawner()),
        );
        pool.run_until_stalled();
        assert_eq!(store.watcher_count(), 1);
        assert_eq!(identity.listener_count(), 1);

        session.teardown();
        assert_eq!(store.watcher_count(), 0);
        assert_eq!(identity.listener_count(), 0);
    }

    #[test]
    fn test_teardown_before_bootstrap_runs() {
        let mut pool = LocalPool::new();
        let store = MemoryStore::new();
        let identity = LocalIdentityProvider::new();
        let session = CounterSession::start(
            config(),
            Rc::new(store.clone()),
            Rc::new(identity.clone()),
            Rc::new(pool.spawner()),
        );

        session.teardown();
        pool.run_until_stalled();

        assert_eq!(identity.listener_count(), 0);
        assert_eq!(store.watcher_count(), 0);
        assert!(session.gate().is_ready());
        // torn down before readiness, so the view never counted
        assert_eq!(store.increment_calls(), 0);
    }
}
