mod display;
mod editor;

pub use display::CounterDisplay;
pub use editor::{EditorDesk, LoginError};

use std::rc::Rc;
use std::sync::LazyLock;

use futures::task::LocalSpawn;
use tally::{
    CounterConfig, CounterSession, DocumentStore, IdentityProvider, ListenerKey, SessionIdentity,
};

// putting this inside LOGGER prevents us from accidentally initializing the logger more than once
static LOGGER: LazyLock<()> = LazyLock::new(|| {
    if env_logger::try_init().is_ok() {
        log::info!("Logging initialized");
    }
});

/// Everything the news page renders that comes from the counter subsystem.
pub struct Newsroom {
    session: CounterSession,
}

impl Newsroom {
    pub fn new(
        config: CounterConfig,
        store: Rc<dyn DocumentStore>,
        identity: Rc<dyn IdentityProvider>,
        spawner: Rc<dyn LocalSpawn>,
    ) -> Self {
        LazyLock::force(&LOGGER);

        Self {
            session: CounterSession::start(config, store, identity, spawner),
        }
    }

    pub fn counter_display(&self) -> CounterDisplay {
        self.session.counter().mirror().into()
    }

    /// Shown next to the byline; display only.
    pub fn session_label(&self) -> Option<String> {
        self.session
            .gate()
            .identity()
            .map(|identity| identity.uid().to_string())
    }

    pub fn admin_panel_visible(&self) -> bool {
        self.session.capabilities().elevated_view
    }

    /// Re-render hook. Release the key with [`Newsroom::unsubscribe_counter`] when the view goes away.
    pub fn subscribe_counter(&self, mut callback: impl FnMut(CounterDisplay) + 'static) -> ListenerKey {
        self.session
            .counter()
            .subscribe(move |value| callback(value.into()))
    }

    pub fn unsubscribe_counter(&self, key: ListenerKey) {
        self.session.counter().unsubscribe(key);
    }

    pub fn subscribe_session(
        &self,
        mut callback: impl FnMut(Option<&SessionIdentity>) + 'static,
    ) -> ListenerKey {
        self.session
            .gate()
            .on_identity_change(move |identity| callback(identity.as_ref()))
    }

    pub fn unsubscribe_session(&self, key: ListenerKey) {
        self.session.gate().unsubscribe_identity(key);
    }

    pub async fn editor_login(&self, username: &str, password: &str) -> Result<(), LoginError> {
        let provider = self.session.identity_provider().clone();
        EditorDesk::login(provider.as_ref(), username, password)
            .await
            .inspect_err(|e| log::warn!("Editor login failed: {e}"))?;
        Ok(())
    }

    pub fn editor_logout(&self) {
        EditorDesk::logout(self.session.identity_provider().as_ref());
    }
}

impl Drop for Newsroom {
    fn drop(&mut self) {
        self.session.teardown();
    }
}
