//! The mock editor login.
//!
//! This is a UI affordance, not authentication: the credentials are compared against literals in this file and
//! the only effect of logging in is that a session identity exists.

use tally::{IdentityError, IdentityProvider, SessionIdentity};

const EDITOR_USERNAME: &str = "editor";
const EDITOR_PASSWORD: &str = "newsroom";

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LoginError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("could not start a session: {0}")]
    Identity(#[from] IdentityError),
}

pub struct EditorDesk;

impl EditorDesk {
    pub fn check(username: &str, password: &str) -> Result<(), LoginError> {
        if username.trim() == EDITOR_USERNAME && password == EDITOR_PASSWORD {
            Ok(())
        } else {
            Err(LoginError::InvalidCredentials)
        }
    }

    /// Reuses the current identity if there is one.
    pub async fn login(
        provider: &dyn IdentityProvider,
        username: &str,
        password: &str,
    ) -> Result<SessionIdentity, LoginError> {
        Self::check(username, password)?;
        if let Some(identity) = provider.current() {
            return Ok(identity);
        }
        Ok(provider.sign_in_anonymously().await?)
    }

    pub fn logout(provider: &dyn IdentityProvider) {
        provider.sign_out();
    }
}
