//! Identity provider backed by the Identity Toolkit REST API.
//!
//! ID tokens last an hour. [`FirebaseAuth::id_token`] exchanges the refresh token through the Secure Token API
//! shortly before that, so long-lived sessions keep authenticating.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt as _;
use futures::future::LocalBoxFuture;
use serde_json::json;

use crate::config::StoreConfig;
use crate::error::{ConfigError, IdentityError};
use crate::identity::{IdentityListener, IdentityProvider, SessionIdentity};
use crate::listeners::Listeners;
use crate::store::Subscription;

pub const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";
pub const SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1";

/// How long before expiry a token is already treated as expired.
const REFRESH_MARGIN: TimeDelta = TimeDelta::seconds(60);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthSession {
    pub identity: SessionIdentity,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct FirebaseAuth {
    inner: Rc<AuthInner>,
}

struct AuthInner {
    client: reqwest::Client,
    endpoint: String,
    secure_token_endpoint: String,
    api_key: String,
    session: RefCell<Option<AuthSession>>,
    listeners: Listeners<Option<SessionIdentity>>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
    #[serde(default)]
    local_id: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorBody {
    message: String,
}

impl FirebaseAuth {
    pub fn new(config: &StoreConfig) -> Result<Self, ConfigError> {
        Self::with_endpoint(config, IDENTITY_TOOLKIT_URL)
    }

    /// Point at a different Identity Toolkit endpoint. Token refreshes still go to [`SECURE_TOKEN_URL`].
    pub fn with_endpoint(config: &StoreConfig, endpoint: impl Into<String>) -> Result<Self, ConfigError> {
        Self::with_endpoints(config, endpoint, SECURE_TOKEN_URL)
    }

    /// The auth emulator serves both APIs, e.g. `http://localhost:9099/identitytoolkit.googleapis.com/v1` and
    /// `http://localhost:9099/securetoken.googleapis.com/v1`.
    pub fn with_endpoints(
        config: &StoreConfig,
        endpoint: impl Into<String>,
        secure_token_endpoint: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            inner: Rc::new(AuthInner {
                client: reqwest::Client::new(),
                endpoint: endpoint.into().trim_end_matches('/').to_string(),
                secure_token_endpoint: secure_token_endpoint.into().trim_end_matches('/').to_string(),
                api_key: config.access_key()?.to_string(),
                session: RefCell::new(None),
                listeners: Listeners::default(),
            }),
        })
    }

    pub fn session(&self) -> Option<AuthSession> {
        self.inner.session.borrow().clone()
    }

    /// The bearer token for the current session, refreshed first if it is about to expire.
    ///
    /// `None` when signed out.
    pub async fn id_token(&self) -> Result<Option<String>, IdentityError> {
        let refresh_token = match self.inner.session.borrow().as_ref() {
            None => return Ok(None),
            Some(session) if session.refresh_token.is_empty() || !needs_refresh(Utc::now(), session.expires_at) => {
                return Ok(Some(session.id_token.clone()));
            }
            Some(session) => session.refresh_token.clone(),
        };
        self.inner.refresh(&refresh_token).await.map(Some)
    }
}

impl AuthInner {
    fn url(&self, method: &str) -> String {
        format!("{}/accounts:{method}?key={}", self.endpoint, self.api_key)
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, IdentityError> {
        Self::send(self.client.post(self.url(method)).json(&body)).await
    }

    async fn send<T: serde::de::DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, IdentityError> {
        let response = request
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|envelope| envelope.error.message)
                .unwrap_or_else(|_| format!("status {status}"));
            return Err(IdentityError::Rejected(message));
        }

        serde_json::from_str(&text)
            .map_err(|e| IdentityError::Malformed(format!("{e} in `{text}`")))
    }

    fn establish(&self, uid: String, anonymous: bool, response: SignInResponse) -> SessionIdentity {
        let identity = SessionIdentity::new(uid, anonymous);
        let session = AuthSession {
            identity: identity.clone(),
            expires_at: expires_at(Utc::now(), response.expires_in.as_deref()),
            id_token: response.id_token,
            refresh_token: response.refresh_token,
        };
        *self.session.borrow_mut() = Some(session);
        self.listeners.notify(&Some(identity.clone()));
        identity
    }

    async fn refresh(&self, refresh_token: &str) -> Result<String, IdentityError> {
        let request = self
            .client
            .post(format!("{}/token?key={}", self.secure_token_endpoint, self.api_key))
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)]);
        let response: RefreshResponse = Self::send(request)
            .await
            .inspect_err(|e| log::warn!("Token refresh failed: {e}"))?;

        let mut session = self.session.borrow_mut();
        // the session may have been signed out or replaced while the refresh was in flight
        if let Some(current) = session.as_mut().filter(|current| current.refresh_token == refresh_token) {
            current.id_token = response.id_token.clone();
            current.refresh_token = response.refresh_token;
            current.expires_at = expires_at(Utc::now(), response.expires_in.as_deref());
            log::debug!("Refreshed token for {}, valid until {}", current.identity.uid(), current.expires_at);
        }
        Ok(response.id_token)
    }
}

fn needs_refresh(now: DateTime<Utc>, expires_at: DateTime<Utc>) -> bool {
    now + REFRESH_MARGIN >= expires_at
}

fn expires_at(now: DateTime<Utc>, expires_in: Option<&str>) -> DateTime<Utc> {
    let seconds = expires_in
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(3600)
        .clamp(0, 86_400);
    now + TimeDelta::seconds(seconds)
}

impl IdentityProvider for FirebaseAuth {
    fn sign_in_with_token(&self, token: &str) -> LocalBoxFuture<'static, Result<SessionIdentity, IdentityError>> {
        let inner = self.inner.clone();
        let token = token.to_string();
        async move {
            let response: SignInResponse = inner
                .post(
                    "signInWithCustomToken",
                    json!({ "token": token, "returnSecureToken": true }),
                )
                .await?;

            // the custom-token exchange doesn't return the uid, so ask for it
            let lookup: LookupResponse = inner
                .post("lookup", json!({ "idToken": response.id_token }))
                .await?;
            let uid = lookup
                .users
                .into_iter()
                .next()
                .map(|user| user.local_id)
                .ok_or_else(|| IdentityError::Malformed("lookup returned no users".to_string()))?;

            Ok(inner.establish(uid, false, response))
        }
        .boxed_local()
    }

    fn sign_in_anonymously(&self) -> LocalBoxFuture<'static, Result<SessionIdentity, IdentityError>> {
        let inner = self.inner.clone();
        async move {
            let response: SignInResponse = inner
                .post("signUp", json!({ "returnSecureToken": true }))
                .await?;
            let uid = response
                .local_id
                .clone()
                .ok_or_else(|| IdentityError::Malformed("signUp response without localId".to_string()))?;
            Ok(inner.establish(uid, true, response))
        }
        .boxed_local()
    }

    fn sign_out(&self) {
        let previous = self.inner.session.borrow_mut().take();
        if let Some(previous) = previous {
            log::info!("Signed out {}", previous.identity.uid());
            self.inner.listeners.notify(&None);
        }
    }

    fn current(&self) -> Option<SessionIdentity> {
        self.inner
            .session
            .borrow()
            .as_ref()
            .map(|session| session.identity.clone())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::TestServer;

    fn config() -> StoreConfig {
        StoreConfig {
            api_key: Some("k-1".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_requires_access_key() {
        assert!(matches!(
            FirebaseAuth::new(&StoreConfig::default()),
            Err(ConfigError::MissingField("apiKey"))
        ));
    }

    #[test]
    fn test_urls() {
        let auth = FirebaseAuth::with_endpoint(&config(), "http://localhost:9099/identitytoolkit.googleapis.com/v1/")
            .unwrap();
        assert_eq!(
            auth.inner.url("signUp"),
            "http://localhost:9099/identitytoolkit.googleapis.com/v1/accounts:signUp?key=k-1"
        );
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        assert_eq!(expires_at(now, Some("3600")), now + TimeDelta::seconds(3600));
        assert_eq!(expires_at(now, None), now + TimeDelta::seconds(3600));
        assert_eq!(expires_at(now, Some("soon")), now + TimeDelta::seconds(3600));
        assert_eq!(expires_at(now, Some("-5")), now);
    }

    #[test]
    fn test_establish_and_sign_out() {
        let auth = FirebaseAuth::new(&config()).unwrap();
        let changes = Rc::new(RefCell::new(Vec::new()));
        let _subscription = auth.on_change(Box::new({
            let changes = changes.clone();
            move |identity: Option<SessionIdentity>| changes.borrow_mut().push(identity.is_some())
        }));

        let identity = auth.inner.establish(
            "uid-1".to_string(),
            true,
            SignInResponse {
                id_token: "id-token".to_string(),
                refresh_token: "refresh".to_string(),
                expires_in: Some("3600".to_string()),
                local_id: Some("uid-1".to_string()),
            },
        );
        assert_eq!(identity.uid(), "uid-1");
        assert_eq!(auth.current(), Some(identity));
        assert_eq!(auth.session().unwrap().id_token, "id-token");

        auth.sign_out();
        assert_eq!(auth.current(), None);
        assert_eq!(auth.session(), None);
        assert_eq!(*changes.borrow(), vec![true, false]);
    }

    fn sign_in(auth: &FirebaseAuth, expires_in: &str) {
        auth.inner.establish(
            "uid-1".to_string(),
            false,
            SignInResponse {
                id_token: "stale".to_string(),
                refresh_token: "refresh-1".to_string(),
                expires_in: Some(expires_in.to_string()),
                local_id: None,
            },
        );
    }

    #[test]
    fn test_needs_refresh() {
        let now = Utc::now();
        assert!(!needs_refresh(now, now + TimeDelta::seconds(3600)));
        assert!(needs_refresh(now, now + TimeDelta::seconds(30)));
        assert!(needs_refresh(now, now - TimeDelta::seconds(1)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_fresh_token_is_not_refreshed() {
        let server = TestServer::start(Vec::new()).await;
        let auth = FirebaseAuth::with_endpoints(&config(), &server.url, &server.url).unwrap();

        assert_eq!(auth.id_token().await, Ok(None));
        sign_in(&auth, "3600");
        assert_eq!(auth.id_token().await, Ok(Some("stale".to_string())));
        assert!(server.requests().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_expired_token_is_refreshed() {
        let server = TestServer::start(vec![(
            200,
            json!({
                "id_token": "fresh",
                "refresh_token": "refresh-2",
                "expires_in": "3600",
                "token_type": "Bearer",
                "user_id": "uid-1",
            })
            .to_string(),
        )])
        .await;
        let auth = FirebaseAuth::with_endpoints(&config(), &server.url, &server.url).unwrap();
        sign_in(&auth, "0");

        assert_eq!(auth.id_token().await, Ok(Some("fresh".to_string())));
        let session = auth.session().unwrap();
        assert_eq!(session.refresh_token, "refresh-2");
        assert!(!needs_refresh(Utc::now(), session.expires_at));

        // now valid for an hour, so no second exchange
        assert_eq!(auth.id_token().await, Ok(Some("fresh".to_string())));
        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("POST /token?key=k-1 "));
        assert!(requests[0].contains("grant_type=refresh_token&refresh_token=refresh-1"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_rejected_refresh() {
        let server = TestServer::start(vec![(
            400,
            json!({ "error": { "message": "TOKEN_EXPIRED" } }).to_string(),
        )])
        .await;
        let auth = FirebaseAuth::with_endpoints(&config(), &server.url, &server.url).unwrap();
        sign_in(&auth, "0");

        assert_eq!(
            auth.id_token().await,
            Err(IdentityError::Rejected("TOKEN_EXPIRED".to_string()))
        );
        assert_eq!(auth.session().unwrap().refresh_token, "refresh-1");
    }
}
