//! Document store backed by the Firestore REST API.
//!
//! The increment is a single `documents:commit` carrying a field transform, so the addition happens on the
//! server and concurrent viewers can't lose each other's updates. A transform-only write also creates the
//! document when it is missing.
//!
//! REST has no push channel, so subscriptions poll. The first fetch is delivered as soon as it completes;
//! after that only changed snapshots are delivered, and an outage is reported once rather than on every poll.

use std::rc::Rc;
use std::time::Duration;

use futures::FutureExt as _;
use futures::channel::oneshot;
use futures::future::LocalBoxFuture;
use futures::task::{LocalSpawn, LocalSpawnExt as _};
use reqwest::StatusCode;
use serde_json::{Map, Value, json};

use crate::config::StoreConfig;
use crate::error::{ConfigError, StoreError};
use crate::firebase_auth::FirebaseAuth;
use crate::path::DocumentPath;
use crate::snapshot::DocumentSnapshot;
use crate::store::{DocumentStore, SnapshotListener, Subscription};

pub const FIRESTORE_URL: &str = "https://firestore.googleapis.com/v1";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct FirestoreStore {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    project_id: String,
    database_id: String,
    auth: Option<FirebaseAuth>,
    spawner: Rc<dyn LocalSpawn>,
    poll_interval: Duration,
}

#[derive(Debug, serde::Deserialize)]
struct FirestoreDocument {
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorBody {
    message: String,
}

impl FirestoreStore {
    /// `spawner` runs the polling loops behind subscriptions. They wait on tokio timers, so it has to spawn onto
    /// a tokio runtime, e.g. [`TokioLocalSpawner`](crate::spawn::TokioLocalSpawner) inside a `LocalSet`; tokio
    /// panics otherwise.
    pub fn new(config: &StoreConfig, spawner: Rc<dyn LocalSpawn>) -> Result<Self, ConfigError> {
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: FIRESTORE_URL.to_string(),
            api_key: config.access_key()?.to_string(),
            project_id: config.project_id()?.to_string(),
            database_id: config.database_id().to_string(),
            auth: None,
            spawner,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Send the signed-in user's bearer token with every request, refreshing it when it expires.
    pub fn with_auth(mut self, auth: FirebaseAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    fn database_root(&self) -> String {
        format!("projects/{}/databases/{}", self.project_id, self.database_id)
    }

    fn document_name(&self, path: &DocumentPath) -> String {
        format!("{}/documents/{path}", self.database_root())
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .query(&[("key", self.api_key.as_str())])
    }

    fn fetch(&self, path: &DocumentPath) -> LocalBoxFuture<'static, Result<DocumentSnapshot, StoreError>> {
        let request = self.request(
            reqwest::Method::GET,
            format!("{}/{}", self.endpoint, self.document_name(path)),
        );
        let auth = self.auth.clone();
        let path = path.clone();
        async move {
            let response = authorize(request, auth.as_ref())
                .await?
                .send()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;

            match response.status() {
                StatusCode::NOT_FOUND => Ok(DocumentSnapshot::missing(path)),
                status if status.is_success() => {
                    let document: FirestoreDocument = response
                        .json()
                        .await
                        .map_err(|e| StoreError::Malformed(e.to_string()))?;
                    Ok(DocumentSnapshot::existing(path, decode_fields(&document.fields)))
                }
                _ => Err(error_from(response).await),
            }
        }
        .boxed_local()
    }
}

async fn authorize(
    request: reqwest::RequestBuilder,
    auth: Option<&FirebaseAuth>,
) -> Result<reqwest::RequestBuilder, StoreError> {
    let Some(auth) = auth else {
        return Ok(request);
    };
    match auth.id_token().await {
        Ok(Some(token)) => Ok(request.bearer_auth(token)),
        Ok(None) => Ok(request),
        Err(e) => Err(StoreError::PermissionDenied(format!("session could not be refreshed: {e}"))),
    }
}

async fn error_from(response: reqwest::Response) -> StoreError {
    let status = response.status();
    let message = response
        .text()
        .await
        .ok()
        .and_then(|body| serde_json::from_str::<ErrorEnvelope>(&body).ok())
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|| status.to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::PermissionDenied(message),
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => StoreError::Unavailable(message),
        _ => StoreError::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}

/// The `documents:commit` body for a server-side increment.
fn increment_request(document_name: &str, field: &str, delta: u64) -> Value {
    json!({
        "writes": [{
            "transform": {
                "document": document_name,
                "fieldTransforms": [{
                    "fieldPath": quote_field_path(field),
                    "increment": { "integerValue": delta.to_string() },
                }],
            },
        }],
    })
}

/// Field names that aren't plain identifiers have to be backquoted.
fn quote_field_path(field: &str) -> String {
    let simple = field
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        field.to_string()
    } else {
        format!("`{}`", field.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

fn decode_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(name, value)| (name.clone(), decode_value(value)))
        .collect()
}

/// Firestore wraps every value in a one-key object naming its type, e.g. `{"integerValue": "42"}`.
fn decode_value(value: &Value) -> Value {
    let Some((kind, inner)) = value.as_object().and_then(|object| object.iter().next()) else {
        return Value::Null;
    };
    match kind.as_str() {
        // 64-bit integers travel as strings
        "integerValue" => inner
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .or_else(|| inner.as_i64())
            .map(Value::from)
            .unwrap_or(Value::Null),
        "doubleValue" if inner.is_number() => inner.clone(),
        "booleanValue" | "stringValue" | "timestampValue" | "referenceValue" | "bytesValue"
        | "geoPointValue" => inner.clone(),
        "mapValue" => Value::Object(
            inner
                .get("fields")
                .and_then(Value::as_object)
                .map(decode_fields)
                .unwrap_or_default(),
        ),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        _ => Value::Null,
    }
}

fn released(cancel: &mut oneshot::Receiver<()>) -> bool {
    !matches!(cancel.try_recv(), Ok(None))
}

impl DocumentStore for FirestoreStore {
    fn increment(
        &self,
        path: &DocumentPath,
        field: &str,
        delta: u64,
    ) -> LocalBoxFuture<'static, Result<(), StoreError>> {
        let body = increment_request(&self.document_name(path), field, delta);
        let request = self
            .request(
                reqwest::Method::POST,
                format!("{}/{}/documents:commit", self.endpoint, self.database_root()),
            )
            .json(&body);
        let auth = self.auth.clone();
        async move {
            let response = authorize(request, auth.as_ref())
                .await?
                .send()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(error_from(response).await)
            }
        }
        .boxed_local()
    }

    fn get(&self, path: &DocumentPath) -> LocalBoxFuture<'static, Result<DocumentSnapshot, StoreError>> {
        self.fetch(path)
    }

    fn subscribe(&self, path: &DocumentPath, mut listener: SnapshotListener) -> Subscription {
        let (release, mut cancel) = oneshot::channel::<()>();
        let store = self.clone();
        let path = path.clone();

        let poll = async move {
            let mut last: Option<DocumentSnapshot> = None;
            let mut failing = false;
            loop {
                let update = store.fetch(&path).await;
                if released(&mut cancel) {
                    break;
                }
                match update {
                    Ok(snapshot) => {
                        failing = false;
                        if last.as_ref() != Some(&snapshot) {
                            last = Some(snapshot.clone());
                            listener(Ok(snapshot));
                        }
                    }
                    Err(e) => {
                        if !failing {
                            listener(Err(e));
                        }
                        failing = true;
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(store.poll_interval) => {}
                    _ = &mut cancel => break,
                }
            }
            log::debug!("Stopped polling {path}");
        };

        if let Err(e) = self.spawner.spawn_local(poll) {
            log::error!("Could not start polling: {e}");
        }

        Subscription::new(move || {
            let _ = release.send(());
        })
    }
}
