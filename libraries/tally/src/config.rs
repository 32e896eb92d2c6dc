use crate::error::ConfigError;
use crate::path::DocumentPath;

pub const DEFAULT_APP_ID: &str = "default-app-id";
pub const DEFAULT_NAMESPACE: &str = "artifacts";
pub const DEFAULT_COUNTER_NAME: &str = "page_views";
pub const DEFAULT_DATABASE_ID: &str = "(default)";

/// Connection settings for the remote document store, as handed to the page by its host.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub auth_domain: Option<String>,
    #[serde(default)]
    pub database_id: Option<String>,
}

impl StoreConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))
    }

    /// The access key is the one field the counter can't start without.
    pub fn access_key(&self) -> Result<&str, ConfigError> {
        non_empty(self.api_key.as_deref()).ok_or(ConfigError::MissingField("apiKey"))
    }

    pub fn project_id(&self) -> Result<&str, ConfigError> {
        non_empty(self.project_id.as_deref()).ok_or(ConfigError::MissingField("projectId"))
    }

    pub fn database_id(&self) -> &str {
        non_empty(self.database_id.as_deref()).unwrap_or(DEFAULT_DATABASE_ID)
    }
}

/// Everything the counter subsystem needs, passed in at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CounterConfig {
    pub store: StoreConfig,
    pub app_id: Option<String>,
    pub bootstrap_token: Option<String>,
    pub namespace: String,
    pub counter_name: String,
}

impl CounterConfig {
    pub fn new(store: StoreConfig) -> Self {
        Self {
            store,
            app_id: None,
            bootstrap_token: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            counter_name: DEFAULT_COUNTER_NAME.to_string(),
        }
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub fn with_bootstrap_token(mut self, token: impl Into<String>) -> Self {
        self.bootstrap_token = Some(token.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_counter_name(mut self, counter_name: impl Into<String>) -> Self {
        self.counter_name = counter_name.into();
        self
    }

    pub fn app_id(&self) -> &str {
        non_empty(self.app_id.as_deref()).unwrap_or(DEFAULT_APP_ID)
    }

    pub fn bootstrap_token(&self) -> Option<&str> {
        non_empty(self.bootstrap_token.as_deref())
    }

    /// Checks the store config and resolves the counter document's path.
    pub fn counter_path(&self) -> Result<DocumentPath, ConfigError> {
        self.store.access_key()?;
        DocumentPath::counter(&self.namespace, self.app_id(), &self.counter_name)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
