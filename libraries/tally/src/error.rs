/// The store configuration can't be used. Fatal to the counter only; the rest of the page keeps working.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("store config is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("store config is not valid JSON: {0}")]
    Malformed(String),
    #[error("invalid path segment {0:?}")]
    InvalidSegment(String),
    #[error("`{0}` does not name a document (odd number of segments)")]
    NotADocument(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("unexpected response from store: {0}")]
    Malformed(String),
    #[error("store rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("identity provider rejected the sign-in: {0}")]
    Rejected(String),
    #[error("identity provider unreachable: {0}")]
    Unavailable(String),
    #[error("unexpected response from identity provider: {0}")]
    Malformed(String),
}
