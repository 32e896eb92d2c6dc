use std::fmt;

use crate::error::ConfigError;

/// A slash-separated key that names a single document, e.g. `artifacts/my-app/public/data/analytics/page_views`.
///
/// Segments alternate collection / document, so a valid document path always has an even number of segments.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentPath {
    segments: Vec<String>,
}

impl DocumentPath {
    pub fn from_segments<S: Into<String>>(
        segments: impl IntoIterator<Item = S>,
    ) -> Result<Self, ConfigError> {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();

        if let Some(bad) = segments
            .iter()
            .find(|segment| segment.is_empty() || segment.contains('/'))
        {
            return Err(ConfigError::InvalidSegment(bad.clone()));
        }
        if segments.is_empty() || segments.len() % 2 != 0 {
            return Err(ConfigError::NotADocument(segments.join("/")));
        }

        Ok(Self { segments })
    }

    pub fn parse(path: &str) -> Result<Self, ConfigError> {
        Self::from_segments(path.trim_matches('/').split('/'))
    }

    /// The shared analytics counter for one application.
    pub fn counter(namespace: &str, app_id: &str, counter_name: &str) -> Result<Self, ConfigError> {
        Self::from_segments([
            namespace,
            app_id,
            "public",
            "data",
            "analytics",
            counter_name,
        ])
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn document_id(&self) -> &str {
        // Note: `from_segments` guarantees at least two segments
        &self.segments[self.segments.len() - 1]
    }

    pub fn collection(&self) -> String {
        self.segments[..self.segments.len() - 1].join("/")
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl TryFrom<String> for DocumentPath {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DocumentPath> for String {
    fn from(path: DocumentPath) -> Self {
        path.to_string()
    }
}
