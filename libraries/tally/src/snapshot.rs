use serde_json::{Map, Value};

use crate::path::DocumentPath;

/// The field holding the shared view count.
pub const COUNT_FIELD: &str = "count";

/// The full state of one document at one moment, as pushed by the store.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentSnapshot {
    path: DocumentPath,
    fields: Option<Map<String, Value>>,
}

impl DocumentSnapshot {
    pub fn missing(path: DocumentPath) -> Self {
        Self { path, fields: None }
    }

    pub fn existing(path: DocumentPath, fields: Map<String, Value>) -> Self {
        Self {
            path,
            fields: Some(fields),
        }
    }

    pub fn path(&self) -> &DocumentPath {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.fields.is_some()
    }

    pub fn fields(&self) -> Option<&Map<String, Value>> {
        self.fields.as_ref()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.as_ref()?.get(field)
    }

    /// The view count this snapshot represents.
    ///
    /// A missing document counts as zero, and so does a `count` field that is absent or isn't a non-negative integer.
    pub fn count(&self) -> u64 {
        if !self.exists() {
            return 0;
        }
        self.get(COUNT_FIELD).and_then(as_count).unwrap_or(0)
    }
}

pub(crate) fn as_count(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    // JS clients write every number as a double
    let f = value.as_f64()?;
    (f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64).then_some(f as u64)
}
