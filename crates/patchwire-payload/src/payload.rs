use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::PayloadError;
use crate::path::{Path, PathKey};

/// Source location attached to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

/// Error entry as carried in a result's `errors` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<Location>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: None,
            path: None,
            name: None,
            extensions: None,
        }
    }
}

/// A complete result, or the first payload of an incremental one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
    /// Present on the first payload of an incremental result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_next: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl ExecutionResult {
    pub fn from_data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn from_errors(errors: Vec<GraphQLError>) -> Self {
        Self {
            errors,
            ..Self::default()
        }
    }
}

/// A later payload filling in the node at `path`.
///
/// Deferred fragments carry `data` to merge into the node; streamed list
/// items carry either `data` (one item at the index in `path`) or `items`
/// (consecutive items starting at that index).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    pub path: Path,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub has_next: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl Patch {
    pub fn new(path: Path, data: Value, has_next: bool) -> Self {
        Self {
            path,
            data: Some(data),
            items: None,
            errors: Vec::new(),
            label: None,
            has_next,
            extensions: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// One payload of a result, as received on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Initial(ExecutionResult),
    Patch(Patch),
}

impl Payload {
    /// Classify a decoded JSON body.
    ///
    /// An object whose `path` member is an array is a patch; any other
    /// object is an initial (or complete) result.
    pub fn from_value(value: Value) -> Result<Self, PayloadError> {
        let kind = json_kind(&value);
        let Value::Object(map) = &value else {
            return Err(PayloadError::NotAnObject(kind));
        };
        if map.get("path").is_some_and(Value::is_array) {
            Ok(Payload::Patch(serde_json::from_value(value)?))
        } else {
            Ok(Payload::Initial(serde_json::from_value(value)?))
        }
    }

    /// The node this payload addresses; the root for initial results.
    pub fn path(&self) -> &Path {
        match self {
            Payload::Initial(_) => Path::root_ref(),
            Payload::Patch(patch) => &patch.path,
        }
    }

    pub fn path_key(&self) -> PathKey {
        self.path().key()
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            Payload::Initial(result) => result.data.as_ref(),
            Payload::Patch(patch) => patch.data.as_ref(),
        }
    }

    pub fn errors(&self) -> &[GraphQLError] {
        match self {
            Payload::Initial(result) => &result.errors,
            Payload::Patch(patch) => &patch.errors,
        }
    }

    /// Whether more payloads follow this one.
    pub fn has_next(&self) -> bool {
        match self {
            Payload::Initial(result) => result.has_next.unwrap_or(false),
            Payload::Patch(patch) => patch.has_next,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Payload::Initial(_) => None,
            Payload::Patch(patch) => patch.label.as_deref(),
        }
    }

    pub fn is_patch(&self) -> bool {
        matches!(self, Payload::Patch(_))
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Payload::from_value(value).map_err(serde::de::Error::custom)
    }
}

impl From<ExecutionResult> for Payload {
    fn from(result: ExecutionResult) -> Self {
        Payload::Initial(result)
    }
}

impl From<Patch> for Payload {
    fn from(patch: Patch) -> Self {
        Payload::Patch(patch)
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
