use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An operation to execute: query text plus variables.
///
/// Serializes to the HTTP request body `{query, variables?, operationName?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
}

impl OperationRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: None,
            operation_name: None,
        }
    }

    /// Attach variables. `null` is treated as no variables.
    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = (!variables.is_null()).then_some(variables);
        self
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }
}
