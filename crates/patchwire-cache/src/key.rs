use std::fmt;

use patchwire_payload::Path;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Identity of an operation: a hex SHA-256 of the query text and its
/// canonically serialized variables.
///
/// Object keys are sorted before hashing, and `null` variables are the same
/// as no variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationKey(String);

impl OperationKey {
    pub fn new(query: &str, variables: Option<&Value>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        hasher.update([0u8]);
        if let Some(variables) = variables.filter(|v| !v.is_null()) {
            let mut canonical = String::new();
            write_canonical(variables, &mut canonical);
            hasher.update(canonical.as_bytes());
        }
        let digest = hasher.finalize();

        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First twelve hex digits, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<_> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (name, field)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(name.clone()).to_string());
                out.push(':');
                write_canonical(field, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// A sub-path of an operation's result, as named by a fragment read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FragmentRef {
    pub operation: OperationKey,
    pub path: Path,
}

impl FragmentRef {
    pub fn new(operation: OperationKey, path: Path) -> Self {
        Self { operation, path }
    }
}
