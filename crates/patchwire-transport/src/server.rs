//! Server-side pieces of the protocol: request parsing, the error taxonomy,
//! and incremental response framing.
//!
//! These are framework-agnostic; an HTTP server maps [`RequestError::status`]
//! and [`IncrementalResponse`] onto its own response type.

use bytes::Bytes;
use futures_core::Stream;
use patchwire_frame::{encode_stream, multipart_content_type};
use patchwire_payload::GraphQLError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::request::OperationRequest;

/// Body of an error response: `{"errors": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub errors: Vec<GraphQLError>,
}

/// Why a server could not produce a result for a request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    /// The body was not `{query: string, variables?: object}`.
    #[error("malformed request: {0}")]
    RequestShape(String),

    /// The query text does not parse.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// The query parses but fails validation.
    #[error("validation failed with {} error(s)", .0.len())]
    Validation(Vec<GraphQLError>),

    /// Execution failed before any result could be sent.
    #[error("execution failed: {0}")]
    Execution(String),
}

impl RequestError {
    /// HTTP status for this error. Client mistakes are 400, everything else 500.
    pub fn status(&self) -> u16 {
        match self {
            RequestError::RequestShape(_) | RequestError::Syntax(_) | RequestError::Validation(_) => 400,
            RequestError::Execution(_) => 500,
        }
    }

    /// Response body for this error.
    ///
    /// Execution failures are reported with a generic message; the detail is
    /// logged instead of sent.
    pub fn body(&self) -> ErrorBody {
        let errors = match self {
            RequestError::RequestShape(message) | RequestError::Syntax(message) => {
                vec![GraphQLError::new(message.clone())]
            }
            RequestError::Validation(errors) => errors.clone(),
            RequestError::Execution(detail) => {
                warn!(%detail, "execution failed");
                vec![GraphQLError::new("internal server error")]
            }
        };
        ErrorBody { errors }
    }
}

/// Parse and shape-check a request body.
pub fn parse_request_body(body: &[u8]) -> Result<OperationRequest, RequestError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|err| RequestError::RequestShape(format!("body is not JSON: {err}")))?;
    let Value::Object(mut fields) = value else {
        return Err(RequestError::RequestShape("body must be a JSON object".into()));
    };

    let query = match fields.remove("query") {
        Some(Value::String(query)) => query,
        Some(_) => return Err(RequestError::RequestShape("query must be a string".into())),
        None => return Err(RequestError::RequestShape("missing query".into())),
    };
    let variables = match fields.remove("variables") {
        None | Some(Value::Null) => None,
        Some(variables @ Value::Object(_)) => Some(variables),
        Some(_) => {
            return Err(RequestError::RequestShape(
                "variables must be an object".into(),
            ))
        }
    };
    let operation_name = match fields.remove("operationName") {
        None | Some(Value::Null) => None,
        Some(Value::String(name)) => Some(name),
        Some(_) => {
            return Err(RequestError::RequestShape(
                "operationName must be a string".into(),
            ))
        }
    };

    Ok(OperationRequest {
        query,
        variables,
        operation_name,
    })
}

/// A framed incremental response ready to hand to an HTTP server.
pub struct IncrementalResponse<S> {
    /// Value for the `Content-Type` header.
    pub content_type: String,
    /// Body chunks, one per payload plus the closing delimiter.
    pub body: S,
}

/// Status for an incremental response; errors inside the stream travel as
/// payload `errors`, never as a status change.
pub const INCREMENTAL_STATUS: u16 = 200;

/// Frame `payloads` as a `multipart/mixed` response using `boundary`.
pub fn incremental_response<S, T>(
    payloads: S,
    boundary: &str,
) -> patchwire_frame::Result<IncrementalResponse<impl Stream<Item = patchwire_frame::Result<Bytes>> + Send>>
where
    S: Stream<Item = T> + Send,
    T: Serialize + Send,
{
    let body = encode_stream(payloads, boundary)?;
    Ok(IncrementalResponse {
        content_type: multipart_content_type(boundary),
        body,
    })
}

#[cfg(test)]
mod tests {
    use futures_util::{stream, StreamExt};
    use patchwire_frame::{decode_all, PartBody};
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_well_formed_body() {
        let request =
            parse_request_body(br#"{"query": "{ a }", "variables": {"n": 1}, "operationName": null}"#).unwrap();
        assert_eq!(request.query, "{ a }");
        assert_eq!(request.variables, Some(json!({"n": 1})));
        assert_eq!(request.operation_name, None);
    }

    #[test]
    fn rejects_bad_shapes() {
        for body in [
            &b"not json"[..],
            br#"[1]"#,
            br#"{"variables": {}}"#,
            br#"{"query": 5}"#,
            br#"{"query": "{ a }", "variables": [1]}"#,
        ] {
            let err = parse_request_body(body).unwrap_err();
            assert!(matches!(err, RequestError::RequestShape(_)), "{err}");
            assert_eq!(err.status(), 400);
        }
    }

    #[test]
    fn statuses_and_bodies() {
        assert_eq!(RequestError::Syntax("x".into()).status(), 400);
        let validation = RequestError::Validation(vec![GraphQLError::new("unknown field")]);
        assert_eq!(validation.status(), 400);
        assert_eq!(validation.body().errors[0].message, "unknown field");

        let execution = RequestError::Execution("db password wrong".into());
        assert_eq!(execution.status(), 500);
        assert_eq!(execution.body().errors[0].message, "internal server error");
    }

    #[tokio::test]
    async fn incremental_response_frames_payloads() {
        let payloads = stream::iter(vec![
            json!({"data": {"a": {}}, "hasNext": true}),
            json!({"path": ["a"], "data": {"b": 1}, "hasNext": false}),
        ]);
        let response = incremental_response(payloads, "-").unwrap();
        assert!(response.content_type.starts_with("multipart/mixed"));

        let chunks: Vec<_> = response.body.collect().await;
        assert_eq!(chunks.len(), 3);
        let body: Vec<u8> = chunks
            .into_iter()
            .flat_map(|chunk| chunk.unwrap().to_vec())
            .collect();
        let parts = decode_all(&body, "-").unwrap();
        assert_eq!(parts.len(), 2);
        assert!(matches!(&parts[1].body, PartBody::Json(v) if v["hasNext"] == json!(false)));
    }
}
