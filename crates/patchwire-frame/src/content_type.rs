//! Content-type negotiation for incremental responses.
//!
//! A server answers either with a single `application/json` document or with
//! a `multipart/mixed` body whose `boundary` parameter names the delimiter.

/// Media type of a complete, non-incremental result.
pub const APPLICATION_JSON: &str = "application/json";

/// Media type of an incremental result.
pub const MULTIPART_MIXED: &str = "multipart/mixed";

/// `Accept` header value sent by clients that understand both shapes.
pub const ACCEPT_INCREMENTAL: &str = "application/json, multipart/mixed";

/// How a response body is framed, as declared by its `Content-Type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseKind {
    /// One JSON document.
    Json,
    /// A sequence of parts separated by `--<boundary>`.
    Multipart { boundary: String },
    /// Anything else, carrying the bare media type.
    Other(String),
}

/// Classify a `Content-Type` header value.
///
/// The boundary parameter may be quoted or bare, and may appear after other
/// parameters such as `charset`. A `multipart/mixed` value without a boundary
/// is reported as [`ResponseKind::Other`].
pub fn parse_content_type(value: &str) -> ResponseKind {
    let mut params = value.split(';');
    let media_type = params
        .next()
        .map(|m| m.trim().to_ascii_lowercase())
        .unwrap_or_default();

    if media_type == MULTIPART_MIXED {
        let boundary = params.find_map(|param| {
            let (name, value) = param.split_once('=')?;
            if !name.trim().eq_ignore_ascii_case("boundary") {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            (!value.is_empty()).then(|| value.to_string())
        });
        return match boundary {
            Some(boundary) => ResponseKind::Multipart { boundary },
            None => ResponseKind::Other(media_type),
        };
    }

    if media_type == APPLICATION_JSON || media_type.ends_with("+json") {
        return ResponseKind::Json;
    }

    ResponseKind::Other(media_type)
}

/// Build the `Content-Type` header value for an incremental response.
pub fn multipart_content_type(boundary: &str) -> String {
    format!("{MULTIPART_MIXED}; charset=UTF-8; boundary=\"{boundary}\"")
}
