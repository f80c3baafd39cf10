use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::content_type::APPLICATION_JSON;
use crate::error::{FrameError, Result};

/// Line terminator used by the framing.
pub const CRLF: &[u8] = b"\r\n";

/// Blank line separating a part's header block from its body.
pub const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

/// Boundary token used when the caller does not choose one.
pub const DEFAULT_BOUNDARY: &str = "-";

/// `Content-Type` written on every encoded part.
pub const PART_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// Default maximum size of a single buffered part: 16 MiB.
pub const DEFAULT_MAX_PART_SIZE: usize = 16 * 1024 * 1024;

/// RFC 2046 caps boundaries at 70 characters.
const MAX_BOUNDARY_LEN: usize = 70;

/// Body of a decoded part.
#[derive(Debug, Clone, PartialEq)]
pub enum PartBody {
    /// The part declared `application/json` and parsed cleanly.
    Json(Value),
    /// Anything else, including JSON parts that failed to parse.
    Text(String),
}

impl PartBody {
    /// Borrow the JSON value, if this body parsed as JSON.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            PartBody::Json(value) => Some(value),
            PartBody::Text(_) => None,
        }
    }

    /// Take the JSON value, if this body parsed as JSON.
    pub fn into_json(self) -> Option<Value> {
        match self {
            PartBody::Json(value) => Some(value),
            PartBody::Text(_) => None,
        }
    }
}

impl Default for PartBody {
    fn default() -> Self {
        PartBody::Text(String::new())
    }
}

/// One part of a multipart stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Part {
    /// Header values keyed by lower-cased header name.
    pub headers: BTreeMap<String, String>,
    /// The part body.
    pub body: PartBody,
}

impl Part {
    /// Look up a header by name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The part's `Content-Type`, if present.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

/// Configuration for the multipart decoder.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Maximum bytes buffered for one part before failing. Default: 16 MiB.
    pub max_part_size: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_part_size: DEFAULT_MAX_PART_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Before the first delimiter; bytes here are discarded.
    Preamble,
    /// Just past a delimiter; a following `--` closes the stream.
    AfterDelimiter,
    /// Inside a part, scanning for the next delimiter.
    InPart,
    /// Closing delimiter seen; everything after is epilogue.
    Closed,
}

/// Codec for `multipart/mixed` streams of JSON payloads.
///
/// Decoding yields one [`Part`] per delimited segment. Encoding writes
/// each body as one part:
///
/// ```text
/// CRLF CRLF --<boundary> CRLF
/// Content-Type: application/json; charset=UTF-8 CRLF
/// Content-Length: <n> CRLF
/// CRLF
/// <body>
/// ```
///
/// and [`MultipartCodec::encode_close`] writes `CRLF --<boundary>-- CRLF`.
#[derive(Debug, Clone)]
pub struct MultipartCodec {
    boundary: String,
    marker: Vec<u8>,
    scan_from: usize,
    state: DecodeState,
    config: DecoderConfig,
    parts: usize,
}

impl MultipartCodec {
    /// Create a codec for `boundary` with default configuration.
    pub fn new(boundary: &str) -> Result<Self> {
        Self::with_config(boundary, DecoderConfig::default())
    }

    /// Create a codec for `boundary` with explicit configuration.
    pub fn with_config(boundary: &str, config: DecoderConfig) -> Result<Self> {
        validate_boundary(boundary)?;
        let mut marker = Vec::with_capacity(boundary.len() + 2);
        marker.extend_from_slice(b"--");
        marker.extend_from_slice(boundary.as_bytes());
        Ok(Self {
            boundary: boundary.to_string(),
            marker,
            scan_from: 0,
            state: DecodeState::Preamble,
            config,
            parts: 0,
        })
    }

    /// The boundary token this codec frames with.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Number of parts decoded so far.
    pub fn parts_decoded(&self) -> usize {
        self.parts
    }

    /// True once the closing delimiter has been decoded.
    pub fn is_closed(&self) -> bool {
        self.state == DecodeState::Closed
    }

    /// Current decoder configuration.
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Encode one raw body as a part.
    pub fn encode_body(&self, body: &[u8], dst: &mut BytesMut) -> Result<()> {
        if find(body, &self.marker, 0).is_some() {
            return Err(FrameError::BoundaryInBody);
        }
        let length = body.len().to_string();
        dst.reserve(
            HEADER_SEPARATOR.len()
                + self.marker.len()
                + PART_CONTENT_TYPE.len()
                + length.len()
                + body.len()
                + 48,
        );
        dst.put_slice(HEADER_SEPARATOR);
        dst.put_slice(&self.marker);
        dst.put_slice(CRLF);
        dst.put_slice(b"Content-Type: ");
        dst.put_slice(PART_CONTENT_TYPE.as_bytes());
        dst.put_slice(CRLF);
        dst.put_slice(b"Content-Length: ");
        dst.put_slice(length.as_bytes());
        dst.put_slice(HEADER_SEPARATOR);
        dst.put_slice(body);
        Ok(())
    }

    /// Serialize `payload` to JSON and encode it as a part.
    pub fn encode_json<T: Serialize + ?Sized>(&self, payload: &T, dst: &mut BytesMut) -> Result<()> {
        let body = serde_json::to_vec(payload)?;
        self.encode_body(&body, dst)
    }

    /// Write the closing delimiter `CRLF --<boundary>-- CRLF`.
    pub fn encode_close(&self, dst: &mut BytesMut) {
        dst.reserve(self.marker.len() + 6);
        dst.put_slice(CRLF);
        dst.put_slice(&self.marker);
        dst.put_slice(b"--");
        dst.put_slice(CRLF);
    }

    /// The closing delimiter as a standalone chunk.
    pub fn close_bytes(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.encode_close(&mut dst);
        dst.freeze()
    }
}

impl Decoder for MultipartCodec {
    type Item = Part;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Part>> {
        loop {
            match self.state {
                DecodeState::Closed => {
                    src.clear();
                    return Ok(None);
                }
                DecodeState::AfterDelimiter => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    if &src[..2] == b"--" {
                        tracing::trace!(parts = self.parts, "closing delimiter reached");
                        self.state = DecodeState::Closed;
                        continue;
                    }
                    self.state = DecodeState::InPart;
                }
                DecodeState::Preamble | DecodeState::InPart => {
                    let Some(idx) = find(src, &self.marker, self.scan_from) else {
                        if src.len() > self.config.max_part_size {
                            return Err(FrameError::PartTooLarge {
                                size: src.len(),
                                max: self.config.max_part_size,
                            });
                        }
                        // A marker split across reads starts inside the last
                        // `marker.len() - 1` bytes; everything before is settled.
                        self.scan_from = src.len().saturating_sub(self.marker.len() - 1);
                        return Ok(None);
                    };

                    let segment = src.split_to(idx);
                    src.advance(self.marker.len());
                    self.scan_from = 0;

                    let in_preamble = self.state == DecodeState::Preamble;
                    self.state = DecodeState::AfterDelimiter;
                    if in_preamble {
                        continue;
                    }

                    self.parts += 1;
                    tracing::trace!(part = self.parts, bytes = segment.len(), "part decoded");
                    return Ok(Some(parse_part(&segment)));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Part>> {
        if let Some(part) = self.decode(src)? {
            return Ok(Some(part));
        }

        let leftover = !src.iter().all(u8::is_ascii_whitespace);
        let buffered = src.len();
        let state = self.state;
        src.clear();
        match state {
            DecodeState::Preamble if leftover => Err(FrameError::BoundaryNotFound),
            DecodeState::InPart if leftover => Err(FrameError::Truncated { buffered }),
            _ => {
                self.state = DecodeState::Closed;
                Ok(None)
            }
        }
    }
}

impl Encoder<Bytes> for MultipartCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        self.encode_body(&item, dst)
    }
}

impl<'a> Encoder<&'a Value> for MultipartCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &'a Value, dst: &mut BytesMut) -> Result<()> {
        self.encode_json(item, dst)
    }
}

/// Decode a complete in-memory multipart body.
pub fn decode_all(body: &[u8], boundary: &str) -> Result<Vec<Part>> {
    let mut codec = MultipartCodec::new(boundary)?;
    let mut buf = BytesMut::from(body);
    let mut parts = Vec::new();
    while let Some(part) = codec.decode(&mut buf)? {
        parts.push(part);
    }
    while let Some(part) = codec.decode_eof(&mut buf)? {
        parts.push(part);
    }
    Ok(parts)
}

fn validate_boundary(boundary: &str) -> Result<()> {
    let reason = if boundary.is_empty() {
        Some("boundary must not be empty")
    } else if boundary.len() > MAX_BOUNDARY_LEN {
        Some("boundary longer than 70 characters")
    } else if !boundary.bytes().all(|b| b.is_ascii_graphic() || b == b' ') {
        Some("boundary must be printable ASCII")
    } else if boundary.ends_with(' ') {
        Some("boundary must not end with a space")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(FrameError::InvalidBoundary {
            boundary: boundary.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() || from > haystack.len() - needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

/// Split a delimited segment into headers and body.
fn parse_part(segment: &[u8]) -> Part {
    let segment = segment.strip_prefix(CRLF).unwrap_or(segment);

    let (head, body): (&[u8], &[u8]) = if let Some(rest) = segment.strip_prefix(CRLF) {
        (&[], rest)
    } else {
        match find(segment, HEADER_SEPARATOR, 0) {
            Some(idx) if looks_like_headers(&segment[..idx]) => {
                (&segment[..idx], &segment[idx + HEADER_SEPARATOR.len()..])
            }
            _ => (&[], segment),
        }
    };

    let mut headers = BTreeMap::new();
    for line in String::from_utf8_lossy(head).split("\r\n") {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let text = String::from_utf8_lossy(trim_line_terminators(body)).into_owned();
    let is_json = headers
        .get("content-type")
        .is_some_and(|ct| ct.to_ascii_lowercase().contains(APPLICATION_JSON));

    let body = if is_json {
        match serde_json::from_str(&text) {
            Ok(value) => PartBody::Json(value),
            Err(err) => {
                tracing::debug!(error = %err, bytes = text.len(), "keeping unparseable json part as text");
                PartBody::Text(text)
            }
        }
    } else {
        PartBody::Text(text)
    };

    Part { headers, body }
}

fn looks_like_headers(head: &[u8]) -> bool {
    String::from_utf8_lossy(head)
        .split("\r\n")
        .filter(|line| !line.trim().is_empty())
        .all(|line| match line.split_once(':') {
            Some((name, _)) => {
                !name.is_empty()
                    && name
                        .bytes()
                        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
            }
            None => false,
        })
}

fn trim_line_terminators(mut body: &[u8]) -> &[u8] {
    while let Some(rest) = body
        .strip_suffix(CRLF)
        .or_else(|| body.strip_suffix(b"\n"))
    {
        body = rest;
    }
    body
}
