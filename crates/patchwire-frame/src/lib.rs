//! `multipart/mixed` framing for incremental JSON payload delivery.
//!
//! An incremental response carries an ordered sequence of JSON payloads in
//! one HTTP body. Every payload is framed as a part:
//! - a `--<boundary>` delimiter line
//! - `Content-Type` and `Content-Length` headers
//! - the JSON body
//!
//! and the body ends with `--<boundary>--`. Decoding tolerates delimiters
//! split across reads, headerless parts, and non-JSON bodies.

pub mod codec;
pub mod content_type;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_all, DecoderConfig, MultipartCodec, Part, PartBody, CRLF, DEFAULT_BOUNDARY,
    DEFAULT_MAX_PART_SIZE, PART_CONTENT_TYPE,
};
pub use content_type::{
    multipart_content_type, parse_content_type, ResponseKind, ACCEPT_INCREMENTAL,
    APPLICATION_JSON, MULTIPART_MIXED,
};
pub use error::{FrameError, Result};
pub use reader::{
    decode_reader, decode_reader_with_config, decode_stream, decode_stream_with_config,
    PartReader, PartStream,
};
pub use writer::{encode_stream, MultipartWriter};
