use std::io;

use bytes::Bytes;
use futures_core::Stream;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;

use crate::codec::{DecoderConfig, MultipartCodec};
use crate::error::Result;

/// Lazy, ordered sequence of parts decoded from an async byte source.
///
/// Yields `Result<Part, FrameError>`. The source is owned by the reader and
/// released when the reader is dropped, whether the sequence was drained,
/// abandoned early, or ended with an error.
pub type PartReader<R> = FramedRead<R, MultipartCodec>;

/// [`PartReader`] over a stream of body chunks.
pub type PartStream<S> = PartReader<StreamReader<S, Bytes>>;

/// Decode parts from any `AsyncRead`.
pub fn decode_reader<R: AsyncRead>(reader: R, boundary: &str) -> Result<PartReader<R>> {
    decode_reader_with_config(reader, boundary, DecoderConfig::default())
}

/// Decode parts from any `AsyncRead` with explicit configuration.
pub fn decode_reader_with_config<R: AsyncRead>(
    reader: R,
    boundary: &str,
    config: DecoderConfig,
) -> Result<PartReader<R>> {
    let codec = MultipartCodec::with_config(boundary, config)?;
    Ok(FramedRead::new(reader, codec))
}

/// Decode parts from a stream of body chunks, such as an HTTP response body.
///
/// Chunks are pulled only after everything already buffered has been
/// decoded, so the reader runs at the producer's pace.
pub fn decode_stream<S>(chunks: S, boundary: &str) -> Result<PartStream<S>>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    decode_stream_with_config(chunks, boundary, DecoderConfig::default())
}

/// Decode parts from a stream of body chunks with explicit configuration.
pub fn decode_stream_with_config<S>(
    chunks: S,
    boundary: &str,
    config: DecoderConfig,
) -> Result<PartStream<S>>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    decode_reader_with_config(StreamReader::new(chunks), boundary, config)
}
