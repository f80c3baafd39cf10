use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::{stream, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::codec::MultipartCodec;
use crate::error::Result;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes JSON payloads as multipart parts to any `AsyncWrite`.
///
/// Every part is flushed as soon as it is written so a reader on the other
/// end sees each payload without waiting for the next one.
pub struct MultipartWriter<W> {
    inner: W,
    codec: MultipartCodec,
    buf: BytesMut,
    parts: usize,
}

impl<W: AsyncWrite + Unpin> MultipartWriter<W> {
    /// Create a writer framing with `boundary`.
    pub fn new(inner: W, boundary: &str) -> Result<Self> {
        Ok(Self {
            inner,
            codec: MultipartCodec::new(boundary)?,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            parts: 0,
        })
    }

    /// Serialize and write one payload, then flush.
    pub async fn write_json<T: Serialize + ?Sized>(&mut self, payload: &T) -> Result<()> {
        self.buf.clear();
        self.codec.encode_json(payload, &mut self.buf)?;
        self.write_buffered().await
    }

    /// Write one pre-serialized JSON body, then flush.
    pub async fn write_body(&mut self, body: &[u8]) -> Result<()> {
        self.buf.clear();
        self.codec.encode_body(body, &mut self.buf)?;
        self.write_buffered().await
    }

    /// Write the closing delimiter, flush, and return the inner writer.
    pub async fn finish(mut self) -> Result<W> {
        self.buf.clear();
        self.codec.encode_close(&mut self.buf);
        self.inner.write_all(&self.buf).await?;
        self.inner.flush().await?;
        tracing::debug!(parts = self.parts, "multipart body finished");
        Ok(self.inner)
    }

    /// Number of parts written so far.
    pub fn parts_written(&self) -> usize {
        self.parts
    }

    /// Borrow the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    async fn write_buffered(&mut self) -> Result<()> {
        self.inner.write_all(&self.buf).await?;
        self.inner.flush().await?;
        self.parts += 1;
        tracing::trace!(part = self.parts, bytes = self.buf.len(), "part written");
        Ok(())
    }
}

/// Frame a stream of payloads as a multipart body.
///
/// Each payload becomes exactly one `Bytes` chunk, emitted as soon as the
/// payload is available; the closing delimiter is the final chunk.
pub fn encode_stream<S, T>(
    payloads: S,
    boundary: &str,
) -> Result<impl Stream<Item = Result<Bytes>> + Send>
where
    S: Stream<Item = T> + Send,
    T: Serialize + Send,
{
    let codec = MultipartCodec::new(boundary)?;
    let close = codec.close_bytes();
    let parts = payloads.map(move |payload| {
        let mut dst = BytesMut::new();
        codec.encode_json(&payload, &mut dst)?;
        Ok(dst.freeze())
    });
    Ok(parts.chain(stream::once(async move { Ok(close) })))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use serde_json::json;

    use super::*;
    use crate::codec::{decode_all, PartBody};
    use crate::error::FrameError;

    #[tokio::test]
    async fn writer_output_decodes() {
        let mut writer = MultipartWriter::new(Cursor::new(Vec::new()), "-").unwrap();
        writer.write_json(&json!({"data": {"a": 1}, "hasNext": true})).await.unwrap();
        writer
            .write_body(br#"{"path":["a"],"data":{"b":2},"hasNext":false}"#)
            .await
            .unwrap();
        assert_eq!(writer.parts_written(), 2);

        let bytes = writer.finish().await.unwrap().into_inner();
        assert!(bytes.ends_with(b"\r\n-----\r\n"));

        let parts = decode_all(&bytes, "-").unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[1].body,
            PartBody::Json(json!({"path": ["a"], "data": {"b": 2}, "hasNext": false}))
        );
    }

    #[tokio::test]
    async fn encode_stream_emits_one_chunk_per_payload() {
        let payloads = stream::iter(vec![json!({"n": 1}), json!({"n": 2})]);
        let chunks: Vec<Bytes> = encode_stream(payloads, "b")
            .unwrap()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].as_ref(), b"\r\n--b--\r\n");
        assert!(chunks[0].starts_with(b"\r\n\r\n--b\r\n"));
    }

    #[tokio::test]
    async fn encode_stream_of_nothing_is_just_the_close() {
        let payloads = stream::iter(Vec::<serde_json::Value>::new());
        let chunks: Vec<Bytes> = encode_stream(payloads, "b")
            .unwrap()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec![Bytes::from_static(b"\r\n--b--\r\n")]);
        assert!(decode_all(&chunks[0], "b").unwrap().is_empty());
    }

    #[tokio::test]
    async fn writer_rejects_body_with_marker() {
        let mut writer = MultipartWriter::new(Cursor::new(Vec::new()), "b").unwrap();
        let err = writer.write_body(b"\"--b\"").await.unwrap_err();
        assert!(matches!(err, FrameError::BoundaryInBody));
        assert_eq!(writer.parts_written(), 0);
    }
}
