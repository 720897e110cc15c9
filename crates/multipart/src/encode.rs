//! Streaming multipart encoder.
//!
//! [`encode`] is the inverse of [`decode`](crate::decode): it consumes a
//! sequence of [`Part`] values and produces the framed byte stream. One
//! outbound part is pulled at a time, and its content is fully drained —
//! one fragment per unit of downstream demand — before the next part is
//! requested, so the encoder mirrors the decoder's memory bound of one
//! in-flight fragment.

use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::fmt;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::codec::Encoder;
use tracing::{error, trace};

use crate::codec::{FrameEncoder, FrameItem, validate_boundary};
use crate::protocol::{EncodeError, Part, PartContent};

/// Encodes a sequence of parts into a multipart byte stream.
///
/// The returned stream is single-use and non-restartable. An empty part
/// sequence encodes to just the close delimiter `--boundary--`. A part
/// whose content errors terminates the whole encoded stream; no further
/// parts are pulled.
///
/// An invalid boundary is a setup error: it surfaces as the first and only
/// item of the returned stream.
pub fn encode<S>(boundary: &str, parts: S) -> EncodeStream
where
    S: Stream<Item = Part> + Send + 'static,
{
    let setup_error = validate_boundary(boundary).err().map(EncodeError::from);

    EncodeStream {
        parts: parts.boxed(),
        encoder: FrameEncoder::new(boundary),
        state: EncodeState::NextPart,
        setup_error,
    }
}

/// The encoded byte stream.
///
/// Yields framing and content fragments in wire order, then `None` after
/// the close delimiter.
pub struct EncodeStream {
    parts: BoxStream<'static, Part>,
    encoder: FrameEncoder,
    state: EncodeState,
    setup_error: Option<EncodeError>,
}

enum EncodeState {
    /// Waiting for the next outbound part (or the end of the sequence)
    NextPart,
    /// Draining the in-flight part's content
    Content(PartContent),
    Done,
}

impl EncodeStream {
    fn fail(&mut self, e: EncodeError) -> Poll<Option<Result<Bytes, EncodeError>>> {
        error!(error = %e, "encoded multipart stream failed");
        self.state = EncodeState::Done;
        Poll::Ready(Some(Err(e)))
    }
}

impl Stream for EncodeStream {
    type Item = Result<Bytes, EncodeError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(e) = this.setup_error.take() {
            return this.fail(e);
        }

        loop {
            match &mut this.state {
                EncodeState::NextPart => match this.parts.poll_next_unpin(cx) {
                    Poll::Ready(Some(mut part)) => {
                        let content = match part.take_content() {
                            Ok(content) => content,
                            Err(e) => return this.fail(EncodeError::Content { source: e }),
                        };
                        let headers = mem::take(part.headers_mut());

                        let mut dst = BytesMut::new();
                        if let Err(e) = this.encoder.encode(FrameItem::<Bytes>::PartHead(headers), &mut dst) {
                            return this.fail(e);
                        }
                        trace!(framed = dst.len(), "encoded part head");

                        this.state = EncodeState::Content(content);
                        return Poll::Ready(Some(Ok(dst.freeze())));
                    }

                    Poll::Ready(None) => {
                        let mut dst = BytesMut::new();
                        if let Err(e) = this.encoder.encode(FrameItem::<Bytes>::Eof, &mut dst) {
                            return this.fail(e);
                        }
                        this.state = EncodeState::Done;
                        return Poll::Ready(Some(Ok(dst.freeze())));
                    }

                    Poll::Pending => return Poll::Pending,
                },

                EncodeState::Content(content) => match content.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(bytes))) => {
                        if bytes.is_empty() {
                            continue;
                        }
                        let mut dst = BytesMut::new();
                        if let Err(e) = this.encoder.encode(FrameItem::Content(bytes), &mut dst) {
                            return this.fail(e);
                        }
                        return Poll::Ready(Some(Ok(dst.freeze())));
                    }

                    Poll::Ready(Some(Err(e))) => {
                        return this.fail(EncodeError::Content { source: e });
                    }

                    // this part is drained: only now ask for the next one
                    Poll::Ready(None) => this.state = EncodeState::NextPart,

                    Poll::Pending => return Poll::Pending,
                },

                EncodeState::Done => return Poll::Ready(None),
            }
        }
    }
}

impl fmt::Debug for EncodeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodeStream").field("encoder", &self.encoder).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode;
    use crate::protocol::MultipartError;
    use futures::stream;
    use http::{HeaderMap, HeaderValue, header};

    async fn collect_encoded(stream: &mut EncodeStream) -> Bytes {
        let mut out = BytesMut::new();
        while let Some(fragment) = stream.next().await {
            out.extend_from_slice(&fragment.expect("encode fragment"));
        }
        out.freeze()
    }

    fn text_part(name: &str, body: &'static [u8]) -> Part {
        let mut headers = HeaderMap::new();
        let disposition = format!("form-data; name=\"{name}\"");
        headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_str(&disposition).unwrap());
        Part::from_bytes(headers, Bytes::from_static(body))
    }

    #[tokio::test]
    async fn empty_sequence_is_just_the_close_delimiter() {
        let mut encoded = encode("bound", stream::iter(Vec::<Part>::new()));
        let bytes = collect_encoded(&mut encoded).await;
        assert_eq!(&bytes[..], b"--bound--");
        assert!(encoded.next().await.is_none());
    }

    #[tokio::test]
    async fn exact_wire_framing() {
        let parts = vec![text_part("a", b"alpha"), text_part("b", b"beta")];
        let mut encoded = encode("bound", stream::iter(parts));
        let bytes = collect_encoded(&mut encoded).await;

        assert_eq!(
            &bytes[..],
            b"--bound\r\ncontent-disposition:form-data; name=\"a\"\r\n\r\nalpha\r\n\
              --bound\r\ncontent-disposition:form-data; name=\"b\"\r\n\r\nbeta\r\n\
              --bound--"
                .as_slice()
        );
    }

    #[tokio::test]
    async fn round_trip_preserves_headers_and_content() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        headers.append("x-tag", HeaderValue::from_static("one"));
        headers.append("x-tag", HeaderValue::from_static("two"));
        let binary = Part::from_bytes(headers.clone(), Bytes::from_static(b"\x00--bound\x01"));

        let parts = vec![text_part("plain", b"some text"), binary];
        let mut encoded = encode("bound", stream::iter(parts));
        let bytes = collect_encoded(&mut encoded).await;

        // re-decode one byte at a time to exercise every split point
        let chunks: Vec<Result<Bytes, MultipartError>> =
            bytes.iter().map(|b| Ok(Bytes::copy_from_slice(&[*b]))).collect();
        let mut decoded = decode("bound", stream::iter(chunks));

        let first = decoded.next().await.unwrap().unwrap();
        assert_eq!(first.name().as_deref(), Some("plain"));
        assert_eq!(first.into_bytes().await.unwrap(), Bytes::from_static(b"some text"));

        let second = decoded.next().await.unwrap().unwrap();
        assert_eq!(second.headers(), &headers);
        assert_eq!(second.into_bytes().await.unwrap(), Bytes::from_static(b"\x00--bound\x01"));

        assert!(decoded.next().await.is_none());
    }

    #[tokio::test]
    async fn content_error_terminates_the_encoded_stream() {
        let failing = Part::new(
            HeaderMap::new(),
            PartContent::stream(stream::iter(vec![
                Ok(Bytes::from_static(b"partial")),
                Err(MultipartError::unexpected_end("reading part content")),
            ])),
        );
        // this part must never be pulled
        let after = text_part("after", b"unreachable");

        let mut encoded = encode("bound", stream::iter(vec![failing, after]));

        let head = encoded.next().await.unwrap().unwrap();
        assert!(head.starts_with(b"--bound\r\n"));
        assert_eq!(encoded.next().await.unwrap().unwrap(), Bytes::from_static(b"partial"));

        let failure = encoded.next().await.unwrap();
        assert!(matches!(failure, Err(EncodeError::Content { .. })));
        assert!(encoded.next().await.is_none());
    }

    #[tokio::test]
    async fn consumed_part_is_a_setup_error() {
        let mut part = text_part("a", b"alpha");
        drop(part.take_content().unwrap());

        let mut encoded = encode("bound", stream::iter(vec![part]));
        let result = encoded.next().await.unwrap();
        assert!(matches!(result, Err(EncodeError::Content { source: MultipartError::ContentConsumed })));
    }

    #[tokio::test]
    async fn invalid_boundary_is_a_setup_error() {
        let mut encoded = encode("", stream::iter(Vec::<Part>::new()));
        let result = encoded.next().await.unwrap();
        assert!(matches!(result, Err(EncodeError::Content { source: MultipartError::InvalidBoundary { .. } })));
        assert!(encoded.next().await.is_none());
    }
}
