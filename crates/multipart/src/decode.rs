//! Streaming multipart decoder.
//!
//! [`decode`] turns a byte-chunk source into a lazy sequence of [`Part`]
//! values. The pipeline is pull-based end to end: one unit of downstream
//! demand translates into at most one chunk pulled from the source, and
//! only when the state machine has reported that it needs data.
//!
//! # Architecture
//!
//! The decoder state (source, parse buffer, state machine, header
//! accumulator, the open part's content slot) is owned by one mutex-guarded
//! cell shared between two faces:
//!
//! - [`MultipartStream`]: the part sequence, driven by the outer consumer
//! - `PartBody`: the open part's content, driven by whoever consumes it
//!
//! Whichever face is polled drives the machine. The two demand levels stay
//! independent: while a part is open and attached, the outer stream parks
//! itself and the part's consumer pulls fragment by fragment; a full
//! content slot stops parser progress instead of buffering, so memory stays
//! bounded to one chunk plus one pending fragment.

use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use http::HeaderMap;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use tokio_util::codec::Decoder;
use tracing::{error, trace};

use crate::codec::EventDecoder;
use crate::protocol::body::ContentSlot;
use crate::protocol::{MimeEvent, MultipartError, Part, PartContent};

/// Decodes a multipart message from a byte-chunk source.
///
/// The returned stream yields one [`Part`] as soon as that part's headers
/// are complete; the part's content arrives lazily through its own channel.
/// The stream is single-use and non-restartable over its input.
///
/// An invalid boundary is a setup error: it surfaces as the first and only
/// item of the returned stream.
pub fn decode<S, E>(boundary: &str, source: S) -> MultipartStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<MultipartError> + 'static,
{
    let source = source.map(|result| result.map_err(Into::into)).boxed();

    let (decoder, stage) = match EventDecoder::new(boundary) {
        Ok(decoder) => (Some(decoder), Stage::Running),
        Err(e) => (None, Stage::Failed(Some(e))),
    };

    MultipartStream {
        shared: Arc::new(Shared {
            inner: Mutex::new(DecodeInner {
                source: Some(source),
                source_done: false,
                buffer: BytesMut::new(),
                decoder,
                stage,
                headers: None,
                slot: None,
                part_waker: None,
                next_slot_id: 0,
            }),
        }),
    }
}

/// The decoded part sequence.
///
/// Yields parts in source order, then `None` after the close delimiter, or
/// a single terminal error on any framing or source failure.
pub struct MultipartStream {
    shared: Arc<Shared>,
}

struct Shared {
    inner: Mutex<DecodeInner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DecodeInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct DecodeInner {
    source: Option<BoxStream<'static, Result<Bytes, MultipartError>>>,
    source_done: bool,
    buffer: BytesMut,
    decoder: Option<EventDecoder>,
    stage: Stage,
    /// headers accumulated for the part currently being opened
    headers: Option<HeaderMap>,
    /// content channel of the currently open part
    slot: Option<OpenSlot>,
    part_waker: Option<Waker>,
    next_slot_id: u64,
}

struct OpenSlot {
    id: u64,
    slot: ContentSlot,
}

enum Stage {
    Running,
    Finished,
    // the error is delivered to the part consumer once, then the stream ends
    Failed(Option<MultipartError>),
}

/// Outcome of one driving step.
enum Step {
    EmitPart(Part),
    Finished,
    Pending,
    Continue,
}

impl DecodeInner {
    /// Advances the pipeline by one event or one source chunk.
    fn step(&mut self, shared: &Arc<Shared>, cx: &mut Context<'_>) -> Step {
        // a full, attached content slot leaves the parser's content-data
        // request unresolved: no progress for this part until it drains
        if let Some(open) = &self.slot {
            if !open.slot.is_detached()
                && !open.slot.has_capacity()
                && self.decoder.as_ref().is_some_and(EventDecoder::wants_content)
            {
                return Step::Pending;
            }
        }

        let Some(decoder) = self.decoder.as_mut() else {
            self.fail(MultipartError::invalid_boundary("decoder was not initialized"));
            return Step::Continue;
        };

        match decoder.decode(&mut self.buffer) {
            Ok(Some(event)) => self.handle_event(shared, event),
            Ok(None) => self.pull_source(cx),
            Err(e) => {
                self.fail(e);
                Step::Continue
            }
        }
    }

    fn handle_event(&mut self, shared: &Arc<Shared>, event: MimeEvent) -> Step {
        match event {
            MimeEvent::StartMessage => Step::Continue,

            MimeEvent::StartPart => {
                self.headers = Some(HeaderMap::new());
                Step::Continue
            }

            MimeEvent::Header(name, value) => {
                if let Some(headers) = &mut self.headers {
                    headers.append(name, value);
                }
                Step::Continue
            }

            MimeEvent::EndHeaders => {
                let headers = self.headers.take().unwrap_or_default();
                let id = self.next_slot_id;
                self.next_slot_id += 1;
                self.slot = Some(OpenSlot { id, slot: ContentSlot::new() });

                let body = PartBody { shared: Arc::clone(shared), id, finished: false };
                trace!(slot_id = id, "emitting part with live content channel");
                Step::EmitPart(Part::new(headers, PartContent::stream(body)))
            }

            MimeEvent::Content(bytes) => {
                match &mut self.slot {
                    Some(open) => open.slot.submit(bytes),
                    None => error!("content event without an open part, dropping fragment"),
                }
                Step::Continue
            }

            MimeEvent::EndPart => {
                if let Some(open) = &mut self.slot {
                    open.slot.complete();
                    if open.slot.is_detached() {
                        self.slot = None;
                    }
                }
                self.wake_part_consumer();
                Step::Continue
            }

            MimeEvent::EndMessage => {
                self.finish();
                Step::Finished
            }
        }
    }

    /// Pulls at most one chunk from the byte source.
    fn pull_source(&mut self, cx: &mut Context<'_>) -> Step {
        if self.source_done {
            // out of input with the machine still expecting bytes
            let result = self.decoder.as_ref().map_or(Ok(()), EventDecoder::finish);
            return match result {
                Ok(()) => {
                    self.finish();
                    Step::Finished
                }
                Err(e) => {
                    self.fail(e);
                    Step::Continue
                }
            };
        }

        let Some(source) = self.source.as_mut() else {
            self.source_done = true;
            return Step::Continue;
        };

        match source.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                trace!(len = chunk.len(), "pulled one chunk from the byte source");
                self.buffer.extend_from_slice(&chunk);
                Step::Continue
            }
            Poll::Ready(Some(Err(e))) => {
                self.fail(e);
                Step::Continue
            }
            Poll::Ready(None) => {
                self.source_done = true;
                self.source = None;
                Step::Continue
            }
            Poll::Pending => Step::Pending,
        }
    }

    fn finish(&mut self) {
        if let Some(open) = &mut self.slot {
            if !open.slot.is_terminated() {
                // the parser guarantees EndPart before EndMessage, so an
                // open channel here means the message was cut short
                open.slot.fail(MultipartError::unexpected_end("reading part content"));
            }
        }
        self.stage = Stage::Finished;
        self.source = None;
        self.wake_part_consumer();
    }

    fn fail(&mut self, e: MultipartError) {
        error!(error = %e, "multipart stream failed");
        if let Some(open) = &mut self.slot {
            open.slot.fail(e.duplicate());
        }
        if matches!(self.stage, Stage::Running) {
            self.stage = Stage::Failed(Some(e));
        }
        self.source = None;
        self.wake_part_consumer();
    }

    fn wake_part_consumer(&mut self) {
        if let Some(waker) = self.part_waker.take() {
            waker.wake();
        }
    }
}

impl Stream for MultipartStream {
    type Item = Result<Part, MultipartError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let shared = Arc::clone(&this.shared);
        let mut inner = shared.lock();

        loop {
            match &mut inner.stage {
                Stage::Failed(error) => return Poll::Ready(error.take().map(Err)),
                Stage::Finished => return Poll::Ready(None),
                Stage::Running => {}
            }

            if let Some(open) = &inner.slot {
                if !open.slot.is_terminated() && !open.slot.is_detached() {
                    // an open part is in flight: its consumer drives the
                    // pipeline until the part completes
                    inner.part_waker = Some(cx.waker().clone());
                    return Poll::Pending;
                }
            }

            match inner.step(&shared, cx) {
                Step::EmitPart(part) => return Poll::Ready(Some(Ok(part))),
                Step::Finished => return Poll::Ready(None),
                Step::Pending => {
                    inner.part_waker = Some(cx.waker().clone());
                    return Poll::Pending;
                }
                Step::Continue => {}
            }
        }
    }
}

impl fmt::Debug for MultipartStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartStream").finish_non_exhaustive()
    }
}

/// The live content channel of one decoded part.
///
/// Boxed into the part's [`PartContent`]; polling it drives the shared
/// pipeline while its own slot is empty.
struct PartBody {
    shared: Arc<Shared>,
    id: u64,
    finished: bool,
}

impl Stream for PartBody {
    type Item = Result<Bytes, MultipartError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        let shared = Arc::clone(&this.shared);
        let mut inner = shared.lock();

        loop {
            let Some(open) = inner.slot.as_mut().filter(|open| open.id == this.id) else {
                // our part completed and the decoder has moved past it
                this.finished = true;
                return Poll::Ready(None);
            };

            match open.slot.poll_take(cx) {
                Poll::Ready(Some(Ok(bytes))) => return Poll::Ready(Some(Ok(bytes))),
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    inner.slot = None;
                    inner.wake_part_consumer();
                    return Poll::Ready(None);
                }
                Poll::Pending => match inner.step(&shared, cx) {
                    Step::EmitPart(_) => {
                        error!("decoder produced a part while another was open");
                        inner.fail(MultipartError::Terminated { reason: "part emitted out of order".to_string() });
                    }
                    Step::Finished | Step::Continue => {}
                    Step::Pending => return Poll::Pending,
                },
            }
        }
    }
}

impl Drop for PartBody {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let mut inner = self.shared.lock();
        if let Some(open) = &mut inner.slot {
            if open.id == self.id {
                // further fragments of this part are discarded; the outer
                // stream resumes and skips to the next boundary
                open.slot.detach();
                if open.slot.is_terminated() {
                    inner.slot = None;
                }
                inner.wake_part_consumer();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use futures::task::noop_waker_ref;
    use std::io;

    const MESSAGE: &[u8] = b"--bound\r\n\
        Content-Disposition: form-data; name=\"first\"\r\n\
        \r\n\
        hello world\r\n\
        --bound\r\n\
        Content-Type: application/octet-stream\r\n\
        X-Tag: a\r\n\
        X-Tag: b\r\n\
        \r\n\
        \x00\x01\x02\x03\r\n\
        --bound--";

    fn chunked_source(input: &[u8], chunk_size: usize) -> impl Stream<Item = Result<Bytes, io::Error>> + use<> {
        let chunks: Vec<Result<Bytes, io::Error>> =
            input.chunks(chunk_size).map(|chunk| Ok(Bytes::copy_from_slice(chunk))).collect();
        stream::iter(chunks)
    }

    async fn collect_parts(input: &[u8], chunk_size: usize) -> Vec<(HeaderMap, Bytes)> {
        let mut parts = decode("bound", chunked_source(input, chunk_size));
        let mut collected = Vec::new();
        while let Some(part) = parts.next().await {
            let part = part.expect("decode part");
            let headers = part.headers().clone();
            let bytes = part.into_bytes().await.expect("collect part content");
            collected.push((headers, bytes));
        }
        collected
    }

    #[tokio::test]
    async fn decodes_two_parts() {
        let parts = collect_parts(MESSAGE, MESSAGE.len()).await;

        assert_eq!(parts.len(), 2);

        let (first_headers, first_content) = &parts[0];
        assert_eq!(first_headers.get(http::header::CONTENT_DISPOSITION).unwrap(), "form-data; name=\"first\"");
        assert_eq!(first_content, &Bytes::from_static(b"hello world"));

        let (second_headers, second_content) = &parts[1];
        let tags: Vec<_> = second_headers.get_all("x-tag").iter().collect();
        assert_eq!(tags, vec!["a", "b"]);
        assert_eq!(second_content, &Bytes::from_static(b"\x00\x01\x02\x03"));
    }

    #[tokio::test]
    async fn chunk_size_independence() {
        let whole = collect_parts(MESSAGE, MESSAGE.len()).await;
        let one_byte = collect_parts(MESSAGE, 1).await;
        assert_eq!(whole, one_byte);
    }

    #[tokio::test]
    async fn zero_parts() {
        let parts = collect_parts(b"--bound--", 1).await;
        assert!(parts.is_empty());
    }

    #[tokio::test]
    async fn empty_part_content() {
        let parts = collect_parts(b"--bound\r\nX-Empty: yes\r\n\r\n\r\n--bound--", 3).await;

        assert_eq!(parts.len(), 1);
        assert!(parts[0].1.is_empty());
    }

    #[tokio::test]
    async fn part_name_accessor() {
        let mut parts = decode("bound", chunked_source(MESSAGE, 16));
        let part = parts.next().await.unwrap().unwrap();
        assert_eq!(part.name().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn dropped_part_body_is_skipped() {
        let mut parts = decode("bound", chunked_source(MESSAGE, 7));

        let first = parts.next().await.unwrap().unwrap();
        drop(first);

        let second = parts.next().await.unwrap().unwrap();
        assert_eq!(second.into_bytes().await.unwrap(), Bytes::from_static(b"\x00\x01\x02\x03"));

        assert!(parts.next().await.is_none());
    }

    #[tokio::test]
    async fn invalid_boundary_is_a_setup_error() {
        let mut parts = decode("", chunked_source(MESSAGE, 16));
        let result = parts.next().await.unwrap();
        assert!(matches!(result, Err(MultipartError::InvalidBoundary { .. })));
        assert!(parts.next().await.is_none());
    }

    #[tokio::test]
    async fn truncated_message_errors_both_levels() {
        let truncated = &MESSAGE[..MESSAGE.len() - 12];
        let mut parts = decode("bound", chunked_source(truncated, 16));

        let first = parts.next().await.unwrap().unwrap();
        first.into_bytes().await.unwrap();

        let second = parts.next().await.unwrap().unwrap();
        let content_result = second.into_bytes().await;
        assert!(content_result.is_err());

        let stream_result = parts.next().await.unwrap();
        assert!(matches!(stream_result, Err(MultipartError::UnexpectedEnd { .. })));
    }

    #[tokio::test]
    async fn source_error_terminates_the_stream() {
        let chunks: Vec<Result<Bytes, io::Error>> =
            vec![Ok(Bytes::from_static(b"--bound\r\n")), Err(io::Error::other("connection reset"))];
        let mut parts = decode("bound", stream::iter(chunks));

        let result = parts.next().await.unwrap();
        assert!(matches!(result, Err(MultipartError::Io { .. })));
        assert!(parts.next().await.is_none());
    }

    /// One unit of outer demand buffers at most one part's headers, and an
    /// open part buffers at most one pending fragment.
    #[test]
    fn demand_is_gated_per_fragment() {
        let mut parts = decode("bound", chunked_source(MESSAGE, 1));
        let waker = noop_waker_ref();
        let mut cx = Context::from_waker(waker);

        // first unit of demand: exactly one part comes out
        let first = match Pin::new(&mut parts).poll_next(&mut cx) {
            Poll::Ready(Some(Ok(part))) => part,
            other => panic!("expected first part, got {other:?}"),
        };

        // outer demand while the part is open does not advance the decoder
        assert!(Pin::new(&mut parts).poll_next(&mut cx).is_pending());

        // the open part's channel never holds more than one fragment: its
        // consumer pulls them one by one until the part completes
        let mut body = first.into_content().unwrap();
        let mut total = BytesMut::new();
        loop {
            match Pin::new(&mut body).poll_next(&mut cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    assert!(bytes.len() <= MESSAGE.len());
                    total.extend_from_slice(&bytes);
                }
                Poll::Ready(Some(Err(e))) => panic!("unexpected content error: {e}"),
                Poll::Ready(None) => break,
                Poll::Pending => panic!("iter source never suspends"),
            }
        }
        assert_eq!(total.freeze(), Bytes::from_static(b"hello world"));

        // with the first part drained, outer demand yields the second part
        match Pin::new(&mut parts).poll_next(&mut cx) {
            Poll::Ready(Some(Ok(part))) => drop(part),
            other => panic!("expected second part, got {other:?}"),
        }
    }
}
