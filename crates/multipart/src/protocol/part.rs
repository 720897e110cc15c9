use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use http::{HeaderMap, header};
use mime::Mime;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::protocol::MultipartError;

/// One headered sub-payload of a multipart message.
///
/// A part owns an ordered header map and a lazily consumed content stream.
/// Inbound parts are produced by the decoder with a live content channel
/// attached; outbound parts are constructed by the caller from buffered
/// bytes or any byte stream. Either way the content can be taken exactly
/// once: a second take yields [`MultipartError::ContentConsumed`].
pub struct Part {
    headers: HeaderMap,
    content: Option<PartContent>,
}

impl Part {
    /// Creates a part from headers and a content stream.
    pub fn new(headers: HeaderMap, content: PartContent) -> Self {
        Self { headers, content: Some(content) }
    }

    /// Creates a part whose content is fully buffered in memory.
    pub fn from_bytes(headers: HeaderMap, bytes: Bytes) -> Self {
        Self::new(headers, PartContent::full(bytes))
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The part's media type, from its `Content-Type` header.
    ///
    /// A missing or unparseable header falls back to `text/plain`.
    pub fn content_type(&self) -> Mime {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<Mime>().ok())
            .unwrap_or(mime::TEXT_PLAIN)
    }

    /// The `name` parameter of the `Content-Disposition` header, if any.
    pub fn name(&self) -> Option<String> {
        self.disposition_param("name")
    }

    /// The `filename` parameter of the `Content-Disposition` header, if any.
    pub fn file_name(&self) -> Option<String> {
        self.disposition_param("filename")
    }

    fn disposition_param(&self, key: &str) -> Option<String> {
        let value = self.headers.get(header::CONTENT_DISPOSITION)?.to_str().ok()?;
        for segment in value.split(';').skip(1) {
            if let Some((k, v)) = segment.split_once('=') {
                if k.trim().eq_ignore_ascii_case(key) {
                    return Some(v.trim().trim_matches('"').to_string());
                }
            }
        }
        None
    }

    /// Takes the content stream out of the part.
    ///
    /// # Errors
    ///
    /// Returns [`MultipartError::ContentConsumed`] if the content has
    /// already been taken.
    pub fn take_content(&mut self) -> Result<PartContent, MultipartError> {
        self.content.take().ok_or(MultipartError::ContentConsumed)
    }

    /// Consumes the part and returns its content stream.
    pub fn into_content(mut self) -> Result<PartContent, MultipartError> {
        self.take_content()
    }

    /// Consumes the part and buffers its whole content into memory.
    ///
    /// A part with zero content bytes yields an empty (not missing) buffer.
    pub async fn into_bytes(mut self) -> Result<Bytes, MultipartError> {
        self.take_content()?.bytes().await
    }
}

impl fmt::Debug for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Part")
            .field("headers", &self.headers)
            .field("consumed", &self.content.is_none())
            .finish()
    }
}

/// A part's content as a lazy byte sequence.
///
/// Fragments are delivered in source order; the stream terminates with
/// `None` after the part's final fragment, or with a single error if the
/// surrounding multipart stream failed mid-part.
pub struct PartContent {
    kind: Kind,
}

enum Kind {
    Full(Option<Bytes>),
    Stream(BoxStream<'static, Result<Bytes, MultipartError>>),
}

impl PartContent {
    /// Content with no bytes at all.
    pub fn empty() -> Self {
        Self { kind: Kind::Full(None) }
    }

    /// Fully buffered content, delivered as one fragment.
    pub fn full(bytes: Bytes) -> Self {
        if bytes.is_empty() { Self::empty() } else { Self { kind: Kind::Full(Some(bytes)) } }
    }

    /// Content backed by a byte stream.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, MultipartError>> + Send + 'static,
    {
        Self { kind: Kind::Stream(stream.boxed()) }
    }

    /// Drains the stream and collects every fragment into one buffer.
    pub async fn bytes(mut self) -> Result<Bytes, MultipartError> {
        let mut collected = BytesMut::new();
        while let Some(fragment) = self.next().await {
            collected.extend_from_slice(&fragment?);
        }
        Ok(collected.freeze())
    }
}

impl Stream for PartContent {
    type Item = Result<Bytes, MultipartError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.get_mut().kind {
            Kind::Full(option_bytes) => Poll::Ready(option_bytes.take().map(Ok)),
            Kind::Stream(stream) => stream.poll_next_unpin(cx),
        }
    }
}

impl fmt::Debug for PartContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Full(bytes) => f.debug_tuple("PartContent::Full").field(&bytes.as_ref().map(Bytes::len)).finish(),
            Kind::Stream(_) => f.debug_tuple("PartContent::Stream").finish(),
        }
    }
}

/// Extracts the required `boundary=` parameter from a multipart media type.
///
/// Its absence is a setup error, raised before any byte is parsed.
pub fn boundary_param(media_type: &Mime) -> Result<String, MultipartError> {
    media_type
        .get_param(mime::BOUNDARY)
        .map(|name| name.as_str().to_string())
        .ok_or_else(|| MultipartError::invalid_boundary("media type has no boundary parameter"))
}
