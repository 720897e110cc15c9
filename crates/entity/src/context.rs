//! Entity context: the per-stream view a conversion runs against.
//!
//! The context resolves the effective media type and character set once at
//! build time (explicit value, else the `Content-Type` header, else
//! `text/plain`), carries the reader/writer registries the conversion
//! dispatches through, and owns the filter chain applied around every
//! conversion. Contexts are built per operation and passed by reference —
//! there is no process-wide default.

use futures::stream::BoxStream;
use http::{HeaderMap, header};
use mime::Mime;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use partflow_multipart::protocol::{MultipartError, Part, PartContent, boundary_param};

use crate::error::EntityError;
use crate::filter::{ContentFilter, FilterChain};
use crate::operator::{ReadOperator, WriteOperator};
use crate::operators;
use crate::registry::{OperatorRegistry, OperatorRequest};

/// A character set this pipeline can decode text with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    UsAscii,
}

impl Charset {
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("utf-8") || name.eq_ignore_ascii_case("utf8") {
            Some(Self::Utf8)
        } else if name.eq_ignore_ascii_case("us-ascii") || name.eq_ignore_ascii_case("ascii") {
            Some(Self::UsAscii)
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::UsAscii => "us-ascii",
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<String, EntityError> {
        match self {
            Self::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|_| EntityError::invalid_value("content is not valid utf-8")),
            Self::UsAscii => {
                if bytes.is_ascii() {
                    // ascii is a strict subset of utf-8
                    String::from_utf8(bytes.to_vec())
                        .map_err(|_| EntityError::invalid_value("content is not valid us-ascii"))
                } else {
                    Err(EntityError::invalid_value("content is not valid us-ascii"))
                }
            }
        }
    }
}

/// The resolved conversion context for one stream.
pub struct EntityContext {
    media_type: Mime,
    charset_override: Option<Charset>,
    headers: HeaderMap,
    readers: Arc<OperatorRegistry<ReadOperator>>,
    writers: Arc<OperatorRegistry<WriteOperator>>,
    filters: FilterChain,
}

impl EntityContext {
    pub fn builder() -> EntityContextBuilder {
        EntityContextBuilder::new()
    }

    /// The effective media type of the stream.
    pub fn media_type(&self) -> &Mime {
        &self.media_type
    }

    /// The effective character set: the explicit override, else the media
    /// type's `charset=` parameter, else UTF-8.
    pub fn charset(&self) -> Result<Charset, EntityError> {
        if let Some(charset) = self.charset_override {
            return Ok(charset);
        }
        match self.media_type.get_param(mime::CHARSET) {
            Some(name) => Charset::from_name(name.as_str()).ok_or_else(|| EntityError::unsupported_charset(name.as_str())),
            None => Ok(Charset::Utf8),
        }
    }

    /// The multipart boundary carried by the media type.
    pub fn boundary(&self) -> Result<String, EntityError> {
        boundary_param(&self.media_type).map_err(EntityError::from)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    pub fn readers(&self) -> &Arc<OperatorRegistry<ReadOperator>> {
        &self.readers
    }

    pub fn writers(&self) -> &Arc<OperatorRegistry<WriteOperator>> {
        &self.writers
    }

    /// Looks up the reader for type `T` under this context's media type.
    pub fn select_reader<T: 'static>(&self) -> Option<ReadOperator> {
        let request = OperatorRequest::of::<T>(Some(&self.media_type));
        self.readers.select(&request).map(|entry| entry.operator().clone())
    }

    /// Looks up the writer for type `T` under this context's media type.
    pub fn select_writer<T: 'static>(&self) -> Option<WriteOperator> {
        let request = OperatorRequest::of::<T>(Some(&self.media_type));
        self.writers.select(&request).map(|entry| entry.operator().clone())
    }

    /// Converts a content stream into a `T`.
    ///
    /// The filter chain runs over the stream first, then the selected
    /// single-arity reader converts the filtered bytes.
    pub async fn read_as<T: Send + 'static>(&self, content: PartContent) -> Result<T, EntityError> {
        let content = self.filters.apply(self, content);

        let operator = self.select_reader::<T>().ok_or_else(EntityError::no_reader::<T>)?;
        let Some(reader) = operator.as_single() else {
            return Err(EntityError::no_reader::<T>());
        };

        debug!(type_name = std::any::type_name::<T>(), "dispatching reader");
        let value = reader.read(self, content).await?;
        value
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| EntityError::invalid_value("reader produced a value of an unexpected type"))
    }

    /// Converts a value into a content stream.
    ///
    /// The selected single-arity writer runs first, then the filter chain
    /// runs over the produced stream.
    pub async fn write_value<T: Send + 'static>(&self, value: T) -> Result<PartContent, EntityError> {
        let operator = self.select_writer::<T>().ok_or_else(EntityError::no_writer::<T>)?;
        let Some(writer) = operator.as_single() else {
            return Err(EntityError::no_writer::<T>());
        };

        debug!(type_name = std::any::type_name::<T>(), "dispatching writer");
        let content = writer.write(self, Box::new(value)).await?;
        Ok(self.filters.apply(self, content))
    }

    /// Opens a content stream as a lazy sequence of parts, via the
    /// stream-arity reader registered for [`Part`].
    pub fn read_parts(&self, content: PartContent) -> Result<BoxStream<'static, Result<Part, MultipartError>>, EntityError> {
        let content = self.filters.apply(self, content);

        let operator = self.select_reader::<Part>().ok_or_else(EntityError::no_reader::<Part>)?;
        let Some(reader) = operator.as_stream() else {
            return Err(EntityError::no_reader::<Part>());
        };
        reader.read_parts(self, content)
    }

    /// Serializes a sequence of parts into a content stream, via the
    /// stream-arity writer registered for [`Part`].
    pub fn write_parts(&self, parts: BoxStream<'static, Part>) -> Result<PartContent, EntityError> {
        let operator = self.select_writer::<Part>().ok_or_else(EntityError::no_writer::<Part>)?;
        let Some(writer) = operator.as_stream() else {
            return Err(EntityError::no_writer::<Part>());
        };
        let content = writer.write_parts(self, parts)?;
        Ok(self.filters.apply(self, content))
    }
}

impl fmt::Debug for EntityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityContext")
            .field("media_type", &self.media_type)
            .field("charset_override", &self.charset_override)
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}

/// Builder assembling an [`EntityContext`].
///
/// Registries default to the crate's standard operator sets; both can be
/// replaced with request-scoped children for per-operation overrides.
pub struct EntityContextBuilder {
    media_type: Option<Mime>,
    charset: Option<Charset>,
    headers: HeaderMap,
    readers: Option<Arc<OperatorRegistry<ReadOperator>>>,
    writers: Option<Arc<OperatorRegistry<WriteOperator>>>,
    filters: Vec<Arc<dyn ContentFilter>>,
}

impl EntityContextBuilder {
    fn new() -> Self {
        Self { media_type: None, charset: None, headers: HeaderMap::new(), readers: None, writers: None, filters: Vec::new() }
    }

    /// Sets the media type explicitly, overriding any `Content-Type` header.
    pub fn media_type(mut self, media_type: Mime) -> Self {
        self.media_type = Some(media_type);
        self
    }

    /// Sets the character set explicitly, overriding any `charset=` parameter.
    pub fn charset(mut self, charset: Charset) -> Self {
        self.charset = Some(charset);
        self
    }

    /// Supplies the stream's headers, consulted for `Content-Type`.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn readers(mut self, readers: Arc<OperatorRegistry<ReadOperator>>) -> Self {
        self.readers = Some(readers);
        self
    }

    pub fn writers(mut self, writers: Arc<OperatorRegistry<WriteOperator>>) -> Self {
        self.writers = Some(writers);
        self
    }

    /// Appends a content filter to the chain.
    pub fn filter(mut self, filter: Arc<dyn ContentFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn build(self) -> EntityContext {
        let media_type = self
            .media_type
            .or_else(|| {
                self.headers
                    .get(header::CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<Mime>().ok())
            })
            .unwrap_or(mime::TEXT_PLAIN);

        let chain = FilterChain::new();
        for filter in self.filters {
            // the chain cannot be frozen before its first application
            let _ = chain.register(filter);
        }

        EntityContext {
            media_type,
            charset_override: self.charset,
            headers: self.headers,
            readers: self.readers.unwrap_or_else(operators::default_readers),
            writers: self.writers.unwrap_or_else(operators::default_writers),
            filters: chain,
        }
    }
}

impl fmt::Debug for EntityContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityContextBuilder")
            .field("media_type", &self.media_type)
            .field("charset", &self.charset)
            .field("filter_count", &self.filters.len())
            .finish_non_exhaustive()
    }
}
