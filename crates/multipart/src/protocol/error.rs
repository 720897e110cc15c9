use std::io;
use thiserror::Error;

/// Errors raised while decoding a multipart byte stream.
///
/// Every framing violation is fatal for the whole stream: parts already
/// emitted stay emitted, but no further parts will follow and the part
/// sequence terminates with the error.
#[derive(Error, Debug)]
pub enum MultipartError {
    #[error("boundary not found within {scanned} bytes, limit {limit}")]
    BoundaryNotFound { scanned: usize, limit: usize },

    #[error("missing or empty boundary: {reason}")]
    InvalidBoundary { reason: String },

    #[error("invalid bytes after boundary line: {reason}")]
    InvalidDelimiter { reason: String },

    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("message truncated while {context}")]
    UnexpectedEnd { context: &'static str },

    #[error("part content has already been consumed")]
    ContentConsumed,

    #[error("multipart stream failed: {reason}")]
    Terminated { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl MultipartError {
    pub fn invalid_boundary<S: ToString>(str: S) -> Self {
        Self::InvalidBoundary { reason: str.to_string() }
    }

    pub fn invalid_delimiter<S: ToString>(str: S) -> Self {
        Self::InvalidDelimiter { reason: str.to_string() }
    }

    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn unexpected_end(context: &'static str) -> Self {
        Self::UnexpectedEnd { context }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    /// A second terminal copy of this error, for delivering one failure to
    /// both the part sequence and an open part's content channel.
    pub(crate) fn duplicate(&self) -> Self {
        Self::Terminated { reason: self.to_string() }
    }
}

/// Errors raised while encoding a sequence of parts into a multipart byte
/// stream.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("invalid part: {reason}")]
    InvalidPart { reason: String },

    #[error("part content error: {source}")]
    Content {
        #[from]
        source: MultipartError,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl EncodeError {
    pub fn invalid_part<S: ToString>(str: S) -> Self {
        Self::InvalidPart { reason: str.to_string() }
    }
}

impl From<EncodeError> for MultipartError {
    fn from(e: EncodeError) -> Self {
        match e {
            EncodeError::Content { source } => source,
            other => MultipartError::Terminated { reason: other.to_string() },
        }
    }
}
