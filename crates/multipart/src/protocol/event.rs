use bytes::Bytes;
use http::{HeaderName, HeaderValue};

/// A structural event produced by the multipart state machine.
///
/// The decoder emits exactly one event per successful `decode` call, in
/// document order: `StartMessage`, then for each part `StartPart`, zero or
/// more `Header`s, `EndHeaders`, zero or more `Content` fragments and
/// `EndPart`, finally `EndMessage` when the close delimiter is seen.
///
/// "More data required" and "malformed input" are not events: the decoder
/// expresses them as `Ok(None)` and `Err(MultipartError)` respectively,
/// mirroring the `tokio_util::codec::Decoder` contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MimeEvent {
    /// The first boundary line was located (or is being searched for)
    StartMessage,
    /// A boundary line opened a new part
    StartPart,
    /// One header line of the current part
    Header(HeaderName, HeaderValue),
    /// The blank line terminating the current part's header block
    EndHeaders,
    /// A fragment of the current part's content
    Content(Bytes),
    /// The delimiter closing the current part
    EndPart,
    /// The close delimiter `--boundary--`
    EndMessage,
}

impl MimeEvent {
    /// Returns true if this event carries part content bytes
    #[inline]
    pub fn is_content(&self) -> bool {
        matches!(self, MimeEvent::Content(_))
    }

    /// Returns a reference to the contained bytes if this is a `Content` event
    pub fn as_content(&self) -> Option<&Bytes> {
        match self {
            MimeEvent::Content(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Consumes the event and returns the contained bytes if this is a `Content` event
    pub fn into_content(self) -> Option<Bytes> {
        match self {
            MimeEvent::Content(bytes) => Some(bytes),
            _ => None,
        }
    }
}
