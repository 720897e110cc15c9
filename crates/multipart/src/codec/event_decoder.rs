//! The multipart MIME state machine.
//!
//! This module provides the byte-level parser for multipart messages as
//! specified in the `multipart/form-data` subset of
//! [RFC 2046 Section 5.1](https://tools.ietf.org/html/rfc2046#section-5.1).
//!
//! The parser is an explicit state machine fed from a byte buffer the
//! caller appends arbitrarily sized chunks into. Each `decode` call emits
//! at most one structural [`MimeEvent`]; `Ok(None)` hands control back to
//! the caller until more bytes arrive. The caller decides when to feed the
//! buffer, which is how consumer demand reaches all the way down to the
//! byte source.

use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::header::PartHeaderDecoder;
use crate::ensure;
use crate::protocol::{MimeEvent, MultipartError};

/// Maximum bytes of preamble scanned before giving up on finding the first
/// boundary line
const MAX_PREAMBLE_BYTES: usize = 8 * 1024;

/// RFC 2046 recommends multipart boundary length <= 70 characters
const MAX_BOUNDARY_LEN: usize = 70;

/// A streaming parser for one multipart message.
///
/// The machine walks `Preamble -> BoundarySuffix -> Headers -> Body ->
/// BoundarySuffix -> ... -> End`. Boundary lines are detected by a rolling
/// match against `\r\n--boundary` (the very first boundary line needs no
/// leading CRLF), and the two bytes after a boundary decide between the
/// next part (`\r\n`) and the close delimiter (`--`).
#[derive(Debug)]
pub struct EventDecoder {
    /// `\r\n--<boundary>`
    delimiter: Vec<u8>,
    state: State,
    /// header events parsed as a block, replayed one per `decode` call
    pending: VecDeque<MimeEvent>,
    header_decoder: PartHeaderDecoder,
    preamble_scanned: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Emit `StartMessage` before touching any byte
    Start,
    /// Search for the first boundary line
    Preamble,
    /// Decide between next part and close delimiter
    BoundarySuffix,
    /// Parse one part's header block
    Headers,
    /// Forward content bytes until the next delimiter
    Body,
    /// Close delimiter seen; any epilogue is ignored
    End,
}

impl EventDecoder {
    /// Creates a parser for the given boundary string.
    ///
    /// # Errors
    ///
    /// Returns [`MultipartError::InvalidBoundary`] if the boundary is
    /// empty, longer than 70 bytes, or contains CR/LF.
    pub fn new(boundary: &str) -> Result<Self, MultipartError> {
        validate_boundary(boundary)?;

        let mut delimiter = Vec::with_capacity(boundary.len() + 4);
        delimiter.extend_from_slice(b"\r\n--");
        delimiter.extend_from_slice(boundary.as_bytes());

        Ok(Self {
            delimiter,
            state: State::Start,
            pending: VecDeque::new(),
            header_decoder: PartHeaderDecoder,
            preamble_scanned: 0,
        })
    }

    /// True when the next bytes the parser is waiting for belong to an open
    /// part's content rather than to message structure.
    ///
    /// This is the `isContent` bit of the parser's data request: the
    /// orchestrator uses it to stop feeding the parser while the open
    /// part's channel is full.
    pub fn wants_content(&self) -> bool {
        self.state == State::Body && self.pending.is_empty()
    }

    /// True once the close delimiter has been consumed.
    pub fn is_finished(&self) -> bool {
        self.state == State::End && self.pending.is_empty()
    }

    /// Signals end of input.
    ///
    /// # Errors
    ///
    /// Returns [`MultipartError::UnexpectedEnd`] if the machine has not
    /// reached its terminal state, naming the phase that was cut short.
    pub fn finish(&self) -> Result<(), MultipartError> {
        match self.state {
            State::End => Ok(()),
            State::Start | State::Preamble => Err(MultipartError::unexpected_end("searching for the first boundary")),
            State::BoundarySuffix => Err(MultipartError::unexpected_end("reading the boundary suffix")),
            State::Headers => Err(MultipartError::unexpected_end("reading part headers")),
            State::Body => Err(MultipartError::unexpected_end("reading part content")),
        }
    }

    /// `--<boundary>`, the delimiter shape valid only at the very start.
    fn dash_boundary(&self) -> &[u8] {
        &self.delimiter[2..]
    }

    /// Locates the first boundary line, tolerating preamble text within the
    /// lookahead limit. Returns true once the boundary has been consumed.
    fn read_preamble(&mut self, src: &mut BytesMut) -> Result<bool, MultipartError> {
        let dash_len = self.dash_boundary().len();

        // a boundary without leading CRLF is only valid at the very start
        // of the stream, before any preamble byte has been discarded
        if self.preamble_scanned == 0 {
            if src.len() >= dash_len {
                if &src[..dash_len] == self.dash_boundary() {
                    src.advance(dash_len);
                    self.state = State::BoundarySuffix;
                    return Ok(true);
                }
            } else if self.dash_boundary().starts_with(src) {
                // could still become the position-zero boundary
                return Ok(false);
            }
        }

        match find(src, &self.delimiter) {
            Some(i) => {
                ensure!(
                    self.preamble_scanned + i <= MAX_PREAMBLE_BYTES,
                    MultipartError::BoundaryNotFound { scanned: self.preamble_scanned + i, limit: MAX_PREAMBLE_BYTES }
                );
                trace!(skipped = i, "skipped preamble before the first boundary");
                src.advance(i + self.delimiter.len());
                self.state = State::BoundarySuffix;
                Ok(true)
            }
            None => {
                // discard preamble text, keeping any partial delimiter suffix
                let keep = suffix_overlap(src, &self.delimiter);
                let discard = src.len() - keep;
                self.preamble_scanned += discard;
                ensure!(
                    self.preamble_scanned <= MAX_PREAMBLE_BYTES,
                    MultipartError::BoundaryNotFound { scanned: self.preamble_scanned, limit: MAX_PREAMBLE_BYTES }
                );
                src.advance(discard);
                Ok(false)
            }
        }
    }

    /// Reads the two bytes after a boundary line.
    fn read_boundary_suffix(&mut self, src: &mut BytesMut) -> Result<Option<MimeEvent>, MultipartError> {
        if src.len() < 2 {
            return Ok(None);
        }

        match (src[0], src[1]) {
            (b'\r', b'\n') => {
                src.advance(2);
                self.state = State::Headers;
                Ok(Some(MimeEvent::StartPart))
            }
            (b'-', b'-') => {
                src.advance(2);
                self.state = State::End;
                Ok(Some(MimeEvent::EndMessage))
            }
            (a, b) => Err(MultipartError::invalid_delimiter(format!(
                "expected CRLF or `--` after boundary, got 0x{a:02x} 0x{b:02x}"
            ))),
        }
    }

    /// Forwards content bytes, holding back only what could still be the
    /// start of the next delimiter.
    fn read_body(&mut self, src: &mut BytesMut) -> Result<Option<MimeEvent>, MultipartError> {
        if src.is_empty() {
            return Ok(None);
        }

        match find(src, &self.delimiter) {
            Some(0) => {
                src.advance(self.delimiter.len());
                self.state = State::BoundarySuffix;
                Ok(Some(MimeEvent::EndPart))
            }
            Some(i) => Ok(Some(MimeEvent::Content(src.split_to(i).freeze()))),
            None => {
                let keep = suffix_overlap(src, &self.delimiter);
                let safe = src.len() - keep;
                if safe == 0 {
                    return Ok(None);
                }
                Ok(Some(MimeEvent::Content(src.split_to(safe).freeze())))
            }
        }
    }
}

impl Decoder for EventDecoder {
    type Item = MimeEvent;
    type Error = MultipartError;

    /// Advances the state machine by at most one event.
    ///
    /// # Returns
    /// - `Ok(Some(event))` when an event could be produced from buffered bytes
    /// - `Ok(None)` when more data is needed (see [`EventDecoder::wants_content`])
    /// - `Err(MultipartError)` on a framing violation, which is fatal for
    ///   the whole stream
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            match self.state {
                State::Start => {
                    self.state = State::Preamble;
                    return Ok(Some(MimeEvent::StartMessage));
                }

                State::Preamble => {
                    if !self.read_preamble(src)? {
                        return Ok(None);
                    }
                }

                State::BoundarySuffix => return self.read_boundary_suffix(src),

                State::Headers => match self.header_decoder.decode(src)? {
                    Some(headers) => {
                        trace!(header_count = headers.len(), "parsed part headers");
                        for (name, value) in headers {
                            self.pending.push_back(MimeEvent::Header(name, value));
                        }
                        self.pending.push_back(MimeEvent::EndHeaders);
                        self.state = State::Body;
                    }
                    None => return Ok(None),
                },

                State::Body => return self.read_body(src),

                State::End => return Ok(None),
            }
        }
    }
}

/// Checks a boundary string against the RFC 2046 constraints both codec
/// directions rely on.
pub(crate) fn validate_boundary(boundary: &str) -> Result<(), MultipartError> {
    ensure!(!boundary.is_empty(), MultipartError::invalid_boundary("boundary is empty"));
    ensure!(
        boundary.len() <= MAX_BOUNDARY_LEN,
        MultipartError::invalid_boundary(format!("boundary is longer than {MAX_BOUNDARY_LEN} bytes"))
    );
    ensure!(
        boundary.bytes().all(|b| b != b'\r' && b != b'\n'),
        MultipartError::invalid_boundary("boundary contains CR or LF")
    );
    Ok(())
}

/// First occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Length of the longest proper prefix of `needle` that is a suffix of
/// `haystack`. Those bytes cannot be forwarded yet: the next chunk may
/// complete the delimiter.
fn suffix_overlap(haystack: &[u8], needle: &[u8]) -> usize {
    let max = haystack.len().min(needle.len() - 1);
    (1..=max).rev().find(|&k| haystack[haystack.len() - k..] == needle[..k]).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header;

    const MESSAGE: &[u8] = b"--bound\r\n\
        Content-Disposition: form-data; name=\"a\"\r\n\
        \r\n\
        hello\r\n\
        --bound\r\n\
        Content-Type: application/octet-stream\r\n\
        \r\n\
        \x00\x01\x02\r\n\
        --bound--";

    fn collect(input: &[u8], chunk_size: usize) -> Result<Vec<MimeEvent>, MultipartError> {
        let mut decoder = EventDecoder::new("bound").unwrap();
        let mut buf = BytesMut::new();
        let mut events = Vec::new();

        for chunk in input.chunks(chunk_size) {
            buf.extend_from_slice(chunk);
            while let Some(event) = decoder.decode(&mut buf)? {
                events.push(event);
            }
        }
        decoder.finish()?;
        Ok(events)
    }

    /// Merge adjacent content fragments so event sequences can be compared
    /// across chunkings.
    fn coalesce(events: Vec<MimeEvent>) -> Vec<MimeEvent> {
        let mut merged: Vec<MimeEvent> = Vec::new();
        for event in events {
            match (merged.last_mut(), event) {
                (Some(MimeEvent::Content(acc)), MimeEvent::Content(next)) => {
                    let mut joined = BytesMut::from(&acc[..]);
                    joined.extend_from_slice(&next);
                    *acc = joined.freeze();
                }
                (_, event) => merged.push(event),
            }
        }
        merged
    }

    #[test]
    fn two_part_message() {
        let events = coalesce(collect(MESSAGE, MESSAGE.len()).unwrap());

        assert_eq!(
            events,
            vec![
                MimeEvent::StartMessage,
                MimeEvent::StartPart,
                MimeEvent::Header(header::CONTENT_DISPOSITION, "form-data; name=\"a\"".parse().unwrap()),
                MimeEvent::EndHeaders,
                MimeEvent::Content(Bytes::from_static(b"hello")),
                MimeEvent::EndPart,
                MimeEvent::StartPart,
                MimeEvent::Header(header::CONTENT_TYPE, "application/octet-stream".parse().unwrap()),
                MimeEvent::EndHeaders,
                MimeEvent::Content(Bytes::from_static(b"\x00\x01\x02")),
                MimeEvent::EndPart,
                MimeEvent::EndMessage,
            ]
        );
    }

    #[test]
    fn chunk_size_independence() {
        let whole = coalesce(collect(MESSAGE, MESSAGE.len()).unwrap());
        for chunk_size in [1, 2, 3, 7, 16] {
            let chunked = coalesce(collect(MESSAGE, chunk_size).unwrap());
            assert_eq!(whole, chunked, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn boundary_like_bytes_inside_content() {
        let input = b"--bound\r\n\r\nbefore --bound not at line start\r\nand --bound-ish\r\n--bound--";
        let events = coalesce(collect(input, 1).unwrap());

        assert_eq!(
            events,
            vec![
                MimeEvent::StartMessage,
                MimeEvent::StartPart,
                MimeEvent::EndHeaders,
                MimeEvent::Content(Bytes::from_static(b"before --bound not at line start\r\nand --bound-ish")),
                MimeEvent::EndPart,
                MimeEvent::EndMessage,
            ]
        );
    }

    #[test]
    fn zero_parts() {
        let events = collect(b"--bound--", 1).unwrap();
        assert_eq!(events, vec![MimeEvent::StartMessage, MimeEvent::EndMessage]);
    }

    #[test]
    fn zero_length_part() {
        let input = b"--bound\r\nX-Empty: yes\r\n\r\n\r\n--bound--";
        let events = coalesce(collect(input, 4).unwrap());

        assert_eq!(
            events,
            vec![
                MimeEvent::StartMessage,
                MimeEvent::StartPart,
                MimeEvent::Header("x-empty".parse().unwrap(), "yes".parse().unwrap()),
                MimeEvent::EndHeaders,
                MimeEvent::EndPart,
                MimeEvent::EndMessage,
            ]
        );
    }

    #[test]
    fn preamble_is_skipped() {
        let input = b"this text precedes the first boundary\r\n--bound\r\n\r\nx\r\n--bound--";
        let events = coalesce(collect(input, 5).unwrap());

        assert_eq!(
            events,
            vec![
                MimeEvent::StartMessage,
                MimeEvent::StartPart,
                MimeEvent::EndHeaders,
                MimeEvent::Content(Bytes::from_static(b"x")),
                MimeEvent::EndPart,
                MimeEvent::EndMessage,
            ]
        );
    }

    #[test]
    fn epilogue_is_ignored() {
        let input = b"--bound\r\n\r\nx\r\n--bound--\r\ntrailing epilogue";
        let events = coalesce(collect(input, input.len()).unwrap());
        assert_eq!(events.last(), Some(&MimeEvent::EndMessage));
    }

    #[test]
    fn invalid_boundary_suffix() {
        let mut decoder = EventDecoder::new("bound").unwrap();
        let mut buf = BytesMut::from(&b"--boundXY"[..]);

        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(MimeEvent::StartMessage));
        let result = decoder.decode(&mut buf);
        assert!(matches!(result, Err(MultipartError::InvalidDelimiter { .. })));
    }

    #[test]
    fn truncated_message_fails_on_finish() {
        let mut decoder = EventDecoder::new("bound").unwrap();
        let mut buf = BytesMut::from(&b"--bound\r\n\r\npartial content"[..]);

        while decoder.decode(&mut buf).unwrap().is_some() {}
        assert!(matches!(decoder.finish(), Err(MultipartError::UnexpectedEnd { .. })));
    }

    #[test]
    fn preamble_lookahead_is_bounded() {
        let mut decoder = EventDecoder::new("bound").unwrap();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&vec![b'x'; MAX_PREAMBLE_BYTES + 1]);

        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(MimeEvent::StartMessage));
        let result = decoder.decode(&mut buf);
        assert!(matches!(result, Err(MultipartError::BoundaryNotFound { .. })));
    }

    #[test]
    fn boundary_validation() {
        assert!(matches!(EventDecoder::new(""), Err(MultipartError::InvalidBoundary { .. })));
        assert!(matches!(EventDecoder::new(&"b".repeat(71)), Err(MultipartError::InvalidBoundary { .. })));
        assert!(matches!(EventDecoder::new("has\r\nnewline"), Err(MultipartError::InvalidBoundary { .. })));
    }

    #[test]
    fn wants_content_tracks_body_state() {
        let mut decoder = EventDecoder::new("bound").unwrap();
        let mut buf = BytesMut::from(&b"--bound\r\n\r\n"[..]);

        assert!(!decoder.wants_content());
        while decoder.decode(&mut buf).unwrap().is_some() {}
        assert!(decoder.wants_content());
    }
}
