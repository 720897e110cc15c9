//! Frame encoder for multipart messages.
//!
//! Produces the exact boundary framing the decoder consumes: a boundary
//! line per part, the part's header lines in insertion order, a blank
//! separator line, the raw content bytes, and the close delimiter
//! `--boundary--` at the end. Between a part's content and the following
//! boundary line sits one CRLF, which is also the delimiter prefix the
//! decoder matches on.

use bytes::{Buf, BytesMut};
use http::HeaderMap;
use tokio_util::codec::Encoder;
use tracing::error;

use crate::protocol::EncodeError;

/// One unit of encoder input.
#[derive(Debug)]
pub enum FrameItem<D: Buf> {
    /// Opens a new part: boundary line plus header block
    PartHead(HeaderMap),
    /// One fragment of the open part's content
    Content(D),
    /// Closes the message with the final delimiter
    Eof,
}

/// An encoder writing multipart framing into an output buffer.
///
/// Single-use: once `Eof` has been encoded, further items are rejected.
#[derive(Debug)]
pub struct FrameEncoder {
    boundary: String,
    parts_written: usize,
    finished: bool,
}

impl FrameEncoder {
    pub fn new(boundary: impl Into<String>) -> Self {
        Self { boundary: boundary.into(), parts_written: 0, finished: false }
    }

    /// True once the close delimiter has been written.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn write_boundary_line(&self, dst: &mut BytesMut) {
        if self.parts_written > 0 {
            dst.extend_from_slice(b"\r\n");
        }
        dst.extend_from_slice(b"--");
        dst.extend_from_slice(self.boundary.as_bytes());
    }
}

impl<D: Buf> Encoder<FrameItem<D>> for FrameEncoder {
    type Error = EncodeError;

    fn encode(&mut self, item: FrameItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.finished {
            error!("frame encoder received item after the close delimiter");
            return Err(EncodeError::invalid_part("message already closed"));
        }

        match item {
            FrameItem::PartHead(headers) => {
                self.write_boundary_line(dst);
                dst.extend_from_slice(b"\r\n");
                for (name, value) in &headers {
                    dst.extend_from_slice(name.as_str().as_bytes());
                    dst.extend_from_slice(b":");
                    dst.extend_from_slice(value.as_bytes());
                    dst.extend_from_slice(b"\r\n");
                }
                dst.extend_from_slice(b"\r\n");
                self.parts_written += 1;
                Ok(())
            }

            FrameItem::Content(mut bytes) => {
                if self.parts_written == 0 {
                    error!("content fragment before any part head");
                    return Err(EncodeError::invalid_part("content before part head"));
                }
                dst.reserve(bytes.remaining());
                while bytes.has_remaining() {
                    let chunk = bytes.chunk();
                    dst.extend_from_slice(chunk);
                    let len = chunk.len();
                    bytes.advance(len);
                }
                Ok(())
            }

            FrameItem::Eof => {
                self.write_boundary_line(dst);
                dst.extend_from_slice(b"--");
                self.finished = true;
                Ok(())
            }
        }
    }
}
