//! Part header block decoder.
//!
//! Parses the header block that follows a part's boundary line: zero or
//! more `Name:value` lines terminated by an empty line. Parsing is
//! zero-copy where it can be: `httparse` validates the block in place,
//! byte ranges of each name and value are recorded, and the values are
//! sliced out of the frozen block without copying.
//!
//! # Limits
//!
//! - Maximum number of headers per part: 64
//! - Maximum header block size: 8KB

use bytes::BytesMut;
use http::{HeaderName, HeaderValue};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::MultipartError;

/// Maximum number of headers allowed in one part
pub(crate) const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for one part's header block
pub(crate) const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Decoder for one part's header block implementing the [`Decoder`] trait.
///
/// Yields the headers as an ordered list of name/value pairs so the caller
/// can replay them one event at a time.
#[derive(Debug)]
pub struct PartHeaderDecoder;

impl Decoder for PartHeaderDecoder {
    type Item = Vec<(HeaderName, HeaderValue)>;
    type Error = MultipartError;

    /// Attempts to decode a complete header block from the buffer.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(headers))` if the terminating empty line was found
    /// - `Ok(None)` if more data is needed
    /// - `Err(MultipartError)` if the block is malformed or exceeds limits
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];

        let parsed_result = httparse::parse_headers(src, &mut headers).map_err(|e| match e {
            httparse::Error::TooManyHeaders => MultipartError::too_many_headers(MAX_HEADER_NUM),
            e => MultipartError::invalid_header(e.to_string()),
        });

        match parsed_result? {
            Status::Complete((block_len, parsed)) => {
                trace!(block_len, header_count = parsed.len(), "parsed part header block");
                ensure!(block_len <= MAX_HEADER_BYTES, MultipartError::too_large_header(block_len, MAX_HEADER_BYTES));

                let header_count = parsed.len();
                ensure!(header_count <= MAX_HEADER_NUM, MultipartError::too_many_headers(header_count));

                // Record byte ranges before the buffer is split away
                let mut header_index: [HeaderIndex; MAX_HEADER_NUM] = EMPTY_HEADER_INDEX_ARRAY;
                HeaderIndex::record(src, parsed, &mut header_index);

                let block = src.split_to(block_len).freeze();

                let mut result = Vec::with_capacity(header_count);
                for index in &header_index[..header_count] {
                    let name = HeaderName::from_bytes(&block[index.name.0..index.name.1])
                        .map_err(MultipartError::invalid_header)?;

                    // Safe to use from_maybe_shared_unchecked since httparse verified
                    // header value contains only visible ASCII chars
                    let value =
                        unsafe { HeaderValue::from_maybe_shared_unchecked(block.slice(index.value.0..index.value.1)) };

                    result.push((name, value));
                }

                Ok(Some(result))
            }
            Status::Partial => {
                ensure!(src.len() <= MAX_HEADER_BYTES, MultipartError::too_large_header(src.len(), MAX_HEADER_BYTES));
                Ok(None)
            }
        }
    }
}

/// Stores the byte range positions of a header's name and value within the
/// original buffer, so values can be sliced out of the frozen block without
/// copying.
#[derive(Clone, Copy)]
struct HeaderIndex {
    name: (usize, usize),
    value: (usize, usize),
}

const EMPTY_HEADER_INDEX: HeaderIndex = HeaderIndex { name: (0, 0), value: (0, 0) };

const EMPTY_HEADER_INDEX_ARRAY: [HeaderIndex; MAX_HEADER_NUM] = [EMPTY_HEADER_INDEX; MAX_HEADER_NUM];

impl HeaderIndex {
    fn record(bytes: &[u8], headers: &[httparse::Header<'_>], indices: &mut [HeaderIndex]) {
        let bytes_ptr = bytes.as_ptr() as usize;
        for (header, indices) in headers.iter().zip(indices.iter_mut()) {
            let name_start = header.name.as_ptr() as usize - bytes_ptr;
            let name_end = name_start + header.name.len();
            indices.name = (name_start, name_end);
            let value_start = header.value.as_ptr() as usize - bytes_ptr;
            let value_end = value_start + header.value.len();
            indices.value = (value_start, value_end);
        }
    }
}
