//! A streaming multipart codec with per-part backpressure
//!
//! This crate decodes and encodes the `multipart/form-data` subset of MIME
//! as lazy, pull-based streams. It focuses on bounded memory use: at any
//! point the pipeline holds at most one source chunk plus one pending
//! content fragment of the open part, regardless of message size.
//!
//! # Features
//!
//! - Byte-level MIME state machine emitting one structural event at a time
//! - Parts surfaced as soon as their headers are complete, content lazy
//! - Demand propagated from both the part sequence and the open part's
//!   content down to the byte source
//! - Exact round-trip framing: `decode(b, encode(b, parts))` preserves
//!   header pairs, header order and content bytes
//! - Chunk-size independent parsing
//! - Clean error handling with a fatal-framing-error model
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use futures::{StreamExt, stream};
//! use http::{HeaderMap, HeaderValue, header};
//! use partflow_multipart::protocol::Part;
//! use partflow_multipart::{decode, encode};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut headers = HeaderMap::new();
//!     headers.insert(
//!         header::CONTENT_DISPOSITION,
//!         HeaderValue::from_static("form-data; name=\"greeting\""),
//!     );
//!     let part = Part::from_bytes(headers, Bytes::from_static(b"hello"));
//!
//!     // encode a part sequence into a framed byte stream
//!     let encoded = encode("boundary", stream::iter(vec![part]));
//!
//!     // and decode it back into parts
//!     let mut parts = decode("boundary", encoded);
//!     while let Some(part) = parts.next().await {
//!         let part = part.expect("framing is valid");
//!         println!("{:?}: {:?}", part.name(), part.into_bytes().await);
//!     }
//! }
//! ```
//!
//! # Backpressure model
//!
//! Both [`decode`] and [`encode`] are one-shot over their input and track
//! two demand levels independently: the next part, and the next content
//! fragment of the in-flight part. The decoder requests one source chunk
//! per unresolved data request of the state machine; the encoder fully
//! drains each part before pulling the next one.

pub mod codec;
pub mod protocol;

mod decode;
mod encode;
mod utils;

pub use decode::MultipartStream;
pub use decode::decode;
pub use encode::EncodeStream;
pub use encode::encode;

pub(crate) use utils::ensure;
