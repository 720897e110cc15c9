//! Multipart codec module for encoding and decoding multipart messages
//!
//! This module provides the byte-level building blocks of the pipeline.
//! All of them follow the `tokio_util::codec` traits so they compose the
//! same way on both directions of the wire.
//!
//! # Architecture
//!
//! - Decode side:
//!   - [`EventDecoder`]: the MIME state machine, one structural event per call
//!   - Part header parsing via the [`header`] module
//!
//! - Encode side:
//!   - [`FrameEncoder`]: boundary framing, header lines and content bytes
//!
//! # Example
//!
//! ```no_run
//! use partflow_multipart::codec::EventDecoder;
//! use tokio_util::codec::Decoder;
//! use bytes::BytesMut;
//!
//! let mut decoder = EventDecoder::new("boundary").unwrap();
//! let mut buffer = BytesMut::new();
//! // ... append multipart data to buffer ...
//! let event = decoder.decode(&mut buffer);
//! ```

pub mod header;

mod event_decoder;
mod frame_encoder;

pub use event_decoder::EventDecoder;
pub(crate) use event_decoder::validate_boundary;
pub use frame_encoder::{FrameEncoder, FrameItem};
