//! Core multipart protocol abstractions.
//!
//! This module provides the building blocks shared by the codec and the
//! streaming pipeline:
//!
//! - **Events** ([`event`]): [`MimeEvent`], the structural event stream the
//!   state machine produces
//! - **Parts** ([`part`]): [`Part`] and [`PartContent`], the headered
//!   sub-payload and its lazily consumed content
//! - **Content channel** ([`body`]): the bounded per-part slot coupling
//!   parser progress to consumer demand
//! - **Errors** ([`error`]): [`MultipartError`] for the decode side and
//!   [`EncodeError`] for the encode side

mod event;
pub use event::MimeEvent;

mod part;
pub use part::Part;
pub use part::PartContent;
pub use part::boundary_param;

mod error;
pub use error::EncodeError;
pub use error::MultipartError;

pub(crate) mod body;
