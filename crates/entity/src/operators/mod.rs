//! The standard operator set.
//!
//! One implementation per logical conversion: raw bytes, charset-aware
//! text, JSON values, and the stream-arity multipart bridge. The
//! `default_readers`/`default_writers` constructors build fresh registries
//! holding them — callers inject those (or children of them) into an
//! [`EntityContext`](crate::EntityContext); nothing here is a process-wide
//! singleton.

use std::sync::Arc;

use crate::operator::{ReadOperator, WriteOperator};
use crate::registry::OperatorRegistry;

mod bytes;
mod json;
mod multipart;
mod text;

pub use bytes::{BytesReader, BytesWriter};
pub use json::{JsonValueReader, JsonValueWriter};
pub use multipart::{MultipartReader, MultipartWriter};
pub use text::{StringReader, StringWriter};

/// A registry holding the standard readers.
pub fn default_readers() -> Arc<OperatorRegistry<ReadOperator>> {
    let registry = OperatorRegistry::root();
    registry.register_last(bytes::predicate, ReadOperator::Single(Arc::new(BytesReader)));
    registry.register_last(text::predicate, ReadOperator::Single(Arc::new(StringReader)));
    registry.register_last(json::predicate, ReadOperator::Single(Arc::new(JsonValueReader)));
    registry.register_last(multipart::predicate, ReadOperator::Stream(Arc::new(MultipartReader)));
    registry
}

/// A registry holding the standard writers.
pub fn default_writers() -> Arc<OperatorRegistry<WriteOperator>> {
    let registry = OperatorRegistry::root();
    registry.register_last(bytes::predicate, WriteOperator::Single(Arc::new(BytesWriter)));
    registry.register_last(text::predicate, WriteOperator::Single(Arc::new(StringWriter)));
    registry.register_last(json::predicate, WriteOperator::Single(Arc::new(JsonValueWriter)));
    registry.register_last(multipart::predicate, WriteOperator::Stream(Arc::new(MultipartWriter)));
    registry
}
