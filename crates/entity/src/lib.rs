//! Entity conversion layer for the partflow body pipeline
//!
//! This crate sits between typed application values and the raw byte
//! streams of `partflow-multipart`. It provides:
//!
//! - a hierarchical, predicate-based [`OperatorRegistry`] selecting the
//!   converter for a requested type with a three-valued match
//!   (not supported / compatible / exact)
//! - an [`EntityContext`] resolving the effective media type and character
//!   set for a stream and dispatching conversions through the registries
//! - a [`FilterChain`] applying stream transformations around conversions
//! - the standard [`operators`]: bytes, charset-aware text, JSON values and
//!   the stream-arity multipart bridge
//!
//! Contexts are explicit values built per operation: application-wide
//! defaults live in a root registry, request-scoped overrides in child
//! registries that delegate to it.

mod context;
mod error;
mod filter;
mod operator;
mod registry;

pub mod operators;

pub use context::Charset;
pub use context::EntityContext;
pub use context::EntityContextBuilder;
pub use error::EntityError;
pub use filter::ContentFilter;
pub use filter::FilterChain;
pub use operator::AnyValue;
pub use operator::EntityReader;
pub use operator::EntityWriter;
pub use operator::PartsReader;
pub use operator::PartsWriter;
pub use operator::ReadOperator;
pub use operator::WriteOperator;
pub use registry::OperatorEntry;
pub use registry::OperatorMatch;
pub use registry::OperatorRegistry;
pub use registry::OperatorRequest;
