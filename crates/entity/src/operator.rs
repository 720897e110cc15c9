//! Conversion operator capability sets.
//!
//! Operators come in two arities crossed with two directions: a reader
//! turns bytes into a value, a writer turns a value into bytes, and each
//! exists in a single-value and a part-stream flavor. The arity is a
//! tagged variant ([`ReadOperator`] / [`WriteOperator`]) rather than a
//! separate interface family per combination.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use partflow_multipart::protocol::{MultipartError, Part, PartContent};

use crate::context::EntityContext;
use crate::error::EntityError;

/// A type-erased application value moving through the pipeline.
pub type AnyValue = Box<dyn Any + Send>;

/// Converts one byte stream into one application value.
#[async_trait]
pub trait EntityReader: Send + Sync {
    async fn read(&self, ctx: &EntityContext, content: PartContent) -> Result<AnyValue, EntityError>;
}

/// Converts one application value into one byte stream.
#[async_trait]
pub trait EntityWriter: Send + Sync {
    async fn write(&self, ctx: &EntityContext, value: AnyValue) -> Result<PartContent, EntityError>;
}

/// Converts a byte stream into a lazy sequence of parts.
pub trait PartsReader: Send + Sync {
    fn read_parts(
        &self,
        ctx: &EntityContext,
        content: PartContent,
    ) -> Result<BoxStream<'static, Result<Part, MultipartError>>, EntityError>;
}

/// Converts a sequence of parts into a byte stream.
pub trait PartsWriter: Send + Sync {
    fn write_parts(&self, ctx: &EntityContext, parts: BoxStream<'static, Part>) -> Result<PartContent, EntityError>;
}

/// A from-bytes operator of either arity.
#[derive(Clone)]
pub enum ReadOperator {
    Single(Arc<dyn EntityReader>),
    Stream(Arc<dyn PartsReader>),
}

/// A to-bytes operator of either arity.
#[derive(Clone)]
pub enum WriteOperator {
    Single(Arc<dyn EntityWriter>),
    Stream(Arc<dyn PartsWriter>),
}

impl ReadOperator {
    pub fn as_single(&self) -> Option<&Arc<dyn EntityReader>> {
        match self {
            ReadOperator::Single(reader) => Some(reader),
            ReadOperator::Stream(_) => None,
        }
    }

    pub fn as_stream(&self) -> Option<&Arc<dyn PartsReader>> {
        match self {
            ReadOperator::Single(_) => None,
            ReadOperator::Stream(reader) => Some(reader),
        }
    }
}

impl WriteOperator {
    pub fn as_single(&self) -> Option<&Arc<dyn EntityWriter>> {
        match self {
            WriteOperator::Single(writer) => Some(writer),
            WriteOperator::Stream(_) => None,
        }
    }

    pub fn as_stream(&self) -> Option<&Arc<dyn PartsWriter>> {
        match self {
            WriteOperator::Single(_) => None,
            WriteOperator::Stream(writer) => Some(writer),
        }
    }
}

impl fmt::Debug for ReadOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadOperator::Single(_) => f.write_str("ReadOperator::Single"),
            ReadOperator::Stream(_) => f.write_str("ReadOperator::Stream"),
        }
    }
}

impl fmt::Debug for WriteOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOperator::Single(_) => f.write_str("WriteOperator::Single"),
            WriteOperator::Stream(_) => f.write_str("WriteOperator::Stream"),
        }
    }
}
