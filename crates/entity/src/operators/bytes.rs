use async_trait::async_trait;
use bytes::Bytes;
use std::any::TypeId;

use partflow_multipart::protocol::PartContent;

use crate::context::EntityContext;
use crate::error::EntityError;
use crate::operator::{AnyValue, EntityReader, EntityWriter};
use crate::registry::{OperatorMatch, OperatorRequest};

/// Identity conversions for raw [`Bytes`], any media type.
pub(crate) fn predicate(request: &OperatorRequest<'_>) -> OperatorMatch {
    if request.type_id == TypeId::of::<Bytes>() { OperatorMatch::Supported } else { OperatorMatch::NotSupported }
}

#[derive(Debug)]
pub struct BytesReader;

#[async_trait]
impl EntityReader for BytesReader {
    async fn read(&self, _ctx: &EntityContext, content: PartContent) -> Result<AnyValue, EntityError> {
        let bytes = content.bytes().await?;
        Ok(Box::new(bytes))
    }
}

#[derive(Debug)]
pub struct BytesWriter;

#[async_trait]
impl EntityWriter for BytesWriter {
    async fn write(&self, _ctx: &EntityContext, value: AnyValue) -> Result<PartContent, EntityError> {
        let bytes = value
            .downcast::<Bytes>()
            .map_err(|_| EntityError::invalid_value("bytes writer received a non-bytes value"))?;
        Ok(PartContent::full(*bytes))
    }
}
