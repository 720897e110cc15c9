use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::any::TypeId;

use partflow_multipart::protocol::PartContent;

use crate::context::EntityContext;
use crate::error::EntityError;
use crate::operator::{AnyValue, EntityReader, EntityWriter};
use crate::registry::{OperatorMatch, OperatorRequest};

/// [`serde_json::Value`] conversions: exact for `application/json`,
/// compatible with any other media type.
pub(crate) fn predicate(request: &OperatorRequest<'_>) -> OperatorMatch {
    if request.type_id != TypeId::of::<Value>() {
        return OperatorMatch::NotSupported;
    }
    match request.media_type {
        Some(media_type) if media_type.type_() == mime::APPLICATION && media_type.subtype() == mime::JSON => {
            OperatorMatch::Supported
        }
        _ => OperatorMatch::Compatible,
    }
}

#[derive(Debug)]
pub struct JsonValueReader;

#[async_trait]
impl EntityReader for JsonValueReader {
    async fn read(&self, _ctx: &EntityContext, content: PartContent) -> Result<AnyValue, EntityError> {
        let bytes = content.bytes().await?;
        let value: Value = serde_json::from_slice(&bytes)?;
        Ok(Box::new(value))
    }
}

#[derive(Debug)]
pub struct JsonValueWriter;

#[async_trait]
impl EntityWriter for JsonValueWriter {
    async fn write(&self, _ctx: &EntityContext, value: AnyValue) -> Result<PartContent, EntityError> {
        let value = value
            .downcast::<Value>()
            .map_err(|_| EntityError::invalid_value("json writer received a non-json value"))?;
        let encoded = serde_json::to_vec(&*value)?;
        Ok(PartContent::full(Bytes::from(encoded)))
    }
}
