use async_trait::async_trait;
use bytes::Bytes;
use std::any::TypeId;

use partflow_multipart::protocol::PartContent;

use crate::context::EntityContext;
use crate::error::EntityError;
use crate::operator::{AnyValue, EntityReader, EntityWriter};
use crate::registry::{OperatorMatch, OperatorRequest};

/// [`String`] conversions: exact for `text/*` media types, compatible
/// with anything else.
pub(crate) fn predicate(request: &OperatorRequest<'_>) -> OperatorMatch {
    if request.type_id != TypeId::of::<String>() {
        return OperatorMatch::NotSupported;
    }
    match request.media_type {
        Some(media_type) if media_type.type_() == mime::TEXT => OperatorMatch::Supported,
        _ => OperatorMatch::Compatible,
    }
}

/// Decodes the content with the context's resolved character set.
#[derive(Debug)]
pub struct StringReader;

#[async_trait]
impl EntityReader for StringReader {
    async fn read(&self, ctx: &EntityContext, content: PartContent) -> Result<AnyValue, EntityError> {
        let charset = ctx.charset()?;
        let bytes = content.bytes().await?;
        let text = charset.decode(&bytes)?;
        Ok(Box::new(text))
    }
}

#[derive(Debug)]
pub struct StringWriter;

#[async_trait]
impl EntityWriter for StringWriter {
    async fn write(&self, _ctx: &EntityContext, value: AnyValue) -> Result<PartContent, EntityError> {
        let text = value
            .downcast::<String>()
            .map_err(|_| EntityError::invalid_value("string writer received a non-string value"))?;
        Ok(PartContent::full(Bytes::from(*text)))
    }
}
