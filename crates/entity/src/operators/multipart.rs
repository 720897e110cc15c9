use futures::StreamExt;
use futures::stream::BoxStream;
use std::any::TypeId;

use partflow_multipart::protocol::{MultipartError, Part, PartContent};
use partflow_multipart::{decode, encode};

use crate::context::EntityContext;
use crate::error::EntityError;
use crate::operator::{PartsReader, PartsWriter};
use crate::registry::{OperatorMatch, OperatorRequest};

/// Stream-arity conversions for [`Part`] sequences: exact for `multipart/*`
/// media types. The boundary comes from the context's media type; its
/// absence surfaces as a setup error before any byte moves.
pub(crate) fn predicate(request: &OperatorRequest<'_>) -> OperatorMatch {
    if request.type_id != TypeId::of::<Part>() {
        return OperatorMatch::NotSupported;
    }
    match request.media_type {
        Some(media_type) if media_type.type_() == mime::MULTIPART => OperatorMatch::Supported,
        _ => OperatorMatch::Compatible,
    }
}

#[derive(Debug)]
pub struct MultipartReader;

impl PartsReader for MultipartReader {
    fn read_parts(
        &self,
        ctx: &EntityContext,
        content: PartContent,
    ) -> Result<BoxStream<'static, Result<Part, MultipartError>>, EntityError> {
        let boundary = ctx.boundary()?;
        Ok(decode(&boundary, content).boxed())
    }
}

#[derive(Debug)]
pub struct MultipartWriter;

impl PartsWriter for MultipartWriter {
    fn write_parts(&self, ctx: &EntityContext, parts: BoxStream<'static, Part>) -> Result<PartContent, EntityError> {
        let boundary = ctx.boundary()?;
        let encoded = encode(&boundary, parts);
        Ok(PartContent::stream(encoded.map(|fragment| fragment.map_err(MultipartError::from))))
    }
}
