use std::any;
use thiserror::Error;

use partflow_multipart::protocol::{EncodeError, MultipartError};

/// Errors raised while resolving or running a conversion.
#[derive(Error, Debug)]
pub enum EntityError {
    #[error("no reader supports the requested type {type_name}")]
    NoReader { type_name: &'static str },

    #[error("no writer supports the requested type {type_name}")]
    NoWriter { type_name: &'static str },

    #[error("filter registration is closed once the chain has been applied")]
    FiltersFrozen,

    #[error("unsupported charset: {name}")]
    UnsupportedCharset { name: String },

    #[error("invalid value: {reason}")]
    InvalidValue { reason: String },

    #[error("json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("decode error: {source}")]
    Decode {
        #[from]
        source: MultipartError,
    },

    #[error("encode error: {source}")]
    Encode {
        #[from]
        source: EncodeError,
    },
}

impl EntityError {
    pub fn no_reader<T>() -> Self {
        Self::NoReader { type_name: any::type_name::<T>() }
    }

    pub fn no_writer<T>() -> Self {
        Self::NoWriter { type_name: any::type_name::<T>() }
    }

    pub fn invalid_value<S: ToString>(str: S) -> Self {
        Self::InvalidValue { reason: str.to_string() }
    }

    pub fn unsupported_charset<S: ToString>(name: S) -> Self {
        Self::UnsupportedCharset { name: name.to_string() }
    }
}
