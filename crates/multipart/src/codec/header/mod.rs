//! Part header block parsing.

mod part_header_decoder;

pub use part_header_decoder::PartHeaderDecoder;
