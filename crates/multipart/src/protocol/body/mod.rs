//! Per-part content channel.
//!
//! One [`ContentSlot`] backs each open part while it is being decoded.
//! The slot is the backpressure boundary between the parser and the part's
//! consumer: it buffers at most one fragment, so a slow consumer leaves the
//! parser's content-data request unresolved instead of growing a queue.

mod part_body;

pub(crate) use part_body::ContentSlot;
