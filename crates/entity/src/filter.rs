//! Content filter chain.
//!
//! Filters wrap or replace a content stream before a reader runs (or after
//! a writer runs). They apply in registration order, and the chain closes
//! to new registrations the moment it is first applied.

use arc_swap::ArcSwap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

use partflow_multipart::protocol::PartContent;

use crate::context::EntityContext;
use crate::error::EntityError;

/// A transformation over a part's byte stream.
pub trait ContentFilter: Send + Sync {
    /// Returns the replacement stream, or `None` to leave the current one
    /// untouched. Take the current stream out of `content` (for wrapping)
    /// with `std::mem::replace` when building a replacement from it.
    fn apply(&self, ctx: &EntityContext, content: &mut PartContent) -> Option<PartContent>;
}

/// An ordered chain of content filters.
pub struct FilterChain {
    filters: ArcSwap<Vec<Arc<dyn ContentFilter>>>,
    frozen: AtomicBool,
}

impl FilterChain {
    pub fn new() -> Self {
        Self { filters: ArcSwap::from_pointee(Vec::new()), frozen: AtomicBool::new(false) }
    }

    /// Appends a filter to the chain.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::FiltersFrozen`] once the chain has been
    /// applied for the first time.
    pub fn register(&self, filter: Arc<dyn ContentFilter>) -> Result<(), EntityError> {
        if self.frozen.load(Ordering::Acquire) {
            return Err(EntityError::FiltersFrozen);
        }
        self.filters.rcu(|current| {
            let mut filters = Vec::with_capacity(current.len() + 1);
            filters.extend(current.iter().map(Arc::clone));
            filters.push(Arc::clone(&filter));
            filters
        });
        Ok(())
    }

    /// Runs the chain over a content stream, in registration order.
    ///
    /// The first application freezes registration for good.
    pub fn apply(&self, ctx: &EntityContext, mut content: PartContent) -> PartContent {
        self.frozen.store(true, Ordering::Release);

        let snapshot = self.filters.load();
        trace!(filter_count = snapshot.len(), "applying content filter chain");
        for filter in snapshot.iter() {
            if let Some(replacement) = filter.apply(ctx, &mut content) {
                content = replacement;
            }
        }
        content
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.filters.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain").field("len", &self.len()).field("frozen", &self.is_frozen()).finish()
    }
}
