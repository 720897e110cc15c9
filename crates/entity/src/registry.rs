//! Hierarchical, predicate-based operator lookup.
//!
//! Registries hold `(predicate, operator)` entries and form a parent chain:
//! an application-wide registry carries the defaults, request-scoped child
//! registries layer overrides on top. Lookup walks the local entries before
//! the parent's, first `Supported` match wins, and the first `Compatible`
//! match anywhere in the chain is the fallback.
//!
//! Entries live in copy-on-write snapshots (`arc-swap`): readers are
//! lock-free and never block each other, a registration swaps in a new
//! snapshot atomically, and iteration works on an owned snapshot that is
//! released when dropped. Because a child references its parent rather than
//! copying it, registrations on the parent stay visible to existing
//! children.

use arc_swap::ArcSwap;
use mime::Mime;
use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

/// Three-valued outcome of matching an entry against a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorMatch {
    NotSupported,
    /// Usable, but keep looking for an exact match
    Compatible,
    /// Exact match; search stops here
    Supported,
}

/// What a predicate gets to see: the requested Rust type and the
/// media-type context of the stream being converted.
#[derive(Debug, Clone, Copy)]
pub struct OperatorRequest<'a> {
    pub type_id: TypeId,
    pub media_type: Option<&'a Mime>,
}

impl<'a> OperatorRequest<'a> {
    pub fn of<T: 'static>(media_type: Option<&'a Mime>) -> Self {
        Self { type_id: TypeId::of::<T>(), media_type }
    }
}

/// One registered operator with its match predicate.
pub struct OperatorEntry<Op> {
    predicate: Box<dyn Fn(&OperatorRequest<'_>) -> OperatorMatch + Send + Sync>,
    operator: Op,
}

impl<Op> OperatorEntry<Op> {
    pub fn matches(&self, request: &OperatorRequest<'_>) -> OperatorMatch {
        (self.predicate)(request)
    }

    pub fn operator(&self) -> &Op {
        &self.operator
    }
}

impl<Op> fmt::Debug for OperatorEntry<Op> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorEntry").finish_non_exhaustive()
    }
}

/// A thread-safe registry of conversion operators.
///
/// Shared behind an `Arc`; registration takes `&self` and is safe to run
/// concurrently with any number of lookups.
pub struct OperatorRegistry<Op> {
    parent: Option<Arc<OperatorRegistry<Op>>>,
    entries: ArcSwap<Vec<Arc<OperatorEntry<Op>>>>,
}

impl<Op> OperatorRegistry<Op> {
    /// A registry with no parent.
    pub fn root() -> Arc<Self> {
        Arc::new(Self { parent: None, entries: ArcSwap::from_pointee(Vec::new()) })
    }

    /// A child registry whose lookups fall back to `parent`.
    pub fn with_parent(parent: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self { parent: Some(Arc::clone(parent)), entries: ArcSwap::from_pointee(Vec::new()) })
    }

    /// Registers an operator ahead of the existing local entries.
    pub fn register_first<P>(&self, predicate: P, operator: Op)
    where
        P: Fn(&OperatorRequest<'_>) -> OperatorMatch + Send + Sync + 'static,
    {
        self.insert(true, predicate, operator);
    }

    /// Registers an operator after the existing local entries.
    pub fn register_last<P>(&self, predicate: P, operator: Op)
    where
        P: Fn(&OperatorRequest<'_>) -> OperatorMatch + Send + Sync + 'static,
    {
        self.insert(false, predicate, operator);
    }

    fn insert<P>(&self, first: bool, predicate: P, operator: Op)
    where
        P: Fn(&OperatorRequest<'_>) -> OperatorMatch + Send + Sync + 'static,
    {
        let entry = Arc::new(OperatorEntry { predicate: Box::new(predicate), operator });
        self.entries.rcu(|current| {
            let mut entries = Vec::with_capacity(current.len() + 1);
            if first {
                entries.push(Arc::clone(&entry));
                entries.extend(current.iter().map(Arc::clone));
            } else {
                entries.extend(current.iter().map(Arc::clone));
                entries.push(Arc::clone(&entry));
            }
            entries
        });
    }

    /// Selects the operator for a request.
    ///
    /// Walks the local snapshot, then the parent chain. The first
    /// `Supported` entry wins immediately; failing that, the first
    /// `Compatible` entry seen anywhere is returned.
    pub fn select(&self, request: &OperatorRequest<'_>) -> Option<Arc<OperatorEntry<Op>>> {
        let mut compatible = None;
        let mut registry = Some(self);

        while let Some(current) = registry {
            let snapshot = current.entries.load();
            for entry in snapshot.iter() {
                match entry.matches(request) {
                    OperatorMatch::Supported => return Some(Arc::clone(entry)),
                    OperatorMatch::Compatible => {
                        if compatible.is_none() {
                            compatible = Some(Arc::clone(entry));
                        }
                    }
                    OperatorMatch::NotSupported => {}
                }
            }
            registry = current.parent.as_deref();
        }

        compatible
    }

    /// All entries in search order, local before parent, as an owned
    /// snapshot released when the iterator is dropped.
    pub fn iter(&self) -> impl Iterator<Item = Arc<OperatorEntry<Op>>> + use<Op> {
        let mut entries = Vec::new();
        let mut registry = Some(self);
        while let Some(current) = registry {
            let snapshot = current.entries.load();
            entries.extend(snapshot.iter().map(Arc::clone));
            registry = current.parent.as_deref();
        }
        entries.into_iter()
    }
}

impl<Op> fmt::Debug for OperatorRegistry<Op> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("local_entries", &self.entries.load().len())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn request() -> OperatorRequest<'static> {
        OperatorRequest::of::<String>(None)
    }

    fn supported(_request: &OperatorRequest<'_>) -> OperatorMatch {
        OperatorMatch::Supported
    }

    #[test]
    fn child_entries_shadow_the_parent() {
        let parent = OperatorRegistry::root();
        parent.register_last(supported, "A");

        let child = OperatorRegistry::with_parent(&parent);
        child.register_last(supported, "B");

        let selected = child.select(&request()).unwrap();
        assert_eq!(*selected.operator(), "B");
    }

    #[test]
    fn falls_back_to_the_parent() {
        let parent = OperatorRegistry::root();
        parent.register_last(supported, "A");

        let child: Arc<OperatorRegistry<&str>> = OperatorRegistry::with_parent(&parent);

        let selected = child.select(&request()).unwrap();
        assert_eq!(*selected.operator(), "A");
    }

    #[test]
    fn supported_beats_earlier_compatible() {
        let registry = OperatorRegistry::root();
        registry.register_last(|_req: &OperatorRequest<'_>| OperatorMatch::Compatible, "compat");
        registry.register_last(supported, "exact");

        let selected = registry.select(&request()).unwrap();
        assert_eq!(*selected.operator(), "exact");
    }

    #[test]
    fn first_compatible_wins_without_exact_match() {
        let registry = OperatorRegistry::root();
        registry.register_last(|_req: &OperatorRequest<'_>| OperatorMatch::Compatible, "first");
        registry.register_last(|_req: &OperatorRequest<'_>| OperatorMatch::Compatible, "second");

        let selected = registry.select(&request()).unwrap();
        assert_eq!(*selected.operator(), "first");
    }

    #[test]
    fn register_first_takes_precedence() {
        let registry = OperatorRegistry::root();
        registry.register_last(supported, "late");
        registry.register_first(supported, "early");

        let selected = registry.select(&request()).unwrap();
        assert_eq!(*selected.operator(), "early");
    }

    #[test]
    fn disabling_the_child_match_falls_back_to_the_parent() {
        let parent = OperatorRegistry::root();
        parent.register_last(supported, "A");

        let enabled = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&enabled);

        let child = OperatorRegistry::with_parent(&parent);
        child.register_last(
            move |_req: &OperatorRequest<'_>| {
                if flag.load(Ordering::Relaxed) { OperatorMatch::Supported } else { OperatorMatch::NotSupported }
            },
            "B",
        );

        assert_eq!(*child.select(&request()).unwrap().operator(), "B");

        enabled.store(false, Ordering::Relaxed);
        assert_eq!(*child.select(&request()).unwrap().operator(), "A");
    }

    #[test]
    fn parent_registrations_stay_visible_to_existing_children() {
        let parent: Arc<OperatorRegistry<&str>> = OperatorRegistry::root();
        let child = OperatorRegistry::with_parent(&parent);

        assert!(child.select(&request()).is_none());

        parent.register_last(supported, "late parent entry");
        assert_eq!(*child.select(&request()).unwrap().operator(), "late parent entry");
    }

    #[test]
    fn iteration_walks_local_before_parent() {
        let parent = OperatorRegistry::root();
        parent.register_last(supported, "parent");

        let child = OperatorRegistry::with_parent(&parent);
        child.register_last(supported, "child");

        let order: Vec<&str> = child.iter().map(|entry| *entry.operator()).collect();
        assert_eq!(order, vec!["child", "parent"]);
    }
}
