use bytes::Bytes;
use std::task::{Context, Poll, Waker};
use tracing::error;

use crate::protocol::MultipartError;

/// The bounded channel backing one part's content.
///
/// The slot buffers at most one pending fragment. While it is occupied the
/// decoder must not advance the parser past further content for this part,
/// which is what translates consumer backpressure into an unresolved
/// data request upstream. Exactly one terminal signal (complete or fail) is
/// recorded per slot.
pub(crate) struct ContentSlot {
    queued: Option<Bytes>,
    terminal: Option<Terminal>,
    reader: Option<Waker>,
    detached: bool,
}

enum Terminal {
    Complete,
    // the error is handed to the reader once, then the slot reads as closed
    Failed(Option<MultipartError>),
}

impl ContentSlot {
    pub(crate) fn new() -> Self {
        Self { queued: None, terminal: None, reader: None, detached: false }
    }

    /// True when a fragment can be accepted without overwriting one.
    pub(crate) fn has_capacity(&self) -> bool {
        self.queued.is_none() && self.terminal.is_none()
    }

    /// Queues one content fragment for the reader.
    ///
    /// Fragments arriving after the consumer dropped its half are discarded.
    pub(crate) fn submit(&mut self, bytes: Bytes) {
        if self.terminal.is_some() {
            error!("content fragment submitted after terminal signal, dropping");
            return;
        }
        if self.detached {
            return;
        }
        debug_assert!(self.queued.is_none(), "content slot already holds a pending fragment");
        self.queued = Some(bytes);
        self.wake_reader();
    }

    /// Records the success terminal signal.
    pub(crate) fn complete(&mut self) {
        if self.terminal.is_none() {
            self.terminal = Some(Terminal::Complete);
        }
        self.wake_reader();
    }

    /// Records the failure terminal signal.
    pub(crate) fn fail(&mut self, error: MultipartError) {
        if self.terminal.is_none() {
            self.terminal = Some(Terminal::Failed(Some(error)));
        }
        self.wake_reader();
    }

    /// Marks the consumer side as gone; further fragments are discarded.
    pub(crate) fn detach(&mut self) {
        self.detached = true;
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.detached
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminal.is_some()
    }

    /// Takes the pending fragment or terminal state, registering `cx` for a
    /// wakeup otherwise.
    pub(crate) fn poll_take(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes, MultipartError>>> {
        if let Some(bytes) = self.queued.take() {
            return Poll::Ready(Some(Ok(bytes)));
        }

        match &mut self.terminal {
            Some(Terminal::Complete) => Poll::Ready(None),
            Some(Terminal::Failed(error)) => match error.take() {
                Some(e) => Poll::Ready(Some(Err(e))),
                None => Poll::Ready(None),
            },
            None => {
                self.reader = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }

    fn wake_reader(&mut self) {
        if let Some(waker) = self.reader.take() {
            waker.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker_ref;

    fn cx() -> Context<'static> {
        Context::from_waker(noop_waker_ref())
    }

    #[test]
    fn fragment_then_complete() {
        let mut slot = ContentSlot::new();
        assert!(slot.has_capacity());
        assert!(matches!(slot.poll_take(&mut cx()), Poll::Pending));

        slot.submit(Bytes::from_static(b"hello"));
        assert!(!slot.has_capacity());

        match slot.poll_take(&mut cx()) {
            Poll::Ready(Some(Ok(bytes))) => assert_eq!(bytes, Bytes::from_static(b"hello")),
            other => panic!("unexpected poll result: {other:?}"),
        }
        assert!(slot.has_capacity());

        slot.complete();
        assert!(!slot.has_capacity());
        assert!(matches!(slot.poll_take(&mut cx()), Poll::Ready(None)));
    }

    #[test]
    fn failure_is_delivered_once() {
        let mut slot = ContentSlot::new();
        slot.fail(MultipartError::unexpected_end("reading part content"));

        assert!(matches!(slot.poll_take(&mut cx()), Poll::Ready(Some(Err(MultipartError::UnexpectedEnd { .. })))));
        assert!(matches!(slot.poll_take(&mut cx()), Poll::Ready(None)));
    }

    #[test]
    fn submit_after_terminal_is_dropped() {
        let mut slot = ContentSlot::new();
        slot.complete();
        slot.submit(Bytes::from_static(b"late"));
        assert!(matches!(slot.poll_take(&mut cx()), Poll::Ready(None)));
    }

    #[test]
    fn detached_slot_discards_fragments() {
        let mut slot = ContentSlot::new();
        slot.detach();
        slot.submit(Bytes::from_static(b"unwanted"));
        assert!(slot.has_capacity());
    }
}
