//! Single-kind FIFO of pending permission requests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::permissions::QueuedRequest;
use crate::permissions::focus::{FocusHost, FocusRelease, FocusSession};

struct QueueState<T> {
    items: VecDeque<T>,
    /// Open while `items` is non-empty.
    session: Option<FocusSession>,
    /// Completion signal of the most recently closed session's release.
    last_release: Option<watch::Receiver<bool>>,
}

/// Ordered queue of pending requests of one kind.
///
/// Only the head is eligible for a decision. The enqueue that finds the
/// queue empty opens a focus session; the removal that empties it closes
/// the session. The append and the emptiness check happen under one lock,
/// so concurrent enqueues never both observe an empty queue.
pub struct RequestQueue<T: QueuedRequest> {
    host: Arc<dyn FocusHost>,
    state: Mutex<QueueState<T>>,
    modal_open: watch::Sender<bool>,
    len: watch::Sender<usize>,
}

impl<T: QueuedRequest> RequestQueue<T> {
    pub fn new(host: Arc<dyn FocusHost>) -> Self {
        Self {
            host,
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                session: None,
                last_release: None,
            }),
            modal_open: watch::Sender::new(false),
            len: watch::Sender::new(0),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a request. If the queue was empty, run the focus acquire
    /// sequence before returning.
    pub async fn enqueue(&self, request: T) {
        let acquire = {
            let mut state = self.lock_state();
            let was_empty = state.items.is_empty();
            state.items.push_back(request);
            self.len.send_replace(state.items.len());

            if was_empty {
                let previous = state.last_release.take();
                let (session, acquire) = FocusSession::open(T::KIND, previous);
                state.session = Some(session);
                Some(acquire)
            } else {
                None
            }
        };

        if let Some(acquire) = acquire {
            acquire.run(self.host.as_ref(), &self.modal_open).await;
        }
    }

    /// Remove the head. A no-op returning `None` on an empty queue.
    pub async fn advance(&self) -> Option<T> {
        self.take_head(|_| true).await
    }

    /// Remove the head only if its request ID matches.
    ///
    /// Returns `None` when the queue is empty or the head is a different
    /// request; the queue is left untouched in that case.
    pub async fn advance_if_head(&self, request_id: &str) -> Option<T> {
        self.take_head(|head| head.request_id() == request_id).await
    }

    async fn take_head(&self, accept: impl FnOnce(&T) -> bool) -> Option<T> {
        let (head, release) = {
            let mut state = self.lock_state();
            let accepted = match state.items.front() {
                Some(front) => accept(front),
                None => false,
            };
            if !accepted {
                return None;
            }
            let head = state.items.pop_front();
            self.len.send_replace(state.items.len());
            let release = self.close_session_if_empty(&mut state);
            (head, release)
        };

        if let Some(release) = release {
            release.run(self.host.as_ref(), &self.modal_open).await;
        }
        head
    }

    /// Remove a request wherever it sits in the queue.
    pub async fn remove(&self, request_id: &str) -> Option<T> {
        let (removed, release) = {
            let mut state = self.lock_state();
            let index = state
                .items
                .iter()
                .position(|item| item.request_id() == request_id)?;
            let removed = state.items.remove(index);
            self.len.send_replace(state.items.len());
            let release = self.close_session_if_empty(&mut state);
            (removed, release)
        };

        if let Some(release) = release {
            release.run(self.host.as_ref(), &self.modal_open).await;
        }
        removed
    }

    /// Remove every pending request, closing the focus session.
    pub async fn drain(&self) -> Vec<T> {
        let (drained, release) = {
            let mut state = self.lock_state();
            let drained: Vec<T> = state.items.drain(..).collect();
            self.len.send_replace(0);
            let release = self.close_session_if_empty(&mut state);
            (drained, release)
        };

        if let Some(release) = release {
            release.run(self.host.as_ref(), &self.modal_open).await;
        }
        drained
    }

    fn close_session_if_empty(&self, state: &mut QueueState<T>) -> Option<FocusRelease> {
        if !state.items.is_empty() {
            return None;
        }
        let session = state.session.take()?;
        let (release, released) = session.close();
        state.last_release = Some(released);
        Some(release)
    }

    /// The request currently eligible for a decision.
    pub fn peek_head(&self) -> Option<T> {
        self.lock_state().items.front().cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_state().items.is_empty()
    }

    /// Whether this kind's prompt is currently open.
    pub fn is_modal_open(&self) -> bool {
        *self.modal_open.borrow()
    }

    pub fn subscribe_modal(&self) -> watch::Receiver<bool> {
        self.modal_open.subscribe()
    }

    pub fn subscribe_len(&self) -> watch::Receiver<usize> {
        self.len.subscribe()
    }

    /// Whether a request with this ID is anywhere in the queue.
    pub fn contains(&self, request_id: &str) -> bool {
        self.lock_state()
            .items
            .iter()
            .any(|item| item.request_id() == request_id)
    }
}
