//! Host focus sequencing for permission prompts.
//!
//! A focus session spans one queue's empty→non-empty transition up to its
//! next non-empty→empty transition. The session that opens captures whether
//! the host window was already focused and requests focus only if it was
//! not; the session that closes relinquishes focus only in that same case.
//!
//! Sessions of one queue are chained: an acquire waits for the previous
//! session's release to finish, and a release waits for its own acquire to
//! publish the focus snapshot. Acquire and relinquish therefore strictly
//! alternate per queue, even when the host calls suspend.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::permissions::PermissionKind;

/// Host-window focus integration supplied by the desktop shell.
#[async_trait]
pub trait FocusHost: Send + Sync {
    /// Whether the host window currently has focus.
    async fn is_focused(&self) -> bool;

    /// Bring the host window to the foreground.
    async fn request_focus(&self);

    /// Move the host window out of the user's way.
    async fn relinquish_focus(&self);
}

/// Focus host for headless use: always reports focused, never moves a window.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessFocus;

#[async_trait]
impl FocusHost for HeadlessFocus {
    async fn is_focused(&self) -> bool {
        true
    }

    async fn request_focus(&self) {}

    async fn relinquish_focus(&self) {}
}

/// An open focus session owned by one queue.
#[derive(Debug)]
pub(crate) struct FocusSession {
    kind: PermissionKind,
    /// `None` until the acquire step has read `is_focused()`.
    was_originally_focused: watch::Receiver<Option<bool>>,
}

/// Acquire step for a freshly opened session.
#[derive(Debug)]
pub(crate) struct FocusAcquire {
    kind: PermissionKind,
    previous_release: Option<watch::Receiver<bool>>,
    snapshot: watch::Sender<Option<bool>>,
}

/// Release step for a session that just closed.
#[derive(Debug)]
pub(crate) struct FocusRelease {
    kind: PermissionKind,
    was_originally_focused: watch::Receiver<Option<bool>>,
    done: watch::Sender<bool>,
}

impl FocusSession {
    /// Open a session. Must be called while the queue state lock is held so
    /// that only the enqueue which found the queue empty opens one.
    pub(crate) fn open(
        kind: PermissionKind,
        previous_release: Option<watch::Receiver<bool>>,
    ) -> (Self, FocusAcquire) {
        let (snapshot, was_originally_focused) = watch::channel(None);
        (
            Self {
                kind,
                was_originally_focused,
            },
            FocusAcquire {
                kind,
                previous_release,
                snapshot,
            },
        )
    }

    /// Close the session. Returns the release step and a receiver that flips
    /// to `true` once the release has finished.
    pub(crate) fn close(self) -> (FocusRelease, watch::Receiver<bool>) {
        let (done, released) = watch::channel(false);
        (
            FocusRelease {
                kind: self.kind,
                was_originally_focused: self.was_originally_focused,
                done,
            },
            released,
        )
    }
}

impl FocusAcquire {
    pub(crate) async fn run(mut self, host: &dyn FocusHost, modal_open: &watch::Sender<bool>) {
        if let Some(previous) = self.previous_release.as_mut() {
            // A dropped release still counts as finished.
            let _ = previous.wait_for(|done| *done).await;
        }

        let focused = host.is_focused().await;
        if !focused {
            tracing::debug!(kind = %self.kind, "requesting host focus for permission prompt");
            host.request_focus().await;
        }
        modal_open.send_replace(true);
        self.snapshot.send_replace(Some(focused));
    }
}

impl FocusRelease {
    pub(crate) async fn run(mut self, host: &dyn FocusHost, modal_open: &watch::Sender<bool>) {
        let was_focused = match self
            .was_originally_focused
            .wait_for(|snapshot| snapshot.is_some())
            .await
        {
            Ok(snapshot) => (*snapshot).unwrap_or(true),
            Err(_) => {
                // The acquire step was dropped before it read the host state;
                // leave focus alone.
                tracing::debug!(kind = %self.kind, "focus acquire abandoned, skipping relinquish");
                true
            }
        };

        if !was_focused {
            tracing::debug!(kind = %self.kind, "relinquishing host focus");
            host.relinquish_focus().await;
        }
        modal_open.send_replace(false);
        self.done.send_replace(true);
    }
}
