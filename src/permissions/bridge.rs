//! Bridge between the engine's callback-style permission API and the
//! per-kind request queues.
//!
//! Every accepted event gets an entry in a pending table keyed by request ID.
//! The entry holds the sending half of a oneshot channel; the engine awaits
//! the receiving half ([`PendingDecision`]). Grant, deny and session
//! abandonment each remove the entry and settle it exactly once. After
//! abandonment the bridge refuses new events until a relay is attached again.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::{EngineError, PermissionError};
use crate::permissions::focus::FocusHost;
use crate::permissions::queue::RequestQueue;
use crate::permissions::{
    BasketAccessEvent, BasketAccessRequest, CertificateAccessEvent, CertificateAccessRequest,
    PermissionKind, PermissionRequest, ProtocolAccessRequest, ProtocolPermissionEvent,
    QueuedRequest,
};

type Settlement = Result<(), PermissionError>;

/// Callback invoked by the engine when an app asks for basket access.
#[async_trait]
pub trait BasketAccessHandler: Send + Sync {
    /// Returns `None` when the event was malformed and dropped.
    async fn on_basket_access_requested(&self, event: BasketAccessEvent)
    -> Option<PendingDecision>;
}

/// Callback invoked by the engine when an app asks for certificate access.
#[async_trait]
pub trait CertificateAccessHandler: Send + Sync {
    /// Returns `None` when the event was malformed and dropped.
    async fn on_certificate_access_requested(
        &self,
        event: CertificateAccessEvent,
    ) -> Option<PendingDecision>;
}

/// Callback invoked by the engine when an app asks for protocol permission.
#[async_trait]
pub trait ProtocolPermissionHandler: Send + Sync {
    /// Returns `None` when the event was malformed and dropped.
    async fn on_protocol_permission_requested(
        &self,
        event: ProtocolPermissionEvent,
    ) -> Option<PendingDecision>;
}

/// Outbound half of the engine's permissions API: relays the user's answer.
#[async_trait]
pub trait PermissionRelay: Send + Sync {
    async fn grant_permission(&self, request_id: &str) -> Result<(), EngineError>;

    async fn deny_permission(&self, request_id: &str) -> Result<(), EngineError>;
}

/// The caller's handle on an undecided request.
///
/// Resolves to `Ok(())` on grant, `Err(PermissionError::Denied)` on deny and
/// `Err(PermissionError::SessionEnded)` when the session is torn down.
#[derive(Debug)]
pub struct PendingDecision {
    kind: PermissionKind,
    request_id: String,
    outcome: oneshot::Receiver<Settlement>,
}

impl PendingDecision {
    pub fn kind(&self) -> PermissionKind {
        self.kind
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl Future for PendingDecision {
    type Output = Settlement;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.outcome).poll(cx) {
            Poll::Ready(Ok(settlement)) => Poll::Ready(settlement),
            Poll::Ready(Err(_)) => Poll::Ready(Err(PermissionError::ChannelClosed(
                self.request_id.clone(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// The three request queues, one per kind.
pub struct PermissionQueues {
    pub basket: RequestQueue<BasketAccessRequest>,
    pub certificate: RequestQueue<CertificateAccessRequest>,
    pub protocol: RequestQueue<ProtocolAccessRequest>,
}

impl PermissionQueues {
    pub fn new(host: Arc<dyn FocusHost>) -> Self {
        Self {
            basket: RequestQueue::new(Arc::clone(&host)),
            certificate: RequestQueue::new(Arc::clone(&host)),
            protocol: RequestQueue::new(host),
        }
    }

    /// Head of the given kind's queue.
    pub fn head(&self, kind: PermissionKind) -> Option<PermissionRequest> {
        match kind {
            PermissionKind::Basket => self.basket.peek_head().map(PermissionRequest::Basket),
            PermissionKind::Certificate => self
                .certificate
                .peek_head()
                .map(PermissionRequest::Certificate),
            PermissionKind::Protocol => self.protocol.peek_head().map(PermissionRequest::Protocol),
        }
    }

    pub fn len(&self, kind: PermissionKind) -> usize {
        match kind {
            PermissionKind::Basket => self.basket.len(),
            PermissionKind::Certificate => self.certificate.len(),
            PermissionKind::Protocol => self.protocol.len(),
        }
    }

    async fn advance_if_head(&self, kind: PermissionKind, request_id: &str) -> bool {
        match kind {
            PermissionKind::Basket => self.basket.advance_if_head(request_id).await.is_some(),
            PermissionKind::Certificate => self
                .certificate
                .advance_if_head(request_id)
                .await
                .is_some(),
            PermissionKind::Protocol => self.protocol.advance_if_head(request_id).await.is_some(),
        }
    }

    async fn drain_all(&self) -> usize {
        let (baskets, certificates, protocols) = tokio::join!(
            self.basket.drain(),
            self.certificate.drain(),
            self.protocol.drain()
        );
        baskets.len() + certificates.len() + protocols.len()
    }
}

struct PendingEntry {
    kind: PermissionKind,
    settle: oneshot::Sender<Settlement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Grant,
    Deny,
}

/// Adapts engine permission callbacks into queue entries and relays the
/// user's decisions back.
pub struct PermissionBridge {
    queues: PermissionQueues,
    pending: Mutex<HashMap<String, PendingEntry>>,
    relay: RwLock<Option<Arc<dyn PermissionRelay>>>,
    /// Set at session end; written under the `pending` lock.
    closed: AtomicBool,
}

impl PermissionBridge {
    pub fn new(host: Arc<dyn FocusHost>) -> Self {
        Self {
            queues: PermissionQueues::new(host),
            pending: Mutex::new(HashMap::new()),
            relay: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn queues(&self) -> &PermissionQueues {
        &self.queues
    }

    /// Route decisions to this relay from now on and accept new events.
    pub fn attach_relay(&self, relay: Arc<dyn PermissionRelay>) {
        *self.relay.write().unwrap_or_else(PoisonError::into_inner) = Some(relay);
        let _pending = self.lock_pending();
        self.closed.store(false, Ordering::SeqCst);
    }

    /// Whether events are refused because the session ended.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn detach_relay(&self) {
        *self.relay.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn current_relay(&self) -> Option<Arc<dyn PermissionRelay>> {
        self.relay
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of accepted requests still awaiting a decision.
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.lock_pending().contains_key(request_id)
    }

    async fn accept<T: QueuedRequest>(
        &self,
        queue: &RequestQueue<T>,
        request: Option<T>,
    ) -> Option<PendingDecision> {
        let kind = T::KIND;
        let Some(request) = request else {
            tracing::debug!(kind = %kind, "dropping malformed permission event");
            return None;
        };
        let request_id = request.request_id().to_string();

        let outcome = {
            let mut pending = self.lock_pending();
            if self.is_closed() {
                tracing::debug!(
                    kind = %kind,
                    request_id = %request_id,
                    "dropping permission event raised after session end"
                );
                return None;
            }
            if pending.contains_key(&request_id) {
                tracing::warn!(
                    kind = %kind,
                    request_id = %request_id,
                    "dropping permission event that reuses a pending request ID"
                );
                return None;
            }
            let (settle, outcome) = oneshot::channel();
            pending.insert(
                request_id.clone(),
                PendingEntry { kind, settle },
            );
            outcome
        };

        tracing::debug!(kind = %kind, request_id = %request_id, "queued permission request");
        queue.enqueue(request).await;

        // A session teardown between registering and enqueueing has already
        // settled this request; do not leave it behind in the queue.
        if !self.is_pending(&request_id) {
            queue.remove(&request_id).await;
        }

        Some(PendingDecision {
            kind,
            request_id,
            outcome,
        })
    }

    /// Grant the head request of `kind`.
    pub async fn grant(&self, kind: PermissionKind, request_id: &str) -> Result<(), PermissionError> {
        self.decide(kind, request_id, Decision::Grant).await
    }

    /// Deny the head request of `kind`.
    pub async fn deny(&self, kind: PermissionKind, request_id: &str) -> Result<(), PermissionError> {
        self.decide(kind, request_id, Decision::Deny).await
    }

    async fn decide(
        &self,
        kind: PermissionKind,
        request_id: &str,
        decision: Decision,
    ) -> Result<(), PermissionError> {
        if !self.queues.advance_if_head(kind, request_id).await {
            return Err(PermissionError::NotHead {
                kind,
                request_id: request_id.to_string(),
            });
        }

        match self.current_relay() {
            Some(relay) => {
                let relayed = match decision {
                    Decision::Grant => relay.grant_permission(request_id).await,
                    Decision::Deny => relay.deny_permission(request_id).await,
                };
                if let Err(e) = relayed {
                    tracing::warn!(
                        kind = %kind,
                        request_id = %request_id,
                        "failed to relay {:?} to the permissions layer: {}",
                        decision,
                        e
                    );
                }
            }
            None => {
                tracing::debug!(request_id = %request_id, "no permissions layer attached, decision not relayed");
            }
        }

        let settlement = match decision {
            Decision::Grant => Ok(()),
            Decision::Deny => Err(PermissionError::Denied {
                kind,
                request_id: request_id.to_string(),
            }),
        };
        self.settle(request_id, settlement);
        Ok(())
    }

    fn settle(&self, request_id: &str, settlement: Settlement) {
        let entry = self.lock_pending().remove(request_id);
        match entry {
            Some(entry) => {
                // The caller may have stopped waiting; nothing to do then.
                let _ = entry.settle.send(settlement);
            }
            None => {
                tracing::warn!(request_id = %request_id, "decided request had no pending entry");
            }
        }
    }

    /// Reject every pending request with `SessionEnded`, empty all queues and
    /// refuse further events until the next [`attach_relay`](Self::attach_relay).
    ///
    /// Returns the number of settled requests.
    pub async fn abandon_all(&self) -> usize {
        let entries: Vec<(String, PendingEntry)> = {
            let mut pending = self.lock_pending();
            self.closed.store(true, Ordering::SeqCst);
            pending.drain().collect()
        };
        let settled = entries.len();
        for (request_id, entry) in entries {
            let _ = entry.settle.send(Err(PermissionError::SessionEnded {
                kind: entry.kind,
                request_id,
            }));
        }

        let dropped = self.queues.drain_all().await;
        if settled > 0 || dropped > 0 {
            tracing::info!(
                settled,
                dropped,
                "abandoned pending permission requests at session end"
            );
        }
        settled
    }
}

#[async_trait]
impl BasketAccessHandler for PermissionBridge {
    async fn on_basket_access_requested(
        &self,
        event: BasketAccessEvent,
    ) -> Option<PendingDecision> {
        self.accept(&self.queues.basket, event.into_request()).await
    }
}

#[async_trait]
impl CertificateAccessHandler for PermissionBridge {
    async fn on_certificate_access_requested(
        &self,
        event: CertificateAccessEvent,
    ) -> Option<PendingDecision> {
        self.accept(&self.queues.certificate, event.into_request())
            .await
    }
}

#[async_trait]
impl ProtocolPermissionHandler for PermissionBridge {
    async fn on_protocol_permission_requested(
        &self,
        event: ProtocolPermissionEvent,
    ) -> Option<PendingDecision> {
        self.accept(&self.queues.protocol, event.into_request()).await
    }
}
