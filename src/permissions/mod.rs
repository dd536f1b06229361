//! Permission-request arbitration.
//!
//! The external wallet engine raises basket, certificate and protocol access
//! requests at arbitrary times. Each kind is serialized through its own
//! [`RequestQueue`] so the user only ever decides one request of a kind at a
//! time, and the [`PermissionBridge`] correlates the user's answer back to the
//! caller that raised the request.

pub mod bridge;
pub mod focus;
pub mod queue;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use self::bridge::{PendingDecision, PermissionBridge, PermissionQueues};
pub use self::focus::FocusHost;
pub use self::queue::RequestQueue;

/// Protocol name that marks an identity-resolution request.
pub const IDENTITY_RESOLUTION_PROTOCOL: &str = "identity resolution";

/// The three independently queued request kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    Basket,
    Certificate,
    Protocol,
}

impl PermissionKind {
    pub const ALL: [PermissionKind; 3] = [Self::Basket, Self::Certificate, Self::Protocol];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basket => "basket",
            Self::Certificate => "certificate",
            Self::Protocol => "protocol",
        }
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a protocol request is presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolCategory {
    Identity,
    Renewal,
    BasketLike,
    Protocol,
}

/// Classify a protocol request.
///
/// Checks run in a fixed order: identity resolution, then renewal, then a
/// "basket" substring match on the protocol name.
pub fn classify_protocol(protocol_name: &str, renewal: bool) -> ProtocolCategory {
    if protocol_name == IDENTITY_RESOLUTION_PROTOCOL {
        ProtocolCategory::Identity
    } else if renewal {
        ProtocolCategory::Renewal
    } else if protocol_name.contains("basket") {
        ProtocolCategory::BasketLike
    } else {
        ProtocolCategory::Protocol
    }
}

/// A request that can sit in a [`RequestQueue`].
pub trait QueuedRequest: Clone + Send + Sync + 'static {
    const KIND: PermissionKind;

    fn request_id(&self) -> &str;
}

/// Pending basket access request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BasketAccessRequest {
    pub request_id: String,
    pub originator: String,
    pub reason: Option<String>,
    pub renewal: bool,
    pub basket_name: String,
}

/// Pending certificate access request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateAccessRequest {
    pub request_id: String,
    pub originator: String,
    pub reason: Option<String>,
    pub renewal: bool,
    pub certificate_type: String,
    pub field_names: BTreeSet<String>,
    pub verifier_key: String,
}

/// Pending protocol permission request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolAccessRequest {
    pub request_id: String,
    pub originator: String,
    pub reason: Option<String>,
    pub renewal: bool,
    pub security_level: u8,
    pub protocol_name: String,
    pub counterparty: Option<String>,
    pub category: ProtocolCategory,
}

impl QueuedRequest for BasketAccessRequest {
    const KIND: PermissionKind = PermissionKind::Basket;

    fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl QueuedRequest for CertificateAccessRequest {
    const KIND: PermissionKind = PermissionKind::Certificate;

    fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl QueuedRequest for ProtocolAccessRequest {
    const KIND: PermissionKind = PermissionKind::Protocol;

    fn request_id(&self) -> &str {
        &self.request_id
    }
}

/// Any pending request, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PermissionRequest {
    Basket(BasketAccessRequest),
    Certificate(CertificateAccessRequest),
    Protocol(ProtocolAccessRequest),
}

impl PermissionRequest {
    pub fn kind(&self) -> PermissionKind {
        match self {
            Self::Basket(_) => PermissionKind::Basket,
            Self::Certificate(_) => PermissionKind::Certificate,
            Self::Protocol(_) => PermissionKind::Protocol,
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            Self::Basket(r) => &r.request_id,
            Self::Certificate(r) => &r.request_id,
            Self::Protocol(r) => &r.request_id,
        }
    }
}

// ── Inbound events, as raised by the engine's permissions layer ──────────

/// Raw basket access event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BasketAccessEvent {
    #[serde(rename = "requestID", default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub basket: Option<String>,
    #[serde(default)]
    pub originator: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub renewal: Option<bool>,
}

/// Certificate descriptor carried by a certificate access event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CertificateDescriptor {
    #[serde(rename = "certType", default)]
    pub cert_type: Option<String>,
    #[serde(default)]
    pub fields: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub verifier: Option<String>,
}

/// Raw certificate access event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CertificateAccessEvent {
    #[serde(rename = "requestID", default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub certificate: Option<CertificateDescriptor>,
    #[serde(default)]
    pub originator: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub renewal: Option<bool>,
}

/// Compound protocol identifier: `[securityLevel, protocolName]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolId(pub u8, pub String);

/// Raw protocol permission event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProtocolPermissionEvent {
    #[serde(rename = "requestID", default)]
    pub request_id: Option<String>,
    #[serde(rename = "protocolID", default)]
    pub protocol_id: Option<ProtocolId>,
    #[serde(default)]
    pub counterparty: Option<String>,
    #[serde(default)]
    pub originator: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub renewal: Option<bool>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl BasketAccessEvent {
    /// Convert into a queueable request; `None` when the event is malformed.
    pub fn into_request(self) -> Option<BasketAccessRequest> {
        let request_id = non_empty(self.request_id)?;
        Some(BasketAccessRequest {
            request_id,
            originator: self.originator.unwrap_or_default(),
            reason: self.reason,
            renewal: self.renewal.unwrap_or(false),
            basket_name: self.basket.unwrap_or_default(),
        })
    }
}

impl CertificateAccessEvent {
    /// Convert into a queueable request; `None` when the event is malformed.
    pub fn into_request(self) -> Option<CertificateAccessRequest> {
        let request_id = non_empty(self.request_id)?;
        let certificate = self.certificate.unwrap_or_default();
        Some(CertificateAccessRequest {
            request_id,
            originator: self.originator.unwrap_or_default(),
            reason: self.reason,
            renewal: self.renewal.unwrap_or(false),
            certificate_type: certificate.cert_type.unwrap_or_default(),
            field_names: certificate
                .fields
                .map(|fields| fields.into_iter().map(|(name, _)| name).collect())
                .unwrap_or_default(),
            verifier_key: certificate.verifier.unwrap_or_default(),
        })
    }
}

impl ProtocolPermissionEvent {
    /// Convert into a queueable request; `None` when the event is malformed.
    pub fn into_request(self) -> Option<ProtocolAccessRequest> {
        let request_id = non_empty(self.request_id)?;
        let ProtocolId(security_level, protocol_name) = self.protocol_id?;
        if protocol_name.trim().is_empty() {
            return None;
        }
        let renewal = self.renewal.unwrap_or(false);
        Some(ProtocolAccessRequest {
            request_id,
            originator: self.originator.unwrap_or_default(),
            reason: self.reason,
            renewal,
            security_level,
            category: classify_protocol(&protocol_name, renewal),
            protocol_name,
            counterparty: self.counterparty,
        })
    }
}
