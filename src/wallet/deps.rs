//! Dependencies the host must supply before the engine can be built.

use std::sync::Arc;

use crate::error::BootstrapError;
use crate::permissions::PermissionBridge;
use crate::permissions::bridge::{
    BasketAccessHandler, CertificateAccessHandler, ProtocolPermissionHandler,
};
use crate::wallet::engine::{
    PasswordRetriever, PermissionHandlers, RecoveryKeySaver, SpendingAuthorizationHandler,
};

/// Collected construction dependencies.
///
/// Construction refuses to start until every required field is set; the
/// spending-authorization handler is optional.
#[derive(Clone, Default)]
pub struct BootstrapDependencies {
    pub password_retriever: Option<Arc<dyn PasswordRetriever>>,
    pub recovery_key_saver: Option<Arc<dyn RecoveryKeySaver>>,
    pub basket_handler: Option<Arc<dyn BasketAccessHandler>>,
    pub certificate_handler: Option<Arc<dyn CertificateAccessHandler>>,
    pub protocol_handler: Option<Arc<dyn ProtocolPermissionHandler>>,
    pub spending_handler: Option<Arc<dyn SpendingAuthorizationHandler>>,
}

/// Dependencies that passed [`BootstrapDependencies::require`].
#[derive(Clone)]
pub(crate) struct ReadyDependencies {
    pub password_retriever: Arc<dyn PasswordRetriever>,
    pub recovery_key_saver: Arc<dyn RecoveryKeySaver>,
    pub handlers: PermissionHandlers,
}

impl BootstrapDependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route all three permission kinds through `bridge`.
    pub fn with_bridge(mut self, bridge: &Arc<PermissionBridge>) -> Self {
        self.basket_handler = Some(bridge.clone());
        self.certificate_handler = Some(bridge.clone());
        self.protocol_handler = Some(bridge.clone());
        self
    }

    pub fn with_password_retriever(mut self, retriever: Arc<dyn PasswordRetriever>) -> Self {
        self.password_retriever = Some(retriever);
        self
    }

    pub fn with_recovery_key_saver(mut self, saver: Arc<dyn RecoveryKeySaver>) -> Self {
        self.recovery_key_saver = Some(saver);
        self
    }

    pub fn with_spending_handler(mut self, handler: Arc<dyn SpendingAuthorizationHandler>) -> Self {
        self.spending_handler = Some(handler);
        self
    }

    /// Names of the required dependencies still missing.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.password_retriever.is_none() {
            missing.push("password_retriever");
        }
        if self.recovery_key_saver.is_none() {
            missing.push("recovery_key_saver");
        }
        if self.basket_handler.is_none() {
            missing.push("basket_handler");
        }
        if self.certificate_handler.is_none() {
            missing.push("certificate_handler");
        }
        if self.protocol_handler.is_none() {
            missing.push("protocol_handler");
        }
        missing
    }

    pub fn is_ready(&self) -> bool {
        self.missing().is_empty()
    }

    pub(crate) fn require(&self) -> Result<ReadyDependencies, BootstrapError> {
        match (
            &self.password_retriever,
            &self.recovery_key_saver,
            &self.basket_handler,
            &self.certificate_handler,
            &self.protocol_handler,
        ) {
            (Some(password), Some(recovery), Some(basket), Some(certificate), Some(protocol)) => {
                Ok(ReadyDependencies {
                    password_retriever: Arc::clone(password),
                    recovery_key_saver: Arc::clone(recovery),
                    handlers: PermissionHandlers {
                        basket: Arc::clone(basket),
                        certificate: Arc::clone(certificate),
                        protocol: Arc::clone(protocol),
                        spending: self.spending_handler.clone(),
                    },
                })
            }
            _ => Err(BootstrapError::MissingDependencies(self.missing())),
        }
    }
}
