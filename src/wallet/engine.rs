//! Seams to the external wallet engine.
//!
//! The engine, its storage provider and its permissions-enforcement layer
//! are supplied by the host. This crate only sequences their construction
//! and feeds them the user's answers.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::config::Network;
use crate::error::EngineError;
use crate::permissions::bridge::{
    BasketAccessHandler, CertificateAccessHandler, PermissionRelay, ProtocolPermissionHandler,
};
use crate::settings::WalletSettings;

/// Asks the user for their password.
#[async_trait]
pub trait PasswordRetriever: Send + Sync {
    /// `test` checks a candidate before it is returned to the engine.
    async fn retrieve_password(
        &self,
        reason: &str,
        test: &(dyn Fn(&str) -> bool + Send + Sync),
    ) -> Result<SecretString, EngineError>;
}

/// Hands a freshly generated recovery key to the user.
#[async_trait]
pub trait RecoveryKeySaver: Send + Sync {
    /// Returns `true` once the user confirmed the key is saved.
    async fn save_recovery_key(&self, recovery_key: &[u8]) -> Result<bool, EngineError>;
}

/// Spending-authorization events are passed through untouched.
#[async_trait]
pub trait SpendingAuthorizationHandler: Send + Sync {
    async fn on_spending_authorization_requested(&self, event: serde_json::Value);
}

/// Reads and writes the user's synced settings.
#[async_trait]
pub trait SettingsManager: Send + Sync {
    async fn get(&self) -> Result<WalletSettings, EngineError>;

    async fn set(&self, settings: &WalletSettings) -> Result<(), EngineError>;
}

/// Everything the engine needs at construction.
#[derive(Clone)]
pub struct EngineInputs {
    pub admin_originator: String,
    pub network: Network,
    pub auth_url: String,
    pub storage_url: String,
    /// Unset for returning users whose session comes from a snapshot.
    pub auth_method: Option<String>,
    pub password_retriever: Arc<dyn PasswordRetriever>,
    pub recovery_key_saver: Arc<dyn RecoveryKeySaver>,
}

impl std::fmt::Debug for EngineInputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineInputs")
            .field("admin_originator", &self.admin_originator)
            .field("network", &self.network)
            .field("auth_url", &self.auth_url)
            .field("storage_url", &self.storage_url)
            .field("auth_method", &self.auth_method)
            .finish_non_exhaustive()
    }
}

/// The callbacks bound into the permissions layer.
#[derive(Clone)]
pub struct PermissionHandlers {
    pub basket: Arc<dyn BasketAccessHandler>,
    pub certificate: Arc<dyn CertificateAccessHandler>,
    pub protocol: Arc<dyn ProtocolPermissionHandler>,
    pub spending: Option<Arc<dyn SpendingAuthorizationHandler>>,
}

/// Constructed wallet engine (authentication manager plus wallet).
#[async_trait]
pub trait WalletEngine: Send + Sync {
    /// Restore a persisted session.
    async fn load_snapshot(&self, snapshot: &[u8]) -> Result<(), EngineError>;

    /// Serialize the current session for the next start.
    async fn save_snapshot(&self) -> Result<Vec<u8>, EngineError>;

    async fn is_authenticated(&self) -> bool;

    /// Available once the wallet behind the engine exists.
    fn settings_manager(&self) -> Option<Arc<dyn SettingsManager>>;
}

/// Permissions-enforcement layer in front of the engine.
pub trait PermissionsLayer: PermissionRelay {
    fn bind_handlers(&self, handlers: PermissionHandlers);
}

/// Factory for the engine and its collaborators.
#[async_trait]
pub trait WalletBackend: Send + Sync {
    async fn create_engine(&self, inputs: &EngineInputs)
    -> Result<Arc<dyn WalletEngine>, EngineError>;

    /// Attach the engine to its storage provider.
    async fn connect_storage(
        &self,
        engine: &Arc<dyn WalletEngine>,
        storage_url: &str,
    ) -> Result<(), EngineError>;

    fn create_permissions_layer(
        &self,
        engine: &Arc<dyn WalletEngine>,
        admin_originator: &str,
    ) -> Result<Arc<dyn PermissionsLayer>, EngineError>;
}
