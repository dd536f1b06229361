//! Wallet bootstrap: remote auth config, engine construction, snapshot
//! restore and authentication.

pub mod auth_info;
pub mod deps;
pub mod engine;
pub mod manager;

pub use self::auth_info::{AuthInfo, AuthInfoClient};
pub use self::deps::BootstrapDependencies;
pub use self::engine::{
    EngineInputs, PasswordRetriever, PermissionHandlers, PermissionsLayer, RecoveryKeySaver,
    SettingsManager, SpendingAuthorizationHandler, WalletBackend, WalletEngine,
};
pub use self::manager::{BootstrapPhase, Notice, NoticeLevel, WalletManager};
