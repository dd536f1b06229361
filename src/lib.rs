//! walletdesk: core of a desktop wallet host.
//!
//! Arbitrates permission requests raised by the wallet engine into per-kind
//! FIFO queues, coordinates window focus around the modal prompts, and
//! drives the wallet bootstrap from remote auth config through engine
//! construction, snapshot restore and authentication.

pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod permissions;
pub mod settings;
pub mod storage;
pub mod wallet;

pub use config::Config;
pub use error::{Error, Result};
pub use permissions::{PermissionBridge, PermissionQueues};
pub use wallet::{BootstrapPhase, WalletManager};
