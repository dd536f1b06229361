//! Wallet bootstrap state machine.
//!
//! ```text
//! Unconfigured -> FetchingAuthConfig -> ConfigComplete -> ConstructingEngine
//!     -> EngineReady -> (SnapshotRestoring -> SnapshotRestored | SnapshotFailed)
//!     -> Authenticated
//! ```
//!
//! `logout()` returns any phase to `Unconfigured` in one step. Every
//! suspending step captures the session epoch before it awaits and drops its
//! result if a logout bumped the epoch in the meantime.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::config::{Config, WalletConfig};
use crate::error::{AuthInfoError, BootstrapError, Error};
use crate::permissions::PermissionBridge;
use crate::permissions::bridge::PermissionRelay;
use crate::settings::SettingsSync;
use crate::storage::{KeyValueStore, SnapshotStore};
use crate::wallet::auth_info::{AuthInfo, AuthInfoClient};
use crate::wallet::deps::{BootstrapDependencies, ReadyDependencies};
use crate::wallet::engine::{EngineInputs, PermissionsLayer, WalletBackend, WalletEngine};

const NOTICE_CAPACITY: usize = 64;

/// Lifecycle phase of the wallet bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapPhase {
    Unconfigured,
    FetchingAuthConfig,
    ConfigComplete,
    ConstructingEngine,
    EngineReady,
    SnapshotRestoring,
    SnapshotRestored,
    SnapshotFailed,
    Authenticated,
}

impl BootstrapPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::FetchingAuthConfig => "fetching_auth_config",
            Self::ConfigComplete => "config_complete",
            Self::ConstructingEngine => "constructing_engine",
            Self::EngineReady => "engine_ready",
            Self::SnapshotRestoring => "snapshot_restoring",
            Self::SnapshotRestored => "snapshot_restored",
            Self::SnapshotFailed => "snapshot_failed",
            Self::Authenticated => "authenticated",
        }
    }

    /// Whether an engine handle is installed in this phase.
    pub fn engine_ready(self) -> bool {
        matches!(
            self,
            Self::EngineReady
                | Self::SnapshotRestoring
                | Self::SnapshotRestored
                | Self::SnapshotFailed
                | Self::Authenticated
        )
    }
}

impl std::fmt::Display for BootstrapPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// User-facing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

struct ManagerState {
    phase: BootstrapPhase,
    config: WalletConfig,
    config_complete: bool,
    auth_info: Option<AuthInfo>,
    engine: Option<Arc<dyn WalletEngine>>,
    snapshot_loaded: bool,
    /// Bumped by every logout.
    epoch: u64,
}

/// Drives configuration, engine construction and snapshot restore.
pub struct WalletManager {
    admin_originator: String,
    backend: Arc<dyn WalletBackend>,
    auth_client: AuthInfoClient,
    bridge: Arc<PermissionBridge>,
    deps: RwLock<BootstrapDependencies>,
    snapshots: SnapshotStore,
    settings: Arc<SettingsSync>,
    state: Mutex<ManagerState>,
    phase: watch::Sender<BootstrapPhase>,
    /// Epoch of the construction in flight, held until snapshot restore
    /// settles.
    building: watch::Sender<Option<u64>>,
    notices: broadcast::Sender<Notice>,
}

impl WalletManager {
    /// Create the manager. A persisted snapshot marks configuration complete
    /// so returning users skip the auth-config fetch.
    pub fn new(
        config: &Config,
        backend: Arc<dyn WalletBackend>,
        bridge: Arc<PermissionBridge>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, AuthInfoError> {
        let snapshots = SnapshotStore::new(Arc::clone(&store));
        let returning = snapshots.exists();
        if returning {
            tracing::info!("Persisted session found, skipping configuration");
        }
        let phase = if returning {
            BootstrapPhase::ConfigComplete
        } else {
            BootstrapPhase::Unconfigured
        };

        Ok(Self {
            admin_originator: config.admin_originator.clone(),
            backend,
            auth_client: AuthInfoClient::new(config.http_timeout)?,
            bridge,
            deps: RwLock::new(BootstrapDependencies::default()),
            snapshots,
            settings: Arc::new(SettingsSync::new(store)),
            state: Mutex::new(ManagerState {
                phase,
                config: config.wallet.clone(),
                config_complete: returning,
                auth_info: None,
                engine: None,
                snapshot_loaded: false,
                epoch: 0,
            }),
            phase: watch::Sender::new(phase),
            building: watch::Sender::new(None),
            notices: broadcast::channel(NOTICE_CAPACITY).0,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, state: &mut ManagerState, phase: BootstrapPhase) {
        if state.phase != phase {
            tracing::info!(from = %state.phase, to = %phase, "bootstrap phase changed");
        }
        state.phase = phase;
        self.phase.send_replace(phase);
    }

    fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            NoticeLevel::Info => tracing::info!("{}", message),
            NoticeLevel::Warning => tracing::warn!("{}", message),
            NoticeLevel::Error => tracing::error!("{}", message),
        }
        // No subscribers is fine.
        let _ = self.notices.send(Notice {
            level,
            message,
            at: Utc::now(),
        });
    }

    // ── Observation ─────────────────────────────────────────────────────

    pub fn phase(&self) -> BootstrapPhase {
        self.lock_state().phase
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<BootstrapPhase> {
        self.phase.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn engine(&self) -> Option<Arc<dyn WalletEngine>> {
        self.lock_state().engine.clone()
    }

    pub fn snapshot_loaded(&self) -> bool {
        self.lock_state().snapshot_loaded
    }

    pub fn is_config_complete(&self) -> bool {
        self.lock_state().config_complete
    }

    pub fn config(&self) -> WalletConfig {
        self.lock_state().config.clone()
    }

    pub fn auth_info(&self) -> Option<AuthInfo> {
        self.lock_state().auth_info.clone()
    }

    /// `mainnet` or `testnet`.
    pub fn network(&self) -> &'static str {
        self.lock_state().config.network.chain_label()
    }

    pub fn admin_originator(&self) -> &str {
        &self.admin_originator
    }

    pub fn bridge(&self) -> &Arc<PermissionBridge> {
        &self.bridge
    }

    pub fn settings(&self) -> &Arc<SettingsSync> {
        &self.settings
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    // ── Configuration ───────────────────────────────────────────────────

    /// Replace the construction dependencies.
    pub fn set_dependencies(&self, deps: BootstrapDependencies) {
        *self.deps.write().unwrap_or_else(PoisonError::into_inner) = deps;
    }

    /// Edit the configuration draft. Any edit marks configuration
    /// incomplete again until `finalize_config` accepts it.
    pub fn edit_config(&self, edit: impl FnOnce(&mut WalletConfig)) -> Result<(), BootstrapError> {
        let mut state = self.lock_state();
        if self.config_locked(&state) {
            return Err(BootstrapError::ConfigLocked);
        }
        edit(&mut state.config);
        if state.config_complete {
            state.config_complete = false;
            self.set_phase(&mut state, BootstrapPhase::Unconfigured);
        }
        Ok(())
    }

    fn config_locked(&self, state: &ManagerState) -> bool {
        state.engine.is_some() || self.building_in(state)
    }

    fn building_in(&self, state: &ManagerState) -> bool {
        *self.building.borrow() == Some(state.epoch)
    }

    /// Pick one of the fetched auth methods.
    pub fn select_auth_method(&self, method: &str) -> Result<(), BootstrapError> {
        {
            let state = self.lock_state();
            let info = state
                .auth_info
                .as_ref()
                .ok_or(BootstrapError::AuthInfoUnavailable)?;
            if !info.supports(method) {
                return Err(BootstrapError::UnsupportedAuthMethod(method.to_string()));
            }
        }
        self.edit_config(|config| config.auth_method = Some(method.to_string()))
    }

    /// Fetch remote auth metadata.
    ///
    /// On failure the phase returns to `Unconfigured` and one error notice is
    /// published; calling again retries. On success a sole supported method
    /// is selected and configuration is completed if every required field
    /// is present.
    pub async fn fetch_auth_info(&self) -> Result<AuthInfo, Error> {
        let (epoch, auth_url) = {
            let mut state = self.lock_state();
            if state.phase == BootstrapPhase::Unconfigured {
                self.set_phase(&mut state, BootstrapPhase::FetchingAuthConfig);
            }
            (state.epoch, state.config.auth_url.clone())
        };

        let fetched = self.auth_client.fetch(&auth_url).await;

        let mut state = self.lock_state();
        if state.epoch != epoch {
            return Err(BootstrapError::Superseded.into());
        }
        let info = match fetched {
            Ok(info) => info,
            Err(e) => {
                if state.phase == BootstrapPhase::FetchingAuthConfig {
                    self.set_phase(&mut state, BootstrapPhase::Unconfigured);
                }
                drop(state);
                self.notify(
                    NoticeLevel::Error,
                    format!("Could not fetch auth info: {e}"),
                );
                return Err(e.into());
            }
        };

        state.auth_info = Some(info.clone());
        if !self.config_locked(&state)
            && let Some(method) = info.sole_method()
        {
            tracing::debug!(method, "auto-selecting the only supported auth method");
            state.config.auth_method = Some(method.to_string());
        }
        let complete = state.config_complete;
        drop(state);

        if !complete {
            // Validation failures are reported as a notice; the fetch itself
            // succeeded.
            let _ = self.finalize_config();
        }

        let mut state = self.lock_state();
        if state.phase == BootstrapPhase::FetchingAuthConfig {
            self.set_phase(&mut state, BootstrapPhase::Unconfigured);
        }
        Ok(info)
    }

    /// Mark configuration complete once every required field is present.
    ///
    /// Failure publishes one warning notice and leaves configuration
    /// incomplete.
    pub fn finalize_config(&self) -> Result<(), Error> {
        let mut state = self.lock_state();
        if state.config_complete {
            return Ok(());
        }
        let checked = Self::check_config(&state);
        match checked {
            Ok(()) => {
                state.config_complete = true;
                self.set_phase(&mut state, BootstrapPhase::ConfigComplete);
                drop(state);
                self.notify(NoticeLevel::Info, "Configuration applied");
                Ok(())
            }
            Err(e) => {
                drop(state);
                self.notify(NoticeLevel::Warning, format!("Configuration incomplete: {e}"));
                Err(e)
            }
        }
    }

    fn check_config(state: &ManagerState) -> Result<(), Error> {
        let info = state
            .auth_info
            .as_ref()
            .ok_or(BootstrapError::AuthInfoUnavailable)?;
        state.config.validate()?;
        if let Some(method) = state.config.auth_method.as_deref()
            && !info.supports(method)
        {
            return Err(BootstrapError::UnsupportedAuthMethod(method.to_string()).into());
        }
        Ok(())
    }

    // ── Engine construction ─────────────────────────────────────────────

    /// Drive the machine as far as it can go without user input.
    pub async fn start(&self) -> Result<BootstrapPhase, Error> {
        if !self.is_config_complete() && self.phase() == BootstrapPhase::Unconfigured {
            self.fetch_auth_info().await?;
        }
        if self.is_config_complete() {
            self.ensure_engine().await?;
            self.refresh_authentication().await?;
        }
        Ok(self.phase())
    }

    /// Construct the engine unless it already exists.
    ///
    /// Concurrent calls collapse into one construction: later callers wait
    /// until the in-flight one has also settled snapshot restore, then share
    /// its engine. If the constructing caller is cancelled, a waiter takes
    /// over.
    pub async fn ensure_engine(&self) -> Result<Arc<dyn WalletEngine>, Error> {
        loop {
            let plan = {
                let mut state = self.lock_state();
                if self.building_in(&state) {
                    Err(state.epoch)
                } else if let Some(engine) = &state.engine {
                    tracing::debug!("engine already constructed");
                    return Ok(Arc::clone(engine));
                } else {
                    Ok(self.begin_construction(&mut state)?)
                }
            };
            match plan {
                Ok((epoch, inputs, ready)) => {
                    let guard = ConstructionGuard {
                        manager: self,
                        epoch,
                        armed: true,
                    };
                    return self.build_engine(guard, &inputs, &ready).await;
                }
                Err(epoch) => {
                    tracing::debug!("engine construction already in flight, waiting");
                    self.wait_for_construction(epoch).await;
                }
            }
        }
    }

    async fn build_engine(
        &self,
        guard: ConstructionGuard<'_>,
        inputs: &EngineInputs,
        ready: &ReadyDependencies,
    ) -> Result<Arc<dyn WalletEngine>, Error> {
        let epoch = guard.epoch;
        let built = self.construct(inputs, ready).await;

        let engine = {
            let mut state = self.lock_state();
            if state.epoch != epoch {
                tracing::debug!("session ended during construction, discarding engine");
                guard.complete();
                return Err(BootstrapError::Superseded.into());
            }
            match built {
                Ok((engine, permissions)) => {
                    let relay: Arc<dyn PermissionRelay> = permissions;
                    self.bridge.attach_relay(relay);
                    state.engine = Some(Arc::clone(&engine));
                    self.set_phase(&mut state, BootstrapPhase::EngineReady);
                    engine
                }
                Err(e) => {
                    state.config_complete = false;
                    self.set_phase(&mut state, BootstrapPhase::Unconfigured);
                    guard.complete();
                    drop(state);
                    self.notify(
                        NoticeLevel::Error,
                        format!("Failed to initialize wallet: {e}"),
                    );
                    return Err(e.into());
                }
            }
        };

        self.attach_settings(&engine);
        self.restore_snapshot(&engine, epoch).await;
        guard.complete();
        Ok(engine)
    }

    /// Check preconditions and enter `ConstructingEngine`.
    fn begin_construction(
        &self,
        state: &mut ManagerState,
    ) -> Result<(u64, EngineInputs, ReadyDependencies), Error> {
        if !state.config_complete {
            return Err(BootstrapError::NotConfigured.into());
        }
        let ready = self
            .deps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .require()?;
        let inputs = EngineInputs {
            admin_originator: self.admin_originator.clone(),
            network: state.config.network,
            auth_url: state.config.auth_url.clone(),
            storage_url: state.config.storage_url.clone(),
            auth_method: state.config.auth_method.clone(),
            password_retriever: Arc::clone(&ready.password_retriever),
            recovery_key_saver: Arc::clone(&ready.recovery_key_saver),
        };
        self.building.send_replace(Some(state.epoch));
        self.set_phase(state, BootstrapPhase::ConstructingEngine);
        Ok((state.epoch, inputs, ready))
    }

    async fn wait_for_construction(&self, epoch: u64) {
        let mut building = self.building.subscribe();
        // The sender lives as long as `self`.
        let _ = building
            .wait_for(|in_flight| *in_flight != Some(epoch))
            .await;
    }

    async fn construct(
        &self,
        inputs: &EngineInputs,
        ready: &ReadyDependencies,
    ) -> Result<(Arc<dyn WalletEngine>, Arc<dyn PermissionsLayer>), BootstrapError> {
        tracing::info!(network = %inputs.network, storage = %inputs.storage_url, "constructing wallet engine");

        let engine = self
            .backend
            .create_engine(inputs)
            .await
            .map_err(|source| BootstrapError::Construction {
                stage: "engine",
                source,
            })?;

        self.backend
            .connect_storage(&engine, &inputs.storage_url)
            .await
            .map_err(|source| BootstrapError::Construction {
                stage: "storage",
                source,
            })?;

        let permissions = self
            .backend
            .create_permissions_layer(&engine, &inputs.admin_originator)
            .map_err(|source| BootstrapError::Construction {
                stage: "permissions",
                source,
            })?;
        permissions.bind_handlers(ready.handlers.clone());

        Ok((engine, permissions))
    }

    fn attach_settings(&self, engine: &Arc<dyn WalletEngine>) {
        if self.settings.has_manager() {
            return;
        }
        let Some(manager) = engine.settings_manager() else {
            return;
        };
        self.settings.attach(manager);
        let settings = Arc::clone(&self.settings);
        tokio::spawn(async move {
            settings.load_once().await;
        });
    }

    /// Load the persisted snapshot into a fresh engine, if there is one.
    ///
    /// A snapshot that fails to decode or load is discarded with a warning;
    /// the engine stays usable.
    async fn restore_snapshot(&self, engine: &Arc<dyn WalletEngine>, epoch: u64) {
        let snapshot = match self.snapshots.load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(e) => {
                self.discard_snapshot(epoch, &e.to_string());
                return;
            }
        };

        {
            let mut state = self.lock_state();
            if state.epoch != epoch {
                return;
            }
            self.set_phase(&mut state, BootstrapPhase::SnapshotRestoring);
        }

        let loaded = engine.load_snapshot(&snapshot).await;

        match loaded {
            Ok(()) => {
                let mut state = self.lock_state();
                if state.epoch != epoch {
                    return;
                }
                state.snapshot_loaded = true;
                self.set_phase(&mut state, BootstrapPhase::SnapshotRestored);
                tracing::info!("Snapshot loaded successfully");
            }
            Err(e) => self.discard_snapshot(epoch, &e.to_string()),
        }
    }

    fn discard_snapshot(&self, epoch: u64, reason: &str) {
        if let Err(e) = self.snapshots.clear() {
            tracing::warn!("Failed to remove invalid snapshot: {}", e);
        }
        {
            let mut state = self.lock_state();
            if state.epoch != epoch {
                return;
            }
            state.snapshot_loaded = false;
            self.set_phase(&mut state, BootstrapPhase::SnapshotFailed);
        }
        self.notify(
            NoticeLevel::Warning,
            format!("Couldn't load saved data: {reason}"),
        );
    }

    // ── Authentication ──────────────────────────────────────────────────

    /// Poll the engine's authentication state.
    ///
    /// The first time the engine reports authenticated, the phase becomes
    /// `Authenticated` and the session snapshot is persisted.
    pub async fn refresh_authentication(&self) -> Result<bool, Error> {
        let (engine, epoch) = {
            let state = self.lock_state();
            let engine = state
                .engine
                .clone()
                .ok_or(BootstrapError::EngineUnavailable)?;
            (engine, state.epoch)
        };

        if !engine.is_authenticated().await {
            return Ok(false);
        }

        let newly_authenticated = {
            let mut state = self.lock_state();
            if state.epoch != epoch {
                return Ok(false);
            }
            let newly = state.phase != BootstrapPhase::Authenticated;
            self.set_phase(&mut state, BootstrapPhase::Authenticated);
            newly
        };

        self.attach_settings(&engine);
        if newly_authenticated {
            self.persist_snapshot(&engine, epoch).await;
        }
        Ok(true)
    }

    async fn persist_snapshot(&self, engine: &Arc<dyn WalletEngine>, epoch: u64) {
        let saved = match engine.save_snapshot().await {
            Ok(snapshot) => {
                if self.lock_state().epoch != epoch {
                    return;
                }
                self.snapshots.save(&snapshot).map_err(|e| e.to_string())
            }
            Err(e) => Err(e.to_string()),
        };
        match saved {
            Ok(()) => tracing::debug!("session snapshot saved"),
            Err(reason) => self.notify(
                NoticeLevel::Warning,
                format!("Couldn't save session: {reason}"),
            ),
        }
    }

    // ── Logout ──────────────────────────────────────────────────────────

    /// Tear the session down.
    ///
    /// Drops the engine, marks configuration incomplete, clears the
    /// persisted snapshot and rejects every pending permission request with
    /// `SessionEnded`.
    pub async fn logout(&self) {
        {
            let mut state = self.lock_state();
            state.epoch += 1;
            state.engine = None;
            state.auth_info = None;
            state.snapshot_loaded = false;
            state.config_complete = false;
            self.set_phase(&mut state, BootstrapPhase::Unconfigured);
            self.bridge.detach_relay();
            self.settings.detach();
        }

        if let Err(e) = self.snapshots.clear() {
            tracing::warn!("Failed to clear persisted snapshot: {}", e);
        }
        let abandoned = self.bridge.abandon_all().await;
        tracing::info!(abandoned, "logged out");
    }
}

/// Clears the in-flight construction if its future is dropped early.
///
/// A cancelled construction goes back to `ConfigComplete` so the next
/// `ensure_engine` starts over; a cancelled restore leaves the engine in
/// `EngineReady` without a loaded snapshot.
struct ConstructionGuard<'a> {
    manager: &'a WalletManager,
    epoch: u64,
    armed: bool,
}

impl ConstructionGuard<'_> {
    fn complete(mut self) {
        self.armed = false;
        self.release();
    }

    /// A later session may already be building; leave its flag alone.
    fn release(&self) {
        self.manager.building.send_if_modified(|in_flight| {
            if *in_flight == Some(self.epoch) {
                *in_flight = None;
                true
            } else {
                false
            }
        });
    }
}

impl Drop for ConstructionGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.manager.lock_state();
        if state.epoch == self.epoch {
            match state.phase {
                BootstrapPhase::ConstructingEngine => {
                    tracing::warn!("engine construction cancelled, configuration kept");
                    self.manager
                        .set_phase(&mut state, BootstrapPhase::ConfigComplete);
                }
                BootstrapPhase::SnapshotRestoring => {
                    tracing::warn!("snapshot restore cancelled");
                    self.manager.set_phase(&mut state, BootstrapPhase::EngineReady);
                }
                _ => {}
            }
        }
        drop(state);
        self.release();
    }
}

impl std::fmt::Debug for WalletManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletManager")
            .field("admin_originator", &self.admin_originator)
            .field("phase", &*self.phase.borrow())
            .finish_non_exhaustive()
    }
}
