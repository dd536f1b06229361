//! User settings (theme, currency).
//!
//! Every local change is written to the local store first. Changes are
//! pushed through the engine's settings manager, which only exists while a
//! user is logged in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{SettingsError, StoreError};
use crate::storage::KeyValueStore;
use crate::wallet::engine::SettingsManager;

pub const THEME_KEY: &str = "theme";
pub const CURRENCY_KEY: &str = "currency";

/// Settings shown across the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletSettings {
    pub theme: String,
    pub currency: String,
}

impl Default for WalletSettings {
    fn default() -> Self {
        Self {
            theme: "dark".to_string(),
            currency: "USD".to_string(),
        }
    }
}

impl WalletSettings {
    /// Defaults overlaid with whatever the local store holds.
    pub fn from_store(store: &dyn KeyValueStore) -> Result<Self, StoreError> {
        let mut settings = Self::default();
        if let Some(theme) = store.get(THEME_KEY)?.filter(|v| !v.is_empty()) {
            settings.theme = theme;
        }
        if let Some(currency) = store.get(CURRENCY_KEY)?.filter(|v| !v.is_empty()) {
            settings.currency = currency;
        }
        Ok(settings)
    }

    pub fn write_to(&self, store: &dyn KeyValueStore) -> Result<(), StoreError> {
        store.set(THEME_KEY, &self.theme)?;
        store.set(CURRENCY_KEY, &self.currency)
    }
}

/// Keeps in-memory settings in step with the engine's settings manager.
pub struct SettingsSync {
    store: Arc<dyn KeyValueStore>,
    manager: RwLock<Option<Arc<dyn SettingsManager>>>,
    /// Bumped on attach/detach so a slow load can't apply stale settings.
    generation: AtomicU64,
    loaded: AtomicU64,
    /// Bumped by every local update; a load that started earlier is stale.
    revision: AtomicU64,
    current: watch::Sender<WalletSettings>,
}

impl SettingsSync {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let initial = WalletSettings::from_store(store.as_ref()).unwrap_or_else(|e| {
            tracing::warn!("Failed to read cached settings, using defaults: {}", e);
            WalletSettings::default()
        });
        Self {
            store,
            manager: RwLock::new(None),
            generation: AtomicU64::new(1),
            loaded: AtomicU64::new(0),
            revision: AtomicU64::new(0),
            current: watch::Sender::new(initial),
        }
    }

    pub fn current(&self) -> WalletSettings {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WalletSettings> {
        self.current.subscribe()
    }

    pub fn has_manager(&self) -> bool {
        self.current_manager().is_some()
    }

    fn current_manager(&self) -> Option<Arc<dyn SettingsManager>> {
        self.manager
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn attach(&self, manager: Arc<dyn SettingsManager>) {
        *self.manager.write().unwrap_or_else(PoisonError::into_inner) = Some(manager);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn detach(&self) {
        *self.manager.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Fetch the user's settings once per attached manager.
    ///
    /// Failure is silent: the defaults already in effect stay. Returns
    /// whether settings were applied by this call.
    pub async fn load_once(&self) -> bool {
        let Some(manager) = self.current_manager() else {
            return false;
        };
        let generation = self.generation.load(Ordering::SeqCst);
        if self.loaded.swap(generation, Ordering::SeqCst) == generation {
            return false;
        }
        let revision = self.revision.load(Ordering::SeqCst);

        match manager.get().await {
            Ok(settings) => {
                if self.generation.load(Ordering::SeqCst) != generation {
                    tracing::debug!("settings manager changed during load, discarding result");
                    return false;
                }
                if self.revision.load(Ordering::SeqCst) != revision {
                    tracing::debug!("settings updated locally during load, discarding result");
                    return false;
                }
                self.current.send_replace(settings);
                tracing::debug!("loaded user settings");
                true
            }
            Err(e) => {
                tracing::debug!("Unable to load user settings, keeping defaults: {}", e);
                false
            }
        }
    }

    /// Persist locally, then push through the settings manager.
    ///
    /// Fails with [`SettingsError::NotLoggedIn`] when no manager is
    /// attached; the local write has happened by then.
    pub async fn update_settings(&self, settings: WalletSettings) -> Result<(), SettingsError> {
        self.revision.fetch_add(1, Ordering::SeqCst);
        settings.write_to(self.store.as_ref())?;

        let manager = self.current_manager().ok_or(SettingsError::NotLoggedIn)?;
        manager.set(&settings).await?;
        self.current.send_replace(settings);
        Ok(())
    }
}
