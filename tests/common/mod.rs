//! Shared fakes for the integration tests: an in-process wallet backend, a
//! focus host that records its calls and a stub auth endpoint.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use secrecy::SecretString;

use walletdesk::config::{Config, Network, WalletConfig};
use walletdesk::error::EngineError;
use walletdesk::permissions::FocusHost;
use walletdesk::permissions::bridge::PermissionRelay;
use walletdesk::permissions::{
    BasketAccessEvent, PendingDecision, PermissionBridge, ProtocolId, ProtocolPermissionEvent,
};
use walletdesk::settings::WalletSettings;
use walletdesk::storage::{KeyValueStore, MemoryStore, SnapshotStore};
use walletdesk::wallet::{
    BootstrapDependencies, EngineInputs, PasswordRetriever, PermissionHandlers, PermissionsLayer,
    RecoveryKeySaver, SettingsManager, WalletBackend, WalletEngine, WalletManager,
};

pub const TIMEOUT: Duration = Duration::from_secs(5);
pub const SAVED_SESSION: &[u8] = b"session-after-login";

// ── Focus ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingFocus {
    pub focused: AtomicBool,
    pub requests: AtomicUsize,
    pub relinquishes: AtomicUsize,
}

impl RecordingFocus {
    pub fn unfocused() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn relinquishes(&self) -> usize {
        self.relinquishes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FocusHost for RecordingFocus {
    async fn is_focused(&self) -> bool {
        self.focused.load(Ordering::SeqCst)
    }

    async fn request_focus(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.focused.store(true, Ordering::SeqCst);
    }

    async fn relinquish_focus(&self) {
        self.relinquishes.fetch_add(1, Ordering::SeqCst);
        self.focused.store(false, Ordering::SeqCst);
    }
}

// ── Engine ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeSettings {
    pub stored: Mutex<Option<WalletSettings>>,
}

#[async_trait]
impl SettingsManager for FakeSettings {
    async fn get(&self) -> Result<WalletSettings, EngineError> {
        Ok(self.stored.lock().unwrap().clone().unwrap_or_default())
    }

    async fn set(&self, settings: &WalletSettings) -> Result<(), EngineError> {
        *self.stored.lock().unwrap() = Some(settings.clone());
        Ok(())
    }
}

pub struct FakeEngine {
    pub authenticated: AtomicBool,
    pub reject_snapshot: bool,
    pub loaded: Mutex<Option<Vec<u8>>>,
    pub settings: Option<Arc<FakeSettings>>,
}

#[async_trait]
impl WalletEngine for FakeEngine {
    async fn load_snapshot(&self, snapshot: &[u8]) -> Result<(), EngineError> {
        // Restore takes long enough for concurrent callers to observe it.
        tokio::time::sleep(Duration::from_millis(10)).await;
        if self.reject_snapshot {
            return Err(EngineError::Snapshot("version mismatch".to_string()));
        }
        *self.loaded.lock().unwrap() = Some(snapshot.to_vec());
        Ok(())
    }

    async fn save_snapshot(&self) -> Result<Vec<u8>, EngineError> {
        Ok(SAVED_SESSION.to_vec())
    }

    async fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn settings_manager(&self) -> Option<Arc<dyn SettingsManager>> {
        self.settings
            .clone()
            .map(|settings| settings as Arc<dyn SettingsManager>)
    }
}

/// Permissions layer that lets a test raise engine events and records the
/// decisions relayed back to it.
#[derive(Default)]
pub struct FakeLayer {
    pub handlers: Mutex<Option<PermissionHandlers>>,
    pub granted: Mutex<Vec<String>>,
    pub denied: Mutex<Vec<String>>,
}

impl FakeLayer {
    fn handlers(&self) -> PermissionHandlers {
        self.handlers
            .lock()
            .unwrap()
            .clone()
            .expect("handlers bound at construction")
    }

    pub async fn raise_basket(&self, event: BasketAccessEvent) -> Option<PendingDecision> {
        self.handlers().basket.on_basket_access_requested(event).await
    }

    pub async fn raise_protocol(&self, event: ProtocolPermissionEvent) -> Option<PendingDecision> {
        self.handlers()
            .protocol
            .on_protocol_permission_requested(event)
            .await
    }

    pub fn granted(&self) -> Vec<String> {
        self.granted.lock().unwrap().clone()
    }

    pub fn denied(&self) -> Vec<String> {
        self.denied.lock().unwrap().clone()
    }
}

#[async_trait]
impl PermissionRelay for FakeLayer {
    async fn grant_permission(&self, request_id: &str) -> Result<(), EngineError> {
        self.granted.lock().unwrap().push(request_id.to_string());
        Ok(())
    }

    async fn deny_permission(&self, request_id: &str) -> Result<(), EngineError> {
        self.denied.lock().unwrap().push(request_id.to_string());
        Ok(())
    }
}

impl PermissionsLayer for FakeLayer {
    fn bind_handlers(&self, handlers: PermissionHandlers) {
        *self.handlers.lock().unwrap() = Some(handlers);
    }
}

/// Backend that builds [`FakeEngine`]s and counts its calls.
#[derive(Default)]
pub struct FakeBackend {
    pub engines_created: AtomicUsize,
    /// Construction stage to fail at: `"engine"` or `"storage"`.
    pub fail_stage: Option<&'static str>,
    pub reject_snapshot: bool,
    pub with_settings: bool,
    pub engines: Mutex<Vec<Arc<FakeEngine>>>,
    pub layers: Mutex<Vec<Arc<FakeLayer>>>,
    pub inputs: Mutex<Vec<EngineInputs>>,
}

impl FakeBackend {
    pub fn engines_created(&self) -> usize {
        self.engines_created.load(Ordering::SeqCst)
    }

    pub fn last_engine(&self) -> Arc<FakeEngine> {
        self.engines.lock().unwrap().last().cloned().expect("an engine")
    }

    pub fn last_layer(&self) -> Arc<FakeLayer> {
        self.layers.lock().unwrap().last().cloned().expect("a layer")
    }
}

#[async_trait]
impl WalletBackend for FakeBackend {
    async fn create_engine(
        &self,
        inputs: &EngineInputs,
    ) -> Result<Arc<dyn WalletEngine>, EngineError> {
        self.engines_created.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(inputs.clone());
        // Give concurrent callers a chance to pile up.
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.fail_stage == Some("engine") {
            return Err(EngineError::Construction("bad key material".to_string()));
        }
        let engine = Arc::new(FakeEngine {
            authenticated: AtomicBool::new(false),
            reject_snapshot: self.reject_snapshot,
            loaded: Mutex::new(None),
            settings: self.with_settings.then(|| Arc::new(FakeSettings::default())),
        });
        self.engines.lock().unwrap().push(Arc::clone(&engine));
        Ok(engine)
    }

    async fn connect_storage(
        &self,
        _engine: &Arc<dyn WalletEngine>,
        storage_url: &str,
    ) -> Result<(), EngineError> {
        if self.fail_stage == Some("storage") {
            return Err(EngineError::StorageUnavailable(storage_url.to_string()));
        }
        Ok(())
    }

    fn create_permissions_layer(
        &self,
        _engine: &Arc<dyn WalletEngine>,
        _admin_originator: &str,
    ) -> Result<Arc<dyn PermissionsLayer>, EngineError> {
        let layer = Arc::new(FakeLayer::default());
        self.layers.lock().unwrap().push(Arc::clone(&layer));
        Ok(layer)
    }
}

// ── Host-supplied dependencies ──────────────────────────────────────────

pub struct StaticPassword;

#[async_trait]
impl PasswordRetriever for StaticPassword {
    async fn retrieve_password(
        &self,
        _reason: &str,
        test: &(dyn Fn(&str) -> bool + Send + Sync),
    ) -> Result<SecretString, EngineError> {
        let candidate = "correct horse";
        if !test(candidate) {
            return Err(EngineError::Call("password rejected".to_string()));
        }
        Ok(SecretString::from(candidate.to_string()))
    }
}

pub struct AcceptingSaver;

#[async_trait]
impl RecoveryKeySaver for AcceptingSaver {
    async fn save_recovery_key(&self, _recovery_key: &[u8]) -> Result<bool, EngineError> {
        Ok(true)
    }
}

// ── Wiring ──────────────────────────────────────────────────────────────

pub fn test_config(auth_url: &str) -> Config {
    Config {
        wallet: WalletConfig {
            auth_url: auth_url.to_string(),
            network: Network::Test,
            storage_url: "https://storage.walletdesk.test".to_string(),
            auth_method: None,
        },
        admin_originator: "admin.walletdesk.test".to_string(),
        store_path: PathBuf::from("unused.json"),
        http_timeout: TIMEOUT,
    }
}

pub struct Harness {
    pub manager: WalletManager,
    pub backend: Arc<FakeBackend>,
    pub bridge: Arc<PermissionBridge>,
    pub focus: Arc<RecordingFocus>,
    pub store: Arc<MemoryStore>,
}

impl Harness {
    /// Manager with every dependency supplied.
    pub fn new(config: &Config, backend: FakeBackend, store: Arc<MemoryStore>) -> Self {
        let harness = Self::without_dependencies(config, backend, store);
        harness.manager.set_dependencies(
            BootstrapDependencies::new()
                .with_bridge(&harness.bridge)
                .with_password_retriever(Arc::new(StaticPassword))
                .with_recovery_key_saver(Arc::new(AcceptingSaver)),
        );
        harness
    }

    pub fn without_dependencies(
        config: &Config,
        backend: FakeBackend,
        store: Arc<MemoryStore>,
    ) -> Self {
        let backend = Arc::new(backend);
        let focus = RecordingFocus::unfocused();
        let bridge = Arc::new(PermissionBridge::new(focus.clone()));
        let manager = WalletManager::new(
            config,
            backend.clone(),
            Arc::clone(&bridge),
            store.clone() as Arc<dyn KeyValueStore>,
        )
        .expect("manager");
        Self {
            manager,
            backend,
            bridge,
            focus,
            store,
        }
    }
}

/// Store holding a previously saved session.
pub fn store_with_snapshot(snapshot: &[u8]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    SnapshotStore::new(store.clone())
        .save(snapshot)
        .expect("save snapshot");
    store
}

pub fn basket_event(id: &str) -> BasketAccessEvent {
    BasketAccessEvent {
        request_id: Some(id.to_string()),
        basket: Some("todo tokens".to_string()),
        originator: Some("todo.example".to_string()),
        reason: Some("list your tasks".to_string()),
        renewal: None,
    }
}

pub fn protocol_event(id: &str, name: &str) -> ProtocolPermissionEvent {
    ProtocolPermissionEvent {
        request_id: Some(id.to_string()),
        protocol_id: Some(ProtocolId(2, name.to_string())),
        originator: Some("chat.example".to_string()),
        ..Default::default()
    }
}

// ── Stub auth endpoint ──────────────────────────────────────────────────

fn is_bind_permission_error<E: std::fmt::Display>(err: &E) -> bool {
    err.to_string().contains("Operation not permitted")
        || err.to_string().contains("failed to bind")
}

/// Serve `GET /info` with a fixed response on a random local port.
///
/// Returns `None` when the sandbox forbids binding sockets.
pub async fn start_auth_server(status: StatusCode, body: serde_json::Value) -> Option<String> {
    let app = Router::new().route(
        "/info",
        get(move || {
            let body = body.clone();
            async move { (status, Json(body)) }
        }),
    );

    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) if is_bind_permission_error(&e) => return None,
        Err(e) => panic!("Failed to bind auth stub: {e:?}"),
    };
    let bound = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Some(format!("http://{bound}"))
}
