//! End-to-end tests for the wallet bootstrap state machine.
//!
//! The engine is faked in-process; the auth endpoint is a real Axum server
//! on a random local port. Tests that need the server skip themselves when
//! the sandbox forbids binding sockets.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::http::StatusCode;
use futures::future::join_all;
use serde_json::json;
use tokio::time::timeout;

use walletdesk::error::{BootstrapError, Error, PermissionError};
use walletdesk::storage::{KeyValueStore, MemoryStore, SNAPSHOT_KEY, SnapshotStore};
use walletdesk::wallet::{BootstrapPhase, NoticeLevel};

use common::{
    FakeBackend, Harness, SAVED_SESSION, TIMEOUT, basket_event, start_auth_server,
    store_with_snapshot, test_config,
};

const UNREACHABLE_AUTH: &str = "http://127.0.0.1:9";

#[tokio::test]
async fn fetch_with_a_single_method_completes_configuration() {
    let Some(url) = start_auth_server(
        StatusCode::OK,
        json!({"supportedAuthMethods": ["twilio-phone"], "faucetEnabled": false}),
    )
    .await
    else {
        eprintln!("skipping: cannot bind a local socket");
        return;
    };
    let harness = Harness::new(&test_config(&url), FakeBackend::default(), Arc::default());
    let mut notices = harness.manager.subscribe_notices();
    assert_eq!(harness.manager.phase(), BootstrapPhase::Unconfigured);

    let info = harness.manager.fetch_auth_info().await.unwrap();
    assert_eq!(info.supported_auth_methods, vec!["twilio-phone".to_string()]);

    assert!(harness.manager.is_config_complete());
    assert_eq!(harness.manager.phase(), BootstrapPhase::ConfigComplete);
    assert_eq!(
        harness.manager.config().auth_method.as_deref(),
        Some("twilio-phone")
    );
    let notice = notices.try_recv().unwrap();
    assert_eq!(notice.level, NoticeLevel::Info);
    assert_eq!(notice.message, "Configuration applied");
}

#[tokio::test]
async fn fetch_with_several_methods_waits_for_a_choice() {
    let Some(url) = start_auth_server(
        StatusCode::OK,
        json!({"supportedAuthMethods": ["email", "twilio-phone"]}),
    )
    .await
    else {
        eprintln!("skipping: cannot bind a local socket");
        return;
    };
    let harness = Harness::new(&test_config(&url), FakeBackend::default(), Arc::default());
    let mut notices = harness.manager.subscribe_notices();

    harness.manager.fetch_auth_info().await.unwrap();
    assert!(!harness.manager.is_config_complete());
    assert_eq!(harness.manager.phase(), BootstrapPhase::Unconfigured);
    assert_eq!(notices.try_recv().unwrap().level, NoticeLevel::Warning);

    assert!(matches!(
        harness.manager.select_auth_method("passkey"),
        Err(BootstrapError::UnsupportedAuthMethod(_))
    ));
    harness.manager.select_auth_method("email").unwrap();
    harness.manager.finalize_config().unwrap();
    assert_eq!(harness.manager.phase(), BootstrapPhase::ConfigComplete);
}

#[tokio::test]
async fn failed_fetch_returns_to_unconfigured_with_one_notice() {
    let Some(url) = start_auth_server(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({"error": "maintenance"}),
    )
    .await
    else {
        eprintln!("skipping: cannot bind a local socket");
        return;
    };
    let harness = Harness::new(&test_config(&url), FakeBackend::default(), Arc::default());
    let mut notices = harness.manager.subscribe_notices();

    let err = harness.manager.fetch_auth_info().await.unwrap_err();
    assert!(matches!(err, Error::AuthInfo(_)));
    assert_eq!(harness.manager.phase(), BootstrapPhase::Unconfigured);
    assert!(harness.manager.auth_info().is_none());

    let notice = notices.try_recv().unwrap();
    assert_eq!(notice.level, NoticeLevel::Error);
    assert!(notice.message.starts_with("Could not fetch auth info"));
    assert!(notices.try_recv().is_err());
}

#[tokio::test]
async fn returning_user_skips_fetch_and_restores_snapshot() {
    let store = store_with_snapshot(b"previous-session");
    let harness = Harness::new(
        &test_config(UNREACHABLE_AUTH),
        FakeBackend::default(),
        store,
    );
    assert!(harness.manager.is_config_complete());
    assert_eq!(harness.manager.phase(), BootstrapPhase::ConfigComplete);

    let phase = timeout(TIMEOUT, harness.manager.start())
        .await
        .expect("start timed out")
        .unwrap();

    assert_eq!(phase, BootstrapPhase::SnapshotRestored);
    assert!(harness.manager.snapshot_loaded());
    assert_eq!(harness.backend.engines_created(), 1);
    assert_eq!(
        harness.backend.last_engine().loaded.lock().unwrap().as_deref(),
        Some(&b"previous-session"[..])
    );
    assert!(harness.manager.auth_info().is_none());
}

#[tokio::test]
async fn concurrent_ensure_engine_constructs_exactly_once() {
    let harness = Harness::new(
        &test_config(UNREACHABLE_AUTH),
        FakeBackend::default(),
        store_with_snapshot(b"s"),
    );

    let results = timeout(
        TIMEOUT,
        join_all((0..4).map(|_| harness.manager.ensure_engine())),
    )
    .await
    .expect("ensure_engine timed out");

    assert_eq!(harness.backend.engines_created(), 1);
    let engines: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    let first = Arc::as_ptr(&engines[0]) as *const ();
    for engine in &engines {
        assert_eq!(Arc::as_ptr(engine) as *const (), first);
    }
    assert!(harness.manager.phase().engine_ready());

    // Later calls are no-ops.
    harness.manager.ensure_engine().await.unwrap();
    assert_eq!(harness.backend.engines_created(), 1);
}

#[tokio::test]
async fn waiting_callers_return_after_snapshot_restore() {
    let harness = Harness::new(
        &test_config(UNREACHABLE_AUTH),
        FakeBackend::default(),
        store_with_snapshot(b"s"),
    );
    let manager = &harness.manager;

    let observed = timeout(
        TIMEOUT,
        join_all((0..3).map(|_| async move {
            manager.ensure_engine().await.unwrap();
            (manager.phase(), manager.snapshot_loaded())
        })),
    )
    .await
    .expect("ensure_engine timed out");

    for seen in observed {
        assert_eq!(seen, (BootstrapPhase::SnapshotRestored, true));
    }
    assert_eq!(harness.backend.engines_created(), 1);
}

#[tokio::test]
async fn cancelled_construction_can_be_retried() {
    let harness = Harness::new(
        &test_config(UNREACHABLE_AUTH),
        FakeBackend::default(),
        store_with_snapshot(b"s"),
    );

    // The fake backend takes 20ms to construct.
    let cancelled = timeout(Duration::from_millis(5), harness.manager.ensure_engine()).await;
    assert!(cancelled.is_err());
    assert_eq!(harness.backend.engines_created(), 1);
    assert_eq!(harness.manager.phase(), BootstrapPhase::ConfigComplete);
    assert!(harness.manager.is_config_complete());
    assert!(harness.manager.engine().is_none());

    timeout(TIMEOUT, harness.manager.ensure_engine())
        .await
        .expect("retry after cancellation hung")
        .unwrap();
    assert_eq!(harness.backend.engines_created(), 2);
    assert_eq!(harness.manager.phase(), BootstrapPhase::SnapshotRestored);
}

#[tokio::test]
async fn waiter_takes_over_when_the_constructing_caller_is_cancelled() {
    let harness = Harness::new(
        &test_config(UNREACHABLE_AUTH),
        FakeBackend::default(),
        store_with_snapshot(b"s"),
    );

    let (first, second) = timeout(TIMEOUT, async {
        tokio::join!(
            timeout(Duration::from_millis(5), harness.manager.ensure_engine()),
            harness.manager.ensure_engine()
        )
    })
    .await
    .expect("waiting caller hung after cancellation");

    assert!(first.is_err());
    let engine = second.unwrap();
    assert_eq!(harness.backend.engines_created(), 2);
    let current = harness.manager.engine().unwrap();
    assert_eq!(
        Arc::as_ptr(&engine) as *const (),
        Arc::as_ptr(&current) as *const ()
    );
}

#[tokio::test]
async fn config_is_editable_after_a_cancelled_construction() {
    let harness = Harness::new(
        &test_config(UNREACHABLE_AUTH),
        FakeBackend::default(),
        store_with_snapshot(b"s"),
    );

    let _ = timeout(Duration::from_millis(5), harness.manager.ensure_engine()).await;

    harness
        .manager
        .edit_config(|config| config.storage_url = "https://elsewhere.test".to_string())
        .unwrap();
    assert_eq!(harness.manager.config().storage_url, "https://elsewhere.test");
    assert_eq!(harness.manager.phase(), BootstrapPhase::Unconfigured);
}

#[tokio::test]
async fn construction_failure_resets_configuration() {
    let backend = FakeBackend {
        fail_stage: Some("storage"),
        ..Default::default()
    };
    let harness = Harness::new(&test_config(UNREACHABLE_AUTH), backend, store_with_snapshot(b"s"));
    let mut notices = harness.manager.subscribe_notices();

    let err = harness.manager.ensure_engine().await.err().unwrap();
    assert!(matches!(
        err,
        Error::Bootstrap(BootstrapError::Construction { stage: "storage", .. })
    ));
    assert_eq!(harness.manager.phase(), BootstrapPhase::Unconfigured);
    assert!(!harness.manager.is_config_complete());
    assert!(harness.manager.engine().is_none());

    let notice = notices.try_recv().unwrap();
    assert_eq!(notice.level, NoticeLevel::Error);
    assert!(notice.message.starts_with("Failed to initialize wallet"));

    // Configuration is incomplete again, so nothing is retried implicitly.
    assert!(matches!(
        harness.manager.ensure_engine().await.err().unwrap(),
        Error::Bootstrap(BootstrapError::NotConfigured)
    ));
    assert_eq!(harness.backend.engines_created(), 1);
}

#[tokio::test]
async fn undecodable_snapshot_is_discarded_with_a_warning() {
    let store = Arc::new(MemoryStore::new());
    store.set(SNAPSHOT_KEY, "*** not base64 ***").unwrap();
    let harness = Harness::new(&test_config(UNREACHABLE_AUTH), FakeBackend::default(), store);
    let mut notices = harness.manager.subscribe_notices();

    harness.manager.ensure_engine().await.unwrap();

    assert_eq!(harness.manager.phase(), BootstrapPhase::SnapshotFailed);
    assert!(!harness.manager.snapshot_loaded());
    assert_eq!(harness.store.get(SNAPSHOT_KEY).unwrap(), None);
    let notice = notices.try_recv().unwrap();
    assert_eq!(notice.level, NoticeLevel::Warning);
    assert!(notice.message.starts_with("Couldn't load saved data"));
    // The engine stays usable.
    assert!(harness.manager.engine().is_some());
}

#[tokio::test]
async fn snapshot_rejected_by_engine_is_discarded() {
    let backend = FakeBackend {
        reject_snapshot: true,
        ..Default::default()
    };
    let harness = Harness::new(&test_config(UNREACHABLE_AUTH), backend, store_with_snapshot(b"old"));

    harness.manager.ensure_engine().await.unwrap();

    assert_eq!(harness.manager.phase(), BootstrapPhase::SnapshotFailed);
    assert!(!harness.manager.snapshots().exists());
}

#[tokio::test]
async fn authentication_persists_the_session_snapshot() {
    let harness = Harness::new(
        &test_config(UNREACHABLE_AUTH),
        FakeBackend::default(),
        store_with_snapshot(b"old"),
    );
    harness.manager.start().await.unwrap();
    assert!(!harness.manager.refresh_authentication().await.unwrap());

    harness
        .backend
        .last_engine()
        .authenticated
        .store(true, Ordering::SeqCst);
    assert!(harness.manager.refresh_authentication().await.unwrap());

    assert_eq!(harness.manager.phase(), BootstrapPhase::Authenticated);
    let saved = SnapshotStore::new(harness.store.clone()).load().unwrap();
    assert_eq!(saved.as_deref(), Some(SAVED_SESSION));
}

#[tokio::test]
async fn missing_dependencies_block_construction() {
    let harness = Harness::without_dependencies(
        &test_config(UNREACHABLE_AUTH),
        FakeBackend::default(),
        store_with_snapshot(b"s"),
    );

    match harness.manager.ensure_engine().await {
        Err(Error::Bootstrap(BootstrapError::MissingDependencies(names))) => {
            assert!(names.contains(&"password_retriever"));
            assert!(names.contains(&"basket_handler"));
        }
        other => panic!("expected missing dependencies, got {:?}", other.err()),
    }
    assert_eq!(harness.manager.phase(), BootstrapPhase::ConfigComplete);
    assert_eq!(harness.backend.engines_created(), 0);
}

#[tokio::test]
async fn engine_receives_configured_inputs() {
    let mut config = test_config(UNREACHABLE_AUTH);
    config.wallet.auth_method = Some("twilio-phone".to_string());
    let harness = Harness::new(&config, FakeBackend::default(), store_with_snapshot(b"s"));

    harness.manager.ensure_engine().await.unwrap();

    let inputs = harness.backend.inputs.lock().unwrap()[0].clone();
    assert_eq!(inputs.admin_originator, "admin.walletdesk.test");
    assert_eq!(inputs.storage_url, "https://storage.walletdesk.test");
    assert_eq!(inputs.auth_method.as_deref(), Some("twilio-phone"));
    assert_eq!(harness.manager.network(), "testnet");
}

#[tokio::test]
async fn config_is_locked_once_an_engine_exists() {
    let harness = Harness::new(
        &test_config(UNREACHABLE_AUTH),
        FakeBackend::default(),
        store_with_snapshot(b"s"),
    );
    harness.manager.ensure_engine().await.unwrap();

    let err = harness
        .manager
        .edit_config(|config| config.storage_url = "https://elsewhere.test".to_string())
        .unwrap_err();
    assert!(matches!(err, BootstrapError::ConfigLocked));
}

#[tokio::test]
async fn fetch_after_construction_keeps_the_configured_auth_method() {
    let Some(url) = start_auth_server(
        StatusCode::OK,
        json!({"supportedAuthMethods": ["twilio-phone"]}),
    )
    .await
    else {
        eprintln!("skipping: cannot bind a local socket");
        return;
    };
    let harness = Harness::new(&test_config(&url), FakeBackend::default(), store_with_snapshot(b"s"));
    assert_eq!(harness.manager.config().auth_method, None);

    harness.manager.ensure_engine().await.unwrap();
    let info = harness.manager.fetch_auth_info().await.unwrap();

    assert_eq!(info.supported_auth_methods, vec!["twilio-phone".to_string()]);
    assert_eq!(harness.manager.config().auth_method, None);
    assert_eq!(harness.backend.inputs.lock().unwrap()[0].auth_method, None);
    assert_eq!(harness.manager.phase(), BootstrapPhase::SnapshotRestored);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let harness = Harness::new(
        &test_config(UNREACHABLE_AUTH),
        FakeBackend::default(),
        store_with_snapshot(b"s"),
    );
    harness.manager.start().await.unwrap();
    let layer = harness.backend.last_layer();

    let pending = layer.raise_basket(basket_event("b-1")).await.unwrap();
    assert_eq!(harness.bridge.pending_count(), 1);

    harness.manager.logout().await;

    assert_eq!(
        timeout(TIMEOUT, pending).await.unwrap(),
        Err(PermissionError::SessionEnded {
            kind: walletdesk::permissions::PermissionKind::Basket,
            request_id: "b-1".to_string(),
        })
    );
    assert_eq!(harness.manager.phase(), BootstrapPhase::Unconfigured);
    assert!(!harness.manager.is_config_complete());
    assert!(harness.manager.engine().is_none());
    assert!(!harness.manager.snapshots().exists());
    assert_eq!(harness.bridge.pending_count(), 0);
    assert!(!harness.manager.settings().has_manager());
    // The prompt opened unfocused, so focus was handed back.
    assert_eq!(harness.focus.requests(), 1);
    assert_eq!(harness.focus.relinquishes(), 1);
}

#[tokio::test]
async fn settings_sync_attaches_with_the_engine() {
    let backend = FakeBackend {
        with_settings: true,
        ..Default::default()
    };
    let harness = Harness::new(&test_config(UNREACHABLE_AUTH), backend, store_with_snapshot(b"s"));
    let mut settings = harness.manager.settings().subscribe();

    harness.manager.ensure_engine().await.unwrap();
    let engine = harness.backend.last_engine();
    assert!(harness.manager.settings().has_manager());

    let mut update = harness.manager.settings().current();
    update.currency = "GBP".to_string();
    harness
        .manager
        .settings()
        .update_settings(update.clone())
        .await
        .unwrap();

    timeout(TIMEOUT, settings.wait_for(|s| s.currency == "GBP"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        engine.settings.as_ref().unwrap().stored.lock().unwrap().clone(),
        Some(update)
    );
}
