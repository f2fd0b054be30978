mod common;

use common::{credential, full_status, juju_facades, login_ok, wait_until, FakeController, Reply};
use jdash_client::config::PollerOptions;
use jdash_client::connection::LoginMethod;
use jdash_client::shared::StoreHandle;
use jdash_client::watcher::{start_model_watcher, ModelWatchers, WatcherState};
use jdash_core::errors::WatcherErrorLabel;
use jdash_core::rpc::{LoginResult, UserInfo};
use jdash_core::store::{Store, StoreAction};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const MODEL: &str = "aaaa";

fn options() -> PollerOptions {
    PollerOptions {
        login_timeout: Duration::from_secs(2),
        ping_interval: Duration::from_secs(60),
        ..PollerOptions::default()
    }
}

fn logged_in(url: &str) -> StoreHandle {
    let store = StoreHandle::new(Store::new());
    store
        .dispatch(StoreAction::UpdateControllerConnection {
            ws_controller_url: url.to_string(),
            info: LoginResult {
                server_version: Some("3.1.6".to_string()),
                user_info: Some(UserInfo {
                    identity: "user-eggman".to_string(),
                    ..UserInfo::default()
                }),
                ..LoginResult::default()
            },
        })
        .expect("login");
    store
}

fn application(name: &str) -> serde_json::Value {
    json!(["application", "change", {"model-uuid": MODEL, "name": name, "charm-url": format!("ch:{name}-1")}])
}

/// Serves one model whose watcher hands out `batches` in order and then
/// blocks.
async fn model_server(batches: Vec<serde_json::Value>) -> FakeController {
    model_server_then(batches, Reply::Never).await
}

/// Like `model_server`, answering every `Next` after the batches with
/// `exhausted`.
async fn model_server_then(batches: Vec<serde_json::Value>, exhausted: Reply) -> FakeController {
    let next = Arc::new(AtomicUsize::new(0));
    FakeController::start(move |call| match (call.facade.as_str(), call.request.as_str()) {
        ("Admin", "Login") => login_ok(juju_facades()),
        ("Client", "WatchAll") => Reply::Ok(json!({"watcher-id": "7"})),
        ("Client", "FullStatus") => full_status("model-aaaa"),
        ("AllWatcher", "Next") => {
            let index = next.fetch_add(1, Ordering::SeqCst);
            match batches.get(index) {
                Some(batch) => Reply::Ok(json!({ "deltas": batch })),
                None => exhausted.clone(),
            }
        }
        ("AllWatcher", "Stop") => Reply::Ok(json!({})),
        ("Pinger", "Ping") => Reply::Ok(json!({})),
        _ => Reply::error("not implemented"),
    })
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn seeds_then_applies_batches_and_skips_malformed_ones() {
    let server = model_server(vec![
        json!([application("etcd")]),
        json!([["unit", "change"]]),
        json!([application("redis")]),
    ])
    .await;
    let url = server.url();
    let store = logged_in(&url);

    let handle = start_model_watcher(
        store.clone(),
        &url,
        MODEL,
        LoginMethod::Password(credential()),
        &options(),
    );
    let applied = wait_until(Duration::from_secs(3), || {
        store.read(|state| {
            state
                .model_snapshot(MODEL)
                .is_some_and(|snapshot| snapshot.applications.contains_key("redis"))
        })
    })
    .await;
    assert!(applied);
    assert_eq!(handle.state(), WatcherState::Watching);

    store.read(|state| {
        let snapshot = state.model_snapshot(MODEL).expect("snapshot");
        assert_eq!(snapshot.model.name.as_deref(), Some("model-aaaa"));
        assert!(snapshot.applications.contains_key("mysql"));
        assert!(snapshot.applications.contains_key("etcd"));
        assert!(snapshot.units.contains_key("mysql/0"));
    });

    let calls = server.calls();
    let watch = calls
        .iter()
        .position(|call| call.is("Client", "WatchAll"))
        .expect("watch");
    let seed = calls
        .iter()
        .position(|call| call.is("Client", "FullStatus"))
        .expect("seed");
    assert!(watch < seed);
    assert!(calls.iter().all(|call| call.model_uuid() == Some(MODEL)));
    assert!(calls
        .iter()
        .filter(|call| call.is("AllWatcher", "Next"))
        .all(|call| call.params["id"] == json!("7")));

    let mut state = handle.state_signal();
    handle.stop().await;
    assert_eq!(*state.borrow_and_update(), WatcherState::Stopped);
    assert_eq!(server.count("AllWatcher", "Stop"), 1);
    assert!(store.read(|state| state.model_snapshot(MODEL).is_none()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_login_is_recorded_as_no_connection() {
    let server = FakeController::start(|_| Reply::error("invalid entity name or password")).await;
    let url = server.url();
    let store = logged_in(&url);

    let handle = start_model_watcher(
        store.clone(),
        &url,
        MODEL,
        LoginMethod::Password(credential()),
        &options(),
    );
    let failed = WatcherState::Failed(WatcherErrorLabel::NoConnection);
    assert!(wait_until(Duration::from_secs(3), || handle.state() == failed).await);
    assert_eq!(
        store.read(|state| state.juju.model_watcher_errors.get(MODEL).cloned()),
        Some(WatcherErrorLabel::NoConnection.as_str().to_string())
    );
    assert!(store.read(|state| state.model_snapshot(MODEL).is_none()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_watcher_id_is_recorded_as_no_id() {
    let server = FakeController::start(|call| match call.request.as_str() {
        "Login" => login_ok(juju_facades()),
        "WatchAll" => Reply::Ok(json!({})),
        _ => Reply::error("not implemented"),
    })
    .await;
    let url = server.url();
    let store = logged_in(&url);

    let handle = start_model_watcher(
        store.clone(),
        &url,
        MODEL,
        LoginMethod::Password(credential()),
        &options(),
    );
    let failed = WatcherState::Failed(WatcherErrorLabel::NoId);
    assert!(wait_until(Duration::from_secs(3), || handle.state() == failed).await);
    assert_eq!(server.count("Client", "FullStatus"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replacing_a_watcher_stops_the_previous_one() {
    let server = model_server(Vec::new()).await;
    let url = server.url();
    let store = logged_in(&url);
    let watchers = ModelWatchers::new();

    for _ in 0..2 {
        let handle = start_model_watcher(
            store.clone(),
            &url,
            MODEL,
            LoginMethod::Password(credential()),
            &options(),
        );
        let mut state = handle.state_signal();
        tokio::time::timeout(
            Duration::from_secs(3),
            state.wait_for(|state| *state == WatcherState::Watching),
        )
        .await
        .expect("watching")
        .expect("state");
        watchers.insert(handle).await;
    }

    assert_eq!(server.count("AllWatcher", "Stop"), 1);
    assert_eq!(watchers.state(MODEL).await, Some(WatcherState::Watching));
    assert_eq!(watchers.stop_all().await, 1);
    assert_eq!(server.count("AllWatcher", "Stop"), 2);
    assert!(!watchers.stop(MODEL).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn seeding_for_a_logged_out_controller_fails_the_watcher() {
    let server = model_server(vec![json!([application("etcd")])]).await;
    let url = server.url();
    let store = StoreHandle::new(Store::new());

    let handle = start_model_watcher(
        store.clone(),
        &url,
        MODEL,
        LoginMethod::Password(credential()),
        &options(),
    );
    let failed = WatcherState::Failed(WatcherErrorLabel::NoConnection);
    assert!(wait_until(Duration::from_secs(3), || handle.state() == failed).await);
    assert_eq!(
        store.read(|state| state.juju.model_watcher_errors.get(MODEL).cloned()),
        Some(WatcherErrorLabel::NoConnection.as_str().to_string())
    );
    assert!(store.read(|state| state.model_snapshot(MODEL).is_none()));
    assert_eq!(server.count("AllWatcher", "Stop"), 1);
    assert_eq!(server.count("AllWatcher", "Next"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn next_failing_mid_watch_fails_the_watcher() {
    let server = model_server_then(vec![json!([application("etcd")])], Reply::error("watcher was stopped")).await;
    let url = server.url();
    let store = logged_in(&url);

    let handle = start_model_watcher(
        store.clone(),
        &url,
        MODEL,
        LoginMethod::Password(credential()),
        &options(),
    );
    let failed = WatcherState::Failed(WatcherErrorLabel::NoConnection);
    assert!(wait_until(Duration::from_secs(3), || handle.state() == failed).await);
    assert_eq!(server.count("AllWatcher", "Next"), 2);
    store.read(|state| {
        assert_eq!(
            state.juju.model_watcher_errors.get(MODEL).cloned(),
            Some(WatcherErrorLabel::NoConnection.as_str().to_string())
        );
        let snapshot = state.model_snapshot(MODEL).expect("snapshot");
        assert!(snapshot.applications.contains_key("etcd"));
    });
}
