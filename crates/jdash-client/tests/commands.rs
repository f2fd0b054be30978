mod common;

use common::{credential, default_reply, jimm_facades, login_ok, Call, FakeController, Reply};
use jdash_client::commands::{CommandError, Commands, ConfigOption, ConfigValue, SharingAction};
use jdash_client::config::{ControllerRegistration, PollerOptions};
use jdash_client::poller::ControllerPoller;
use jdash_client::registry::ConnectionRegistry;
use jdash_client::shared::StoreHandle;
use jdash_client::update::LatestVersionChecker;
use jdash_core::store::Store;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const MODEL: &str = "aaaa";

struct Connected {
    server: FakeController,
    store: StoreHandle,
    registry: Arc<ConnectionRegistry>,
    url: String,
    commands: Commands,
}

/// Logs in and runs one poll cycle so the model list and credentials are
/// in the store before any command runs.
async fn connected<F>(extra: F) -> Connected
where
    F: Fn(&Call) -> Option<Reply> + Send + Sync + 'static,
{
    let server = FakeController::start(move |call| {
        extra(call).unwrap_or_else(|| default_reply(call, &[MODEL], &|_| false))
    })
    .await;
    let url = server.url();
    let store = StoreHandle::new(Store::new());
    let registry = ConnectionRegistry::new();
    let options = PollerOptions {
        login_timeout: Duration::from_secs(2),
        ping_interval: Duration::from_secs(60),
        max_cycles: Some(1),
        ..PollerOptions::default()
    };
    ControllerPoller::new(
        store.clone(),
        registry.clone(),
        Arc::new(LatestVersionChecker::default()),
        options,
    )
    .run(&ControllerRegistration {
        ws_controller_url: url.clone(),
        credential: Some(credential()),
        identity_provider_available: false,
        additional_controller: false,
    })
    .await;
    let commands = Commands::new(store.clone(), registry.clone(), Duration::from_secs(2));
    Connected {
        server,
        store,
        registry,
        url,
        commands,
    }
}

fn jimm(call: &Call) -> Option<Reply> {
    match (call.facade.as_str(), call.request.as_str()) {
        ("Admin", "Login") => Some(login_ok(jimm_facades())),
        ("JIMM", "CheckRelation") => Some(Reply::Ok(json!({"allowed": false}))),
        ("JIMM", "ListControllers") => Some(Reply::Ok(json!({"controllers": []}))),
        ("JIMM", "CrossModelQuery") => Some(Reply::Ok(json!({
            "results": {MODEL: [{"applications": {"mysql": {}}}]},
            "errors": {},
        }))),
        _ => None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn set_config_sends_only_changed_options_as_strings() {
    let ctx = connected(|call| {
        call.is("Application", "SetConfigs")
            .then(|| Reply::Ok(json!({"results": [{"error": null}]})))
    })
    .await;

    let options = [
        ConfigOption {
            name: "port".to_string(),
            new_value: Some(ConfigValue::Int(3306)),
        },
        ConfigOption {
            name: "tuning".to_string(),
            new_value: None,
        },
        ConfigOption {
            name: "debug".to_string(),
            new_value: Some(ConfigValue::Bool(true)),
        },
    ];
    ctx.commands
        .set_application_config(MODEL, "mysql", &options)
        .await
        .expect("set config");

    let calls = ctx.server.calls();
    let set = calls
        .iter()
        .find(|call| call.is("Application", "SetConfigs"))
        .expect("set call");
    assert_eq!(set.model_uuid(), Some(MODEL));
    assert_eq!(
        set.params["Args"][0],
        json!({
            "application": "mysql",
            "config": {"debug": "true", "port": "3306"},
            "config-yaml": "",
            "generation": "",
        })
    );
    ctx.registry.close_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn set_config_surfaces_the_first_result_error() {
    let ctx = connected(|call| {
        call.is("Application", "SetConfigs")
            .then(|| Reply::Ok(json!({"results": [{"error": {"message": "bad option", "code": ""}}]})))
    })
    .await;
    let options = [ConfigOption {
        name: "port".to_string(),
        new_value: Some(ConfigValue::String("x".to_string())),
    }];
    let err = ctx
        .commands
        .set_application_config(MODEL, "mysql", &options)
        .await
        .expect_err("remote error");
    assert!(matches!(err, CommandError::Remote(message) if message == "bad option"));
    ctx.registry.close_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn actions_target_each_unit() {
    let ctx = connected(|call| {
        call.is("Action", "EnqueueOperation")
            .then(|| Reply::Ok(json!({"operation": "operation-1", "actions": []})))
    })
    .await;
    let mut parameters = BTreeMap::new();
    parameters.insert("mode".to_string(), json!("full"));
    let result = ctx
        .commands
        .execute_action_on_units(
            MODEL,
            &["mysql/0".to_string(), "mysql/1".to_string()],
            "backup",
            parameters,
        )
        .await
        .expect("enqueue");
    assert_eq!(result["operation"], json!("operation-1"));

    let calls = ctx.server.calls();
    let enqueue = calls
        .iter()
        .find(|call| call.is("Action", "EnqueueOperation"))
        .expect("enqueue call");
    assert_eq!(enqueue.version, 7);
    let receivers: Vec<&str> = enqueue.params["actions"]
        .as_array()
        .expect("actions")
        .iter()
        .map(|action| {
            assert_eq!(action["name"], json!("backup"));
            assert_eq!(action["parameters"]["mode"], json!("full"));
            action["receiver"].as_str().expect("receiver")
        })
        .collect();
    assert_eq!(receivers, ["unit-mysql-0", "unit-mysql-1"]);
    ctx.registry.close_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn charms_are_fetched_once_per_distinct_url() {
    let ctx = connected(|call| {
        call.is("Charms", "CharmInfo").then(|| {
            Reply::Ok(json!({
                "url": call.params["url"],
                "meta": {"name": "mysql"},
            }))
        })
    })
    .await;
    let charms = ctx
        .commands
        .get_charms_from_applications(MODEL, &["mysql".to_string(), "mysql".to_string(), "absent".to_string()])
        .await
        .expect("charms");
    assert_eq!(charms.len(), 1);
    assert_eq!(charms[0].url, "ch:amd64/jammy/mysql-1");
    assert_eq!(ctx.server.count("Charms", "CharmInfo"), 1);
    assert_eq!(ctx.store.read(|state| state.juju.charms.len()), 1);
    ctx.registry.close_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_models_and_controllers_are_rejected() {
    let ctx = connected(|_| None).await;
    let err = ctx
        .commands
        .get_application_config("missing", "mysql")
        .await
        .expect_err("unknown");
    assert!(matches!(err, CommandError::UnknownModel { uuid } if uuid == "missing"));

    let err = ctx
        .commands
        .cross_model_query("ws://nowhere/api", ".")
        .await
        .expect_err("not connected");
    assert!(matches!(err, CommandError::NotConnected { .. }));
    ctx.registry.close_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sharing_revokes_then_grants_and_refreshes_info() {
    let ctx = connected(|call| {
        call.is("ModelManager", "ModifyModelAccess")
            .then(|| Reply::Ok(json!({"results": [{"error": null}]})))
    })
    .await;
    let info_calls = ctx.server.count("ModelManager", "ModelInfo");
    let err = ctx
        .commands
        .set_model_sharing_permissions(&ctx.url, MODEL, "spaceman", None, None, SharingAction::Grant)
        .await
        .expect_err("nothing to do");
    assert!(matches!(err, CommandError::IncorrectOptions));
    assert_eq!(ctx.server.count("ModelManager", "ModifyModelAccess"), 0);
    assert_eq!(ctx.server.count("ModelManager", "ModelInfo"), info_calls + 1);

    ctx.commands
        .set_model_sharing_permissions(
            &ctx.url,
            MODEL,
            "spaceman",
            Some("write"),
            Some("read"),
            SharingAction::Grant,
        )
        .await
        .expect("share");

    let changes: Vec<(String, String)> = ctx
        .server
        .calls()
        .iter()
        .filter(|call| call.is("ModelManager", "ModifyModelAccess"))
        .map(|call| {
            let change = &call.params["changes"][0];
            assert_eq!(change["user-tag"], json!("user-spaceman"));
            assert_eq!(change["model-tag"], json!("model-aaaa"));
            (
                change["action"].as_str().unwrap_or_default().to_string(),
                change["access"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    assert_eq!(
        changes,
        [
            ("revoke".to_string(), "read".to_string()),
            ("grant".to_string(), "write".to_string()),
        ]
    );
    assert_eq!(ctx.server.count("ModelManager", "ModelInfo"), info_calls + 2);
    ctx.registry.close_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cross_model_queries_need_jimm() {
    let ctx = connected(|_| None).await;
    let err = ctx
        .commands
        .cross_model_query(&ctx.url, ".applications")
        .await
        .expect_err("not jimm");
    assert!(matches!(err, CommandError::NotJimm));
    assert_eq!(err.to_string(), "Not connected to JIMM.");
    ctx.registry.close_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cross_model_query_results_are_stored() {
    let ctx = connected(jimm).await;
    let response = ctx
        .commands
        .cross_model_query(&ctx.url, ".applications")
        .await
        .expect("query");
    assert_eq!(response.results[MODEL].len(), 1);

    let query = ctx.server.calls().into_iter().find(|call| call.is("JIMM", "CrossModelQuery")).expect("query call");
    assert_eq!(query.params["type"], json!("jq"));
    assert_eq!(query.params["query"], json!(".applications"));

    ctx.store.read(|state| {
        let stored = &state.juju.cross_model_query;
        assert!(stored.loaded);
        assert!(!stored.loading);
        assert_eq!(stored.query.as_deref(), Some(".applications"));
        assert!(stored.errors.is_none());
        assert_eq!(stored.results.as_ref().expect("results")[MODEL].len(), 1);
    });
    ctx.registry.close_all().await;
}
