//! Login, startup restore and logout flows. All state changes go through
//! store actions.

use crate::config::{ControllerRegistration, PollerOptions};
use crate::connection::{
    connect_and_login_with_timeout, determine_login_method, Connection, LoginError, LoginMethod,
};
use crate::heartbeat::start_heartbeat;
use crate::registry::ConnectionRegistry;
use crate::shared::StoreHandle;
use crate::watcher::ModelWatchers;
use jdash_core::errors::LoginErrorLabel;
use jdash_core::store::{ControllerEntry, DashboardConfig, StoreAction};
use jdash_storage::SettingsStore;
use std::sync::Arc;
use tracing::{info, warn};

pub const CONNECTION_LOST: &str = "Lost connection to controller.";

/// Log into one controller, register its connection and start its
/// heartbeat. Failures are recorded against the controller URL.
pub async fn login_controller(
    store: &StoreHandle,
    registry: &Arc<ConnectionRegistry>,
    registration: &ControllerRegistration,
    options: &PollerOptions,
) -> Result<Arc<Connection>, LoginError> {
    let url = registration.ws_controller_url.as_str();
    if let Some(credential) = &registration.credential {
        let _ = store.dispatch(StoreAction::StoreUserPass {
            ws_controller_url: url.to_string(),
            credential: credential.clone(),
        });
    }
    let _ = store.dispatch(StoreAction::BeginLogin {
        ws_controller_url: url.to_string(),
    });

    let visit_store = store.clone();
    let visit_url_for = url.to_string();
    let result = match determine_login_method(
        url,
        registration.credential.as_ref(),
        registration.identity_provider_available,
    ) {
        Ok(method) => {
            connect_and_login_with_timeout(url, &method, options.login_timeout, move |visit_url| {
                let _ = visit_store.dispatch(StoreAction::StoreVisitUrl {
                    ws_controller_url: visit_url_for.clone(),
                    visit_url: visit_url.to_string(),
                });
            })
            .await
        }
        Err(err) => Err(err),
    };

    let conn = match result {
        Ok(conn) => Arc::new(conn),
        Err(err) => {
            warn!(event = "controller_login_failed", url = url, error = %err);
            let _ = store.dispatch(StoreAction::StoreLoginError {
                ws_controller_url: url.to_string(),
                error: login_error_message(&err),
            });
            return Err(err);
        }
    };

    let Some(info) = conn.login_result().await else {
        let err = LoginError::NoInfo;
        let _ = store.dispatch(StoreAction::StoreLoginError {
            ws_controller_url: url.to_string(),
            error: login_error_message(&err),
        });
        conn.close().await;
        return Err(err);
    };
    let _ = store.dispatch(StoreAction::UpdateControllerConnection {
        ws_controller_url: url.to_string(),
        info,
    });

    let heartbeat = start_heartbeat(conn.clone(), options.ping_interval);
    watch_heartbeat(store.clone(), registry.clone(), url.to_string(), &heartbeat);
    let _ = store.dispatch(StoreAction::UpdatePingerState {
        ws_controller_url: url.to_string(),
        active: true,
    });
    registry.insert(url, conn.clone(), Some(heartbeat)).await;
    info!(event = "controller_login", url = url);
    Ok(conn)
}

/// When the heartbeat gives up, drop the connection and flip the
/// controller to logged out so its poller stops at the next boundary.
fn watch_heartbeat(
    store: StoreHandle,
    registry: Arc<ConnectionRegistry>,
    url: String,
    heartbeat: &crate::heartbeat::Heartbeat,
) {
    let mut stopped = heartbeat.stopped_signal();
    tokio::spawn(async move {
        if stopped.wait_for(|stopped| *stopped).await.is_err() {
            return;
        }
        let _ = store.dispatch(StoreAction::UpdatePingerState {
            ws_controller_url: url.clone(),
            active: false,
        });
        let _ = store.dispatch(StoreAction::StoreLoginError {
            ws_controller_url: url.clone(),
            error: CONNECTION_LOST.to_string(),
        });
        registry.remove(&url).await;
    });
}

pub fn login_error_message(err: &LoginError) -> String {
    match err {
        LoginError::NoInfo => LoginErrorLabel::NoInfo.as_str().to_string(),
        LoginError::Rejected(message) => message.clone(),
        other => format!("{} {other}", LoginErrorLabel::Log.as_str()),
    }
}

/// How to log into a model on a controller that is already connected.
pub async fn model_login_method(
    store: &StoreHandle,
    registry: &ConnectionRegistry,
    ws_controller_url: &str,
) -> Option<LoginMethod> {
    if let Some(credential) = store.read(|state| state.credentials(ws_controller_url).cloned()) {
        return Some(LoginMethod::Password(credential));
    }
    let conn = registry.get(ws_controller_url).await?;
    Some(match conn.discharged_macaroon().await {
        Some(macaroon) => LoginMethod::Macaroon(macaroon),
        None => LoginMethod::External,
    })
}

/// Read persisted additional controllers. A broken settings entry is logged
/// and ignored.
pub fn restore_additional_controllers(
    settings: &SettingsStore,
    store: &StoreHandle,
) -> Vec<ControllerRegistration> {
    let stored = match settings.additional_controllers() {
        Ok(stored) => stored,
        Err(err) => {
            warn!(event = "additional_controllers_invalid", error = %err);
            return Vec::new();
        }
    };
    stored
        .into_iter()
        .map(|controller| {
            if let Some(credential) = &controller.credential {
                let _ = store.dispatch(StoreAction::StoreUserPass {
                    ws_controller_url: controller.ws_controller_url.clone(),
                    credential: credential.clone(),
                });
            }
            let _ = store.dispatch(StoreAction::UpdateControllerList {
                ws_controller_url: controller.ws_controller_url.clone(),
                controllers: vec![ControllerEntry::AdditionalController],
            });
            ControllerRegistration {
                ws_controller_url: controller.ws_controller_url,
                credential: controller.credential,
                identity_provider_available: controller.identity_provider_available,
                additional_controller: controller.additional_controller,
            }
        })
        .collect()
}

/// The configured controller first, then additional ones, without
/// duplicates.
pub fn controllers_to_poll(
    config: &DashboardConfig,
    primary: Option<jdash_core::store::Credential>,
    additional: Vec<ControllerRegistration>,
) -> Vec<ControllerRegistration> {
    let mut controllers = Vec::new();
    if !config.controller_api_endpoint.is_empty() {
        controllers.push(ControllerRegistration {
            ws_controller_url: config.controller_api_endpoint.clone(),
            credential: primary,
            identity_provider_available: config.identity_provider_available,
            additional_controller: false,
        });
    }
    for registration in additional {
        if controllers
            .iter()
            .all(|existing| existing.ws_controller_url != registration.ws_controller_url)
        {
            controllers.push(registration);
        }
    }
    controllers
}

/// Tear everything down, then clear the session state in one action.
pub async fn log_out(
    store: &StoreHandle,
    registry: &ConnectionRegistry,
    watchers: &ModelWatchers,
    settings: Option<&SettingsStore>,
) {
    if let Some(settings) = settings {
        if let Err(err) = settings.clear_additional_controllers() {
            warn!(event = "additional_controllers_clear_failed", error = %err);
        }
    }
    let stopped = watchers.stop_all().await;
    let closed = registry.close_all().await;
    let _ = store.dispatch(StoreAction::LogOut);
    info!(event = "logged_out", connections = closed, watchers = stopped);
}

#[cfg(test)]
mod tests {
    use super::*;
    use jdash_core::store::{Credential, Store};
    use jdash_storage::StoredController;
    use serde_json::json;

    fn credential() -> Credential {
        Credential {
            user: "eggman".to_string(),
            password: "verysecure123".to_string(),
        }
    }

    #[test]
    fn restores_additional_controllers() {
        let settings = SettingsStore::open_in_memory().expect("settings");
        settings
            .add_additional_controller(StoredController {
                ws_controller_url: "wss://extra.example.com/api".to_string(),
                credential: Some(credential()),
                identity_provider_available: false,
                additional_controller: true,
            })
            .expect("add");
        let store = StoreHandle::new(Store::new());

        let restored = restore_additional_controllers(&settings, &store);
        assert_eq!(restored.len(), 1);
        store.read(|state| {
            assert_eq!(
                state.credentials("wss://extra.example.com/api"),
                Some(&credential())
            );
            assert_eq!(
                state.controllers("wss://extra.example.com/api"),
                &[ControllerEntry::AdditionalController]
            );
        });
    }

    #[test]
    fn broken_settings_are_ignored() {
        let settings = SettingsStore::open_in_memory().expect("settings");
        settings
            .set(jdash_storage::ADDITIONAL_CONTROLLERS_KEY, &json!("oops"))
            .expect("set");
        let store = StoreHandle::new(Store::new());
        assert!(restore_additional_controllers(&settings, &store).is_empty());
    }

    #[test]
    fn primary_controller_comes_first_without_duplicates() {
        let config = DashboardConfig {
            controller_api_endpoint: "wss://example.com/api".to_string(),
            ..DashboardConfig::default()
        };
        let extra = |url: &str| ControllerRegistration {
            ws_controller_url: url.to_string(),
            credential: None,
            identity_provider_available: false,
            additional_controller: true,
        };
        let controllers = controllers_to_poll(
            &config,
            Some(credential()),
            vec![extra("wss://example.com/api"), extra("wss://other.example.com/api")],
        );
        let urls: Vec<&str> = controllers
            .iter()
            .map(|c| c.ws_controller_url.as_str())
            .collect();
        assert_eq!(urls, ["wss://example.com/api", "wss://other.example.com/api"]);
        assert!(!controllers[0].additional_controller);
    }

    #[test]
    fn login_errors_use_dashboard_labels() {
        assert_eq!(
            login_error_message(&LoginError::NoInfo),
            "Unable to retrieve controller details."
        );
        assert!(login_error_message(&LoginError::Timeout {
            after: std::time::Duration::from_millis(5000)
        })
        .starts_with("Unable to log into controller."));
    }
}
