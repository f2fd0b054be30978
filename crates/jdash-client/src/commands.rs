//! Single round-trip commands. Model commands open a short-lived model
//! connection; controller commands reuse the registered connection. None of
//! them retry.

use crate::connection::{connect_and_login_with_timeout, Connection, LoginError, RpcError};
use crate::facades;
use crate::registry::ConnectionRegistry;
use crate::session::model_login_method;
use crate::shared::StoreHandle;
use jdash_core::api::{
    application_tag, model_tag, unit_tag, ActionRequest, ApplicationConfigSet,
    ApplicationConfigSetArgs, ApplicationGetResults, AuditEvent, CharmInfo, CrossModelQueryResponse,
    EnqueueActions, Entities, Entity, ErrorResults, FindAuditEventsRequest, GrantRevokeSecretArg,
    GrantRevokeSecretArgs, ListSecretResults, ListSecretsArgs, ModifyModelAccess,
    ModifyModelAccessRequest, OperationQueryArgs,
};
use jdash_core::rpc::{model_endpoint, Facade};
use jdash_core::store::{ModelFeatures, StoreAction};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("no connection for {url}")]
    NotConnected { url: String },
    #[error("unknown model {uuid}")]
    UnknownModel { uuid: String },
    #[error("Not connected to JIMM.")]
    NotJimm,
    #[error("Incorrect options given.")]
    IncorrectOptions,
    #[error("model {uuid} does not support {operation}")]
    Unsupported { uuid: String, operation: &'static str },
    #[error(transparent)]
    Login(#[from] LoginError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("{0}")]
    Remote(String),
}

/// A new value for one application config option.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::String(value) => f.write_str(value),
            ConfigValue::Int(value) => write!(f, "{value}"),
            ConfigValue::Float(value) => write!(f, "{value}"),
            ConfigValue::Bool(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigOption {
    pub name: String,
    /// `None` leaves the option untouched.
    pub new_value: Option<ConfigValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharingAction {
    Grant,
    Revoke,
}

impl SharingAction {
    fn as_str(self) -> &'static str {
        match self {
            SharingAction::Grant => "grant",
            SharingAction::Revoke => "revoke",
        }
    }
}

pub struct Commands {
    store: StoreHandle,
    registry: Arc<ConnectionRegistry>,
    login_timeout: Duration,
}

impl Commands {
    pub fn new(store: StoreHandle, registry: Arc<ConnectionRegistry>, login_timeout: Duration) -> Self {
        Self {
            store,
            registry,
            login_timeout,
        }
    }

    pub async fn get_application_config(
        &self,
        model_uuid: &str,
        application: &str,
    ) -> Result<ApplicationGetResults, CommandError> {
        let conn = self.open_model(model_uuid).await?;
        finish(&conn, facades::application_get(&conn, application).await).await
    }

    /// Only options carrying a new value are sent, as strings.
    pub async fn set_application_config(
        &self,
        model_uuid: &str,
        application: &str,
        options: &[ConfigOption],
    ) -> Result<ErrorResults, CommandError> {
        let config: BTreeMap<String, String> = options
            .iter()
            .filter_map(|option| {
                option
                    .new_value
                    .as_ref()
                    .map(|value| (option.name.clone(), value.to_string()))
            })
            .collect();
        let args = ApplicationConfigSetArgs {
            args: vec![ApplicationConfigSet {
                application: application.to_string(),
                config,
                config_yaml: String::new(),
                generation: String::new(),
            }],
        };
        let conn = self.open_model(model_uuid).await?;
        let results = finish(&conn, facades::application_set_configs(&conn, &args).await).await?;
        check_results(results)
    }

    pub async fn get_actions_for_application(
        &self,
        model_uuid: &str,
        application: &str,
    ) -> Result<Value, CommandError> {
        let conn = self.open_model(model_uuid).await?;
        let entities = Entities::single(application_tag(application));
        finish(&conn, facades::applications_charms_actions(&conn, &entities).await).await
    }

    /// `units` are unit names such as `mysql/0`.
    pub async fn execute_action_on_units(
        &self,
        model_uuid: &str,
        units: &[String],
        action_name: &str,
        parameters: BTreeMap<String, Value>,
    ) -> Result<Value, CommandError> {
        let actions = EnqueueActions {
            actions: units
                .iter()
                .map(|unit| ActionRequest {
                    name: action_name.to_string(),
                    receiver: unit_tag(unit),
                    parameters: parameters.clone(),
                    tag: String::new(),
                })
                .collect(),
        };
        let conn = self.open_model(model_uuid).await?;
        let result = finish(&conn, facades::enqueue_operation(&conn, &actions).await).await;
        if result.is_ok() {
            info!(event = "action_enqueued", model_uuid = model_uuid, action = action_name, units = units.len());
        }
        result
    }

    pub async fn query_operations_list(
        &self,
        model_uuid: &str,
        query: &OperationQueryArgs,
    ) -> Result<Value, CommandError> {
        let conn = self.open_model(model_uuid).await?;
        finish(&conn, facades::list_operations(&conn, query).await).await
    }

    pub async fn query_actions_list(
        &self,
        model_uuid: &str,
        action_ids: &[String],
    ) -> Result<Value, CommandError> {
        let entities = Entities {
            entities: action_ids
                .iter()
                .map(|id| Entity {
                    tag: format!("action-{id}"),
                })
                .collect(),
        };
        let conn = self.open_model(model_uuid).await?;
        finish(&conn, facades::actions(&conn, &entities).await).await
    }

    pub async fn get_charm_info(&self, model_uuid: &str, charm_url: &str) -> Result<CharmInfo, CommandError> {
        let conn = self.open_model(model_uuid).await?;
        finish(&conn, facades::charm_info(&conn, charm_url).await).await
    }

    /// Looks up the charm of each application in the stored status and
    /// fetches each distinct charm once.
    pub async fn get_charms_from_applications(
        &self,
        model_uuid: &str,
        applications: &[String],
    ) -> Result<Vec<CharmInfo>, CommandError> {
        let (ws_controller_url, urls) = self.store.read(|state| {
            let url = state
                .model_by_uuid(model_uuid)
                .map(|model| model.ws_controller_url.clone());
            let urls: BTreeSet<String> = state
                .model_data(model_uuid)
                .and_then(|data| data.status.as_ref())
                .map(|status| {
                    applications
                        .iter()
                        .filter_map(|name| status.applications.get(name))
                        .map(|app| app.charm.clone())
                        .filter(|charm| !charm.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            (url, urls)
        });
        let ws_controller_url = ws_controller_url.ok_or_else(|| CommandError::UnknownModel {
            uuid: model_uuid.to_string(),
        })?;
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.open_model(model_uuid).await?;
        let mut charms = Vec::with_capacity(urls.len());
        for url in &urls {
            match facades::charm_info(&conn, url).await {
                Ok(charm) => charms.push(charm),
                Err(err) => {
                    conn.close().await;
                    return Err(err.into());
                }
            }
        }
        conn.close().await;
        let _ = self.store.dispatch(StoreAction::UpdateCharms {
            ws_controller_url,
            charms: charms.clone(),
        });
        Ok(charms)
    }

    pub async fn list_secrets(&self, model_uuid: &str, show_secrets: bool) -> Result<ListSecretResults, CommandError> {
        self.require_feature(model_uuid, "list secrets", |features| features.list_secrets)?;
        let args = ListSecretsArgs {
            show_secrets,
            filter: None,
        };
        let conn = self.open_model(model_uuid).await?;
        finish(&conn, facades::list_secrets(&conn, &args).await).await
    }

    pub async fn grant_secret_access(
        &self,
        model_uuid: &str,
        secret_uri: &str,
        applications: &[String],
    ) -> Result<ErrorResults, CommandError> {
        self.require_feature(model_uuid, "manage secrets", |features| features.manage_secrets)?;
        let args = secret_access_args(model_uuid, secret_uri, applications);
        let conn = self.open_model(model_uuid).await?;
        let results = finish(&conn, facades::grant_secret(&conn, &args).await).await?;
        check_results(results)
    }

    pub async fn revoke_secret_access(
        &self,
        model_uuid: &str,
        secret_uri: &str,
        applications: &[String],
    ) -> Result<ErrorResults, CommandError> {
        self.require_feature(model_uuid, "manage secrets", |features| features.manage_secrets)?;
        let args = secret_access_args(model_uuid, secret_uri, applications);
        let conn = self.open_model(model_uuid).await?;
        let results = finish(&conn, facades::revoke_secret(&conn, &args).await).await?;
        check_results(results)
    }

    /// Revoke the previous access level, grant the new one, then refresh
    /// the stored model info.
    pub async fn set_model_sharing_permissions(
        &self,
        ws_controller_url: &str,
        model_uuid: &str,
        user: &str,
        permission_to: Option<&str>,
        permission_from: Option<&str>,
        action: SharingAction,
    ) -> Result<ErrorResults, CommandError> {
        let conn = self.controller(ws_controller_url).await?;
        let modify = |access: &str, action: SharingAction| ModifyModelAccessRequest {
            changes: vec![ModifyModelAccess {
                access: access.to_string(),
                action: action.as_str().to_string(),
                model_tag: model_tag(model_uuid),
                user_tag: jdash_core::api::user_tag(user),
            }],
        };

        let mut response = None;
        if let Some(from) = permission_from {
            response = Some(
                facades::modify_model_access(&conn, &modify(from, SharingAction::Revoke)).await?,
            );
        }
        if action == SharingAction::Grant {
            if let Some(to) = permission_to {
                response = Some(
                    facades::modify_model_access(&conn, &modify(to, SharingAction::Grant)).await?,
                );
            }
        }

        // Model info is refreshed even when there was nothing to change.
        let info = facades::model_info(&conn, &model_tag(model_uuid)).await?;
        if let Some(info) = info.first() {
            let _ = self.store.dispatch(StoreAction::UpdateModelInfo {
                ws_controller_url: ws_controller_url.to_string(),
                info: info.clone(),
            });
        }
        check_results(response.ok_or(CommandError::IncorrectOptions)?)
    }

    pub async fn find_audit_events(
        &self,
        ws_controller_url: &str,
        request: FindAuditEventsRequest,
    ) -> Result<Vec<AuditEvent>, CommandError> {
        let conn = self.jimm(ws_controller_url).await?;
        let _ = self.store.dispatch(StoreAction::FetchAuditEvents {
            ws_controller_url: ws_controller_url.to_string(),
            params: request.clone(),
        });
        match facades::jimm_find_audit_events(&conn, &request).await {
            Ok(events) => {
                let _ = self
                    .store
                    .dispatch(StoreAction::UpdateAuditEvents(events.events.clone()));
                Ok(events.events)
            }
            Err(err) => {
                let _ = self
                    .store
                    .dispatch(StoreAction::UpdateAuditEventsErrors(Some(err.to_string())));
                Err(err.into())
            }
        }
    }

    pub async fn cross_model_query(
        &self,
        ws_controller_url: &str,
        query: &str,
    ) -> Result<CrossModelQueryResponse, CommandError> {
        let conn = self.jimm(ws_controller_url).await?;
        let _ = self.store.dispatch(StoreAction::FetchCrossModelQuery {
            ws_controller_url: ws_controller_url.to_string(),
            query: query.to_string(),
        });
        match facades::jimm_cross_model_query(&conn, query).await {
            Ok(response) => {
                let errors = if response.errors.is_empty() {
                    None
                } else {
                    serde_json::to_value(&response.errors).ok()
                };
                let _ = self.store.dispatch(StoreAction::UpdateCrossModelQuery {
                    results: Some(response.results.clone()),
                    errors,
                });
                Ok(response)
            }
            Err(err) => {
                let _ = self.store.dispatch(StoreAction::UpdateCrossModelQuery {
                    results: None,
                    errors: Some(Value::String(err.to_string())),
                });
                Err(err.into())
            }
        }
    }

    async fn controller(&self, ws_controller_url: &str) -> Result<Arc<Connection>, CommandError> {
        self.registry
            .get(ws_controller_url)
            .await
            .ok_or_else(|| CommandError::NotConnected {
                url: ws_controller_url.to_string(),
            })
    }

    async fn jimm(&self, ws_controller_url: &str) -> Result<Arc<Connection>, CommandError> {
        let conn = self.controller(ws_controller_url).await?;
        if !conn.facades().await.has(Facade::Jimm) {
            return Err(CommandError::NotJimm);
        }
        Ok(conn)
    }

    async fn open_model(&self, model_uuid: &str) -> Result<Connection, CommandError> {
        let ws_controller_url = self
            .store
            .read(|state| {
                state
                    .model_by_uuid(model_uuid)
                    .map(|model| model.ws_controller_url.clone())
            })
            .ok_or_else(|| CommandError::UnknownModel {
                uuid: model_uuid.to_string(),
            })?;
        let method = model_login_method(&self.store, &self.registry, &ws_controller_url)
            .await
            .ok_or_else(|| CommandError::NotConnected {
                url: ws_controller_url.clone(),
            })?;
        let url = model_endpoint(&ws_controller_url, model_uuid);
        Ok(connect_and_login_with_timeout(&url, &method, self.login_timeout, |_| {}).await?)
    }

    /// Features are only enforced once the poller has recorded them.
    fn require_feature(
        &self,
        model_uuid: &str,
        operation: &'static str,
        check: impl FnOnce(&ModelFeatures) -> bool,
    ) -> Result<(), CommandError> {
        let features = self
            .store
            .read(|state| state.model_data(model_uuid).and_then(|data| data.features));
        match features {
            Some(features) if !check(&features) => Err(CommandError::Unsupported {
                uuid: model_uuid.to_string(),
                operation,
            }),
            _ => Ok(()),
        }
    }
}

async fn finish<T>(conn: &Connection, result: Result<T, RpcError>) -> Result<T, CommandError> {
    conn.close().await;
    if let Err(err) = &result {
        warn!(event = "command_failed", url = %conn.url(), error = %err);
    }
    Ok(result?)
}

fn check_results(results: ErrorResults) -> Result<ErrorResults, CommandError> {
    match results.first_error() {
        Some(error) => Err(CommandError::Remote(error.message.clone())),
        None => Ok(results),
    }
}

fn secret_access_args(model_uuid: &str, uri: &str, applications: &[String]) -> GrantRevokeSecretArgs {
    GrantRevokeSecretArgs {
        args: vec![GrantRevokeSecretArg {
            uri: uri.to_string(),
            label: None,
            scope_tag: model_tag(model_uuid),
            subject_tags: applications.iter().map(|app| application_tag(app)).collect(),
            role: "view".to_string(),
        }],
    }
}
