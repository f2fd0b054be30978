//! Per-controller poll loop. Errors are caught here and recorded as store
//! actions; only logout (or the cycle limit) ends a loop.

use crate::config::{ControllerRegistration, PollerOptions, MODEL_FETCH_CONCURRENCY};
use crate::connection::{determine_login_method, Connection, LoginError, LoginMethod};
use crate::facades;
use crate::models::fetch_model_status;
use crate::registry::ConnectionRegistry;
use crate::session::login_controller;
use crate::shared::StoreHandle;
use crate::update::{update_available_or_false, UpdateChecker};
use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use jdash_core::api::{
    user_tag, JimmController, JIMM_CONTROLLER_OBJECT, RELATION_ADMINISTRATOR,
    RELATION_AUDIT_LOG_VIEWER,
};
use jdash_core::errors::{AuditLogsError, ModelsError, CONTROLLER_LIST_ERROR};
use jdash_core::rpc::Facade;
use jdash_core::store::{
    ControllerEntry, ControllerFeatures, ControllerLocation, ControllerRecord, ModelSummary,
    StoreAction,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Facade versions at which JIMM gains cross-model queries and audit logs.
const JIMM_FEATURE_VERSION: u32 = 4;

#[derive(Debug)]
pub enum PollExit {
    AlreadyConnected,
    LoginFailed(LoginError),
    LoggedOut { cycles: usize },
    CycleLimit { cycles: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub total: usize,
    pub errors: usize,
    pub error: Option<ModelsError>,
}

/// Label for a finished fan-out, or `None` when it stayed under the
/// threshold.
pub fn models_error_for(errors: usize, total: usize, first_cycle: bool) -> Option<ModelsError> {
    if errors == 0 || errors * 10 < total {
        return None;
    }
    Some(if !first_cycle {
        ModelsError::LoadLatestModels
    } else if errors >= total {
        ModelsError::LoadAllModels
    } else {
        ModelsError::LoadSomeModels
    })
}

pub struct ControllerPoller {
    store: StoreHandle,
    registry: Arc<ConnectionRegistry>,
    checker: Arc<dyn UpdateChecker>,
    options: PollerOptions,
}

impl ControllerPoller {
    pub fn new(
        store: StoreHandle,
        registry: Arc<ConnectionRegistry>,
        checker: Arc<dyn UpdateChecker>,
        options: PollerOptions,
    ) -> Self {
        Self {
            store,
            registry,
            checker,
            options,
        }
    }

    /// Poll a batch of controllers concurrently. Pending visit URLs are
    /// cleared once for the batch, never per controller, so one login
    /// cannot wipe another's external-auth prompt.
    pub async fn run_all(&self, registrations: &[ControllerRegistration]) -> Vec<(String, PollExit)> {
        let _ = self.store.dispatch(StoreAction::ClearVisitUrls);
        join_all(registrations.iter().map(|registration| async move {
            let exit = self.run(registration).await;
            (registration.ws_controller_url.clone(), exit)
        }))
        .await
    }

    /// Log in, then poll until the controller is logged out.
    pub async fn run(&self, registration: &ControllerRegistration) -> PollExit {
        let url = registration.ws_controller_url.as_str();
        if self.registry.contains(url).await {
            debug!(event = "poller_skip_connected", url = url);
            return PollExit::AlreadyConnected;
        }

        let conn = match login_controller(&self.store, &self.registry, registration, &self.options).await {
            Ok(conn) => conn,
            Err(err) => return PollExit::LoginFailed(err),
        };
        self.prepare_controller(&conn, registration).await;

        let method = match model_method(&conn, registration).await {
            Ok(method) => method,
            Err(err) => return PollExit::LoginFailed(err),
        };

        let mut cycles = 0;
        loop {
            if !self.store.read(|state| state.is_logged_in(url)) {
                info!(event = "poller_stopped", url = url, cycles = cycles);
                return PollExit::LoggedOut { cycles };
            }
            let report = self.poll_once(&conn, &method, url, cycles == 0).await;
            debug!(
                event = "poll_cycle",
                url = url,
                cycle = cycles,
                total = report.total,
                errors = report.errors,
            );
            cycles += 1;
            if self.options.max_cycles.is_some_and(|max| cycles >= max) {
                return PollExit::CycleLimit { cycles };
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    /// One cycle: list models, then fetch each with at most
    /// `MODEL_FETCH_CONCURRENCY` in flight.
    pub async fn poll_once(
        &self,
        conn: &Connection,
        method: &LoginMethod,
        url: &str,
        first_cycle: bool,
    ) -> CycleReport {
        let report = match self.list_models(conn, url).await {
            Some(models) => {
                let total = models.len();
                let results: Vec<bool> = stream::iter(models)
                    .map(|model| async move {
                        match fetch_model_status(
                            &self.store,
                            conn,
                            method,
                            &model,
                            self.options.login_timeout,
                        )
                        .await
                        {
                            Ok(()) => true,
                            Err(err) => {
                                warn!(event = "model_fetch_failed", url = url, model_uuid = %model.uuid, error = %err);
                                false
                            }
                        }
                    })
                    .buffer_unordered(MODEL_FETCH_CONCURRENCY)
                    .collect()
                    .await;
                let errors = results.iter().filter(|ok| !**ok).count();
                CycleReport {
                    total,
                    errors,
                    error: models_error_for(errors, total, first_cycle),
                }
            }
            None => CycleReport {
                total: 0,
                errors: 0,
                error: Some(ModelsError::ListOrUpdateModels),
            },
        };
        let _ = self.store.dispatch(StoreAction::UpdateModelsError {
            ws_controller_url: url.to_string(),
            error: report.error,
        });
        report
    }

    async fn list_models(&self, conn: &Connection, url: &str) -> Option<Vec<ModelSummary>> {
        let identity = self
            .store
            .read(|state| state.active_user_tag(url).map(str::to_string))?;
        let models = match facades::list_models(conn, &user_tag(&identity)).await {
            Ok(models) => models,
            Err(err) => {
                warn!(event = "list_models_failed", url = url, error = %err);
                return None;
            }
        };
        let _ = self.store.dispatch(StoreAction::UpdateModelList {
            ws_controller_url: url.to_string(),
            models,
        });
        Some(
            self.store
                .read(|state| state.models_for_controller(url).cloned().collect::<Vec<_>>()),
        )
    }

    /// Feature flags, UUID unmasking and the controller list. Nothing here
    /// stops the poller.
    async fn prepare_controller(&self, conn: &Connection, registration: &ControllerRegistration) {
        let url = registration.ws_controller_url.as_str();
        let facades_set = conn.facades().await;
        let jimm_version = facades_set.server_version(Facade::Jimm);

        let mut features = ControllerFeatures {
            cross_model_queries: jimm_version >= JIMM_FEATURE_VERSION,
            audit_logs: false,
        };
        if jimm_version >= JIMM_FEATURE_VERSION {
            features.audit_logs = self.check_audit_log_access(conn, url).await;
        }
        let _ = self.store.dispatch(StoreAction::UpdateControllerFeatures {
            ws_controller_url: url.to_string(),
            features,
        });

        if registration.identity_provider_available && facades_set.has(Facade::Jimm) {
            if let Err(err) = facades::jimm_disable_uuid_masking(conn).await {
                debug!(event = "uuid_masking_ignored", url = url, error = %err);
            }
        }

        if let Some(controllers) = self.controller_list(conn, url).await {
            let _ = self.store.dispatch(StoreAction::UpdateControllerList {
                ws_controller_url: url.to_string(),
                controllers,
            });
        }
    }

    async fn check_audit_log_access(&self, conn: &Connection, url: &str) -> bool {
        let Some(identity) = self
            .store
            .read(|state| state.active_user_tag(url).map(str::to_string))
        else {
            return false;
        };
        let object = user_tag(&identity);
        let mut allowed = false;
        for relation in [RELATION_AUDIT_LOG_VIEWER, RELATION_ADMINISTRATOR] {
            match facades::jimm_check_relation(conn, &object, relation, JIMM_CONTROLLER_OBJECT).await {
                Ok(true) => {
                    allowed = true;
                    break;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(event = "audit_log_permission_failed", url = url, relation = relation, error = %err);
                    let _ = self.store.dispatch(StoreAction::UpdateAuditEventsErrors(Some(
                        AuditLogsError::CheckPermissions.as_str().to_string(),
                    )));
                    return false;
                }
            }
        }
        let _ = self.store.dispatch(StoreAction::UpdateAuditEventsErrors(None));
        allowed
    }

    async fn controller_list(&self, conn: &Connection, url: &str) -> Option<Vec<ControllerEntry>> {
        if conn.facades().await.has(Facade::Jimm) {
            return match facades::jimm_list_controllers(conn).await {
                Ok(response) => {
                    let mut entries = Vec::with_capacity(response.controllers.len());
                    for controller in response.controllers {
                        entries.push(ControllerEntry::Controller(self.jimm_record(controller).await));
                    }
                    Some(entries)
                }
                Err(err) => {
                    warn!(event = "controller_list_failed", url = url, error = %err);
                    let _ = self
                        .store
                        .dispatch(StoreAction::StoreConnectionError(Some(CONTROLLER_LIST_ERROR.to_string())));
                    None
                }
            };
        }

        let server_version = conn
            .login_result()
            .await
            .and_then(|result| result.server_version);
        match facades::controller_config(conn).await {
            Ok(config) => {
                let version = server_version;
                let update_available =
                    update_available_or_false(self.checker.as_ref(), version.as_deref()).await;
                Some(vec![ControllerEntry::Controller(ControllerRecord {
                    path: config.text("controller-name").unwrap_or_default(),
                    uuid: config.text("controller-uuid").unwrap_or_default(),
                    version,
                    location: None,
                    public: None,
                    update_available,
                })])
            }
            Err(err) => {
                warn!(event = "controller_config_failed", url = url, error = %err);
                None
            }
        }
    }

    async fn jimm_record(&self, controller: JimmController) -> ControllerRecord {
        let version = controller.version.or(controller.agent_version);
        let update_available = update_available_or_false(self.checker.as_ref(), version.as_deref()).await;
        ControllerRecord {
            path: controller.path,
            uuid: controller.uuid,
            version,
            location: controller.location.map(|location| ControllerLocation {
                cloud: location.cloud,
                region: location.region,
            }),
            public: controller.public,
            update_available,
        }
    }
}

/// Model connections reuse the controller's authentication.
async fn model_method(
    conn: &Connection,
    registration: &ControllerRegistration,
) -> Result<LoginMethod, LoginError> {
    match determine_login_method(
        &registration.ws_controller_url,
        registration.credential.as_ref(),
        registration.identity_provider_available,
    )? {
        LoginMethod::External => Ok(match conn.discharged_macaroon().await {
            Some(macaroon) => LoginMethod::Macaroon(macaroon),
            None => LoginMethod::External,
        }),
        method => Ok(method),
    }
}
