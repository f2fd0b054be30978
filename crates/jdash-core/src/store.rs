//! Process-wide dashboard state. Every mutation is a serializable
//! [`StoreAction`]; protocol code never touches the state directly.

use crate::api::{AuditEvent, CharmInfo, FindAuditEventsRequest, ModelInfo, UserModelList};
use crate::delta::Delta;
use crate::errors::ModelsError;
use crate::rpc::LoginResult;
use crate::snapshot::{Annotations, ApplyOutcome, ModelSnapshot};
use crate::status::FullStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DashboardConfig {
    #[serde(rename = "controllerAPIEndpoint")]
    pub controller_api_endpoint: String,
    #[serde(rename = "identityProviderAvailable", default)]
    pub identity_provider_available: bool,
    #[serde(rename = "isJuju", default)]
    pub is_juju: bool,
    #[serde(rename = "analyticsEnabled", default)]
    pub analytics_enabled: bool,
    #[serde(rename = "latestJujuVersion", default)]
    pub latest_juju_version: Option<String>,
}

#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    LoggedOut,
    Connecting,
    AwaitingExternalAuth {
        visit_url: String,
    },
    LoggedIn,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ControllerFeatures {
    pub cross_model_queries: bool,
    pub audit_logs: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ControllerSession {
    pub ws_controller_url: String,
    pub state: SessionState,
    pub server_version: Option<String>,
    pub controller_tag: Option<String>,
    pub user: Option<crate::rpc::UserInfo>,
    pub features: ControllerFeatures,
    pub login_error: Option<String>,
    pub pinger_active: bool,
}

impl ControllerSession {
    fn new(ws_controller_url: &str) -> Self {
        Self {
            ws_controller_url: ws_controller_url.to_string(),
            ..Self::default()
        }
    }

    pub fn identity(&self) -> Option<&str> {
        self.user
            .as_ref()
            .map(|user| user.identity.as_str())
            .filter(|identity| !identity.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControllerLocation {
    pub cloud: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControllerRecord {
    pub path: String,
    pub uuid: String,
    pub version: Option<String>,
    pub location: Option<ControllerLocation>,
    pub public: Option<bool>,
    pub update_available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControllerEntry {
    Controller(ControllerRecord),
    /// Placeholder for a controller registered by hand and not yet polled.
    AdditionalController,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelSummary {
    pub uuid: String,
    pub name: String,
    pub owner_tag: String,
    pub model_type: String,
    pub ws_controller_url: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelFeatures {
    pub list_secrets: bool,
    pub manage_secrets: bool,
}

impl ModelFeatures {
    pub fn from_secrets_version(version: u32) -> Self {
        Self {
            list_secrets: version >= 1,
            manage_secrets: version >= 2,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelData {
    pub uuid: String,
    pub status: Option<FullStatus>,
    pub annotations: BTreeMap<String, Annotations>,
    pub info: Option<ModelInfo>,
    pub features: Option<ModelFeatures>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuditEventsState {
    pub items: Vec<AuditEvent>,
    pub errors: Option<String>,
    pub loaded: bool,
    pub loading: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CrossModelQueryState {
    pub query: Option<String>,
    pub results: Option<BTreeMap<String, Vec<serde_json::Value>>>,
    pub errors: Option<serde_json::Value>,
    pub loaded: bool,
    pub loading: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GeneralState {
    pub app_version: Option<String>,
    pub config: Option<DashboardConfig>,
    pub credentials: BTreeMap<String, Credential>,
    pub sessions: BTreeMap<String, ControllerSession>,
    pub connection_error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JujuState {
    pub controllers: BTreeMap<String, Vec<ControllerEntry>>,
    pub models: BTreeMap<String, ModelSummary>,
    pub models_loaded: bool,
    pub models_error: BTreeMap<String, ModelsError>,
    pub model_data: BTreeMap<String, ModelData>,
    pub model_watcher_data: BTreeMap<String, ModelSnapshot>,
    pub model_watcher_errors: BTreeMap<String, String>,
    pub charms: Vec<CharmInfo>,
    pub audit_events: AuditEventsState,
    pub cross_model_query: CrossModelQueryState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DashboardState {
    pub general: GeneralState,
    pub juju: JujuState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum StoreAction {
    StoreConfig(DashboardConfig),
    StoreVersion(String),
    StoreUserPass {
        ws_controller_url: String,
        credential: Credential,
    },
    BeginLogin {
        ws_controller_url: String,
    },
    StoreVisitUrl {
        ws_controller_url: String,
        visit_url: String,
    },
    ClearVisitUrls,
    StoreLoginError {
        ws_controller_url: String,
        error: String,
    },
    UpdateControllerConnection {
        ws_controller_url: String,
        info: LoginResult,
    },
    UpdateControllerFeatures {
        ws_controller_url: String,
        features: ControllerFeatures,
    },
    UpdatePingerState {
        ws_controller_url: String,
        active: bool,
    },
    StoreConnectionError(Option<String>),
    LogOut,
    ClearModelData,
    ClearControllerData,
    UpdateControllerList {
        ws_controller_url: String,
        controllers: Vec<ControllerEntry>,
    },
    UpdateControllerLocation {
        ws_controller_url: String,
        controller_uuid: String,
        location: ControllerLocation,
    },
    UpdateModelList {
        ws_controller_url: String,
        models: UserModelList,
    },
    UpdateModelStatus {
        ws_controller_url: String,
        model_uuid: String,
        status: FullStatus,
        annotations: BTreeMap<String, Annotations>,
    },
    UpdateModelFeatures {
        ws_controller_url: String,
        model_uuid: String,
        features: ModelFeatures,
    },
    UpdateModelInfo {
        ws_controller_url: String,
        info: ModelInfo,
    },
    UpdateModelsError {
        ws_controller_url: String,
        error: Option<ModelsError>,
    },
    SeedModelWatcher {
        ws_controller_url: String,
        model_uuid: String,
        snapshot: ModelSnapshot,
    },
    ProcessAllWatcherDeltas(Vec<Delta>),
    StopModelWatcher {
        model_uuid: String,
    },
    StoreModelWatcherError {
        model_uuid: String,
        error: String,
    },
    UpdateCharms {
        ws_controller_url: String,
        charms: Vec<CharmInfo>,
    },
    FetchAuditEvents {
        ws_controller_url: String,
        params: FindAuditEventsRequest,
    },
    UpdateAuditEvents(Vec<AuditEvent>),
    UpdateAuditEventsErrors(Option<String>),
    FetchCrossModelQuery {
        ws_controller_url: String,
        query: String,
    },
    UpdateCrossModelQuery {
        results: Option<BTreeMap<String, Vec<serde_json::Value>>>,
        errors: Option<serde_json::Value>,
    },
}

impl StoreAction {
    pub fn name(&self) -> &'static str {
        match self {
            StoreAction::StoreConfig(_) => "store_config",
            StoreAction::StoreVersion(_) => "store_version",
            StoreAction::StoreUserPass { .. } => "store_user_pass",
            StoreAction::BeginLogin { .. } => "begin_login",
            StoreAction::StoreVisitUrl { .. } => "store_visit_url",
            StoreAction::ClearVisitUrls => "clear_visit_urls",
            StoreAction::StoreLoginError { .. } => "store_login_error",
            StoreAction::UpdateControllerConnection { .. } => "update_controller_connection",
            StoreAction::UpdateControllerFeatures { .. } => "update_controller_features",
            StoreAction::UpdatePingerState { .. } => "update_pinger_state",
            StoreAction::StoreConnectionError(_) => "store_connection_error",
            StoreAction::LogOut => "log_out",
            StoreAction::ClearModelData => "clear_model_data",
            StoreAction::ClearControllerData => "clear_controller_data",
            StoreAction::UpdateControllerList { .. } => "update_controller_list",
            StoreAction::UpdateControllerLocation { .. } => "update_controller_location",
            StoreAction::UpdateModelList { .. } => "update_model_list",
            StoreAction::UpdateModelStatus { .. } => "update_model_status",
            StoreAction::UpdateModelFeatures { .. } => "update_model_features",
            StoreAction::UpdateModelInfo { .. } => "update_model_info",
            StoreAction::UpdateModelsError { .. } => "update_models_error",
            StoreAction::SeedModelWatcher { .. } => "seed_model_watcher",
            StoreAction::ProcessAllWatcherDeltas(_) => "process_all_watcher_deltas",
            StoreAction::StopModelWatcher { .. } => "stop_model_watcher",
            StoreAction::StoreModelWatcherError { .. } => "store_model_watcher_error",
            StoreAction::UpdateCharms { .. } => "update_charms",
            StoreAction::FetchAuditEvents { .. } => "fetch_audit_events",
            StoreAction::UpdateAuditEvents(_) => "update_audit_events",
            StoreAction::UpdateAuditEventsErrors(_) => "update_audit_events_errors",
            StoreAction::FetchCrossModelQuery { .. } => "fetch_cross_model_query",
            StoreAction::UpdateCrossModelQuery { .. } => "update_cross_model_query",
        }
    }

    /// The controller whose login state gates this action, if any.
    pub fn controller_url(&self) -> Option<&str> {
        match self {
            StoreAction::StoreUserPass {
                ws_controller_url, ..
            }
            | StoreAction::BeginLogin { ws_controller_url }
            | StoreAction::StoreVisitUrl {
                ws_controller_url, ..
            }
            | StoreAction::StoreLoginError {
                ws_controller_url, ..
            }
            | StoreAction::UpdateControllerConnection {
                ws_controller_url, ..
            }
            | StoreAction::UpdateControllerFeatures {
                ws_controller_url, ..
            }
            | StoreAction::UpdatePingerState {
                ws_controller_url, ..
            }
            | StoreAction::UpdateControllerList {
                ws_controller_url, ..
            }
            | StoreAction::UpdateControllerLocation {
                ws_controller_url, ..
            }
            | StoreAction::UpdateModelList {
                ws_controller_url, ..
            }
            | StoreAction::UpdateModelStatus {
                ws_controller_url, ..
            }
            | StoreAction::UpdateModelFeatures {
                ws_controller_url, ..
            }
            | StoreAction::UpdateModelInfo {
                ws_controller_url, ..
            }
            | StoreAction::UpdateModelsError {
                ws_controller_url, ..
            }
            | StoreAction::SeedModelWatcher {
                ws_controller_url, ..
            }
            | StoreAction::UpdateCharms {
                ws_controller_url, ..
            }
            | StoreAction::FetchAuditEvents {
                ws_controller_url, ..
            }
            | StoreAction::FetchCrossModelQuery {
                ws_controller_url, ..
            } => Some(ws_controller_url.as_str()),
            _ => None,
        }
    }

    /// Session bookkeeping and teardown must go through even while the
    /// controller is logged out.
    pub fn is_allowlisted(&self) -> bool {
        matches!(
            self,
            StoreAction::StoreConfig(_)
                | StoreAction::StoreVersion(_)
                | StoreAction::StoreUserPass { .. }
                | StoreAction::BeginLogin { .. }
                | StoreAction::StoreVisitUrl { .. }
                | StoreAction::ClearVisitUrls
                | StoreAction::StoreLoginError { .. }
                | StoreAction::UpdateControllerConnection { .. }
                | StoreAction::UpdateControllerList { .. }
                | StoreAction::UpdatePingerState { .. }
                | StoreAction::StoreConnectionError(_)
                | StoreAction::LogOut
                | StoreAction::ClearModelData
                | StoreAction::ClearControllerData
                | StoreAction::ProcessAllWatcherDeltas(_)
                | StoreAction::StopModelWatcher { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unable to perform action {action}: user not authenticated for {ws_controller_url}")]
    NotAuthenticated {
        action: &'static str,
        ws_controller_url: String,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Store {
    state: DashboardState,
    revision: u64,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DashboardConfig) -> Self {
        let mut store = Self::default();
        store.state.general.config = Some(config);
        store
    }

    pub fn state(&self) -> &DashboardState {
        &self.state
    }

    /// Bumped once per applied action.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn dispatch(&mut self, action: StoreAction) -> Result<(), StoreError> {
        if !action.is_allowlisted() {
            if let Some(url) = action.controller_url() {
                if !self.state.is_logged_in(url) {
                    return Err(StoreError::NotAuthenticated {
                        action: action.name(),
                        ws_controller_url: url.to_string(),
                    });
                }
            }
        }
        self.state.reduce(action);
        self.revision += 1;
        Ok(())
    }
}

impl DashboardState {
    fn session_mut(&mut self, url: &str) -> &mut ControllerSession {
        self.general
            .sessions
            .entry(url.to_string())
            .or_insert_with(|| ControllerSession::new(url))
    }

    fn model_data_mut(&mut self, uuid: &str) -> &mut ModelData {
        self.juju
            .model_data
            .entry(uuid.to_string())
            .or_insert_with(|| ModelData {
                uuid: uuid.to_string(),
                ..ModelData::default()
            })
    }

    fn reduce(&mut self, action: StoreAction) {
        match action {
            StoreAction::StoreConfig(config) => self.general.config = Some(config),
            StoreAction::StoreVersion(version) => self.general.app_version = Some(version),
            StoreAction::StoreUserPass {
                ws_controller_url,
                credential,
            } => {
                self.general
                    .credentials
                    .insert(ws_controller_url, credential);
            }
            StoreAction::BeginLogin { ws_controller_url } => {
                let session = self.session_mut(&ws_controller_url);
                session.state = SessionState::Connecting;
                session.login_error = None;
            }
            StoreAction::StoreVisitUrl {
                ws_controller_url,
                visit_url,
            } => {
                self.session_mut(&ws_controller_url).state =
                    SessionState::AwaitingExternalAuth { visit_url };
            }
            StoreAction::ClearVisitUrls => {
                for session in self.general.sessions.values_mut() {
                    if matches!(session.state, SessionState::AwaitingExternalAuth { .. }) {
                        session.state = SessionState::LoggedOut;
                    }
                }
            }
            StoreAction::StoreLoginError {
                ws_controller_url,
                error,
            } => {
                let session = self.session_mut(&ws_controller_url);
                session.state = SessionState::LoggedOut;
                session.login_error = Some(error);
                session.pinger_active = false;
            }
            StoreAction::UpdateControllerConnection {
                ws_controller_url,
                info,
            } => {
                let session = self.session_mut(&ws_controller_url);
                session.server_version = info.server_version;
                session.controller_tag = info.controller_tag;
                session.user = info.user_info;
                session.login_error = None;
                session.state = if session.identity().is_some() {
                    SessionState::LoggedIn
                } else {
                    SessionState::LoggedOut
                };
            }
            StoreAction::UpdateControllerFeatures {
                ws_controller_url,
                features,
            } => self.session_mut(&ws_controller_url).features = features,
            StoreAction::UpdatePingerState {
                ws_controller_url,
                active,
            } => self.session_mut(&ws_controller_url).pinger_active = active,
            StoreAction::StoreConnectionError(error) => self.general.connection_error = error,
            StoreAction::LogOut => {
                let config = self.general.config.take();
                let app_version = self.general.app_version.take();
                self.general = GeneralState {
                    config,
                    app_version,
                    ..GeneralState::default()
                };
                self.juju = JujuState::default();
            }
            StoreAction::ClearModelData => {
                self.juju.models.clear();
                self.juju.models_loaded = false;
                self.juju.model_data.clear();
                self.juju.model_watcher_data.clear();
                self.juju.model_watcher_errors.clear();
            }
            StoreAction::ClearControllerData => self.juju.controllers.clear(),
            StoreAction::UpdateControllerList {
                ws_controller_url,
                controllers,
            } => {
                self.juju.controllers.insert(ws_controller_url, controllers);
            }
            StoreAction::UpdateControllerLocation {
                ws_controller_url,
                controller_uuid,
                location,
            } => {
                if let Some(entries) = self.juju.controllers.get_mut(&ws_controller_url) {
                    for entry in entries.iter_mut() {
                        if let ControllerEntry::Controller(record) = entry {
                            if record.uuid == controller_uuid {
                                record.location = Some(location.clone());
                            }
                        }
                    }
                }
            }
            StoreAction::UpdateModelList {
                ws_controller_url,
                models,
            } => {
                self.juju
                    .models
                    .retain(|_, model| model.ws_controller_url != ws_controller_url);
                for item in models.user_models {
                    let summary = ModelSummary {
                        uuid: item.model.uuid.clone(),
                        name: item.model.name,
                        owner_tag: item.model.owner_tag,
                        model_type: item.model.model_type,
                        ws_controller_url: ws_controller_url.clone(),
                    };
                    self.juju.models.insert(item.model.uuid, summary);
                }
                self.juju.models_loaded = true;
            }
            StoreAction::UpdateModelStatus {
                model_uuid,
                status,
                annotations,
                ..
            } => {
                let data = self.model_data_mut(&model_uuid);
                data.status = Some(status.without_volatile());
                data.annotations = annotations;
            }
            StoreAction::UpdateModelFeatures {
                model_uuid,
                features,
                ..
            } => self.model_data_mut(&model_uuid).features = Some(features),
            StoreAction::UpdateModelInfo { info, .. } => {
                let uuid = info.uuid.clone();
                self.model_data_mut(&uuid).info = Some(info);
            }
            StoreAction::UpdateModelsError {
                ws_controller_url,
                error,
            } => match error {
                Some(error) => {
                    self.juju.models_error.insert(ws_controller_url, error);
                }
                None => {
                    self.juju.models_error.remove(&ws_controller_url);
                }
            },
            StoreAction::SeedModelWatcher {
                model_uuid,
                snapshot,
                ..
            } => {
                self.juju.model_watcher_errors.remove(&model_uuid);
                self.juju.model_watcher_data.insert(model_uuid, snapshot);
            }
            StoreAction::ProcessAllWatcherDeltas(deltas) => {
                for delta in &deltas {
                    let uuid = delta.model_uuid();
                    let Some(snapshot) = self.juju.model_watcher_data.get_mut(uuid) else {
                        continue;
                    };
                    if snapshot.apply_delta(delta) == ApplyOutcome::ModelRemoved {
                        self.juju.model_watcher_data.remove(uuid);
                    }
                }
            }
            StoreAction::StopModelWatcher { model_uuid } => {
                self.juju.model_watcher_data.remove(&model_uuid);
            }
            StoreAction::StoreModelWatcherError { model_uuid, error } => {
                self.juju.model_watcher_errors.insert(model_uuid, error);
            }
            StoreAction::UpdateCharms { charms, .. } => {
                for charm in charms {
                    self.juju.charms.retain(|existing| existing.url != charm.url);
                    self.juju.charms.push(charm);
                }
            }
            StoreAction::FetchAuditEvents { .. } => self.juju.audit_events.loading = true,
            StoreAction::UpdateAuditEvents(events) => {
                let audit = &mut self.juju.audit_events;
                audit.items = events;
                audit.errors = None;
                audit.loaded = true;
                audit.loading = false;
            }
            StoreAction::UpdateAuditEventsErrors(errors) => {
                let audit = &mut self.juju.audit_events;
                audit.errors = errors;
                audit.loading = false;
            }
            StoreAction::FetchCrossModelQuery { query, .. } => {
                let state = &mut self.juju.cross_model_query;
                state.query = Some(query);
                state.loading = true;
            }
            StoreAction::UpdateCrossModelQuery { results, errors } => {
                let state = &mut self.juju.cross_model_query;
                state.results = results;
                state.errors = errors;
                state.loaded = true;
                state.loading = false;
            }
        }
    }

    pub fn config(&self) -> Option<&DashboardConfig> {
        self.general.config.as_ref()
    }

    pub fn ws_controller_url(&self) -> Option<&str> {
        self.config()
            .map(|config| config.controller_api_endpoint.as_str())
    }

    pub fn session(&self, ws_controller_url: &str) -> Option<&ControllerSession> {
        self.general.sessions.get(ws_controller_url)
    }

    pub fn is_logged_in(&self, ws_controller_url: &str) -> bool {
        self.session(ws_controller_url)
            .map(|session| {
                session.state == SessionState::LoggedIn && session.identity().is_some()
            })
            .unwrap_or(false)
    }

    pub fn credentials(&self, ws_controller_url: &str) -> Option<&Credential> {
        self.general.credentials.get(ws_controller_url)
    }

    pub fn login_error(&self, ws_controller_url: &str) -> Option<&str> {
        self.session(ws_controller_url)
            .and_then(|session| session.login_error.as_deref())
    }

    pub fn active_user_tag(&self, ws_controller_url: &str) -> Option<&str> {
        self.session(ws_controller_url)
            .and_then(ControllerSession::identity)
    }

    pub fn controller_access(&self, ws_controller_url: &str) -> Option<&str> {
        self.session(ws_controller_url)
            .and_then(|session| session.user.as_ref())
            .map(|user| user.controller_access.as_str())
    }

    pub fn visit_url(&self, ws_controller_url: &str) -> Option<&str> {
        match self.session(ws_controller_url).map(|session| &session.state) {
            Some(SessionState::AwaitingExternalAuth { visit_url }) => Some(visit_url.as_str()),
            _ => None,
        }
    }

    /// True while any controller waits on an external identity flow.
    pub fn is_connecting(&self) -> bool {
        self.general
            .sessions
            .values()
            .any(|session| matches!(session.state, SessionState::AwaitingExternalAuth { .. }))
    }

    pub fn model_by_uuid(&self, uuid: &str) -> Option<&ModelSummary> {
        self.juju.models.get(uuid)
    }

    pub fn models_for_controller<'a>(
        &'a self,
        ws_controller_url: &'a str,
    ) -> impl Iterator<Item = &'a ModelSummary> + 'a {
        self.juju
            .models
            .values()
            .filter(move |model| model.ws_controller_url == ws_controller_url)
    }

    pub fn models_error(&self, ws_controller_url: &str) -> Option<ModelsError> {
        self.juju.models_error.get(ws_controller_url).copied()
    }

    pub fn model_data(&self, uuid: &str) -> Option<&ModelData> {
        self.juju.model_data.get(uuid)
    }

    pub fn model_snapshot(&self, uuid: &str) -> Option<&ModelSnapshot> {
        self.juju.model_watcher_data.get(uuid)
    }

    pub fn controllers(&self, ws_controller_url: &str) -> &[ControllerEntry] {
        self.juju
            .controllers
            .get(ws_controller_url)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
