use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

pub const PING_TIME: Duration = Duration::from_millis(20_000);
pub const LOGIN_TIMEOUT: Duration = Duration::from_millis(5_000);
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Controllers accept clients one major version away only when the minor
/// version is zero, so pinning to exactly 3.0.0 works against 2.x and 3.x.
pub const CLIENT_VERSION: &str = "3.0.0";

pub const ADMIN_FACADE_VERSION: u32 = 3;
pub const DISCHARGE_REQUIRED_CODE: &str = "discharge required";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    #[serde(rename = "request-id")]
    pub request_id: u64,
    #[serde(rename = "type")]
    pub facade: String,
    pub request: String,
    pub version: u32,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcResponse {
    #[serde(rename = "request-id")]
    pub request_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(
        default,
        rename = "error-code",
        skip_serializing_if = "Option::is_none"
    )]
    pub error_code: Option<String>,
    #[serde(
        default,
        rename = "error-info",
        skip_serializing_if = "Option::is_none"
    )]
    pub error_info: Option<Value>,
}

impl RpcResponse {
    pub fn ok(request_id: u64, response: Value) -> Self {
        Self {
            request_id,
            response: Some(response),
            error: None,
            error_code: None,
            error_info: None,
        }
    }

    pub fn err(request_id: u64, code: &str, message: &str, info: Option<Value>) -> Self {
        Self {
            request_id,
            response: None,
            error: Some(message.to_string()),
            error_code: Some(code.to_string()),
            error_info: info,
        }
    }

    pub fn into_result(self) -> Result<Value, RemoteError> {
        match self.error {
            Some(message) => Err(RemoteError {
                code: self.error_code.unwrap_or_default(),
                message,
                info: self.error_info,
            }),
            None => Ok(self.response.unwrap_or(Value::Null)),
        }
    }
}

/// An error reported by the controller for a single request.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} (code: {code})")]
pub struct RemoteError {
    pub code: String,
    pub message: String,
    pub info: Option<Value>,
}

impl RemoteError {
    pub fn is_discharge_required(&self) -> bool {
        self.code == DISCHARGE_REQUIRED_CODE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

pub fn encode_frame<T: Serialize>(value: &T, max_frame_bytes: usize) -> Result<String, FrameError> {
    let encoded =
        serde_json::to_string(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

pub fn decode_frame<T: DeserializeOwned>(text: &str, max_frame_bytes: usize) -> Result<T, FrameError> {
    let raw = text.trim_end_matches(['\r', '\n']);
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_str(raw).map_err(|err| FrameError::Decode(err.to_string()))
}

/// Named capability groups exposed by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Facade {
    Action,
    Admin,
    AllWatcher,
    Annotations,
    Application,
    Charms,
    Client,
    Cloud,
    Controller,
    Jimm,
    ModelManager,
    Pinger,
    Secrets,
}

impl Facade {
    pub fn name(self) -> &'static str {
        match self {
            Facade::Action => "Action",
            Facade::Admin => "Admin",
            Facade::AllWatcher => "AllWatcher",
            Facade::Annotations => "Annotations",
            Facade::Application => "Application",
            Facade::Charms => "Charms",
            Facade::Client => "Client",
            Facade::Cloud => "Cloud",
            Facade::Controller => "Controller",
            Facade::Jimm => "JIMM",
            Facade::ModelManager => "ModelManager",
            Facade::Pinger => "Pinger",
            Facade::Secrets => "Secrets",
        }
    }

    /// Versions this client knows how to speak, ascending.
    pub fn supported_versions(self) -> &'static [u32] {
        match self {
            Facade::Action => &[7],
            Facade::Admin => &[ADMIN_FACADE_VERSION],
            Facade::AllWatcher => &[1, 2, 3, 4],
            Facade::Annotations => &[2],
            Facade::Application => &[15, 16, 17, 18, 19],
            Facade::Charms => &[5, 6, 7],
            Facade::Client => &[6, 7, 8],
            Facade::Cloud => &[7],
            Facade::Controller => &[9, 10, 11],
            Facade::Jimm => &[2, 3, 4],
            Facade::ModelManager => &[9, 10],
            Facade::Pinger => &[1],
            Facade::Secrets => &[1, 2],
        }
    }
}

impl fmt::Display for Facade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FacadeVersions {
    pub name: String,
    #[serde(default)]
    pub versions: Vec<u32>,
}

/// The facades a server advertised at login, used to pick call versions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FacadeSet {
    advertised: BTreeMap<String, Vec<u32>>,
}

impl FacadeSet {
    pub fn from_advertised(list: &[FacadeVersions]) -> Self {
        let advertised = list
            .iter()
            .map(|entry| (entry.name.clone(), entry.versions.clone()))
            .collect();
        Self { advertised }
    }

    /// Highest version supported by both sides.
    pub fn negotiate(&self, facade: Facade) -> Option<u32> {
        if facade == Facade::Admin {
            return Some(ADMIN_FACADE_VERSION);
        }
        let advertised = self.advertised.get(facade.name())?;
        facade
            .supported_versions()
            .iter()
            .rev()
            .find(|version| advertised.contains(version))
            .copied()
    }

    /// Highest version the server advertised, or 0 when absent. Used for
    /// feature detection rather than for calls.
    pub fn server_version(&self, facade: Facade) -> u32 {
        self.advertised
            .get(facade.name())
            .and_then(|versions| versions.iter().max().copied())
            .unwrap_or(0)
    }

    pub fn has(&self, facade: Facade) -> bool {
        self.negotiate(facade).is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoginRequest {
    #[serde(rename = "auth-tag", default, skip_serializing_if = "Option::is_none")]
    pub auth_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macaroons: Option<Vec<Vec<Value>>>,
    #[serde(rename = "client-version")]
    pub client_version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    #[serde(default)]
    pub identity: String,
    #[serde(rename = "display-name", default)]
    pub display_name: String,
    #[serde(rename = "controller-access", default)]
    pub controller_access: String,
    #[serde(rename = "model-access", default)]
    pub model_access: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginResult {
    #[serde(rename = "server-version", default)]
    pub server_version: Option<String>,
    #[serde(rename = "controller-tag", default)]
    pub controller_tag: Option<String>,
    #[serde(rename = "model-tag", default)]
    pub model_tag: Option<String>,
    #[serde(rename = "user-info", default)]
    pub user_info: Option<UserInfo>,
    #[serde(default)]
    pub facades: Vec<FacadeVersions>,
}

impl LoginResult {
    /// Controller details are usable only with both an identity and a version.
    pub fn has_info(&self) -> bool {
        let identity = self
            .user_info
            .as_ref()
            .map(|info| !info.identity.is_empty())
            .unwrap_or(false);
        let version = self
            .server_version
            .as_deref()
            .map(|version| !version.is_empty())
            .unwrap_or(false);
        identity && version
    }
}

/// Details of a pending identity-provider flow returned by a login attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DischargeRequired {
    #[serde(rename = "visit-url")]
    pub visit_url: String,
    #[serde(rename = "wait-url")]
    pub wait_url: String,
}

impl DischargeRequired {
    pub fn from_error(error: &RemoteError) -> Option<Self> {
        if !error.is_discharge_required() {
            return None;
        }
        let info = error.info.clone()?;
        serde_json::from_value(info).ok()
    }
}

/// Builds a per-model endpoint from a controller endpoint by replacing the
/// trailing `/api` segment.
pub fn model_endpoint(ws_controller_url: &str, model_uuid: &str) -> String {
    let trimmed = ws_controller_url.trim_end_matches('/');
    match trimmed.strip_suffix("/api") {
        Some(base) => format!("{base}/model/{model_uuid}/api"),
        None => format!("{trimmed}/model/{model_uuid}/api"),
    }
}
