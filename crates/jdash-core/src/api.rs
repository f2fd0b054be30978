//! Request and response bodies for the facade calls the dashboard makes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entity {
    pub tag: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entities {
    pub entities: Vec<Entity>,
}

impl Entities {
    pub fn single(tag: impl Into<String>) -> Self {
        Self {
            entities: vec![Entity { tag: tag.into() }],
        }
    }
}

/// Error block embedded in per-item results.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorInfo {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorResult {
    #[serde(default)]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorResults {
    #[serde(default, deserialize_with = "crate::nullable")]
    pub results: Vec<ErrorResult>,
}

impl ErrorResults {
    pub fn first_error(&self) -> Option<&ErrorInfo> {
        self.results.iter().find_map(|result| result.error.as_ref())
    }
}

pub fn user_tag(identity: &str) -> String {
    if identity.starts_with("user-") {
        identity.to_string()
    } else {
        format!("user-{identity}")
    }
}

pub fn model_tag(uuid: &str) -> String {
    format!("model-{uuid}")
}

pub fn application_tag(name: &str) -> String {
    format!("application-{name}")
}

/// `mysql/1` becomes `unit-mysql-1`.
pub fn unit_tag(unit: &str) -> String {
    format!("unit-{}", unit.replacen('/', "-", 1))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelRef {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "owner-tag", default)]
    pub owner_tag: String,
    #[serde(rename = "type", default)]
    pub model_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserModel {
    pub model: ModelRef,
    #[serde(rename = "last-connection", default)]
    pub last_connection: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserModelList {
    #[serde(rename = "user-models", default, deserialize_with = "crate::nullable")]
    pub user_models: Vec<UserModel>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelUserInfo {
    #[serde(default)]
    pub user: String,
    #[serde(rename = "display-name", default)]
    pub display_name: String,
    #[serde(default)]
    pub access: String,
    #[serde(rename = "last-connection", default)]
    pub last_connection: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub model_type: String,
    #[serde(rename = "controller-uuid", default)]
    pub controller_uuid: String,
    #[serde(rename = "is-controller", default)]
    pub is_controller: bool,
    #[serde(rename = "cloud-tag", default)]
    pub cloud_tag: String,
    #[serde(rename = "cloud-region", default)]
    pub cloud_region: Option<String>,
    #[serde(rename = "owner-tag", default)]
    pub owner_tag: String,
    #[serde(default)]
    pub life: String,
    #[serde(rename = "agent-version", default)]
    pub agent_version: Option<String>,
    #[serde(default, deserialize_with = "crate::nullable")]
    pub users: Vec<ModelUserInfo>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelInfoResult {
    #[serde(default)]
    pub result: Option<ModelInfo>,
    #[serde(default)]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelInfoResults {
    #[serde(default, deserialize_with = "crate::nullable")]
    pub results: Vec<ModelInfoResult>,
}

impl ModelInfoResults {
    pub fn first(&self) -> Option<&ModelInfo> {
        self.results.first().and_then(|result| result.result.as_ref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModifyModelAccess {
    pub access: String,
    pub action: String,
    #[serde(rename = "model-tag")]
    pub model_tag: String,
    #[serde(rename = "user-tag")]
    pub user_tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModifyModelAccessRequest {
    pub changes: Vec<ModifyModelAccess>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ControllerConfigResult {
    #[serde(default, deserialize_with = "crate::nullable")]
    pub config: BTreeMap<String, Value>,
}

impl ControllerConfigResult {
    pub fn text(&self, key: &str) -> Option<String> {
        self.config
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CloudLocation {
    #[serde(default)]
    pub cloud: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

/// A controller as listed by the JIMM directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JimmController {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(rename = "agent-version", default)]
    pub agent_version: Option<String>,
    #[serde(default)]
    pub location: Option<CloudLocation>,
    #[serde(default)]
    pub public: Option<bool>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListControllersResponse {
    #[serde(default, deserialize_with = "crate::nullable")]
    pub controllers: Vec<JimmController>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationTuple {
    pub object: String,
    pub relation: String,
    pub target_object: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckRelationRequest {
    pub tuple: RelationTuple,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckRelationResponse {
    #[serde(default)]
    pub allowed: bool,
}

pub const RELATION_AUDIT_LOG_VIEWER: &str = "audit_log_viewer";
pub const RELATION_ADMINISTRATOR: &str = "administrator";
pub const JIMM_CONTROLLER_OBJECT: &str = "controller-jimm";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnnotationsResult {
    pub entity: String,
    #[serde(default, deserialize_with = "crate::nullable")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub error: Option<ErrorResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnnotationsGetResults {
    #[serde(default, deserialize_with = "crate::nullable")]
    pub results: Vec<AnnotationsResult>,
}

impl AnnotationsGetResults {
    /// Keyed by application name, without entities that carry no
    /// annotations.
    pub fn by_application(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.results
            .iter()
            .filter(|item| !item.annotations.is_empty())
            .map(|item| {
                let name = item
                    .entity
                    .strip_prefix("application-")
                    .unwrap_or(item.entity.as_str());
                (name.to_string(), item.annotations.clone())
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApplicationGetResults {
    #[serde(default)]
    pub application: String,
    #[serde(default)]
    pub charm: String,
    #[serde(default, deserialize_with = "crate::nullable")]
    pub config: BTreeMap<String, Value>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationConfigSet {
    pub application: String,
    pub config: BTreeMap<String, String>,
    #[serde(rename = "config-yaml")]
    pub config_yaml: String,
    pub generation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationConfigSetArgs {
    #[serde(rename = "Args")]
    pub args: Vec<ApplicationConfigSet>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRequest {
    pub name: String,
    pub receiver: String,
    pub parameters: BTreeMap<String, Value>,
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnqueueActions {
    pub actions: Vec<ActionRequest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OperationQueryArgs {
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub applications: Vec<String>,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub machines: Vec<String>,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub status: Vec<String>,
    #[serde(default)]
    pub units: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CharmInfo {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub meta: Option<Value>,
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub actions: Option<Value>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListSecretsArgs {
    #[serde(rename = "show-secrets")]
    pub show_secrets: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListSecretResults {
    #[serde(default, deserialize_with = "crate::nullable")]
    pub results: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GrantRevokeSecretArg {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "scope-tag")]
    pub scope_tag: String,
    #[serde(rename = "subject-tags")]
    pub subject_tags: Vec<String>,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GrantRevokeSecretArgs {
    pub args: Vec<GrantRevokeSecretArg>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FindAuditEventsRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(rename = "user-tag", default, skip_serializing_if = "Option::is_none")]
    pub user_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    #[serde(default)]
    pub time: String,
    #[serde(rename = "conversation-id", default)]
    pub conversation_id: String,
    #[serde(rename = "message-id", default)]
    pub message_id: u64,
    #[serde(rename = "facade-name", default)]
    pub facade_name: String,
    #[serde(rename = "facade-method", default)]
    pub facade_method: String,
    #[serde(rename = "facade-version", default)]
    pub facade_version: u32,
    #[serde(rename = "object-id", default)]
    pub object_id: String,
    #[serde(rename = "user-tag", default)]
    pub user_tag: String,
    #[serde(default)]
    pub model: String,
    #[serde(rename = "is-response", default)]
    pub is_response: bool,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub errors: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuditEvents {
    #[serde(default, deserialize_with = "crate::nullable")]
    pub events: Vec<AuditEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrossModelQueryRequest {
    #[serde(rename = "type")]
    pub query_type: String,
    pub query: String,
}

impl CrossModelQueryRequest {
    pub fn jq(query: impl Into<String>) -> Self {
        Self {
            query_type: "jq".to_string(),
            query: query.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CrossModelQueryResponse {
    #[serde(default, deserialize_with = "crate::nullable")]
    pub results: BTreeMap<String, Vec<Value>>,
    #[serde(default, deserialize_with = "crate::nullable")]
    pub errors: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatcherId {
    #[serde(rename = "watcher-id", default)]
    pub watcher_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatcherIdArg {
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AllWatcherNextResults {
    /// Left untyped so the batch can be validated as a whole.
    #[serde(default)]
    pub deltas: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WaitForDischargeRequest {
    #[serde(rename = "wait-url")]
    pub wait_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WaitForDischargeResponse {
    #[serde(default)]
    pub macaroon: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tags_use_server_conventions() {
        assert_eq!(unit_tag("mysql/1"), "unit-mysql-1");
        assert_eq!(unit_tag("big-data/12"), "unit-big-data-12");
        assert_eq!(user_tag("eggman@external"), "user-eggman@external");
        assert_eq!(user_tag("user-admin"), "user-admin");
        assert_eq!(model_tag("abc"), "model-abc");
    }

    #[test]
    fn annotations_skip_empty_entities() {
        let results: AnnotationsGetResults = serde_json::from_value(json!({
            "results": [
                {"entity": "application-etcd", "annotations": {"gui-x": "10"}},
                {"entity": "application-redis", "annotations": null},
                {"entity": "application-mysql", "annotations": {}}
            ]
        }))
        .expect("decode");
        let mapped = results.by_application();
        assert_eq!(mapped.len(), 1);
        assert_eq!(
            mapped.get("etcd").and_then(|a| a.get("gui-x")).map(String::as_str),
            Some("10")
        );
    }

    #[test]
    fn check_relation_request_shape() {
        let request = CheckRelationRequest {
            tuple: RelationTuple {
                object: "user-eggman@external".to_string(),
                relation: RELATION_AUDIT_LOG_VIEWER.to_string(),
                target_object: JIMM_CONTROLLER_OBJECT.to_string(),
            },
        };
        assert_eq!(
            serde_json::to_value(&request).expect("encode"),
            json!({"tuple": {"object": "user-eggman@external", "relation": "audit_log_viewer", "target_object": "controller-jimm"}})
        );
    }
}
