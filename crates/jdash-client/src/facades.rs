//! Typed wrappers over the facade calls the dashboard issues. Each one is a
//! single round trip on an already logged in [`Connection`].

use crate::connection::{Connection, RpcError};
use jdash_core::api::{
    AllWatcherNextResults, AnnotationsGetResults, ApplicationConfigSetArgs, ApplicationGetResults,
    AuditEvents, CharmInfo, CheckRelationRequest, CheckRelationResponse, ControllerConfigResult,
    CrossModelQueryRequest, CrossModelQueryResponse, EnqueueActions, Entities, ErrorResults,
    FindAuditEventsRequest, GrantRevokeSecretArgs, ListControllersResponse, ListSecretResults,
    ListSecretsArgs, ModelInfoResults, ModifyModelAccessRequest, OperationQueryArgs, RelationTuple,
    UserModelList, WatcherId, WatcherIdArg,
};
use jdash_core::rpc::Facade;
use jdash_core::status::FullStatus;
use serde_json::{json, Value};

pub async fn ping(conn: &Connection) -> Result<(), RpcError> {
    conn.call(Facade::Pinger, "Ping", json!({})).await.map(|_| ())
}

pub async fn full_status(conn: &Connection) -> Result<FullStatus, RpcError> {
    conn.call_as(Facade::Client, "FullStatus", &json!({ "patterns": [] }))
        .await
}

pub async fn watch_all(conn: &Connection) -> Result<String, RpcError> {
    let watcher: WatcherId = conn.call_as(Facade::Client, "WatchAll", &json!({})).await?;
    if watcher.watcher_id.is_empty() {
        return Err(RpcError::Decode("watch response carried no watcher id".to_string()));
    }
    Ok(watcher.watcher_id)
}

/// Long-poll: suspends until the server has a batch or the connection drops.
/// The batch is returned untyped so it can be validated as a whole.
pub async fn all_watcher_next(conn: &Connection, watcher_id: &str) -> Result<Value, RpcError> {
    let next: AllWatcherNextResults = conn
        .call_as(
            Facade::AllWatcher,
            "Next",
            &WatcherIdArg {
                id: watcher_id.to_string(),
            },
        )
        .await?;
    Ok(next.deltas)
}

pub async fn all_watcher_stop(conn: &Connection, watcher_id: &str) -> Result<(), RpcError> {
    let params = serde_json::to_value(WatcherIdArg {
        id: watcher_id.to_string(),
    })
    .map_err(|err| RpcError::Decode(err.to_string()))?;
    conn.call(Facade::AllWatcher, "Stop", params).await.map(|_| ())
}

pub async fn list_models(conn: &Connection, user_tag: &str) -> Result<UserModelList, RpcError> {
    conn.call_as(Facade::ModelManager, "ListModels", &json!({ "tag": user_tag }))
        .await
}

pub async fn model_info(conn: &Connection, model_tag: &str) -> Result<ModelInfoResults, RpcError> {
    conn.call_as(Facade::ModelManager, "ModelInfo", &Entities::single(model_tag))
        .await
}

pub async fn modify_model_access(
    conn: &Connection,
    request: &ModifyModelAccessRequest,
) -> Result<ErrorResults, RpcError> {
    conn.call_as(Facade::ModelManager, "ModifyModelAccess", request)
        .await
}

pub async fn controller_config(conn: &Connection) -> Result<ControllerConfigResult, RpcError> {
    conn.call_as(Facade::Controller, "ControllerConfig", &json!({}))
        .await
}

pub async fn annotations_get(
    conn: &Connection,
    entities: &Entities,
) -> Result<AnnotationsGetResults, RpcError> {
    conn.call_as(Facade::Annotations, "Get", entities).await
}

pub async fn application_get(
    conn: &Connection,
    application: &str,
) -> Result<ApplicationGetResults, RpcError> {
    conn.call_as(Facade::Application, "Get", &json!({ "application": application }))
        .await
}

pub async fn application_set_configs(
    conn: &Connection,
    args: &ApplicationConfigSetArgs,
) -> Result<ErrorResults, RpcError> {
    conn.call_as(Facade::Application, "SetConfigs", args).await
}

pub async fn applications_charms_actions(
    conn: &Connection,
    entities: &Entities,
) -> Result<Value, RpcError> {
    conn.call_as(Facade::Action, "ApplicationsCharmsActions", entities)
        .await
}

pub async fn enqueue_operation(conn: &Connection, actions: &EnqueueActions) -> Result<Value, RpcError> {
    conn.call_as(Facade::Action, "EnqueueOperation", actions).await
}

pub async fn list_operations(conn: &Connection, query: &OperationQueryArgs) -> Result<Value, RpcError> {
    conn.call_as(Facade::Action, "ListOperations", query).await
}

pub async fn actions(conn: &Connection, entities: &Entities) -> Result<Value, RpcError> {
    conn.call_as(Facade::Action, "Actions", entities).await
}

pub async fn charm_info(conn: &Connection, url: &str) -> Result<CharmInfo, RpcError> {
    conn.call_as(Facade::Charms, "CharmInfo", &json!({ "url": url }))
        .await
}

pub async fn list_secrets(conn: &Connection, args: &ListSecretsArgs) -> Result<ListSecretResults, RpcError> {
    conn.call_as(Facade::Secrets, "ListSecrets", args).await
}

pub async fn grant_secret(conn: &Connection, args: &GrantRevokeSecretArgs) -> Result<ErrorResults, RpcError> {
    conn.call_as(Facade::Secrets, "GrantSecret", args).await
}

pub async fn revoke_secret(conn: &Connection, args: &GrantRevokeSecretArgs) -> Result<ErrorResults, RpcError> {
    conn.call_as(Facade::Secrets, "RevokeSecret", args).await
}

pub async fn jimm_list_controllers(conn: &Connection) -> Result<ListControllersResponse, RpcError> {
    conn.call_as(Facade::Jimm, "ListControllers", &json!({}))
        .await
}

pub async fn jimm_check_relation(
    conn: &Connection,
    object: &str,
    relation: &str,
    target_object: &str,
) -> Result<bool, RpcError> {
    let request = CheckRelationRequest {
        tuple: RelationTuple {
            object: object.to_string(),
            relation: relation.to_string(),
            target_object: target_object.to_string(),
        },
    };
    let response: CheckRelationResponse =
        conn.call_as(Facade::Jimm, "CheckRelation", &request).await?;
    Ok(response.allowed)
}

pub async fn jimm_disable_uuid_masking(conn: &Connection) -> Result<(), RpcError> {
    conn.call(Facade::Jimm, "DisableControllerUUIDMasking", json!({}))
        .await
        .map(|_| ())
}

pub async fn jimm_find_audit_events(
    conn: &Connection,
    request: &FindAuditEventsRequest,
) -> Result<AuditEvents, RpcError> {
    conn.call_as(Facade::Jimm, "FindAuditEvents", request).await
}

pub async fn jimm_cross_model_query(
    conn: &Connection,
    query: &str,
) -> Result<CrossModelQueryResponse, RpcError> {
    conn.call_as(Facade::Jimm, "CrossModelQuery", &CrossModelQueryRequest::jq(query))
        .await
}
