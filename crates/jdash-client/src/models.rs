use crate::connection::{connect_and_login_with_timeout, Connection, LoginError, LoginMethod, RpcError};
use crate::facades;
use crate::shared::StoreHandle;
use jdash_core::api::{application_tag, model_tag, Entities, Entity};
use jdash_core::rpc::{model_endpoint, Facade};
use jdash_core::snapshot::Annotations;
use jdash_core::status::FullStatus;
use jdash_core::store::{ControllerLocation, ModelFeatures, ModelSummary, StoreAction};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ModelFetchError {
    #[error("model login failed: {0}")]
    Login(#[from] LoginError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("model info missing for {uuid}")]
    MissingInfo { uuid: String },
}

/// Fetch one model's status, annotations, feature flags and info, and
/// record them in the store.
pub async fn fetch_model_status(
    store: &StoreHandle,
    controller: &Connection,
    method: &LoginMethod,
    model: &ModelSummary,
    login_timeout: Duration,
) -> Result<(), ModelFetchError> {
    let url = model_endpoint(&model.ws_controller_url, &model.uuid);
    let conn = connect_and_login_with_timeout(&url, method, login_timeout, |_| {}).await?;
    let fetched = fetch_from_model(&conn).await;
    conn.close().await;
    let (status, annotations, features) = fetched?;
    debug!(event = "model_status", model_uuid = %model.uuid, applications = status.applications.len());

    let _ = store.dispatch(StoreAction::UpdateModelStatus {
        ws_controller_url: model.ws_controller_url.clone(),
        model_uuid: model.uuid.clone(),
        status,
        annotations,
    });
    let _ = store.dispatch(StoreAction::UpdateModelFeatures {
        ws_controller_url: model.ws_controller_url.clone(),
        model_uuid: model.uuid.clone(),
        features,
    });

    let results = facades::model_info(controller, &model_tag(&model.uuid)).await?;
    let info = results
        .first()
        .cloned()
        .ok_or_else(|| ModelFetchError::MissingInfo {
            uuid: model.uuid.clone(),
        })?;
    if info.is_controller {
        let _ = store.dispatch(StoreAction::UpdateControllerLocation {
            ws_controller_url: model.ws_controller_url.clone(),
            controller_uuid: info.controller_uuid.clone(),
            location: ControllerLocation {
                cloud: Some(
                    info.cloud_tag
                        .strip_prefix("cloud-")
                        .unwrap_or(&info.cloud_tag)
                        .to_string(),
                ),
                region: info.cloud_region.clone(),
            },
        });
    }
    let _ = store.dispatch(StoreAction::UpdateModelInfo {
        ws_controller_url: model.ws_controller_url.clone(),
        info,
    });
    Ok(())
}

type ModelFetch = (FullStatus, BTreeMap<String, Annotations>, ModelFeatures);

async fn fetch_from_model(conn: &Connection) -> Result<ModelFetch, RpcError> {
    let status = facades::full_status(conn).await?;
    let entities = Entities {
        entities: status
            .applications
            .keys()
            .map(|name| Entity {
                tag: application_tag(name),
            })
            .collect(),
    };
    let annotations = if entities.entities.is_empty() {
        BTreeMap::new()
    } else {
        facades::annotations_get(conn, &entities)
            .await?
            .by_application()
    };
    let secrets = conn.facades().await.server_version(Facade::Secrets);
    Ok((status, annotations, ModelFeatures::from_secrets_version(secrets)))
}
