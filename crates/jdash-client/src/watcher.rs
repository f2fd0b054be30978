//! Per-model watch loop: subscribe, seed from full status, then apply
//! delta batches in arrival order until stopped.

use crate::config::PollerOptions;
use crate::connection::{connect_and_login_with_timeout, Connection, LoginError, LoginMethod, RpcError};
use crate::facades;
use crate::heartbeat::start_heartbeat;
use crate::shared::StoreHandle;
use jdash_core::delta::parse_deltas;
use jdash_core::errors::WatcherErrorLabel;
use jdash_core::rpc::model_endpoint;
use jdash_core::snapshot::ModelSnapshot;
use jdash_core::store::{StoreAction, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Starting,
    Watching,
    Stopping,
    Stopped,
    Failed(WatcherErrorLabel),
}

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("{label}: {source}")]
    Login {
        label: WatcherErrorLabel,
        #[source]
        source: LoginError,
    },
    #[error("{label}: {source}")]
    Rpc {
        label: WatcherErrorLabel,
        #[source]
        source: RpcError,
    },
    #[error("{label}: {source}")]
    Store {
        label: WatcherErrorLabel,
        #[source]
        source: StoreError,
    },
}

impl WatcherError {
    pub fn label(&self) -> WatcherErrorLabel {
        match self {
            WatcherError::Login { label, .. }
            | WatcherError::Rpc { label, .. }
            | WatcherError::Store { label, .. } => *label,
        }
    }
}

pub struct ModelWatcherHandle {
    model_uuid: String,
    state: watch::Receiver<WatcherState>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ModelWatcherHandle {
    pub fn model_uuid(&self) -> &str {
        &self.model_uuid
    }

    pub fn state(&self) -> WatcherState {
        self.state.borrow().clone()
    }

    pub fn state_signal(&self) -> watch::Receiver<WatcherState> {
        self.state.clone()
    }

    /// Best effort. Waits briefly for the loop to unsubscribe before
    /// aborting it.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if tokio::time::timeout(STOP_GRACE, &mut self.task).await.is_err() {
            warn!(event = "watcher_stop_timeout", model_uuid = %self.model_uuid);
            self.task.abort();
        }
    }
}

/// Spawn a watch loop for one model. The returned handle reports the loop
/// state and stops it.
pub fn start_model_watcher(
    store: StoreHandle,
    ws_controller_url: &str,
    model_uuid: &str,
    method: LoginMethod,
    options: &PollerOptions,
) -> ModelWatcherHandle {
    let (state_tx, state) = watch::channel(WatcherState::Idle);
    let (stop_tx, stop_rx) = oneshot::channel();
    let ctx = WatchContext {
        store,
        ws_controller_url: ws_controller_url.to_string(),
        model_uuid: model_uuid.to_string(),
        method,
        login_timeout: options.login_timeout,
        ping_interval: options.ping_interval,
        state: state_tx,
    };
    let task = tokio::spawn(ctx.run(stop_rx));
    ModelWatcherHandle {
        model_uuid: model_uuid.to_string(),
        state,
        stop: Some(stop_tx),
        task,
    }
}

struct WatchContext {
    store: StoreHandle,
    ws_controller_url: String,
    model_uuid: String,
    method: LoginMethod,
    login_timeout: Duration,
    ping_interval: Duration,
    state: watch::Sender<WatcherState>,
}

impl WatchContext {
    async fn run(self, mut stop: oneshot::Receiver<()>) {
        self.state.send_replace(WatcherState::Starting);
        let started = tokio::select! {
            _ = &mut stop => {
                self.state.send_replace(WatcherState::Stopped);
                return;
            }
            started = self.start() => started,
        };
        let (conn, watcher_id) = match started {
            Ok(started) => started,
            Err(err) => {
                self.fail(&err);
                return;
            }
        };

        let heartbeat = start_heartbeat(Arc::clone(&conn), self.ping_interval);
        let mut heartbeat_stopped = heartbeat.stopped_signal();
        self.state.send_replace(WatcherState::Watching);
        info!(event = "model_watcher_started", model_uuid = %self.model_uuid, watcher_id = %watcher_id);

        let outcome = loop {
            tokio::select! {
                _ = &mut stop => break None,
                _ = heartbeat_stopped.changed() => {
                    break Some(WatcherError::Rpc {
                        label: WatcherErrorLabel::NoConnection,
                        source: RpcError::ConnectionClosed,
                    });
                }
                next = facades::all_watcher_next(&conn, &watcher_id) => match next {
                    Ok(batch) => self.apply_batch(&batch),
                    Err(err) => break Some(WatcherError::Rpc {
                        label: WatcherErrorLabel::NoConnection,
                        source: err,
                    }),
                },
            }
        };

        match outcome {
            None => {
                self.state.send_replace(WatcherState::Stopping);
                if let Err(err) = tokio::time::timeout(
                    STOP_GRACE,
                    facades::all_watcher_stop(&conn, &watcher_id),
                )
                .await
                .unwrap_or(Err(RpcError::ConnectionClosed))
                {
                    warn!(event = "watcher_stop_failed", model_uuid = %self.model_uuid, error = %err);
                }
                heartbeat.stop();
                conn.close().await;
                let _ = self.store.dispatch(StoreAction::StopModelWatcher {
                    model_uuid: self.model_uuid.clone(),
                });
                self.state.send_replace(WatcherState::Stopped);
                info!(event = "model_watcher_stopped", model_uuid = %self.model_uuid);
            }
            Some(err) => {
                heartbeat.stop();
                conn.close().await;
                self.fail(&err);
            }
        }
    }

    /// Subscribe before seeding so no change between the status fetch and
    /// the first batch is lost.
    async fn start(&self) -> Result<(Arc<Connection>, String), WatcherError> {
        let url = model_endpoint(&self.ws_controller_url, &self.model_uuid);
        let conn = connect_and_login_with_timeout(&url, &self.method, self.login_timeout, |_| {})
            .await
            .map_err(|source| WatcherError::Login {
                label: WatcherErrorLabel::NoConnection,
                source,
            })?;
        let conn = Arc::new(conn);
        let watcher_id = match facades::watch_all(&conn).await {
            Ok(id) => id,
            Err(source) => {
                conn.close().await;
                return Err(WatcherError::Rpc {
                    label: WatcherErrorLabel::NoId,
                    source,
                });
            }
        };
        let status = match facades::full_status(&conn).await {
            Ok(status) => status,
            Err(source) => {
                let _ = facades::all_watcher_stop(&conn, &watcher_id).await;
                conn.close().await;
                return Err(WatcherError::Rpc {
                    label: WatcherErrorLabel::NoId,
                    source,
                });
            }
        };
        let seeded = self.store.dispatch(StoreAction::SeedModelWatcher {
            ws_controller_url: self.ws_controller_url.clone(),
            model_uuid: self.model_uuid.clone(),
            snapshot: ModelSnapshot::seed(&self.model_uuid, &status),
        });
        if let Err(source) = seeded {
            let _ = facades::all_watcher_stop(&conn, &watcher_id).await;
            conn.close().await;
            return Err(WatcherError::Store {
                label: WatcherErrorLabel::NoConnection,
                source,
            });
        }
        Ok((conn, watcher_id))
    }

    /// A malformed batch is dropped whole and the loop keeps watching.
    fn apply_batch(&self, batch: &serde_json::Value) {
        match parse_deltas(batch) {
            Ok(deltas) if deltas.is_empty() => {}
            Ok(deltas) => {
                debug!(event = "delta_batch", model_uuid = %self.model_uuid, count = deltas.len());
                let _ = self
                    .store
                    .dispatch(StoreAction::ProcessAllWatcherDeltas(deltas));
            }
            Err(err) => {
                warn!(event = "delta_batch_rejected", model_uuid = %self.model_uuid, error = %err);
            }
        }
    }

    fn fail(&self, err: &WatcherError) {
        warn!(event = "model_watcher_failed", model_uuid = %self.model_uuid, error = %err);
        let _ = self.store.dispatch(StoreAction::StoreModelWatcherError {
            model_uuid: self.model_uuid.clone(),
            error: err.label().as_str().to_string(),
        });
        self.state.send_replace(WatcherState::Failed(err.label()));
    }
}

/// Running watchers keyed by model uuid.
#[derive(Default)]
pub struct ModelWatchers {
    handles: Mutex<HashMap<String, ModelWatcherHandle>>,
}

impl ModelWatchers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops any watcher already running for the same model.
    pub async fn insert(&self, handle: ModelWatcherHandle) {
        let previous = self
            .handles
            .lock()
            .await
            .insert(handle.model_uuid.clone(), handle);
        if let Some(previous) = previous {
            previous.stop().await;
        }
    }

    pub async fn state(&self, model_uuid: &str) -> Option<WatcherState> {
        self.handles
            .lock()
            .await
            .get(model_uuid)
            .map(ModelWatcherHandle::state)
    }

    pub async fn stop(&self, model_uuid: &str) -> bool {
        let handle = self.handles.lock().await.remove(model_uuid);
        match handle {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    pub async fn stop_all(&self) -> usize {
        let drained: Vec<ModelWatcherHandle> =
            self.handles.lock().await.drain().map(|(_, handle)| handle).collect();
        let count = drained.len();
        for handle in drained {
            handle.stop().await;
        }
        count
    }
}
