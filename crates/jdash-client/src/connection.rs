use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use jdash_core::api::{user_tag, WaitForDischargeRequest, WaitForDischargeResponse};
use jdash_core::rpc::{
    decode_frame, encode_frame, DischargeRequired, Facade, FacadeSet, FrameError, LoginRequest,
    LoginResult, RemoteError, RpcRequest, RpcResponse, ADMIN_FACADE_VERSION, CLIENT_VERSION,
    DEFAULT_MAX_FRAME_BYTES,
};
use jdash_core::store::Credential;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>>;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("unable to open {url}: {message}")]
    Transport { url: String, message: String },
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("facade {facade} not available on this connection")]
    FacadeUnavailable { facade: &'static str },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("unexpected response shape: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("login rejected: {0}")]
    Rejected(String),
    #[error("login timed out after {}ms", .after.as_millis())]
    Timeout { after: Duration },
    #[error("login response carried no controller details")]
    NoInfo,
    #[error("no credentials stored for {url}")]
    MissingCredentials { url: String },
    #[error("external authentication failed: {0}")]
    ExternalAuth(String),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

#[derive(Debug, Clone)]
pub enum LoginMethod {
    Password(Credential),
    /// Credentials are omitted and the identity provider discharges the
    /// login out of band.
    External,
    /// Reuses a macaroon discharged by an earlier external login.
    Macaroon(Value),
}

/// External auth wins when the endpoint has an identity provider; otherwise
/// stored credentials are required.
pub fn determine_login_method(
    url: &str,
    credential: Option<&Credential>,
    identity_provider_available: bool,
) -> Result<LoginMethod, LoginError> {
    if identity_provider_available {
        return Ok(LoginMethod::External);
    }
    credential
        .cloned()
        .map(LoginMethod::Password)
        .ok_or_else(|| LoginError::MissingCredentials {
            url: url.to_string(),
        })
}

/// One WebSocket RPC connection to a controller or model endpoint.
pub struct Connection {
    url: String,
    next_id: AtomicU64,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: PendingMap,
    closed: watch::Receiver<bool>,
    facades: RwLock<FacadeSet>,
    login: RwLock<Option<LoginResult>>,
    macaroon: RwLock<Option<Value>>,
    max_frame_bytes: usize,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    pub async fn connect(url: &str) -> Result<Self, ConnectError> {
        let (ws, _) = connect_async(url.to_string())
            .await
            .map_err(|err| ConnectError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            })?;
        debug!(event = "ws_connected", url = url);
        Ok(Self::from_stream(url, ws, DEFAULT_MAX_FRAME_BYTES))
    }

    fn from_stream(url: &str, ws: WsStream, max_frame_bytes: usize) -> Self {
        let (mut sink, stream) = ws.split();
        let (outgoing, mut rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if sink.send(message).await.is_err() || closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (closed_tx, closed) = watch::channel(false);
        let reader = tokio::spawn(read_loop(
            url.to_string(),
            stream,
            pending.clone(),
            closed_tx,
            max_frame_bytes,
        ));

        Self {
            url: url.to_string(),
            next_id: AtomicU64::new(1),
            outgoing,
            pending,
            closed,
            facades: RwLock::new(FacadeSet::default()),
            login: RwLock::new(None),
            macaroon: RwLock::new(None),
            max_frame_bytes,
            tasks: vec![writer, reader],
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Flips to `true` once the transport is gone.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.clone()
    }

    pub async fn facades(&self) -> FacadeSet {
        self.facades.read().await.clone()
    }

    pub async fn login_result(&self) -> Option<LoginResult> {
        self.login.read().await.clone()
    }

    /// The macaroon discharged during an external login, if any.
    pub async fn discharged_macaroon(&self) -> Option<Value> {
        self.macaroon.read().await.clone()
    }

    /// Call at the highest version both sides support.
    pub async fn call(&self, facade: Facade, request: &str, params: Value) -> Result<Value, RpcError> {
        let version = self
            .facades
            .read()
            .await
            .negotiate(facade)
            .ok_or(RpcError::FacadeUnavailable {
                facade: facade.name(),
            })?;
        self.call_raw(facade.name(), version, request, params).await
    }

    pub async fn call_as<P, T>(&self, facade: Facade, request: &str, params: &P) -> Result<T, RpcError>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let params =
            serde_json::to_value(params).map_err(|err| RpcError::Decode(err.to_string()))?;
        let response = self.call(facade, request, params).await?;
        serde_json::from_value(response).map_err(|err| RpcError::Decode(err.to_string()))
    }

    pub async fn call_raw(
        &self,
        facade: &str,
        version: u32,
        request: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        if self.is_closed() {
            return Err(RpcError::ConnectionClosed);
        }
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = encode_frame(
            &RpcRequest {
                request_id,
                facade: facade.to_string(),
                request: request.to_string(),
                version,
                params,
            },
            self.max_frame_bytes,
        )?;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request_id, tx);
        // Removes the entry if this future is dropped before the reply, e.g.
        // when a long-poll is cancelled.
        let _guard = PendingGuard {
            pending: &self.pending,
            request_id,
        };
        if self.outgoing.send(Message::Text(frame)).is_err() {
            return Err(RpcError::ConnectionClosed);
        }
        let response = rx.await.map_err(|_| RpcError::ConnectionClosed)?;
        Ok(response.into_result()?)
    }

    /// Authenticate this connection. `on_visit` receives the identity
    /// provider URL when the server asks for an external discharge.
    pub async fn login<F>(&self, method: &LoginMethod, on_visit: F) -> Result<LoginResult, LoginError>
    where
        F: Fn(&str) + Send + Sync,
    {
        let mut request = match method {
            LoginMethod::Password(credential) => LoginRequest {
                auth_tag: Some(user_tag(&credential.user)),
                credentials: Some(credential.password.clone()),
                macaroons: None,
                client_version: CLIENT_VERSION.to_string(),
            },
            LoginMethod::External => LoginRequest {
                client_version: CLIENT_VERSION.to_string(),
                ..LoginRequest::default()
            },
            LoginMethod::Macaroon(macaroon) => LoginRequest {
                macaroons: Some(vec![vec![macaroon.clone()]]),
                client_version: CLIENT_VERSION.to_string(),
                ..LoginRequest::default()
            },
        };

        let mut discharged = false;
        let response = loop {
            let params =
                serde_json::to_value(&request).map_err(|err| RpcError::Decode(err.to_string()))?;
            match self
                .call_raw(Facade::Admin.name(), ADMIN_FACADE_VERSION, "Login", params)
                .await
            {
                Ok(value) => break value,
                Err(RpcError::Remote(remote)) if remote.is_discharge_required() && !discharged => {
                    let discharge = DischargeRequired::from_error(&remote).ok_or_else(|| {
                        LoginError::ExternalAuth("discharge details missing".to_string())
                    })?;
                    info!(event = "login_visit_url", url = %self.url, visit_url = %discharge.visit_url);
                    on_visit(&discharge.visit_url);
                    let macaroon = self.wait_for_discharge(&discharge.wait_url).await?;
                    request.macaroons = Some(vec![vec![macaroon.clone()]]);
                    *self.macaroon.write().await = Some(macaroon);
                    discharged = true;
                }
                Err(RpcError::Remote(remote)) => return Err(LoginError::Rejected(remote.message)),
                Err(err) => return Err(LoginError::Rpc(err)),
            }
        };

        let result: LoginResult =
            serde_json::from_value(response).map_err(|err| RpcError::Decode(err.to_string()))?;
        if !result.has_info() {
            return Err(LoginError::NoInfo);
        }
        *self.facades.write().await = FacadeSet::from_advertised(&result.facades);
        *self.login.write().await = Some(result.clone());
        info!(
            event = "login_ok",
            url = %self.url,
            server_version = result.server_version.as_deref().unwrap_or(""),
        );
        Ok(result)
    }

    async fn wait_for_discharge(&self, wait_url: &str) -> Result<Value, LoginError> {
        let params = serde_json::to_value(WaitForDischargeRequest {
            wait_url: wait_url.to_string(),
        })
        .map_err(|err| RpcError::Decode(err.to_string()))?;
        let response = self
            .call_raw(
                Facade::Admin.name(),
                ADMIN_FACADE_VERSION,
                "WaitForDischarge",
                params,
            )
            .await
            .map_err(|err| LoginError::ExternalAuth(err.to_string()))?;
        let discharge: WaitForDischargeResponse = serde_json::from_value(response)
            .map_err(|err| LoginError::ExternalAuth(err.to_string()))?;
        if discharge.macaroon.is_null() {
            return Err(LoginError::ExternalAuth("no macaroon returned".to_string()));
        }
        Ok(discharge.macaroon)
    }

    /// Release the transport. Safe to call more than once.
    pub async fn close(&self) {
        let _ = self.outgoing.send(Message::Close(None));
        let mut closed = self.closed.clone();
        let _ = tokio::time::timeout(Duration::from_secs(1), closed.wait_for(|closed| *closed)).await;
        for task in &self.tasks {
            task.abort();
        }
        fail_pending(&self.pending);
        debug!(event = "ws_closed", url = %self.url);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

struct PendingGuard<'a> {
    pending: &'a PendingMap,
    request_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.request_id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Dropping the senders wakes every waiter with `ConnectionClosed`.
fn fail_pending(pending: &PendingMap) {
    lock(pending).clear();
}

async fn read_loop(
    url: String,
    mut stream: SplitStream<WsStream>,
    pending: PendingMap,
    closed: watch::Sender<bool>,
    max_frame_bytes: usize,
) {
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                warn!(event = "ws_read_error", url = %url, error = %err);
                break;
            }
        };
        let response: RpcResponse = match decode_frame(&text, max_frame_bytes) {
            Ok(response) => response,
            Err(err) => {
                warn!(event = "frame_invalid", url = %url, error = %err);
                continue;
            }
        };
        let waiter = lock(&pending).remove(&response.request_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => debug!(event = "response_unmatched", url = %url, request_id = response.request_id),
        }
    }
    let _ = closed.send(true);
    fail_pending(&pending);
}

/// Connect and log in, bounding the whole exchange (including any external
/// identity flow) by `timeout`.
pub async fn connect_and_login_with_timeout<F>(
    url: &str,
    method: &LoginMethod,
    timeout: Duration,
    on_visit: F,
) -> Result<Connection, LoginError>
where
    F: Fn(&str) + Send + Sync,
{
    let attempt = async {
        let conn = Connection::connect(url).await?;
        conn.login(method, on_visit).await?;
        Ok::<_, LoginError>(conn)
    };
    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => {
            warn!(event = "login_timeout", url = url, timeout_ms = timeout.as_millis() as u64);
            Err(LoginError::Timeout { after: timeout })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_method_prefers_identity_provider() {
        let credential = Credential {
            user: "eggman".to_string(),
            password: "verysecure123".to_string(),
        };
        assert!(matches!(
            determine_login_method("wss://a/api", Some(&credential), true),
            Ok(LoginMethod::External)
        ));
        assert!(matches!(
            determine_login_method("wss://a/api", Some(&credential), false),
            Ok(LoginMethod::Password(_))
        ));
        assert!(matches!(
            determine_login_method("wss://a/api", None, false),
            Err(LoginError::MissingCredentials { .. })
        ));
    }
}
