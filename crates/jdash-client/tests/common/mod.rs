#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use jdash_core::rpc::{RpcRequest, RpcResponse, DEFAULT_MAX_FRAME_BYTES};
use jdash_core::store::Credential;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

pub const USER: &str = "eggman";
pub const PASSWORD: &str = "verysecure123";

#[derive(Debug, Clone)]
pub struct Call {
    pub path: String,
    pub facade: String,
    pub request: String,
    pub version: u32,
    pub params: Value,
}

impl Call {
    pub fn is(&self, facade: &str, request: &str) -> bool {
        self.facade == facade && self.request == request
    }

    /// The model uuid for `/model/<uuid>/api` paths.
    pub fn model_uuid(&self) -> Option<&str> {
        self.path
            .strip_prefix("/model/")
            .and_then(|rest| rest.strip_suffix("/api"))
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Ok(Value),
    Err {
        code: String,
        message: String,
        info: Option<Value>,
    },
    Delay(Duration, Box<Reply>),
    Never,
    Close,
}

impl Reply {
    pub fn error(message: &str) -> Self {
        Reply::Err {
            code: String::new(),
            message: message.to_string(),
            info: None,
        }
    }

    pub fn delayed(self, delay: Duration) -> Self {
        Reply::Delay(delay, Box::new(self))
    }
}

pub type Handler = Arc<dyn Fn(&Call) -> Reply + Send + Sync>;

struct Shared {
    handler: Handler,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// A scripted controller speaking the JSON RPC envelope over WebSocket.
pub struct FakeController {
    addr: SocketAddr,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl FakeController {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&Call) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let shared = Arc::new(Shared {
            handler: Arc::new(handler),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let accept_shared = shared.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, accept_shared.clone()));
            }
        });
        Self { addr, shared, task }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/api", self.addr)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.shared.calls.lock().expect("calls").clone()
    }

    pub fn count(&self, facade: &str, request: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.is(facade, request))
            .count()
    }

    /// Highest number of `Client.FullStatus` requests answered concurrently.
    pub fn peak_status_in_flight(&self) -> usize {
        self.shared.peak.load(Ordering::SeqCst)
    }
}

impl Drop for FakeController {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, shared: Arc<Shared>) {
    let mut path = String::new();
    let callback = |request: &Request, response: Response| {
        path = request.uri().path().to_string();
        Ok::<Response, ErrorResponse>(response)
    };
    let ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(Ok(message)) = source.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(request) = serde_json::from_str::<RpcRequest>(&text) else {
            continue;
        };
        let call = Call {
            path: path.clone(),
            facade: request.facade,
            request: request.request,
            version: request.version,
            params: request.params,
        };
        shared.calls.lock().expect("calls").push(call.clone());
        let counted = call.is("Client", "FullStatus");
        if counted {
            let now = shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            shared.peak.fetch_max(now, Ordering::SeqCst);
        }
        let reply = (shared.handler)(&call);
        let tx = tx.clone();
        let shared = shared.clone();
        let request_id = request.request_id;
        tokio::spawn(async move {
            let message = resolve(reply, request_id).await;
            if counted {
                shared.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            let _ = tx.send(message);
        });
    }
    writer.abort();
}

async fn resolve(mut reply: Reply, request_id: u64) -> Message {
    loop {
        match reply {
            Reply::Delay(delay, inner) => {
                tokio::time::sleep(delay).await;
                reply = *inner;
            }
            Reply::Never => return std::future::pending::<Message>().await,
            Reply::Ok(value) => return text(&RpcResponse::ok(request_id, value)),
            Reply::Err {
                code,
                message,
                info,
            } => return text(&RpcResponse::err(request_id, &code, &message, info)),
            Reply::Close => return Message::Close(None),
        }
    }
}

fn text(response: &RpcResponse) -> Message {
    let frame = jdash_core::rpc::encode_frame(response, DEFAULT_MAX_FRAME_BYTES).expect("encode");
    Message::Text(frame)
}

pub fn credential() -> Credential {
    Credential {
        user: USER.to_string(),
        password: PASSWORD.to_string(),
    }
}

pub fn facades(list: &[(&str, &[u32])]) -> Value {
    Value::Array(
        list.iter()
            .map(|(name, versions)| json!({"name": name, "versions": versions}))
            .collect(),
    )
}

pub fn juju_facades() -> Value {
    facades(&[
        ("Action", &[7]),
        ("AllWatcher", &[4]),
        ("Annotations", &[2]),
        ("Application", &[19]),
        ("Charms", &[7]),
        ("Client", &[8]),
        ("Controller", &[11]),
        ("ModelManager", &[10]),
        ("Pinger", &[1]),
        ("Secrets", &[2]),
    ])
}

pub fn jimm_facades() -> Value {
    let Value::Array(mut list) = juju_facades() else {
        unreachable!()
    };
    list.push(json!({"name": "JIMM", "versions": [4]}));
    Value::Array(list)
}

pub fn login_ok(facades: Value) -> Reply {
    Reply::Ok(json!({
        "server-version": "3.1.6",
        "controller-tag": "controller-deadbeef",
        "user-info": {
            "identity": format!("user-{USER}"),
            "display-name": USER,
            "controller-access": "superuser",
            "model-access": "admin",
        },
        "facades": facades,
    }))
}

pub fn user_models(uuids: &[&str]) -> Reply {
    let models: Vec<Value> = uuids
        .iter()
        .map(|uuid| {
            json!({
                "model": {
                    "uuid": uuid,
                    "name": format!("model-{uuid}"),
                    "owner-tag": format!("user-{USER}"),
                    "type": "iaas",
                },
                "last-connection": null,
            })
        })
        .collect();
    Reply::Ok(json!({ "user-models": models }))
}

pub fn full_status(model_name: &str) -> Reply {
    Reply::Ok(json!({
        "model": {
            "name": model_name,
            "type": "iaas",
            "cloud-tag": "cloud-aws",
            "region": "us-east-1",
            "version": "3.1.6",
        },
        "applications": {
            "mysql": {
                "charm": "ch:amd64/jammy/mysql-1",
                "status": {"status": "active"},
                "units": {
                    "mysql/0": {
                        "machine": "0",
                        "workload-status": {"status": "active"},
                        "agent-status": {"status": "idle"},
                    },
                },
            },
        },
        "machines": {"0": {"id": "0", "series": "jammy"}},
        "relations": null,
        "controller-timestamp": "2024-01-01T00:00:00Z",
    }))
}

pub fn model_info(uuid: &str, is_controller: bool) -> Reply {
    Reply::Ok(json!({
        "results": [{
            "result": {
                "uuid": uuid,
                "name": format!("model-{uuid}"),
                "type": "iaas",
                "controller-uuid": "deadbeef",
                "is-controller": is_controller,
                "cloud-tag": "cloud-aws",
                "cloud-region": "us-east-1",
                "owner-tag": format!("user-{USER}"),
                "life": "alive",
                "users": [],
            },
        }],
    }))
}

pub fn controller_config() -> Reply {
    Reply::Ok(json!({
        "config": {
            "controller-name": "jaas",
            "controller-uuid": "deadbeef",
        },
    }))
}

/// Answers everything a controller and its models need for a clean poll.
/// `fail_status` decides which model uuids fail their status fetch.
pub fn default_reply(call: &Call, uuids: &[&str], fail_status: &dyn Fn(&str) -> bool) -> Reply {
    match (call.facade.as_str(), call.request.as_str()) {
        ("Admin", "Login") => login_ok(juju_facades()),
        ("Pinger", "Ping") => Reply::Ok(json!({})),
        ("ModelManager", "ListModels") => user_models(uuids),
        ("ModelManager", "ModelInfo") => {
            let uuid = call.params["entities"][0]["tag"]
                .as_str()
                .and_then(|tag| tag.strip_prefix("model-"))
                .unwrap_or_default()
                .to_string();
            model_info(&uuid, false)
        }
        ("Controller", "ControllerConfig") => controller_config(),
        ("Client", "FullStatus") => match call.model_uuid() {
            Some(uuid) if fail_status(uuid) => Reply::error("status unavailable"),
            Some(uuid) => full_status(&format!("model-{uuid}")),
            None => Reply::error("not a model connection"),
        },
        ("Annotations", "Get") => Reply::Ok(json!({"results": [
            {"entity": "application-mysql", "annotations": {"gui-x": "10"}},
        ]})),
        _ => Reply::error("not implemented"),
    }
}

pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
