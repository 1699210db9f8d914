use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::fakes::block_hash;

/// Shared state behind the mock node. One server answers both the mainchain
/// JSON-RPC surface (`/`) and the sidechain surfaces (`/ethv1` and REST).
#[derive(Clone, Default)]
pub struct MockNode {
    height: Arc<AtomicU64>,
    warming_up: Arc<AtomicBool>,
    malformed: Arc<AtomicBool>,
    authorization: Arc<Mutex<Option<String>>>,
    dumps: Arc<Mutex<Vec<Value>>>,
}

impl MockNode {
    pub fn new(height: u64) -> Self {
        let node = Self::default();
        node.height.store(height, Ordering::SeqCst);
        node
    }

    /// Every call answers with a JSON-RPC "Loading block index" error.
    pub fn set_warming_up(&self, warming_up: bool) {
        self.warming_up.store(warming_up, Ordering::SeqCst);
    }

    /// Successful responses carry a result of the wrong shape.
    pub fn set_malformed(&self, malformed: bool) {
        self.malformed.store(malformed, Ordering::SeqCst);
    }

    pub fn authorization(&self) -> Option<String> {
        self.authorization.lock().unwrap().clone()
    }

    pub fn dumps(&self) -> Vec<Value> {
        self.dumps.lock().unwrap().clone()
    }

    fn height(&self) -> u64 {
        self.height.load(Ordering::SeqCst)
    }
}

pub struct MockRpcServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockRpcServer {
    pub async fn start(node: MockNode) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock RPC listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let node = node.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| serve_request(node.clone(), req))) }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock RPC server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{}", addr),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(node: MockNode, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::POST {
        let mut response = Response::new(Body::from("Unsupported method"));
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return Ok(response);
    }

    if let Some(value) = req.headers().get(hyper::header::AUTHORIZATION) {
        *node.authorization.lock().unwrap() = value.to_str().ok().map(str::to_owned);
    }
    let path = req.uri().path().to_owned();

    let bytes = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("failed to read body: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let payload: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("invalid JSON payload: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let response_value = match path.as_str() {
        "/" | "/ethv1" => handle_call(&node, payload),
        route => handle_rest(&node, route, payload),
    };

    let mut response = Response::new(Body::from(response_value.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

fn handle_call(node: &MockNode, call: Value) -> Value {
    let id = call.get("id").cloned().unwrap_or(Value::Null);
    let method = call
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = call
        .get("params")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if node.warming_up.load(Ordering::SeqCst) {
        return error(id, -28, "Loading block index...");
    }
    if node.malformed.load(Ordering::SeqCst) {
        return success(id, json!({ "unexpected": true }));
    }

    match method.as_str() {
        "getblockchaininfo" => success(
            id,
            json!({ "blocks": node.height(), "verificationprogress": 0.999_999_5 }),
        ),
        "getblockcount" => success(id, json!(node.height())),
        "getblockhash" => match params.first().and_then(Value::as_u64) {
            Some(height) if height <= node.height() => {
                success(id, json!(block_hash(height, 0).to_string()))
            }
            _ => error(id, -8, "Block height out of range"),
        },
        "getblock" => {
            let height = params
                .first()
                .and_then(Value::as_str)
                .and_then(|raw| raw.parse::<u64>().ok());
            match height {
                Some(height) if height <= node.height() => success(
                    id,
                    json!({
                        "hash": block_hash(height, 0).to_string(),
                        "height": height,
                        "confirmations": node.height() - height + 1,
                    }),
                ),
                _ => error(id, -5, "Block not found"),
            }
        }
        "getscinfo" => match params.first().and_then(Value::as_str) {
            Some("scid-genesis") => success(id, json!({ "items": [{ "balance": 42.0 }] })),
            _ => success(id, json!({ "items": [] })),
        },
        "eth_blockNumber" => success(id, json!(format!("{:#x}", node.height()))),
        "zen_dump" => {
            node.dumps.lock().unwrap().push(Value::Array(params));
            success(id, Value::Null)
        }
        _ => error(id, -32601, format!("unknown method {method}")),
    }
}

fn handle_rest(node: &MockNode, route: &str, body: Value) -> Value {
    if node.warming_up.load(Ordering::SeqCst) {
        return json!({ "error": { "code": "0204", "description": "node is still syncing" } });
    }

    match route {
        "/mainchain/bestBlockReferenceInfo" => {
            json!({ "result": { "blockReferenceInfo": { "height": node.height() } } })
        }
        "/mainchain/blockReferenceInfoBy" => {
            let height = body.get("height").and_then(Value::as_u64).unwrap_or_default();
            json!({
                "result": {
                    "blockReferenceInfo": {
                        "hash": block_hash(height, 0).to_string(),
                        "height": height,
                        "mainchainReferenceDataSidechainBlockId": format!("sc-{height}"),
                    }
                }
            })
        }
        "/block/findById" => match body.get("blockId").and_then(Value::as_str) {
            Some(id) if id.starts_with("sc-") => json!({ "result": { "height": 1504 } }),
            _ => json!({ "error": { "code": "0101", "description": "block not found" } }),
        },
        "/block/best" => json!({ "result": { "height": node.height() + 500 } }),
        _ => json!({ "error": { "code": 404, "description": format!("unknown route {route}") } }),
    }
}

fn success(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

fn error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {
            "code": code,
            "message": message.into(),
        },
        "id": id,
    })
}
