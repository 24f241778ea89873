//! JSON-RPC 2.0 media engine client.
//!
//! Talks to a Kurento-compatible media server over a WebSocket. Requests are
//! correlated with responses through numeric ids; server-initiated `onEvent`
//! requests are fanned out on a broadcast channel. The media server hands out
//! a session id on the first response; presenting it again on reconnect tells
//! us whether the same server process is still on the other end.

use super::engine::{
    ElementId, MediaEngine, MediaEngineError, MediaEvent, MediaEventKind, PlayerOptions,
    ReconnectOutcome,
};
use crate::models::IceCandidate;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type RpcResult = Result<Value, MediaEngineError>;
type PendingMap = Arc<DashMap<u64, oneshot::Sender<RpcResult>>>;

/// Keepalive interval announced to the server on ping, in milliseconds.
const PING_INTERVAL_MS: u64 = 240_000;

/// Event types subscribed for every watched element.
const WATCHED_EVENTS: [&str; 2] = ["IceCandidateFound", "Error"];

/// JSON-RPC client for one media node.
pub struct JsonRpcMediaEngine {
    uri: String,
    request_timeout: Duration,
    next_id: AtomicU64,
    session_id: Arc<parking_lot::RwLock<Option<String>>>,
    pending: PendingMap,
    outbound: parking_lot::RwLock<Option<mpsc::UnboundedSender<Message>>>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    events_tx: broadcast::Sender<MediaEvent>,
}

impl JsonRpcMediaEngine {
    /// Create a client. No connection is opened until [`Self::connect`].
    ///
    /// # Arguments
    ///
    /// * `uri` - Media server WebSocket URI (ws:// or wss://)
    /// * `request_timeout` - Upper bound for every request/response exchange
    pub fn new(uri: impl Into<String>, request_timeout: Duration) -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        Self {
            uri: uri.into(),
            request_timeout,
            next_id: AtomicU64::new(1),
            session_id: Arc::new(parking_lot::RwLock::new(None)),
            pending: Arc::new(DashMap::new()),
            outbound: parking_lot::RwLock::new(None),
            tasks: parking_lot::Mutex::new(Vec::new()),
            events_tx,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Open the WebSocket and start the sender and receiver tasks.
    ///
    /// # Errors
    ///
    /// Returns `MediaEngineError::Transport` if the socket cannot be opened,
    /// or `Timeout` if the handshake exceeds the request timeout.
    pub async fn connect(&self) -> Result<(), MediaEngineError> {
        self.teardown();

        let (ws_stream, _) = tokio::time::timeout(self.request_timeout, connect_async(&self.uri))
            .await
            .map_err(|_| MediaEngineError::Timeout)?
            .map_err(|e| MediaEngineError::Transport(format!("Failed to connect: {e}")))?;

        info!(target: "sfu.media.rpc", uri = %self.uri, "Connected to media server");

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        *self.outbound.write() = Some(tx);

        let sender = tokio::spawn(sender_task(write, rx));
        let receiver = tokio::spawn(receiver_task(
            read,
            Arc::clone(&self.pending),
            Arc::clone(&self.session_id),
            self.events_tx.clone(),
        ));
        self.tasks.lock().extend([sender, receiver]);
        Ok(())
    }

    fn teardown(&self) {
        *self.outbound.write() = None;
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        fail_all_pending(&self.pending, "connection reset");
    }

    async fn call(&self, method: &str, mut params: Value) -> RpcResult {
        let session = self.session_id.read().clone();
        if let (Some(session), Some(map)) = (session, params.as_object_mut()) {
            map.insert("sessionId".to_string(), Value::String(session));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = build_request(id, method, params);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let sent = self
            .outbound
            .read()
            .as_ref()
            .map(|out| out.send(Message::Text(request.to_string())).is_ok())
            .unwrap_or(false);
        if !sent {
            self.pending.remove(&id);
            return Err(MediaEngineError::Transport(
                "not connected to media server".to_string(),
            ));
        }

        debug!(target: "sfu.media.rpc", id, method, "Sent media server request");

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(MediaEngineError::Transport(
                "connection closed before response".to_string(),
            )),
            Err(_) => {
                self.pending.remove(&id);
                warn!(target: "sfu.media.rpc", id, method, "Media server request timed out");
                Err(MediaEngineError::Timeout)
            }
        }
    }

    async fn create_object(
        &self,
        object_type: &str,
        constructor_params: Value,
    ) -> Result<ElementId, MediaEngineError> {
        let params = json!({
            "type": object_type,
            "constructorParams": constructor_params,
            "properties": {},
        });
        let result = self.call("create", params).await?;
        value_string(&result).map(ElementId::new)
    }

    async fn invoke(
        &self,
        object: &ElementId,
        operation: &str,
        operation_params: Value,
    ) -> RpcResult {
        let params = json!({
            "object": object.as_str(),
            "operation": operation,
            "operationParams": operation_params,
        });
        self.call("invoke", params).await
    }
}

impl Drop for JsonRpcMediaEngine {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl MediaEngine for JsonRpcMediaEngine {
    async fn create_pipeline(&self) -> Result<ElementId, MediaEngineError> {
        self.create_object("MediaPipeline", json!({})).await
    }

    async fn create_webrtc_endpoint(
        &self,
        pipeline: &ElementId,
    ) -> Result<ElementId, MediaEngineError> {
        self.create_object("WebRtcEndpoint", json!({ "mediaPipeline": pipeline.as_str() }))
            .await
    }

    async fn create_player_endpoint(
        &self,
        pipeline: &ElementId,
        options: &PlayerOptions,
    ) -> Result<ElementId, MediaEngineError> {
        let mut params = json!({
            "mediaPipeline": pipeline.as_str(),
            "uri": options.uri,
            "useEncodedMedia": !options.adaptive_bitrate,
        });
        if let (Some(cache), Some(map)) = (options.network_cache, params.as_object_mut()) {
            map.insert("networkCache".to_string(), json!(cache));
        }
        self.create_object("PlayerEndpoint", params).await
    }

    async fn create_filter(
        &self,
        pipeline: &ElementId,
        filter_type: &str,
        options: &Value,
    ) -> Result<ElementId, MediaEngineError> {
        let mut params = match options {
            Value::Object(map) => Value::Object(map.clone()),
            _ => json!({}),
        };
        if let Some(map) = params.as_object_mut() {
            map.insert(
                "mediaPipeline".to_string(),
                Value::String(pipeline.as_str().to_string()),
            );
        }
        self.create_object(filter_type, params).await
    }

    async fn process_offer(
        &self,
        endpoint: &ElementId,
        sdp_offer: &str,
    ) -> Result<String, MediaEngineError> {
        let result = self
            .invoke(endpoint, "processOffer", json!({ "offer": sdp_offer }))
            .await?;
        value_string(&result)
    }

    async fn gather_candidates(&self, endpoint: &ElementId) -> Result<(), MediaEngineError> {
        self.invoke(endpoint, "gatherCandidates", json!({}))
            .await
            .map(|_| ())
    }

    async fn add_ice_candidate(
        &self,
        endpoint: &ElementId,
        candidate: &IceCandidate,
    ) -> Result<(), MediaEngineError> {
        self.invoke(
            endpoint,
            "addIceCandidate",
            json!({ "candidate": candidate }),
        )
        .await
        .map(|_| ())
    }

    async fn connect(
        &self,
        source: &ElementId,
        sink: &ElementId,
    ) -> Result<(), MediaEngineError> {
        self.invoke(source, "connect", json!({ "sink": sink.as_str() }))
            .await
            .map(|_| ())
    }

    async fn disconnect(
        &self,
        source: &ElementId,
        sink: &ElementId,
    ) -> Result<(), MediaEngineError> {
        self.invoke(source, "disconnect", json!({ "sink": sink.as_str() }))
            .await
            .map(|_| ())
    }

    async fn play(&self, player: &ElementId) -> Result<(), MediaEngineError> {
        self.invoke(player, "play", json!({})).await.map(|_| ())
    }

    async fn stop(&self, player: &ElementId) -> Result<(), MediaEngineError> {
        self.invoke(player, "stop", json!({})).await.map(|_| ())
    }

    async fn release(&self, element: &ElementId) -> Result<(), MediaEngineError> {
        self.call("release", json!({ "object": element.as_str() }))
            .await
            .map(|_| ())
    }

    async fn watch_element(&self, element: &ElementId) -> Result<(), MediaEngineError> {
        for event_type in WATCHED_EVENTS {
            self.call(
                "subscribe",
                json!({ "type": event_type, "object": element.as_str() }),
            )
            .await?;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), MediaEngineError> {
        self.call("ping", json!({ "interval": PING_INTERVAL_MS }))
            .await
            .map(|_| ())
    }

    async fn reconnect(&self) -> Result<ReconnectOutcome, MediaEngineError> {
        let previous = self.session_id.read().clone();
        self.connect().await?;

        let Some(previous) = previous else {
            return Ok(ReconnectOutcome::NewInstance);
        };

        match self.call("connect", json!({})).await {
            Ok(_) => {
                info!(target: "sfu.media.rpc", uri = %self.uri, "Media server session resumed");
                Ok(ReconnectOutcome::SameInstance)
            }
            Err(MediaEngineError::Server { code, message }) => {
                warn!(
                    target: "sfu.media.rpc",
                    uri = %self.uri,
                    previous_session = %previous,
                    code,
                    message = %message,
                    "Media server did not recognize previous session"
                );
                *self.session_id.write() = None;
                Ok(ReconnectOutcome::NewInstance)
            }
            Err(other) => Err(other),
        }
    }

    fn events(&self) -> broadcast::Receiver<MediaEvent> {
        self.events_tx.subscribe()
    }
}

/// Sender task: forwards queued messages to the socket.
async fn sender_task(
    mut write: futures::stream::SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write.send(msg).await {
            warn!(target: "sfu.media.rpc", error = %e, "Failed to send media server message");
            break;
        }
    }

    debug!(target: "sfu.media.rpc", "Sender task terminated");
}

/// Receiver task: resolves pending requests and publishes events.
async fn receiver_task(
    mut read: futures::stream::SplitStream<WsStream>,
    pending: PendingMap,
    session_id: Arc<parking_lot::RwLock<Option<String>>>,
    events_tx: broadcast::Sender<MediaEvent>,
) {
    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match parse_incoming(&text) {
                Some(Incoming::Response { id, session, result }) => {
                    if let Some(session) = session {
                        let mut current = session_id.write();
                        if current.as_deref() != Some(session.as_str()) {
                            *current = Some(session);
                        }
                    }
                    if let Some((_, tx)) = pending.remove(&id) {
                        let _ = tx.send(result);
                    } else {
                        debug!(target: "sfu.media.rpc", id, "Response for unknown request");
                    }
                }
                Some(Incoming::Event(event)) => {
                    let _ = events_tx.send(event);
                }
                None => {
                    debug!(target: "sfu.media.rpc", "Ignoring unrecognized media server message");
                }
            },
            Ok(Message::Close(_)) => {
                info!(target: "sfu.media.rpc", "Media server closed the connection");
                break;
            }
            Err(e) => {
                warn!(target: "sfu.media.rpc", error = %e, "Media server connection error");
                break;
            }
            _ => {}
        }
    }

    fail_all_pending(&pending, "connection closed");
    debug!(target: "sfu.media.rpc", "Receiver task terminated");
}

fn fail_all_pending(pending: &PendingMap, reason: &str) {
    let ids: Vec<u64> = pending.iter().map(|e| *e.key()).collect();
    for id in ids {
        if let Some((_, tx)) = pending.remove(&id) {
            let _ = tx.send(Err(MediaEngineError::Transport(reason.to_string())));
        }
    }
}

fn build_request(id: u64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

fn value_string(result: &Value) -> Result<String, MediaEngineError> {
    result
        .get("value")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            MediaEngineError::Transport("response is missing a string 'value'".to_string())
        })
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    id: Option<u64>,
    method: Option<String>,
    params: Option<Value>,
    result: Option<Value>,
    error: Option<RawError>,
}

#[derive(Debug, Deserialize)]
struct RawError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIceCandidate {
    candidate: String,
    #[serde(default)]
    sdp_mid: String,
    #[serde(default, rename = "sdpMLineIndex")]
    sdp_m_line_index: u32,
}

#[derive(Debug)]
enum Incoming {
    Response {
        id: u64,
        session: Option<String>,
        result: RpcResult,
    },
    Event(MediaEvent),
}

fn parse_incoming(text: &str) -> Option<Incoming> {
    let raw: RawMessage = serde_json::from_str(text).ok()?;

    if raw.method.as_deref() == Some("onEvent") {
        return parse_event(raw.params.as_ref()?).map(Incoming::Event);
    }

    let id = raw.id?;
    if let Some(err) = raw.error {
        return Some(Incoming::Response {
            id,
            session: None,
            result: Err(MediaEngineError::Server {
                code: err.code,
                message: err.message,
            }),
        });
    }

    let result = raw.result.unwrap_or(Value::Null);
    let session = result
        .get("sessionId")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(Incoming::Response {
        id,
        session,
        result: Ok(result),
    })
}

fn parse_event(params: &Value) -> Option<MediaEvent> {
    let value = params.get("value")?;
    let data = value.get("data")?;
    let source = data
        .get("source")
        .or_else(|| value.get("object"))
        .and_then(Value::as_str)?;
    let element = ElementId::new(source);

    match value.get("type").and_then(Value::as_str)? {
        "IceCandidateFound" => {
            let raw: RawIceCandidate = serde_json::from_value(data.get("candidate")?.clone()).ok()?;
            Some(MediaEvent {
                element,
                kind: MediaEventKind::IceCandidate(IceCandidate {
                    candidate: raw.candidate,
                    sdp_mid: raw.sdp_mid,
                    sdp_m_line_index: raw.sdp_m_line_index,
                }),
            })
        }
        "Error" => Some(MediaEvent {
            element,
            kind: MediaEventKind::MediaError {
                code: data.get("errorCode").and_then(Value::as_i64).unwrap_or(0),
                description: data
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
        }),
        _ => None,
    }
}
