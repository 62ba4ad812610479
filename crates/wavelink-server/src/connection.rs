//! Per-connection lifecycle
//!
//! Each accepted WebSocket gets one connection task: handshake (encrypted
//! mode only), then a sequential read loop feeding the router, with a
//! dedicated writer task draining the outbound channel. Frames on one
//! connection are processed in arrival order; concurrency exists across
//! connections, not within one.

use std::borrow::Cow;
use std::sync::Arc;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use wavelink_core::crypto::SessionCipher;
use wavelink_core::{codec, Frame, HandshakeMessage, SessionCrypto, Value, CLOSE_RATE_LIMITED};

use crate::error::{Result, ServerError};
use crate::rate_limiter::RateLimiter;
use crate::registry::SessionRegistry;
use crate::router::{AuthenticatedIdentity, Router, SessionChange};

// ----------------------------------------------------------------------------
// Connection Mode
// ----------------------------------------------------------------------------

/// Wire mode, selected by the request path at upgrade time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// `/ws`: handshake, then encrypted binary frames
    Encrypted,
    /// `/diag`: plaintext JSON text frames, no handshake
    Diagnostic,
}

// ----------------------------------------------------------------------------
// Outbound Channel
// ----------------------------------------------------------------------------

/// Message consumed by the writer task
pub enum Outbound {
    Frame(Frame),
    /// Close the connection with the given code after flushing
    Close(u16, &'static str),
}

/// Live connections indexed by id, for out-of-band closes (supersede)
#[derive(Default)]
pub struct ConnectionTable {
    senders: DashMap<u64, UnboundedSender<Outbound>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, conn_id: u64, sender: UnboundedSender<Outbound>) {
        self.senders.insert(conn_id, sender);
    }

    fn remove(&self, conn_id: u64) {
        self.senders.remove(&conn_id);
    }

    /// Ask a connection to close; no-op if it is already gone
    pub fn close(&self, conn_id: u64, reason: &'static str) {
        if let Some(sender) = self.senders.get(&conn_id) {
            let _ = sender.send(Outbound::Close(CloseCode::Normal.into(), reason));
        }
    }

    /// Ask every live connection to close
    pub fn close_all(&self, reason: &'static str) {
        for entry in self.senders.iter() {
            let _ = entry
                .value()
                .send(Outbound::Close(CloseCode::Normal.into(), reason));
        }
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Connection Context
// ----------------------------------------------------------------------------

/// Shared state handed to every connection task
pub struct ConnectionContext {
    pub conn_id: u64,
    pub mode: ConnectionMode,
    pub router: Arc<Router>,
    pub registry: Arc<SessionRegistry>,
    pub limiter: Arc<RateLimiter>,
    pub connections: Arc<ConnectionTable>,
    pub handshake_timeout: std::time::Duration,
}

/// Drive one accepted WebSocket to completion
pub async fn run<S>(ctx: ConnectionContext, ws: WebSocketStream<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let conn_id = ctx.conn_id;
    ctx.limiter.register(conn_id);

    let result = drive(&ctx, ws).await;

    ctx.limiter.deregister(conn_id);
    ctx.connections.remove(conn_id);
    match result {
        Ok(()) => info!(conn_id, "connection closed"),
        Err(e) if e.is_rate_limited() => {
            info!(conn_id, "connection closed: rate limit exceeded");
        }
        Err(e) => warn!(conn_id, error = %e, "connection ended with error"),
    }
}

async fn drive<S>(ctx: &ConnectionContext, mut ws: WebSocketStream<S>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    // Encrypted mode performs the handshake on the unsplit stream, bounded
    // by the handshake timeout.
    let cipher = match ctx.mode {
        ConnectionMode::Encrypted => {
            let handshake = perform_handshake(ctx, &mut ws);
            match tokio::time::timeout(ctx.handshake_timeout, handshake).await {
                Ok(result) => Some(result?),
                Err(_) => {
                    debug!(conn_id = ctx.conn_id, "handshake timed out");
                    let _ = ws.close(None).await;
                    return Err(ServerError::HandshakeClosed);
                }
            }
        }
        ConnectionMode::Diagnostic => None,
    };

    let (sink, stream) = ws.split();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    ctx.connections.insert(ctx.conn_id, out_tx.clone());

    let writer = tokio::spawn(write_loop(sink, out_rx, ctx.mode, cipher.clone()));
    let read_result = read_loop(ctx, stream, cipher, &out_tx).await;

    // Dropping the last sender ends the writer after it flushes.
    drop(out_tx);
    let _ = writer.await;
    read_result
}

// ----------------------------------------------------------------------------
// Handshake
// ----------------------------------------------------------------------------

/// Server side of the key-exchange handshake.
///
/// Expects the client's `key_exchange` text frame, answers with our own key
/// plus the sealed session key, then awaits the sealed ack. Any deviation is
/// fatal for the connection.
async fn perform_handshake<S>(
    ctx: &ConnectionContext,
    ws: &mut WebSocketStream<S>,
) -> Result<SessionCipher>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = SessionCrypto::new()?;

    let hello = next_payload(ctx, ws).await?;
    let text = match hello {
        Message::Text(text) => text,
        other => {
            return Err(ServerError::Protocol(
                wavelink_core::WavelinkError::handshake(format!(
                    "expected key_exchange text frame, got {other:?}"
                )),
            ))
        }
    };
    let HandshakeMessage::KeyExchange { key } = HandshakeMessage::from_json(&text)?;
    session.learn_remote_key(&key)?;

    ws.send(Message::Text(session.local_key_exchange().to_json()))
        .await?;
    let sealed = session.issue_session_key()?;
    ws.send(Message::Binary(sealed)).await?;

    let ack = next_payload(ctx, ws).await?;
    let blob = match ack {
        Message::Binary(blob) => blob,
        other => {
            return Err(ServerError::Protocol(
                wavelink_core::WavelinkError::handshake(format!(
                    "expected sealed key ack, got {other:?}"
                )),
            ))
        }
    };
    session.accept_key_ack(&blob)?;

    debug!(conn_id = ctx.conn_id, "handshake complete");
    Ok(session.cipher()?)
}

/// Read the next data-bearing message, counting it against the rate limit.
/// Control frames (ping/pong) pass through uncounted.
async fn next_payload<S>(
    ctx: &ConnectionContext,
    ws: &mut WebSocketStream<S>,
) -> Result<Message>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let msg = ws
            .next()
            .await
            .ok_or(ServerError::HandshakeClosed)??;
        match msg {
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => return Err(ServerError::HandshakeClosed),
            other => {
                ctx.limiter.record(ctx.conn_id)?;
                return Ok(other);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Writer Task
// ----------------------------------------------------------------------------

async fn write_loop<S>(
    mut sink: futures::stream::SplitSink<WebSocketStream<S>, Message>,
    mut rx: UnboundedReceiver<Outbound>,
    mode: ConnectionMode,
    cipher: Option<SessionCipher>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(frame) => {
                let msg = match encode_outbound(&frame, mode, cipher.as_ref()) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(error = %e, "dropping unencodable outbound frame");
                        continue;
                    }
                };
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            Outbound::Close(code, reason) => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: code.into(),
                        reason: Cow::Borrowed(reason),
                    })))
                    .await;
                break;
            }
        }
    }
    let _ = sink.close().await;
}

fn encode_outbound(
    frame: &Frame,
    mode: ConnectionMode,
    cipher: Option<&SessionCipher>,
) -> wavelink_core::Result<Message> {
    match mode {
        ConnectionMode::Encrypted => {
            let cipher = cipher.ok_or_else(|| {
                wavelink_core::WavelinkError::invalid_state("ready", "no session cipher")
            })?;
            let encoded = codec::encode(frame)?;
            Ok(Message::Binary(cipher.encrypt(&encoded)?))
        }
        ConnectionMode::Diagnostic => Ok(Message::Text(frame_to_diag_json(frame).to_string())),
    }
}

// ----------------------------------------------------------------------------
// Reader Loop
// ----------------------------------------------------------------------------

async fn read_loop<S>(
    ctx: &ConnectionContext,
    mut stream: futures::stream::SplitStream<WebSocketStream<S>>,
    cipher: Option<SessionCipher>,
    out_tx: &UnboundedSender<Outbound>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut identity: Option<AuthenticatedIdentity> = None;

    let result = loop {
        let msg = match stream.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => break Err(ServerError::WebSocket(e)),
            None => break Ok(()),
        };

        let frame = match msg {
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => break Ok(()),
            Message::Binary(data) => {
                if let Err(e) = ctx.limiter.record(ctx.conn_id) {
                    let _ = out_tx.send(Outbound::Close(CLOSE_RATE_LIMITED, "rate limited"));
                    break Err(ServerError::Protocol(e));
                }
                let Some(cipher) = cipher.as_ref() else {
                    debug!(conn_id = ctx.conn_id, "binary frame on diagnostic connection");
                    continue;
                };
                match decode_encrypted(cipher, &data) {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(conn_id = ctx.conn_id, error = %e, "dropping undecodable frame");
                        continue;
                    }
                }
            }
            Message::Text(text) => {
                if let Err(e) = ctx.limiter.record(ctx.conn_id) {
                    let _ = out_tx.send(Outbound::Close(CLOSE_RATE_LIMITED, "rate limited"));
                    break Err(ServerError::Protocol(e));
                }
                if ctx.mode != ConnectionMode::Diagnostic {
                    debug!(conn_id = ctx.conn_id, "text frame on encrypted connection");
                    continue;
                }
                match diag_json_to_frame(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(conn_id = ctx.conn_id, error = %e, "dropping malformed json frame");
                        continue;
                    }
                }
            }
            Message::Frame(_) => continue,
        };

        if frame.action.is_none() {
            // The server issues no requests, so a reply-shaped frame has
            // nothing to correlate with.
            debug!(conn_id = ctx.conn_id, "dropping frame without action");
            continue;
        }

        let dispatch = ctx.router.dispatch(identity.as_ref(), &frame).await;

        if let Some(change) = dispatch.session_change {
            apply_session_change(ctx, &mut identity, change, out_tx);
        }
        if let Some(ident) = &identity {
            ctx.registry.touch(&ident.id);
        }

        if out_tx.send(Outbound::Frame(dispatch.reply)).is_err() {
            break Ok(());
        }
    };

    if let Some(ident) = &identity {
        ctx.registry.unbind_connection(&ident.id, ctx.conn_id);
    }
    result
}

fn decode_encrypted(cipher: &SessionCipher, data: &[u8]) -> wavelink_core::Result<Frame> {
    let plaintext = cipher.decrypt(data)?;
    codec::decode(&plaintext)
}

fn apply_session_change(
    ctx: &ConnectionContext,
    identity: &mut Option<AuthenticatedIdentity>,
    change: SessionChange,
    out_tx: &UnboundedSender<Outbound>,
) {
    match change {
        SessionChange::Login(ident) => {
            let superseded = ctx
                .registry
                .bind(ident.clone(), ctx.conn_id, frame_sender(out_tx.clone()));
            if let Some(old_conn) = superseded {
                info!(
                    conn_id = ctx.conn_id,
                    old_conn,
                    identity = %ident.id,
                    "superseding previous connection"
                );
                ctx.connections.close(old_conn, "superseded by newer connection");
            }
            *identity = Some(ident);
        }
        SessionChange::Logout => {
            if let Some(ident) = identity.take() {
                ctx.registry.unbind(&ident.id);
            }
        }
    }
}

/// Adapt the outbound channel to the plain frame sender the registry holds
fn frame_sender(out: UnboundedSender<Outbound>) -> UnboundedSender<Frame> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if out.send(Outbound::Frame(frame)).is_err() {
                break;
            }
        }
    });
    tx
}

// ----------------------------------------------------------------------------
// Diagnostic JSON Wire Form
// ----------------------------------------------------------------------------
//
// The diagnostic endpoint mirrors the encrypted envelope field-for-field in
// plaintext JSON so router behavior can be inspected without a crypto-capable
// client.

fn frame_to_diag_json(frame: &Frame) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    if let Some(id) = &frame.correlation_id {
        obj.insert("correlationId".into(), serde_json::Value::String(id.clone()));
    }
    obj.insert(
        "type".into(),
        serde_json::Value::String(frame.category.clone()),
    );
    if let Some(action) = &frame.action {
        obj.insert("action".into(), serde_json::Value::String(action.clone()));
    }
    if let Some(payload) = &frame.payload {
        obj.insert("payload".into(), serde_json::Value::from(payload.clone()));
    }
    if let Some(error) = &frame.error {
        obj.insert(
            "error".into(),
            serde_json::json!({
                "code": error.code,
                "message": error.message,
                "details": error.details.clone().map(serde_json::Value::from),
            }),
        );
    }
    serde_json::Value::Object(obj)
}

fn diag_json_to_frame(text: &str) -> wavelink_core::Result<Frame> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| wavelink_core::WavelinkError::invalid_frame(e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| wavelink_core::WavelinkError::invalid_frame("expected a json object"))?;

    let category = obj
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| wavelink_core::WavelinkError::invalid_frame("missing type field"))?
        .to_string();

    Ok(Frame {
        correlation_id: obj
            .get("correlationId")
            .and_then(serde_json::Value::as_str)
            .map(String::from),
        category,
        action: obj
            .get("action")
            .and_then(serde_json::Value::as_str)
            .map(String::from),
        payload: obj.get("payload").cloned().map(Value::from),
        error: None,
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
