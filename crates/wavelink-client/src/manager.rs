//! Link manager
//!
//! Owns the connection lifecycle: dial, handshake, ready traffic, reconnect.
//! Endpoints are tried round-robin with a fixed backoff between attempts.
//! While the link is down, outbound requests accumulate in the FIFO queue
//! and replay in order once a handshake completes.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{mpsc::UnboundedSender, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use wavelink_core::{
    CorrelationId, Frame, HandshakeMessage, RequestCorrelator, SessionCrypto, WavelinkError,
};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::queue::{OutboundQueue, PendingRequest};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ----------------------------------------------------------------------------
// Link State
// ----------------------------------------------------------------------------

/// Observable connection state of the client link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    AwaitingHandshake,
    Ready,
}

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

/// Instruction from a [`crate::Client`] handle to the manager task
pub enum Command {
    Request(PendingRequest),
    Shutdown,
}

enum Flow {
    Reconnect,
    Shutdown,
}

// ----------------------------------------------------------------------------
// Link Manager
// ----------------------------------------------------------------------------

/// Background task driving one logical link to the server fleet
pub struct LinkManager {
    config: ClientConfig,
    cmd_rx: UnboundedReceiver<Command>,
    event_tx: UnboundedSender<Frame>,
    state_tx: watch::Sender<LinkState>,
    correlator: RequestCorrelator,
    queue: OutboundQueue,
    cursor: usize,
}

impl LinkManager {
    pub fn new(
        config: ClientConfig,
        cmd_rx: UnboundedReceiver<Command>,
        event_tx: UnboundedSender<Frame>,
        state_tx: watch::Sender<LinkState>,
    ) -> Self {
        let correlator = RequestCorrelator::new(config.request_timeout);
        Self {
            config,
            cmd_rx,
            event_tx,
            state_tx,
            correlator,
            queue: OutboundQueue::new(),
            cursor: 0,
        }
    }

    pub async fn run(mut self) {
        let mut first_attempt = true;
        loop {
            if !first_attempt && self.wait_backoff().await {
                break;
            }
            first_attempt = false;

            let endpoint = self.next_endpoint();
            self.set_state(LinkState::Connecting);
            debug!(%endpoint, "connecting");

            let dial = tokio_tungstenite::connect_async(&endpoint);
            match tokio::time::timeout(self.config.connect_timeout, dial).await {
                Ok(Ok((ws, _))) => {
                    info!(%endpoint, "connected");
                    if let Flow::Shutdown = self.drive(ws).await {
                        break;
                    }
                }
                Ok(Err(e)) => {
                    warn!(%endpoint, error = %e, "connect failed");
                }
                Err(_) => {
                    warn!(%endpoint, "connect timed out");
                }
            }
            self.set_state(LinkState::Disconnected);
        }
        self.set_state(LinkState::Disconnected);
    }

    fn set_state(&self, state: LinkState) {
        let _ = self.state_tx.send(state);
    }

    /// Round-robin endpoint selection; advances on every attempt
    fn next_endpoint(&mut self) -> String {
        let endpoint = self.config.endpoints[self.cursor % self.config.endpoints.len()].clone();
        self.cursor = self.cursor.wrapping_add(1);
        endpoint
    }

    /// Sleep out the fixed backoff while still accepting commands.
    /// Returns true on shutdown.
    async fn wait_backoff(&mut self) -> bool {
        let sleep = tokio::time::sleep(self.config.backoff);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Request(pending)) => self.queue.push(pending),
                    Some(Command::Shutdown) | None => return true,
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Connected phase
    // ------------------------------------------------------------------

    async fn drive(&mut self, mut ws: WsStream) -> Flow {
        self.set_state(LinkState::AwaitingHandshake);
        let handshake = handshake(&mut ws);
        let session = match tokio::time::timeout(self.config.handshake_timeout, handshake).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                warn!(error = %e, "handshake failed");
                let _ = ws.close(None).await;
                return Flow::Reconnect;
            }
            Err(_) => {
                warn!("handshake timed out");
                let _ = ws.close(None).await;
                return Flow::Reconnect;
            }
        };
        self.set_state(LinkState::Ready);
        info!("link ready");

        // Replay everything queued during the outage, oldest first.
        while let Some(pending) = self.queue.pop() {
            if let Err(returned) = self.transmit(&mut ws, &session, pending).await {
                self.queue.requeue_front(returned);
                return Flow::Reconnect;
            }
        }

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Request(pending)) => {
                        if let Err(returned) = self.transmit(&mut ws, &session, pending).await {
                            self.queue.requeue_front(returned);
                            return Flow::Reconnect;
                        }
                    }
                    Some(Command::Shutdown) | None => {
                        let _ = ws.close(None).await;
                        return Flow::Shutdown;
                    }
                },
                msg = ws.next() => match msg {
                    Some(Ok(Message::Binary(data))) => self.handle_inbound(&session, &data),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "server closed the connection");
                        return Flow::Reconnect;
                    }
                    Some(Ok(other)) => {
                        debug!(?other, "ignoring unexpected frame type");
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "read failed");
                        return Flow::Reconnect;
                    }
                    None => return Flow::Reconnect,
                }
            }
        }
    }

    /// Transmit one request, arming its reply timeout only on success.
    ///
    /// Registration happens after the send but before this task returns to
    /// the read loop, so a reply cannot race the waiter.
    async fn transmit(
        &mut self,
        ws: &mut WsStream,
        session: &SessionCrypto,
        mut pending: PendingRequest,
    ) -> core::result::Result<(), PendingRequest> {
        let wire = match session.encrypt_frame(&pending.frame) {
            Ok(wire) => wire,
            Err(e) => {
                // Dropping the responder resolves the caller with Closed.
                warn!(error = %e, "dropping unencodable request");
                return Ok(());
            }
        };

        if let Err(e) = ws.send(Message::Binary(wire)).await {
            warn!(error = %e, "transmit failed; request stays queued");
            return Err(pending);
        }

        if let Some(responder) = pending.responder.take() {
            if let Some(id) = pending.frame.correlation_id.clone() {
                let rx = self.correlator.register(&CorrelationId::from(id));
                let _ = responder.send(rx);
            }
        }
        Ok(())
    }

    fn handle_inbound(&self, session: &SessionCrypto, data: &[u8]) {
        let frame = match session.decrypt_frame(data) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "dropping undecodable frame");
                return;
            }
        };
        if frame.is_malformed() {
            debug!("dropping malformed frame");
            return;
        }
        // Correlated replies resolve their waiter; everything else, including
        // late replies whose waiter already timed out, flows to the event
        // stream.
        if frame.correlation_id.is_some() && self.correlator.resolve(frame.clone()) {
            return;
        }
        let _ = self.event_tx.send(frame);
    }
}

// ----------------------------------------------------------------------------
// Client Handshake
// ----------------------------------------------------------------------------

/// Client side of the key-exchange handshake
async fn handshake(ws: &mut WsStream) -> Result<SessionCrypto> {
    let mut session = SessionCrypto::new()?;

    ws.send(Message::Text(session.local_key_exchange().to_json()))
        .await?;

    let text = match next_data(ws).await? {
        Message::Text(text) => text,
        other => {
            return Err(
                WavelinkError::handshake(format!("expected key_exchange, got {other:?}")).into(),
            )
        }
    };
    let HandshakeMessage::KeyExchange { key } = HandshakeMessage::from_json(&text)?;
    session.learn_remote_key(&key)?;
    session.await_session_key()?;

    let sealed = match next_data(ws).await? {
        Message::Binary(blob) => blob,
        other => {
            return Err(WavelinkError::handshake(format!(
                "expected sealed session key, got {other:?}"
            ))
            .into())
        }
    };
    let ack = session.accept_session_key(&sealed)?;
    ws.send(Message::Binary(ack)).await?;

    Ok(session)
}

async fn next_data(ws: &mut WsStream) -> Result<Message> {
    loop {
        let msg = ws
            .next()
            .await
            .ok_or_else(|| WavelinkError::handshake("connection closed mid-handshake"))??;
        match msg {
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => {
                return Err(WavelinkError::handshake("connection closed mid-handshake").into())
            }
            other => return Ok(other),
        }
    }
}
