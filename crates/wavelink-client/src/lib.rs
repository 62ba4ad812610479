//! Wavelink client: reconnecting encrypted session transport
//!
//! A [`Client`] handle multiplexes correlated requests and fire-and-forget
//! sends over one managed connection. The background link manager dials the
//! configured endpoints round-robin, performs the key-exchange handshake and
//! replays queued requests after every reconnect; unsolicited server frames
//! arrive on the [`EventStream`].
//!
//! ```no_run
//! # async fn example() -> wavelink_client::Result<()> {
//! use wavelink_client::{Client, ClientConfig};
//! use wavelink_core::{ReplyOutcome, Value};
//!
//! let (client, mut events) = Client::connect(ClientConfig::new("ws://127.0.0.1:9230/ws"))?;
//! match client.request("social", "posts/load", Some(Value::map([("page", Value::Int(1))]))).await? {
//!     ReplyOutcome::Reply(frame) => println!("{:?}", frame.payload),
//!     ReplyOutcome::TimedOut => println!("no reply in time"),
//! }
//! while let Some(event) = events.next().await {
//!     println!("push: {:?}", event.payload);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod queue;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch};

use wavelink_core::{CorrelationId, Frame, ReplyOutcome, Value};

pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use manager::LinkState;

use manager::{Command, LinkManager};
use queue::PendingRequest;

// ----------------------------------------------------------------------------
// Client Handle
// ----------------------------------------------------------------------------

/// Handle to a managed link; cheap to clone, all clones share the link
#[derive(Clone)]
pub struct Client {
    commands: UnboundedSender<Command>,
    state_rx: watch::Receiver<LinkState>,
}

/// Unsolicited frames pushed by the server
pub struct EventStream {
    rx: UnboundedReceiver<Frame>,
}

impl EventStream {
    /// Next unsolicited frame; `None` once the link manager has shut down
    pub async fn next(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}

impl Client {
    /// Start the link manager and return the client handle and event stream.
    ///
    /// Connection establishment happens in the background; requests made
    /// before the link is ready are queued and replayed in order.
    pub fn connect(config: ClientConfig) -> Result<(Client, EventStream)> {
        if config.endpoints.is_empty() {
            return Err(ClientError::NoEndpoints);
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);

        let manager = LinkManager::new(config, cmd_rx, event_tx, state_tx);
        tokio::spawn(manager.run());

        Ok((
            Client {
                commands: cmd_tx,
                state_rx,
            },
            EventStream { rx: event_rx },
        ))
    }

    /// Issue a correlated request and await its outcome.
    ///
    /// The reply timeout is armed when the frame is actually transmitted;
    /// time spent queued during an outage does not count against it. A
    /// timeout is a soft outcome and leaves the link untouched.
    pub async fn request<C, A>(
        &self,
        category: C,
        action: A,
        payload: Option<Value>,
    ) -> Result<ReplyOutcome>
    where
        C: Into<String>,
        A: Into<String>,
    {
        let id = CorrelationId::generate();
        let mut frame = Frame::action(category, action, payload);
        frame.correlation_id = Some(id.as_str().to_string());

        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Request(PendingRequest {
                frame,
                responder: Some(tx),
            }))
            .map_err(|_| ClientError::Closed)?;

        // First await: the manager hands over the reply receiver at
        // transmit time. Second await: the reply or its soft timeout.
        let reply_rx = rx.await.map_err(|_| ClientError::Closed)?;
        reply_rx.await.map_err(|_| ClientError::Closed)
    }

    /// Send an uncorrelated frame; no reply is awaited
    pub fn notify<C, A>(&self, category: C, action: A, payload: Option<Value>) -> Result<()>
    where
        C: Into<String>,
        A: Into<String>,
    {
        let frame = Frame::action(category, action, payload);
        self.commands
            .send(Command::Request(PendingRequest::fire_and_forget(frame)))
            .map_err(|_| ClientError::Closed)
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        *self.state_rx.borrow()
    }

    /// Wait until the link reports the given state
    pub async fn wait_for_state(&self, state: LinkState) -> Result<()> {
        let mut rx = self.state_rx.clone();
        loop {
            if *rx.borrow_and_update() == state {
                return Ok(());
            }
            rx.changed().await.map_err(|_| ClientError::Closed)?;
        }
    }

    /// Stop the link manager; pending and queued requests resolve as closed
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}
