//! One live transport binding
//!
//! A [`Connection`] owns the per-establishment state: registration state,
//! outgoing queue, liveness probe, server capabilities and nickname. Its
//! reader task frames inbound bytes into lines and publishes each as a `raw`
//! event. A separate writer task drains the outgoing queue on a fixed
//! interval, so a peer that stops reading never stalls inbound dispatch.
//!
//! The server has to accept or deny the login within the registration
//! timeout; otherwise the connection is dropped like any other failure.
//!
//! A connection is never reused. When the transport fails the connection is
//! marked closed, its timers are cancelled and `connection-lost` is published
//! once; the client's supervisor then dials a replacement.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{Event, EventBus};
use crate::client::{Client, ClientInner, Timing};
use crate::error::{Error, Result};
use crate::events;
use crate::frame::LineFramer;
use crate::heartbeat::{run_heartbeat, HeartbeatResult, Liveness};
use crate::queue::OutgoingQueue;
use crate::transport::{BoxedTransport, Target};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    /// Transport up, not logged in
    Established,
    /// LOGIN or REGISTER sent, waiting for the server's answer
    Registering,
    Accepted,
    /// Login refused; the transport stays open
    Denied,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Established => "established",
            ConnectionState::Registering => "registering",
            ConnectionState::Accepted => "accepted",
            ConnectionState::Denied => "denied",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A single establishment of a transport to the lobby server
pub struct Connection {
    netid: String,
    target: Target,
    timing: Timing,
    bus: EventBus,
    client: Weak<ClientInner>,
    state: RwLock<ConnectionState>,
    queue: OutgoingQueue,
    liveness: Liveness,
    capabilities: RwLock<HashMap<String, Option<String>>>,
    nickname: RwLock<Option<String>>,
    old_nickname: RwLock<Option<String>>,
    established_at: DateTime<Utc>,
    cancel: CancellationToken,
    heartbeat_started: AtomicBool,
    finished: AtomicBool,
}

impl Connection {
    /// Create a connection for a freshly dialed transport
    ///
    /// `cancel` is usually a child of the owning client's shutdown token.
    pub(crate) fn new(
        target: Target,
        timing: Timing,
        bus: EventBus,
        client: Weak<ClientInner>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let netid = format!(
            "{}:{}:{}{}",
            Uuid::new_v4(),
            target.host,
            target.port,
            if target.tls.is_enabled() { "+" } else { "-" }
        );

        Arc::new(Self {
            netid,
            target,
            timing,
            bus,
            client,
            state: RwLock::new(ConnectionState::Connecting),
            queue: OutgoingQueue::new(),
            liveness: Liveness::new(),
            capabilities: RwLock::new(HashMap::new()),
            nickname: RwLock::new(None),
            old_nickname: RwLock::new(None),
            established_at: Utc::now(),
            cancel,
            heartbeat_started: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        })
    }

    /// Identity token, unique per establishment: `<uuid>:<host>:<port><+|->`
    pub fn netid(&self) -> &str {
        &self.netid
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *current != ConnectionState::Closed && *current != state {
            debug!(netid = %self.netid, from = %*current, to = %state, "State change");
            *current = state;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Stable handle of the owning client, while it is alive
    pub fn client(&self) -> Option<Client> {
        self.client.upgrade().map(Client::from_inner)
    }

    /// Queue a line for the next flush
    pub fn writeln(&self, line: impl Into<String>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::NotConnected);
        }
        self.queue.push(line);
        Ok(())
    }

    /// Queue several lines in order
    pub fn write_lines<I>(&self, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = String>,
    {
        if self.is_closed() {
            return Err(Error::NotConnected);
        }
        for line in lines {
            self.queue.push(line);
        }
        Ok(())
    }

    /// Lines waiting for the next flush
    pub fn pending(&self) -> Vec<String> {
        self.queue.pending()
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    /// Last measured ping round trip
    pub fn lag(&self) -> Option<Duration> {
        self.liveness.lag()
    }

    /// Advertised capability; `Some(None)` for a bare feature token
    pub fn capability(&self, name: &str) -> Option<Option<String>> {
        self.capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn capabilities(&self) -> HashMap<String, Option<String>> {
        self.capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_capability(&self, name: impl Into<String>, value: Option<String>) {
        self.capabilities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value);
    }

    pub fn nickname(&self) -> Option<String> {
        self.nickname.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn old_nickname(&self) -> Option<String> {
        self.old_nickname.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn set_nickname(&self, nick: impl Into<String>) {
        let mut current = self.nickname.write().unwrap_or_else(PoisonError::into_inner);
        let previous = current.replace(nick.into());
        *self.old_nickname.write().unwrap_or_else(PoisonError::into_inner) = previous;
    }

    /// New event bound to this connection and its client
    pub(crate) fn event(self: &Arc<Self>, name: &str) -> Event {
        Event::new(name)
            .with_connection(Arc::clone(self))
            .with_client(self.client())
    }

    /// Resolves once the connection is closed, lost or shut down
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    /// Mark the transport up, publish `connected` and start the I/O tasks
    pub(crate) fn start(self: &Arc<Self>, transport: BoxedTransport) {
        self.set_state(ConnectionState::Established);
        info!(netid = %self.netid, server = %self.target, "Connection established");

        let (reader, writer) = tokio::io::split(transport);
        tokio::spawn(run_writer(Arc::clone(self), writer));
        tokio::spawn(run_reader(Arc::clone(self), reader));
        tokio::spawn(registration_deadline(Arc::clone(self)));

        self.bus.publish(&self.event(events::CONNECTED));
    }

    /// Whether the server has answered the login, either way
    pub fn is_registered(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Accepted | ConnectionState::Denied
        )
    }

    /// Start the ping timer; later calls are ignored
    pub(crate) fn start_heartbeat(self: &Arc<Self>) {
        if self.heartbeat_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let conn = Arc::clone(self);
        tokio::spawn(async move {
            let result = run_heartbeat(
                &conn.liveness,
                &conn.queue,
                conn.timing.heartbeat_interval,
                conn.timing.heartbeat_timeout,
                conn.cancel.clone(),
            )
            .await;

            if result == HeartbeatResult::TimedOut {
                conn.lose("heartbeat timeout");
            }
        });
    }

    /// Tear down after a transport failure and publish `connection-lost`
    ///
    /// Only the first call has any effect. Lines still queued are dropped.
    pub(crate) fn lose(self: &Arc<Self>, reason: &str) {
        if !self.finish() {
            return;
        }
        let dropped = self.queue.take();
        warn!(
            netid = %self.netid,
            reason = %reason,
            dropped = dropped.len(),
            "Connection lost"
        );
        self.bus
            .publish(&self.event(events::CONNECTION_LOST).with("reason", reason));
    }

    /// Close without publishing `connection-lost`
    pub fn close(&self) {
        if self.finish() {
            info!(netid = %self.netid, "Connection closed");
        }
    }

    /// Mark closed and cancel timers; false if already finished
    fn finish(&self) -> bool {
        if self.finished.swap(true, Ordering::SeqCst) {
            return false;
        }
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = ConnectionState::Closed;
        self.cancel.cancel();
        true
    }

    fn receive(self: &Arc<Self>, line: String) {
        debug!(netid = %self.netid, line = %line, "RECEIVED");
        self.bus.publish(&self.event(events::RAW).with("text", line));
    }

    async fn flush<W>(self: &Arc<Self>, writer: &mut W) -> std::result::Result<(), String>
    where
        W: AsyncWrite + Unpin,
    {
        match self.queue.flush(writer).await {
            Ok(lines) if lines.is_empty() => Ok(()),
            Ok(lines) => {
                for line in &lines {
                    debug!(netid = %self.netid, line = %line, "SENT");
                }
                self.bus
                    .publish(&self.event(events::LOBBY_SEND).with("lines", lines));
                Ok(())
            }
            Err(e) => {
                warn!(netid = %self.netid, error = %e, "Write failed, batch dropped");
                let reason = e.to_string();
                self.bus.publish(
                    &self
                        .event(events::SEND_FAILED)
                        .with("lines", e.lines)
                        .with("error", reason.clone()),
                );
                Err(reason)
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("netid", &self.netid)
            .field("state", &self.state())
            .field("pending", &self.queue.len())
            .finish()
    }
}

/// Read and dispatch lines until the transport fails or the connection is
/// cancelled
async fn run_reader(conn: Arc<Connection>, reader: ReadHalf<BoxedTransport>) {
    let mut lines = FramedRead::new(reader, LineFramer::new());

    let failure = loop {
        tokio::select! {
            biased;
            () = conn.cancel.cancelled() => break None,
            line = lines.next() => match line {
                Some(Ok(line)) => conn.receive(line),
                Some(Err(e)) => break Some(format!("read error: {e}")),
                None => break Some("closed by peer".to_string()),
            },
        }
    };

    match failure {
        Some(reason) => conn.lose(&reason),
        // Cancelled from outside: shutdown, heartbeat or write failure
        None => conn.close(),
    }
    debug!(netid = %conn.netid, "Reader finished");
}

/// Flush the outgoing queue on every tick until cancelled
///
/// A write blocked on a slow peer is abandoned as soon as the connection is
/// cancelled.
async fn run_writer(conn: Arc<Connection>, mut writer: WriteHalf<BoxedTransport>) {
    let mut flush = time::interval(conn.timing.flush_interval);
    flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = conn.cancel.cancelled() => break,
            _ = flush.tick() => {}
        }

        let result = tokio::select! {
            biased;
            () = conn.cancel.cancelled() => break,
            result = conn.flush(&mut writer) => result,
        };
        if let Err(reason) = result {
            conn.lose(&reason);
            return;
        }
    }

    let _ = writer.shutdown().await;
    debug!(netid = %conn.netid, "Writer finished");
}

/// Drop the connection if the login is still unanswered at the deadline
async fn registration_deadline(conn: Arc<Connection>) {
    tokio::select! {
        () = conn.cancel.cancelled() => {}
        () = time::sleep(conn.timing.registration_timeout) => {
            if !conn.is_registered() {
                conn.lose("registration timeout");
            }
        }
    }
}
