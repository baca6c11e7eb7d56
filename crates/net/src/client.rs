//! Stable client handle and reconnect supervisor
//!
//! [`Client`] is what callers hold. It forwards every operation to the
//! *current* [`Connection`], which the supervisor swaps out after a loss.
//! Subscriptions live on the [`EventBus`] keyed by event name, so they keep
//! firing across reconnects without being re-registered.
//!
//! Credentials and the auto-join channel list are stored on the handle rather
//! than on a connection; every new connection logs in again and rejoins on
//! acceptance.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use lobbyist_core::{Credentials, LobbyConfig, TimingSection};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{Event, EventBus, HandlerResult, SubscriptionId};
use crate::commands;
use crate::connection::{Connection, ConnectionState};
use crate::error::{Error, Result};
use crate::events;
use crate::handlers;
use crate::transport::{BoxedTransport, Connector, Target, TlsMode};

/// Timer settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Interval between outgoing queue flushes
    pub flush_interval: Duration,
    /// Interval between heartbeat pings
    pub heartbeat_interval: Duration,
    /// Silence after which the connection is considered dead
    pub heartbeat_timeout: Duration,
    /// Pause before every dial retry
    pub reconnect_delay: Duration,
    /// Deadline for the server to accept or deny a new connection
    pub registration_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self::from(&TimingSection::default())
    }
}

impl From<&TimingSection> for Timing {
    fn from(section: &TimingSection) -> Self {
        Self {
            flush_interval: Duration::from_millis(section.flush_interval_ms),
            heartbeat_interval: Duration::from_secs(section.heartbeat_interval_secs),
            heartbeat_timeout: Duration::from_secs(section.heartbeat_timeout_secs),
            reconnect_delay: Duration::from_secs(section.reconnect_delay_secs),
            registration_timeout: Duration::from_secs(section.registration_timeout_secs),
        }
    }
}

impl Timing {
    /// Reject settings the timers cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.flush_interval.is_zero() {
            return Err(Error::InvalidTiming("flush interval must be non-zero"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(Error::InvalidTiming("heartbeat interval must be non-zero"));
        }
        if self.heartbeat_timeout.is_zero() {
            return Err(Error::InvalidTiming("heartbeat timeout must be non-zero"));
        }
        if self.registration_timeout.is_zero() {
            return Err(Error::InvalidTiming("registration timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Everything needed to establish and re-establish a client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub target: Target,
    /// Client name reported in LOGIN
    pub client_name: String,
    pub cpu: u32,
    /// Compatibility flags reported in LOGIN
    pub flags: String,
    /// Sent as LOGIN on every establishment when present
    pub credentials: Option<Credentials>,
    /// Joined on every accepted login
    pub channels: Vec<String>,
    pub timing: Timing,
}

impl ClientOptions {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            client_name: "lobbyist".to_string(),
            cpu: 3200,
            flags: String::new(),
            credentials: None,
            channels: Vec::new(),
            timing: Timing::default(),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }
}

impl From<&LobbyConfig> for ClientOptions {
    fn from(config: &LobbyConfig) -> Self {
        let tls = match (config.lobby.ssl, config.lobby.ssl_verify) {
            (false, _) => TlsMode::Disabled,
            (true, true) => TlsMode::Verified,
            (true, false) => TlsMode::Insecure,
        };

        Self {
            target: Target::new(config.lobby.host.clone(), config.lobby.port).with_tls(tls),
            client_name: config.client.name.clone(),
            cpu: config.client.cpu,
            flags: config.lobby.flags.clone(),
            credentials: config.credentials(),
            channels: config.lobby.channels.clone(),
            timing: Timing::from(&config.timing),
        }
    }
}

pub(crate) struct ClientInner {
    target: Target,
    client_name: String,
    cpu: u32,
    flags: String,
    credentials: RwLock<Option<Credentials>>,
    channels: RwLock<Vec<String>>,
    current: RwLock<Arc<Connection>>,
    bus: EventBus,
    shutdown: CancellationToken,
}

impl ClientInner {
    fn current(&self) -> Arc<Connection> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Caller-facing handle that survives reconnects
///
/// Cloning is cheap; all clones share the same current connection. When the
/// last clone is dropped the client shuts down.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Dial the server and return a handle once the transport is up
    ///
    /// Refused or dropped dials are retried every `reconnect_delay` for as
    /// long as it takes. Only errors that retrying cannot fix, such as an
    /// invalid TLS server name or zero timer settings, are returned.
    pub async fn connect(
        options: ClientOptions,
        connector: Arc<dyn Connector>,
        bus: EventBus,
    ) -> Result<Self> {
        options.timing.validate()?;
        handlers::install(&bus);

        info!(server = %options.target, tls = ?options.target.tls, "Connecting to lobby server");
        let transport = dial_until_connected(connector.as_ref(), &options.target, options.timing.reconnect_delay).await?;

        let shutdown = CancellationToken::new();
        let timing = options.timing;
        let inner = Arc::new_cyclic(|weak: &Weak<ClientInner>| {
            let conn = Connection::new(
                options.target.clone(),
                timing,
                bus.clone(),
                weak.clone(),
                shutdown.child_token(),
            );
            ClientInner {
                target: options.target.clone(),
                client_name: options.client_name,
                cpu: options.cpu,
                flags: options.flags,
                credentials: RwLock::new(options.credentials),
                channels: RwLock::new(options.channels),
                current: RwLock::new(conn),
                bus: bus.clone(),
                shutdown: shutdown.clone(),
            }
        });

        let client = Client { inner };
        let conn = client.connection();
        conn.start(transport);
        bus.publish(&conn.event(events::NETID_AVAILABLE));

        tokio::spawn(supervise(
            Arc::downgrade(&client.inner),
            connector,
            options.target,
            timing,
            shutdown,
        ));

        Ok(client)
    }

    pub(crate) fn from_inner(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }

    /// The connection operations are currently forwarded to
    pub fn connection(&self) -> Arc<Connection> {
        self.inner.current()
    }

    pub fn netid(&self) -> String {
        self.connection().netid().to_string()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection().state()
    }

    pub fn lag(&self) -> Option<Duration> {
        self.connection().lag()
    }

    pub fn target(&self) -> &Target {
        &self.inner.target
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Whether two handles refer to the same client
    pub fn same_client(&self, other: &Client) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Subscribe to an event on this client's bus
    pub fn on<F>(&self, event: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(event, callback)
    }

    /// Queue a raw line on the current connection
    pub fn writeln(&self, line: impl Into<String>) -> Result<()> {
        self.connection().writeln(line)
    }

    /// Store credentials and send LOGIN on the current connection
    ///
    /// The credentials are kept for every later reconnect.
    pub fn login(&self, username: &str, password: &str) -> Result<()> {
        *self.inner.credentials.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Credentials::new(username, password));
        self.send_login(&self.connection())
    }

    /// Create an account. The credentials are also kept for later logins.
    pub fn register(&self, username: &str, password: &str, email: Option<&str>) -> Result<()> {
        let mut credentials = Credentials::new(username, password);
        if let Some(email) = email {
            credentials = credentials.with_email(email);
        }

        let conn = self.connection();
        conn.writeln(commands::register(
            &credentials.username,
            &credentials.password_hash,
            credentials.email.as_deref(),
        ))?;
        conn.set_state(ConnectionState::Registering);
        conn.set_nickname(credentials.username.clone());
        *self.inner.credentials.write().unwrap_or_else(PoisonError::into_inner) = Some(credentials);

        info!(netid = %conn.netid(), "Sent registration information");
        self.inner.bus.publish(&conn.event(events::REGISTRATION_SENT));
        Ok(())
    }

    pub fn confirm_agreement(&self) -> Result<()> {
        self.writeln(commands::confirm_agreement())
    }

    /// Join a channel now if logged in, and on every later acceptance
    pub fn join(&self, channel: &str) -> Result<()> {
        {
            let mut channels = self.inner.channels.write().unwrap_or_else(PoisonError::into_inner);
            if !channels.iter().any(|c| c == channel) {
                channels.push(channel.to_string());
            }
        }

        let conn = self.connection();
        if conn.state() == ConnectionState::Accepted {
            conn.writeln(commands::join(channel))?;
        }
        Ok(())
    }

    /// Leave a channel and stop rejoining it
    pub fn leave(&self, channel: &str) -> Result<()> {
        self.inner
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|c| c != channel);
        self.writeln(commands::leave(channel))
    }

    /// Channels joined on acceptance
    pub fn channels(&self) -> Vec<String> {
        self.inner.channels.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn say(&self, channel: &str, text: &str) -> Result<()> {
        self.connection().write_lines(commands::say(channel, text))
    }

    pub fn say_ex(&self, channel: &str, text: &str) -> Result<()> {
        self.connection().write_lines(commands::say_ex(channel, text))
    }

    pub fn say_private(&self, username: &str, text: &str) -> Result<()> {
        self.connection().write_lines(commands::say_private(username, text))
    }

    pub fn say_private_ex(&self, username: &str, text: &str) -> Result<()> {
        self.connection().write_lines(commands::say_private_ex(username, text))
    }

    pub fn bridge_client_from(&self, location: &str, external_id: &str, external_username: &str) -> Result<()> {
        self.writeln(commands::bridge_client_from(location, external_id, external_username))
    }

    pub fn unbridge_client_from(&self, location: &str, external_id: &str) -> Result<()> {
        self.writeln(commands::unbridge_client_from(location, external_id))
    }

    pub fn join_from(&self, channel: &str, location: &str, external_id: &str) -> Result<()> {
        self.writeln(commands::join_from(channel, location, external_id))
    }

    pub fn leave_from(&self, channel: &str, location: &str, external_id: &str) -> Result<()> {
        self.writeln(commands::leave_from(channel, location, external_id))
    }

    pub fn say_from(&self, user: &str, domain: &str, channel: &str, text: &str) -> Result<()> {
        self.connection().write_lines(commands::say_from(channel, domain, user, text))
    }

    pub fn ping(&self) -> Result<()> {
        self.writeln(commands::ping())
    }

    /// Stop reconnecting and close the current connection
    pub fn shutdown(&self) {
        info!(server = %self.inner.target, "Shutting down client");
        self.inner.shutdown.cancel();
        self.connection().close();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Send LOGIN with the stored credentials, if any
    pub(crate) fn send_login(&self, conn: &Arc<Connection>) -> Result<()> {
        let credentials = self
            .inner
            .credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(credentials) = credentials else {
            debug!(netid = %conn.netid(), "No credentials, skipping login");
            return Ok(());
        };

        conn.writeln(commands::login(
            &credentials.username,
            &credentials.password_hash,
            self.inner.cpu,
            &self.inner.client_name,
            &self.inner.flags,
        ))?;
        conn.set_state(ConnectionState::Registering);
        conn.set_nickname(credentials.username);

        info!(netid = %conn.netid(), "Login initiated");
        self.inner.bus.publish(&conn.event(events::LOGIN_INITIATED));
        Ok(())
    }

    /// Queue JOIN for every auto-join channel
    pub(crate) fn rejoin(&self, conn: &Connection) -> Result<()> {
        conn.write_lines(self.channels().iter().map(|c| commands::join(c)))
    }
}

impl PartialEq for Client {
    fn eq(&self, other: &Self) -> bool {
        self.same_client(other)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("target", &self.inner.target)
            .field("connection", &self.connection())
            .finish()
    }
}

async fn dial_until_connected(
    connector: &dyn Connector,
    target: &Target,
    delay: Duration,
) -> Result<BoxedTransport> {
    loop {
        match connector.connect(target).await {
            Ok(transport) => return Ok(transport),
            Err(e) if e.is_transient() => {
                warn!(server = %target, error = %e, retry_in = ?delay, "Host down, retrying");
                time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Watch the current connection and replace it whenever it is lost
///
/// Holds only a weak reference to the client between attempts, so dropping
/// every handle ends the loop.
async fn supervise(
    client: Weak<ClientInner>,
    connector: Arc<dyn Connector>,
    target: Target,
    timing: Timing,
    shutdown: CancellationToken,
) {
    loop {
        let Some(conn) = client.upgrade().map(|inner| inner.current()) else {
            return;
        };

        tokio::select! {
            () = shutdown.cancelled() => return,
            () = conn.closed() => {}
        }
        drop(conn);
        if shutdown.is_cancelled() {
            return;
        }

        info!(server = %target, delay = ?timing.reconnect_delay, "Reconnecting");
        let transport = loop {
            tokio::select! {
                () = shutdown.cancelled() => return,
                () = time::sleep(timing.reconnect_delay) => {}
            }

            let attempt = tokio::select! {
                () = shutdown.cancelled() => return,
                attempt = connector.connect(&target) => attempt,
            };
            match attempt {
                Ok(transport) => break transport,
                Err(e) => {
                    warn!(server = %target, error = %e, retry_in = ?timing.reconnect_delay, "Host down, retrying");
                }
            }
        };

        let Some(inner) = client.upgrade() else {
            return;
        };
        let conn = Connection::new(
            target.clone(),
            timing,
            inner.bus.clone(),
            client.clone(),
            shutdown.child_token(),
        );
        *inner.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&conn);
        let bus = inner.bus.clone();
        drop(inner);

        conn.start(transport);
        bus.publish(&conn.event(events::NETID_AVAILABLE));
        info!(netid = %conn.netid(), "Reconnected");
        bus.publish(&conn.event(events::RECONNECTED));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TcpConnector;

    #[test]
    fn test_default_timing() {
        let timing = Timing::default();
        assert_eq!(timing.flush_interval, Duration::from_secs(1));
        assert_eq!(timing.heartbeat_interval, Duration::from_secs(29));
        assert_eq!(timing.heartbeat_timeout, Duration::from_secs(90));
        assert_eq!(timing.reconnect_delay, Duration::from_secs(10));
        assert_eq!(timing.registration_timeout, Duration::from_secs(90));
        assert!(timing.validate().is_ok());
    }

    #[test]
    fn test_zero_intervals_rejected() {
        let zero_flush = Timing {
            flush_interval: Duration::ZERO,
            ..Timing::default()
        };
        assert!(matches!(zero_flush.validate(), Err(Error::InvalidTiming(_))));

        let zero_heartbeat = Timing {
            heartbeat_interval: Duration::ZERO,
            ..Timing::default()
        };
        assert!(matches!(zero_heartbeat.validate(), Err(Error::InvalidTiming(_))));
    }

    #[tokio::test]
    async fn test_connect_refuses_zero_interval_before_dialing() {
        let options = ClientOptions::new(Target::new("127.0.0.1", 1)).with_timing(Timing {
            flush_interval: Duration::ZERO,
            ..Timing::default()
        });
        let err = Client::connect(options, Arc::new(TcpConnector), EventBus::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTiming(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_options_from_config() {
        let config = LobbyConfig::from_toml(
            r#"
[lobby]
host = "lobby.example.org"
user = "bigbot"
pass = "password"
channels = ["main"]
flags = "sp u"
ssl = true
ssl_verify = false

[client]
name = "bridge"
cpu = 1000

[timing]
reconnect_delay_secs = 3
"#,
        )
        .unwrap();

        let options = ClientOptions::from(&config);
        assert_eq!(options.target.host, "lobby.example.org");
        assert_eq!(options.target.port, 8200);
        assert_eq!(options.target.tls, TlsMode::Insecure);
        assert_eq!(options.client_name, "bridge");
        assert_eq!(options.cpu, 1000);
        assert_eq!(options.flags, "sp u");
        assert_eq!(options.channels, vec!["main"]);
        assert_eq!(options.timing.reconnect_delay, Duration::from_secs(3));

        let credentials = options.credentials.unwrap();
        assert_eq!(credentials.username, "bigbot");
        assert_eq!(credentials.password_hash, "X03MO1qnZdYdgyfeuILPmQ==");
    }

    #[test]
    fn test_plain_target_when_ssl_off() {
        let config = LobbyConfig::from_toml("[lobby]\nhost = \"localhost\"\nssl_verify = false\n").unwrap();
        assert_eq!(ClientOptions::from(&config).target.tls, TlsMode::Disabled);
    }
}
