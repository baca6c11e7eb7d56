//! Lobbyist Network Library
//!
//! Persistent client for the SpringRTS lobby protocol.
//!
//! # Architecture
//!
//! - **Client**: stable handle; survives reconnects by forwarding to the
//!   current connection
//! - **Connection**: one transport binding with its queue, heartbeat and
//!   registration state
//! - **EventBus**: named events delivered synchronously to subscribers
//! - **Protocol**: newline-terminated `[:source] VERB params... [:trailing]`
//!
//! # Usage
//!
//! ```ignore
//! let bus = EventBus::new();
//! let options = ClientOptions::new(Target::new("lobby.springrts.com", 8200))
//!     .with_credentials(Credentials::new("bigbot", "password"))
//!     .with_channels(["main"]);
//! let client = Client::connect(options, Arc::new(TcpConnector), bus).await?;
//!
//! client.on(events::SAID, |event| {
//!     tracing::info!(text = ?event.text("text"), "said");
//!     Ok(())
//! });
//! ```

pub mod bus;
pub mod client;
pub mod commands;
pub mod connection;
pub mod error;
pub mod events;
mod frame;
mod handlers;
pub mod heartbeat;
pub mod protocol;
pub mod queue;
pub mod transport;

pub use bus::{Event, EventBus, HandlerError, HandlerResult, SubscriptionId, Value};
pub use client::{Client, ClientOptions, Timing};
pub use connection::{Connection, ConnectionState};
pub use error::{Error, Result};
pub use protocol::{Message, ParseError};
pub use transport::{BoxedTransport, Connector, Target, TcpConnector, TlsMode};
