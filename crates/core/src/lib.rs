//! Lobbyist Core Library
//!
//! I/O-free pieces shared by the protocol engine and the binary: user
//! identities, credential encoding, and configuration.

pub mod config;
pub mod credentials;
pub mod error;
pub mod user;

pub use config::{ClientSection, LobbyConfig, LobbySection, TimingSection, DEFAULT_PORT};
pub use credentials::{encode_password, Credentials};
pub use error::{Error, Result};
pub use user::User;
