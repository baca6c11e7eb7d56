//! Network error types

use std::io;

/// Network result type
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Not connected")]
    NotConnected,

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Invalid server name: {0}")]
    InvalidServerName(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid timing: {0}")]
    InvalidTiming(&'static str),
}

impl Error {
    /// Whether a dial failing with this error should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Io(_) | Error::ConnectionClosed | Error::Tls(_) => true,
            Error::NotConnected
            | Error::InvalidServerName(_)
            | Error::Protocol(_)
            | Error::InvalidTiming(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refused_dial_is_transient() {
        let err = Error::from(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(err.is_transient());
    }

    #[test]
    fn test_bad_server_name_is_fatal() {
        assert!(!Error::InvalidServerName("not a host".into()).is_transient());
    }
}
