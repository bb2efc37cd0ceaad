//! Error types for session handling.

use crate::transport::TransportError;
use std::error::Error;
use std::fmt;
use std::io;

/// Errors that can occur while driving a peer session.
#[derive(Debug)]
pub enum SessionError {
    /// An I/O error occurred during network operations.
    Io(io::Error),
    /// The transport layer failed to frame or decode a message.
    Transport(TransportError),
    /// Remote address can not be dialed (unspecified or multicast).
    UnsupportedAddress,
    /// Operation requires a connected session.
    NotConnected,
    /// Session was already disconnected and can not be reused.
    Closed,
    /// Detected a connection loop (the peer echoed our own nonce).
    ConnectionLoop,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Io(err) => write!(f, "Session error: {err}"),
            SessionError::Transport(err) => write!(f, "Transport failed in peer session: {err}"),
            SessionError::UnsupportedAddress => write!(f, "Unsupported peer address"),
            SessionError::NotConnected => write!(f, "Session is not connected"),
            SessionError::Closed => write!(f, "Session was already disconnected"),
            SessionError::ConnectionLoop => {
                write!(f, "Detected connection to self (matching nonce)")
            }
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SessionError::Io(err) => Some(err),
            SessionError::Transport(err) => Some(err),
            SessionError::UnsupportedAddress
            | SessionError::NotConnected
            | SessionError::Closed
            | SessionError::ConnectionLoop => None,
        }
    }
}

impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        SessionError::Io(err)
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        SessionError::Transport(err)
    }
}
