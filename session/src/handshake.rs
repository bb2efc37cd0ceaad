//! Version handshake helpers.
//!
//! The handshake is complete once we have both received the peer's `version`
//! (and answered with `verack`) and received the peer's `verack` for ours.
//! The two can arrive in either order.

use crate::configuration::SessionConfiguration;
use bitcoin::p2p::address::Address;
use bitcoin::p2p::message::NetworkMessage;
use bitcoin::p2p::message_network::VersionMessage;
use bitcoin::p2p::ServiceFlags;
use log::debug;
use std::net::SocketAddr;
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix timestamp in seconds, zero if the clock is before the epoch.
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

/// Generates a nonce for connection loop detection.
///
/// *Not* cryptographically secure, it only has to differ between our own
/// concurrent sessions.
pub fn generate_nonce() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or_default();

    now ^ (process::id() as u64).rotate_left(32)
}

/// Tracks handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Sent version message, but haven't received anything yet.
    VersionSent,
    /// Received the peer's version message (and sent verack), but no verack response yet.
    VersionReceived,
    /// Received a verack, but no version message yet.
    VerackReceived,
    /// Both version and verack received.
    Complete,
}

impl HandshakeState {
    /// Whether a version message arriving now is the first one.
    pub fn awaits_version(self) -> bool {
        matches!(
            self,
            HandshakeState::VersionSent | HandshakeState::VerackReceived
        )
    }

    /// Transition on a received version message.
    pub fn on_version(self) -> Self {
        match self {
            HandshakeState::VersionSent => HandshakeState::VersionReceived,
            HandshakeState::VerackReceived => HandshakeState::Complete,
            _ => {
                debug!("Received duplicate version message in state {self:?}, ignoring");
                self
            }
        }
    }

    /// Transition on a received verack message.
    pub fn on_verack(self) -> Self {
        match self {
            HandshakeState::VersionSent => HandshakeState::VerackReceived,
            HandshakeState::VersionReceived => HandshakeState::Complete,
            _ => {
                debug!("Received duplicate verack message in state {self:?}, ignoring");
                self
            }
        }
    }
}

/// Builds our version message for a session with `receiver`.
pub fn version_message(
    configuration: &SessionConfiguration,
    receiver: SocketAddr,
    nonce: u64,
) -> NetworkMessage {
    NetworkMessage::Version(VersionMessage {
        version: configuration.protocol_version,
        services: configuration.services,
        timestamp: unix_timestamp(),
        receiver: Address::new(&receiver, ServiceFlags::NONE),
        sender: Address::new(&configuration.sender, configuration.services),
        nonce,
        user_agent: configuration.user_agent.to_string(),
        start_height: configuration.start_height,
        relay: configuration.relay,
    })
}
