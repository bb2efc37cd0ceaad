//! Session configuration shared by every outbound session of a crawler.

use crate::user_agent::UserAgent;
use bitcoin::p2p::{Magic, ServiceFlags};
use bitcoin::Network;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Minimum protocol version that supports AddrV2 messages (BIP155).
pub const ADDRV2_MIN_PROTOCOL_VERSION: u32 = 70016;
/// Protocol version advertised unless configured otherwise.
pub const DEFAULT_PROTOCOL_VERSION: u32 = 70016;

/// Sender address used in version messages.
///
/// Signals to peers that we are not accepting incoming connections
/// and should not be advertised to other nodes.
pub const NON_LISTENING_ADDRESS: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));

/// Default p2p port of a bitcoin network.
pub fn default_port(network: Network) -> u16 {
    match network {
        Network::Bitcoin => 8333,
        Network::Testnet => 18333,
        Network::Signet => 38333,
        Network::Regtest => 18444,
        _ => 8333,
    }
}

/// Configuration used to build a session.
#[derive(Debug, Clone)]
pub struct SessionConfiguration {
    /// Network the session speaks, determines the message magic.
    pub network: Network,
    /// Protocol version advertised in the version message.
    pub protocol_version: u32,
    /// User agent advertised in the version message.
    pub user_agent: UserAgent,
    /// Service flags advertised by this node.
    pub services: ServiceFlags,
    /// Address advertised as the sender in version messages.
    pub sender: SocketAddr,
    /// Block height advertised in version messages.
    pub start_height: i32,
    /// Whether the peer should relay transactions to us.
    pub relay: bool,
    /// Whether to signal AddrV2 support (BIP155) during the handshake.
    pub enable_addrv2: bool,
}

impl SessionConfiguration {
    /// Creates a configuration for a non-listening node.
    ///
    /// Advertises no services, a non-listening address, and disables transaction
    /// relay. This is all a crawler needs to query peers for addresses.
    pub fn non_listening(network: Network, protocol_version: u32, user_agent: UserAgent) -> Self {
        Self {
            network,
            protocol_version,
            user_agent,
            services: ServiceFlags::NONE,
            sender: NON_LISTENING_ADDRESS,
            start_height: 0,
            relay: false,
            enable_addrv2: true,
        }
    }

    /// Message magic of the configured network.
    pub fn magic(&self) -> Magic {
        self.network.magic()
    }
}

impl fmt::Display for SessionConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SessionConfiguration {{ network: {}, protocol: {}, user_agent: \"{}\", services: {}, relay: {}, addrv2: {} }}",
            self.network,
            self.protocol_version,
            self.user_agent,
            self.services,
            self.relay,
            self.enable_addrv2
        )
    }
}
