//! Session construction for the crawler.
//!
//! The [`SessionFactory`] trait lets the crawler create sessions without
//! knowing the transport, so crawl rounds can be driven by scripted sessions
//! in tests.

use peer_seeder_session::{
    OutboundSession, PeerSession, SessionConfiguration, SessionError, SessionListener,
};
use std::net::SocketAddr;

/// Factory for one-shot peer sessions.
///
/// Cloned into every per-candidate task.
pub trait SessionFactory: Clone + Send + Sync + 'static {
    type Session: PeerSession + 'static;

    /// Build an unconnected session against `address` reporting to `listener`.
    fn create(
        &self,
        address: SocketAddr,
        listener: SessionListener,
    ) -> Result<Self::Session, SessionError>;
}

/// Creates TCP sessions sharing one configuration.
#[derive(Debug, Clone)]
pub struct OutboundConnector {
    configuration: SessionConfiguration,
}

impl OutboundConnector {
    pub fn new(configuration: SessionConfiguration) -> Self {
        Self { configuration }
    }

    pub fn configuration(&self) -> &SessionConfiguration {
        &self.configuration
    }
}

impl SessionFactory for OutboundConnector {
    type Session = OutboundSession;

    fn create(
        &self,
        address: SocketAddr,
        listener: SessionListener,
    ) -> Result<Self::Session, SessionError> {
        OutboundSession::new(address, self.configuration.clone(), listener)
    }
}
