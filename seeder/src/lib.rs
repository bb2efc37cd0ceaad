//! Bitcoin network crawler and address manager for DNS seeding.
//!
//! The [`Crawler`] repeatedly probes every stale address known to an
//! [`AddressManager`], promoting peers that complete a handshake to the good
//! pool and recording the addresses they share. A directory service reads the
//! good pool through the same `Arc<AddressManager>`.

mod builder;
mod connector;
mod crawler;
mod manager;
mod store;

pub use builder::{
    CrawlerBuilder, CrawlerBuilderError, DEFAULT_NODE_TIMEOUT, DEFAULT_STATUS_INTERVAL,
};
pub use connector::{OutboundConnector, SessionFactory};
pub use crawler::{Crawler, RoundSummary, TaskResult};
pub use manager::{
    AddressManager, AddressRecord, AddressState, AddressStats, ManagerError,
    DEFAULT_ADDRESS_TIMEOUT,
};
pub use store::STORE_FILE;

// Re-export session types callers need to configure or extend the crawler.
pub use peer_seeder_session::{
    default_port, is_dialable, OutboundSession, PeerSession, SessionConfiguration, SessionError,
    SessionListener, SessionSignals, UserAgent, UserAgentError, DEFAULT_PROTOCOL_VERSION,
};
