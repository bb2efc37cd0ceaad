//! Outbound bitcoin peer sessions used by the seeder crawler.
//!
//! A session is deliberately short-lived: connect, complete the version
//! handshake, ask for addresses, and hang up. Results are delivered through a
//! [`SessionListener`] whose receiving half, [`SessionSignals`], belongs to
//! exactly one caller.

mod configuration;
mod error;
mod handshake;
mod listener;
mod session;
mod transport;
mod user_agent;

pub use configuration::{
    default_port, SessionConfiguration, ADDRV2_MIN_PROTOCOL_VERSION, DEFAULT_PROTOCOL_VERSION,
};
pub use error::SessionError;
pub use listener::{SessionListener, SessionSignals};
pub use session::{is_dialable, OutboundSession, PeerSession};
pub use transport::{TransportError, V1TransportReader, V1TransportWriter};
pub use user_agent::{UserAgent, UserAgentError};
