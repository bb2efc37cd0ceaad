//! Builder pattern for configuring and creating crawler instances.

use crate::connector::{OutboundConnector, SessionFactory};
use crate::crawler::Crawler;
use crate::manager::AddressManager;
use bitcoin::Network;
use peer_seeder_session::{
    default_port, SessionConfiguration, UserAgent, UserAgentError, DEFAULT_PROTOCOL_VERSION,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on each of connect, handshake and address exchange.
pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(3);
/// Default period of the crawler's status log line.
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Errors that can occur during crawler configuration.
#[derive(Debug, Clone)]
pub enum CrawlerBuilderError {
    /// User agent doesn't follow the required format.
    InvalidUserAgent(UserAgentError),
}

impl fmt::Display for CrawlerBuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlerBuilderError::InvalidUserAgent(err) => {
                write!(f, "Invalid user agent: {err}")
            }
        }
    }
}

impl std::error::Error for CrawlerBuilderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CrawlerBuilderError::InvalidUserAgent(err) => Some(err),
        }
    }
}

/// Builder for creating a customized [`Crawler`] instance.
///
/// # Example
///
/// ```
/// # fn main() -> Result<(), peer_seeder::CrawlerBuilderError> {
/// use bitcoin::Network;
/// use peer_seeder::{AddressManager, CrawlerBuilder, DEFAULT_ADDRESS_TIMEOUT};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let manager = Arc::new(AddressManager::in_memory(DEFAULT_ADDRESS_TIMEOUT));
///
/// // Crawl mainnet with the defaults.
/// let basic_crawler = CrawlerBuilder::new(Network::Bitcoin, manager.clone()).build();
///
/// // Crawl with custom settings.
/// let custom_crawler = CrawlerBuilder::new(Network::Bitcoin, manager)
///     .with_user_agent("/my-custom-seeder:1.0/")?
///     .with_node_timeout(Duration::from_secs(5))
///     .with_max_concurrent_tasks(64)
///     .build();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CrawlerBuilder {
    /// Bitcoin network the crawler will operate on.
    network: Network,
    /// Manager the crawler reads candidates from and reports to.
    manager: Arc<AddressManager>,
    /// Custom user agent advertised for connection.
    user_agent: Option<UserAgent>,
    /// Protocol version to advertise in connections.
    protocol_version: u32,
    /// Port dialed on candidates, the network default if `None`.
    port: Option<u16>,
    /// Bound on each peer operation.
    node_timeout: Duration,
    /// Cap on concurrent probes within a round.
    max_concurrent_tasks: Option<usize>,
    status_interval: Duration,
}

impl CrawlerBuilder {
    /// Create a new crawler builder for the specified network.
    ///
    /// # Arguments
    ///
    /// * `network` - The bitcoin network to crawl.
    /// * `manager` - The address manager shared with readers of the good pool.
    pub fn new(network: Network, manager: Arc<AddressManager>) -> Self {
        CrawlerBuilder {
            network,
            manager,
            user_agent: None,
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            port: None,
            node_timeout: DEFAULT_NODE_TIMEOUT,
            max_concurrent_tasks: None,
            status_interval: DEFAULT_STATUS_INTERVAL,
        }
    }

    /// Set a custom user agent string for the crawler.
    ///
    /// It must follow Bitcoin Core's convention: "/Name:Version/".
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - The builder for method chaining if validation succeeds.
    /// * `Err(CrawlerBuilderError)` - If the user agent format is invalid.
    pub fn with_user_agent<S: Into<String>>(
        mut self,
        user_agent: S,
    ) -> Result<Self, CrawlerBuilderError> {
        let user_agent =
            UserAgent::new(user_agent.into()).map_err(CrawlerBuilderError::InvalidUserAgent)?;
        self.user_agent = Some(user_agent);
        Ok(self)
    }

    /// Set the protocol version to advertise in connections.
    pub fn with_protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = version;
        self
    }

    /// Dial candidates on `port` instead of the network default.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the timeout for peer operations.
    ///
    /// Applied separately to connecting, waiting for the handshake, and
    /// waiting for the address list, so a probe takes at most three times
    /// this long.
    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }

    /// Cap how many candidates are probed at once within a round.
    ///
    /// Without a cap every candidate of a round is probed at once.
    pub fn with_max_concurrent_tasks(mut self, max_tasks: usize) -> Self {
        self.max_concurrent_tasks = Some(max_tasks);
        self
    }

    /// Set the period of the status log line.
    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    /// Session configuration every probe shares.
    pub fn session_configuration(&self) -> SessionConfiguration {
        SessionConfiguration::non_listening(
            self.network,
            self.protocol_version,
            self.user_agent.clone().unwrap_or_default(),
        )
    }

    /// Build the crawler with the configured options.
    pub fn build(self) -> Crawler<OutboundConnector> {
        let connector = OutboundConnector::new(self.session_configuration());
        self.build_with_factory(connector)
    }

    /// Build a crawler creating its sessions with `factory`.
    pub fn build_with_factory<F: SessionFactory>(self, factory: F) -> Crawler<F> {
        Crawler::new(
            self.manager,
            factory,
            self.port.unwrap_or_else(|| default_port(self.network)),
            self.node_timeout,
            self.max_concurrent_tasks,
            self.status_interval,
        )
    }
}
