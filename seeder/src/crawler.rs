//! The crawl loop.
//!
//! Each round takes every stale address from the [`AddressManager`], probes
//! all of them concurrently, and waits for the whole round before polling
//! again. A probe connects, completes the handshake, asks for addresses and
//! hangs up. Nothing a single peer does can fail the loop.

use crate::connector::{OutboundConnector, SessionFactory};
use crate::manager::AddressManager;
use log::{debug, info, warn};
use peer_seeder_session::{PeerSession, SessionListener, SessionSignals};
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, MissedTickBehavior};

/// Shortest idle sleep between polls of an exhausted manager.
const MIN_IDLE_PERIOD: Duration = Duration::from_secs(1);

/// Outcome of probing one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskResult {
    /// No session could be built, the address was not attempted.
    ConstructionFailed,
    /// Connect failed or timed out.
    ConnectFailed,
    /// The handshake did not complete in time.
    HandshakeTimeout,
    /// Handshake completed but no address list arrived in time.
    AddressTimeout,
    /// Full exchange: `received` addresses, of which `added` were new.
    Discovered { received: usize, added: usize },
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskResult::ConstructionFailed => write!(f, "session construction failed"),
            TaskResult::ConnectFailed => write!(f, "connect failed"),
            TaskResult::HandshakeTimeout => write!(f, "handshake timed out"),
            TaskResult::AddressTimeout => write!(f, "address exchange timed out"),
            TaskResult::Discovered { received, added } => {
                write!(f, "received {received} addresses, {added} new")
            }
        }
    }
}

/// Tally of one round.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RoundSummary {
    pub candidates: usize,
    pub construction_failed: usize,
    pub connect_failed: usize,
    pub handshake_timeout: usize,
    pub address_timeout: usize,
    pub discovered: usize,
    /// Tasks that panicked or were cancelled.
    pub failed: usize,
    /// Addresses received across the round.
    pub received: usize,
    /// Addresses that were new to the manager.
    pub added: usize,
}

impl RoundSummary {
    fn record(&mut self, result: TaskResult) {
        match result {
            TaskResult::ConstructionFailed => self.construction_failed += 1,
            TaskResult::ConnectFailed => self.connect_failed += 1,
            TaskResult::HandshakeTimeout => self.handshake_timeout += 1,
            TaskResult::AddressTimeout => self.address_timeout += 1,
            TaskResult::Discovered { received, added } => {
                self.discovered += 1;
                self.received += received;
                self.added += added;
            }
        }
    }

    /// Peers that completed a handshake this round.
    pub fn handshakes(&self) -> usize {
        self.discovered + self.address_timeout
    }
}

impl fmt::Display for RoundSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Round of {} candidates: {} discovered, {} without addresses, {} handshake timeouts, \
             {} connect failures, {} construction failures, {} failed tasks; \
             received {} addresses, {} new",
            self.candidates,
            self.discovered,
            self.address_timeout,
            self.handshake_timeout,
            self.connect_failed,
            self.construction_failed,
            self.failed,
            self.received,
            self.added
        )
    }
}

/// Crawls the network, feeding an [`AddressManager`].
///
/// Built with [`crate::CrawlerBuilder`].
#[derive(Debug, Clone)]
pub struct Crawler<F: SessionFactory = OutboundConnector> {
    manager: Arc<AddressManager>,
    factory: F,
    /// Port dialed on every candidate.
    port: u16,
    /// Bound on connect, handshake and address exchange, each.
    node_timeout: Duration,
    /// Per-round cap on concurrent probes, unbounded if `None`.
    max_concurrent_tasks: Option<usize>,
    status_interval: Duration,
}

impl<F: SessionFactory> Crawler<F> {
    pub(crate) fn new(
        manager: Arc<AddressManager>,
        factory: F,
        port: u16,
        node_timeout: Duration,
        max_concurrent_tasks: Option<usize>,
        status_interval: Duration,
    ) -> Self {
        Crawler {
            manager,
            factory,
            port,
            node_timeout,
            max_concurrent_tasks,
            status_interval,
        }
    }

    /// The manager this crawler feeds.
    pub fn manager(&self) -> &Arc<AddressManager> {
        &self.manager
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn node_timeout(&self) -> Duration {
        self.node_timeout
    }

    /// How long to sleep when no address is stale.
    fn idle_period(&self) -> Duration {
        self.manager.address_timeout().max(MIN_IDLE_PERIOD)
    }

    /// Crawl forever.
    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    /// Crawl until `shutdown` resolves.
    ///
    /// A round in flight at shutdown is abandoned, which aborts its probes.
    /// The manager is saved before returning.
    pub async fn run_until<S>(self, shutdown: S)
    where
        S: Future<Output = ()> + Send,
    {
        info!(
            "Crawler started on port {} with a {:?} node timeout",
            self.port, self.node_timeout
        );

        {
            let crawl = self.crawl();
            tokio::pin!(crawl);
            tokio::pin!(shutdown);

            let period = self.status_interval.max(Duration::from_secs(1));
            let mut status = tokio::time::interval(period);
            status.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        info!("Crawler shutting down");
                        break;
                    }
                    _ = status.tick() => {
                        info!("Status: {}", self.manager.stats().await);
                    }
                    never = &mut crawl => match never {},
                }
            }
        }

        if let Err(e) = self.manager.save().await {
            warn!("Failed to save addresses on shutdown: {e}");
        }
    }

    async fn crawl(&self) -> Infallible {
        loop {
            let batch = self.manager.addresses().await;
            if batch.is_empty() {
                let idle = self.idle_period();
                info!("No stale addresses, sleeping for {idle:?}");
                tokio::time::sleep(idle).await;
                continue;
            }

            let summary = self.crawl_round(batch).await;
            info!("{summary}");

            if let Err(e) = self.manager.save().await {
                warn!("Failed to save addresses: {e}");
            }
        }
    }

    /// Probe every address in `batch` concurrently and wait for all of them.
    pub(crate) async fn crawl_round(&self, batch: Vec<IpAddr>) -> RoundSummary {
        let mut summary = RoundSummary {
            candidates: batch.len(),
            ..RoundSummary::default()
        };
        debug!("Starting round of {} candidates", batch.len());

        let permits = self
            .max_concurrent_tasks
            .map(|max| Arc::new(Semaphore::new(max.max(1))));
        let mut tasks = JoinSet::new();
        for ip in batch {
            let crawler = self.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                // The semaphore is never closed, acquire only fails if it were.
                let _permit = match permits {
                    Some(permits) => permits.acquire_owned().await.ok(),
                    None => None,
                };
                crawler.process(ip).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => summary.record(result),
                Err(e) => {
                    warn!("Crawl task failed: {e}");
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    /// Probe a single candidate.
    ///
    /// The session and its signals are private to this call. Every manager
    /// update happens here, never from inside the session.
    async fn process(&self, ip: IpAddr) -> TaskResult {
        let address = SocketAddr::new(ip, self.port);
        let (listener, signals) = SessionListener::new();
        let mut session = match self.factory.create(address, listener) {
            Ok(session) => session,
            Err(e) => {
                debug!("Could not create session for {address}: {e}");
                return TaskResult::ConstructionFailed;
            }
        };

        self.manager.attempt(ip).await;
        let result = self.exchange(&mut session, address, signals).await;
        session.disconnect().await;

        debug!("{address}: {result}");
        result
    }

    async fn exchange<S: PeerSession>(
        &self,
        session: &mut S,
        address: SocketAddr,
        signals: SessionSignals,
    ) -> TaskResult {
        match timeout(self.node_timeout, session.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Failed to connect to {address}: {e}");
                return TaskResult::ConnectFailed;
            }
            Err(_) => {
                debug!("Connect to {address} timed out");
                return TaskResult::ConnectFailed;
            }
        }

        let services = match timeout(self.node_timeout, signals.handshake).await {
            Ok(Ok(services)) => services,
            Ok(Err(_)) => {
                debug!("Session with {address} closed before the handshake completed");
                return TaskResult::HandshakeTimeout;
            }
            Err(_) => return TaskResult::HandshakeTimeout,
        };
        self.manager.good(address.ip(), services).await;

        if let Err(e) = session.request_addresses().await {
            debug!("Failed to request addresses from {address}: {e}");
            return TaskResult::AddressTimeout;
        }

        let received = match timeout(self.node_timeout, signals.addresses).await {
            Ok(Ok(received)) => received,
            Ok(Err(_)) => {
                debug!("Session with {address} closed before sending addresses");
                return TaskResult::AddressTimeout;
            }
            Err(_) => return TaskResult::AddressTimeout,
        };
        let added = self.manager.add_addresses(received.iter().copied()).await;

        TaskResult::Discovered {
            received: received.len(),
            added,
        }
    }
}
