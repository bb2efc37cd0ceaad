//! Address manager shared by the crawler and the directory service.
//!
//! Every known address has exactly one [`AddressRecord`]. The crawler is the
//! only writer of state transitions, readers take snapshot copies.

use crate::store::{self, from_unix_secs, unix_secs, STORE_FILE};
use bitcoin::p2p::ServiceFlags;
use log::{debug, info, warn};
use peer_seeder_session::is_dialable;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;

/// Default staleness window before an address is attempted again.
pub const DEFAULT_ADDRESS_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Errors from loading or saving the address store.
#[derive(Debug)]
pub enum ManagerError {
    /// File system failure.
    Io(io::Error),
    /// Store contents could not be encoded or decoded.
    Serialization(serde_json::Error),
    /// Store was written in a format version this crate does not read.
    UnsupportedVersion(u32),
}

impl fmt::Display for ManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerError::Io(err) => write!(f, "Address store I/O error: {err}"),
            ManagerError::Serialization(err) => write!(f, "Address store is malformed: {err}"),
            ManagerError::UnsupportedVersion(version) => {
                write!(f, "Unsupported address store version {version}")
            }
        }
    }
}

impl Error for ManagerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ManagerError::Io(err) => Some(err),
            ManagerError::Serialization(err) => Some(err),
            ManagerError::UnsupportedVersion(_) => None,
        }
    }
}

impl From<io::Error> for ManagerError {
    fn from(err: io::Error) -> Self {
        ManagerError::Io(err)
    }
}

impl From<serde_json::Error> for ManagerError {
    fn from(err: serde_json::Error) -> Self {
        ManagerError::Serialization(err)
    }
}

/// Discovery state of an address.
///
/// Transitions only move forward: `New` → `Attempted` → `Good`. A `Good`
/// address is re-validated when it goes stale but keeps its classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressState {
    /// Known, never attempted.
    New,
    /// Attempted at least once, never validated.
    Attempted,
    /// Completed a handshake.
    Good,
}

impl fmt::Display for AddressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressState::New => write!(f, "new"),
            AddressState::Attempted => write!(f, "attempted"),
            AddressState::Good => write!(f, "good"),
        }
    }
}

/// Everything known about one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRecord {
    /// The identity of the record.
    pub address: IpAddr,
    pub state: AddressState,
    /// Most recent connection attempt.
    pub last_attempt: Option<SystemTime>,
    /// Most recent successful handshake.
    pub last_success: Option<SystemTime>,
    /// Services reported at the last successful handshake, `NONE` until then.
    pub services: ServiceFlags,
}

impl AddressRecord {
    fn new(address: IpAddr) -> Self {
        AddressRecord {
            address,
            state: AddressState::New,
            last_attempt: None,
            last_success: None,
            services: ServiceFlags::NONE,
        }
    }

    /// Never attempted, or last attempted more than `timeout` before `now`.
    ///
    /// An attempt in the future (clock stepped backwards) is not stale.
    fn is_stale(&self, now: SystemTime, timeout: Duration) -> bool {
        match self.last_attempt {
            None => true,
            Some(attempted) => now
                .duration_since(attempted)
                .map(|age| age > timeout)
                .unwrap_or(false),
        }
    }
}

/// Record counts per state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AddressStats {
    pub new: usize,
    pub attempted: usize,
    pub good: usize,
}

impl AddressStats {
    pub fn total(&self) -> usize {
        self.new + self.attempted + self.good
    }
}

impl fmt::Display for AddressStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} addresses ({} new, {} attempted, {} good)",
            self.total(),
            self.new,
            self.attempted,
            self.good
        )
    }
}

/// Current time truncated to whole seconds, the resolution of the store.
fn now() -> SystemTime {
    from_unix_secs(unix_secs(SystemTime::now()))
}

/// The authoritative set of known addresses.
///
/// Every operation holds one manager-wide lock for its whole duration.
/// Share it between the crawler and readers with an `Arc`.
#[derive(Debug)]
pub struct AddressManager {
    records: Mutex<HashMap<IpAddr, AddressRecord>>,
    /// Staleness window for [`AddressManager::addresses`].
    address_timeout: Duration,
    /// Store location, `None` for an in-memory manager.
    path: Option<PathBuf>,
}

impl AddressManager {
    /// A manager without durable storage.
    pub fn in_memory(address_timeout: Duration) -> Self {
        AddressManager {
            records: Mutex::new(HashMap::new()),
            address_timeout,
            path: None,
        }
    }

    /// Open the manager persisted in `data_dir`, creating the directory if needed.
    ///
    /// A missing, unreadable, or corrupt store is logged and the manager starts
    /// empty.
    ///
    /// # Errors
    ///
    /// Only if `data_dir` can not be created.
    pub async fn load(
        data_dir: impl AsRef<Path>,
        address_timeout: Duration,
    ) -> Result<Self, ManagerError> {
        let data_dir = data_dir.as_ref();
        tokio::fs::create_dir_all(data_dir).await?;
        let path = data_dir.join(STORE_FILE);

        let records = match store::read_records(&path).await {
            Ok(records) => {
                info!("Loaded {} addresses from {}", records.len(), path.display());
                records
            }
            Err(e) => {
                warn!(
                    "Could not load address store {}, starting empty: {e}",
                    path.display()
                );
                Vec::new()
            }
        };

        let records = records
            .into_iter()
            .filter(|record| is_dialable(record.address))
            .map(|record| (record.address, record))
            .collect();

        Ok(AddressManager {
            records: Mutex::new(records),
            address_timeout,
            path: Some(path),
        })
    }

    /// Staleness window used to select addresses.
    pub fn address_timeout(&self) -> Duration {
        self.address_timeout
    }

    /// Add addresses not known yet in state `New`.
    ///
    /// Addresses that can never be dialed are skipped, they would otherwise
    /// stay stale forever.
    ///
    /// # Returns
    ///
    /// The number of records created. Known addresses are left untouched.
    pub async fn add_addresses<I>(&self, addresses: I) -> usize
    where
        I: IntoIterator<Item = IpAddr>,
    {
        let mut records = self.records.lock().await;
        let mut added = 0;
        for address in addresses {
            if !is_dialable(address) {
                debug!("Skipping undialable address {address}");
                continue;
            }
            records.entry(address).or_insert_with(|| {
                added += 1;
                AddressRecord::new(address)
            });
        }
        added
    }

    /// Addresses never attempted or attempted longer than the address timeout ago.
    ///
    /// Order is unspecified. Empty when nothing is stale, callers back off.
    pub async fn addresses(&self) -> Vec<IpAddr> {
        let now = now();
        self.records
            .lock()
            .await
            .values()
            .filter(|record| record.is_stale(now, self.address_timeout))
            .map(|record| record.address)
            .collect()
    }

    /// Record a connection attempt starting now.
    pub async fn attempt(&self, address: IpAddr) {
        self.attempt_at(address, now()).await
    }

    async fn attempt_at(&self, address: IpAddr, at: SystemTime) {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(&address) else {
            debug!("Ignoring attempt on unknown address {address}");
            return;
        };

        record.last_attempt = Some(match record.last_attempt {
            Some(previous) if previous > at => previous,
            _ => at,
        });
        if record.state == AddressState::New {
            record.state = AddressState::Attempted;
        }
    }

    /// Mark an address as validated with the services it reported.
    pub async fn good(&self, address: IpAddr, services: ServiceFlags) {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(&address) else {
            debug!("Ignoring good on unknown address {address}");
            return;
        };

        record.state = AddressState::Good;
        record.last_success = Some(now());
        record.services = services;
    }

    /// Snapshot of every good address and its services.
    pub async fn good_addresses(&self) -> HashMap<IpAddr, ServiceFlags> {
        self.records
            .lock()
            .await
            .values()
            .filter(|record| record.state == AddressState::Good)
            .map(|record| (record.address, record.services))
            .collect()
    }

    /// Good addresses advertising every flag in `required`.
    pub async fn good_addresses_with_services(&self, required: ServiceFlags) -> Vec<IpAddr> {
        self.records
            .lock()
            .await
            .values()
            .filter(|record| record.state == AddressState::Good && record.services.has(required))
            .map(|record| record.address)
            .collect()
    }

    /// Copy of the record for `address`, if known.
    pub async fn record(&self, address: IpAddr) -> Option<AddressRecord> {
        self.records.lock().await.get(&address).cloned()
    }

    /// Number of known addresses.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    pub async fn stats(&self) -> AddressStats {
        let records = self.records.lock().await;
        let mut stats = AddressStats::default();
        for record in records.values() {
            match record.state {
                AddressState::New => stats.new += 1,
                AddressState::Attempted => stats.attempted += 1,
                AddressState::Good => stats.good += 1,
            }
        }
        stats
    }

    /// Write every record to the store. A no-op for in-memory managers.
    ///
    /// The lock is only held to copy the records, not during file I/O.
    pub async fn save(&self) -> Result<(), ManagerError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let snapshot: Vec<AddressRecord> =
            self.records.lock().await.values().cloned().collect();
        store::write_records(path, &snapshot).await?;
        debug!("Saved {} addresses to {}", snapshot.len(), path.display());

        Ok(())
    }
}
