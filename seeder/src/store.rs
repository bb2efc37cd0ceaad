//! On-disk address store.
//!
//! A versioned JSON document, rewritten atomically by writing a temporary
//! file next to the store and renaming it into place.

use crate::manager::{AddressRecord, AddressState, ManagerError};
use bitcoin::p2p::ServiceFlags;
use serde::{Deserialize, Serialize};
use std::io;
use std::net::IpAddr;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// File name of the store inside the data directory.
pub const STORE_FILE: &str = "peers.json";
/// Format version written by this crate.
const STORE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    records: Vec<StoredRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    address: IpAddr,
    state: AddressState,
    last_attempt: Option<u64>,
    last_success: Option<u64>,
    services: u64,
}

impl From<&AddressRecord> for StoredRecord {
    fn from(record: &AddressRecord) -> Self {
        StoredRecord {
            address: record.address,
            state: record.state,
            last_attempt: record.last_attempt.map(unix_secs),
            last_success: record.last_success.map(unix_secs),
            services: record.services.to_u64(),
        }
    }
}

impl From<StoredRecord> for AddressRecord {
    fn from(stored: StoredRecord) -> Self {
        AddressRecord {
            address: stored.address,
            state: stored.state,
            last_attempt: stored.last_attempt.map(from_unix_secs),
            last_success: stored.last_success.map(from_unix_secs),
            services: ServiceFlags::from(stored.services),
        }
    }
}

/// Whole seconds since the unix epoch, zero for times before it.
pub fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

pub fn from_unix_secs(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

/// Read every record from the store at `path`.
///
/// A missing store is an empty store.
pub async fn read_records(path: &Path) -> Result<Vec<AddressRecord>, ManagerError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ManagerError::Io(e)),
    };

    let file: StoreFile = serde_json::from_slice(&bytes)?;
    if file.version != STORE_VERSION {
        return Err(ManagerError::UnsupportedVersion(file.version));
    }

    Ok(file.records.into_iter().map(AddressRecord::from).collect())
}

/// Atomically replace the store at `path` with `records`.
pub async fn write_records(path: &Path, records: &[AddressRecord]) -> Result<(), ManagerError> {
    let file = StoreFile {
        version: STORE_VERSION,
        records: records.iter().map(StoredRecord::from).collect(),
    };
    let json = serde_json::to_vec_pretty(&file)?;

    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, &json).await?;
    if tokio::fs::rename(&tmp, path).await.is_err() {
        // Some platforms refuse to rename over an existing file.
        let _ = tokio::fs::remove_file(path).await;
        tokio::fs::rename(&tmp, path).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_missing_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let records = read_records(&dir.path().join(STORE_FILE)).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STORE_FILE);
        let record = AddressRecord {
            address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            state: AddressState::Good,
            last_attempt: Some(from_unix_secs(1_700_000_000)),
            last_success: Some(from_unix_secs(1_700_000_001)),
            services: ServiceFlags::NETWORK | ServiceFlags::WITNESS,
        };

        write_records(&path, &[record.clone()]).await.unwrap();

        assert!(!path.with_extension("tmp").exists());
        assert_eq!(read_records(&path).await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn test_corrupt_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STORE_FILE);
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        assert!(matches!(
            read_records(&path).await,
            Err(ManagerError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_unsupported_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STORE_FILE);
        tokio::fs::write(&path, br#"{ "version": 99, "records": [] }"#)
            .await
            .unwrap();

        assert!(matches!(
            read_records(&path).await,
            Err(ManagerError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_timestamps_before_epoch_clamp() {
        assert_eq!(unix_secs(UNIX_EPOCH - Duration::from_secs(5)), 0);
        assert_eq!(unix_secs(from_unix_secs(42)), 42);
    }
}
