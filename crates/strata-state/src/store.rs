//! StateStore: redb-backed address-reservation persistence for Strata.
//!
//! Holds one [`IpAddressRecord`] per `(network, address)` and the order in
//! which addresses were released. All records are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe reservation store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

fn checked_key(network_name: &str, address: IpAddr) -> StateResult<String> {
    if network_name.contains('/') {
        return Err(StateError::InvalidKey(network_name.to_string()));
    }
    Ok(address_key(network_name, address))
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing and dry runs).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(IP_ADDRESSES).map_err(map_err!(Table))?;
        txn.open_table(IP_RELEASES).map_err(map_err!(Table))?;
        txn.open_table(COUNTERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Addresses ──────────────────────────────────────────────────

    /// Get the entry for `address` on `network_name`.
    pub fn get_ip(&self, network_name: &str, address: IpAddr) -> StateResult<Option<IpAddressRecord>> {
        let key = checked_key(network_name, address)?;
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(IP_ADDRESSES).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: IpAddressRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Insert `record` unless its key is already taken.
    ///
    /// The check and the write share one write transaction, so of two
    /// concurrent callers for the same key exactly one sees `Inserted`.
    /// A successful insert also drops the address from the release log.
    pub fn insert_ip_if_absent(&self, record: &IpAddressRecord) -> StateResult<InsertOutcome> {
        let key = checked_key(&record.network_name, record.address)?;
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existing = {
            let table = txn.open_table(IP_ADDRESSES).map_err(map_err!(Table))?;
            let found = table
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            found
        };
        if let Some(bytes) = existing {
            txn.abort().map_err(map_err!(Transaction))?;
            let current: IpAddressRecord =
                serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
            debug!(%key, owner = %current.instance_id, "address already taken");
            return Ok(InsertOutcome::Conflict(current));
        }
        {
            let mut table = txn.open_table(IP_ADDRESSES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        {
            let mut releases = txn.open_table(IP_RELEASES).map_err(map_err!(Table))?;
            releases.remove(key.as_str()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, instance = %record.instance_id, "address stored");
        Ok(InsertOutcome::Inserted)
    }

    /// Replace the entry for `record`'s key only while it is still owned by
    /// `record.instance_id`. Returns false if the entry vanished or changed owner.
    pub fn update_ip_if_owned(&self, record: &IpAddressRecord) -> StateResult<bool> {
        let key = checked_key(&record.network_name, record.address)?;
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let owned = {
            let mut table = txn.open_table(IP_ADDRESSES).map_err(map_err!(Table))?;
            let current = table
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            let owned = match current {
                Some(bytes) => {
                    let current: IpAddressRecord =
                        serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
                    current.instance_id == record.instance_id
                }
                None => false,
            };
            if owned {
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            owned
        };
        if owned {
            txn.commit().map_err(map_err!(Transaction))?;
            debug!(%key, static_ip = record.static_ip, "address updated");
        } else {
            txn.abort().map_err(map_err!(Transaction))?;
        }
        Ok(owned)
    }

    /// Delete the entry for `address` on `network_name`. Returns true if it
    /// existed, in which case the address is appended to the release log.
    pub fn delete_ip(&self, network_name: &str, address: IpAddr) -> StateResult<bool> {
        let key = checked_key(network_name, address)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(IP_ADDRESSES).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        if existed {
            let seq = {
                let mut counters = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
                let next = counters
                    .get(RELEASE_SEQ)
                    .map_err(map_err!(Read))?
                    .map(|guard| guard.value())
                    .unwrap_or(0)
                    + 1;
                counters.insert(RELEASE_SEQ, next).map_err(map_err!(Write))?;
                next
            };
            let mut releases = txn.open_table(IP_RELEASES).map_err(map_err!(Table))?;
            releases.insert(key.as_str(), seq).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "address deleted");
        Ok(existed)
    }

    /// All entries of one network.
    pub fn list_ips_for_network(&self, network_name: &str) -> StateResult<Vec<IpAddressRecord>> {
        let prefix = network_prefix(network_name);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(IP_ADDRESSES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let record: IpAddressRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    /// Every entry in the store.
    pub fn list_ips(&self) -> StateResult<Vec<IpAddressRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(IP_ADDRESSES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: IpAddressRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    // ── Release log ────────────────────────────────────────────────

    /// Released, not yet re-claimed addresses of one network, least
    /// recently released first.
    pub fn list_releases_for_network(&self, network_name: &str) -> StateResult<Vec<IpAddr>> {
        let prefix = network_prefix(network_name);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(IP_RELEASES).map_err(map_err!(Table))?;
        let mut released = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, seq) = entry.map_err(map_err!(Read))?;
            if let Some(address) = key.value().strip_prefix(&prefix) {
                let address: IpAddr = address.parse::<IpAddr>().map_err(map_err!(Deserialize))?;
                released.push((seq.value(), address));
            }
        }
        released.sort_unstable();
        Ok(released.into_iter().map(|(_, address)| address).collect())
    }
}
