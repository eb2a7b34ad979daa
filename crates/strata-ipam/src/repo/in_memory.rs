//! Non-durable repository for simulation and dry runs.
//!
//! With no external unique-constraint authority, each network's ledger is
//! guarded by its own mutex; check and write happen in one critical section.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use strata_core::{Network, Reservation, Subnet, to_numeric};
use strata_state::IpAddressRecord;
use tracing::debug;

use super::{IpRepository, already_in_use, check_owned, new_record, resolved_address};
use crate::candidates::{next_free_dynamic, next_free_vip};
use crate::error::IpamResult;

#[derive(Default)]
struct NetworkLedger {
    records: BTreeMap<u128, IpAddressRecord>,
    /// Oldest release at the front.
    released: VecDeque<IpAddr>,
}

impl NetworkLedger {
    fn taken(&self) -> BTreeSet<u128> {
        self.records.keys().copied().collect()
    }

    fn claim(&mut self, record: IpAddressRecord) {
        let address = record.address;
        self.released.retain(|ip| *ip != address);
        self.records.insert(to_numeric(address), record);
    }
}

/// In-memory [`IpRepository`] with a per-network critical section.
#[derive(Default)]
pub struct InMemoryIpRepo {
    task_id: String,
    networks: Mutex<HashMap<String, Arc<Mutex<NetworkLedger>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryIpRepo {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            networks: Mutex::new(HashMap::new()),
        }
    }

    fn ledger(&self, network_name: &str) -> Arc<Mutex<NetworkLedger>> {
        lock(&self.networks)
            .entry(network_name.to_string())
            .or_default()
            .clone()
    }

    fn allocate_with<F>(&self, reservation: &Reservation, pick: F) -> IpamResult<Option<IpAddr>>
    where
        F: Fn(&BTreeSet<u128>, &[IpAddr]) -> Option<IpAddr>,
    {
        let ledger = self.ledger(reservation.network_name());
        let mut ledger = lock(&ledger);
        let released: Vec<IpAddr> = ledger.released.iter().copied().collect();
        let Some(address) = pick(&ledger.taken(), &released) else {
            return Ok(None);
        };
        ledger.claim(new_record(reservation, address, &self.task_id));
        debug!(network = %reservation.network_name(), %address, instance = %reservation.instance_id, "address allocated");
        Ok(Some(address))
    }
}

impl IpRepository for InMemoryIpRepo {
    fn add(&self, reservation: &Reservation) -> IpamResult<()> {
        let address = resolved_address(reservation)?;
        let static_ip = reservation.is_static_claim();
        let ledger = self.ledger(reservation.network_name());
        let mut ledger = lock(&ledger);

        match ledger.records.get_mut(&to_numeric(address)) {
            Some(current) if current.instance_id != reservation.instance_id => {
                Err(already_in_use(reservation, address, &current.instance_id))
            }
            Some(current) => {
                if current.static_ip != static_ip {
                    current.static_ip = static_ip;
                    current.task_id = self.task_id.clone();
                    debug!(network = %reservation.network_name(), %address, static_ip, "reservation kind updated");
                }
                Ok(())
            }
            None => {
                ledger.claim(new_record(reservation, address, &self.task_id));
                debug!(network = %reservation.network_name(), %address, instance = %reservation.instance_id, "reservation stored");
                Ok(())
            }
        }
    }

    fn delete(&self, address: IpAddr, network: &Network) -> IpamResult<()> {
        check_owned(address, network)?;
        let ledger = self.ledger(&network.name);
        let mut ledger = lock(&ledger);
        if ledger.records.remove(&to_numeric(address)).is_some() {
            ledger.released.push_back(address);
            debug!(network = %network.name, %address, "address released");
        }
        Ok(())
    }

    fn allocate_dynamic_ip(&self, reservation: &Reservation, subnet: &Subnet) -> IpamResult<Option<IpAddr>> {
        self.allocate_with(reservation, |taken, released| {
            next_free_dynamic(subnet, taken, released)
        })
    }

    fn allocate_vip_ip(&self, reservation: &Reservation, subnet: &Subnet) -> IpamResult<Option<IpAddr>> {
        self.allocate_with(reservation, |taken, _| next_free_vip(subnet, taken))
    }

    fn list(&self, network_name: &str) -> IpamResult<Vec<IpAddressRecord>> {
        let ledger = self.ledger(network_name);
        let ledger = lock(&ledger);
        Ok(ledger.records.values().cloned().collect())
    }
}
