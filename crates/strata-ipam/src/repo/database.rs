//! Store-backed repository with optimistic retry.
//!
//! No locks are taken here. Every decision is derived from a fresh read and
//! committed through the store's atomic insert-if-absent; when a concurrent
//! writer wins, the decision is re-derived and retried.

use std::collections::BTreeSet;
use std::net::IpAddr;

use strata_core::{Network, Reservation, Subnet, to_numeric};
use strata_state::{InsertOutcome, IpAddressRecord};
use tracing::{debug, warn};

use super::{IpRepository, already_in_use, check_owned, new_record, resolved_address};
use crate::candidates::{next_free_dynamic, next_free_vip};
use crate::error::{IpamError, IpamResult};
use crate::store::AddressStore;

/// Repository over an [`AddressStore`], normally a shared `StateStore`.
pub struct DatabaseIpRepo<S> {
    store: S,
    task_id: String,
    max_add_attempts: u32,
}

impl<S: AddressStore> DatabaseIpRepo<S> {
    pub fn new(store: S, task_id: impl Into<String>, max_add_attempts: u32) -> Self {
        Self {
            store,
            task_id: task_id.into(),
            max_add_attempts: max_add_attempts.max(1),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Claim loop shared by dynamic and VIP allocation. Each lost race adds
    /// its candidate to `skip`, so the loop ends after at most one pass over
    /// the subnet.
    fn allocate_with<F>(&self, reservation: &Reservation, pick: F) -> IpamResult<Option<IpAddr>>
    where
        F: Fn(&BTreeSet<u128>, &[IpAddr]) -> Option<IpAddr>,
    {
        let network = reservation.network_name();
        let mut skip: BTreeSet<u128> = BTreeSet::new();
        loop {
            let mut taken: BTreeSet<u128> = self
                .store
                .list_for_network(network)?
                .iter()
                .map(|record| to_numeric(record.address))
                .collect();
            taken.extend(skip.iter().copied());
            let released = self.store.releases_for_network(network)?;

            let Some(candidate) = pick(&taken, &released) else {
                debug!(%network, instance = %reservation.instance_id, "no free address left in subnet");
                return Ok(None);
            };

            let record = new_record(reservation, candidate, &self.task_id);
            match self.store.insert_if_absent(&record)? {
                InsertOutcome::Inserted => {
                    debug!(%network, address = %candidate, instance = %reservation.instance_id, "address allocated");
                    return Ok(Some(candidate));
                }
                InsertOutcome::Conflict(current) => {
                    warn!(
                        %network,
                        address = %candidate,
                        owner = %current.instance_id,
                        "lost allocation race, trying next candidate"
                    );
                    skip.insert(to_numeric(candidate));
                }
            }
        }
    }
}

impl<S: AddressStore> IpRepository for DatabaseIpRepo<S> {
    fn add(&self, reservation: &Reservation) -> IpamResult<()> {
        let address = resolved_address(reservation)?;
        let network = reservation.network_name();
        let static_ip = reservation.is_static_claim();

        for attempt in 1..=self.max_add_attempts {
            match self.store.get(network, address)? {
                Some(current) if current.instance_id != reservation.instance_id => {
                    return Err(already_in_use(reservation, address, &current.instance_id));
                }
                Some(current) if current.static_ip == static_ip => {
                    debug!(%network, %address, instance = %reservation.instance_id, "reservation already stored");
                    return Ok(());
                }
                Some(current) => {
                    let updated = IpAddressRecord {
                        static_ip,
                        task_id: self.task_id.clone(),
                        ..current
                    };
                    if self.store.update_if_owned(&updated)? {
                        debug!(%network, %address, static_ip, "reservation kind updated");
                        return Ok(());
                    }
                    warn!(%network, %address, attempt, "entry changed during kind update, retrying");
                }
                None => {
                    let record = new_record(reservation, address, &self.task_id);
                    match self.store.insert_if_absent(&record)? {
                        InsertOutcome::Inserted => {
                            debug!(%network, %address, instance = %reservation.instance_id, "reservation stored");
                            return Ok(());
                        }
                        InsertOutcome::Conflict(current) => {
                            warn!(
                                %network,
                                %address,
                                attempt,
                                owner = %current.instance_id,
                                "concurrent insert detected, retrying"
                            );
                        }
                    }
                }
            }
        }

        Err(IpamError::ReservationConflict {
            reservation: reservation.to_string(),
            attempts: self.max_add_attempts,
        })
    }

    fn delete(&self, address: IpAddr, network: &Network) -> IpamResult<()> {
        check_owned(address, network)?;
        let existed = self.store.remove(&network.name, address)?;
        debug!(network = %network.name, %address, existed, "address released");
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
        let mut records = self.store.list_for_network(network_name)?;
        records.sort_by_key(|record| to_numeric(record.address));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::test_support::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use strata_state::{StateResult, StateStore};

    fn repo() -> DatabaseIpRepo<StateStore> {
        DatabaseIpRepo::new(StateStore::open_in_memory().unwrap(), "task-1", 3)
    }

    /// Lets a rival instance claim the address right before our write.
    struct RacingStore {
        inner: StateStore,
        rival: Mutex<Option<IpAddressRecord>>,
        inserts: AtomicU32,
    }

    impl RacingStore {
        fn new(rival: Option<IpAddressRecord>) -> Self {
            Self {
                inner: StateStore::open_in_memory().unwrap(),
                rival: Mutex::new(rival),
                inserts: AtomicU32::new(0),
            }
        }
    }

    impl AddressStore for RacingStore {
        fn get(&self, network_name: &str, address: IpAddr) -> StateResult<Option<IpAddressRecord>> {
            self.inner.get_ip(network_name, address)
        }

        fn insert_if_absent(&self, record: &IpAddressRecord) -> StateResult<InsertOutcome> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            if let Some(mut rival) = self.rival.lock().unwrap().take() {
                rival.address = record.address;
                self.inner.insert_ip_if_absent(&rival)?;
            }
            self.inner.insert_ip_if_absent(record)
        }

        fn update_if_owned(&self, record: &IpAddressRecord) -> StateResult<bool> {
            self.inner.update_ip_if_owned(record)
        }

        fn remove(&self, network_name: &str, address: IpAddr) -> StateResult<bool> {
            self.inner.delete_ip(network_name, address)
        }

        fn list_for_network(&self, network_name: &str) -> StateResult<Vec<IpAddressRecord>> {
            self.inner.list_ips_for_network(network_name)
        }

        fn releases_for_network(&self, network_name: &str) -> StateResult<Vec<IpAddr>> {
            self.inner.list_releases_for_network(network_name)
        }
    }

    fn rival(instance: &str) -> IpAddressRecord {
        IpAddressRecord {
            address: ip("0.0.0.0"),
            network_name: "a".to_string(),
            instance_id: instance.to_string(),
            static_ip: false,
            task_id: "task-2".to_string(),
            created_at: 0,
        }
    }

    #[test]
    fn add_then_add_by_other_instance_fails() {
        let repo = repo();
        let net = network();
        let mut mine = Reservation::dynamic("web/0", None, net.clone());
        mine.resolve(ip("192.168.1.20"));
        repo.add(&mine).unwrap();

        let mut theirs = Reservation::dynamic("web/1", None, net);
        theirs.resolve(ip("192.168.1.20"));
        let err = repo.add(&theirs).unwrap_err();
        assert!(matches!(err, IpamError::AlreadyInUse { ref owner, .. } if owner == "web/0"));
    }

    #[test]
    fn add_same_instance_updates_kind() {
        let repo = repo();
        let net = network();
        let existing = Reservation::existing("web/0", None, net.clone(), ip("192.168.1.20"));
        repo.add(&existing).unwrap();
        assert!(!repo.list("a").unwrap()[0].static_ip);

        let promoted = Reservation::new_static("web/0", None, net, ip("192.168.1.20"));
        repo.add(&promoted).unwrap();
        let records = repo.list("a").unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].static_ip);
    }

    #[test]
    fn add_is_idempotent_for_same_kind() {
        let repo = repo();
        let r = Reservation::new_static("web/0", None, network(), ip("192.168.1.10"));
        repo.add(&r).unwrap();
        repo.add(&r).unwrap();
        assert_eq!(repo.list("a").unwrap().len(), 1);
    }

    #[test]
    fn add_requires_resolved_reservation() {
        let repo = repo();
        let r = dynamic("web/0", &network());
        assert!(matches!(repo.add(&r), Err(IpamError::Unresolved(_))));
    }

    #[test]
    fn add_rereads_after_losing_race_to_other_instance() {
        let repo = DatabaseIpRepo::new(RacingStore::new(Some(rival("web/9"))), "task-1", 3);
        let mut r = Reservation::dynamic("web/0", None, network());
        r.resolve(ip("192.168.1.20"));

        let err = repo.add(&r).unwrap_err();
        assert!(matches!(err, IpamError::AlreadyInUse { ref owner, .. } if owner == "web/9"));
        assert_eq!(repo.store().inserts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn add_rereads_after_losing_race_to_same_instance() {
        let repo = DatabaseIpRepo::new(RacingStore::new(Some(rival("web/0"))), "task-1", 3);
        let r = Reservation::new_static("web/0", None, network(), ip("192.168.1.10"));

        repo.add(&r).unwrap();
        let stored = repo.store().inner.get_ip("a", ip("192.168.1.10")).unwrap().unwrap();
        assert_eq!(stored.instance_id, "web/0");
        assert!(stored.static_ip);
    }

    #[test]
    fn allocate_skips_candidate_taken_by_racer() {
        let net = small_network("192.168.0.0/24", &[]);
        let mut rival = rival("web/9");
        rival.network_name = "small".to_string();
        let repo = DatabaseIpRepo::new(RacingStore::new(Some(rival)), "task-1", 3);

        let got = repo
            .allocate_dynamic_ip(&dynamic("web/0", &net), &net.subnets[0])
            .unwrap();
        assert_eq!(got, Some(ip("192.168.0.1")));
        assert_eq!(repo.store().inserts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn allocate_from_unrestricted_range_starts_at_network_address() {
        let repo = repo();
        let net = small_network("192.168.0.0/24", &[]);
        let subnet = &net.subnets[0];
        assert_eq!(
            repo.allocate_dynamic_ip(&dynamic("web/0", &net), subnet).unwrap(),
            Some(ip("192.168.0.0"))
        );
        assert_eq!(
            repo.allocate_dynamic_ip(&dynamic("web/1", &net), subnet).unwrap(),
            Some(ip("192.168.0.1"))
        );
    }

    #[test]
    fn allocate_skips_restricted_addresses() {
        let repo = repo();
        let net = small_network("192.168.0.0/24", &["192.168.0.0", "192.168.0.1", "192.168.0.3"]);
        let subnet = &net.subnets[0];
        assert_eq!(
            repo.allocate_dynamic_ip(&dynamic("web/0", &net), subnet).unwrap(),
            Some(ip("192.168.0.2"))
        );
        assert_eq!(
            repo.allocate_dynamic_ip(&dynamic("web/1", &net), subnet).unwrap(),
            Some(ip("192.168.0.4"))
        );
    }

    #[test]
    fn slash_29_yields_exactly_eight_addresses() {
        let repo = repo();
        let net = small_network("10.10.0.0/29", &[]);
        let subnet = &net.subnets[0];
        let mut seen = BTreeSet::new();
        for i in 0..8 {
            let got = repo
                .allocate_dynamic_ip(&dynamic(&format!("web/{i}"), &net), subnet)
                .unwrap()
                .unwrap();
            assert!(seen.insert(got), "address {got} handed out twice");
        }
        assert_eq!(repo.allocate_dynamic_ip(&dynamic("web/8", &net), subnet).unwrap(), None);
    }

    #[test]
    fn release_then_reallocate_from_exhausted_range() {
        let repo = repo();
        let net = small_network("10.10.0.0/30", &[]);
        let subnet = &net.subnets[0];
        for i in 0..4 {
            repo.allocate_dynamic_ip(&dynamic(&format!("web/{i}"), &net), subnet).unwrap();
        }
        repo.delete(ip("10.10.0.2"), &net).unwrap();

        assert_eq!(
            repo.allocate_dynamic_ip(&dynamic("web/9", &net), subnet).unwrap(),
            Some(ip("10.10.0.2"))
        );
        assert_eq!(repo.allocate_dynamic_ip(&dynamic("web/10", &net), subnet).unwrap(), None);
    }

    #[test]
    fn released_address_preferred_over_untouched_ones() {
        let repo = repo();
        let net = small_network("10.10.0.0/24", &[]);
        let subnet = &net.subnets[0];
        for i in 0..3 {
            repo.allocate_dynamic_ip(&dynamic(&format!("web/{i}"), &net), subnet).unwrap();
        }
        repo.delete(ip("10.10.0.1"), &net).unwrap();
        repo.delete(ip("10.10.0.0"), &net).unwrap();

        let first = repo.allocate_dynamic_ip(&dynamic("web/3", &net), subnet).unwrap();
        let second = repo.allocate_dynamic_ip(&dynamic("web/4", &net), subnet).unwrap();
        let third = repo.allocate_dynamic_ip(&dynamic("web/5", &net), subnet).unwrap();
        assert_eq!(first, Some(ip("10.10.0.1")));
        assert_eq!(second, Some(ip("10.10.0.0")));
        assert_eq!(third, Some(ip("10.10.0.3")));
    }

    #[test]
    fn allocation_never_returns_reserved_or_static() {
        let repo = repo();
        let net = network();
        let subnet = &net.subnets[0];
        let mut count = 0;
        while let Some(addr) = repo
            .allocate_dynamic_ip(&dynamic(&format!("web/{count}"), &net), subnet)
            .unwrap()
        {
            assert!(!subnet.is_reserved(addr));
            assert!(!subnet.is_static(addr));
            count += 1;
        }
        assert_eq!(count, 256 - 8 - 5);
    }

    #[test]
    fn delete_outside_pools_fails() {
        let repo = repo();
        let err = repo.delete(ip("192.168.1.3"), &network()).unwrap_err();
        assert!(matches!(err, IpamError::IpNotOwned { .. }));
        let err = repo.delete(ip("10.0.0.1"), &network()).unwrap_err();
        assert!(matches!(err, IpamError::IpNotOwned { .. }));
    }

    #[test]
    fn delete_missing_entry_is_ok() {
        let repo = repo();
        repo.delete(ip("192.168.1.50"), &network()).unwrap();
    }

    #[test]
    fn vip_allocation_walks_the_list() {
        let repo = repo();
        let subnet = Subnet::vip(strata_core::AddressSet::parse(&["69.69.69.69", "69.69.69.70"]).unwrap());
        let net = std::sync::Arc::new(Network::new("public", strata_core::NetworkKind::Vip, vec![subnet]).unwrap());
        let subnet = &net.subnets[0];
        let first = repo.allocate_vip_ip(&dynamic("web/0", &net), subnet).unwrap();
        let second = repo.allocate_vip_ip(&dynamic("web/1", &net), subnet).unwrap();
        let third = repo.allocate_vip_ip(&dynamic("web/2", &net), subnet).unwrap();
        assert_eq!(first, Some(ip("69.69.69.69")));
        assert_eq!(second, Some(ip("69.69.69.70")));
        assert_eq!(third, None);
    }
}
