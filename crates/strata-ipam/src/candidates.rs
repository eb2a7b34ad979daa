//! Free-address search shared by both repository variants.
//!
//! `taken` holds the numeric form of every address the caller must not
//! return: entries already in the repository plus candidates that lost a
//! race during this call.

use std::collections::BTreeSet;
use std::net::IpAddr;

use strata_core::{Subnet, from_numeric, to_numeric};

/// First free dynamic-pool address of `subnet`.
///
/// Released addresses still in the pool are handed out first, least
/// recently released first; otherwise the range is scanned upwards from
/// its first address, jumping over reserved and static blocks.
pub fn next_free_dynamic(subnet: &Subnet, taken: &BTreeSet<u128>, released: &[IpAddr]) -> Option<IpAddr> {
    let family = subnet.family()?;
    let (lo, hi) = subnet.numeric_bounds()?;

    if let Some(reused) = released
        .iter()
        .copied()
        .find(|ip| subnet.in_dynamic_pool(*ip) && !taken.contains(&to_numeric(*ip)))
    {
        return Some(reused);
    }

    let mut current = lo;
    while current <= hi {
        let blocked = subnet
            .reserved
            .range_containing(current)
            .or_else(|| subnet.static_ips.range_containing(current));
        match blocked {
            Some((_, end)) => current = end.checked_add(1)?,
            None if taken.contains(&current) => current = current.checked_add(1)?,
            None => return Some(from_numeric(current, family)),
        }
    }
    None
}

/// First address of a VIP subnet's list not yet taken.
pub fn next_free_vip(subnet: &Subnet, taken: &BTreeSet<u128>) -> Option<IpAddr> {
    subnet
        .static_ips
        .iter()
        .find(|ip| !taken.contains(&to_numeric(*ip)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::AddressSet;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn taken(addrs: &[&str]) -> BTreeSet<u128> {
        addrs.iter().map(|a| to_numeric(ip(a))).collect()
    }

    #[test]
    fn scan_starts_at_range_start() {
        let subnet = Subnet::new("192.168.0.0/24".parse().unwrap());
        assert_eq!(next_free_dynamic(&subnet, &taken(&[]), &[]), Some(ip("192.168.0.0")));
        assert_eq!(
            next_free_dynamic(&subnet, &taken(&["192.168.0.0"]), &[]),
            Some(ip("192.168.0.1"))
        );
    }

    #[test]
    fn scan_jumps_over_reserved_and_static_blocks() {
        let subnet = Subnet::new("192.168.1.0/24".parse().unwrap())
            .with_reserved(AddressSet::parse(&["192.168.1.0/28", "192.168.1.0 - 192.168.1.3"]).unwrap())
            .with_static(AddressSet::parse(&["192.168.1.16 - 192.168.1.20"]).unwrap());
        assert_eq!(next_free_dynamic(&subnet, &taken(&[]), &[]), Some(ip("192.168.1.21")));
    }

    #[test]
    fn released_addresses_are_reused_first() {
        let subnet = Subnet::new("192.168.1.0/24".parse().unwrap());
        let released = [ip("192.168.1.7"), ip("192.168.1.3")];
        assert_eq!(
            next_free_dynamic(&subnet, &taken(&["192.168.1.0"]), &released),
            Some(ip("192.168.1.7"))
        );
        assert_eq!(
            next_free_dynamic(&subnet, &taken(&["192.168.1.7"]), &released),
            Some(ip("192.168.1.3"))
        );
    }

    #[test]
    fn released_address_outside_pool_is_ignored() {
        let subnet = Subnet::new("192.168.1.0/24".parse().unwrap())
            .with_static(AddressSet::parse(&["192.168.1.7"]).unwrap());
        let released = [ip("192.168.1.7"), ip("10.0.0.1")];
        assert_eq!(next_free_dynamic(&subnet, &taken(&[]), &released), Some(ip("192.168.1.0")));
    }

    #[test]
    fn exhausted_range_returns_none() {
        let subnet = Subnet::new("10.0.0.0/30".parse().unwrap())
            .with_reserved(AddressSet::parse(&["10.0.0.0"]).unwrap());
        let all = taken(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        assert_eq!(next_free_dynamic(&subnet, &all, &[]), None);
    }

    #[test]
    fn top_of_ipv6_space_terminates() {
        let subnet = Subnet::new("ffff:ffff:ffff:ffff:ffff:ffff:ffff:fffe/127".parse().unwrap());
        let all = taken(&[
            "ffff:ffff:ffff:ffff:ffff:ffff:ffff:fffe",
            "ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff",
        ]);
        assert_eq!(next_free_dynamic(&subnet, &all, &[]), None);
    }

    #[test]
    fn vip_hands_out_listed_addresses_in_order() {
        let subnet = Subnet::vip(AddressSet::parse(&["69.69.69.69", "69.69.69.70"]).unwrap());
        assert_eq!(next_free_vip(&subnet, &taken(&[])), Some(ip("69.69.69.69")));
        assert_eq!(next_free_vip(&subnet, &taken(&["69.69.69.69"])), Some(ip("69.69.69.70")));
        assert_eq!(next_free_vip(&subnet, &taken(&["69.69.69.69", "69.69.69.70"])), None);
    }
}
