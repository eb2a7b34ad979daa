//! Numeric address form and merged address sets.
//!
//! Addresses are compared and stored as `u128` values: IPv4 addresses map
//! onto their 32-bit value, IPv6 addresses onto their full 128-bit value.
//! An [`AddressSet`] always holds addresses of a single [`Family`], so the
//! numeric form is unambiguous inside one set.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Address family of an address, range, or set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::V4 => f.write_str("IPv4"),
            Family::V6 => f.write_str("IPv6"),
        }
    }
}

/// Totally-ordered numeric form of an address.
pub fn to_numeric(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Inverse of [`to_numeric`]. IPv4 values above `u32::MAX` are truncated.
pub fn from_numeric(value: u128, family: Family) -> IpAddr {
    match family {
        Family::V4 => IpAddr::V4(Ipv4Addr::from(value as u32)),
        Family::V6 => IpAddr::V6(Ipv6Addr::from(value)),
    }
}

/// Parse a single address, tolerating a `/32` or `/128` host suffix.
pub fn parse_address(input: &str) -> CoreResult<IpAddr> {
    let trimmed = input.trim();
    let host = match trimmed.split_once('/') {
        Some((host, "32")) | Some((host, "128")) => host,
        Some(_) => return Err(CoreError::InvalidAddress(trimmed.to_string())),
        None => trimmed,
    };
    host.parse()
        .map_err(|_| CoreError::InvalidAddress(trimmed.to_string()))
}

/// A sorted set of addresses of one family, stored as merged inclusive ranges.
///
/// Overlapping or adjacent ranges collapse into one, so a `/28` declared
/// alongside a `/30` inside it is stored once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSet {
    family: Option<Family>,
    ranges: Vec<(u128, u128)>,
}

impl AddressSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from individual addresses.
    pub fn from_addresses<I>(addresses: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = IpAddr>,
    {
        let mut set = Self::new();
        for ip in addresses {
            set.insert(ip)?;
        }
        Ok(set)
    }

    /// Parse entries of the form `10.0.0.5`, `10.0.0.5 - 10.0.0.9` or `10.0.0.0/30`.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> CoreResult<Self> {
        let mut set = Self::new();
        for entry in entries {
            set.insert_entry(entry.as_ref())?;
        }
        Ok(set)
    }

    fn insert_entry(&mut self, entry: &str) -> CoreResult<()> {
        let entry = entry.trim();
        if let Some((start, end)) = entry.split_once('-') {
            let start = parse_address(start)?;
            let end = parse_address(end)?;
            return self.insert_range(start, end).map_err(|e| match e {
                CoreError::InvalidRange { reason, .. } => CoreError::InvalidRange {
                    range: entry.to_string(),
                    reason,
                },
                other => other,
            });
        }
        if entry.contains('/') {
            if let Ok(ip) = parse_address(entry) {
                return self.insert(ip);
            }
            let net: IpNet = entry.parse().map_err(|_| CoreError::InvalidRange {
                range: entry.to_string(),
                reason: "not a CIDR block".to_string(),
            })?;
            return self.insert_net(net);
        }
        self.insert(parse_address(entry)?)
    }

    pub fn insert(&mut self, ip: IpAddr) -> CoreResult<()> {
        self.insert_range(ip, ip)
    }

    /// Insert every address of a CIDR block, network and broadcast included.
    pub fn insert_net(&mut self, net: IpNet) -> CoreResult<()> {
        self.insert_range(net.network(), net.broadcast())
    }

    /// Insert the inclusive range `start..=end`.
    pub fn insert_range(&mut self, start: IpAddr, end: IpAddr) -> CoreResult<()> {
        let family = Family::of(start);
        if Family::of(end) != family {
            return Err(CoreError::InvalidRange {
                range: format!("{start} - {end}"),
                reason: "mixed address families".to_string(),
            });
        }
        self.check_family(family, start)?;
        let (lo, hi) = (to_numeric(start), to_numeric(end));
        if lo > hi {
            return Err(CoreError::InvalidRange {
                range: format!("{start} - {end}"),
                reason: "range start is after range end".to_string(),
            });
        }
        self.family = Some(family);
        self.ranges.push((lo, hi));
        self.normalize();
        Ok(())
    }

    fn check_family(&self, family: Family, ip: IpAddr) -> CoreResult<()> {
        match self.family {
            Some(existing) if existing != family => Err(CoreError::InvalidRange {
                range: ip.to_string(),
                reason: format!("expected an {existing} address"),
            }),
            _ => Ok(()),
        }
    }

    fn normalize(&mut self) {
        self.ranges.sort_unstable();
        let mut merged: Vec<(u128, u128)> = Vec::with_capacity(self.ranges.len());
        for &(lo, hi) in &self.ranges {
            match merged.last_mut() {
                Some(last) if lo <= last.1.saturating_add(1) => last.1 = last.1.max(hi),
                _ => merged.push((lo, hi)),
            }
        }
        self.ranges = merged;
    }

    pub fn family(&self) -> Option<Family> {
        self.family
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of addresses in the set (saturating for huge IPv6 sets).
    pub fn len(&self) -> u128 {
        self.ranges
            .iter()
            .fold(0u128, |acc, &(lo, hi)| acc.saturating_add(hi - lo).saturating_add(1))
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.family == Some(Family::of(ip)) && self.contains_numeric(to_numeric(ip))
    }

    /// Membership test on the numeric form; the caller guarantees the family.
    pub fn contains_numeric(&self, value: u128) -> bool {
        self.range_containing(value).is_some()
    }

    /// The merged range holding `value`, if any.
    pub fn range_containing(&self, value: u128) -> Option<(u128, u128)> {
        let idx = self.ranges.partition_point(|&(_, hi)| hi < value);
        self.ranges
            .get(idx)
            .copied()
            .filter(|&(lo, _)| lo <= value)
    }

    /// Lowest and highest numeric members.
    pub fn bounds(&self) -> Option<(u128, u128)> {
        Some((self.ranges.first()?.0, self.ranges.last()?.1))
    }

    pub fn is_disjoint(&self, other: &AddressSet) -> bool {
        if self.family != other.family {
            return true;
        }
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let (a_lo, a_hi) = self.ranges[i];
            let (b_lo, b_hi) = other.ranges[j];
            if a_lo <= b_hi && b_lo <= a_hi {
                return false;
            }
            if a_hi < b_hi {
                i += 1;
            } else {
                j += 1;
            }
        }
        true
    }

    /// Addresses in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = IpAddr> + '_ {
        let family = self.family.unwrap_or(Family::V4);
        self.ranges
            .iter()
            .flat_map(|&(lo, hi)| RangeIter { next: Some(lo), hi })
            .map(move |value| from_numeric(value, family))
    }
}

struct RangeIter {
    next: Option<u128>,
    hi: u128,
}

impl Iterator for RangeIter {
    type Item = u128;

    fn next(&mut self) -> Option<u128> {
        let current = self.next?;
        self.next = if current < self.hi { Some(current + 1) } else { None };
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn numeric_form_orders_addresses() {
        assert!(to_numeric(ip("192.168.1.2")) < to_numeric(ip("192.168.1.10")));
        assert_eq!(from_numeric(to_numeric(ip("10.0.0.7")), Family::V4), ip("10.0.0.7"));
        assert_eq!(from_numeric(to_numeric(ip("fd00::1")), Family::V6), ip("fd00::1"));
    }

    #[test]
    fn parse_accepts_single_ranges_and_cidr() {
        let set = AddressSet::parse(&["10.0.0.1", "10.0.0.5 - 10.0.0.7", "10.0.1.0/30"]).unwrap();
        assert_eq!(set.len(), 1 + 3 + 4);
        assert!(set.contains(ip("10.0.0.6")));
        assert!(set.contains(ip("10.0.1.3")));
        assert!(!set.contains(ip("10.0.0.4")));
    }

    #[test]
    fn host_suffix_is_a_single_address() {
        let set = AddressSet::parse(&["10.0.11.32/32"]).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn overlapping_blocks_collapse() {
        let set = AddressSet::parse(&[
            "192.168.1.0 - 192.168.1.15",
            "192.168.1.0 - 192.168.1.3",
            "192.168.1.4 - 192.168.1.7",
            "192.168.1.8",
        ])
        .unwrap();
        assert_eq!(set.len(), 16);
        assert_eq!(
            set.range_containing(to_numeric(ip("192.168.1.9"))),
            Some((to_numeric(ip("192.168.1.0")), to_numeric(ip("192.168.1.15"))))
        );
    }

    #[test]
    fn adjacent_ranges_merge() {
        let set = AddressSet::parse(&["10.0.0.0 - 10.0.0.3", "10.0.0.4 - 10.0.0.7"]).unwrap();
        assert_eq!(set.bounds(), Some((to_numeric(ip("10.0.0.0")), to_numeric(ip("10.0.0.7")))));
        assert_eq!(set.iter().count(), 8);
    }

    #[test]
    fn reversed_range_is_rejected() {
        let err = AddressSet::parse(&["10.0.0.9 - 10.0.0.1"]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidRange { .. }));
    }

    #[test]
    fn mixed_families_are_rejected() {
        let mut set = AddressSet::parse(&["10.0.0.1"]).unwrap();
        assert!(set.insert(ip("fd00::1")).is_err());
    }

    #[test]
    fn disjoint_detection() {
        let a = AddressSet::parse(&["10.0.0.1 - 10.0.0.5"]).unwrap();
        let b = AddressSet::parse(&["10.0.0.6 - 10.0.0.9"]).unwrap();
        let c = AddressSet::parse(&["10.0.0.5"]).unwrap();
        assert!(a.is_disjoint(&b));
        assert!(!a.is_disjoint(&c));
    }

    #[test]
    fn iter_is_ascending() {
        let set = AddressSet::from_addresses([ip("10.0.0.9"), ip("10.0.0.2"), ip("10.0.0.3")]).unwrap();
        let all: Vec<IpAddr> = set.iter().collect();
        assert_eq!(all, vec![ip("10.0.0.2"), ip("10.0.0.3"), ip("10.0.0.9")]);
    }
}
