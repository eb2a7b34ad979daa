//! Depth-first search fixing ambiguous static addresses to one AZ each.
//!
//! A solution gives every network the same per-AZ address counts, so the
//! i-th instance lands in the same AZ on every network. The first
//! consistent assignment found is accepted; it is not necessarily the most
//! balanced one.

use std::collections::BTreeMap;

use tracing::debug;

use crate::static_ips::NetworkStaticIps;

type AzCounts = BTreeMap<Option<String>, usize>;

pub struct BruteForceIpAllocation {
    networks: Vec<NetworkStaticIps>,
}

impl BruteForceIpAllocation {
    pub fn new(networks: Vec<NetworkStaticIps>) -> Self {
        Self { networks }
    }

    /// The networks with every address fixed, or `None` when no balanced
    /// assignment exists.
    pub fn run(self) -> Option<Vec<NetworkStaticIps>> {
        let ambiguous: usize = self
            .networks
            .iter()
            .map(|network| network.ips.iter().filter(|entry| entry.is_ambiguous()).count())
            .sum();
        debug!(networks = self.networks.len(), ambiguous, "distributing static ips");
        search(self.networks)
    }
}

/// Per-AZ counts of the addresses already pinned to a single AZ.
fn fixed_counts(network: &NetworkStaticIps) -> AzCounts {
    let mut counts = AzCounts::new();
    for entry in network.ips.iter().filter(|entry| entry.is_fixed()) {
        *counts.entry(entry.az_names[0].clone()).or_default() += 1;
    }
    counts
}

fn global_counts(networks: &[NetworkStaticIps]) -> AzCounts {
    let mut counts = AzCounts::new();
    for network in networks {
        for (az, count) in fixed_counts(network) {
            *counts.entry(az).or_default() += count;
        }
    }
    counts
}

fn consecutive_counts_match(networks: &[NetworkStaticIps]) -> bool {
    networks
        .windows(2)
        .all(|pair| fixed_counts(&pair[0]) == fixed_counts(&pair[1]))
}

fn exceeds(partial: &AzCounts, target: &AzCounts) -> bool {
    partial
        .iter()
        .any(|(az, count)| *count > target.get(az).copied().unwrap_or(0))
}

/// Each branch works on its own copy of the state.
fn search(state: Vec<NetworkStaticIps>) -> Option<Vec<NetworkStaticIps>> {
    let next = state.iter().enumerate().find_map(|(n, network)| {
        network
            .ips
            .iter()
            .position(|entry| entry.is_ambiguous())
            .map(|i| (n, i))
    });

    let Some((n, i)) = next else {
        return consecutive_counts_match(&state).then_some(state);
    };

    // Networks before `n` are final and must already agree.
    if !consecutive_counts_match(&state[..n]) {
        return None;
    }
    if n > 0 && exceeds(&fixed_counts(&state[n]), &fixed_counts(&state[n - 1])) {
        return None;
    }

    let global = global_counts(&state);
    let mut candidates = state[n].ips[i].az_names.clone();
    candidates.sort_by_key(|az| global.get(az).copied().unwrap_or(0));

    for az in candidates {
        let mut branch = state.clone();
        branch[n].ips[i].az_names = vec![az];
        if let Some(solution) = search(branch) {
            return Some(solution);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::JobNetwork;
    use crate::static_ips::NetworksToStaticIps;
    use std::net::IpAddr;
    use std::sync::Arc;
    use strata_core::{AddressSet, Network, Subnet};

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn zones(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    /// One /24 per entry of `subnet_azs`, numbered 10.<net>.<k>.0.
    fn job_network(name: &str, net: u8, subnet_azs: &[&[&str]], static_ips: &[&str]) -> JobNetwork {
        let subnets = subnet_azs
            .iter()
            .enumerate()
            .map(|(k, azs)| {
                let range = format!("10.{net}.{k}.0/24").parse().unwrap();
                let statics = AddressSet::parse(&[format!("10.{net}.{k}.10 - 10.{net}.{k}.30")]).unwrap();
                Subnet::new(range).with_static(statics).with_azs(azs.iter().copied())
            })
            .collect();
        let network = Arc::new(Network::manual(name, subnets).unwrap());
        JobNetwork::with_static(network, static_ips.iter().map(|s| ip(s)).collect())
    }

    fn solve(job_networks: &[JobNetwork], desired: &[&str]) -> Option<Vec<NetworkStaticIps>> {
        let ips = NetworksToStaticIps::create(job_networks, &zones(desired), "web").unwrap();
        BruteForceIpAllocation::new(ips.networks().to_vec()).run()
    }

    fn assert_balanced(solution: &[NetworkStaticIps]) {
        for network in solution {
            assert!(network.ips.iter().all(|entry| entry.is_fixed()));
        }
        assert!(consecutive_counts_match(solution));
    }

    #[test]
    fn single_instance_follows_pinned_network() {
        let a = job_network("a", 1, &[&["z1"]], &["10.1.0.10"]);
        let b = job_network("b", 2, &[&["z1", "z2"]], &["10.2.0.10"]);
        let solution = solve(&[a, b], &["z1", "z2"]).unwrap();
        assert_balanced(&solution);
        assert_eq!(solution[1].ips[0].az_names, vec![Some("z1".to_string())]);
    }

    #[test]
    fn pinned_network_declared_last_still_constrains_earlier_ones() {
        let a = job_network("a", 1, &[&["z1", "z2"]], &["10.1.0.10", "10.1.0.11"]);
        let b = job_network("b", 2, &[&["z1"], &["z2"]], &["10.2.0.10", "10.2.1.10"]);
        let solution = solve(&[a, b], &["z1", "z2"]).unwrap();
        assert_balanced(&solution);
        let a_zones: Vec<_> = solution[0].ips.iter().map(|e| e.az_names[0].clone()).collect();
        assert!(a_zones.contains(&Some("z1".to_string())));
        assert!(a_zones.contains(&Some("z2".to_string())));
    }

    #[test]
    fn unambiguous_mismatch_has_no_solution() {
        let a = job_network("a", 1, &[&["z1"], &["z2"]], &["10.1.0.10", "10.1.1.10"]);
        let b = job_network("b", 2, &[&["z1"]], &["10.2.0.10", "10.2.0.11"]);
        assert!(solve(&[a, b], &["z1", "z2"]).is_none());
    }

    #[test]
    fn unambiguous_match_is_accepted_as_is() {
        let a = job_network("a", 1, &[&["z1"], &["z2"]], &["10.1.0.10", "10.1.1.10"]);
        let b = job_network("b", 2, &[&["z2"], &["z1"]], &["10.2.0.10", "10.2.1.10"]);
        let solution = solve(&[a, b], &["z1", "z2"]).unwrap();
        assert_balanced(&solution);
    }

    #[test]
    fn four_overlapping_networks_spread_one_per_zone() {
        let all = ["z1", "z2", "z3", "z4"];
        let nets = [
            job_network("a", 1, &[&["z1", "z2"], &["z3", "z4"]], &["10.1.0.10", "10.1.0.11", "10.1.1.10", "10.1.1.11"]),
            job_network("b", 2, &[&["z1"], &["z2", "z3", "z4"]], &["10.2.0.10", "10.2.1.10", "10.2.1.11", "10.2.1.12"]),
            job_network("c", 3, &[&["z1", "z2", "z3"], &["z4"]], &["10.3.0.10", "10.3.0.11", "10.3.0.12", "10.3.1.10"]),
            job_network("d", 4, &[&all[..]], &["10.4.0.10", "10.4.0.11", "10.4.0.12", "10.4.0.13"]),
        ];
        let solution = solve(&nets, &all).unwrap();
        assert_balanced(&solution);
        let counts = fixed_counts(&solution[0]);
        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|c| *c == 1));
    }

    #[test]
    fn single_network_always_resolves() {
        let a = job_network("a", 1, &[&["z1", "z2", "z3"]], &["10.1.0.10", "10.1.0.11", "10.1.0.12"]);
        let solution = solve(&[a], &["z1", "z2", "z3"]).unwrap();
        assert_balanced(&solution);
        assert_eq!(fixed_counts(&solution[0]).len(), 3);
    }
}
