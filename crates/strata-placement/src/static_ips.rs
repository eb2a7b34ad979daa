//! Per-group map of declared static addresses to their candidate AZs.

use std::net::IpAddr;

use tracing::debug;

use crate::brute_force::BruteForceIpAllocation;
use crate::error::{PlacementError, PlacementResult};
use crate::plan::JobNetwork;

/// One declared static address and the AZs it may land in.
///
/// `None` inside `az_names` stands for "unconstrained" in a group that
/// declares no AZs. A single entry means the AZ is fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIpToAzs {
    pub ip: IpAddr,
    pub az_names: Vec<Option<String>>,
    /// Taken by an instance plan during this pass.
    pub claimed: bool,
    subnet_az_names: Vec<String>,
}

impl StaticIpToAzs {
    pub fn is_fixed(&self) -> bool {
        self.az_names.len() == 1
    }

    pub fn is_ambiguous(&self) -> bool {
        self.az_names.len() > 1
    }

    pub fn allows(&self, az: Option<&str>) -> bool {
        self.az_names.iter().any(|name| name.as_deref() == az)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkStaticIps {
    pub name: String,
    pub ips: Vec<StaticIpToAzs>,
}

/// Static addresses of every static network of a group, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworksToStaticIps {
    networks: Vec<NetworkStaticIps>,
}

impl NetworksToStaticIps {
    /// Resolve each declared static address to its subnet and intersect the
    /// subnet's AZs with the group's desired AZs.
    pub fn create(job_networks: &[JobNetwork], desired_azs: &[String], group: &str) -> PlacementResult<Self> {
        let mut networks = Vec::new();
        for job_network in job_networks.iter().filter(|jn| jn.is_static()) {
            let mut ips = Vec::with_capacity(job_network.static_ips.len());
            for &ip in &job_network.static_ips {
                let subnet = job_network.network.subnet_containing(ip).ok_or_else(|| {
                    PlacementError::StaticIpNotInSubnet {
                        group: group.to_string(),
                        network: job_network.name().to_string(),
                        address: ip,
                    }
                })?;
                let az_names = if desired_azs.is_empty() {
                    vec![None]
                } else if !subnet.is_az_restricted() {
                    desired_azs.iter().cloned().map(Some).collect()
                } else {
                    subnet
                        .az_names
                        .iter()
                        .filter(|name| desired_azs.contains(name))
                        .cloned()
                        .map(Some)
                        .collect()
                };
                ips.push(StaticIpToAzs {
                    ip,
                    az_names,
                    claimed: false,
                    subnet_az_names: subnet.az_names.clone(),
                });
            }
            networks.push(NetworkStaticIps {
                name: job_network.name().to_string(),
                ips,
            });
        }
        Ok(Self { networks })
    }

    pub fn networks(&self) -> &[NetworkStaticIps] {
        &self.networks
    }

    /// A group without AZs cannot use subnets that are pinned to AZs.
    pub fn validate_azs_declared(&self, desired_azs: &[String], group: &str) -> PlacementResult<()> {
        if !desired_azs.is_empty() {
            return Ok(());
        }
        for network in &self.networks {
            if network.ips.iter().any(|entry| !entry.subnet_az_names.is_empty()) {
                return Err(PlacementError::InvalidAvailabilityZone {
                    group: group.to_string(),
                    network: network.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Every static address must be reachable from at least one desired AZ.
    pub fn validate_ips_in_desired_azs(&self, desired_azs: &[String], group: &str) -> PlacementResult<()> {
        if desired_azs.is_empty() {
            return Ok(());
        }
        for network in &self.networks {
            if let Some(entry) = network.ips.iter().find(|entry| entry.az_names.is_empty()) {
                return Err(PlacementError::StaticIpsFromInvalidAvailabilityZone {
                    group: group.to_string(),
                    address: entry.ip,
                });
            }
        }
        Ok(())
    }

    fn network(&self, name: &str) -> Option<&NetworkStaticIps> {
        self.networks.iter().find(|network| network.name == name)
    }

    fn entry_mut(&mut self, network: &str, ip: IpAddr) -> Option<&mut StaticIpToAzs> {
        self.networks
            .iter_mut()
            .find(|n| n.name == network)?
            .ips
            .iter_mut()
            .find(|entry| entry.ip == ip)
    }

    pub fn find_by_network_and_ip(&self, network: &str, ip: IpAddr) -> Option<&StaticIpToAzs> {
        self.network(network)?.ips.iter().find(|entry| entry.ip == ip)
    }

    /// First unclaimed address usable in `az`, preferring addresses pinned
    /// to that AZ alone over ones that could still go elsewhere.
    pub fn find_by_network_and_az(&self, network: &str, az: Option<&str>) -> Option<&StaticIpToAzs> {
        let network = self.network(network)?;
        let mut usable = network
            .ips
            .iter()
            .filter(|entry| !entry.claimed && entry.allows(az));
        let first = usable.clone().find(|entry| entry.is_fixed());
        first.or_else(|| usable.next())
    }

    /// First unclaimed address of a network.
    pub fn next_ip_for_network(&self, network: &str) -> Option<&StaticIpToAzs> {
        self.network(network)?.ips.iter().find(|entry| !entry.claimed)
    }

    /// Pin `ip` to `az` and mark it taken.
    pub fn claim_in_az(&mut self, network: &str, ip: IpAddr, az: Option<&str>) {
        if let Some(entry) = self.entry_mut(network, ip) {
            entry.az_names = vec![az.map(str::to_string)];
            entry.claimed = true;
            debug!(%network, address = %ip, az = ?az, "static ip claimed");
        }
    }

    /// Drop an address from the distribution entirely.
    pub fn delete(&mut self, network: &str, ip: IpAddr) {
        if let Some(n) = self.networks.iter_mut().find(|n| n.name == network) {
            n.ips.retain(|entry| entry.ip != ip);
        }
    }

    /// Fix every ambiguous address to one AZ so that all networks end up
    /// with identical per-AZ counts.
    pub fn distribute_evenly_per_zone(&mut self, group: &str) -> PlacementResult<()> {
        let solution = BruteForceIpAllocation::new(self.networks.clone())
            .run()
            .ok_or_else(|| PlacementError::NoSolution {
                group: group.to_string(),
            })?;
        self.networks = solution;
        Ok(())
    }
}
