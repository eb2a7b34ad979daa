//! Conversions from `strata.toml` sections to placement inputs.

use std::collections::BTreeMap;
use std::sync::Arc;

use strata_core::config::{ExistingInstanceConfig, InstanceGroupConfig};
use strata_core::{AddressSet, Network, StrataConfig, TieStrategyName, parse_address};

use crate::balancer::{MinWins, RandomWins, TieStrategy};
use crate::error::{PlacementError, PlacementResult};
use crate::picker::StaticIpsAvailabilityZonePicker;
use crate::plan::{DesiredInstance, ExistingInstance, ExistingIp, JobNetwork};

/// Everything a placement pass needs for one instance group.
#[derive(Debug, Clone)]
pub struct GroupInput {
    pub group: String,
    pub job_networks: Vec<JobNetwork>,
    pub desired_azs: Vec<String>,
    pub desired: Vec<DesiredInstance>,
    pub existing: Vec<ExistingInstance>,
}

impl GroupInput {
    /// Resolve `group` against the built networks and declared AZs of `config`.
    pub fn from_config(
        config: &StrataConfig,
        group: &InstanceGroupConfig,
        networks: &BTreeMap<String, Arc<Network>>,
    ) -> PlacementResult<Self> {
        let desired_azs = group.azs.clone().unwrap_or_default();
        for az in &desired_azs {
            if !config.azs.iter().any(|known| &known.name == az) {
                return Err(PlacementError::UnknownAvailabilityZone {
                    group: group.name.clone(),
                    az: az.clone(),
                });
            }
        }

        let instances = group.instances as usize;
        let mut job_networks = Vec::with_capacity(group.networks.len());
        for declared in &group.networks {
            let network = networks
                .get(&declared.name)
                .cloned()
                .ok_or_else(|| PlacementError::UnknownNetwork(declared.name.clone()))?;
            let static_ips: Vec<_> = AddressSet::parse(declared.static_ips.as_deref().unwrap_or_default())?
                .iter()
                .collect();
            if !static_ips.is_empty() && static_ips.len() != instances {
                return Err(PlacementError::StaticIpCountMismatch {
                    group: group.name.clone(),
                    network: declared.name.clone(),
                    instances,
                    declared: static_ips.len(),
                });
            }
            job_networks.push(JobNetwork::with_static(network, static_ips));
        }

        let existing = config
            .existing
            .iter()
            .map(existing_instance)
            .collect::<PlacementResult<Vec<_>>>()?;

        Ok(Self {
            group: group.name.clone(),
            job_networks,
            desired_azs,
            desired: (0..group.instances).map(DesiredInstance::new).collect(),
            existing,
        })
    }

    pub fn picker(&self, tie: Box<dyn TieStrategy + Send>) -> PlacementResult<StaticIpsAvailabilityZonePicker> {
        StaticIpsAvailabilityZonePicker::new(
            self.group.clone(),
            self.job_networks.clone(),
            self.desired_azs.clone(),
            tie,
        )
    }
}

fn existing_instance(config: &ExistingInstanceConfig) -> PlacementResult<ExistingInstance> {
    let ip_addresses = config
        .ips
        .iter()
        .map(|ip| {
            Ok(ExistingIp {
                network_name: ip.network.clone(),
                address: parse_address(&ip.address)?,
            })
        })
        .collect::<PlacementResult<Vec<_>>>()?;
    Ok(ExistingInstance {
        id: config.id.clone(),
        index: config.index,
        az: config.az.clone(),
        ip_addresses,
        ignore: config.ignore,
    })
}

/// Tie-break strategy named in the `[planner]` section.
pub fn tie_strategy(name: TieStrategyName) -> Box<dyn TieStrategy + Send> {
    match name {
        TieStrategyName::Min => Box::new(MinWins),
        TieStrategyName::Random => Box::new(RandomWins::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[[azs]]
name = "z1"

[[azs]]
name = "z2"

[[networks]]
name = "a"

[[networks.subnets]]
range = "10.0.1.0/24"
static = ["10.0.1.10 - 10.0.1.20"]
azs = ["z1"]

[[networks.subnets]]
range = "10.0.2.0/24"
static = ["10.0.2.10 - 10.0.2.20"]
azs = ["z2"]

[instance_group]
name = "web"
instances = 2
azs = ["z1", "z2"]

[[instance_group.networks]]
name = "a"
static_ips = ["10.0.2.10", "10.0.1.10"]

[[existing]]
id = "web/abc"
index = 0
az = "z1"
ips = [{ network = "a", address = "10.0.1.10" }]
"#;

    fn load(toml_str: &str) -> (StrataConfig, BTreeMap<String, Arc<Network>>) {
        let config: StrataConfig = toml::from_str(toml_str).unwrap();
        let networks = config
            .build_networks()
            .unwrap()
            .into_iter()
            .map(|network| (network.name.clone(), Arc::new(network)))
            .collect();
        (config, networks)
    }

    #[test]
    fn builds_group_input() {
        let (config, networks) = load(CONFIG);
        let group = config.instance_group.clone().unwrap();
        let input = GroupInput::from_config(&config, &group, &networks).unwrap();

        assert_eq!(input.group, "web");
        assert_eq!(input.desired.len(), 2);
        assert_eq!(input.desired_azs, vec!["z1".to_string(), "z2".to_string()]);
        // Sorted ascending regardless of declaration order.
        assert_eq!(
            input.job_networks[0].static_ips,
            vec!["10.0.1.10".parse::<std::net::IpAddr>().unwrap(), "10.0.2.10".parse().unwrap()]
        );
        assert_eq!(input.existing[0].ip_addresses[0].network_name, "a");

        let mut picker = input.picker(tie_strategy(TieStrategyName::Min)).unwrap();
        let plans = picker
            .place_and_match_in(input.desired.clone(), input.existing.clone())
            .unwrap();
        assert_eq!(plans.len(), 2);
    }

    #[test]
    fn static_ip_count_must_match_instances() {
        let (config, networks) = load(CONFIG);
        let mut group = config.instance_group.clone().unwrap();
        group.instances = 3;
        let err = GroupInput::from_config(&config, &group, &networks).unwrap_err();
        assert!(matches!(err, PlacementError::StaticIpCountMismatch { declared: 2, instances: 3, .. }));
    }

    #[test]
    fn unknown_az_is_rejected() {
        let (config, networks) = load(CONFIG);
        let mut group = config.instance_group.clone().unwrap();
        group.azs = Some(vec!["z9".to_string()]);
        let err = GroupInput::from_config(&config, &group, &networks).unwrap_err();
        assert!(matches!(err, PlacementError::UnknownAvailabilityZone { .. }));
    }

    #[test]
    fn unknown_network_is_rejected() {
        let (config, _) = load(CONFIG);
        let group = config.instance_group.clone().unwrap();
        let err = GroupInput::from_config(&config, &group, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, PlacementError::UnknownNetwork(name) if name == "a"));
    }
}
