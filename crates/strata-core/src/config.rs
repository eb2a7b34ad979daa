//! strata.toml configuration parser.
//!
//! A config file describes the AZs and networks of a deployment, one
//! instance group with its network declarations, and the existing
//! instances of that group as recorded by the previous deploy.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::address::{AddressSet, Family, parse_address};
use crate::error::{CoreError, CoreResult};
use crate::network::{AvailabilityZone, Network, NetworkKind, Subnet};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrataConfig {
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub azs: Vec<AzConfig>,
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
    pub instance_group: Option<InstanceGroupConfig>,
    #[serde(default)]
    pub existing: Vec<ExistingInstanceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Recorded as the owning task on every repository entry.
    #[serde(default = "default_task_id")]
    pub task_id: String,
    #[serde(default)]
    pub tie_strategy: TieStrategyName,
    /// Attempts `add` makes before surfacing a store conflict.
    #[serde(default = "default_max_add_attempts")]
    pub max_add_attempts: u32,
}

fn default_task_id() -> String {
    "local".to_string()
}

fn default_max_add_attempts() -> u32 {
    5
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            task_id: default_task_id(),
            tie_strategy: TieStrategyName::default(),
            max_add_attempts: default_max_add_attempts(),
        }
    }
}

/// Tie-break used when several AZs carry the same load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TieStrategyName {
    /// Lexically smallest AZ name; reproducible.
    Min,
    /// Uniform random among the tied AZs.
    #[default]
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzConfig {
    pub name: String,
    pub cloud_properties: Option<toml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: NetworkKind,
    #[serde(default)]
    pub subnets: Vec<SubnetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubnetConfig {
    pub range: Option<String>,
    pub gateway: Option<String>,
    pub dns: Option<Vec<String>>,
    pub reserved: Option<Vec<String>>,
    #[serde(rename = "static")]
    pub static_ips: Option<Vec<String>>,
    pub azs: Option<Vec<String>>,
    pub az: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceGroupConfig {
    pub name: String,
    pub instances: u32,
    pub azs: Option<Vec<String>>,
    #[serde(default)]
    pub networks: Vec<GroupNetworkConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupNetworkConfig {
    pub name: String,
    pub static_ips: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExistingInstanceConfig {
    pub id: String,
    pub index: u32,
    pub az: Option<String>,
    #[serde(default)]
    pub ignore: bool,
    #[serde(default)]
    pub ips: Vec<ExistingIpConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExistingIpConfig {
    pub network: String,
    pub address: String,
}

impl StrataConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StrataConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a config with one manual network and a static instance group.
    pub fn scaffold(group: &str, instances: u32) -> Self {
        StrataConfig {
            planner: PlannerConfig::default(),
            azs: vec![
                AzConfig { name: "z1".to_string(), cloud_properties: None },
                AzConfig { name: "z2".to_string(), cloud_properties: None },
            ],
            networks: vec![NetworkConfig {
                name: "default".to_string(),
                kind: NetworkKind::Manual,
                subnets: vec![
                    SubnetConfig {
                        range: Some("10.0.1.0/24".to_string()),
                        gateway: Some("10.0.1.1".to_string()),
                        dns: Some(vec!["8.8.8.8".to_string()]),
                        reserved: Some(vec!["10.0.1.2 - 10.0.1.9".to_string()]),
                        static_ips: Some(vec!["10.0.1.10 - 10.0.1.19".to_string()]),
                        azs: Some(vec!["z1".to_string()]),
                        az: None,
                    },
                    SubnetConfig {
                        range: Some("10.0.2.0/24".to_string()),
                        gateway: Some("10.0.2.1".to_string()),
                        dns: Some(vec!["8.8.8.8".to_string()]),
                        reserved: Some(vec!["10.0.2.2 - 10.0.2.9".to_string()]),
                        static_ips: Some(vec!["10.0.2.10 - 10.0.2.19".to_string()]),
                        azs: Some(vec!["z2".to_string()]),
                        az: None,
                    },
                ],
            }],
            instance_group: Some(InstanceGroupConfig {
                name: group.to_string(),
                instances,
                azs: Some(vec!["z1".to_string(), "z2".to_string()]),
                networks: vec![GroupNetworkConfig {
                    name: "default".to_string(),
                    static_ips: Some(vec!["10.0.1.10 - 10.0.1.11".to_string(), "10.0.2.10 - 10.0.2.11".to_string()]),
                }],
            }),
            existing: Vec::new(),
        }
    }

    pub fn availability_zones(&self) -> Vec<AvailabilityZone> {
        self.azs
            .iter()
            .map(|az| AvailabilityZone {
                name: az.name.clone(),
                cloud_properties: az
                    .cloud_properties
                    .as_ref()
                    .and_then(|props| serde_json::to_value(props).ok())
                    .unwrap_or(serde_json::Value::Null),
            })
            .collect()
    }

    /// Build and validate every declared network.
    pub fn build_networks(&self) -> CoreResult<Vec<Network>> {
        self.networks.iter().map(NetworkConfig::build).collect()
    }
}

impl NetworkConfig {
    pub fn build(&self) -> CoreResult<Network> {
        let subnets = self
            .subnets
            .iter()
            .map(|subnet| subnet.build(self.kind))
            .collect::<CoreResult<Vec<_>>>()?;
        Network::new(self.name.clone(), self.kind, subnets)
    }
}

impl SubnetConfig {
    fn az_names(&self) -> Vec<String> {
        match (&self.azs, &self.az) {
            (Some(azs), _) => azs.clone(),
            (None, Some(az)) => vec![az.clone()],
            (None, None) => Vec::new(),
        }
    }

    /// Convert to a [`Subnet`]. Manual subnets reserve their network,
    /// gateway and (IPv4) broadcast addresses.
    pub fn build(&self, kind: NetworkKind) -> CoreResult<Subnet> {
        let static_ips = AddressSet::parse(self.static_ips.as_deref().unwrap_or_default())?;
        if kind == NetworkKind::Vip {
            return Ok(Subnet::vip(static_ips).with_azs(self.az_names()));
        }

        let range_str = self.range.as_deref().ok_or_else(|| CoreError::InvalidSubnet {
            range: "<missing>".to_string(),
            reason: "manual subnets require a range".to_string(),
        })?;
        let range: ipnet::IpNet = range_str.trim().parse().map_err(|_| CoreError::InvalidSubnet {
            range: range_str.to_string(),
            reason: "not a CIDR block".to_string(),
        })?;

        let mut reserved = AddressSet::parse(self.reserved.as_deref().unwrap_or_default())?;
        reserved.insert(range.network())?;
        if Family::of(range.network()) == Family::V4 {
            reserved.insert(range.broadcast())?;
        }

        let mut subnet = Subnet::new(range)
            .with_static(static_ips)
            .with_azs(self.az_names());
        if let Some(gateway) = &self.gateway {
            let gateway = parse_address(gateway)?;
            reserved.insert(gateway)?;
            subnet = subnet.with_gateway(gateway);
        }
        let dns = self
            .dns
            .iter()
            .flatten()
            .map(|entry| parse_address(entry))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(subnet.with_dns(dns).with_reserved(reserved))
    }
}
