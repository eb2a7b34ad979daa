//! Networks, subnets and availability zones.

use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::address::{AddressSet, Family, to_numeric};
use crate::error::{CoreError, CoreResult};

/// A named fault-isolation domain. Opaque beyond its name for placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityZone {
    pub name: String,
    #[serde(default)]
    pub cloud_properties: serde_json::Value,
}

impl AvailabilityZone {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cloud_properties: serde_json::Value::Null,
        }
    }
}

/// How addresses on a network are handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NetworkKind {
    /// Subnets with CIDR ranges; addresses managed by the repository.
    #[default]
    Manual,
    /// Public addresses listed explicitly per subnet, no CIDR range.
    Vip,
    /// Addresses assigned by the infrastructure; nothing to allocate.
    Dynamic,
}

/// A contiguous address range plus gateway, reserved, static and AZ metadata.
///
/// VIP subnets carry no range; their static list is the whole pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subnet {
    pub range: Option<IpNet>,
    pub gateway: Option<IpAddr>,
    #[serde(default)]
    pub dns: Vec<IpAddr>,
    #[serde(default)]
    pub reserved: AddressSet,
    #[serde(default)]
    pub static_ips: AddressSet,
    /// Empty means the subnet is available in any AZ.
    #[serde(default)]
    pub az_names: Vec<String>,
}

impl Subnet {
    /// An unrestricted manual subnet covering `range`.
    pub fn new(range: IpNet) -> Self {
        Self {
            range: Some(range),
            gateway: None,
            dns: Vec::new(),
            reserved: AddressSet::new(),
            static_ips: AddressSet::new(),
            az_names: Vec::new(),
        }
    }

    /// A VIP subnet whose pool is exactly `static_ips`.
    pub fn vip(static_ips: AddressSet) -> Self {
        Self {
            range: None,
            gateway: None,
            dns: Vec::new(),
            reserved: AddressSet::new(),
            static_ips,
            az_names: Vec::new(),
        }
    }

    pub fn with_gateway(mut self, gateway: IpAddr) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_dns(mut self, dns: Vec<IpAddr>) -> Self {
        self.dns = dns;
        self
    }

    pub fn with_reserved(mut self, reserved: AddressSet) -> Self {
        self.reserved = reserved;
        self
    }

    pub fn with_static(mut self, static_ips: AddressSet) -> Self {
        self.static_ips = static_ips;
        self
    }

    pub fn with_azs<S: Into<String>>(mut self, azs: impl IntoIterator<Item = S>) -> Self {
        self.az_names = azs.into_iter().map(Into::into).collect();
        self
    }

    fn label(&self) -> String {
        match self.range {
            Some(range) => range.to_string(),
            None => "vip".to_string(),
        }
    }

    /// Check that static and reserved sets are disjoint subsets of the range.
    pub fn validate(&self) -> CoreResult<()> {
        let invalid = |reason: String| CoreError::InvalidSubnet {
            range: self.label(),
            reason,
        };
        if !self.static_ips.is_disjoint(&self.reserved) {
            return Err(invalid("static and reserved addresses overlap".to_string()));
        }
        let Some(range) = self.range else {
            return Ok(());
        };
        let family = Family::of(range.network());
        let (lo, hi) = self.numeric_bounds().unwrap_or((0, 0));
        for (name, set) in [("reserved", &self.reserved), ("static", &self.static_ips)] {
            if set.family().is_some_and(|f| f != family) {
                return Err(invalid(format!("{name} addresses are not {family}")));
            }
            if let Some((first, last)) = set.bounds() {
                if first < lo || last > hi {
                    return Err(invalid(format!("{name} addresses fall outside the range")));
                }
            }
        }
        if let Some(gateway) = self.gateway {
            if !range.contains(&gateway) {
                return Err(invalid(format!("gateway {gateway} is outside the range")));
            }
        }
        Ok(())
    }

    /// Inclusive numeric bounds of the range.
    pub fn numeric_bounds(&self) -> Option<(u128, u128)> {
        self.range
            .map(|range| (to_numeric(range.network()), to_numeric(range.broadcast())))
    }

    pub fn family(&self) -> Option<Family> {
        self.range
            .map(|range| Family::of(range.network()))
            .or_else(|| self.static_ips.family())
    }

    /// Number of addresses covered by the range (or the VIP list).
    pub fn size(&self) -> u128 {
        match self.numeric_bounds() {
            Some((lo, hi)) => (hi - lo).saturating_add(1),
            None => self.static_ips.len(),
        }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match self.range {
            Some(range) => range.contains(&ip),
            None => self.static_ips.contains(ip),
        }
    }

    pub fn is_reserved(&self, ip: IpAddr) -> bool {
        self.reserved.contains(ip)
    }

    pub fn is_static(&self, ip: IpAddr) -> bool {
        self.static_ips.contains(ip)
    }

    /// In range, neither reserved nor static.
    pub fn in_dynamic_pool(&self, ip: IpAddr) -> bool {
        self.range.is_some() && self.contains(ip) && !self.is_reserved(ip) && !self.is_static(ip)
    }

    pub fn is_az_restricted(&self) -> bool {
        !self.az_names.is_empty()
    }

    /// Whether an instance in `az` may take an address from this subnet.
    pub fn serves_az(&self, az: Option<&str>) -> bool {
        match az {
            Some(az) => self.az_names.is_empty() || self.az_names.iter().any(|name| name == az),
            None => true,
        }
    }
}

/// A named collection of one or more subnets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    #[serde(default)]
    pub kind: NetworkKind,
    pub subnets: Vec<Subnet>,
}

impl Network {
    /// Build a network, validating every subnet.
    pub fn new(name: impl Into<String>, kind: NetworkKind, subnets: Vec<Subnet>) -> CoreResult<Self> {
        let name = name.into();
        if subnets.is_empty() && kind != NetworkKind::Dynamic {
            return Err(CoreError::EmptyNetwork { network: name });
        }
        for subnet in &subnets {
            subnet.validate()?;
        }
        Ok(Self { name, kind, subnets })
    }

    /// Shorthand for a manual network.
    pub fn manual(name: impl Into<String>, subnets: Vec<Subnet>) -> CoreResult<Self> {
        Self::new(name, NetworkKind::Manual, subnets)
    }

    pub fn subnet_containing(&self, ip: IpAddr) -> Option<&Subnet> {
        self.subnets.iter().find(|subnet| subnet.contains(ip))
    }

    pub fn in_static_pool(&self, ip: IpAddr) -> bool {
        self.subnets.iter().any(|subnet| subnet.is_static(ip))
    }

    pub fn in_dynamic_pool(&self, ip: IpAddr) -> bool {
        self.subnets.iter().any(|subnet| subnet.in_dynamic_pool(ip))
    }

    /// Whether the address belongs to either pool of this network.
    pub fn owns(&self, ip: IpAddr) -> bool {
        self.in_static_pool(ip) || self.in_dynamic_pool(ip)
    }

    /// Subnets an instance in `az` may draw from, in declaration order.
    pub fn subnets_for_az<'a>(&'a self, az: Option<&'a str>) -> impl Iterator<Item = &'a Subnet> + 'a {
        self.subnets.iter().filter(move |subnet| subnet.serves_az(az))
    }
}
