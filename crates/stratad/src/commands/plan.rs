use std::net::IpAddr;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use strata_core::{Reservation, StrataConfig};
use strata_ipam::IpRepository;
use strata_placement::{GroupInput, InstancePlan, tie_strategy};
use tracing::info;

use super::{Provider, load, networks, open_store, provider};

#[derive(Debug, Serialize)]
pub struct PlanSummary {
    pub group: String,
    pub applied: bool,
    pub instances: Vec<InstanceSummary>,
}

#[derive(Debug, Serialize)]
pub struct InstanceSummary {
    pub id: String,
    pub state: InstanceState,
    pub az: Option<String>,
    pub ignored: bool,
    pub networks: Vec<NetworkSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    New,
    Keep,
    Obsolete,
}

#[derive(Debug, Serialize)]
pub struct NetworkSummary {
    pub network: String,
    pub kind: String,
    pub address: Option<IpAddr>,
    pub reserved: bool,
}

pub fn run(config_path: &Path, data_dir: &Path, apply: bool) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let provider = if apply {
        Some(provider(&config, open_store(data_dir)?)?)
    } else {
        None
    };
    let summary = plan(&config, provider.as_ref())?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// One placement pass for the configured group, optionally applied.
pub fn plan(config: &StrataConfig, provider: Option<&Provider>) -> anyhow::Result<PlanSummary> {
    let group = config
        .instance_group
        .as_ref()
        .context("config has no [instance_group] section")?;
    let networks = networks(config)?;
    let input = GroupInput::from_config(config, group, &networks)?;

    let mut picker = input.picker(tie_strategy(config.planner.tie_strategy))?;
    let mut plans = picker.place_and_match_in(input.desired.clone(), input.existing.clone())?;

    if let Some(provider) = provider {
        apply_plans(provider, &mut plans)?;
    }
    Ok(summarize(&input.group, provider.is_some(), &plans))
}

/// Release addresses no longer planned, then reserve every planned one.
fn apply_plans(provider: &Provider, plans: &mut [InstancePlan]) -> anyhow::Result<()> {
    for plan in plans.iter().filter(|plan| !plan.should_be_ignored()) {
        release_unplanned(provider, plan)?;
    }

    for plan in plans.iter_mut().filter(|plan| !plan.is_obsolete()) {
        keep_held_dynamic_addresses(plan);
        for np in &mut plan.network_plans {
            provider.reserve(&mut np.reservation)?;
        }
        info!(instance = %plan.instance_id, az = ?plan.az(), "instance reservations applied");
    }
    Ok(())
}

fn release_unplanned(provider: &Provider, plan: &InstancePlan) -> anyhow::Result<()> {
    let Some(existing) = &plan.existing else {
        return Ok(());
    };
    for held in &existing.ip_addresses {
        let still_planned = !plan.is_obsolete()
            && plan
                .network_plan_for(&held.network_name)
                .is_some_and(|np| np.address().is_none_or(|address| address == held.address));
        if still_planned {
            continue;
        }
        let owned = provider
            .repository()
            .list(&held.network_name)?
            .iter()
            .any(|record| record.address == held.address && record.instance_id == plan.instance_id);
        if owned {
            provider.delete(held.address, &held.network_name)?;
            info!(instance = %plan.instance_id, network = %held.network_name, address = %held.address, "released address");
        }
    }
    Ok(())
}

/// A kept instance keeps the dynamic address it already has on a network.
fn keep_held_dynamic_addresses(plan: &mut InstancePlan) {
    let Some(existing) = plan.existing.clone() else {
        return;
    };
    let az = plan.az().map(str::to_string);
    for np in plan.network_plans.iter_mut().filter(|np| np.is_deferred()) {
        let network = np.reservation.network.clone();
        let held = existing.ip_addresses.iter().find(|ip| {
            ip.network_name == network.name
                && network
                    .subnets_for_az(az.as_deref())
                    .any(|subnet| subnet.in_dynamic_pool(ip.address))
        });
        if let Some(held) = held {
            np.reservation = Reservation::existing(existing.id.clone(), az.clone(), network, held.address);
        }
    }
}

fn summarize(group: &str, applied: bool, plans: &[InstancePlan]) -> PlanSummary {
    let instances = plans
        .iter()
        .map(|plan| InstanceSummary {
            id: plan.instance_id.clone(),
            state: if plan.is_obsolete() {
                InstanceState::Obsolete
            } else if plan.is_new() {
                InstanceState::New
            } else {
                InstanceState::Keep
            },
            az: plan.az().map(str::to_string),
            ignored: plan.should_be_ignored(),
            networks: plan
                .network_plans
                .iter()
                .map(|np| NetworkSummary {
                    network: np.network_name().to_string(),
                    kind: np.reservation.kind.to_string(),
                    address: np.address(),
                    reserved: np.reservation.is_reserved(),
                })
                .collect(),
        })
        .collect();
    PlanSummary {
        group: group.to_string(),
        applied,
        instances,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_state::StateStore;

    const CONFIG: &str = r#"
[planner]
tie_strategy = "min"

[[azs]]
name = "z1"

[[azs]]
name = "z2"

[[networks]]
name = "default"

[[networks.subnets]]
range = "10.0.1.0/24"
gateway = "10.0.1.1"
static = ["10.0.1.10 - 10.0.1.19"]
azs = ["z1"]

[[networks.subnets]]
range = "10.0.2.0/24"
gateway = "10.0.2.1"
static = ["10.0.2.10 - 10.0.2.19"]
azs = ["z2"]

[[networks]]
name = "private"

[[networks.subnets]]
range = "10.1.0.0/24"

[instance_group]
name = "web"
instances = 2
azs = ["z1", "z2"]

[[instance_group.networks]]
name = "default"
static_ips = ["10.0.1.10", "10.0.2.10"]

[[instance_group.networks]]
name = "private"
"#;

    fn config(extra: &str) -> StrataConfig {
        toml::from_str(&format!("{CONFIG}{extra}")).unwrap()
    }

    fn store_provider(config: &StrataConfig) -> Provider {
        provider(config, StateStore::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn dry_run_leaves_dynamic_addresses_open() {
        let summary = plan(&config(""), None).unwrap();
        assert!(!summary.applied);
        assert_eq!(summary.instances.len(), 2);
        for instance in &summary.instances {
            assert_eq!(instance.state, InstanceState::New);
            assert_eq!(instance.networks[0].kind, "static");
            assert_eq!(instance.networks[1].address, None);
        }
    }

    #[test]
    fn apply_reserves_every_network() {
        let config = config("");
        let provider = store_provider(&config);
        let summary = plan(&config, Some(&provider)).unwrap();

        assert!(summary.applied);
        assert!(summary.instances.iter().flat_map(|i| &i.networks).all(|n| n.reserved));
        let statics = provider.repository().list("default").unwrap();
        assert_eq!(statics.len(), 2);
        assert!(statics.iter().all(|record| record.static_ip));
        let dynamics = provider.repository().list("private").unwrap();
        let addresses: Vec<String> = dynamics.iter().map(|r| r.address.to_string()).collect();
        assert_eq!(addresses, vec!["10.1.0.1", "10.1.0.2"]);
    }

    #[test]
    fn kept_instance_keeps_its_dynamic_address() {
        let config = config(
            r#"
[[existing]]
id = "web/abc"
index = 0
az = "z1"
ips = [
    { network = "default", address = "10.0.1.10" },
    { network = "private", address = "10.1.0.40" },
]
"#,
        );
        let provider = store_provider(&config);
        let summary = plan(&config, Some(&provider)).unwrap();

        let kept = summary.instances.iter().find(|i| i.id == "web/abc").unwrap();
        assert_eq!(kept.state, InstanceState::Keep);
        assert_eq!(kept.networks[1].address, Some("10.1.0.40".parse().unwrap()));
        assert_eq!(kept.networks[1].kind, "existing");
    }

    #[test]
    fn obsolete_instance_addresses_are_released() {
        let config = config(
            r#"
[[existing]]
id = "web/old"
index = 5
az = "z1"
ips = [{ network = "private", address = "10.1.0.77" }]
"#,
        );
        let provider = store_provider(&config);
        let network = provider.network("private").unwrap().clone();
        let mut held = Reservation::existing("web/old", Some("z1".into()), network, "10.1.0.77".parse().unwrap());
        provider.reserve(&mut held).unwrap();

        let mut shrunk = config.clone();
        if let Some(group) = shrunk.instance_group.as_mut() {
            group.instances = 0;
            group.networks[0].static_ips = None;
        }
        let summary = plan(&shrunk, Some(&provider)).unwrap();

        assert_eq!(summary.instances[0].state, InstanceState::Obsolete);
        assert!(provider.repository().list("private").unwrap().is_empty());
    }

    #[test]
    fn missing_group_is_an_error() {
        let mut config = config("");
        config.instance_group = None;
        assert!(plan(&config, None).is_err());
    }
}
