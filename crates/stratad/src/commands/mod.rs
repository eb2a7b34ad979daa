pub mod addresses;
pub mod init;
pub mod plan;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use strata_core::{Network, StrataConfig};
use strata_ipam::{DatabaseIpRepo, IpProvider};
use strata_state::StateStore;
use tracing::debug;

pub type Provider = IpProvider<DatabaseIpRepo<StateStore>>;

/// Build every declared network, keyed by name.
pub fn networks(config: &StrataConfig) -> anyhow::Result<BTreeMap<String, Arc<Network>>> {
    Ok(config
        .build_networks()?
        .into_iter()
        .map(|network| (network.name.clone(), Arc::new(network)))
        .collect())
}

pub fn open_store(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir).with_context(|| format!("creating {}", data_dir.display()))?;
    let path = data_dir.join("strata.redb");
    let store = StateStore::open(&path)?;
    debug!(path = %path.display(), "address store opened");
    Ok(store)
}

pub fn provider(config: &StrataConfig, store: StateStore) -> anyhow::Result<Provider> {
    let repo = DatabaseIpRepo::new(store, config.planner.task_id.clone(), config.planner.max_add_attempts);
    Ok(IpProvider::new(repo, networks(config)?.into_values()))
}

pub fn load(path: &Path) -> anyhow::Result<StrataConfig> {
    StrataConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}
