use std::net::IpAddr;
use std::path::Path;

use strata_ipam::IpRepository;
use tracing::info;

use super::{load, open_store, provider};

pub fn list(config_path: &Path, data_dir: &Path, network: &str) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let provider = provider(&config, open_store(data_dir)?)?;
    provider.network(network)?;
    let records = provider.repository().list(network)?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

pub fn release(config_path: &Path, data_dir: &Path, network: &str, address: IpAddr) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let provider = provider(&config, open_store(data_dir)?)?;
    provider.delete(address, network)?;
    info!(%network, %address, "address released");
    Ok(())
}
