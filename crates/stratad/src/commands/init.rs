use std::path::Path;

use anyhow::bail;
use strata_core::StrataConfig;

pub fn run(path: &Path, group: &str, instances: u32) -> anyhow::Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    let config = StrataConfig::scaffold(group, instances);
    std::fs::write(path, config.to_toml_string()?)?;
    println!("✓ Generated {}", path.display());
    Ok(())
}
