use std::path::Path;

use anyhow::{Context, bail};

use canopy_core::CanopyConfig;
use canopy_release::Topology;

pub mod inspect;
pub mod release;
pub mod serve;

pub fn load_config(path: &Path) -> anyhow::Result<CanopyConfig> {
    CanopyConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

pub fn open_topology(config_path: &Path, data_dir: &Path) -> anyhow::Result<Topology> {
    let config = load_config(config_path)?;
    Ok(Topology::open(config, data_dir)?)
}

pub fn init(path: &Path, name: &str, domain: &str, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let config = CanopyConfig::scaffold(name, domain);
    std::fs::write(path, config.to_toml_string()?)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("✓ Generated {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_writes_a_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canopy.toml");
        init(&path, "shop", "d111.example.net", false).unwrap();
        assert!(init(&path, "shop", "d111.example.net", false).is_err());
        init(&path, "shop", "d222.example.net", true).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.site.domain_name, "d222.example.net");
    }

    #[test]
    fn topology_opens_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canopy.toml");
        init(&path, "shop", "d111.example.net", false).unwrap();
        let data_dir = dir.path().join("state");

        let topology = open_topology(&path, &data_dir).unwrap();
        assert!(data_dir.join("canopy.redb").exists());
        assert_eq!(topology.compute.versions().len(), 1);
    }
}
