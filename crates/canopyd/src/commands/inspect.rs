use std::path::Path;

use canopy_core::format_duration;
use canopy_state::DeploymentRecord;

pub fn resolve(config_path: &Path, data_dir: &Path, path: &str) -> anyhow::Result<()> {
    let topology = super::open_topology(config_path, data_dir)?;
    let route = topology.router.resolve(path);
    let policy = &route.cache_policy;
    println!("{path}");
    println!("  Route:  {}", route.pattern);
    println!("  Origin: {}", route.origin);
    println!(
        "  Cache:  {} (min {}, default {}, max {})",
        policy.name(),
        format_duration(policy.min_ttl()),
        format_duration(policy.default_ttl()),
        format_duration(policy.max_ttl())
    );
    Ok(())
}

pub fn endpoint(config_path: &Path, data_dir: &Path) -> anyhow::Result<()> {
    let topology = super::open_topology(config_path, data_dir)?;
    match topology.publisher.current() {
        Some(domain) => println!("{domain}"),
        None => println!("(not published; {} is unset)", topology.publisher.parameter_name()),
    }
    Ok(())
}

pub fn deployments(config_path: &Path, data_dir: &Path, json: bool) -> anyhow::Result<()> {
    let topology = super::open_topology(config_path, data_dir)?;
    let mut records = topology.store.list_deployment_records()?;
    records.sort_by(|a, b| b.started_at.cmp(&a.started_at));

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No deployments yet.");
    }
    for record in &records {
        println!("{}", format_record(record));
    }
    Ok(())
}

fn format_record(record: &DeploymentRecord) -> String {
    let version = |v: &Option<canopy_core::ComputeVersion>| {
        v.as_ref()
            .map(|v| format!("v{}", v.version_id))
            .unwrap_or_else(|| "-".to_string())
    };
    let mut line = format!(
        "{:<32} {:<12} {} -> {}  weight {}",
        record.id,
        record.state.to_string(),
        version(&record.previous_version),
        version(&record.new_version),
        record.weight
    );
    if let Some(reason) = &record.reason {
        line.push_str(&format!("  ({reason})"));
    }
    line
}
