//! Explicit wiring of a site's components.
//!
//! Everything the edge and the release pipeline share is built once here
//! and handed out by reference: the store, the compute origin, the edge
//! router and the canary controller. Nothing is looked up globally.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use canopy_canary::{AlarmConfig, AlarmSource, CanaryConfig, CanaryController, MetricsAlarmSource};
use canopy_core::config::RouteOrigin;
use canopy_core::{AliasBinding, CanopyConfig, TrafficWeight, epoch_secs, parse_duration};
use canopy_edge::{
    CachePolicy, ComputeOrigin, ComputeOriginSpec, ComputeUnit, EdgeRouter, HttpComputeUnit,
    ObjectStoreOrigin, OriginRef, OriginRegistry, Route, RouteTable,
};
use canopy_metrics::MetricsCollector;
use canopy_state::{AliasRecord, StateStore};

use crate::error::ReleaseError;
use crate::publisher::EndpointPublisher;

/// Name of the object-store origin holding the site's static files.
pub const ASSETS_ORIGIN: &str = "assets";

/// Parameter holding the static generation currently served.
pub const GENERATION_PARAMETER: &str = "/canopy/static/generation";

pub struct Topology {
    pub config: CanopyConfig,
    pub store: StateStore,
    pub compute: Arc<ComputeOrigin>,
    pub router: Arc<EdgeRouter>,
    pub controller: Arc<CanaryController>,
    pub canary: CanaryConfig,
    pub alarm: AlarmConfig,
    pub publisher: EndpointPublisher,
}

impl Topology {
    /// Wire a site whose compute unit is reached over HTTP.
    pub fn build(config: CanopyConfig, store: StateStore) -> Result<Self, ReleaseError> {
        let timeout = parse_duration(&config.compute.timeout)?;
        Self::with_unit(config, store, Arc::new(HttpComputeUnit::new(timeout)))
    }

    /// Wire a site around the given compute unit.
    ///
    /// Compute versions, the alias binding and the static generation are
    /// restored from `store` when present. A canary split left behind by a
    /// process that died mid-deployment is rolled back to the previous
    /// version.
    pub fn with_unit(
        config: CanopyConfig,
        store: StateStore,
        unit: Arc<dyn ComputeUnit>,
    ) -> Result<Self, ReleaseError> {
        config.validate()?;
        let canary = CanaryConfig::from_section(&config.canary)?;
        let alarm = AlarmConfig::from_section(&config.alarm)?;

        let compute = Arc::new(restore_compute(&config, &store, unit)?);
        roll_back_interrupted_canary(&compute)?;

        let generation = store
            .get_parameter(GENERATION_PARAMETER)?
            .map(|p| p.value);
        let assets = Arc::new(
            ObjectStoreOrigin::new(ASSETS_ORIGIN, Arc::new(store.clone()))
                .with_generation(generation.clone()),
        );

        let mut origins = OriginRegistry::new();
        let compute_ref = origins.register_compute(compute.clone())?;
        let assets_ref = origins.register_object_store(assets)?;

        let routes = build_routes(&config, &compute_ref, &assets_ref)?;
        let table = RouteTable::build(routes, origins)?;
        let router = Arc::new(EdgeRouter::new(table));

        let publisher = EndpointPublisher::new(
            Arc::new(store.clone()),
            &config.endpoint.parameter_name,
        );

        info!(
            site = %config.site.name,
            function = compute.name(),
            versions = compute.versions().len(),
            generation = generation.as_deref().unwrap_or("-"),
            "topology ready"
        );

        let topology = Self {
            config,
            store,
            compute,
            router,
            controller: Arc::new(CanaryController::new()),
            canary,
            alarm,
            publisher,
        };
        topology.persist_compute()?;
        Ok(topology)
    }

    /// Open the store under `data_dir` and wire the site.
    pub fn open(config: CanopyConfig, data_dir: &Path) -> Result<Self, ReleaseError> {
        std::fs::create_dir_all(data_dir).map_err(|e| {
            canopy_state::StateError::Open(format!("{}: {e}", data_dir.display()))
        })?;
        let store = StateStore::open(&data_dir.join("canopy.redb"))?;
        Self::build(config, store)
    }

    /// Alarms evaluated from this site's invocation metrics.
    pub fn alarm_source(&self) -> Arc<dyn AlarmSource> {
        Arc::new(MetricsAlarmSource::new(
            self.compute.metrics().clone(),
            self.alarm,
        ))
    }

    /// Persist every published version and the current alias binding.
    pub fn persist_compute(&self) -> Result<(), ReleaseError> {
        let function = self.compute.name();
        for version in self.compute.versions() {
            self.store.put_version(function, &version)?;
        }
        let record = AliasRecord {
            function: function.to_string(),
            alias: self.compute.alias().name().to_string(),
            binding: (*self.compute.alias().binding()).clone(),
            updated_at: epoch_secs(),
        };
        self.store.put_alias(&record)?;
        debug!(%function, alias = %record.alias, "compute state persisted");
        Ok(())
    }
}

fn restore_compute(
    config: &CanopyConfig,
    store: &StateStore,
    unit: Arc<dyn ComputeUnit>,
) -> Result<ComputeOrigin, ReleaseError> {
    let section = &config.compute;
    let forward: Vec<&str> = section.forward_headers.iter().map(String::as_str).collect();
    let spec = ComputeOriginSpec::new(&section.name, &section.alias, &section.entry_point)
        .with_forward_headers(&forward);
    let metrics = MetricsCollector::new();

    let versions = store.list_versions(&section.name)?;
    let origin = match store.get_alias(&section.name, &section.alias)? {
        Some(record) if !versions.is_empty() => {
            info!(
                function = %section.name,
                versions = versions.len(),
                target = %record.binding.target,
                weight = %record.binding.weight,
                "restoring compute origin"
            );
            ComputeOrigin::restore(spec, unit, metrics, versions, record.binding)?
        }
        _ => ComputeOrigin::new(spec, unit, metrics),
    };
    Ok(origin.with_journal(Arc::new(store.clone())))
}

/// A binding that still splits traffic has no deployment driving it any
/// more. Send everything back to the previous version.
fn roll_back_interrupted_canary(compute: &ComputeOrigin) -> Result<(), ReleaseError> {
    let binding = compute.alias().binding();
    let Some(previous) = &binding.previous else {
        return Ok(());
    };
    if binding.weight == TrafficWeight::ZERO || binding.weight == TrafficWeight::FULL {
        return Ok(());
    }
    warn!(
        function = compute.name(),
        target = %binding.target,
        previous = %previous,
        weight = %binding.weight,
        "interrupted canary found, rolling back"
    );
    compute.bind_alias(AliasBinding {
        target: binding.target.clone(),
        previous: Some(previous.clone()),
        weight: TrafficWeight::ZERO,
    })?;
    Ok(())
}

fn build_routes(
    config: &CanopyConfig,
    compute: &OriginRef,
    assets: &OriginRef,
) -> Result<Vec<Route>, ReleaseError> {
    let static_pattern = format!("/{}/*", config.build.static_prefix);
    if !config
        .edge
        .routes
        .iter()
        .any(|r| r.origin == RouteOrigin::Assets && r.pattern == static_pattern)
    {
        warn!(
            expected = %static_pattern,
            "no assets route matches the static prefix; uploaded files will not be reachable"
        );
    }

    config
        .edge
        .routes
        .iter()
        .map(|r| {
            let origin = match r.origin {
                RouteOrigin::Compute => compute.clone(),
                RouteOrigin::Assets => assets.clone(),
            };
            let route = Route::new(&r.pattern, origin)?;
            Ok(match &r.cache_policy {
                Some(policy) => route.with_policy(CachePolicy::from_config(policy)?),
                None => route,
            })
        })
        .collect()
}
