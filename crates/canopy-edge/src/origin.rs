//! Origins behind the edge: the compute function and the static-asset store.
//!
//! An origin is a closed variant. Route resolution and dispatch match on
//! [`Origin`] exhaustively; there is no open trait for new origin kinds.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use tracing::{debug, info, warn};

use canopy_core::{AlarmDimension, AliasBinding, ComputeVersion, TrafficWeight, epoch_secs};
use canopy_metrics::MetricsCollector;
use canopy_state::{AliasRecord, BlobStore, ComputeJournal};

use crate::error::EdgeError;
use crate::message::{EdgeRequest, EdgeResponse};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The opaque request handler behind a compute origin.
///
/// Implementations receive the version the request was routed to and must
/// answer with that version's code.
pub trait ComputeUnit: Send + Sync {
    fn invoke<'a>(
        &'a self,
        version: &'a ComputeVersion,
        request: EdgeRequest,
    ) -> BoxFuture<'a, Result<EdgeResponse, EdgeError>>;
}

// ── Alias ──────────────────────────────────────────────────────────

/// A named pointer to a compute version, with an optional traffic split.
///
/// The binding is swapped as a whole, so readers on the serving path see
/// either the old or the new binding and never a partial write.
pub struct Alias {
    name: String,
    binding: ArcSwap<AliasBinding>,
}

impl Alias {
    pub fn new(name: &str, binding: AliasBinding) -> Self {
        Self {
            name: name.to_string(),
            binding: ArcSwap::from_pointee(binding),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn binding(&self) -> Arc<AliasBinding> {
        self.binding.load_full()
    }

    pub fn weight(&self) -> TrafficWeight {
        self.binding.load().weight
    }

    /// Replace the binding.
    pub fn bind(&self, binding: AliasBinding) {
        debug!(
            alias = %self.name,
            target = %binding.target,
            previous = ?binding.previous.as_ref().map(|v| v.version_id),
            weight = %binding.weight,
            "alias rebound"
        );
        self.binding.store(Arc::new(binding));
    }

    /// Change only the weight of the current binding.
    pub fn set_weight(&self, weight: TrafficWeight) {
        self.binding.rcu(|current| AliasBinding {
            weight,
            ..AliasBinding::clone(current)
        });
        debug!(alias = %self.name, %weight, "alias weight set");
    }
}

// ── Compute origin ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ComputeOriginSpec {
    pub name: String,
    pub alias: String,
    /// Address of the unit serving the first version.
    pub entry_point: String,
    /// Request headers the compute unit needs. All others are dropped.
    pub forward_headers: Vec<String>,
}

impl ComputeOriginSpec {
    pub fn new(name: &str, alias: &str, entry_point: &str) -> Self {
        Self {
            name: name.to_string(),
            alias: alias.to_string(),
            entry_point: entry_point.to_string(),
            forward_headers: Vec::new(),
        }
    }

    pub fn with_forward_headers(mut self, headers: &[&str]) -> Self {
        self.forward_headers = headers.iter().map(|h| h.to_ascii_lowercase()).collect();
        self
    }
}

/// A compute function reachable through a stable alias, with immutable
/// numbered versions.
pub struct ComputeOrigin {
    spec: ComputeOriginSpec,
    versions: Mutex<Vec<ComputeVersion>>,
    alias: Alias,
    unit: Arc<dyn ComputeUnit>,
    metrics: MetricsCollector,
    request_counter: AtomicU64,
    journal: Option<Arc<dyn ComputeJournal>>,
}

impl ComputeOrigin {
    /// Create the origin and publish version 1 from the entry point.
    pub fn new(
        spec: ComputeOriginSpec,
        unit: Arc<dyn ComputeUnit>,
        metrics: MetricsCollector,
    ) -> Self {
        let first = ComputeVersion {
            version_id: 1,
            published_at: epoch_secs(),
            code_ref: spec.entry_point.clone(),
        };
        info!(function = %spec.name, version = %first, "published initial compute version");
        let alias = Alias::new(&spec.alias, AliasBinding::single(first.clone()));
        Self {
            spec,
            versions: Mutex::new(vec![first]),
            alias,
            unit,
            metrics,
            request_counter: AtomicU64::new(0),
            journal: None,
        }
    }

    /// Rebuild an origin from previously published versions and binding.
    pub fn restore(
        spec: ComputeOriginSpec,
        unit: Arc<dyn ComputeUnit>,
        metrics: MetricsCollector,
        mut versions: Vec<ComputeVersion>,
        binding: AliasBinding,
    ) -> Result<Self, EdgeError> {
        versions.sort_by_key(|v| v.version_id);
        let unknown = std::iter::once(&binding.target)
            .chain(binding.previous.as_ref())
            .find(|v| !versions.iter().any(|k| k.version_id == v.version_id));
        if let Some(missing) = unknown {
            return Err(EdgeError::UnpublishedVersion {
                function: spec.name.clone(),
                alias: spec.alias.clone(),
                version: missing.version_id,
            });
        }
        let alias = Alias::new(&spec.alias, binding);
        Ok(Self {
            spec,
            versions: Mutex::new(versions),
            alias,
            unit,
            metrics,
            request_counter: AtomicU64::new(0),
            journal: None,
        })
    }

    /// Record every later publish and alias write in `journal`.
    pub fn with_journal(mut self, journal: Arc<dyn ComputeJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ComputeOriginSpec {
        &self.spec
    }

    pub fn alias(&self) -> &Alias {
        &self.alias
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Publish a new immutable version. Ids increase by one per publish.
    ///
    /// With a journal, the version is recorded before it is handed out; if
    /// that write fails nothing is published.
    pub fn publish_version(&self, code_ref: &str) -> Result<ComputeVersion, EdgeError> {
        let mut versions = self.versions.lock().unwrap_or_else(PoisonError::into_inner);
        let next_id = versions.last().map(|v| v.version_id + 1).unwrap_or(1);
        let version = ComputeVersion {
            version_id: next_id,
            published_at: epoch_secs(),
            code_ref: code_ref.to_string(),
        };
        if let Some(journal) = &self.journal {
            journal.record_version(&self.spec.name, &version)?;
        }
        versions.push(version.clone());
        info!(function = %self.spec.name, version = %version, code_ref, "published compute version");
        Ok(version)
    }

    /// Rebind the alias, then record the binding in the journal.
    ///
    /// The in-memory binding is written even when recording fails, so a
    /// rollback always takes effect on the serving path.
    pub fn bind_alias(&self, binding: AliasBinding) -> Result<(), EdgeError> {
        self.alias.bind(binding);
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        journal.record_alias(&AliasRecord {
            function: self.spec.name.clone(),
            alias: self.spec.alias.clone(),
            binding: (*self.alias.binding()).clone(),
            updated_at: epoch_secs(),
        })?;
        Ok(())
    }

    pub fn versions(&self) -> Vec<ComputeVersion> {
        self.versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn latest_version(&self) -> Option<ComputeVersion> {
        self.versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    /// The alarm dimension for invocations executed by `version`.
    pub fn dimension(&self, version: &ComputeVersion) -> AlarmDimension {
        AlarmDimension::new(&self.spec.name, &self.spec.alias, version.version_id)
    }

    /// Pick the version that serves the next request.
    ///
    /// The split is deterministic: over any 1000 consecutive requests,
    /// exactly `weight.per_mille()` go to the target version.
    pub fn select_version(&self) -> ComputeVersion {
        let binding = self.alias.binding();
        let Some(previous) = &binding.previous else {
            return binding.target.clone();
        };
        let n = self.request_counter.fetch_add(1, Ordering::Relaxed);
        // 7919 is coprime with 1000, so n -> slot permutes every block of 1000.
        let slot = (n % 1000) * 7919 % 1000;
        if slot < u64::from(binding.weight.per_mille()) {
            binding.target.clone()
        } else {
            previous.clone()
        }
    }

    /// Forward a request to the selected version and record the outcome.
    pub async fn invoke(&self, request: EdgeRequest) -> EdgeResponse {
        let version = self.select_version();
        let dimension = self.dimension(&version);
        let request = self.filter_headers(request);

        let response = match self.unit.invoke(&version, request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(function = %self.spec.name, %version, error = %e, "compute invocation failed");
                EdgeResponse::bad_gateway(&e.to_string())
            }
        };

        self.metrics
            .record_invocation(&dimension, response.is_server_error())
            .await;
        response.with_header("x-canopy-version", &version.version_id.to_string())
    }

    fn filter_headers(&self, mut request: EdgeRequest) -> EdgeRequest {
        request
            .headers
            .retain(|name, _| self.spec.forward_headers.iter().any(|h| h == name));
        request
    }
}

// ── Object store origin ────────────────────────────────────────────

/// Static files served by key from a blob store.
///
/// With a generation set, keys are `{generation}/{path}`; a new upload is
/// served by swapping in an origin with the new generation.
#[derive(Clone)]
pub struct ObjectStoreOrigin {
    name: String,
    store: Arc<dyn BlobStore>,
    generation: Option<String>,
}

impl ObjectStoreOrigin {
    pub fn new(name: &str, store: Arc<dyn BlobStore>) -> Self {
        Self {
            name: name.to_string(),
            store,
            generation: None,
        }
    }

    pub fn with_generation(&self, generation: Option<String>) -> Self {
        Self {
            name: self.name.clone(),
            store: Arc::clone(&self.store),
            generation,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The generation currently served; part of every cache key.
    pub fn content_version(&self) -> Option<&str> {
        self.generation.as_deref()
    }

    pub fn object_key(&self, path: &str) -> String {
        let relative = path.trim_start_matches('/');
        match &self.generation {
            Some(generation) => format!("{generation}/{relative}"),
            None => relative.to_string(),
        }
    }

    pub fn fetch(&self, path: &str) -> Result<EdgeResponse, EdgeError> {
        let key = self.object_key(path);
        match self.store.get(&key)? {
            Some(bytes) => Ok(EdgeResponse::new(200, bytes)
                .with_header("content-type", content_type_for(path))),
            None => {
                debug!(origin = %self.name, key = %key, "object not found");
                Ok(EdgeResponse::not_found())
            }
        }
    }
}

/// Content type inferred from a file extension.
pub fn content_type_for(path: &str) -> &'static str {
    let extension = path
        .rsplit('/')
        .next()
        .and_then(|file| file.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") | Some("mjs") => "text/javascript; charset=utf-8",
        Some("json") | Some("map") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("xml") => "application/xml",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}

// ── Closed origin variant ──────────────────────────────────────────

/// How a route names its origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OriginRef {
    Compute(String),
    ObjectStore(String),
}

impl fmt::Display for OriginRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compute(name) => write!(f, "compute:{name}"),
            Self::ObjectStore(name) => write!(f, "object-store:{name}"),
        }
    }
}

#[derive(Clone)]
pub enum Origin {
    Compute(Arc<ComputeOrigin>),
    ObjectStore(Arc<ObjectStoreOrigin>),
}

impl Origin {
    pub fn origin_ref(&self) -> OriginRef {
        match self {
            Self::Compute(c) => OriginRef::Compute(c.name().to_string()),
            Self::ObjectStore(o) => OriginRef::ObjectStore(o.name().to_string()),
        }
    }
}

/// The origins a route table may reference.
#[derive(Clone, Default)]
pub struct OriginRegistry {
    origins: BTreeMap<OriginRef, Origin>,
}

impl OriginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_compute(&mut self, origin: Arc<ComputeOrigin>) -> Result<OriginRef, EdgeError> {
        self.register(Origin::Compute(origin))
    }

    pub fn register_object_store(
        &mut self,
        origin: Arc<ObjectStoreOrigin>,
    ) -> Result<OriginRef, EdgeError> {
        self.register(Origin::ObjectStore(origin))
    }

    fn register(&mut self, origin: Origin) -> Result<OriginRef, EdgeError> {
        let origin_ref = origin.origin_ref();
        if self.origins.contains_key(&origin_ref) {
            return Err(EdgeError::DuplicateOrigin(origin_ref.to_string()));
        }
        self.origins.insert(origin_ref.clone(), origin);
        Ok(origin_ref)
    }

    /// Replace an already-registered object store, keeping its reference.
    pub(crate) fn replace_object_store(&mut self, origin: Arc<ObjectStoreOrigin>) {
        let origin = Origin::ObjectStore(origin);
        self.origins.insert(origin.origin_ref(), origin);
    }

    pub fn lookup(&self, origin_ref: &OriginRef) -> Option<&Origin> {
        self.origins.get(origin_ref)
    }

    pub fn contains(&self, origin_ref: &OriginRef) -> bool {
        self.origins.contains_key(origin_ref)
    }

    pub fn compute(&self, name: &str) -> Option<&Arc<ComputeOrigin>> {
        match self.origins.get(&OriginRef::Compute(name.to_string())) {
            Some(Origin::Compute(c)) => Some(c),
            _ => None,
        }
    }

    pub fn object_store(&self, name: &str) -> Option<&Arc<ObjectStoreOrigin>> {
        match self.origins.get(&OriginRef::ObjectStore(name.to_string())) {
            Some(Origin::ObjectStore(o)) => Some(o),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OriginRef, &Origin)> {
        self.origins.iter()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use canopy_state::StateStore;

    /// Answers with the version id; versions listed in `failing` answer 500.
    pub(crate) struct EchoUnit {
        pub failing: Vec<u64>,
    }

    impl ComputeUnit for EchoUnit {
        fn invoke<'a>(
            &'a self,
            version: &'a ComputeVersion,
            request: EdgeRequest,
        ) -> BoxFuture<'a, Result<EdgeResponse, EdgeError>> {
            Box::pin(async move {
                let status = if self.failing.contains(&version.version_id) { 500 } else { 200 };
                let headers: Vec<String> = request.headers.keys().cloned().collect();
                Ok(EdgeResponse::new(
                    status,
                    format!("v{} {} {}", version.version_id, request.path_and_query(), headers.join(",")),
                ))
            })
        }
    }

    struct BrokenUnit;

    impl ComputeUnit for BrokenUnit {
        fn invoke<'a>(
            &'a self,
            _version: &'a ComputeVersion,
            _request: EdgeRequest,
        ) -> BoxFuture<'a, Result<EdgeResponse, EdgeError>> {
            Box::pin(async { Err(EdgeError::Invoke("connection refused".into())) })
        }
    }

    pub(crate) fn compute_origin(failing: Vec<u64>) -> ComputeOrigin {
        ComputeOrigin::new(
            ComputeOriginSpec::new("request-handler", "live", "127.0.0.1:3000")
                .with_forward_headers(&["Accept-Language"]),
            Arc::new(EchoUnit { failing }),
            MetricsCollector::new(),
        )
    }

    #[test]
    fn versions_are_monotonic() {
        let origin = compute_origin(vec![]);
        assert_eq!(origin.latest_version().unwrap().version_id, 1);
        let v2 = origin.publish_version("127.0.0.1:3001").unwrap();
        let v3 = origin.publish_version("127.0.0.1:3002").unwrap();
        assert_eq!((v2.version_id, v3.version_id), (2, 3));
        assert_eq!(origin.versions().len(), 3);
    }

    #[test]
    fn split_is_exact_per_thousand() {
        let origin = compute_origin(vec![]);
        let v1 = origin.latest_version().unwrap();
        let v2 = origin.publish_version("127.0.0.1:3001").unwrap();
        origin.alias().bind(AliasBinding {
            target: v2,
            previous: Some(v1),
            weight: TrafficWeight::new(0.1).unwrap(),
        });

        let to_new = (0..1000)
            .filter(|_| origin.select_version().version_id == 2)
            .count();
        assert_eq!(to_new, 100);
    }

    #[test]
    fn zero_and_full_weights_are_absolute() {
        let origin = compute_origin(vec![]);
        let v1 = origin.latest_version().unwrap();
        let v2 = origin.publish_version("127.0.0.1:3001").unwrap();
        origin.alias().bind(AliasBinding {
            target: v2,
            previous: Some(v1),
            weight: TrafficWeight::ZERO,
        });
        assert!((0..200).all(|_| origin.select_version().version_id == 1));

        origin.alias().set_weight(TrafficWeight::FULL);
        assert!((0..200).all(|_| origin.select_version().version_id == 2));
    }

    #[tokio::test]
    async fn invoke_filters_headers_and_passes_query() {
        let origin = compute_origin(vec![]);
        let req = EdgeRequest::get("/products")
            .with_query("page=2")
            .with_header("accept-language", "en")
            .with_header("user-agent", "curl");
        let resp = origin.invoke(req).await;
        assert_eq!(resp.status_code, 200);
        assert_eq!(
            String::from_utf8_lossy(&resp.body),
            "v1 /products?page=2 accept-language"
        );
        assert_eq!(resp.header("x-canopy-version"), Some("1"));
    }

    #[tokio::test]
    async fn invoke_records_errors_per_version() {
        let origin = compute_origin(vec![2]);
        let v1 = origin.latest_version().unwrap();
        let v2 = origin.publish_version("127.0.0.1:3001").unwrap();
        origin.alias().bind(AliasBinding {
            target: v2.clone(),
            previous: Some(v1.clone()),
            weight: TrafficWeight::new(0.5).unwrap(),
        });
        for _ in 0..1000 {
            origin.invoke(EdgeRequest::get("/")).await;
        }
        let new = origin.metrics().totals(&origin.dimension(&v2)).await;
        let old = origin.metrics().totals(&origin.dimension(&v1)).await;
        assert_eq!(new.invocations, 500);
        assert_eq!(new.errors, 500);
        assert_eq!(old.invocations, 500);
        assert_eq!(old.errors, 0);
    }

    #[tokio::test]
    async fn transport_failure_is_bad_gateway_and_counted() {
        let origin = ComputeOrigin::new(
            ComputeOriginSpec::new("fn", "live", "127.0.0.1:1"),
            Arc::new(BrokenUnit),
            MetricsCollector::new(),
        );
        let resp = origin.invoke(EdgeRequest::get("/")).await;
        assert_eq!(resp.status_code, 502);
        let v1 = origin.latest_version().unwrap();
        assert_eq!(origin.metrics().totals(&origin.dimension(&v1)).await.errors, 1);
    }

    struct ReadOnlyJournal;

    impl ComputeJournal for ReadOnlyJournal {
        fn record_version(&self, _function: &str, _version: &ComputeVersion) -> canopy_state::StateResult<()> {
            Err(canopy_state::StateError::Write("read-only".into()))
        }

        fn record_alias(&self, _record: &AliasRecord) -> canopy_state::StateResult<()> {
            Err(canopy_state::StateError::Write("read-only".into()))
        }
    }

    #[test]
    fn journal_records_versions_and_bindings() {
        let store = StateStore::open_in_memory().unwrap();
        let origin = compute_origin(vec![]).with_journal(Arc::new(store.clone()));
        let v1 = origin.latest_version().unwrap();
        let v2 = origin.publish_version("127.0.0.1:3001").unwrap();
        assert_eq!(store.list_versions("request-handler").unwrap(), vec![v2.clone()]);

        let split = AliasBinding {
            target: v2,
            previous: Some(v1),
            weight: TrafficWeight::from_per_mille(100),
        };
        origin.bind_alias(split.clone()).unwrap();
        let record = store.get_alias("request-handler", "live").unwrap().unwrap();
        assert_eq!(record.binding, split);
    }

    #[test]
    fn failed_journal_write_publishes_nothing() {
        let origin = compute_origin(vec![]).with_journal(Arc::new(ReadOnlyJournal));
        assert!(matches!(
            origin.publish_version("127.0.0.1:3001"),
            Err(EdgeError::Store(_))
        ));
        assert_eq!(origin.versions().len(), 1);

        // The serving path still follows the write.
        let v1 = origin.latest_version().unwrap();
        let rollback = AliasBinding {
            target: v1.clone(),
            previous: None,
            weight: TrafficWeight::ZERO,
        };
        assert!(origin.bind_alias(rollback).is_err());
        assert_eq!(origin.alias().weight(), TrafficWeight::ZERO);
    }

    #[test]
    fn restore_rejects_unknown_binding() {
        let v1 = ComputeVersion {
            version_id: 1,
            published_at: 0,
            code_ref: "a".into(),
        };
        let v2 = ComputeVersion {
            version_id: 2,
            published_at: 0,
            code_ref: "b".into(),
        };
        let spec = ComputeOriginSpec::new("fn", "live", "a");
        let unit: Arc<dyn ComputeUnit> = Arc::new(EchoUnit { failing: vec![] });
        assert!(
            ComputeOrigin::restore(
                spec.clone(),
                unit.clone(),
                MetricsCollector::new(),
                vec![v1.clone()],
                AliasBinding::single(v2.clone()),
            )
            .is_err()
        );
        let origin = ComputeOrigin::restore(
            spec,
            unit,
            MetricsCollector::new(),
            vec![v2.clone(), v1],
            AliasBinding::single(v2),
        )
        .unwrap();
        assert_eq!(origin.publish_version("c").unwrap().version_id, 3);
    }

    #[test]
    fn object_store_roundtrip_and_generation_keys() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        store.put_object("_static/index.html", b"<h1>hi</h1>").unwrap();
        store.put_object("abc123/_static/index.html", b"<h1>new</h1>").unwrap();

        let origin = ObjectStoreOrigin::new("assets", store);
        let resp = origin.fetch("/_static/index.html").unwrap();
        assert_eq!(resp.body, b"<h1>hi</h1>");
        assert_eq!(resp.header("content-type"), Some("text/html; charset=utf-8"));

        let staged = origin.with_generation(Some("abc123".into()));
        assert_eq!(staged.object_key("/_static/index.html"), "abc123/_static/index.html");
        assert_eq!(staged.fetch("/_static/index.html").unwrap().body, b"<h1>new</h1>");
        assert_eq!(staged.fetch("/_static/missing.js").unwrap().status_code, 404);
    }

    #[test]
    fn registry_rejects_duplicates() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let mut registry = OriginRegistry::new();
        let assets = Arc::new(ObjectStoreOrigin::new("assets", store));
        let r = registry.register_object_store(assets.clone()).unwrap();
        assert_eq!(r.to_string(), "object-store:assets");
        assert!(matches!(
            registry.register_object_store(assets),
            Err(EdgeError::DuplicateOrigin(_))
        ));
        assert!(registry.object_store("assets").is_some());
        assert!(registry.compute("assets").is_none());
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("/_static/app.JS"), "text/javascript; charset=utf-8");
        assert_eq!(content_type_for("/_static/font.woff2"), "font/woff2");
        assert_eq!(content_type_for("/_static/LICENSE"), "application/octet-stream");
        assert_eq!(content_type_for("/dir.v2/file"), "application/octet-stream");
    }
}
