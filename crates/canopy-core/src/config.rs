//! canopy.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::duration::parse_duration;
use crate::error::ConfigError;
use crate::types::Comparison;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanopyConfig {
    pub site: SiteConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub compute: ComputeConfig,
    #[serde(default)]
    pub edge: EdgeConfig,
    #[serde(default)]
    pub canary: CanarySection,
    #[serde(default)]
    pub alarm: AlarmSection,
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    /// Public address recorded by the endpoint publisher after a release.
    pub domain_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    pub command: String,
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_static_prefix")]
    pub static_prefix: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: "npm run build".to_string(),
            working_dir: default_working_dir(),
            output_dir: default_output_dir(),
            static_prefix: default_static_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeConfig {
    #[serde(default = "default_compute_name")]
    pub name: String,
    #[serde(default = "default_alias")]
    pub alias: String,
    /// `host:port` of the compute unit serving the initial version.
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
    /// Request headers forwarded to the compute unit. Everything else is dropped.
    #[serde(default)]
    pub forward_headers: Vec<String>,
    #[serde(default = "default_compute_timeout")]
    pub timeout: String,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            name: default_compute_name(),
            alias: default_alias(),
            entry_point: default_entry_point(),
            forward_headers: Vec::new(),
            timeout: default_compute_timeout(),
        }
    }
}

/// Which origin a route sends traffic to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteOrigin {
    Compute,
    Assets,
}

/// A cache policy, either by preset name or spelled out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CachePolicyConfig {
    Preset(String),
    Custom(CustomCachePolicy),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomCachePolicy {
    pub min_ttl: String,
    pub default_ttl: String,
    pub max_ttl: String,
    #[serde(default)]
    pub vary_by_query: bool,
    #[serde(default)]
    pub vary_by_cookie: bool,
    #[serde(default)]
    pub vary_by_header: Vec<String>,
    #[serde(default)]
    pub compression: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub pattern: String,
    pub origin: RouteOrigin,
    pub cache_policy: Option<CachePolicyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteConfig>,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            routes: default_routes(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanarySection {
    pub preset: Option<String>,
    pub canary_fraction: Option<f64>,
    pub bake_window: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmSection {
    #[serde(default = "default_evaluation_window")]
    pub evaluation_window: String,
    #[serde(default = "default_threshold")]
    pub threshold: u64,
    #[serde(default = "default_evaluation_periods")]
    pub evaluation_periods: u32,
    #[serde(default)]
    pub comparison: Comparison,
}

impl Default for AlarmSection {
    fn default() -> Self {
        Self {
            evaluation_window: default_evaluation_window(),
            threshold: default_threshold(),
            evaluation_periods: default_evaluation_periods(),
            comparison: Comparison::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_parameter_name")]
    pub parameter_name: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            parameter_name: default_parameter_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_working_dir() -> String {
    ".".to_string()
}
fn default_output_dir() -> String {
    "public".to_string()
}
fn default_static_prefix() -> String {
    "_static".to_string()
}
fn default_compute_name() -> String {
    "request-handler".to_string()
}
fn default_alias() -> String {
    "live".to_string()
}
fn default_entry_point() -> String {
    "127.0.0.1:3000".to_string()
}
fn default_compute_timeout() -> String {
    "10s".to_string()
}
fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_routes() -> Vec<RouteConfig> {
    vec![
        RouteConfig {
            pattern: "/*".to_string(),
            origin: RouteOrigin::Compute,
            cache_policy: None,
        },
        RouteConfig {
            pattern: "/_static/*".to_string(),
            origin: RouteOrigin::Assets,
            cache_policy: None,
        },
    ]
}
fn default_evaluation_window() -> String {
    "1m".to_string()
}
fn default_threshold() -> u64 {
    1
}
fn default_evaluation_periods() -> u32 {
    1
}
fn default_parameter_name() -> String {
    "/remix/distribution/url".to_string()
}
fn default_max_attempts() -> u32 {
    3
}

impl CanopyConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: CanopyConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check the values that can be checked without building anything.
    ///
    /// Route-table and canary invariants are enforced by the constructors
    /// that consume these sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.site.domain_name.trim().is_empty() {
            return Err(ConfigError::invalid("site.domain_name", "must not be empty"));
        }
        if self.build.command.trim().is_empty() {
            return Err(ConfigError::invalid("build.command", "must not be empty"));
        }
        if self.build.static_prefix.contains('/') || self.build.static_prefix.is_empty() {
            return Err(ConfigError::invalid(
                "build.static_prefix",
                "must be a single non-empty path segment",
            ));
        }
        parse_duration(&self.compute.timeout)?;
        if parse_duration(&self.alarm.evaluation_window)?.is_zero() {
            return Err(ConfigError::invalid(
                "alarm.evaluation_window",
                "must be greater than zero",
            ));
        }
        if self.alarm.evaluation_periods == 0 {
            return Err(ConfigError::invalid(
                "alarm.evaluation_periods",
                "must be at least 1",
            ));
        }
        if let Some(window) = &self.canary.bake_window {
            parse_duration(window)?;
        }
        if self.upload.max_attempts == 0 {
            return Err(ConfigError::invalid("upload.max_attempts", "must be at least 1"));
        }
        Ok(())
    }

    /// Scaffold a minimal canopy.toml for a site.
    pub fn scaffold(name: &str, domain_name: &str) -> Self {
        CanopyConfig {
            site: SiteConfig {
                name: name.to_string(),
                domain_name: domain_name.to_string(),
            },
            build: BuildConfig::default(),
            compute: ComputeConfig::default(),
            edge: EdgeConfig::default(),
            canary: CanarySection {
                preset: Some("Canary10Percent5Minutes".to_string()),
                ..Default::default()
            },
            alarm: AlarmSection::default(),
            endpoint: EndpointConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}
