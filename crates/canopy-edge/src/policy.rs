//! Cache policies: TTL bounds, cache-key composition, Cache-Control reading.
//!
//! A policy is validated when it is built; `min_ttl <= default_ttl <= max_ttl`
//! holds for every value of this type.

use std::collections::BTreeSet;
use std::time::Duration;

use canopy_core::config::{CachePolicyConfig, CustomCachePolicy};
use canopy_core::parse_duration;

use crate::cache::CacheKey;
use crate::error::EdgeError;
use crate::message::EdgeRequest;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const YEAR: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    name: String,
    min_ttl: Duration,
    default_ttl: Duration,
    max_ttl: Duration,
    vary_by_query: bool,
    vary_by_cookie: bool,
    vary_by_header: BTreeSet<String>,
    compression_enabled: bool,
}

impl CachePolicy {
    pub fn new(
        name: &str,
        min_ttl: Duration,
        default_ttl: Duration,
        max_ttl: Duration,
    ) -> Result<Self, EdgeError> {
        if min_ttl > default_ttl || default_ttl > max_ttl {
            return Err(EdgeError::InvalidCachePolicy(format!(
                "{name}: expected min_ttl <= default_ttl <= max_ttl, got {min_ttl:?} / {default_ttl:?} / {max_ttl:?}"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            min_ttl,
            default_ttl,
            max_ttl,
            vary_by_query: false,
            vary_by_cookie: false,
            vary_by_header: BTreeSet::new(),
            compression_enabled: false,
        })
    }

    pub fn with_query(mut self) -> Self {
        self.vary_by_query = true;
        self
    }

    pub fn with_cookies(mut self) -> Self {
        self.vary_by_cookie = true;
        self
    }

    pub fn with_header(mut self, name: &str) -> Self {
        self.vary_by_header.insert(name.to_ascii_lowercase());
        self
    }

    pub fn with_compression(mut self) -> Self {
        self.compression_enabled = true;
        self
    }

    /// Nothing cached, nothing varied. The default for compute routes.
    pub fn caching_disabled() -> Self {
        Self::fixed("CachingDisabled", Duration::ZERO, Duration::ZERO, Duration::ZERO)
    }

    /// Long-lived caching for content-addressed static files.
    pub fn caching_optimized() -> Self {
        Self::fixed("CachingOptimized", Duration::from_secs(1), DAY, YEAR).with_compression()
    }

    /// Dynamic responses revalidated on every request unless the origin
    /// sends its own Cache-Control. Varies by every query parameter and cookie.
    pub fn server_revalidate() -> Self {
        Self::fixed("ServerRevalidate", Duration::ZERO, Duration::ZERO, YEAR)
            .with_query()
            .with_cookies()
            .with_compression()
    }

    // Presets are ordered by construction.
    fn fixed(name: &str, min_ttl: Duration, default_ttl: Duration, max_ttl: Duration) -> Self {
        Self {
            name: name.to_string(),
            min_ttl,
            default_ttl,
            max_ttl,
            vary_by_query: false,
            vary_by_cookie: false,
            vary_by_header: BTreeSet::new(),
            compression_enabled: false,
        }
    }

    /// Look up a preset by name.
    pub fn preset(name: &str) -> Result<Self, EdgeError> {
        match name {
            "CachingDisabled" => Ok(Self::caching_disabled()),
            "CachingOptimized" => Ok(Self::caching_optimized()),
            "ServerRevalidate" => Ok(Self::server_revalidate()),
            other => Err(EdgeError::InvalidCachePolicy(format!(
                "unknown cache policy preset '{other}'"
            ))),
        }
    }

    pub fn from_config(config: &CachePolicyConfig) -> Result<Self, EdgeError> {
        match config {
            CachePolicyConfig::Preset(name) => Self::preset(name),
            CachePolicyConfig::Custom(custom) => Self::from_custom(custom),
        }
    }

    fn from_custom(custom: &CustomCachePolicy) -> Result<Self, EdgeError> {
        let mut policy = Self::new(
            "Custom",
            parse_duration(&custom.min_ttl)?,
            parse_duration(&custom.default_ttl)?,
            parse_duration(&custom.max_ttl)?,
        )?;
        policy.vary_by_query = custom.vary_by_query;
        policy.vary_by_cookie = custom.vary_by_cookie;
        for header in &custom.vary_by_header {
            policy = policy.with_header(header);
        }
        policy.compression_enabled = custom.compression;
        Ok(policy)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn min_ttl(&self) -> Duration {
        self.min_ttl
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn max_ttl(&self) -> Duration {
        self.max_ttl
    }

    pub fn compression_enabled(&self) -> bool {
        self.compression_enabled
    }

    pub fn varied_headers(&self) -> impl Iterator<Item = &str> {
        self.vary_by_header.iter().map(String::as_str)
    }

    /// A policy whose max TTL is zero never stores anything.
    pub fn caching_enabled(&self) -> bool {
        !self.max_ttl.is_zero()
    }

    /// Build the cache key for a request, or `None` if the request must
    /// bypass the cache.
    ///
    /// `content_version` is the object-store generation for static routes,
    /// so a new upload never hits entries cached for the previous one.
    pub fn cache_key(&self, req: &EdgeRequest, content_version: Option<&str>) -> Option<CacheKey> {
        if !self.caching_enabled() || !req.is_cacheable_method() {
            return None;
        }

        let mut key = format!("{} {}", req.method, req.path);
        if let Some(version) = content_version {
            key.push_str(&format!(" @{version}"));
        }
        if self.vary_by_query {
            let pairs: Vec<String> = req
                .sorted_query_pairs()
                .into_iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            key.push_str(&format!(" q[{}]", pairs.join("&")));
        }
        if self.vary_by_cookie {
            let cookies: Vec<String> = req
                .sorted_cookie_pairs()
                .into_iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            key.push_str(&format!(" c[{}]", cookies.join(";")));
        }
        for header in &self.vary_by_header {
            key.push_str(&format!(" h[{header}={}]", req.header(header).unwrap_or("")));
        }
        if self.compression_enabled {
            key.push_str(&format!(" e[{}]", negotiated_encoding(req)));
        }
        Some(CacheKey::new(key))
    }

    /// How long a response may live at the edge given its Cache-Control.
    ///
    /// `s-maxage` wins over `max-age`; `no-store`, `no-cache` and `private`
    /// fall back to the minimum TTL. The result is clamped into
    /// `[min_ttl, max_ttl]`.
    pub fn effective_ttl(&self, cache_control: Option<&str>) -> Duration {
        let Some(header) = cache_control else {
            return self.default_ttl;
        };

        let mut max_age = None;
        let mut s_maxage = None;
        for directive in header.split(',') {
            let directive = directive.trim().to_ascii_lowercase();
            let (name, value) = match directive.split_once('=') {
                Some((n, v)) => (n.trim().to_string(), Some(v.trim().trim_matches('"').to_string())),
                None => (directive.clone(), None),
            };
            match name.as_str() {
                "no-store" | "no-cache" | "private" => return self.min_ttl,
                "max-age" => max_age = value.and_then(|v| v.parse::<u64>().ok()),
                "s-maxage" => s_maxage = value.and_then(|v| v.parse::<u64>().ok()),
                _ => {}
            }
        }

        match s_maxage.or(max_age) {
            Some(secs) => Duration::from_secs(secs).clamp(self.min_ttl, self.max_ttl),
            None => self.default_ttl,
        }
    }
}

/// The encoding the edge would serve for this request.
fn negotiated_encoding(req: &EdgeRequest) -> &'static str {
    let accepted = req.header("accept-encoding").unwrap_or("");
    let accepts = |name: &str| {
        accepted
            .split(',')
            .any(|e| e.split(';').next().map(str::trim) == Some(name))
    };
    if accepts("br") {
        "br"
    } else if accepts("gzip") {
        "gzip"
    } else {
        "identity"
    }
}
