//! Route patterns and the validated, ordered route table.

use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::EdgeError;
use crate::origin::{ObjectStoreOrigin, Origin, OriginRef, OriginRegistry};
use crate::policy::CachePolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePattern {
    /// `/*`, matches every path.
    Default,
    /// `/prefix/*`, holds the literal part including the trailing slash.
    Prefix(String),
    /// A literal path such as `/robots.txt`.
    Exact(String),
}

impl RoutePattern {
    pub fn parse(pattern: &str) -> Result<Self, EdgeError> {
        let invalid = |reason: &str| EdgeError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if !pattern.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }
        if pattern == "/*" {
            return Ok(Self::Default);
        }
        match pattern.find('*') {
            None => Ok(Self::Exact(pattern.to_string())),
            Some(i) if i == pattern.len() - 1 => Ok(Self::Prefix(pattern[..i].to_string())),
            Some(_) => Err(invalid("'*' is only allowed at the end")),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Default => true,
            Self::Prefix(prefix) => path.starts_with(prefix.as_str()),
            Self::Exact(exact) => path == exact,
        }
    }

    /// Length of the non-wildcard part; longer wins during resolution.
    pub fn literal_len(&self) -> usize {
        match self {
            Self::Default => 0,
            Self::Prefix(literal) | Self::Exact(literal) => literal.len(),
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("/*"),
            Self::Prefix(prefix) => write!(f, "{prefix}*"),
            Self::Exact(exact) => f.write_str(exact),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub pattern: RoutePattern,
    pub origin: OriginRef,
    pub cache_policy: CachePolicy,
}

impl Route {
    /// A route with the conventional policy for its origin kind: compute
    /// routes are not cached, object-store routes are cached long-lived.
    pub fn new(pattern: &str, origin: OriginRef) -> Result<Self, EdgeError> {
        let cache_policy = match origin {
            OriginRef::Compute(_) => CachePolicy::caching_disabled(),
            OriginRef::ObjectStore(_) => CachePolicy::caching_optimized(),
        };
        Ok(Self {
            pattern: RoutePattern::parse(pattern)?,
            origin,
            cache_policy,
        })
    }

    pub fn with_policy(mut self, cache_policy: CachePolicy) -> Self {
        self.cache_policy = cache_policy;
        self
    }
}

/// An immutable route table. Replaced whole, never edited in place.
#[derive(Clone)]
pub struct RouteTable {
    /// Non-default routes, most specific first.
    specific: Vec<Route>,
    default: Route,
    origins: OriginRegistry,
}

impl RouteTable {
    /// Validate and order the routes.
    ///
    /// Fails on a missing default route, a repeated pattern, or a route
    /// naming an origin that is not in `origins`.
    pub fn build(routes: Vec<Route>, origins: OriginRegistry) -> Result<Self, EdgeError> {
        let mut seen = std::collections::HashSet::new();
        for route in &routes {
            if !seen.insert(route.pattern.to_string()) {
                return Err(EdgeError::DuplicatePattern(route.pattern.to_string()));
            }
            if !origins.contains(&route.origin) {
                return Err(EdgeError::UnregisteredOrigin {
                    pattern: route.pattern.to_string(),
                    origin: route.origin.clone(),
                });
            }
        }

        let (defaults, mut specific): (Vec<Route>, Vec<Route>) =
            routes.into_iter().partition(|r| r.pattern.is_default());
        let default = defaults
            .into_iter()
            .next()
            .ok_or(EdgeError::MissingDefaultRoute)?;

        // Exact beats prefix when the literal parts are equally long.
        specific.sort_by_key(|r| {
            (
                Reverse(r.pattern.literal_len()),
                matches!(r.pattern, RoutePattern::Prefix(_)),
            )
        });

        debug!(routes = specific.len() + 1, "built route table");
        Ok(Self {
            specific,
            default,
            origins,
        })
    }

    /// The most specific matching route, else the default.
    pub fn resolve(&self, path: &str) -> &Route {
        self.specific
            .iter()
            .find(|r| r.pattern.matches(path))
            .unwrap_or(&self.default)
    }

    /// Routes in evaluation order, default last.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.specific.iter().chain(std::iter::once(&self.default))
    }

    pub fn origins(&self) -> &OriginRegistry {
        &self.origins
    }

    pub fn origin(&self, origin_ref: &OriginRef) -> Option<&Origin> {
        self.origins.lookup(origin_ref)
    }

    /// A copy of this table with one object-store origin replaced.
    pub fn with_object_store(&self, origin: Arc<ObjectStoreOrigin>) -> Result<Self, EdgeError> {
        let origin_ref = OriginRef::ObjectStore(origin.name().to_string());
        if !self.origins.contains(&origin_ref) {
            return Err(EdgeError::UnknownOrigin(origin_ref));
        }
        let mut table = self.clone();
        table.origins.replace_object_store(origin);
        Ok(table)
    }
}
