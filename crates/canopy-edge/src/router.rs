//! The edge router: route resolution, dispatch to origins, response caching.
//!
//! The route table lives behind an `ArcSwap`. Requests load the current
//! table once and keep it for their whole lifetime, so a table swap never
//! affects a request already in flight.

use std::sync::Arc;

use arc_swap::{ArcSwap, Guard};
use tracing::{debug, error, info};

use crate::cache::ResponseCache;
use crate::error::EdgeError;
use crate::message::{EdgeRequest, EdgeResponse};
use crate::origin::{ObjectStoreOrigin, Origin, OriginRef};
use crate::route::{Route, RouteTable};

pub struct EdgeRouter {
    table: ArcSwap<RouteTable>,
    cache: ResponseCache,
}

impl EdgeRouter {
    pub fn new(table: RouteTable) -> Self {
        Self::with_cache(table, ResponseCache::new())
    }

    pub fn with_cache(table: RouteTable, cache: ResponseCache) -> Self {
        Self {
            table: ArcSwap::from_pointee(table),
            cache,
        }
    }

    /// The route a path resolves to under the current table.
    pub fn resolve(&self, path: &str) -> Route {
        self.table.load().resolve(path).clone()
    }

    pub fn table(&self) -> Arc<RouteTable> {
        self.table.load_full()
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Point an object-store origin at a new content generation and drop
    /// every cached response.
    ///
    /// Callers must only do this after the whole generation is uploaded.
    /// Concurrent swaps are applied one after the other; none is lost.
    pub fn swap_static_generation(
        &self,
        origin_name: &str,
        generation: Option<String>,
    ) -> Result<(), EdgeError> {
        let origin_ref = OriginRef::ObjectStore(origin_name.to_string());
        let mut current = self.table.load_full();
        loop {
            let Some(Origin::ObjectStore(origin)) = current.origin(&origin_ref) else {
                return Err(EdgeError::UnknownOrigin(origin_ref));
            };
            let next = Arc::new(
                current.with_object_store(Arc::new(origin.with_generation(generation.clone())))?,
            );
            let previous = self.table.compare_and_swap(&current, next);
            if Arc::ptr_eq(&previous, &current) {
                break;
            }
            debug!(origin = origin_name, "route table changed during swap, retrying");
            current = Guard::into_inner(previous);
        }
        let dropped = self.cache.invalidate_all();
        info!(
            origin = origin_name,
            generation = generation.as_deref().unwrap_or("-"),
            dropped,
            "static generation swapped"
        );
        Ok(())
    }

    /// Generation currently served by an object-store origin.
    pub fn static_generation(&self, origin_name: &str) -> Option<String> {
        let table = self.table.load();
        table
            .origins()
            .object_store(origin_name)
            .and_then(|o| o.content_version().map(str::to_string))
    }

    pub fn invalidate_cache(&self) -> usize {
        self.cache.invalidate_all()
    }

    /// Serve one request.
    pub async fn dispatch(&self, request: EdgeRequest) -> EdgeResponse {
        let table = self.table.load_full();
        let route = table.resolve(&request.path);
        let Some(origin) = table.origin(&route.origin) else {
            // Unreachable for tables built through `RouteTable::build`.
            error!(origin = %route.origin, "route points at a missing origin");
            return EdgeResponse::bad_gateway("origin unavailable");
        };

        let policy = &route.cache_policy;
        let content_version = match origin {
            Origin::ObjectStore(o) => o.content_version(),
            Origin::Compute(_) => None,
        };
        let key = policy.cache_key(&request, content_version);

        if let Some(key) = &key
            && let Some(hit) = self.cache.get(key)
        {
            debug!(%key, "edge cache hit");
            return hit.with_header("x-cache", "Hit from edge");
        }

        let mut response = match origin {
            Origin::Compute(compute) => compute.invoke(request).await,
            Origin::ObjectStore(store) => fetch_object(store, &request.path),
        };
        if policy.compression_enabled() {
            response = response.with_header("vary", "accept-encoding");
        }

        match key {
            Some(key) => {
                let ttl = policy.effective_ttl(response.header("cache-control"));
                self.cache.insert(key, response.clone(), ttl);
                response.with_header("x-cache", "Miss from edge")
            }
            None => response,
        }
    }
}

fn fetch_object(origin: &ObjectStoreOrigin, path: &str) -> EdgeResponse {
    origin.fetch(path).unwrap_or_else(|e| {
        error!(origin = origin.name(), path, error = %e, "object store read failed");
        EdgeResponse::new(500, "Internal Server Error")
    })
}
