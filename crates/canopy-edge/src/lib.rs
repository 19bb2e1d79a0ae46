//! Canopy edge: the single network-facing entry point for a site.
//!
//! Requests are matched against an ordered route table; each route names
//! an origin (the compute function or the static-asset object store) and
//! a cache policy. Dynamic routes reach the compute unit through an alias
//! whose traffic weight splits requests between the previous and the newly
//! published version.
//!
//! # Components
//!
//! - **`route`**: Route patterns, longest-literal-prefix resolution, route table validation
//! - **`policy`**: Cache policies, presets, cache keys, Cache-Control interpretation
//! - **`origin`**: Compute and object-store origins, alias with atomic weight
//! - **`router`**: `EdgeRouter`: copy-on-write route table, dispatch, response cache
//! - **`forward`**: HTTP forwarding to compute units
//! - **`server`**: hyper server feeding the router

pub mod cache;
pub mod error;
pub mod forward;
pub mod message;
pub mod origin;
pub mod policy;
pub mod route;
pub mod router;
pub mod server;

pub use cache::{CacheKey, ResponseCache};
pub use error::EdgeError;
pub use forward::HttpComputeUnit;
pub use message::{EdgeRequest, EdgeResponse};
pub use origin::{
    Alias, BoxFuture, ComputeOrigin, ComputeOriginSpec, ComputeUnit, ObjectStoreOrigin, Origin, OriginRef,
    OriginRegistry,
};
pub use policy::CachePolicy;
pub use route::{Route, RoutePattern, RouteTable};
pub use router::EdgeRouter;
pub use server::EdgeServer;
