//! canopy-release: the pieces of a site wired together, and a release
//! driven through them.
//!
//! # Components
//!
//! - **`topology`**: builds origins, the route table, the edge router and
//!   the canary controller from `canopy.toml` and restores persisted state
//! - **`publisher`**: records the public endpoint in the parameter store
//! - **`pipeline`**: build, stage, shift traffic, record, publish

pub mod error;
pub mod pipeline;
pub mod publisher;
pub mod topology;

pub use error::ReleaseError;
pub use pipeline::{ReleaseOutcome, ReleasePipeline};
pub use publisher::{EndpointPublisher, PublishWarning};
pub use topology::{ASSETS_ORIGIN, GENERATION_PARAMETER, Topology};
