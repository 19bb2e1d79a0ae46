//! canopy-state: embedded store for Canopy.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for the static-asset object store, the parameter store that
//! downstream consumers read the published endpoint from, the deployment
//! history, and the compute versions and alias bindings of each function.
//!
//! # Architecture
//!
//! Object blobs are stored as raw bytes; every other record is
//! JSON-serialized into redb's `&[u8]` value columns. Keys are plain
//! strings so related records can be found by prefix scan
//! (`{generation}/_static/...`, `{function}:{version}`).
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{BlobStore, ComputeJournal, ParameterStore, StateStore};
pub use types::*;
