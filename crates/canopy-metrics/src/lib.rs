//! canopy-metrics: invocation metrics for Canopy compute origins.
//!
//! Counts invocations and errors per alarm dimension (function, alias,
//! executed version). The edge serving path records one sample per compute
//! invocation; canary alarms drain one evaluation window at a time.
//!
//! # Architecture
//!
//! ```text
//! MetricsCollector
//!   ├── record_invocation() ← called per compute request
//!   ├── drain_window()      → counts since the last drain, then reset
//!   └── totals()            → cumulative counts (never reset)
//! ```

pub mod collector;

pub use collector::{MetricsCollector, WindowCounts};
