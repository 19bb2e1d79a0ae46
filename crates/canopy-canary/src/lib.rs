//! Canopy canary releases.
//!
//! A deployment moves a newly published compute version through
//! `INITIATED → SHIFTING → BAKING` and ends in `PROMOTED` or `ROLLED_BACK`.
//! While baking, the controller sleeps until either the bake window elapses
//! or an alarm on the new version's own error dimension fires; the alarm
//! wins when both are ready.
//!
//! # Components
//!
//! - **`strategy`**: Canary and alarm configuration, presets, validation
//! - **`alarm`**: Alarm evaluation over metric windows, alarm event sources
//! - **`deployment`**: The pure deployment state machine
//! - **`controller`**: Async controller: admission guard, bake loop, notifications

pub mod alarm;
pub mod controller;
pub mod deployment;
pub mod error;
pub mod strategy;

pub use alarm::{AlarmEvaluator, AlarmEvent, AlarmSource, MetricsAlarmSource};
pub use controller::{CanaryController, CancelHandle, DeploymentHandle, Notification, Reservation};
pub use deployment::{Deployment, DeploymentAction};
pub use error::CanaryError;
pub use strategy::{AlarmConfig, CanaryConfig};
