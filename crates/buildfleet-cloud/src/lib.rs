//! BuildFleet cloud provider abstraction
//!
//! This crate defines the surface the BuildFleet orchestrator uses to manage
//! build agents on a cloud provider, independent of any concrete management
//! API:
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │            BuildFleet orchestrator              │
//! │      (agent scheduling, profile lifecycle)      │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │              buildfleet-cloud                   │
//! │  trait CloudApiConnector { ... }                │
//! │  InstanceStatus / CloudError / TypedError       │
//! └───────┬─────────────────────────────────────────┘
//!         │
//! ┌───────▼────────────┐
//! │ buildfleet-cloud-  │
//! │ azure connector    │
//! └────────────────────┘
//! ```
//!
//! Connectors report failures two ways: promise rejections carry a
//! [`CloudError`], while image and instance records collect [`TypedError`]
//! entries so one broken entity never aborts its siblings.

pub mod connector;
pub mod error;
pub mod status;
pub mod types;

// Re-exports
pub use connector::{CloudApiConnector, CloudPromise};
pub use error::{CloudError, Result, StateError, ValidationError};
pub use status::InstanceStatus;
pub use types::{AgentUserData, TypedError};
