//! Azure Resource Manager connector for BuildFleet
//!
//! Adapts BuildFleet's agent lifecycle operations (create, delete, restart,
//! status polling, fleet reconciliation) onto the ARM management plane. All
//! remote work goes through the [`api::AzureApi`] collaborator trait; the
//! connector itself only orchestrates: it fans independent lookups out,
//! chains dependent ones, and folds per-entity failures into typed error
//! lists instead of aborting sibling operations.
//!
//! Instances are matched to their image by a name prefix plus the
//! `buildfleet-server` / `buildfleet-profile` / `buildfleet-source` resource
//! tags stamped on every deployment this connector creates.

pub mod api;
pub mod connector;
pub mod instance;
pub mod models;
pub mod sort;
pub mod storage;

// Re-exports
pub use api::{AzureApi, BlobContainer, BlobHandle};
pub use connector::{AzureApiConnector, ConnectorConfig, TAG_PROFILE, TAG_SERVER, TAG_SOURCE};
pub use instance::{AzureCloudImage, AzureCloudInstance, AzureImageDetails, AzureInstance};
pub use storage::BlobPath;
