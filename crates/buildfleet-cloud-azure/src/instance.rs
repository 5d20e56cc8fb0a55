//! Instance, image and image-detail records

use crate::models::InstanceViewStatus;
use buildfleet_cloud::{InstanceStatus, TypedError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

/// Status-code prefixes of the two state axes ARM reports through the
/// instance view. This is the provider's wire contract; the suffix after the
/// prefix is the state string.
pub(crate) const PROVISIONING_STATE_PREFIX: &str = "ProvisioningState/";
pub(crate) const POWER_STATE_PREFIX: &str = "PowerState/";

/// Snapshot of one remote compute instance, populated by exactly one fetch
/// pipeline per cycle and handed to the caller once that pipeline settles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AzureInstance {
    name: String,
    provisioning_state: Option<String>,
    power_state: Option<String>,
    start_date: Option<DateTime<Utc>>,
    ip_address: Option<String>,
    errors: Vec<TypedError>,
}

impl AzureInstance {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provisioning_state(&self) -> Option<&str> {
        self.provisioning_state.as_deref()
    }

    pub fn power_state(&self) -> Option<&str> {
        self.power_state.as_deref()
    }

    pub fn start_date(&self) -> Option<DateTime<Utc>> {
        self.start_date
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    pub fn set_ip_address(&mut self, address: impl Into<String>) {
        self.ip_address = Some(address.into());
    }

    pub fn errors(&self) -> &[TypedError] {
        &self.errors
    }

    pub fn push_error(&mut self, error: TypedError) {
        self.errors.push(error);
    }

    /// Scans instance-view status entries for the two recognized prefixes
    /// and records the suffix after each. A timestamp on the provisioning
    /// entry becomes the instance's start date.
    pub fn apply_statuses(&mut self, statuses: &[InstanceViewStatus]) {
        for status in statuses {
            if let Some(state) = status.code.strip_prefix(PROVISIONING_STATE_PREFIX) {
                self.provisioning_state = Some(state.to_string());
                if let Some(time) = status.time {
                    self.start_date = Some(time);
                }
            }
            if let Some(state) = status.code.strip_prefix(POWER_STATE_PREFIX) {
                self.power_state = Some(state.to_string());
            }
        }
    }

    /// Folds the two state axes into one orchestrator status. A terminal
    /// provisioning state wins; otherwise the power state decides.
    pub fn instance_status(&self) -> InstanceStatus {
        if let Some(provisioning) = self.provisioning_state.as_deref() {
            if provisioning.eq_ignore_ascii_case("creating") {
                return InstanceStatus::Starting;
            }
            if provisioning.eq_ignore_ascii_case("deleting") {
                return InstanceStatus::Stopping;
            }
            if provisioning.eq_ignore_ascii_case("failed") {
                return InstanceStatus::Error;
            }
        }

        match self
            .power_state
            .as_deref()
            .map(|state| state.to_ascii_lowercase())
            .as_deref()
        {
            Some("running") => InstanceStatus::Running,
            Some("starting") => InstanceStatus::Starting,
            Some("restarting") => InstanceStatus::Restarting,
            Some("stopping") | Some("deallocating") => InstanceStatus::Stopping,
            Some("stopped") | Some("deallocated") => InstanceStatus::Stopped,
            _ => InstanceStatus::Unknown,
        }
    }
}

/// Static configuration of one agent image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureImageDetails {
    /// Prefix every instance of this image is named with.
    pub vm_name_prefix: String,
    /// Source identifier stamped into the `buildfleet-source` tag.
    pub source_name: String,
    /// URL of the generalized VHD the image boots from.
    pub image_url: String,
    pub network_id: String,
    pub subnet_id: String,
    pub username: String,
    pub password: String,
    pub os_type: String,
    pub vm_size: String,
    /// Whether instances get a public address (looked up under the
    /// `<name>-pip` convention).
    pub vm_public_ip: bool,
}

/// One agent image as the orchestrator sees it. The connector replaces its
/// error list wholesale on every fetch cycle.
#[derive(Debug)]
pub struct AzureCloudImage {
    name: String,
    details: AzureImageDetails,
    errors: Mutex<Vec<TypedError>>,
}

impl AzureCloudImage {
    pub fn new(name: impl Into<String>, details: AzureImageDetails) -> Self {
        Self {
            name: name.into(),
            details,
            errors: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn details(&self) -> &AzureImageDetails {
        &self.details
    }

    pub fn errors(&self) -> Vec<TypedError> {
        self.errors.lock().clone()
    }

    /// Replaces (never appends to) the image's error state.
    pub fn update_errors(&self, errors: Vec<TypedError>) {
        *self.errors.lock() = errors;
    }
}

/// One orchestrator-side instance record. Status and errors are written by
/// the connector's polling entry points.
#[derive(Debug)]
pub struct AzureCloudInstance {
    name: String,
    image: Arc<AzureCloudImage>,
    status: Mutex<InstanceStatus>,
    errors: Mutex<Vec<TypedError>>,
}

impl AzureCloudInstance {
    pub fn new(image: Arc<AzureCloudImage>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image,
            status: Mutex::new(InstanceStatus::Unknown),
            errors: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &Arc<AzureCloudImage> {
        &self.image
    }

    pub fn status(&self) -> InstanceStatus {
        *self.status.lock()
    }

    pub fn set_status(&self, status: InstanceStatus) {
        *self.status.lock() = status;
    }

    pub fn errors(&self) -> Vec<TypedError> {
        self.errors.lock().clone()
    }

    /// Replaces (never appends to) the instance's error state.
    pub fn update_errors(&self, errors: Vec<TypedError>) {
        *self.errors.lock() = errors;
    }
}
