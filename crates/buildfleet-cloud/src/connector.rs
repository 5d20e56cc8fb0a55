//! Cloud connector trait definition

use crate::error::{CloudError, Result};
use crate::status::InstanceStatus;
use crate::types::{AgentUserData, TypedError};
use buildfleet_deferred::Promise;
use std::collections::HashMap;
use std::sync::Arc;

/// Promise settled by a connector operation.
pub type CloudPromise<T> = Promise<T, CloudError>;

/// Cloud connector abstraction
///
/// A connector adapts the orchestrator's generic lifecycle operations onto
/// one provider's management API. Synchronous methods block at a bounded
/// join point; `*_async` methods return a promise that settles when the
/// remote operation completes.
pub trait CloudApiConnector {
    /// The image record errors are reported into (one per agent profile
    /// source).
    type Image;
    /// The orchestrator-side instance record whose status this connector
    /// maintains.
    type Instance;
    /// The per-fetch-cycle snapshot built for every live instance.
    type Record;

    /// Verifies the credentials can reach the management plane at all.
    fn test(&self) -> Result<()>;

    /// Polls one instance. Updates the instance's status and error list as a
    /// side effect; returns `None` when the instance does not exist (or the
    /// poll could not complete).
    fn get_instance_status_if_exists(&self, instance: &Arc<Self::Instance>)
    -> Option<InstanceStatus>;

    /// Reconciles every image's live instances in one pass, image name →
    /// instance name → record. Fails only if the top-level wait is
    /// interrupted; per-image and per-instance failures land in the
    /// respective error lists instead.
    fn fetch_instances(
        &self,
        images: &[Arc<Self::Image>],
    ) -> Result<HashMap<String, HashMap<String, Self::Record>>>;

    /// Validates an image's source; an empty list means the image is usable.
    fn check_image(&self, image: &Self::Image) -> Vec<TypedError>;

    /// Validates a single instance; an empty list means it is healthy.
    fn check_instance(&self, instance: &Self::Instance) -> Vec<TypedError>;

    fn create_vm_async(
        &self,
        instance: &Self::Instance,
        user_data: &AgentUserData,
    ) -> CloudPromise<()>;

    fn delete_vm_async(&self, instance: &Self::Instance) -> CloudPromise<()>;

    fn restart_vm_async(&self, instance: &Self::Instance) -> CloudPromise<()>;

    /// Resolves the OS type recorded on a VHD source image, `None` when the
    /// blob exists but cannot be identified unambiguously.
    fn get_vhd_os_type_async(&self, image_url: &str) -> CloudPromise<Option<String>>;
}
