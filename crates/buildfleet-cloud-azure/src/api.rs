//! Azure management plane collaborator trait
//!
//! The connector issues every remote call through this seam. Implementations
//! own the transport, credentials and proxy configuration; they report a 404
//! as [`buildfleet_cloud::CloudError::NotFound`] so status polling can tell
//! a missing instance from a broken call. No retries happen behind this
//! trait: one call, one outcome.

use crate::models::{
    Deployment, LocationInfo, ResourceGroupInfo, StorageAccountInfo, StorageAccountKeys,
    SubscriptionInfo, VirtualMachine, VirtualNetworkInfo, VmSize,
};
use async_trait::async_trait;
use buildfleet_cloud::Result;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait AzureApi: Send + Sync + 'static {
    /// Lists at most `top` resource groups; used as a cheap credential check.
    async fn list_resource_groups(&self, top: usize) -> Result<Vec<ResourceGroupInfo>>;

    /// Lists every virtual machine visible to the subscription.
    async fn list_virtual_machines(&self) -> Result<Vec<VirtualMachine>>;

    /// Fetches one virtual machine with its instance view expanded.
    async fn get_virtual_machine(&self, group: &str, name: &str) -> Result<VirtualMachine>;

    /// Resolves a public IP address resource to its address, `None` while
    /// the address is still being allocated.
    async fn get_public_ip(&self, group: &str, name: &str) -> Result<Option<String>>;

    async fn restart_virtual_machine(&self, group: &str, name: &str) -> Result<()>;

    async fn list_vm_sizes(&self, location: &str) -> Result<Vec<VmSize>>;

    /// Create-or-update semantics; repeating a call with identical
    /// parameters must succeed.
    async fn create_resource_group(&self, group: &str, location: &str) -> Result<()>;

    async fn create_deployment(
        &self,
        group: &str,
        deployment: &str,
        body: Deployment,
    ) -> Result<()>;

    async fn delete_resource_group(&self, group: &str) -> Result<()>;

    async fn list_storage_accounts(&self) -> Result<Vec<StorageAccountInfo>>;

    async fn get_storage_account_keys(
        &self,
        group: &str,
        account: &str,
    ) -> Result<StorageAccountKeys>;

    /// Builds an authenticated handle on a blob container.
    async fn open_blob_container(
        &self,
        account: &str,
        key: &str,
        container: &str,
    ) -> Result<Arc<dyn BlobContainer>>;

    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionInfo>>;

    async fn list_locations(&self, subscription: &str) -> Result<Vec<LocationInfo>>;

    async fn list_virtual_networks(&self) -> Result<Vec<VirtualNetworkInfo>>;
}

/// Authenticated view on one blob container.
#[async_trait]
pub trait BlobContainer: Send + Sync {
    /// Lists blobs whose names start with `prefix`.
    async fn list_blobs(&self, prefix: &str) -> Result<Vec<Arc<dyn BlobHandle>>>;
}

/// One blob inside a container.
#[async_trait]
pub trait BlobHandle: Send + Sync {
    fn name(&self) -> &str;

    fn uri(&self) -> &str;

    /// Fetches the blob's metadata map (a separate round trip on ARM).
    async fn fetch_metadata(&self) -> Result<HashMap<String, String>>;

    /// Deletes the blob if it still exists; `true` when something was
    /// deleted.
    async fn delete_if_exists(&self) -> Result<bool>;
}
