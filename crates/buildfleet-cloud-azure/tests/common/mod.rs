//! Shared mock management plane for connector tests

#![allow(dead_code)]

use async_trait::async_trait;
use buildfleet_cloud::{CloudError, Result};
use buildfleet_cloud_azure::models::{
    Deployment, InstanceView, InstanceViewStatus, LocationInfo, ResourceGroupInfo,
    StorageAccountInfo, StorageAccountKeys, SubscriptionInfo, VirtualMachine, VirtualNetworkInfo,
    VmSize,
};
use buildfleet_cloud_azure::{
    AzureApi, AzureApiConnector, AzureCloudImage, AzureCloudInstance, AzureImageDetails,
    BlobContainer, BlobHandle, ConnectorConfig, TAG_PROFILE, TAG_SERVER, TAG_SOURCE,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const SERVER_ID: &str = "srv-1";
pub const PROFILE_ID: &str = "profile-1";
pub const SOURCE_NAME: &str = "linux-medium";
pub const IMAGE_URL: &str = "https://acct.blob.core.windows.net/vhds/image.vhd";

/// Recorded calls and canned answers, shared with the test body through an
/// `Arc` so it stays inspectable after the api moves into the connector.
#[derive(Default)]
pub struct MockState {
    pub machines: Mutex<Vec<VirtualMachine>>,
    pub machine_views: Mutex<HashMap<String, VirtualMachine>>,
    pub fail_machines: Mutex<HashMap<String, CloudError>>,
    pub fail_listing: Mutex<Option<CloudError>>,
    pub hang_listing: Mutex<bool>,
    pub fail_groups: Mutex<Option<CloudError>>,
    pub public_ips: Mutex<HashMap<String, String>>,
    pub fail_ips: Mutex<HashMap<String, CloudError>>,
    pub accounts: Mutex<Vec<StorageAccountInfo>>,
    pub keys: Mutex<HashMap<String, StorageAccountKeys>>,
    pub blobs: Mutex<HashMap<String, Vec<Arc<MockBlob>>>>,
    pub fail_container: Mutex<Option<CloudError>>,
    pub sizes: Mutex<Vec<VmSize>>,
    pub subscriptions: Mutex<Vec<SubscriptionInfo>>,
    pub locations: Mutex<Vec<LocationInfo>>,
    pub networks: Mutex<Vec<VirtualNetworkInfo>>,
    pub created_groups: Mutex<Vec<(String, String)>>,
    pub deployments: Mutex<Vec<(String, String, Deployment)>>,
    pub deleted_groups: Mutex<Vec<String>>,
    pub restarted: Mutex<Vec<String>>,
}

impl MockState {
    /// Registers a machine for both the fleet listing and per-instance
    /// lookups.
    pub fn add_machine(&self, machine: VirtualMachine) {
        self.machine_views
            .lock()
            .insert(machine.name.clone(), machine.clone());
        self.machines.lock().push(machine);
    }

    pub fn add_storage_account(&self, account: &str, location: &str, group: &str) {
        self.accounts.lock().push(StorageAccountInfo {
            id: format!(
                "/subscriptions/sub-1/resourceGroups/{group}/providers/Microsoft.Storage/storageAccounts/{account}"
            ),
            name: account.to_string(),
            location: location.to_string(),
        });
        self.keys.lock().insert(
            account.to_string(),
            StorageAccountKeys {
                key1: "key-one".to_string(),
                key2: None,
            },
        );
    }

    pub fn add_blob(&self, container: &str, blob: MockBlob) -> Arc<MockBlob> {
        let blob = Arc::new(blob);
        self.blobs
            .lock()
            .entry(container.to_string())
            .or_default()
            .push(Arc::clone(&blob));
        blob
    }
}

pub struct MockAzureApi {
    state: Arc<MockState>,
}

impl MockAzureApi {
    pub fn new() -> (Self, Arc<MockState>) {
        let state = Arc::new(MockState::default());
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

#[async_trait]
impl AzureApi for MockAzureApi {
    async fn list_resource_groups(&self, _top: usize) -> Result<Vec<ResourceGroupInfo>> {
        if let Some(error) = self.state.fail_groups.lock().clone() {
            return Err(error);
        }
        Ok(vec![ResourceGroupInfo {
            name: "images-rg".to_string(),
            location: "eastus".to_string(),
        }])
    }

    async fn list_virtual_machines(&self) -> Result<Vec<VirtualMachine>> {
        if *self.state.hang_listing.lock() {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if let Some(error) = self.state.fail_listing.lock().clone() {
            return Err(error);
        }
        Ok(self.state.machines.lock().clone())
    }

    async fn get_virtual_machine(&self, _group: &str, name: &str) -> Result<VirtualMachine> {
        if let Some(error) = self.state.fail_machines.lock().get(name) {
            return Err(error.clone());
        }
        self.state
            .machine_views
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| CloudError::not_found(format!("virtual machine {name}")))
    }

    async fn get_public_ip(&self, _group: &str, name: &str) -> Result<Option<String>> {
        if let Some(error) = self.state.fail_ips.lock().get(name) {
            return Err(error.clone());
        }
        Ok(self.state.public_ips.lock().get(name).cloned())
    }

    async fn restart_virtual_machine(&self, _group: &str, name: &str) -> Result<()> {
        self.state.restarted.lock().push(name.to_string());
        Ok(())
    }

    async fn list_vm_sizes(&self, _location: &str) -> Result<Vec<VmSize>> {
        Ok(self.state.sizes.lock().clone())
    }

    async fn create_resource_group(&self, group: &str, location: &str) -> Result<()> {
        self.state
            .created_groups
            .lock()
            .push((group.to_string(), location.to_string()));
        Ok(())
    }

    async fn create_deployment(
        &self,
        group: &str,
        deployment: &str,
        body: Deployment,
    ) -> Result<()> {
        self.state
            .deployments
            .lock()
            .push((group.to_string(), deployment.to_string(), body));
        Ok(())
    }

    async fn delete_resource_group(&self, group: &str) -> Result<()> {
        self.state.deleted_groups.lock().push(group.to_string());
        Ok(())
    }

    async fn list_storage_accounts(&self) -> Result<Vec<StorageAccountInfo>> {
        Ok(self.state.accounts.lock().clone())
    }

    async fn get_storage_account_keys(
        &self,
        _group: &str,
        account: &str,
    ) -> Result<StorageAccountKeys> {
        self.state
            .keys
            .lock()
            .get(account)
            .cloned()
            .ok_or_else(|| CloudError::not_found(format!("storage account {account} keys")))
    }

    async fn open_blob_container(
        &self,
        _account: &str,
        _key: &str,
        container: &str,
    ) -> Result<Arc<dyn BlobContainer>> {
        if let Some(error) = self.state.fail_container.lock().clone() {
            return Err(error);
        }
        let blobs = self
            .state
            .blobs
            .lock()
            .get(container)
            .cloned()
            .unwrap_or_default();
        Ok(Arc::new(MockContainer { blobs }))
    }

    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionInfo>> {
        Ok(self.state.subscriptions.lock().clone())
    }

    async fn list_locations(&self, _subscription: &str) -> Result<Vec<LocationInfo>> {
        Ok(self.state.locations.lock().clone())
    }

    async fn list_virtual_networks(&self) -> Result<Vec<VirtualNetworkInfo>> {
        Ok(self.state.networks.lock().clone())
    }
}

struct MockContainer {
    blobs: Vec<Arc<MockBlob>>,
}

#[async_trait]
impl BlobContainer for MockContainer {
    async fn list_blobs(&self, prefix: &str) -> Result<Vec<Arc<dyn BlobHandle>>> {
        Ok(self
            .blobs
            .iter()
            .filter(|blob| blob.name.starts_with(prefix))
            .map(|blob| Arc::clone(blob) as Arc<dyn BlobHandle>)
            .collect())
    }
}

pub struct MockBlob {
    pub name: String,
    pub uri: String,
    pub metadata: HashMap<String, String>,
    pub deleted: Mutex<bool>,
    pub fail_delete: bool,
}

impl MockBlob {
    pub fn new(name: &str, metadata: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            uri: format!("https://acct.blob.core.windows.net/vhds/{name}"),
            metadata: metadata
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
            deleted: Mutex::new(false),
            fail_delete: false,
        }
    }

    pub fn os_disk(name: &str, os_state: &str, os_type: &str) -> Self {
        Self::new(
            name,
            &[
                ("MicrosoftAzureCompute_ImageType", "OSDisk"),
                ("MicrosoftAzureCompute_OSState", os_state),
                ("MicrosoftAzureCompute_OSType", os_type),
            ],
        )
    }

    pub fn failing_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }
}

#[async_trait]
impl BlobHandle for MockBlob {
    fn name(&self) -> &str {
        &self.name
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    async fn fetch_metadata(&self) -> Result<HashMap<String, String>> {
        Ok(self.metadata.clone())
    }

    async fn delete_if_exists(&self) -> Result<bool> {
        if self.fail_delete {
            return Err(CloudError::transport("delete blob", "simulated failure"));
        }
        *self.deleted.lock() = true;
        Ok(true)
    }
}

pub fn config() -> ConnectorConfig {
    ConnectorConfig::new(SERVER_ID, PROFILE_ID, "sub-1", "eastus")
        .with_wait_timeout(Duration::from_secs(10))
}

pub fn connector(api: MockAzureApi) -> AzureApiConnector<MockAzureApi> {
    connector_with(api, config())
}

pub fn connector_with(
    api: MockAzureApi,
    config: ConnectorConfig,
) -> AzureApiConnector<MockAzureApi> {
    AzureApiConnector::new(api, config).expect("connector runtime")
}

pub fn image(public_ip: bool) -> Arc<AzureCloudImage> {
    image_with_url(IMAGE_URL, public_ip)
}

pub fn image_with_url(image_url: &str, public_ip: bool) -> Arc<AzureCloudImage> {
    Arc::new(AzureCloudImage::new(
        "linux-medium",
        AzureImageDetails {
            vm_name_prefix: "agent".to_string(),
            source_name: SOURCE_NAME.to_string(),
            image_url: image_url.to_string(),
            network_id: "/networks/vnet-1".to_string(),
            subnet_id: "default".to_string(),
            username: "fleet".to_string(),
            password: "secret".to_string(),
            os_type: "Linux".to_string(),
            vm_size: "Standard_D2".to_string(),
            vm_public_ip: public_ip,
        },
    ))
}

pub fn instance(image: &Arc<AzureCloudImage>, name: &str) -> Arc<AzureCloudInstance> {
    Arc::new(AzureCloudInstance::new(Arc::clone(image), name))
}

/// A machine carrying the connector's three ownership tags.
pub fn tagged_machine(name: &str, server: &str, profile: &str, source: &str) -> VirtualMachine {
    VirtualMachine {
        name: name.to_string(),
        tags: Some(
            [
                (TAG_SERVER.to_string(), server.to_string()),
                (TAG_PROFILE.to_string(), profile.to_string()),
                (TAG_SOURCE.to_string(), source.to_string()),
            ]
            .into_iter()
            .collect(),
        ),
        instance_view: None,
    }
}

pub fn owned_machine(name: &str) -> VirtualMachine {
    tagged_machine(name, SERVER_ID, PROFILE_ID, SOURCE_NAME)
}

pub fn with_view(mut machine: VirtualMachine, codes: &[&str]) -> VirtualMachine {
    machine.instance_view = Some(InstanceView {
        statuses: codes
            .iter()
            .map(|code| InstanceViewStatus {
                code: code.to_string(),
                time: None,
            })
            .collect(),
    });
    machine
}
