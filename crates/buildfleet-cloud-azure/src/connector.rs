//! ARM connector implementation
//!
//! Every entry point fans its remote calls out as promises running on the
//! connector's own runtime, then joins them with the result-collecting
//! combinators so one broken entity never hides its siblings. Blocking entry
//! points wait at a single bounded join point; an elapsed deadline interrupts
//! only the wait, never the in-flight calls.

use crate::api::AzureApi;
use crate::instance::{AzureCloudImage, AzureCloudInstance, AzureImageDetails, AzureInstance};
use crate::models::{Deployment, DeploymentMode, ResourceGroupInfo, VirtualMachine};
use crate::sort::alphanumeric_cmp;
use crate::storage::{BlobPath, classify_vhd, resolve_blobs};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use buildfleet_cloud::{
    AgentUserData, CloudApiConnector, CloudError, CloudPromise, InstanceStatus, Result, TypedError,
    ValidationError,
};
use buildfleet_deferred::{Promise, Settlement, spawn_deferred, when, when_settled};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, warn};
use url::Url;

/// Resource tags stamped on every deployment this connector creates; fleet
/// reconciliation only claims instances whose tags match.
pub const TAG_SERVER: &str = "buildfleet-server";
pub const TAG_PROFILE: &str = "buildfleet-profile";
pub const TAG_SOURCE: &str = "buildfleet-source";

/// Naming convention of the public address resource next to a VM.
pub(crate) const PUBLIC_IP_SUFFIX: &str = "-pip";

/// Page size for the credential-check listing.
const RESOURCES_PAGE: usize = 100;

const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

static VM_TEMPLATE: LazyLock<serde_json::Value> = LazyLock::new(|| {
    serde_json::from_str(include_str!("../templates/vm-template.json"))
        .expect("embedded template is valid JSON")
});

static VM_TEMPLATE_PIP: LazyLock<serde_json::Value> = LazyLock::new(|| {
    serde_json::from_str(include_str!("../templates/vm-template-pip.json"))
        .expect("embedded template is valid JSON")
});

/// Immutable connector configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Identifier of the orchestrator server owning the instances.
    pub server_id: String,
    /// Identifier of the agent profile the connector serves.
    pub profile_id: String,
    /// Azure subscription the collaborator operates in.
    pub subscription_id: String,
    /// Region every managed resource lives in.
    pub location: String,
    /// Upper bound on every blocking join point.
    pub wait_timeout: Duration,
}

impl ConnectorConfig {
    pub fn new(
        server_id: impl Into<String>,
        profile_id: impl Into<String>,
        subscription_id: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            profile_id: profile_id.into(),
            subscription_id: subscription_id.into(),
            location: location.into(),
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }
}

/// Shared connector internals, cheap to clone into settlement callbacks that
/// need to start further remote calls.
struct Core<A> {
    api: Arc<A>,
    config: Arc<ConnectorConfig>,
    handle: Handle,
}

impl<A> Clone for Core<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            config: Arc::clone(&self.config),
            handle: self.handle.clone(),
        }
    }
}

impl<A: AzureApi> Core<A> {
    /// Runs one remote call as a spawned task and returns its promise.
    fn defer<T, F>(&self, future: F) -> CloudPromise<T>
    where
        T: Clone + Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        spawn_deferred(&self.handle, future)
    }

    fn resource_groups_async(&self) -> CloudPromise<Vec<ResourceGroupInfo>> {
        let api = Arc::clone(&self.api);
        self.defer(async move {
            let groups = api
                .list_resource_groups(RESOURCES_PAGE)
                .await
                .map_err(|error| error.context("get list of resource groups"))?;
            debug!(count = groups.len(), "received list of resource groups");
            Ok(groups)
        })
    }

    fn virtual_machines_async(&self) -> CloudPromise<Vec<VirtualMachine>> {
        let api = Arc::clone(&self.api);
        self.defer(async move {
            let machines = api
                .list_virtual_machines()
                .await
                .map_err(|error| error.context("get list of virtual machines"))?;
            debug!(count = machines.len(), "received list of virtual machines");
            Ok(machines)
        })
    }

    fn virtual_machine_async(&self, group: &str, name: &str) -> CloudPromise<VirtualMachine> {
        let api = Arc::clone(&self.api);
        let group = group.to_string();
        let name = name.to_string();
        self.defer(async move {
            let machine = api
                .get_virtual_machine(&group, &name)
                .await
                .map_err(|error| error.context(format!("get virtual machine {name} info")))?;
            debug!(instance = %name, "received virtual machine info");
            Ok(machine)
        })
    }

    fn public_ip_async(&self, name: &str) -> CloudPromise<Option<String>> {
        let api = Arc::clone(&self.api);
        let group = name.to_string();
        let ip_name = format!("{name}{PUBLIC_IP_SUFFIX}");
        self.defer(async move {
            api.get_public_ip(&group, &ip_name)
                .await
                .map_err(|error| error.context(format!("get public ip address {ip_name} info")))
        })
    }

    /// Populates one instance record: the descriptor fetch and, for images
    /// with a public address, the address fetch run concurrently. Descriptor
    /// failure is terminal for the entity; a failed address lookup is a
    /// best-effort miss.
    fn instance_data_async(
        &self,
        record: Arc<Mutex<AzureInstance>>,
        details: &AzureImageDetails,
        name: &str,
    ) -> CloudPromise<()> {
        let descriptor = {
            let record = Arc::clone(&record);
            self.virtual_machine_async(name, name).pipe_done(move |machine| {
                if let Some(view) = machine.instance_view {
                    record.lock().apply_statuses(&view.statuses);
                }
                Promise::resolved(())
            })
        };

        let mut branches = vec![descriptor];
        if details.vm_public_ip && record.lock().ip_address().is_none() {
            let sink = Arc::clone(&record);
            let instance = name.to_string();
            let address = self
                .public_ip_async(name)
                .pipe_done(move |address| {
                    if let Some(address) = address.filter(|address| !address.is_empty()) {
                        sink.lock().set_ip_address(address);
                    }
                    Promise::resolved(())
                })
                .recover(move |error| {
                    debug!(instance = %instance, %error, "public address is not available yet");
                    Ok(())
                });
            branches.push(address);
        }

        when(branches).pipe_done(|_| Promise::resolved(()))
    }

    /// Reconciles one image's live instances: list, filter by name prefix and
    /// tags, run one pipeline per survivor, then replace the image's error
    /// list with whatever the pipelines collected and resolve with the
    /// name-to-record snapshot.
    fn fetch_instances_async(
        &self,
        image: Arc<AzureCloudImage>,
    ) -> CloudPromise<HashMap<String, AzureInstance>> {
        let core = self.clone();
        self.virtual_machines_async().pipe_done(move |machines| {
            let details = image.details().clone();
            let exceptions: Arc<Mutex<Vec<TypedError>>> = Arc::new(Mutex::new(Vec::new()));
            let mut records: Vec<(String, Arc<Mutex<AzureInstance>>)> = Vec::new();
            let mut pipelines = Vec::new();

            for machine in machines {
                if !belongs_to_image(&machine, &core.config, &details) {
                    continue;
                }

                let record = Arc::new(Mutex::new(AzureInstance::new(&machine.name)));
                let pipeline =
                    core.instance_data_async(Arc::clone(&record), &details, &machine.name);
                let pipeline = pipeline.on_fail({
                    let sink = Arc::clone(&exceptions);
                    let record = Arc::clone(&record);
                    let name = machine.name.clone();
                    move |error| {
                        warn!(instance = %name, %error, "failed to get instance data");
                        let typed = TypedError::from_error(error);
                        record.lock().push_error(typed.clone());
                        sink.lock().push(typed);
                    }
                });
                pipelines.push(pipeline);
                records.push((machine.name, record));
            }

            if pipelines.is_empty() {
                // The error list is replaced on every resolved cycle, an
                // empty fleet included.
                image.update_errors(Vec::new());
                return Promise::resolved(HashMap::new());
            }

            when_settled(pipelines).pipe_done(move |_| {
                image.update_errors(std::mem::take(&mut *exceptions.lock()));
                let snapshot = records
                    .into_iter()
                    .map(|(name, record)| {
                        let value = record.lock().clone();
                        (name, value)
                    })
                    .collect();
                Promise::resolved(snapshot)
            })
        })
    }

    /// Best-effort deletion of the VHD blobs a deleted VM left under the
    /// image's storage account. Per-blob failures are logged and skipped.
    fn remove_vhd_blobs_async(&self, image_url: String, name: String) -> CloudPromise<()> {
        let api = Arc::clone(&self.api);
        let location = self.config.location.clone();
        self.defer(async move {
            let mut url = Url::parse(&image_url).map_err(|error| ValidationError::InvalidUrl {
                url: image_url.clone(),
                message: error.to_string(),
            })?;
            url.set_path(&format!("/vhds/{name}"));

            let path = BlobPath::parse(url.as_str())?;
            let blobs = resolve_blobs(api.as_ref(), &location, &path).await?;
            for blob in blobs {
                match blob.delete_if_exists().await {
                    Ok(true) => debug!(uri = %blob.uri(), "deleted instance disk blob"),
                    Ok(false) => {}
                    Err(error) => {
                        warn!(uri = %blob.uri(), %error, "failed to delete instance disk blob");
                    }
                }
            }
            Ok(())
        })
    }
}

fn belongs_to_image(
    machine: &VirtualMachine,
    config: &ConnectorConfig,
    details: &AzureImageDetails,
) -> bool {
    if !machine.name.starts_with(&details.vm_name_prefix) {
        return false;
    }

    let Some(tags) = machine.tags.as_ref() else {
        debug!(instance = %machine.name, "instance has no tags, skipping");
        return false;
    };
    for (tag, expected) in [
        (TAG_SERVER, config.server_id.as_str()),
        (TAG_PROFILE, config.profile_id.as_str()),
        (TAG_SOURCE, details.source_name.as_str()),
    ] {
        if tags.get(tag).map(String::as_str) != Some(expected) {
            debug!(instance = %machine.name, %tag, "instance tag does not match, skipping");
            return false;
        }
    }
    true
}

fn deployment_parameters(
    config: &ConnectorConfig,
    details: &AzureImageDetails,
    name: &str,
    custom_data: &str,
) -> serde_json::Value {
    json!({
        "imageUrl": { "value": details.image_url },
        "vmName": { "value": name },
        "networkId": { "value": details.network_id },
        "subnetName": { "value": details.subnet_id },
        "adminUserName": { "value": details.username },
        "adminPassword": { "value": details.password },
        "osType": { "value": details.os_type },
        "vmSize": { "value": details.vm_size },
        "customData": { "value": custom_data },
        "serverId": { "value": config.server_id },
        "profileId": { "value": config.profile_id },
        "sourceId": { "value": details.source_name },
    })
}

/// ARM implementation of [`CloudApiConnector`]. Owns the runtime its remote
/// calls run on.
pub struct AzureApiConnector<A: AzureApi> {
    core: Core<A>,
    runtime: Runtime,
}

impl<A: AzureApi> AzureApiConnector<A> {
    pub fn new(api: A, config: ConnectorConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("buildfleet-azure")
            .enable_all()
            .build()
            .map_err(|error| CloudError::transport("start connector runtime", error.to_string()))?;
        let core = Core {
            api: Arc::new(api),
            config: Arc::new(config),
            handle: runtime.handle().clone(),
        };
        Ok(Self { core, runtime })
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.core.config
    }

    /// Handle of the runtime the connector's remote calls run on.
    pub fn runtime_handle(&self) -> &Handle {
        self.runtime.handle()
    }

    fn wait<T>(&self, promise: CloudPromise<T>, operation: &str) -> Result<T>
    where
        T: Clone + Send + 'static,
    {
        promise
            .wait_safely_for(self.core.config.wait_timeout)
            .map_err(|_| CloudError::Interrupted(operation.to_string()))?
            .into_result()
    }

    /// Hardware profiles available in the configured region, in alphanumeric
    /// order.
    pub fn get_vm_sizes_async(&self) -> CloudPromise<Vec<String>> {
        let api = Arc::clone(&self.core.api);
        let location = self.core.config.location.clone();
        self.core.defer(async move {
            let sizes = api
                .list_vm_sizes(&location)
                .await
                .map_err(|error| error.context("get list of vm sizes"))?;
            debug!(count = sizes.len(), "received list of vm sizes");

            let mut names: Vec<String> = sizes.into_iter().map(|size| size.name).collect();
            names.sort_by(|left, right| alphanumeric_cmp(left, right));
            Ok(names)
        })
    }

    /// Subscriptions visible to the credentials as id/display-name pairs,
    /// sorted by display name.
    pub fn get_subscriptions_async(&self) -> CloudPromise<Vec<(String, String)>> {
        let api = Arc::clone(&self.core.api);
        self.core.defer(async move {
            let subscriptions = api
                .list_subscriptions()
                .await
                .map_err(|error| error.context("get list of subscriptions"))?;
            debug!(count = subscriptions.len(), "received list of subscriptions");

            let mut pairs: Vec<(String, String)> = subscriptions
                .into_iter()
                .map(|subscription| (subscription.subscription_id, subscription.display_name))
                .collect();
            pairs.sort_by(|left, right| left.1.cmp(&right.1));
            Ok(pairs)
        })
    }

    /// Regions of one subscription as name/display-name pairs, sorted by
    /// display name.
    pub fn get_locations_async(&self, subscription: &str) -> CloudPromise<Vec<(String, String)>> {
        let api = Arc::clone(&self.core.api);
        let subscription = subscription.to_string();
        self.core.defer(async move {
            let locations = api
                .list_locations(&subscription)
                .await
                .map_err(|error| error.context("get list of locations"))?;
            debug!(count = locations.len(), "received list of locations");

            let mut pairs: Vec<(String, String)> = locations
                .into_iter()
                .map(|location| (location.name, location.display_name))
                .collect();
            pairs.sort_by(|left, right| left.1.cmp(&right.1));
            Ok(pairs)
        })
    }

    /// Virtual networks in the configured region with their subnet names.
    pub fn get_networks_async(&self) -> CloudPromise<Vec<(String, Vec<String>)>> {
        let api = Arc::clone(&self.core.api);
        let location = self.core.config.location.clone();
        self.core.defer(async move {
            let networks = api
                .list_virtual_networks()
                .await
                .map_err(|error| error.context("get list of virtual networks"))?;
            debug!(count = networks.len(), "received list of virtual networks");

            Ok(networks
                .into_iter()
                .filter(|network| network.location.eq_ignore_ascii_case(&location))
                .map(|network| (network.id, network.subnets))
                .collect())
        })
    }
}

impl<A: AzureApi> CloudApiConnector for AzureApiConnector<A> {
    type Image = AzureCloudImage;
    type Instance = AzureCloudInstance;
    type Record = AzureInstance;

    fn test(&self) -> Result<()> {
        self.wait(
            self.core.resource_groups_async(),
            "test management connection",
        )?;
        Ok(())
    }

    fn get_instance_status_if_exists(
        &self,
        instance: &Arc<AzureCloudInstance>,
    ) -> Option<InstanceStatus> {
        let record = Arc::new(Mutex::new(AzureInstance::new(instance.name())));
        let pipeline = self.core.instance_data_async(
            Arc::clone(&record),
            instance.image().details(),
            instance.name(),
        );

        match pipeline.wait_safely_for(self.core.config.wait_timeout) {
            Err(_) => {
                let error =
                    CloudError::Interrupted(format!("get instance {} status", instance.name()));
                warn!(instance = %instance.name(), %error, "gave up waiting for instance status");
                instance.update_errors(vec![TypedError::from_error(&error)]);
                None
            }
            Ok(Settlement::Rejected(error)) => {
                // A missing VM and a VM mid-transition are expected answers,
                // not failures.
                if error.is_not_found() || instance.status().is_scheduled() {
                    debug!(instance = %instance.name(), %error, "instance is not available yet");
                    return None;
                }
                warn!(instance = %instance.name(), %error, "failed to get instance status");
                instance.set_status(InstanceStatus::Error);
                instance.update_errors(vec![TypedError::from_error(&error)]);
                None
            }
            Ok(Settlement::Resolved(())) => {
                let status = record.lock().instance_status();
                instance.set_status(status);
                instance.update_errors(Vec::new());
                Some(status)
            }
        }
    }

    fn fetch_instances(
        &self,
        images: &[Arc<AzureCloudImage>],
    ) -> Result<HashMap<String, HashMap<String, AzureInstance>>> {
        let results = Arc::new(Mutex::new(HashMap::new()));
        let mut fetches = Vec::with_capacity(images.len());

        for image in images {
            let fetch = self.core.fetch_instances_async(Arc::clone(image));
            let fetch = fetch.on_fail({
                let image = Arc::clone(image);
                move |error| {
                    warn!(image = %image.name(), %error, "failed to fetch image instances");
                    image.update_errors(vec![TypedError::from_error(error)]);
                }
            });
            let fetch = fetch.on_done({
                let image = Arc::clone(image);
                let results = Arc::clone(&results);
                move |instances| {
                    results.lock().insert(image.name().to_string(), instances.clone());
                }
            });
            fetches.push(fetch);
        }

        when_settled(fetches)
            .wait_safely_for(self.core.config.wait_timeout)
            .map_err(|_| CloudError::Interrupted("fetch instances".to_string()))?;

        Ok(std::mem::take(&mut *results.lock()))
    }

    fn check_image(&self, image: &AzureCloudImage) -> Vec<TypedError> {
        let inspection = self.get_vhd_os_type_async(&image.details().image_url);
        match self.wait(inspection, &format!("check image {}", image.name())) {
            Ok(_) => Vec::new(),
            Err(error) => vec![TypedError::from_error(&error)],
        }
    }

    fn check_instance(&self, _instance: &AzureCloudInstance) -> Vec<TypedError> {
        Vec::new()
    }

    fn create_vm_async(
        &self,
        instance: &AzureCloudInstance,
        user_data: &AgentUserData,
    ) -> CloudPromise<()> {
        let name = instance.name().to_string();
        let details = instance.image().details().clone();

        let custom_data = match user_data.serialize() {
            Ok(json) => STANDARD.encode(json),
            Err(error) => {
                return Promise::rejected(
                    ValidationError::Encoding {
                        name,
                        message: error.to_string(),
                    }
                    .into(),
                );
            }
        };

        let api = Arc::clone(&self.core.api);
        let config = Arc::clone(&self.core.config);
        self.core.defer(async move {
            api.create_resource_group(&name, &config.location)
                .await
                .map_err(|error| error.context(format!("create resource group {name}")))?;
            debug!(group = %name, "created resource group");

            let template = if details.vm_public_ip {
                VM_TEMPLATE_PIP.clone()
            } else {
                VM_TEMPLATE.clone()
            };
            let parameters = deployment_parameters(&config, &details, &name, &custom_data);
            api.create_deployment(
                &name,
                &name,
                Deployment {
                    mode: DeploymentMode::Incremental,
                    template,
                    parameters,
                },
            )
            .await
            .map_err(|error| error.context(format!("create deployment {name}")))?;
            info!(instance = %name, "created virtual machine deployment");
            Ok(())
        })
    }

    fn delete_vm_async(&self, instance: &AzureCloudInstance) -> CloudPromise<()> {
        let name = instance.name().to_string();
        let image_url = instance.image().details().image_url.clone();
        let core = self.core.clone();

        let delete = {
            let api = Arc::clone(&self.core.api);
            let name = name.clone();
            self.core.defer(async move {
                api.delete_resource_group(&name)
                    .await
                    .map_err(|error| error.context(format!("delete resource group {name}")))?;
                info!(group = %name, "deleted resource group");
                Ok(())
            })
        };

        delete.pipe_done(move |_| core.remove_vhd_blobs_async(image_url, name))
    }

    fn restart_vm_async(&self, instance: &AzureCloudInstance) -> CloudPromise<()> {
        let api = Arc::clone(&self.core.api);
        let name = instance.name().to_string();
        self.core.defer(async move {
            api.restart_virtual_machine(&name, &name)
                .await
                .map_err(|error| error.context(format!("restart virtual machine {name}")))?;
            info!(instance = %name, "restarted virtual machine");
            Ok(())
        })
    }

    fn get_vhd_os_type_async(&self, image_url: &str) -> CloudPromise<Option<String>> {
        let path = match BlobPath::parse(image_url) {
            Ok(path) => path,
            Err(error) => return Promise::rejected(error),
        };

        let api = Arc::clone(&self.core.api);
        let location = self.core.config.location.clone();
        let image_url = image_url.to_string();
        self.core.defer(async move {
            let blobs = resolve_blobs(api.as_ref(), &location, &path).await?;
            classify_vhd(&image_url, blobs).await
        })
    }
}
