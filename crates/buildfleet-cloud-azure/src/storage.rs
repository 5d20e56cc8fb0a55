//! Blob storage resolution and VHD inspection
//!
//! The chained lookup behind both image validation and VM disk cleanup:
//! blob URL → storage account name → account record → resource group →
//! access keys → authenticated container → blob listing. Each step needs
//! the previous step's output, so the chain is a single sequential task;
//! the fan-out lives at the connector level.

use crate::api::{AzureApi, BlobHandle};
use buildfleet_cloud::{CloudError, Result, StateError, ValidationError};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::debug;
use url::Url;

pub(crate) const BLOB_HOST_SUFFIX: &str = ".blob.core.windows.net";

pub(crate) const IMAGE_TYPE_METADATA: &str = "MicrosoftAzureCompute_ImageType";
pub(crate) const OS_STATE_METADATA: &str = "MicrosoftAzureCompute_OSState";
pub(crate) const OS_TYPE_METADATA: &str = "MicrosoftAzureCompute_OSType";
const OS_DISK_IMAGE_TYPE: &str = "OSDisk";
const GENERALIZED_OS_STATE: &str = "Generalized";

static RESOURCE_GROUP_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"resourceGroups/(.+)/providers/").expect("valid pattern"));

/// Decomposed blob URL: which storage account, which container, and the
/// blob-name prefix inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobPath {
    pub storage: String,
    pub container: String,
    pub prefix: String,
}

impl BlobPath {
    /// Splits a blob URL like
    /// `https://acct.blob.core.windows.net/vhds/image.vhd` into account
    /// `acct`, container `vhds` and prefix `image.vhd`.
    pub fn parse(blob_url: &str) -> Result<Self> {
        let url = Url::parse(blob_url).map_err(|error| ValidationError::InvalidUrl {
            url: blob_url.to_string(),
            message: error.to_string(),
        })?;

        let host = url
            .host_str()
            .ok_or_else(|| ValidationError::InvalidUrl {
                url: blob_url.to_string(),
                message: "missing host".to_string(),
            })?;
        let path = url.path();
        if path.is_empty() || path == "/" {
            return Err(ValidationError::InvalidUrl {
                url: blob_url.to_string(),
                message: "missing path".to_string(),
            }
            .into());
        }

        let suffix = host
            .find(BLOB_HOST_SUFFIX)
            .filter(|index| *index > 0)
            .ok_or_else(|| ValidationError::InvalidHostName(host.to_string()))?;
        let storage = host[..suffix].to_string();

        // The container name ends at the first interior slash.
        let slash = path[1..]
            .find('/')
            .map(|index| index + 1)
            .filter(|index| *index > 1)
            .ok_or_else(|| ValidationError::MissingContainerName(path.to_string()))?;

        Ok(Self {
            storage,
            container: path[1..slash].to_string(),
            prefix: path[slash + 1..].to_string(),
        })
    }
}

/// Extracts the resource-group name out of a full ARM resource identifier.
pub(crate) fn parse_resource_group(account_id: &str) -> Result<String> {
    RESOURCE_GROUP_PATTERN
        .captures(account_id)
        .and_then(|captures| captures.get(1))
        .map(|group| group.as_str().to_string())
        .ok_or_else(|| ValidationError::InvalidAccountId(account_id.to_string()).into())
}

/// Runs the storage-resolution chain down to the blob listing.
pub(crate) async fn resolve_blobs<A>(
    api: &A,
    location: &str,
    path: &BlobPath,
) -> Result<Vec<Arc<dyn BlobHandle>>>
where
    A: AzureApi + ?Sized,
{
    let accounts = api
        .list_storage_accounts()
        .await
        .map_err(|error| error.context("get list of storage accounts"))?;
    debug!("received list of storage accounts");

    let account = accounts
        .iter()
        .find(|account| account.name.eq_ignore_ascii_case(&path.storage))
        .ok_or_else(|| CloudError::not_found(format!("storage account {}", path.storage)))?;

    if !account.location.eq_ignore_ascii_case(location) {
        debug!(account = %account.name, %location, "storage account is in the wrong region");
        return Err(StateError::RegionMismatch(location.to_string()).into());
    }

    let group = parse_resource_group(&account.id)?;
    let keys = api
        .get_storage_account_keys(&group, &account.name)
        .await
        .map_err(|error| error.context(format!("get storage account {} key", account.name)))?;
    debug!(account = %account.name, "received storage account keys");

    // Building the blob client is pure credential construction, so a
    // failure here means the account name or key did not form a valid
    // client, not that the network broke.
    let container = api
        .open_blob_container(&account.name, &keys.key1, &path.container)
        .await
        .map_err(|error| {
            CloudError::from(ValidationError::InvalidCredentials {
                account: account.name.clone(),
                message: error.to_string(),
            })
        })?;

    container
        .list_blobs(&path.prefix)
        .await
        .map_err(|error| error.context(format!("list container {} blobs", path.container)))
}

/// Classifies the blobs found under a VHD image URL.
///
/// Exactly one blob whose name matches the URL, carrying OSDisk metadata in
/// generalized state, yields its OS type. Ambiguous listings (several blobs,
/// name or image-type mismatch) resolve to `None`; the image may still be
/// usable, the connector just cannot tell the OS. A missing blob and a
/// non-generalized disk are hard errors.
pub(crate) async fn classify_vhd(
    image_url: &str,
    blobs: Vec<Arc<dyn BlobHandle>>,
) -> Result<Option<String>> {
    if blobs.is_empty() {
        debug!(url = %image_url, "no VHD blob found in storage account");
        return Err(CloudError::not_found(format!("VHD file {image_url}")));
    }
    if blobs.len() > 1 {
        debug!(url = %image_url, count = blobs.len(), "found more than one blob for url");
        return Ok(None);
    }

    let blob = &blobs[0];
    if !image_url
        .to_lowercase()
        .ends_with(&blob.name().to_lowercase())
    {
        debug!(url = %image_url, blob = %blob.name(), "blob name does not match url");
        return Ok(None);
    }

    let metadata = blob
        .fetch_metadata()
        .await
        .map_err(|error| error.context("access storage blob"))?;

    if metadata.get(IMAGE_TYPE_METADATA).map(String::as_str) != Some(OS_DISK_IMAGE_TYPE) {
        debug!(uri = %blob.uri(), "blob is not an OSDisk image");
        return Ok(None);
    }
    if metadata.get(OS_STATE_METADATA).map(String::as_str) != Some(GENERALIZED_OS_STATE) {
        debug!(uri = %blob.uri(), "blob is not generalized");
        return Err(StateError::NotGeneralized(blob.uri().to_string()).into());
    }

    Ok(metadata.get(OS_TYPE_METADATA).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct FakeBlob {
        name: String,
        uri: String,
        metadata: HashMap<String, String>,
    }

    impl FakeBlob {
        fn with_metadata(name: &str, entries: &[(&str, &str)]) -> Arc<dyn BlobHandle> {
            Arc::new(Self {
                name: name.to_string(),
                uri: format!("https://acct.blob.core.windows.net/vhds/{name}"),
                metadata: entries
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect(),
            })
        }

        fn os_disk(name: &str, os_state: &str, os_type: &str) -> Arc<dyn BlobHandle> {
            Self::with_metadata(
                name,
                &[
                    (IMAGE_TYPE_METADATA, OS_DISK_IMAGE_TYPE),
                    (OS_STATE_METADATA, os_state),
                    (OS_TYPE_METADATA, os_type),
                ],
            )
        }
    }

    #[async_trait]
    impl BlobHandle for FakeBlob {
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
            Ok(true)
        }
    }

    const IMAGE_URL: &str = "https://acct.blob.core.windows.net/vhds/foo.vhd";

    #[test]
    fn blob_path_decomposes_url() {
        let path = BlobPath::parse(IMAGE_URL).unwrap();
        assert_eq!(path.storage, "acct");
        assert_eq!(path.container, "vhds");
        assert_eq!(path.prefix, "foo.vhd");
    }

    #[test]
    fn blob_path_rejects_foreign_host() {
        let error = BlobPath::parse("https://acct.example.com/vhds/foo.vhd").unwrap_err();
        assert_eq!(
            error,
            CloudError::from(ValidationError::InvalidHostName(
                "acct.example.com".to_string()
            ))
        );

        // A bare suffix has no account name in front of it.
        let error = BlobPath::parse("https://.blob.core.windows.net/vhds/foo.vhd").unwrap_err();
        assert_eq!(error.kind(), "validation");
    }

    #[test]
    fn blob_path_requires_container_segment() {
        let error = BlobPath::parse("https://acct.blob.core.windows.net/foo.vhd").unwrap_err();
        assert_eq!(
            error,
            CloudError::from(ValidationError::MissingContainerName(
                "/foo.vhd".to_string()
            ))
        );
    }

    #[test]
    fn blob_path_requires_host_and_path() {
        assert!(BlobPath::parse("not a url").is_err());
        assert!(BlobPath::parse("https://acct.blob.core.windows.net/").is_err());
    }

    #[test]
    fn resource_group_parses_out_of_account_id() {
        let id = "/subscriptions/0000/resourceGroups/images-rg/providers/Microsoft.Storage/storageAccounts/acct";
        assert_eq!(parse_resource_group(id).unwrap(), "images-rg");

        let error = parse_resource_group("/subscriptions/0000/storageAccounts/acct").unwrap_err();
        assert_eq!(error.kind(), "validation");
    }

    #[test]
    fn single_generalized_os_disk_resolves_os_type() {
        let blobs = vec![FakeBlob::os_disk("foo.vhd", "Generalized", "Linux")];
        let os_type = tokio_test::block_on(classify_vhd(IMAGE_URL, blobs)).unwrap();
        assert_eq!(os_type, Some("Linux".to_string()));
    }

    #[test]
    fn missing_blob_is_an_error() {
        let error = tokio_test::block_on(classify_vhd(IMAGE_URL, Vec::new())).unwrap_err();
        assert!(error.is_not_found());
    }

    #[test]
    fn ambiguous_listings_resolve_to_unknown() {
        // Several matches.
        let blobs = vec![
            FakeBlob::os_disk("foo.vhd", "Generalized", "Linux"),
            FakeBlob::os_disk("foo.vhd.bak", "Generalized", "Linux"),
        ];
        assert_eq!(
            tokio_test::block_on(classify_vhd(IMAGE_URL, blobs)).unwrap(),
            None
        );

        // Single match with the wrong name.
        let blobs = vec![FakeBlob::os_disk("bar.vhd", "Generalized", "Linux")];
        assert_eq!(
            tokio_test::block_on(classify_vhd(IMAGE_URL, blobs)).unwrap(),
            None
        );

        // Single match that is not an OS disk.
        let blobs = vec![FakeBlob::with_metadata(
            "foo.vhd",
            &[(IMAGE_TYPE_METADATA, "DataDisk")],
        )];
        assert_eq!(
            tokio_test::block_on(classify_vhd(IMAGE_URL, blobs)).unwrap(),
            None
        );
    }

    #[test]
    fn specialized_disk_is_rejected() {
        let blobs = vec![FakeBlob::os_disk("foo.vhd", "Specialized", "Windows")];
        let error = tokio_test::block_on(classify_vhd(IMAGE_URL, blobs)).unwrap_err();
        assert_eq!(error.kind(), "state");
    }
}
