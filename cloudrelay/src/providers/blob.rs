//! Azure Blob Storage: service SAS signing and container listing.
//!
//! Signed URLs are produced locally from the shared account key (HMAC-SHA256 over the
//! service SAS string-to-sign), so issuing one never touches the network. Listing uses the
//! List Blobs REST operation authorised by a short-lived container SAS and follows
//! `NextMarker` until the listing is exhausted.
//!
//! See: <https://learn.microsoft.com/rest/api/storageservices/create-service-sas>

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use super::{BlobStore, ProviderError, Result, SasPermission};
use crate::config::StorageConfig;

type HmacSha256 = Hmac<Sha256>;

const PROVIDER: &str = "blob storage";

/// Storage service version used both as `sv` and as the `x-ms-version` request header
pub const SERVICE_VERSION: &str = "2020-12-06";

const LIST_TIMEOUT: Duration = Duration::from_secs(60);

/// Lifetime in minutes of the container SAS used to authorise listing requests
const LIST_SAS_VALIDITY_MINUTES: i64 = 5;

/// What a SAS grants access to (`sr`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignedResource {
    Blob,
    Container,
}

impl SignedResource {
    fn as_str(self) -> &'static str {
        match self {
            SignedResource::Blob => "b",
            SignedResource::Container => "c",
        }
    }
}

/// Expiry timestamps are ISO 8601 UTC with second precision
fn format_expiry(expires_on: DateTime<Utc>) -> String {
    expires_on.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Build the service SAS string-to-sign.
///
/// Optional fields we never set (start, identifier, IP range, protocol, snapshot time,
/// encryption scope, response header overrides) are present as empty lines.
fn string_to_sign(
    permission: SasPermission,
    expiry: &str,
    canonicalized_resource: &str,
    resource: SignedResource,
) -> String {
    [
        permission.as_str(),
        "", // st
        expiry,
        canonicalized_resource,
        "", // si
        "", // sip
        "", // spr
        SERVICE_VERSION,
        resource.as_str(),
        "", // snapshot time
        "", // ses
        "", // rscc
        "", // rscd
        "", // rsce
        "", // rscl
        "", // rsct
    ]
    .join("\n")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EnumerationResults {
    #[serde(default)]
    blobs: BlobList,
    #[serde(default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobList {
    #[serde(rename = "Blob", default)]
    items: Vec<BlobItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlobItem {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StorageErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// Blob store backed by a single Azure Storage container.
pub struct AzureBlobStore {
    client: Client,
    endpoint: Url,
    account_name: String,
    account_key: Vec<u8>,
    container_name: String,
}

impl AzureBlobStore {
    pub fn new(config: &StorageConfig) -> anyhow::Result<Self> {
        let account_name = config
            .account_name
            .clone()
            .ok_or_else(|| anyhow::anyhow!("storage.account_name is not configured"))?;
        let account_key = config
            .account_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("storage.account_key is not configured"))?;
        let container_name = config
            .container_name
            .clone()
            .ok_or_else(|| anyhow::anyhow!("storage.container_name is not configured"))?;

        let account_key = BASE64_STANDARD
            .decode(account_key.trim())
            .map_err(|e| anyhow::anyhow!("storage.account_key is not valid base64: {}", e))?;

        let endpoint = config.endpoint_url()?;
        if endpoint.cannot_be_a_base() {
            anyhow::bail!("storage endpoint {} cannot carry a path", endpoint);
        }

        Ok(Self {
            client: Client::builder().timeout(LIST_TIMEOUT).build()?,
            endpoint,
            account_name,
            account_key,
            container_name,
        })
    }

    /// URL of the container, or of a blob inside it when `blob_name` is given. Slashes in the
    /// blob name are kept as virtual directory separators, everything else is percent-encoded.
    fn resource_url(&self, blob_name: Option<&str>) -> Result<Url> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ProviderError::Signing(format!("invalid storage endpoint {}", self.endpoint)))?;
            segments.pop_if_empty().push(&self.container_name);
            if let Some(name) = blob_name {
                segments.extend(name.split('/'));
            }
        }
        Ok(url)
    }

    fn canonicalized_resource(&self, blob_name: Option<&str>) -> String {
        match blob_name {
            Some(name) => format!("/blob/{}/{}/{}", self.account_name, self.container_name, name),
            None => format!("/blob/{}/{}", self.account_name, self.container_name),
        }
    }

    /// Append a SAS token for `resource` to `url`.
    fn append_sas(
        &self,
        url: &mut Url,
        blob_name: Option<&str>,
        resource: SignedResource,
        permission: SasPermission,
        expires_on: DateTime<Utc>,
    ) -> Result<()> {
        let expiry = format_expiry(expires_on);
        let to_sign = string_to_sign(permission, &expiry, &self.canonicalized_resource(blob_name), resource);

        let mut mac = HmacSha256::new_from_slice(&self.account_key)
            .map_err(|e| ProviderError::Signing(format!("invalid account key: {e}")))?;
        mac.update(to_sign.as_bytes());
        let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());

        url.query_pairs_mut()
            .append_pair("sv", SERVICE_VERSION)
            .append_pair("sr", resource.as_str())
            .append_pair("sp", permission.as_str())
            .append_pair("se", &expiry)
            .append_pair("sig", &signature);
        Ok(())
    }

    async fn list_page(&self, marker: Option<&str>) -> Result<EnumerationResults> {
        let mut url = self.resource_url(None)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("restype", "container").append_pair("comp", "list");
            if let Some(marker) = marker {
                query.append_pair("marker", marker);
            }
        }
        self.append_sas(
            &mut url,
            None,
            SignedResource::Container,
            SasPermission::List,
            Utc::now() + ChronoDuration::minutes(LIST_SAS_VALIDITY_MINUTES),
        )?;

        let response = self
            .client
            .get(url)
            .header("x-ms-version", SERVICE_VERSION)
            .send()
            .await
            .map_err(|source| ProviderError::Transport { provider: PROVIDER, source })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| ProviderError::Transport { provider: PROVIDER, source })?;

        if !status.is_success() {
            let parsed = quick_xml::de::from_str::<StorageErrorBody>(body.trim_start_matches('\u{feff}')).ok();
            return Err(ProviderError::Status {
                provider: PROVIDER,
                status,
                message: parsed
                    .as_ref()
                    .and_then(|e| e.message.clone())
                    .map(|m| m.lines().next().unwrap_or_default().to_string())
                    .unwrap_or_else(|| format!("HTTP {status}")),
                code: parsed.and_then(|e| e.code),
                kind: None,
            });
        }

        quick_xml::de::from_str(body.trim_start_matches('\u{feff}')).map_err(|e| ProviderError::Malformed {
            provider: PROVIDER,
            message: format!("invalid List Blobs body: {e}"),
        })
    }
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    fn signed_url(&self, blob_name: &str, permission: SasPermission, expires_on: DateTime<Utc>) -> Result<String> {
        let mut url = self.resource_url(Some(blob_name))?;
        self.append_sas(&mut url, Some(blob_name), SignedResource::Blob, permission, expires_on)?;
        Ok(url.into())
    }

    #[instrument(skip(self), fields(container = %self.container_name))]
    async fn list_blob_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let page = self.list_page(marker.as_deref()).await?;
            names.extend(page.blobs.items.into_iter().map(|b| b.name));

            match page.next_marker.filter(|m| !m.trim().is_empty()) {
                Some(next) => {
                    debug!("Following list continuation marker");
                    marker = Some(next);
                }
                None => break,
            }
        }

        debug!(count = names.len(), "Listed container");
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "c2VjcmV0LWtleQ==";

    fn store_with_endpoint(endpoint: Option<&str>) -> AzureBlobStore {
        AzureBlobStore::new(&StorageConfig {
            account_name: Some("relaytest".to_string()),
            account_key: Some(KEY.to_string()),
            container_name: Some("images".to_string()),
            endpoint: endpoint.map(|e| e.parse().unwrap()),
        })
        .unwrap()
    }

    fn expiry() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap()
    }

    fn query_value(url: &Url, key: &str) -> Option<String> {
        url.query_pairs().find(|(k, _)| k == key).map(|(_, v)| v.into_owned())
    }

    #[test]
    fn test_string_to_sign_layout() {
        let s = string_to_sign(
            SasPermission::Write,
            "2030-01-02T03:04:05Z",
            "/blob/relaytest/images/cat.png",
            SignedResource::Blob,
        );
        let lines: Vec<&str> = s.split('\n').collect();

        assert_eq!(lines.len(), 16);
        assert_eq!(lines[0], "w");
        assert_eq!(lines[2], "2030-01-02T03:04:05Z");
        assert_eq!(lines[3], "/blob/relaytest/images/cat.png");
        assert_eq!(lines[7], SERVICE_VERSION);
        assert_eq!(lines[8], "b");
    }

    #[test]
    fn test_signed_url_shape_and_signature() {
        let store = store_with_endpoint(None);
        let signed = store.signed_url("cat.png", SasPermission::Write, expiry()).unwrap();
        let url = Url::parse(&signed).unwrap();

        assert_eq!(url.host_str(), Some("relaytest.blob.core.windows.net"));
        assert_eq!(url.path(), "/images/cat.png");
        assert_eq!(query_value(&url, "sv").as_deref(), Some(SERVICE_VERSION));
        assert_eq!(query_value(&url, "sr").as_deref(), Some("b"));
        assert_eq!(query_value(&url, "sp").as_deref(), Some("w"));
        assert_eq!(query_value(&url, "se").as_deref(), Some("2030-01-02T03:04:05Z"));

        // The signature verifies against the account key
        let sig = BASE64_STANDARD.decode(query_value(&url, "sig").unwrap()).unwrap();
        let mut mac = HmacSha256::new_from_slice(&BASE64_STANDARD.decode(KEY).unwrap()).unwrap();
        mac.update(
            string_to_sign(
                SasPermission::Write,
                "2030-01-02T03:04:05Z",
                "/blob/relaytest/images/cat.png",
                SignedResource::Blob,
            )
            .as_bytes(),
        );
        assert!(mac.verify_slice(&sig).is_ok());
    }

    #[test]
    fn test_blob_names_are_encoded_but_keep_directories() {
        let store = store_with_endpoint(None);
        let signed = store
            .signed_url("holiday photos/day 1/beach.jpg", SasPermission::Read, expiry())
            .unwrap();
        let url = Url::parse(&signed).unwrap();

        assert_eq!(url.path(), "/images/holiday%20photos/day%201/beach.jpg");
        assert_eq!(query_value(&url, "sp").as_deref(), Some("r"));
    }

    #[test]
    fn test_permissions_produce_distinct_signatures() {
        let store = store_with_endpoint(None);
        let read = Url::parse(&store.signed_url("a.png", SasPermission::Read, expiry()).unwrap()).unwrap();
        let write = Url::parse(&store.signed_url("a.png", SasPermission::Write, expiry()).unwrap()).unwrap();

        assert_ne!(query_value(&read, "sig"), query_value(&write, "sig"));
    }

    #[test]
    fn test_custom_endpoint_with_account_path() {
        let store = store_with_endpoint(Some("http://127.0.0.1:10000/devstoreaccount1"));
        let signed = store.signed_url("a.png", SasPermission::Read, expiry()).unwrap();

        assert!(signed.starts_with("http://127.0.0.1:10000/devstoreaccount1/images/a.png?"));
    }

    #[test]
    fn test_invalid_key_rejected_at_construction() {
        let result = AzureBlobStore::new(&StorageConfig {
            account_name: Some("relaytest".to_string()),
            account_key: Some("***".to_string()),
            container_name: Some("images".to_string()),
            endpoint: None,
        });
        assert!(result.is_err());
    }

    fn list_body(names: &[&str], next_marker: &str) -> String {
        let blobs: String = names
            .iter()
            .map(|n| format!("<Blob><Name>{n}</Name><Properties><Content-Length>12</Content-Length></Properties></Blob>"))
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?><EnumerationResults ServiceEndpoint="http://localhost/" ContainerName="images"><Blobs>{blobs}</Blobs><NextMarker>{next_marker}</NextMarker></EnumerationResults>"#
        )
    }

    #[tokio::test]
    async fn test_list_follows_continuation_markers() {
        let mock_server = MockServer::start().await;

        // Mounted first so it wins over the unfiltered first-page mock
        Mock::given(method("GET"))
            .and(path("/images"))
            .and(query_param("marker", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(list_body(&["c.txt"], "")))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/images"))
            .and(query_param("restype", "container"))
            .and(query_param("comp", "list"))
            .and(query_param("sr", "c"))
            .and(query_param("sp", "l"))
            .and(header("x-ms-version", SERVICE_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_string(list_body(&["a.png", "b.JPG"], "page-2")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let store = store_with_endpoint(Some(&mock_server.uri()));
        let names = store.list_blob_names().await.unwrap();

        assert_eq!(names, vec!["a.png", "b.JPG", "c.txt"]);
    }

    #[tokio::test]
    async fn test_list_empty_container() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/images"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0" encoding="utf-8"?><EnumerationResults ContainerName="images"><Blobs /><NextMarker /></EnumerationResults>"#,
            ))
            .mount(&mock_server)
            .await;

        let store = store_with_endpoint(Some(&mock_server.uri()));
        assert!(store.list_blob_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_error_is_reported() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string(
                "<?xml version=\"1.0\" encoding=\"utf-8\"?><Error><Code>AuthenticationFailed</Code><Message>Server failed to authenticate the request.\nRequestId:abc</Message></Error>",
            ))
            .mount(&mock_server)
            .await;

        let store = store_with_endpoint(Some(&mock_server.uri()));
        let err = store.list_blob_names().await.unwrap_err();

        assert_eq!(err.code(), Some("AuthenticationFailed"));
        assert_eq!(err.upstream_message(), "Server failed to authenticate the request.");
    }
}
