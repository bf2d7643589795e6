//! REST client for the cloud disk API.
//!
//! Wire protocol (all requests carry `Authorization: OAuth <token>` except
//! the transfer to the handoff URL, which is pre-signed):
//!
//! | operation                 | request                                        |
//! |---------------------------|------------------------------------------------|
//! | create directory          | `PUT {base}/resources?path=<p>`                |
//! | request upload handle     | `GET {base}/resources/upload?path=<p>&overwrite=true` → `{href, method}` |
//! | transfer bytes            | `PUT <href>` with the raw file as body         |
//! | publish                   | `PUT {base}/resources/publish?path=<p>`        |
//! | resolve metadata          | `GET {base}/resources?path=<p>` → `{type, public_url}` |

use crate::backend::{RemoteConnector, RemoteStorage};
use crate::error::{ErrorKind, Result};
use crate::models::{RemoteMetadata, ResourceKind, UploadHandle, resolve_source};
use crate::path::RemotePath;
use crate::RemoteHandle;
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH};
use reqwest::{Body, Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::instrument;

pub const DEFAULT_API_BASE: &str = "https://cloud-api.yandex.net/v1/disk";

/// Error body returned by the provider alongside non-2xx statuses.
#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    #[serde(default)]
    method: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    public_url: Option<String>,
}

/// Builds [`DiskClient`]s that share one connection pool.
///
/// # Examples
///
/// ```no_run
/// use carcheck_remote::{DiskConnector, RemoteConnector};
/// use carcheck_remote::backend::DEFAULT_API_BASE;
///
/// # fn example() -> carcheck_remote::error::Result<()> {
/// let connector = DiskConnector::new(DEFAULT_API_BASE, None)?;
/// let remote = connector.connect("y0_AgAAAA...");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DiskConnector {
    client: Client,
    api_base: String,
}
impl DiskConnector {
    /// Create a connector for the API rooted at `api_base`.
    ///
    /// `timeout` applies to whole requests, transfers included. `None` leaves
    /// deadlines to the transport defaults.
    pub fn new(api_base: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder().user_agent(concat!("carcheck/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().or_raise(|| ErrorKind::Network)?;
        let api_base = api_base.into().trim_end_matches('/').to_string();
        Ok(Self { client, api_base })
    }

    pub fn client(&self, access_token: &str) -> DiskClient {
        DiskClient { client: self.client.clone(), api_base: self.api_base.clone(), token: access_token.to_string() }
    }
}
impl RemoteConnector for DiskConnector {
    fn connect(&self, access_token: &str) -> RemoteHandle {
        Arc::new(self.client(access_token))
    }
}

/// Cloud disk client authorised with a single OAuth token.
#[derive(Clone)]
pub struct DiskClient {
    client: Client,
    api_base: String,
    token: String,
}
impl fmt::Debug for DiskClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskClient").field("api_base", &self.api_base).field("token", &"<redacted>").finish()
    }
}
impl DiskClient {
    fn resources(&self, method: Method, endpoint: &str, path: &RemotePath) -> RequestBuilder {
        self.client
            .request(method, format!("{}/resources{endpoint}", self.api_base))
            .header(AUTHORIZATION, format!("OAuth {}", self.token))
            .query(&[("path", path.as_str())])
    }

    /// Send a request, turning transport failures and non-2xx statuses into
    /// [`ErrorKind`]s. `resource` names what the request was about.
    async fn send(request: RequestBuilder, resource: &str) -> Result<Response> {
        let response = request.send().await.or_raise(|| ErrorKind::Network)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail: ApiError = serde_json::from_str(&body).unwrap_or_default();
        tracing::debug!(
            status = status.as_u16(),
            resource,
            error = detail.error.as_deref().unwrap_or("-"),
            description = detail.description.as_deref().unwrap_or("-"),
            "Remote request failed"
        );
        exn::bail!(ErrorKind::from_status(status.as_u16(), resource))
    }
}

#[async_trait]
impl RemoteStorage for DiskClient {
    fn name(&self) -> &str {
        "disk"
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn create_directory(&self, path: &RemotePath) -> Result<()> {
        let request = self.resources(Method::PUT, "", path);
        match Self::send(request, path.as_str()).await {
            Ok(_) => Ok(()),
            Err(e) if matches!(&*e, ErrorKind::Conflict(_)) => {
                tracing::debug!("Directory already exists");
                Ok(())
            },
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn request_upload_handle(&self, path: &RemotePath) -> Result<UploadHandle> {
        let request = self.resources(Method::GET, "/upload", path).query(&[("overwrite", "true")]);
        let response = Self::send(request, path.as_str()).await?;
        let link: Link = response.json().await.or_raise(|| ErrorKind::InvalidResponse("upload link"))?;
        Ok(UploadHandle { href: link.href, method: link.method.unwrap_or_else(|| "PUT".to_string()) })
    }

    #[instrument(skip(self, handle), fields(bytes))]
    async fn transfer_bytes(&self, handle: &UploadHandle, source: &str) -> Result<u64> {
        let local = resolve_source(source)?;
        let file = tokio::fs::File::open(&local).await.or_raise(|| ErrorKind::LocalSource(source.to_string()))?;
        let size = file.metadata().await.or_raise(|| ErrorKind::LocalSource(source.to_string()))?.len();
        tracing::Span::current().record("bytes", size);
        let method =
            Method::from_bytes(handle.method.as_bytes()).or_raise(|| ErrorKind::InvalidResponse("upload method"))?;
        // Streamed with an explicit length; the provider rejects short bodies.
        let request = self
            .client
            .request(method, &handle.href)
            .header(CONTENT_LENGTH, size)
            .body(Body::wrap_stream(ReaderStream::new(file)));
        Self::send(request, &handle.href).await?;
        Ok(size)
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn publish(&self, path: &RemotePath) -> Result<String> {
        Self::send(self.resources(Method::PUT, "/publish", path), path.as_str()).await?;
        let metadata = self.resolve_metadata(path).await?;
        metadata.public_url.ok_or_raise(|| ErrorKind::InvalidResponse("public_url"))
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn resolve_metadata(&self, path: &RemotePath) -> Result<RemoteMetadata> {
        let request = self.resources(Method::GET, "", path).query(&[("fields", "type,public_url")]);
        let response = match Self::send(request, path.as_str()).await {
            Ok(response) => response,
            Err(e) if matches!(&*e, ErrorKind::NotFound(_)) => return Ok(RemoteMetadata::missing()),
            Err(e) => return Err(e),
        };
        let resource: Resource = response.json().await.or_raise(|| ErrorKind::InvalidResponse("resource"))?;
        let kind = match resource.kind.as_str() {
            "dir" => ResourceKind::Directory,
            _ => ResourceKind::File,
        };
        Ok(RemoteMetadata { exists: true, kind: Some(kind), public_url: resource.public_url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use std::io::Write;

    fn client(server: &Server) -> DiskClient {
        DiskConnector::new(server.url(), None).unwrap().client("test-token")
    }

    fn path(p: &str) -> RemotePath {
        RemotePath::parse(p).unwrap()
    }

    #[tokio::test]
    async fn test_create_directory_sends_oauth_header() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("PUT", "/resources")
            .match_query(Matcher::UrlEncoded("path".into(), "/Inspections".into()))
            .match_header("authorization", "OAuth test-token")
            .with_status(201)
            .create_async()
            .await;
        client(&server).create_directory(&path("/Inspections")).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_directory_conflict_is_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("PUT", "/resources")
            .match_query(Matcher::Any)
            .with_status(409)
            .with_body(r#"{"error":"DiskPathPointsToExistentDirectoryError","description":"exists"}"#)
            .expect(2)
            .create_async()
            .await;
        let client = client(&server);
        client.create_directory(&path("/Inspections")).await.unwrap();
        client.create_directory(&path("/Inspections")).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_directory_unauthorized() {
        let mut server = Server::new_async().await;
        server.mock("PUT", "/resources").match_query(Matcher::Any).with_status(401).create_async().await;
        let err = client(&server).create_directory(&path("/Inspections")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn test_ensure_path_creates_each_prefix_in_order() {
        let mut server = Server::new_async().await;
        let root = server
            .mock("PUT", "/resources")
            .match_query(Matcher::UrlEncoded("path".into(), "/Inspections".into()))
            .with_status(409)
            .create_async()
            .await;
        let folder = server
            .mock("PUT", "/resources")
            .match_query(Matcher::UrlEncoded("path".into(), "/Inspections/2024-03-05_14-07_Toyota_Camry".into()))
            .with_status(201)
            .create_async()
            .await;
        client(&server).ensure_path(&path("/Inspections/2024-03-05_14-07_Toyota_Camry")).await.unwrap();
        root.assert_async().await;
        folder.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_file_streams_body_to_handoff_url() {
        let mut server = Server::new_async().await;
        let href = format!("{}/upload-target/abc", server.url());
        let link = server
            .mock("GET", "/resources/upload")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("path".into(), "/Inspections/f/photo_001.jpg".into()),
                Matcher::UrlEncoded("overwrite".into(), "true".into()),
            ]))
            .with_status(200)
            .with_body(format!(r#"{{"href":"{href}","method":"PUT","templated":false}}"#))
            .create_async()
            .await;
        let target = server
            .mock("PUT", "/upload-target/abc")
            .match_header("content-length", "11")
            .match_body("hello world")
            .with_status(201)
            .create_async()
            .await;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        let source = format!("file://{}", file.path().display());

        let sent = client(&server).upload_file(&path("/Inspections/f/photo_001.jpg"), &source).await.unwrap();
        assert_eq!(sent, 11);
        link.assert_async().await;
        target.assert_async().await;
    }

    #[tokio::test]
    async fn test_request_upload_handle_missing_parent() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/resources/upload")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"error":"DiskNotFoundError"}"#)
            .create_async()
            .await;
        let err = client(&server).request_upload_handle(&path("/missing/photo_001.jpg")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_transfer_missing_local_file() {
        let server = Server::new_async().await;
        let handle = UploadHandle::new(format!("{}/upload-target", server.url()));
        let err = client(&server).transfer_bytes(&handle, "/definitely/not/here.jpg").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::LocalSource(_)));
    }

    #[tokio::test]
    async fn test_transfer_server_error_is_retryable() {
        let mut server = Server::new_async().await;
        server.mock("PUT", "/upload-target").with_status(503).create_async().await;
        let file = tempfile::NamedTempFile::new().unwrap();
        let handle = UploadHandle::new(format!("{}/upload-target", server.url()));
        let err = client(&server).transfer_bytes(&handle, file.path().to_str().unwrap()).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Server(503));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_publish_reads_back_public_url() {
        let mut server = Server::new_async().await;
        let publish = server
            .mock("PUT", "/resources/publish")
            .match_query(Matcher::UrlEncoded("path".into(), "/Inspections/f".into()))
            .with_status(200)
            .with_body(r#"{"href":"https://cloud-api/resources?path=disk:/Inspections/f","method":"GET"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/resources")
            .match_query(Matcher::UrlEncoded("path".into(), "/Inspections/f".into()))
            .with_status(200)
            .with_body(r#"{"type":"dir","public_url":"https://yadi.sk/d/abc"}"#)
            .create_async()
            .await;
        let url = client(&server).publish(&path("/Inspections/f")).await.unwrap();
        assert_eq!(url, "https://yadi.sk/d/abc");
        publish.assert_async().await;
    }

    #[tokio::test]
    async fn test_publish_without_public_url() {
        let mut server = Server::new_async().await;
        server.mock("PUT", "/resources/publish").match_query(Matcher::Any).with_status(200).create_async().await;
        server
            .mock("GET", "/resources")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"type":"dir"}"#)
            .create_async()
            .await;
        let err = client(&server).publish(&path("/Inspections/f")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidResponse("public_url"));
    }

    #[tokio::test]
    async fn test_resolve_metadata() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/resources")
            .match_query(Matcher::UrlEncoded("path".into(), "/Inspections".into()))
            .with_status(200)
            .with_body(r#"{"type":"dir","name":"Inspections"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/resources")
            .match_query(Matcher::UrlEncoded("path".into(), "/nope".into()))
            .with_status(404)
            .create_async()
            .await;
        let client = client(&server);
        let found = client.resolve_metadata(&path("/Inspections")).await.unwrap();
        assert!(found.exists && found.is_directory());
        assert_eq!(found.public_url, None);
        let missing = client.resolve_metadata(&path("/nope")).await.unwrap();
        assert_eq!(missing, RemoteMetadata::missing());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        // Port 9 (discard) on localhost is essentially never listening.
        let client = DiskConnector::new("http://127.0.0.1:9", None).unwrap().client("t");
        let err = client.create_directory(&path("/Inspections")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Network);
    }

    #[test]
    fn test_debug_redacts_token() {
        let client = DiskConnector::new(DEFAULT_API_BASE, None).unwrap().client("secret-token");
        assert!(!format!("{client:?}").contains("secret-token"));
    }
}
