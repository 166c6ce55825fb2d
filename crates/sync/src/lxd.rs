//! LXD API abstraction for testability.
//!
//! The [`MetadataClient`] trait abstracts the LXD REST API, allowing
//! production code to use [`LxdClient`] while tests use `MockMetadataClient`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │  Reconciler  │
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │MetadataClient│ (trait)
//! └──────────────┘
//!      │     │
//!      ▼     ▼
//!  ┌─────┐ ┌────┐
//!  │ LXD │ │Mock│
//!  └──┬──┘ └────┘
//!     │
//!     ▼
//!  unix socket (HTTP/1.1)
//! ```
//!
//! The production client speaks HTTP/1.1 over the LXD unix socket, one
//! connection per request, with one overall timeout per request. Responses
//! arrive in LXD's standard envelope (`{"type": "sync", "metadata": ...}`
//! on success, `{"type": "error", "error": ..., "error_code": ...}` on
//! failure).

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::client::conn::http1;
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::net::UnixStream;
use tracing::trace;

use proxyneigh_core::types::ContainerInfo;

use crate::config::SyncConfig;
use crate::error::SyncError;

/// API extension the full container listing depends on.
pub const EXTENSION_CONTAINER_FULL: &str = "container_full";

/// Trait abstracting the container metadata source.
///
/// All LXD API calls go through this trait, enabling testability via
/// mocking. The trait is `Send + Sync + 'static`, allowing safe sharing
/// across async contexts.
pub trait MetadataClient: Send + Sync + 'static {
    /// Fetches a point-in-time snapshot of every container, including
    /// device configuration and runtime state.
    ///
    /// Equivalent to `lxc query -X GET /1.0/containers?recursion=2`.
    fn list_containers(
        &self,
    ) -> impl Future<Output = Result<Vec<ContainerInfo>, SyncError>> + Send;

    /// Checks whether the server advertises the given API extension.
    fn has_extension(&self, name: &str) -> impl Future<Output = Result<bool, SyncError>> + Send;

    /// Checks server reachability.
    fn ping(&self) -> impl Future<Output = Result<(), SyncError>> + Send;
}

// --- LXD wire format ---

/// LXD 표준 응답 envelope
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ApiResponse<T> {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_code: u32,
    #[serde(default)]
    metadata: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiServer {
    #[serde(default)]
    api_extensions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ApiContainer {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    devices: HashMap<String, HashMap<String, String>>,
    #[serde(default)]
    state: Option<ApiContainerState>,
}

#[derive(Debug, Deserialize)]
struct ApiContainerState {
    #[serde(default)]
    pid: i64,
}

impl From<ApiContainer> for ContainerInfo {
    fn from(container: ApiContainer) -> Self {
        // state가 없으면 init PID 0으로 간주 (실행 중 아님)
        let init_pid = container.state.map(|state| state.pid).unwrap_or(0);
        ContainerInfo {
            name: container.name,
            status: container.status,
            init_pid,
            devices: container.devices,
        }
    }
}

/// Unwraps the LXD response envelope, mapping error envelopes to
/// [`SyncError::LxdApi`].
fn decode_envelope<T: DeserializeOwned>(body: &[u8]) -> Result<T, SyncError> {
    let envelope: ApiResponse<T> =
        serde_json::from_slice(body).map_err(|e| SyncError::Decode(e.to_string()))?;

    if envelope.kind == "error" {
        return Err(SyncError::LxdApi {
            code: envelope.error_code,
            message: envelope.error,
        });
    }

    envelope
        .metadata
        .ok_or_else(|| SyncError::Decode("response has no metadata".to_owned()))
}

/// Production metadata client speaking to the LXD unix socket.
pub struct LxdClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl LxdClient {
    /// Creates a client for the given socket path and per-request timeout.
    pub fn new(socket_path: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            timeout,
        }
    }

    /// Creates a client from the sync module configuration.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            &config.lxd_socket,
            Duration::from_secs(config.lxd_timeout_secs),
        )
    }

    /// Performs a GET request against the LXD API with the overall timeout.
    async fn get(&self, path: &str) -> Result<Bytes, SyncError> {
        tokio::time::timeout(self.timeout, self.get_inner(path))
            .await
            .map_err(|_| {
                SyncError::LxdConnection(format!(
                    "request to {path} timed out after {}s",
                    self.timeout.as_secs(),
                ))
            })?
    }

    async fn get_inner(&self, path: &str) -> Result<Bytes, SyncError> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            SyncError::LxdConnection(format!(
                "failed to connect to lxd at {}: {e}",
                self.socket_path.display(),
            ))
        })?;

        let (mut sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| SyncError::LxdConnection(format!("http handshake failed: {e}")))?;

        // 요청이 살아있는 동안 연결 구동
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                trace!(error = %e, "lxd connection closed with error");
            }
        });

        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .header(hyper::header::HOST, "lxd")
            .body(Empty::<Bytes>::new())
            .map_err(|e| SyncError::LxdConnection(format!("failed to build request: {e}")))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| SyncError::LxdConnection(format!("request to {path} failed: {e}")))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| SyncError::LxdConnection(format!("failed to read response body: {e}")))?
            .to_bytes();

        trace!(path, status = %status, bytes = body.len(), "lxd response received");
        Ok(body)
    }

    async fn server(&self) -> Result<ApiServer, SyncError> {
        let body = self.get("/1.0").await?;
        decode_envelope::<ApiServer>(&body)
    }
}

impl MetadataClient for LxdClient {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, SyncError> {
        let body = self.get("/1.0/containers?recursion=2").await?;
        let containers = decode_envelope::<Vec<ApiContainer>>(&body)?;
        Ok(containers.into_iter().map(ContainerInfo::from).collect())
    }

    async fn has_extension(&self, name: &str) -> Result<bool, SyncError> {
        let server = self.server().await?;
        Ok(server.api_extensions.iter().any(|ext| ext == name))
    }

    async fn ping(&self) -> Result<(), SyncError> {
        self.server().await?;
        Ok(())
    }
}

/// 테스트용 Mock 메타데이터 클라이언트
///
/// 설정 가능한 응답을 반환하여 LXD 없이도 테스트할 수 있습니다.
#[cfg(test)]
#[derive(Default)]
pub struct MockMetadataClient {
    /// list_containers 호출 시 반환할 컨테이너 목록
    pub containers: Vec<ContainerInfo>,
    /// 서버가 광고하는 API 확장 목록
    pub extensions: Vec<String>,
    /// 조회 호출 시 실패를 시뮬레이션할지 여부
    pub fail_requests: bool,
    /// list_containers 응답 지연 (동시성 테스트용)
    pub latency: Option<Duration>,
}

#[cfg(test)]
impl MockMetadataClient {
    /// 빈 컨테이너 목록으로 mock 클라이언트를 생성합니다.
    pub fn new() -> Self {
        Self {
            extensions: vec![EXTENSION_CONTAINER_FULL.to_owned()],
            ..Self::default()
        }
    }

    /// 테스트용 컨테이너를 설정합니다.
    pub fn with_containers(mut self, containers: Vec<ContainerInfo>) -> Self {
        self.containers = containers;
        self
    }

    /// 광고할 확장 목록을 설정합니다.
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    /// 모든 조회 호출이 실패하도록 설정합니다.
    pub fn with_failing_requests(mut self) -> Self {
        self.fail_requests = true;
        self
    }

    /// list_containers 응답을 지연시킵니다.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

#[cfg(test)]
impl MetadataClient for MockMetadataClient {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, SyncError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail_requests {
            return Err(SyncError::LxdConnection("mock failure".to_owned()));
        }
        Ok(self.containers.clone())
    }

    async fn has_extension(&self, name: &str) -> Result<bool, SyncError> {
        if self.fail_requests {
            return Err(SyncError::LxdConnection("mock failure".to_owned()));
        }
        Ok(self.extensions.iter().any(|ext| ext == name))
    }

    async fn ping(&self) -> Result<(), SyncError> {
        if self.fail_requests {
            return Err(SyncError::LxdConnection("mock failure".to_owned()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn decode_sync_envelope() {
        let body = br#"{"type":"sync","status":"Success","metadata":{"api_extensions":["container_full","etag"]}}"#;
        let server: ApiServer = decode_envelope(body).unwrap();
        assert_eq!(server.api_extensions.len(), 2);
        assert!(server.api_extensions.contains(&"container_full".to_owned()));
    }

    #[test]
    fn decode_error_envelope() {
        let body = br#"{"type":"error","error":"not authorized","error_code":403}"#;
        let result: Result<ApiServer, _> = decode_envelope(body);
        match result {
            Err(SyncError::LxdApi { code, message }) => {
                assert_eq!(code, 403);
                assert_eq!(message, "not authorized");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_missing_metadata() {
        let body = br#"{"type":"sync","status":"Success"}"#;
        let result: Result<ApiServer, _> = decode_envelope(body);
        assert!(matches!(result, Err(SyncError::Decode(_))));
    }

    #[test]
    fn decode_rejects_malformed_json() {
        let result: Result<ApiServer, _> = decode_envelope(b"not json");
        assert!(matches!(result, Err(SyncError::Decode(_))));
    }

    #[test]
    fn container_wire_type_maps_to_domain_type() {
        let body = br#"{"type":"sync","metadata":[{
            "name": "web1",
            "status": "Running",
            "devices": {
                "eth0": {"type": "nic", "nictype": "ipvlan", "parent": "vlan10", "ipv4.address": "192.0.2.101"}
            },
            "state": {"status": "Running", "pid": 3851793}
        }]}"#;
        let containers: Vec<ApiContainer> = decode_envelope(body).unwrap();
        let info: ContainerInfo = containers.into_iter().next().unwrap().into();
        assert_eq!(info.name, "web1");
        assert_eq!(info.init_pid, 3_851_793);
        assert!(info.is_running());
        assert_eq!(
            info.devices["eth0"]["ipv4.address"],
            "192.0.2.101"
        );
    }

    #[test]
    fn container_without_state_is_not_running() {
        let body = br#"{"type":"sync","metadata":[{"name": "stopped1"}]}"#;
        let containers: Vec<ApiContainer> = decode_envelope(body).unwrap();
        let info: ContainerInfo = containers.into_iter().next().unwrap().into();
        assert_eq!(info.init_pid, 0);
        assert!(!info.is_running());
    }

    /// Serves one canned HTTP response on a unix socket.
    async fn serve_once(listener: tokio::net::UnixListener, body: &'static str) {
        let (mut stream, _) = listener.accept().await.unwrap();
        // 요청 헤더 끝까지 읽기
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            if request.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
            body.len(),
            body,
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.flush().await.unwrap();
    }

    #[tokio::test]
    async fn lxd_client_speaks_http_over_unix_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("lxd.socket");
        let listener = tokio::net::UnixListener::bind(&socket_path).unwrap();
        tokio::spawn(serve_once(
            listener,
            r#"{"type":"sync","metadata":{"api_extensions":["container_full"]}}"#,
        ));

        let client = LxdClient::new(&socket_path, Duration::from_secs(5));
        assert!(client.has_extension(EXTENSION_CONTAINER_FULL).await.unwrap());
    }

    #[tokio::test]
    async fn lxd_client_maps_connect_failure() {
        let client = LxdClient::new("/nonexistent/lxd.socket", Duration::from_secs(1));
        let result = client.ping().await;
        assert!(matches!(result, Err(SyncError::LxdConnection(_))));
    }

    #[tokio::test]
    async fn mock_client_serves_containers() {
        let client = MockMetadataClient::new().with_containers(vec![ContainerInfo {
            name: "web1".to_owned(),
            status: "Running".to_owned(),
            init_pid: 1000,
            devices: HashMap::new(),
        }]);
        let containers = client.list_containers().await.unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].name, "web1");
    }

    #[tokio::test]
    async fn mock_client_extension_check() {
        let client = MockMetadataClient::new();
        assert!(client.has_extension(EXTENSION_CONTAINER_FULL).await.unwrap());
        assert!(!client.has_extension("missing_extension").await.unwrap());
    }

    #[tokio::test]
    async fn mock_client_failing_requests() {
        let client = MockMetadataClient::new().with_failing_requests();
        assert!(client.list_containers().await.is_err());
        assert!(client.ping().await.is_err());
    }
}
