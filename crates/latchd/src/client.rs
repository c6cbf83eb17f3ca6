//! Registry client used by the update agent.
//!
//! Production code uses [`HttpRegistryClient`]. Tests use
//! [`FakeRegistryClient`] with a canned negotiation result and call counters.

use async_trait::async_trait;
use latch_common::{
    device_user_agent, sha256_hex, LatchError, Result, VersionResponse, HEADER_FIRMWARE_VERSION,
    HEADER_SHA256, MAX_UPLOAD_BYTES, PATH_FIRMWARE, PATH_VERSION,
};
use reqwest::StatusCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Image body as received from the registry, not yet verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedImage {
    pub bytes: Vec<u8>,
    /// Checksum the registry declared in `x-sha256`
    pub declared_sha256: Option<String>,
    /// `Content-Length` the registry declared
    pub content_length: Option<u64>,
}

/// Result of a conditional fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiation {
    /// Running version is already current.
    NotModified,
    Payload(DownloadedImage),
}

#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Verify the network link and that the registry answers.
    async fn check_connectivity(&self) -> Result<()>;

    /// Conditional fetch of the current image, reporting `running_version`.
    async fn negotiate(&self, running_version: &str) -> Result<Negotiation>;
}

// ============================================================================
// HTTP Registry Client (Production)
// ============================================================================

pub struct HttpRegistryClient {
    base_url: String,
    host: String,
    port: u16,
    timeout: Duration,
    max_image_bytes: u64,
    http: reqwest::Client,
}

impl HttpRegistryClient {
    pub fn new(base_url: &str, running_version: &str, timeout: Duration) -> Result<Self> {
        let url = reqwest::Url::parse(base_url)
            .map_err(|e| LatchError::ClientInput(format!("invalid registry url {}: {}", base_url, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| LatchError::ClientInput(format!("registry url {} has no host", base_url)))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);

        let http = reqwest::Client::builder()
            .user_agent(device_user_agent("latchd", running_version))
            .timeout(timeout)
            .build()
            .map_err(|e| LatchError::Protocol(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            host,
            port,
            timeout,
            max_image_bytes: MAX_UPLOAD_BYTES,
            http,
        })
    }

    /// Refuse image bodies larger than `limit` bytes.
    pub fn with_max_image_bytes(mut self, limit: u64) -> Self {
        self.max_image_bytes = limit;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn map_err(&self, e: reqwest::Error) -> LatchError {
        if e.is_timeout() {
            LatchError::Timeout(self.timeout)
        } else if e.is_connect() {
            LatchError::Connectivity(e.to_string())
        } else {
            LatchError::Protocol(e.to_string())
        }
    }

    /// Read the image body, stopping as soon as it passes the size ceiling.
    async fn read_image(&self, mut resp: reqwest::Response) -> Result<Vec<u8>> {
        let limit = self.max_image_bytes;
        let declared = resp.content_length();
        if let Some(len) = declared {
            if len > limit {
                return Err(LatchError::Integrity(format!(
                    "registry declared {} bytes, limit is {}",
                    len, limit
                )));
            }
        }

        let mut bytes = Vec::with_capacity(declared.unwrap_or(0) as usize);
        while let Some(chunk) = resp.chunk().await.map_err(|e| self.map_err(e))? {
            if (bytes.len() + chunk.len()) as u64 > limit {
                return Err(LatchError::Integrity(format!(
                    "image body exceeds limit of {} bytes",
                    limit
                )));
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn check_connectivity(&self) -> Result<()> {
        // Link first: can we open a TCP connection to the registry host at all?
        match tokio::time::timeout(self.timeout, TcpStream::connect((self.host.as_str(), self.port)))
            .await
        {
            Ok(Ok(_stream)) => {}
            Ok(Err(e)) => {
                return Err(LatchError::Connectivity(format!(
                    "cannot reach {}:{}: {}",
                    self.host, self.port, e
                )))
            }
            Err(_) => {
                return Err(LatchError::Connectivity(format!(
                    "connect to {}:{} timed out",
                    self.host, self.port
                )))
            }
        }

        let resp = self
            .http
            .get(self.url(PATH_VERSION))
            .send()
            .await
            .map_err(|e| LatchError::Connectivity(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(LatchError::Connectivity(format!(
                "registry answered {} to {}",
                resp.status(),
                PATH_VERSION
            )));
        }
        if let Ok(version) = resp.json::<VersionResponse>().await {
            debug!("Registry reachable, current version '{}'", version.version);
        }
        Ok(())
    }

    async fn negotiate(&self, running_version: &str) -> Result<Negotiation> {
        let resp = self
            .http
            .get(self.url(PATH_FIRMWARE))
            .header(HEADER_FIRMWARE_VERSION, running_version)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;

        match resp.status() {
            StatusCode::NOT_MODIFIED => Ok(Negotiation::NotModified),
            StatusCode::OK => {
                let declared_sha256 = resp
                    .headers()
                    .get(HEADER_SHA256)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let content_length = resp.content_length();
                let bytes = self.read_image(resp).await?;
                Ok(Negotiation::Payload(DownloadedImage {
                    bytes,
                    declared_sha256,
                    content_length,
                }))
            }
            StatusCode::NOT_FOUND => Err(LatchError::NotFound(
                "registry has no current firmware image".to_string(),
            )),
            status => Err(LatchError::Protocol(format!(
                "unexpected status {} from {}",
                status, PATH_FIRMWARE
            ))),
        }
    }
}

// ============================================================================
// Fake Registry Client (Testing)
// ============================================================================

/// Canned negotiation result for [`FakeRegistryClient`].
#[derive(Debug, Clone)]
pub enum FakeNegotiation {
    NotModified,
    Payload(DownloadedImage),
    NotFound,
    /// Never answers; exercises the attempt timeout.
    Stall,
}

pub struct FakeRegistryClient {
    reachable: bool,
    negotiation: FakeNegotiation,
    connectivity_calls: AtomicUsize,
    negotiate_calls: AtomicUsize,
}

impl FakeRegistryClient {
    pub fn new(reachable: bool, negotiation: FakeNegotiation) -> Self {
        Self {
            reachable,
            negotiation,
            connectivity_calls: AtomicUsize::new(0),
            negotiate_calls: AtomicUsize::new(0),
        }
    }

    pub fn unreachable() -> Self {
        Self::new(false, FakeNegotiation::NotModified)
    }

    pub fn not_modified() -> Self {
        Self::new(true, FakeNegotiation::NotModified)
    }

    /// Serves `bytes` with a correct checksum and length.
    pub fn serving(bytes: &[u8]) -> Self {
        Self::serving_with_checksum(bytes, &sha256_hex(bytes))
    }

    pub fn serving_with_checksum(bytes: &[u8], sha256: &str) -> Self {
        Self::new(
            true,
            FakeNegotiation::Payload(DownloadedImage {
                bytes: bytes.to_vec(),
                declared_sha256: Some(sha256.to_string()),
                content_length: Some(bytes.len() as u64),
            }),
        )
    }

    pub fn connectivity_calls(&self) -> usize {
        self.connectivity_calls.load(Ordering::SeqCst)
    }

    pub fn negotiate_calls(&self) -> usize {
        self.negotiate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryClient for FakeRegistryClient {
    async fn check_connectivity(&self) -> Result<()> {
        self.connectivity_calls.fetch_add(1, Ordering::SeqCst);
        if self.reachable {
            Ok(())
        } else {
            Err(LatchError::Connectivity("link down".to_string()))
        }
    }

    async fn negotiate(&self, _running_version: &str) -> Result<Negotiation> {
        self.negotiate_calls.fetch_add(1, Ordering::SeqCst);
        match &self.negotiation {
            FakeNegotiation::NotModified => Ok(Negotiation::NotModified),
            FakeNegotiation::Payload(image) => Ok(Negotiation::Payload(image.clone())),
            FakeNegotiation::NotFound => Err(LatchError::NotFound("no current firmware".to_string())),
            FakeNegotiation::Stall => {
                std::future::pending::<()>().await;
                Err(LatchError::Protocol("stalled".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_client_rejects_bad_url() {
        assert!(HttpRegistryClient::new("not a url", "1.0.0", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_http_client_default_port() {
        let client =
            HttpRegistryClient::new("http://ota.local/", "1.0.0", Duration::from_secs(1)).unwrap();
        assert_eq!(client.port, 80);
        assert_eq!(client.url(PATH_FIRMWARE), "http://ota.local/firmware");
    }

    /// Registry stand-in serving `body` with a valid checksum.
    async fn serve_image(body: Vec<u8>) -> String {
        let sha256 = sha256_hex(&body);
        let app = axum::Router::new().route(
            PATH_FIRMWARE,
            axum::routing::get(move || {
                let body = body.clone();
                let sha256 = sha256.clone();
                async move { ([(HEADER_SHA256, sha256)], body) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// Registry stand-in that streams `chunks` with no Content-Length.
    async fn serve_chunked(chunks: usize, chunk_len: usize) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = stream.read(&mut request).await.unwrap();
            let head = format!(
                "HTTP/1.1 200 OK\r\n{}: {}\r\ntransfer-encoding: chunked\r\n\r\n",
                HEADER_SHA256,
                sha256_hex(b"irrelevant")
            );
            stream.write_all(head.as_bytes()).await.unwrap();
            let chunk = vec![b'x'; chunk_len];
            for _ in 0..chunks {
                let framed = format!("{:x}\r\n", chunk_len);
                if stream.write_all(framed.as_bytes()).await.is_err()
                    || stream.write_all(&chunk).await.is_err()
                    || stream.write_all(b"\r\n").await.is_err()
                {
                    return;
                }
            }
            let _ = stream.write_all(b"0\r\n\r\n").await;
        });
        format!("http://{}", addr)
    }

    fn small_client(url: &str, limit: u64) -> HttpRegistryClient {
        HttpRegistryClient::new(url, "1.0.0", Duration::from_secs(5))
            .unwrap()
            .with_max_image_bytes(limit)
    }

    #[tokio::test]
    async fn test_image_within_limit_is_returned() {
        let url = serve_image(vec![7u8; 1024]).await;
        match small_client(&url, 1024).negotiate("0.9.0").await.unwrap() {
            Negotiation::Payload(image) => {
                assert_eq!(image.bytes.len(), 1024);
                assert_eq!(image.content_length, Some(1024));
                assert_eq!(image.declared_sha256, Some(sha256_hex(&image.bytes)));
            }
            other => panic!("expected payload, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_declared_length_rejected() {
        let url = serve_image(vec![7u8; 4096]).await;
        let err = small_client(&url, 1024).negotiate("0.9.0").await.unwrap_err();
        assert_eq!(err.kind(), "integrity");
        assert!(err.to_string().contains("4096"), "got: {}", err);
    }

    #[tokio::test]
    async fn test_oversized_stream_cut_off() {
        let url = serve_chunked(64, 1024).await;
        let err = small_client(&url, 4096).negotiate("0.9.0").await.unwrap_err();
        assert_eq!(err.kind(), "integrity");
        assert!(err.to_string().contains("exceeds"), "got: {}", err);
    }

    #[test]
    fn test_default_image_ceiling() {
        let client =
            HttpRegistryClient::new("http://ota.local", "1.0.0", Duration::from_secs(1)).unwrap();
        assert_eq!(client.max_image_bytes, MAX_UPLOAD_BYTES);
    }

    #[tokio::test]
    async fn test_fake_counts_calls() {
        let fake = FakeRegistryClient::not_modified();
        fake.check_connectivity().await.unwrap();
        assert_eq!(fake.negotiate("1.0.0").await.unwrap(), Negotiation::NotModified);
        assert_eq!(fake.connectivity_calls(), 1);
        assert_eq!(fake.negotiate_calls(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_fake() {
        let fake = FakeRegistryClient::unreachable();
        let err = fake.check_connectivity().await.unwrap_err();
        assert_eq!(err.kind(), "connectivity");
    }
}
