//! Clients for the registry admin API and the device.
//!
//! The registry and the device status interface speak HTTP; lock commands
//! are single UDP datagrams.

use anyhow::{anyhow, bail, Context, Result};
use latch_common::{
    verify_sha256, DeviceStatus, FirmwareInfo, UpdateTriggerResponse, VersionResponse,
    HEADER_FIRMWARE_VERSION, HEADER_SHA256, PATH_DELETE, PATH_FIRMWARE, PATH_LIST, PATH_UPLOAD,
    PATH_VERSION,
};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use std::time::Duration;
use tokio::net::UdpSocket;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(format!("latchctl/{}", env!("CARGO_PKG_VERSION")))
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

/// Turn a non-success response into an error carrying the server's message.
async fn response_error(resp: reqwest::Response) -> anyhow::Error {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if body.trim().is_empty() {
        anyhow!("request failed: {}", status)
    } else {
        anyhow!("request failed: {}: {}", status, body.trim())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Result of `GET /firmware`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    NotModified,
    Image { bytes: Vec<u8>, sha256: String },
}

pub struct RegistryAdmin {
    base_url: String,
    http: reqwest::Client,
}

impl RegistryAdmin {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: http_client()?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Upload an image; it becomes the current version.
    pub async fn upload(&self, version: &str, image: Vec<u8>, filename: &str) -> Result<String> {
        let part = Part::bytes(image)
            .file_name(filename.to_string())
            .mime_str("application/octet-stream")?;
        let form = Form::new()
            .text("version", version.to_string())
            .part("firmware", part);

        let resp = self
            .http
            .post(self.url(PATH_UPLOAD))
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("Cannot reach registry at {}", self.base_url))?;
        if !resp.status().is_success() {
            return Err(response_error(resp).await);
        }
        Ok(resp.text().await?)
    }

    pub async fn list(&self) -> Result<Vec<FirmwareInfo>> {
        let resp = self
            .http
            .get(self.url(PATH_LIST))
            .send()
            .await
            .with_context(|| format!("Cannot reach registry at {}", self.base_url))?;
        if !resp.status().is_success() {
            return Err(response_error(resp).await);
        }
        resp.json().await.context("Invalid firmware list")
    }

    /// Current version, `None` when the registry has none.
    pub async fn current(&self) -> Result<Option<String>> {
        let resp = self
            .http
            .get(self.url(PATH_VERSION))
            .send()
            .await
            .with_context(|| format!("Cannot reach registry at {}", self.base_url))?;
        if !resp.status().is_success() {
            return Err(response_error(resp).await);
        }
        let version: VersionResponse = resp.json().await.context("Invalid version response")?;
        Ok(Some(version.version).filter(|v| !v.is_empty()))
    }

    pub async fn delete(&self, version: &str) -> Result<String> {
        let resp = self
            .http
            .delete(self.url(PATH_DELETE))
            .query(&[("version", version)])
            .send()
            .await
            .with_context(|| format!("Cannot reach registry at {}", self.base_url))?;
        if !resp.status().is_success() {
            return Err(response_error(resp).await);
        }
        Ok(resp.text().await?)
    }

    /// Fetch an image the way a device does, verifying the declared checksum.
    pub async fn fetch(&self, version: Option<&str>, client_version: Option<&str>) -> Result<Fetched> {
        let mut request = self.http.get(self.url(PATH_FIRMWARE));
        if let Some(version) = version {
            request = request.query(&[("version", version)]);
        }
        if let Some(client_version) = client_version {
            request = request.header(HEADER_FIRMWARE_VERSION, client_version);
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("Cannot reach registry at {}", self.base_url))?;
        match resp.status() {
            StatusCode::NOT_MODIFIED => Ok(Fetched::NotModified),
            StatusCode::OK => {
                let sha256 = resp
                    .headers()
                    .get(HEADER_SHA256)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("registry sent no {} header", HEADER_SHA256))?;
                let bytes = resp.bytes().await?.to_vec();
                verify_sha256(&bytes, &sha256)?;
                Ok(Fetched::Image { bytes, sha256 })
            }
            _ => Err(response_error(resp).await),
        }
    }
}

// ============================================================================
// Device
// ============================================================================

pub struct DeviceClient {
    command_addr: String,
    status_url: String,
    http: reqwest::Client,
}

impl DeviceClient {
    /// `command_addr` is the UDP `host:port`; `status_url` the status interface base URL.
    pub fn new(command_addr: impl Into<String>, status_url: &str) -> Result<Self> {
        Ok(Self {
            command_addr: command_addr.into(),
            status_url: status_url.trim_end_matches('/').to_string(),
            http: http_client()?,
        })
    }

    /// Build from a host name and the two device ports.
    pub fn for_host(host: &str, command_port: u16, status_port: u16) -> Result<Self> {
        Self::new(
            format!("{}:{}", host, command_port),
            &format!("http://{}:{}", host, status_port),
        )
    }

    /// Send one command datagram. Delivery is not acknowledged.
    pub async fn send_command(&self, command: &str) -> Result<()> {
        let target = tokio::net::lookup_host(&self.command_addr)
            .await
            .with_context(|| format!("Cannot resolve {}", self.command_addr))?
            .next()
            .ok_or_else(|| anyhow!("No address for {}", self.command_addr))?;
        let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };

        let socket = UdpSocket::bind(local).await?;
        let sent = socket.send_to(command.as_bytes(), target).await?;
        if sent != command.len() {
            bail!("short send to {}: {} of {} bytes", target, sent, command.len());
        }
        Ok(())
    }

    pub async fn status(&self) -> Result<DeviceStatus> {
        let resp = self
            .http
            .get(format!("{}/status", self.status_url))
            .send()
            .await
            .with_context(|| format!("Cannot reach device at {}", self.status_url))?;
        if !resp.status().is_success() {
            return Err(response_error(resp).await);
        }
        resp.json().await.context("Invalid status response")
    }

    pub async fn trigger_update(&self) -> Result<UpdateTriggerResponse> {
        let resp = self
            .http
            .post(format!("{}/update", self.status_url))
            .send()
            .await
            .with_context(|| format!("Cannot reach device at {}", self.status_url))?;
        if resp.status() != StatusCode::ACCEPTED {
            return Err(response_error(resp).await);
        }
        resp.json().await.context("Invalid update response")
    }
}
