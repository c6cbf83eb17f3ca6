//! Update negotiation protocol constants.
//!
//! A device identifies its running firmware with `x-firmware-version` (older
//! devices send `x-esp8266-version`, or only a `product/version` user agent).
//! The registry answers `GET /firmware` with 304 when that version is already
//! current, otherwise with the image and its checksum in `x-sha256`.

/// Header carrying the client's running firmware version.
pub const HEADER_FIRMWARE_VERSION: &str = "x-firmware-version";

/// Header sent by ESP8266 OTA clients.
pub const HEADER_LEGACY_VERSION: &str = "x-esp8266-version";

/// Header carrying the hex SHA-256 of the served image.
pub const HEADER_SHA256: &str = "x-sha256";

pub const PATH_UPLOAD: &str = "/upload";
pub const PATH_FIRMWARE: &str = "/firmware";
pub const PATH_VERSION: &str = "/version";
pub const PATH_LIST: &str = "/list";
pub const PATH_DELETE: &str = "/delete";

/// Upload size ceiling (10 MiB).
pub const MAX_UPLOAD_BYTES: u64 = 10 << 20;

pub const DEFAULT_REGISTRY_PORT: u16 = 8080;
pub const DEFAULT_COMMAND_PORT: u16 = 2333;
pub const DEFAULT_STATUS_PORT: u16 = 8266;

/// Longest version string accepted as a storage key.
pub const MAX_VERSION_LEN: usize = 64;

/// Whether `version` can be used as a flat file-name component.
pub fn is_valid_version(version: &str) -> bool {
    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return false;
    }
    if version == "." || version == ".." {
        return false;
    }
    version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+'))
}

/// User agent a device sends while negotiating.
pub fn device_user_agent(product: &str, version: &str) -> String {
    format!("{}/{}", product, version)
}

/// Resolve the version a client reports, in header priority order.
///
/// Falls back to the token after the first `/` of the user agent, up to the
/// next whitespace (`latchd/1.2.0 (linux)` reports `1.2.0`).
pub fn client_reported_version(
    header: Option<&str>,
    legacy_header: Option<&str>,
    user_agent: Option<&str>,
) -> Option<String> {
    for value in [header, legacy_header].into_iter().flatten() {
        let value = value.trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }

    let ua = user_agent?;
    let (_, rest) = ua.split_once('/')?;
    let token = rest.split_whitespace().next()?;
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
