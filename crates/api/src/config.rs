//! Process-level settings for the HTTP server.
//!
//! Engine tunables live in [`scenecraft_engine::EngineConfig`]; this covers
//! only what the binary itself needs.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use scenecraft_engine::{ConfigError, DeviceCapacity, DeviceKind};

pub const DEFAULT_PORT: u16 = 8765;
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8766";

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Base URL of the synthesis service.
    pub backend_url: String,
    /// Reported until the backend answers a device query.
    pub device: DeviceCapacity,
    /// Comma-separated blocked terms. Empty disables the filter.
    pub content_blocklist: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            device: DeviceCapacity {
                kind: DeviceKind::Gpu,
                name: "unknown".to_string(),
                total_units: 8192,
            },
            content_blocklist: String::new(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();

        let host = match lookup("SCENECRAFT_HOST") {
            None => d.host,
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e: std::net::AddrParseError| invalid("SCENECRAFT_HOST", &raw, &e.to_string()))?,
        };
        let port = match lookup("SCENECRAFT_PORT") {
            None => d.port,
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| invalid("SCENECRAFT_PORT", &raw, &e.to_string()))?,
        };
        let kind = match lookup("SCENECRAFT_DEVICE_KIND") {
            None => d.device.kind,
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "gpu" | "cuda" => DeviceKind::Gpu,
                "cpu" => DeviceKind::Cpu,
                _ => return Err(invalid("SCENECRAFT_DEVICE_KIND", &raw, "expected gpu or cpu")),
            },
        };
        let total_units = match lookup("SCENECRAFT_DEVICE_MEMORY_MIB") {
            None => d.device.total_units,
            Some(raw) => raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                invalid("SCENECRAFT_DEVICE_MEMORY_MIB", &raw, &e.to_string())
            })?,
        };

        Ok(Self {
            host,
            port,
            backend_url: lookup("SCENECRAFT_BACKEND_URL")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(d.backend_url),
            device: DeviceCapacity {
                kind,
                name: lookup("SCENECRAFT_DEVICE_NAME").unwrap_or(d.device.name),
                total_units,
            },
            content_blocklist: lookup("SCENECRAFT_CONTENT_BLOCKLIST").unwrap_or_default(),
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
