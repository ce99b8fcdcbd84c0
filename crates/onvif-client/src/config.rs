//! Connection configuration
//!
//! A [`ClientConfig`] can be built in code or loaded from TOML:
//!
//! ```toml
//! hostname = "192.168.1.64"
//! port = 80
//! username = "admin"
//! password = "secret"
//! timeout_ms = 5000
//! preserve_address = true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{from_url, OnvifError, Result};

fn default_port() -> u16 {
    80
}

fn default_path() -> String {
    "/onvif/device_service".to_string()
}

fn default_timeout_ms() -> u64 {
    120_000
}

fn default_use_wsse() -> bool {
    true
}

/// Connection profile for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Device hostname or IP address
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Device service path
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub use_tls: bool,
    /// Skip TLS certificate validation
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// HTTP proxy URL
    #[serde(default)]
    pub proxy: Option<String>,
    /// Rewrite service addresses reported by the device to the configured
    /// hostname and port
    #[serde(default)]
    pub preserve_address: bool,
    /// Attach WS-Security UsernameToken headers when credentials are set
    #[serde(default = "default_use_wsse")]
    pub use_wsse: bool,
}

impl ClientConfig {
    /// Config for a device with every other setting at its default
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port: default_port(),
            path: default_path(),
            use_tls: false,
            accept_invalid_certs: false,
            username: None,
            password: None,
            timeout_ms: default_timeout_ms(),
            proxy: None,
            preserve_address: false,
            use_wsse: default_use_wsse(),
        }
    }

    /// Parse a config from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| OnvifError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load a config from a TOML file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            OnvifError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Talk to the device over HTTPS
    pub fn with_tls(mut self) -> Self {
        self.use_tls = true;
        self
    }

    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_preserve_address(mut self, preserve: bool) -> Self {
        self.preserve_address = preserve;
        self
    }

    /// Disable WS-Security headers; HTTP Digest still applies on 401
    pub fn without_wsse(mut self) -> Self {
        self.use_wsse = false;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Username and password, if both are configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.use_tls {
            "https"
        } else {
            "http"
        }
    }

    /// Default device service URL
    pub fn device_url(&self) -> Result<Url> {
        let host = if self.hostname.contains(':') && !self.hostname.starts_with('[') {
            format!("[{}]", self.hostname)
        } else {
            self.hostname.clone()
        };
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        let raw = format!("{}://{}:{}{}", self.scheme(), host, self.port, path);
        Url::parse(&raw).map_err(|e| from_url(e, &raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config = ClientConfig::from_toml_str(r#"hostname = "10.0.0.5""#).unwrap();
        assert_eq!(config, ClientConfig::new("10.0.0.5"));
        assert_eq!(config.port, 80);
        assert_eq!(config.path, "/onvif/device_service");
        assert_eq!(config.timeout(), Duration::from_secs(120));
        assert!(config.use_wsse);
        assert!(config.credentials().is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
hostname = "cam.local"
port = 8080
username = "admin"
password = "secret"
use_tls = true
timeout_ms = 5000
preserve_address = true
"#
        )
        .unwrap();

        let config = ClientConfig::load_from(file.path()).unwrap();
        assert_eq!(config.credentials(), Some(("admin", "secret")));
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert!(config.preserve_address);
        assert_eq!(
            config.device_url().unwrap().as_str(),
            "https://cam.local:8080/onvif/device_service"
        );
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        assert!(matches!(
            ClientConfig::from_toml_str("port = 80"),
            Err(OnvifError::Config(_))
        ));
        assert!(matches!(
            ClientConfig::load_from("/nonexistent/onvif.toml"),
            Err(OnvifError::Config(_))
        ));
        assert!(matches!(
            ClientConfig::new("bad host").device_url(),
            Err(OnvifError::Config(_))
        ));
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::new("::1")
            .with_port(8000)
            .with_path("onvif/device")
            .with_credentials("u", "p")
            .with_timeout(Duration::from_millis(250))
            .without_wsse();
        assert_eq!(config.device_url().unwrap().as_str(), "http://[::1]:8000/onvif/device");
        assert_eq!(config.timeout_ms, 250);
        assert!(!config.use_wsse);
        assert!(!config.use_tls);

        let config = ClientConfig::new("cam.local")
            .with_port(8443)
            .with_path("/onvif/device_service?channel=2")
            .with_tls()
            .accept_invalid_certs(true);
        assert!(config.accept_invalid_certs);
        assert_eq!(
            config.device_url().unwrap().as_str(),
            "https://cam.local:8443/onvif/device_service?channel=2"
        );
    }
}
