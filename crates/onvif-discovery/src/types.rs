//! Discovery records and options

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Serialize;
use url::{Position, Url};

use onvif_client::{ClientConfig, OnvifClient, OnvifError};
use onvif_core::NormalizedValue;

use crate::error::ProbeFailure;

/// WS-Discovery multicast group
pub const DISCOVERY_ADDR: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::new(239, 255, 255, 250)), 3702);

const SCOPE_NAME: &str = "onvif://www.onvif.org/name/";
const SCOPE_HARDWARE: &str = "onvif://www.onvif.org/hardware/";

/// Options for [`Discovery::probe`](crate::Discovery::probe)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOptions {
    /// Collection window
    pub timeout: Duration,
    /// Interface name or local IPv4 address to send from
    pub interface: Option<String>,
    /// Return device records; raw `ProbeMatch` values otherwise
    pub resolve: bool,
    pub target: SocketAddr,
    /// `urn:uuid:` message id; generated when unset
    pub message_id: Option<String>,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            interface: None,
            resolve: true,
            target: DISCOVERY_ADDR,
            message_id: None,
        }
    }
}

impl ProbeOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = target;
        self
    }

    pub fn raw(mut self) -> Self {
        self.resolve = false;
        self
    }
}

/// Result of a probe without malformed replies
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Devices(Vec<DiscoveredDevice>),
    Matches(Vec<NormalizedValue>),
}

impl ProbeOutcome {
    pub fn len(&self) -> usize {
        match self {
            Self::Devices(devices) => devices.len(),
            Self::Matches(matches) => matches.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Notification raised while a probe is collecting replies
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    /// First reply from a new endpoint address
    Device(DiscoveredDevice),
    Error(ProbeFailure),
}

/// Device announced by a `ProbeMatch`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredDevice {
    /// Endpoint reference address, usually `urn:uuid:...`
    pub address: String,
    pub xaddrs: Vec<String>,
    pub types: Vec<String>,
    pub scopes: Vec<String>,
    pub name: Option<String>,
    pub hardware: Option<String>,
    /// Source of the UDP reply
    pub remote: SocketAddr,
    /// Normalized `ProbeMatch` element
    pub raw: NormalizedValue,
}

impl DiscoveredDevice {
    pub(crate) fn from_match(value: &NormalizedValue, remote: SocketAddr) -> Option<Self> {
        let address = value
            .path(&["endpointReference", "address"])
            .and_then(NormalizedValue::text)
            .filter(|a| !a.is_empty())?;
        let list = |key: &str| -> Vec<String> {
            value
                .get(key)
                .and_then(NormalizedValue::text)
                .map(|text| text.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default()
        };
        let scopes = list("scopes");

        Some(Self {
            address,
            xaddrs: list("xAddrs"),
            types: list("types"),
            name: scope_value(&scopes, SCOPE_NAME),
            hardware: scope_value(&scopes, SCOPE_HARDWARE),
            scopes,
            remote,
            raw: value.clone(),
        })
    }

    /// XAddr whose host is the reply's source IP, otherwise the first one
    pub fn preferred_xaddr(&self) -> Option<&str> {
        let remote = self.remote.ip().to_string();
        self.xaddrs
            .iter()
            .find(|xaddr| {
                Url::parse(xaddr)
                    .ok()
                    .and_then(|url| url.host_str().map(|h| h.trim_matches(|c| c == '[' || c == ']') == remote))
                    .unwrap_or(false)
            })
            .or_else(|| self.xaddrs.first())
            .map(String::as_str)
    }

    /// Client configuration for the preferred XAddr
    pub fn client_config(&self) -> onvif_client::Result<ClientConfig> {
        let xaddr = self.preferred_xaddr().ok_or_else(|| {
            OnvifError::Config(format!("device {} announced no XAddrs", self.address))
        })?;
        let url = Url::parse(xaddr)
            .map_err(|e| OnvifError::Config(format!("invalid XAddr {}: {}", xaddr, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| OnvifError::Config(format!("XAddr {} has no host", xaddr)))?;

        let mut config = ClientConfig::new(host)
            .with_port(url.port_or_known_default().unwrap_or(80))
            .with_path(&url[Position::BeforePath..Position::AfterQuery]);
        if url.scheme() == "https" {
            config = config.with_tls();
        }
        Ok(config)
    }

    /// Build a client for this device and run its connect sequence
    pub async fn into_client(
        &self,
        credentials: Option<(&str, &str)>,
    ) -> onvif_client::Result<OnvifClient> {
        let mut config = self.client_config()?;
        if let Some((username, password)) = credentials {
            config = config.with_credentials(username, password);
        }
        OnvifClient::connect_with(config).await
    }
}

/// Percent-decoded remainder of the first scope with `prefix`
fn scope_value(scopes: &[String], prefix: &str) -> Option<String> {
    scopes.iter().find_map(|scope| {
        let raw = scope.strip_prefix(prefix)?;
        Some(
            urlencoding::decode(raw)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| raw.to_string()),
        )
    })
}
