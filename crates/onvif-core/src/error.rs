//! Error types shared by every ONVIF crate in the workspace

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Result type for ONVIF operations
pub type Result<T> = std::result::Result<T, OnvifError>;

/// Structured content of a SOAP `Fault` element
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SoapFault {
    /// `Code/Value`, e.g. `env:Sender`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// `Code/Subcode/Value`, e.g. `ter:NotAuthorized`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcode: Option<String>,
    /// Human-readable reason
    pub reason: String,
    /// Optional detail text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Errors that can occur while talking to an ONVIF device
#[derive(Debug, Error)]
pub enum OnvifError {
    /// Connection refused/reset, DNS failure
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Kind of the underlying I/O error, if one was found
        kind: Option<std::io::ErrorKind>,
        /// Raw OS error code, if one was found
        os_code: Option<i32>,
    },

    /// Request exceeded its deadline
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Malformed SOAP envelope or a SOAP Fault reported by the device
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        fault: Option<SoapFault>,
        /// Raw XML for diagnostics
        xml: Option<String>,
    },

    /// Malformed digest challenge, or the device rejected digest credentials
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Local misconfiguration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl OnvifError {
    /// Create a protocol error carrying the raw XML
    pub fn protocol(message: impl Into<String>, xml: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            fault: None,
            xml: Some(xml.into()),
        }
    }

    /// Create a protocol error from a SOAP fault
    pub fn fault(fault: SoapFault, xml: impl Into<String>) -> Self {
        let message = match &fault.detail {
            Some(detail) => format!("{}: {}", fault.reason, detail),
            None => fault.reason.clone(),
        };
        Self::Protocol {
            message,
            fault: Some(fault),
            xml: Some(xml.into()),
        }
    }

    /// Create a network error from any error, preserving the first
    /// `std::io::Error` found in its source chain
    pub fn network_from(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut kind = None;
        let mut os_code = None;
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
        while let Some(e) = current {
            if let Some(io) = e.downcast_ref::<std::io::Error>() {
                kind = Some(io.kind());
                os_code = io.raw_os_error();
                break;
            }
            current = e.source();
        }
        Self::Network {
            message: err.to_string(),
            kind,
            os_code,
        }
    }

    /// Raw XML attached to a protocol error
    pub fn xml(&self) -> Option<&str> {
        match self {
            Self::Protocol { xml, .. } => xml.as_deref(),
            _ => None,
        }
    }

    /// SOAP fault attached to a protocol error
    pub fn soap_fault(&self) -> Option<&SoapFault> {
        match self {
            Self::Protocol { fault, .. } => fault.as_ref(),
            _ => None,
        }
    }

    /// Whether the error text or attached XML contains `marker`, ignoring case
    pub fn mentions(&self, marker: &str) -> bool {
        let marker = marker.to_ascii_lowercase();
        if self.to_string().to_ascii_lowercase().contains(&marker) {
            return true;
        }
        self.xml()
            .map(|xml| xml.to_ascii_lowercase().contains(&marker))
            .unwrap_or(false)
    }
}

impl From<std::io::Error> for OnvifError {
    fn from(err: std::io::Error) -> Self {
        Self::Network {
            message: err.to_string(),
            kind: Some(err.kind()),
            os_code: err.raw_os_error(),
        }
    }
}
