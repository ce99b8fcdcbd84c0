//! Error conversions for ONVIF client operations
//!
//! The error type itself lives in `onvif-core` so discovery and the client
//! agree on one taxonomy. This module maps transport-library errors into it.

use std::time::Duration;

pub use onvif_core::error::{OnvifError, Result, SoapFault};

/// Map a reqwest failure onto the ONVIF taxonomy
pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> OnvifError {
    if err.is_timeout() {
        return OnvifError::Timeout(timeout);
    }
    if err.is_builder() {
        return OnvifError::Config(err.to_string());
    }
    OnvifError::network_from(&err)
}

/// Map a URL parse failure onto a configuration error
pub(crate) fn from_url(err: url::ParseError, input: &str) -> OnvifError {
    OnvifError::Config(format!("invalid URL '{}': {}", input, err))
}
