//! ONVIF Core Library
//!
//! Wire-level building blocks shared by the ONVIF client and discovery crates:
//!
//! - [`xml`]: XML text to a list-everywhere element tree
//! - [`normalize`]: element tree to native values (collapsed lists, merged
//!   attributes, boolean/number/date sniffing)
//! - [`soap`]: SOAP 1.2 envelope wrap/unwrap and fault detection
//! - [`error`]: the error taxonomy every ONVIF call reports
//!
//! # Example
//!
//! ```rust
//! use onvif_core::{soap, NormalizeOptions};
//!
//! let envelope = soap::wrap("<GetHostname/>", None);
//! let echoed = envelope.replace(
//!     "<GetHostname/>",
//!     "<GetHostnameResponse><HostnameInformation><Name>cam</Name></HostnameInformation></GetHostnameResponse>",
//! );
//!
//! let body = soap::unwrap(&echoed)?;
//! let value = body.normalize(&NormalizeOptions::default());
//! assert_eq!(
//!     value.path(&["getHostnameResponse", "hostnameInformation", "name"]).and_then(|v| v.as_str()),
//!     Some("cam")
//! );
//! # Ok::<(), onvif_core::OnvifError>(())
//! ```

pub mod error;
pub mod normalize;
pub mod soap;
pub mod xml;

pub use error::{OnvifError, Result, SoapFault};
pub use normalize::{normalize, NormalizeOptions, NormalizedValue};
pub use soap::{xml_escape, SoapBody};
pub use xml::XmlValue;
