//! ONVIF Client Library
//!
//! Async client for ONVIF network cameras and recorders: a SOAP request
//! pipeline with WS-Security and HTTP Digest authentication, device clock
//! compensation, and facades for the Device, Media/Media2, PTZ, Imaging and
//! Event services.
//!
//! # Example
//!
//! ```rust,no_run
//! use onvif_client::{ClientConfig, OnvifClient, StreamUriOptions};
//! use onvif_client::types::FlatVector;
//! use onvif_client::services::ContinuousMoveOptions;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::new("192.168.1.64").with_credentials("admin", "secret");
//!     let client = OnvifClient::connect_with(config).await?;
//!
//!     // Stream URI of the default profile
//!     let uri = client.get_stream_uri(StreamUriOptions::default()).await?;
//!     println!("{}", uri.uri);
//!
//!     // Zoom in slowly
//!     client
//!         .continuous_move(ContinuousMoveOptions::new(FlatVector::default().zoom(0.2)))
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Raw requests
//!
//! Any operation without a facade can go through [`OnvifClient::request`]:
//!
//! ```rust,ignore
//! use onvif_client::{RequestOptions, ServiceKind};
//! use onvif_core::NormalizeOptions;
//!
//! let response = client
//!     .request(RequestOptions::new("<tds:GetNetworkInterfaces/>").service(ServiceKind::Device))
//!     .await?;
//! let value = response.normalize(&NormalizeOptions::with_arrays(["networkInterfaces"]));
//! ```
//!
//! # Testing
//!
//! The `testing` module provides an in-process mock device:
//!
//! ```rust,ignore
//! use onvif_client::testing::MockDevice;
//!
//! let device = MockDevice::start().await?;
//! device.respond("GetHostname", "<tds:GetHostnameResponse>...</tds:GetHostnameResponse>");
//! let client = OnvifClient::new(device.config())?;
//! ```

pub mod auth;
mod client;
pub mod config;
mod error;
pub mod events;
pub mod services;
pub mod testing;
pub mod transport;
pub mod types;

pub use client::OnvifClient;
pub use config::ClientConfig;
pub use error::{OnvifError, Result, SoapFault};
pub use events::TransportEvent;
pub use transport::{RequestOptions, SoapResponse, Transport};
pub use types::{ServiceKind, StreamUriOptions};

// Re-export core types for convenience
pub use onvif_core::{NormalizeOptions, NormalizedValue};
