//! ONVIF WS-Discovery
//!
//! Finds ONVIF devices on the local network with a multicast `Probe` and turns
//! the `ProbeMatch` replies into [`DiscoveredDevice`] records, which can build
//! a connected [`onvif_client::OnvifClient`].
//!
//! # Example
//!
//! ```rust,no_run
//! use onvif_discovery::{Discovery, ProbeOptions, ProbeOutcome};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let discovery = Discovery::new();
//!     if let ProbeOutcome::Devices(devices) = discovery.probe(ProbeOptions::default()).await? {
//!         for device in devices {
//!             println!("{} {:?} {:?}", device.address, device.name, device.xaddrs);
//!             let client = device.into_client(Some(("admin", "secret"))).await?;
//!             println!("{} profiles", client.profiles().len());
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod probe;
pub mod types;

pub use error::{DiscoveryError, ProbeFailure, Result};
pub use probe::Discovery;
pub use types::{DiscoveredDevice, DiscoveryEvent, ProbeOptions, ProbeOutcome, DISCOVERY_ADDR};
