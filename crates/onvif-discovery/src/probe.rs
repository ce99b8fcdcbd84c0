//! WS-Discovery probe
//!
//! A probe sends one `Probe` datagram and then listens on the same socket for
//! `ProbeMatches` replies until the timeout. Replies are deduplicated by
//! endpoint reference address; the first reply for an address wins.

use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use onvif_core::soap::{self, NS_DISCOVERY};
use onvif_core::{NormalizeOptions, NormalizedValue};

use crate::error::{DiscoveryError, ProbeFailure, Result};
use crate::types::{DiscoveredDevice, DiscoveryEvent, ProbeOptions, ProbeOutcome};

const CHANNEL_CAPACITY: usize = 64;
const MAX_DATAGRAM: usize = 65_535;

const ACTION_PROBE: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe";
const TO_DISCOVERY: &str = "urn:schemas-xmlsoap-org:ws:2005:04:discovery";
const ROLE_ANONYMOUS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";
const NS_NETWORK: &str = "http://www.onvif.org/ver10/network/wsdl";

/// WS-Discovery client.
///
/// Each [`probe`](Self::probe) uses its own socket, so probes may run
/// concurrently; only the event stream is shared.
#[derive(Debug, Clone)]
pub struct Discovery {
    events: broadcast::Sender<DiscoveryEvent>,
}

impl Default for Discovery {
    fn default() -> Self {
        Self::new()
    }
}

impl Discovery {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { events }
    }

    /// Device and error notifications from every probe on this instance
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    /// Probe for devices and collect replies until `options.timeout`.
    ///
    /// Fails with [`DiscoveryError::Probe`] if any reply was malformed, after
    /// the valid devices have been announced on the event stream.
    #[instrument(skip(self), fields(target = %options.target))]
    pub async fn probe(&self, options: ProbeOptions) -> Result<ProbeOutcome> {
        let socket = bind_socket(options.interface.as_deref(), options.target)?;
        let message_id = options
            .message_id
            .clone()
            .unwrap_or_else(|| format!("urn:uuid:{}", Uuid::new_v4()));

        socket
            .send_to(probe_message(&message_id).as_bytes(), options.target)
            .await?;
        debug!(%message_id, "Probe sent");

        let deadline = tokio::time::Instant::now() + options.timeout;
        let mut collection = Collection::default();
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Err(_) => break,
                Ok(Ok((len, from))) => self.handle_datagram(&buf[..len], from, &mut collection),
                Ok(Err(e)) => self.receive_failed(&e, options.target, &mut collection),
            }
        }
        drop(socket);

        debug!(
            devices = collection.devices.len(),
            errors = collection.errors.len(),
            "Probe finished"
        );
        if !collection.errors.is_empty() {
            return Err(DiscoveryError::Probe {
                devices: collection.devices.len(),
                errors: collection.errors,
            });
        }
        Ok(if options.resolve {
            ProbeOutcome::Devices(collection.devices)
        } else {
            ProbeOutcome::Matches(collection.matches)
        })
    }

    fn handle_datagram(&self, data: &[u8], from: SocketAddr, collection: &mut Collection) {
        let payload = String::from_utf8_lossy(data).into_owned();
        let matches = match parse_probe_matches(&payload) {
            Ok(matches) => matches,
            Err(message) => {
                self.fail(collection, message, payload, from);
                return;
            }
        };

        for probe_match in matches {
            let Some(device) = DiscoveredDevice::from_match(&probe_match, from) else {
                self.fail(
                    collection,
                    "ProbeMatch without an EndpointReference address".to_string(),
                    payload.clone(),
                    from,
                );
                continue;
            };
            if !collection.seen.insert(device.address.clone()) {
                debug!(address = %device.address, %from, "Ignoring repeated reply");
                continue;
            }

            debug!(address = %device.address, xaddrs = ?device.xaddrs, "Device discovered");
            let _ = self.events.send(DiscoveryEvent::Device(device.clone()));
            collection.devices.push(device);
            collection.matches.push(probe_match);
        }
    }

    /// Record a failed receive, e.g. a connection reset after an ICMP
    /// unreachable, without ending the probe
    fn receive_failed(&self, error: &io::Error, target: SocketAddr, collection: &mut Collection) {
        self.fail(collection, format!("receive failed: {}", error), String::new(), target);
    }

    fn fail(&self, collection: &mut Collection, message: String, payload: String, from: SocketAddr) {
        warn!(%from, error = %message, "Malformed discovery reply");
        let failure = ProbeFailure {
            message,
            payload,
            from,
        };
        let _ = self.events.send(DiscoveryEvent::Error(failure.clone()));
        collection.errors.push(failure);
    }
}

#[derive(Default)]
struct Collection {
    seen: HashSet<String>,
    devices: Vec<DiscoveredDevice>,
    matches: Vec<NormalizedValue>,
    errors: Vec<ProbeFailure>,
}

/// `ProbeMatch` entries of a reply
fn parse_probe_matches(payload: &str) -> std::result::Result<Vec<NormalizedValue>, String> {
    let body = soap::unwrap(payload).map_err(|e| e.to_string())?;
    let value = body.normalize(&NormalizeOptions::with_arrays(["probeMatch"]));
    let probe_matches = value
        .get("probeMatches")
        .ok_or_else(|| "reply has no ProbeMatches".to_string())?;
    Ok(probe_matches
        .get("probeMatch")
        .map(|list| list.items().to_vec())
        .unwrap_or_default())
}

fn probe_message(message_id: &str) -> String {
    let header = format!(
        concat!(
            r#"<a:Action s:mustUnderstand="1">{}</a:Action>"#,
            "<a:MessageID>{}</a:MessageID>",
            "<a:ReplyTo><a:Address>{}</a:Address></a:ReplyTo>",
            r#"<a:To s:mustUnderstand="1">{}</a:To>"#
        ),
        ACTION_PROBE,
        soap::xml_escape(message_id),
        ROLE_ANONYMOUS,
        TO_DISCOVERY
    );
    let body = format!(
        r#"<Probe xmlns="{}"><Types xmlns:dn="{}">dn:NetworkVideoTransmitter</Types><Scopes/></Probe>"#,
        NS_DISCOVERY, NS_NETWORK
    );
    soap::wrap(&body, Some(&header))
}

/// UDP socket on an ephemeral port, optionally tied to a local interface.
///
/// `interface` is either a local IP address or an interface name. A name is
/// resolved to the interface's IPv4 address; a name that does not exist or
/// has no IPv4 address falls back to the default route.
fn bind_socket(interface: Option<&str>, target: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(target), Type::DGRAM, Some(Protocol::UDP))?;
    let unspecified = match target {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    };

    let requested = interface.and_then(|name| match name.parse::<IpAddr>() {
        Ok(ip) => Some(ip),
        Err(_) => {
            let ip = interface_ipv4(name);
            if ip.is_none() {
                warn!(
                    interface = name,
                    "Interface not found or has no IPv4 address, using default route"
                );
            }
            ip.map(IpAddr::V4)
        }
    });

    let mut local = unspecified;
    if let Some(ip) = requested {
        local = SocketAddr::new(ip, 0);
        if let (IpAddr::V4(ip), true) = (ip, target.ip().is_multicast()) {
            if let Err(e) = socket.set_multicast_if_v4(&ip) {
                warn!(%ip, error = %e, "Cannot send multicast from address, using default route");
            }
        }
    }

    if let Err(e) = socket.bind(&SockAddr::from(local)) {
        if local == unspecified {
            return Err(e);
        }
        warn!(%local, error = %e, "Cannot bind local address, using default route");
        socket.bind(&SockAddr::from(unspecified))?;
    }
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

/// IPv4 address of the named interface, preferring non-loopback addresses
#[cfg(unix)]
fn interface_ipv4(name: &str) -> Option<Ipv4Addr> {
    let mut list: *mut libc::ifaddrs = std::ptr::null_mut();
    // SAFETY: on success the list stays valid until freeifaddrs below
    if unsafe { libc::getifaddrs(&mut list) } != 0 {
        let e = io::Error::last_os_error();
        warn!(error = %e, "Cannot list network interfaces");
        return None;
    }

    let mut addresses = Vec::new();
    let mut cursor = list;
    while !cursor.is_null() {
        // SAFETY: non-null entries of the getifaddrs list
        let entry = unsafe { &*cursor };
        cursor = entry.ifa_next;
        if entry.ifa_name.is_null() || entry.ifa_addr.is_null() {
            continue;
        }
        let entry_name = unsafe { std::ffi::CStr::from_ptr(entry.ifa_name) };
        if entry_name.to_bytes() != name.as_bytes() {
            continue;
        }
        if i32::from(unsafe { (*entry.ifa_addr).sa_family }) != libc::AF_INET {
            continue;
        }
        // SAFETY: AF_INET entries hold a sockaddr_in
        let sin = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in) };
        addresses.push(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)));
    }
    unsafe { libc::freeifaddrs(list) };

    addresses
        .iter()
        .find(|ip| !ip.is_loopback())
        .or_else(|| addresses.first())
        .copied()
}

#[cfg(not(unix))]
fn interface_ipv4(name: &str) -> Option<Ipv4Addr> {
    debug!(interface = name, "Interface names are not resolved on this platform");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DISCOVERY_ADDR;

    #[test]
    fn test_probe_message() {
        let message = probe_message("urn:uuid:0d3a9c1e-1111-2222-3333-444455556666");
        assert!(message.contains("<a:MessageID>urn:uuid:0d3a9c1e-1111-2222-3333-444455556666</a:MessageID>"));
        assert!(message.contains(ACTION_PROBE));
        assert!(message.contains("dn:NetworkVideoTransmitter"));

        // The probe is itself a well-formed envelope
        let body = soap::unwrap(&message).unwrap();
        let value = body.normalize(&NormalizeOptions::default());
        assert!(value.get("probe").is_some());
    }

    #[test]
    fn test_parse_probe_matches() {
        let reply = soap::wrap(
            concat!(
                r#"<d:ProbeMatches xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery">"#,
                "<d:ProbeMatch><a:EndpointReference><a:Address>urn:uuid:a</a:Address></a:EndpointReference>",
                "<d:XAddrs>http://10.0.0.2/onvif/device_service</d:XAddrs></d:ProbeMatch>",
                "</d:ProbeMatches>"
            ),
            None,
        );
        let matches = parse_probe_matches(&reply).unwrap();
        assert_eq!(matches.len(), 1);

        assert!(parse_probe_matches("not xml at all").is_err());
        assert_eq!(
            parse_probe_matches(&soap::wrap("<Hello/>", None)).unwrap_err(),
            "reply has no ProbeMatches"
        );
    }

    #[test]
    fn test_receive_error_keeps_collected_devices() {
        let discovery = Discovery::new();
        let mut rx = discovery.subscribe();
        let mut collection = Collection::default();
        let from: SocketAddr = "10.0.0.2:3702".parse().unwrap();
        let reply = soap::wrap(
            concat!(
                r#"<d:ProbeMatches xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery">"#,
                "<d:ProbeMatch><a:EndpointReference><a:Address>urn:uuid:a</a:Address></a:EndpointReference>",
                "<d:XAddrs>http://10.0.0.2/onvif/device_service</d:XAddrs></d:ProbeMatch>",
                "</d:ProbeMatches>"
            ),
            None,
        );

        discovery.handle_datagram(reply.as_bytes(), from, &mut collection);
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        discovery.receive_failed(&reset, DISCOVERY_ADDR, &mut collection);

        assert_eq!(collection.devices.len(), 1);
        assert_eq!(collection.errors.len(), 1);
        assert!(collection.errors[0].message.starts_with("receive failed"));
        assert_eq!(collection.errors[0].from, DISCOVERY_ADDR);
        assert!(collection.errors[0].payload.is_empty());

        assert!(matches!(rx.try_recv(), Ok(DiscoveryEvent::Device(_))));
        assert!(matches!(rx.try_recv(), Ok(DiscoveryEvent::Error(_))));
    }

    #[tokio::test]
    async fn test_bind_to_unknown_interface_falls_back() {
        assert_eq!(interface_ipv4("no-such-interface0"), None);

        let target: SocketAddr = "127.0.0.1:3702".parse().unwrap();
        let socket = bind_socket(Some("no-such-interface0"), target).unwrap();
        let local = socket.local_addr().unwrap();
        assert_eq!(local.ip(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert!(local.port() != 0);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_bind_to_interface_name() {
        assert_eq!(interface_ipv4("lo"), Some(Ipv4Addr::LOCALHOST));

        let target: SocketAddr = "127.0.0.1:3702".parse().unwrap();
        let socket = bind_socket(Some("lo"), target).unwrap();
        assert_eq!(
            socket.local_addr().unwrap().ip(),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
    }

    #[tokio::test]
    async fn test_bind_to_local_address() {
        let target: SocketAddr = "127.0.0.1:3702".parse().unwrap();
        let socket = bind_socket(Some("127.0.0.1"), target).unwrap();
        assert_eq!(
            socket.local_addr().unwrap().ip(),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
    }
}
