//! Discovery tests against a loopback responder
//!
//! The responder is a plain UDP socket on 127.0.0.1 that answers the first
//! datagram it receives with a scripted list of replies.

use std::net::SocketAddr;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use onvif_discovery::{
    Discovery, DiscoveryError, DiscoveryEvent, ProbeOptions, ProbeOutcome,
};

// =============================================================================
// Responder
// =============================================================================

fn probe_match(address: &str, xaddrs: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://www.w3.org/2003/05/soap-envelope" "#,
            r#"xmlns:wsa="http://schemas.xmlsoap.org/ws/2004/08/addressing" "#,
            r#"xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery">"#,
            "<SOAP-ENV:Header>",
            "<wsa:Action>http://schemas.xmlsoap.org/ws/2005/04/discovery/ProbeMatches</wsa:Action>",
            "</SOAP-ENV:Header>",
            "<SOAP-ENV:Body><d:ProbeMatches><d:ProbeMatch>",
            "<wsa:EndpointReference><wsa:Address>{}</wsa:Address></wsa:EndpointReference>",
            "<d:Types>dn:NetworkVideoTransmitter</d:Types>",
            "<d:Scopes>onvif://www.onvif.org/name/Lobby%20Camera onvif://www.onvif.org/hardware/DS-2CD</d:Scopes>",
            "<d:XAddrs>{}</d:XAddrs>",
            "<d:MetadataVersion>1</d:MetadataVersion>",
            "</d:ProbeMatch></d:ProbeMatches></SOAP-ENV:Body></SOAP-ENV:Envelope>"
        ),
        address, xaddrs
    )
}

/// Answer the first datagram with `replies`; returns the responder address
/// and the probe it received
async fn responder(replies: Vec<String>) -> (SocketAddr, tokio::task::JoinHandle<String>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut buf = vec![0u8; 65_535];
        let (len, from) = socket.recv_from(&mut buf).await.unwrap();
        for reply in replies {
            socket.send_to(reply.as_bytes(), from).await.unwrap();
        }
        String::from_utf8_lossy(&buf[..len]).into_owned()
    });
    (addr, handle)
}

fn options(target: SocketAddr) -> ProbeOptions {
    ProbeOptions::default()
        .with_timeout(Duration::from_millis(500))
        .with_target(target)
}

fn drain(rx: &mut broadcast::Receiver<DiscoveryEvent>) -> Vec<DiscoveryEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// =============================================================================
// Probe
// =============================================================================

#[tokio::test]
async fn test_duplicate_replies_announce_one_device() -> anyhow::Result<()> {
    let (addr, handle) = responder(vec![
        probe_match("urn:uuid:cam-1", "http://127.0.0.1:8080/onvif/device_service"),
        probe_match(
            "urn:uuid:cam-1",
            "http://10.1.1.1/onvif/device_service http://10.1.1.2/onvif/device_service",
        ),
    ])
    .await;

    let discovery = Discovery::new();
    let mut rx = discovery.subscribe();
    let outcome = discovery.probe(options(addr)).await?;

    let ProbeOutcome::Devices(devices) = outcome else {
        panic!("expected device records");
    };
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].address, "urn:uuid:cam-1");
    assert_eq!(
        devices[0].xaddrs,
        vec!["http://127.0.0.1:8080/onvif/device_service"]
    );
    assert_eq!(devices[0].name.as_deref(), Some("Lobby Camera"));
    assert_eq!(devices[0].hardware.as_deref(), Some("DS-2CD"));
    assert_eq!(devices[0].remote, addr);

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], DiscoveryEvent::Device(d) if d.address == "urn:uuid:cam-1"));

    let probe = handle.await?;
    assert!(probe.contains("http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe"));
    assert!(probe.contains("<a:MessageID>urn:uuid:"));
    Ok(())
}

#[tokio::test]
async fn test_garbage_datagram_is_reported() {
    let (addr, _handle) = responder(vec![
        probe_match("urn:uuid:cam-2", "http://127.0.0.1/onvif/device_service"),
        "this is not a SOAP message".to_string(),
    ])
    .await;

    let discovery = Discovery::new();
    let mut rx = discovery.subscribe();
    let err = discovery.probe(options(addr)).await.unwrap_err();

    match err {
        DiscoveryError::Probe { errors, devices } => {
            assert_eq!(devices, 1);
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].payload, "this is not a SOAP message");
            assert_eq!(errors[0].from, addr);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], DiscoveryEvent::Device(d) if d.address == "urn:uuid:cam-2"));
    match &events[1] {
        DiscoveryEvent::Error(failure) => {
            assert_eq!(failure.payload, "this is not a SOAP message")
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_raw_matches_and_message_id() -> anyhow::Result<()> {
    let (addr, handle) = responder(vec![probe_match(
        "urn:uuid:cam-3",
        "http://127.0.0.1/onvif/device_service",
    )])
    .await;

    let discovery = Discovery::new();
    let outcome = discovery
        .probe(ProbeOptions {
            message_id: Some("urn:uuid:11111111-2222-3333-4444-555555555555".to_string()),
            ..options(addr).raw()
        })
        .await?;

    let ProbeOutcome::Matches(matches) = outcome else {
        panic!("expected raw matches");
    };
    assert_eq!(matches.len(), 1);
    assert_eq!(
        matches[0]
            .path(&["endpointReference", "address"])
            .and_then(|v| v.as_str()),
        Some("urn:uuid:cam-3")
    );
    assert_eq!(
        matches[0].get("metadataVersion").and_then(|v| v.as_f64()),
        Some(1.0)
    );

    let probe = handle.await?;
    assert!(probe.contains("urn:uuid:11111111-2222-3333-4444-555555555555"));
    Ok(())
}

#[tokio::test]
async fn test_no_replies_is_empty_success() -> anyhow::Result<()> {
    let (addr, _handle) = responder(Vec::new()).await;

    let outcome = Discovery::new()
        .probe(options(addr).with_timeout(Duration::from_millis(200)))
        .await?;
    assert!(outcome.is_empty());
    Ok(())
}
