//! Test utilities for onvif-client
//!
//! [`MockDevice`] is an in-process ONVIF device: an axum server on an
//! ephemeral loopback port that answers SOAP actions from a script. It can
//! enforce HTTP Digest or WS-Security, delay replies and records every request
//! it sees.
//!
//! ```ignore
//! use onvif_client::testing::MockDevice;
//!
//! let device = MockDevice::start().await?;
//! device.respond("GetHostname", "<tds:GetHostnameResponse>...</tds:GetHostnameResponse>");
//! let client = onvif_client::OnvifClient::new(device.config())?;
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpListener;

use onvif_core::soap;
use onvif_core::xml::{self, normalize_name};

use crate::auth::{expected_digest_response, parse_authorization};
use crate::config::ClientConfig;
use crate::error::Result;

const DIGEST_REALM: &str = "mock-onvif";
const DIGEST_NONCE: &str = "dcd98b7102dd2f0e8b11d0f600bfb0c093";

/// Scripted reply
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    /// Complete response document
    pub body: String,
}

/// Request seen by the mock device
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    /// Local name of the first body element, e.g. `getProfiles`
    pub action: String,
    pub body: String,
    pub authorization: Option<String>,
    pub has_wsse: bool,
}

#[derive(Default)]
struct MockState {
    responses: RwLock<HashMap<String, MockResponse>>,
    digest: RwLock<Option<(String, String)>>,
    require_wsse: RwLock<bool>,
    delay: RwLock<Option<Duration>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// In-process ONVIF device that shuts down when dropped
pub struct MockDevice {
    pub addr: SocketAddr,
    state: Arc<MockState>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl MockDevice {
    /// Start a mock device on `127.0.0.1` with an ephemeral port
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let state = Arc::new(MockState::default());
        let router = Router::new()
            .fallback(handle_soap)
            .with_state(state.clone());

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // Give server a moment to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        Ok(Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Absolute URL of a path on this device
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Client configuration pointing at this device with a 5 s timeout
    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(self.addr.ip().to_string())
            .with_port(self.addr.port())
            .with_timeout(Duration::from_secs(5))
    }

    /// Answer `action` with a SOAP envelope around `body`
    pub fn respond(&self, action: &str, body: &str) {
        self.respond_raw(action, 200, &soap::wrap(body, None));
    }

    /// Answer `action` with an arbitrary status and document
    pub fn respond_raw(&self, action: &str, status: u16, document: &str) {
        self.state.responses.write().insert(
            normalize_name(action),
            MockResponse {
                status,
                body: document.to_string(),
            },
        );
    }

    /// Answer `action` with a SOAP fault
    pub fn respond_fault(&self, action: &str, status: u16, subcode: &str, reason: &str) {
        self.respond_raw(action, status, &fault_envelope(subcode, reason));
    }

    /// Challenge every request without valid HTTP Digest credentials
    pub fn require_digest(&self, username: &str, password: &str) {
        *self.state.digest.write() = Some((username.to_string(), password.to_string()));
    }

    /// Answer requests without a WS-Security header with a NotAuthorized fault
    pub fn require_wsse(&self) {
        *self.state.require_wsse.write() = true;
    }

    /// Delay every reply
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.write() = Some(delay);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    /// Actions received so far, in order
    pub fn actions(&self) -> Vec<String> {
        self.state
            .requests
            .lock()
            .iter()
            .map(|r| r.action.clone())
            .collect()
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// SOAP 1.2 fault document
pub fn fault_envelope(subcode: &str, reason: &str) -> String {
    soap::wrap(
        &format!(
            concat!(
                "<s:Fault><s:Code><s:Value>s:Sender</s:Value>",
                "<s:Subcode><s:Value>{}</s:Value></s:Subcode></s:Code>",
                r#"<s:Reason><s:Text xml:lang="en">{}</s:Text></s:Reason></s:Fault>"#
            ),
            soap::xml_escape(subcode),
            soap::xml_escape(reason)
        ),
        None,
    )
}

fn body_action(body: &str) -> (String, bool) {
    let Ok(tree) = xml::parse(&xml::strip_namespace_declarations(body)) else {
        return (String::new(), false);
    };
    let envelope = tree.first("envelope");
    let has_wsse = envelope
        .and_then(|e| e.first("header"))
        .and_then(|h| h.first("security"))
        .is_some();
    let action = match envelope.and_then(|e| e.first("body")) {
        Some(xml::XmlValue::Map(entries)) => entries
            .first()
            .map(|(name, _)| name.clone())
            .unwrap_or_default(),
        _ => String::new(),
    };
    (action, has_wsse)
}

async fn handle_soap(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let (action, has_wsse) = body_action(&body);

    state.requests.lock().push(RecordedRequest {
        path: uri.path().to_string(),
        action: action.clone(),
        body,
        authorization: authorization.clone(),
        has_wsse,
    });

    let delay = *state.delay.read();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let digest = state.digest.read().clone();
    if let Some((username, password)) = digest {
        let valid = authorization
            .as_deref()
            .and_then(parse_authorization)
            .filter(|fields| fields.get("username") == Some(&username))
            .and_then(|fields| {
                let expected = expected_digest_response(&fields, &password, "POST")?;
                Some(fields.get("response") == Some(&expected))
            })
            .unwrap_or(false);
        if !valid {
            return (
                StatusCode::UNAUTHORIZED,
                [(
                    header::WWW_AUTHENTICATE,
                    format!(
                        r#"Digest realm="{}", qop="auth,auth-int", nonce="{}", opaque="5ccc069c403ebaf9f0171e9517f40e41""#,
                        DIGEST_REALM, DIGEST_NONCE
                    ),
                )],
                "Unauthorized",
            )
                .into_response();
        }
    }

    if *state.require_wsse.read() && !has_wsse {
        return soap_response(
            400,
            fault_envelope("ter:NotAuthorized", "Sender not Authorized"),
        );
    }

    let scripted = state.responses.read().get(&action).cloned();
    match scripted {
        Some(response) => soap_response(response.status, response.body),
        None => soap_response(
            500,
            fault_envelope("ter:ActionNotSupported", &format!("Unknown action {}", action)),
        ),
    }
}

fn soap_response(status: u16, body: String) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, "application/soap+xml; charset=utf-8")],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_action() {
        let (action, has_wsse) = body_action(&soap::wrap(
            r#"<tds:GetDeviceInformation xmlns:tds="http://www.onvif.org/ver10/device/wsdl"/>"#,
            Some("<wsse:Security/>"),
        ));
        assert_eq!(action, "getDeviceInformation");
        assert!(has_wsse);

        let (action, has_wsse) = body_action(&soap::wrap("<GetHostname/>", None));
        assert_eq!(action, "getHostname");
        assert!(!has_wsse);
    }

    #[test]
    fn test_fault_envelope_round_trips() {
        let err = soap::unwrap(&fault_envelope("ter:NotAuthorized", "Sender not Authorized"))
            .unwrap_err();
        assert!(err.mentions("sender not authorized"));
        assert_eq!(
            err.soap_fault().and_then(|f| f.subcode.as_deref()),
            Some("ter:NotAuthorized")
        );
    }
}
