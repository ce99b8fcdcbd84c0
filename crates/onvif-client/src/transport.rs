//! Request pipeline
//!
//! Wraps a body fragment in a SOAP envelope, posts it to the resolved service
//! URL, upgrades to HTTP Digest once on a 401 challenge and unwraps the reply.
//! One wall-clock timeout covers the whole exchange including the retry.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Client, StatusCode};
use tokio::sync::broadcast;
use tracing::{debug, instrument, trace};
use url::{Position, Url};

use onvif_core::soap::{self, SoapBody};

use crate::auth::{DigestChallenge, DigestEngine, UsernameToken};
use crate::config::ClientConfig;
use crate::error::{from_reqwest, from_url, OnvifError, Result};
use crate::events::{EventBus, TransportEvent};
use crate::types::ServiceKind;

const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

/// Parsed SOAP response: body elements plus the response text
pub type SoapResponse = SoapBody;

/// One SOAP call
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Service whose address the request goes to
    pub service: Option<ServiceKind>,
    /// Absolute URL, taking precedence over `service`
    pub url: Option<Url>,
    /// Body fragment placed verbatim inside `s:Body`
    pub body: String,
    /// Extra HTTP headers
    pub headers: Vec<(String, String)>,
    /// Send without a WS-Security header
    pub skip_security: bool,
}

impl RequestOptions {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn service(mut self, service: ServiceKind) -> Self {
        self.service = Some(service);
        self
    }

    pub fn url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn skip_security(mut self) -> Self {
        self.skip_security = true;
        self
    }
}

/// HTTP transport for one device
#[derive(Debug)]
pub struct Transport {
    http: Client,
    config: RwLock<ClientConfig>,
    services: RwLock<HashMap<ServiceKind, Url>>,
    time_shift: OnceLock<i64>,
    digest: DigestEngine,
    events: EventBus,
}

impl Transport {
    pub fn new(config: ClientConfig) -> Result<Self> {
        // Validate the device URL up front
        config.device_url()?;

        let mut builder = Client::builder().danger_accept_invalid_certs(config.accept_invalid_certs);
        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| OnvifError::Config(format!("invalid proxy '{}': {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| OnvifError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config: RwLock::new(config),
            services: RwLock::new(HashMap::new()),
            time_shift: OnceLock::new(),
            digest: DigestEngine::new(),
            events: EventBus::new(),
        })
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> ClientConfig {
        self.config.read().clone()
    }

    /// Change the device hostname; service addresses already resolved are kept
    pub fn set_hostname(&self, hostname: impl Into<String>) {
        self.config.write().hostname = hostname.into();
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.config.write().timeout_ms = timeout.as_millis() as u64;
    }

    pub fn timeout(&self) -> Duration {
        self.config.read().timeout()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    // =========================================================================
    // Device clock
    // =========================================================================

    /// Device clock minus local clock, in milliseconds
    pub fn time_shift(&self) -> Option<i64> {
        self.time_shift.get().copied()
    }

    /// Record the time shift; only the first call has an effect
    pub fn set_time_shift(&self, shift_ms: i64) -> bool {
        self.time_shift.set(shift_ms).is_ok()
    }

    /// Current time on the device clock, or local time if unknown
    pub fn device_now(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.time_shift() {
            Some(shift) => now + chrono::Duration::milliseconds(shift),
            None => now,
        }
    }

    // =========================================================================
    // Service address table
    // =========================================================================

    /// Register a service address, applying `preserve_address` if enabled
    pub fn set_service(&self, kind: ServiceKind, url: Url) {
        let url = self.preserve(url);
        debug!(service = ?kind, %url, "Registered service");
        self.services.write().insert(kind, url);
    }

    pub fn service_url(&self, kind: ServiceKind) -> Option<Url> {
        self.services.read().get(&kind).cloned()
    }

    pub fn services(&self) -> HashMap<ServiceKind, Url> {
        self.services.read().clone()
    }

    fn preserve(&self, mut url: Url) -> Url {
        let config = self.config.read();
        if !config.preserve_address {
            return url;
        }
        let host = config.hostname.trim_start_matches('[').trim_end_matches(']');
        if url.set_host(Some(host)).is_err() || url.set_port(Some(config.port)).is_err() {
            self.events
                .warn(format!("could not rewrite service address {}", url));
        }
        url
    }

    /// Resolve the target URL: explicit URL, then service table, then the
    /// configured device path
    pub fn resolve_url(&self, options: &RequestOptions) -> Result<Url> {
        if let Some(url) = &options.url {
            return Ok(url.clone());
        }
        if let Some(url) = options.service.and_then(|kind| self.service_url(kind)) {
            return Ok(url);
        }
        self.config.read().device_url()
    }

    // =========================================================================
    // Request pipeline
    // =========================================================================

    /// Send one SOAP request
    #[instrument(skip(self, options), fields(service = ?options.service))]
    pub async fn request(&self, options: RequestOptions) -> Result<SoapResponse> {
        let url = self.resolve_url(&options)?;
        let (credentials, use_wsse) = {
            let config = self.config.read();
            let credentials = config
                .credentials()
                .map(|(user, pass)| (user.to_string(), pass.to_string()));
            (credentials, config.use_wsse)
        };

        let security = match (&credentials, use_wsse && !options.skip_security) {
            (Some((user, pass)), true) => {
                Some(UsernameToken::generate(user, pass, self.device_now()).to_header())
            }
            _ => None,
        };
        let envelope = soap::wrap(&options.body, security.as_deref());
        let headers = build_headers(&options.headers)?;

        let timeout = self.timeout();
        let exchange = self.exchange(&url, envelope, headers, credentials.as_ref());
        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                debug!(%url, ?timeout, "Request timed out");
                Err(OnvifError::Timeout(timeout))
            }
        }
    }

    async fn exchange(
        &self,
        url: &Url,
        envelope: String,
        headers: HeaderMap,
        credentials: Option<&(String, String)>,
    ) -> Result<SoapResponse> {
        debug!(%url, "Sending SOAP request");
        trace!(body = %envelope, "SOAP request");
        self.events.publish(TransportEvent::Request {
            url: url.to_string(),
            body: envelope.clone(),
        });

        let mut response = self.post(url, &envelope, &headers, None).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            match (challenge, credentials) {
                (Some(challenge), Some((user, pass))) => {
                    let challenge = DigestChallenge::parse(&challenge)?;
                    // Unread body is discarded with the response
                    drop(response);

                    let uri = &url[Position::BeforePath..];
                    let authorization = self.digest.authorize(&challenge, user, pass, "POST", uri);
                    debug!(%url, realm = %challenge.realm, "Retrying with HTTP digest");

                    response = self.post(url, &envelope, &headers, Some(authorization)).await?;
                    if response.status() == StatusCode::UNAUTHORIZED {
                        return Err(OnvifError::Auth(format!(
                            "device rejected digest credentials for {}",
                            url
                        )));
                    }
                }
                // No challenge: the body may carry a NotAuthorized fault
                (None, _) => {}
                (Some(_), None) => {
                    return Err(OnvifError::Auth(format!(
                        "HTTP 401 from {} and no credentials configured",
                        url
                    )))
                }
            }
        }

        let status = response.status();
        let timeout = self.timeout();
        let body = response
            .text()
            .await
            .map_err(|e| from_reqwest(e, timeout))?;

        debug!(%url, status = status.as_u16(), len = body.len(), "Received SOAP response");
        trace!(body = %body, "SOAP response");
        self.events.publish(TransportEvent::Response {
            url: url.to_string(),
            status: status.as_u16(),
            body: body.clone(),
        });

        let parsed = soap::unwrap(&body)?;
        if !status.is_success() {
            return Err(OnvifError::protocol(
                format!("HTTP {} from {}", status, url),
                parsed.xml,
            ));
        }
        Ok(parsed)
    }

    async fn post(
        &self,
        url: &Url,
        envelope: &str,
        headers: &HeaderMap,
        authorization: Option<String>,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .http
            .post(url.clone())
            .headers(headers.clone())
            .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .body(envelope.to_string());
        if let Some(authorization) = authorization {
            request = request.header(reqwest::header::AUTHORIZATION, authorization);
        }
        request
            .send()
            .await
            .map_err(|e| from_reqwest(e, self.timeout()))
    }
}

fn build_headers(extra: &[(String, String)]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in extra {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| OnvifError::Config(format!("invalid header name '{}': {}", name, e)))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| OnvifError::Config(format!("invalid header value for '{}': {}", name, e)))?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

/// Parse a service address reported by the device
pub(crate) fn parse_service_url(raw: &str) -> Result<Url> {
    Url::parse(raw.trim()).map_err(|e| from_url(e, raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(config: ClientConfig) -> Transport {
        Transport::new(config).unwrap()
    }

    #[test]
    fn test_resolve_url_precedence() {
        let transport = transport(ClientConfig::new("10.0.0.2"));
        let options = RequestOptions::new("<x/>").service(ServiceKind::Ptz);
        assert_eq!(
            transport.resolve_url(&options).unwrap().as_str(),
            "http://10.0.0.2/onvif/device_service"
        );

        transport.set_service(
            ServiceKind::Ptz,
            Url::parse("http://10.0.0.2/onvif/ptz").unwrap(),
        );
        assert_eq!(
            transport.resolve_url(&options).unwrap().as_str(),
            "http://10.0.0.2/onvif/ptz"
        );

        let explicit = options.url(Url::parse("http://10.0.0.2/pull/1").unwrap());
        assert_eq!(
            transport.resolve_url(&explicit).unwrap().as_str(),
            "http://10.0.0.2/pull/1"
        );
    }

    #[test]
    fn test_preserve_address_rewrites_host_and_port() {
        let transport = transport(
            ClientConfig::new("203.0.113.7")
                .with_port(8081)
                .with_preserve_address(true),
        );
        transport.set_service(
            ServiceKind::Media,
            Url::parse("http://192.168.0.10/onvif/media").unwrap(),
        );
        assert_eq!(
            transport.service_url(ServiceKind::Media).unwrap().as_str(),
            "http://203.0.113.7:8081/onvif/media"
        );
    }

    #[test]
    fn test_time_shift_is_write_once() {
        let transport = transport(ClientConfig::new("cam"));
        assert_eq!(transport.time_shift(), None);
        assert!(transport.set_time_shift(3_600_000));
        assert!(!transport.set_time_shift(-5));
        assert_eq!(transport.time_shift(), Some(3_600_000));

        let drift = transport.device_now() - Utc::now();
        assert!((drift.num_milliseconds() - 3_600_000).abs() < 1_000);
    }

    #[test]
    fn test_invalid_header_is_config_error() {
        assert!(matches!(
            build_headers(&[("bad header".into(), "v".into())]),
            Err(OnvifError::Config(_))
        ));
    }

    #[test]
    fn test_mutable_settings() {
        let transport = transport(ClientConfig::new("old"));
        transport.set_hostname("new");
        transport.set_timeout(Duration::from_millis(1500));
        assert_eq!(transport.config().hostname, "new");
        assert_eq!(transport.timeout(), Duration::from_millis(1500));
    }
}
