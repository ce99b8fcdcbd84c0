//! ONVIF device client
//!
//! [`OnvifClient`] owns a [`Transport`] plus the device state learned while
//! connecting: media profiles, video sources, the sources actually streamed
//! by a profile and the PTZ preset table. Facade operations live in
//! [`crate::services`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};
use url::Url;

use onvif_core::xml::normalize_name;
use onvif_core::{NormalizeOptions, NormalizedValue};

use crate::config::ClientConfig;
use crate::error::{OnvifError, Result};
use crate::events::TransportEvent;
use crate::transport::{RequestOptions, SoapResponse, Transport};
use crate::types::*;

/// Device state cached by connect and the facades
#[derive(Debug, Default)]
pub(crate) struct DeviceState {
    pub(crate) profiles: Vec<Profile>,
    pub(crate) default_profile: Option<Profile>,
    pub(crate) video_sources: Vec<VideoSource>,
    pub(crate) active_sources: Vec<ActiveSource>,
    /// Preset name to token
    pub(crate) presets: HashMap<String, String>,
    pub(crate) media2_support: bool,
    pub(crate) device_information: Option<DeviceInformation>,
}

/// ONVIF device client
///
/// Cheap to clone; clones share the transport and cached state.
#[derive(Debug, Clone)]
pub struct OnvifClient {
    pub(crate) transport: Arc<Transport>,
    pub(crate) state: Arc<RwLock<DeviceState>>,
}

impl OnvifClient {
    /// Create a client without contacting the device
    pub fn new(config: ClientConfig) -> Result<Self> {
        Ok(Self {
            transport: Arc::new(Transport::new(config)?),
            state: Arc::new(RwLock::new(DeviceState::default())),
        })
    }

    /// Create a client and run the connect sequence
    pub async fn connect_with(config: ClientConfig) -> Result<Self> {
        let client = Self::new(config)?;
        client.connect().await?;
        Ok(client)
    }

    /// Connect sequence: device clock, service table, then profiles and video
    /// sources in parallel, then active sources.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<()> {
        self.get_system_date_and_time().await?;

        if let Err(e) = self.get_services(true).await {
            warn!(error = %e, "GetServices failed, falling back to GetCapabilities");
            self.transport
                .events()
                .warn(format!("GetServices failed, using GetCapabilities: {}", e));
            self.get_capabilities().await?;
        }

        let (profiles, sources) = tokio::try_join!(self.get_profiles(), self.get_video_sources())?;
        let (active, default_profile) = match_active_sources(&profiles, &sources)?;
        debug!(
            profiles = profiles.len(),
            sources = sources.len(),
            active = active.len(),
            "Connected"
        );

        let mut state = self.state.write();
        state.active_sources = active;
        state.default_profile = default_profile;
        Ok(())
    }

    /// Send a raw SOAP request through the pipeline
    pub async fn request(&self, options: RequestOptions) -> Result<SoapResponse> {
        self.transport.request(options).await
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Raw request/response/warning notifications
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.transport.subscribe()
    }

    pub fn set_hostname(&self, hostname: impl Into<String>) {
        self.transport.set_hostname(hostname);
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.transport.set_timeout(timeout);
    }

    // =========================================================================
    // Cached state
    // =========================================================================

    pub fn profiles(&self) -> Vec<Profile> {
        self.state.read().profiles.clone()
    }

    pub fn default_profile(&self) -> Option<Profile> {
        self.state.read().default_profile.clone()
    }

    pub fn video_sources(&self) -> Vec<VideoSource> {
        self.state.read().video_sources.clone()
    }

    pub fn active_sources(&self) -> Vec<ActiveSource> {
        self.state.read().active_sources.clone()
    }

    /// First active source
    pub fn active_source(&self) -> Option<ActiveSource> {
        self.state.read().active_sources.first().cloned()
    }

    /// PTZ presets by name, filled by `get_presets`
    pub fn presets(&self) -> HashMap<String, String> {
        self.state.read().presets.clone()
    }

    pub fn media2_support(&self) -> bool {
        self.state.read().media2_support
    }

    pub fn services(&self) -> HashMap<ServiceKind, Url> {
        self.transport.services()
    }

    /// Device clock minus local clock in milliseconds
    pub fn time_shift(&self) -> Option<i64> {
        self.transport.time_shift()
    }

    pub fn device_information(&self) -> Option<DeviceInformation> {
        self.state.read().device_information.clone()
    }

    /// Profile token used when an operation is not given one
    pub(crate) fn profile_token(&self, explicit: Option<&str>) -> Result<String> {
        if let Some(token) = explicit {
            return Ok(token.to_string());
        }
        let state = self.state.read();
        state
            .active_sources
            .first()
            .map(|s| s.profile_token.clone())
            .or_else(|| state.default_profile.as_ref().map(|p| p.token.clone()))
            .or_else(|| state.profiles.first().map(|p| p.token.clone()))
            .ok_or_else(|| {
                OnvifError::Config("no profile token given and no active profile known".to_string())
            })
    }

    /// Video source token used when an operation is not given one
    pub(crate) fn source_token(&self, explicit: Option<&str>) -> Result<String> {
        if let Some(token) = explicit {
            return Ok(token.to_string());
        }
        let state = self.state.read();
        state
            .active_sources
            .first()
            .map(|s| s.source_token.clone())
            .or_else(|| state.video_sources.first().map(|s| s.token.clone()))
            .ok_or_else(|| {
                OnvifError::Config("no video source token given and none known".to_string())
            })
    }

    // =========================================================================
    // Call helpers
    // =========================================================================

    /// Build `<prefix:Action xmlns:prefix=...>inner</prefix:Action>`
    pub(crate) fn body(kind: ServiceKind, action: &str, inner: &str) -> String {
        let prefix = kind.prefix();
        if inner.is_empty() {
            format!(
                r#"<{p}:{a} xmlns:{p}="{ns}" xmlns:tt="{tt}"/>"#,
                p = prefix,
                a = action,
                ns = kind.namespace(),
                tt = NS_SCHEMA
            )
        } else {
            format!(
                r#"<{p}:{a} xmlns:{p}="{ns}" xmlns:tt="{tt}">{inner}</{p}:{a}>"#,
                p = prefix,
                a = action,
                ns = kind.namespace(),
                tt = NS_SCHEMA,
                inner = inner
            )
        }
    }

    /// Call `action` on `kind` and return the normalized `<Action>Response`
    pub(crate) async fn call(
        &self,
        kind: ServiceKind,
        action: &str,
        inner: &str,
        arrays: &[&str],
    ) -> Result<NormalizedValue> {
        let options = RequestOptions::new(Self::body(kind, action, inner)).service(kind);
        self.invoke(options, action, arrays).await
    }

    /// Send a prepared request and extract the normalized `<Action>Response`
    pub(crate) async fn invoke(
        &self,
        options: RequestOptions,
        action: &str,
        arrays: &[&str],
    ) -> Result<NormalizedValue> {
        let response = self.request(options).await?;
        response_element(&response, action, arrays)
    }
}

pub(crate) const NS_SCHEMA: &str = "http://www.onvif.org/ver10/schema";

pub(crate) fn response_element(
    response: &SoapResponse,
    action: &str,
    arrays: &[&str],
) -> Result<NormalizedValue> {
    let options = NormalizeOptions::with_arrays(arrays.iter().copied());
    let body = response.normalize(&options);
    let name = format!("{}Response", normalize_name(action));
    body.get(&name).cloned().ok_or_else(|| {
        OnvifError::protocol(format!("response is missing {}", name), response.xml.clone())
    })
}

/// Pair each video source with the first profile that streams it.
///
/// A profile qualifies when its video source configuration references the
/// source and it has a video encoder configuration. The first source must
/// match; later sources without a match are skipped.
pub(crate) fn match_active_sources(
    profiles: &[Profile],
    sources: &[VideoSource],
) -> Result<(Vec<ActiveSource>, Option<Profile>)> {
    let mut active = Vec::new();
    let mut default_profile = None;

    for (idx, source) in sources.iter().enumerate() {
        let matched = profiles.iter().find_map(|profile| {
            let video_source = profile.video_source.as_ref()?;
            let encoder = profile.video_encoder.as_ref()?;
            (video_source.source_token == source.token).then_some((profile, video_source, encoder))
        });

        let Some((profile, video_source, encoder)) = matched else {
            if idx == 0 {
                return Err(OnvifError::Config(format!(
                    "no profile with a video encoder streams video source {}",
                    source.token
                )));
            }
            debug!(source = %source.token, "Skipping video source without a profile");
            continue;
        };

        if idx == 0 {
            default_profile = Some(profile.clone());
        }
        active.push(ActiveSource {
            source_token: source.token.clone(),
            profile_token: profile.token.clone(),
            video_source_configuration_token: video_source.token.clone(),
            encoding: encoder.encoding.clone(),
            width: encoder.width,
            height: encoder.height,
            fps: encoder.frame_rate_limit,
            bitrate: encoder.bitrate_limit,
            ptz: profile.ptz.clone(),
        });
    }

    Ok((active, default_profile))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn profile(token: &str, source: &str, with_encoder: bool) -> Profile {
        Profile {
            token: token.to_string(),
            name: token.to_string(),
            fixed: false,
            video_source: Some(VideoSourceConfiguration {
                token: format!("vsc-{}", source),
                name: None,
                source_token: source.to_string(),
            }),
            video_encoder: with_encoder.then(|| VideoEncoderConfiguration {
                token: format!("enc-{}", token),
                name: None,
                encoding: Some("H264".to_string()),
                width: Some(1280),
                height: Some(720),
                quality: None,
                frame_rate_limit: Some(30.0),
                bitrate_limit: Some(2048),
            }),
            ptz: None,
        }
    }

    fn source(token: &str) -> VideoSource {
        VideoSource {
            token: token.to_string(),
            framerate: None,
            width: None,
            height: None,
        }
    }

    #[test]
    fn test_body_builder() {
        assert_eq!(
            OnvifClient::body(ServiceKind::Device, "GetHostname", ""),
            r#"<tds:GetHostname xmlns:tds="http://www.onvif.org/ver10/device/wsdl" xmlns:tt="http://www.onvif.org/ver10/schema"/>"#
        );
        assert!(OnvifClient::body(ServiceKind::Ptz, "Stop", "<x/>").ends_with("<x/></tptz:Stop>"));
    }

    #[test]
    fn test_active_sources_pick_first_profile_with_encoder() {
        let profiles = vec![
            profile("no-encoder", "src0", false),
            profile("main", "src0", true),
            profile("sub", "src0", true),
            profile("second", "src1", true),
        ];
        let (active, default_profile) =
            match_active_sources(&profiles, &[source("src0"), source("src1")]).unwrap();

        assert_eq!(active.len(), 2);
        assert_eq!(active[0].profile_token, "main");
        assert_eq!(active[0].video_source_configuration_token, "vsc-src0");
        assert_eq!(active[0].bitrate, Some(2048));
        assert_eq!(active[1].profile_token, "second");
        assert_eq!(default_profile.unwrap().token, "main");
    }

    #[test]
    fn test_unmatched_first_source_is_config_error() {
        let profiles = vec![profile("main", "src1", true)];
        let err = match_active_sources(&profiles, &[source("src0"), source("src1")]).unwrap_err();
        assert!(matches!(err, OnvifError::Config(_)));
    }

    #[test]
    fn test_unmatched_later_source_is_skipped() {
        let profiles = vec![profile("main", "src0", true)];
        let (active, _) =
            match_active_sources(&profiles, &[source("src0"), source("src1")]).unwrap();
        assert_eq!(active.len(), 1);
    }

    #[test]
    fn test_profile_token_fallback() {
        let client = OnvifClient::new(ClientConfig::new("cam")).unwrap();
        assert!(matches!(client.profile_token(None), Err(OnvifError::Config(_))));
        assert_eq!(client.profile_token(Some("x")).unwrap(), "x");

        client.state.write().profiles = vec![profile("main", "src0", true)];
        assert_eq!(client.profile_token(None).unwrap(), "main");
    }
}
