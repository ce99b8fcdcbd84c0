//! Media service (`ver10/media/wsdl`) and Media2 (`ver20/media/wsdl`)
//!
//! The Media2 variant is used when the device listed it in `GetServices`.
//! Parameter names and response shapes are translated so callers always see
//! the same records.

use tracing::{debug, instrument};

use crate::client::OnvifClient;
use crate::error::{OnvifError, Result};
use crate::services::text_element;
use crate::types::*;

impl OnvifClient {
    /// Media service to use for this device
    pub(crate) fn media_kind(&self) -> ServiceKind {
        if self.media2_support() && self.transport.service_url(ServiceKind::Media2).is_some() {
            ServiceKind::Media2
        } else {
            ServiceKind::Media
        }
    }

    /// Fetch media profiles and cache them
    #[instrument(skip(self))]
    pub async fn get_profiles(&self) -> Result<Vec<Profile>> {
        let kind = self.media_kind();
        let profiles: Vec<Profile> = match kind {
            ServiceKind::Media2 => {
                let value = self
                    .call(
                        kind,
                        "GetProfiles",
                        "<tr2:Type>All</tr2:Type>",
                        &["profiles", "configurations"],
                    )
                    .await?;
                value
                    .get("profiles")
                    .map(|list| list.items().iter().filter_map(Profile::from_media2).collect())
                    .unwrap_or_default()
            }
            _ => {
                let value = self.call(kind, "GetProfiles", "", &["profiles"]).await?;
                value
                    .get("profiles")
                    .map(|list| list.items().iter().filter_map(Profile::from_media).collect())
                    .unwrap_or_default()
            }
        };

        debug!(count = profiles.len(), service = ?kind, "Fetched profiles");
        self.state.write().profiles = profiles.clone();
        Ok(profiles)
    }

    /// Fetch video sources and cache them
    #[instrument(skip(self))]
    pub async fn get_video_sources(&self) -> Result<Vec<VideoSource>> {
        let value = self
            .call(ServiceKind::Media, "GetVideoSources", "", &["videoSources"])
            .await?;
        let sources: Vec<VideoSource> = value
            .get("videoSources")
            .map(|list| list.items().iter().filter_map(VideoSource::from_value).collect())
            .unwrap_or_default();
        self.state.write().video_sources = sources.clone();
        Ok(sources)
    }

    /// Stream URI for a profile
    #[instrument(skip(self))]
    pub async fn get_stream_uri(&self, options: StreamUriOptions) -> Result<MediaUri> {
        let kind = self.media_kind();
        let token = self.profile_token(options.profile_token.as_deref())?;
        let inner = match kind {
            ServiceKind::Media2 => format!(
                "{}{}",
                text_element("tr2:Protocol", options.media2_protocol()),
                text_element("tr2:ProfileToken", &token)
            ),
            _ => format!(
                concat!(
                    "<trt:StreamSetup><tt:Stream>{}</tt:Stream>",
                    "<tt:Transport><tt:Protocol>{}</tt:Protocol></tt:Transport></trt:StreamSetup>",
                    "{}"
                ),
                options.media_stream(),
                options.protocol.media_name(),
                text_element("trt:ProfileToken", &token)
            ),
        };
        let value = self.call(kind, "GetStreamUri", &inner, &[]).await?;
        MediaUri::from_value(&value).ok_or_else(|| missing("GetStreamUri", "Uri"))
    }

    /// Snapshot URI for a profile
    #[instrument(skip(self))]
    pub async fn get_snapshot_uri(&self, profile_token: Option<&str>) -> Result<MediaUri> {
        let kind = self.media_kind();
        let token = self.profile_token(profile_token)?;
        let inner = text_element(&format!("{}:ProfileToken", kind.prefix()), &token);
        let value = self.call(kind, "GetSnapshotUri", &inner, &[]).await?;
        MediaUri::from_value(&value).ok_or_else(|| missing("GetSnapshotUri", "Uri"))
    }

    #[instrument(skip(self))]
    pub async fn get_video_encoder_configurations(&self) -> Result<Vec<VideoEncoderConfiguration>> {
        let kind = self.media_kind();
        let value = self
            .call(kind, "GetVideoEncoderConfigurations", "", &["configurations"])
            .await?;
        Ok(value
            .get("configurations")
            .map(|list| {
                list.items()
                    .iter()
                    .filter_map(VideoEncoderConfiguration::from_value)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// On-screen displays, optionally restricted to one token.
    ///
    /// Media filters by OSD token; Media2 by video source configuration token.
    #[instrument(skip(self))]
    pub async fn get_osds(&self, token: Option<&str>) -> Result<Vec<Osd>> {
        let kind = self.media_kind();
        let inner = match (kind, token) {
            (_, None) => String::new(),
            (ServiceKind::Media2, Some(token)) => text_element("tr2:ConfigurationToken", token),
            (_, Some(token)) => text_element("trt:OSDToken", token),
        };
        let value = self.call(kind, "GetOSDs", &inner, &["oSDs"]).await?;
        Ok(value
            .get("oSDs")
            .map(|list| list.items().iter().filter_map(Osd::from_value).collect())
            .unwrap_or_default())
    }
}

fn missing(action: &str, element: &str) -> OnvifError {
    OnvifError::Protocol {
        message: format!("{} response has no {}", action, element),
        fault: None,
        xml: None,
    }
}
