//! Typed records returned by the service facades
//!
//! Records are read out of [`NormalizedValue`] trees by field name. Tokens and
//! names go through [`NormalizedValue::text`] so a token such as `1` that the
//! normalizer sniffed as a number still comes back as a string.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use onvif_core::NormalizedValue;

// =============================================================================
// Service table
// =============================================================================

/// ONVIF service a request is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Device,
    Media,
    Media2,
    Ptz,
    Imaging,
    Events,
    Analytics,
    DeviceIo,
    Recording,
    Search,
    Replay,
}

impl ServiceKind {
    /// WSDL namespace used for request bodies
    pub fn namespace(self) -> &'static str {
        match self {
            Self::Device => "http://www.onvif.org/ver10/device/wsdl",
            Self::Media => "http://www.onvif.org/ver10/media/wsdl",
            Self::Media2 => "http://www.onvif.org/ver20/media/wsdl",
            Self::Ptz => "http://www.onvif.org/ver20/ptz/wsdl",
            Self::Imaging => "http://www.onvif.org/ver20/imaging/wsdl",
            Self::Events => "http://www.onvif.org/ver10/events/wsdl",
            Self::Analytics => "http://www.onvif.org/ver20/analytics/wsdl",
            Self::DeviceIo => "http://www.onvif.org/ver10/deviceIO/wsdl",
            Self::Recording => "http://www.onvif.org/ver10/recording/wsdl",
            Self::Search => "http://www.onvif.org/ver10/search/wsdl",
            Self::Replay => "http://www.onvif.org/ver10/replay/wsdl",
        }
    }

    /// Conventional namespace prefix for request bodies
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Device => "tds",
            Self::Media => "trt",
            Self::Media2 => "tr2",
            Self::Ptz => "tptz",
            Self::Imaging => "timg",
            Self::Events => "tev",
            Self::Analytics => "tan",
            Self::DeviceIo => "tmd",
            Self::Recording => "trc",
            Self::Search => "tse",
            Self::Replay => "trp",
        }
    }

    /// Map a `GetServices` namespace URI
    pub fn from_namespace(namespace: &str) -> Option<Self> {
        let namespace = namespace.trim().trim_end_matches('/');
        [
            Self::Device,
            Self::Media,
            Self::Media2,
            Self::Ptz,
            Self::Imaging,
            Self::Events,
            Self::Analytics,
            Self::DeviceIo,
            Self::Recording,
            Self::Search,
            Self::Replay,
        ]
        .into_iter()
        .find(|kind| kind.namespace().eq_ignore_ascii_case(namespace))
    }

    /// Map a `GetCapabilities` element name, as produced by the normalizer
    pub fn from_capability(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "device" => Some(Self::Device),
            "media" => Some(Self::Media),
            "media2" => Some(Self::Media2),
            "ptz" => Some(Self::Ptz),
            "imaging" => Some(Self::Imaging),
            "events" => Some(Self::Events),
            "analytics" => Some(Self::Analytics),
            "deviceio" => Some(Self::DeviceIo),
            "recording" => Some(Self::Recording),
            "search" => Some(Self::Search),
            "replay" => Some(Self::Replay),
            _ => None,
        }
    }
}

/// One entry of a `GetServices` response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceInfo {
    pub namespace: String,
    pub xaddr: String,
    /// `major.minor`
    pub version: Option<String>,
    /// Raw capabilities block when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<serde_json::Value>,
}

impl ServiceInfo {
    pub(crate) fn from_value(value: &NormalizedValue) -> Option<Self> {
        let version = value.get("version").map(|v| {
            let major = field_text(v, "major").unwrap_or_default();
            let minor = field_text(v, "minor").unwrap_or_default();
            format!("{}.{}", major, minor)
        });
        Some(Self {
            namespace: field_text(value, "namespace")?,
            xaddr: field_text(value, "xAddr")?,
            version,
            capabilities: value.get("capabilities").map(NormalizedValue::to_json),
        })
    }
}

// =============================================================================
// Device management
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInformation {
    pub manufacturer: String,
    pub model: String,
    pub firmware_version: String,
    pub serial_number: String,
    pub hardware_id: String,
}

impl DeviceInformation {
    pub(crate) fn from_value(value: &NormalizedValue) -> Self {
        Self {
            manufacturer: field_text(value, "manufacturer").unwrap_or_default(),
            model: field_text(value, "model").unwrap_or_default(),
            firmware_version: field_text(value, "firmwareVersion").unwrap_or_default(),
            serial_number: field_text(value, "serialNumber").unwrap_or_default(),
            hardware_id: field_text(value, "hardwareId").unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemDateAndTime {
    /// `Manual` or `NTP`
    pub date_time_type: String,
    pub daylight_savings: bool,
    /// POSIX TZ string
    pub time_zone: Option<String>,
    /// Device clock in UTC
    pub utc: Option<DateTime<Utc>>,
}

impl SystemDateAndTime {
    pub(crate) fn from_value(value: &NormalizedValue) -> Self {
        Self {
            date_time_type: field_text(value, "dateTimeType").unwrap_or_default(),
            daylight_savings: value
                .get("daylightSavings")
                .and_then(NormalizedValue::as_bool)
                .unwrap_or(false),
            time_zone: value
                .path(&["timeZone", "tZ"])
                .and_then(NormalizedValue::text),
            utc: value.get("uTCDateTime").and_then(calendar_to_utc),
        }
    }
}

/// Read `{Date {Year, Month, Day}, Time {Hour, Minute, Second}}`
fn calendar_to_utc(value: &NormalizedValue) -> Option<DateTime<Utc>> {
    let part = |path: &[&str]| value.path(path).and_then(NormalizedValue::as_f64);
    let date = chrono::NaiveDate::from_ymd_opt(
        part(&["date", "year"])? as i32,
        part(&["date", "month"])? as u32,
        part(&["date", "day"])? as u32,
    )?;
    let time = chrono::NaiveTime::from_hms_opt(
        part(&["time", "hour"])? as u32,
        part(&["time", "minute"])? as u32,
        part(&["time", "second"])? as u32,
    )?;
    Some(date.and_time(time).and_utc())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostnameInformation {
    pub from_dhcp: bool,
    pub name: Option<String>,
}

impl HostnameInformation {
    pub(crate) fn from_value(value: &NormalizedValue) -> Self {
        Self {
            from_dhcp: value
                .get("fromDHCP")
                .and_then(NormalizedValue::as_bool)
                .unwrap_or(false),
            name: field_text(value, "name"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scope {
    /// `Fixed` or `Configurable`
    pub definition: String,
    pub item: String,
}

impl Scope {
    pub(crate) fn from_value(value: &NormalizedValue) -> Option<Self> {
        Some(Self {
            definition: field_text(value, "scopeDef").unwrap_or_default(),
            item: field_text(value, "scopeItem")?,
        })
    }
}

// =============================================================================
// Media
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoSourceConfiguration {
    pub token: String,
    pub name: Option<String>,
    pub source_token: String,
}

impl VideoSourceConfiguration {
    fn from_value(value: &NormalizedValue) -> Option<Self> {
        Some(Self {
            token: field_text(value, "token")?,
            name: field_text(value, "name"),
            source_token: field_text(value, "sourceToken")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoEncoderConfiguration {
    pub token: String,
    pub name: Option<String>,
    pub encoding: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub quality: Option<f64>,
    pub frame_rate_limit: Option<f64>,
    pub bitrate_limit: Option<u32>,
}

impl VideoEncoderConfiguration {
    pub(crate) fn from_value(value: &NormalizedValue) -> Option<Self> {
        let number = |path: &[&str]| value.path(path).and_then(NormalizedValue::as_f64);
        Some(Self {
            token: field_text(value, "token")?,
            name: field_text(value, "name"),
            encoding: field_text(value, "encoding"),
            width: number(&["resolution", "width"]).map(|n| n as u32),
            height: number(&["resolution", "height"]).map(|n| n as u32),
            quality: number(&["quality"]),
            frame_rate_limit: number(&["rateControl", "frameRateLimit"]),
            bitrate_limit: number(&["rateControl", "bitrateLimit"]).map(|n| n as u32),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PtzConfiguration {
    pub token: String,
    pub name: Option<String>,
    pub node_token: Option<String>,
}

impl PtzConfiguration {
    fn from_value(value: &NormalizedValue) -> Option<Self> {
        Some(Self {
            token: field_text(value, "token")?,
            name: field_text(value, "name"),
            node_token: field_text(value, "nodeToken"),
        })
    }
}

/// Media profile, from either Media or Media2
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub token: String,
    pub name: String,
    pub fixed: bool,
    pub video_source: Option<VideoSourceConfiguration>,
    pub video_encoder: Option<VideoEncoderConfiguration>,
    pub ptz: Option<PtzConfiguration>,
}

impl Profile {
    /// Media `GetProfilesResponse/Profiles`
    pub(crate) fn from_media(value: &NormalizedValue) -> Option<Self> {
        Some(Self {
            token: field_text(value, "token")?,
            name: field_text(value, "name").unwrap_or_default(),
            fixed: value
                .get("fixed")
                .and_then(NormalizedValue::as_bool)
                .unwrap_or(false),
            video_source: value
                .get("videoSourceConfiguration")
                .and_then(VideoSourceConfiguration::from_value),
            video_encoder: value
                .get("videoEncoderConfiguration")
                .and_then(VideoEncoderConfiguration::from_value),
            ptz: value
                .get("pTZConfiguration")
                .and_then(PtzConfiguration::from_value),
        })
    }

    /// Media2 `GetProfilesResponse/Profiles`, configurations nested under
    /// `Configurations`
    pub(crate) fn from_media2(value: &NormalizedValue) -> Option<Self> {
        let configurations = value.get("configurations");
        let configuration =
            |name: &str| configurations.and_then(|c| c.items().first()).and_then(|c| c.get(name));
        Some(Self {
            token: field_text(value, "token")?,
            name: field_text(value, "name").unwrap_or_default(),
            fixed: value
                .get("fixed")
                .and_then(NormalizedValue::as_bool)
                .unwrap_or(false),
            video_source: configuration("videoSource").and_then(VideoSourceConfiguration::from_value),
            video_encoder: configuration("videoEncoder")
                .and_then(VideoEncoderConfiguration::from_value),
            ptz: configuration("pTZ").and_then(PtzConfiguration::from_value),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoSource {
    pub token: String,
    pub framerate: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl VideoSource {
    pub(crate) fn from_value(value: &NormalizedValue) -> Option<Self> {
        let number = |path: &[&str]| value.path(path).and_then(NormalizedValue::as_f64);
        Some(Self {
            token: field_text(value, "token")?,
            framerate: number(&["framerate"]),
            width: number(&["resolution", "width"]).map(|n| n as u32),
            height: number(&["resolution", "height"]).map(|n| n as u32),
        })
    }
}

/// Video source paired with the profile that streams it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveSource {
    pub source_token: String,
    pub profile_token: String,
    pub video_source_configuration_token: String,
    pub encoding: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub bitrate: Option<u32>,
    pub ptz: Option<PtzConfiguration>,
}

/// Stream type requested from `GetStreamUri`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamType {
    #[default]
    Unicast,
    Multicast,
}

/// Transport protocol requested from `GetStreamUri`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportProtocol {
    Udp,
    Tcp,
    #[default]
    Rtsp,
    Http,
}

impl TransportProtocol {
    /// Media `StreamSetup/Transport/Protocol` value
    pub fn media_name(self) -> &'static str {
        match self {
            Self::Udp => "UDP",
            Self::Tcp => "TCP",
            Self::Rtsp => "RTSP",
            Self::Http => "HTTP",
        }
    }
}

/// Options for `get_stream_uri`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamUriOptions {
    /// Defaults to the active source's profile
    pub profile_token: Option<String>,
    pub stream: StreamType,
    pub protocol: TransportProtocol,
}

impl StreamUriOptions {
    /// Media `StreamSetup/Stream` value
    pub fn media_stream(&self) -> &'static str {
        match self.stream {
            StreamType::Unicast => "RTP-Unicast",
            StreamType::Multicast => "RTP-Multicast",
        }
    }

    /// Media2 `Protocol` value
    pub fn media2_protocol(&self) -> &'static str {
        match (self.stream, self.protocol) {
            (StreamType::Multicast, _) => "RtspMulticast",
            (_, TransportProtocol::Http) => "RtspOverHttp",
            (_, TransportProtocol::Udp) => "RtspUnicast",
            _ => "RTSP",
        }
    }
}

/// Stream or snapshot URI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaUri {
    pub uri: String,
    pub invalid_after_connect: bool,
    pub invalid_after_reboot: bool,
    /// ISO 8601 duration, e.g. `PT0S`
    pub timeout: Option<String>,
}

impl MediaUri {
    /// Media wraps the URI in `MediaUri`; Media2 returns a bare `Uri`
    pub(crate) fn from_value(value: &NormalizedValue) -> Option<Self> {
        let inner = value.get("mediaUri").unwrap_or(value);
        let flag = |name: &str| {
            inner
                .get(name)
                .and_then(NormalizedValue::as_bool)
                .unwrap_or(false)
        };
        Some(Self {
            uri: field_text(inner, "uri")?,
            invalid_after_connect: flag("invalidAfterConnect"),
            invalid_after_reboot: flag("invalidAfterReboot"),
            timeout: field_text(inner, "timeout"),
        })
    }
}

/// On-screen display configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Osd {
    pub token: String,
    pub video_source_configuration_token: Option<String>,
    /// `Text` or `Image`
    pub osd_type: Option<String>,
    pub text: Option<String>,
}

impl Osd {
    pub(crate) fn from_value(value: &NormalizedValue) -> Option<Self> {
        Some(Self {
            token: field_text(value, "token")?,
            video_source_configuration_token: field_text(
                value,
                "videoSourceConfigurationToken",
            ),
            osd_type: field_text(value, "type"),
            text: value
                .path(&["textString", "plainText"])
                .and_then(NormalizedValue::text),
        })
    }
}

// =============================================================================
// PTZ
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PanTilt {
    pub x: f64,
    pub y: f64,
}

/// PTZ position, translation or velocity.
///
/// Axes left as `None` are not sent to the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PtzVector {
    pub pan_tilt: Option<PanTilt>,
    pub zoom: Option<f64>,
}

impl PtzVector {
    pub fn new(x: f64, y: f64, zoom: f64) -> Self {
        Self {
            pan_tilt: Some(PanTilt { x, y }),
            zoom: Some(zoom),
        }
    }

    pub fn pan_tilt(x: f64, y: f64) -> Self {
        Self {
            pan_tilt: Some(PanTilt { x, y }),
            zoom: None,
        }
    }

    pub fn zoom(zoom: f64) -> Self {
        Self {
            pan_tilt: None,
            zoom: Some(zoom),
        }
    }

    /// Render as `<{element}>` with `tt:PanTilt`/`tt:Zoom` children
    pub(crate) fn to_xml(&self, element: &str) -> String {
        let mut xml = format!("<{}>", element);
        if let Some(pan_tilt) = self.pan_tilt {
            xml.push_str(&format!(
                r#"<tt:PanTilt x="{}" y="{}"/>"#,
                pan_tilt.x, pan_tilt.y
            ));
        }
        if let Some(zoom) = self.zoom {
            xml.push_str(&format!(r#"<tt:Zoom x="{}"/>"#, zoom));
        }
        xml.push_str(&format!("</{}>", element));
        xml
    }

    pub(crate) fn from_value(value: &NormalizedValue) -> Self {
        let pan_tilt = value.get("panTilt").map(|pt| PanTilt {
            x: pt.get("x").and_then(NormalizedValue::as_f64).unwrap_or(0.0),
            y: pt.get("y").and_then(NormalizedValue::as_f64).unwrap_or(0.0),
        });
        let zoom = value
            .path(&["zoom", "x"])
            .and_then(NormalizedValue::as_f64);
        Self { pan_tilt, zoom }
    }
}

/// Flat `{pan|x, tilt|y, zoom}` vector input
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FlatVector {
    #[serde(alias = "pan")]
    pub x: Option<f64>,
    #[serde(alias = "tilt")]
    pub y: Option<f64>,
    pub zoom: Option<f64>,
}

impl FlatVector {
    pub fn pan(mut self, x: f64) -> Self {
        self.x = Some(x);
        self
    }

    pub fn tilt(mut self, y: f64) -> Self {
        self.y = Some(y);
        self
    }

    pub fn zoom(mut self, zoom: f64) -> Self {
        self.zoom = Some(zoom);
        self
    }
}

impl From<FlatVector> for PtzVector {
    fn from(flat: FlatVector) -> Self {
        let pan_tilt = if flat.x.is_some() || flat.y.is_some() {
            Some(PanTilt {
                x: flat.x.unwrap_or(0.0),
                y: flat.y.unwrap_or(0.0),
            })
        } else {
            None
        };
        Self {
            pan_tilt,
            zoom: flat.zoom,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PtzNode {
    pub token: String,
    pub name: Option<String>,
    pub fixed_home_position: Option<bool>,
    pub home_supported: bool,
    pub maximum_number_of_presets: Option<u32>,
}

impl PtzNode {
    pub(crate) fn from_value(value: &NormalizedValue) -> Option<Self> {
        Some(Self {
            token: field_text(value, "token")?,
            name: field_text(value, "name"),
            fixed_home_position: value
                .get("fixedHomePosition")
                .and_then(NormalizedValue::as_bool),
            home_supported: value
                .get("homeSupported")
                .and_then(NormalizedValue::as_bool)
                .unwrap_or(false),
            maximum_number_of_presets: value
                .get("maximumNumberOfPresets")
                .and_then(NormalizedValue::as_f64)
                .map(|n| n as u32),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PtzPreset {
    pub token: String,
    pub name: String,
    pub position: Option<PtzVector>,
}

impl PtzPreset {
    pub(crate) fn from_value(value: &NormalizedValue) -> Option<Self> {
        Some(Self {
            token: field_text(value, "token")?,
            name: field_text(value, "name").unwrap_or_default(),
            position: value.get("pTZPosition").map(PtzVector::from_value),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PtzStatus {
    pub position: Option<PtzVector>,
    /// `IDLE`, `MOVING` or `UNKNOWN`
    pub pan_tilt_status: Option<String>,
    pub zoom_status: Option<String>,
    pub error: Option<String>,
    pub utc_time: Option<DateTime<Utc>>,
}

impl PtzStatus {
    pub(crate) fn from_value(value: &NormalizedValue) -> Self {
        Self {
            position: value.get("position").map(PtzVector::from_value),
            pan_tilt_status: value
                .path(&["moveStatus", "panTilt"])
                .and_then(NormalizedValue::text),
            zoom_status: value
                .path(&["moveStatus", "zoom"])
                .and_then(NormalizedValue::text),
            error: field_text(value, "error").filter(|e| !e.is_empty()),
            utc_time: value.get("uTCTime").and_then(NormalizedValue::as_datetime),
        }
    }
}

// =============================================================================
// Imaging
// =============================================================================

/// Subset of imaging settings that can be changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImagingSettingsUpdate {
    pub brightness: Option<f64>,
    pub color_saturation: Option<f64>,
    pub contrast: Option<f64>,
    pub sharpness: Option<f64>,
    /// `ON`, `OFF` or `AUTO`
    pub ir_cut_filter: Option<String>,
    pub force_persistence: bool,
}

// =============================================================================
// Events
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PullPointSubscription {
    /// Subscription reference address; later pull/renew/unsubscribe calls go here
    pub address: String,
    pub current_time: Option<DateTime<Utc>>,
    pub termination_time: Option<DateTime<Utc>>,
}

impl PullPointSubscription {
    pub(crate) fn from_value(value: &NormalizedValue) -> Option<Self> {
        Some(Self {
            address: value
                .path(&["subscriptionReference", "address"])
                .and_then(NormalizedValue::text)?,
            current_time: value.get("currentTime").and_then(NormalizedValue::as_datetime),
            termination_time: value
                .get("terminationTime")
                .and_then(NormalizedValue::as_datetime),
        })
    }
}

/// One notification from `PullMessages`
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMessage {
    pub topic: Option<String>,
    /// Normalized `Message/Message` content (source, key and data items)
    pub message: NormalizedValue,
}

impl NotificationMessage {
    pub(crate) fn from_value(value: &NormalizedValue) -> Self {
        let message = value
            .path(&["message", "message"])
            .or_else(|| value.get("message"))
            .cloned()
            .unwrap_or(NormalizedValue::String(String::new()));
        Self {
            topic: value.get("topic").and_then(NormalizedValue::text),
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PullMessagesResult {
    pub current_time: Option<DateTime<Utc>>,
    pub termination_time: Option<DateTime<Utc>>,
    pub messages: Vec<NotificationMessage>,
}

impl PullMessagesResult {
    pub(crate) fn from_value(value: &NormalizedValue) -> Self {
        Self {
            current_time: value.get("currentTime").and_then(NormalizedValue::as_datetime),
            termination_time: value
                .get("terminationTime")
                .and_then(NormalizedValue::as_datetime),
            messages: value
                .get("notificationMessage")
                .map(|m| m.items().iter().map(NotificationMessage::from_value).collect())
                .unwrap_or_default(),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Text of a direct child, skipping empty elements
pub(crate) fn field_text(value: &NormalizedValue, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(NormalizedValue::text)
        .filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use onvif_core::{normalize, xml, NormalizeOptions};
    use pretty_assertions::assert_eq;

    fn parse(xml_text: &str) -> NormalizedValue {
        normalize(&xml::parse(xml_text).unwrap(), &NormalizeOptions::default())
    }

    #[test]
    fn test_service_kind_mapping() {
        assert_eq!(
            ServiceKind::from_namespace("http://www.onvif.org/ver20/media/wsdl"),
            Some(ServiceKind::Media2)
        );
        assert_eq!(
            ServiceKind::from_namespace("http://www.onvif.org/ver10/deviceIO/wsdl"),
            Some(ServiceKind::DeviceIo)
        );
        assert_eq!(ServiceKind::from_namespace("urn:unknown"), None);
        assert_eq!(ServiceKind::from_capability("pTZ"), Some(ServiceKind::Ptz));
        assert_eq!(ServiceKind::from_capability("extension"), None);
    }

    #[test]
    fn test_numeric_token_reads_back_as_text() {
        let value = parse(r#"<Profiles token="1"><Name>main</Name></Profiles>"#);
        let profile = Profile::from_media(value.get("profiles").unwrap()).unwrap();
        assert_eq!(profile.token, "1");
        assert_eq!(profile.name, "main");
    }

    #[test]
    fn test_media2_profile_configurations() {
        let value = parse(
            r#"<Profiles token="p0" fixed="true"><Name>main</Name><Configurations>
                <VideoSource token="vsc"><Name>vs</Name><SourceToken>src</SourceToken></VideoSource>
                <VideoEncoder token="enc"><Encoding>H265</Encoding><Resolution><Width>1920</Width><Height>1080</Height></Resolution>
                  <RateControl><FrameRateLimit>25</FrameRateLimit><BitrateLimit>4096</BitrateLimit></RateControl></VideoEncoder>
                <PTZ token="ptz0"><NodeToken>node</NodeToken></PTZ>
            </Configurations></Profiles>"#,
        );
        let profile = Profile::from_media2(value.get("profiles").unwrap()).unwrap();
        assert!(profile.fixed);
        assert_eq!(profile.video_source.unwrap().source_token, "src");
        let encoder = profile.video_encoder.unwrap();
        assert_eq!(encoder.encoding.as_deref(), Some("H265"));
        assert_eq!((encoder.width, encoder.height), (Some(1920), Some(1080)));
        assert_eq!(encoder.frame_rate_limit, Some(25.0));
        assert_eq!(encoder.bitrate_limit, Some(4096));
        assert_eq!(profile.ptz.unwrap().node_token.as_deref(), Some("node"));
    }

    #[test]
    fn test_flat_vector_conversion() {
        let zoom_only: PtzVector = FlatVector::default().zoom(0.5).into();
        assert_eq!(zoom_only.pan_tilt, None);
        assert_eq!(zoom_only.zoom, Some(0.5));

        let pan_only: PtzVector = FlatVector::default().pan(0.3).into();
        assert_eq!(pan_only.pan_tilt, Some(PanTilt { x: 0.3, y: 0.0 }));
        assert_eq!(pan_only.zoom, None);

        let parsed: FlatVector = serde_json::from_str(r#"{"pan": 1.0, "tilt": -1.0}"#).unwrap();
        assert_eq!(parsed, FlatVector::default().pan(1.0).tilt(-1.0));
    }

    #[test]
    fn test_vector_xml_omits_missing_axes() {
        assert_eq!(
            PtzVector::zoom(0.25).to_xml("tptz:Velocity"),
            r#"<tptz:Velocity><tt:Zoom x="0.25"/></tptz:Velocity>"#
        );
        assert_eq!(
            PtzVector::pan_tilt(1.0, -0.5).to_xml("tptz:Translation"),
            r#"<tptz:Translation><tt:PanTilt x="1" y="-0.5"/></tptz:Translation>"#
        );
    }

    #[test]
    fn test_system_date_and_time() {
        let value = parse(
            r#"<SystemDateAndTime><DateTimeType>NTP</DateTimeType><DaylightSavings>false</DaylightSavings>
               <TimeZone><TZ>CST-8</TZ></TimeZone>
               <UTCDateTime><Time><Hour>8</Hour><Minute>5</Minute><Second>9</Second></Time>
               <Date><Year>2024</Year><Month>2</Month><Day>29</Day></Date></UTCDateTime></SystemDateAndTime>"#,
        );
        let parsed = SystemDateAndTime::from_value(value.get("systemDateAndTime").unwrap());
        assert_eq!(parsed.date_time_type, "NTP");
        assert_eq!(parsed.time_zone.as_deref(), Some("CST-8"));
        assert_eq!(
            parsed.utc.unwrap().to_rfc3339(),
            "2024-02-29T08:05:09+00:00"
        );
    }

    #[test]
    fn test_stream_uri_protocols() {
        let options = StreamUriOptions::default();
        assert_eq!(options.media_stream(), "RTP-Unicast");
        assert_eq!(options.media2_protocol(), "RTSP");
        let multicast = StreamUriOptions {
            stream: StreamType::Multicast,
            ..Default::default()
        };
        assert_eq!(multicast.media2_protocol(), "RtspMulticast");
        let http = StreamUriOptions {
            protocol: TransportProtocol::Http,
            ..Default::default()
        };
        assert_eq!(http.media2_protocol(), "RtspOverHttp");
    }
}
