//! Service facades
//!
//! Each submodule adds one ONVIF service's operations to
//! [`OnvifClient`](crate::OnvifClient). Facades only build body fragments and
//! read normalized responses; everything on the wire goes through the
//! transport.

pub mod device;
pub mod events;
pub mod imaging;
pub mod media;
pub mod ptz;

use std::time::Duration;

pub use events::PullPointOptions;
pub use ptz::{ContinuousMoveOptions, GotoPresetOptions, MoveOptions, SetPresetOptions, StopOptions};

/// Render a duration as an ISO 8601 `PT…S` value
pub(crate) fn iso_duration(duration: Duration) -> String {
    format!("PT{}S", duration.as_secs_f64())
}

/// `<tag>text</tag>` with the text escaped
pub(crate) fn text_element(tag: &str, text: &str) -> String {
    format!("<{tag}>{}</{tag}>", onvif_core::xml_escape(text), tag = tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_duration() {
        assert_eq!(iso_duration(Duration::from_secs(60)), "PT60S");
        assert_eq!(iso_duration(Duration::from_millis(1500)), "PT1.5S");
    }

    #[test]
    fn test_text_element_escapes() {
        assert_eq!(text_element("tt:Name", "a&b"), "<tt:Name>a&amp;b</tt:Name>");
    }
}
