//! Imaging service (`ver20/imaging/wsdl`)

use tracing::instrument;

use onvif_core::NormalizedValue;

use crate::client::OnvifClient;
use crate::error::Result;
use crate::services::text_element;
use crate::types::*;

impl OnvifClient {
    /// Current imaging settings of a video source, as a normalized tree
    #[instrument(skip(self))]
    pub async fn get_imaging_settings(&self, video_source_token: Option<&str>) -> Result<NormalizedValue> {
        let token = self.source_token(video_source_token)?;
        let value = self
            .call(
                ServiceKind::Imaging,
                "GetImagingSettings",
                &text_element("timg:VideoSourceToken", &token),
                &[],
            )
            .await?;
        Ok(value
            .get("imagingSettings")
            .cloned()
            .unwrap_or(NormalizedValue::String(String::new())))
    }

    #[instrument(skip(self))]
    pub async fn set_imaging_settings(
        &self,
        video_source_token: Option<&str>,
        update: &ImagingSettingsUpdate,
    ) -> Result<()> {
        let token = self.source_token(video_source_token)?;

        // Schema order: Brightness, ColorSaturation, Contrast, IrCutFilter, Sharpness
        let mut settings = String::new();
        let number = |tag: &str, value: Option<f64>| {
            value
                .map(|v| text_element(tag, &v.to_string()))
                .unwrap_or_default()
        };
        settings.push_str(&number("tt:Brightness", update.brightness));
        settings.push_str(&number("tt:ColorSaturation", update.color_saturation));
        settings.push_str(&number("tt:Contrast", update.contrast));
        if let Some(filter) = &update.ir_cut_filter {
            settings.push_str(&text_element("tt:IrCutFilter", filter));
        }
        settings.push_str(&number("tt:Sharpness", update.sharpness));

        let inner = format!(
            "{}<timg:ImagingSettings>{}</timg:ImagingSettings>{}",
            text_element("timg:VideoSourceToken", &token),
            settings,
            text_element("timg:ForcePersistence", &update.force_persistence.to_string())
        );
        self.call(ServiceKind::Imaging, "SetImagingSettings", &inner, &[])
            .await?;
        Ok(())
    }
}
