//! PTZ service (`ver20/ptz/wsdl`)
//!
//! Every operation takes an optional profile token and falls back to the
//! active source's profile. Vectors accept [`PtzVector`] directly or a
//! [`FlatVector`]; axes that are not given are left out of the request.

use std::time::Duration;

use tracing::instrument;

use onvif_core::NormalizedValue;

use crate::client::OnvifClient;
use crate::error::Result;
use crate::services::{iso_duration, text_element};
use crate::types::*;

/// Options for `goto_preset`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GotoPresetOptions {
    pub profile_token: Option<String>,
    pub preset_token: String,
    pub speed: Option<PtzVector>,
}

impl GotoPresetOptions {
    pub fn new(preset_token: impl Into<String>) -> Self {
        Self {
            preset_token: preset_token.into(),
            ..Default::default()
        }
    }
}

/// Options for `set_preset`; without a token a new preset is created
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetPresetOptions {
    pub profile_token: Option<String>,
    pub preset_name: Option<String>,
    pub preset_token: Option<String>,
}

/// Options for `absolute_move` and `relative_move`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MoveOptions {
    pub profile_token: Option<String>,
    /// Position for absolute moves, translation for relative moves
    pub vector: PtzVector,
    pub speed: Option<PtzVector>,
}

impl MoveOptions {
    pub fn new(vector: impl Into<PtzVector>) -> Self {
        Self {
            vector: vector.into(),
            ..Default::default()
        }
    }

    pub fn with_speed(mut self, speed: impl Into<PtzVector>) -> Self {
        self.speed = Some(speed.into());
        self
    }
}

/// Options for `continuous_move`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContinuousMoveOptions {
    pub profile_token: Option<String>,
    pub velocity: PtzVector,
    /// Device stops moving after this long
    pub timeout: Option<Duration>,
}

impl ContinuousMoveOptions {
    pub fn new(velocity: impl Into<PtzVector>) -> Self {
        Self {
            velocity: velocity.into(),
            ..Default::default()
        }
    }
}

/// Options for `stop`; unset axes are left to the device default (stop all)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopOptions {
    pub profile_token: Option<String>,
    pub pan_tilt: Option<bool>,
    pub zoom: Option<bool>,
}

fn profile_element(token: &str) -> String {
    text_element("tptz:ProfileToken", token)
}

impl OnvifClient {
    #[instrument(skip(self))]
    pub async fn get_nodes(&self) -> Result<Vec<PtzNode>> {
        let value = self
            .call(ServiceKind::Ptz, "GetNodes", "", &["pTZNode"])
            .await?;
        Ok(value
            .get("pTZNode")
            .map(|list| list.items().iter().filter_map(PtzNode::from_value).collect())
            .unwrap_or_default())
    }

    /// List presets and refresh the cached name-to-token map
    #[instrument(skip(self))]
    pub async fn get_presets(&self, profile_token: Option<&str>) -> Result<Vec<PtzPreset>> {
        let token = self.profile_token(profile_token)?;
        let value = self
            .call(ServiceKind::Ptz, "GetPresets", &profile_element(&token), &["preset"])
            .await?;
        let presets: Vec<PtzPreset> = value
            .get("preset")
            .map(|list| list.items().iter().filter_map(PtzPreset::from_value).collect())
            .unwrap_or_default();

        self.state.write().presets = presets
            .iter()
            .map(|p| (p.name.clone(), p.token.clone()))
            .collect();
        Ok(presets)
    }

    #[instrument(skip(self))]
    pub async fn goto_preset(&self, options: GotoPresetOptions) -> Result<()> {
        let token = self.profile_token(options.profile_token.as_deref())?;
        let mut inner = profile_element(&token);
        inner.push_str(&text_element("tptz:PresetToken", &options.preset_token));
        if let Some(speed) = &options.speed {
            inner.push_str(&speed.to_xml("tptz:Speed"));
        }
        self.call(ServiceKind::Ptz, "GotoPreset", &inner, &[]).await?;
        Ok(())
    }

    /// Save the current position as a preset; returns the preset token
    #[instrument(skip(self))]
    pub async fn set_preset(&self, options: SetPresetOptions) -> Result<String> {
        let token = self.profile_token(options.profile_token.as_deref())?;
        let mut inner = profile_element(&token);
        if let Some(name) = &options.preset_name {
            inner.push_str(&text_element("tptz:PresetName", name));
        }
        if let Some(preset) = &options.preset_token {
            inner.push_str(&text_element("tptz:PresetToken", preset));
        }
        let value = self.call(ServiceKind::Ptz, "SetPreset", &inner, &[]).await?;
        let preset_token = value
            .get("presetToken")
            .and_then(NormalizedValue::text)
            .unwrap_or_default();

        if let Some(name) = options.preset_name {
            self.state.write().presets.insert(name, preset_token.clone());
        }
        Ok(preset_token)
    }

    #[instrument(skip(self))]
    pub async fn remove_preset(&self, profile_token: Option<&str>, preset_token: &str) -> Result<()> {
        let token = self.profile_token(profile_token)?;
        let inner = format!(
            "{}{}",
            profile_element(&token),
            text_element("tptz:PresetToken", preset_token)
        );
        self.call(ServiceKind::Ptz, "RemovePreset", &inner, &[]).await?;
        self.state.write().presets.retain(|_, t| t.as_str() != preset_token);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn goto_home_position(
        &self,
        profile_token: Option<&str>,
        speed: Option<PtzVector>,
    ) -> Result<()> {
        let token = self.profile_token(profile_token)?;
        let mut inner = profile_element(&token);
        if let Some(speed) = speed {
            inner.push_str(&speed.to_xml("tptz:Speed"));
        }
        self.call(ServiceKind::Ptz, "GotoHomePosition", &inner, &[])
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn set_home_position(&self, profile_token: Option<&str>) -> Result<()> {
        let token = self.profile_token(profile_token)?;
        self.call(ServiceKind::Ptz, "SetHomePosition", &profile_element(&token), &[])
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn absolute_move(&self, options: MoveOptions) -> Result<()> {
        self.move_to("AbsoluteMove", "tptz:Position", options).await
    }

    #[instrument(skip(self))]
    pub async fn relative_move(&self, options: MoveOptions) -> Result<()> {
        self.move_to("RelativeMove", "tptz:Translation", options).await
    }

    async fn move_to(&self, action: &str, element: &str, options: MoveOptions) -> Result<()> {
        let token = self.profile_token(options.profile_token.as_deref())?;
        let mut inner = profile_element(&token);
        inner.push_str(&options.vector.to_xml(element));
        if let Some(speed) = &options.speed {
            inner.push_str(&speed.to_xml("tptz:Speed"));
        }
        self.call(ServiceKind::Ptz, action, &inner, &[]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn continuous_move(&self, options: ContinuousMoveOptions) -> Result<()> {
        let token = self.profile_token(options.profile_token.as_deref())?;
        let mut inner = profile_element(&token);
        inner.push_str(&options.velocity.to_xml("tptz:Velocity"));
        if let Some(timeout) = options.timeout {
            inner.push_str(&text_element("tptz:Timeout", &iso_duration(timeout)));
        }
        self.call(ServiceKind::Ptz, "ContinuousMove", &inner, &[])
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn stop(&self, options: StopOptions) -> Result<()> {
        let token = self.profile_token(options.profile_token.as_deref())?;
        let mut inner = profile_element(&token);
        if let Some(pan_tilt) = options.pan_tilt {
            inner.push_str(&text_element("tptz:PanTilt", &pan_tilt.to_string()));
        }
        if let Some(zoom) = options.zoom {
            inner.push_str(&text_element("tptz:Zoom", &zoom.to_string()));
        }
        self.call(ServiceKind::Ptz, "Stop", &inner, &[]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_status(&self, profile_token: Option<&str>) -> Result<PtzStatus> {
        let token = self.profile_token(profile_token)?;
        let value = self
            .call(ServiceKind::Ptz, "GetStatus", &profile_element(&token), &[])
            .await?;
        Ok(value
            .get("pTZStatus")
            .map(PtzStatus::from_value)
            .unwrap_or(PtzStatus {
                position: None,
                pan_tilt_status: None,
                zoom_status: None,
                error: None,
                utc_time: None,
            }))
    }
}
