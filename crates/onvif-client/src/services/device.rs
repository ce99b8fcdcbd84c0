//! Device management service (`ver10/device/wsdl`)

use chrono::Utc;
use tracing::{debug, instrument};

use onvif_core::NormalizedValue;

use crate::client::OnvifClient;
use crate::error::{OnvifError, Result};
use crate::transport::{parse_service_url, RequestOptions};
use crate::types::*;

const SENDER_NOT_AUTHORIZED: &str = "sender not authorized";

impl OnvifClient {
    /// Read the device clock.
    ///
    /// Sent without a WS-Security header first, since the device clock is
    /// needed to build one; a "Sender not Authorized" fault retries once with
    /// credentials. The first successful call fixes the time shift.
    #[instrument(skip(self))]
    pub async fn get_system_date_and_time(&self) -> Result<SystemDateAndTime> {
        let body = Self::body(ServiceKind::Device, "GetSystemDateAndTime", "");
        let unsecured = RequestOptions::new(body.clone())
            .service(ServiceKind::Device)
            .skip_security();

        let value = match self.invoke(unsecured, "GetSystemDateAndTime", &[]).await {
            Ok(value) => value,
            Err(e) if e.mentions(SENDER_NOT_AUTHORIZED) => {
                debug!("GetSystemDateAndTime needs credentials, retrying");
                let secured = RequestOptions::new(body).service(ServiceKind::Device);
                self.invoke(secured, "GetSystemDateAndTime", &[]).await?
            }
            Err(e) => return Err(e),
        };

        let info = value
            .get("systemDateAndTime")
            .map(SystemDateAndTime::from_value)
            .ok_or_else(|| OnvifError::Protocol {
                message: "GetSystemDateAndTime response has no SystemDateAndTime".to_string(),
                fault: None,
                xml: None,
            })?;

        if let Some(device_utc) = info.utc {
            let shift = (device_utc - Utc::now()).num_milliseconds();
            if self.transport.set_time_shift(shift) {
                debug!(shift_ms = shift, "Device time shift recorded");
            }
        }
        Ok(info)
    }

    /// List services and register their addresses
    #[instrument(skip(self))]
    pub async fn get_services(&self, include_capability: bool) -> Result<Vec<ServiceInfo>> {
        let inner = format!(
            "<tds:IncludeCapability>{}</tds:IncludeCapability>",
            include_capability
        );
        let value = self
            .call(ServiceKind::Device, "GetServices", &inner, &["service"])
            .await?;

        let services: Vec<ServiceInfo> = value
            .get("service")
            .map(|list| list.items().iter().filter_map(ServiceInfo::from_value).collect())
            .unwrap_or_default();

        let mut media2 = false;
        for service in &services {
            match ServiceKind::from_namespace(&service.namespace) {
                Some(kind) => {
                    media2 |= kind == ServiceKind::Media2;
                    self.transport
                        .set_service(kind, parse_service_url(&service.xaddr)?);
                }
                None => debug!(namespace = %service.namespace, "Ignoring unknown service"),
            }
        }
        self.state.write().media2_support = media2;

        Ok(services)
    }

    /// Read capabilities and register the service addresses they list.
    ///
    /// Returns the normalized `Capabilities` element.
    #[instrument(skip(self))]
    pub async fn get_capabilities(&self) -> Result<NormalizedValue> {
        let value = self
            .call(
                ServiceKind::Device,
                "GetCapabilities",
                "<tds:Category>All</tds:Category>",
                &[],
            )
            .await?;
        let capabilities = value.get("capabilities").cloned().ok_or_else(|| {
            OnvifError::Protocol {
                message: "GetCapabilities response has no Capabilities".to_string(),
                fault: None,
                xml: None,
            }
        })?;

        self.register_capabilities(&capabilities)?;
        if let Some(extension) = capabilities.get("extension") {
            self.register_capabilities(extension)?;
        }
        Ok(capabilities)
    }

    fn register_capabilities(&self, capabilities: &NormalizedValue) -> Result<()> {
        let NormalizedValue::Object(entries) = capabilities else {
            return Ok(());
        };
        for (name, entry) in entries {
            let Some(kind) = ServiceKind::from_capability(name) else {
                continue;
            };
            if let Some(xaddr) = entry.get("xAddr").and_then(NormalizedValue::text) {
                self.transport.set_service(kind, parse_service_url(&xaddr)?);
            }
        }
        Ok(())
    }

    /// Manufacturer, model, firmware and serial number; cached on the client
    #[instrument(skip(self))]
    pub async fn get_device_information(&self) -> Result<DeviceInformation> {
        let value = self
            .call(ServiceKind::Device, "GetDeviceInformation", "", &[])
            .await?;
        let info = DeviceInformation::from_value(&value);
        self.state.write().device_information = Some(info.clone());
        Ok(info)
    }

    #[instrument(skip(self))]
    pub async fn get_hostname(&self) -> Result<HostnameInformation> {
        let value = self.call(ServiceKind::Device, "GetHostname", "", &[]).await?;
        Ok(value
            .get("hostnameInformation")
            .map(HostnameInformation::from_value)
            .unwrap_or(HostnameInformation {
                from_dhcp: false,
                name: None,
            }))
    }

    #[instrument(skip(self))]
    pub async fn get_scopes(&self) -> Result<Vec<Scope>> {
        let value = self
            .call(ServiceKind::Device, "GetScopes", "", &["scopes"])
            .await?;
        Ok(value
            .get("scopes")
            .map(|list| list.items().iter().filter_map(Scope::from_value).collect())
            .unwrap_or_default())
    }

    /// Reboot the device; returns the device's message
    #[instrument(skip(self))]
    pub async fn system_reboot(&self) -> Result<String> {
        let value = self.call(ServiceKind::Device, "SystemReboot", "", &[]).await?;
        Ok(value
            .get("message")
            .and_then(NormalizedValue::text)
            .unwrap_or_default())
    }
}
