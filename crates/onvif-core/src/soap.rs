//! SOAP 1.2 envelope codec
//!
//! [`wrap`] puts a body fragment into an envelope, optionally with a
//! pre-rendered security header. [`unwrap`] parses a response, checks for a
//! `Fault` and hands back the body's child elements.

use tracing::trace;

use crate::error::{OnvifError, Result, SoapFault};
use crate::normalize::{normalize, NormalizeOptions, NormalizedValue};
use crate::xml::{self, XmlValue};

pub const NS_SOAP_ENV: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const NS_WSSE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
pub const NS_WSU: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
pub const NS_ADDRESSING: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
pub const NS_DISCOVERY: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery";

/// Parsed SOAP response body
#[derive(Debug, Clone)]
pub struct SoapBody {
    /// Child elements of `Envelope/Body`, as a map node
    pub body: XmlValue,
    /// Response text with namespace declarations removed
    pub xml: String,
}

impl SoapBody {
    /// Normalize the body with the given options
    pub fn normalize(&self, options: &NormalizeOptions) -> NormalizedValue {
        normalize(&self.body, options)
    }
}

/// Wrap a body fragment in a SOAP 1.2 envelope
pub fn wrap(body: &str, security: Option<&str>) -> String {
    let mut envelope = String::with_capacity(body.len() + 256);
    envelope.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    envelope.push_str(&format!(
        r#"<s:Envelope xmlns:s="{}" xmlns:a="{}" xmlns:wsse="{}" xmlns:wsu="{}">"#,
        NS_SOAP_ENV, NS_ADDRESSING, NS_WSSE, NS_WSU
    ));
    envelope.push_str("<s:Header>");
    if let Some(security) = security {
        envelope.push_str(security);
    }
    envelope.push_str("</s:Header><s:Body>");
    envelope.push_str(body);
    envelope.push_str("</s:Body></s:Envelope>");
    envelope
}

/// Parse a SOAP response, failing on malformed envelopes and SOAP faults
pub fn unwrap(raw: &str) -> Result<SoapBody> {
    let xml = xml::strip_namespace_declarations(raw);
    let tree = xml::parse(&xml).map_err(|e| match e {
        OnvifError::Protocol { message, .. } => OnvifError::Protocol {
            message,
            fault: None,
            xml: Some(xml.clone()),
        },
        other => other,
    })?;

    let body = tree
        .first("envelope")
        .and_then(|envelope| envelope.first("body"))
        .ok_or_else(|| OnvifError::protocol("malformed SOAP response", xml.clone()))?;

    if let Some(fault) = body.first("fault") {
        let fault = parse_fault(fault);
        trace!(reason = %fault.reason, "SOAP fault");
        return Err(OnvifError::fault(fault, xml));
    }

    // Self-closing <Body/> parses as empty text
    let body = match body {
        XmlValue::Text(_) => XmlValue::Map(Vec::new()),
        other => other.clone(),
    };
    Ok(SoapBody { body, xml })
}

fn parse_fault(fault: &XmlValue) -> SoapFault {
    let value = normalize(fault, &NormalizeOptions::default());

    let code = value
        .path(&["code", "value"])
        .and_then(NormalizedValue::text)
        .or_else(|| value.get("faultcode").and_then(NormalizedValue::text));
    let subcode = value
        .path(&["code", "subcode", "value"])
        .and_then(NormalizedValue::text);

    let reason = value
        .path(&["reason", "text"])
        .and_then(NormalizedValue::text)
        .or_else(|| value.get("faultstring").and_then(NormalizedValue::text))
        .unwrap_or_else(|| {
            value
                .get("code")
                .map(|code| code.to_json().to_string())
                .unwrap_or_else(|| "SOAP fault".to_string())
        });

    let detail = value
        .get("detail")
        .filter(|detail| !matches!(detail, NormalizedValue::String(s) if s.is_empty()))
        .map(|detail| {
            detail
                .get("text")
                .and_then(NormalizedValue::text)
                .unwrap_or_else(|| match detail {
                    NormalizedValue::String(s) => s.clone(),
                    other => other.to_json().to_string(),
                })
        });

    SoapFault {
        code,
        subcode,
        reason,
        detail,
    }
}

/// Escape text for use in element content or attribute values
pub fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FAULT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope" xmlns:ter="http://www.onvif.org/ver10/error">
  <env:Body>
    <env:Fault>
      <env:Code>
        <env:Value>env:Sender</env:Value>
        <env:Subcode><env:Value>ter:NotAuthorized</env:Value></env:Subcode>
      </env:Code>
      <env:Reason><env:Text xml:lang="en">Sender not Authorized</env:Text></env:Reason>
      <env:Detail><env:Text>The action requested requires authorization</env:Text></env:Detail>
    </env:Fault>
  </env:Body>
</env:Envelope>"#;

    #[test]
    fn test_wrap_without_security() {
        let envelope = wrap("<GetHostname/>", None);
        assert!(envelope.contains("<s:Header></s:Header>"));
        assert!(envelope.contains("<s:Body><GetHostname/></s:Body>"));
        assert!(envelope.contains(NS_SOAP_ENV));
    }

    #[test]
    fn test_wrap_then_unwrap_echo() {
        let body = r#"<tds:GetHostnameResponse xmlns:tds="http://www.onvif.org/ver10/device/wsdl"><tds:HostnameInformation><tt:FromDHCP>false</tt:FromDHCP><tt:Name>cam-01</tt:Name></tds:HostnameInformation></tds:GetHostnameResponse>"#;
        let echoed = wrap(body, Some("<wsse:Security/>"));
        let parsed = unwrap(&echoed).unwrap();

        let value = parsed.normalize(&NormalizeOptions::default());
        assert_eq!(
            value.to_json(),
            serde_json::json!({
                "getHostnameResponse": {
                    "hostnameInformation": {"fromDHCP": false, "name": "cam-01"}
                }
            })
        );
        assert!(!parsed.xml.contains("xmlns"));
    }

    #[test]
    fn test_fault_becomes_protocol_error() {
        let err = unwrap(FAULT).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Protocol error: Sender not Authorized: The action requested requires authorization"
        );
        let fault = err.soap_fault().unwrap();
        assert_eq!(fault.code.as_deref(), Some("env:Sender"));
        assert_eq!(fault.subcode.as_deref(), Some("ter:NotAuthorized"));
        assert!(err.mentions("sender not authorized"));
        assert!(!err.xml().unwrap().contains("xmlns"));
    }

    #[test]
    fn test_fault_without_reason_uses_code_json() {
        let xml = r#"<Envelope><Body><Fault><Code><Value>Receiver</Value></Code></Fault></Body></Envelope>"#;
        let err = unwrap(xml).unwrap_err();
        let fault = err.soap_fault().unwrap();
        assert_eq!(fault.reason, r#"{"value":"Receiver"}"#);
        assert_eq!(fault.detail, None);
    }

    #[test]
    fn test_soap11_fault_string() {
        let xml = r#"<Envelope><Body><Fault><faultcode>Client</faultcode><faultstring>Bad request</faultstring></Fault></Body></Envelope>"#;
        let err = unwrap(xml).unwrap_err();
        assert_eq!(err.to_string(), "Protocol error: Bad request");
    }

    #[test]
    fn test_missing_body_is_malformed() {
        let err = unwrap("<Envelope><Header/></Envelope>").unwrap_err();
        assert!(err.to_string().contains("malformed SOAP response"));
        assert_eq!(err.xml(), Some("<Envelope><Header/></Envelope>"));

        let err = unwrap("HTTP/1.1 garbage").unwrap_err();
        assert!(matches!(err, OnvifError::Protocol { xml: Some(_), .. }));
    }

    #[test]
    fn test_empty_body() {
        let parsed = unwrap("<Envelope><Body/></Envelope>").unwrap();
        assert_eq!(parsed.body, XmlValue::Map(Vec::new()));
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape(r#"a<b>&"c'"#), "a&lt;b&gt;&amp;&quot;c&apos;");
    }
}
