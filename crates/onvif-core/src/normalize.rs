//! XML tree to native values
//!
//! Turns the list-everywhere [`XmlValue`] tree into something a caller can
//! navigate: single-element lists collapse, attributes merge into their
//! element, and text is sniffed for booleans, numbers and UTC timestamps.
//!
//! ```rust
//! use onvif_core::normalize::{normalize, NormalizeOptions, NormalizedValue};
//! use onvif_core::xml;
//!
//! let tree = xml::parse(r#"<Profiles token="main"><Fixed>true</Fixed></Profiles>"#).unwrap();
//! let value = normalize(&tree, &NormalizeOptions::default());
//! let profile = value.get("profiles").unwrap();
//! assert_eq!(profile.get("token").and_then(|v| v.as_str()), Some("main"));
//! assert_eq!(profile.get("fixed").and_then(|v| v.as_bool()), Some(true));
//! ```

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::xml::{XmlValue, ATTRIBUTES_KEY, TEXT_KEY};

/// Largest integer that survives an f64 round trip
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Normalized response value
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedValue {
    Bool(bool),
    Number(f64),
    DateTime(DateTime<Utc>),
    String(String),
    Object(BTreeMap<String, NormalizedValue>),
    List(Vec<NormalizedValue>),
}

/// Per-call normalization settings
#[derive(Debug, Clone, Default)]
pub struct NormalizeOptions {
    always_array: HashSet<String>,
}

impl NormalizeOptions {
    /// Options that keep the given field names as lists even with one member
    pub fn with_arrays<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            always_array: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Add one always-array field name
    pub fn array(mut self, name: impl Into<String>) -> Self {
        self.always_array.insert(name.into());
        self
    }

    fn is_array(&self, key: Option<&str>) -> bool {
        key.map(|k| self.always_array.contains(k)).unwrap_or(false)
    }
}

/// Normalize a parsed XML tree
pub fn normalize(value: &XmlValue, options: &NormalizeOptions) -> NormalizedValue {
    normalize_with_key(value, None, options)
}

fn normalize_with_key(
    value: &XmlValue,
    key: Option<&str>,
    options: &NormalizeOptions,
) -> NormalizedValue {
    match value {
        XmlValue::List(items) => {
            let kept: Vec<&XmlValue> = items.iter().filter(|item| !item.is_blank_text()).collect();
            let as_array = options.is_array(key);
            match kept.as_slice() {
                [single] if !as_array => normalize_with_key(single, key, options),
                [] if !as_array => NormalizedValue::String(String::new()),
                _ => NormalizedValue::List(
                    kept.into_iter()
                        .map(|item| normalize_with_key(item, key, options))
                        .collect(),
                ),
            }
        }
        XmlValue::Map(entries) => {
            let mut object = BTreeMap::new();
            for (name, child) in entries {
                if name == ATTRIBUTES_KEY {
                    if let NormalizedValue::Object(attributes) =
                        normalize_with_key(child, None, options)
                    {
                        object.extend(attributes);
                    }
                } else {
                    object.insert(name.clone(), normalize_with_key(child, Some(name), options));
                }
            }
            NormalizedValue::Object(object)
        }
        XmlValue::Text(text) => coerce_scalar(text),
    }
}

/// Sniff a text value for a boolean, number or UTC timestamp
pub fn coerce_scalar(text: &str) -> NormalizedValue {
    match text {
        "true" => return NormalizedValue::Bool(true),
        "false" => return NormalizedValue::Bool(false),
        _ => {}
    }
    if is_strict_number(text) {
        if let Ok(number) = text.parse::<f64>() {
            return NormalizedValue::Number(number);
        }
    }
    if let Some(date) = parse_utc_datetime(text) {
        return NormalizedValue::DateTime(date);
    }
    NormalizedValue::String(text.to_string())
}

/// Decimal number with no ambiguous leading zeros.
///
/// The integer part is `0`, `[1-9][0-9]*`, or a single `0` followed by
/// `[1-9][0-9]*` when a fractional part follows. Zero-padded identifiers such
/// as `"012"` or `"000"` stay strings.
pub fn is_strict_number(text: &str) -> bool {
    let unsigned = text.strip_prefix('-').unwrap_or(text);
    let (int_part, fraction) = match unsigned.split_once('.') {
        Some((int_part, fraction)) => (int_part, Some(fraction)),
        None => (unsigned, None),
    };

    if let Some(fraction) = fraction {
        if fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
    }
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    match int_part.as_bytes() {
        [b'0'] => true,
        [b'0', second, ..] => fraction.is_some() && *second != b'0',
        _ => true,
    }
}

/// Parse `YYYY-MM-DDTHH:MM:SS[.fff]Z`
pub fn parse_utc_datetime(text: &str) -> Option<DateTime<Utc>> {
    let bytes = text.as_bytes();
    if bytes.len() < 20 || bytes[bytes.len() - 1] != b'Z' {
        return None;
    }
    let shape_ok = bytes[..19].iter().enumerate().all(|(i, b)| match i {
        4 | 7 => *b == b'-',
        10 => *b == b'T',
        13 | 16 => *b == b':',
        _ => b.is_ascii_digit(),
    });
    if !shape_ok {
        return None;
    }
    if bytes.len() > 20 {
        let fraction = &bytes[19..bytes.len() - 1];
        if fraction[0] != b'.' || fraction.len() < 2 || !fraction[1..].iter().all(u8::is_ascii_digit)
        {
            return None;
        }
    }

    NaiveDateTime::parse_from_str(&text[..text.len() - 1], "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn format_number(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() <= MAX_SAFE_INTEGER {
        format!("{}", number as i64)
    } else {
        number.to_string()
    }
}

impl NormalizedValue {
    /// Look up a key in an object
    pub fn get(&self, key: &str) -> Option<&NormalizedValue> {
        match self {
            NormalizedValue::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Follow a chain of keys, taking the first member whenever a list is met
    pub fn path(&self, keys: &[&str]) -> Option<&NormalizedValue> {
        let mut current = self;
        for key in keys {
            current = current.first_item()?.get(key)?;
        }
        Some(current)
    }

    /// Members of a list, or the value itself as a one-element slice
    pub fn items(&self) -> &[NormalizedValue] {
        match self {
            NormalizedValue::List(items) => items,
            other => std::slice::from_ref(other),
        }
    }

    fn first_item(&self) -> Option<&NormalizedValue> {
        self.items().first()
    }

    /// String content, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            NormalizedValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric content; numeric-looking strings are parsed too
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            NormalizedValue::Number(n) => Some(*n),
            NormalizedValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean content
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            NormalizedValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Timestamp content
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            NormalizedValue::DateTime(d) => Some(*d),
            _ => None,
        }
    }

    /// Scalar rendered back to text.
    ///
    /// Objects yield the text stored under the `_` key, if any. Lists yield
    /// the text of their first member.
    pub fn text(&self) -> Option<String> {
        match self {
            NormalizedValue::String(s) => Some(s.clone()),
            NormalizedValue::Number(n) => Some(format_number(*n)),
            NormalizedValue::Bool(b) => Some(b.to_string()),
            NormalizedValue::DateTime(d) => Some(d.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            NormalizedValue::Object(map) => map.get(TEXT_KEY).and_then(|v| v.text()),
            NormalizedValue::List(items) => items.first().and_then(|v| v.text()),
        }
    }

    /// Convert to a JSON value; integral numbers become JSON integers
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            NormalizedValue::Bool(b) => serde_json::Value::Bool(*b),
            NormalizedValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
                    serde_json::json!(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            NormalizedValue::DateTime(d) => {
                serde_json::Value::String(d.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            NormalizedValue::String(s) => serde_json::Value::String(s.clone()),
            NormalizedValue::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            NormalizedValue::List(items) => {
                serde_json::Value::Array(items.iter().map(NormalizedValue::to_json).collect())
            }
        }
    }
}

impl Serialize for NormalizedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            NormalizedValue::Bool(b) => serializer.serialize_bool(*b),
            NormalizedValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            NormalizedValue::DateTime(d) => {
                serializer.serialize_str(&d.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            NormalizedValue::String(s) => serializer.serialize_str(s),
            NormalizedValue::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
            NormalizedValue::List(items) => {
                let mut out = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    out.serialize_element(item)?;
                }
                out.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn num(n: f64) -> NormalizedValue {
        NormalizedValue::Number(n)
    }

    fn string(s: &str) -> NormalizedValue {
        NormalizedValue::String(s.to_string())
    }

    #[test]
    fn test_strict_numbers() {
        assert_eq!(coerce_scalar("034.23"), num(34.23));
        assert_eq!(coerce_scalar("0.34"), num(0.34));
        assert_eq!(coerce_scalar("-0.34"), num(-0.34));
        assert_eq!(coerce_scalar("-12"), num(-12.0));
        assert_eq!(coerce_scalar("0"), num(0.0));
        assert_eq!(coerce_scalar("1920"), num(1920.0));
    }

    #[test]
    fn test_leading_zeros_stay_strings() {
        assert_eq!(coerce_scalar("00.34"), string("00.34"));
        assert_eq!(coerce_scalar("000"), string("000"));
        assert_eq!(coerce_scalar("012"), string("012"));
        assert_eq!(coerce_scalar("-012"), string("-012"));
        assert_eq!(coerce_scalar("1."), string("1."));
        assert_eq!(coerce_scalar("1e5"), string("1e5"));
        assert_eq!(coerce_scalar(""), string(""));
    }

    #[test]
    fn test_booleans() {
        assert_eq!(coerce_scalar("true"), NormalizedValue::Bool(true));
        assert_eq!(coerce_scalar("false"), NormalizedValue::Bool(false));
        assert_eq!(coerce_scalar("True"), string("True"));
    }

    #[test]
    fn test_dates() {
        let expected = Utc.with_ymd_and_hms(2015, 1, 20, 16, 33, 3).unwrap();
        assert_eq!(
            coerce_scalar("2015-01-20T16:33:03Z"),
            NormalizedValue::DateTime(expected)
        );

        let fractional = coerce_scalar("2015-01-20T16:33:03.250Z");
        assert_eq!(
            fractional.as_datetime().map(|d| d.timestamp_millis()),
            Some(expected.timestamp_millis() + 250)
        );

        assert_eq!(
            coerce_scalar("2015-01-20T16:33:03+01:00"),
            string("2015-01-20T16:33:03+01:00")
        );
        assert_eq!(coerce_scalar("2015-01-20"), string("2015-01-20"));
    }

    #[test]
    fn test_single_child_collapses() {
        let tree = xml::parse("<Response><Name>cam</Name><Port>80</Port></Response>").unwrap();
        let value = normalize(&tree, &NormalizeOptions::default());
        let response = value.get("response").unwrap();
        assert_eq!(response.get("name"), Some(&string("cam")));
        assert_eq!(response.get("port"), Some(&num(80.0)));
    }

    #[test]
    fn test_multiple_children_stay_ordered() {
        let tree = xml::parse("<R><P>3</P><P>1</P><P>2</P></R>").unwrap();
        let value = normalize(&tree, &NormalizeOptions::default());
        assert_eq!(
            value.path(&["r", "p"]),
            Some(&NormalizedValue::List(vec![num(3.0), num(1.0), num(2.0)]))
        );
    }

    #[test]
    fn test_always_array_keeps_single_member_as_list() {
        let tree = xml::parse(r#"<R><Profiles token="a"/></R>"#).unwrap();
        let value = normalize(&tree, &NormalizeOptions::with_arrays(["profiles"]));
        let profiles = value.path(&["r", "profiles"]).unwrap();
        match profiles {
            NormalizedValue::List(items) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].get("token"), Some(&string("a")));
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn test_whitespace_members_are_dropped() {
        let tree = XmlValue::Map(vec![(
            "name".to_string(),
            XmlValue::List(vec![
                XmlValue::Text("  \n ".to_string()),
                XmlValue::Text("cam".to_string()),
            ]),
        )]);
        let value = normalize(&tree, &NormalizeOptions::default());
        assert_eq!(value.get("name"), Some(&string("cam")));
    }

    #[test]
    fn test_attributes_merge_into_element() {
        let tree = xml::parse(
            r#"<Resolution width="1920" height="1080"><Encoding>H264</Encoding></Resolution>"#,
        )
        .unwrap();
        let value = normalize(&tree, &NormalizeOptions::default());
        let resolution = value.get("resolution").unwrap();
        assert_eq!(resolution.get("width"), Some(&num(1920.0)));
        assert_eq!(resolution.get("height"), Some(&num(1080.0)));
        assert_eq!(resolution.get("encoding"), Some(&string("H264")));
        assert_eq!(resolution.get("$"), None);
    }

    #[test]
    fn test_child_element_wins_attribute_collision() {
        let tree = xml::parse(r#"<Item name="attr"><Name>element</Name></Item>"#).unwrap();
        let value = normalize(&tree, &NormalizeOptions::default());
        assert_eq!(value.path(&["item", "name"]), Some(&string("element")));
    }

    #[test]
    fn test_text_accessor() {
        assert_eq!(num(80.0).text().as_deref(), Some("80"));
        assert_eq!(num(0.5).text().as_deref(), Some("0.5"));
        let tree = xml::parse(r#"<Text lang="en">Reason</Text>"#).unwrap();
        let value = normalize(&tree, &NormalizeOptions::default());
        assert_eq!(value.get("text").and_then(|t| t.text()).as_deref(), Some("Reason"));
    }

    #[test]
    fn test_to_json_uses_integers() {
        let tree = xml::parse(r#"<R w="640"><Q>0.5</Q><Id>007</Id></R>"#).unwrap();
        let value = normalize(&tree, &NormalizeOptions::default());
        assert_eq!(
            value.to_json(),
            serde_json::json!({"r": {"w": 640, "q": 0.5, "id": "007"}})
        );
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            serde_json::json!({"r": {"w": 640, "q": 0.5, "id": "007"}})
        );
    }
}
