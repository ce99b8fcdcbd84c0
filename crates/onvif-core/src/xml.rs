//! XML text to an element tree that keeps every child as a sequence
//!
//! The tree mirrors what a SOAP response looks like before anyone has decided
//! whether `<Profiles>` is one element or many: every child name maps to a
//! list, attributes sit under the reserved [`ATTRIBUTES_KEY`] and mixed text
//! under [`TEXT_KEY`]. Namespace prefixes are stripped and the first letter of
//! every name is lower-cased, so `<tt:VideoSourceToken>` becomes
//! `videoSourceToken`.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{OnvifError, Result};

/// Reserved key holding an element's attributes
pub const ATTRIBUTES_KEY: &str = "$";
/// Reserved key holding an element's text when it also has attributes or children
pub const TEXT_KEY: &str = "_";

/// Parsed XML node
#[derive(Debug, Clone, PartialEq)]
pub enum XmlValue {
    /// Text-only element or attribute value
    Text(String),
    /// Element with attributes and/or children, in document order
    Map(Vec<(String, XmlValue)>),
    /// All same-named children of one element
    List(Vec<XmlValue>),
}

impl XmlValue {
    /// Look up a key in a map node
    pub fn get(&self, key: &str) -> Option<&XmlValue> {
        match self {
            XmlValue::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// First child element named `key`
    pub fn first(&self, key: &str) -> Option<&XmlValue> {
        match self.get(key)? {
            XmlValue::List(items) => items.first(),
            other => Some(other),
        }
    }

    /// Text content of a text node
    pub fn as_text(&self) -> Option<&str> {
        match self {
            XmlValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Whether this is a text node containing only whitespace
    pub fn is_blank_text(&self) -> bool {
        matches!(self, XmlValue::Text(text) if text.trim().is_empty())
    }
}

/// Strip a namespace prefix and lower-case the first letter
pub fn normalize_name(raw: &str) -> String {
    let local = raw.rsplit(':').next().unwrap_or(raw);
    let mut chars = local.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn is_namespace_declaration(name: &[u8]) -> bool {
    name == b"xmlns" || name.starts_with(b"xmlns:")
}

#[derive(Default)]
struct Frame {
    name: String,
    attributes: Vec<(String, XmlValue)>,
    text: String,
    children: Vec<(String, Vec<XmlValue>)>,
}

impl Frame {
    fn open(start: &BytesStart<'_>, raw: &str) -> Result<Self> {
        let name = normalize_name(&String::from_utf8_lossy(start.name().as_ref()));
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr
                .map_err(|e| OnvifError::protocol(format!("malformed XML attribute: {}", e), raw))?;
            if is_namespace_declaration(attr.key.as_ref()) {
                continue;
            }
            let key = normalize_name(&String::from_utf8_lossy(attr.key.as_ref()));
            let value = attr
                .unescape_value()
                .map_err(|e| OnvifError::protocol(format!("malformed XML attribute: {}", e), raw))?;
            attributes.push((key, XmlValue::Text(value.into_owned())));
        }
        Ok(Self {
            name,
            attributes,
            ..Default::default()
        })
    }

    fn push_child(&mut self, name: String, value: XmlValue) {
        match self.children.iter_mut().find(|(k, _)| *k == name) {
            Some((_, values)) => values.push(value),
            None => self.children.push((name, vec![value])),
        }
    }

    fn finish(self) -> (String, XmlValue) {
        if self.attributes.is_empty() && self.children.is_empty() {
            return (self.name, XmlValue::Text(self.text));
        }

        let mut entries = Vec::with_capacity(self.children.len() + 2);
        if !self.attributes.is_empty() {
            entries.push((ATTRIBUTES_KEY.to_string(), XmlValue::Map(self.attributes)));
        }
        if !self.text.trim().is_empty() {
            entries.push((TEXT_KEY.to_string(), XmlValue::Text(self.text)));
        }
        entries.extend(
            self.children
                .into_iter()
                .map(|(name, values)| (name, XmlValue::List(values))),
        );
        (self.name, XmlValue::Map(entries))
    }
}

/// Parse XML text into an [`XmlValue`] tree.
///
/// The result is a map with a single entry for the document element.
pub fn parse(xml: &str) -> Result<XmlValue> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Frame> = vec![Frame::default()];

    loop {
        let event = reader.read_event().map_err(|e| {
            OnvifError::protocol(
                format!("malformed XML at {}: {}", reader.buffer_position(), e),
                xml,
            )
        })?;

        match event {
            Event::Start(start) => stack.push(Frame::open(&start, xml)?),
            Event::Empty(start) => {
                let (name, value) = Frame::open(&start, xml)?.finish();
                if let Some(parent) = stack.last_mut() {
                    parent.push_child(name, value);
                }
            }
            Event::End(_) => {
                if stack.len() < 2 {
                    return Err(OnvifError::protocol("unbalanced closing tag", xml));
                }
                if let Some(frame) = stack.pop() {
                    let (name, value) = frame.finish();
                    if let Some(parent) = stack.last_mut() {
                        parent.push_child(name, value);
                    }
                }
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| OnvifError::protocol(format!("malformed XML text: {}", e), xml))?;
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(OnvifError::protocol("unexpected end of XML document", xml));
    }
    let document = stack.pop().unwrap_or_default();
    if document.children.is_empty() {
        return Err(OnvifError::protocol("XML document has no root element", xml));
    }
    let entries = document
        .children
        .into_iter()
        .map(|(name, values)| (name, XmlValue::List(values)))
        .collect();
    Ok(XmlValue::Map(entries))
}

/// Remove `xmlns`/`xmlns:*` declarations from XML text.
///
/// Used for the text handed back alongside a parsed response, so callers doing
/// string matching see the same names the parser saw.
pub fn strip_namespace_declarations(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len());
    let mut rest = xml;
    let mut in_tag = false;

    while let Some(c) = rest.chars().next() {
        if in_tag && c.is_whitespace() {
            let candidate = rest.trim_start();
            if let Some(after) = candidate.strip_prefix("xmlns") {
                if after.starts_with('=') || after.starts_with(':') {
                    if let Some(skipped) = skip_attribute(after) {
                        rest = skipped;
                        continue;
                    }
                }
            }
        }
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ => {}
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Skip `[:prefix]="value"`, returning the text after the closing quote
fn skip_attribute(after_xmlns: &str) -> Option<&str> {
    let eq = after_xmlns.find('=')?;
    let value = after_xmlns[eq + 1..].trim_start();
    let quote = value.chars().next().filter(|q| *q == '"' || *q == '\'')?;
    let end = value[1..].find(quote)?;
    Some(&value[end + 2..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text(s: &str) -> XmlValue {
        XmlValue::Text(s.to_string())
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("tt:VideoSourceToken"), "videoSourceToken");
        assert_eq!(normalize_name("Envelope"), "envelope");
        assert_eq!(normalize_name("xAddr"), "xAddr");
        assert_eq!(normalize_name("OSDs"), "oSDs");
    }

    #[test]
    fn test_parse_children_as_lists() {
        let tree = parse(
            r#"<s:Body><tt:Profiles token="p1" fixed="true"><tt:Name>main</tt:Name></tt:Profiles><tt:Profiles token="p2"/></s:Body>"#,
        )
        .unwrap();

        let body = tree.first("body").unwrap();
        match body.get("profiles").unwrap() {
            XmlValue::List(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(
                    items[0],
                    XmlValue::Map(vec![
                        (
                            "$".to_string(),
                            XmlValue::Map(vec![
                                ("token".to_string(), text("p1")),
                                ("fixed".to_string(), text("true")),
                            ])
                        ),
                        ("name".to_string(), XmlValue::List(vec![text("main")])),
                    ])
                );
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn test_namespace_declarations_are_dropped() {
        let tree = parse(r#"<a:Root xmlns:a="urn:a" xmlns="urn:default"/>"#).unwrap();
        assert_eq!(tree.first("root"), Some(&text("")));
    }

    #[test]
    fn test_text_with_attributes_kept_under_text_key() {
        let tree = parse(r#"<Text xml:lang="en">Sender not Authorized</Text>"#).unwrap();
        let node = tree.first("text").unwrap();
        assert_eq!(node.first("_"), Some(&text("Sender not Authorized")));
        assert_eq!(
            node.get("$").and_then(|attrs| attrs.get("lang")),
            Some(&text("en"))
        );
    }

    #[test]
    fn test_entities_are_unescaped() {
        let tree = parse("<Uri>rtsp://h/a?b=1&amp;c=2</Uri>").unwrap();
        assert_eq!(tree.first("uri"), Some(&text("rtsp://h/a?b=1&c=2")));
    }

    #[test]
    fn test_malformed_xml_is_protocol_error() {
        let err = parse("<a><b></a>").unwrap_err();
        assert!(matches!(err, OnvifError::Protocol { .. }));
        assert!(parse("not xml at all").is_err());
    }

    #[test]
    fn test_strip_namespace_declarations() {
        let xml = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns="urn:x"><s:Body a="1">xmlns text</s:Body></s:Envelope>"#;
        assert_eq!(
            strip_namespace_declarations(xml),
            r#"<s:Envelope><s:Body a="1">xmlns text</s:Body></s:Envelope>"#
        );
    }
}
