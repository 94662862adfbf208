//! XML trees from the MSE and their flattened form.
//!
//! PepTalk bodies are XML subtrees. [`parse_xml`] reads them into an
//! [`XmlElement`], [`flatten_entry`] turns an element into an ordered
//! key/value map, and [`entry_to_xml`] goes the other way, producing the
//! `<entry name="...">` nesting the MSE uses for data.

use crate::error::MseError;
use indexmap::IndexMap;
use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;

/// A parsed XML element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: IndexMap<String, String>,
    /// Concatenated non-whitespace text content.
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(child);
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// First direct child whose `name` attribute is `name`.
    pub fn child_named(&self, name: &str) -> Option<&XmlElement> {
        self.children
            .iter()
            .find(|c| c.attribute("name") == Some(name))
    }

    /// Every element in this subtree (this one included) with the given tag,
    /// in document order.
    pub fn descendants<'a>(&'a self, tag: &str) -> Vec<&'a XmlElement> {
        let mut out = Vec::new();
        self.collect(tag, &mut out);
        out
    }

    fn collect<'a>(&'a self, tag: &str, out: &mut Vec<&'a XmlElement>) {
        if self.name == tag {
            out.push(self);
        }
        for child in &self.children {
            child.collect(tag, out);
        }
    }
}

/// A flattened value: text, or a nested entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FlatValue {
    Text(String),
    Entry(FlatEntry),
}

impl FlatValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FlatValue::Text(s) => Some(s),
            FlatValue::Entry(_) => None,
        }
    }

    pub fn as_entry(&self) -> Option<&FlatEntry> {
        match self {
            FlatValue::Entry(e) => Some(e),
            FlatValue::Text(_) => None,
        }
    }
}

/// Ordered key/value view of an element.
pub type FlatEntry = IndexMap<String, FlatValue>;

/// Parses the first element of `input`.
pub fn parse_xml(input: &str) -> Result<XmlElement, MseError> {
    let mut reader = Reader::from_str(input);
    let mut stack: Vec<XmlElement> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(start_element(&start)?),
            Event::Empty(start) => {
                let element = start_element(&start)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Ok(element),
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| MseError::Xml("unbalanced end tag".into()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Ok(element),
                }
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    let text = text.unescape()?;
                    if !text.trim().is_empty() {
                        current.text.push_str(&text);
                    }
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::Eof => {
                return Err(MseError::Xml(if stack.is_empty() {
                    "no element found".into()
                } else {
                    "unexpected end of document".into()
                }))
            }
            _ => {}
        }
    }
}

fn start_element(start: &BytesStart<'_>) -> Result<XmlElement, MseError> {
    let mut element = XmlElement::new(String::from_utf8_lossy(start.name().as_ref()));
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| MseError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value()?.into_owned();
        element.attributes.insert(key, value);
    }
    Ok(element)
}

/// Serializes an element: attributes in order, empty elements self-closed,
/// no added whitespace.
pub fn build_xml(element: &XmlElement) -> String {
    let mut out = String::new();
    write_element(element, &mut out);
    out
}

fn write_element(element: &XmlElement, out: &mut String) {
    out.push('<');
    out.push_str(&element.name);
    for (key, value) in &element.attributes {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape(value.as_str()));
        out.push('"');
    }
    if element.text.is_empty() && element.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    out.push_str(&partial_escape(element.text.as_str()));
    for child in &element.children {
        write_element(child, out);
    }
    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}

/// Flattens an element into an ordered map.
///
/// Attributes become text keys and text content becomes `value`. Each child
/// is keyed by its `name` attribute (else its tag); a child carrying nothing
/// but a name and text collapses to text. Repeated keys are suffixed `#2`,
/// `#3` and so on, the way the MSE names unnamed siblings.
pub fn flatten_entry(element: &XmlElement) -> FlatEntry {
    let mut entry = FlatEntry::new();
    for (key, value) in &element.attributes {
        entry.insert(key.clone(), FlatValue::Text(value.clone()));
    }
    if !element.text.trim().is_empty() {
        entry.insert("value".to_string(), FlatValue::Text(element.text.clone()));
    }

    for child in &element.children {
        let key = child.attribute("name").unwrap_or(&child.name);
        let is_leaf = child.children.is_empty()
            && child.attributes.keys().all(|k| k == "name");
        let value = if is_leaf {
            FlatValue::Text(child.text.clone())
        } else {
            FlatValue::Entry(flatten_entry(child))
        };
        let key = unique_key(&entry, key);
        entry.insert(key, value);
    }
    entry
}

fn unique_key(entry: &FlatEntry, key: &str) -> String {
    if !entry.contains_key(key) {
        return key.to_string();
    }
    (2..)
        .map(|n| format!("{}#{}", key, n))
        .find(|candidate| !entry.contains_key(candidate))
        .unwrap_or_else(|| key.to_string())
}

/// Rebuilds an `<entry>` tree from a flattened map.
pub fn entry_to_xml(entry: &FlatEntry) -> XmlElement {
    let mut element = XmlElement::new("entry");
    for (key, value) in entry {
        match (key.as_str(), value) {
            ("name", FlatValue::Text(name)) => {
                element.attributes.insert("name".to_string(), name.clone());
            }
            ("value", FlatValue::Text(text)) => element.text = text.clone(),
            (key, FlatValue::Text(text)) => element.children.push(
                XmlElement::new("entry")
                    .with_attribute("name", key)
                    .with_text(text.clone()),
            ),
            (key, FlatValue::Entry(sub)) => {
                let mut child = entry_to_xml(sub);
                if !child.attributes.contains_key("name") {
                    child
                        .attributes
                        .shift_insert(0, "name".to_string(), key.to_string());
                }
                element.children.push(child);
            }
        }
    }
    element
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attributes_text_children() {
        let el = parse_xml(
            "<?xml version=\"1.0\"?>\n<entry name=\"a\" kind=\"x &amp; y\">\n  <entry name=\"b\">1 &lt; 2</entry>\n  <ref/>\n</entry>",
        )
        .unwrap();
        assert_eq!(el.name, "entry");
        assert_eq!(el.attribute("kind"), Some("x & y"));
        assert_eq!(el.text, "");
        assert_eq!(el.children.len(), 2);
        assert_eq!(el.children[0].text, "1 < 2");
        assert_eq!(el.children[1].name, "ref");
        assert!(el.child_named("b").is_some());
    }

    #[test]
    fn test_parse_rejects_truncated_document() {
        assert!(matches!(parse_xml("<entry><a>"), Err(MseError::Xml(_))));
        assert!(matches!(parse_xml("   "), Err(MseError::Xml(_))));
    }

    #[test]
    fn test_build_escapes_and_self_closes() {
        let el = XmlElement::new("entry")
            .with_attribute("name", "a\"b")
            .with_child(XmlElement::new("entry").with_text("x<y"))
            .with_child(XmlElement::new("elements"));
        assert_eq!(
            build_xml(&el),
            "<entry name=\"a&quot;b\"><entry>x&lt;y</entry><elements/></entry>"
        );
    }

    #[test]
    fn test_flatten_rules() {
        let el = parse_xml(
            "<element name=\"e1\" guid=\"g\"><ref name=\"master_template\">/t</ref><entry name=\"data\"><entry name=\"1\">one</entry></entry><entry name=\"x\">a</entry><entry name=\"x\">b</entry><entry name=\"x\">c</entry></element>",
        )
        .unwrap();
        let flat = flatten_entry(&el);

        let keys: Vec<&str> = flat.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["name", "guid", "master_template", "data", "x", "x#2", "x#3"]
        );
        assert_eq!(flat["master_template"].as_text(), Some("/t"));
        assert_eq!(flat["x#3"].as_text(), Some("c"));
        let data = flat["data"].as_entry().unwrap();
        assert_eq!(data["1"].as_text(), Some("one"));
    }

    #[test]
    fn test_flatten_keeps_attributed_leaf_as_entry() {
        let el = parse_xml(
            "<elements><ref name=\"3\" viz_program=\"FULL1\">/external/pilotdb/elements/42</ref></elements>",
        )
        .unwrap();
        let flat = flatten_entry(&el);
        let r = flat["3"].as_entry().unwrap();
        assert_eq!(r["viz_program"].as_text(), Some("FULL1"));
        assert_eq!(r["value"].as_text(), Some("/external/pilotdb/elements/42"));
    }

    #[test]
    fn test_round_trip_entry_trees() {
        let samples = [
            "<entry name=\"a\"/>",
            "<entry name=\"a\">text</entry>",
            "<entry name=\"data\"><entry name=\"1\">one</entry><entry name=\"2\"/><entry name=\"nested\"><entry name=\"deep\">x &amp; y</entry></entry></entry>",
            "<entry name=\"model\"><entry name=\"schema\"><entry name=\"field\">&lt;fielddef/&gt;</entry></entry></entry>",
        ];
        for sample in samples {
            let flat = flatten_entry(&parse_xml(sample).unwrap());
            assert_eq!(build_xml(&entry_to_xml(&flat)), sample);
        }
    }

    #[test]
    fn test_entry_to_xml_names_unnamed_sub_entries() {
        let mut inner = FlatEntry::new();
        inner.insert("k".into(), FlatValue::Text("v".into()));
        let mut outer = FlatEntry::new();
        outer.insert("sub".into(), FlatValue::Entry(inner));
        assert_eq!(
            build_xml(&entry_to_xml(&outer)),
            "<entry><entry name=\"sub\"><entry name=\"k\">v</entry></entry></entry>"
        );
    }
}
