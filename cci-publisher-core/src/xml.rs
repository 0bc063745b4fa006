//! Owned, mutable XML element tree.
//!
//! Catalog and NcML documents are small, so they are read fully into an
//! [`Element`] tree, mutated in place and written back out in one go.
//! Names are kept exactly as they appear in the source (prefix included);
//! matching helpers compare on the local part only.

use std::borrow::Cow;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

use crate::error::CatalogError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    /// Attributes in document order.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    /// Tag name without any namespace prefix.
    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    pub fn is(&self, local_name: &str) -> bool {
        self.local_name() == local_name
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set `key`, replacing the value in place if it is already present.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn remove_attr(&mut self, key: &str) -> Option<String> {
        let index = self.attributes.iter().position(|(k, _)| k == key)?;
        Some(self.attributes.remove(index).1)
    }

    /// Concatenated direct text content.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|c| match c {
                Node::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn children_named<'a>(&'a self, local_name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.elements().filter(move |e| e.is(local_name))
    }

    /// Index into `children` of the first element child with this local name.
    pub fn child_position(&self, local_name: &str) -> Option<usize> {
        self.children
            .iter()
            .position(|c| matches!(c, Node::Element(e) if e.is(local_name)))
    }

    pub fn child_mut(&mut self, index: usize) -> Option<&mut Element> {
        match self.children.get_mut(index) {
            Some(Node::Element(e)) => Some(e),
            _ => None,
        }
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    pub fn insert(&mut self, index: usize, child: Element) {
        let index = index.min(self.children.len());
        self.children.insert(index, Node::Element(child));
    }

    /// Drop every element child matching `predicate`, returning how many went.
    pub fn remove_elements_where(&mut self, mut predicate: impl FnMut(&Element) -> bool) -> usize {
        let before = self.children.len();
        self.children
            .retain(|c| !matches!(c, Node::Element(e) if predicate(e)));
        before - self.children.len()
    }

    /// Parse a document and return its root element.
    pub fn parse(xml: &str) -> Result<Self, CatalogError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| CatalogError::Parse(e.to_string()))?;
            match event {
                Event::Start(start) => stack.push(element_from_start(&start)?),
                Event::Empty(start) => {
                    let element = element_from_start(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| CatalogError::Parse("unbalanced end tag".to_string()))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = text
                            .unescape()
                            .map_err(|e| CatalogError::Parse(e.to_string()))?;
                        if !text.is_empty() {
                            parent.children.push(Node::Text(text.into_owned()));
                        }
                    }
                }
                Event::CData(data) => {
                    if let Some(parent) = stack.last_mut() {
                        parent
                            .children
                            .push(Node::Text(String::from_utf8_lossy(&data).into_owned()));
                    }
                }
                Event::Comment(comment) => {
                    if let Some(parent) = stack.last_mut() {
                        parent
                            .children
                            .push(Node::Comment(String::from_utf8_lossy(&comment).into_owned()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(CatalogError::Parse("unexpected end of document".to_string()));
        }
        root.ok_or_else(|| CatalogError::Parse("document has no root element".to_string()))
    }

    /// Serialize as a standalone UTF-8 document, indented by two spaces.
    pub fn to_xml(&self) -> Result<String, CatalogError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(|e| CatalogError::Write(e.to_string()))?;
        write_element(&mut writer, self)?;
        let mut out = String::from_utf8(writer.into_inner())
            .map_err(|e| CatalogError::Write(e.to_string()))?;
        out.push('\n');
        Ok(out)
    }
}

fn local_part(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element, CatalogError> {
    let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attr in start.attributes() {
        let attr = attr.map_err(|e| CatalogError::Parse(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value: Cow<'_, str> = attr
            .unescape_value()
            .map_err(|e| CatalogError::Parse(e.to_string()))?;
        element.attributes.push((key, value.into_owned()));
    }
    Ok(element)
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), CatalogError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(Node::Element(element));
        Ok(())
    } else if root.is_none() {
        *root = Some(element);
        Ok(())
    } else {
        Err(CatalogError::Parse("more than one root element".to_string()))
    }
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<(), CatalogError> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        return writer
            .write_event(Event::Empty(start))
            .map(|_| ())
            .map_err(|e| CatalogError::Write(e.to_string()));
    }

    writer
        .write_event(Event::Start(start))
        .map_err(|e| CatalogError::Write(e.to_string()))?;
    for child in &element.children {
        match child {
            Node::Element(e) => write_element(writer, e)?,
            Node::Text(t) => writer
                .write_event(Event::Text(BytesText::new(t)))
                .map(|_| ())
                .map_err(|e| CatalogError::Write(e.to_string()))?,
            Node::Comment(c) => writer
                .write_event(Event::Comment(BytesText::from_escaped(c.as_str())))
                .map(|_| ())
                .map_err(|e| CatalogError::Write(e.to_string()))?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map(|_| ())
        .map_err(|e| CatalogError::Write(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_attribute_order_and_text() {
        let doc = r#"<?xml version="1.0"?>
<catalog xmlns="urn:x" name="c">
  <!-- note -->
  <dataset ID="a" name="b">
    <dataType>Grid</dataType>
  </dataset>
</catalog>"#;
        let root = Element::parse(doc).expect("parse");
        assert_eq!(root.name, "catalog");
        assert_eq!(root.attributes[0].0, "xmlns");
        let ds = root.children_named("dataset").next().expect("dataset");
        assert_eq!(ds.attr("ID"), Some("a"));
        assert_eq!(
            ds.children_named("dataType").next().map(|e| e.text()),
            Some("Grid".to_string())
        );
        assert!(matches!(root.children[0], Node::Comment(_)));
    }

    #[test]
    fn test_local_name_ignores_prefix() {
        let e = Element::new("thredds:dataset");
        assert!(e.is("dataset"));
        assert_eq!(e.local_name(), "dataset");
    }

    #[test]
    fn test_escaping_survives_write_and_read() {
        let e = Element::new("property")
            .with_attr("value", "a?b=1&c=\"2\"")
            .with_text("x < y");
        let xml = e.to_xml().expect("write");
        let back = Element::parse(&xml).expect("parse");
        assert_eq!(back.attr("value"), Some("a?b=1&c=\"2\""));
        assert_eq!(back.text(), "x < y");
    }

    #[test]
    fn test_parse_rejects_truncated_document() {
        assert!(Element::parse("<catalog><dataset>").is_err());
        assert!(Element::parse("").is_err());
    }
}
