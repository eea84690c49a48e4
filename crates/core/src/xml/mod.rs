//! Owned XML tree used by every stage that edits documents.
//!
//! Parsing goes through quick-xml's event reader; the tree keeps qualified
//! names as written and all lookups match on local names, so `mets:file`,
//! `ns3:file` and `file` are the same step. Serialization is deterministic:
//! element-only content is indented by two spaces, mixed content is written
//! verbatim. Whitespace-only text in element-only content is dropped while
//! parsing, which makes `parse(write(doc)) == doc`.

mod parse;
mod path;
mod write;

pub use parse::{parse, parse_lenient};

use path::Step;
use thiserror::Error;

pub const TEI_NS: &str = "http://www.tei-c.org/ns/1.0";
pub const XML_ID: &str = "xml:id";

/// XML errors.
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("XML syntax error at byte {position}: {message}")]
    Syntax { position: u64, message: String },

    #[error("Unclosed element <{name}> at end of input")]
    Unclosed { name: String },

    #[error("Document has no root element")]
    NoRoot,

    #[error("Content found after the root element")]
    TrailingContent,
}

/// A node in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction(String),
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }
}

/// An element with attributes in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

/// A parsed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub doctype: Option<String>,
    /// Comments and processing instructions before the root.
    pub prolog: Vec<Node>,
    pub root: Element,
    /// Comments and processing instructions after the root.
    pub epilog: Vec<Node>,
}

impl Document {
    pub fn new(root: Element) -> Self {
        Self {
            doctype: None,
            prolog: Vec::new(),
            root,
            epilog: Vec::new(),
        }
    }

    /// Serializes with an XML declaration and a trailing newline.
    pub fn to_xml(&self) -> String {
        write::document(self)
    }
}

/// Local part of a qualified name.
pub fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder: adds an attribute.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Builder: sets the text content.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.set_text(text);
        self
    }

    /// Builder: appends a child element.
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    pub fn is(&self, local: &str) -> bool {
        self.local_name() == local
    }

    /// Attribute by qualified name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Attribute by local name, whatever its prefix (`xlink:href`, `ns2:href`).
    pub fn attr_local(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| local_name(key) == local)
            .map(|(_, value)| value.as_str())
    }

    /// Sets an attribute, keeping its position if it exists. Returns true on change.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) if *existing == value => false,
            Some((_, existing)) => {
                *existing = value;
                true
            }
            None => {
                self.attributes.push((name, value));
                true
            }
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let pos = self.attributes.iter().position(|(key, _)| key == name)?;
        Some(self.attributes.remove(pos).1)
    }

    /// Child elements.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(Node::as_element_mut)
    }

    /// First child element with the given local name.
    pub fn child(&self, local: &str) -> Option<&Element> {
        self.elements().find(|el| el.is(local))
    }

    pub fn child_mut(&mut self, local: &str) -> Option<&mut Element> {
        self.elements_mut().find(|el| el.is(local))
    }

    /// Index in `children` of the first child element with the given local name.
    pub fn child_position(&self, local: &str) -> Option<usize> {
        self.children
            .iter()
            .position(|node| node.as_element().map(|el| el.is(local)).unwrap_or(false))
    }

    /// All descendant elements in document order (excluding self).
    pub fn descendants(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        for child in self.elements() {
            out.push(child);
            out.extend(child.descendants());
        }
        out
    }

    /// Concatenated text of all descendant text and CDATA nodes.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(t) | Node::CData(t) => out.push_str(t),
                Node::Element(el) => el.collect_text(out),
                _ => {}
            }
        }
    }

    /// Replaces all children with a single text node (none when empty).
    pub fn set_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.children.clear();
        if !text.is_empty() {
            self.children.push(Node::Text(text));
        }
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Applies `f` to this element and every descendant, parents first.
    pub fn visit_mut<F: FnMut(&mut Element)>(&mut self, f: &mut F) {
        f(self);
        for child in self.elements_mut() {
            child.visit_mut(f);
        }
    }

    /// First element matching a path such as `teiHeader//title[@type='main']`.
    ///
    /// Steps are separated by `/`; an empty step (`//`) searches descendants
    /// for the following step. Predicates compare attributes by exact value.
    pub fn find(&self, path: &str) -> Option<&Element> {
        let steps = path::parse(path);
        let index = path::locate(self, &steps)?;
        self.at(&index)
    }

    pub fn find_mut(&mut self, path: &str) -> Option<&mut Element> {
        let steps = path::parse(path);
        let index = path::locate(self, &steps)?;
        self.at_mut(&index)
    }

    /// All elements matching a path, in document order.
    pub fn find_all(&self, path: &str) -> Vec<&Element> {
        let steps = path::parse(path);
        path::locate_all(self, &steps)
            .iter()
            .filter_map(|index| self.at(index))
            .collect()
    }

    /// Text of the first match, trimmed.
    pub fn find_text(&self, path: &str) -> Option<String> {
        self.find(path).map(|el| el.text().trim().to_string())
    }

    /// Whether this element matches a single path step such as `title[@type='main']`.
    pub fn matches(&self, step: &str) -> bool {
        path::parse(step)
            .first()
            .map(|s: &Step| s.matches(self))
            .unwrap_or(false)
    }

    /// Element at a path of child indices into `children`.
    pub fn at(&self, index: &[usize]) -> Option<&Element> {
        let mut current = self;
        for &i in index {
            current = current.children.get(i)?.as_element()?;
        }
        Some(current)
    }

    pub fn at_mut(&mut self, index: &[usize]) -> Option<&mut Element> {
        let mut current = self;
        for &i in index {
            current = current.children.get_mut(i)?.as_element_mut()?;
        }
        Some(current)
    }

    /// Index paths of all matches, usable with [`Element::at_mut`].
    pub fn locate_all(&self, path: &str) -> Vec<Vec<usize>> {
        path::locate_all(self, &path::parse(path))
    }
}
