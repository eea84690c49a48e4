use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{Document, Element, Node, XmlError};

/// Parses a well-formed document.
pub fn parse(input: &str) -> Result<Document, XmlError> {
    Parser::new(input, false).run()
}

/// Parses a document, recovering from broken nesting.
///
/// A mismatched end tag closes the open elements up to its match, an end tag
/// without a match is dropped, and elements still open at the end of input
/// are closed there.
pub fn parse_lenient(input: &str) -> Result<Document, XmlError> {
    Parser::new(input, true).run()
}

struct Parser<'a> {
    reader: Reader<&'a [u8]>,
    recover: bool,
    stack: Vec<Element>,
    doctype: Option<String>,
    prolog: Vec<Node>,
    root: Option<Element>,
    epilog: Vec<Node>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, recover: bool) -> Self {
        let mut reader = Reader::from_str(input);
        let config = reader.config_mut();
        config.trim_text(false);
        config.check_end_names = !recover;

        Self {
            reader,
            recover,
            stack: Vec::new(),
            doctype: None,
            prolog: Vec::new(),
            root: None,
            epilog: Vec::new(),
        }
    }

    fn syntax(&self, message: impl Into<String>) -> XmlError {
        XmlError::Syntax {
            position: self.reader.buffer_position() as u64,
            message: message.into(),
        }
    }

    fn run(mut self) -> Result<Document, XmlError> {
        loop {
            let event = match self.reader.read_event() {
                Ok(event) => event,
                Err(e) => return Err(self.syntax(e.to_string())),
            };

            match event {
                Event::Start(start) => {
                    let el = self.element(&start)?;
                    if self.stack.is_empty() && self.root.is_some() {
                        return Err(XmlError::TrailingContent);
                    }
                    self.stack.push(el);
                }
                Event::Empty(start) => {
                    let el = self.element(&start)?;
                    self.attach(Node::Element(el))?;
                }
                Event::End(end) => {
                    let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                    self.end(&name)?;
                }
                Event::Text(text) => {
                    let value = match text.unescape() {
                        Ok(value) => value.into_owned(),
                        Err(_) if self.recover => String::from_utf8_lossy(&text).into_owned(),
                        Err(e) => return Err(self.syntax(e.to_string())),
                    };
                    self.text(Node::Text(value))?;
                }
                Event::CData(cdata) => {
                    let value = String::from_utf8_lossy(&cdata).into_owned();
                    self.text(Node::CData(value))?;
                }
                Event::Comment(comment) => {
                    let value = String::from_utf8_lossy(&comment).into_owned();
                    self.misc(Node::Comment(value));
                }
                Event::PI(pi) => {
                    let value = String::from_utf8_lossy(&pi).into_owned();
                    self.misc(Node::ProcessingInstruction(value));
                }
                Event::DocType(doctype) => {
                    self.doctype = Some(String::from_utf8_lossy(&doctype).trim().to_string());
                }
                Event::Decl(_) => {}
                Event::Eof => break,
            }
        }

        if let Some(open) = self.stack.last() {
            if !self.recover {
                return Err(XmlError::Unclosed {
                    name: open.name.clone(),
                });
            }
            while !self.stack.is_empty() {
                self.close_top()?;
            }
        }

        let root = self.root.ok_or(XmlError::NoRoot)?;
        Ok(Document {
            doctype: self.doctype,
            prolog: self.prolog,
            root,
            epilog: self.epilog,
        })
    }

    fn element(&self, start: &BytesStart<'_>) -> Result<Element, XmlError> {
        let mut el = Element::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
        for attr in start.attributes() {
            let attr = attr.map_err(|e| self.syntax(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = match attr.unescape_value() {
                Ok(value) => value.into_owned(),
                Err(_) if self.recover => String::from_utf8_lossy(&attr.value).into_owned(),
                Err(e) => return Err(self.syntax(e.to_string())),
            };
            el.attributes.push((key, value));
        }
        Ok(el)
    }

    fn end(&mut self, name: &str) -> Result<(), XmlError> {
        if !self.recover {
            if self.stack.is_empty() {
                return Err(self.syntax(format!("unexpected end tag </{}>", name)));
            }
            return self.close_top();
        }

        match self.stack.iter().rposition(|el| el.name == name) {
            Some(pos) => {
                while self.stack.len() > pos {
                    self.close_top()?;
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn close_top(&mut self) -> Result<(), XmlError> {
        match self.stack.pop() {
            Some(mut el) => {
                settle_whitespace(&mut el);
                self.attach(Node::Element(el))
            }
            None => Ok(()),
        }
    }

    fn attach(&mut self, node: Node) -> Result<(), XmlError> {
        if let Some(parent) = self.stack.last_mut() {
            parent.children.push(node);
            return Ok(());
        }
        match node {
            Node::Element(el) if self.root.is_none() => {
                self.root = Some(el);
                Ok(())
            }
            Node::Element(_) if self.recover => Ok(()),
            Node::Element(_) => Err(XmlError::TrailingContent),
            other => {
                self.misc(other);
                Ok(())
            }
        }
    }

    fn text(&mut self, node: Node) -> Result<(), XmlError> {
        if let Some(parent) = self.stack.last_mut() {
            match (&node, parent.children.last_mut()) {
                (Node::Text(t), Some(Node::Text(prev))) => prev.push_str(t),
                _ => parent.children.push(node),
            }
            return Ok(());
        }
        let blank = matches!(&node, Node::Text(t) if t.trim().is_empty());
        if blank || self.recover {
            Ok(())
        } else {
            Err(self.syntax("text outside the root element"))
        }
    }

    fn misc(&mut self, node: Node) {
        if let Some(parent) = self.stack.last_mut() {
            parent.children.push(node);
        } else if self.root.is_none() {
            self.prolog.push(node);
        } else {
            self.epilog.push(node);
        }
    }
}

/// Drops whitespace-only text from element-only content.
fn settle_whitespace(el: &mut Element) {
    let mixed = el.children.iter().any(|node| match node {
        Node::Text(t) => !t.trim().is_empty(),
        Node::CData(_) => true,
        _ => false,
    });
    if !mixed {
        el.children.retain(|node| !matches!(node, Node::Text(_)));
    }
}
