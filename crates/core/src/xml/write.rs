use quick_xml::escape::{escape, partial_escape};

use super::{Document, Element, Node};

const INDENT: &str = "  ";

pub(super) fn document(doc: &Document) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    if let Some(doctype) = &doc.doctype {
        out.push_str("<!DOCTYPE ");
        out.push_str(doctype);
        out.push_str(">\n");
    }
    for node in &doc.prolog {
        inline(&mut out, node);
        out.push('\n');
    }
    element(&mut out, &doc.root, 0);
    out.push('\n');
    for node in &doc.epilog {
        inline(&mut out, node);
        out.push('\n');
    }
    out
}

fn is_mixed(el: &Element) -> bool {
    el.children
        .iter()
        .any(|node| matches!(node, Node::Text(_) | Node::CData(_)))
}

fn open_tag(out: &mut String, el: &Element) {
    out.push('<');
    out.push_str(&el.name);
    for (key, value) in &el.attributes {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape(value.as_str()));
        out.push('"');
    }
}

fn close_tag(out: &mut String, el: &Element) {
    out.push_str("</");
    out.push_str(&el.name);
    out.push('>');
}

/// Element-only content, indented.
fn element(out: &mut String, el: &Element, depth: usize) {
    open_tag(out, el);
    if el.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');

    if is_mixed(el) {
        for child in &el.children {
            inline(out, child);
        }
    } else {
        for child in &el.children {
            out.push('\n');
            out.push_str(&INDENT.repeat(depth + 1));
            match child {
                Node::Element(child) => element(out, child, depth + 1),
                other => inline(out, other),
            }
        }
        out.push('\n');
        out.push_str(&INDENT.repeat(depth));
    }
    close_tag(out, el);
}

/// Mixed content, written exactly as held.
fn inline(out: &mut String, node: &Node) {
    match node {
        Node::Element(el) => {
            open_tag(out, el);
            if el.children.is_empty() {
                out.push_str("/>");
                return;
            }
            out.push('>');
            for child in &el.children {
                inline(out, child);
            }
            close_tag(out, el);
        }
        Node::Text(text) => out.push_str(&partial_escape(text.as_str())),
        Node::CData(text) => {
            out.push_str("<![CDATA[");
            out.push_str(text);
            out.push_str("]]>");
        }
        Node::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
        Node::ProcessingInstruction(text) => {
            out.push_str("<?");
            out.push_str(text);
            out.push_str("?>");
        }
    }
}
