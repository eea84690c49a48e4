//! Text-level repairs applied before any parsing.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex_lite::Regex;

use super::entities::{html_code_point, PREDEFINED};

const BOM: &[u8] = b"\xEF\xBB\xBF";

static ENCODING_DECL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"encoding\s*=\s*["'][^"']*["']"#).unwrap());

/// Decodes raw bytes, dropping a UTF-8 BOM and falling back to ISO-8859-1.
///
/// Returns the text and whether the Latin-1 fallback was used.
pub fn decode(bytes: &[u8]) -> (Cow<'_, str>, bool) {
    let bytes = bytes.strip_prefix(BOM).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => (Cow::Borrowed(text), false),
        Err(_) => (Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect()), true),
    }
}

/// Rewrites the encoding named by the XML declaration to UTF-8.
pub fn declare_utf8(text: &str) -> Cow<'_, str> {
    let Some(end) = text.strip_prefix("<?xml").and(text.find("?>")) else {
        return Cow::Borrowed(text);
    };
    let decl = &text[..end];
    match ENCODING_DECL.find(decl) {
        Some(m) if &decl[m.start()..m.end()] != "encoding=\"UTF-8\"" => Cow::Owned(format!(
            "{}encoding=\"UTF-8\"{}",
            &text[..m.start()],
            &text[m.end()..]
        )),
        _ => Cow::Borrowed(text),
    }
}

fn is_forbidden_control(c: char) -> bool {
    c < '\u{20}' && !matches!(c, '\t' | '\n' | '\r')
}

/// Fixes control characters and entity references outside CDATA and comments.
pub fn repair_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while !rest.is_empty() {
        if let Some(verbatim) = protected_section(rest) {
            out.push_str(verbatim);
            rest = &rest[verbatim.len()..];
            continue;
        }

        let mut chars = rest.chars();
        let Some(c) = chars.next() else { break };
        if c == '&' {
            let consumed = reference(rest, &mut out);
            rest = &rest[consumed..];
            continue;
        }
        if !is_forbidden_control(c) {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

/// A CDATA section or comment at the start of `text`, copied as is.
/// Unterminated sections run to the end of input.
fn protected_section(text: &str) -> Option<&str> {
    let (open, close) = if text.starts_with("<!--") {
        ("<!--", "-->")
    } else if text.starts_with("<![CDATA[") {
        ("<![CDATA[", "]]>")
    } else {
        return None;
    };
    let end = text[open.len()..]
        .find(close)
        .map(|i| open.len() + i + close.len())
        .unwrap_or(text.len());
    Some(&text[..end])
}

/// Handles the `&` at the start of `text`, returning the bytes consumed.
fn reference(text: &str, out: &mut String) -> usize {
    let body = &text[1..];
    let Some(semi) = body.find(';') else {
        out.push_str("&amp;");
        return 1;
    };
    let name = &body[..semi];

    if let Some(num) = name.strip_prefix('#') {
        let valid = match num.strip_prefix(['x', 'X']) {
            Some(hex) => !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()),
            None => !num.is_empty() && num.chars().all(|c| c.is_ascii_digit()),
        };
        if valid {
            out.push('&');
            out.push_str(name);
            out.push(';');
            return semi + 2;
        }
        out.push_str("&amp;");
        return 1;
    }

    if !is_entity_name(name) {
        out.push_str("&amp;");
        return 1;
    }
    if PREDEFINED.contains(&name) {
        out.push('&');
        out.push_str(name);
        out.push(';');
    } else if let Some(code) = html_code_point(name) {
        out.push_str(&format!("&#{};", code));
    } else {
        out.push_str("&amp;");
        out.push_str(name);
        out.push(';');
    }
    semi + 2
}

fn is_entity_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric())
}

/// Normalizes one image file name: `WSTLA_OKA_B1_1_095_1_56.jpg` becomes
/// `WSTLA-OKA-B1-1-095-1_00056.jpg`. Other names are returned unchanged.
pub fn image_name(name: &str) -> Cow<'_, str> {
    if !name.starts_with("WSTLA_") {
        return Cow::Borrowed(name);
    }
    let (stem, ext) = match name.rfind('.') {
        Some(dot) => (&name[..dot], &name[dot..]),
        None => (name, ""),
    };
    let Some((prefix, counter)) = stem.rsplit_once('_') else {
        return Cow::Borrowed(name);
    };
    let counter = if !counter.is_empty() && counter.chars().all(|c| c.is_ascii_digit()) {
        format!("{:0>5}", counter)
    } else {
        counter.to_string()
    };
    Cow::Owned(format!("{}_{}{}", prefix.replace('_', "-"), counter, ext))
}
