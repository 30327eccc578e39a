//! Exclusive XML canonicalization (exc-c14n, without comments)
//!
//! Produces the byte stream that gets digested and signed. Supports the
//! subset of XML the tax documents use: elements, attributes, namespaces,
//! text and CDATA. Comments, the XML declaration and the doctype are dropped.

use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("Malformed XML: {0}")]
    Malformed(String),

    #[error("Undeclared namespace prefix: {0}")]
    UndeclaredPrefix(String),
}

impl From<quick_xml::Error> for CanonicalError {
    fn from(err: quick_xml::Error) -> Self {
        CanonicalError::Malformed(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for CanonicalError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        CanonicalError::Malformed(err.to_string())
    }
}

/// Namespace bindings, prefix → URI; the default namespace uses `""`
type Bindings = BTreeMap<String, String>;

struct Frame {
    qname: String,
    /// Namespaces in scope in the input document
    in_scope: Bindings,
    /// Namespaces already rendered on output ancestors
    rendered: Bindings,
}

/// Canonicalize a complete XML document
pub fn canonicalize(xml: &str) -> Result<String, CanonicalError> {
    let mut reader = Reader::from_str(xml);
    reader.expand_empty_elements(true);

    let mut out = String::with_capacity(xml.len());
    let mut stack: Vec<Frame> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                let frame = open_element(&start, stack.last(), &mut out)?;
                stack.push(frame);
            }
            Event::End(_) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| CanonicalError::Malformed("unbalanced end tag".into()))?;
                out.push_str("</");
                out.push_str(&frame.qname);
                out.push('>');
            }
            Event::Text(text) => {
                if !stack.is_empty() {
                    let value = text.unescape()?;
                    escape_text(&value, &mut out);
                }
            }
            Event::CData(data) => {
                if !stack.is_empty() {
                    let raw = data.into_inner();
                    let value = std::str::from_utf8(&raw)
                        .map_err(|e| CanonicalError::Malformed(e.to_string()))?;
                    escape_text(value, &mut out);
                }
            }
            Event::PI(pi) => {
                if !stack.is_empty() {
                    let raw = std::str::from_utf8(&pi)
                        .map_err(|e| CanonicalError::Malformed(e.to_string()))?;
                    out.push_str("<?");
                    out.push_str(raw.trim_end());
                    out.push_str("?>");
                }
            }
            Event::Empty(_) => {
                return Err(CanonicalError::Malformed("unexpanded empty element".into()));
            }
            Event::Comment(_) | Event::Decl(_) | Event::DocType(_) => {}
            Event::Eof => break,
        }
    }

    if !stack.is_empty() {
        return Err(CanonicalError::Malformed("unclosed element".into()));
    }

    Ok(out)
}

fn open_element(
    start: &BytesStart<'_>,
    parent: Option<&Frame>,
    out: &mut String,
) -> Result<Frame, CanonicalError> {
    let qname = utf8(start.name().as_ref())?.to_string();

    let mut in_scope = parent.map(|p| p.in_scope.clone()).unwrap_or_default();
    let mut rendered = parent.map(|p| p.rendered.clone()).unwrap_or_default();

    // Split namespace declarations from regular attributes
    let mut attributes: Vec<(String, String)> = Vec::new();
    for attr in start.attributes() {
        let attr = attr?;
        let key = utf8(attr.key.as_ref())?.to_string();
        let value = attr.unescape_value()?.into_owned();

        if key == "xmlns" {
            in_scope.insert(String::new(), value);
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            in_scope.insert(prefix.to_string(), value);
        } else {
            attributes.push((key, value));
        }
    }

    // Prefixes visibly utilized by this element and its attributes
    let mut utilized: Vec<String> = vec![prefix_of(&qname).to_string()];
    for (key, _) in &attributes {
        let prefix = prefix_of(key);
        if !prefix.is_empty() && prefix != "xml" && !utilized.iter().any(|p| p == prefix) {
            utilized.push(prefix.to_string());
        }
    }

    let mut declarations: Vec<(String, String)> = Vec::new();
    for prefix in utilized {
        let uri = match in_scope.get(&prefix) {
            Some(uri) => uri.clone(),
            None if prefix.is_empty() => String::new(),
            None => return Err(CanonicalError::UndeclaredPrefix(prefix)),
        };
        let already = rendered.get(&prefix).cloned().unwrap_or_default();
        if uri != already {
            rendered.insert(prefix.clone(), uri.clone());
            declarations.push((prefix, uri));
        }
    }
    declarations.sort();

    // Attributes ordered by namespace URI, then local name
    let mut keyed: Vec<((String, String), String, String)> = Vec::with_capacity(attributes.len());
    for (key, value) in attributes {
        let prefix = prefix_of(&key);
        let uri = if prefix.is_empty() {
            String::new()
        } else if prefix == "xml" {
            "http://www.w3.org/XML/1998/namespace".to_string()
        } else {
            in_scope
                .get(prefix)
                .cloned()
                .ok_or_else(|| CanonicalError::UndeclaredPrefix(prefix.to_string()))?
        };
        let local = local_of(&key).to_string();
        keyed.push(((uri, local), key, value));
    }
    keyed.sort_by(|a, b| a.0.cmp(&b.0));

    out.push('<');
    out.push_str(&qname);
    for (prefix, uri) in &declarations {
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(prefix);
            out.push_str("=\"");
        }
        escape_attribute(uri, out);
        out.push('"');
    }
    for (_, key, value) in &keyed {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        escape_attribute(value, out);
        out.push('"');
    }
    out.push('>');

    Ok(Frame {
        qname,
        in_scope,
        rendered,
    })
}

fn utf8(bytes: &[u8]) -> Result<&str, CanonicalError> {
    std::str::from_utf8(bytes).map_err(|e| CanonicalError::Malformed(e.to_string()))
}

fn prefix_of(qname: &str) -> &str {
    qname.split_once(':').map(|(p, _)| p).unwrap_or("")
}

fn local_of(qname: &str) -> &str {
    qname.split_once(':').map(|(_, l)| l).unwrap_or(qname)
}

fn escape_text(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
}
