//! Canonical XML serialization.
//!
//! Implements the three canonicalization variants used by XML signatures:
//! inclusive C14N 1.0, exclusive C14N, and exclusive C14N with comments.
//! The caller supplies the namespace bindings in scope above the subtree so
//! a detached element canonicalizes exactly as it would inside its document.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::Error;
use super::{Element, Node, NsBinding, QName};

pub struct C14nOptions<'a> {
    pub exclusive: bool,
    pub with_comments: bool,
    /// Prefixes from `InclusiveNamespaces/@PrefixList`; `#default` names the
    /// default namespace. Only meaningful for the exclusive variants.
    pub inclusive_prefixes: &'a [String],
}

/// Canonical byte form of `root`. `scope_ns` carries the namespace
/// declarations of the (former) ancestors of `root`, outermost first.
pub fn canonicalize(
    root: &Element,
    scope_ns: &[NsBinding],
    opts: &C14nOptions<'_>,
) -> Result<Vec<u8>, Error> {
    let mut out = String::new();
    let mut inherited = BTreeMap::new();
    for (prefix, uri) in scope_ns {
        inherited.insert(prefix.clone(), uri.clone());
    }
    write_element(root, &inherited, &BTreeMap::new(), opts, &mut out)?;

    // The serialized form is unescaped once more: numeric and named entity
    // references come back as raw code points. Interoperability with the
    // deployed corpus depends on this pass.
    let unescaped = unescape_entities(&out);
    let trimmed = unescaped.trim_matches(|c: char| c.is_ascii_whitespace());
    let bytes = trimmed.as_bytes();
    if bytes.first() != Some(&b'<') || bytes.last() != Some(&b'>') {
        return Err(Error::framing(
            "canonical buffer does not start with '<' and end with '>'",
        ));
    }
    Ok(bytes.to_vec())
}

fn write_element(
    el: &Element,
    inherited: &BTreeMap<String, String>,
    rendered: &BTreeMap<String, String>,
    opts: &C14nOptions<'_>,
    out: &mut String,
) -> Result<(), Error> {
    let mut scope = inherited.clone();
    for (prefix, uri) in el.nsdecls() {
        scope.insert(prefix, uri);
    }

    let ns_out = if opts.exclusive {
        exclusive_ns_axis(el, &scope, rendered, opts.inclusive_prefixes)
    } else {
        inclusive_ns_axis(&scope, rendered)
    };

    // Attributes sort by (namespace URI, local name); unqualified attributes
    // carry no namespace.
    let mut attrs: Vec<(String, String, &str, &str)> = Vec::new();
    for attr in &el.attrs {
        if attr.name == "xmlns" || attr.name.starts_with("xmlns:") {
            continue;
        }
        let q = QName::new(&attr.name);
        let uri = match &q.prefix {
            None => String::new(),
            Some(p) => lookup(&scope, p).ok_or_else(|| {
                Error::malformed(format!("undeclared namespace prefix '{}'", p))
            })?,
        };
        attrs.push((uri, q.local, attr.name.as_str(), attr.value.as_str()));
    }
    attrs.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

    if el.name.prefix.is_some() {
        let p = el.name.prefix.as_deref().unwrap_or("");
        if lookup(&scope, p).is_none() {
            return Err(Error::malformed(format!(
                "undeclared namespace prefix '{}'",
                p
            )));
        }
    }

    out.push('<');
    out.push_str(&el.name.to_string());
    for (prefix, uri) in &ns_out {
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(prefix);
            out.push_str("=\"");
        }
        escape_attr(uri, out);
        out.push('"');
    }
    for (_, _, name, value) in &attrs {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        escape_attr(value, out);
        out.push('"');
    }
    out.push('>');

    let mut rendered_here = rendered.clone();
    for (prefix, uri) in &ns_out {
        rendered_here.insert(prefix.clone(), uri.clone());
    }

    if let Some(text) = &el.text {
        escape_text(text, out);
    }
    for node in &el.children {
        match node {
            Node::Element(child) => {
                write_element(child, &scope, &rendered_here, opts, out)?;
            }
            Node::Comment(c) => {
                if opts.with_comments {
                    out.push_str("<!--");
                    out.push_str(&c.content);
                    out.push_str("-->");
                }
            }
        }
        if let Some(tail) = node.tail() {
            escape_text(tail, out);
        }
    }

    out.push_str("</");
    out.push_str(&el.name.to_string());
    out.push('>');
    Ok(())
}

fn lookup(scope: &BTreeMap<String, String>, prefix: &str) -> Option<String> {
    if prefix == "xml" {
        return Some(super::XML_NS.to_string());
    }
    scope.get(prefix).cloned()
}

/// Inclusive rule: every in-scope binding not already rendered identically by
/// an output ancestor is emitted; a superfluous empty default is not.
fn inclusive_ns_axis(
    scope: &BTreeMap<String, String>,
    rendered: &BTreeMap<String, String>,
) -> Vec<NsBinding> {
    let mut out = Vec::new();
    for (prefix, uri) in scope {
        if prefix == "xml" {
            continue;
        }
        push_binding(&mut out, rendered, prefix, uri);
    }
    out
}

/// Exclusive rule: only prefixes visibly utilized by this element (its own
/// prefix and those of its attributes) or listed in the transform's
/// `PrefixList` are emitted.
fn exclusive_ns_axis(
    el: &Element,
    scope: &BTreeMap<String, String>,
    rendered: &BTreeMap<String, String>,
    inclusive_prefixes: &[String],
) -> Vec<NsBinding> {
    let mut utilized: BTreeSet<String> = BTreeSet::new();
    utilized.insert(el.name.prefix.clone().unwrap_or_default());
    for attr in &el.attrs {
        if attr.name == "xmlns" || attr.name.starts_with("xmlns:") {
            continue;
        }
        if let Some(p) = QName::new(&attr.name).prefix {
            utilized.insert(p);
        }
    }
    for p in inclusive_prefixes {
        if p == "#default" {
            utilized.insert(String::new());
        } else {
            utilized.insert(p.clone());
        }
    }

    let mut out = Vec::new();
    for prefix in utilized {
        if prefix == "xml" {
            continue;
        }
        let uri = lookup(scope, &prefix).unwrap_or_default();
        push_binding(&mut out, rendered, &prefix, &uri);
    }
    out
}

fn push_binding(
    out: &mut Vec<NsBinding>,
    rendered: &BTreeMap<String, String>,
    prefix: &str,
    uri: &str,
) {
    if uri.is_empty() {
        // xmlns="" is only meaningful when it undeclares a rendered default.
        if prefix.is_empty() && rendered.get("").map_or(false, |u| !u.is_empty()) {
            out.push((String::new(), String::new()));
        }
        return;
    }
    if rendered.get(prefix).map(String::as_str) != Some(uri) {
        out.push((prefix.to_string(), uri.to_string()));
    }
}

/// Canonical text escaping: `&`, `<`, `>` and carriage return.
pub(crate) fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}

/// Canonical attribute-value escaping: `&`, `<`, `"` and whitespace controls.
pub(crate) fn escape_attr(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}

/// Single-pass unescape of `&name;`, `&#NNN;` and `&#xHH;` references.
/// Unknown names and invalid code points are left untouched.
fn unescape_entities(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        match parse_entity(after) {
            Some((replacement, consumed)) => {
                out.push(replacement);
                rest = &after[consumed..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn parse_entity(s: &str) -> Option<(char, usize)> {
    let semi = s.find(';')?;
    let body = &s[..semi];
    let name = body.strip_prefix('#').unwrap_or(body);
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    let consumed = semi + 1;
    if let Some(num) = body.strip_prefix('#') {
        let code = if let Some(hex) = num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            u32::from_str_radix(hex, 16).ok()?
        } else {
            num.parse::<u32>().ok()?
        };
        return char::from_u32(code).map(|c| (c, consumed));
    }
    let replacement = match body {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        _ => return None,
    };
    Some((replacement, consumed))
}
