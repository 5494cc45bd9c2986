//! Mutable XML document tree.
//!
//! A small ElementTree-shaped model parsed from `quick-xml` events: every
//! element owns its attributes in document order (namespace declarations
//! included), its leading text, and the tail text that follows its close tag.
//! Comments are kept as real nodes so canonicalization can render them and
//! the enveloped-signature transform can splice tails correctly.

use std::fmt;
use std::str::FromStr;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::Error;

pub mod c14n;

/// Namespace URI implicitly bound to the `xml` prefix.
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// A `(prefix, uri)` namespace binding; the default namespace uses an empty
/// prefix.
pub type NsBinding = (String, String);

/// Resolves `prefix` against `scope`, innermost declaration winning.
pub fn resolve_prefix(scope: &[NsBinding], prefix: &str) -> Option<String> {
    if prefix == "xml" {
        return Some(XML_NS.to_string());
    }
    scope
        .iter()
        .rev()
        .find(|(p, _)| p == prefix)
        .map(|(_, uri)| uri.clone())
}

/// Qualified name as written in the document: optional prefix plus local part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
}

impl QName {
    pub fn new(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((p, l)) if !p.is_empty() && !l.is_empty() => QName {
                prefix: Some(p.to_string()),
                local: l.to_string(),
            },
            _ => QName {
                prefix: None,
                local: raw.to_string(),
            },
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(p) => write!(f, "{}:{}", p, self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// Attribute with its name exactly as written (`xmlns` declarations are kept
/// here too, in document order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Comment(Comment),
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(el) => Some(el),
            Node::Comment(_) => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(el) => Some(el),
            Node::Comment(_) => None,
        }
    }

    pub fn tail(&self) -> Option<&str> {
        match self {
            Node::Element(el) => el.tail.as_deref(),
            Node::Comment(c) => c.tail.as_deref(),
        }
    }

    fn append_tail(&mut self, text: &str) {
        let tail = match self {
            Node::Element(el) => &mut el.tail,
            Node::Comment(c) => &mut c.tail,
        };
        match tail {
            Some(t) => t.push_str(text),
            None => *tail = Some(text.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub content: String,
    pub tail: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: QName,
    pub attrs: Vec<Attr>,
    pub text: Option<String>,
    pub tail: Option<String>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Element {
            name: QName::new(name),
            attrs: Vec::new(),
            text: None,
            tail: None,
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Sets or replaces an attribute.
    pub fn set_attr(&mut self, name: &str, value: &str) {
        match self.attrs.iter_mut().find(|a| a.name == name) {
            Some(a) => a.value = value.to_string(),
            None => self.attrs.push(Attr {
                name: name.to_string(),
                value: value.to_string(),
            }),
        }
    }

    pub fn set_text(&mut self, text: &str) {
        self.text = Some(text.to_string());
    }

    /// Appends a child element and returns a mutable handle to it.
    pub fn push_element(&mut self, el: Element) -> &mut Element {
        self.children.push(Node::Element(el));
        match self.children.last_mut() {
            Some(Node::Element(el)) => el,
            _ => unreachable!(),
        }
    }

    /// Namespace declarations carried by this element, in document order.
    pub fn nsdecls(&self) -> Vec<NsBinding> {
        self.attrs
            .iter()
            .filter_map(|a| {
                if a.name == "xmlns" {
                    Some((String::new(), a.value.clone()))
                } else {
                    a.name
                        .strip_prefix("xmlns:")
                        .map(|p| (p.to_string(), a.value.clone()))
                }
            })
            .collect()
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    /// Element at a child-index path; the empty path is `self`.
    pub fn elem_at(&self, path: &[usize]) -> Option<&Element> {
        let mut cur = self;
        for &i in path {
            cur = cur.children.get(i)?.as_element()?;
        }
        Some(cur)
    }

    pub fn elem_at_mut(&mut self, path: &[usize]) -> Option<&mut Element> {
        let mut cur = self;
        for &i in path {
            cur = cur.children.get_mut(i)?.as_element_mut()?;
        }
        Some(cur)
    }

    /// Removes the child at `idx`, splicing its tail onto the preceding
    /// sibling's tail, or onto this element's text when the child is first.
    pub fn remove_child(&mut self, idx: usize) -> Option<Node> {
        if idx >= self.children.len() {
            return None;
        }
        let node = self.children.remove(idx);
        if let Some(tail) = node.tail() {
            if idx > 0 {
                self.children[idx - 1].append_tail(tail);
            } else {
                match &mut self.text {
                    Some(t) => t.push_str(tail),
                    None => self.text = Some(tail.to_string()),
                }
            }
        }
        Some(node)
    }

    /// Namespace bindings in scope at the element addressed by `path`,
    /// including its own declarations, prepended with `base`.
    pub fn scope_at(&self, path: &[usize], base: &[NsBinding]) -> Option<Vec<NsBinding>> {
        let mut scope = base.to_vec();
        scope.extend(self.nsdecls());
        let mut cur = self;
        for &i in path {
            cur = cur.children.get(i)?.as_element()?;
            scope.extend(cur.nsdecls());
        }
        Some(scope)
    }

    /// Paths of descendant elements with namespace `uri` and local name
    /// `local`, in document order (`self` excluded). Each hit comes with the
    /// namespace bindings of its ancestors (own declarations excluded),
    /// seeded from `base_scope` plus this element's declarations.
    pub fn descendant_paths(
        &self,
        uri: &str,
        local: &str,
        base_scope: &[NsBinding],
    ) -> Vec<(Vec<usize>, Vec<NsBinding>)> {
        let mut out = Vec::new();
        let mut scope = base_scope.to_vec();
        scope.extend(self.nsdecls());
        self.collect_paths(&mut scope, &mut Vec::new(), &mut out, &|el, scope| {
            el.name.local == local
                && resolve_prefix(scope, el.name.prefix.as_deref().unwrap_or(""))
                    .unwrap_or_default()
                    == uri
        });
        out
    }

    /// Paths of elements (including `self`) carrying `attr_name="value"`,
    /// in document order, with ancestor bindings as in [`descendant_paths`].
    pub fn id_paths(
        &self,
        attr_name: &str,
        value: &str,
        base_scope: &[NsBinding],
    ) -> Vec<(Vec<usize>, Vec<NsBinding>)> {
        let mut out = Vec::new();
        if self.attr(attr_name) == Some(value) {
            out.push((Vec::new(), base_scope.to_vec()));
        }
        let mut scope = base_scope.to_vec();
        scope.extend(self.nsdecls());
        self.collect_paths(&mut scope, &mut Vec::new(), &mut out, &|el, _| {
            el.attr(attr_name) == Some(value)
        });
        out
    }

    fn collect_paths(
        &self,
        scope: &mut Vec<NsBinding>,
        path: &mut Vec<usize>,
        out: &mut Vec<(Vec<usize>, Vec<NsBinding>)>,
        pred: &dyn Fn(&Element, &[NsBinding]) -> bool,
    ) {
        for (i, node) in self.children.iter().enumerate() {
            if let Node::Element(child) = node {
                path.push(i);
                let mark = scope.len();
                scope.extend(child.nsdecls());
                if pred(child, scope) {
                    out.push((path.clone(), scope[..mark].to_vec()));
                }
                child.collect_paths(scope, path, out, pred);
                scope.truncate(mark);
                path.pop();
            }
        }
    }

    /// Matching descendants in document order. `base_scope` must carry the
    /// namespace bindings inherited from above this element, or prefixes
    /// declared on former ancestors will not resolve.
    pub fn find_descendants(
        &self,
        uri: &str,
        local: &str,
        base_scope: &[NsBinding],
    ) -> Vec<&Element> {
        self.descendant_paths(uri, local, base_scope)
            .into_iter()
            .filter_map(|(p, _)| self.elem_at(&p))
            .collect()
    }

    pub fn find_descendant(
        &self,
        uri: &str,
        local: &str,
        base_scope: &[NsBinding],
    ) -> Option<&Element> {
        self.descendant_paths(uri, local, base_scope)
            .into_iter()
            .next()
            .and_then(|(p, _)| self.elem_at(&p))
    }

    /// Text content of the first matching descendant.
    pub fn find_text(&self, uri: &str, local: &str, base_scope: &[NsBinding]) -> Option<&str> {
        self.find_descendant(uri, local, base_scope)
            .and_then(|e| e.text.as_deref())
    }
}

/// A parsed XML document. Comments and text outside the document element are
/// not retained.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub root: Element,
}

impl Document {
    pub fn parse(xml: &str) -> Result<Self, Error> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    if root.is_some() && stack.is_empty() {
                        return Err(Error::malformed("content after document element"));
                    }
                    stack.push(element_from_start(&start)?);
                }
                Event::Empty(start) => {
                    let el = element_from_start(&start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(Node::Element(el)),
                        None if root.is_none() => root = Some(el),
                        None => {
                            return Err(Error::malformed("content after document element"));
                        }
                    }
                }
                Event::End(_) => {
                    let el = stack
                        .pop()
                        .ok_or_else(|| Error::malformed("unbalanced close tag"))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(Node::Element(el)),
                        None => root = Some(el),
                    }
                }
                Event::Text(text) => {
                    let decoded = text.unescape()?;
                    match stack.last_mut() {
                        Some(parent) => append_text(parent, &decoded),
                        None if decoded.trim().is_empty() => {}
                        None => {
                            return Err(Error::malformed("text outside document element"));
                        }
                    }
                }
                Event::CData(cdata) => {
                    let raw = cdata.into_inner();
                    let decoded = String::from_utf8_lossy(&raw);
                    match stack.last_mut() {
                        Some(parent) => append_text(parent, &decoded),
                        None => {
                            return Err(Error::malformed("CDATA outside document element"));
                        }
                    }
                }
                Event::Comment(comment) => {
                    let content = String::from_utf8_lossy(&comment.into_inner()).into_owned();
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(Node::Comment(Comment {
                            content,
                            tail: None,
                        }));
                    }
                }
                Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
                Event::Eof => break,
            }
        }

        if !stack.is_empty() {
            return Err(Error::malformed("unexpected end of document"));
        }
        root.map(|root| Document { root })
            .ok_or_else(|| Error::malformed("no document element"))
    }

    /// Plain (non-canonical) serialization preserving document order.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        write_plain(&self.root, &mut out);
        out
    }
}

impl FromStr for Document {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Document::parse(s)
    }
}

fn element_from_start(start: &quick_xml::events::BytesStart<'_>) -> Result<Element, Error> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut el = Element::new(&name);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| Error::malformed(format!("invalid attribute: {}", e)))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        el.attrs.push(Attr { name: key, value });
    }
    Ok(el)
}

fn append_text(parent: &mut Element, text: &str) {
    match parent.children.last_mut() {
        Some(node) => node.append_tail(text),
        None => match &mut parent.text {
            Some(t) => t.push_str(text),
            None => parent.text = Some(text.to_string()),
        },
    }
}

fn write_plain(el: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&el.name.to_string());
    for attr in &el.attrs {
        out.push(' ');
        out.push_str(&attr.name);
        out.push_str("=\"");
        c14n::escape_attr(&attr.value, out);
        out.push('"');
    }
    if el.text.is_none() && el.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    if let Some(text) = &el.text {
        c14n::escape_text(text, out);
    }
    for node in &el.children {
        match node {
            Node::Element(child) => write_plain(child, out),
            Node::Comment(c) => {
                out.push_str("<!--");
                out.push_str(&c.content);
                out.push_str("-->");
            }
        }
        if let Some(tail) = node.tail() {
            c14n::escape_text(tail, out);
        }
    }
    out.push_str("</");
    out.push_str(&el.name.to_string());
    out.push('>');
}
