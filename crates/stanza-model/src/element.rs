//! Namespaced element tree with XML (de)serialization.

use std::fmt;
use std::str::FromStr;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::{StanzaError, StanzaResult};

/// A child of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Node::Element(element)
    }
}

/// An XML element with its namespace resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    ns: String,
    attrs: Vec<(String, String)>,
    nodes: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>, ns: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ns: ns.into(),
            attrs: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn builder(name: impl Into<String>, ns: impl Into<String>) -> ElementBuilder {
        ElementBuilder {
            element: Self::new(name, ns),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ns(&self) -> &str {
        &self.ns
    }

    /// True if this element has the given local name and namespace.
    pub fn is(&self, name: &str, ns: &str) -> bool {
        self.name == name && self.ns == ns
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Set an attribute, replacing an existing value in place.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name, value)),
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Child elements in document order.
    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.nodes.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// First child element with the given name and namespace.
    pub fn get_child(&self, name: &str, ns: &str) -> Option<&Element> {
        self.children().find(|child| child.is(name, ns))
    }

    pub fn has_child(&self, name: &str, ns: &str) -> bool {
        self.get_child(name, ns).is_some()
    }

    pub fn append_child(&mut self, child: Element) {
        self.nodes.push(Node::Element(child));
    }

    /// Append text, merging with a trailing text node.
    pub fn append_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if let Some(Node::Text(last)) = self.nodes.last_mut() {
            last.push_str(&text);
            return;
        }
        self.nodes.push(Node::Text(text));
    }

    /// Concatenated direct text content.
    pub fn text(&self) -> String {
        self.nodes
            .iter()
            .filter_map(|node| match node {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Parse a single XML document.
    ///
    /// Whitespace-only text between elements is dropped.
    pub fn from_xml(bytes: &[u8]) -> StanzaResult<Element> {
        let xml = std::str::from_utf8(bytes).map_err(|e| StanzaError::Parse(e.to_string()))?;
        let mut reader = Reader::from_str(xml);

        let mut stack: Vec<(Element, Scope)> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    let parent = stack.last().map(|(_, scope)| scope);
                    let (element, scope) = open_element(&start, parent)?;
                    ensure_no_root(&root, &stack)?;
                    stack.push((element, scope));
                }
                Event::Empty(start) => {
                    let parent = stack.last().map(|(_, scope)| scope);
                    let (element, _) = open_element(&start, parent)?;
                    attach(element, &mut stack, &mut root)?;
                }
                Event::End(_) => {
                    let (element, _) = stack
                        .pop()
                        .ok_or_else(|| StanzaError::Parse("unbalanced end tag".into()))?;
                    attach(element, &mut stack, &mut root)?;
                }
                Event::Text(text) => {
                    let text = text.unescape()?;
                    push_text(&text, &mut stack)?;
                }
                Event::CData(data) => {
                    let text = std::str::from_utf8(&data)
                        .map_err(|e| StanzaError::Parse(e.to_string()))?;
                    push_text(text, &mut stack)?;
                }
                Event::Eof => break,
                Event::Comment(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
            }
        }

        if !stack.is_empty() {
            return Err(StanzaError::Parse("unexpected end of document".into()));
        }
        root.ok_or_else(|| StanzaError::Parse("empty document".into()))
    }

    /// Serialize to XML. `xmlns` is written only where the namespace changes.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out, None);
        out
    }

    fn write_xml(&self, out: &mut String, parent_ns: Option<&str>) {
        out.push('<');
        out.push_str(&self.name);

        let declare = match parent_ns {
            None => !self.ns.is_empty(),
            Some(parent) => parent != self.ns,
        };
        if declare {
            push_attr(out, "xmlns", &self.ns);
        }
        for (key, value) in &self.attrs {
            push_attr(out, key, value);
        }

        if self.nodes.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for node in &self.nodes {
            match node {
                Node::Element(child) => child.write_xml(out, Some(&self.ns)),
                Node::Text(text) => out.push_str(&escape(text.as_str())),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

impl FromStr for Element {
    type Err = StanzaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Element::from_xml(s.as_bytes())
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml())
    }
}

/// Builder for [`Element`].
#[derive(Debug, Clone)]
pub struct ElementBuilder {
    element: Element,
}

impl ElementBuilder {
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.element.set_attr(name, value);
        self
    }

    pub fn append(mut self, child: Element) -> Self {
        self.element.append_child(child);
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.element.append_text(text);
        self
    }

    pub fn build(self) -> Element {
        self.element
    }
}

impl From<ElementBuilder> for Element {
    fn from(builder: ElementBuilder) -> Self {
        builder.build()
    }
}

/// Namespace bindings in effect for an element.
#[derive(Debug, Clone, Default)]
struct Scope {
    default_ns: String,
    prefixes: Vec<(String, String)>,
}

impl Scope {
    fn resolve(&self, prefix: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .rev()
            .find(|(p, _)| p == prefix)
            .map(|(_, ns)| ns.as_str())
    }
}

fn open_element(start: &BytesStart<'_>, parent: Option<&Scope>) -> StanzaResult<(Element, Scope)> {
    let mut scope = parent.cloned().unwrap_or_default();
    let mut attrs = Vec::new();

    for attr in start.attributes() {
        let attr = attr?;
        let key = utf8(attr.key.as_ref())?.to_string();
        let value = attr.unescape_value()?.into_owned();
        if key == "xmlns" {
            scope.default_ns = value;
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.prefixes.push((prefix.to_string(), value));
        } else {
            attrs.push((key, value));
        }
    }

    let qname = utf8(start.name().as_ref())?.to_string();
    let (name, ns) = match qname.split_once(':') {
        Some((prefix, local)) => {
            let ns = scope
                .resolve(prefix)
                .ok_or_else(|| StanzaError::Parse(format!("unbound prefix '{prefix}'")))?;
            (local.to_string(), ns.to_string())
        }
        None => (qname, scope.default_ns.clone()),
    };

    let element = Element {
        name,
        ns,
        attrs,
        nodes: Vec::new(),
    };
    Ok((element, scope))
}

fn attach(
    element: Element,
    stack: &mut [(Element, Scope)],
    root: &mut Option<Element>,
) -> StanzaResult<()> {
    match stack.last_mut() {
        Some((parent, _)) => parent.append_child(element),
        None => {
            if root.is_some() {
                return Err(StanzaError::Parse("multiple root elements".into()));
            }
            *root = Some(element);
        }
    }
    Ok(())
}

fn ensure_no_root(root: &Option<Element>, stack: &[(Element, Scope)]) -> StanzaResult<()> {
    if stack.is_empty() && root.is_some() {
        return Err(StanzaError::Parse("multiple root elements".into()));
    }
    Ok(())
}

fn push_text(text: &str, stack: &mut [(Element, Scope)]) -> StanzaResult<()> {
    if text.trim().is_empty() {
        return Ok(());
    }
    match stack.last_mut() {
        Some((parent, _)) => {
            parent.append_text(text);
            Ok(())
        }
        None => Err(StanzaError::Parse("text outside root element".into())),
    }
}

fn push_attr(out: &mut String, key: &str, value: &str) {
    out.push(' ');
    out.push_str(key);
    out.push_str("=\"");
    out.push_str(&escape(value));
    out.push('"');
}

fn utf8(bytes: &[u8]) -> StanzaResult<&str> {
    std::str::from_utf8(bytes).map_err(|e| StanzaError::Parse(e.to_string()))
}
