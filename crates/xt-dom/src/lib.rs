//! DOM tree data structures shared by the parsers and the tile importer.
//!
//! Nodes are plain owned values. Source documents (as produced by the XHTML
//! parser) and destination trees (as produced by the importer) use the same
//! types, so an imported tree can be compared structurally to an expected one.

use std::collections::BTreeMap;

pub const XHTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";
pub const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";
pub const MATHML_NAMESPACE: &str = "http://www.w3.org/1998/Math/MathML";
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";
pub const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

/// DOM node type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Element,
    Text,
    CData,
    Comment,
    ProcessingInstruction,
    DocumentType,
}

/// A single node in a document tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction { target: String, data: String },
    DocumentType(String),
}

impl Node {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn comment(value: impl Into<String>) -> Self {
        Self::Comment(value.into())
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Element(_) => NodeType::Element,
            Self::Text(_) => NodeType::Text,
            Self::CData(_) => NodeType::CData,
            Self::Comment(_) => NodeType::Comment,
            Self::ProcessingInstruction { .. } => NodeType::ProcessingInstruction,
            Self::DocumentType(_) => NodeType::DocumentType,
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Self::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Self::Element(element) => Some(element),
            _ => None,
        }
    }

    /// Character data of leaf nodes; `None` for elements and doctypes.
    pub fn node_value(&self) -> Option<&str> {
        match self {
            Self::Text(value) | Self::CData(value) | Self::Comment(value) => Some(value),
            Self::ProcessingInstruction { data, .. } => Some(data),
            Self::Element(_) | Self::DocumentType(_) => None,
        }
    }

    pub fn text_content(&self) -> String {
        match self {
            Self::Element(element) => element.text_content(),
            Self::Text(value) | Self::CData(value) => value.clone(),
            _ => String::new(),
        }
    }

    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        write_node(&mut out, self, &Scope::default());
        out
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Self::Element(element)
    }
}

/// Element attribute. `name` is the qualified name as written in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub namespace: Option<String>,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            value: value.into(),
        }
    }

    pub fn new_ns(
        namespace: Option<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace,
            value: value.into(),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        split_qualified_name(&self.name).0
    }

    pub fn local_name(&self) -> &str {
        split_qualified_name(&self.name).1
    }

    /// True for `xmlns` and `xmlns:prefix` declarations.
    pub fn is_namespace_declaration(&self) -> bool {
        self.name == "xmlns" || self.prefix() == Some("xmlns")
    }
}

/// Element node with its attributes and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub namespace: Option<String>,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self::new_ns(None, name)
    }

    pub fn new_ns(namespace: Option<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        split_qualified_name(&self.name).0
    }

    pub fn local_name(&self) -> &str {
        split_qualified_name(&self.name).1
    }

    /// Looks up an attribute by its qualified name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attribute| attribute.name == name)
            .map(|attribute| attribute.value.as_str())
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.set_attribute_ns(None, name, value);
    }

    pub fn set_attribute_ns(
        &mut self,
        namespace: Option<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) {
        let name = name.into();
        let value = value.into();
        match self
            .attributes
            .iter_mut()
            .find(|attribute| attribute.name == name)
        {
            Some(existing) => {
                existing.namespace = namespace;
                existing.value = value;
            }
            None => self
                .attributes
                .push(Attribute::new_ns(namespace, name, value)),
        }
    }

    pub fn append_child(&mut self, child: impl Into<Node>) {
        self.children.push(child.into());
    }

    /// Builder-style variant of [`Element::append_child`].
    pub fn with_child(mut self, child: impl Into<Node>) -> Self {
        self.append_child(child);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }

    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        write_element(&mut out, self, &Scope::default());
        out
    }
}

fn collect_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(value) | Node::CData(value) => out.push_str(value),
            Node::Element(element) => collect_text(&element.children, out),
            _ => {}
        }
    }
}

/// Splits `prefix:local` into its parts. Names without a colon have no prefix.
pub fn split_qualified_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) if !prefix.is_empty() => (Some(prefix), local),
        _ => (None, name),
    }
}

/// Parser diagnostics attached to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
}

/// A parsed source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Nodes preceding the document element (comments, PIs, doctype).
    pub prolog: Vec<Node>,
    pub root: Option<Element>,
    pub parse_error: Option<ParseError>,
}

impl Document {
    pub fn empty() -> Self {
        Self {
            prolog: Vec::new(),
            root: None,
            parse_error: None,
        }
    }

    pub fn with_root(root: Element) -> Self {
        Self {
            root: Some(root),
            ..Self::empty()
        }
    }

    pub fn has_root(&self) -> bool {
        self.root.is_some()
    }

    pub fn document_element(&self) -> Option<&Element> {
        self.root.as_ref()
    }

    pub fn has_parse_error(&self) -> bool {
        self.parse_error.is_some()
    }
}

/// Serializes a sibling list.
pub fn nodes_to_markup(nodes: &[Node]) -> String {
    let scope = Scope::default();
    let mut out = String::new();
    for node in nodes {
        write_node(&mut out, node, &scope);
    }
    out
}

/// In-scope prefix bindings during serialization. The empty key is the default namespace.
#[derive(Debug, Clone, Default)]
struct Scope {
    bindings: BTreeMap<String, String>,
}

impl Scope {
    fn lookup(&self, prefix: &str) -> Option<&str> {
        self.bindings
            .get(prefix)
            .map(String::as_str)
            .filter(|uri| !uri.is_empty())
    }
}

fn write_node(out: &mut String, node: &Node, scope: &Scope) {
    match node {
        Node::Element(element) => write_element(out, element, scope),
        Node::Text(value) => out.push_str(&escape_text(value)),
        Node::CData(value) => {
            out.push_str("<![CDATA[");
            out.push_str(value);
            out.push_str("]]>");
        }
        Node::Comment(value) => {
            out.push_str("<!--");
            out.push_str(value);
            out.push_str("-->");
        }
        Node::ProcessingInstruction { target, data } => {
            out.push_str("<?");
            out.push_str(target);
            if !data.is_empty() {
                out.push(' ');
                out.push_str(data);
            }
            out.push_str("?>");
        }
        Node::DocumentType(value) => {
            out.push_str("<!DOCTYPE ");
            out.push_str(value);
            out.push('>');
        }
    }
}

fn write_element(out: &mut String, element: &Element, parent_scope: &Scope) {
    let mut scope = parent_scope.clone();
    let mut declarations: Vec<(String, String)> = Vec::new();

    for attribute in &element.attributes {
        if attribute.name == "xmlns" {
            scope.bindings.insert(String::new(), attribute.value.clone());
        } else if attribute.prefix() == Some("xmlns") {
            scope
                .bindings
                .insert(attribute.local_name().to_owned(), attribute.value.clone());
        }
    }

    let element_prefix = element.prefix().unwrap_or_default();
    let wanted = element.namespace.as_deref().unwrap_or_default();
    let in_scope = scope.lookup(element_prefix).unwrap_or_default();
    if wanted != in_scope && (element_prefix.is_empty() || !wanted.is_empty()) {
        declarations.push((element_prefix.to_owned(), wanted.to_owned()));
        scope
            .bindings
            .insert(element_prefix.to_owned(), wanted.to_owned());
    }

    for attribute in &element.attributes {
        let (Some(prefix), Some(namespace)) = (attribute.prefix(), attribute.namespace.as_deref())
        else {
            continue;
        };
        if prefix == "xmlns" || prefix == "xml" {
            continue;
        }
        if scope.lookup(prefix) != Some(namespace) {
            declarations.push((prefix.to_owned(), namespace.to_owned()));
            scope.bindings.insert(prefix.to_owned(), namespace.to_owned());
        }
    }

    out.push('<');
    out.push_str(&element.name);
    for (prefix, uri) in &declarations {
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(prefix);
            out.push_str("=\"");
        }
        out.push_str(&escape_attribute(uri));
        out.push('"');
    }
    for attribute in &element.attributes {
        out.push(' ');
        out.push_str(&attribute.name);
        out.push_str("=\"");
        out.push_str(&escape_attribute(&attribute.value));
        out.push('"');
    }

    if element.children.is_empty() {
        out.push_str("/>");
        return;
    }

    out.push('>');
    for child in &element.children {
        write_node(out, child, &scope);
    }
    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}

fn escape_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_attribute(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::Attribute;
    use super::Document;
    use super::Element;
    use super::Node;
    use super::SVG_NAMESPACE;
    use super::XHTML_NAMESPACE;
    use super::nodes_to_markup;
    use super::split_qualified_name;

    #[test]
    fn splits_prefixed_names() {
        assert_eq!(split_qualified_name("svg:rect"), (Some("svg"), "rect"));
        assert_eq!(split_qualified_name("div"), (None, "div"));
        assert_eq!(split_qualified_name(":odd"), (None, ":odd"));
    }

    #[test]
    fn empty_document_has_no_root() {
        let doc = Document::empty();
        assert!(!doc.has_root());
        assert!(!doc.has_parse_error());
    }

    #[test]
    fn set_attribute_replaces_existing_value() {
        let mut element = Element::new("div");
        element.set_attribute("id", "a");
        element.set_attribute("id", "b");
        assert_eq!(element.attributes.len(), 1);
        assert_eq!(element.attribute("id"), Some("b"));
    }

    #[test]
    fn text_content_joins_nested_text_and_cdata() {
        let element = Element::new("p")
            .with_child(Node::text("a"))
            .with_child(Element::new("b").with_child(Node::CData("b".to_owned())))
            .with_child(Node::comment("skip"))
            .with_child(Node::text("c"));
        assert_eq!(element.text_content(), "abc");
    }

    #[test]
    fn namespace_declaration_detection() {
        assert!(Attribute::new("xmlns", XHTML_NAMESPACE).is_namespace_declaration());
        assert!(Attribute::new("xmlns:svg", SVG_NAMESPACE).is_namespace_declaration());
        assert!(!Attribute::new("xlink:href", "#a").is_namespace_declaration());
    }

    #[test]
    fn serializer_declares_namespaces_once() {
        let circle = Element::new_ns(Some(SVG_NAMESPACE.to_owned()), "svg:circle")
            .with_attribute("r", "2");
        let root = Element::new_ns(Some(XHTML_NAMESPACE.to_owned()), "div")
            .with_child(Element::new_ns(Some(SVG_NAMESPACE.to_owned()), "svg:svg").with_child(circle))
            .with_child(Node::text("a < b"));

        assert_eq!(
            Node::from(root).to_markup(),
            "<div xmlns=\"http://www.w3.org/1999/xhtml\">\
             <svg:svg xmlns:svg=\"http://www.w3.org/2000/svg\"><svg:circle r=\"2\"/></svg:svg>\
             a &lt; b</div>"
        );
    }

    #[test]
    fn serializes_sibling_lists() {
        let nodes = vec![Node::comment(" note "), Node::Element(Element::new("br"))];
        assert_eq!(nodes_to_markup(&nodes), "<!-- note --><br/>");
    }
}
