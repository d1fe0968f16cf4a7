//! Fragment import: content-mode selection, container lookup and
//! namespace-correct reconstruction of source nodes.
//!
//! Reconstruction never trusts namespaces already resolved on the source
//! nodes. It recomputes them from qualified names and the `xmlns*`
//! declarations in scope, threading an immutable [`NamespaceContext`].

use std::env;
use std::sync::Arc;
use tracing::debug;
use tracing::warn;
use xt_core::ErrorKind;
use xt_core::TileError;
use xt_core::TileResult;
use xt_dom::Attribute;
use xt_dom::Document;
use xt_dom::Element;
use xt_dom::Node;
use xt_dom::XML_NAMESPACE;
use xt_dom::split_qualified_name;
use xt_html::HtmlParser;
use xt_xhtml::XhtmlParser;
use xt_xhtml::is_valid_document;

use crate::layer::LayerOptions;
use crate::scripts::ScriptExecutionPolicy;

/// How imported content must be treated once attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentMode {
    Html,
    Xhtml,
}

impl ContentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Xhtml => "xhtml",
        }
    }
}

/// Response content after mode selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSource {
    Html(String),
    Xhtml(Document),
}

impl ImportSource {
    pub fn mode(&self) -> ContentMode {
        match self {
            Self::Html(_) => ContentMode::Html,
            Self::Xhtml(_) => ContentMode::Xhtml,
        }
    }
}

/// Detached nodes ready to be appended to a visual container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedContent {
    pub mode: ContentMode,
    pub nodes: Vec<Node>,
}

/// Whole-document import path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportStrategy {
    /// Rebuild every node from qualified names and in-scope declarations.
    #[default]
    Manual,
    /// Deep-clone the parser's own namespace-resolved nodes.
    DocumentApi,
}

impl ImportStrategy {
    pub fn from_name(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(Self::Manual),
            "document" => Some(Self::DocumentApi),
            _ => None,
        }
    }
}

pub const IMPORT_STRATEGY_ENV: &str = "XTILE_IMPORT_STRATEGY";
pub const EXECUTE_XHTML_SCRIPTS_ENV: &str = "XTILE_EXECUTE_XHTML_SCRIPTS";
pub const EXECUTE_HTML_SCRIPTS_ENV: &str = "XTILE_EXECUTE_HTML_SCRIPTS";

/// Environment-dependent import behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportPolicy {
    pub strategy: ImportStrategy,
    pub scripts: ScriptExecutionPolicy,
}

impl ImportPolicy {
    pub fn from_env() -> TileResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Defaults overridden by whichever variables `lookup` yields.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> TileResult<Self> {
        let mut policy = Self::default();

        if let Some(value) = lookup(IMPORT_STRATEGY_ENV) {
            policy.strategy = ImportStrategy::from_name(value.trim()).ok_or_else(|| {
                TileError::configuration(
                    "tile.config.import_strategy",
                    format!("{IMPORT_STRATEGY_ENV} must be `manual` or `document`, got `{value}`"),
                )
            })?;
        }
        if let Some(value) = lookup(EXECUTE_XHTML_SCRIPTS_ENV) {
            policy.scripts.xhtml = parse_flag(EXECUTE_XHTML_SCRIPTS_ENV, &value)?;
        }
        if let Some(value) = lookup(EXECUTE_HTML_SCRIPTS_ENV) {
            policy.scripts.html = parse_flag(EXECUTE_HTML_SCRIPTS_ENV, &value)?;
        }

        Ok(policy)
    }
}

fn parse_flag(name: &str, value: &str) -> TileResult<bool> {
    match value.trim() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(TileError::configuration(
            "tile.config.script_flag",
            format!("{name} must be `0` or `1`, got `{value}`"),
        )),
    }
}

#[derive(Debug)]
struct Frame {
    prefix: Option<String>,
    uri: String,
    parent: Option<Arc<Frame>>,
}

/// Prefix bindings in scope at one point of a walk.
///
/// Extending returns a new context sharing the parent's frames; the parent is
/// never modified. The `xml` prefix is always bound. An empty URI undeclares.
#[derive(Debug, Clone, Default)]
pub struct NamespaceContext {
    head: Option<Arc<Frame>>,
}

impl NamespaceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `prefix` (`None` for the default namespace). `None` means unresolved.
    pub fn resolve(&self, prefix: Option<&str>) -> Option<&str> {
        if prefix == Some("xml") {
            return Some(XML_NAMESPACE);
        }
        let mut frame = self.head.as_deref();
        while let Some(current) = frame {
            if current.prefix.as_deref() == prefix {
                return (!current.uri.is_empty()).then_some(current.uri.as_str());
            }
            frame = current.parent.as_deref();
        }
        None
    }

    pub fn default_namespace(&self) -> Option<&str> {
        self.resolve(None)
    }

    pub fn extend(&self, prefix: Option<&str>, uri: impl Into<String>) -> Self {
        Self {
            head: Some(Arc::new(Frame {
                prefix: prefix.map(str::to_owned),
                uri: uri.into(),
                parent: self.head.clone(),
            })),
        }
    }

    /// Context for `element`'s subtree: this one plus its `xmlns*` declarations.
    pub fn extended_by(&self, element: &Element) -> Self {
        element
            .attributes
            .iter()
            .filter(|attribute| attribute.is_namespace_declaration())
            .fold(self.clone(), |context, attribute| {
                let prefix = if attribute.name == "xmlns" {
                    None
                } else {
                    Some(attribute.local_name())
                };
                context.extend(prefix, attribute.value.as_str())
            })
    }
}

/// Rebuilds `node` under `context`. Returns `None` for node types that are not imported.
pub fn reconstruct(node: &Node, context: &NamespaceContext, deep: bool) -> Option<Node> {
    match node {
        Node::Element(element) => Some(Node::Element(reconstruct_element(element, context, deep))),
        Node::Text(value) | Node::CData(value) => Some(Node::Text(value.clone())),
        Node::Comment(value) => Some(Node::Comment(value.clone())),
        Node::ProcessingInstruction { .. } | Node::DocumentType(_) => None,
    }
}

fn reconstruct_element(element: &Element, inherited: &NamespaceContext, deep: bool) -> Element {
    let context = inherited.extended_by(element);

    let namespace = match element.prefix() {
        Some(prefix) => {
            let resolved = context.resolve(Some(prefix));
            if resolved.is_none() {
                warn!(element = element.name.as_str(), "unresolved namespace prefix");
            }
            resolved
        }
        None => context.default_namespace(),
    };

    let mut copy = Element::new_ns(namespace.map(str::to_owned), element.name.as_str());
    for attribute in &element.attributes {
        if attribute.is_namespace_declaration() {
            continue;
        }
        let attribute_namespace = match split_qualified_name(&attribute.name).0 {
            Some(prefix) => context.resolve(Some(prefix)),
            None => namespace,
        };
        copy.attributes.push(Attribute::new_ns(
            attribute_namespace.map(str::to_owned),
            attribute.name.as_str(),
            attribute.value.as_str(),
        ));
    }

    if deep {
        copy.children = element
            .children
            .iter()
            .filter_map(|child| reconstruct(child, &context, true))
            .collect();
    }
    copy
}

/// First element (pre-order) with a matching `id`, with the context on its path.
#[derive(Debug, Clone)]
pub struct ContainerMatch<'a> {
    pub element: &'a Element,
    pub context: NamespaceContext,
}

pub fn find_container<'a>(root: &'a Element, id: &str) -> Option<ContainerMatch<'a>> {
    find_in(root, id, &NamespaceContext::new())
}

fn find_in<'a>(
    element: &'a Element,
    id: &str,
    inherited: &NamespaceContext,
) -> Option<ContainerMatch<'a>> {
    let context = inherited.extended_by(element);
    if element.attribute("id") == Some(id) {
        return Some(ContainerMatch { element, context });
    }
    element
        .child_elements()
        .find_map(|child| find_in(child, id, &context))
}

/// Turns raw response content into attachable nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FragmentImporter {
    parser: XhtmlParser,
    html: HtmlParser,
    policy: ImportPolicy,
}

impl FragmentImporter {
    pub fn new(parser: XhtmlParser, policy: ImportPolicy) -> Self {
        Self {
            parser,
            html: HtmlParser,
            policy,
        }
    }

    pub fn policy(&self) -> ImportPolicy {
        self.policy
    }

    /// Picks HTML or XHTML handling for one response.
    ///
    /// A transport-supplied document is preferred over parsing `text`; it is
    /// not re-parsed when invalid.
    pub fn select_content_mode(
        &self,
        options: &LayerOptions,
        text: &str,
        document: Option<Document>,
    ) -> TileResult<ImportSource> {
        if options.html_only {
            return Ok(ImportSource::Html(text.to_owned()));
        }

        let parsed = match document {
            Some(document) => Ok(document),
            None => self.parser.parse(text),
        };

        match parsed {
            Ok(document) if is_valid_document(&document) => Ok(ImportSource::Xhtml(document)),
            _ if options.allow_html_fallback => {
                debug!("content is not valid XHTML; falling back to HTML");
                Ok(ImportSource::Html(text.to_owned()))
            }
            Ok(document) => Err(TileError::malformed(
                "tile.import.malformed_content",
                document
                    .parse_error
                    .map(|error| error.message)
                    .unwrap_or_else(|| "response is not a valid XHTML document".to_owned()),
            )),
            Err(error) => Err(TileError::malformed("tile.import.malformed_content", error.message)),
        }
    }

    /// The document element's subtree.
    pub fn import_whole(&self, document: &Document) -> Option<Node> {
        let root = document.document_element()?;
        match self.policy.strategy {
            ImportStrategy::DocumentApi => Some(Node::Element(root.clone())),
            ImportStrategy::Manual => Some(Node::Element(reconstruct_element(
                root,
                &NamespaceContext::new(),
                true,
            ))),
        }
    }

    /// Children of the first element whose `id` is `container_id`.
    pub fn import_container(&self, document: &Document, container_id: &str) -> Option<Vec<Node>> {
        let found = find_container(document.document_element()?, container_id)?;
        Some(
            found
                .element
                .children
                .iter()
                .filter_map(|child| reconstruct(child, &found.context, true))
                .collect(),
        )
    }

    /// Full import of one response.
    ///
    /// Fails with [`ErrorKind::MalformedContent`] when no content mode applies
    /// and with [`ErrorKind::ContainerNotFound`] when the configured container
    /// is missing.
    pub fn import(
        &self,
        options: &LayerOptions,
        text: &str,
        document: Option<Document>,
    ) -> TileResult<ImportedContent> {
        let source = self.select_content_mode(options, text, document)?;
        let mode = source.mode();
        debug!(mode = mode.as_str(), "content mode selected");

        let nodes = match source {
            ImportSource::Html(markup) => self.html.parse_fragment(&markup),
            ImportSource::Xhtml(document) => match options.container_id.as_deref() {
                Some(container_id) => self
                    .import_container(&document, container_id)
                    .ok_or_else(|| {
                        TileError::new(
                            ErrorKind::ContainerNotFound,
                            "tile.import.container_not_found",
                            format!("no element with id `{container_id}`"),
                        )
                    })?,
                None => self.import_whole(&document).into_iter().collect(),
            },
        };

        Ok(ImportedContent { mode, nodes })
    }
}
