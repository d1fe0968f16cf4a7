//! Namespace-aware XHTML fragment parsing and document validity checks.

use quick_xml::NsReader;
use quick_xml::events::BytesStart;
use quick_xml::events::Event;
use quick_xml::name::ResolveResult;
use xt_core::TileError;
use xt_core::TileResult;
use xt_dom::Attribute;
use xt_dom::Document;
use xt_dom::Element;
use xt_dom::Node;
use xt_dom::ParseError;
use xt_dom::XMLNS_NAMESPACE;

/// Local name of the element some XML parsers emit in place of content.
pub const PARSER_ERROR_TAG: &str = "parsererror";
pub const PARSER_ERROR_NAMESPACE: &str = "http://www.mozilla.org/newlayout/xml/parsererror.xml";

/// How the parser surfaces well-formedness errors.
///
/// Hosts disagree here: some throw, some return a document with an error
/// flag and no root, some return a document whose content *is* the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseErrorReporting {
    Throw,
    #[default]
    Flag,
    InlineDocument,
}

impl ParseErrorReporting {
    pub fn from_name(value: &str) -> Option<Self> {
        match value {
            "throw" => Some(Self::Throw),
            "flag" => Some(Self::Flag),
            "inline" => Some(Self::InlineDocument),
            _ => None,
        }
    }
}

/// Parses raw text as an `application/xhtml+xml` document.
#[derive(Debug, Clone, Copy, Default)]
pub struct XhtmlParser {
    reporting: ParseErrorReporting,
}

impl XhtmlParser {
    pub fn new(reporting: ParseErrorReporting) -> Self {
        Self { reporting }
    }

    pub fn reporting(&self) -> ParseErrorReporting {
        self.reporting
    }

    pub fn parse(&self, input: &str) -> TileResult<Document> {
        let message = match build_document(input) {
            Ok(document) => return Ok(document),
            Err(message) => message,
        };

        match self.reporting {
            ParseErrorReporting::Throw => Err(TileError::malformed(
                "xhtml.parse.not_well_formed",
                message,
            )),
            ParseErrorReporting::Flag => Ok(Document {
                parse_error: Some(ParseError { message }),
                ..Document::empty()
            }),
            ParseErrorReporting::InlineDocument => {
                let marker = Element::new_ns(Some(PARSER_ERROR_NAMESPACE.to_owned()), PARSER_ERROR_TAG)
                    .with_child(Node::text(message));
                Ok(Document::with_root(marker))
            }
        }
    }
}

/// Decides whether a parsed document is usable content.
///
/// A document is rejected when it has no root element, carries an error
/// flag, or contains a parser-error marker element anywhere in its tree.
/// Every environment-specific heuristic lives here.
pub fn is_valid_document(document: &Document) -> bool {
    let Some(root) = document.document_element() else {
        return false;
    };

    if document.has_parse_error() {
        return false;
    }

    !contains_parser_error(root)
}

fn contains_parser_error(element: &Element) -> bool {
    element.local_name() == PARSER_ERROR_TAG || element.child_elements().any(contains_parser_error)
}

fn build_document(input: &str) -> Result<Document, String> {
    let mut reader = NsReader::from_str(input);
    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut document = Document::empty();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|error| {
            format!(
                "XML parse error at byte {}: {error}",
                reader.error_position()
            )
        })?;

        match event {
            Event::Start(start) => {
                if stack.is_empty() && document.has_root() {
                    return Err("document has more than one root element".to_owned());
                }
                stack.push(open_element(&reader, &start)?);
            }
            Event::Empty(start) => {
                let element = open_element(&reader, &start)?;
                attach(&mut stack, &mut document, Node::Element(element))?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| "end tag without matching start tag".to_owned())?;
                attach(&mut stack, &mut document, Node::Element(element))?;
            }
            Event::Text(text) => {
                let value = text
                    .unescape_with(resolve_named_entity)
                    .map_err(|error| format!("invalid character data: {error}"))?
                    .into_owned();
                if stack.is_empty() {
                    if !value.trim().is_empty() {
                        return Err("character data outside the document element".to_owned());
                    }
                    continue;
                }
                attach(&mut stack, &mut document, Node::Text(value))?;
            }
            Event::CData(cdata) => {
                if stack.is_empty() {
                    return Err("CDATA section outside the document element".to_owned());
                }
                let value = String::from_utf8_lossy(&cdata).into_owned();
                attach(&mut stack, &mut document, Node::CData(value))?;
            }
            Event::Comment(comment) => {
                let value = String::from_utf8_lossy(&comment).into_owned();
                attach(&mut stack, &mut document, Node::Comment(value))?;
            }
            Event::PI(pi) => {
                let node = Node::ProcessingInstruction {
                    target: String::from_utf8_lossy(pi.target()).into_owned(),
                    data: String::from_utf8_lossy(pi.content()).trim().to_owned(),
                };
                attach(&mut stack, &mut document, node)?;
            }
            Event::DocType(doctype) => {
                if document.has_root() || !stack.is_empty() {
                    return Err("doctype after the document element".to_owned());
                }
                let value = String::from_utf8_lossy(&doctype).trim().to_owned();
                document.prolog.push(Node::DocumentType(value));
            }
            Event::Decl(_) => {}
            Event::Eof => break,
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(format!("unexpected end of input inside <{}>", open.name));
    }

    Ok(document)
}

/// Appends a finished node to the open parent, or places it at document level.
fn attach(stack: &mut [Element], document: &mut Document, node: Node) -> Result<(), String> {
    if let Some(parent) = stack.last_mut() {
        parent.append_child(node);
        return Ok(());
    }

    match node {
        Node::Element(element) => {
            if document.has_root() {
                return Err("document has more than one root element".to_owned());
            }
            document.root = Some(element);
        }
        other => {
            if !document.has_root() {
                document.prolog.push(other);
            }
        }
    }

    Ok(())
}

fn open_element(reader: &NsReader<&[u8]>, start: &BytesStart<'_>) -> Result<Element, String> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let (resolved, _) = reader.resolve_element(start.name());
    let mut element = Element::new_ns(owned_namespace(resolved, &name)?, name);

    for attribute in start.attributes() {
        let attribute = attribute
            .map_err(|error| format!("malformed attribute on <{}>: {error}", element.name))?;
        let attribute_name = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value_with(resolve_named_entity)
            .map_err(|error| format!("invalid value for `{attribute_name}`: {error}"))?
            .into_owned();

        let namespace = if attribute_name == "xmlns" || attribute_name.starts_with("xmlns:") {
            Some(XMLNS_NAMESPACE.to_owned())
        } else {
            let (resolved, _) = reader.resolve_attribute(attribute.key);
            owned_namespace(resolved, &attribute_name)?
        };

        element
            .attributes
            .push(Attribute::new_ns(namespace, attribute_name, value));
    }

    Ok(element)
}

fn owned_namespace(result: ResolveResult<'_>, name: &str) -> Result<Option<String>, String> {
    match result {
        ResolveResult::Bound(namespace) => {
            let uri = String::from_utf8_lossy(namespace.into_inner()).into_owned();
            Ok((!uri.is_empty()).then_some(uri))
        }
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(format!(
            "undeclared namespace prefix `{}` on `{name}`",
            String::from_utf8_lossy(&prefix)
        )),
    }
}

/// XHTML named entities commonly found in served fragments without a DTD.
fn resolve_named_entity(entity: &str) -> Option<&'static str> {
    match entity {
        "nbsp" => Some("\u{a0}"),
        "copy" => Some("\u{a9}"),
        "reg" => Some("\u{ae}"),
        "deg" => Some("\u{b0}"),
        "middot" => Some("\u{b7}"),
        "laquo" => Some("\u{ab}"),
        "raquo" => Some("\u{bb}"),
        "ndash" => Some("\u{2013}"),
        "mdash" => Some("\u{2014}"),
        "hellip" => Some("\u{2026}"),
        _ => None,
    }
}
