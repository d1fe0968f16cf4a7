//! Tolerant HTML fragment parsing.
//!
//! Used when a response is not well-formed XHTML but the layer accepts the
//! HTML fallback. The parser never fails: unknown or unmatched markup is
//! dropped or closed implicitly.

use xt_dom::Attribute;
use xt_dom::Element;
use xt_dom::MATHML_NAMESPACE;
use xt_dom::Node;
use xt_dom::SVG_NAMESPACE;
use xt_dom::XHTML_NAMESPACE;
use xt_dom::XML_NAMESPACE;

const XLINK_NAMESPACE: &str = "http://www.w3.org/1999/xlink";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

/// Parses HTML markup into a list of top-level nodes.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlParser;

impl HtmlParser {
    pub fn parse_fragment(&self, input: &str) -> Vec<Node> {
        let mut builder = TreeBuilder::default();
        let bytes = input.as_bytes();
        let mut idx = 0_usize;

        while idx < bytes.len() {
            if bytes[idx] != b'<' {
                let next = find_byte(bytes, idx.saturating_add(1), b'<').unwrap_or(bytes.len());
                builder.append(Node::Text(decode_entities(&input[idx..next])));
                idx = next;
                continue;
            }

            if starts_with(bytes, idx, b"<!--") {
                let body_start = idx.saturating_add(4);
                let (body_end, after) = match find_subslice(bytes, body_start, b"-->") {
                    Some(end) => (end, end.saturating_add(3)),
                    None => (bytes.len(), bytes.len()),
                };
                builder.append(Node::comment(&input[body_start..body_end]));
                idx = after;
                continue;
            }

            if starts_with(bytes, idx, b"<!") || starts_with(bytes, idx, b"<?") {
                idx = skip_to_gt(bytes, idx.saturating_add(2));
                continue;
            }

            let Some((tag, next_idx)) = parse_tag(input, idx) else {
                builder.append(Node::text("<"));
                idx = idx.saturating_add(1);
                continue;
            };

            if tag.is_end {
                builder.close(&tag.name);
                idx = next_idx;
                continue;
            }

            let namespace = builder.namespace_for(&tag.name);
            let is_html = namespace == XHTML_NAMESPACE;
            let mut element = Element::new_ns(
                Some(namespace.to_owned()),
                if is_html {
                    tag.name.to_ascii_lowercase()
                } else {
                    tag.name.clone()
                },
            );
            for (name, value) in tag.attributes {
                let name = if is_html { name.to_ascii_lowercase() } else { name };
                let attribute_namespace = match name.split_once(':') {
                    Some(("xlink", _)) => Some(XLINK_NAMESPACE.to_owned()),
                    Some(("xml", _)) => Some(XML_NAMESPACE.to_owned()),
                    _ => None,
                };
                if element.attribute(&name).is_none() {
                    element
                        .attributes
                        .push(Attribute::new_ns(attribute_namespace, name, value));
                }
            }

            if is_html && RAW_TEXT_ELEMENTS.contains(&element.name.as_str()) && !tag.self_closing {
                let (raw, after_raw) = read_raw_text_until_end_tag(input, next_idx, &element.name);
                if !raw.is_empty() {
                    let text = if element.name == "script" || element.name == "style" {
                        raw.to_owned()
                    } else {
                        decode_entities(raw)
                    };
                    element.append_child(Node::Text(text));
                }
                builder.append(Node::Element(element));
                idx = after_raw;
                continue;
            }

            let closes_immediately = if is_html {
                VOID_ELEMENTS.contains(&element.name.as_str())
            } else {
                tag.self_closing
            };

            if closes_immediately {
                builder.append(Node::Element(element));
            } else {
                builder.open(element);
            }
            idx = next_idx;
        }

        builder.finish()
    }
}

#[derive(Debug, Default)]
struct TreeBuilder {
    open: Vec<Element>,
    roots: Vec<Node>,
}

impl TreeBuilder {
    fn namespace_for(&self, name: &str) -> &'static str {
        if name.eq_ignore_ascii_case("svg") {
            return SVG_NAMESPACE;
        }
        if name.eq_ignore_ascii_case("math") {
            return MATHML_NAMESPACE;
        }

        match self.open.last() {
            Some(parent) if parent.local_name() == "foreignObject" => XHTML_NAMESPACE,
            Some(parent) => match parent.namespace.as_deref() {
                Some(SVG_NAMESPACE) => SVG_NAMESPACE,
                Some(MATHML_NAMESPACE) => MATHML_NAMESPACE,
                _ => XHTML_NAMESPACE,
            },
            None => XHTML_NAMESPACE,
        }
    }

    fn append(&mut self, node: Node) {
        if let Node::Text(value) = &node {
            if value.is_empty() {
                return;
            }
        }

        let siblings = match self.open.last_mut() {
            Some(parent) => &mut parent.children,
            None => &mut self.roots,
        };

        // Adjacent text runs merge, as they would in a live tree.
        if let (Some(Node::Text(previous)), Node::Text(value)) = (siblings.last_mut(), &node) {
            previous.push_str(value);
            return;
        }
        siblings.push(node);
    }

    fn open(&mut self, element: Element) {
        self.open.push(element);
    }

    /// Closes the nearest open element with this name. Unmatched end tags are ignored.
    fn close(&mut self, name: &str) {
        let Some(position) = self
            .open
            .iter()
            .rposition(|element| element.name.eq_ignore_ascii_case(name))
        else {
            return;
        };

        while self.open.len() > position {
            let Some(element) = self.open.pop() else {
                break;
            };
            self.append(Node::Element(element));
        }
    }

    fn finish(mut self) -> Vec<Node> {
        while let Some(element) = self.open.pop() {
            self.append(Node::Element(element));
        }
        self.roots
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedTag {
    name: String,
    is_end: bool,
    self_closing: bool,
    attributes: Vec<(String, String)>,
}

fn parse_tag(input: &str, start: usize) -> Option<(ParsedTag, usize)> {
    let bytes = input.as_bytes();
    if bytes.get(start).copied() != Some(b'<') {
        return None;
    }

    let mut idx = start.saturating_add(1);
    let mut is_end = false;
    if bytes.get(idx).copied() == Some(b'/') {
        is_end = true;
        idx = idx.saturating_add(1);
    }

    let name_start = idx;
    while idx < bytes.len() && is_tag_name_char(bytes[idx]) {
        idx = idx.saturating_add(1);
    }
    if idx == name_start || !bytes[name_start].is_ascii_alphabetic() {
        return None;
    }
    let name = input[name_start..idx].to_owned();

    let mut attributes = Vec::new();
    let mut self_closing = false;
    loop {
        idx = skip_spaces(bytes, idx);
        match bytes.get(idx).copied() {
            None => return None,
            Some(b'>') => break,
            Some(b'/') => {
                self_closing = bytes.get(idx.saturating_add(1)).copied() == Some(b'>');
                idx = idx.saturating_add(1);
                continue;
            }
            Some(_) => {}
        }

        let attr_start = idx;
        while idx < bytes.len() && !is_attribute_name_end(bytes[idx]) {
            idx = idx.saturating_add(1);
        }
        if idx == attr_start {
            idx = idx.saturating_add(1);
            continue;
        }
        let attr_name = input[attr_start..idx].to_owned();

        idx = skip_spaces(bytes, idx);
        if bytes.get(idx).copied() != Some(b'=') {
            attributes.push((attr_name, String::new()));
            continue;
        }
        idx = skip_spaces(bytes, idx.saturating_add(1));

        let value = match bytes.get(idx).copied() {
            Some(quote @ (b'"' | b'\'')) => {
                let value_start = idx.saturating_add(1);
                let value_end = find_byte(bytes, value_start, quote)?;
                idx = value_end.saturating_add(1);
                &input[value_start..value_end]
            }
            _ => {
                let value_start = idx;
                while idx < bytes.len() && !bytes[idx].is_ascii_whitespace() && bytes[idx] != b'>'
                {
                    idx = idx.saturating_add(1);
                }
                &input[value_start..idx]
            }
        };
        attributes.push((attr_name, decode_entities(value)));
    }

    Some((
        ParsedTag {
            name,
            is_end,
            self_closing,
            attributes,
        },
        idx.saturating_add(1),
    ))
}

fn read_raw_text_until_end_tag<'a>(
    input: &'a str,
    start: usize,
    tag_name: &str,
) -> (&'a str, usize) {
    let bytes = input.as_bytes();
    let tag_bytes = tag_name.as_bytes();
    let mut idx = start;

    while idx < bytes.len() {
        if bytes[idx] == b'<'
            && bytes.get(idx.saturating_add(1)).copied() == Some(b'/')
            && starts_with_ignore_ascii_case(bytes, idx.saturating_add(2), tag_bytes)
            && tag_name_boundary(bytes, idx.saturating_add(2 + tag_bytes.len()))
        {
            let end = skip_to_gt(bytes, idx.saturating_add(2));
            return (&input[start..idx], end);
        }

        idx = idx.saturating_add(1);
    }

    (&input[start..], bytes.len())
}

/// Decodes the character references that show up in practice.
fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_owned();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let decoded = rest[1..]
            .find(';')
            .filter(|end| *end <= 10)
            .and_then(|end| decode_reference(&rest[1..=end]).map(|ch| (ch, end + 2)));

        match decoded {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_reference(reference: &str) -> Option<char> {
    if let Some(numeric) = reference.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse::<u32>().ok()?,
        };
        return char::from_u32(code);
    }

    match reference {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        "copy" => Some('\u{a9}'),
        "reg" => Some('\u{ae}'),
        "deg" => Some('\u{b0}'),
        "middot" => Some('\u{b7}'),
        "ndash" => Some('\u{2013}'),
        "mdash" => Some('\u{2014}'),
        "hellip" => Some('\u{2026}'),
        _ => None,
    }
}

fn skip_to_gt(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() {
        if bytes[idx] == b'>' {
            return idx.saturating_add(1);
        }
        idx = idx.saturating_add(1);
    }

    bytes.len()
}

fn tag_name_boundary(bytes: &[u8], idx: usize) -> bool {
    match bytes.get(idx).copied() {
        None => true,
        Some(byte) => byte.is_ascii_whitespace() || byte == b'>' || byte == b'/',
    }
}

fn skip_spaces(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
        idx = idx.saturating_add(1);
    }
    idx
}

fn is_tag_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b':')
}

fn is_attribute_name_end(byte: u8) -> bool {
    byte.is_ascii_whitespace() || matches!(byte, b'=' | b'>' | b'/')
}

fn starts_with(bytes: &[u8], idx: usize, pattern: &[u8]) -> bool {
    let end = idx.saturating_add(pattern.len());
    end <= bytes.len() && bytes[idx..end] == *pattern
}

fn starts_with_ignore_ascii_case(bytes: &[u8], idx: usize, pattern: &[u8]) -> bool {
    let end = idx.saturating_add(pattern.len());
    if end > bytes.len() {
        return false;
    }

    bytes[idx..end]
        .iter()
        .zip(pattern.iter())
        .all(|(left, right)| left.eq_ignore_ascii_case(right))
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }

    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

fn find_byte(bytes: &[u8], from: usize, byte: u8) -> Option<usize> {
    bytes
        .get(from..)?
        .iter()
        .position(|candidate| *candidate == byte)
        .map(|offset| from + offset)
}
