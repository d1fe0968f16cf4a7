//! Response body to text decoding.

use encoding_rs::Encoding;
use encoding_rs::UTF_8;

const SNIFF_PREFIX_BYTES: usize = 1024;

/// Decodes a response body using the declared or sniffed charset, defaulting to UTF-8.
///
/// Precedence: byte-order mark, `charset` in the content type, then an
/// in-document declaration (`<?xml encoding=…?>` or `<meta charset=…>`).
pub fn decode_text(body: &[u8], content_type: &str) -> String {
    let encoding = charset_from_content_type(content_type)
        .or_else(|| charset_from_document_prefix(body))
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);

    // `decode` sniffs a BOM first and only falls back to `encoding` without one.
    let (decoded, _, _) = encoding.decode(body);
    decoded.into_owned()
}

/// True for content types a browser would expose as a parsed XML document.
pub fn is_xml_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "text/xml" || essence == "application/xml" || essence.ends_with("+xml")
}

fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|part| {
        let (name, value) = part.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let label = value.trim().trim_matches('"').trim_matches('\'');
        (!label.is_empty()).then(|| label.to_owned())
    })
}

fn charset_from_document_prefix(body: &[u8]) -> Option<String> {
    let prefix = &body[..body.len().min(SNIFF_PREFIX_BYTES)];
    let text = String::from_utf8_lossy(prefix).to_ascii_lowercase();

    if text.trim_start().starts_with("<?xml") {
        let declaration_end = text.find("?>")?;
        return attribute_value(&text[..declaration_end], "encoding");
    }

    let meta = text.find("<meta")?;
    attribute_value(&text[meta..], "charset")
}

fn attribute_value(text: &str, name: &str) -> Option<String> {
    let start = text.find(name)? + name.len();
    let rest = text[start..].trim_start().strip_prefix('=')?.trim_start();
    let value: String = rest
        .trim_start_matches(['"', '\''])
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | ':' | '.'))
        .collect();
    (!value.is_empty()).then_some(value)
}
