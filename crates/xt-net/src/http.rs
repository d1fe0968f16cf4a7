//! HTTP/1.1 message encoding and response decoding.
//!
//! Requests are sent with `Connection: close`, so a response is read to EOF
//! and then framed from the buffered bytes.

use brotli::Decompressor;
use flate2::read::DeflateDecoder;
use flate2::read::GzDecoder;
use flate2::read::ZlibDecoder;
use std::io::Cursor;
use std::io::Read;
use xt_core::TileError;
use xt_core::TileResult;

use crate::url::RequestUrl;

const ACCEPT_HEADER: &str = "application/xhtml+xml,application/xml;q=0.9,text/html;q=0.8,*/*;q=0.5";

/// Single response header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Decoded response: framing and content encodings already removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }
}

/// Encodes a GET request for `url`.
pub fn encode_get_request(url: &RequestUrl, user_agent: &str) -> Vec<u8> {
    let mut encoded = String::new();
    encoded.push_str("GET ");
    encoded.push_str(&url.path_and_query());
    encoded.push_str(" HTTP/1.1\r\n");

    let headers = [
        ("Host", url.authority()),
        ("User-Agent", user_agent.to_owned()),
        ("Accept", ACCEPT_HEADER.to_owned()),
        ("Accept-Encoding", "gzip, deflate, br".to_owned()),
        ("Connection", "close".to_owned()),
    ];
    for (name, value) in headers {
        encoded.push_str(name);
        encoded.push_str(": ");
        encoded.push_str(&value);
        encoded.push_str("\r\n");
    }
    encoded.push_str("\r\n");
    encoded.into_bytes()
}

/// Reads a complete response from `stream`, refusing anything larger than `max_bytes`.
pub fn read_response<R: Read>(stream: R, max_bytes: usize) -> TileResult<HttpResponse> {
    let mut raw = Vec::new();
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX).saturating_add(1);
    stream.take(limit).read_to_end(&mut raw).map_err(|error| {
        TileError::transport(
            "net.http.read_failed",
            format!("failed while reading HTTP response: {error}"),
        )
    })?;

    if raw.len() > max_bytes {
        return Err(TileError::transport(
            "net.http.response_too_large",
            format!("response exceeds {max_bytes} bytes"),
        ));
    }

    parse_response(&raw)
}

pub fn parse_response(raw: &[u8]) -> TileResult<HttpResponse> {
    let header_end = find_header_end(raw).ok_or_else(|| {
        TileError::transport(
            "net.http.unexpected_eof",
            "connection closed before the response head completed",
        )
    })?;

    let head = std::str::from_utf8(&raw[..header_end]).map_err(|error| {
        TileError::transport(
            "net.http.head_invalid_utf8",
            format!("response head is not valid UTF-8: {error}"),
        )
    })?;

    let mut lines = head.split("\r\n");
    let status = parse_status_line(lines.next().unwrap_or_default())?;

    let mut headers = Vec::new();
    for line in lines.filter(|line| !line.is_empty()) {
        let (name, value) = line.split_once(':').ok_or_else(|| {
            TileError::transport(
                "net.http.header_invalid",
                format!("invalid header line `{line}`"),
            )
        })?;
        headers.push(Header {
            name: name.trim().to_owned(),
            value: value.trim().to_owned(),
        });
    }

    let payload = &raw[header_end..];
    let body = if status_disallows_body(status) {
        Vec::new()
    } else if header_contains(&headers, "transfer-encoding", "chunked") {
        decode_chunked(payload)?
    } else if let Some(length) = content_length(&headers)? {
        if payload.len() < length {
            return Err(TileError::transport(
                "net.http.body_truncated",
                format!("expected {length} body bytes, received {}", payload.len()),
            ));
        }
        payload[..length].to_vec()
    } else {
        payload.to_vec()
    };

    let body = decode_content_encoding(&headers, body)?;
    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|idx| idx + 4)
}

fn parse_status_line(line: &str) -> TileResult<u16> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(TileError::transport(
            "net.http.version_unsupported",
            format!("unsupported status line `{line}`"),
        ));
    }

    let code = parts.next().unwrap_or_default();
    match code.parse::<u16>() {
        Ok(code) if (100..=599).contains(&code) => Ok(code),
        _ => Err(TileError::transport(
            "net.http.status_line_invalid",
            format!("invalid status code in `{line}`"),
        )),
    }
}

fn status_disallows_body(status: u16) -> bool {
    (100..200).contains(&status) || status == 204 || status == 304
}

fn content_length(headers: &[Header]) -> TileResult<Option<usize>> {
    let Some(header) = headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case("content-length"))
    else {
        return Ok(None);
    };

    header.value.parse::<usize>().map(Some).map_err(|error| {
        TileError::transport(
            "net.http.content_length_invalid",
            format!("invalid Content-Length `{}`: {error}", header.value),
        )
    })
}

fn header_contains(headers: &[Header], name: &str, value: &str) -> bool {
    headers.iter().any(|header| {
        header.name.eq_ignore_ascii_case(name)
            && header
                .value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case(value))
    })
}

fn decode_chunked(payload: &[u8]) -> TileResult<Vec<u8>> {
    let mut decoded = Vec::new();
    let mut pos = 0_usize;

    loop {
        let line_end = payload
            .get(pos..)
            .and_then(|rest| rest.windows(2).position(|window| window == b"\r\n"))
            .map(|offset| pos + offset)
            .ok_or_else(|| {
                TileError::transport("net.http.chunk_truncated", "chunk size line is incomplete")
            })?;

        let line = String::from_utf8_lossy(&payload[pos..line_end]);
        let size_token = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_token, 16).map_err(|error| {
            TileError::transport(
                "net.http.chunk_size_invalid",
                format!("invalid chunk size `{size_token}`: {error}"),
            )
        })?;
        pos = line_end + 2;

        if size == 0 {
            return Ok(decoded);
        }

        let data_end = pos.saturating_add(size);
        if payload.get(data_end..data_end.saturating_add(2)) != Some(b"\r\n".as_slice()) {
            return Err(TileError::transport(
                "net.http.chunk_truncated",
                "chunk data is incomplete or missing its CRLF",
            ));
        }
        decoded.extend_from_slice(&payload[pos..data_end]);
        pos = data_end + 2;
    }
}

fn decode_content_encoding(headers: &[Header], body: Vec<u8>) -> TileResult<Vec<u8>> {
    let encodings: Vec<String> = headers
        .iter()
        .filter(|header| header.name.eq_ignore_ascii_case("content-encoding"))
        .flat_map(|header| header.value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    let mut decoded = body;
    for encoding in encodings.iter().rev() {
        decoded = match encoding.as_str() {
            "identity" => decoded,
            "gzip" | "x-gzip" => read_all(GzDecoder::new(Cursor::new(decoded)), "gzip")?,
            "deflate" => decode_deflate(decoded)?,
            "br" => read_all(Decompressor::new(Cursor::new(decoded), 4096), "brotli")?,
            other => {
                return Err(TileError::transport(
                    "net.http.content_encoding_unsupported",
                    format!("unsupported content encoding `{other}`"),
                ));
            }
        };
    }

    Ok(decoded)
}

fn decode_deflate(body: Vec<u8>) -> TileResult<Vec<u8>> {
    let mut zlib = Vec::new();
    if ZlibDecoder::new(body.as_slice()).read_to_end(&mut zlib).is_ok() {
        return Ok(zlib);
    }

    // Some servers send raw deflate without the zlib wrapper.
    read_all(DeflateDecoder::new(Cursor::new(body)), "deflate")
}

fn read_all<R: Read>(mut decoder: R, label: &str) -> TileResult<Vec<u8>> {
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded).map_err(|error| {
        TileError::transport(
            "net.http.decode_failed",
            format!("{label} decode failed: {error}"),
        )
    })?;
    Ok(decoded)
}
