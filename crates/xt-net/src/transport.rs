//! Fetch contract consumed by the tile coordinator, plus the HTTP implementation.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use tracing::debug;
use tracing::warn;
use xt_core::TileError;
use xt_core::TileResult;
use xt_dom::Document;
use xt_xhtml::ParseErrorReporting;
use xt_xhtml::XhtmlParser;

use crate::charset::decode_text;
use crate::charset::is_xml_content_type;
use crate::client::HttpClient;
use crate::client::HttpTransportConfig;
use crate::url::RequestUrl;

const FETCH_THREAD_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Identifies which request of which tile a completion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchTicket {
    pub tile: u64,
    pub generation: u64,
}

/// Successful response content: decoded text plus an optional pre-parsed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub text: String,
    pub document: Option<Document>,
}

impl FetchResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: None,
            text: text.into(),
            document: None,
        }
    }

    pub fn with_document(mut self, document: Document) -> Self {
        self.document = Some(document);
        self
    }
}

/// Exactly one of these is delivered per fetch, unless the fetch was cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCompletion {
    pub ticket: FetchTicket,
    pub outcome: TileResult<FetchResponse>,
}

/// Cancellation capability for one in-flight request.
pub trait FetchHandle {
    /// Safe to call any number of times.
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;
}

/// Shared flag checked by the fetch worker before it delivers.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl FetchHandle for CancelFlag {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Issues GET requests and reports completions on a channel.
pub trait Transport {
    fn fetch(
        &mut self,
        url: &str,
        ticket: FetchTicket,
        completions: mpsc::Sender<FetchCompletion>,
    ) -> TileResult<Box<dyn FetchHandle>>;
}

/// Runs each fetch on its own worker thread.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: HttpClient,
    parser: XhtmlParser,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Self {
        Self {
            client: HttpClient::new(config),
            parser: XhtmlParser::new(ParseErrorReporting::Flag),
        }
    }

    /// Parser used for the pre-parsed document of XML responses.
    pub fn with_parser(mut self, parser: XhtmlParser) -> Self {
        self.parser = parser;
        self
    }
}

impl Transport for HttpTransport {
    fn fetch(
        &mut self,
        url: &str,
        ticket: FetchTicket,
        completions: mpsc::Sender<FetchCompletion>,
    ) -> TileResult<Box<dyn FetchHandle>> {
        let url = RequestUrl::parse(url)?;
        let flag = CancelFlag::default();
        let worker_flag = flag.clone();
        let client = self.client.clone();
        let parser = self.parser;

        let job = move || {
            let outcome = execute_fetch(&client, parser, &url);
            if worker_flag.is_cancelled() {
                debug!(tile = ticket.tile, generation = ticket.generation, "dropping cancelled fetch result");
                return;
            }
            let _ = completions.send(FetchCompletion { ticket, outcome });
        };

        thread::Builder::new()
            .name(format!("xtile-fetch-{}", ticket.tile))
            .stack_size(FETCH_THREAD_STACK_SIZE)
            .spawn(job)
            .map_err(|error| {
                TileError::transport(
                    "net.fetch.spawn_failed",
                    format!("failed to spawn fetch worker: {error}"),
                )
            })?;

        Ok(Box::new(flag))
    }
}

fn execute_fetch(
    client: &HttpClient,
    parser: XhtmlParser,
    url: &RequestUrl,
) -> TileResult<FetchResponse> {
    let response = client.get(url)?;
    if !response.is_success() {
        warn!(url = url.as_str(), status = response.status, "tile request rejected");
        return Err(TileError::transport(
            "net.fetch.status",
            format!("`{}` answered with status {}", url.as_str(), response.status),
        ));
    }

    let content_type = response.header("content-type").map(str::to_owned);
    let text = decode_text(&response.body, content_type.as_deref().unwrap_or_default());
    let document = content_type
        .as_deref()
        .filter(|value| is_xml_content_type(value))
        .and_then(|_| parser.parse(&text).ok());

    Ok(FetchResponse {
        status: response.status,
        content_type,
        text,
        document,
    })
}

#[cfg(test)]
mod tests {
    use super::CancelFlag;
    use super::FetchHandle;
    use super::FetchTicket;
    use super::HttpTransport;
    use super::Transport;
    use std::io::Read;
    use std::io::Write;
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn serve_once(response: &'static [u8]) -> u16 {
        let listener = match TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => listener,
            Err(error) => panic!("{error}"),
        };
        let port = match listener.local_addr() {
            Ok(address) => address.port(),
            Err(error) => panic!("{error}"),
        };
        thread::spawn(move || {
            if let Ok((mut socket, _)) = listener.accept() {
                let mut buf = [0_u8; 1024];
                let _ = socket.read(&mut buf);
                let _ = socket.write_all(response);
            }
        });
        port
    }

    #[test]
    fn cancel_flag_is_idempotent() {
        let flag = CancelFlag::default();
        assert!(!flag.is_cancelled());
        flag.cancel();
        flag.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn xml_responses_carry_a_parsed_document() {
        let port = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/xhtml+xml\r\nContent-Length: 13\r\n\r\n<div>hi</div>",
        );
        let (sender, receiver) = mpsc::channel();
        let ticket = FetchTicket {
            tile: 4,
            generation: 9,
        };

        let handle = HttpTransport::default().fetch(&format!("http://127.0.0.1:{port}/t"), ticket, sender);
        assert!(handle.is_ok());

        let completion = match receiver.recv_timeout(Duration::from_secs(10)) {
            Ok(completion) => completion,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(completion.ticket, ticket);
        let response = match completion.outcome {
            Ok(response) => response,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(response.text, "<div>hi</div>");
        assert!(response.document.is_some_and(|document| document.has_root()));
    }

    #[test]
    fn error_status_is_a_failure() {
        let port = serve_once(b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n");
        let (sender, receiver) = mpsc::channel();
        let ticket = FetchTicket {
            tile: 1,
            generation: 1,
        };

        assert!(
            HttpTransport::default()
                .fetch(&format!("http://127.0.0.1:{port}/t"), ticket, sender)
                .is_ok()
        );
        match receiver.recv_timeout(Duration::from_secs(10)) {
            Ok(completion) => assert!(completion.outcome.is_err()),
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn cancelled_fetch_never_delivers() {
        let listener = match TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => listener,
            Err(error) => panic!("{error}"),
        };
        let port = match listener.local_addr() {
            Ok(address) => address.port(),
            Err(error) => panic!("{error}"),
        };
        thread::spawn(move || {
            if let Ok((mut socket, _)) = listener.accept() {
                let mut buf = [0_u8; 1024];
                let _ = socket.read(&mut buf);
                thread::sleep(Duration::from_millis(300));
                let _ = socket.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
            }
        });
        let (sender, receiver) = mpsc::channel();
        let ticket = FetchTicket {
            tile: 2,
            generation: 3,
        };

        let handle = match HttpTransport::default().fetch(&format!("http://127.0.0.1:{port}/t"), ticket, sender) {
            Ok(handle) => handle,
            Err(error) => panic!("{error}"),
        };
        handle.cancel();
        assert!(handle.is_cancelled());

        assert!(receiver.recv_timeout(Duration::from_secs(3)).is_err());
    }

    #[test]
    fn invalid_url_fails_before_spawning() {
        let (sender, _receiver) = mpsc::channel();
        let ticket = FetchTicket {
            tile: 1,
            generation: 1,
        };
        assert!(HttpTransport::default().fetch("mailto:x@y", ticket, sender).is_err());
    }
}
