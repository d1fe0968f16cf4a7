//! Blocking one-shot HTTP/1.1 GET client.

use std::io::Write;
use std::net::SocketAddr;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::time::Duration;
use tracing::debug;
use xt_core::TileError;
use xt_core::TileResult;

use crate::http::HttpResponse;
use crate::http::encode_get_request;
use crate::http::read_response;
use crate::tls::BoxedIoStream;
use crate::tls::TrustStoreMode;
use crate::tls::connect_tls;
use crate::url::RequestUrl;

const DEFAULT_USER_AGENT: &str = concat!("xtile/", env!("CARGO_PKG_VERSION"));

/// Connection and safety limits for tile fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTransportConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub max_response_bytes: usize,
    pub trust_store: TrustStoreMode,
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            max_response_bytes: 8 * 1024 * 1024,
            trust_store: TrustStoreMode::WebPkiOnly,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

/// Opens a fresh connection per request; no pooling.
#[derive(Debug, Clone, Default)]
pub struct HttpClient {
    config: HttpTransportConfig,
}

impl HttpClient {
    pub fn new(config: HttpTransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }

    pub fn get(&self, url: &RequestUrl) -> TileResult<HttpResponse> {
        let mut stream = self.open_stream(url)?;

        stream
            .write_all(&encode_get_request(url, &self.config.user_agent))
            .and_then(|()| stream.flush())
            .map_err(|error| {
                TileError::transport(
                    "net.http.write_failed",
                    format!("failed to send request to `{}`: {error}", url.authority()),
                )
            })?;

        let response = read_response(stream, self.config.max_response_bytes)?;
        debug!(url = url.as_str(), status = response.status, bytes = response.body.len(), "http response");
        Ok(response)
    }

    fn open_stream(&self, url: &RequestUrl) -> TileResult<BoxedIoStream> {
        let addresses = resolve(url.host(), url.port())?;
        let stream = connect_first_available(&addresses, &self.config)?;

        if url.is_secure() {
            connect_tls(stream, url.host(), self.config.trust_store)
        } else {
            Ok(Box::new(stream))
        }
    }
}

fn resolve(host: &str, port: u16) -> TileResult<Vec<SocketAddr>> {
    let addresses: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|error| {
            TileError::transport(
                "net.dns.resolve_failed",
                format!("failed to resolve `{host}:{port}`: {error}"),
            )
        })?
        .collect();

    if addresses.is_empty() {
        return Err(TileError::transport(
            "net.dns.no_results",
            format!("resolver returned no addresses for `{host}:{port}`"),
        ));
    }

    Ok(addresses)
}

fn connect_first_available(
    addresses: &[SocketAddr],
    config: &HttpTransportConfig,
) -> TileResult<TcpStream> {
    let mut last_error = None;

    for address in addresses {
        match connect(*address, config) {
            Ok(stream) => return Ok(stream),
            Err(error) => last_error = Some(error),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        TileError::transport(
            "net.transport.no_addresses",
            "no addresses available to open a connection",
        )
    }))
}

fn connect(address: SocketAddr, config: &HttpTransportConfig) -> TileResult<TcpStream> {
    let stream = TcpStream::connect_timeout(&address, config.connect_timeout).map_err(|error| {
        TileError::transport(
            "net.transport.connect_failed",
            format!("failed to connect to `{address}`: {error}"),
        )
    })?;

    stream
        .set_nodelay(true)
        .and_then(|()| stream.set_read_timeout(Some(config.read_timeout)))
        .and_then(|()| stream.set_write_timeout(Some(config.read_timeout)))
        .map_err(|error| {
            TileError::transport(
                "net.transport.socket_options_failed",
                format!("failed to configure socket for `{address}`: {error}"),
            )
        })?;

    Ok(stream)
}
