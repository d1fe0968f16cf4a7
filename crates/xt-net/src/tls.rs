//! TLS upgrade for HTTPS tile requests.

use std::io::Read;
use std::io::Write;
use std::net::TcpStream;
use xt_core::TileError;
use xt_core::TileResult;

#[cfg(feature = "tls-rustls")]
use rustls::ClientConfig;
#[cfg(feature = "tls-rustls")]
use rustls::ClientConnection;
#[cfg(feature = "tls-rustls")]
use rustls::RootCertStore;
#[cfg(feature = "tls-rustls")]
use rustls::StreamOwned;
#[cfg(feature = "tls-rustls")]
use rustls::pki_types::ServerName;
#[cfg(feature = "tls-rustls")]
use std::sync::Arc;

/// Byte stream the HTTP codec runs over, plain or encrypted.
pub trait IoStream: Read + Write + Send {}
impl<T> IoStream for T where T: Read + Write + Send {}

pub type BoxedIoStream = Box<dyn IoStream>;

/// Which trust anchors verify server certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrustStoreMode {
    /// Embedded Mozilla/WebPKI roots only.
    #[default]
    WebPkiOnly,
    /// WebPKI roots plus the operating-system store (enterprise/local CAs).
    WebPkiAndOs,
}

impl TrustStoreMode {
    pub fn from_name(value: &str) -> Option<Self> {
        match value {
            "webpki" => Some(Self::WebPkiOnly),
            "os" | "webpki+os" => Some(Self::WebPkiAndOs),
            _ => None,
        }
    }
}

#[cfg(feature = "tls-rustls")]
pub fn connect_tls(
    mut stream: TcpStream,
    server_name: &str,
    trust_store: TrustStoreMode,
) -> TileResult<BoxedIoStream> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let roots = root_store(trust_store)?;

    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|error| {
            TileError::transport(
                "net.tls.config_versions_invalid",
                format!("failed to configure TLS protocol versions: {error}"),
            )
        })?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    let name = ServerName::try_from(server_name.to_owned()).map_err(|error| {
        TileError::transport(
            "net.tls.server_name_invalid",
            format!("invalid TLS server name `{server_name}`: {error}"),
        )
    })?;

    let mut connection = ClientConnection::new(Arc::new(config), name).map_err(|error| {
        TileError::transport(
            "net.tls.connection_init_failed",
            format!("failed to initialize TLS for `{server_name}`: {error}"),
        )
    })?;

    connection.complete_io(&mut stream).map_err(|error| {
        TileError::transport(
            "net.tls.handshake_failed",
            format!("TLS handshake failed for `{server_name}`: {error}"),
        )
    })?;

    Ok(Box::new(StreamOwned::new(connection, stream)))
}

#[cfg(feature = "tls-rustls")]
fn root_store(trust_store: TrustStoreMode) -> TileResult<RootCertStore> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if trust_store == TrustStoreMode::WebPkiAndOs {
        let native = rustls_native_certs::load_native_certs();
        if native.certs.is_empty() && !native.errors.is_empty() {
            let details = native
                .errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(TileError::transport(
                "net.tls.os_roots_load_failed",
                format!("failed to load operating-system roots: {details}"),
            ));
        }

        // Unparseable OS certificates are skipped rather than failing the fetch.
        let (_added, _ignored) = roots.add_parsable_certificates(native.certs);
    }

    Ok(roots)
}

#[cfg(not(feature = "tls-rustls"))]
pub fn connect_tls(
    _stream: TcpStream,
    server_name: &str,
    _trust_store: TrustStoreMode,
) -> TileResult<BoxedIoStream> {
    Err(TileError::transport(
        "net.tls.backend_unavailable",
        format!("cannot fetch `{server_name}` over HTTPS; enable `xt-net/tls-rustls`"),
    ))
}
