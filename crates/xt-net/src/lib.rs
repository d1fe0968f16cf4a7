//! Networking for tile content: URL assembly, the fetch contract, and an HTTP/1.1 transport.

pub mod charset;
pub mod client;
pub mod http;
pub mod tls;
pub mod transport;
pub mod url;

pub use client::HttpClient;
pub use client::HttpTransportConfig;
pub use tls::TrustStoreMode;
pub use transport::CancelFlag;
pub use transport::FetchCompletion;
pub use transport::FetchHandle;
pub use transport::FetchResponse;
pub use transport::FetchTicket;
pub use transport::HttpTransport;
pub use transport::Transport;
pub use url::RequestUrl;
pub use url::append_query;
pub use url::encode_component;
pub use url::parameter_string;
