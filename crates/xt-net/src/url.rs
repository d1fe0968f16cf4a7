//! Request URL validation and query-string assembly.

use url::Url;
use url::form_urlencoded;
use xt_core::TileError;
use xt_core::TileResult;

/// Schemes a tile request may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

/// Canonical absolute URL for one tile fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestUrl {
    parsed: Url,
    scheme: Scheme,
    host: String,
    port: u16,
}

impl RequestUrl {
    pub fn parse(input: &str) -> TileResult<Self> {
        let mut parsed = Url::parse(input).map_err(|error| {
            TileError::transport(
                "net.url.invalid",
                format!("failed to parse URL `{input}`: {error}"),
            )
        })?;

        if parsed.cannot_be_a_base() {
            return Err(TileError::transport(
                "net.url.invalid_base",
                format!("`{input}` cannot be fetched"),
            ));
        }

        let scheme = match parsed.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(TileError::transport(
                    "net.url.scheme_unsupported",
                    format!("unsupported scheme `{other}`"),
                ));
            }
        };

        let host = parsed
            .host_str()
            .ok_or_else(|| TileError::transport("net.url.host_missing", "URL must include a host"))?
            .to_ascii_lowercase();
        let port = parsed.port_or_known_default().unwrap_or(scheme.default_port());

        // Fragments never go on the wire.
        parsed.set_fragment(None);

        Ok(Self {
            parsed,
            scheme,
            host,
            port,
        })
    }

    pub fn as_str(&self) -> &str {
        self.parsed.as_str()
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        matches!(self.scheme, Scheme::Https)
    }

    /// Value for the `Host` header.
    pub fn authority(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn path_and_query(&self) -> String {
        let path = if self.parsed.path().is_empty() {
            "/"
        } else {
            self.parsed.path()
        };

        match self.parsed.query() {
            Some(query) => format!("{path}?{query}"),
            None => path.to_owned(),
        }
    }
}

/// Appends an encoded query fragment to `url`.
///
/// A URL already ending in `?` or `&` takes the fragment as is; a URL that
/// already carries a query gets `&`; otherwise `?` starts the query.
pub fn append_query(url: &str, query: &str) -> String {
    if query.is_empty() {
        return url.to_owned();
    }

    let separator = if url.ends_with('?') || url.ends_with('&') {
        ""
    } else if url.contains('?') || url.contains('&') {
        "&"
    } else {
        "?"
    };
    format!("{url}{separator}{query}")
}

/// Joins ordered name/value pairs as `name=value&...`, each side encoded with
/// [`encode_component`].
pub fn parameter_string<'a, I>(params: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut query = String::new();
    for (name, value) in params {
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&encode_component(name));
        query.push('=');
        query.push_str(&encode_component(value));
    }
    query
}

/// URI component encoding: space is `%20` and `!'()*-._~` stay literal.
pub fn encode_component(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes())
        .map(|chunk| match chunk {
            "+" => "%20",
            "%21" => "!",
            "%27" => "'",
            "%28" => "(",
            "%29" => ")",
            "%7E" => "~",
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::RequestUrl;
    use super::append_query;
    use super::encode_component;
    use super::parameter_string;

    #[test]
    fn parses_and_strips_fragment() {
        let url = match RequestUrl::parse("http://Tiles.Example.com:8080/wms?a=1#frag") {
            Ok(url) => url,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(url.host(), "tiles.example.com");
        assert_eq!(url.port(), 8080);
        assert_eq!(url.authority(), "tiles.example.com:8080");
        assert_eq!(url.path_and_query(), "/wms?a=1");
        assert!(!url.as_str().contains("frag"));
        assert!(!url.is_secure());
    }

    #[test]
    fn rejects_unsupported_schemes() {
        assert!(RequestUrl::parse("ftp://example.com/tile").is_err());
        assert!(RequestUrl::parse("not a url").is_err());
    }

    #[test]
    fn append_query_picks_separator() {
        assert_eq!(append_query("http://h/t", "a=1"), "http://h/t?a=1");
        assert_eq!(append_query("http://h/t?x=1", "a=1"), "http://h/t?x=1&a=1");
        assert_eq!(append_query("http://h/t?", "a=1"), "http://h/t?a=1");
        assert_eq!(append_query("http://h/t?x=1&", "a=1"), "http://h/t?x=1&a=1");
        assert_eq!(append_query("http://h/t", ""), "http://h/t");
    }

    #[test]
    fn parameter_string_encodes_names_and_values() {
        let query = parameter_string([("BBOX", "0,0,1,1"), ("b", ""), ("q", "a b&c")]);
        assert_eq!(query, "BBOX=0%2C0%2C1%2C1&b=&q=a%20b%26c");
    }

    #[test]
    fn component_encoding_keeps_uri_marks() {
        assert_eq!(encode_component("f(x) = 'a'!~*"), "f(x)%20%3D%20'a'!~*");
        assert_eq!(encode_component("a+b/c?"), "a%2Bb%2Fc%3F");
        assert_eq!(encode_component("é"), "%C3%A9");
    }
}
