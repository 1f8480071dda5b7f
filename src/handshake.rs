use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::SystemTime;

use crate::transport::ConnectionInfo;

/// Request metadata snapshot captured when a socket is created.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Headers of the request that established the connection.
    pub headers: http::HeaderMap,
    /// Full url of the request.
    pub url: String,
    /// Remote address of the peer, when known.
    pub address: Option<SocketAddr>,
    /// Whether the request carried an `Origin` header (cross-domain client).
    pub xdomain: bool,
    /// Whether the connection was established over an encrypted channel.
    pub secure: bool,
    /// Instant the socket was created.
    pub issued: SystemTime,
    /// Parsed query of the request url.
    pub query: HashMap<String, String>,
}

impl Handshake {
    pub(crate) fn new(info: &ConnectionInfo) -> Self {
        let query = info
            .uri
            .query()
            .map(parse_query)
            .unwrap_or_default();

        Self {
            headers: info.headers.clone(),
            url: info.uri.to_string(),
            address: info.remote_addr,
            xdomain: info.headers.contains_key(http::header::ORIGIN),
            secure: info.secure,
            issued: SystemTime::now(),
            query,
        }
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key.to_string(), value.to_string())
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_query_pairs() {
        let info = ConnectionInfo {
            uri: "/socket.io/?EIO=3&transport=polling&t=12"
                .parse()
                .unwrap(),
            ..Default::default()
        };
        let handshake = Handshake::new(&info);
        assert_eq!(handshake.query.get("EIO").map(String::as_str), Some("3"));
        assert_eq!(
            handshake.query.get("transport").map(String::as_str),
            Some("polling")
        );
        assert!(!handshake.xdomain);
        assert!(!handshake.secure);
    }

    #[test]
    fn origin_header_marks_xdomain() {
        let mut info = ConnectionInfo::default();
        info.headers.insert(
            http::header::ORIGIN,
            http::HeaderValue::from_static("https://example.com"),
        );
        assert!(Handshake::new(&info).xdomain);
    }
}
