//! URL-scheme-addressed transport endpoints.

use crate::error::ProtocolError;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    /// An ephemeral remote reachable only via an established HTTP session
    /// (e.g. a callback object handed to a browser client).
    TcpTethered { host: String, port: u16 },
    WebSocket { host: String, port: u16, path: String },
    SecuredWebSocket { host: String, port: u16, path: String },
    Http { host: String, port: u16, path: String },
    SecuredHttp { host: String, port: u16, path: String },
    SharedMemory { listener_uuid: Uuid },
    Udp { host: String, port: u16 },
    Quic { host: String, port: u16 },
}

impl Endpoint {
    pub fn scheme(&self) -> &'static str {
        match self {
            Endpoint::Tcp { .. } | Endpoint::TcpTethered { .. } => "tcp",
            Endpoint::WebSocket { .. } => "ws",
            Endpoint::SecuredWebSocket { .. } => "wss",
            Endpoint::Http { .. } => "http",
            Endpoint::SecuredHttp { .. } => "https",
            Endpoint::SharedMemory { .. } => "mem",
            Endpoint::Udp { .. } => "udp",
            Endpoint::Quic { .. } => "quic",
        }
    }

    pub fn parse(url: &str) -> Result<Self, ProtocolError> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| ProtocolError::InvalidEndpoint(url.to_string()))?;

        if scheme == "mem" {
            let uuid = Uuid::parse_str(rest).map_err(|_| ProtocolError::InvalidEndpoint(url.to_string()))?;
            return Ok(Endpoint::SharedMemory { listener_uuid: uuid });
        }

        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, format!("/{path}")),
            None => (rest, String::new()),
        };
        let (host, port_str) = authority
            .split_once(':')
            .ok_or_else(|| ProtocolError::InvalidEndpoint(url.to_string()))?;
        if host.is_empty() {
            return Err(ProtocolError::InvalidEndpoint(url.to_string()));
        }
        let port: u16 = port_str
            .parse()
            .map_err(|_| ProtocolError::InvalidEndpoint(url.to_string()))?;
        let host = host.to_string();

        Ok(match scheme {
            "tcp" => Endpoint::Tcp { host, port },
            "ws" => Endpoint::WebSocket { host, port, path },
            "wss" => Endpoint::SecuredWebSocket { host, port, path },
            "http" => Endpoint::Http { host, port, path },
            "https" => Endpoint::SecuredHttp { host, port, path },
            "udp" => Endpoint::Udp { host, port },
            "quic" => Endpoint::Quic { host, port },
            _ => return Err(ProtocolError::InvalidEndpoint(url.to_string())),
        })
    }

    pub fn format(&self) -> String {
        match self {
            Endpoint::Tcp { host, port } | Endpoint::TcpTethered { host, port } => {
                format!("tcp://{host}:{port}")
            }
            Endpoint::WebSocket { host, port, path } => format!("ws://{host}:{port}{path}"),
            Endpoint::SecuredWebSocket { host, port, path } => format!("wss://{host}:{port}{path}"),
            Endpoint::Http { host, port, path } => format!("http://{host}:{port}{path}"),
            Endpoint::SecuredHttp { host, port, path } => format!("https://{host}:{port}{path}"),
            Endpoint::SharedMemory { listener_uuid } => format!("mem://{listener_uuid}"),
            Endpoint::Udp { host, port } => format!("udp://{host}:{port}"),
            Endpoint::Quic { host, port } => format!("quic://{host}:{port}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_scheme() {
        let urls = [
            "tcp://127.0.0.1:9000",
            "ws://example.com:8080/rpc",
            "wss://example.com:8443/rpc",
            "http://example.com:80/api",
            "https://example.com:443/api",
            "udp://10.0.0.1:5000",
            "quic://10.0.0.1:4433",
            "mem://aaaaaaaa-0000-0000-0000-000000000001",
        ];
        for url in urls {
            let parsed = Endpoint::parse(url).unwrap();
            assert_eq!(parsed.format(), url);
        }
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(Endpoint::parse("ftp://host:21").is_err());
    }

    #[test]
    fn rejects_missing_port() {
        assert!(Endpoint::parse("tcp://host").is_err());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(Endpoint::parse("not-a-url-at-all").is_err());
    }

    #[test]
    fn mem_endpoint_has_no_port() {
        let parsed = Endpoint::parse("mem://aaaaaaaa-0000-0000-0000-000000000001").unwrap();
        assert!(matches!(parsed, Endpoint::SharedMemory { .. }));
    }
}
