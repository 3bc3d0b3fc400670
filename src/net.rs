//! Gateway socket dialing.
//!
//! Without a proxy this is a plain `connect_async`. With one, the TCP
//! connection is opened to the proxy, an HTTP CONNECT tunnel is established
//! to the gateway host, and the WebSocket (TLS included, for `wss`) is then
//! spoken through the tunnel.

use std::fmt;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{client_async_tls, connect_async, MaybeTlsStream, WebSocketStream};

use crate::proxy::ProxyEndpoint;

/// The gateway socket type shared by both dial paths.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors raised while dialing the gateway.
#[derive(Debug)]
pub enum TransportError {
    /// TCP dial or gateway URL problem.
    Connect(String),
    /// The proxy refused or mangled the CONNECT handshake.
    Proxy(String),
    /// WebSocket handshake or protocol failure.
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Connect(msg) => write!(f, "connect failed: {msg}"),
            TransportError::Proxy(msg) => write!(f, "proxy tunnel failed: {msg}"),
            TransportError::WebSocket(e) => write!(f, "websocket failed: {e}"),
        }
    }
}

/// Open the gateway socket, through `proxy` when the session is bound to one.
pub async fn connect_gateway(
    gateway_url: &str,
    proxy: Option<&ProxyEndpoint>,
) -> Result<WsStream, TransportError> {
    match proxy {
        None => {
            let (stream, _response) = connect_async(gateway_url)
                .await
                .map_err(|e| TransportError::WebSocket(Box::new(e)))?;
            Ok(stream)
        }
        Some(proxy) => {
            let (host, port) = gateway_endpoint(gateway_url)?;
            let tcp = TcpStream::connect((proxy.host(), proxy.port()))
                .await
                .map_err(|e| {
                    TransportError::Connect(format!("proxy {}: {e}", proxy.authority()))
                })?;
            let tunneled = tunnel_through(tcp, &host, port, proxy).await?;
            let (stream, _response) = client_async_tls(gateway_url, tunneled)
                .await
                .map_err(|e| TransportError::WebSocket(Box::new(e)))?;
            Ok(stream)
        }
    }
}

/// Host and port the CONNECT tunnel must target, from the gateway URL.
fn gateway_endpoint(gateway_url: &str) -> Result<(String, u16), TransportError> {
    let url = url::Url::parse(gateway_url)
        .map_err(|e| TransportError::Connect(format!("invalid gateway url: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| TransportError::Connect("gateway url has no host".to_string()))?
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| TransportError::Connect("gateway url has no port".to_string()))?;
    Ok((host, port))
}

/// The CONNECT request line and headers, blank line included.
fn connect_request(host: &str, port: u16, basic_auth: Option<&str>) -> String {
    let mut request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n");
    if let Some(credentials) = basic_auth {
        request.push_str(&format!("Proxy-Authorization: Basic {credentials}\r\n"));
    }
    request.push_str("\r\n");
    request
}

/// Establish a CONNECT tunnel over `tcp` and hand back the raw stream once
/// the proxy reports success.
async fn tunnel_through(
    mut tcp: TcpStream,
    host: &str,
    port: u16,
    proxy: &ProxyEndpoint,
) -> Result<TcpStream, TransportError> {
    let request = connect_request(host, port, proxy.basic_auth().as_deref());
    tcp.write_all(request.as_bytes())
        .await
        .map_err(|e| TransportError::Proxy(format!("send CONNECT: {e}")))?;

    // Read the response head byte-wise up to the blank line. The proxy sends
    // nothing further until we start the tunneled protocol, so this cannot
    // swallow WebSocket bytes.
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = tcp
            .read(&mut byte)
            .await
            .map_err(|e| TransportError::Proxy(format!("read CONNECT response: {e}")))?;
        if n == 0 {
            return Err(TransportError::Proxy(
                "proxy closed during CONNECT".to_string(),
            ));
        }
        head.push(byte[0]);
        if head.len() > 8192 {
            return Err(TransportError::Proxy(
                "oversized CONNECT response".to_string(),
            ));
        }
    }

    let head = String::from_utf8_lossy(&head);
    let status_line = head.lines().next().unwrap_or("");
    let accepted = status_line
        .split_whitespace()
        .nth(1)
        .is_some_and(|code| code.starts_with('2'));
    if accepted {
        Ok(tcp)
    } else {
        Err(TransportError::Proxy(format!(
            "CONNECT rejected: {status_line}"
        )))
    }
}
