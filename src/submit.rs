//! The submission engine: re-send a captured request to its destination and
//! capture the response, directly or through an HTTP CONNECT or SOCKS5
//! proxy.

use crate::errors::{Error, Result};
use crate::http1;
use crate::request::ProxyRequest;
use crate::socket::MaybeTlsStream;
use crate::socks;
use crate::tls;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use http::StatusCode;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// The future a [`NetDialer`] resolves to.
pub type DialFuture = Pin<Box<dyn Future<Output = std::io::Result<TcpStream>> + Send>>;

/// A custom TCP dialer, taking `(host, port)` and producing a connected
/// stream. Set on [`ProxyRequest::dialer`] to reroute submission (e.g. into
/// a test harness or a pinned interface).
pub type NetDialer = Arc<dyn Fn(&str, u16) -> DialFuture + Send + Sync>;

/// Username/password credentials for an upstream proxy.
///
/// HTTP proxies receive them as a `Proxy-Authorization` header; SOCKS5
/// proxies through RFC 1929 sub-negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyCreds {
  /// Proxy username.
  pub username: String,
  /// Proxy password.
  pub password: String,
}

impl ProxyCreds {
  /// Construct credentials.
  pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
    ProxyCreds {
      username: username.into(),
      password: password.into(),
    }
  }

  /// The value of a `Proxy-Authorization` header carrying these credentials.
  pub fn serialize_header(&self) -> String {
    let token = BASE64_STANDARD.encode(format!("{}:{}", self.username, self.password));
    format!("Basic {token}")
  }
}

pub(crate) struct ProxyRoute<'a> {
  pub host: &'a str,
  pub port: u16,
  pub creds: Option<&'a ProxyCreds>,
  pub socks: bool,
}

/// Submit a request directly to its destination, attaching the response and
/// stamping the start/end timestamps.
pub async fn submit(req: &mut ProxyRequest) -> Result<()> {
  submit_request(req, None).await
}

/// Submit a request through an HTTP proxy. TLS destinations are tunnelled
/// with a `CONNECT` handshake and written in origin form; cleartext
/// destinations are written in absolute-URI proxy form.
pub async fn submit_proxy(
  req: &mut ProxyRequest,
  proxy_host: &str,
  proxy_port: u16,
  creds: Option<&ProxyCreds>,
) -> Result<()> {
  submit_request(
    req,
    Some(ProxyRoute {
      host: proxy_host,
      port: proxy_port,
      creds,
      socks: false,
    }),
  )
  .await
}

/// Submit a request through a SOCKS5 proxy.
pub async fn submit_socks(
  req: &mut ProxyRequest,
  proxy_host: &str,
  proxy_port: u16,
  creds: Option<&ProxyCreds>,
) -> Result<()> {
  submit_request(
    req,
    Some(ProxyRoute {
      host: proxy_host,
      port: proxy_port,
      creds,
      socks: true,
    }),
  )
  .await
}

async fn submit_request(req: &mut ProxyRequest, route: Option<ProxyRoute<'_>>) -> Result<()> {
  let dest_host = req.dest.host.clone();
  let dest_port = req.dest.port_or_default();
  let dialer = req.dialer.clone();
  tracing::debug!("submitting {} to {}", req.status_line(), req.dest);

  let mut proxy_form = false;
  let mut tcp = match &route {
    None => dial(dialer.as_ref(), &dest_host, dest_port).await?,
    Some(r) if r.socks => {
      let mut stream = dial(dialer.as_ref(), r.host, r.port).await?;
      socks::connect(&mut stream, &dest_host, dest_port, r.creds).await?;
      stream
    }
    Some(r) => {
      let stream = dial(dialer.as_ref(), r.host, r.port).await?;
      proxy_form = !req.dest.use_tls;
      stream
    }
  };

  if let Some(r) = &route {
    if !r.socks && req.dest.use_tls {
      perform_connect(&mut tcp, &dest_host, dest_port).await?;
    }
  }

  let mut stream = if req.dest.use_tls {
    MaybeTlsStream::from(tls::client_connect(tcp, &dest_host).await?)
  } else {
    MaybeTlsStream::from(tcp)
  };

  req.start = Some(OffsetDateTime::now_utc());
  let bytes = if proxy_form {
    let creds = route.as_ref().and_then(|r| r.creds);
    req.serialize_for_proxy(creds)
  } else {
    req.serialize()
  };
  stream.write_all(&bytes).await?;
  stream.flush().await?;

  let mut reader = BufReader::new(stream);
  let rsp = http1::read_response(&mut reader, req.method()).await?;
  req.end = Some(OffsetDateTime::now_utc());
  req.server_response = Some(Box::new(rsp));
  Ok(())
}

pub(crate) async fn dial(
  dialer: Option<&NetDialer>,
  host: &str,
  port: u16,
) -> Result<TcpStream> {
  match dialer {
    Some(d) => Ok(d(host, port).await?),
    None => Ok(TcpStream::connect((host, port)).await?),
  }
}

/// Perform an HTTP `CONNECT` handshake for `host:port` on an established
/// proxy connection. Writes the exact tunnel request
/// (`CONNECT host:port HTTP/1.1`, `Host`, `Proxy-Connection: Keep-Alive`),
/// reads one response, and fails unless the status is 200.
pub async fn perform_connect<S>(stream: &mut S, host: &str, port: u16) -> Result<()>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let tunnel = format!(
    "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}\r\nProxy-Connection: Keep-Alive\r\n\r\n"
  );
  stream.write_all(tunnel.as_bytes()).await?;
  stream.flush().await?;

  let mut reader = BufReader::new(&mut *stream);
  let (_version, status, _reason, _headers) = http1::read_response_head(&mut reader).await?;
  if status != StatusCode::OK {
    return Err(Error::Handshake(format!(
      "proxy CONNECT to {host}:{port} returned {status}"
    )));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::io::AsyncReadExt;

  #[test]
  fn creds_serialize_to_basic_auth() {
    let creds = ProxyCreds::new("aladdin", "opensesame");
    assert_eq!(
      creds.serialize_header(),
      "Basic YWxhZGRpbjpvcGVuc2VzYW1l"
    );
  }

  #[tokio::test]
  async fn connect_handshake_writes_exact_bytes() {
    let (mut client, mut server) = tokio::io::duplex(4096);
    let handshake = tokio::spawn(async move {
      perform_connect(&mut client, "example.com", 443).await
    });

    let expected = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com\r\nProxy-Connection: Keep-Alive\r\n\r\n";
    let mut seen = vec![0u8; expected.len()];
    server.read_exact(&mut seen).await.unwrap();
    assert_eq!(seen, expected);

    server
      .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
      .await
      .unwrap();
    handshake.await.unwrap().unwrap();
  }

  #[tokio::test]
  async fn connect_handshake_rejects_non_200() {
    let (mut client, mut server) = tokio::io::duplex(4096);
    let handshake = tokio::spawn(async move {
      perform_connect(&mut client, "example.com", 443).await
    });

    let mut sink = vec![0u8; 16];
    server.read_exact(&mut sink).await.unwrap();
    server
      .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\nContent-Length: 0\r\n\r\n")
      .await
      .unwrap();
    assert!(matches!(
      handshake.await.unwrap(),
      Err(Error::Handshake(_))
    ));
  }
}
