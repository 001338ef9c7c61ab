//! Submission through an HTTP proxy, observed from the proxy's side of the
//! wire: a TLS destination must arrive as a CONNECT tunnel carrying a TLS
//! handshake and an origin-form request.

use snare::{submit_proxy, Destination, ProxyRequest};
use snare_intercept::CertAuthority;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

async fn read_head<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> Vec<String> {
  let mut lines = Vec::new();
  loop {
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    if line == "\r\n" {
      break;
    }
    lines.push(line);
  }
  lines
}

#[tokio::test]
async fn tls_destination_is_tunnelled_with_connect() {
  let proxy = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = proxy.local_addr().unwrap();

  let ca = CertAuthority::generate().unwrap();
  let (chain, key) = ca.sign_host(&["example.com"]).unwrap();
  let server_config = snare::tls::server_config(chain, key).unwrap();

  let proxy_task = tokio::spawn(async move {
    let (mut sock, _) = proxy.accept().await.unwrap();

    // 1. the CONNECT line, verbatim
    {
      let mut reader = BufReader::new(&mut sock);
      let head = read_head(&mut reader).await;
      assert_eq!(head[0], "CONNECT example.com:443 HTTP/1.1\r\n");
      assert!(head.contains(&"Host: example.com\r\n".to_string()));
      assert!(head.contains(&"Proxy-Connection: Keep-Alive\r\n".to_string()));
    }
    sock
      .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
      .await
      .unwrap();

    // 2. a TLS handshake on the tunnelled stream
    let acceptor = TlsAcceptor::from(Arc::new(server_config));
    let mut tls = acceptor.accept(sock).await.unwrap();

    // 3. the request in origin form
    let mut reader = BufReader::new(&mut tls);
    let head = read_head(&mut reader).await;
    assert_eq!(head[0], "GET /path HTTP/1.1\r\n");

    tls
      .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\nsecret")
      .await
      .unwrap();
    tls.flush().await.unwrap();
  });

  let mut req = ProxyRequest::from_bytes(
    b"GET /path HTTP/1.1\r\nHost: example.com\r\n\r\n",
    Destination::new("example.com", Some(443), true),
  )
  .await
  .unwrap();
  submit_proxy(&mut req, "127.0.0.1", addr.port(), None).await.unwrap();
  proxy_task.await.unwrap();

  let rsp = req.server_response.as_ref().unwrap();
  assert_eq!(rsp.status().as_u16(), 200);
  assert_eq!(rsp.body_bytes(), b"secret");
  assert!(req.start.is_some());
  assert!(req.end.is_some());
}

#[tokio::test]
async fn failed_connect_surfaces_a_handshake_error() {
  let proxy = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = proxy.local_addr().unwrap();

  let proxy_task = tokio::spawn(async move {
    let (mut sock, _) = proxy.accept().await.unwrap();
    let mut reader = BufReader::new(&mut sock);
    read_head(&mut reader).await;
    sock
      .write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n")
      .await
      .unwrap();
  });

  let mut req = ProxyRequest::from_bytes(
    b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n",
    Destination::new("example.com", Some(443), true),
  )
  .await
  .unwrap();
  let err = submit_proxy(&mut req, "127.0.0.1", addr.port(), None)
    .await
    .unwrap_err();
  assert!(matches!(err, snare::Error::Handshake(_)));
  assert!(req.server_response.is_none());
  proxy_task.await.unwrap();
}
