//! Integration tests for the WebSocket dial path.

use futures_util::{SinkExt, StreamExt};
use snare::{ws_dial, ws_dial_proxy, Destination, Error, ProxyRequest};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::io::AsyncBufReadExt;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

async fn upgrade_request(port: u16) -> ProxyRequest {
  ProxyRequest::from_bytes(
    b"GET /chat HTTP/1.1\r\nHost: example.com\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
      Sec-WebSocket-Key: AQIDBAUGBwgJCgsMDQ4PEA==\r\nSec-WebSocket-Version: 13\r\n\
      X-Session: abc\r\n\r\n",
    Destination::new("127.0.0.1", Some(port), false),
  )
  .await
  .unwrap()
}

async fn echo_server(listener: TcpListener) {
  let (sock, _) = listener.accept().await.unwrap();
  let mut ws = tokio_tungstenite::accept_async(sock).await.unwrap();
  while let Some(Ok(msg)) = ws.next().await {
    if msg.is_text() || msg.is_binary() {
      ws.send(msg).await.unwrap();
    }
  }
}

#[tokio::test]
async fn dials_and_echoes_through_the_session() {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let port = listener.local_addr().unwrap().port();
  let server = tokio::spawn(echo_server(listener));

  let req = upgrade_request(port).await;
  let mut session = ws_dial(req).await.unwrap();

  let rsp = session.request().server_response.as_ref().unwrap();
  assert_eq!(rsp.status().as_u16(), 101);

  session.send(Message::Text("ping".into())).await.unwrap();
  let echoed = session.next().await.unwrap().unwrap();
  assert_eq!(echoed.into_text().unwrap().as_str(), "ping");

  session.send(Message::Close(None)).await.unwrap();
  drop(session);
  server.await.unwrap();
}

#[tokio::test]
async fn session_retains_the_originating_request() {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let port = listener.local_addr().unwrap().port();
  let server = tokio::spawn(echo_server(listener));

  let req = upgrade_request(port).await;
  let session = ws_dial(req).await.unwrap();
  assert_eq!(session.request().dest.host, "127.0.0.1");
  assert!(session.request().is_websocket_upgrade());

  let (_stream, req) = session.into_parts();
  assert_eq!(req.dest.port, Some(port));
  drop(_stream);
  server.abort();
  let _ = server.await;
}

#[tokio::test]
async fn rejects_requests_that_are_not_upgrades() {
  let req = ProxyRequest::from_bytes(
    b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n",
    Destination::new("127.0.0.1", Some(9), false),
  )
  .await
  .unwrap();
  assert!(matches!(
    ws_dial(req).await,
    Err(Error::NotWebSocketUpgrade)
  ));
}

#[tokio::test]
async fn proxy_dial_always_tunnels_with_connect() {
  // Even for a cleartext ws:// destination, the HTTP proxy path must open a
  // CONNECT tunnel before the handshake.
  let proxy = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let proxy_port = proxy.local_addr().unwrap().port();

  let proxy_task = tokio::spawn(async move {
    let (mut sock, _) = proxy.accept().await.unwrap();
    {
      let mut reader = BufReader::new(&mut sock);
      let mut line = String::new();
      reader.read_line(&mut line).await.unwrap();
      assert_eq!(line, "CONNECT 127.0.0.1:8081 HTTP/1.1\r\n");
      loop {
        let mut l = String::new();
        reader.read_line(&mut l).await.unwrap();
        if l == "\r\n" {
          break;
        }
      }
    }
    sock
      .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
      .await
      .unwrap();

    // now act as the websocket server on the tunnelled bytes
    let mut ws = tokio_tungstenite::accept_async(sock).await.unwrap();
    if let Some(Ok(msg)) = ws.next().await {
      ws.send(msg).await.unwrap();
    }
  });

  let req = upgrade_request(8081).await;
  let mut session = ws_dial_proxy(req, "127.0.0.1", proxy_port, None)
    .await
    .unwrap();
  session.send(Message::Text("hi".into())).await.unwrap();
  let echoed = session.next().await.unwrap().unwrap();
  assert_eq!(echoed.into_text().unwrap().as_str(), "hi");
  drop(session);
  proxy_task.await.unwrap();
}
