//! Captured WebSocket messages and the upstream dial path for intercepted
//! WebSocket upgrades.

use crate::body::Body;
use crate::errors::{Error, Result};
use crate::headers::Headers;
use crate::request::ProxyRequest;
use crate::response::ProxyResponse;
use crate::socket::MaybeTlsStream;
use crate::submit::{dial, perform_connect, ProxyCreds, ProxyRoute};
use crate::{socks, tls};
use std::ops::{Deref, DerefMut};
use time::OffsetDateTime;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// RFC 6455 opcodes as they appear in [`WsMessage::opcode`].
pub mod opcode {
  /// Text frame.
  pub const TEXT: u8 = 1;
  /// Binary frame.
  pub const BINARY: u8 = 2;
  /// Close frame.
  pub const CLOSE: u8 = 8;
  /// Ping frame.
  pub const PING: u8 = 9;
  /// Pong frame.
  pub const PONG: u8 = 10;
}

/// Which peer a WebSocket message was travelling toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  /// Client to server.
  ToServer,
  /// Server to client.
  ToClient,
}

/// A captured WebSocket message.
#[derive(Debug, Default)]
pub struct WsMessage {
  /// RFC 6455 opcode; see [`opcode`].
  pub opcode: u8,
  /// Frame payload.
  pub payload: Body,
  /// Travel direction.
  pub direction: Direction,
  /// When the message was observed.
  pub timestamp: Option<OffsetDateTime>,
  /// A deep copy of the request that opened the session, when one was
  /// attached. Messages stored on [`ProxyRequest::ws_messages`] leave this
  /// unset; the owning request is the association.
  pub request: Option<Box<ProxyRequest>>,
  /// The message as it was before the user mutated it, if any.
  pub unmangled: Option<Box<WsMessage>>,
  /// Identifier assigned by a storage layer; empty while unsaved.
  pub db_id: String,
}

impl Default for Direction {
  fn default() -> Self {
    Direction::ToServer
  }
}

impl PartialEq for WsMessage {
  /// Structural equality over opcode, direction and payload.
  fn eq(&self, other: &Self) -> bool {
    self.opcode == other.opcode
      && self.direction == other.direction
      && self.payload == other.payload
  }
}

impl WsMessage {
  /// Construct a message with no timestamp or associations.
  pub fn new<P: Into<Body>>(opcode: u8, payload: P, direction: Direction) -> Self {
    WsMessage {
      opcode,
      payload: payload.into(),
      direction,
      ..WsMessage::default()
    }
  }

  /// Capture a protocol message.
  pub fn from_message(msg: Message, direction: Direction) -> Self {
    let opcode = match &msg {
      Message::Text(_) => opcode::TEXT,
      Message::Binary(_) | Message::Frame(_) => opcode::BINARY,
      Message::Close(_) => opcode::CLOSE,
      Message::Ping(_) => opcode::PING,
      Message::Pong(_) => opcode::PONG,
    };
    WsMessage::new(opcode, msg.into_data().to_vec(), direction)
  }

  /// Rebuild a protocol message from the captured payload. Unknown opcodes
  /// are sent as binary frames.
  pub fn to_message(&self) -> Message {
    let payload = self.payload.to_vec();
    match self.opcode {
      opcode::TEXT => Message::Text(String::from_utf8_lossy(&payload).to_string().into()),
      opcode::CLOSE => Message::Close(None),
      opcode::PING => Message::Ping(payload.into()),
      opcode::PONG => Message::Pong(payload.into()),
      _ => Message::Binary(payload.into()),
    }
  }

  /// A copy of the message without its storage id or unmangled chain.
  pub fn clone_message(&self) -> WsMessage {
    WsMessage {
      opcode: self.opcode,
      payload: self.payload.clone(),
      direction: self.direction,
      timestamp: self.timestamp,
      request: self.request.as_ref().map(|r| Box::new(r.deep_clone())),
      unmangled: None,
      db_id: String::new(),
    }
  }

  /// [`WsMessage::clone_message`] plus the storage id and a recursive deep
  /// clone of the unmangled chain.
  pub fn deep_clone(&self) -> WsMessage {
    let mut new = self.clone_message();
    new.db_id = self.db_id.clone();
    if let Some(unmangled) = &self.unmangled {
      new.unmangled = Some(Box::new(unmangled.deep_clone()));
    }
    new
  }
}

/// An established upstream WebSocket session, retaining the request whose
/// handshake opened it.
pub struct WsSession {
  inner: WebSocketStream<MaybeTlsStream>,
  request: ProxyRequest,
}

impl WsSession {
  /// The request used for the handshake, with its `server_response` set to
  /// the handshake response.
  pub fn request(&self) -> &ProxyRequest {
    &self.request
  }

  /// Mutable access to the originating request, e.g. to append captured
  /// messages to [`ProxyRequest::ws_messages`].
  pub fn request_mut(&mut self) -> &mut ProxyRequest {
    &mut self.request
  }

  /// Split into the protocol stream and the originating request.
  pub fn into_parts(self) -> (WebSocketStream<MaybeTlsStream>, ProxyRequest) {
    (self.inner, self.request)
  }
}

impl Deref for WsSession {
  type Target = WebSocketStream<MaybeTlsStream>;

  fn deref(&self) -> &Self::Target {
    &self.inner
  }
}

impl DerefMut for WsSession {
  fn deref_mut(&mut self) -> &mut Self::Target {
    &mut self.inner
  }
}

/// Dial the request's destination directly and perform the WebSocket
/// handshake. The request must be a WebSocket upgrade.
pub async fn ws_dial(req: ProxyRequest) -> Result<WsSession> {
  ws_dial_inner(req, None).await
}

/// As [`ws_dial`], but through an HTTP proxy. A `CONNECT` tunnel is always
/// established, regardless of whether the destination uses TLS.
pub async fn ws_dial_proxy(
  req: ProxyRequest,
  proxy_host: &str,
  proxy_port: u16,
  creds: Option<&ProxyCreds>,
) -> Result<WsSession> {
  ws_dial_inner(
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

/// As [`ws_dial`], but through a SOCKS5 proxy.
pub async fn ws_dial_socks(
  req: ProxyRequest,
  proxy_host: &str,
  proxy_port: u16,
  creds: Option<&ProxyCreds>,
) -> Result<WsSession> {
  ws_dial_inner(
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

async fn ws_dial_inner(mut req: ProxyRequest, route: Option<ProxyRoute<'_>>) -> Result<WsSession> {
  if !req.is_websocket_upgrade() {
    return Err(Error::NotWebSocketUpgrade);
  }
  let dest_host = req.dest.host.clone();
  let dest_port = req.dest.port_or_default();
  let dialer = req.dialer.clone();

  let tcp = match &route {
    None => dial(dialer.as_ref(), &dest_host, dest_port).await?,
    Some(r) if r.socks => {
      let mut stream = dial(dialer.as_ref(), r.host, r.port).await?;
      socks::connect(&mut stream, &dest_host, dest_port, r.creds).await?;
      stream
    }
    Some(r) => {
      let mut stream = dial(dialer.as_ref(), r.host, r.port).await?;
      perform_connect(&mut stream, &dest_host, dest_port).await?;
      stream
    }
  };

  let stream = if req.dest.use_tls {
    MaybeTlsStream::from(tls::client_connect(tcp, &dest_host).await?)
  } else {
    MaybeTlsStream::from(tcp)
  };

  let url = req.dest_url()?;
  tracing::debug!("starting websocket handshake with {url}");
  let mut builder = http::Request::builder().method(http::Method::GET).uri(url.as_str());
  for (name, value) in req.headers().iter() {
    if reinjected_by_handshake(name) {
      continue;
    }
    builder = builder.header(name, value);
  }
  let handshake = builder.body(()).map_err(Error::from)?;

  let (inner, rsp) = tokio_tungstenite::client_async(handshake, stream).await?;
  req.server_response = Some(Box::new(response_from_handshake(rsp)));
  Ok(WsSession { inner, request: req })
}

// Headers the handshake writes itself; forwarding the captured copies would
// duplicate them on the wire.
fn reinjected_by_handshake(name: &str) -> bool {
  name.eq_ignore_ascii_case("Host")
    || name.eq_ignore_ascii_case("Upgrade")
    || name.eq_ignore_ascii_case("Connection")
    || name.eq_ignore_ascii_case("Sec-WebSocket-Key")
    || name.eq_ignore_ascii_case("Sec-WebSocket-Version")
    || name.eq_ignore_ascii_case("Sec-WebSocket-Extensions")
    || name.eq_ignore_ascii_case("Sec-WebSocket-Protocol")
}

fn response_from_handshake(rsp: http::Response<Option<Vec<u8>>>) -> ProxyResponse {
  let (parts, body) = rsp.into_parts();
  let mut headers = Headers::new();
  for (name, value) in parts.headers.iter() {
    headers.append(
      name.as_str(),
      String::from_utf8_lossy(value.as_bytes()).to_string(),
    );
  }
  ProxyResponse::from_wire(
    parts.version,
    parts.status,
    None,
    headers,
    body.unwrap_or_default(),
  )
}
