use crate::ca::CertAuthority;
use crate::error::{Error, Result};
use crate::id::CONN_IDS;
use crate::peek::PeekStream;
use bytes::{Buf, Bytes};
use snare::{Destination, ProxyRequest};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

/// TLS record ContentType `handshake`; the first byte of a ClientHello.
const TLS_HANDSHAKE_BYTE: u8 = 0x16;

enum ConnStream {
  Tcp(TcpStream),
  Peeked(PeekStream<TcpStream>),
  Tls(Box<TlsStream<PeekStream<TcpStream>>>),
}

/// A logical client connection surfaced by the interception listener.
///
/// The wrapped transport starts as raw TCP and may be replaced in place by
/// a buffered-peek wrapper and then a server-side TLS session during
/// [`InterceptedConn::start_maybe_tls`]. A request consumed during
/// translation can be put back so the consumer reads the connection as if
/// it began at the start of that request.
pub struct InterceptedConn {
  id: u64,
  stream: Option<ConnStream>,
  pending: Option<Bytes>,
  ca: Option<Arc<CertAuthority>>,
  dest: Destination,
}

impl std::fmt::Debug for InterceptedConn {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("InterceptedConn")
      .field("id", &self.id)
      .field("dest", &self.dest)
      .field("tls", &self.is_tls())
      .finish_non_exhaustive()
  }
}

impl InterceptedConn {
  /// Wrap a freshly accepted socket. The destination starts empty and is
  /// finalized by the listener before the connection is surfaced.
  pub fn new(stream: TcpStream) -> Self {
    InterceptedConn {
      id: CONN_IDS.next(),
      stream: Some(ConnStream::Tcp(stream)),
      pending: None,
      ca: None,
      dest: Destination::default(),
    }
  }

  /// The connection's unique id.
  pub fn id(&self) -> u64 {
    self.id
  }

  /// Attach the CA used to mint leaves if this connection upgrades to TLS.
  pub fn set_ca(&mut self, ca: Arc<CertAuthority>) {
    self.ca = Some(ca);
  }

  /// The destination descriptor. This is what the client intended to reach,
  /// not the peer socket address.
  pub fn remote_addr(&self) -> &Destination {
    &self.dest
  }

  /// The local address of the underlying socket.
  pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
    match &self.stream {
      Some(ConnStream::Tcp(s)) => s.local_addr(),
      Some(ConnStream::Peeked(s)) => s.get_ref().local_addr(),
      Some(ConnStream::Tls(s)) => s.get_ref().0.get_ref().local_addr(),
      None => Err(io::Error::new(
        io::ErrorKind::NotConnected,
        "no active stream",
      )),
    }
  }

  /// Whether reads currently go through a server-side TLS session.
  pub fn is_tls(&self) -> bool {
    matches!(self.stream, Some(ConnStream::Tls(_)))
  }

  pub(crate) fn set_destination(&mut self, dest: Destination) {
    self.dest = dest;
  }

  /// Queue a parsed request so the next reads return its serialized bytes
  /// verbatim, before anything from the underlying stream. One-shot: the
  /// bytes are cleared as they are consumed. Reads smaller than the
  /// serialized request drain it across as many calls as needed.
  pub fn put_back(&mut self, request: &ProxyRequest) {
    self.pending = Some(Bytes::from(request.serialize()));
  }

  /// Prepare to impersonate `hostname` if the client is about to start TLS.
  ///
  /// Peeks one byte through a buffered wrapper. `0x16` (a TLS handshake
  /// record) mints a leaf for `hostname` from the attached CA, completes a
  /// server-side handshake and returns `true`; any other byte leaves the
  /// peeked wrapper installed so nothing is lost, and returns `false`.
  pub async fn start_maybe_tls(&mut self, hostname: &str) -> Result<bool> {
    let stream = self.stream.take().ok_or(Error::Uninitialized(self.id))?;
    let mut peeked = match stream {
      ConnStream::Tcp(tcp) => PeekStream::new(tcp),
      ConnStream::Peeked(peeked) => peeked,
      tls @ ConnStream::Tls(_) => {
        self.stream = Some(tls);
        return Ok(true);
      }
    };

    let first = match peeked.peek(1).await {
      Ok(bytes) => bytes.first().copied(),
      Err(e) => {
        self.stream = Some(ConnStream::Peeked(peeked));
        return Err(e.into());
      }
    };
    let Some(first) = first else {
      self.stream = Some(ConnStream::Peeked(peeked));
      return Err(Error::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "connection closed before TLS detection",
      )));
    };
    if first != TLS_HANDSHAKE_BYTE {
      self.stream = Some(ConnStream::Peeked(peeked));
      return Ok(false);
    }

    let minted = self
      .ca
      .as_ref()
      .ok_or_else(|| Error::certificate("no CA certificate attached"))
      .and_then(|ca| ca.sign_host(&[hostname]))
      .and_then(|(chain, key)| snare::tls::server_config(chain, key).map_err(Error::from));
    let config = match minted {
      Ok(config) => config,
      Err(e) => {
        self.stream = Some(ConnStream::Peeked(peeked));
        return Err(e);
      }
    };

    let acceptor = TlsAcceptor::from(Arc::new(config));
    let tls = acceptor.accept(peeked).await?;
    self.stream = Some(ConnStream::Tls(Box::new(tls)));
    Ok(true)
  }

  fn no_stream(&self) -> io::Error {
    io::Error::new(
      io::ErrorKind::NotConnected,
      format!("intercepted connection {} does not have an active stream", self.id),
    )
  }
}

impl AsyncRead for InterceptedConn {
  fn poll_read(
    self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
  ) -> Poll<io::Result<()>> {
    let this = self.get_mut();
    if let Some(pending) = &mut this.pending {
      let n = pending.len().min(buf.remaining());
      buf.put_slice(&pending[..n]);
      pending.advance(n);
      if pending.is_empty() {
        this.pending = None;
      }
      return Poll::Ready(Ok(()));
    }
    match &mut this.stream {
      Some(ConnStream::Tcp(s)) => Pin::new(s).poll_read(cx, buf),
      Some(ConnStream::Peeked(s)) => Pin::new(s).poll_read(cx, buf),
      Some(ConnStream::Tls(s)) => Pin::new(s).poll_read(cx, buf),
      None => Poll::Ready(Err(this.no_stream())),
    }
  }
}

impl AsyncWrite for InterceptedConn {
  fn poll_write(
    self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &[u8],
  ) -> Poll<io::Result<usize>> {
    let this = self.get_mut();
    match &mut this.stream {
      Some(ConnStream::Tcp(s)) => Pin::new(s).poll_write(cx, buf),
      Some(ConnStream::Peeked(s)) => Pin::new(s).poll_write(cx, buf),
      Some(ConnStream::Tls(s)) => Pin::new(s).poll_write(cx, buf),
      None => Poll::Ready(Err(this.no_stream())),
    }
  }

  fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    let this = self.get_mut();
    match &mut this.stream {
      Some(ConnStream::Tcp(s)) => Pin::new(s).poll_flush(cx),
      Some(ConnStream::Peeked(s)) => Pin::new(s).poll_flush(cx),
      Some(ConnStream::Tls(s)) => Pin::new(s).poll_flush(cx),
      None => Poll::Ready(Err(this.no_stream())),
    }
  }

  fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    let this = self.get_mut();
    match &mut this.stream {
      Some(ConnStream::Tcp(s)) => Pin::new(s).poll_shutdown(cx),
      Some(ConnStream::Peeked(s)) => Pin::new(s).poll_shutdown(cx),
      Some(ConnStream::Tls(s)) => Pin::new(s).poll_shutdown(cx),
      None => Poll::Ready(Err(this.no_stream())),
    }
  }
}
