use std::io::Error;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

/// An outbound byte stream that is either raw TCP or a client-side TLS
/// session over TCP.
///
/// The TLS role here is the trust-any machine-in-the-middle client; see
/// [`crate::tls`].
#[derive(Debug)]
pub enum MaybeTlsStream {
  /// Plain TCP
  Tcp(TcpStream),
  /// TLS over TCP
  Tls(Box<TlsStream<TcpStream>>),
}

impl MaybeTlsStream {
  /// The local address of the underlying socket.
  pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
    match self {
      MaybeTlsStream::Tcp(s) => s.local_addr(),
      MaybeTlsStream::Tls(s) => s.get_ref().0.local_addr(),
    }
  }

  /// The peer address of the underlying socket.
  pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
    match self {
      MaybeTlsStream::Tcp(s) => s.peer_addr(),
      MaybeTlsStream::Tls(s) => s.get_ref().0.peer_addr(),
    }
  }
}

impl From<TcpStream> for MaybeTlsStream {
  fn from(stream: TcpStream) -> Self {
    MaybeTlsStream::Tcp(stream)
  }
}

impl From<TlsStream<TcpStream>> for MaybeTlsStream {
  fn from(stream: TlsStream<TcpStream>) -> Self {
    MaybeTlsStream::Tls(Box::new(stream))
  }
}

impl AsyncRead for MaybeTlsStream {
  fn poll_read(
    self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
  ) -> Poll<std::io::Result<()>> {
    match self.get_mut() {
      MaybeTlsStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
      MaybeTlsStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
    }
  }
}

impl AsyncWrite for MaybeTlsStream {
  fn poll_write(
    self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &[u8],
  ) -> Poll<Result<usize, Error>> {
    match self.get_mut() {
      MaybeTlsStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
      MaybeTlsStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
    }
  }

  fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
    match self.get_mut() {
      MaybeTlsStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
      MaybeTlsStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
    }
  }

  fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
    match self.get_mut() {
      MaybeTlsStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
      MaybeTlsStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
    }
  }
}
