use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

/// Wraps a byte stream so a bounded lookahead is possible without consuming
/// bytes.
///
/// Once a stream is wrapped, the adapter must be its only reader: bytes
/// pulled into the lookahead buffer exist nowhere else. Reads drain the
/// buffer before touching the inner stream, so nothing peeked is ever lost.
#[derive(Debug)]
pub struct PeekStream<S> {
  inner: S,
  buf: Vec<u8>,
  pos: usize,
}

impl<S> PeekStream<S> {
  /// Wrap a stream. The lookahead buffer starts empty.
  pub fn new(inner: S) -> Self {
    PeekStream {
      inner,
      buf: Vec::new(),
      pos: 0,
    }
  }

  /// A reference to the wrapped stream.
  pub fn get_ref(&self) -> &S {
    &self.inner
  }

  fn buffered(&self) -> &[u8] {
    &self.buf[self.pos..]
  }
}

impl<S: AsyncRead + Unpin> PeekStream<S> {
  /// Return up to `n` bytes of lookahead without consuming them. Fewer than
  /// `n` bytes are returned only when the stream reaches EOF first.
  pub async fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
    while self.buf.len() - self.pos < n {
      let mut chunk = [0u8; 1024];
      let read = self.inner.read(&mut chunk).await?;
      if read == 0 {
        break;
      }
      self.buf.extend_from_slice(&chunk[..read]);
    }
    let end = (self.pos + n).min(self.buf.len());
    Ok(&self.buf[self.pos..end])
  }
}

impl<S: AsyncRead + Unpin> AsyncRead for PeekStream<S> {
  fn poll_read(
    self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
  ) -> Poll<io::Result<()>> {
    let this = self.get_mut();
    if this.pos < this.buf.len() {
      let n = this.buffered().len().min(buf.remaining());
      buf.put_slice(&this.buf[this.pos..this.pos + n]);
      this.pos += n;
      if this.pos == this.buf.len() {
        this.buf.clear();
        this.pos = 0;
      }
      return Poll::Ready(Ok(()));
    }
    Pin::new(&mut this.inner).poll_read(cx, buf)
  }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PeekStream<S> {
  fn poll_write(
    self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &[u8],
  ) -> Poll<io::Result<usize>> {
    Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
  }

  fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Pin::new(&mut self.get_mut().inner).poll_flush(cx)
  }

  fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
  }
}
