use bytes::Bytes;
use std::fmt;
use std::fmt::Write;
use std::ops::Deref;

/// An owned message body.
///
/// Bodies are immutable byte buffers; mutation goes through
/// `ProxyRequest::set_body` / `ProxyResponse::set_body` so the
/// `Content-Length` header stays consistent.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Body {
  pub(crate) inner: Bytes,
}

impl Body {
  /// Length of the body in bytes.
  pub fn len(&self) -> usize {
    self.inner.len()
  }
  /// Whether the body is empty.
  pub fn is_empty(&self) -> bool {
    self.inner.is_empty()
  }
  /// An independent copy of the body bytes.
  pub fn to_vec(&self) -> Vec<u8> {
    self.inner.to_vec()
  }
}

impl Deref for Body {
  type Target = Bytes;

  fn deref(&self) -> &Self::Target {
    &self.inner
  }
}

impl AsRef<[u8]> for Body {
  fn as_ref(&self) -> &[u8] {
    &self.inner
  }
}

impl From<Bytes> for Body {
  #[inline]
  fn from(b: Bytes) -> Body {
    Body { inner: b }
  }
}

impl From<Vec<u8>> for Body {
  #[inline]
  fn from(v: Vec<u8>) -> Body {
    Body { inner: v.into() }
  }
}

impl From<String> for Body {
  #[inline]
  fn from(s: String) -> Body {
    s.into_bytes().into()
  }
}

impl From<&'static str> for Body {
  #[inline]
  fn from(s: &'static str) -> Body {
    Body {
      inner: Bytes::from_static(s.as_bytes()),
    }
  }
}

impl fmt::Debug for Body {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match std::str::from_utf8(&self.inner) {
      Ok(s) => fmt::Display::fmt(s, f),
      Err(_err) => fmt::Display::fmt(
        &self
          .inner
          .as_ref()
          .iter()
          .fold(String::new(), |mut output, b| {
            let _ = write!(output, "\\x{b:02x}");
            output
          }),
        f,
      ),
    }
  }
}
