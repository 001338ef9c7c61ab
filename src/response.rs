use crate::body::Body;
use crate::errors::Result;
use crate::headers::Headers;
use crate::http1;
use crate::CR_LF;
use http::{Method, StatusCode, Version};
use std::fmt::{Debug, Formatter};
use std::io::Cursor;
use tokio::io::BufReader;

/// A captured HTTP response.
///
/// Like [`crate::ProxyRequest`], this is a plain record over the wire form:
/// serializing writes the status line, headers and body back out verbatim,
/// except that a missing reason phrase is synthesized from the status code.
#[derive(Default)]
pub struct ProxyResponse {
  version: Version,
  status: StatusCode,
  reason: Option<String>,
  headers: Headers,
  body: Body,
  /// Identifier assigned by a storage layer; empty while unsaved.
  pub db_id: String,
  /// The response as it was before the user mutated it, if any.
  pub unmangled: Option<Box<ProxyResponse>>,
}

impl Debug for ProxyResponse {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ProxyResponse")
      .field("status_line", &self.status_line())
      .field("headers", &self.headers)
      .field("body", &self.body)
      .finish()
  }
}

impl PartialEq for ProxyResponse {
  /// Structural equality over status line, headers and body. Storage ids and
  /// unmangled chains do not participate.
  fn eq(&self, other: &Self) -> bool {
    self.status_line() == other.status_line()
      && self.headers == other.headers
      && self.body == other.body
  }
}

impl ProxyResponse {
  pub(crate) fn from_wire(
    version: Version,
    status: StatusCode,
    reason: Option<String>,
    headers: Headers,
    body: Vec<u8>,
  ) -> Self {
    ProxyResponse {
      version,
      status,
      reason,
      headers,
      body: body.into(),
      db_id: String::new(),
      unmangled: None,
    }
  }

  /// Parse a response from its full wire representation.
  pub async fn from_bytes(b: &[u8]) -> Result<Self> {
    let mut reader = BufReader::new(Cursor::new(b.to_vec()));
    http1::read_response(&mut reader, &Method::GET).await
  }

  /// Protocol version.
  pub fn version(&self) -> Version {
    self.version
  }

  /// Status code.
  pub fn status(&self) -> StatusCode {
    self.status
  }

  /// Set the status code, leaving the captured reason phrase in place.
  pub fn set_status(&mut self, status: StatusCode) {
    self.status = status;
  }

  /// Reason phrase as transmitted, if any.
  pub fn reason(&self) -> Option<&str> {
    self.reason.as_deref()
  }

  /// Replace the reason phrase.
  pub fn set_reason<S: Into<String>>(&mut self, reason: S) {
    self.reason = Some(reason.into());
  }

  /// Header multimap.
  pub fn headers(&self) -> &Headers {
    &self.headers
  }

  /// Mutable header multimap.
  ///
  /// A `Content-Length` written here is overwritten by the next
  /// [`ProxyResponse::set_body`].
  pub fn headers_mut(&mut self) -> &mut Headers {
    &mut self.headers
  }

  /// The body buffer.
  pub fn body(&self) -> &Body {
    &self.body
  }

  /// An independent copy of the body bytes.
  pub fn body_bytes(&self) -> Vec<u8> {
    self.body.to_vec()
  }

  /// Replace the body, keeping `Content-Length` equal to its length.
  pub fn set_body<B: Into<Body>>(&mut self, body: B) {
    self.body = body.into();
    self
      .headers
      .set("Content-Length", self.body.len().to_string());
  }

  /// The reason phrase to write on the wire: the captured phrase when
  /// present (with a duplicated `"<code> "` prefix stripped), otherwise the
  /// canonical phrase for the code, otherwise `status code <code>`.
  pub fn status_text(&self) -> String {
    match self.reason.as_deref() {
      Some(r) if !r.is_empty() => {
        let prefix = format!("{} ", self.status.as_u16());
        r.strip_prefix(&prefix).unwrap_or(r).to_string()
      }
      _ => self
        .status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("status code {}", self.status.as_u16())),
    }
  }

  /// Reconstruct the status line, e.g. `HTTP/1.1 200 OK`.
  pub fn status_line(&self) -> String {
    format!(
      "{:?} {:03} {}",
      self.version,
      self.status.as_u16(),
      self.status_text()
    )
  }

  /// The full wire representation. Callable repeatedly; the body is not
  /// consumed.
  pub fn serialize(&self) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend(self.status_line().as_bytes());
    buf.extend(CR_LF);
    self.headers.write_to(&mut buf);
    buf.extend(CR_LF);
    buf.extend(self.body.as_ref());
    buf
  }

  /// A functionally equal response with independent buffers. Storage id and
  /// unmangled chain are not carried over.
  pub fn clone_response(&self) -> ProxyResponse {
    ProxyResponse {
      version: self.version,
      status: self.status,
      reason: self.reason.clone(),
      headers: self.headers.clone(),
      body: self.body_bytes().into(),
      db_id: String::new(),
      unmangled: None,
    }
  }

  /// [`ProxyResponse::clone_response`] plus the storage id and a recursive
  /// deep clone of the unmangled chain.
  pub fn deep_clone(&self) -> ProxyResponse {
    let mut new = self.clone_response();
    new.db_id = self.db_id.clone();
    if let Some(unmangled) = &self.unmangled {
      new.unmangled = Some(Box::new(unmangled.deep_clone()));
    }
    new
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  async fn parsed(raw: &[u8]) -> ProxyResponse {
    ProxyResponse::from_bytes(raw).await.unwrap()
  }

  #[tokio::test]
  async fn serialize_is_stable() {
    let raw = b"HTTP/1.1 404 Not Found\r\nServer: x\r\nContent-Length: 4\r\n\r\ngone";
    let rsp = parsed(raw).await;
    assert_eq!(rsp.serialize(), raw);
    let again = parsed(&rsp.serialize()).await;
    assert_eq!(again, rsp);
  }

  #[tokio::test]
  async fn synthesizes_missing_reason() {
    let rsp = parsed(b"HTTP/1.1 200\r\nContent-Length: 0\r\n\r\n").await;
    assert_eq!(rsp.status_line(), "HTTP/1.1 200 OK");
    let rsp = parsed(b"HTTP/1.1 299\r\nContent-Length: 0\r\n\r\n").await;
    assert_eq!(rsp.status_line(), "HTTP/1.1 299 status code 299");
  }

  #[tokio::test]
  async fn strips_duplicated_code_prefix() {
    let mut rsp = parsed(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
    rsp.set_reason("200 OK");
    assert_eq!(rsp.status_line(), "HTTP/1.1 200 OK");
  }

  #[tokio::test]
  async fn preserves_nonstandard_reason() {
    let rsp = parsed(b"HTTP/1.1 200 Everything Is Fine\r\nContent-Length: 0\r\n\r\n").await;
    assert_eq!(rsp.status_line(), "HTTP/1.1 200 Everything Is Fine");
  }

  #[tokio::test]
  async fn set_body_keeps_content_length() {
    let mut rsp = parsed(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nbody").await;
    rsp.set_body(b"much longer body".to_vec());
    assert_eq!(rsp.headers().get("Content-Length"), Some("16"));
    assert_eq!(rsp.body_bytes(), b"much longer body");
  }

  #[tokio::test]
  async fn deep_clone_is_independent() {
    let mut rsp = parsed(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;
    rsp.db_id = "r1".into();
    rsp.unmangled = Some(Box::new(
      parsed(b"HTTP/1.1 500 Oops\r\nContent-Length: 0\r\n\r\n").await,
    ));

    let mut copy = rsp.deep_clone();
    assert_eq!(copy, rsp);
    assert_eq!(copy.db_id, "r1");

    copy.set_body(b"changed".to_vec());
    copy
      .unmangled
      .as_mut()
      .unwrap()
      .set_status(StatusCode::IM_A_TEAPOT);
    assert_eq!(rsp.body_bytes(), b"ok");
    assert_eq!(
      rsp.unmangled.as_ref().unwrap().status(),
      StatusCode::INTERNAL_SERVER_ERROR
    );
  }

  #[tokio::test]
  async fn eq_ignores_storage_fields() {
    let a = parsed(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
    let mut b = parsed(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
    b.db_id = "saved".into();
    assert_eq!(a, b);
  }
}
