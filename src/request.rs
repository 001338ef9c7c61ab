use crate::body::Body;
use crate::dest::Destination;
use crate::errors::{parse, Result};
use crate::headers::Headers;
use crate::http1::{self, ParsedRequest};
use crate::response::ProxyResponse;
use crate::submit::{NetDialer, ProxyCreds};
use crate::websocket::WsMessage;
use crate::{CR_LF, SPACE};
use http::{Method, Version};
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::io::Cursor;
use time::OffsetDateTime;
use tokio::io::BufReader;
use url::Url;

/// A captured HTTP request bound to its intended destination.
///
/// The record holds the start line, headers and body exactly as transmitted,
/// so [`ProxyRequest::serialize`] reproduces the original wire bytes. All
/// mutation goes through methods that keep the `Content-Length` header equal
/// to the body length.
#[derive(Default)]
pub struct ProxyRequest {
  method: Method,
  target: String,
  version: Version,
  headers: Headers,
  body: Body,
  /// Where the client intended this request to go.
  pub dest: Destination,
  /// The response the destination produced, once submitted.
  pub server_response: Option<Box<ProxyResponse>>,
  /// WebSocket messages exchanged on the session this request opened.
  pub ws_messages: Vec<WsMessage>,
  /// The request as it was before the user mutated it, if any.
  pub unmangled: Option<Box<ProxyRequest>>,
  /// Identifier assigned by a storage layer; empty while unsaved.
  pub db_id: String,
  /// When submission started.
  pub start: Option<OffsetDateTime>,
  /// When the response was fully read.
  pub end: Option<OffsetDateTime>,
  tags: BTreeSet<String>,
  /// Overrides the TCP dialer used by the submission engine.
  pub dialer: Option<NetDialer>,
}

impl Debug for ProxyRequest {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ProxyRequest")
      .field("status_line", &self.status_line())
      .field("headers", &self.headers)
      .field("body", &self.body)
      .field("dest", &self.dest)
      .finish()
  }
}

impl PartialEq for ProxyRequest {
  /// Structural equality over start line, headers, body and destination.
  /// Timestamps, tags, storage ids and associated messages do not
  /// participate.
  fn eq(&self, other: &Self) -> bool {
    self.status_line() == other.status_line()
      && self.headers == other.headers
      && self.body == other.body
      && self.dest == other.dest
  }
}

impl ProxyRequest {
  /// Bind a request read off the wire to a destination.
  ///
  /// A `Host` header is materialized from the request target when the client
  /// did not send one (absolute-form and CONNECT targets carry the
  /// authority); everything else is kept verbatim.
  pub fn from_parsed(parsed: ParsedRequest, dest: Destination) -> Self {
    let ParsedRequest {
      method,
      target,
      version,
      mut headers,
      body,
    } = parsed;
    if !headers.contains("Host") {
      if let Some(authority) = authority_of_target(&method, &target) {
        headers.set("Host", authority);
      }
    }
    ProxyRequest {
      method,
      target,
      version,
      headers,
      body: body.into(),
      dest,
      ..ProxyRequest::default()
    }
  }

  /// Parse a request from its full wire representation and bind it to a
  /// destination.
  pub async fn from_bytes(b: &[u8], dest: Destination) -> Result<Self> {
    let mut reader = BufReader::new(Cursor::new(b.to_vec()));
    let parsed = http1::read_request(&mut reader).await?;
    Ok(Self::from_parsed(parsed, dest))
  }

  /// A synthetic `GET /` request for the destination.
  pub fn new(dest: Destination) -> Self {
    let mut headers = Headers::new();
    headers.append("Host", dest.host.clone());
    headers.append("User-Agent", "Snare-Proxy/1.0");
    ProxyRequest {
      method: Method::GET,
      target: "/".to_string(),
      version: Version::HTTP_11,
      headers,
      dest,
      ..ProxyRequest::default()
    }
  }

  /// Request method.
  pub fn method(&self) -> &Method {
    &self.method
  }

  /// Request target exactly as transmitted.
  pub fn target(&self) -> &str {
    &self.target
  }

  /// Protocol version.
  pub fn version(&self) -> Version {
    self.version
  }

  /// Header multimap.
  pub fn headers(&self) -> &Headers {
    &self.headers
  }

  /// Mutable header multimap.
  ///
  /// A `Content-Length` written here is overwritten by the next
  /// [`ProxyRequest::set_body`].
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

  /// Replace the body, keeping `Content-Length` equal to its length. Form
  /// parameters are re-derived lazily by [`ProxyRequest::post_parameters`].
  pub fn set_body<B: Into<Body>>(&mut self, body: B) {
    self.body = body.into();
    self
      .headers
      .set("Content-Length", self.body.len().to_string());
  }

  /// The start line, e.g. `GET /path HTTP/1.1`.
  pub fn status_line(&self) -> String {
    format!("{} {} {:?}", self.method, self.target, self.version)
  }

  /// The full wire representation (start line, headers, blank line, body).
  /// Callable repeatedly; the body is not consumed.
  pub fn serialize(&self) -> Vec<u8> {
    self.serialize_inner(&self.target, &self.headers)
  }

  /// As [`ProxyRequest::serialize`], but with an absolute-URI request line
  /// for submission through an HTTP proxy. When credentials are given, a
  /// `Proxy-Authorization` header is included in the output without being
  /// left behind on the request.
  pub fn serialize_for_proxy(&self, creds: Option<&ProxyCreds>) -> Vec<u8> {
    let target = if self.target.contains("://") {
      self.target.clone()
    } else {
      let scheme = if self.dest.use_tls { "https" } else { "http" };
      let authority = self
        .headers
        .get("Host")
        .map(str::to_string)
        .unwrap_or_else(|| self.dest.authority());
      format!("{}://{}{}", scheme, authority, self.target)
    };
    match creds {
      None => self.serialize_inner(&target, &self.headers),
      Some(creds) => {
        let mut headers = self.headers.clone();
        headers.set("Proxy-Authorization", creds.serialize_header());
        self.serialize_inner(&target, &headers)
      }
    }
  }

  fn serialize_inner(&self, target: &str, headers: &Headers) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend(self.method.as_str().as_bytes());
    buf.extend(SPACE);
    buf.extend(target.as_bytes());
    buf.extend(SPACE);
    buf.extend(format!("{:?}", self.version).as_bytes());
    buf.extend(CR_LF);
    headers.write_to(&mut buf);
    buf.extend(CR_LF);
    buf.extend(self.body.as_ref());
    buf
  }

  /// A functionally equal request with independent buffers and the same
  /// destination. Associated messages, tags, timestamps, storage id and
  /// dialer are not carried over.
  pub fn clone_request(&self) -> ProxyRequest {
    ProxyRequest {
      method: self.method.clone(),
      target: self.target.clone(),
      version: self.version,
      headers: self.headers.clone(),
      body: self.body_bytes().into(),
      dest: self.dest.clone(),
      ..ProxyRequest::default()
    }
  }

  /// [`ProxyRequest::clone_request`] plus the storage id and recursive deep
  /// clones of the unmangled chain, the server response and every WebSocket
  /// message.
  pub fn deep_clone(&self) -> ProxyRequest {
    let mut new = self.clone_request();
    new.db_id = self.db_id.clone();
    if let Some(unmangled) = &self.unmangled {
      new.unmangled = Some(Box::new(unmangled.deep_clone()));
    }
    if let Some(rsp) = &self.server_response {
      new.server_response = Some(Box::new(rsp.deep_clone()));
    }
    for msg in &self.ws_messages {
      new.ws_messages.push(msg.deep_clone());
    }
    new
  }

  /// Remove hop-by-hop headers a proxy must not forward: `Accept-Encoding`,
  /// `Proxy-Connection`, `Proxy-Authenticate`, `Proxy-Authorization`, and
  /// `Connection` unless this is a WebSocket upgrade.
  pub fn strip_proxy_headers(&mut self) {
    if !self.is_websocket_upgrade() {
      self.headers.remove("Connection");
    }
    self.headers.remove("Accept-Encoding");
    self.headers.remove("Proxy-Connection");
    self.headers.remove("Proxy-Authenticate");
    self.headers.remove("Proxy-Authorization");
  }

  /// Whether any `Upgrade` header value names the websocket protocol.
  pub fn is_websocket_upgrade(&self) -> bool {
    self
      .headers
      .get_all("Upgrade")
      .any(|v| v.to_ascii_lowercase().contains("websocket"))
  }

  /// `ws`/`wss` for upgrade requests, else `http`/`https`, per the
  /// destination's TLS flag.
  pub fn dest_scheme(&self) -> &'static str {
    match (self.is_websocket_upgrade(), self.dest.use_tls) {
      (true, true) => "wss",
      (true, false) => "ws",
      (false, true) => "https",
      (false, false) => "http",
    }
  }

  /// The request URL using the `Host` header for the authority.
  pub fn full_url(&self) -> Result<Url> {
    let authority = self
      .headers
      .get("Host")
      .map(str::to_string)
      .unwrap_or_else(|| self.dest.authority());
    self.url_with_authority(&authority)
  }

  /// The request URL using the destination descriptor for the authority,
  /// omitting the port when it matches the scheme default.
  pub fn dest_url(&self) -> Result<Url> {
    self.url_with_authority(&self.dest.authority())
  }

  fn url_with_authority(&self, authority: &str) -> Result<Url> {
    let path_and_query = if self.target.contains("://") {
      let u = Url::parse(&self.target).map_err(parse)?;
      match u.query() {
        Some(q) => format!("{}?{}", u.path(), q),
        None => u.path().to_string(),
      }
    } else if self.target.starts_with('/') {
      self.target.clone()
    } else {
      "/".to_string()
    };
    Url::parse(&format!(
      "{}://{}{}",
      self.dest_scheme(),
      authority,
      path_and_query
    ))
    .map_err(parse)
  }

  /// Decoded query string parameters in order of appearance.
  pub fn url_parameters(&self) -> Vec<(String, String)> {
    match self.target.split_once('?') {
      Some((_, q)) => form_urlencoded::parse(q.as_bytes()).into_owned().collect(),
      None => Vec::new(),
    }
  }

  /// Replace the value of a query parameter, dropping duplicates; appends
  /// when absent. The query string is re-encoded.
  pub fn set_url_parameter(&mut self, key: &str, value: &str) {
    let mut pairs = self.url_parameters();
    replace_pair(&mut pairs, key, value);
    self.set_query_pairs(pairs);
  }

  /// Append a query parameter, re-encoding the query string.
  pub fn add_url_parameter(&mut self, key: &str, value: &str) {
    let mut pairs = self.url_parameters();
    pairs.push((key.to_string(), value.to_string()));
    self.set_query_pairs(pairs);
  }

  /// Remove every occurrence of a query parameter.
  pub fn delete_url_parameter(&mut self, key: &str) {
    let mut pairs = self.url_parameters();
    pairs.retain(|(k, _)| k != key);
    self.set_query_pairs(pairs);
  }

  fn set_query_pairs(&mut self, pairs: Vec<(String, String)>) {
    let path = self
      .target
      .split_once('?')
      .map(|(p, _)| p.to_string())
      .unwrap_or_else(|| self.target.clone());
    if pairs.is_empty() {
      self.target = path;
    } else {
      let mut ser = form_urlencoded::Serializer::new(String::new());
      for (k, v) in &pairs {
        ser.append_pair(k, v);
      }
      self.target = format!("{}?{}", path, ser.finish());
    }
  }

  /// Decoded `application/x-www-form-urlencoded` body parameters in order of
  /// appearance.
  pub fn post_parameters(&self) -> Vec<(String, String)> {
    form_urlencoded::parse(self.body.as_ref())
      .into_owned()
      .collect()
  }

  /// Replace the value of a form parameter and re-encode the body, keeping
  /// `Content-Length` consistent.
  pub fn set_post_parameter(&mut self, key: &str, value: &str) {
    let mut pairs = self.post_parameters();
    replace_pair(&mut pairs, key, value);
    self.set_form_body(pairs);
  }

  /// Append a form parameter and re-encode the body.
  pub fn add_post_parameter(&mut self, key: &str, value: &str) {
    let mut pairs = self.post_parameters();
    pairs.push((key.to_string(), value.to_string()));
    self.set_form_body(pairs);
  }

  /// Remove every occurrence of a form parameter and re-encode the body.
  pub fn delete_post_parameter(&mut self, key: &str) {
    let mut pairs = self.post_parameters();
    pairs.retain(|(k, _)| k != key);
    self.set_form_body(pairs);
  }

  fn set_form_body(&mut self, pairs: Vec<(String, String)>) {
    let mut ser = form_urlencoded::Serializer::new(String::new());
    for (k, v) in &pairs {
      ser.append_pair(k, v);
    }
    self.set_body(ser.finish());
  }

  /// Add a tag.
  pub fn add_tag<S: Into<String>>(&mut self, tag: S) {
    self.tags.insert(tag.into());
  }

  /// Whether a tag is present.
  pub fn check_tag(&self, tag: &str) -> bool {
    self.tags.contains(tag)
  }

  /// Remove a tag.
  pub fn remove_tag(&mut self, tag: &str) {
    self.tags.remove(tag);
  }

  /// Remove every tag.
  pub fn clear_tags(&mut self) {
    self.tags.clear();
  }

  /// A snapshot of the tag set.
  pub fn tags(&self) -> Vec<String> {
    self.tags.iter().cloned().collect()
  }
}

fn authority_of_target(method: &Method, target: &str) -> Option<String> {
  if *method == Method::CONNECT {
    return Some(target.to_string());
  }
  if target.contains("://") {
    let uri: http::Uri = target.parse().ok()?;
    return uri.authority().map(|a| a.as_str().to_string());
  }
  None
}

fn replace_pair(pairs: &mut Vec<(String, String)>, key: &str, value: &str) {
  let mut found = false;
  pairs.retain_mut(|(k, v)| {
    if k == key {
      if found {
        return false;
      }
      found = true;
      *v = value.to_string();
    }
    true
  });
  if !found {
    pairs.push((key.to_string(), value.to_string()));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn dest() -> Destination {
    Destination::new("example.com", Some(80), false)
  }

  async fn parsed(raw: &[u8]) -> ProxyRequest {
    ProxyRequest::from_bytes(raw, dest()).await.unwrap()
  }

  #[tokio::test]
  async fn serialize_reproduces_wire_bytes() {
    let raw = b"GET /path?a=1 HTTP/1.1\r\nHost: example.com\r\nX-CaSe: kept\r\n\r\n";
    let req = parsed(raw).await;
    assert_eq!(req.serialize(), raw);
  }

  #[tokio::test]
  async fn serialize_then_parse_is_stable() {
    let raw = b"POST /f HTTP/1.1\r\nHost: a\r\nContent-Length: 3\r\n\r\nxyz";
    let req = parsed(raw).await;
    let again = ProxyRequest::from_bytes(&req.serialize(), req.dest.clone())
      .await
      .unwrap();
    assert_eq!(again, req);
  }

  #[tokio::test]
  async fn materializes_host_from_absolute_target() {
    let req = parsed(b"GET http://example.com:8080/ HTTP/1.1\r\n\r\n").await;
    assert_eq!(req.headers().get("Host"), Some("example.com:8080"));
  }

  #[tokio::test]
  async fn set_body_keeps_content_length() {
    let mut req = parsed(b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 0\r\n\r\n").await;
    req.set_body(b"abcde".to_vec());
    assert_eq!(req.headers().get("Content-Length"), Some("5"));
    assert_eq!(req.body_bytes(), b"abcde");
    // the copy is independent
    let mut copy = req.body_bytes();
    copy[0] = b'z';
    assert_eq!(req.body_bytes(), b"abcde");
  }

  #[tokio::test]
  async fn deep_clone_is_independent() {
    let mut req = parsed(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").await;
    req.db_id = "q7".into();
    req.unmangled = Some(Box::new(
      parsed(b"GET /orig HTTP/1.1\r\nHost: a\r\n\r\n").await,
    ));
    req.server_response = Some(Box::new(
      ProxyResponse::from_bytes(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi")
        .await
        .unwrap(),
    ));
    req
      .ws_messages
      .push(WsMessage::new(1, b"ping".to_vec(), crate::Direction::ToServer));

    let mut copy = req.deep_clone();
    assert_eq!(copy, req);
    assert_eq!(copy.db_id, "q7");

    copy.set_body(b"mutated".to_vec());
    copy.unmangled.as_mut().unwrap().set_body(b"other".to_vec());
    copy.server_response.as_mut().unwrap().set_body(b"bye".to_vec());
    copy.ws_messages[0].payload = b"pong".to_vec().into();

    assert!(req.body_bytes().is_empty());
    assert!(req.unmangled.as_ref().unwrap().body_bytes().is_empty());
    assert_eq!(req.server_response.as_ref().unwrap().body_bytes(), b"hi");
    assert_eq!(req.ws_messages[0].payload.as_ref(), b"ping");
  }

  #[tokio::test]
  async fn strip_proxy_headers_spares_connection_for_upgrades() {
    let raw = b"GET /ws HTTP/1.1\r\nHost: a\r\nUpgrade: WebSocket\r\nConnection: Upgrade\r\n\
      Proxy-Connection: keep-alive\r\nAccept-Encoding: gzip\r\n\r\n";
    let mut req = parsed(raw).await;
    req.strip_proxy_headers();
    assert!(req.headers().contains("Connection"));
    assert!(!req.headers().contains("Proxy-Connection"));
    assert!(!req.headers().contains("Accept-Encoding"));

    let mut plain = parsed(b"GET / HTTP/1.1\r\nHost: a\r\nConnection: close\r\n\r\n").await;
    plain.strip_proxy_headers();
    assert!(!plain.headers().contains("Connection"));
  }

  #[tokio::test]
  async fn websocket_upgrade_detection_is_case_insensitive() {
    let req = parsed(b"GET / HTTP/1.1\r\nHost: a\r\nUpgrade: WEBSOCKET\r\n\r\n").await;
    assert!(req.is_websocket_upgrade());
    assert_eq!(req.dest_scheme(), "ws");
    let req = parsed(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").await;
    assert!(!req.is_websocket_upgrade());
    assert_eq!(req.dest_scheme(), "http");
  }

  #[tokio::test]
  async fn urls_use_host_header_vs_destination() {
    let raw = b"GET /p?x=1 HTTP/1.1\r\nHost: other.example:8080\r\n\r\n";
    let mut req = parsed(raw).await;
    req.dest = Destination::new("example.com", Some(443), true);
    assert_eq!(
      req.full_url().unwrap().as_str(),
      "https://other.example:8080/p?x=1"
    );
    assert_eq!(req.dest_url().unwrap().as_str(), "https://example.com/p?x=1");
    req.dest.port = Some(8443);
    assert_eq!(
      req.dest_url().unwrap().as_str(),
      "https://example.com:8443/p?x=1"
    );
  }

  #[tokio::test]
  async fn url_parameter_mutation_re_encodes_query() {
    let mut req = parsed(b"GET /s?a=1&b=2 HTTP/1.1\r\nHost: a\r\n\r\n").await;
    req.set_url_parameter("a", "9");
    req.add_url_parameter("c", "3");
    req.delete_url_parameter("b");
    assert_eq!(req.target(), "/s?a=9&c=3");
    assert_eq!(
      req.url_parameters(),
      vec![("a".into(), "9".into()), ("c".into(), "3".into())]
    );
  }

  #[tokio::test]
  async fn post_parameter_mutation_keeps_content_length() {
    let raw = b"POST /f HTTP/1.1\r\nHost: a\r\nContent-Length: 7\r\n\r\na=1&b=2";
    let mut req = parsed(raw).await;
    req.set_post_parameter("a", "changed");
    req.delete_post_parameter("b");
    req.add_post_parameter("c", "3");
    let body = req.body_bytes();
    assert_eq!(body, b"a=changed&c=3");
    assert_eq!(
      req.headers().get("Content-Length"),
      Some(body.len().to_string().as_str())
    );
  }

  #[tokio::test]
  async fn proxy_serialization_uses_absolute_uri() {
    let raw = b"GET /path HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let req = parsed(raw).await;
    let out = req.serialize_for_proxy(None);
    assert!(out.starts_with(b"GET http://example.com/path HTTP/1.1\r\n"));
    assert!(!req.headers().contains("Proxy-Authorization"));

    let creds = ProxyCreds::new("user", "pass");
    let out = String::from_utf8(req.serialize_for_proxy(Some(&creds))).unwrap();
    assert!(out.contains("Proxy-Authorization: Basic dXNlcjpwYXNz\r\n"));
    // only for the duration of the call
    assert!(!req.headers().contains("Proxy-Authorization"));
  }

  #[tokio::test]
  async fn tags_are_a_set() {
    let mut req = parsed(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").await;
    req.add_tag("one");
    req.add_tag("two");
    req.add_tag("one");
    assert!(req.check_tag("one"));
    assert_eq!(req.tags().len(), 2);
    req.remove_tag("one");
    assert!(!req.check_tag("one"));
    req.clear_tags();
    assert!(req.tags().is_empty());
  }

  #[test]
  fn synthetic_request_has_sane_defaults() {
    let req = ProxyRequest::new(Destination::new("example.com", Some(443), true));
    let out = String::from_utf8(req.serialize()).unwrap();
    assert!(out.starts_with("GET / HTTP/1.1\r\n"));
    assert!(out.contains("Host: example.com\r\n"));
    assert!(out.contains("User-Agent: Snare-Proxy/1.0\r\n"));
  }
}
