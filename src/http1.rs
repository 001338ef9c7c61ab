//! Pure parse and serialize functions over the wire form of HTTP/1.x
//! messages.
//!
//! Messages are read eagerly into plain records; serialization is the
//! inverse function, so a captured message writes back out byte-for-byte
//! (chunked transfer coding is the one exception: the framing is decoded on
//! read and the record carries an equivalent `Content-Length` instead).

use crate::errors::{new_io_error, parse, Result};
use crate::headers::Headers;
use crate::response::ProxyResponse;
use http::{Method, StatusCode, Version};
use std::io::ErrorKind;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// A request as read off the wire, before it is bound to a destination.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
  /// Request method.
  pub method: Method,
  /// Request target exactly as transmitted (origin, absolute or authority
  /// form).
  pub target: String,
  /// Protocol version.
  pub version: Version,
  /// Header multimap, verbatim.
  pub headers: Headers,
  /// Decoded body bytes.
  pub body: Vec<u8>,
}

/// Read one HTTP/1.x request from `reader`.
///
/// The body is consumed according to `Content-Length` or chunked transfer
/// coding; a request with neither has no body. Chunked framing is decoded
/// and replaced by a `Content-Length` header.
pub async fn read_request<R>(reader: &mut R) -> Result<ParsedRequest>
where
  R: AsyncBufRead + Unpin,
{
  let mut line = Vec::new();
  let n = reader.read_until(b'\n', &mut line).await?;
  if n == 0 {
    return Err(new_io_error(
      ErrorKind::UnexpectedEof,
      "connection closed before a request line",
    ));
  }
  let line = strip_crlf(&line);
  let mut parts = line.splitn(3, |b| *b == b' ');
  let method = parts
    .next()
    .filter(|p| !p.is_empty())
    .and_then(|p| Method::from_bytes(p).ok())
    .ok_or_else(|| parse("invalid request method"))?;
  let target = parts
    .next()
    .filter(|p| !p.is_empty())
    .map(|p| String::from_utf8_lossy(p).to_string())
    .ok_or_else(|| parse("invalid request target"))?;
  let version = parse_version(parts.next().unwrap_or_default())?;

  let mut headers = read_headers(reader).await?;
  let body = read_body(reader, &headers, false).await?;
  if is_chunked(&headers) {
    headers.remove("Transfer-Encoding");
    headers.set("Content-Length", body.len().to_string());
  }

  Ok(ParsedRequest {
    method,
    target,
    version,
    headers,
    body,
  })
}

/// Read one HTTP/1.x response from `reader`. `method` is the method of the
/// request the response answers; `HEAD` responses carry no body.
pub async fn read_response<R>(reader: &mut R, method: &Method) -> Result<ProxyResponse>
where
  R: AsyncBufRead + Unpin,
{
  let (version, status, reason, mut headers) = read_response_head(reader).await?;
  let body = if matches!(*method, Method::HEAD) || bodyless_status(status) {
    Vec::new()
  } else {
    read_body(reader, &headers, true).await?
  };
  if is_chunked(&headers) {
    headers.remove("Transfer-Encoding");
    headers.set("Content-Length", body.len().to_string());
  }
  Ok(ProxyResponse::from_wire(
    version, status, reason, headers, body,
  ))
}

/// Read only the status line and headers of a response, leaving the body
/// (if any) unread. This is what a CONNECT handshake consumes.
pub async fn read_response_head<R>(
  reader: &mut R,
) -> Result<(Version, StatusCode, Option<String>, Headers)>
where
  R: AsyncBufRead + Unpin,
{
  let mut line = Vec::new();
  let n = reader.read_until(b'\n', &mut line).await?;
  if n == 0 {
    return Err(new_io_error(
      ErrorKind::UnexpectedEof,
      "connection closed before a status line",
    ));
  }
  let line = strip_crlf(&line);
  let mut parts = line.splitn(3, |b| *b == b' ');
  let version = parse_version(parts.next().unwrap_or_default())?;
  let status = parts
    .next()
    .and_then(|p| std::str::from_utf8(p).ok())
    .and_then(|p| p.parse::<u16>().ok())
    .and_then(|c| StatusCode::from_u16(c).ok())
    .ok_or_else(|| parse("invalid status code"))?;
  let reason = parts
    .next()
    .map(|p| String::from_utf8_lossy(p).to_string())
    .filter(|r| !r.is_empty());
  let headers = read_headers(reader).await?;
  Ok((version, status, reason, headers))
}

async fn read_headers<R>(reader: &mut R) -> Result<Headers>
where
  R: AsyncBufRead + Unpin,
{
  let mut headers = Headers::new();
  let mut line = Vec::new();
  loop {
    line.clear();
    let n = reader.read_until(b'\n', &mut line).await?;
    if n == 0 || line == b"\r\n" || line == b"\n" {
      break;
    }
    headers.push_line(&line)?;
  }
  Ok(headers)
}

async fn read_body<R>(reader: &mut R, headers: &Headers, until_eof: bool) -> Result<Vec<u8>>
where
  R: AsyncBufRead + Unpin,
{
  if is_chunked(headers) {
    return read_chunked_body(reader).await;
  }
  if let Some(length) = content_length(headers) {
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    return Ok(body);
  }
  let mut body = Vec::new();
  if until_eof {
    reader.read_to_end(&mut body).await?;
  }
  Ok(body)
}

async fn read_chunked_body<R>(reader: &mut R) -> Result<Vec<u8>>
where
  R: AsyncBufRead + Unpin,
{
  let mut body = Vec::new();
  let mut line = Vec::new();
  loop {
    line.clear();
    reader.read_until(b'\n', &mut line).await?;
    let size_field = strip_crlf(&line);
    let size_field = size_field
      .split(|b| *b == b';')
      .next()
      .unwrap_or_default();
    let size = std::str::from_utf8(size_field)
      .ok()
      .and_then(|s| usize::from_str_radix(s.trim(), 16).ok())
      .ok_or_else(|| parse("invalid chunk size"))?;
    if size == 0 {
      // Trailer section, discarded.
      loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 || line == b"\r\n" || line == b"\n" {
          break;
        }
      }
      break;
    }
    let start = body.len();
    body.resize(start + size, 0);
    reader.read_exact(&mut body[start..]).await?;
    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf).await?;
  }
  Ok(body)
}

pub(crate) fn is_chunked(headers: &Headers) -> bool {
  headers
    .get_all("Transfer-Encoding")
    .any(|v| v.to_ascii_lowercase().contains("chunked"))
}

pub(crate) fn content_length(headers: &Headers) -> Option<usize> {
  headers.get("Content-Length").and_then(|v| v.parse().ok())
}

pub(crate) fn parse_version(field: &[u8]) -> Result<Version> {
  match field {
    b"HTTP/0.9" => Ok(Version::HTTP_09),
    b"HTTP/1.0" => Ok(Version::HTTP_10),
    b"HTTP/1.1" => Ok(Version::HTTP_11),
    b"HTTP/2.0" => Ok(Version::HTTP_2),
    b"HTTP/3.0" => Ok(Version::HTTP_3),
    _ => Err(parse("invalid http version")),
  }
}

fn bodyless_status(status: StatusCode) -> bool {
  status.is_informational()
    || status == StatusCode::NO_CONTENT
    || status == StatusCode::NOT_MODIFIED
}

fn strip_crlf(line: &[u8]) -> &[u8] {
  let line = line.strip_suffix(&[b'\n']).unwrap_or(line);
  line.strip_suffix(&[b'\r']).unwrap_or(line)
}
