use crate::errors::{parse, Result};
use crate::{COLON_SPACE, CR_LF};

/// A header multimap that preserves the exact byte form of the wire.
///
/// Unlike `http::HeaderMap`, names keep the case the sender transmitted and
/// entries keep their insertion order, globally and per key. Lookups match
/// names ASCII-case-insensitively. This is what lets a captured request be
/// written back out with no canonicalization differences.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
  entries: Vec<(String, String)>,
}

impl Headers {
  /// An empty header map.
  pub fn new() -> Self {
    Headers::default()
  }

  /// Parse one `Name: value` wire line and append it. The trailing CRLF is
  /// tolerated; a line with no colon is rejected.
  pub fn push_line(&mut self, line: &[u8]) -> Result<()> {
    let line = line.strip_suffix(CR_LF).unwrap_or(line);
    let line = line.strip_suffix(&[10]).unwrap_or(line);
    let idx = line
      .iter()
      .position(|b| *b == b':')
      .ok_or_else(|| parse(format!("malformed header line: {}", String::from_utf8_lossy(line))))?;
    let name = std::str::from_utf8(&line[..idx])
      .map_err(|_| parse("header name is not valid utf-8"))?
      .to_string();
    // Exactly one optional space after the colon is the canonical form;
    // stripping only that keeps `Name:  padded` values byte-exact on
    // re-serialization.
    let value = &line[idx + 1..];
    let value = value.strip_prefix(&[b' ']).unwrap_or(value);
    let value = String::from_utf8_lossy(value).to_string();
    self.entries.push((name, value));
    Ok(())
  }

  /// First value for `name`, matched case-insensitively.
  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .entries
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// All values for `name` in insertion order.
  pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
    self
      .entries
      .iter()
      .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Whether any entry matches `name`.
  pub fn contains(&self, name: &str) -> bool {
    self.get(name).is_some()
  }

  /// Replace the value of `name`, keeping the position (and the spelling) of
  /// its first occurrence and dropping any later duplicates. Appends when the
  /// header is absent.
  pub fn set<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
    let name = name.into();
    let value = value.into();
    let mut found = false;
    self.entries.retain_mut(|(k, v)| {
      if k.eq_ignore_ascii_case(&name) {
        if found {
          return false;
        }
        found = true;
        *v = value.clone();
      }
      true
    });
    if !found {
      self.entries.push((name, value));
    }
  }

  /// Append a new entry regardless of existing values.
  pub fn append<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
    self.entries.push((name.into(), value.into()));
  }

  /// Remove every entry matching `name`.
  pub fn remove(&mut self, name: &str) {
    self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
  }

  /// Number of entries.
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// Whether the map has no entries.
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Iterate entries in insertion order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  /// Write every entry as `Name: value\r\n`, verbatim.
  pub fn write_to(&self, buf: &mut Vec<u8>) {
    for (k, v) in &self.entries {
      buf.extend(k.as_bytes());
      buf.extend(COLON_SPACE);
      buf.extend(v.as_bytes());
      buf.extend(CR_LF);
    }
  }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
  fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
    Headers {
      entries: iter
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn preserves_case_and_order() {
    let mut h = Headers::new();
    h.push_line(b"X-First: one\r\n").unwrap();
    h.push_line(b"content-TYPE: text/plain\r\n").unwrap();
    h.push_line(b"X-First: two\r\n").unwrap();
    let mut out = Vec::new();
    h.write_to(&mut out);
    assert_eq!(
      out,
      b"X-First: one\r\ncontent-TYPE: text/plain\r\nX-First: two\r\n"
    );
  }

  #[test]
  fn lookup_is_case_insensitive() {
    let mut h = Headers::new();
    h.append("Content-Length", "12");
    assert_eq!(h.get("content-length"), Some("12"));
    assert!(h.contains("CONTENT-LENGTH"));
    assert_eq!(h.get_all("Content-length").count(), 1);
  }

  #[test]
  fn set_replaces_in_place_and_dedups() {
    let mut h = Headers::new();
    h.append("A", "1");
    h.append("Cookie", "x");
    h.append("a", "2");
    h.set("a", "3");
    let entries: Vec<_> = h.iter().collect();
    assert_eq!(entries, vec![("A", "3"), ("Cookie", "x")]);
  }

  #[test]
  fn remove_drops_all_values() {
    let mut h = Headers::new();
    h.append("Warning", "1");
    h.append("warning", "2");
    h.remove("WARNING");
    assert!(h.is_empty());
  }

  #[test]
  fn rejects_line_without_colon() {
    let mut h = Headers::new();
    assert!(h.push_line(b"not a header\r\n").is_err());
  }
}
