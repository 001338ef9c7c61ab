use crate::errors::{parse, Error, Result};
use std::fmt;

/// The intended destination of an intercepted connection or captured request.
///
/// A freshly intercepted connection starts with an empty host and an unknown
/// port; the listener finalizes the descriptor before the connection is
/// surfaced. `port` is `None` while unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Destination {
  /// Destination hostname or IP literal.
  pub host: String,
  /// Destination port, `None` when not yet known.
  pub port: Option<u16>,
  /// Whether the client intends to speak TLS to the destination.
  pub use_tls: bool,
}

impl Destination {
  /// Construct a descriptor.
  pub fn new<H: Into<String>>(host: H, port: Option<u16>, use_tls: bool) -> Self {
    Destination {
      host: host.into(),
      port,
      use_tls,
    }
  }

  /// Encode to the textual form `<host>/<port>/<0|1>` used as an opaque
  /// network address label. An unknown port encodes as `-1`.
  pub fn encode(&self) -> String {
    let tls_int = if self.use_tls { 1 } else { 0 };
    match self.port {
      Some(p) => format!("{}/{}/{}", self.host, p, tls_int),
      None => format!("{}/-1/{}", self.host, tls_int),
    }
  }

  /// Decode the textual form produced by [`Destination::encode`].
  ///
  /// Fails unless the input is exactly three `/`-separated parts with an
  /// integer port in `{-1} ∪ [0, 65535]` and an integer TLS flag. A flag of
  /// `0` means no TLS; any other integer means TLS.
  pub fn decode(addr: &str) -> Result<Self> {
    let parts: Vec<&str> = addr.split('/').collect();
    if parts.len() != 3 {
      return Err(parse(format!("error parsing address: {addr}")));
    }
    let host = parts[0].to_string();
    let port: i64 = parts[1]
      .parse()
      .map_err(|_| parse(format!("invalid port in address: {addr}")))?;
    let port = match port {
      -1 => None,
      0..=65535 => Some(port as u16),
      _ => return Err(parse(format!("port out of range in address: {addr}"))),
    };
    let tls_int: i64 = parts[2]
      .parse()
      .map_err(|_| parse(format!("invalid tls flag in address: {addr}")))?;
    Ok(Destination {
      host,
      port,
      use_tls: tls_int != 0,
    })
  }

  /// The scheme-default port for this descriptor (443 under TLS, else 80).
  pub fn default_port(&self) -> u16 {
    if self.use_tls {
      443
    } else {
      80
    }
  }

  /// The port to dial: the known port, or the scheme default.
  pub fn port_or_default(&self) -> u16 {
    self.port.unwrap_or_else(|| self.default_port())
  }

  /// `host:port` authority form, eliding the port when it matches the
  /// scheme default.
  pub fn authority(&self) -> String {
    let port = self.port_or_default();
    if port == self.default_port() {
      self.host.clone()
    } else {
      format!("{}:{}", self.host, port)
    }
  }
}

impl fmt::Display for Destination {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.encode())
  }
}

impl std::str::FromStr for Destination {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Destination::decode(s)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn encode_forms() {
    assert_eq!(Destination::new("a", Some(80), false).encode(), "a/80/0");
    assert_eq!(Destination::new("a", Some(443), true).encode(), "a/443/1");
    assert_eq!(Destination::new("", None, false).encode(), "/-1/0");
  }

  #[test]
  fn decode_round_trip() {
    for port in [0u16, 1, 80, 443, 8080, 65535] {
      for tls in [false, true] {
        let d = Destination::new("example.com", Some(port), tls);
        assert_eq!(Destination::decode(&d.encode()).unwrap(), d);
      }
    }
    let unknown = Destination::new("example.com", None, true);
    assert_eq!(Destination::decode(&unknown.encode()).unwrap(), unknown);
  }

  #[test]
  fn decode_rejects_bad_shapes() {
    assert!(Destination::decode("a/80").is_err());
    assert!(Destination::decode("a/80/0/1").is_err());
    assert!(Destination::decode("a/x/0").is_err());
    assert!(Destination::decode("a/80/x").is_err());
    assert!(Destination::decode("a/65536/0").is_err());
    assert!(Destination::decode("a/-2/0").is_err());
  }

  #[test]
  fn nonzero_flag_means_tls() {
    assert!(Destination::decode("a/80/2").unwrap().use_tls);
    assert!(!Destination::decode("a/80/0").unwrap().use_tls);
  }

  #[test]
  fn authority_elides_default_port() {
    assert_eq!(
      Destination::new("h", Some(443), true).authority(),
      "h".to_string()
    );
    assert_eq!(
      Destination::new("h", Some(8443), true).authority(),
      "h:8443".to_string()
    );
    assert_eq!(
      Destination::new("h", Some(80), false).authority(),
      "h".to_string()
    );
  }
}
