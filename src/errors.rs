//! engine error
use std::io::ErrorKind;
use thiserror::Error as ThisError;

/// A `Result` alias where the `Err` case is `snare::Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// The errors that may occur when capturing or submitting an exchange.
#[derive(ThisError, Debug)]
pub enum Error {
  /// Transport error
  #[error(transparent)]
  Io(#[from] std::io::Error),
  /// http::Error
  #[error(transparent)]
  Http(http::Error),
  /// tls Error
  #[error(transparent)]
  Tls(#[from] tokio_rustls::rustls::Error),
  /// Malformed request, response or address
  #[error("parse error: {0}")]
  Parse(String),
  /// CONNECT or TLS handshake failure
  #[error("handshake failed: {0}")]
  Handshake(String),
  /// SOCKS5 reply other than success
  #[error(transparent)]
  Socks(#[from] ReplyError),
  /// WebSocket dial on a request that is not an upgrade
  #[error("request is not a websocket handshake request")]
  NotWebSocketUpgrade,
  /// WebSocket handshake or session error
  #[error(transparent)]
  WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
  /// Unknown Error
  #[error("{0}")]
  Other(String),
}

/// The SOCKS5 `REP` field decoded into its RFC 1928 meaning.
#[derive(ThisError, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ReplyError {
  #[error("Succeeded")]
  Succeeded,
  #[error("General failure")]
  GeneralFailure,
  #[error("Connection not allowed by ruleset")]
  ConnectionNotAllowed,
  #[error("Network unreachable")]
  NetworkUnreachable,
  #[error("Host unreachable")]
  HostUnreachable,
  #[error("Connection refused")]
  ConnectionRefused,
  #[error("TTL expired")]
  TtlExpired,
  #[error("Command not supported")]
  CommandNotSupported,
  #[error("Address type not supported")]
  AddressTypeNotSupported,
  #[error("Unassigned reply code {0}")]
  Unassigned(u8),
}

impl From<http::Error> for Error {
  fn from(value: http::Error) -> Self {
    Error::Http(value)
  }
}

impl From<http::header::InvalidHeaderValue> for Error {
  fn from(value: http::header::InvalidHeaderValue) -> Self {
    Error::Http(http::Error::from(value))
  }
}

impl From<http::uri::InvalidUri> for Error {
  fn from(value: http::uri::InvalidUri) -> Self {
    Error::Http(http::Error::from(value))
  }
}

pub(crate) fn new_io_error(error_kind: ErrorKind, msg: &str) -> Error {
  Error::Io(std::io::Error::new(error_kind, msg))
}

pub(crate) fn parse<T: std::fmt::Display>(msg: T) -> Error {
  Error::Parse(msg.to_string())
}
