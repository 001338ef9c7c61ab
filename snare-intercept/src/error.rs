//! Error types for the interception listener

use thiserror::Error;

/// Result type for interception operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for interception operations
#[derive(Error, Debug)]
pub enum Error {
  /// IO error
  #[error(transparent)]
  Io(#[from] std::io::Error),

  /// Error from the snare object model or submission engine
  #[error(transparent)]
  Snare(#[from] snare::Error),

  /// TLS error
  #[error(transparent)]
  Tls(#[from] tokio_rustls::rustls::Error),

  /// Certificate generation or signing error
  #[error("certificate error: {0}")]
  Certificate(String),

  /// Accept on a closed listener
  #[error("listener is closed")]
  Closed,

  /// Operation on a connection whose stream has been torn down
  #[error("intercepted connection {0} does not have an active stream")]
  Uninitialized(u64),
}

impl Error {
  /// Create a certificate error and log it
  pub fn certificate(msg: impl Into<String>) -> Self {
    let error = Error::Certificate(msg.into());
    tracing::error!("{}", error);
    error
  }
}
