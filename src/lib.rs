#![deny(missing_docs)]

//! # snare
//!
//! The `snare` crate provides the low-level HTTP object model and submission
//! engine at the heart of an intercepting proxy.
//!
//! Captured exchanges are held as plain data records ([`ProxyRequest`],
//! [`ProxyResponse`], [`WsMessage`]) that serialize back to the exact bytes
//! they were parsed from, can be cloned and deep-cloned, and can be
//! re-submitted to their destination through several outbound topologies:
//!
//! - directly ([`submit`])
//! - through an HTTP proxy, tunnelling TLS destinations with `CONNECT`
//!   ([`submit_proxy`])
//! - through a SOCKS5 proxy ([`submit_socks`])
//!
//! WebSocket handshakes captured from an intercepted client can be replayed
//! upstream with [`ws_dial`] and friends.
//!
//! ## Trust model
//!
//! This crate is built for machine-in-the-middle use: outbound TLS sessions
//! deliberately skip server-certificate validation. Do not use it as a
//! general-purpose HTTP client.
//!
//! ## Making a request
//!
//! ```no_run
//! # async fn run() -> Result<(), snare::Error> {
//! let dest = snare::Destination::new("httpbin.org", Some(80), false);
//! let mut req = snare::ProxyRequest::from_bytes(
//!   b"GET /get HTTP/1.1\r\nHost: httpbin.org\r\n\r\n",
//!   dest,
//! )
//! .await?;
//! snare::submit(&mut req).await?;
//! let rsp = req.server_response.as_ref().expect("submitted");
//! println!("{}", rsp.status_line());
//! # Ok(())
//! # }
//! ```

mod body;
mod dest;
mod errors;
mod headers;
/// HTTP/1.x wire parsing and serialization.
pub mod http1;
mod request;
mod response;
mod socket;
mod socks;
mod submit;
/// Deliberately-insecure TLS configuration for both proxy roles.
pub mod tls;
mod websocket;

pub use body::Body;
pub use dest::Destination;
pub use errors::{Error, ReplyError, Result};
pub use headers::Headers;
pub use http::Method;
pub use http::{StatusCode, Version};
pub use request::ProxyRequest;
pub use response::ProxyResponse;
pub use socket::MaybeTlsStream;
pub use submit::{
  perform_connect, submit, submit_proxy, submit_socks, DialFuture, NetDialer, ProxyCreds,
};
pub use websocket::{opcode, ws_dial, ws_dial_proxy, ws_dial_socks, Direction, WsMessage, WsSession};

pub(crate) const CR_LF: &[u8] = &[13, 10];
pub(crate) const SPACE: &[u8] = &[32];
pub(crate) const COLON_SPACE: &[u8] = &[58, 32];
