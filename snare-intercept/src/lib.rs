//! Interception listener for an HTTP/HTTPS machine-in-the-middle proxy.
//!
//! This crate multiplexes any number of TCP listeners into one accept
//! stream of logical connections. Each raw connection has its first HTTP
//! request parsed to discover the intended destination; `CONNECT` requests
//! are answered directly and, when the client follows with a TLS
//! ClientHello, the connection is impersonated with a leaf certificate
//! minted on the fly from a configured CA. Consumers read each surfaced
//! connection as if it began at the start of the client's first request.
//!
//! # Example
//!
//! ```no_run
//! use snare_intercept::{CertAuthority, InterceptListener};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!   let listener = InterceptListener::new();
//!   listener.set_ca(Arc::new(CertAuthority::generate()?));
//!   let tcp = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!   listener.add_listener(tcp).await;
//!   loop {
//!     let conn = listener.accept().await?;
//!     println!("connection {} to {}", conn.id(), conn.remote_addr());
//!   }
//! }
//! ```

mod ca;
mod conn;
mod error;
mod id;
mod listener;
mod peek;

pub use ca::CertAuthority;
pub use conn::InterceptedConn;
pub use error::{Error, Result};
pub use id::IdCounter;
pub use listener::{InterceptListener, InternalAddr, ListenerState};
pub use peek::PeekStream;
