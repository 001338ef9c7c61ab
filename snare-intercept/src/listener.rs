use crate::ca::CertAuthority;
use crate::conn::InterceptedConn;
use crate::error::{Error, Result};
use crate::id::LISTENER_IDS;
use http::Method;
use snare::http1;
use snare::{Destination, ProxyRequest};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";

/// Lifecycle state of an [`InterceptListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
  /// Constructed but the translator is not running yet.
  Starting,
  /// Accepting and translating connections.
  Running,
  /// Closed; `Stopped` is absorbing.
  Stopped,
}

/// The sentinel address of the listener itself; surfaced connections carry
/// their destination descriptor instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct InternalAddr;

impl InternalAddr {
  /// The sentinel network name.
  pub fn network(&self) -> &'static str {
    "<internal network>"
  }
}

impl fmt::Display for InternalAddr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("<internal connection>")
  }
}

/// Fans any number of TCP listeners into one accept stream of
/// [`InterceptedConn`]s.
///
/// Each accepted socket has one HTTP request read from it to discover the
/// intended destination. `CONNECT` requests are answered with a literal
/// `200 Connection established` and probed for a TLS ClientHello, which is
/// terminated with a leaf minted from the configured CA; any other request
/// is put back so the consumer re-reads it from the start. Translations run
/// concurrently, so the accept order across connections may differ from the
/// order sockets arrived.
pub struct InterceptListener {
  state: Mutex<ListenerState>,
  input_tx: mpsc::Sender<TcpStream>,
  output_rx: AsyncMutex<mpsc::Receiver<InterceptedConn>>,
  done_tx: watch::Sender<bool>,
  done_rx: watch::Receiver<bool>,
  sub_listeners: Mutex<HashMap<u64, watch::Sender<bool>>>,
  workers: AsyncMutex<Vec<JoinHandle<()>>>,
  ca: Arc<Mutex<Option<Arc<CertAuthority>>>>,
}

impl Default for InterceptListener {
  fn default() -> Self {
    Self::new()
  }
}

impl InterceptListener {
  /// Create the listener and spawn its translator worker.
  pub fn new() -> Self {
    let state = Mutex::new(ListenerState::Starting);
    let (input_tx, mut input_rx) = mpsc::channel::<TcpStream>(32);
    let (output_tx, output_rx) = mpsc::channel::<InterceptedConn>(32);
    let (done_tx, done_rx) = watch::channel(false);
    let ca: Arc<Mutex<Option<Arc<CertAuthority>>>> = Arc::new(Mutex::new(None));

    let translator = {
      let mut done = done_rx.clone();
      let ca = ca.clone();
      tokio::spawn(async move {
        tracing::debug!("starting connection translator");
        loop {
          tokio::select! {
            _ = done.changed() => break,
            sock = input_rx.recv() => {
              let Some(sock) = sock else { break };
              let output_tx = output_tx.clone();
              let ca = ca.lock().unwrap().clone();
              // Translation blocks on client I/O; it must not stall
              // sibling connections.
              tokio::spawn(async move {
                if let Err(e) = translate(sock, ca, output_tx).await {
                  tracing::warn!("could not translate connection: {e}");
                }
              });
            }
          }
        }
        tracing::debug!("connection translator shut down");
      })
    };

    *state.lock().unwrap() = ListenerState::Running;
    tracing::debug!("intercept listener running");

    InterceptListener {
      state,
      input_tx,
      output_rx: AsyncMutex::new(output_rx),
      done_tx,
      done_rx,
      sub_listeners: Mutex::new(HashMap::new()),
      workers: AsyncMutex::new(vec![translator]),
      ca,
    }
  }

  /// Current lifecycle state.
  pub fn state(&self) -> ListenerState {
    *self.state.lock().unwrap()
  }

  /// The listener's own sentinel address.
  pub fn addr(&self) -> InternalAddr {
    InternalAddr
  }

  /// Replace the CA used by subsequent translations.
  pub fn set_ca(&self, ca: Arc<CertAuthority>) {
    *self.ca.lock().unwrap() = Some(ca);
  }

  /// The CA used by subsequent translations, if one is set.
  pub fn ca(&self) -> Option<Arc<CertAuthority>> {
    self.ca.lock().unwrap().clone()
  }

  /// Register a sub-listener and start forwarding every socket it accepts
  /// into the translator. Returns the sub-listener's id for
  /// [`InterceptListener::remove_listener`].
  pub async fn add_listener(&self, listener: TcpListener) -> u64 {
    let id = LISTENER_IDS.next();
    if self.state() == ListenerState::Stopped {
      tracing::debug!(listener = id, "listener is stopped, dropping sub-listener");
      return id;
    }
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let input_tx = self.input_tx.clone();
    let mut done = self.done_rx.clone();

    let handle = tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = done.changed() => break,
          _ = stop_rx.changed() => break,
          // the translator going away also ends this worker
          _ = input_tx.closed() => break,
          res = listener.accept() => match res {
            Ok((sock, _peer)) => {
              tracing::debug!(listener = id, "received connection from sub-listener");
              if input_tx.send(sock).await.is_err() {
                break;
              }
            }
            Err(e) => {
              // An accept failure means this sub-listener is gone; the
              // rest of the proxy is unaffected.
              tracing::debug!(listener = id, "sub-listener closed: {e}");
              break;
            }
          }
        }
      }
    });

    self.sub_listeners.lock().unwrap().insert(id, stop_tx);
    self.workers.lock().await.push(handle);
    tracing::debug!(listener = id, "sub-listener added");
    id
  }

  /// Unregister a sub-listener and close its socket. Connections already
  /// translated are unaffected.
  pub fn remove_listener(&self, id: u64) {
    if let Some(stop) = self.sub_listeners.lock().unwrap().remove(&id) {
      let _ = stop.send(true);
      tracing::debug!(listener = id, "sub-listener removed");
    }
  }

  /// Wait for the next finalized connection. Fails with [`Error::Closed`]
  /// once the listener is closed.
  pub async fn accept(&self) -> Result<InterceptedConn> {
    let mut output_rx = self.output_rx.lock().await;
    let mut done = self.done_rx.clone();
    if *done.borrow_and_update() {
      return Err(Error::Closed);
    }
    tokio::select! {
      _ = done.changed() => Err(Error::Closed),
      conn = output_rx.recv() => match conn {
        Some(conn) => {
          tracing::debug!(id = conn.id(), "connection accepted");
          Ok(conn)
        }
        None => Err(Error::Closed),
      }
    }
  }

  /// Stop the listener: close every sub-listener, signal all workers and
  /// wait for them to drain. Connections already surfaced stay open and
  /// become the consumer's responsibility. Safe to call more than once.
  pub async fn close(&self) {
    {
      let mut state = self.state.lock().unwrap();
      if *state == ListenerState::Stopped {
        return;
      }
      *state = ListenerState::Stopped;
    }
    tracing::debug!("closing intercept listener");
    let _ = self.done_tx.send(true);
    self.sub_listeners.lock().unwrap().clear();
    let mut workers = self.workers.lock().await;
    for handle in workers.drain(..) {
      let _ = handle.await;
    }
    tracing::debug!("intercept listener closed");
  }
}

/// Take one socket, discover its destination, maybe impersonate TLS, and
/// hand the finalized connection to the accept queue. Any failure drops the
/// in-flight connection without impacting the listener.
async fn translate(
  sock: TcpStream,
  ca: Option<Arc<CertAuthority>>,
  output_tx: mpsc::Sender<InterceptedConn>,
) -> Result<()> {
  let mut conn = InterceptedConn::new(sock);
  if let Some(ca) = ca {
    conn.set_ca(ca);
  }

  let parsed = {
    let mut reader = BufReader::new(&mut conn);
    http1::read_request(&mut reader).await?
  };
  let (host, port) = derive_host_port(&parsed.method, &parsed.target)?;

  let dest;
  if parsed.method == Method::CONNECT {
    conn.write_all(CONNECT_ESTABLISHED).await?;
    conn.flush().await?;
    let use_tls = conn.start_maybe_tls(&host).await?;
    let port = port.unwrap_or(if use_tls { 443 } else { 80 });
    dest = Destination::new(host, Some(port), use_tls);
  } else {
    let port = port.unwrap_or(80);
    dest = Destination::new(host, Some(port), false);
    let request = ProxyRequest::from_parsed(parsed, dest.clone());
    conn.put_back(&request);
  }

  conn.set_destination(dest.clone());
  tracing::info!(id = conn.id(), "received connection to {dest}");
  output_tx.send(conn).await.map_err(|_| Error::Closed)?;
  Ok(())
}

/// Derive the destination host and port from a request target. `CONNECT`
/// targets are an authority; otherwise only an absolute-form target names a
/// host. A target carrying only a host leaves the port unknown.
fn derive_host_port(method: &Method, target: &str) -> Result<(String, Option<u16>)> {
  let authority = if *method == Method::CONNECT {
    target.to_string()
  } else if target.contains("://") {
    target
      .parse::<http::Uri>()
      .ok()
      .and_then(|u| u.authority().map(|a| a.as_str().to_string()))
      .unwrap_or_default()
  } else {
    String::new()
  };
  split_host_port(&authority)
}

fn split_host_port(authority: &str) -> Result<(String, Option<u16>)> {
  if let Some(rest) = authority.strip_prefix('[') {
    if let Some((host, tail)) = rest.split_once(']') {
      let port = match tail.strip_prefix(':') {
        Some(p) => Some(parse_port(p, authority)?),
        None => None,
      };
      return Ok((host.to_string(), port));
    }
  }
  match authority.rsplit_once(':') {
    Some((host, port)) if !host.contains(':') => {
      Ok((host.to_string(), Some(parse_port(port, authority)?)))
    }
    _ => Ok((authority.to_string(), None)),
  }
}

fn parse_port(port: &str, authority: &str) -> Result<u16> {
  port
    .parse()
    .map_err(|_| Error::Snare(snare::Error::Parse(format!("invalid port in {authority}"))))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn splits_host_and_port_forms() {
    assert_eq!(
      split_host_port("example.com:443").unwrap(),
      ("example.com".to_string(), Some(443))
    );
    assert_eq!(
      split_host_port("example.com").unwrap(),
      ("example.com".to_string(), None)
    );
    assert_eq!(
      split_host_port("[::1]:8443").unwrap(),
      ("::1".to_string(), Some(8443))
    );
    assert_eq!(split_host_port("[::1]").unwrap(), ("::1".to_string(), None));
    assert!(split_host_port("example.com:x").is_err());
  }

  #[test]
  fn derives_from_request_targets() {
    assert_eq!(
      derive_host_port(&Method::CONNECT, "example.com:443").unwrap(),
      ("example.com".to_string(), Some(443))
    );
    assert_eq!(
      derive_host_port(&Method::GET, "http://example.com/").unwrap(),
      ("example.com".to_string(), None)
    );
    assert_eq!(
      derive_host_port(&Method::GET, "http://example.com:8080/x").unwrap(),
      ("example.com".to_string(), Some(8080))
    );
    // origin-form targets carry no destination
    assert_eq!(
      derive_host_port(&Method::GET, "/path").unwrap(),
      (String::new(), None)
    );
  }
}
