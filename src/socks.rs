//! SOCKS5 (RFC 1928) client handshake, with optional username/password
//! authentication (RFC 1929). Only the TCP CONNECT command is spoken; the
//! submission engine tunnels one request per connection.

use crate::errors::{new_io_error, Error, ReplyError, Result};
use crate::submit::ProxyCreds;
use std::net::IpAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[rustfmt::skip]
pub(crate) mod consts {
  pub const SOCKS5_VERSION: u8 = 0x05;

  pub const SOCKS5_AUTH_METHOD_NONE: u8 = 0x00;
  pub const SOCKS5_AUTH_METHOD_PASSWORD: u8 = 0x02;
  pub const SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE: u8 = 0xff;

  pub const SOCKS5_CMD_TCP_CONNECT: u8 = 0x01;

  pub const SOCKS5_ADDR_TYPE_IPV4: u8 = 0x01;
  pub const SOCKS5_ADDR_TYPE_DOMAIN_NAME: u8 = 0x03;
  pub const SOCKS5_ADDR_TYPE_IPV6: u8 = 0x04;

  pub const SOCKS5_AUTH_VERSION: u8 = 0x01;
  pub const SOCKS5_REPLY_SUCCEEDED: u8 = 0x00;
}

impl From<u8> for ReplyError {
  fn from(value: u8) -> Self {
    match value {
      0x00 => ReplyError::Succeeded,
      0x01 => ReplyError::GeneralFailure,
      0x02 => ReplyError::ConnectionNotAllowed,
      0x03 => ReplyError::NetworkUnreachable,
      0x04 => ReplyError::HostUnreachable,
      0x05 => ReplyError::ConnectionRefused,
      0x06 => ReplyError::TtlExpired,
      0x07 => ReplyError::CommandNotSupported,
      0x08 => ReplyError::AddressTypeNotSupported,
      other => ReplyError::Unassigned(other),
    }
  }
}

/// Negotiate a TCP CONNECT tunnel to `host:port` on an established
/// connection to a SOCKS5 proxy. Hostnames are passed through for the proxy
/// to resolve.
pub(crate) async fn connect<S>(
  socket: &mut S,
  host: &str,
  port: u16,
  creds: Option<&ProxyCreds>,
) -> Result<()>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let method = negotiate_method(socket, creds.is_some()).await?;
  if method == consts::SOCKS5_AUTH_METHOD_PASSWORD {
    let creds = creds.ok_or_else(|| {
      Error::Handshake("proxy selected password auth without credentials".to_string())
    })?;
    password_auth(socket, creds).await?;
  }
  socket.write_all(&encode_connect(host, port)?).await?;
  socket.flush().await?;
  read_reply(socket).await
}

async fn negotiate_method<S>(socket: &mut S, with_password: bool) -> Result<u8>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let mut packet = vec![consts::SOCKS5_VERSION, 1, consts::SOCKS5_AUTH_METHOD_NONE];
  if with_password {
    packet[1] = 2;
    packet.push(consts::SOCKS5_AUTH_METHOD_PASSWORD);
  }
  socket.write_all(&packet).await?;
  let mut buf = [0u8; 2];
  socket.read_exact(&mut buf).await?;
  let [version, method] = buf;
  if version != consts::SOCKS5_VERSION {
    return Err(new_io_error(
      std::io::ErrorKind::InvalidData,
      "unsupported SOCKS version",
    ));
  }
  match method {
    consts::SOCKS5_AUTH_METHOD_NONE | consts::SOCKS5_AUTH_METHOD_PASSWORD => Ok(method),
    _ => {
      socket
        .write_all(&[
          consts::SOCKS5_VERSION,
          consts::SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE,
        ])
        .await?;
      Err(Error::Handshake("no acceptable auth methods".to_string()))
    }
  }
}

async fn password_auth<S>(socket: &mut S, creds: &ProxyCreds) -> Result<()>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let user = creds.username.as_bytes();
  let pass = creds.password.as_bytes();
  if user.len() > u8::MAX as usize || pass.len() > u8::MAX as usize {
    return Err(Error::Handshake("credentials too long for SOCKS5".to_string()));
  }
  let mut packet = vec![consts::SOCKS5_AUTH_VERSION, user.len() as u8];
  packet.extend(user);
  packet.push(pass.len() as u8);
  packet.extend(pass);
  socket.write_all(&packet).await?;

  let mut buf = [0u8; 2];
  socket.read_exact(&mut buf).await?;
  let [_version, status] = buf;
  if status != consts::SOCKS5_REPLY_SUCCEEDED {
    return Err(Error::Handshake(format!(
      "authentication with username `{}` rejected",
      creds.username
    )));
  }
  Ok(())
}

fn encode_connect(host: &str, port: u16) -> Result<Vec<u8>> {
  let mut packet = vec![
    consts::SOCKS5_VERSION,
    consts::SOCKS5_CMD_TCP_CONNECT,
    0x00,
  ];
  match host.parse::<IpAddr>() {
    Ok(IpAddr::V4(ip)) => {
      packet.push(consts::SOCKS5_ADDR_TYPE_IPV4);
      packet.extend(ip.octets());
    }
    Ok(IpAddr::V6(ip)) => {
      packet.push(consts::SOCKS5_ADDR_TYPE_IPV6);
      packet.extend(ip.octets());
    }
    Err(_) => {
      if host.len() > u8::MAX as usize {
        return Err(new_io_error(
          std::io::ErrorKind::InvalidData,
          "domain name too long",
        ));
      }
      packet.push(consts::SOCKS5_ADDR_TYPE_DOMAIN_NAME);
      packet.push(host.len() as u8);
      packet.extend(host.as_bytes());
    }
  }
  packet.extend(port.to_be_bytes());
  Ok(packet)
}

async fn read_reply<S>(socket: &mut S) -> Result<()>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let mut buf = [0u8; 4];
  socket.read_exact(&mut buf).await?;
  let [version, reply, _rsv, address_type] = buf;
  if version != consts::SOCKS5_VERSION {
    return Err(new_io_error(
      std::io::ErrorKind::InvalidData,
      "unsupported SOCKS version in reply",
    ));
  }
  if reply != consts::SOCKS5_REPLY_SUCCEEDED {
    return Err(Error::Socks(ReplyError::from(reply)));
  }
  // Bound address, unused but must be consumed.
  let addr_len = match address_type {
    consts::SOCKS5_ADDR_TYPE_IPV4 => 4,
    consts::SOCKS5_ADDR_TYPE_IPV6 => 16,
    consts::SOCKS5_ADDR_TYPE_DOMAIN_NAME => {
      let mut len = [0u8; 1];
      socket.read_exact(&mut len).await?;
      len[0] as usize
    }
    _ => {
      return Err(Error::Socks(ReplyError::AddressTypeNotSupported));
    }
  };
  let mut bound = vec![0u8; addr_len + 2];
  socket.read_exact(&mut bound).await?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn encodes_domain_connect() {
    let packet = encode_connect("example.com", 443).unwrap();
    assert_eq!(&packet[..3], &[0x05, 0x01, 0x00]);
    assert_eq!(packet[3], consts::SOCKS5_ADDR_TYPE_DOMAIN_NAME);
    assert_eq!(packet[4] as usize, "example.com".len());
    assert_eq!(&packet[5..16], b"example.com");
    assert_eq!(&packet[16..], &443u16.to_be_bytes());
  }

  #[test]
  fn encodes_ipv4_connect() {
    let packet = encode_connect("127.0.0.1", 1080).unwrap();
    assert_eq!(packet[3], consts::SOCKS5_ADDR_TYPE_IPV4);
    assert_eq!(&packet[4..8], &[127, 0, 0, 1]);
    assert_eq!(&packet[8..], &1080u16.to_be_bytes());
  }

  #[test]
  fn rejects_oversized_domain() {
    let long = "a".repeat(300);
    assert!(encode_connect(&long, 80).is_err());
  }

  #[test]
  fn reply_codes_decode() {
    assert_eq!(ReplyError::from(0x05), ReplyError::ConnectionRefused);
    assert_eq!(ReplyError::from(0x42), ReplyError::Unassigned(0x42));
  }
}
