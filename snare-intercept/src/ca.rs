//! Certificate minting for TLS impersonation.
//!
//! The listener terminates intercepted TLS sessions with leaf certificates
//! signed by a CA the operator has installed in the client's trust store.
//! Only the "mint a leaf for these hostnames" interface matters to the
//! interception path; persistence of the CA itself is the operator's
//! problem.

use crate::error::{Error, Result};
use rand::Rng;
use rcgen::{
  BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
  KeyUsagePurpose, SanType,
};
use std::net::IpAddr;
use time::{Duration, OffsetDateTime};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// Leaf validity period in days.
const LEAF_TTL_DAYS: i64 = 365;
/// Offset for not_before timestamps to tolerate clock skew.
const NOT_BEFORE_OFFSET_SECS: i64 = 60;

/// A certificate authority that signs per-hostname leaf certificates.
pub struct CertAuthority {
  issuer: Issuer<'static, KeyPair>,
  ca_cert_der: CertificateDer<'static>,
}

impl CertAuthority {
  /// Generate a fresh self-signed CA valid for ten years.
  pub fn generate() -> Result<Self> {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "Snare Proxy CA");
    dn.push(DnType::OrganizationName, "Snare");
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::days(3650);

    let key_pair = KeyPair::generate()
      .map_err(|e| Error::certificate(format!("failed to generate CA key pair: {e}")))?;
    let cert = params
      .self_signed(&key_pair)
      .map_err(|e| Error::certificate(format!("failed to self-sign CA: {e}")))?;

    let cert_pem = cert.pem();
    let ca_cert_der = CertificateDer::from(cert.der().to_vec());
    let issuer = Issuer::from_ca_cert_pem(&cert_pem, key_pair)
      .map_err(|e| Error::certificate(format!("failed to create issuer: {e}")))?;

    Ok(CertAuthority {
      issuer,
      ca_cert_der,
    })
  }

  /// Load a CA from PEM-encoded certificate and private key.
  pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
    let key_pair = KeyPair::from_pem(key_pem)
      .map_err(|e| Error::certificate(format!("failed to parse CA key: {e}")))?;
    let issuer = Issuer::from_ca_cert_pem(cert_pem, key_pair)
      .map_err(|e| Error::certificate(format!("failed to create issuer from CA cert: {e}")))?;
    let ca_cert_der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
      .next()
      .ok_or_else(|| Error::certificate("no certificate found in PEM"))?
      .map_err(|e| Error::certificate(format!("failed to parse CA PEM: {e}")))?;
    Ok(CertAuthority {
      issuer,
      ca_cert_der,
    })
  }

  /// Mint a leaf certificate whose subject alternative names cover
  /// `hostnames`, signed by this CA. Returns the chain `[leaf, ca]` and the
  /// leaf's private key, ready for a rustls server configuration.
  pub fn sign_host(
    &self,
    hostnames: &[&str],
  ) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let first = hostnames
      .first()
      .ok_or_else(|| Error::certificate("no hostnames to sign"))?;

    let mut params = CertificateParams::default();
    params.serial_number = Some(rand::thread_rng().gen::<u64>().into());

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, *first);
    params.distinguished_name = dn;

    let mut sans = Vec::new();
    for hostname in hostnames {
      // IP literals get an iPAddress SAN; strict clients check it.
      match hostname.parse::<IpAddr>() {
        Ok(ip) => sans.push(SanType::IpAddress(ip)),
        Err(_) => sans.push(SanType::DnsName((*hostname).try_into().map_err(|_| {
          Error::certificate(format!("invalid hostname: {hostname}"))
        })?)),
      }
    }
    params.subject_alt_names = sans;

    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::seconds(NOT_BEFORE_OFFSET_SECS);
    params.not_after = now + Duration::days(LEAF_TTL_DAYS);

    let key_pair = KeyPair::generate()
      .map_err(|e| Error::certificate(format!("failed to generate leaf key pair: {e}")))?;
    let cert = params
      .signed_by(&key_pair, &self.issuer)
      .map_err(|e| Error::certificate(format!("failed to sign leaf certificate: {e}")))?;

    let cert_der = CertificateDer::from(cert.der().to_vec());
    let key_der = PrivateKeyDer::try_from(key_pair.serialize_der())
      .map_err(|_| Error::certificate("failed to serialize leaf key"))?;

    Ok((vec![cert_der, self.ca_cert_der.clone()], key_der))
  }

  /// The CA certificate in DER form, e.g. for installing into a client
  /// trust store.
  pub fn ca_cert_der(&self) -> &CertificateDer<'static> {
    &self.ca_cert_der
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn signs_a_usable_leaf() {
    let ca = CertAuthority::generate().unwrap();
    let (chain, key) = ca.sign_host(&["example.com"]).unwrap();
    assert_eq!(chain.len(), 2, "expected leaf + ca in chain");
    // The chain must be accepted by a rustls server configuration.
    snare::tls::server_config(chain, key).unwrap();
  }

  #[test]
  fn signs_ip_literals() {
    let ca = CertAuthority::generate().unwrap();
    let (chain, _key) = ca.sign_host(&["127.0.0.1"]).unwrap();
    assert_eq!(chain.len(), 2);
  }

  #[test]
  fn refuses_empty_hostname_list() {
    let ca = CertAuthority::generate().unwrap();
    assert!(ca.sign_host(&[]).is_err());
  }
}
