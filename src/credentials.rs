//! Credential resolution: classify the configured address and TLS block into
//! a security mode and materialize the matching transport credentials.
//!
//! The mode is computed exactly once, at client construction, and the
//! resulting credentials are owned by the channel factory; RPC callers never
//! see them.

use std::io::Cursor;
use std::sync::Arc;

use rustls::{Certificate, ClientConfig as RustlsConfig, PrivateKey, RootCertStore};

use crate::config::TlsConfig;
use crate::{Error, Result};

/// Transport encryption/authentication tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    /// Plaintext transport
    Disabled,
    /// Server-authenticated TLS, no client-side material
    OneWay,
    /// Mutual TLS with client-side material
    TwoWay,
}

/// Materialized transport credentials, consumed by the channel factory.
#[derive(Clone)]
pub(crate) enum Credentials {
    Insecure,
    Tls(Arc<RustlsConfig>),
}

// rustls::ClientConfig carries no Debug impl
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Insecure => f.write_str("Credentials::Insecure"),
            Credentials::Tls(_) => f.write_str("Credentials::Tls"),
        }
    }
}

/// Classify the security mode from the address scheme, the ssl flag and the
/// TLS block. A root certificate path wins unconditionally; otherwise a
/// secure scheme or an explicit ssl flag selects one-way TLS.
pub(crate) fn classify(address: &str, tls: Option<&TlsConfig>, ssl: bool) -> SecurityMode {
    if tls.map_or(false, |t| t.root_cert_path.is_some()) {
        return SecurityMode::TwoWay;
    }
    if ssl || address.starts_with("https://") {
        return SecurityMode::OneWay;
    }
    SecurityMode::Disabled
}

/// Resolve the security mode and build the matching credentials. Pure given
/// a filesystem snapshot: no state is kept between calls.
pub(crate) fn resolve(
    address: &str,
    tls: Option<&TlsConfig>,
    ssl: bool,
) -> Result<(SecurityMode, Credentials)> {
    let mode = classify(address, tls, ssl);
    let credentials = match mode {
        SecurityMode::Disabled => Credentials::Insecure,
        SecurityMode::OneWay => {
            let accept_invalid = tls.map_or(false, |t| t.accept_invalid_certs);
            Credentials::Tls(Arc::new(one_way_config(accept_invalid)))
        }
        SecurityMode::TwoWay => {
            let tls = tls.ok_or_else(|| Error::config("mutual TLS requires a TLS block"))?;
            Credentials::Tls(Arc::new(two_way_config(tls)?))
        }
    };
    Ok((mode, credentials))
}

/// One-way TLS: server trust only, no client-side material.
fn one_way_config(accept_invalid: bool) -> RustlsConfig {
    let builder = RustlsConfig::builder().with_safe_defaults();
    if accept_invalid {
        tracing::warn!("accepting invalid certificates - this should only be used for testing!");
        builder
            .with_custom_certificate_verifier(Arc::new(AcceptAllVerifier))
            .with_no_client_auth()
    } else {
        builder
            .with_root_certificates(RootCertStore::empty())
            .with_no_client_auth()
    }
}

/// Mutual TLS from the configured PEM files. Any subset of the client-side
/// files may be absent; absent material is passed as empty rather than
/// treated as an error.
fn two_way_config(tls: &TlsConfig) -> Result<RustlsConfig> {
    let root_pem = read_material(tls.root_cert_path.as_deref())?;
    let chain_pem = read_material(tls.cert_chain_path.as_deref())?;
    let key_pem = read_material(tls.client_key_path.as_deref())?;

    let mut roots = RootCertStore::empty();
    let root_certs = pem_certs(&root_pem)?;
    roots.add_parsable_certificates(&root_certs);

    let builder = RustlsConfig::builder().with_safe_defaults();

    // The verifier choice yields two distinct builder type-states
    // (`WantsClientCert` vs `WantsTransparencyPolicyOrClientCert`), so the
    // client-auth tail is applied inside each branch rather than unified.
    macro_rules! finish_client_auth {
        ($b:expr) => {
            if !chain_pem.is_empty() && !key_pem.is_empty() {
                let chain = pem_certs(&chain_pem)?.into_iter().map(Certificate).collect();
                let key = pem_private_key(&key_pem)?;
                $b.with_client_auth_cert(chain, key)
                    .map_err(|e| Error::config(format!("invalid client certificate or key: {e}")))
            } else {
                Ok($b.with_no_client_auth())
            }
        };
    }

    if tls.accept_invalid_certs {
        tracing::warn!("accepting invalid certificates - this should only be used for testing!");
        let builder = builder.with_custom_certificate_verifier(Arc::new(AcceptAllVerifier));
        finish_client_auth!(builder)
    } else {
        let builder = builder.with_root_certificates(roots);
        finish_client_auth!(builder)
    }
}

/// Read one configured PEM file; an unconfigured path yields empty material,
/// a read error on a configured path is a configuration error.
fn read_material(path: Option<&str>) -> Result<Vec<u8>> {
    match path {
        None => Ok(Vec::new()),
        Some(p) => std::fs::read(p)
            .map_err(|e| Error::config(format!("failed to read TLS file `{p}`: {e}"))),
    }
}

fn pem_certs(pem: &[u8]) -> Result<Vec<Vec<u8>>> {
    if pem.is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = Cursor::new(pem);
    rustls_pemfile::certs(&mut reader)
        .map_err(|e| Error::config(format!("malformed certificate PEM: {e}")))
}

fn pem_private_key(pem: &[u8]) -> Result<PrivateKey> {
    let mut reader = Cursor::new(pem);
    if let Some(key) = rustls_pemfile::pkcs8_private_keys(&mut reader)
        .map_err(|e| Error::config(format!("malformed private key PEM: {e}")))?
        .into_iter()
        .next()
    {
        return Ok(PrivateKey(key));
    }
    let mut reader = Cursor::new(pem);
    if let Some(key) = rustls_pemfile::rsa_private_keys(&mut reader)
        .map_err(|e| Error::config(format!("malformed private key PEM: {e}")))?
        .into_iter()
        .next()
    {
        return Ok(PrivateKey(key));
    }
    Err(Error::config("no usable private key found in PEM material"))
}

/// TLS certificate verifier that accepts all certificates (for testing only)
struct AcceptAllVerifier;

impl rustls::client::ServerCertVerifier for AcceptAllVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // Structurally valid PEM whose DER body is junk; RootCertStore ignores
    // unparsable entries instead of failing.
    const DUMMY_CERT_PEM: &[u8] = b"-----BEGIN CERTIFICATE-----\n\
AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA\n\
-----END CERTIFICATE-----\n";

    fn cert_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("tempfile");
        file.write_all(DUMMY_CERT_PEM).expect("write pem");
        file
    }

    #[test]
    fn plain_address_without_tls_is_disabled() {
        assert_eq!(classify("host:1", None, false), SecurityMode::Disabled);
        assert_eq!(classify("http://host:1", None, false), SecurityMode::Disabled);
    }

    #[test]
    fn secure_scheme_or_ssl_flag_is_one_way() {
        assert_eq!(classify("https://host:1", None, false), SecurityMode::OneWay);
        assert_eq!(classify("host:1", None, true), SecurityMode::OneWay);
        let tls = TlsConfig::new().with_server_name("host");
        assert_eq!(classify("https://host:1", Some(&tls), false), SecurityMode::OneWay);
    }

    #[test]
    fn root_cert_path_always_wins() {
        let tls = TlsConfig::new().with_root_cert("/certs/ca.pem");
        assert_eq!(classify("http://host:1", Some(&tls), false), SecurityMode::TwoWay);
        assert_eq!(classify("host:1", Some(&tls), false), SecurityMode::TwoWay);
        assert_eq!(classify("https://host:1", Some(&tls), true), SecurityMode::TwoWay);
    }

    #[test]
    fn classification_is_pure() {
        let tls = TlsConfig::new().with_root_cert("/certs/ca.pem");
        let first = classify("https://host:1", Some(&tls), false);
        let second = classify("https://host:1", Some(&tls), false);
        assert_eq!(first, second);
    }

    #[test]
    fn resolve_disabled_yields_insecure_credentials() {
        let (mode, credentials) = resolve("host:1", None, false).unwrap();
        assert_eq!(mode, SecurityMode::Disabled);
        assert!(matches!(credentials, Credentials::Insecure));
    }

    #[test]
    fn resolve_one_way_builds_tls_credentials() {
        let (mode, credentials) = resolve("https://host:1", None, false).unwrap();
        assert_eq!(mode, SecurityMode::OneWay);
        assert!(matches!(credentials, Credentials::Tls(_)));
    }

    #[test]
    fn resolve_two_way_with_root_cert_only() {
        let root = cert_file();
        let tls = TlsConfig::new().with_root_cert(root.path().to_string_lossy());
        let (mode, credentials) = resolve("host:1", Some(&tls), false).unwrap();
        assert_eq!(mode, SecurityMode::TwoWay);
        assert!(matches!(credentials, Credentials::Tls(_)));
    }

    #[test]
    fn resolve_fails_on_unreadable_configured_path() {
        let tls = TlsConfig::new().with_root_cert("/does/not/exist/ca.pem");
        let err = resolve("host:1", Some(&tls), false).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        // a missing chain file is just as fatal, even though an
        // unconfigured chain would have been legal
        let root = cert_file();
        let tls = TlsConfig::new()
            .with_root_cert(root.path().to_string_lossy())
            .with_client_identity("/does/not/exist/chain.pem", "/does/not/exist/key.pem");
        let err = resolve("host:1", Some(&tls), false).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
