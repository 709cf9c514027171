//! Builds the TLS material used to dial the broker.
//!
//! The CA files are read in order and the first unreadable one aborts the
//! build, so a partially populated trust store is never handed to the dialer.
//! The resulting trust store is the only one the dialer uses: system roots
//! are never added, and an empty CA list trusts no server at all.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use tracing::warn;

use super::credentials::TlsCredentials;
use crate::utils::error::{ClientError, Result};

/// Trusted roots plus client identity, validated and ready for a mutual TLS dial.
#[derive(Clone)]
pub struct TlsContext {
    trusted_roots: usize,
    client_config: Arc<ClientConfig>,
}

impl TlsContext {
    pub fn from_credentials(creds: &TlsCredentials) -> Result<Self> {
        if !creds.is_valid() {
            return Err(ClientError::Configuration);
        }

        let mut roots = RootCertStore::empty();
        for path in creds.ca_paths() {
            let pem = fs::read(path).map_err(|source| ClientError::Io {
                path: path.clone(),
                source,
            })?;

            // unparsable blocks are skipped, as with any PEM bundle
            let certs = CertificateDer::pem_slice_iter(&pem).filter_map(|cert| cert.ok());
            let (added, _ignored) = roots.add_parsable_certificates(certs);
            if added == 0 {
                warn!("No usable certificates found in CA file {}", path.display());
            }
        }
        let trusted_roots = roots.len();

        let cert_pem = read_credential(&creds.cert)?;
        let key_pem = read_credential(&creds.key)?;

        let chain = CertificateDer::pem_slice_iter(&cert_pem)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| {
                ClientError::Credential(format!(
                    "malformed certificate {}: {e:?}",
                    creds.cert.display()
                ))
            })?;
        if chain.is_empty() {
            return Err(ClientError::Credential(format!(
                "no certificate found in {}",
                creds.cert.display()
            )));
        }

        let key = PrivateKeyDer::from_pem_slice(&key_pem).map_err(|e| {
            ClientError::Credential(format!(
                "malformed private key {}: {e:?}",
                creds.key.display()
            ))
        })?;

        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let client_config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ClientError::Credential(e.to_string()))?
            .with_root_certificates(roots)
            .with_client_auth_cert(chain, key)
            .map_err(|e| ClientError::Credential(e.to_string()))?;

        Ok(Self {
            trusted_roots,
            client_config: Arc::new(client_config),
        })
    }

    /// Number of certificates in the trust store.
    pub fn trusted_roots(&self) -> usize {
        self.trusted_roots
    }

    /// Client configuration presenting the client certificate and verifying
    /// the server against the configured roots only.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("trusted_roots", &self.trusted_roots)
            .finish_non_exhaustive()
    }
}

fn read_credential(path: &Path) -> Result<Vec<u8>> {
    fs::read(path)
        .map_err(|e| ClientError::Credential(format!("cannot read {}: {e}", path.display())))
}
