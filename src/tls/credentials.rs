use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// File locations of the client certificate, its private key and the CA
/// certificates used to verify the broker.
///
/// `ca_cert` distinguishes "not configured" (`None`) from "configured but
/// empty" (`Some(vec![])`); only the former fails [`TlsCredentials::is_valid`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsCredentials {
    #[serde(default)]
    pub cert: PathBuf,
    #[serde(default)]
    pub key: PathBuf,
    #[serde(default)]
    pub ca_cert: Option<Vec<PathBuf>>,
}

impl TlsCredentials {
    pub fn new(
        cert: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
        ca_cert: impl IntoIterator<Item = impl Into<PathBuf>>,
    ) -> Self {
        Self {
            cert: cert.into(),
            key: key.into(),
            ca_cert: Some(ca_cert.into_iter().map(Into::into).collect()),
        }
    }

    /// Checks for blanks and obvious errors.
    ///
    /// This is a shape check only: files are neither opened nor parsed here.
    pub fn is_valid(&self) -> bool {
        if self.cert.as_os_str().is_empty() {
            return false;
        }
        if self.key.as_os_str().is_empty() {
            return false;
        }
        self.ca_cert.is_some()
    }

    /// The configured CA paths, empty when none are configured.
    pub fn ca_paths(&self) -> &[PathBuf] {
        self.ca_cert.as_deref().unwrap_or_default()
    }
}
