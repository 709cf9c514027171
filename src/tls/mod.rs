//! The `tls` module covers everything that happens before the first byte is
//! sent to the broker: the credential shape check and the construction of the
//! trust store and client identity used for mutual TLS.

pub mod context;
pub mod credentials;

pub use context::TlsContext;
pub use credentials::TlsCredentials;

#[cfg(test)]
mod tests;
