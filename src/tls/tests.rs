use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{CertificateError, ClientConnection, RootCertStore, ServerConfig, ServerConnection};
use tempfile::tempdir;

use super::{TlsContext, TlsCredentials};
use crate::utils::error::ClientError;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// A broker-side TLS config: the server fixture pair, requiring a client
/// certificate issued by the fixture CA.
fn broker_config() -> Arc<ServerConfig> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

    let mut client_roots = RootCertStore::empty();
    for cert in CertificateDer::pem_file_iter(fixture("ca.pem")).unwrap() {
        client_roots.add(cert.unwrap()).unwrap();
    }
    let verifier =
        WebPkiClientVerifier::builder_with_provider(Arc::new(client_roots), provider.clone())
            .build()
            .unwrap();

    let chain = CertificateDer::pem_file_iter(fixture("server.pem"))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let key = PrivateKeyDer::from_pem_file(fixture("server-key.pem")).unwrap();

    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_client_cert_verifier(verifier)
        .with_single_cert(chain, key)
        .unwrap();
    Arc::new(config)
}

/// Runs a full handshake between the two ends entirely in memory.
fn handshake(ctx: &TlsContext) -> Result<(), rustls::Error> {
    let name = ServerName::try_from("localhost").unwrap();
    let mut client = ClientConnection::new(ctx.client_config(), name)?;
    let mut server = ServerConnection::new(broker_config())?;

    for _ in 0..10 {
        let mut flight = Vec::new();
        while client.wants_write() {
            client.write_tls(&mut flight).unwrap();
        }
        if !flight.is_empty() {
            server.read_tls(&mut flight.as_slice()).unwrap();
            server.process_new_packets()?;
        }

        let mut flight = Vec::new();
        while server.wants_write() {
            server.write_tls(&mut flight).unwrap();
        }
        if !flight.is_empty() {
            client.read_tls(&mut flight.as_slice()).unwrap();
            client.process_new_packets()?;
        }

        if !client.is_handshaking() && !server.is_handshaking() {
            return Ok(());
        }
    }
    panic!("handshake did not finish");
}

fn fixture_credentials() -> TlsCredentials {
    TlsCredentials::new(
        fixture("client.pem"),
        fixture("client-key.pem"),
        [fixture("ca.pem")],
    )
}

#[test]
fn test_is_valid_rejects_blank_fields() {
    let missing_cert = TlsCredentials::new("", "key.pem", ["ca.pem"]);
    assert!(!missing_cert.is_valid());

    let missing_key = TlsCredentials::new("cert.pem", "", ["ca.pem"]);
    assert!(!missing_key.is_valid());

    let missing_ca = TlsCredentials {
        cert: "cert.pem".into(),
        key: "key.pem".into(),
        ca_cert: None,
    };
    assert!(!missing_ca.is_valid());

    assert!(!TlsCredentials::default().is_valid());
}

#[test]
fn test_is_valid_accepts_present_fields() {
    assert!(TlsCredentials::new("cert.pem", "key.pem", ["ca.pem"]).is_valid());
    // An empty CA list is present, just empty.
    assert!(TlsCredentials::new("cert.pem", "key.pem", Vec::<PathBuf>::new()).is_valid());
    // CA entries themselves are not inspected.
    assert!(TlsCredentials::new("cert.pem", "key.pem", [""]).is_valid());
}

#[test]
fn test_is_valid_does_not_touch_the_filesystem() {
    let creds = TlsCredentials::new("/nope/cert.pem", "/nope/key.pem", ["/nope/ca.pem"]);
    assert!(creds.is_valid());
}

#[test]
fn test_context_from_fixtures() {
    let ctx = TlsContext::from_credentials(&fixture_credentials()).expect("build context");
    assert_eq!(ctx.trusted_roots(), 1);
    assert!(!format!("{ctx:?}").contains("PRIVATE KEY"));
}

#[test]
fn test_context_completes_mutual_handshake_with_configured_ca() {
    let ctx = TlsContext::from_credentials(&fixture_credentials()).expect("build context");
    handshake(&ctx).expect("handshake with the fixture broker");
}

#[test]
fn test_context_with_empty_ca_list_has_no_roots() {
    let creds = TlsCredentials::new(
        fixture("client.pem"),
        fixture("client-key.pem"),
        Vec::<PathBuf>::new(),
    );
    let ctx = TlsContext::from_credentials(&creds).expect("build context");
    assert_eq!(ctx.trusted_roots(), 0);
}

#[test]
fn test_empty_ca_list_trusts_no_server() {
    let creds = TlsCredentials::new(
        fixture("client.pem"),
        fixture("client-key.pem"),
        Vec::<PathBuf>::new(),
    );
    let ctx = TlsContext::from_credentials(&creds).expect("build context");

    // no system roots are mixed in, so the broker certificate has no issuer
    let err = handshake(&ctx).unwrap_err();
    assert_eq!(
        err,
        rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer)
    );
}

#[test]
fn test_ca_that_did_not_issue_the_broker_cert_is_refused() {
    // the client certificate is a leaf, not the broker's issuer
    let creds = TlsCredentials::new(
        fixture("client.pem"),
        fixture("client-key.pem"),
        [fixture("client.pem")],
    );
    let ctx = TlsContext::from_credentials(&creds).expect("build context");
    assert!(handshake(&ctx).is_err());
}

#[test]
fn test_invalid_credentials_fail_before_reading_files() {
    let creds = TlsCredentials {
        cert: "/does/not/exist.pem".into(),
        key: "".into(),
        ca_cert: Some(vec!["/does/not/exist-ca.pem".into()]),
    };
    let err = TlsContext::from_credentials(&creds).unwrap_err();
    assert!(matches!(err, ClientError::Configuration));
}

#[test]
fn test_unreadable_ca_fails_fast_with_its_path() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing-ca.pem");
    let creds = TlsCredentials::new(
        fixture("client.pem"),
        fixture("client-key.pem"),
        [missing.clone(), fixture("ca.pem")],
    );

    match TlsContext::from_credentials(&creds) {
        Err(ClientError::Io { path, .. }) => assert_eq!(path, missing),
        other => panic!("expected Io error, got {other:?}"),
    }
}

#[test]
fn test_ca_read_failure_wins_over_bad_client_pair() {
    let creds = TlsCredentials::new(
        "/does/not/exist-cert.pem",
        "/does/not/exist-key.pem",
        ["/does/not/exist-ca.pem"],
    );
    let err = TlsContext::from_credentials(&creds).unwrap_err();
    assert!(matches!(err, ClientError::Io { .. }));
}

#[test]
fn test_missing_client_cert_is_a_credential_error() {
    let dir = tempdir().unwrap();
    let creds = TlsCredentials::new(
        dir.path().join("client.pem"),
        fixture("client-key.pem"),
        [fixture("ca.pem")],
    );
    let err = TlsContext::from_credentials(&creds).unwrap_err();
    assert!(matches!(err, ClientError::Credential(_)));
}

#[test]
fn test_garbage_pem_is_a_credential_error() {
    let dir = tempdir().unwrap();
    let cert = dir.path().join("client.pem");
    let key = dir.path().join("client-key.pem");
    fs::write(&cert, "this is not a certificate").unwrap();
    fs::write(&key, "this is not a key").unwrap();

    let creds = TlsCredentials::new(&cert, &key, [fixture("ca.pem")]);
    let err = TlsContext::from_credentials(&creds).unwrap_err();
    match err {
        ClientError::Credential(reason) => assert!(reason.contains("client.pem")),
        other => panic!("expected Credential error, got {other:?}"),
    }
}

#[test]
fn test_key_file_without_key_is_a_credential_error() {
    // A certificate where the key should be.
    let creds = TlsCredentials::new(
        fixture("client.pem"),
        fixture("client.pem"),
        [fixture("ca.pem")],
    );
    let err = TlsContext::from_credentials(&creds).unwrap_err();
    assert!(matches!(err, ClientError::Credential(_)));
}
