//! TLS acceptor wiring from on-disk PEM material.
//!
//! Both listeners wrap with TLS when `certs/server.crt` and
//! `certs/server.key` exist in the working directory; otherwise the server
//! runs plaintext. No certificate generation happens here.

use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;
use tracing::info;

const CERT_PATH: &str = "certs/server.crt";
const KEY_PATH: &str = "certs/server.key";

/// Build a `TlsAcceptor` when the certificate/key pair is provisioned.
pub fn maybe_acceptor() -> anyhow::Result<Option<TlsAcceptor>> {
    let cert_path = Path::new(CERT_PATH);
    let key_path = Path::new(KEY_PATH);
    if !cert_path.exists() || !key_path.exists() {
        return Ok(None);
    }
    info!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        "using TLS certificate"
    );
    Ok(Some(build_acceptor(cert_path, key_path)?))
}

/// Build a `TlsAcceptor` from PEM certificate and key files.
pub fn build_acceptor(cert_path: &Path, key_path: &Path) -> anyhow::Result<TlsAcceptor> {
    let cert_file = fs::File::open(cert_path)?;
    let key_file = fs::File::open(key_path)?;

    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut BufReader::new(cert_file)).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        anyhow::bail!("no certificates found in {}", cert_path.display());
    }

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut BufReader::new(key_file))?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {}", key_path.display()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
