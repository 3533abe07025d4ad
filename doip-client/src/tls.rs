//! Blocking TLS wrap with optional peer-verification bypass.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme, StreamOwned};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

use crate::client::ClientError;

/// A plain TCP stream or a TLS session over one.
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.read(buf),
            Self::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.write(buf),
            Self::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(stream) => stream.flush(),
            Self::Tls(stream) => stream.flush(),
        }
    }
}

/// Optionally wrap a connected socket with TLS.
pub fn wrap(
    stream: TcpStream,
    hostname: &str,
    use_tls: bool,
    verify_tls: bool,
) -> Result<Transport, ClientError> {
    if !use_tls {
        return Ok(Transport::Plain(stream));
    }
    // Installing the provider twice is harmless; the first install wins.
    let _ = rustls::crypto::ring::default_provider().install_default();
    let config = if verify_tls {
        verified_config()
    } else {
        insecure_config()
    };
    let server_name = ServerName::try_from(hostname.to_string())
        .map_err(|_| ClientError::InvalidServerName(hostname.to_string()))?;
    let connection = ClientConnection::new(Arc::new(config), server_name)?;
    Ok(Transport::Tls(Box::new(StreamOwned::new(connection, stream))))
}

/// Client config trusting the webpki root set.
fn verified_config() -> ClientConfig {
    let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

fn insecure_config() -> ClientConfig {
    let mut config = verified_config();
    config
        .dangerous()
        .set_certificate_verifier(Arc::new(NoVerification));
    config
}

/// Accepts any certificate chain and hostname; used only when the caller
/// disabled verification.
#[derive(Debug)]
struct NoVerification;

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
