//! TLS/SSL handling for secure tunnel transports
//!
//! Both transports share one rustls configuration policy: the webpki root
//! store, optionally extended with a PEM bundle for self-signed
//! concentrators, or no verification at all when the profile disables it.
//! A client certificate is presented when the profile names one.

use super::provider;
use crate::config::TransportSecurity;
use crate::error::{IntoTransportError, Result, TransportError};
use rustls::client::WantsClientCert;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, ConfigBuilder, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Certificate verifier that accepts everything, used when the profile
/// turns verification off
#[derive(Debug)]
struct AcceptAllVerifier {
    schemes: Vec<SignatureScheme>,
}

impl rustls::client::danger::ServerCertVerifier for AcceptAllVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}

/// ALPN offer for the polling transport: HTTP/2 first, HTTP/1.1 fallback
const HTTP_ALPN: [&[u8]; 2] = [b"h2", b"http/1.1"];

/// TLS configuration for tunnel connections
#[derive(Clone)]
pub struct TlsConfig {
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Build the client configuration described by the profile
    pub fn new(security: &TransportSecurity) -> Result<Self> {
        let provider = Arc::new(provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?;

        let client_config = if security.verify_certificate {
            let mut root_store = RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            if let Some(ref path) = security.ca_cert_path {
                let added = add_pem_roots(&mut root_store, path)?;
                log::debug!("Loaded {} trust anchor(s) from {}", added, path.display());
            }

            with_identity(builder.with_root_certificates(root_store), security)?
        } else {
            log::warn!("Server certificate verification is disabled");
            let schemes = provider
                .signature_verification_algorithms
                .supported_schemes();
            let builder = builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAllVerifier { schemes }));
            with_identity(builder, security)?
        };

        Ok(Self {
            client_config: Arc::new(client_config),
        })
    }

    /// Get the client configuration
    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.client_config)
    }

    /// Owned copy offering HTTP/2 through ALPN, for the polling client
    pub fn http_client_config(&self) -> ClientConfig {
        let mut config = (*self.client_config).clone();
        config.alpn_protocols = HTTP_ALPN.iter().map(|p| p.to_vec()).collect();
        config
    }
}

fn with_identity(
    builder: ConfigBuilder<ClientConfig, WantsClientCert>,
    security: &TransportSecurity,
) -> Result<ClientConfig> {
    match (&security.client_cert_path, &security.client_key_path) {
        (Some(cert_path), Some(key_path)) => {
            let chain = load_certs(cert_path, "client certificate")?;
            let key = load_private_key(key_path)?;
            log::debug!("Presenting client certificate from {}", cert_path.display());
            Ok(builder.with_client_auth_cert(chain, key)?)
        }
        _ => Ok(builder.with_no_client_auth()),
    }
}

fn load_certs(path: &Path, what: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).or_connect_failed(&format!(
        "Failed to open {what} {}",
        path.display()
    ))?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .or_connect_failed(&format!("Failed to parse {what}"))?;
    if certs.is_empty() {
        return Err(TransportError::ConnectFailed(format!(
            "No certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).or_connect_failed(&format!(
        "Failed to open client key {}",
        path.display()
    ))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .or_connect_failed("Failed to parse client key")?
        .ok_or_else(|| {
            TransportError::ConnectFailed(format!("No private key found in {}", path.display()))
        })
}

fn add_pem_roots(store: &mut RootCertStore, path: &Path) -> Result<usize> {
    let certs = load_certs(path, "CA bundle")?;
    let (added, ignored) = store.add_parsable_certificates(certs);
    if ignored > 0 {
        log::warn!("Ignored {ignored} unparsable certificate(s) in {}", path.display());
    }
    Ok(added)
}
