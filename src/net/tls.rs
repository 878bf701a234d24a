//! TLS client upgrade and certificate loading.
//!
//! # Responsibilities
//! - Define the injectable TLS upgrade primitive
//! - Build a rustls client configuration (roots, client certificate)
//! - Route server certificate validation through an optional caller callback

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::error::{Error, Result};
use crate::net::opener::BoxedTransport;

/// Upgrades a connected transport to TLS, authenticating as a client.
pub trait TlsUpgrader: Send + Sync {
    fn authenticate_as_client<'a>(
        &'a self,
        stream: BoxedTransport,
        server_name: &'a str,
    ) -> BoxFuture<'a, io::Result<BoxedTransport>>;
}

/// What the validation callback gets to look at.
#[derive(Debug)]
pub struct ServerCertificate<'a> {
    pub end_entity: &'a CertificateDer<'a>,
    pub intermediates: &'a [CertificateDer<'a>],
    pub server_name: &'a ServerName<'a>,
    /// The error standard WebPKI validation produced, if any.
    pub policy_error: Option<&'a rustls::Error>,
}

/// Decides whether a server certificate is accepted. Returning `true` accepts
/// the certificate even when `policy_error` is set.
pub type CertificateValidationCallback = Arc<dyn Fn(&ServerCertificate<'_>) -> bool + Send + Sync>;

/// A client certificate chain and its private key.
pub struct ClientCertificate {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl ClientCertificate {
    pub fn new(chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Self {
        Self { chain, key }
    }

    /// Load a PEM certificate chain and a PEM private key.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> io::Result<Self> {
        let chain = load_certificates(cert_path)?;
        if chain.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("no certificates found in {:?}", cert_path),
            ));
        }

        let mut reader = BufReader::new(File::open(key_path)?);
        let key = rustls_pemfile::private_key(&mut reader)?.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("no private key found in {:?}", key_path),
            )
        })?;

        Ok(Self { chain, key })
    }
}

impl Clone for ClientCertificate {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

impl fmt::Debug for ClientCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCertificate")
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

/// Load every certificate of a PEM file.
pub fn load_certificates(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    if !path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Certificate file not found: {:?}", path),
        ));
    }
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::certs(&mut reader).collect()
}

/// Options for [`RustlsUpgrader`].
#[derive(Clone, Default)]
pub struct TlsOptions {
    /// Extra trust anchors on top of the bundled WebPKI roots.
    pub extra_roots: Vec<CertificateDer<'static>>,
    pub client_certificate: Option<ClientCertificate>,
    pub validation_callback: Option<CertificateValidationCallback>,
}

impl fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsOptions")
            .field("extra_roots", &self.extra_roots.len())
            .field("client_certificate", &self.client_certificate)
            .field("validation_callback", &self.validation_callback.is_some())
            .finish()
    }
}

/// Default TLS upgrader backed by rustls.
#[derive(Clone)]
pub struct RustlsUpgrader {
    connector: tokio_rustls::TlsConnector,
}

impl RustlsUpgrader {
    pub fn new(options: TlsOptions) -> Result<Self> {
        let mut roots = webpki_root_store();
        for cert in options.extra_roots {
            roots
                .add(cert)
                .map_err(|e| Error::TlsConfig(format!("invalid root certificate: {}", e)))?;
        }
        let roots = Arc::new(roots);

        let builder = match options.validation_callback {
            Some(callback) => {
                let inner = WebPkiServerVerifier::builder(roots)
                    .build()
                    .map_err(|e| Error::TlsConfig(e.to_string()))?;
                ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(CallbackVerifier { inner, callback }))
            }
            None => ClientConfig::builder().with_root_certificates(roots),
        };

        let config = match options.client_certificate {
            Some(cert) => builder
                .with_client_auth_cert(cert.chain, cert.key)
                .map_err(|e| Error::TlsConfig(format!("invalid client certificate: {}", e)))?,
            None => builder.with_no_client_auth(),
        };

        Ok(Self::from_config(config))
    }

    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            connector: tokio_rustls::TlsConnector::from(Arc::new(config)),
        }
    }
}

impl Default for RustlsUpgrader {
    /// WebPKI roots, no client certificate.
    fn default() -> Self {
        let config = ClientConfig::builder()
            .with_root_certificates(webpki_root_store())
            .with_no_client_auth();
        Self::from_config(config)
    }
}

fn webpki_root_store() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

impl fmt::Debug for RustlsUpgrader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RustlsUpgrader").finish_non_exhaustive()
    }
}

impl TlsUpgrader for RustlsUpgrader {
    fn authenticate_as_client<'a>(
        &'a self,
        stream: BoxedTransport,
        server_name: &'a str,
    ) -> BoxFuture<'a, io::Result<BoxedTransport>> {
        Box::pin(async move {
            let name = ServerName::try_from(server_name.to_owned())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            let tls = self.connector.connect(name, stream).await?;
            tracing::debug!(server_name, "TLS session established");
            Ok(Box::new(tls) as BoxedTransport)
        })
    }
}

/// Runs standard WebPKI validation, then lets the callback have the final word.
struct CallbackVerifier {
    inner: Arc<WebPkiServerVerifier>,
    callback: CertificateValidationCallback,
}

impl fmt::Debug for CallbackVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackVerifier").finish_non_exhaustive()
    }
}

impl ServerCertVerifier for CallbackVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let verdict = self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now);
        let certificate = ServerCertificate {
            end_entity,
            intermediates,
            server_name,
            policy_error: verdict.as_ref().err(),
        };
        let accepted = (self.callback)(&certificate);

        match verdict {
            Ok(verified) if accepted => Ok(verified),
            Err(_) if accepted => {
                tracing::warn!(?server_name, "Server certificate accepted by validation callback despite policy error");
                Ok(ServerCertVerified::assertion())
            }
            Ok(_) => Err(rustls::Error::General(
                "server certificate rejected by validation callback".into(),
            )),
            Err(e) => Err(e),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_upgrader_builds() {
        let _ = RustlsUpgrader::default();
    }

    #[test]
    fn callback_options_build() {
        let options = TlsOptions {
            validation_callback: Some(Arc::new(|_: &ServerCertificate<'_>| true)),
            ..TlsOptions::default()
        };
        assert!(RustlsUpgrader::new(options).is_ok());
    }

    #[test]
    fn missing_certificate_file_is_reported() {
        let err = load_certificates(Path::new("/nonexistent/cert.pem")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn empty_pem_has_no_certificates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pem");
        std::fs::write(&path, "").unwrap();
        assert!(load_certificates(&path).unwrap().is_empty());
        let key = dir.path().join("key.pem");
        std::fs::write(&key, "").unwrap();
        assert!(ClientCertificate::from_pem_files(&path, &key).is_err());
    }
}
