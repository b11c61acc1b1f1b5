//! HTTPS client for health checks and bootstrap calls.
//!
//! Trust is established without a certificate authority: by default the
//! server certificate must be byte-identical (DER) to the locally held file.
//! Operator-supplied material switches to standard issuer validation, and a
//! skip-verify mode disables peer checks entirely for the case where stackctl
//! generated the certificate itself moments earlier.

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};

use crate::error::{OrchestratorError, Result};
use crate::options::ServiceOptions;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustMode {
    /// Accept only a server certificate byte-identical to this file.
    Pinned(PathBuf),
    /// Standard issuer validation with this file added as a trust root.
    System(PathBuf),
    /// No peer checks at all.
    SkipVerify,
}

pub fn trust_mode(options: &ServiceOptions) -> TrustMode {
    if options.ssl_skip_verify {
        TrustMode::SkipVerify
    } else if options.using_default_tls_paths() {
        TrustMode::Pinned(options.tls_cert_path.clone())
    } else {
        TrustMode::System(options.tls_cert_path.clone())
    }
}

/// Loads the first certificate from a PEM file as DER bytes for pinning.
pub fn load_pinned_der(path: &Path) -> Result<CertificateDer<'static>> {
    let file = fs::File::open(path).map_err(|e| {
        OrchestratorError::Trust(format!(
            "cannot read pin certificate {}: {e}",
            path.display()
        ))
    })?;
    let mut reader = BufReader::new(file);
    let cert = rustls_pemfile::certs(&mut reader)
        .next()
        .transpose()
        .map_err(|e| OrchestratorError::Trust(format!("malformed certificate: {e}")))?
        .ok_or_else(|| {
            OrchestratorError::Trust(format!("no certificate found in {}", path.display()))
        });
    cert
}

/// Accepts exactly one certificate: the pinned one. Issuer chains, names and
/// expiry are deliberately not consulted.
#[derive(Debug)]
pub struct PinnedVerifier {
    pinned: CertificateDer<'static>,
    provider: Arc<CryptoProvider>,
}

impl PinnedVerifier {
    pub fn new(pinned: CertificateDer<'static>, provider: Arc<CryptoProvider>) -> Self {
        Self { pinned, provider }
    }
}

impl ServerCertVerifier for PinnedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if end_entity.as_ref() == self.pinned.as_ref() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Skip-verify mode: every peer is accepted. Handshake signatures are still
/// checked so the session key actually belongs to the presented certificate.
#[derive(Debug)]
struct AcceptAnyVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn rustls_config_with_verifier(
    verifier: Arc<dyn ServerCertVerifier>,
) -> Result<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| OrchestratorError::Trust(format!("TLS setup failed: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    Ok(config)
}

/// Thin wrapper over reqwest with the trust policy baked in at construction.
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    pub fn new(options: &ServiceOptions) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let http = match trust_mode(options) {
            TrustMode::SkipVerify => {
                tracing::debug!("HTTPS client in skip-verify mode");
                let config =
                    rustls_config_with_verifier(Arc::new(AcceptAnyVerifier { provider }))?;
                reqwest::Client::builder().use_preconfigured_tls(config)
            }
            TrustMode::Pinned(path) => {
                tracing::debug!(cert = %path.display(), "HTTPS client pinned to local certificate");
                let pinned = load_pinned_der(&path)?;
                let config = rustls_config_with_verifier(Arc::new(PinnedVerifier::new(
                    pinned, provider,
                )))?;
                reqwest::Client::builder().use_preconfigured_tls(config)
            }
            TrustMode::System(path) => {
                tracing::debug!(cert = %path.display(), "HTTPS client with operator-supplied root");
                let pem = fs::read(&path).map_err(|e| {
                    OrchestratorError::Trust(format!(
                        "cannot read certificate {}: {e}",
                        path.display()
                    ))
                })?;
                let cert = reqwest::Certificate::from_pem(&pem)
                    .map_err(|e| OrchestratorError::Trust(format!("malformed certificate: {e}")))?;
                reqwest::Client::builder().add_root_certificate(cert)
            }
        }
        .build()
        .map_err(|e| OrchestratorError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base: options.base_url(),
        })
    }

    pub async fn get(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.http.get(format!("{}{path}", self.base)).send().await
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> reqwest::Result<reqwest::Response> {
        self.http
            .post(format!("{}{path}", self.base))
            .json(body)
            .send()
            .await
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }
}

/// Maps a transport failure onto the error taxonomy: anything smelling of
/// certificate validation is a trust error (never retried), the rest is
/// transient network trouble (retried inside the poll budget).
pub fn classify_request_error(e: &reqwest::Error) -> OrchestratorError {
    let mut cause: Option<&(dyn std::error::Error + 'static)> = Some(e);
    while let Some(err) = cause {
        let msg = err.to_string();
        if msg.contains("certificate") || msg.contains("handshake") || msg.contains("Certificate")
        {
            return OrchestratorError::Trust(format!(
                "TLS validation against {} failed ({msg}); \
                 re-run `stackctl init webservice` with consistent --ssl-cert/--ssl-key options",
                e.url().map(|u| u.to_string()).unwrap_or_default()
            ));
        }
        cause = err.source();
    }

    if e.is_connect() {
        OrchestratorError::Network("connection refused".to_string())
    } else if e.is_timeout() {
        OrchestratorError::Network("request timed out".to_string())
    } else {
        OrchestratorError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_der() -> CertificateDer<'static> {
        let rcgen::CertifiedKey { cert, .. } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        cert.der().clone().into_owned()
    }

    fn verify(
        verifier: &dyn ServerCertVerifier,
        presented: &CertificateDer<'_>,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        verifier.verify_server_cert(
            presented,
            &[],
            &ServerName::try_from("localhost").unwrap(),
            &[],
            UnixTime::now(),
        )
    }

    #[test]
    fn test_pinned_verifier_accepts_identical_der() {
        let pinned = fresh_der();
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = PinnedVerifier::new(pinned.clone(), provider);

        assert!(verify(&verifier, &pinned).is_ok());
    }

    #[test]
    fn test_pinned_verifier_rejects_any_other_certificate() {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = PinnedVerifier::new(fresh_der(), provider);

        let err = verify(&verifier, &fresh_der()).unwrap_err();
        assert!(matches!(err, rustls::Error::InvalidCertificate(_)));
    }

    #[test]
    fn test_skip_verifier_accepts_anything() {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = AcceptAnyVerifier { provider };

        assert!(verify(&verifier, &fresh_der()).is_ok());
    }

    #[test]
    fn test_trust_mode_skip_wins() {
        let args = crate::args::TargetArgs {
            component: crate::args::Target::All,
            db_host: None,
            db_port: None,
            external_url: None,
            web_port: None,
            ssl_cert: Some(PathBuf::from("/tmp/custom.crt")),
            ssl_key: Some(PathBuf::from("/tmp/custom.key")),
            ssl_skip_verify: true,
            retry_max: None,
            retry_delay: None,
            username: None,
            password: None,
            yes: false,
            no_console: false,
        };
        let options = ServiceOptions::resolve(&args, None, false);
        assert_eq!(trust_mode(&options), TrustMode::SkipVerify);
    }

    #[test]
    fn test_trust_mode_custom_paths_use_issuer_validation() {
        let args = crate::args::TargetArgs {
            component: crate::args::Target::All,
            db_host: None,
            db_port: None,
            external_url: None,
            web_port: None,
            ssl_cert: Some(PathBuf::from("/tmp/custom.crt")),
            ssl_key: Some(PathBuf::from("/tmp/custom.key")),
            ssl_skip_verify: false,
            retry_max: None,
            retry_delay: None,
            username: None,
            password: None,
            yes: false,
            no_console: false,
        };
        let options = ServiceOptions::resolve(&args, None, false);
        assert!(matches!(trust_mode(&options), TrustMode::System(_)));
    }

    #[test]
    fn test_load_pinned_der_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("stackd.key");
        let cert = dir.path().join("stackd.crt");
        crate::tls::generate(&key, &cert).unwrap();

        let der = load_pinned_der(&cert).unwrap();
        assert!(!der.as_ref().is_empty());
    }
}
