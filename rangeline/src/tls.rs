//! Server identity verification for the HTTP/3 transport.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::warn;

use crate::error::TransportError;

pub(crate) const ALPN_H3: &[u8] = b"h3";

/// How the server's certificate chain is judged.
#[derive(Debug, Clone)]
pub enum Verification {
    /// Full WebPKI validation against the bundled Mozilla roots plus
    /// `extra_roots`.
    Strict {
        extra_roots: Vec<CertificateDer<'static>>,
    },
    /// Accept any chain for any name. Handshake signatures are still
    /// checked. Logged at `warn` every time a session is built with it.
    AcceptAll,
}

impl Default for Verification {
    fn default() -> Self {
        Verification::Strict {
            extra_roots: Vec::new(),
        }
    }
}

impl Verification {
    /// Strict verification that also trusts `roots`.
    pub fn with_roots(roots: impl IntoIterator<Item = CertificateDer<'static>>) -> Self {
        Verification::Strict {
            extra_roots: roots.into_iter().collect(),
        }
    }
}

/// TLS 1.3 client config with ALPN `h3`.
pub(crate) fn client_config(verification: &Verification) -> Result<rustls::ClientConfig, TransportError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TransportError::Init(e.to_string()))?;

    let mut config = match verification {
        Verification::Strict { extra_roots } => {
            let mut roots = RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect(),
            };
            for cert in extra_roots {
                roots
                    .add(cert.clone())
                    .map_err(|e| TransportError::Init(format!("extra root: {e}")))?;
            }
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        Verification::AcceptAll => {
            warn!("server certificate verification disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
                .with_no_client_auth()
        }
    };
    config.alpn_protocols = vec![ALPN_H3.to_vec()];
    Ok(config)
}

#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
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
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_strict() {
        assert!(matches!(
            Verification::default(),
            Verification::Strict { ref extra_roots } if extra_roots.is_empty()
        ));
    }

    #[test]
    fn configs_offer_h3() {
        for v in [Verification::default(), Verification::AcceptAll] {
            let config = client_config(&v).unwrap();
            assert_eq!(config.alpn_protocols, vec![b"h3".to_vec()]);
        }
    }

    #[test]
    fn extra_root_is_accepted() {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let v = Verification::with_roots([CertificateDer::from(cert.cert)]);
        assert!(client_config(&v).is_ok());
    }

    #[test]
    fn garbage_root_fails_initialize() {
        let v = Verification::with_roots([CertificateDer::from(vec![1u8, 2, 3])]);
        assert!(matches!(client_config(&v), Err(TransportError::Init(_))));
    }
}
