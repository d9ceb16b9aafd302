//! rustls client configuration for the manager session.
//!
//! The manager's certificate must chain to the identity's trust bundle, but
//! its name is not checked: any peer holding a bundle-anchored certificate is
//! accepted. The client certificate is resolved from the identity source at
//! handshake time so rotation takes effect on the next dial.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{ResolvesClientCert, WebPkiServerVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::sign::CertifiedKey;
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, SignatureScheme};

use crate::{IdentitySource, TransportError};

/// The crypto provider used for identity keys and sessions.
///
/// Selected explicitly; no process-wide default is installed.
pub fn default_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Builds the client configuration for one dial.
pub fn client_config(
    identity: Arc<dyn IdentitySource>,
    provider: Arc<CryptoProvider>,
) -> Result<ClientConfig, TransportError> {
    let roots = identity.current().roots();
    let webpki = WebPkiServerVerifier::builder_with_provider(roots, provider.clone())
        .build()
        .map_err(|err| TransportError::Verifier(err.to_string()))?;

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AnyPeerName { inner: webpki }))
        .with_client_cert_resolver(Arc::new(IdentityResolver { identity }));
    Ok(config)
}

/// Chain validation against the bundle, without a name check.
#[derive(Debug)]
struct AnyPeerName {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for AnyPeerName {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
            )) => Ok(ServerCertVerified::assertion()),
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Presents whatever identity is current when the manager asks.
#[derive(Debug)]
struct IdentityResolver {
    identity: Arc<dyn IdentitySource>,
}

impl ResolvesClientCert for IdentityResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        Some(self.identity.current().certified_key())
    }

    fn has_certs(&self) -> bool {
        true
    }
}
