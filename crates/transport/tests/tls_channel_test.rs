//! Mutual-TLS sessions against an in-process manager.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use networkservice::{
    mechanisms, ConnectionId, Labels, Mechanism, NetworkServiceClient, NetworkServiceName,
    NetworkServiceRequest, NscError, Path as RequestPath,
};
use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;
use transport::codec::{framing, CallEnvelope, ReplyEnvelope};
use transport::{
    open_channel, FileIdentitySource, IdentityFiles, IdentitySource, SignedTokenGenerator, Target,
};

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

struct Ca {
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl Ca {
    fn new() -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    fn issue(&self, dir: &Path, name: &str) -> IdentityFiles {
        let key = KeyPair::generate().unwrap();
        let cert = CertificateParams::new(vec![name.to_string()])
            .unwrap()
            .signed_by(&key, &self.cert, &self.key)
            .unwrap();
        let files = IdentityFiles {
            cert: dir.join(format!("{name}.crt")),
            key: dir.join(format!("{name}.key")),
            bundle: dir.join("bundle.pem"),
        };
        std::fs::write(&files.cert, cert.pem()).unwrap();
        std::fs::write(&files.key, key.serialize_pem()).unwrap();
        std::fs::write(&files.bundle, self.cert.pem()).unwrap();
        files
    }
}

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Accepts one session, requiring a client certificate from `client_ca`,
/// and answers every request with the requested connection.
async fn serve_one(
    manager: IdentityFiles,
    client_ca: &Ca,
) -> (Target, tokio::task::JoinHandle<Vec<CallEnvelope>>) {
    let chain = CertificateDer::pem_file_iter(&manager.cert)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let key = PrivateKeyDer::from_pem_file(&manager.key).unwrap();
    let mut roots = RootCertStore::empty();
    roots
        .add(CertificateDer::from(client_ca.cert.der().to_vec()))
        .unwrap();
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider())
        .build()
        .unwrap();
    let config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_client_cert_verifier(verifier)
        .with_single_cert(chain, key)
        .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let mut seen = Vec::new();
        let (tcp, _) = listener.accept().await.unwrap();
        let Ok(tls) = acceptor.accept(tcp).await else {
            return seen;
        };
        assert!(tls.get_ref().1.peer_certificates().is_some_and(|c| !c.is_empty()));
        let mut frames = Framed::new(tls, framing());
        while let Some(Ok(frame)) = frames.next().await {
            let call: CallEnvelope = serde_json::from_slice(&frame).unwrap();
            let request: NetworkServiceRequest =
                serde_json::from_value(call.payload.clone()).unwrap();
            let mechanism = request.mechanism_preferences[0].clone();
            let connection = serde_json::json!({
                "id": request.id,
                "network_service": request.network_service,
                "labels": request.labels,
                "mechanism": mechanism,
                "path": request.path,
                "context": { "manager": "ok" },
            });
            let reply = ReplyEnvelope {
                call_id: call.call_id,
                result: Ok(connection),
            };
            seen.push(call);
            frames
                .send(Bytes::from(serde_json::to_vec(&reply).unwrap()))
                .await
                .unwrap();
        }
        seen
    });
    (
        Target::Tcp {
            host: "127.0.0.1".into(),
            port,
        },
        handle,
    )
}

fn request(id: &str) -> NetworkServiceRequest {
    NetworkServiceRequest {
        id: ConnectionId::new(id).unwrap(),
        network_service: NetworkServiceName::new("icmp-responder").unwrap(),
        labels: Labels::new(),
        mechanism_preferences: vec![Mechanism::new(mechanisms::kernel())],
        path: RequestPath::default(),
        resources: Vec::new(),
    }
}

#[tokio::test]
async fn test_request_over_mutual_tls() {
    let dir = tempfile::tempdir().unwrap();
    let ca = Ca::new();
    // The manager's name does not match the dialled address; only the chain is checked.
    let manager = ca.issue(dir.path(), "manager.internal");
    let client = ca.issue(dir.path(), "nsc");
    let (target, server) = serve_one(manager, &ca).await;

    let identity = Arc::new(FileIdentitySource::load(client, provider()).unwrap());
    let subject = identity.current().subject().to_string();
    let tokens = Arc::new(SignedTokenGenerator::new(identity.clone(), Duration::from_secs(600)));
    let channel = open_channel(&target, identity, tokens, Duration::from_secs(600), DIAL_TIMEOUT)
        .await
        .unwrap();

    let connection = channel.request(request("nsc-0")).await.unwrap();
    assert_eq!(connection.id.as_str(), "nsc-0");
    assert_eq!(connection.context.as_value()["manager"], "ok");
    drop(channel);

    let calls = server.await.unwrap();
    assert_eq!(calls.len(), 1);
    let claims = calls[0].token.split('.').nth(1).unwrap();
    let claims: serde_json::Value = serde_json::from_slice(&hex::decode(claims).unwrap()).unwrap();
    assert_eq!(claims["sub"], subject.as_str());
}

#[tokio::test]
async fn test_manager_outside_the_bundle_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let client_ca = Ca::new();
    let rogue_ca = Ca::new();
    let manager_dir = dir.path().join("rogue");
    std::fs::create_dir(&manager_dir).unwrap();
    let manager = rogue_ca.issue(&manager_dir, "manager.internal");
    let client = client_ca.issue(dir.path(), "nsc");
    let (target, _server) = serve_one(manager, &client_ca).await;

    let identity = Arc::new(FileIdentitySource::load(client, provider()).unwrap());
    let tokens = Arc::new(SignedTokenGenerator::new(identity.clone(), Duration::from_secs(600)));
    let err = open_channel(&target, identity, tokens, Duration::from_secs(600), DIAL_TIMEOUT)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        NscError::Connect { ref target, .. } if target.starts_with("tcp://127.0.0.1:")
    ));
}

#[tokio::test]
async fn test_unreachable_manager_is_a_connect_error() {
    let dir = tempfile::tempdir().unwrap();
    let client = Ca::new().issue(dir.path(), "nsc");
    let identity = Arc::new(FileIdentitySource::load(client, provider()).unwrap());
    let tokens = Arc::new(SignedTokenGenerator::new(identity.clone(), Duration::from_secs(600)));
    let target = Target::Unix(dir.path().join("absent.sock"));

    let err = open_channel(&target, identity, tokens, Duration::from_secs(600), DIAL_TIMEOUT)
        .await
        .unwrap_err();

    assert!(matches!(err, NscError::Connect { .. }));
}
