//! Client identity: certificate chain, private key and trust bundle.
//!
//! [`FileIdentitySource`] reads the three PEM files once at startup and again
//! whenever one of them changes on disk. Consumers always ask for the
//! [`IdentitySource::current`] bundle, so a rotated certificate is used for the
//! next handshake or token without restarting the client.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;
use networkservice::IdentityError;
use parking_lot::Mutex;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use rustls::RootCertStore;
use sha2::{Digest, Sha256};

/// Source of the identity currently in force.
pub trait IdentitySource: Send + Sync + fmt::Debug {
    /// The bundle to use for the next handshake or token.
    fn current(&self) -> Arc<IdentityBundle>;
}

/// One loaded identity.
pub struct IdentityBundle {
    certified: Arc<CertifiedKey>,
    roots: Arc<RootCertStore>,
    subject: String,
}

impl IdentityBundle {
    /// Parses PEM material and loads the private key through `provider`.
    pub fn from_pem(
        cert_pem: &[u8],
        key_pem: &[u8],
        bundle_pem: &[u8],
        provider: &CryptoProvider,
    ) -> Result<Self, IdentityError> {
        let chain = parse_certificates(cert_pem, "certificate chain")?;
        let key = PrivateKeyDer::from_pem_slice(key_pem)
            .map_err(|err| IdentityError::Invalid(format!("private key: {err}")))?;
        let signing_key = provider
            .key_provider
            .load_private_key(key)
            .map_err(|err| IdentityError::Invalid(format!("private key: {err}")))?;

        let mut roots = RootCertStore::empty();
        for cert in parse_certificates(bundle_pem, "trust bundle")? {
            roots
                .add(cert)
                .map_err(|err| IdentityError::Invalid(format!("trust bundle: {err}")))?;
        }

        let subject = hex::encode(Sha256::digest(chain[0].as_ref()));
        Ok(Self {
            certified: Arc::new(CertifiedKey::new(chain, signing_key)),
            roots: Arc::new(roots),
            subject,
        })
    }

    /// Certificate chain and signing key presented to the manager.
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        self.certified.clone()
    }

    /// Trust anchors the manager's certificate must chain to.
    pub fn roots(&self) -> Arc<RootCertStore> {
        self.roots.clone()
    }

    /// SHA-256 fingerprint of the leaf certificate, lower-case hex.
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

impl fmt::Debug for IdentityBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityBundle")
            .field("subject", &self.subject)
            .field("chain_len", &self.certified.cert.len())
            .field("roots", &self.roots.len())
            .finish_non_exhaustive()
    }
}

fn parse_certificates(
    pem: &[u8],
    what: &str,
) -> Result<Vec<CertificateDer<'static>>, IdentityError> {
    let certs = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| IdentityError::Invalid(format!("{what}: {err}")))?;
    if certs.is_empty() {
        return Err(IdentityError::Invalid(format!("{what}: no certificates found")));
    }
    Ok(certs)
}

/// Locations of the three identity files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityFiles {
    /// PEM certificate chain, leaf first.
    pub cert: PathBuf,
    /// PEM private key for the leaf.
    pub key: PathBuf,
    /// PEM trust bundle.
    pub bundle: PathBuf,
}

impl IdentityFiles {
    fn paths(&self) -> [&Path; 3] {
        [&self.cert, &self.key, &self.bundle]
    }
}

type Stamps = [Option<SystemTime>; 3];

/// Identity read from PEM files, reloaded when any file's mtime changes.
pub struct FileIdentitySource {
    files: IdentityFiles,
    provider: Arc<CryptoProvider>,
    current: ArcSwap<IdentityBundle>,
    stamps: Mutex<Stamps>,
}

impl FileIdentitySource {
    /// Loads the identity. Fails if any file is missing or unusable.
    pub fn load(
        files: IdentityFiles,
        provider: Arc<CryptoProvider>,
    ) -> Result<Self, IdentityError> {
        let stamps = modified(&files);
        let bundle = read_bundle(&files, &provider)?;
        tracing::debug!(subject = bundle.subject(), "identity loaded");
        Ok(Self {
            files,
            provider,
            current: ArcSwap::from_pointee(bundle),
            stamps: Mutex::new(stamps),
        })
    }

    /// Reloads if any file changed since the last load. Returns `true` on reload.
    ///
    /// A change that yields unusable material is logged and the previous
    /// identity stays in force.
    pub fn refresh(&self) -> bool {
        let mut stamps = self.stamps.lock();
        let seen = modified(&self.files);
        if seen == *stamps {
            return false;
        }
        match read_bundle(&self.files, &self.provider) {
            Ok(bundle) => {
                *stamps = seen;
                tracing::info!(subject = bundle.subject(), "identity rotated");
                self.current.store(Arc::new(bundle));
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, "identity files changed but could not be loaded");
                false
            }
        }
    }
}

impl IdentitySource for FileIdentitySource {
    fn current(&self) -> Arc<IdentityBundle> {
        self.refresh();
        self.current.load_full()
    }
}

impl fmt::Debug for FileIdentitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileIdentitySource")
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}

fn modified(files: &IdentityFiles) -> Stamps {
    files
        .paths()
        .map(|p| std::fs::metadata(p).and_then(|m| m.modified()).ok())
}

fn read_bundle(
    files: &IdentityFiles,
    provider: &CryptoProvider,
) -> Result<IdentityBundle, IdentityError> {
    let read = |path: &Path| {
        std::fs::read(path).map_err(|err| IdentityError::Unreadable {
            path: path.display().to_string(),
            message: err.to_string(),
        })
    };
    IdentityBundle::from_pem(
        &read(&files.cert)?,
        &read(&files.key)?,
        &read(&files.bundle)?,
        provider,
    )
}
