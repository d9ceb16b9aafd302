//! Bearer tokens signed with the identity's private key.
//!
//! A token is three dot-separated hex fields: the header, the claims, and the
//! signature over `header.claims`. The subject claim is the leaf certificate
//! fingerprint, so the manager can tie the token to the TLS peer.

use std::sync::Arc;
use std::time::Duration;

use networkservice::{BearerToken, IdentityError, Timestamp, TokenGenerator};
use rustls::SignatureScheme;
use serde::Serialize;

use crate::IdentitySource;

const TOKEN_TYPE: &str = "nsm";

/// Schemes tried against the identity key, most preferred first.
const SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::ED25519,
    SignatureScheme::ECDSA_NISTP256_SHA256,
    SignatureScheme::ECDSA_NISTP384_SHA384,
    SignatureScheme::RSA_PSS_SHA256,
    SignatureScheme::RSA_PKCS1_SHA256,
];

#[derive(Serialize)]
struct Header<'a> {
    alg: String,
    typ: &'a str,
}

#[derive(Serialize)]
struct Claims<'a> {
    sub: &'a str,
    iat: i64,
    exp: i64,
}

/// Mints tokens from the identity in force at call time.
#[derive(Debug)]
pub struct SignedTokenGenerator {
    identity: Arc<dyn IdentitySource>,
    max_lifetime: Duration,
}

impl SignedTokenGenerator {
    /// Creates a generator whose tokens never outlive `max_lifetime`.
    pub fn new(identity: Arc<dyn IdentitySource>, max_lifetime: Duration) -> Self {
        Self {
            identity,
            max_lifetime,
        }
    }
}

impl TokenGenerator for SignedTokenGenerator {
    fn mint(&self, lifetime: Duration) -> Result<BearerToken, IdentityError> {
        let lifetime = lifetime.min(self.max_lifetime);
        let bundle = self.identity.current();
        let signer = bundle
            .certified_key()
            .key
            .choose_scheme(SCHEMES)
            .ok_or_else(|| IdentityError::Signing("identity key supports no token scheme".into()))?;

        let issued = Timestamp::now();
        let expires_at = issued.saturating_add(lifetime);
        let header = Header {
            alg: format!("{:?}", signer.scheme()),
            typ: TOKEN_TYPE,
        };
        let claims = Claims {
            sub: bundle.subject(),
            iat: issued.unix_seconds(),
            exp: expires_at.unix_seconds(),
        };

        let signing_input = format!("{}.{}", encode(&header)?, encode(&claims)?);
        let signature = signer
            .sign(signing_input.as_bytes())
            .map_err(|err| IdentityError::Signing(err.to_string()))?;

        Ok(BearerToken {
            value: format!("{signing_input}.{}", hex::encode(signature)),
            expires_at,
        })
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String, IdentityError> {
    serde_json::to_vec(value)
        .map(hex::encode)
        .map_err(|err| IdentityError::Signing(err.to_string()))
}
