//! Port traits implemented by infrastructure crates.
//!
//! The chain crate composes [`NetworkServiceClient`]s; the transport crate
//! supplies the terminal one (the RPC over the secure channel) and a
//! [`TokenGenerator`] backed by the client identity.

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    Acknowledgement, BearerToken, ChainError, Connection, IdentityError, NetworkServiceRequest,
};

/// The two logical operations offered by a network service manager.
///
/// Implementations must be safe for concurrent use.
#[async_trait]
pub trait NetworkServiceClient: Send + Sync {
    /// Negotiates a connection for `request`.
    async fn request(&self, request: NetworkServiceRequest) -> Result<Connection, ChainError>;

    /// Tears down a previously negotiated connection.
    async fn close(&self, connection: Connection) -> Result<Acknowledgement, ChainError>;
}

/// Mints bearer tokens from the client identity.
pub trait TokenGenerator: Send + Sync {
    /// Returns a token valid for at most `lifetime`.
    ///
    /// Implementations may shorten the lifetime (e.g. to a configured maximum).
    fn mint(&self, lifetime: Duration) -> Result<BearerToken, IdentityError>;
}
