//! Mutual-TLS channel to the network service manager.
//!
//! Implements the [`networkservice::NetworkServiceClient`] port as the terminal
//! stage of the chain, and the [`networkservice::TokenGenerator`] port from the
//! client's X.509 identity.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Address parsing, identity loading, TLS configuration,
//! framing, and call multiplexing all live here. The `chain` crate sees only
//! [`networkservice::NetworkServiceClient`].
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`target`] | `tcp://` and `unix://` manager addresses |
//! | [`identity`] | PEM-backed identity with change detection |
//! | [`token`] | Per-call bearer tokens signed with the identity key |
//! | [`tls`] | rustls client configuration (bundle-anchored, any peer name) |
//! | [`codec`] | Length-delimited JSON call and reply frames |
//! | [`channel`] | `SecureChannel`, the multiplexed RPC session |

pub mod channel;
pub mod codec;
pub mod errors;
pub mod identity;
pub mod target;
pub mod tls;
pub mod token;

pub use channel::{open_channel, SecureChannel};
pub use errors::TransportError;
pub use identity::{FileIdentitySource, IdentityBundle, IdentityFiles, IdentitySource};
pub use target::Target;
pub use tls::default_provider;
pub use token::SignedTokenGenerator;
