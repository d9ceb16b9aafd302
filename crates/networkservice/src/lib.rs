//! Core domain for the network service client.
//!
//! This crate contains every value that travels between the client and the
//! network service manager, the newtype identifiers that name them, the error
//! taxonomy, and the port traits that infrastructure crates implement. It has
//! no I/O dependencies.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`ClientName`, `ConnectionId`, `RequestIndex`, etc.) |
//! | [`types`] | Request, connection, mechanism and path value types |
//! | [`mechanisms`] | Well-known mechanism families and parameter keys |
//! | [`errors`] | `NscError`, `ChainError`, `IdentityError` |
//! | [`ports`] | `NetworkServiceClient` and `TokenGenerator` traits |

pub mod errors;
pub mod identifiers;
pub mod mechanisms;
pub mod ports;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use errors::{ChainError, IdentityError, NscError, RemoteFault};
pub use identifiers::{ClientName, ConnectionId, MechanismType, NetworkServiceName, RequestIndex};
pub use ports::{NetworkServiceClient, TokenGenerator};
pub use types::{
    Acknowledgement, BearerToken, Connection, ConnectionContext, ConnectionState, Labels,
    Mechanism, NetworkServiceDescriptor, NetworkServiceRequest, Path, PathSegment,
    ResourceDescriptor, Timestamp,
};
