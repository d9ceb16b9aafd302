//! Error taxonomy for the network service client.
//!
//! [`NscError`] is what the client core and the composition root report: every
//! variant names the stage that failed and, where one exists, the logical
//! connection it failed for. [`ChainError`] is the narrower error a single
//! chain element or the terminal RPC produces; the client core wraps it into a
//! [`NscError`] with the connection context attached.
//!
//! ## Fatality
//!
//! `Config`, `Identity`, `Connect`, `Negotiation` and `Timeout` are fatal during
//! startup. `Teardown` is never fatal; the registry entry is released regardless.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ConnectionId, MechanismType, RequestIndex};

// ---------------------------------------------------------------------------
// Client-level errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the client core and the startup sequence.
#[derive(Debug, Error)]
pub enum NscError {
    /// Startup configuration is malformed or missing. Raised before any network I/O.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },

    /// The identity bundle could not be obtained.
    #[error("identity unavailable")]
    Identity(#[from] IdentityError),

    /// The secure channel to the manager could not be established.
    #[error("failed to connect to network service manager at {target}: {message}")]
    Connect {
        /// Address that was dialled.
        target: String,
        /// What went wrong (dial, handshake, or timeout).
        message: String,
    },

    /// A request for a logical connection was rejected by an element or the manager.
    #[error("negotiation of {connection} failed")]
    Negotiation {
        /// Logical connection that failed.
        connection: ConnectionId,
        /// Underlying element or RPC failure.
        #[source]
        source: ChainError,
    },

    /// A request did not complete within its bound.
    ///
    /// Close timeouts are reported as [`NscError::Teardown`] carrying
    /// [`ChainError::TimedOut`].
    #[error("{operation} of {connection} timed out after {after:?}")]
    Timeout {
        /// Operation that timed out; the client core only reports `"request"`.
        operation: &'static str,
        /// Logical connection the operation was for.
        connection: ConnectionId,
        /// Bound that elapsed.
        after: Duration,
    },

    /// A close failed. Informational: the registry entry has been released.
    #[error("teardown of {connection} failed")]
    Teardown {
        /// Logical connection being closed.
        connection: ConnectionId,
        /// Underlying element or RPC failure.
        #[source]
        source: ChainError,
    },

    /// A live connection is already registered at this index.
    #[error("a live connection is already registered at index {index}")]
    DuplicateConnection {
        /// Index that was already occupied.
        index: RequestIndex,
    },
}

impl NscError {
    /// Shorthand for [`NscError::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns `true` for timeout-class failures.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

// ---------------------------------------------------------------------------
// Per-call errors
// ---------------------------------------------------------------------------

/// Errors produced while a single request or close travels through the chain.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// None of the offered mechanisms is handled by this client.
    #[error("no supported mechanism among offered preferences {offered:?}")]
    NoSupportedMechanism {
        /// Mechanism families that were offered.
        offered: Vec<MechanismType>,
    },

    /// A chain element refused to forward the call.
    #[error("{element} rejected the call: {reason}")]
    Rejected {
        /// Name of the rejecting element.
        element: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// The manager answered with a fault.
    #[error("network service manager returned {0}")]
    Remote(RemoteFault),

    /// The channel failed while the call was in flight.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The call did not complete within its bound.
    #[error("no reply within {0:?}")]
    TimedOut(Duration),

    /// A credential could not be produced for the call.
    #[error("credential unavailable: {0}")]
    Identity(#[from] IdentityError),
}

impl ChainError {
    /// Shorthand for [`ChainError::Rejected`].
    pub fn rejected(element: &'static str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            element,
            reason: reason.into(),
        }
    }
}

/// A fault reported by the manager in reply to a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFault {
    /// Machine-readable fault code (e.g. `"not_found"`, `"unsupported_mechanism"`).
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl std::fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

// ---------------------------------------------------------------------------
// Identity errors
// ---------------------------------------------------------------------------

/// Failures loading identity material or minting tokens from it.
#[derive(Debug, Clone, Error)]
pub enum IdentityError {
    /// Identity material could not be read.
    #[error("failed to read {path}: {message}")]
    Unreadable {
        /// File that failed.
        path: String,
        /// Underlying I/O or PEM error.
        message: String,
    },

    /// Identity material was read but is unusable.
    #[error("invalid identity material: {0}")]
    Invalid(String),

    /// Signing a token failed.
    #[error("failed to sign token: {0}")]
    Signing(String),
}
