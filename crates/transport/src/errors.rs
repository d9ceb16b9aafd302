//! Errors raised while establishing or using the channel.
//!
//! These never cross into the chain: [`crate::open_channel`] folds them into
//! [`networkservice::NscError::Connect`], and in-flight call failures become
//! [`networkservice::ChainError::Transport`].

use thiserror::Error;

/// Channel-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The manager address is not a supported URL.
    #[error("invalid target '{target}': {reason}")]
    InvalidTarget {
        /// Address as given.
        target: String,
        /// Why it was refused.
        reason: String,
    },

    /// TLS configuration or handshake failure.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The trust bundle could not back a certificate verifier.
    #[error("certificate verifier error: {0}")]
    Verifier(String),

    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
