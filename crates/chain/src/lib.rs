//! Orchestration core of the network service client.
//!
//! A [`Chain`] threads each request through an ordered list of
//! [`ChainElement`]s (authorization, credential injection, mechanism selection,
//! descriptor hand-off) before the terminal RPC, and threads each close through
//! the same elements in the same order. The [`NscClient`] drives one request and one
//! close per logical connection, records live connections in the
//! [`ConnectionRegistry`], and drains them newest-first when the [`Lifecycle`]
//! controller observes shutdown.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Elements sequence calls between the domain types in
//! [`networkservice`] and the terminal [`networkservice::NetworkServiceClient`]
//! supplied by the transport crate. No transport details live here.

pub mod chain;
pub mod client;
pub mod elements;
pub mod lifecycle;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use chain::{Chain, ChainElement, Next};
pub use client::{DrainReport, NscClient};
pub use lifecycle::Lifecycle;
pub use registry::{ConnectionRegistry, RegisteredConnection};
