//! Client core: one request and one close per logical connection.
//!
//! The client assigns ids, bounds every call with a timeout, and keeps the
//! [`ConnectionRegistry`] authoritative:
//!
//! - a request registers its connection only on success;
//! - a close always releases the entry, whatever the RPC outcome;
//! - a drain closes newest-first until nothing is left open.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use networkservice::{
    Acknowledgement, ChainError, ClientName, Connection, ConnectionId, ConnectionState,
    NetworkServiceClient, NetworkServiceDescriptor, NscError, RequestIndex,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::ConnectionRegistry;

/// Outcome of draining the registry at shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Connections closed cleanly, in close order.
    pub closed: Vec<ConnectionId>,
    /// Connections whose close failed or timed out, in close order.
    pub failed: Vec<ConnectionId>,
}

impl DrainReport {
    /// Number of connections a close was attempted for.
    pub fn attempted(&self) -> usize {
        self.closed.len() + self.failed.len()
    }

    /// Returns `true` if every close succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Drives requests and closes through a chain and tracks what is open.
pub struct NscClient {
    name: ClientName,
    chain: Arc<dyn NetworkServiceClient>,
    registry: ConnectionRegistry,
    next_index: AtomicU64,
}

impl NscClient {
    /// Creates a client named `name` issuing calls through `chain`.
    pub fn new(name: ClientName, chain: Arc<dyn NetworkServiceClient>) -> Self {
        Self {
            name,
            chain,
            registry: ConnectionRegistry::new(),
            next_index: AtomicU64::new(0),
        }
    }

    /// Client name used as the id prefix.
    pub fn name(&self) -> &ClientName {
        &self.name
    }

    /// The live-connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Negotiates one logical connection for `descriptor` within `timeout`.
    ///
    /// On success the connection is registered and returned. On failure or
    /// timeout nothing is registered; the index is consumed and never reused.
    pub async fn request(
        &self,
        descriptor: &NetworkServiceDescriptor,
        timeout: Duration,
    ) -> Result<Connection, NscError> {
        let index = RequestIndex::new(self.next_index.fetch_add(1, Ordering::SeqCst));
        let id = ConnectionId::for_index(&self.name, index);
        let request = descriptor.to_request(id.clone());
        self.registry.transition(index, ConnectionState::Requesting);

        let span = tracing::info_span!(
            "request",
            connection = %id,
            service = %descriptor.network_service
        );
        let outcome = tokio::time::timeout(timeout, self.chain.request(request))
            .instrument(span)
            .await;

        let connection = match outcome {
            Err(_) => {
                self.registry.transition(index, ConnectionState::Failed);
                return Err(NscError::Timeout {
                    operation: "request",
                    connection: id,
                    after: timeout,
                });
            }
            Ok(Err(source)) => {
                self.registry.transition(index, ConnectionState::Failed);
                return Err(NscError::Negotiation {
                    connection: id,
                    source,
                });
            }
            Ok(Ok(connection)) => connection,
        };

        if connection.id != id {
            self.registry.transition(index, ConnectionState::Failed);
            let reason = format!("manager answered {id} with connection {}", connection.id);
            // Elements hold local state under the id they were asked for.
            let mut connection = connection;
            connection.id = id.clone();
            self.abandon(connection, timeout).await;
            return Err(NscError::Negotiation {
                connection: id,
                source: ChainError::rejected("client", reason),
            });
        }

        if let Err(err) = self.registry.register(index, connection.clone()) {
            self.abandon(connection, timeout).await;
            return Err(err);
        }
        tracing::info!(
            connection = %id,
            mechanism = %connection.mechanism.mechanism_type,
            "connection established"
        );
        Ok(connection)
    }

    /// Best-effort close of a connection the manager opened but the client
    /// will not keep.
    async fn abandon(&self, connection: Connection, timeout: Duration) {
        let id = connection.id.clone();
        match tokio::time::timeout(timeout, self.chain.close(connection)).await {
            Ok(Ok(_)) => tracing::debug!(connection = %id, "abandoned connection closed"),
            Ok(Err(err)) => {
                tracing::warn!(connection = %id, error = %err, "best-effort close failed");
            }
            Err(_) => tracing::warn!(connection = %id, "best-effort close timed out"),
        }
    }

    /// Closes `connection` within `timeout`.
    ///
    /// Closing a connection that is not open is a no-op returning
    /// [`Acknowledgement::AlreadyClosed`]. Otherwise the registry entry is
    /// released whatever the outcome; a returned error is informational.
    pub async fn close(
        &self,
        connection: &Connection,
        timeout: Duration,
    ) -> Result<Acknowledgement, NscError> {
        let Some(entry) = self.registry.begin_close(&connection.id) else {
            tracing::debug!(connection = %connection.id, "close of a connection that is not open");
            return Ok(Acknowledgement::AlreadyClosed);
        };

        let span = tracing::info_span!("close", connection = %connection.id);
        // The stored connection carries the manager's context verbatim.
        let outcome = tokio::time::timeout(timeout, self.chain.close(entry.connection))
            .instrument(span)
            .await;
        self.registry.release(entry.index);

        match outcome {
            Ok(Ok(ack)) => {
                tracing::info!(connection = %connection.id, "connection closed");
                Ok(ack)
            }
            Ok(Err(source)) => Err(NscError::Teardown {
                connection: connection.id.clone(),
                source,
            }),
            Err(_) => Err(NscError::Teardown {
                connection: connection.id.clone(),
                source: ChainError::TimedOut(timeout),
            }),
        }
    }

    /// Requests every descriptor in order, stopping at the first failure.
    ///
    /// Stops early without error if `shutdown` fires between requests. Every
    /// descriptor is mandatory: the first failure is returned and the
    /// connections already established stay registered for the caller to drain.
    pub async fn start(
        &self,
        descriptors: &[NetworkServiceDescriptor],
        timeout: Duration,
        shutdown: &CancellationToken,
    ) -> Result<Vec<Connection>, NscError> {
        let mut established = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if shutdown.is_cancelled() {
                tracing::info!(
                    remaining = descriptors.len() - established.len(),
                    "shutdown requested during startup"
                );
                break;
            }
            established.push(self.request(descriptor, timeout).await?);
        }
        Ok(established)
    }

    /// Closes every open connection, most recently registered first.
    ///
    /// Each close is bounded by `grace`; a failed or timed-out close is
    /// reported and does not stop the drain.
    pub async fn drain_on_shutdown(&self, grace: Duration) -> DrainReport {
        let mut report = DrainReport::default();
        tracing::info!(open = self.registry.len(), "draining connections");
        while let Some(entry) = self.registry.newest_open() {
            let id = entry.connection.id.clone();
            match self.close(&entry.connection, grace).await {
                Ok(_) => report.closed.push(id),
                Err(err) => {
                    tracing::warn!(connection = %id, error = ?err, "teardown failed");
                    report.failed.push(id);
                }
            }
        }
        report
    }
}

impl std::fmt::Debug for NscClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NscClient")
            .field("name", &self.name)
            .field("open", &self.registry.len())
            .finish_non_exhaustive()
    }
}
