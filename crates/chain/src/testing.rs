//! Shared fixtures for unit tests in this crate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use networkservice::{
    Acknowledgement, ChainError, Connection, ConnectionContext, ConnectionId, Labels, Mechanism,
    NetworkServiceClient, NetworkServiceName, NetworkServiceRequest, Path,
};
use parking_lot::Mutex;

use crate::{Chain, ChainElement};

/// Terminal client that accepts the first offered mechanism and records what it saw.
#[derive(Default)]
pub(crate) struct Recorder {
    pub requests: Mutex<Vec<NetworkServiceRequest>>,
    pub closes: Mutex<Vec<Connection>>,
    pub fail_requests: bool,
    /// Sleep before answering a request.
    pub request_delay: Option<Duration>,
    /// Answer with this id instead of the requested one.
    pub answer_id: Option<ConnectionId>,
}

#[async_trait]
impl NetworkServiceClient for Recorder {
    async fn request(&self, request: NetworkServiceRequest) -> Result<Connection, ChainError> {
        if let Some(delay) = self.request_delay {
            tokio::time::sleep(delay).await;
        }
        self.requests.lock().push(request.clone());
        if self.fail_requests {
            return Err(ChainError::Transport("manager unavailable".into()));
        }
        let mechanism = request
            .mechanism_preferences
            .first()
            .cloned()
            .ok_or_else(|| ChainError::rejected("recorder", "no preferences"))?;
        Ok(Connection {
            id: self.answer_id.clone().unwrap_or(request.id),
            network_service: request.network_service,
            labels: request.labels,
            mechanism,
            path: request.path,
            context: ConnectionContext::default(),
        })
    }

    async fn close(&self, connection: Connection) -> Result<Acknowledgement, ChainError> {
        self.closes.lock().push(connection);
        Ok(Acknowledgement::Closed)
    }
}

pub(crate) fn single(
    element: impl ChainElement + 'static,
    terminal: Arc<Recorder>,
) -> Chain {
    let elements: Vec<Arc<dyn ChainElement>> = vec![Arc::new(element)];
    Chain::new(elements, terminal)
}

pub(crate) fn request(id: &str, preferences: Vec<Mechanism>) -> NetworkServiceRequest {
    NetworkServiceRequest {
        id: ConnectionId::new(id).unwrap(),
        network_service: NetworkServiceName::new("svc-a").unwrap(),
        labels: Labels::new(),
        mechanism_preferences: preferences,
        path: Path::default(),
        resources: Vec::new(),
    }
}
