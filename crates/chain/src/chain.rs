//! Chain composition.
//!
//! Elements are applied in declared order on both request and close. Each
//! element receives a [`Next`] handle for the remainder of the chain and
//! decides whether to forward, mutate-and-forward, or short-circuit.

use std::sync::Arc;

use async_trait::async_trait;
use networkservice::{
    Acknowledgement, ChainError, Connection, NetworkServiceClient, NetworkServiceRequest,
};
use tracing::Instrument;

/// One composable step of request/close processing.
#[async_trait]
pub trait ChainElement: Send + Sync {
    /// Short name used in spans and rejection errors.
    fn name(&self) -> &'static str;

    /// Handles an outgoing request. Call `next.request` to continue the chain.
    async fn request(
        &self,
        request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError>;

    /// Handles a close. Call `next.close` to continue the chain.
    async fn close(
        &self,
        connection: Connection,
        next: Next<'_>,
    ) -> Result<Acknowledgement, ChainError>;
}

/// The remainder of a chain, as seen by the element currently running.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    rest: &'a [Arc<dyn ChainElement>],
    terminal: &'a dyn NetworkServiceClient,
}

impl<'a> Next<'a> {
    /// Passes `request` to the next element, or to the terminal RPC if none remain.
    pub async fn request(self, request: NetworkServiceRequest) -> Result<Connection, ChainError> {
        match self.rest.split_first() {
            Some((element, rest)) => {
                let span = tracing::debug_span!("element", name = element.name(), op = "request");
                element
                    .request(
                        request,
                        Next {
                            rest,
                            terminal: self.terminal,
                        },
                    )
                    .instrument(span)
                    .await
            }
            None => self.terminal.request(request).await,
        }
    }

    /// Passes `connection` to the next element, or to the terminal RPC if none remain.
    pub async fn close(self, connection: Connection) -> Result<Acknowledgement, ChainError> {
        match self.rest.split_first() {
            Some((element, rest)) => {
                let span = tracing::debug_span!("element", name = element.name(), op = "close");
                element
                    .close(
                        connection,
                        Next {
                            rest,
                            terminal: self.terminal,
                        },
                    )
                    .instrument(span)
                    .await
            }
            None => self.terminal.close(connection).await,
        }
    }
}

/// An immutable, ordered composition of elements ending in a terminal client.
pub struct Chain {
    elements: Vec<Arc<dyn ChainElement>>,
    terminal: Arc<dyn NetworkServiceClient>,
}

impl Chain {
    /// Composes `elements` (applied index 0 first) in front of `terminal`.
    pub fn new(
        elements: impl IntoIterator<Item = Arc<dyn ChainElement>>,
        terminal: Arc<dyn NetworkServiceClient>,
    ) -> Self {
        Self {
            elements: elements.into_iter().collect(),
            terminal,
        }
    }

    /// Element names in application order.
    pub fn element_names(&self) -> Vec<&'static str> {
        self.elements.iter().map(|e| e.name()).collect()
    }

    fn head(&self) -> Next<'_> {
        Next {
            rest: &self.elements,
            terminal: self.terminal.as_ref(),
        }
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("elements", &self.element_names())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl NetworkServiceClient for Chain {
    async fn request(&self, request: NetworkServiceRequest) -> Result<Connection, ChainError> {
        self.head().request(request).await
    }

    async fn close(&self, connection: Connection) -> Result<Acknowledgement, ChainError> {
        self.head().close(connection).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use networkservice::{
        mechanisms, ConnectionContext, ConnectionId, Labels, Mechanism, NetworkServiceName, Path,
    };
    use parking_lot::Mutex;

    /// Appends its tag to a shared journal on the way down and the way back.
    struct Tracer {
        tag: &'static str,
        journal: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ChainElement for Tracer {
        fn name(&self) -> &'static str {
            self.tag
        }

        async fn request(
            &self,
            mut request: NetworkServiceRequest,
            next: Next<'_>,
        ) -> Result<Connection, ChainError> {
            self.journal.lock().push(format!("req>{}", self.tag));
            request.labels.insert(self.tag.to_string(), "seen".to_string());
            let result = next.request(request).await;
            self.journal.lock().push(format!("req<{}", self.tag));
            result
        }

        async fn close(
            &self,
            connection: Connection,
            next: Next<'_>,
        ) -> Result<Acknowledgement, ChainError> {
            self.journal.lock().push(format!("close>{}", self.tag));
            next.close(connection).await
        }
    }

    struct Reject;

    #[async_trait]
    impl ChainElement for Reject {
        fn name(&self) -> &'static str {
            "reject"
        }

        async fn request(
            &self,
            _request: NetworkServiceRequest,
            _next: Next<'_>,
        ) -> Result<Connection, ChainError> {
            Err(ChainError::rejected("reject", "always"))
        }

        async fn close(
            &self,
            connection: Connection,
            next: Next<'_>,
        ) -> Result<Acknowledgement, ChainError> {
            next.close(connection).await
        }
    }

    /// Echoes the request back as a connection using its first preference.
    struct Echo {
        journal: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl NetworkServiceClient for Echo {
        async fn request(&self, request: NetworkServiceRequest) -> Result<Connection, ChainError> {
            self.journal.lock().push("rpc:request".into());
            Ok(Connection {
                id: request.id,
                network_service: request.network_service,
                labels: request.labels,
                mechanism: request.mechanism_preferences[0].clone(),
                path: request.path,
                context: ConnectionContext::default(),
            })
        }

        async fn close(&self, _connection: Connection) -> Result<Acknowledgement, ChainError> {
            self.journal.lock().push("rpc:close".into());
            Ok(Acknowledgement::Closed)
        }
    }

    fn request() -> NetworkServiceRequest {
        NetworkServiceRequest {
            id: ConnectionId::new("nsc-0").unwrap(),
            network_service: NetworkServiceName::new("svc").unwrap(),
            labels: Labels::new(),
            mechanism_preferences: vec![Mechanism::new(mechanisms::kernel())],
            path: Path::default(),
            resources: Vec::new(),
        }
    }

    fn traced(journal: &Arc<Mutex<Vec<String>>>) -> Chain {
        let elements: Vec<Arc<dyn ChainElement>> = vec![
            Arc::new(Tracer {
                tag: "a",
                journal: journal.clone(),
            }),
            Arc::new(Tracer {
                tag: "b",
                journal: journal.clone(),
            }),
        ];
        Chain::new(
            elements,
            Arc::new(Echo {
                journal: journal.clone(),
            }),
        )
    }

    #[tokio::test]
    async fn request_runs_elements_in_declared_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let chain = traced(&journal);

        let connection = chain.request(request()).await.unwrap();

        assert_eq!(
            *journal.lock(),
            vec!["req>a", "req>b", "rpc:request", "req<b", "req<a"]
        );
        assert_eq!(connection.labels.len(), 2);
    }

    #[tokio::test]
    async fn close_runs_elements_in_the_same_declared_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let chain = traced(&journal);
        let connection = chain.request(request()).await.unwrap();
        journal.lock().clear();

        let ack = chain.close(connection).await.unwrap();

        assert_eq!(ack, Acknowledgement::Closed);
        assert_eq!(*journal.lock(), vec!["close>a", "close>b", "rpc:close"]);
    }

    #[tokio::test]
    async fn element_error_short_circuits_the_request() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let elements: Vec<Arc<dyn ChainElement>> = vec![
            Arc::new(Tracer {
                tag: "a",
                journal: journal.clone(),
            }),
            Arc::new(Reject),
        ];
        let chain = Chain::new(
            elements,
            Arc::new(Echo {
                journal: journal.clone(),
            }),
        );

        let err = chain.request(request()).await.unwrap_err();

        assert!(matches!(err, ChainError::Rejected { element: "reject", .. }));
        assert!(!journal.lock().iter().any(|e| e == "rpc:request"));
        assert_eq!(chain.element_names(), vec!["a", "reject"]);
    }
}
