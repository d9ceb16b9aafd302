use std::sync::Arc;

use async_trait::async_trait;
use networkservice::{
    Acknowledgement, ChainError, Connection, NetworkServiceRequest, Path, Timestamp,
};

use crate::{ChainElement, Next};

const NAME: &str = "authorize";

/// A check the returned connection's path must pass before it is accepted.
pub trait AuthorizePolicy: Send + Sync {
    /// Short name reported when the policy refuses a path.
    fn name(&self) -> &'static str;

    /// Returns why `path` is refused at `now`, or `Ok` to accept it.
    fn check(&self, path: &Path, now: Timestamp) -> Result<(), String>;
}

/// Refuses paths with a hop whose token is missing or expired.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnexpiredTokens;

impl AuthorizePolicy for UnexpiredTokens {
    fn name(&self) -> &'static str {
        "unexpired-tokens"
    }

    fn check(&self, path: &Path, now: Timestamp) -> Result<(), String> {
        for (index, segment) in path.segments.iter().enumerate() {
            if segment.token.is_empty() {
                return Err(format!("hop {index} ({}) carries no token", segment.name));
            }
            match segment.expires {
                Some(expires) if expires > now => {}
                Some(expires) => {
                    return Err(format!(
                        "token of hop {index} ({}) expired at {expires}",
                        segment.name
                    ));
                }
                None => {
                    return Err(format!("token of hop {index} ({}) has no expiry", segment.name));
                }
            }
        }
        Ok(())
    }
}

/// Accepts a negotiated connection only if every policy passes on its path.
///
/// A refused connection is closed through the rest of the chain before the
/// request fails, so downstream elements release what they hold. Close is
/// forwarded unchecked.
pub struct Authorize {
    policies: Vec<Arc<dyn AuthorizePolicy>>,
}

impl Authorize {
    /// Creates the element with the given policies, checked in order.
    pub fn new(policies: Vec<Arc<dyn AuthorizePolicy>>) -> Self {
        Self { policies }
    }
}

impl Default for Authorize {
    fn default() -> Self {
        Self::new(vec![Arc::new(UnexpiredTokens)])
    }
}

#[async_trait]
impl ChainElement for Authorize {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn request(
        &self,
        request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        let connection = next.request(request).await?;
        let now = Timestamp::now();
        let refusal = self.policies.iter().find_map(|policy| {
            policy
                .check(&connection.path, now)
                .err()
                .map(|reason| format!("{}: {reason}", policy.name()))
        });
        let Some(reason) = refusal else {
            return Ok(connection);
        };

        tracing::warn!(connection = %connection.id, %reason, "connection refused by policy");
        if let Err(err) = next.close(connection).await {
            tracing::warn!(error = %err, "closing refused connection failed");
        }
        Err(ChainError::rejected(NAME, reason))
    }

    async fn close(
        &self,
        connection: Connection,
        next: Next<'_>,
    ) -> Result<Acknowledgement, ChainError> {
        next.close(connection).await
    }
}
