use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use networkservice::{
    Acknowledgement, BearerToken, ChainError, Connection, NetworkServiceRequest, Path, Timestamp,
    TokenGenerator,
};
use parking_lot::Mutex;

use crate::{ChainElement, Next};

const NAME: &str = "update-token";

/// Stamps a bearer token and its expiry on this client's path segment.
///
/// A minted token is cached and reused while more than half of its lifetime
/// remains. Closing a connection revokes the cached token. Must run after
/// [`super::UpdatePath`] so the path has a current segment.
pub struct UpdateToken {
    generator: Arc<dyn TokenGenerator>,
    lifetime: Duration,
    cached: Mutex<Option<BearerToken>>,
}

impl UpdateToken {
    /// Creates the element minting tokens valid for `lifetime`.
    pub fn new(generator: Arc<dyn TokenGenerator>, lifetime: Duration) -> Self {
        Self {
            generator,
            lifetime,
            cached: Mutex::new(None),
        }
    }

    fn token(&self) -> Result<BearerToken, ChainError> {
        let mut cached = self.cached.lock();
        if let Some(token) = cached.as_ref() {
            if token.remaining(Timestamp::now()) > self.lifetime / 2 {
                return Ok(token.clone());
            }
        }
        let token = self.generator.mint(self.lifetime)?;
        *cached = Some(token.clone());
        Ok(token)
    }

    fn stamp(&self, path: &mut Path) -> Result<(), ChainError> {
        let token = self.token()?;
        let segment = path.current_mut().ok_or_else(|| {
            ChainError::rejected(NAME, "path has no current segment to stamp")
        })?;
        segment.token = token.value;
        segment.expires = Some(token.expires_at);
        Ok(())
    }
}

#[async_trait]
impl ChainElement for UpdateToken {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn request(
        &self,
        mut request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        self.stamp(&mut request.path)?;
        next.request(request).await
    }

    async fn close(
        &self,
        mut connection: Connection,
        next: Next<'_>,
    ) -> Result<Acknowledgement, ChainError> {
        let stamped = self.stamp(&mut connection.path);
        let result = match stamped {
            Ok(()) => next.close(connection).await,
            Err(err) => Err(err),
        };
        self.cached.lock().take();
        result
    }
}
