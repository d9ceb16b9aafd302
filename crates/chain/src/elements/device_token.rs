use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use networkservice::{
    mechanisms, Acknowledgement, ChainError, Connection, ConnectionId, NetworkServiceRequest,
};
use parking_lot::Mutex;

use crate::{ChainElement, Next};

const NAME: &str = "device-token";

/// Named pools of SR-IOV device token ids, as configured.
pub type TokenPools = BTreeMap<String, Vec<String>>;

#[derive(Debug)]
struct Held {
    pool: String,
    token: String,
}

#[derive(Debug, Default)]
struct PoolState {
    free: BTreeMap<String, VecDeque<String>>,
    held: HashMap<ConnectionId, Held>,
}

impl PoolState {
    /// Returns the token for `id` and whether it was newly taken from the pool.
    fn allocate(&mut self, id: &ConnectionId, pool: &str) -> Result<(String, bool), ChainError> {
        if let Some(held) = self.held.get(id) {
            if held.pool == pool {
                return Ok((held.token.clone(), false));
            }
        }
        let free = self
            .free
            .get_mut(pool)
            .ok_or_else(|| ChainError::rejected(NAME, format!("unknown token pool {pool:?}")))?;
        let token = free
            .pop_front()
            .ok_or_else(|| {
                ChainError::rejected(NAME, format!("token pool {pool:?} is exhausted"))
            })?;
        self.held.insert(
            id.clone(),
            Held {
                pool: pool.to_string(),
                token: token.clone(),
            },
        );
        Ok((token, true))
    }

    fn free(&mut self, id: &ConnectionId) {
        if let Some(held) = self.held.remove(id) {
            tracing::debug!(connection = %id, pool = %held.pool, "device token returned to pool");
            self.free.entry(held.pool).or_default().push_back(held.token);
        }
    }
}

/// Returns a fresh allocation to the pool when dropped, unless kept.
///
/// A request future dropped mid-flight (for example by a timeout) still frees
/// its token this way.
struct Allocation<'a> {
    state: &'a Mutex<PoolState>,
    id: Option<ConnectionId>,
}

impl Allocation<'_> {
    fn keep(mut self) {
        self.id = None;
    }
}

impl Drop for Allocation<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.state.lock().free(&id);
        }
    }
}

/// Allocates an SR-IOV device token for requests labelled `sriovToken=<pool>`.
///
/// The token id is written to every mechanism preference as `tokenID` and held
/// until the connection is closed or the request fails.
pub struct DeviceToken {
    state: Mutex<PoolState>,
}

impl DeviceToken {
    /// Creates the element over the given pools.
    pub fn new(pools: TokenPools) -> Self {
        let free = pools
            .into_iter()
            .map(|(name, ids)| (name, ids.into_iter().collect()))
            .collect();
        Self {
            state: Mutex::new(PoolState {
                free,
                held: HashMap::new(),
            }),
        }
    }

    /// Number of unallocated ids left in `pool`.
    pub fn available(&self, pool: &str) -> usize {
        self.state.lock().free.get(pool).map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl ChainElement for DeviceToken {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn request(
        &self,
        mut request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        let Some(pool) = request.labels.get(mechanisms::SRIOV_TOKEN_LABEL).cloned() else {
            return next.request(request).await;
        };
        let id = request.id.clone();
        let (token, fresh) = self.state.lock().allocate(&id, &pool)?;
        let allocation = Allocation {
            state: &self.state,
            id: fresh.then_some(id),
        };
        for mechanism in &mut request.mechanism_preferences {
            mechanism
                .parameters
                .insert(mechanisms::TOKEN_ID.to_string(), token.clone());
        }

        let connection = next.request(request).await?;
        allocation.keep();
        Ok(connection)
    }

    async fn close(
        &self,
        connection: Connection,
        next: Next<'_>,
    ) -> Result<Acknowledgement, ChainError> {
        self.state.lock().free(&connection.id);
        next.close(connection).await
    }
}
