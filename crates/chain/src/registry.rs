//! The authoritative set of open connections.
//!
//! Entries are kept in registration order; teardown walks them newest first.
//! Every operation takes the registry lock once, so a mutation is atomic with
//! respect to concurrent readers and writers.

use std::collections::BTreeMap;

use networkservice::{Connection, ConnectionId, ConnectionState, NscError, RequestIndex};
use parking_lot::Mutex;

/// A live connection and the index it was requested under.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredConnection {
    /// Request index.
    pub index: RequestIndex,
    /// Connection as returned by the manager.
    pub connection: Connection,
}

#[derive(Debug, Default)]
struct Inner {
    live: Vec<RegisteredConnection>,
    // One entry per index ever requested, terminal states included. The
    // binary requests each configured service once, so this is bounded by
    // the configured service count.
    states: BTreeMap<RequestIndex, ConnectionState>,
}

impl Inner {
    fn position(&self, index: RequestIndex) -> Option<usize> {
        self.live.iter().position(|e| e.index == index)
    }

    fn state(&self, index: RequestIndex) -> ConnectionState {
        self.states
            .get(&index)
            .copied()
            .unwrap_or(ConnectionState::Unrequested)
    }
}

/// Ordered mapping from request index to live connection, plus the lifecycle
/// state of every index the client has used.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `connection` as live at `index`.
    ///
    /// Fails with [`NscError::DuplicateConnection`] if a live entry already
    /// occupies `index`.
    pub fn register(&self, index: RequestIndex, connection: Connection) -> Result<(), NscError> {
        let mut inner = self.inner.lock();
        if inner.position(index).is_some() {
            return Err(NscError::DuplicateConnection { index });
        }
        inner.live.push(RegisteredConnection { index, connection });
        inner.states.insert(index, ConnectionState::Connected);
        Ok(())
    }

    /// Removes the entry at `index`, returning it. Absent indices are a no-op.
    pub fn release(&self, index: RequestIndex) -> Option<Connection> {
        let mut inner = self.inner.lock();
        let position = inner.position(index)?;
        let entry = inner.live.remove(position);
        inner.states.insert(index, ConnectionState::Closed);
        Some(entry.connection)
    }

    /// Moves the live entry for `id` from `Connected` to `Closing` and returns it.
    ///
    /// Returns `None` if no entry exists or another close already claimed it.
    pub fn begin_close(&self, id: &ConnectionId) -> Option<RegisteredConnection> {
        let mut inner = self.inner.lock();
        let entry = inner
            .live
            .iter()
            .find(|e| &e.connection.id == id)
            .cloned()?;
        if inner.state(entry.index) != ConnectionState::Connected {
            return None;
        }
        inner.states.insert(entry.index, ConnectionState::Closing);
        Some(entry)
    }

    /// Records a state change for `index`. Illegal transitions are refused.
    pub fn transition(&self, index: RequestIndex, next: ConnectionState) -> bool {
        let mut inner = self.inner.lock();
        let current = inner.state(index);
        if !current.can_transition_to(next) {
            tracing::warn!(
                %index,
                from = ?current,
                to = ?next,
                "refusing illegal state transition"
            );
            return false;
        }
        inner.states.insert(index, next);
        true
    }

    /// Current state of `index`.
    pub fn state(&self, index: RequestIndex) -> ConnectionState {
        self.inner.lock().state(index)
    }

    /// The connection live at `index`, if any.
    pub fn get(&self, index: RequestIndex) -> Option<Connection> {
        let inner = self.inner.lock();
        inner
            .position(index)
            .map(|p| inner.live[p].connection.clone())
    }

    /// The most recently registered entry that is not already being closed.
    pub fn newest_open(&self) -> Option<RegisteredConnection> {
        let inner = self.inner.lock();
        inner
            .live
            .iter()
            .rev()
            .find(|e| inner.state(e.index) == ConnectionState::Connected)
            .cloned()
    }

    /// Live entries in registration order.
    pub fn snapshot(&self) -> Vec<RegisteredConnection> {
        self.inner.lock().live.clone()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.lock().live.len()
    }

    /// Returns `true` if nothing is live.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().live.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use networkservice::{
        mechanisms, ConnectionContext, Labels, Mechanism, NetworkServiceName, Path,
    };

    use super::*;

    fn connection(id: &str) -> Connection {
        Connection {
            id: ConnectionId::new(id).unwrap(),
            network_service: NetworkServiceName::new("svc").unwrap(),
            labels: Labels::new(),
            mechanism: Mechanism::new(mechanisms::kernel()),
            path: Path::default(),
            context: ConnectionContext::default(),
        }
    }

    #[test]
    fn duplicate_index_is_refused() {
        let registry = ConnectionRegistry::new();
        let index = RequestIndex::new(0);
        registry.register(index, connection("nsc-0")).unwrap();

        let err = registry.register(index, connection("nsc-0")).unwrap_err();

        assert!(matches!(err, NscError::DuplicateConnection { index: i } if i == index));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn release_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let index = RequestIndex::new(4);
        registry.register(index, connection("nsc-4")).unwrap();

        assert!(registry.release(index).is_some());
        assert!(registry.release(index).is_none());
        assert!(registry.release(RequestIndex::new(99)).is_none());
        assert!(registry.is_empty());
        assert_eq!(registry.state(index), ConnectionState::Closed);
    }

    #[test]
    fn index_can_be_registered_again_after_release() {
        let registry = ConnectionRegistry::new();
        let index = RequestIndex::new(1);
        registry.register(index, connection("nsc-1")).unwrap();
        registry.release(index);
        registry.register(index, connection("nsc-1")).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn newest_open_skips_entries_being_closed() {
        let registry = ConnectionRegistry::new();
        for i in 0..3 {
            registry
                .register(RequestIndex::new(i), connection(&format!("nsc-{i}")))
                .unwrap();
        }
        assert_eq!(registry.newest_open().unwrap().index, RequestIndex::new(2));

        let claimed = registry
            .begin_close(&ConnectionId::new("nsc-2").unwrap())
            .unwrap();
        assert_eq!(claimed.index, RequestIndex::new(2));
        assert!(registry
            .begin_close(&ConnectionId::new("nsc-2").unwrap())
            .is_none());
        assert_eq!(registry.newest_open().unwrap().index, RequestIndex::new(1));
        assert_eq!(registry.state(RequestIndex::new(2)), ConnectionState::Closing);
    }

    #[test]
    fn illegal_transitions_are_refused() {
        let registry = ConnectionRegistry::new();
        let index = RequestIndex::new(0);
        assert!(registry.transition(index, ConnectionState::Requesting));
        assert!(registry.transition(index, ConnectionState::Failed));
        assert!(!registry.transition(index, ConnectionState::Requesting));
        assert_eq!(registry.state(index), ConnectionState::Failed);
    }

    #[test]
    fn snapshot_keeps_registration_order() {
        let registry = ConnectionRegistry::new();
        registry.register(RequestIndex::new(2), connection("nsc-2")).unwrap();
        registry.register(RequestIndex::new(0), connection("nsc-0")).unwrap();
        let order: Vec<u64> = registry.snapshot().iter().map(|e| e.index.as_u64()).collect();
        assert_eq!(order, vec![2, 0]);
        assert_eq!(registry.get(RequestIndex::new(0)).unwrap().id.as_str(), "nsc-0");
    }
}
