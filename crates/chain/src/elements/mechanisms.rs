use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use networkservice::{
    mechanisms, Acknowledgement, ChainError, Connection, Mechanism, MechanismType,
    NetworkServiceRequest,
};

use crate::{ChainElement, Next};

const NAME: &str = "mechanisms";

/// Per-family behaviour plugged into the [`MechanismSelector`].
pub trait MechanismHandler: Send + Sync {
    /// Family this handler recognises.
    fn mechanism_type(&self) -> MechanismType;

    /// Fills family defaults into an offered preference.
    fn prepare(&self, request: &NetworkServiceRequest, mechanism: &mut Mechanism);

    /// Inspects the connection after the manager selected this family.
    fn connected(&self, _connection: &Connection) -> Result<(), ChainError> {
        Ok(())
    }

    /// Releases anything set up for `connection` before it is closed.
    fn closing(&self, _connection: &Connection) {}
}

/// Kernel network interface family.
#[derive(Debug, Clone)]
pub struct KernelMechanism {
    netns_url: String,
}

impl KernelMechanism {
    /// Creates the handler offering the namespace at `netns_url`.
    pub fn new(netns_url: impl Into<String>) -> Self {
        Self {
            netns_url: netns_url.into(),
        }
    }
}

impl Default for KernelMechanism {
    fn default() -> Self {
        Self::new("file:///proc/thread-self/ns/net")
    }
}

impl MechanismHandler for KernelMechanism {
    fn mechanism_type(&self) -> MechanismType {
        mechanisms::kernel()
    }

    fn prepare(&self, request: &NetworkServiceRequest, mechanism: &mut Mechanism) {
        let name: String = request
            .network_service
            .as_str()
            .chars()
            .take(mechanisms::MAX_INTERFACE_NAME_LEN)
            .collect();
        mechanism.set_default_parameter(mechanisms::INTERFACE_NAME, name);
        mechanism.set_default_parameter(mechanisms::NETNS_INODE_URL, self.netns_url.clone());
    }

    fn connected(&self, connection: &Connection) -> Result<(), ChainError> {
        match connection.mechanism.parameter(mechanisms::INTERFACE_NAME) {
            Some(name) if name.len() > mechanisms::MAX_INTERFACE_NAME_LEN => Err(
                ChainError::rejected(NAME, format!("interface name {name:?} is too long")),
            ),
            _ => Ok(()),
        }
    }
}

/// Device passthrough family.
#[derive(Debug, Clone)]
pub struct VfioMechanism {
    cgroup_dir: String,
}

impl VfioMechanism {
    /// Creates the handler offering `cgroup_dir`.
    pub fn new(cgroup_dir: impl Into<String>) -> Self {
        Self {
            cgroup_dir: cgroup_dir.into(),
        }
    }
}

impl MechanismHandler for VfioMechanism {
    fn mechanism_type(&self) -> MechanismType {
        mechanisms::vfio()
    }

    fn prepare(&self, _request: &NetworkServiceRequest, mechanism: &mut Mechanism) {
        mechanism.set_default_parameter(mechanisms::CGROUP_DIR, self.cgroup_dir.clone());
    }
}

/// Restricts the offer to families this client can realise and dispatches
/// per-family hooks.
///
/// The manager picks the mechanism; the selector only orders, fills, and
/// checks the pick.
pub struct MechanismSelector {
    handlers: BTreeMap<MechanismType, Arc<dyn MechanismHandler>>,
}

impl MechanismSelector {
    /// Creates a selector over `handlers`. A later handler for the same family wins.
    pub fn new(handlers: impl IntoIterator<Item = Arc<dyn MechanismHandler>>) -> Self {
        Self {
            handlers: handlers
                .into_iter()
                .map(|h| (h.mechanism_type(), h))
                .collect(),
        }
    }

    /// Families this selector recognises.
    pub fn supported(&self) -> Vec<MechanismType> {
        self.handlers.keys().cloned().collect()
    }
}

#[async_trait]
impl ChainElement for MechanismSelector {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn request(
        &self,
        mut request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        let offered: Vec<MechanismType> = request
            .mechanism_preferences
            .iter()
            .map(|m| m.mechanism_type.clone())
            .collect();

        let preferences = std::mem::take(&mut request.mechanism_preferences);
        let mut accepted = Vec::with_capacity(preferences.len());
        for mut mechanism in preferences {
            match self.handlers.get(&mechanism.mechanism_type) {
                Some(handler) => {
                    handler.prepare(&request, &mut mechanism);
                    accepted.push(mechanism);
                }
                None => tracing::debug!(
                    connection = %request.id,
                    mechanism = %mechanism.mechanism_type,
                    "dropping unsupported mechanism preference"
                ),
            }
        }
        if accepted.is_empty() {
            return Err(ChainError::NoSupportedMechanism { offered });
        }
        request.mechanism_preferences = accepted;

        let connection = next.request(request).await?;
        let selected = &connection.mechanism.mechanism_type;
        let verdict = match self.handlers.get(selected) {
            Some(handler) if offered.contains(selected) => handler.connected(&connection),
            _ => Err(ChainError::rejected(
                NAME,
                format!("manager selected {selected}, which was not offered"),
            )),
        };
        if let Err(err) = verdict {
            tracing::warn!(
                connection = %connection.id,
                error = %err,
                "closing unusable connection"
            );
            if let Err(close_err) = next.close(connection).await {
                tracing::warn!(error = %close_err, "best-effort close failed");
            }
            return Err(err);
        }
        tracing::info!(connection = %connection.id, mechanism = %selected, "mechanism negotiated");
        Ok(connection)
    }

    async fn close(
        &self,
        connection: Connection,
        next: Next<'_>,
    ) -> Result<Acknowledgement, ChainError> {
        if let Some(handler) = self.handlers.get(&connection.mechanism.mechanism_type) {
            handler.closing(&connection);
        }
        next.close(connection).await
    }
}
