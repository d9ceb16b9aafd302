//! Value types exchanged with the network service manager.
//!
//! A [`NetworkServiceDescriptor`] is what configuration supplies. The client
//! turns it into a [`NetworkServiceRequest`] by assigning an id; the manager
//! answers with a [`Connection`] that is held until it is closed.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ConnectionId, MechanismType, NetworkServiceName};

/// Label set attached to a request. Ordering carries no meaning.
pub type Labels = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Mechanisms
// ---------------------------------------------------------------------------

/// A mechanism family tag plus its family-specific parameters.
///
/// The client offers an ordered list of these; the manager selects exactly
/// one and returns it on the [`Connection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mechanism {
    /// Mechanism family.
    #[serde(rename = "type")]
    pub mechanism_type: MechanismType,

    /// Family-specific parameters (interface name, namespace URL, token id, ...).
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl Mechanism {
    /// Creates a mechanism with no parameters.
    pub fn new(mechanism_type: MechanismType) -> Self {
        Self {
            mechanism_type,
            parameters: BTreeMap::new(),
        }
    }

    /// Returns `self` with `key` set to `value`.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Returns the value of parameter `key`, if set.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// Sets `key` only if it is not already present.
    pub fn set_default_parameter(&mut self, key: &str, value: impl Into<String>) {
        self.parameters
            .entry(key.to_string())
            .or_insert_with(|| value.into());
    }
}

// ---------------------------------------------------------------------------
// Path
// ---------------------------------------------------------------------------

/// One hop on the path between the client and the network service endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSegment {
    /// Name of the participant owning this hop.
    pub name: String,
    /// Identifier of the connection at this hop.
    pub id: String,
    /// Bearer token proving the participant's identity.
    #[serde(default)]
    pub token: String,
    /// Expiry of `token`.
    #[serde(default)]
    pub expires: Option<Timestamp>,
}

/// Ordered list of hops plus the position of the current participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    /// Index into `segments` of the participant currently handling the message.
    #[serde(default)]
    pub index: usize,
    /// Hops, client first.
    #[serde(default)]
    pub segments: Vec<PathSegment>,
}

impl Path {
    /// Returns the segment at the current index.
    pub fn current(&self) -> Option<&PathSegment> {
        self.segments.get(self.index)
    }

    /// Returns the segment at the current index mutably.
    pub fn current_mut(&mut self) -> Option<&mut PathSegment> {
        self.segments.get_mut(self.index)
    }
}

// ---------------------------------------------------------------------------
// Request / connection
// ---------------------------------------------------------------------------

/// Configured description of one logical connection, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkServiceDescriptor {
    /// Service to connect to.
    pub network_service: NetworkServiceName,
    /// Labels passed to the manager for endpoint selection.
    #[serde(default)]
    pub labels: Labels,
    /// Acceptable mechanisms, most preferred first.
    pub mechanism_preferences: Vec<Mechanism>,
}

impl NetworkServiceDescriptor {
    /// Builds the request for this descriptor under the given connection id.
    pub fn to_request(&self, id: ConnectionId) -> NetworkServiceRequest {
        NetworkServiceRequest {
            id,
            network_service: self.network_service.clone(),
            labels: self.labels.clone(),
            mechanism_preferences: self.mechanism_preferences.clone(),
            path: Path::default(),
            resources: Vec::new(),
        }
    }
}

/// A request for one logical connection, as it travels down the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkServiceRequest {
    /// Unique id of the logical connection.
    pub id: ConnectionId,
    /// Requested service.
    pub network_service: NetworkServiceName,
    /// Endpoint selection labels.
    #[serde(default)]
    pub labels: Labels,
    /// Acceptable mechanisms, most preferred first.
    pub mechanism_preferences: Vec<Mechanism>,
    /// Path accumulated so far.
    #[serde(default)]
    pub path: Path,
    /// Local resources handed to the manager alongside this call.
    ///
    /// Carried out-of-band by the transport, never inside the payload.
    #[serde(skip)]
    pub resources: Vec<ResourceDescriptor>,
}

/// A negotiated connection, as returned by the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// Matches the id of the originating request.
    pub id: ConnectionId,
    /// Service the connection belongs to.
    pub network_service: NetworkServiceName,
    /// Labels as accepted by the manager.
    #[serde(default)]
    pub labels: Labels,
    /// The single mechanism the manager selected.
    pub mechanism: Mechanism,
    /// Hops from client to endpoint.
    #[serde(default)]
    pub path: Path,
    /// Opaque state that must be echoed back verbatim on close.
    #[serde(default)]
    pub context: ConnectionContext,
}

/// Opaque manager-owned context blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionContext(serde_json::Value);

impl ConnectionContext {
    /// Wraps a raw JSON value.
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Returns the raw JSON value.
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// A local resource (an open file descriptor) offered to the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// URL the manager sees in the mechanism parameters (e.g. `inode://4/4026531992`).
    pub url: String,
    /// Process holding the descriptor.
    pub pid: u32,
    /// Descriptor number within `pid`.
    pub fd: i32,
}

/// Outcome of a successful close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// The manager confirmed the close.
    Closed,
    /// The connection was not open; nothing was sent.
    AlreadyClosed,
}

// ---------------------------------------------------------------------------
// Connection lifecycle
// ---------------------------------------------------------------------------

/// Per-connection state machine.
///
/// `Unrequested → Requesting → {Connected, Failed}`; `Connected → Closing → Closed`.
/// `Failed` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No request issued yet.
    Unrequested,
    /// Request in flight.
    Requesting,
    /// Negotiated and registered.
    Connected,
    /// Request failed or timed out. Terminal.
    Failed,
    /// Close in flight.
    Closing,
    /// Close finished (successfully or not). Terminal.
    Closed,
}

impl ConnectionState {
    /// Returns `true` if `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Unrequested, Requesting)
                | (Requesting, Connected)
                | (Requesting, Failed)
                | (Connected, Closing)
                | (Closing, Closed)
        )
    }

    /// Returns `true` for `Failed` and `Closed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// A short-lived bearer token minted from the client identity.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken {
    /// Encoded token value.
    pub value: String,
    /// Instant after which the token is no longer valid.
    pub expires_at: Timestamp,
}

impl BearerToken {
    /// Returns how long the token remains valid after `now` (zero once expired).
    pub fn remaining(&self, now: Timestamp) -> Duration {
        (self.expires_at.as_datetime() - now.as_datetime())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// Returns `self` advanced by `duration`, saturating at the maximum representable time.
    pub fn saturating_add(self, duration: Duration) -> Self {
        chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| self.0.checked_add_signed(d))
            .map_or(Self(DateTime::<Utc>::MAX_UTC), Self)
    }

    /// Seconds since the Unix epoch.
    pub fn unix_seconds(self) -> i64 {
        self.0.timestamp()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mechanisms;

    #[test]
    fn state_machine_allows_only_documented_transitions() {
        use ConnectionState::*;
        assert!(Unrequested.can_transition_to(Requesting));
        assert!(Requesting.can_transition_to(Connected));
        assert!(Requesting.can_transition_to(Failed));
        assert!(Connected.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));

        assert!(!Closed.can_transition_to(Requesting));
        assert!(!Failed.can_transition_to(Requesting));
        assert!(!Connected.can_transition_to(Connected));
        assert!(!Unrequested.can_transition_to(Connected));
        assert!(Closed.is_terminal() && Failed.is_terminal());
    }

    #[test]
    fn descriptor_builds_request_with_given_id() {
        let descriptor = NetworkServiceDescriptor {
            network_service: NetworkServiceName::new("svc-a").unwrap(),
            labels: Labels::from([("app".to_string(), "web".to_string())]),
            mechanism_preferences: vec![Mechanism::new(mechanisms::kernel())],
        };
        let request = descriptor.to_request(ConnectionId::new("nsc-0").unwrap());
        assert_eq!(request.id.as_str(), "nsc-0");
        assert_eq!(request.labels.get("app").map(String::as_str), Some("web"));
        assert!(request.path.segments.is_empty());
        assert!(request.resources.is_empty());
    }

    #[test]
    fn default_parameter_does_not_overwrite() {
        let mut mechanism =
            Mechanism::new(mechanisms::kernel()).with_parameter(mechanisms::INTERFACE_NAME, "eth9");
        mechanism.set_default_parameter(mechanisms::INTERFACE_NAME, "nsm0");
        mechanism.set_default_parameter(mechanisms::NETNS_INODE_URL, "file:///proc/self/ns/net");
        assert_eq!(mechanism.parameter(mechanisms::INTERFACE_NAME), Some("eth9"));
        assert_eq!(
            mechanism.parameter(mechanisms::NETNS_INODE_URL),
            Some("file:///proc/self/ns/net")
        );
    }

    #[test]
    fn request_resources_stay_out_of_the_payload() {
        let mut request = NetworkServiceDescriptor {
            network_service: NetworkServiceName::new("svc").unwrap(),
            labels: Labels::new(),
            mechanism_preferences: vec![Mechanism::new(mechanisms::vfio())],
        }
        .to_request(ConnectionId::new("nsc-1").unwrap());
        request.resources.push(ResourceDescriptor {
            url: "inode://1/2".into(),
            pid: 1,
            fd: 3,
        });
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("resources").is_none());
        assert_eq!(json["mechanism_preferences"][0]["type"], "VFIO");
    }

    #[test]
    fn expired_token_has_no_remaining_lifetime() {
        let now = Timestamp::now();
        let token = BearerToken {
            value: "t".into(),
            expires_at: now,
        };
        assert_eq!(token.remaining(now.saturating_add(Duration::from_secs(5))), Duration::ZERO);
        assert!(!format!("{token:?}").contains("\"t\""));
    }
}
