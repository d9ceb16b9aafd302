//! Newtype domain identifiers.
//!
//! Every named concept in a negotiation is represented as a distinct newtype
//! wrapping a primitive. This keeps a [`ConnectionId`] from being passed where a
//! [`NetworkServiceName`] is expected even though both are strings underneath.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: String-backed
// ---------------------------------------------------------------------------

string_id! {
    /// Name of this client instance (e.g. `"nsc"`).
    ///
    /// Used as the prefix of every [`ConnectionId`] and as the name of the
    /// client's own path segment.
    ClientName
}

string_id! {
    /// Name of a network service offered through the manager (e.g. `"icmp-responder"`).
    NetworkServiceName
}

string_id! {
    /// Identifies one logical connection for the lifetime of the client.
    ///
    /// Unique within a client instance: always `<client-name>-<request-index>`.
    ConnectionId
}

impl ConnectionId {
    /// Derives the identifier for the logical connection requested at `index`.
    pub fn for_index(client: &ClientName, index: RequestIndex) -> Self {
        Self(format!("{}-{}", client.as_str(), index.as_u64()))
    }
}

/// Mechanism family tag (e.g. `KERNEL`, `VFIO`).
///
/// Tags are compared case-insensitively on input and stored upper-case, so
/// `"kernel"` taken from a URL scheme and `"KERNEL"` returned by the manager
/// name the same family.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MechanismType(String);

impl MechanismType {
    /// Creates a mechanism tag, returning `None` if the value is empty.
    pub fn new(value: impl AsRef<str>) -> Option<Self> {
        let v = value.as_ref().trim();
        if v.is_empty() {
            None
        } else {
            Some(Self(v.to_ascii_uppercase()))
        }
    }

    /// Wraps a tag that is already non-empty and upper-case.
    pub(crate) fn from_canonical(value: &'static str) -> Self {
        Self(value.to_string())
    }

    /// Returns the tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MechanismType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for MechanismType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value).ok_or_else(|| "mechanism type must not be empty".to_string())
    }
}

impl From<MechanismType> for String {
    fn from(value: MechanismType) -> Self {
        value.0
    }
}

// ---------------------------------------------------------------------------
// Identifiers: integer-backed
// ---------------------------------------------------------------------------

/// Position of a logical connection in the order it was requested.
///
/// Assigned from a monotonically increasing counter; never reused within a
/// client instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestIndex(u64);

impl RequestIndex {
    /// Creates an index from a raw integer.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying integer value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_is_client_name_and_index() {
        let client = ClientName::new("nsc").unwrap();
        let id = ConnectionId::for_index(&client, RequestIndex::new(3));
        assert_eq!(id.as_str(), "nsc-3");
    }

    #[test]
    fn empty_identifiers_are_rejected() {
        assert!(ClientName::new("").is_none());
        assert!(NetworkServiceName::new(String::new()).is_none());
        assert!(MechanismType::new("  ").is_none());
    }

    #[test]
    fn mechanism_type_is_case_insensitive() {
        assert_eq!(
            MechanismType::new("kernel").unwrap(),
            MechanismType::new("KERNEL").unwrap()
        );
    }

    #[test]
    fn mechanism_type_rejects_empty_on_deserialize() {
        let parsed: Result<MechanismType, _> = serde_json::from_str("\"\"");
        assert!(parsed.is_err());
        let parsed: MechanismType = serde_json::from_str("\"vfio\"").unwrap();
        assert_eq!(parsed.as_str(), "VFIO");
    }
}
