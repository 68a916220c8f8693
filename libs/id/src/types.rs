//! Typed identifier definitions for the load balancer control plane.
//!
//! Job and task identifiers are assigned by the job manager; load balancer
//! identifiers are assigned by the cloud provider. All three are opaque.

use std::net::Ipv4Addr;

use crate::define_opaque_id;

// =============================================================================
// Job Manager Resources
// =============================================================================

define_opaque_id!(JobId);
define_opaque_id!(TaskId);

// =============================================================================
// Cloud Resources
// =============================================================================

define_opaque_id!(LoadBalancerId);

// =============================================================================
// Container IP Address
// =============================================================================

/// The container IP address of a task, as reported by the job manager.
///
/// Always a dotted-quad IPv4 address. The same IP may be reused by a later
/// task, so an IP alone never identifies a target; see the three-part target
/// key in `ballast-events`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IpAddress(Ipv4Addr);

impl IpAddress {
    /// Parses a dotted-quad IPv4 address.
    pub fn parse(s: &str) -> Result<Self, crate::IdError> {
        if s.is_empty() {
            return Err(crate::IdError::Empty);
        }

        s.parse::<Ipv4Addr>()
            .map(Self)
            .map_err(|_| crate::IdError::InvalidIpAddress(s.to_string()))
    }

    /// Returns the underlying IPv4 address.
    #[must_use]
    pub const fn addr(&self) -> Ipv4Addr {
        self.0
    }
}

impl From<Ipv4Addr> for IpAddress {
    fn from(addr: Ipv4Addr) -> Self {
        Self(addr)
    }
}

impl std::fmt::Display for IpAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for IpAddress {
    type Err = crate::IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for IpAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for IpAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================
