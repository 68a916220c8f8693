//! # ballast-id
//!
//! Typed identifiers, parsing, and validation for the ballast load balancer
//! control plane.
//!
//! ## Design Principles
//!
//! - Identifiers originate in external systems (the job manager, the cloud
//!   provider) and are treated as opaque strings
//! - All identifiers have a canonical string representation with strict
//!   parsing (non-empty, no whitespace or control characters)
//! - Identifiers support roundtrip serialization (parse → format → parse)
//! - Identifiers are typed to prevent mixing different resource kinds
//!
//! The one exception is [`IpAddress`], which is a validated dotted-quad
//! container IP rather than an opaque string.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;
