//! # ballast-events
//!
//! Shared wire types for the ballast load balancer control plane.
//!
//! ## Design Principles
//!
//! - Target transitions are *requests* for the downstream batching engine,
//!   not facts about the cloud; the cloud is eventually consistent
//! - A target is identified by the full `(load balancer, task, ip)` triple:
//!   the same IP can be reused by a later task, and the same task can map to
//!   different IPs across restarts
//! - Transitions carry a priority so that reactive updates (emitted on task
//!   lifecycle events) can supersede reconciliation output downstream

mod types;

pub use types::*;
