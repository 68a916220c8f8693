//! ballast Load Balancer Reconciler Library
//!
//! The reconciler drives the observed state of cloud load balancers toward
//! the desired state derived from the job manager's view of running tasks.
//! Tasks start and stop continuously, the cloud API is eventually consistent,
//! reactive registration requests can fail or be rate-limited, and load
//! balancers can be mutated or deleted out-of-band; the reconciler guarantees
//! convergence despite all of that.
//!
//! ## Architecture
//!
//! ```text
//! LoadBalancerReconciler (periodic driver)
//! ├── AssociationStore        (job ↔ load balancer associations + targets)
//! ├── CloudConnector          (observed load balancer membership)
//! ├── JobOperations           (running tasks per job)
//! ├── CooldownTracker         (suppression windows set by the reactive path)
//! └── events()                (stream of TargetTransition for the batcher)
//! ```
//!
//! Each tick gathers an immutable snapshot per association, runs the pure
//! phase engine over it, applies the resulting store mutations, and publishes
//! the resulting transitions. The reconciler never calls the cloud API to
//! apply changes itself; the downstream batching engine does.
//!
//! ## Modules
//!
//! - `store`: association/target store trait with in-memory and SQLite impls
//! - `engine`: the pure per-association decision rules
//! - `reconciler`: the periodic loop driver and event stream
//! - `client`: HTTP implementations of the connector and job operations

pub mod client;
pub mod config;
pub mod connector;
pub mod cooldown;
pub mod engine;
pub mod jobs;
pub mod reconciler;
pub mod snapshot;
pub mod store;

// Re-export commonly used types
pub use connector::{CloudConnector, CloudLbState, CloudLoadBalancer};
pub use cooldown::CooldownTracker;
pub use jobs::{JobOperations, JobOpsError, JobSummary, TaskEndpoint};
pub use reconciler::{LoadBalancerReconciler, ReconcilerConfig};
pub use store::{AssociationStore, MemoryStore, SqliteStore, StoreError, TargetRecord};
