//! # Reconcile
//!
//! A desired-state reconciliation engine for containerized infrastructure.
//!
//! Resources (networks, images, containers) are declared with typed
//! arguments, assembled into a validated dependency graph, compared with the
//! last applied state of a stack, and converged through a [`Provider`].
//!
//! ## Core Concepts
//!
//! - **Graph**: validated DAG of declared resources ([`GraphBuilder`])
//! - **Plan**: one create/update/replace/delete/no-op per resource ([`diff`])
//! - **Scheduler**: runs provider calls concurrently in dependency order ([`execute`])
//! - **State store**: durable, locked, checksummed record per stack ([`StateStore`])
//! - **Reconciler**: ties the above together ([`Reconciler`])
//!
//! ## Example
//!
//! ```
//! use reconcile::{
//!     CancelToken, GraphBuilder, MemoryStateStore, MockProvider, NoProgress, Reconciler, Resource,
//! };
//!
//! let graph = GraphBuilder::new()
//!     .declare(Resource::network("backend"))
//!     .declare(Resource::image("redis-image", "redis:7-alpine"))
//!     .declare(Resource::container("redis", "redis-image").on_network("backend"))
//!     .build()?;
//!
//! let reconciler = Reconciler::new(MemoryStateStore::new(), MockProvider::new());
//! let report = reconciler.apply("dev", &graph, &CancelToken::new(), &mut NoProgress)?;
//! assert_eq!(report.summary().created, 3);
//!
//! // A second run with the same graph changes nothing
//! assert!(!reconciler.plan("dev", &graph)?.has_changes());
//! # Ok::<(), reconcile::Error>(())
//! ```
//!
//! ## Seams
//!
//! - [`Provider`]: creates, updates and deletes real objects
//! - [`StateStore`]: persists stack state ([`FileStateStore`], [`MemoryStateStore`])
//! - [`ProgressCallback`]: receives progress updates
//!
//! This allows the engine to be used without hard dependencies on a
//! specific container runtime or terminal UI.

pub mod context;
pub mod diff;
pub mod error;
pub mod graph;
pub mod mock;
pub mod provider;
pub mod reconciler;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod types;

// Re-export main types at crate root
pub use context::{CancelToken, NoProgress, ProgressCallback};
pub use diff::{Operation, Plan, PlanSummary, PropertyChange, diff, property_changes};
pub use error::{Error, ErrorCategory, ProviderError, Result};
pub use graph::{Graph, GraphBuilder};
pub use mock::MockProvider;
pub use provider::{Dependencies, Provider};
pub use reconciler::{Reconciler, RunReport};
pub use retry::{RetryConfig, with_retry};
pub use scheduler::{Execution, execute};
pub use state::{FileStateStore, MemoryStateStore, STATE_VERSION, StackState, StateStore};
pub use types::{
    ContainerArgs, ExecuteOptions, ExecuteSummary, ImageArgs, NetworkArgs, NetworkAttachment,
    OperationKind, OperationOutcome, OperationStatus, OutputDecl, Outputs, PortMapping, Properties,
    Protocol, Resource, ResourceKind, ResourceSpec, ResourceState, RestartPolicy, Upload,
};
