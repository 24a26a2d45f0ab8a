//! # orgclone-engine
//!
//! Dependency-ordered cloning of one organization's entity graph into
//! another organization.
//!
//! ## Overview
//!
//! - [`ordering`]: topological order of the registered types, grouped into
//!   ranks that may run concurrently
//! - [`remap`]: job-scoped source-to-target id mappings
//! - [`repair`]: soft reference resolution (follow the clone or null)
//! - [`cloner`]: one type pass with per-row failure isolation
//! - [`orchestrator`]: pre-flight, execution and the final report
//! - [`memory`]: in-memory reader/writer for tests and dry runs
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use orgclone_core::commerce_registry;
//! use orgclone_engine::{memory::InMemoryStore, CloneOrchestrator};
//! use uuid::Uuid;
//!
//! # async fn run() -> orgclone_core::Result<()> {
//! let (source, target) = (Uuid::new_v4(), Uuid::new_v4());
//! let store = InMemoryStore::new()
//!     .with_organization(source)
//!     .with_organization(target);
//!
//! let orchestrator = CloneOrchestrator::new(
//!     Arc::new(commerce_registry()?),
//!     Arc::new(store.clone()),
//!     Arc::new(store),
//! );
//! let report = orchestrator.clone(source, target).await?;
//! assert!(report.success);
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod cloner;
pub mod config;
pub mod memory;
pub mod orchestrator;
pub mod ordering;
pub mod remap;
pub mod repair;

pub use cancel::{CancelHandle, CancelSignal};
pub use cloner::{BatchCloner, CloneContext, TypeCloneOutcome};
pub use config::CloneConfig;
pub use orchestrator::{CloneJob, CloneOrchestrator, ClonePlan, CloneRequest, JobState};
pub use ordering::{order, DependencyOrder, OrderedType};
pub use remap::{IdMap, IdRemapper};
pub use repair::{ReferenceRepairer, Resolution};
