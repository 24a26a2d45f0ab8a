//! # orgclone-core
//!
//! Core types, traits, and the entity schema registry for orgclone.
//!
//! This crate provides the data model shared by the cloning engine and the
//! PostgreSQL store: entity type descriptors, the registry and built-in
//! catalogs, clone reports, the error taxonomy, and the reader/writer
//! traits the engine consumes.
//!
//! ## Logging
//!
//! Every crate logs through `tracing` with `subsystem` and `component`
//! fields, plus `job_id` and `entity_type` where they apply, so a clone job
//! can be followed end to end by `job_id`.
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Job aborted, or a type failed entirely |
//! | WARN  | Row failed, reference repaired, type skipped |
//! | INFO  | Job lifecycle, per-type completions |
//! | DEBUG | Decision points: ordering, gating, config choices |
//! | TRACE | Per-row iteration and id mappings |

pub mod catalog;
pub mod defaults;
pub mod error;
pub mod models;
pub mod registry;
pub mod traits;

// Re-export commonly used types at crate root
pub use catalog::{commerce_registry, registry_by_name, site_registry};
pub use error::{Error, InsertError, Result};
pub use models::*;
pub use registry::{RegistryBuilder, SchemaRegistry};
pub use traits::*;
