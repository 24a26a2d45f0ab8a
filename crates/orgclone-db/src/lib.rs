//! # orgclone-db
//!
//! PostgreSQL layer for orgclone.
//!
//! This crate provides:
//! - Connection pool management
//! - [`PgCloneStore`], the source snapshot reader and target writer used by
//!   the clone engine
//! - Identifier validation for registry-supplied table and column names
//! - Schema-isolated fixtures for integration tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use orgclone_core::commerce_registry;
//! use orgclone_db::{create_pool, PgCloneStore};
//! use orgclone_engine::CloneOrchestrator;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = create_pool("postgres://localhost/shop").await?;
//!     let store = Arc::new(PgCloneStore::new(pool));
//!     let orchestrator =
//!         CloneOrchestrator::new(Arc::new(commerce_registry()?), store.clone(), store);
//!
//!     let report = orchestrator.clone(source_org, target_org).await?;
//!     println!("inserted {} rows", report.total_inserted());
//!     Ok(())
//! }
//! ```

pub mod identifier;
pub mod pool;
pub mod store;

// Always compiled so integration tests (in tests/) can use the fixtures.
pub mod test_fixtures;

pub use orgclone_core::*;

pub use identifier::{quote_identifier, validate_identifier};
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use store::PgCloneStore;
