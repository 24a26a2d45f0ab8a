//! Centralized default constants for orgclone.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates and the CLI reference these constants instead of defining their
//! own magic numbers.

// =============================================================================
// CLONE ENGINE
// =============================================================================

/// Concurrent row inserts within one entity type.
///
/// `ROW_CONCURRENCY * TYPE_CONCURRENCY` stays below [`DB_MAX_CONNECTIONS`]
/// so soft-reference validation reads still get a connection. Larger
/// operator overrides queue on pool acquire.
pub const ROW_CONCURRENCY: usize = 4;

/// Entity types of the same dependency rank cloned concurrently.
pub const TYPE_CONCURRENCY: usize = 2;

// =============================================================================
// DATABASE
// =============================================================================

/// Default maximum number of connections in the pool.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Default connection timeout in seconds.
pub const DB_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default idle timeout in seconds.
pub const DB_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default maximum connection lifetime in seconds.
pub const DB_MAX_LIFETIME_SECS: u64 = 1800;

/// Table holding one row per organization.
pub const ORGANIZATION_TABLE: &str = "organizations";
