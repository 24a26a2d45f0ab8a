//! Collaborator traits consumed by the cloning engine.
//!
//! The engine never talks to a database directly. It reads the source
//! tenant through a [`SourceSnapshotReader`] and writes the clone through a
//! [`TargetWriter`], so the same pipeline runs against PostgreSQL or the
//! in-memory store used in tests.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{InsertError, Result};
use crate::models::{RecordId, Row, ScopeFilter};

/// Read access to the source organization's rows.
#[async_trait]
pub trait SourceSnapshotReader: Send + Sync {
    /// Check whether an organization row exists.
    async fn organization_exists(&self, org: Uuid) -> Result<bool>;

    /// Fetch every row of a table owned by `org`, in primary-key order.
    async fn fetch_rows(&self, scope: &ScopeFilter, org: Uuid) -> Result<Vec<Row>>;

    /// Check whether the row `id` exists and belongs to `org`.
    async fn row_in_tenant(&self, scope: &ScopeFilter, id: &RecordId, org: Uuid) -> Result<bool>;
}

/// Write access for the freshly created target organization.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Check whether the (caller-created) target organization exists.
    async fn organization_exists(&self, org: Uuid) -> Result<bool>;

    /// Insert one row and return the identity minted by the store.
    ///
    /// The row never contains the primary key; the store assigns it.
    async fn insert_row(
        &self,
        table: &str,
        primary_key: &str,
        row: Row,
    ) -> std::result::Result<RecordId, InsertError>;
}
