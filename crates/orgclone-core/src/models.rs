//! Data model for organization cloning.
//!
//! Entity type descriptors are declared once at startup and shared
//! read-only through the schema registry. Everything else here lives only
//! for the duration of one clone job.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A row as read from, or written to, a tenant-scoped table.
pub type Row = serde_json::Map<String, JsonValue>;

// =============================================================================
// RECORD IDENTITY
// =============================================================================

/// Primary key of a single row.
///
/// Covers serial/bigint keys and text-encoded keys (uuid, slug).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl RecordId {
    /// Extract an id from a JSON column value. Null and non-scalar values
    /// yield `None`.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Number(n) => n.as_i64().map(RecordId::Int),
            JsonValue::String(s) => Some(RecordId::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            RecordId::Int(n) => JsonValue::from(*n),
            RecordId::Text(s) => JsonValue::String(s.clone()),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(n) => write!(f, "{}", n),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self {
        RecordId::Int(n)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId::Text(s.to_string())
    }
}

impl From<Uuid> for RecordId {
    fn from(id: Uuid) -> Self {
        RecordId::Text(id.to_string())
    }
}

// =============================================================================
// ENTITY TYPE DESCRIPTORS
// =============================================================================

/// Foreign key whose target type is always cloned in the same job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub field: String,
    pub target: String,
}

/// Optional foreign key whose target may fall outside the cloned subgraph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftForeignKey {
    pub field: String,
    pub target: String,
    /// Confirm the referenced row belongs to the source tenant before
    /// nulling it, so the repair can be classified.
    pub validate_against_source_tenant: bool,
}

/// How rows of a type are attributed to an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TenantScope {
    /// The table carries the organization id directly.
    Column { field: String },
    /// The table belongs to a tenant through a column-scoped parent row.
    Parent { field: String, parent: String },
}

/// What a [`FieldOverride`] writes into a cloned row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum OverrideValue {
    /// A fixed value.
    Literal(JsonValue),
    /// The name given to the new organization on the clone request.
    TargetName,
    /// The source value, or the new organization's name when the source
    /// value is null or an empty string.
    SourceOrTargetName,
}

impl OverrideValue {
    /// Value to write, given the field's current value and the job's target
    /// name. `None` leaves the field as it is.
    pub fn resolve(&self, current: Option<&JsonValue>, target_name: Option<&str>) -> Option<JsonValue> {
        let name = || target_name.map(|n| JsonValue::String(n.to_string()));
        match self {
            OverrideValue::Literal(value) => Some(value.clone()),
            OverrideValue::TargetName => name(),
            OverrideValue::SourceOrTargetName => match current {
                None | Some(JsonValue::Null) => name(),
                Some(JsonValue::String(s)) if s.is_empty() => name(),
                Some(_) => None,
            },
        }
    }
}

/// A per-type rewrite applied to every cloned row after references are
/// resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOverride {
    pub field: String,
    pub value: OverrideValue,
}

/// Static description of one clonable (or referenceable) table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTypeDescriptor {
    /// Type name, also the table name.
    pub name: String,
    pub primary_key: String,
    pub scope: TenantScope,
    pub hard_foreign_keys: Vec<ForeignKey>,
    pub soft_foreign_keys: Vec<SoftForeignKey>,
    /// FKs into global lookup tables, passed through unless mapped.
    pub shared_references: Vec<ForeignKey>,
    /// Identity and tenant-unique fields stripped before insert.
    pub excluded_fields: Vec<String>,
    pub overrides: Vec<FieldOverride>,
    /// Registered for soft-FK validation only, never cloned.
    pub reference_only: bool,
}

impl EntityTypeDescriptor {
    /// Column-scoped type keyed by `id` and scoped by `organization_id`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: "id".to_string(),
            scope: TenantScope::Column {
                field: "organization_id".to_string(),
            },
            hard_foreign_keys: Vec::new(),
            soft_foreign_keys: Vec::new(),
            shared_references: Vec::new(),
            excluded_fields: Vec::new(),
            overrides: Vec::new(),
            reference_only: false,
        }
    }

    pub fn primary_key(mut self, field: impl Into<String>) -> Self {
        self.primary_key = field.into();
        self
    }

    pub fn scoped_by(mut self, field: impl Into<String>) -> Self {
        self.scope = TenantScope::Column {
            field: field.into(),
        };
        self
    }

    /// Scope through a parent row. Also declares `field` as a hard FK.
    pub fn scoped_by_parent(mut self, field: impl Into<String>, parent: impl Into<String>) -> Self {
        let field = field.into();
        let parent = parent.into();
        self.scope = TenantScope::Parent {
            field: field.clone(),
            parent: parent.clone(),
        };
        if !self.hard_foreign_keys.iter().any(|fk| fk.field == field) {
            self.hard_foreign_keys.push(ForeignKey {
                field,
                target: parent,
            });
        }
        self
    }

    pub fn hard_fk(mut self, field: impl Into<String>, target: impl Into<String>) -> Self {
        self.hard_foreign_keys.push(ForeignKey {
            field: field.into(),
            target: target.into(),
        });
        self
    }

    pub fn soft_fk(
        mut self,
        field: impl Into<String>,
        target: impl Into<String>,
        validate_against_source_tenant: bool,
    ) -> Self {
        self.soft_foreign_keys.push(SoftForeignKey {
            field: field.into(),
            target: target.into(),
            validate_against_source_tenant,
        });
        self
    }

    pub fn shared_ref(mut self, field: impl Into<String>, target: impl Into<String>) -> Self {
        self.shared_references.push(ForeignKey {
            field: field.into(),
            target: target.into(),
        });
        self
    }

    pub fn exclude(mut self, field: impl Into<String>) -> Self {
        self.excluded_fields.push(field.into());
        self
    }

    pub fn override_field(mut self, field: impl Into<String>, value: JsonValue) -> Self {
        self.overrides.push(FieldOverride {
            field: field.into(),
            value: OverrideValue::Literal(value),
        });
        self
    }

    /// Write the new organization's name into `field`.
    pub fn name_from_target(mut self, field: impl Into<String>) -> Self {
        self.overrides.push(FieldOverride {
            field: field.into(),
            value: OverrideValue::TargetName,
        });
        self
    }

    /// Keep `field` unless it is blank, then use the new organization's name.
    pub fn default_to_target_name(mut self, field: impl Into<String>) -> Self {
        self.overrides.push(FieldOverride {
            field: field.into(),
            value: OverrideValue::SourceOrTargetName,
        });
        self
    }

    pub fn reference_only(mut self) -> Self {
        self.reference_only = true;
        self
    }

    /// The organization column, when the type is column-scoped.
    pub fn tenant_column(&self) -> Option<&str> {
        match &self.scope {
            TenantScope::Column { field } => Some(field),
            TenantScope::Parent { .. } => None,
        }
    }

    /// Names of the types this type hard-depends on.
    pub fn hard_dependencies(&self) -> impl Iterator<Item = &str> {
        self.hard_foreign_keys.iter().map(|fk| fk.target.as_str())
    }
}

/// Resolved read filter for a type, with the parent's columns inlined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeFilter {
    Column {
        table: String,
        primary_key: String,
        tenant_field: String,
    },
    Parent {
        table: String,
        primary_key: String,
        parent_field: String,
        parent_table: String,
        parent_primary_key: String,
        parent_tenant_field: String,
    },
}

impl ScopeFilter {
    pub fn table(&self) -> &str {
        match self {
            ScopeFilter::Column { table, .. } | ScopeFilter::Parent { table, .. } => table,
        }
    }

    pub fn primary_key(&self) -> &str {
        match self {
            ScopeFilter::Column { primary_key, .. } | ScopeFilter::Parent { primary_key, .. } => {
                primary_key
            }
        }
    }
}

// =============================================================================
// CLONE RESULTS
// =============================================================================

/// Classification of a row that could not be cloned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorKind {
    /// Required field, type or check constraint rejected the row.
    Validation,
    /// The store rejected a reference the repairer did not catch.
    ForeignKey,
    /// A tenant-scoped uniqueness constraint collided.
    Duplicate,
    /// A hard FK had no mapping in its fully processed target type.
    UnresolvedReference,
    /// Any other store failure.
    Store,
    /// The job was cancelled before the row was written.
    Cancelled,
}

impl RowErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowErrorKind::Validation => "validation",
            RowErrorKind::ForeignKey => "foreign_key",
            RowErrorKind::Duplicate => "duplicate",
            RowErrorKind::UnresolvedReference => "unresolved_reference",
            RowErrorKind::Store => "store",
            RowErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RowErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One source row that did not make it into the target tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFailure {
    /// `None` when the source row had no readable primary key.
    pub source_id: Option<RecordId>,
    pub kind: RowErrorKind,
    pub reason: String,
}

/// Why a soft reference was nulled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairKind {
    /// Target exists in the source tenant but is not part of this clone.
    OutsideCloneScope,
    /// Target does not exist in the source tenant at all.
    DanglingReference,
    /// Target was not mapped and the FK is not validated.
    Unverified,
}

/// Informational note: a soft FK was nulled on a cloned row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairNote {
    pub source_id: Option<RecordId>,
    pub field: String,
    pub target: String,
    pub original: RecordId,
    pub kind: RepairKind,
}

/// Outcome of one entity type within a clone job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntityCloneStatus {
    /// Every source row was inserted.
    Completed,
    /// Some rows were inserted, some failed.
    PartiallyCompleted,
    /// Source rows existed but none were inserted, or the read failed.
    Failed,
    /// Not attempted because a hard dependency failed.
    SkippedDueToDependencyFailure { blocked_by: String },
    /// The job was cancelled before or during this type.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCloneResult {
    pub type_name: String,
    pub source_row_count: usize,
    pub inserted_count: usize,
    pub failed_rows: Vec<RowFailure>,
    pub repaired_references: Vec<RepairNote>,
    #[serde(flatten)]
    pub status: EntityCloneStatus,
    /// Type-level failure, e.g. the source read itself failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EntityCloneResult {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            source_row_count: 0,
            inserted_count: 0,
            failed_rows: Vec::new(),
            repaired_references: Vec::new(),
            status: EntityCloneStatus::Completed,
            error: None,
        }
    }

    pub fn skipped(type_name: impl Into<String>, blocked_by: impl Into<String>) -> Self {
        Self {
            status: EntityCloneStatus::SkippedDueToDependencyFailure {
                blocked_by: blocked_by.into(),
            },
            ..Self::new(type_name)
        }
    }

    /// A type whose pass could not run to completion.
    pub fn failed(type_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: EntityCloneStatus::Failed,
            error: Some(error.into()),
            ..Self::new(type_name)
        }
    }

    pub fn cancelled(type_name: impl Into<String>) -> Self {
        Self {
            status: EntityCloneStatus::Cancelled,
            ..Self::new(type_name)
        }
    }

    /// Derive the status from the counters once the pass has finished.
    pub fn settle(&mut self, cancelled: bool) {
        self.status = if cancelled {
            EntityCloneStatus::Cancelled
        } else if self.error.is_some()
            || (self.source_row_count > 0 && self.inserted_count == 0)
        {
            EntityCloneStatus::Failed
        } else if self.failed_rows.is_empty() {
            EntityCloneStatus::Completed
        } else {
            EntityCloneStatus::PartiallyCompleted
        };
    }

    /// True when downstream hard dependants must not be attempted.
    pub fn blocks_dependants(&self) -> bool {
        matches!(
            self.status,
            EntityCloneStatus::Failed
                | EntityCloneStatus::SkippedDueToDependencyFailure { .. }
                | EntityCloneStatus::Cancelled
        )
    }
}

/// How a finished clone job should be presented to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneOutcome {
    Succeeded,
    PartiallySucceeded,
}

/// Structured outcome of one clone job, itemized per entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneReport {
    pub job_id: Uuid,
    pub source_organization_id: Uuid,
    pub new_organization_id: Uuid,
    pub results: Vec<EntityCloneResult>,
    pub success: bool,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CloneReport {
    pub fn outcome(&self) -> CloneOutcome {
        if self.success {
            CloneOutcome::Succeeded
        } else {
            CloneOutcome::PartiallySucceeded
        }
    }

    pub fn result(&self, type_name: &str) -> Option<&EntityCloneResult> {
        self.results.iter().find(|r| r.type_name == type_name)
    }

    pub fn total_inserted(&self) -> usize {
        self.results.iter().map(|r| r.inserted_count).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.results.iter().map(|r| r.failed_rows.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_id_from_json() {
        assert_eq!(RecordId::from_json(&json!(42)), Some(RecordId::Int(42)));
        assert_eq!(
            RecordId::from_json(&json!("abc")),
            Some(RecordId::Text("abc".to_string()))
        );
        assert_eq!(RecordId::from_json(&JsonValue::Null), None);
        assert_eq!(RecordId::from_json(&json!(1.5)), None);
        assert_eq!(RecordId::from_json(&json!({"id": 1})), None);
    }

    #[test]
    fn test_record_id_serializes_untagged() {
        assert_eq!(serde_json::to_value(RecordId::Int(7)).unwrap(), json!(7));
        assert_eq!(
            serde_json::to_value(RecordId::from("x")).unwrap(),
            json!("x")
        );
    }

    #[test]
    fn test_scoped_by_parent_declares_hard_fk() {
        let desc = EntityTypeDescriptor::new("inventory")
            .scoped_by_parent("pricing_plan_id", "pricingplan");

        assert_eq!(desc.tenant_column(), None);
        assert_eq!(
            desc.hard_foreign_keys,
            vec![ForeignKey {
                field: "pricing_plan_id".to_string(),
                target: "pricingplan".to_string(),
            }]
        );
    }

    #[test]
    fn test_scoped_by_parent_does_not_duplicate_existing_fk() {
        let desc = EntityTypeDescriptor::new("pricingplan_features")
            .hard_fk("pricingplan_id", "pricingplan")
            .scoped_by_parent("pricingplan_id", "pricingplan");
        assert_eq!(desc.hard_foreign_keys.len(), 1);
    }

    #[test]
    fn test_settle_status() {
        let mut result = EntityCloneResult::new("product");
        result.settle(false);
        assert_eq!(result.status, EntityCloneStatus::Completed);

        result.source_row_count = 3;
        result.settle(false);
        assert_eq!(result.status, EntityCloneStatus::Failed);
        assert!(result.blocks_dependants());

        result.inserted_count = 2;
        result.failed_rows.push(RowFailure {
            source_id: Some(RecordId::Int(1)),
            kind: RowErrorKind::Duplicate,
            reason: "slug".to_string(),
        });
        result.settle(false);
        assert_eq!(result.status, EntityCloneStatus::PartiallyCompleted);
        assert!(!result.blocks_dependants());

        result.settle(true);
        assert_eq!(result.status, EntityCloneStatus::Cancelled);
    }

    #[test]
    fn test_result_serializes_status_inline() {
        let result = EntityCloneResult::skipped("pricingplan", "product");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "skipped_due_to_dependency_failure");
        assert_eq!(value["blocked_by"], "product");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_override_values() {
        let literal = OverrideValue::Literal(json!(100));
        assert_eq!(literal.resolve(Some(&json!(3)), None), Some(json!(100)));

        let name = OverrideValue::TargetName;
        assert_eq!(name.resolve(Some(&json!("Acme")), Some("Acme Copy")), Some(json!("Acme Copy")));
        assert_eq!(name.resolve(Some(&json!("Acme")), None), None);

        let fallback = OverrideValue::SourceOrTargetName;
        assert_eq!(fallback.resolve(Some(&json!("Shop | Acme")), Some("Copy")), None);
        assert_eq!(fallback.resolve(Some(&json!("")), Some("Copy")), Some(json!("Copy")));
        assert_eq!(fallback.resolve(Some(&JsonValue::Null), Some("Copy")), Some(json!("Copy")));
        assert_eq!(fallback.resolve(None, Some("Copy")), Some(json!("Copy")));
    }

    #[test]
    fn test_failed_result_blocks_dependants() {
        let result = EntityCloneResult::failed("product", "duplicate mapping");
        assert_eq!(result.status, EntityCloneStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("duplicate mapping"));
        assert!(result.blocks_dependants());
    }
}
