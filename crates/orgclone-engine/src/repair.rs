//! Reference repairer.
//!
//! Resolves one soft foreign-key value for a row being cloned. A soft
//! reference either follows its target into the clone or is nulled; it is
//! never left pointing at the source tenant's row.

use serde_json::Value as JsonValue;
use tracing::{trace, warn};
use uuid::Uuid;

use orgclone_core::{
    Error, RecordId, RepairKind, Result, SchemaRegistry, SoftForeignKey, SourceSnapshotReader,
};

use crate::remap::IdRemapper;

/// How a soft reference was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The source value was already null.
    Null,
    /// The target row was cloned; use its new id.
    Mapped(RecordId),
    /// The reference was nulled.
    Repaired { original: RecordId, kind: RepairKind },
}

impl Resolution {
    /// Value to write into the cloned row.
    pub fn value(&self) -> JsonValue {
        match self {
            Resolution::Mapped(id) => id.to_json(),
            Resolution::Null | Resolution::Repaired { .. } => JsonValue::Null,
        }
    }
}

/// Job-scoped soft reference resolver.
pub struct ReferenceRepairer<'a> {
    reader: &'a dyn SourceSnapshotReader,
    registry: &'a SchemaRegistry,
    remapper: &'a IdRemapper,
    source_org: Uuid,
}

impl<'a> ReferenceRepairer<'a> {
    pub fn new(
        reader: &'a dyn SourceSnapshotReader,
        registry: &'a SchemaRegistry,
        remapper: &'a IdRemapper,
        source_org: Uuid,
    ) -> Self {
        Self {
            reader,
            registry,
            remapper,
            source_org,
        }
    }

    /// Resolve `value`, the source row's content of `fk.field`.
    ///
    /// Errors only when the value is not an id or the validation query
    /// fails; the caller turns both into a row failure.
    pub async fn resolve(&self, fk: &SoftForeignKey, value: Option<&JsonValue>) -> Result<Resolution> {
        let value = match value {
            None | Some(JsonValue::Null) => return Ok(Resolution::Null),
            Some(v) => v,
        };
        let original = RecordId::from_json(value).ok_or_else(|| {
            Error::InvalidInput(format!(
                "{} holds a non-scalar reference: {}",
                fk.field, value
            ))
        })?;

        if let Some(new_id) = self.remapper.lookup(&fk.target, &original) {
            trace!(
                subsystem = "engine",
                component = "repairer",
                field = %fk.field,
                source_id = %original,
                new_id = %new_id,
                "Soft reference follows clone"
            );
            return Ok(Resolution::Mapped(new_id.clone()));
        }

        let kind = if fk.validate_against_source_tenant {
            let scope = self.registry.scope_filter(&fk.target)?;
            let in_source = self
                .reader
                .row_in_tenant(&scope, &original, self.source_org)
                .await?;
            if in_source {
                RepairKind::OutsideCloneScope
            } else {
                RepairKind::DanglingReference
            }
        } else {
            RepairKind::Unverified
        };

        warn!(
            subsystem = "engine",
            component = "repairer",
            field = %fk.field,
            target = %fk.target,
            reference = %original,
            repair = ?kind,
            "Soft reference nulled"
        );

        Ok(Resolution::Repaired { original, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use orgclone_core::commerce_registry;
    use serde_json::json;

    fn course_fk(validate: bool) -> SoftForeignKey {
        SoftForeignKey {
            field: "course_connected_id".to_string(),
            target: "course".to_string(),
            validate_against_source_tenant: validate,
        }
    }

    #[tokio::test]
    async fn test_null_is_noop() {
        let store = InMemoryStore::new();
        let registry = commerce_registry().unwrap();
        let remapper = IdRemapper::new();
        let repairer = ReferenceRepairer::new(&store, &registry, &remapper, Uuid::new_v4());

        let fk = course_fk(true);
        assert_eq!(repairer.resolve(&fk, None).await.unwrap(), Resolution::Null);
        assert_eq!(
            repairer.resolve(&fk, Some(&JsonValue::Null)).await.unwrap(),
            Resolution::Null
        );
    }

    #[tokio::test]
    async fn test_mapped_reference_follows_clone() {
        let store = InMemoryStore::new();
        let registry = commerce_registry().unwrap();
        let mut remapper = IdRemapper::new();
        remapper
            .record_mapping("course", RecordId::Int(7), RecordId::Int(70))
            .unwrap();
        let repairer = ReferenceRepairer::new(&store, &registry, &remapper, Uuid::new_v4());

        let resolution = repairer.resolve(&course_fk(true), Some(&json!(7))).await.unwrap();
        assert_eq!(resolution, Resolution::Mapped(RecordId::Int(70)));
        assert_eq!(resolution.value(), json!(70));
    }

    #[tokio::test]
    async fn test_existing_but_uncloned_target_is_nulled() {
        let org = Uuid::new_v4();
        let store = InMemoryStore::new()
            .with_row("course", json!({"id": 7, "organization_id": org.to_string()}));
        let registry = commerce_registry().unwrap();
        let remapper = IdRemapper::new();
        let repairer = ReferenceRepairer::new(&store, &registry, &remapper, org);

        let resolution = repairer.resolve(&course_fk(true), Some(&json!(7))).await.unwrap();
        assert_eq!(
            resolution,
            Resolution::Repaired {
                original: RecordId::Int(7),
                kind: RepairKind::OutsideCloneScope,
            }
        );
        assert_eq!(resolution.value(), JsonValue::Null);
    }

    #[tokio::test]
    async fn test_other_tenants_row_is_dangling() {
        let org = Uuid::new_v4();
        let store = InMemoryStore::new().with_row(
            "course",
            json!({"id": 999, "organization_id": Uuid::new_v4().to_string()}),
        );
        let registry = commerce_registry().unwrap();
        let remapper = IdRemapper::new();
        let repairer = ReferenceRepairer::new(&store, &registry, &remapper, org);

        let resolution = repairer
            .resolve(&course_fk(true), Some(&json!(999)))
            .await
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Repaired {
                original: RecordId::Int(999),
                kind: RepairKind::DanglingReference,
            }
        );
    }

    #[tokio::test]
    async fn test_unvalidated_reference_is_nulled_without_query() {
        let store = InMemoryStore::new();
        let registry = commerce_registry().unwrap();
        let remapper = IdRemapper::new();
        let repairer = ReferenceRepairer::new(&store, &registry, &remapper, Uuid::new_v4());

        let resolution = repairer.resolve(&course_fk(false), Some(&json!(3))).await.unwrap();
        assert_eq!(
            resolution,
            Resolution::Repaired {
                original: RecordId::Int(3),
                kind: RepairKind::Unverified,
            }
        );
    }

    #[tokio::test]
    async fn test_non_scalar_reference_is_rejected() {
        let store = InMemoryStore::new();
        let registry = commerce_registry().unwrap();
        let remapper = IdRemapper::new();
        let repairer = ReferenceRepairer::new(&store, &registry, &remapper, Uuid::new_v4());

        let err = repairer
            .resolve(&course_fk(true), Some(&json!([1, 2])))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
