//! Batch cloner.
//!
//! Clones every source row of one entity type into the target tenant.
//! Row failures are isolated: a row that cannot be prepared or inserted is
//! recorded with its reason and the remaining rows continue.

use std::collections::HashSet;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use orgclone_core::{
    EntityCloneResult, EntityTypeDescriptor, Error, RecordId, RepairNote, Result, Row,
    RowErrorKind, RowFailure, SchemaRegistry, SourceSnapshotReader, TargetWriter,
};

use crate::cancel::CancelSignal;
use crate::remap::IdRemapper;
use crate::repair::{ReferenceRepairer, Resolution};

/// Per-job values shared by every type pass.
#[derive(Debug, Clone)]
pub struct CloneContext {
    pub job_id: Uuid,
    pub source_org: Uuid,
    pub target_org: Uuid,
    /// Name of the new organization, used by name overrides.
    pub target_name: Option<String>,
    pub cancel: CancelSignal,
}

/// Result of one type pass plus the id pairs the caller must record.
#[derive(Debug, Clone)]
pub struct TypeCloneOutcome {
    pub result: EntityCloneResult,
    /// `(source_id, new_id)` for every inserted row, in source order.
    pub mappings: Vec<(RecordId, RecordId)>,
}

enum RowOutcome {
    Inserted {
        source_id: RecordId,
        new_id: RecordId,
        repairs: Vec<RepairNote>,
    },
    Failed(RowFailure),
}

pub struct BatchCloner<'a> {
    reader: &'a dyn SourceSnapshotReader,
    writer: &'a dyn TargetWriter,
    registry: &'a SchemaRegistry,
    row_concurrency: usize,
}

impl<'a> BatchCloner<'a> {
    pub fn new(
        reader: &'a dyn SourceSnapshotReader,
        writer: &'a dyn TargetWriter,
        registry: &'a SchemaRegistry,
        row_concurrency: usize,
    ) -> Self {
        Self {
            reader,
            writer,
            registry,
            row_concurrency: row_concurrency.max(1),
        }
    }

    /// Clone all rows of `descriptor` owned by the source tenant.
    ///
    /// Every hard dependency must already be complete in `remapper`;
    /// otherwise this returns [`Error::OrderingViolation`] without touching
    /// the store. A failed source read is reported as a `Failed` type result,
    /// not as an error.
    #[instrument(
        skip_all,
        fields(
            subsystem = "engine",
            component = "cloner",
            job_id = %ctx.job_id,
            entity_type = %descriptor.name,
        )
    )]
    pub async fn clone_type(
        &self,
        ctx: &CloneContext,
        descriptor: &EntityTypeDescriptor,
        remapper: &IdRemapper,
    ) -> Result<TypeCloneOutcome> {
        for dep in descriptor.hard_dependencies() {
            if !remapper.is_complete(dep) {
                return Err(Error::OrderingViolation {
                    entity_type: descriptor.name.clone(),
                    depends_on: dep.to_string(),
                });
            }
        }

        let mut result = EntityCloneResult::new(&descriptor.name);
        if ctx.cancel.is_cancelled() {
            result.settle(true);
            return Ok(TypeCloneOutcome {
                result,
                mappings: Vec::new(),
            });
        }

        let start = Instant::now();
        let scope = self.registry.scope_filter(&descriptor.name)?;
        let rows = match self.reader.fetch_rows(&scope, ctx.source_org).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "Source read failed");
                result.error = Some(e.to_string());
                result.settle(false);
                return Ok(TypeCloneOutcome {
                    result,
                    mappings: Vec::new(),
                });
            }
        };
        result.source_row_count = rows.len();
        debug!(row_count = rows.len(), "Fetched source rows");

        let repairer =
            ReferenceRepairer::new(self.reader, self.registry, remapper, ctx.source_org);

        // Rows not yet handed to a worker when cancellation fires are never
        // attempted; they surface below as gaps in the outcome indices.
        let row_ids: Vec<Option<RecordId>> = rows
            .iter()
            .map(|row| row.get(&descriptor.primary_key).and_then(RecordId::from_json))
            .collect();
        let mut outcomes: Vec<(usize, RowOutcome)> = stream::iter(rows.into_iter().enumerate())
            .take_until(ctx.cancel.cancelled())
            .map(|(index, row)| {
                let repairer = &repairer;
                async move {
                    let outcome = self
                        .clone_row(ctx, descriptor, remapper, repairer, row)
                        .await;
                    (index, outcome)
                }
            })
            .buffer_unordered(self.row_concurrency)
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _)| *index);
        if outcomes.len() < row_ids.len() {
            let attempted: HashSet<usize> = outcomes.iter().map(|(index, _)| *index).collect();
            let skipped: Vec<(usize, RowOutcome)> = row_ids
                .into_iter()
                .enumerate()
                .filter(|(index, _)| !attempted.contains(index))
                .map(|(index, source_id)| (index, RowOutcome::Failed(cancelled_row(source_id))))
                .collect();
            outcomes.extend(skipped);
            outcomes.sort_by_key(|(index, _)| *index);
        }

        let mut mappings = Vec::with_capacity(outcomes.len());
        let mut cancelled = false;
        for (_, outcome) in outcomes {
            match outcome {
                RowOutcome::Inserted {
                    source_id,
                    new_id,
                    repairs,
                } => {
                    result.inserted_count += 1;
                    result.repaired_references.extend(repairs);
                    mappings.push((source_id, new_id));
                }
                RowOutcome::Failed(failure) => {
                    cancelled |= failure.kind == RowErrorKind::Cancelled;
                    result.failed_rows.push(failure);
                }
            }
        }
        result.settle(cancelled);

        let duration_ms = start.elapsed().as_millis() as u64;
        if result.failed_rows.is_empty() {
            info!(
                row_count = result.source_row_count,
                inserted_count = result.inserted_count,
                repaired_count = result.repaired_references.len(),
                duration_ms,
                "Entity type cloned"
            );
        } else {
            warn!(
                row_count = result.source_row_count,
                inserted_count = result.inserted_count,
                failed_count = result.failed_rows.len(),
                repaired_count = result.repaired_references.len(),
                status = ?result.status,
                duration_ms,
                "Entity type cloned with failures"
            );
        }

        Ok(TypeCloneOutcome { result, mappings })
    }

    async fn clone_row(
        &self,
        ctx: &CloneContext,
        descriptor: &EntityTypeDescriptor,
        remapper: &IdRemapper,
        repairer: &ReferenceRepairer<'_>,
        row: Row,
    ) -> RowOutcome {
        let Some(source_id) = row
            .get(&descriptor.primary_key)
            .and_then(RecordId::from_json)
        else {
            return RowOutcome::Failed(RowFailure {
                source_id: None,
                kind: RowErrorKind::Validation,
                reason: format!("missing primary key {}", descriptor.primary_key),
            });
        };

        let (prepared, repairs) =
            match prepare_row(ctx, descriptor, remapper, repairer, &source_id, row).await {
                Ok(prepared) => prepared,
                Err(failure) => return RowOutcome::Failed(failure),
            };

        if ctx.cancel.is_cancelled() {
            return RowOutcome::Failed(cancelled_row(Some(source_id)));
        }

        match self
            .writer
            .insert_row(&descriptor.name, &descriptor.primary_key, prepared)
            .await
        {
            Ok(new_id) => {
                trace!(source_id = %source_id, new_id = %new_id, "Row cloned");
                RowOutcome::Inserted {
                    source_id,
                    new_id,
                    repairs,
                }
            }
            Err(e) => {
                warn!(source_id = %source_id, error_kind = %e.kind, error = %e.message, "Row insert failed");
                RowOutcome::Failed(RowFailure {
                    source_id: Some(source_id),
                    kind: e.kind,
                    reason: e.message,
                })
            }
        }
    }
}

fn cancelled_row(source_id: Option<RecordId>) -> RowFailure {
    RowFailure {
        source_id,
        kind: RowErrorKind::Cancelled,
        reason: "clone job cancelled".to_string(),
    }
}

/// Rewrite a source row for the target tenant.
///
/// Field order of operations: drop the primary key and excluded fields,
/// retarget the tenant column, remap hard and shared references, resolve
/// soft references, then apply overrides.
async fn prepare_row(
    ctx: &CloneContext,
    descriptor: &EntityTypeDescriptor,
    remapper: &IdRemapper,
    repairer: &ReferenceRepairer<'_>,
    source_id: &RecordId,
    mut row: Row,
) -> std::result::Result<(Row, Vec<RepairNote>), RowFailure> {
    let fail = |kind: RowErrorKind, reason: String| RowFailure {
        source_id: Some(source_id.clone()),
        kind,
        reason,
    };

    row.remove(&descriptor.primary_key);
    for field in &descriptor.excluded_fields {
        row.remove(field);
    }
    if let Some(column) = descriptor.tenant_column() {
        row.insert(
            column.to_string(),
            JsonValue::String(ctx.target_org.to_string()),
        );
    }

    for fk in &descriptor.hard_foreign_keys {
        let old = match row.get(&fk.field) {
            None | Some(JsonValue::Null) => continue,
            Some(value) => RecordId::from_json(value).ok_or_else(|| {
                fail(
                    RowErrorKind::Validation,
                    format!("{} holds a non-scalar reference", fk.field),
                )
            })?,
        };
        let new_id = remapper.lookup(&fk.target, &old).ok_or_else(|| {
            fail(
                RowErrorKind::UnresolvedReference,
                format!("{} = {} has no clone in {}", fk.field, old, fk.target),
            )
        })?;
        row.insert(fk.field.clone(), new_id.to_json());
    }

    for shared in &descriptor.shared_references {
        if let Some(old) = row.get(&shared.field).and_then(RecordId::from_json) {
            let id = remapper.lookup_or_original(&shared.target, &old);
            row.insert(shared.field.clone(), id.to_json());
        }
    }

    let mut repairs = Vec::new();
    for fk in &descriptor.soft_foreign_keys {
        let resolution = repairer
            .resolve(fk, row.get(&fk.field))
            .await
            .map_err(|e| {
                let kind = match e {
                    Error::InvalidInput(_) => RowErrorKind::Validation,
                    _ => RowErrorKind::Store,
                };
                fail(kind, e.to_string())
            })?;
        match &resolution {
            Resolution::Null => continue,
            Resolution::Mapped(_) => {}
            Resolution::Repaired { original, kind } => repairs.push(RepairNote {
                source_id: Some(source_id.clone()),
                field: fk.field.clone(),
                target: fk.target.clone(),
                original: original.clone(),
                kind: *kind,
            }),
        }
        row.insert(fk.field.clone(), resolution.value());
    }

    for o in &descriptor.overrides {
        if let Some(value) = o
            .value
            .resolve(row.get(&o.field), ctx.target_name.as_deref())
        {
            row.insert(o.field.clone(), value);
        }
    }

    Ok((row, repairs))
}
