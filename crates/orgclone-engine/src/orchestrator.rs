//! Clone orchestrator.
//!
//! Drives one clone job end to end: pre-flight checks, dependency ordering,
//! rank-by-rank type passes, id mapping and the final report. Everything
//! that can abort the job is checked before the first write; after that the
//! job always finishes with a [`CloneReport`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use orgclone_core::{
    CloneReport, EntityCloneResult, EntityCloneStatus, EntityTypeDescriptor, Error, Result,
    SchemaRegistry, SourceSnapshotReader, TargetWriter,
};

use crate::cancel::CancelSignal;
use crate::cloner::{BatchCloner, CloneContext, TypeCloneOutcome};
use crate::config::CloneConfig;
use crate::ordering::{self, DependencyOrder, OrderedType};
use crate::remap::IdRemapper;

/// Lifecycle of a clone job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    /// Index into the ordered type sequence of the first type in the rank
    /// currently being cloned.
    Running { current_type_index: usize },
    Completed,
    Aborted(String),
}

/// One invocation of the cloning operation. Lives only for the call.
#[derive(Debug)]
pub struct CloneJob {
    pub id: Uuid,
    pub source_org: Uuid,
    pub target_org: Uuid,
    pub ordered_types: Vec<Arc<EntityTypeDescriptor>>,
    state: JobState,
}

impl CloneJob {
    pub fn new(source_org: Uuid, target_org: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            source_org,
            target_org,
            ordered_types: Vec::new(),
            state: JobState::Pending,
        }
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    fn advance(&mut self, current_type_index: usize) {
        debug!(
            subsystem = "engine",
            component = "orchestrator",
            job_id = %self.id,
            current_type_index,
            "Job advanced"
        );
        self.state = JobState::Running { current_type_index };
    }

    fn complete(&mut self) {
        self.state = JobState::Completed;
    }

    fn abort(&mut self, err: &Error) {
        self.state = JobState::Aborted(err.to_string());
    }
}

/// Dry-run view of what a clone would do, in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct ClonePlan {
    pub entity_types: Vec<OrderedType>,
    pub rank_count: usize,
    /// Registered types that are referenced but never copied.
    pub reference_only: Vec<String>,
}

impl ClonePlan {
    pub fn for_registry(registry: &SchemaRegistry) -> Result<Self> {
        let order = ordering::order(&registry.cloneable())?;
        Ok(Self {
            entity_types: order.describe(),
            rank_count: order.ranks().len(),
            reference_only: registry
                .all()
                .iter()
                .filter(|d| d.reference_only)
                .map(|d| d.name.clone())
                .collect(),
        })
    }
}

/// Parameters of one clone job.
#[derive(Debug, Clone)]
pub struct CloneRequest {
    pub source_org: Uuid,
    /// Must already exist; the caller creates it.
    pub target_org: Uuid,
    /// Name of the new organization. Name overrides are left untouched
    /// when absent.
    pub target_name: Option<String>,
    pub cancel: CancelSignal,
}

impl CloneRequest {
    pub fn new(source_org: Uuid, target_org: Uuid) -> Self {
        Self {
            source_org,
            target_org,
            target_name: None,
            cancel: CancelSignal::never(),
        }
    }

    pub fn with_target_name(mut self, name: impl Into<String>) -> Self {
        self.target_name = Some(name.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }
}

pub struct CloneOrchestrator {
    registry: Arc<SchemaRegistry>,
    reader: Arc<dyn SourceSnapshotReader>,
    writer: Arc<dyn TargetWriter>,
    config: CloneConfig,
}

impl CloneOrchestrator {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        reader: Arc<dyn SourceSnapshotReader>,
        writer: Arc<dyn TargetWriter>,
    ) -> Self {
        Self {
            registry,
            reader,
            writer,
            config: CloneConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CloneConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &CloneConfig {
        &self.config
    }

    /// Order the registry without touching either store.
    pub fn plan(&self) -> Result<ClonePlan> {
        ClonePlan::for_registry(&self.registry)
    }

    /// Copy every registered entity of `source_org` into `target_org`.
    pub async fn clone(&self, source_org: Uuid, target_org: Uuid) -> Result<CloneReport> {
        self.execute(CloneRequest::new(source_org, target_org)).await
    }

    /// Like [`clone`](Self::clone), stopping early once `cancel` fires.
    pub async fn clone_with_cancel(
        &self,
        source_org: Uuid,
        target_org: Uuid,
        cancel: CancelSignal,
    ) -> Result<CloneReport> {
        self.execute(CloneRequest::new(source_org, target_org).with_cancel(cancel))
            .await
    }

    /// Run one clone job.
    ///
    /// Returns `Err` only for pre-flight failures (same or missing
    /// organization, unknown type, dependency cycle), in which case nothing
    /// was written. Once writes begin the job always yields a report; a type
    /// pass that errors is reported as a failed type.
    #[instrument(
        skip_all,
        fields(
            subsystem = "engine",
            component = "orchestrator",
            source_org = %request.source_org,
            target_org = %request.target_org,
        )
    )]
    pub async fn execute(&self, request: CloneRequest) -> Result<CloneReport> {
        let CloneRequest {
            source_org,
            target_org,
            target_name,
            cancel,
        } = request;
        let started_at = Utc::now();
        let start = Instant::now();
        let mut job = CloneJob::new(source_org, target_org);

        info!(
            subsystem = "engine",
            component = "orchestrator",
            op = "clone",
            job_id = %job.id,
            source_org = %source_org,
            target_org = %target_org,
            target_name = target_name.as_deref().unwrap_or(""),
            "Clone job started"
        );

        let order = match self.preflight(&mut job).await {
            Ok(order) => order,
            Err(e) => {
                job.abort(&e);
                error!(
                    subsystem = "engine",
                    component = "orchestrator",
                    job_id = %job.id,
                    error = %e,
                    "Clone job aborted before any writes"
                );
                return Err(e);
            }
        };

        let ctx = CloneContext {
            job_id: job.id,
            source_org,
            target_org,
            target_name,
            cancel,
        };
        let results = self.run(&mut job, &order, &ctx).await;
        job.complete();

        let report = CloneReport {
            job_id: job.id,
            source_organization_id: source_org,
            new_organization_id: target_org,
            success: results
                .iter()
                .all(|r| r.status == EntityCloneStatus::Completed),
            cancelled: ctx.cancel.is_cancelled()
                || results
                    .iter()
                    .any(|r| r.status == EntityCloneStatus::Cancelled),
            results,
            started_at,
            finished_at: Utc::now(),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        if report.success {
            info!(
                subsystem = "engine",
                component = "orchestrator",
                job_id = %job.id,
                inserted_count = report.total_inserted(),
                duration_ms,
                "Clone job succeeded"
            );
        } else {
            warn!(
                subsystem = "engine",
                component = "orchestrator",
                job_id = %job.id,
                inserted_count = report.total_inserted(),
                failed_count = report.total_failed(),
                cancelled = report.cancelled,
                duration_ms,
                "Clone job partially succeeded"
            );
        }

        Ok(report)
    }

    async fn preflight(&self, job: &mut CloneJob) -> Result<DependencyOrder> {
        if job.source_org == job.target_org {
            return Err(Error::SameOrganization(job.source_org));
        }
        if !self.reader.organization_exists(job.source_org).await? {
            return Err(Error::OrganizationNotFound(job.source_org));
        }
        if !self.writer.organization_exists(job.target_org).await? {
            return Err(Error::OrganizationNotFound(job.target_org));
        }

        let order = ordering::order(&self.registry.cloneable())?;
        job.ordered_types = order.sequence().to_vec();
        debug!(
            subsystem = "engine",
            component = "orchestrator",
            job_id = %job.id,
            types = ?order.names(),
            "Clone order resolved"
        );
        Ok(order)
    }

    async fn run(
        &self,
        job: &mut CloneJob,
        order: &DependencyOrder,
        ctx: &CloneContext,
    ) -> Vec<EntityCloneResult> {
        let cloner = BatchCloner::new(
            self.reader.as_ref(),
            self.writer.as_ref(),
            &self.registry,
            self.config.row_concurrency,
        );
        let mut remapper = IdRemapper::new();
        let mut results: HashMap<String, EntityCloneResult> = HashMap::new();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut index = 0;

        for rank in order.ranks() {
            job.advance(index);
            index += rank.len();

            let mut runnable = Vec::with_capacity(rank.len());
            for descriptor in rank {
                if ctx.cancel.is_cancelled() {
                    blocked.insert(descriptor.name.clone());
                    results.insert(
                        descriptor.name.clone(),
                        EntityCloneResult::cancelled(&descriptor.name),
                    );
                    continue;
                }
                if let Some(dep) = descriptor
                    .hard_dependencies()
                    .find(|dep| blocked.contains(*dep))
                {
                    warn!(
                        subsystem = "engine",
                        component = "orchestrator",
                        job_id = %ctx.job_id,
                        entity_type = %descriptor.name,
                        blocked_by = dep,
                        "Skipping entity type, dependency failed"
                    );
                    let skipped = EntityCloneResult::skipped(&descriptor.name, dep);
                    blocked.insert(descriptor.name.clone());
                    results.insert(descriptor.name.clone(), skipped);
                    continue;
                }
                runnable.push(descriptor);
            }

            let outcomes: Vec<_> = stream::iter(runnable.into_iter().map(|descriptor| {
                let remapper = &remapper;
                let cloner = &cloner;
                async move {
                    let outcome = cloner.clone_type(ctx, descriptor, remapper).await;
                    (descriptor, outcome)
                }
            }))
            .buffered(self.config.type_concurrency.max(1))
            .collect()
            .await;

            for (descriptor, outcome) in outcomes {
                let result = match outcome {
                    Ok(outcome) => record_mappings(ctx, &mut remapper, descriptor, outcome),
                    Err(e) => {
                        error!(
                            subsystem = "engine",
                            component = "orchestrator",
                            job_id = %ctx.job_id,
                            entity_type = %descriptor.name,
                            error = %e,
                            "Entity type pass failed"
                        );
                        EntityCloneResult::failed(&descriptor.name, e.to_string())
                    }
                };
                remapper.mark_complete(&descriptor.name);
                if result.blocks_dependants() {
                    blocked.insert(descriptor.name.clone());
                }
                results.insert(descriptor.name.clone(), result);
            }
        }

        order
            .sequence()
            .iter()
            .filter_map(|descriptor| results.remove(&descriptor.name))
            .collect()
    }
}

/// Record every mapping of a finished type pass. A conflicting mapping fails
/// the whole type: dependants could not tell which copy a source id names.
fn record_mappings(
    ctx: &CloneContext,
    remapper: &mut IdRemapper,
    descriptor: &EntityTypeDescriptor,
    outcome: TypeCloneOutcome,
) -> EntityCloneResult {
    let mut result = outcome.result;
    for (old_id, new_id) in outcome.mappings {
        if let Err(e) = remapper.record_mapping(&descriptor.name, old_id, new_id) {
            error!(
                subsystem = "engine",
                component = "orchestrator",
                job_id = %ctx.job_id,
                entity_type = %descriptor.name,
                error = %e,
                "Conflicting id mapping"
            );
            result.error.get_or_insert_with(|| e.to_string());
        }
    }
    if result.error.is_some() {
        result.status = EntityCloneStatus::Failed;
    }
    result
}
