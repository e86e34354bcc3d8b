//! Batch driver - main harvest orchestration logic
//!
//! This module contains the loop that walks a job's work units:
//! - Resuming after the last checkpointed unit
//! - Skipping units whose output already exists
//! - Collecting every sub-source of a unit and containing their failures
//! - Filtering records to the unit's bounds and flushing them per entity
//! - Advancing the checkpoint after each unit commits
//!
//! Only persistence failures abort a run. Cancellation stops it between
//! units or sub-sources; the unit in flight is dropped and re-collected by
//! the next run.

use crate::config::ScheduleConfig;
use crate::crawler::fetcher::{FetchError, FetchStats};
use crate::crawler::pacing;
use crate::crawler::units::WorkUnit;
use crate::extract::Record;
use crate::output::RunReport;
use crate::state::DriverState;
use crate::storage::{resume_from, Checkpoint, CheckpointStore, RecordSink, StorageResult};
use crate::HarvestError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Records of one collection, keyed by entity name
pub type EntityBatch = BTreeMap<&'static str, Vec<Record>>;

/// A producer of records for (sub-source, unit) pairs
#[async_trait]
pub trait UnitSource<U: WorkUnit>: Send {
    /// Entities this source produces; a unit is complete when all of them
    /// have output
    fn entities(&self) -> Vec<&'static str>;

    /// Collects the records of one sub-source for one unit
    async fn collect(&mut self, sub_source: &str, unit: &U) -> Result<EntityBatch, HarvestError>;

    /// Fetch counters accumulated so far
    fn fetch_stats(&self) -> FetchStats {
        FetchStats::default()
    }
}

/// Fixed delays between pieces of work
#[derive(Debug, Clone, Copy)]
pub struct DriverSettings {
    pub unit_delay: Duration,
    pub sub_source_delay: Duration,
}

impl DriverSettings {
    pub fn from_config(config: &ScheduleConfig) -> Self {
        Self {
            unit_delay: Duration::from_secs(config.unit_delay_secs),
            sub_source_delay: Duration::from_secs(config.sub_source_delay_secs),
        }
    }

    /// No delays at all
    pub fn immediate() -> Self {
        Self {
            unit_delay: Duration::ZERO,
            sub_source_delay: Duration::ZERO,
        }
    }
}

/// How a single unit ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitOutcome {
    Committed,
    Skipped,
    Cancelled,
}

/// Walks work units, persisting output and checkpoints
pub struct BatchDriver<S, K> {
    job: String,
    source: S,
    sink: K,
    checkpoints: CheckpointStore,
    sub_sources: Vec<String>,
    settings: DriverSettings,
    cancel: CancellationToken,
    state: DriverState,
}

impl<S, K: RecordSink> BatchDriver<S, K> {
    /// Creates an idle driver
    ///
    /// # Arguments
    ///
    /// * `job` - Name used in logs and the run report
    /// * `source` - Producer of records per sub-source and unit
    /// * `sink` - Destination of committed records
    /// * `checkpoints` - Resume cursor store
    /// * `sub_sources` - Sub-sources collected for every unit, in order
    pub fn new(
        job: impl Into<String>,
        source: S,
        sink: K,
        checkpoints: CheckpointStore,
        sub_sources: Vec<String>,
    ) -> Self {
        Self {
            job: job.into(),
            source,
            sink,
            checkpoints,
            sub_sources,
            settings: DriverSettings::immediate(),
            cancel: CancellationToken::new(),
            state: DriverState::Idle,
        }
    }

    pub fn with_settings(mut self, settings: DriverSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    fn transition(&mut self, next: DriverState) {
        if !self.state.can_transition_to(next) {
            tracing::debug!("Unexpected driver transition {} -> {}", self.state, next);
        }
        tracing::debug!("Driver {}: {} -> {}", self.job, self.state, next);
        self.state = next;
    }

    fn finish(&mut self, report: &mut RunReport, state: DriverState) {
        self.transition(state);
        report.finish(state);
    }

    /// Runs the job over `full_range`
    ///
    /// The checkpoint, if present, trims the range to the units after it.
    ///
    /// # Returns
    ///
    /// A report whose state is `Completed`, `Aborted` (persistence failure,
    /// reason in `abort_reason`) or `Cancelled`.
    pub async fn run<U>(&mut self, full_range: Vec<U>) -> RunReport
    where
        U: WorkUnit,
        S: UnitSource<U>,
    {
        let mut report = RunReport::new(self.job.clone());

        if let Err(e) = self.sink.prepare() {
            tracing::error!("Cannot prepare output for {}: {}", self.job, e);
            report.abort_reason = Some(e.to_string());
            self.finish(&mut report, DriverState::Aborted);
            return report;
        }

        self.transition(DriverState::Running);

        let checkpoint = self.checkpoints.load::<U::Cursor>();
        if let Some(checkpoint) = &checkpoint {
            tracing::info!(
                "Resuming {} after checkpoint {:?}",
                self.job,
                checkpoint.last_unit_end
            );
        }
        let units = resume_from(checkpoint.as_ref().map(|c| &c.last_unit_end), full_range);
        let total = units.len();
        tracing::info!("{}: {} units to process", self.job, total);

        for (index, unit) in units.iter().enumerate() {
            let label = unit.label();
            tracing::info!("Processing unit {} ({}/{})", label, index + 1, total);

            let outcome = self.process_unit(unit, &label, &mut report).await;
            report.fetch = self.source.fetch_stats();

            match outcome {
                Ok(UnitOutcome::Committed) => report.units_completed += 1,
                Ok(UnitOutcome::Skipped) => report.units_skipped += 1,
                Ok(UnitOutcome::Cancelled) => {
                    tracing::warn!("{} cancelled during unit {}", self.job, label);
                    self.finish(&mut report, DriverState::Cancelled);
                    return report;
                }
                Err(e) => {
                    tracing::error!("Aborting {} at unit {}: {}", self.job, label, e);
                    report.abort_reason = Some(e.to_string());
                    self.finish(&mut report, DriverState::Aborted);
                    return report;
                }
            }

            let is_last = index + 1 == total;
            if !is_last && !pacing::pause(self.settings.unit_delay, &self.cancel).await {
                tracing::warn!("{} cancelled after unit {}", self.job, label);
                self.finish(&mut report, DriverState::Cancelled);
                return report;
            }
        }

        tracing::info!(
            "{} completed: {} units committed, {} skipped, {} records",
            self.job,
            report.units_completed,
            report.units_skipped,
            report.total_records()
        );
        self.finish(&mut report, DriverState::Completed);
        report
    }

    /// Collects, filters and commits one unit
    async fn process_unit<U>(
        &mut self,
        unit: &U,
        label: &str,
        report: &mut RunReport,
    ) -> StorageResult<UnitOutcome>
    where
        U: WorkUnit,
        S: UnitSource<U>,
    {
        if self.cancel.is_cancelled() {
            return Ok(UnitOutcome::Cancelled);
        }

        let entities = self.source.entities();
        if !entities.is_empty() && entities.iter().all(|e| self.sink.has_unit(e, label)) {
            tracing::info!("Output for {} already exists, skipping", label);
            self.checkpoints.save(&Checkpoint::new(unit.end_marker()))?;
            return Ok(UnitOutcome::Skipped);
        }

        let mut batch: EntityBatch = entities.iter().map(|e| (*e, Vec::new())).collect();
        let sub_count = self.sub_sources.len();

        for (index, sub_source) in self.sub_sources.iter().enumerate() {
            match self.source.collect(sub_source, unit).await {
                Ok(collected) => {
                    for (entity, records) in collected {
                        batch.entry(entity).or_default().extend(records);
                    }
                }
                Err(HarvestError::Fetch(FetchError::Cancelled { .. })) => {
                    return Ok(UnitOutcome::Cancelled);
                }
                Err(e) => {
                    tracing::warn!("Skipping {} for unit {}: {}", sub_source, label, e);
                    report.sub_source_failures += 1;
                }
            }

            let is_last = index + 1 == sub_count;
            if !is_last && !pacing::pause(self.settings.sub_source_delay, &self.cancel).await {
                return Ok(UnitOutcome::Cancelled);
            }
        }

        for (entity, records) in batch {
            let collected = records.len();
            let kept = filter_to_unit(records, unit, label);
            if kept.len() < collected {
                tracing::debug!(
                    "Dropped {} {} outside unit {}",
                    collected - kept.len(),
                    entity,
                    label
                );
            }
            if kept.is_empty() {
                tracing::info!("No {} for unit {}", entity, label);
                continue;
            }

            let written = self.sink.write_unit(entity, label, &kept)?;
            report.add_records(entity, written);
        }

        self.checkpoints.save(&Checkpoint::new(unit.end_marker()))?;
        Ok(UnitOutcome::Committed)
    }
}

/// Keeps records timestamped inside the unit and tags them with its label
///
/// Records without a primary timestamp cannot be placed and are dropped.
pub fn filter_to_unit<U: WorkUnit>(records: Vec<Record>, unit: &U, label: &str) -> Vec<Record> {
    records
        .into_iter()
        .filter(|record| record.timestamp().is_some_and(|at| unit.contains(at)))
        .map(|record| record.with(U::LABEL_COLUMN, label))
        .collect()
}
