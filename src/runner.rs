//! Sequential execution of a plan: one unit at a time, stop on run-fatal
//! errors, journal every outcome.

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::db::connectors::{self, DatabaseConnector};
use crate::db::error::MigrationError;
use crate::db::migrator::{migrate_unit, MigrationUnit, UnitReport, UnitStatus};
use crate::db::rules::RuleSet;
use crate::plan::PlanFile;
use crate::security::{JournalEntry, JournalEvent, RunJournal};

/// Outcome of a whole run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub units: Vec<UnitReport>,
    /// Set when a run-fatal error stopped the run early.
    pub aborted: Option<MigrationError>,
}

impl RunSummary {
    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    pub fn count(&self, status: UnitStatus) -> usize {
        self.units.iter().filter(|u| u.status == status).count()
    }
}

fn record(journal: Option<&RunJournal>, entry: JournalEntry) {
    if let Some(journal) = journal {
        if let Err(e) = journal.append(&entry) {
            log::warn!("Failed to write run journal: {}", e);
        }
    }
}

fn unit_entry(run_id: &str, report: &UnitReport) -> JournalEntry {
    let event = match report.status {
        UnitStatus::Completed => JournalEvent::UnitCompleted,
        UnitStatus::CompletedWithErrors => JournalEvent::UnitCompletedWithErrors,
        UnitStatus::Skipped => JournalEvent::UnitSkipped,
        UnitStatus::Failed => JournalEvent::UnitFailed,
    };
    let entry = JournalEntry::new(run_id, event)
        .unit(&report.unit)
        .rows(report.rows_written() as u64, report.rows_deleted);
    match report.failure {
        Some(ref e) => entry.details(e.to_string()),
        None if !report.row_errors.is_empty() => {
            entry.details(format!("{} row(s) skipped with errors", report.row_errors.len()))
        }
        None => entry,
    }
}

/// Run `units` in order. `on_unit` is called once per finished unit.
pub async fn run_units<F>(
    source: &dyn DatabaseConnector,
    destination: &dyn DatabaseConnector,
    units: &[MigrationUnit],
    rules: &RuleSet,
    journal: Option<&RunJournal>,
    mut on_unit: F,
) -> RunSummary
where
    F: FnMut(&UnitReport),
{
    let run_id = Uuid::new_v4().to_string();
    record(
        journal,
        JournalEntry::new(&run_id, JournalEvent::RunStarted)
            .details(format!("{} unit(s)", units.len())),
    );
    log::info!("Run {} started with {} unit(s)", run_id, units.len());

    let mut summary = RunSummary {
        run_id,
        units: Vec::with_capacity(units.len()),
        aborted: None,
    };

    for unit in units {
        match migrate_unit(source, destination, unit, rules).await {
            Ok(report) => {
                record(journal, unit_entry(&summary.run_id, &report));
                on_unit(&report);
                summary.units.push(report);
            }
            Err(e) => {
                log::error!("Run aborted at {}: {}", unit.name, e);
                record(
                    journal,
                    JournalEntry::new(&summary.run_id, JournalEvent::RunAborted)
                        .unit(&unit.name)
                        .details(e.to_string()),
                );
                summary.aborted = Some(e);
                return summary;
            }
        }
    }

    record(
        journal,
        JournalEntry::new(&summary.run_id, JournalEvent::RunCompleted).details(format!(
            "{} completed, {} with errors, {} skipped, {} failed",
            summary.count(UnitStatus::Completed),
            summary.count(UnitStatus::CompletedWithErrors),
            summary.count(UnitStatus::Skipped),
            summary.count(UnitStatus::Failed)
        )),
    );
    log::info!("Run {} finished", summary.run_id);
    summary
}

/// Connect to both databases, expand the plan and run it.
///
/// Connection failures and plan expansion failures are returned as errors;
/// failures during the run are reported in the summary.
pub async fn run_plan<F>(plan: &PlanFile, on_unit: F) -> Result<RunSummary>
where
    F: FnMut(&UnitReport),
{
    let mut source_config = plan.source.clone();
    source_config.read_only = true;

    let mut source = connectors::open(source_config)
        .await
        .with_context(|| format!("Cannot connect to source {}", plan.source.describe()))?;
    let mut destination = connectors::open(plan.destination.clone())
        .await
        .with_context(|| {
            format!("Cannot connect to destination {}", plan.destination.describe())
        })?;

    let journal = plan.journal_path.clone().map(RunJournal::new);

    let units = plan
        .build_units(source.as_ref(), destination.as_ref())
        .await
        .context("Failed to expand plan units")?;

    let summary = run_units(
        source.as_ref(),
        destination.as_ref(),
        &units,
        &plan.rules,
        journal.as_ref(),
        on_unit,
    )
    .await;

    for conn in [&mut source, &mut destination] {
        if let Err(e) = conn.disconnect().await {
            log::warn!("Disconnect failed: {}", e);
        }
    }
    Ok(summary)
}
