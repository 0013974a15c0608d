//! The run engine: one closed-account pass, start to finish.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Pre-flight: the audit artifact must not exist yet
//!   2. Select candidate records
//!   3. Classify each record; run the terminal action for eligible ones
//!        member notice:  one email per record, in selection order
//!        status cleanup: one batch UPDATE for all eligible records
//!   4. Write the audit artifact
//!   5. Status cleanup only: failure summary to operations
//!
//! RULES:
//!   - Configuration errors surface before the engine exists.
//!   - Nothing is mutated (no row, no email) before step 1 passes.
//!   - Every selected record ends with exactly one terminal disposition and
//!     exactly one audit row.
//!   - The gateway is owned by the engine and released when `run` returns,
//!     on success and on every error path.

use crate::{
    audit::{AuditRecord, AuditReporter, RunHeader},
    classifier::{Classifier, Disposition},
    clock::RunClock,
    config::{PipelineVariant, RunConfig},
    error::{CloseoutError, CloseoutResult},
    gateway::DatabaseGateway,
    notifier::{Notifier, SendOutcome},
    record::Record,
    selector::RecordSelector,
    types::RunId,
    updater::{BatchUpdater, UpdateReport},
};

/// End-of-run counts, returned to the runner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub run_id: RunId,
    pub selected: usize,
    pub successes: usize,
    pub exceptions: usize,
    pub failed_updates: usize,
    pub failure_notice: Option<SendOutcome>,
}

pub struct RunEngine {
    pub run_id: RunId,
    pub clock: RunClock,
    config: RunConfig,
    gateway: Box<dyn DatabaseGateway>,
    notifier: Notifier,
}

impl RunEngine {
    pub fn new(
        config: RunConfig,
        clock: RunClock,
        gateway: Box<dyn DatabaseGateway>,
        notifier: Notifier,
    ) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            clock,
            config,
            gateway,
            notifier,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Execute the whole pass. Consumes the engine; the database handle is
    /// dropped when this returns.
    pub fn run(mut self) -> CloseoutResult<RunSummary> {
        let run_id = self.run_id.clone();
        log::info!(
            "run={run_id} start: {:?}, {}, {}",
            self.config.variant,
            self.config.selection.audit_label(),
            if self.config.is_report_only() { "report only" } else { "commit" }
        );

        let reporter = AuditReporter::new(&self.config.output_path, &self.config.report);
        reporter.ensure_absent()?;

        let records = RecordSelector::new(
            self.config.selection,
            &self.config.queries,
            &self.config.minor_codes,
        )
        .select(self.gateway.as_mut())?;

        let mut classifier = Classifier::new(self.config.rules.clone(), self.clock.today());
        let (dispositions, update_report) = match self.config.variant {
            PipelineVariant::MemberNotice => {
                (notify_members(&mut classifier, &mut self.notifier, &records), None)
            }
            PipelineVariant::StatusCleanup => {
                let (dispositions, report) = update_statuses(
                    &mut classifier,
                    &self.config,
                    self.gateway.as_mut(),
                    &records,
                )?;
                (dispositions, Some(report))
            }
        };

        let audit_rows = audit_rows(&records, &dispositions, self.config.variant)?;
        let header = RunHeader {
            run_date: self.clock.today(),
            selection_label: self.config.selection.audit_label(),
            report_only: self.config.is_report_only(),
        };
        reporter.write(&header, &audit_rows)?;

        let failed_updates = update_report.as_ref().map_or(0, |r| r.failures.len());
        let failure_notice = update_report
            .filter(|r| !r.failures.is_empty())
            .map(|r| self.notifier.send_failure_summary(&r.failures));

        let exceptions = audit_rows.iter().filter(|r| r.exception).count();
        let summary = RunSummary {
            run_id: run_id.clone(),
            selected: records.len(),
            successes: audit_rows.len() - exceptions,
            exceptions,
            failed_updates,
            failure_notice,
        };
        log::info!(
            "run={run_id} done: {} selected, {} successes, {} exceptions",
            summary.selected,
            summary.successes,
            summary.exceptions
        );
        Ok(summary)
    }
}

/// Member notices: classify and send one record at a time, in selection order.
fn notify_members(
    classifier: &mut Classifier,
    notifier: &mut Notifier,
    records: &[Record],
) -> Vec<Disposition> {
    records
        .iter()
        .map(|record| {
            let disposition = match classifier.classify(record) {
                Disposition::Pending => {
                    let outcome = notifier.send_member_notice(record);
                    if outcome.sent {
                        Disposition::Sent
                    } else {
                        Disposition::Failed { message: outcome.message }
                    }
                }
                skipped => skipped,
            };
            log::debug!("account {}: {:?}", record.account_id, disposition);
            disposition
        })
        .collect()
}

/// Status cleanup: classify everything, then one batch for the eligible set.
fn update_statuses(
    classifier: &mut Classifier,
    config: &RunConfig,
    gateway: &mut dyn DatabaseGateway,
    records: &[Record],
) -> CloseoutResult<(Vec<Disposition>, UpdateReport)> {
    let mut dispositions: Vec<Disposition> =
        records.iter().map(|r| classifier.classify(r)).collect();

    // Submission order == position in `eligible`; `positions` maps it back.
    let positions: Vec<usize> = dispositions
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == Disposition::Pending)
        .map(|(i, _)| i)
        .collect();
    let eligible: Vec<&Record> = positions.iter().map(|&i| &records[i]).collect();

    let target = config
        .update
        .as_ref()
        .ok_or_else(|| CloseoutError::config("status_cleanup requires an update target"))?;
    let report = BatchUpdater::new(target, config.commit_mode).apply(gateway, &eligible)?;

    for row in &report.successes {
        dispositions[positions[row.position]] = Disposition::Updated;
    }
    for row in &report.failures {
        dispositions[positions[row.position]] = Disposition::Failed {
            message: row.status.as_str().to_string(),
        };
    }
    Ok((dispositions, report))
}

fn audit_rows(
    records: &[Record],
    dispositions: &[Disposition],
    variant: PipelineVariant,
) -> CloseoutResult<Vec<AuditRecord>> {
    records
        .iter()
        .zip(dispositions)
        .enumerate()
        .map(|(position, (record, disposition))| {
            if !disposition.is_terminal() {
                return Err(CloseoutError::Unaccounted { position });
            }
            Ok(AuditRecord::new(record, disposition, variant))
        })
        .collect()
}
