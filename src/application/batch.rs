//! Batch orchestration: roster in, one certificate (and optionally one email)
//! per eligible participant out.
//!
//! A record's failure is captured in its [`RecordOutcome`] and never stops the
//! records after it. Only startup failures (output directory, roster) abort
//! the run.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use futures::stream::{self, StreamExt};
use metrics::counter;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use crate::{
    application::{
        error::AppError,
        export::DocumentExporter,
        notify::{DispatchOutcome, NotificationDispatcher},
        roster::RosterSource,
        template::CertificateTemplate,
    },
    domain::{
        entities::{Participant, ParticipantRecord},
        error::DomainError,
        filename::certificate_file_name,
    },
    infra::{
        error::InfraError,
        telemetry::{
            METRIC_CERTIFICATES_FAILED, METRIC_CERTIFICATES_GENERATED, METRIC_EMAILS_FAILED,
            METRIC_EMAILS_SENT, METRIC_RECORDS_SKIPPED,
        },
    },
};

pub const MAX_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DispatchStatus {
    NotDispatched,
    Sent,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordOutcome {
    Skipped {
        row: usize,
        missing: Vec<&'static str>,
    },
    Failed {
        row: usize,
        participant: String,
        error: String,
    },
    Done {
        row: usize,
        participant: String,
        artifact: PathBuf,
        dispatch: DispatchStatus,
    },
}

impl RecordOutcome {
    pub fn row(&self) -> usize {
        match self {
            RecordOutcome::Skipped { row, .. }
            | RecordOutcome::Failed { row, .. }
            | RecordOutcome::Done { row, .. } => *row,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub generated: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
    pub dispatch_failed: usize,
    pub outcomes: Vec<RecordOutcome>,
}

impl BatchReport {
    pub fn from_outcomes(outcomes: Vec<RecordOutcome>) -> Self {
        let mut report = BatchReport {
            total: outcomes.len(),
            ..BatchReport::default()
        };
        for outcome in &outcomes {
            match outcome {
                RecordOutcome::Skipped { .. } => report.skipped += 1,
                RecordOutcome::Failed { .. } => report.failed += 1,
                RecordOutcome::Done { dispatch, .. } => {
                    report.generated += 1;
                    match dispatch {
                        DispatchStatus::Sent => report.sent += 1,
                        DispatchStatus::Failed { .. } => report.dispatch_failed += 1,
                        DispatchStatus::NotDispatched => {}
                    }
                }
            }
        }
        report.outcomes = outcomes;
        report
    }

    /// Whether any record failed to export or any email failed to send.
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.dispatch_failed > 0
    }
}

/// One async lock per output file. Participants whose names normalise to the
/// same file never export at the same time; the later roster row still wins.
#[derive(Default)]
struct OutputLocks {
    slots: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl OutputLocks {
    fn slot(&self, path: &Path) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(path.to_path_buf()).or_default())
    }
}

pub struct BatchRunner {
    roster: Arc<dyn RosterSource>,
    template: CertificateTemplate,
    exporter: DocumentExporter,
    dispatcher: NotificationDispatcher,
    output_dir: PathBuf,
    concurrency: usize,
    output_locks: OutputLocks,
}

impl BatchRunner {
    pub fn new(
        roster: Arc<dyn RosterSource>,
        template: CertificateTemplate,
        exporter: DocumentExporter,
        dispatcher: NotificationDispatcher,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            roster,
            template,
            exporter,
            dispatcher,
            output_dir: output_dir.into(),
            concurrency: 1,
            output_locks: OutputLocks::default(),
        }
    }

    /// Number of records in flight at once, clamped to `1..=16`. Outcomes are
    /// reported in roster order regardless.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.clamp(1, MAX_CONCURRENCY);
        self
    }

    pub async fn run(&self) -> Result<BatchReport, AppError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(InfraError::from)?;

        let roster = Arc::clone(&self.roster);
        let records = tokio::task::spawn_blocking(move || roster.load_records())
            .await
            .map_err(|err| AppError::unexpected(format!("roster loader panicked: {err}")))??;

        info!(
            target = "certgen::batch",
            records = records.len(),
            output_dir = %self.output_dir.display(),
            concurrency = self.concurrency,
            email = self.dispatcher.is_configured(),
            "Starting certificate batch"
        );

        let outcomes = stream::iter(records)
            .map(|record| self.process(record))
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let report = BatchReport::from_outcomes(outcomes);
        info!(
            target = "certgen::batch",
            total = report.total,
            generated = report.generated,
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            dispatch_failed = report.dispatch_failed,
            "Certificate batch finished"
        );
        Ok(report)
    }

    async fn process(&self, record: ParticipantRecord) -> RecordOutcome {
        let participant = match record.validate() {
            Ok(participant) => participant,
            Err(DomainError::IncompleteRecord { row, missing }) => {
                counter!(METRIC_RECORDS_SKIPPED).increment(1);
                warn!(
                    target = "certgen::batch",
                    row,
                    missing = ?missing,
                    "Skipping incomplete roster row"
                );
                return RecordOutcome::Skipped { row, missing };
            }
        };

        debug!(
            target = "certgen::batch",
            row = participant.row,
            participant = %participant.name,
            "Generating certificate"
        );

        let output_path = self
            .output_dir
            .join(certificate_file_name(&participant.name));
        let document = self.template.render(&participant);
        let exported = {
            let slot = self.output_locks.slot(&output_path);
            let _exclusive = slot.lock().await;
            self.exporter.export(&document, &output_path).await
        };
        let artifact = match exported {
            Ok(artifact) => artifact,
            Err(err) => {
                counter!(METRIC_CERTIFICATES_FAILED).increment(1);
                error!(
                    target = "certgen::batch",
                    row = participant.row,
                    participant = %participant.name,
                    error = %err,
                    "Certificate export failed"
                );
                return RecordOutcome::Failed {
                    row: participant.row,
                    participant: participant.name,
                    error: err.to_string(),
                };
            }
        };

        counter!(METRIC_CERTIFICATES_GENERATED).increment(1);
        info!(
            target = "certgen::batch",
            row = participant.row,
            participant = %participant.name,
            path = %artifact.path().display(),
            "Certificate generated"
        );

        let dispatch = self.notify(&participant, artifact.path()).await;
        RecordOutcome::Done {
            row: participant.row,
            participant: participant.name,
            artifact: artifact.path,
            dispatch,
        }
    }

    async fn notify(&self, participant: &Participant, artifact: &Path) -> DispatchStatus {
        match self
            .dispatcher
            .dispatch(&participant.email, &participant.name, artifact)
            .await
        {
            Ok(DispatchOutcome::Sent) => {
                counter!(METRIC_EMAILS_SENT).increment(1);
                info!(
                    target = "certgen::batch",
                    row = participant.row,
                    recipient = %participant.email,
                    "Certificate emailed"
                );
                DispatchStatus::Sent
            }
            Ok(DispatchOutcome::Skipped) => DispatchStatus::NotDispatched,
            Err(err) => {
                counter!(METRIC_EMAILS_FAILED).increment(1);
                error!(
                    target = "certgen::batch",
                    row = participant.row,
                    recipient = %participant.email,
                    error = %err,
                    "Certificate email failed"
                );
                DispatchStatus::Failed {
                    error: err.to_string(),
                }
            }
        }
    }
}
