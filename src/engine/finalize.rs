use std::time::Instant;

use ulid::Ulid;

use crate::model::*;
use crate::observability::{
    ACTIVITIES_FINALIZED_TOTAL, FINALIZER_DURATION_SECONDS, FINALIZER_FAILURES_TOTAL, FINALIZER_RUNS_TOTAL,
};

use super::{Engine, EngineError};

/// Outcome of one finalizer run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeReport {
    /// Activities written by this run, including resumed ones.
    pub activities_finalized: usize,
    /// Participations moved InProgress → Completed.
    pub completed: usize,
    /// Participations moved Pending → Cancelled.
    pub cancelled: usize,
    /// Activities skipped because their write failed.
    pub failures: usize,
}

impl FinalizeReport {
    pub fn is_empty(&self) -> bool {
        self.activities_finalized == 0 && self.failures == 0
    }
}

impl Engine {
    /// Close every activity that ended before `now`, and finish any finalized
    /// activity that still has open participations. Each activity is its own
    /// WAL record; one failing activity does not stop the others.
    pub async fn finalize_overdue(&self, now: Ms) -> FinalizeReport {
        let started = Instant::now();
        let mut report = FinalizeReport::default();

        for id in self.finalize_candidates(now).await {
            match self.finalize_one(id, now).await {
                Ok(Some((completed, cancelled))) => {
                    report.activities_finalized += 1;
                    report.completed += completed;
                    report.cancelled += cancelled;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("finalizer: activity {id} skipped: {e}");
                    metrics::counter!(FINALIZER_FAILURES_TOTAL).increment(1);
                    report.failures += 1;
                }
            }
        }

        metrics::counter!(FINALIZER_RUNS_TOTAL).increment(1);
        metrics::counter!(ACTIVITIES_FINALIZED_TOTAL).increment(report.activities_finalized as u64);
        metrics::histogram!(FINALIZER_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        if report.is_empty() {
            tracing::debug!("finalizer: nothing overdue");
        } else {
            tracing::info!(
                "finalizer: {} activities finalized, {} participations completed, {} cancelled, {} failures",
                report.activities_finalized,
                report.completed,
                report.cancelled,
                report.failures
            );
        }
        report
    }

    async fn finalize_candidates(&self, now: Ms) -> Vec<Ulid> {
        let mut ids = Vec::new();
        for id in self.store.activity_ids() {
            let Ok(st) = self.activity_read(id).await else { continue };
            let overdue = !st.activity.is_finalized && st.activity.end_at < now;
            let unfinished = st.activity.is_finalized && st.open_participations().next().is_some();
            if overdue || unfinished {
                ids.push(id);
            }
        }
        ids
    }

    /// Finalize one activity under its write lock. Returns the number of
    /// participations completed and cancelled, or None if a concurrent run
    /// already did the work.
    async fn finalize_one(&self, id: Ulid, now: Ms) -> Result<Option<(usize, usize)>, EngineError> {
        let held = self.hold().await;
        let st = self.activity_write(id).await?;

        let mut completed = Vec::new();
        let mut cancelled = Vec::new();
        for p in st.open_participations() {
            match p.state {
                ParticipationState::InProgress => completed.push(p.id),
                ParticipationState::Pending => cancelled.push(p.id),
                ParticipationState::Completed | ParticipationState::Cancelled => {}
            }
        }
        let overdue = !st.activity.is_finalized && st.activity.end_at < now;
        let unfinished = st.activity.is_finalized && !(completed.is_empty() && cancelled.is_empty());
        if !overdue && !unfinished {
            return Ok(None);
        }

        let counts = (completed.len(), cancelled.len());
        let event = Event::ActivityFinalized {
            id,
            at: now,
            completed,
            cancelled,
        };
        self.commit(st, event, held).await?;
        tracing::debug!(
            "finalized activity {id}: {} completed, {} cancelled",
            counts.0,
            counts.1
        );
        Ok(Some(counts))
    }
}
