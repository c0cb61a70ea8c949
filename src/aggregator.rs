//! Thread-safe collection of scenario results into a run report.

use crate::model::{RunReport, RunSummary, ScenarioResult};
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Default)]
struct Collected {
    entries: Vec<(usize, ScenarioResult)>,
    report: Option<RunReport>,
}

/// Append-only result collector shared by every scenario task.
#[derive(Debug)]
pub struct ResultAggregator {
    run_id: String,
    environment_id: String,
    started_at: DateTime<Utc>,
    inner: Mutex<Collected>,
}

impl ResultAggregator {
    pub fn new(run_id: impl Into<String>, environment_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            environment_id: environment_id.into(),
            started_at: Utc::now(),
            inner: Mutex::new(Collected::default()),
        }
    }

    /// Record the result for the scenario at `index` in the run
    /// selection. Returns `false` once the report is finalized.
    pub fn append(&self, index: usize, result: ScenarioResult) -> bool {
        let mut inner = self.lock();
        if inner.report.is_some() {
            warn!("Dropping result for '{}': report already finalized", result.name);
            return false;
        }
        inner.entries.push((index, result));
        true
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Freeze the collected results into a report ordered by
    /// selection index. Later calls return the frozen report unchanged.
    pub fn finalize(&self, cancelled: bool) -> RunReport {
        let mut inner = self.lock();
        if let Some(report) = &inner.report {
            return report.clone();
        }

        let mut entries = std::mem::take(&mut inner.entries);
        entries.sort_by_key(|(index, _)| *index);
        let scenarios: Vec<ScenarioResult> = entries.into_iter().map(|(_, r)| r).collect();

        let report = RunReport {
            run_id: self.run_id.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            environment_id: self.environment_id.clone(),
            summary: RunSummary::from_results(&scenarios, cancelled),
            scenarios,
            cancelled,
        };
        inner.report = Some(report.clone());
        report
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Collected> {
        // A panic while holding the lock cannot leave `Collected`
        // half-written, so recover the guard.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
