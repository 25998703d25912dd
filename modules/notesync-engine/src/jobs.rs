// Async job tracking for long-running sync operations.
//
// Jobs live in an in-process table keyed by UUID. Callers poll for
// progress and acknowledge summaries they have consumed; acknowledged
// summaries are never re-delivered. Terminal jobs are garbage collected
// by TTL and by a capacity cap; pending and running jobs are never
// evicted.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use notesync_common::{ItemSummary, SyncError, SyncReport};

use crate::sync::{ProgressSink, SyncEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub id: String,
    pub status: JobStatus,
    pub current: u32,
    pub total: u32,
    pub message: String,
    /// Summaries produced so far, including any carried out of a partial
    /// failure. Entries stay here until acknowledged.
    pub summaries: Vec<ItemSummary>,
    pub acked_ids: HashSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SyncReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partition of requested summary IDs for acknowledgement.
#[derive(Debug, Clone, Default)]
pub struct AckPlan {
    pub deliverable: Vec<ItemSummary>,
    pub already_acked: Vec<String>,
    pub unknown: Vec<String>,
}

pub struct JobManager {
    jobs: Mutex<HashMap<String, JobState>>,
    ttl: Duration,
    max_jobs: usize,
}

impl JobManager {
    pub fn new(ttl: Duration, max_jobs: usize) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            ttl,
            max_jobs,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, JobState>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new pending job and return its ID.
    pub fn create(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let job = JobState {
            id: id.clone(),
            status: JobStatus::Pending,
            current: 0,
            total: 0,
            message: "queued".to_string(),
            summaries: Vec::new(),
            acked_ids: HashSet::new(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        let mut jobs = self.lock();
        jobs.insert(id.clone(), job);
        Self::gc(&mut jobs, self.ttl, self.max_jobs);
        id
    }

    pub fn get(&self, id: &str) -> Option<JobState> {
        let mut jobs = self.lock();
        Self::gc(&mut jobs, self.ttl, self.max_jobs);
        jobs.get(id).cloned()
    }

    /// Like `get`, but a missing ID is an error callers can surface.
    pub fn require(&self, id: &str) -> Result<JobState, SyncError> {
        self.get(id)
            .ok_or_else(|| SyncError::NotFound(format!("no job with id {id}")))
    }

    pub fn set_running(&self, id: &str, total: u32) {
        let mut jobs = self.lock();
        if let Some(job) = jobs.get_mut(id) {
            job.status = JobStatus::Running;
            job.total = total;
            job.current = 0;
            job.message = "running".to_string();
            job.summaries.clear();
            job.acked_ids.clear();
            job.updated_at = Utc::now();
        }
    }

    /// Update progress. No-op once the job is terminal, so a late report
    /// from a finishing worker cannot resurrect it.
    pub fn set_progress(
        &self,
        id: &str,
        current: u32,
        total: u32,
        message: &str,
        new_summaries: &[ItemSummary],
    ) {
        let mut jobs = self.lock();
        if let Some(job) = jobs.get_mut(id) {
            if job.status.is_terminal() {
                return;
            }
            job.current = current;
            job.total = total;
            job.message = message.to_string();
            job.summaries.extend_from_slice(new_summaries);
            job.updated_at = Utc::now();
        }
    }

    /// Mark success. The report's summaries move into the job's
    /// deliverable set; the stored result keeps only the counters.
    pub fn set_success(&self, id: &str, mut report: SyncReport) {
        let mut jobs = self.lock();
        if let Some(job) = jobs.get_mut(id) {
            let summaries = std::mem::take(&mut report.summaries);
            Self::merge_summaries(&mut job.summaries, summaries);
            job.status = JobStatus::Succeeded;
            job.current = report.new;
            job.message = format!("done: {} new, {} skipped", report.new, report.skipped);
            job.result = Some(report);
            job.error = None;
            job.updated_at = Utc::now();
        }
    }

    /// Mark failure. Partial results carried inside a circuit-open error
    /// stay deliverable.
    pub fn set_failed(&self, id: &str, error: &SyncError) {
        let details = match error {
            SyncError::CircuitOpen { failures, partial } => Some(json!({
                "failures": failures,
                "fetched": partial.fetched,
                "new": partial.new,
                "skipped": partial.skipped,
                "failed": partial.failed,
            })),
            SyncError::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => Some(json!({ "retry_after_secs": secs })),
            _ => None,
        };
        let mut jobs = self.lock();
        if let Some(job) = jobs.get_mut(id) {
            if let SyncError::CircuitOpen { partial, .. } = error {
                Self::merge_summaries(&mut job.summaries, partial.summaries.clone());
            }
            job.status = JobStatus::Failed;
            job.message = error.to_string();
            job.error = Some(JobError {
                code: error.code().to_string(),
                message: error.to_string(),
                details,
            });
            job.updated_at = Utc::now();
        }
    }

    fn merge_summaries(existing: &mut Vec<ItemSummary>, incoming: Vec<ItemSummary>) {
        for summary in incoming {
            if !existing.iter().any(|s| s.id == summary.id) {
                existing.push(summary);
            }
        }
    }

    /// Partition the requested IDs against a job's summaries without
    /// mutating anything.
    pub fn ack_plan(&self, id: &str, requested: &[String]) -> Option<AckPlan> {
        let jobs = self.lock();
        let job = jobs.get(id)?;
        let mut plan = AckPlan::default();
        for rid in requested {
            if job.acked_ids.contains(rid) {
                plan.already_acked.push(rid.clone());
            } else if let Some(summary) = job.summaries.iter().find(|s| &s.id == rid) {
                plan.deliverable.push(summary.clone());
            } else {
                plan.unknown.push(rid.clone());
            }
        }
        Some(plan)
    }

    /// Record acknowledgements. Idempotent; only IDs the job actually
    /// holds summaries for are recorded. Returns how many were newly
    /// acknowledged.
    pub fn apply_acked(&self, id: &str, acked: &[String]) -> usize {
        let mut jobs = self.lock();
        let Some(job) = jobs.get_mut(id) else {
            return 0;
        };
        let mut newly = 0;
        for rid in acked {
            if job.summaries.iter().any(|s| &s.id == rid) && job.acked_ids.insert(rid.clone()) {
                newly += 1;
            }
        }
        if newly > 0 {
            job.updated_at = Utc::now();
        }
        newly
    }

    /// Evict terminal jobs past their TTL, then oldest terminal jobs over
    /// the capacity cap. Pending and running jobs always survive.
    fn gc(jobs: &mut HashMap<String, JobState>, ttl: Duration, max_jobs: usize) {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        jobs.retain(|_, job| !job.status.is_terminal() || now - job.updated_at <= ttl);

        if jobs.len() > max_jobs {
            let mut terminal: Vec<(String, DateTime<Utc>)> = jobs
                .iter()
                .filter(|(_, job)| job.status.is_terminal())
                .map(|(id, job)| (id.clone(), job.updated_at))
                .collect();
            terminal.sort_by_key(|(_, at)| *at);
            let excess = jobs.len() - max_jobs;
            for (id, _) in terminal.into_iter().take(excess) {
                jobs.remove(&id);
            }
        }
    }
}

/// Bridges engine progress callbacks into job-table updates.
struct JobProgress {
    manager: Arc<JobManager>,
    job_id: String,
}

impl ProgressSink for JobProgress {
    fn report(&self, current: u32, total: u32, message: &str, new_summaries: &[ItemSummary]) {
        self.manager
            .set_progress(&self.job_id, current, total, message, new_summaries);
    }
}

/// Start a sync run in the background and return its job ID immediately.
pub fn spawn_sync_job(
    manager: Arc<JobManager>,
    engine: Arc<SyncEngine>,
    limit: u32,
    confirm_live: bool,
) -> String {
    let job_id = manager.create();
    let id = job_id.clone();
    tokio::spawn(async move {
        manager.set_running(&id, limit);
        let sink = JobProgress {
            manager: Arc::clone(&manager),
            job_id: id.clone(),
        };
        match engine
            .sync_with_progress(limit, confirm_live, Some(&sink))
            .await
        {
            Ok(report) => {
                info!(job_id = %id, new = report.new, "sync job succeeded");
                manager.set_success(&id, report);
            }
            Err(e) => {
                warn!(job_id = %id, error = %e, "sync job failed");
                manager.set_failed(&id, &e);
            }
        }
    });
    job_id
}
