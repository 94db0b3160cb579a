//! Durable scheduled-job table (spec §4.1 "Scheduled job API", §4.6).
//!
//! Kept as its own JSON-file table, separate from `muxd.db`, since jobs
//! have no session affiliation and are polled by the Scheduler ticker on
//! a completely independent cadence from turn traffic.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use muxd_domain::error::{Error, Result};
use muxd_domain::message::{
    truncate_utf8, JobStatus, Recurrence, ScheduledToolJob, LAST_ERROR_MAX_BYTES, LAST_RESULT_MAX_BYTES,
};
use parking_lot::RwLock;

pub struct ScheduleStore {
    path: PathBuf,
    jobs: RwLock<HashMap<String, ScheduledToolJob>>,
}

impl ScheduleStore {
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).map_err(Error::Io)?;
        let path = data_dir.join("schedule.json");
        let jobs = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Self { path, jobs: RwLock::new(jobs) })
    }

    fn flush(&self) -> Result<()> {
        let jobs = self.jobs.read();
        let json = serde_json::to_string_pretty(&*jobs).map_err(Error::Json)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(Error::Io)?;
        std::fs::rename(&tmp, &self.path).map_err(Error::Io)?;
        Ok(())
    }

    pub fn create(&self, tool_name: String, tool_input: serde_json::Value, scheduled_for: DateTime<Utc>, recurrence: Recurrence) -> Result<ScheduledToolJob> {
        let job = ScheduledToolJob::new(tool_name, tool_input, scheduled_for, recurrence);
        self.jobs.write().insert(job.id.clone(), job.clone());
        self.flush()?;
        Ok(job)
    }

    pub fn get(&self, id: &str) -> Option<ScheduledToolJob> {
        self.jobs.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<ScheduledToolJob> {
        let mut jobs: Vec<_> = self.jobs.read().values().cloned().collect();
        jobs.sort_by_key(|j| j.scheduled_for);
        jobs
    }

    /// Jobs with `status == pending` and `scheduled_for <= now`, ordered by
    /// `scheduled_for` so a tick processes the oldest-due first, capped at
    /// `limit`.
    pub fn due(&self, now: DateTime<Utc>, limit: usize) -> Vec<ScheduledToolJob> {
        let mut due: Vec<ScheduledToolJob> = self
            .jobs
            .read()
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.scheduled_for <= now)
            .cloned()
            .collect();
        due.sort_by_key(|j| j.scheduled_for);
        due.truncate(limit);
        due
    }

    pub fn cancel(&self, id: &str) -> Result<()> {
        self.with_job_mut(id, |j| j.status = JobStatus::Cancelled)
    }

    /// Patch a pending job's `tool_input`/`scheduled_for`/`recurrence`.
    /// Rejects jobs that are no longer pending — the Scheduler may already
    /// be mid-execution.
    pub fn update(&self, id: &str, tool_input: Option<serde_json::Value>, scheduled_for: Option<DateTime<Utc>>, recurrence: Option<Recurrence>) -> Result<ScheduledToolJob> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(id).ok_or_else(|| Error::NotFound(format!("scheduled job {id}")))?;
        if job.status != JobStatus::Pending {
            return Err(Error::Conflict(format!("job {id} is not pending (status = {:?})", job.status)));
        }
        if let Some(input) = tool_input {
            job.tool_input = input;
        }
        if let Some(sf) = scheduled_for {
            job.scheduled_for = sf;
        }
        if let Some(r) = recurrence {
            job.recurrence = r;
        }
        let out = job.clone();
        drop(jobs);
        self.flush()?;
        Ok(out)
    }

    /// Mark a tick's attempt started: `attempt_count += 1`,
    /// `last_attempt_at = now`.
    pub fn mark_attempt(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        self.with_job_mut(id, |j| {
            j.attempt_count += 1;
            j.last_attempt_at = Some(now);
        })
    }

    pub fn mark_succeeded(&self, id: &str, result: &str, now: DateTime<Utc>) -> Result<()> {
        self.with_job_mut(id, |j| {
            j.status = JobStatus::Completed;
            j.last_result = Some(truncate_utf8(result, LAST_RESULT_MAX_BYTES));
            j.last_error = None;
            j.completed_at = Some(now);
        })
    }

    pub fn mark_failed(&self, id: &str, error: &str, now: DateTime<Utc>) -> Result<()> {
        self.with_job_mut(id, |j| {
            j.status = JobStatus::Failed;
            j.last_error = Some(truncate_utf8(error, LAST_ERROR_MAX_BYTES));
            j.completed_at = Some(now);
        })
    }

    /// Advance a recurring job back to `pending` at `next`, resetting
    /// `completed_at`. Called right after `mark_succeeded` for recurring
    /// jobs (spec §4.6 step 4).
    pub fn reschedule(&self, id: &str, next: DateTime<Utc>) -> Result<()> {
        self.with_job_mut(id, |j| {
            j.status = JobStatus::Pending;
            j.scheduled_for = next;
            j.completed_at = None;
        })
    }

    fn with_job_mut(&self, id: &str, f: impl FnOnce(&mut ScheduledToolJob)) -> Result<()> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(id).ok_or_else(|| Error::NotFound(format!("scheduled job {id}")))?;
        f(job);
        drop(jobs);
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, ScheduleStore) {
        let dir = tempdir().unwrap();
        let store = ScheduleStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn create_and_get() {
        let (_d, store) = store();
        let job = store.create("text_echo".into(), serde_json::json!({"text": "hi"}), Utc::now(), Recurrence::Once).unwrap();
        let fetched = store.get(&job.id).unwrap();
        assert_eq!(fetched.tool_name, "text_echo");
        assert_eq!(fetched.status, JobStatus::Pending);
    }

    #[test]
    fn due_filters_by_time_and_status() {
        let (_d, store) = store();
        let now = Utc::now();
        let past = store.create("t".into(), serde_json::json!({}), now - Duration::seconds(5), Recurrence::Once).unwrap();
        let future = store.create("t".into(), serde_json::json!({}), now + Duration::hours(1), Recurrence::Once).unwrap();

        let due = store.due(now, 10);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, past.id);
        assert!(!due.iter().any(|j| j.id == future.id));
    }

    #[test]
    fn mark_succeeded_truncates_result() {
        let (_d, store) = store();
        let job = store.create("t".into(), serde_json::json!({}), Utc::now(), Recurrence::Once).unwrap();
        let huge = "x".repeat(LAST_RESULT_MAX_BYTES * 2);
        store.mark_succeeded(&job.id, &huge, Utc::now()).unwrap();
        let fetched = store.get(&job.id).unwrap();
        assert_eq!(fetched.status, JobStatus::Completed);
        assert!(fetched.last_result.unwrap().len() <= LAST_RESULT_MAX_BYTES);
    }

    #[test]
    fn mark_failed_truncates_error() {
        let (_d, store) = store();
        let job = store.create("t".into(), serde_json::json!({}), Utc::now(), Recurrence::Once).unwrap();
        let huge = "e".repeat(LAST_ERROR_MAX_BYTES * 3);
        store.mark_failed(&job.id, &huge, Utc::now()).unwrap();
        let fetched = store.get(&job.id).unwrap();
        assert_eq!(fetched.status, JobStatus::Failed);
        assert!(fetched.last_error.unwrap().len() <= LAST_ERROR_MAX_BYTES);
    }

    #[test]
    fn reschedule_returns_job_to_pending() {
        let (_d, store) = store();
        let job = store.create("t".into(), serde_json::json!({}), Utc::now(), Recurrence::Hourly).unwrap();
        store.mark_succeeded(&job.id, "ok", Utc::now()).unwrap();
        let next = Utc::now() + Duration::hours(1);
        store.reschedule(&job.id, next).unwrap();
        let fetched = store.get(&job.id).unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(fetched.scheduled_for, next);
        assert!(fetched.completed_at.is_none());
    }

    #[test]
    fn cancel_sets_cancelled_status() {
        let (_d, store) = store();
        let job = store.create("t".into(), serde_json::json!({}), Utc::now(), Recurrence::Once).unwrap();
        store.cancel(&job.id).unwrap();
        assert_eq!(store.get(&job.id).unwrap().status, JobStatus::Cancelled);
    }

    #[test]
    fn update_rejects_non_pending_job() {
        let (_d, store) = store();
        let job = store.create("t".into(), serde_json::json!({}), Utc::now(), Recurrence::Once).unwrap();
        store.mark_succeeded(&job.id, "ok", Utc::now()).unwrap();
        let err = store.update(&job.id, Some(serde_json::json!({"a": 1})), None, None).unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn mark_attempt_increments_counter() {
        let (_d, store) = store();
        let job = store.create("t".into(), serde_json::json!({}), Utc::now(), Recurrence::Once).unwrap();
        store.mark_attempt(&job.id, Utc::now()).unwrap();
        store.mark_attempt(&job.id, Utc::now()).unwrap();
        assert_eq!(store.get(&job.id).unwrap().attempt_count, 2);
    }

    #[test]
    fn due_orders_oldest_first() {
        let (_d, store) = store();
        let now = Utc::now();
        let later = store.create("t".into(), serde_json::json!({}), now - Duration::seconds(1), Recurrence::Once).unwrap();
        let earlier = store.create("t".into(), serde_json::json!({}), now - Duration::seconds(10), Recurrence::Once).unwrap();
        let due = store.due(now, 10);
        assert_eq!(due[0].id, earlier.id);
        assert_eq!(due[1].id, later.id);
    }
}
