//! The Scheduler (spec §4.6): a single ticker polling due
//! `ScheduledToolJob`s and dispatching each one either through the Agent
//! Loop (`tool_name == "agent_task"`) or directly through the Tool
//! Registry.
//!
//! Deliberately much simpler than a cron system: three recurrences
//! (once/hourly/daily), no timezones, no missed-run catch-up policy, no
//! webhook delivery. Jobs within one tick run sequentially to preserve
//! `scheduled_for` ordering; a long-running `agent_task` is handed to its
//! own task so it never blocks the ticker.

use std::time::Duration;

use chrono::Utc;
use muxd_domain::message::ScheduledToolJob;
use muxd_domain::tool::RiskTag;
use muxd_tools::ToolContext;

use crate::runtime::turn::{run_turn, TurnEvent, TurnInput};
use crate::state::AppState;

const AGENT_TASK_TOOL: &str = "agent_task";

/// Risk tags the scheduler refuses by default unless a tool name is
/// explicitly present in `SchedulerConfig.allow_list` (spec §4.6 step 3).
const DEFAULT_DENIED: &[RiskTag] = &[RiskTag::Irreversible, RiskTag::Exec, RiskTag::FsWrite];

/// Run one tick: fetch due jobs and execute them in `scheduled_for` order.
pub async fn tick(state: &AppState) {
    let now = Utc::now();
    let due = state.schedules.due(now, state.config.scheduler.batch_size as usize);

    for job in due {
        if let Err(e) = state.schedules.mark_attempt(&job.id, now) {
            tracing::warn!(job_id = %job.id, error = %e, "failed to mark scheduler attempt");
            continue;
        }

        if job.tool_name == AGENT_TASK_TOOL {
            let state = state.clone();
            tokio::spawn(async move { run_agent_task(&state, job).await });
        } else {
            run_tool_job(state, job).await;
        }
    }
}

async fn run_tool_job(state: &AppState, job: ScheduledToolJob) {
    if !is_tool_allowed(state, &job.tool_name) {
        fail(state, &job, &format!("tool '{}' is not in the scheduler allow-list", job.tool_name)).await;
        return;
    }

    let ctx = ToolContext { session_id: format!("scheduler:{}", job.id), workspace_root: state.workspace_root.clone() };
    match state.tools.execute(&job.tool_name, job.tool_input.clone(), &ctx).await {
        Ok(output) if !output.is_error => complete(state, &job, &output.text).await,
        Ok(output) => fail(state, &job, &output.text).await,
        Err(e) => fail(state, &job, &e.to_string()).await,
    }
}

async fn run_agent_task(state: &AppState, job: ScheduledToolJob) {
    let prompt = job.tool_input.get("prompt").and_then(|v| v.as_str()).unwrap_or_default().to_owned();
    if prompt.is_empty() {
        fail(state, &job, "agent_task requires a non-empty 'prompt' field").await;
        return;
    }

    let session_id = match job.tool_input.get("session_id").and_then(|v| v.as_str()) {
        Some(id) => id.to_owned(),
        None => {
            let project = job.tool_input.get("project").and_then(|v| v.as_str()).unwrap_or("scheduler");
            match state.sessions.create_session(project, None) {
                Ok(s) => s.id,
                Err(e) => {
                    fail(state, &job, &e.to_string()).await;
                    return;
                }
            }
        }
    };

    let permit = match state.session_locks.acquire(&session_id) {
        Ok(p) => p,
        Err(_) => {
            fail(state, &job, "session already has a turn in flight").await;
            return;
        }
    };

    let mut rx = run_turn(state.clone(), TurnInput { session_id, user_text: prompt }, permit);
    let mut final_text = String::new();
    let mut error: Option<String> = None;

    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::Delta { text } => final_text.push_str(&text),
            TurnEvent::Error { message, .. } => error = Some(message),
            TurnEvent::Canceled => error = Some("turn canceled".into()),
            TurnEvent::TurnDone => break,
            _ => {}
        }
    }

    match error {
        Some(message) => fail(state, &job, &message).await,
        None => complete(state, &job, &final_text).await,
    }
}

/// Success: `once` jobs stay `completed`; recurring jobs advance
/// immediately to their next `scheduled_for` (spec §4.6 step 4).
async fn complete(state: &AppState, job: &ScheduledToolJob, result: &str) {
    let now = Utc::now();
    if let Err(e) = state.schedules.mark_succeeded(&job.id, result, now) {
        tracing::warn!(job_id = %job.id, error = %e, "failed to mark scheduled job succeeded");
        return;
    }
    if let Some(period) = job.recurrence.period() {
        let _ = state.schedules.reschedule(&job.id, now + period);
    }
}

/// Failure: no automatic retry (spec §9 open question, decided: user
/// intervenes). Recurring jobs simply remain `failed`.
async fn fail(state: &AppState, job: &ScheduledToolJob, error: &str) {
    if let Err(e) = state.schedules.mark_failed(&job.id, error, Utc::now()) {
        tracing::warn!(job_id = %job.id, error = %e, "failed to mark scheduled job failed");
    }
}

fn is_tool_allowed(state: &AppState, tool_name: &str) -> bool {
    if state.config.scheduler.allow_list.iter().any(|t| t == tool_name) {
        return true;
    }
    match state.tools.definition(tool_name) {
        Some(def) => !def.risk_tags.iter().any(|t| DEFAULT_DENIED.contains(t)),
        None => false,
    }
}

/// Spawn the ticker as a background task at `SchedulerConfig.tick_interval_sec`.
pub fn spawn(state: AppState) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_secs(state.config.scheduler.tick_interval_sec.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            tick(&state).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxd_domain::tool::ToolDefinition;

    fn def(tags: &[RiskTag]) -> ToolDefinition {
        ToolDefinition { name: "t".into(), display_name: "T".into(), description: "".into(), json_schema: serde_json::json!({}), risk_tags: tags.to_vec() }
    }

    #[test]
    fn default_denied_covers_irreversible_exec_fs_write() {
        assert!(DEFAULT_DENIED.contains(&RiskTag::Irreversible));
        assert!(DEFAULT_DENIED.contains(&RiskTag::Exec));
        assert!(DEFAULT_DENIED.contains(&RiskTag::FsWrite));
        assert!(!DEFAULT_DENIED.contains(&RiskTag::Net));
    }

    #[test]
    fn net_only_tool_is_allowed_by_default() {
        let d = def(&[RiskTag::Net]);
        assert!(!d.risk_tags.iter().any(|t| DEFAULT_DENIED.contains(t)));
    }
}
