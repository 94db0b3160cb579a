//! Durable Session Store: sessions, messages, compactions, backed by a
//! JSON-file table per entity kind plus append-only JSONL transcripts.
//!
//! Every public method here is the atomic unit the Agent Loop and Daemon
//! Server call directly; "atomic" means "holds the write lock for the
//! whole operation", not a database transaction — this is a single-process
//! daemon, not a shared server.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use muxd_domain::error::{Error, Result};
use muxd_domain::message::{Compaction, ContentBlock, Message, MessageContent, Role, Session};
use parking_lot::RwLock;
use uuid::Uuid;

/// Durable Session Store. One instance per daemon process; cheap to clone
/// via `Arc` (not itself `Clone` — share it behind an `Arc<SessionStore>`).
pub struct SessionStore {
    dir: PathBuf,
    sessions: RwLock<HashMap<String, Session>>,
    messages: RwLock<HashMap<String, Vec<Message>>>,
    compactions: RwLock<HashMap<String, Vec<Compaction>>>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
struct Snapshot {
    sessions: HashMap<String, Session>,
    messages: HashMap<String, Vec<Message>>,
    compactions: HashMap<String, Vec<Compaction>>,
}

impl SessionStore {
    /// Load (or create) the store at `data_dir/muxd.db` — a single JSON
    /// file holding every session/message/compaction table. `muxd.db` is
    /// opaque to the client; only the Store reads or writes it.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).map_err(Error::Io)?;
        let path = data_dir.join("muxd.db");
        let snapshot = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            Snapshot::default()
        };

        tracing::info!(
            sessions = snapshot.sessions.len(),
            path = %path.display(),
            "session store loaded"
        );

        Ok(Self {
            dir: data_dir.to_path_buf(),
            sessions: RwLock::new(snapshot.sessions),
            messages: RwLock::new(snapshot.messages),
            compactions: RwLock::new(snapshot.compactions),
        })
    }

    fn db_path(&self) -> PathBuf {
        self.dir.join("muxd.db")
    }

    /// Persist every table to `muxd.db` via write-to-temp-then-rename, so a
    /// crash mid-flush never leaves a truncated file.
    pub fn flush(&self) -> Result<()> {
        let snapshot = Snapshot {
            sessions: self.sessions.read().clone(),
            messages: self.messages.read().clone(),
            compactions: self.compactions.read().clone(),
        };
        let json = serde_json::to_string_pretty(&snapshot).map_err(Error::Json)?;
        let tmp = self.db_path().with_extension("db.tmp");
        std::fs::write(&tmp, json).map_err(Error::Io)?;
        std::fs::rename(&tmp, self.db_path()).map_err(Error::Io)?;
        Ok(())
    }

    // ── Sessions ─────────────────────────────────────────────────────

    pub fn create_session(&self, project_path: &str, model: Option<String>) -> Result<Session> {
        let session = Session::new(project_path.to_owned(), model);
        self.sessions.write().insert(session.id.clone(), session.clone());
        self.messages.write().insert(session.id.clone(), Vec::new());
        self.flush()?;
        Ok(session)
    }

    pub fn get_session(&self, id: &str) -> Option<Session> {
        self.sessions.read().get(id).cloned()
    }

    /// Resolve a short id prefix (`>= 4` chars) to a session, erroring on
    /// ambiguity.
    pub fn find_by_prefix(&self, prefix: &str) -> Result<Option<Session>> {
        if prefix.len() < 4 {
            return Err(Error::Validation("session id prefix must be at least 4 characters".into()));
        }
        let sessions = self.sessions.read();
        let mut matches: Vec<&Session> = sessions.values().filter(|s| s.id.starts_with(prefix)).collect();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop().cloned()),
            _ => Err(Error::Conflict(format!("ambiguous session id prefix \"{prefix}\""))),
        }
    }

    pub fn latest_for(&self, project_path: &str) -> Option<Session> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.project_path == project_path)
            .max_by_key(|s| s.updated_at)
            .cloned()
    }

    pub fn list_by_project(&self, project_path: &str, limit: usize) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.project_path == project_path)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(limit);
        sessions
    }

    /// `GET /sessions?project=&limit=`: `project` narrows to one project
    /// when given, otherwise every session is considered.
    pub fn list_sessions(&self, project: Option<&str>, limit: usize) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .values()
            .filter(|s| project.map_or(true, |p| s.project_path == p))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(limit);
        sessions
    }

    pub fn update_session_title(&self, id: &str, title: &str) -> Result<()> {
        self.with_session_mut(id, |s| {
            s.title = title.to_owned();
            s.updated_at = Utc::now();
        })
    }

    pub fn update_session_model(&self, id: &str, model: Option<String>) -> Result<()> {
        self.with_session_mut(id, |s| {
            s.model = model;
            s.updated_at = Utc::now();
        })
    }

    pub fn update_session_tags(&self, id: &str, tags: Vec<String>) -> Result<()> {
        self.with_session_mut(id, |s| {
            s.tags = tags;
            s.updated_at = Utc::now();
        })
    }

    pub fn update_session_tokens(&self, id: &str, input_tokens: u64, output_tokens: u64) -> Result<()> {
        self.with_session_mut(id, |s| {
            s.input_tokens += input_tokens;
            s.output_tokens += output_tokens;
            s.total_tokens += input_tokens + output_tokens;
            s.updated_at = Utc::now();
        })
    }

    pub fn touch_session(&self, id: &str) -> Result<()> {
        self.with_session_mut(id, |s| s.updated_at = Utc::now())
    }

    fn with_session_mut(&self, id: &str, f: impl FnOnce(&mut Session)) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(id).ok_or_else(|| Error::NotFound(format!("session {id}")))?;
        f(session);
        drop(sessions);
        self.flush()
    }

    /// Cascades to messages and compactions. Branches pointing at this
    /// session become orphaned (`parent_session_id` left dangling) unless
    /// the caller also deletes them — the Store does not discover
    /// transitive children itself.
    pub fn delete_session(&self, id: &str) -> Result<()> {
        let removed = self.sessions.write().remove(id);
        if removed.is_none() {
            return Err(Error::NotFound(format!("session {id}")));
        }
        self.messages.write().remove(id);
        self.compactions.write().remove(id);
        let transcript = self.transcript_path(id);
        if transcript.exists() {
            std::fs::remove_file(&transcript).map_err(Error::Io)?;
        }
        self.flush()
    }

    // ── Messages ─────────────────────────────────────────────────────

    /// Assigns the next sequence number and bumps `message_count` in the
    /// same write-lock scope, so `{1..message_count}` always equals the
    /// set of persisted sequences (spec §3 invariant).
    pub fn append_message(&self, session_id: &str, role: Role, content: MessageContent, tokens: u64) -> Result<Message> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(session_id).ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;

        let mut messages = self.messages.write();
        let entry = messages.entry(session_id.to_owned()).or_default();
        let sequence = entry.iter().map(|m| m.sequence).max().unwrap_or(0) + 1;

        let message = Message {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            role,
            content,
            tokens,
            sequence,
        };
        entry.push(message.clone());

        session.message_count = sequence;
        session.total_tokens += tokens;
        session.updated_at = Utc::now();

        drop(messages);
        drop(sessions);
        self.flush()?;
        Ok(message)
    }

    pub fn get_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        self.get_messages_after(session_id, 0)
    }

    pub fn get_messages_after(&self, session_id: &str, seq: u64) -> Result<Vec<Message>> {
        if !self.sessions.read().contains_key(session_id) {
            return Err(Error::NotFound(format!("session {session_id}")));
        }
        let messages = self.messages.read();
        let mut out: Vec<Message> = messages
            .get(session_id)
            .map(|v| v.iter().filter(|m| m.sequence > seq).cloned().collect())
            .unwrap_or_default();
        out.sort_by_key(|m| m.sequence);
        Ok(out)
    }

    // ── Compactions ──────────────────────────────────────────────────

    /// `cutoff_sequence` must not exceed the current max sequence. A newer
    /// compaction (greater or equal cutoff) supersedes the prior latest.
    pub fn save_compaction(&self, session_id: &str, summary: &str, cutoff_sequence: u64) -> Result<Compaction> {
        if !self.sessions.read().contains_key(session_id) {
            return Err(Error::NotFound(format!("session {session_id}")));
        }
        let max_seq = self
            .messages
            .read()
            .get(session_id)
            .map(|v| v.iter().map(|m| m.sequence).max().unwrap_or(0))
            .unwrap_or(0);
        if cutoff_sequence > max_seq {
            return Err(Error::Validation(format!(
                "cutoff_sequence {cutoff_sequence} exceeds current max sequence {max_seq}"
            )));
        }

        let compaction = Compaction {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            summary_text: summary.to_owned(),
            cutoff_sequence,
            created_at: Utc::now(),
        };
        self.compactions.write().entry(session_id.to_owned()).or_default().push(compaction.clone());
        self.flush()?;
        Ok(compaction)
    }

    /// The active (latest by `cutoff_sequence`, ties broken by `created_at`)
    /// compaction for a session, if any.
    pub fn latest_compaction(&self, session_id: &str) -> Option<Compaction> {
        self.compactions
            .read()
            .get(session_id)?
            .iter()
            .max_by_key(|c| (c.cutoff_sequence, c.created_at))
            .cloned()
    }

    // ── Branching ────────────────────────────────────────────────────

    /// Creates a new session that is a fork of `from_id` at `at_sequence`
    /// (or the current max if `at_sequence == 0`). Messages with
    /// `sequence <= at_sequence` are copied verbatim (roles, content,
    /// tokens, sequence preserved; ids re-keyed). Written via a scratch
    /// snapshot held under the same write-lock scope as the flush, so a
    /// crash mid-branch never leaves a partial branch visible on reload.
    pub fn branch_session(&self, from_id: &str, at_sequence: u64) -> Result<Session> {
        let mut sessions = self.sessions.write();
        let mut messages = self.messages.write();

        let parent = sessions.get(from_id).ok_or_else(|| Error::NotFound(format!("session {from_id}")))?.clone();
        let parent_messages = messages.get(from_id).cloned().unwrap_or_default();

        let cutoff = if at_sequence == 0 {
            parent_messages.iter().map(|m| m.sequence).max().unwrap_or(0)
        } else {
            at_sequence
        };

        let mut branch = Session::new(parent.project_path.clone(), parent.model.clone());
        branch.title = format!("{} (branch)", parent.title);
        branch.parent_session_id = Some(from_id.to_owned());
        branch.branch_point = Some(cutoff);

        let copied: Vec<Message> = parent_messages
            .iter()
            .filter(|m| m.sequence <= cutoff)
            .map(|m| Message {
                id: Uuid::new_v4().to_string(),
                session_id: branch.id.clone(),
                role: m.role,
                content: m.content.clone(),
                tokens: m.tokens,
                sequence: m.sequence,
            })
            .collect();

        branch.message_count = copied.iter().map(|m| m.sequence).max().unwrap_or(0);
        branch.total_tokens = copied.iter().map(|m| m.tokens).sum();

        sessions.insert(branch.id.clone(), branch.clone());
        messages.insert(branch.id.clone(), copied);

        drop(messages);
        drop(sessions);
        self.flush()?;
        Ok(branch)
    }

    // ── Transcript (append-only JSONL, independent of muxd.db) ────────

    fn transcript_path(&self, session_id: &str) -> PathBuf {
        self.dir.join("transcripts").join(format!("{session_id}.jsonl"))
    }

    /// Append a raw content block to the session's JSONL transcript, for
    /// out-of-band audit/debugging. The Store's own source of truth for
    /// conversation state remains `muxd.db`; this is a supplementary log.
    pub fn append_transcript_line(&self, session_id: &str, role: Role, block: &ContentBlock) -> Result<()> {
        let path = self.transcript_path(session_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        let line = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "role": role,
            "block": block,
        });
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&path).map_err(Error::Io)?;
        writeln!(file, "{}", serde_json::to_string(&line).map_err(Error::Json)?).map_err(Error::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn create_and_get_session() {
        let (_d, store) = store();
        let s = store.create_session("/proj", Some("gpt-4o".into())).unwrap();
        let fetched = store.get_session(&s.id).unwrap();
        assert_eq!(fetched.id, s.id);
        assert_eq!(fetched.project_path, "/proj");
    }

    #[test]
    fn append_message_assigns_dense_sequences() {
        let (_d, store) = store();
        let s = store.create_session("/proj", None).unwrap();
        for i in 1..=3 {
            let m = store
                .append_message(&s.id, Role::User, MessageContent::Text { content: format!("msg {i}") }, 10)
                .unwrap();
            assert_eq!(m.sequence, i);
        }
        let session = store.get_session(&s.id).unwrap();
        assert_eq!(session.message_count, 3);
        assert_eq!(session.total_tokens, 30);
    }

    #[test]
    fn append_message_missing_session_is_not_found() {
        let (_d, store) = store();
        let err = store.append_message("nope", Role::User, MessageContent::Text { content: "hi".into() }, 1).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn get_messages_after_filters_by_sequence() {
        let (_d, store) = store();
        let s = store.create_session("/proj", None).unwrap();
        for i in 1..=5 {
            store.append_message(&s.id, Role::User, MessageContent::Text { content: format!("m{i}") }, 1).unwrap();
        }
        let after = store.get_messages_after(&s.id, 3).unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].sequence, 4);
    }

    #[test]
    fn find_by_prefix_requires_four_chars() {
        let (_d, store) = store();
        let err = store.find_by_prefix("abc").unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn find_by_prefix_resolves_unique_match() {
        let (_d, store) = store();
        let s = store.create_session("/proj", None).unwrap();
        let prefix = &s.id[..8];
        let found = store.find_by_prefix(prefix).unwrap().unwrap();
        assert_eq!(found.id, s.id);
    }

    #[test]
    fn save_compaction_rejects_cutoff_beyond_max_sequence() {
        let (_d, store) = store();
        let s = store.create_session("/proj", None).unwrap();
        store.append_message(&s.id, Role::User, MessageContent::Text { content: "hi".into() }, 1).unwrap();
        let err = store.save_compaction(&s.id, "summary", 5).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn save_compaction_then_latest_reflects_cutoff() {
        let (_d, store) = store();
        let s = store.create_session("/proj", None).unwrap();
        for _ in 0..3 {
            store.append_message(&s.id, Role::User, MessageContent::Text { content: "m".into() }, 1).unwrap();
        }
        store.save_compaction(&s.id, "first", 2).unwrap();
        let latest = store.latest_compaction(&s.id).unwrap();
        assert_eq!(latest.cutoff_sequence, 2);

        store.save_compaction(&s.id, "second", 3).unwrap();
        let latest = store.latest_compaction(&s.id).unwrap();
        assert_eq!(latest.cutoff_sequence, 3);
        assert_eq!(latest.summary_text, "second");
    }

    #[test]
    fn branch_session_copies_prefix_and_rekeys_ids() {
        let (_d, store) = store();
        let parent = store.create_session("/proj", Some("gpt-4o".into())).unwrap();
        for i in 1..=5 {
            store.append_message(&parent.id, Role::User, MessageContent::Text { content: format!("m{i}") }, 2).unwrap();
        }
        let branch = store.branch_session(&parent.id, 3).unwrap();
        assert_eq!(branch.parent_session_id.as_deref(), Some(parent.id.as_str()));
        assert_eq!(branch.branch_point, Some(3));
        assert_eq!(branch.message_count, 3);

        let branch_messages = store.get_messages(&branch.id).unwrap();
        assert_eq!(branch_messages.len(), 3);
        assert!(branch_messages.iter().all(|m| m.session_id == branch.id));
        let parent_messages = store.get_messages(&parent.id).unwrap();
        assert_ne!(branch_messages[0].id, parent_messages[0].id);
        assert_eq!(branch_messages[0].sequence, parent_messages[0].sequence);
    }

    #[test]
    fn branch_session_zero_uses_current_max() {
        let (_d, store) = store();
        let parent = store.create_session("/proj", None).unwrap();
        for i in 1..=4 {
            store.append_message(&parent.id, Role::User, MessageContent::Text { content: format!("m{i}") }, 1).unwrap();
        }
        let branch = store.branch_session(&parent.id, 0).unwrap();
        assert_eq!(branch.branch_point, Some(4));
    }

    #[test]
    fn delete_session_cascades_messages_and_compactions() {
        let (_d, store) = store();
        let s = store.create_session("/proj", None).unwrap();
        store.append_message(&s.id, Role::User, MessageContent::Text { content: "hi".into() }, 1).unwrap();
        store.save_compaction(&s.id, "sum", 1).unwrap();
        store.delete_session(&s.id).unwrap();
        assert!(store.get_session(&s.id).is_none());
        assert!(store.get_messages(&s.id).is_err());
        assert!(store.latest_compaction(&s.id).is_none());
    }

    #[test]
    fn list_by_project_orders_by_updated_at_desc() {
        let (_d, store) = store();
        let a = store.create_session("/proj", None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = store.create_session("/proj", None).unwrap();
        let listed = store.list_by_project("/proj", 10);
        assert_eq!(listed[0].id, b.id);
        assert_eq!(listed[1].id, a.id);
    }

    #[test]
    fn list_sessions_without_project_includes_every_session() {
        let (_d, store) = store();
        store.create_session("/a", None).unwrap();
        store.create_session("/b", None).unwrap();
        let listed = store.list_sessions(None, 10);
        assert_eq!(listed.len(), 2);
    }

    #[test]
    fn list_sessions_with_project_narrows_results() {
        let (_d, store) = store();
        store.create_session("/a", None).unwrap();
        store.create_session("/b", None).unwrap();
        let listed = store.list_sessions(Some("/a"), 10);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].project_path, "/a");
    }

    #[test]
    fn survives_reopen_after_flush() {
        let dir = tempdir().unwrap();
        let s = {
            let store = SessionStore::open(dir.path()).unwrap();
            let s = store.create_session("/proj", None).unwrap();
            store.append_message(&s.id, Role::User, MessageContent::Text { content: "hi".into() }, 3).unwrap();
            s
        };
        let reopened = SessionStore::open(dir.path()).unwrap();
        let fetched = reopened.get_session(&s.id).unwrap();
        assert_eq!(fetched.total_tokens, 3);
        let messages = reopened.get_messages(&s.id).unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn append_transcript_line_is_appendable() {
        let (_d, store) = store();
        let s = store.create_session("/proj", None).unwrap();
        store.append_transcript_line(&s.id, Role::User, &ContentBlock::Text { text: "hi".into() }).unwrap();
        store.append_transcript_line(&s.id, Role::Assistant, &ContentBlock::Text { text: "yo".into() }).unwrap();
        let path = store.transcript_path(&s.id);
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
