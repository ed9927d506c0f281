use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DEFAULT_MAX_HISTORY: usize = 40;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    Failed,
    Deferred,
}

/// Trace of one tool invocation, serialized into the assistant history entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRun {
    pub tool: String,
    pub status: RunStatus,
}

impl ToolRun {
    pub fn new(tool: impl Into<String>, status: RunStatus) -> Self {
        Self { tool: tool.into(), status }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub tool_runs: Vec<ToolRun>,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), tool_runs: Vec::new(), recorded_at: Utc::now() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), tool_runs: Vec::new(), recorded_at: Utc::now() }
    }

    pub fn assistant(content: impl Into<String>, tool_runs: Vec<ToolRun>) -> Self {
        Self { role: Role::Assistant, content: content.into(), tool_runs, recorded_at: Utc::now() }
    }
}

/// A mutating call waiting for the user's go-ahead. Identified across turns
/// by the fingerprint of its exact payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub fingerprint: String,
    pub tool: String,
    pub arguments: serde_json::Value,
    pub prompt: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub history: VecDeque<HistoryEntry>,
    pub pending: Vec<PendingApproval>,
}

/// Per-user conversation state. Every accessor takes the owning user id;
/// there is no path that reads another user's session.
#[derive(Clone)]
pub struct SessionStore {
    max_history: usize,
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl SessionStore {
    pub fn new(max_history: usize) -> Self {
        Self { max_history: max_history.max(1), sessions: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Returns a snapshot of the user's session, creating an empty one on
    /// first contact.
    pub fn get_or_create(&self, user_id: &str) -> Session {
        self.with_session(user_id, |session| session.clone())
    }

    pub fn append_history(&self, user_id: &str, entry: HistoryEntry) {
        let max_history = self.max_history;
        self.with_session(user_id, |session| {
            session.history.push_back(entry);
            while session.history.len() > max_history {
                session.history.pop_front();
            }
        });
    }

    pub fn history(&self, user_id: &str) -> Vec<HistoryEntry> {
        self.with_session(user_id, |session| session.history.iter().cloned().collect())
    }

    pub fn push_pending(&self, user_id: &str, pending: PendingApproval) {
        self.with_session(user_id, |session| {
            session.pending.retain(|existing| existing.fingerprint != pending.fingerprint);
            session.pending.push(pending);
        });
    }

    /// Removes and returns the pending approval matching `fingerprint`, if
    /// this user has one.
    pub fn take_pending(&self, user_id: &str, fingerprint: &str) -> Option<PendingApproval> {
        self.with_session(user_id, |session| {
            let position =
                session.pending.iter().position(|pending| pending.fingerprint == fingerprint)?;
            Some(session.pending.remove(position))
        })
    }

    pub fn pending(&self, user_id: &str) -> Vec<PendingApproval> {
        self.with_session(user_id, |session| session.pending.clone())
    }

    fn with_session<T>(&self, user_id: &str, apply: impl FnOnce(&mut Session) -> T) -> T {
        let mut sessions = match self.sessions.lock() {
            Ok(sessions) => sessions,
            Err(poisoned) => poisoned.into_inner(),
        };
        apply(sessions.entry(user_id.to_string()).or_default())
    }
}

/// Stable identity for a call payload across turns. `serde_json` keeps object
/// keys sorted, so semantically equal arguments hash identically.
pub fn payload_fingerprint(tool: &str, arguments: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool.as_bytes());
    hasher.update(b"\n");
    hasher.update(arguments.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::{payload_fingerprint, HistoryEntry, PendingApproval, SessionStore};

    fn pending_fixture(tool: &str, fingerprint: &str) -> PendingApproval {
        PendingApproval {
            fingerprint: fingerprint.to_string(),
            tool: tool.to_string(),
            arguments: json!({"task_id": "T1"}),
            prompt: format!("Run {tool}?"),
            requested_at: Utc::now(),
        }
    }

    #[test]
    fn sessions_are_scoped_per_user() {
        let store = SessionStore::default();
        store.append_history("U-alice", HistoryEntry::user("find me a three-bed listing"));

        assert_eq!(store.history("U-alice").len(), 1);
        assert!(store.get_or_create("U-bob").history.is_empty());
    }

    #[test]
    fn history_is_bounded_dropping_oldest_first() {
        let store = SessionStore::new(3);
        for turn in 0..5 {
            store.append_history("U-alice", HistoryEntry::user(format!("turn {turn}")));
        }

        let history = store.history("U-alice");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "turn 2");
        assert_eq!(history[2].content, "turn 4");
    }

    #[test]
    fn take_pending_matches_only_the_fingerprint() {
        let store = SessionStore::default();
        store.push_pending("U-alice", pending_fixture("task.delete", "fp-1"));
        store.push_pending("U-alice", pending_fixture("calendar.cancel", "fp-2"));

        let taken = store.take_pending("U-alice", "fp-1").expect("fp-1 should be pending");
        assert_eq!(taken.tool, "task.delete");
        assert!(store.take_pending("U-alice", "fp-1").is_none());

        let remaining = store.pending("U-alice");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].fingerprint, "fp-2");
    }

    #[test]
    fn pending_approvals_do_not_cross_users() {
        let store = SessionStore::default();
        store.push_pending("U-alice", pending_fixture("task.delete", "fp-1"));

        assert!(store.take_pending("U-bob", "fp-1").is_none());
        assert_eq!(store.pending("U-alice").len(), 1);
    }

    #[test]
    fn fingerprint_is_stable_across_argument_ordering() {
        let ordered = json!({"address": "22 Boundary Road", "bedrooms": 3});
        let reversed: serde_json::Value =
            serde_json::from_str(r#"{"bedrooms": 3, "address": "22 Boundary Road"}"#)
                .expect("literal should parse");

        assert_eq!(
            payload_fingerprint("property.create", &ordered),
            payload_fingerprint("property.create", &reversed)
        );
        assert_ne!(
            payload_fingerprint("property.create", &ordered),
            payload_fingerprint("property.update", &ordered)
        );
    }
}
