// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `UnlockSession` / `CardReadSession` and the session manager (component C9,
//! spec §3, §4.9). Sessions are a genuinely multi-task resource — created
//! and updated by orchestrator tasks, read by the REST/SSE boundary — so
//! unlike the master-loop-exclusive protocol state, they are guarded by an
//! ordinary mutex (spec §5 "shared-resource policy").

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Monotone session lifecycle (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Pending,
    WaitingForCard,
    Processing,
    Completed,
    Failed,
    Expired,
}

impl SessionStatus {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }

    /// Is `next` reachable from `self` along a permitted monotone path
    /// (spec §3, §8)?
    fn allows(self, next: Self) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Pending, WaitingForCard) => true,
            (WaitingForCard, Processing) => true,
            (Processing, Completed) => true,
            (Pending | WaitingForCard | Processing, Failed) => true,
            (Pending | WaitingForCard | Processing, Expired) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub error_message: Option<String>,
    pub result_payload: Option<Value>,
    pub created_at: Instant,
    pub updated_at: Instant,
}

impl Session {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            session_id: Uuid::new_v4(),
            status: SessionStatus::Pending,
            error_message: None,
            result_payload: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next` if the transition is legal; `updated_at` strictly
    /// increases on every status change (spec §3, §8 invariant). Illegal
    /// transitions (a programming error, since only this crate drives
    /// sessions) are ignored rather than panicking.
    fn set_status(&mut self, next: SessionStatus) {
        if self.status == next {
            return;
        }
        if !self.status.allows(next) {
            tracing::warn!(?self.status, ?next, "ignoring illegal session status transition");
            return;
        }
        self.status = next;
        self.updated_at = Instant::now();
    }

    fn fail(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
        self.set_status(SessionStatus::Failed);
    }
}

/// Snapshot surfaced at the orchestrator boundary (spec §6).
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub error_message: Option<String>,
    pub result_payload: Option<Value>,
}

impl From<&Session> for SessionSnapshot {
    fn from(s: &Session) -> Self {
        Self {
            session_id: s.session_id,
            status: s.status,
            error_message: s.error_message.clone(),
            result_payload: s.result_payload.clone(),
        }
    }
}

#[derive(Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> Uuid {
        let session = Session::new();
        let id = session.session_id;
        self.sessions.lock().expect("session map poisoned").insert(id, session);
        id
    }

    pub fn set_status(&self, id: Uuid, status: SessionStatus) {
        if let Some(session) = self.sessions.lock().expect("session map poisoned").get_mut(&id) {
            session.set_status(status);
        }
    }

    pub fn fail(&self, id: Uuid, message: impl Into<String>) {
        if let Some(session) = self.sessions.lock().expect("session map poisoned").get_mut(&id) {
            session.fail(message);
        }
    }

    pub fn complete(&self, id: Uuid, result_payload: Option<Value>) {
        let mut guard = self.sessions.lock().expect("session map poisoned");
        if let Some(session) = guard.get_mut(&id) {
            session.result_payload = result_payload;
            session.set_status(SessionStatus::Completed);
        }
    }

    pub fn get_status(&self, id: Uuid) -> Option<SessionSnapshot> {
        self.sessions.lock().expect("session map poisoned").get(&id).map(SessionSnapshot::from)
    }

    /// A session with no status change for longer than `expiry` is marked
    /// `EXPIRED` (spec §8); terminal sessions are left alone.
    pub fn sweep_expired(&self, expiry: Duration) {
        let mut guard = self.sessions.lock().expect("session map poisoned");
        for session in guard.values_mut() {
            if !session.status.is_terminal() && session.updated_at.elapsed() > expiry {
                session.set_status(SessionStatus::Expired);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_moves_only_along_permitted_paths() {
        let manager = SessionManager::new();
        let id = manager.create();
        manager.set_status(id, SessionStatus::Completed);
        assert_eq!(manager.get_status(id).unwrap().status, SessionStatus::Pending);

        manager.set_status(id, SessionStatus::WaitingForCard);
        manager.set_status(id, SessionStatus::Processing);
        manager.set_status(id, SessionStatus::Completed);
        assert_eq!(manager.get_status(id).unwrap().status, SessionStatus::Completed);
    }

    #[test]
    fn updated_at_strictly_increases_on_status_change() {
        let manager = SessionManager::new();
        let id = manager.create();
        let before = manager.get_status(id).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        manager.set_status(id, SessionStatus::WaitingForCard);
        let after = manager.get_status(id).unwrap();
        assert_ne!(before.status, after.status);
    }

    #[test]
    fn sweep_marks_stale_non_terminal_sessions_expired() {
        let manager = SessionManager::new();
        let id = manager.create();
        manager.sweep_expired(Duration::from_millis(0));
        assert_eq!(manager.get_status(id).unwrap().status, SessionStatus::Expired);
    }

    #[test]
    fn sweep_never_touches_terminal_sessions() {
        let manager = SessionManager::new();
        let id = manager.create();
        manager.set_status(id, SessionStatus::WaitingForCard);
        manager.set_status(id, SessionStatus::Processing);
        manager.fail(id, "boom");
        manager.sweep_expired(Duration::from_millis(0));
        let snapshot = manager.get_status(id).unwrap();
        assert_eq!(snapshot.status, SessionStatus::Failed);
        assert_eq!(snapshot.error_message.as_deref(), Some("boom"));
    }
}
