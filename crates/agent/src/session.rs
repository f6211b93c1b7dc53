//! Sessions: one conversation's state, snapshots, and cancellation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};
use uuid::Uuid;
use windlass_core::{Result, TurnLog};

pub type SessionId = Uuid;

/// Where a session is within its current round.
///
/// `AwaitingToolResults` marks the window between appending a model turn
/// with tool invocations and appending their results; the loop skips log
/// sanitation while the flag is up, so in-flight invocations are never
/// misread as orphans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    Idle,
    AwaitingToolResults,
}

/// One conversation: its log, phase, and cancellation channel.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub log: TurnLog,
    pub phase: RoundPhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    cancel: watch::Sender<bool>,
}

/// Cancels in-flight tool executions for one session. Cloneable and
/// usable from any task.
#[derive(Debug, Clone)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

impl Session {
    pub fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            log: TurnLog::new(),
            phase: RoundPhase::Idle,
            created_at: now,
            updated_at: now,
            cancel,
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    /// Reset the cancellation flag and subscribe for the next turn.
    pub(crate) fn arm_cancel(&self) -> watch::Receiver<bool> {
        self.cancel.send_replace(false);
        self.cancel.subscribe()
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// A serializable view of this session. The log's cache hint is
    /// transient and never part of a snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            created_at: self.created_at,
            saved_at: Utc::now(),
            log: self.log.clone(),
        }
    }

    /// Write a snapshot into `dir`, returning the file path.
    pub async fn save(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let snapshot = self.snapshot();
        let short_id = &self.id.simple().to_string()[..8];
        let filename = format!(
            "conversation_{short_id}_{}.json",
            snapshot.saved_at.format("%Y%m%d_%H%M%S")
        );
        let path = dir.join(filename);
        let json = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(&path, json).await?;
        info!(path = %path.display(), turns = self.log.len(), "Saved session");
        Ok(path)
    }

    /// Restore a session from a snapshot file. The restored session gets
    /// a fresh cancellation channel and an idle phase.
    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        let snapshot: SessionSnapshot = serde_json::from_str(&json)?;
        let (cancel, _) = watch::channel(false);
        debug!(id = %snapshot.id, turns = snapshot.log.len(), "Loaded session");
        Ok(Self {
            id: snapshot.id,
            log: snapshot.log,
            phase: RoundPhase::Idle,
            created_at: snapshot.created_at,
            updated_at: snapshot.saved_at,
            cancel,
        })
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// On-disk form of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
    pub log: TurnLog,
}

/// Shared map of live sessions, keyed by id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: std::sync::Mutex<HashMap<SessionId, Arc<Mutex<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new session.
    pub fn create(&self) -> (SessionId, Arc<Mutex<Session>>) {
        let session = Session::new();
        let id = session.id;
        let handle = Arc::new(Mutex::new(session));
        self.sessions.lock().unwrap().insert(id, Arc::clone(&handle));
        (id, handle)
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    pub fn remove(&self, id: &SessionId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.lock().unwrap().remove(id)
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.lock().unwrap().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
