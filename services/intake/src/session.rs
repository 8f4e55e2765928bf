//! Per-contributor session state.
//!
//! ```text
//! CollectingIdentity ──▶ AwaitingUpload ──▶ Processing ──▶ Recording ──▶ Done
//!        ▲    │               ▲    │             │    │         │
//!        └────┘ invalid       └────┘ batch size  │    │         │
//!                             ▲      rejected    │    │         │
//!                             └──────────────────┘    ▼         ▼
//!                               nothing stored       Failed ◀───┘
//! ```

use crate::contributor::{Contributor, IdentityForm, ValidationError};
use crate::submission::{BatchSizeError, BatchSummary};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use uuid::Uuid;

/// Stage of a contributor session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    CollectingIdentity,
    AwaitingUpload,
    Processing,
    Recording,
    Done,
    Failed,
}

impl SessionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStage::CollectingIdentity => "collecting_identity",
            SessionStage::AwaitingUpload => "awaiting_upload",
            SessionStage::Processing => "processing",
            SessionStage::Recording => "recording",
            SessionStage::Done => "done",
            SessionStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStage::Done | SessionStage::Failed)
    }

    /// A batch is running; the session must outlive it
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SessionStage::Processing | SessionStage::Recording)
    }
}

/// Attempted an action the current stage does not allow
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("session is {}, expected {}", .actual.as_str(), .expected.as_str())]
pub struct StageError {
    pub expected: SessionStage,
    pub actual: SessionStage,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BeginBatchError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    BatchSize(#[from] BatchSizeError),
}

/// One contributor's pass through the form
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    id: Uuid,
    stage: SessionStage,
    contributor: Option<Contributor>,
    last_batch: Option<BatchSummary>,
    failure: Option<String>,
    created_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            stage: SessionStage::CollectingIdentity,
            contributor: None,
            last_batch: None,
            failure: None,
            created_at: now,
            last_active_at: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stage(&self) -> SessionStage {
        self.stage
    }

    pub fn contributor(&self) -> Option<&Contributor> {
        self.contributor.as_ref()
    }

    pub fn last_batch(&self) -> Option<&BatchSummary> {
        self.last_batch.as_ref()
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time of the last transition or update
    pub fn last_active_at(&self) -> DateTime<Utc> {
        self.last_active_at
    }

    /// Idle since before `cutoff` and no batch running
    pub fn is_expired(&self, cutoff: DateTime<Utc>) -> bool {
        !self.stage.is_in_flight() && self.last_active_at <= cutoff
    }

    fn expect_stage(&self, expected: SessionStage) -> Result<(), StageError> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(StageError {
                expected,
                actual: self.stage,
            })
        }
    }

    /// CollectingIdentity -> AwaitingUpload on valid fields; stage unchanged otherwise
    pub fn submit_identity(
        &mut self,
        form: &IdentityForm,
        require_organisation: bool,
    ) -> Result<&Contributor, IdentityError> {
        self.expect_stage(SessionStage::CollectingIdentity)?;
        let contributor = Contributor::from_form(form, require_organisation)?;

        self.stage = SessionStage::AwaitingUpload;
        Ok(self.contributor.insert(contributor))
    }

    /// AwaitingUpload -> Processing for a batch of 1..=max_batch_size items
    pub fn begin_batch(
        &mut self,
        item_count: usize,
        max_batch_size: usize,
    ) -> Result<Contributor, BeginBatchError> {
        self.expect_stage(SessionStage::AwaitingUpload)?;
        check_batch_size(item_count, max_batch_size)?;

        let contributor = self.contributor.clone().ok_or(StageError {
            expected: SessionStage::AwaitingUpload,
            actual: SessionStage::CollectingIdentity,
        })?;

        self.stage = SessionStage::Processing;
        Ok(contributor)
    }

    /// Processing -> Recording once every item was attempted
    pub fn begin_recording(&mut self) -> Result<(), StageError> {
        self.expect_stage(SessionStage::Processing)?;
        self.stage = SessionStage::Recording;
        Ok(())
    }

    /// Processing -> AwaitingUpload when no photo of the batch could be stored
    pub fn reopen_upload(&mut self, summary: BatchSummary) -> Result<(), StageError> {
        self.expect_stage(SessionStage::Processing)?;
        self.stage = SessionStage::AwaitingUpload;
        self.last_batch = Some(summary);
        Ok(())
    }

    /// Recording -> Done
    pub fn complete(&mut self, summary: BatchSummary) -> Result<(), StageError> {
        self.expect_stage(SessionStage::Recording)?;
        self.stage = SessionStage::Done;
        self.last_batch = Some(summary);
        Ok(())
    }

    /// Processing | Recording -> Failed
    pub fn fail(&mut self, message: String) -> Result<(), StageError> {
        match self.stage {
            SessionStage::Processing | SessionStage::Recording => {
                self.stage = SessionStage::Failed;
                self.failure = Some(message);
                Ok(())
            }
            actual => Err(StageError {
                expected: SessionStage::Processing,
                actual,
            }),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

pub fn check_batch_size(item_count: usize, max_batch_size: usize) -> Result<(), BatchSizeError> {
    if item_count == 0 {
        return Err(BatchSizeError::Empty);
    }
    if item_count > max_batch_size {
        return Err(BatchSizeError::TooMany {
            count: item_count,
            max: max_batch_size,
        });
    }
    Ok(())
}

/// In-process session registry. The lock is only held for stage transitions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session in `CollectingIdentity`
    pub async fn create(&self) -> Session {
        let session = Session::new();
        self.sessions
            .write()
            .await
            .insert(session.id(), session.clone());
        info!(session_id = %session.id(), "Session created");
        session
    }

    /// Snapshot of a session
    pub async fn get(&self, id: Uuid) -> Option<Session> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Apply `f` to a session under the write lock
    pub async fn update<T>(&self, id: Uuid, f: impl FnOnce(&mut Session) -> T) -> Option<T> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id)?;
        let before = session.stage();
        let result = f(session);
        session.last_active_at = Utc::now();
        if session.stage() != before {
            debug!(
                session_id = %id,
                from = before.as_str(),
                to = session.stage().as_str(),
                "Session stage changed"
            );
        }
        Some(result)
    }

    /// Drop sessions idle for longer than `ttl`. Sessions with a running
    /// batch are kept regardless of age.
    pub async fn evict_expired(&self, ttl: Duration) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return 0;
        };
        let cutoff = Utc::now() - ttl;

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, session| {
            let expired = session.is_expired(cutoff);
            if expired {
                debug!(
                    session_id = %id,
                    stage = session.stage().as_str(),
                    created_at = %session.created_at(),
                    "Session expired"
                );
            }
            !expired
        });
        let evicted = before - sessions.len();

        metrics::gauge!("intake.sessions.active").set(sessions.len() as f64);
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "Expired sessions removed");
        }
        evicted
    }

    /// Periodically evict expired sessions until the returned handle is aborted
    pub fn spawn_sweeper(self: Arc<Self>, ttl: Duration, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.evict_expired(ttl).await;
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
