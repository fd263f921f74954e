//! Claim session state and the in-memory session registry.
//!
//! One logical session per user interaction. The registry enforces at most
//! one in-flight transition per session: a transition is claimed with
//! [`SessionStore::begin`], runs its external calls without holding the
//! entry, and is settled with [`SessionStore::complete`] or
//! [`SessionStore::fail`]. A reset bumps the session generation, so the
//! result of an abandoned request is discarded on arrival.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ClaimError, Result};
use crate::model::{DamageReport, PartPrice, PayoutReceipt, Policy};

/// Stage of a claim session. Errors are not a stage: a failed transition
/// records the error on the session and the stage stays put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimStage {
    Upload,
    Analyzed,
    Verified,
    Disbursed,
}

/// Working state of one claim.
///
/// `estimate` is only set once `report` is; `receipt` only once `policy` and
/// `estimate` both are.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimSession {
    pub id: String,
    pub stage: ClaimStage,
    pub report: Option<DamageReport>,
    pub matched_parts: Vec<PartPrice>,
    pub estimate: Option<i64>,
    pub policy: Option<Policy>,
    pub receipt: Option<PayoutReceipt>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    in_flight: bool,
    #[serde(skip)]
    generation: u64,
}

impl ClaimSession {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            stage: ClaimStage::Upload,
            report: None,
            matched_parts: Vec::new(),
            estimate: None,
            policy: None,
            receipt: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            in_flight: false,
            generation: 0,
        }
    }

    fn clear(&mut self) {
        self.stage = ClaimStage::Upload;
        self.report = None;
        self.matched_parts = Vec::new();
        self.estimate = None;
        self.policy = None;
        self.receipt = None;
        self.last_error = None;
        self.updated_at = Utc::now();
    }
}

/// Ticket for one in-flight transition. Carries a snapshot of the session as
/// it was claimed, so the transition can read prior stage results without
/// touching the registry.
#[derive(Debug)]
pub struct TransitionGuard {
    pub session_id: String,
    pub snapshot: ClaimSession,
    generation: u64,
}

/// In-memory session registry keyed by session id.
pub struct SessionStore {
    sessions: DashMap<String, ClaimSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn create(&self) -> ClaimSession {
        let session = ClaimSession::new();
        self.sessions.insert(session.id.clone(), session.clone());
        session
    }

    pub fn get(&self, id: &str) -> Result<ClaimSession> {
        self.sessions
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| ClaimError::SessionNotFound(id.to_string()))
    }

    /// Claim the session for one transition. A second submit while a request
    /// is pending is rejected, not queued; an action that is not legal from
    /// the current stage is rejected as well.
    pub fn begin(
        &self,
        id: &str,
        expected: ClaimStage,
        action: &'static str,
    ) -> Result<TransitionGuard> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| ClaimError::SessionNotFound(id.to_string()))?;
        if entry.in_flight {
            return Err(ClaimError::SessionBusy);
        }
        if entry.stage != expected {
            return Err(ClaimError::InvalidTransition {
                from: entry.stage,
                action,
            });
        }
        entry.in_flight = true;
        Ok(TransitionGuard {
            session_id: id.to_string(),
            generation: entry.generation,
            snapshot: entry.clone(),
        })
    }

    /// Commit the transition carried by `guard`. If the session was reset
    /// while the request was in flight, the result is discarded and the
    /// caller observes [`ClaimError::SessionReset`].
    pub fn complete<F>(&self, guard: TransitionGuard, apply: F) -> Result<ClaimSession>
    where
        F: FnOnce(&mut ClaimSession),
    {
        let mut entry = self
            .sessions
            .get_mut(&guard.session_id)
            .ok_or_else(|| ClaimError::SessionNotFound(guard.session_id.clone()))?;
        if entry.generation != guard.generation {
            return Err(ClaimError::SessionReset);
        }
        entry.in_flight = false;
        entry.last_error = None;
        apply(&mut entry);
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    /// Settle a failed transition: the stage stays put and the error is kept
    /// on the session for display.
    pub fn fail(&self, guard: TransitionGuard, message: &str) {
        if let Some(mut entry) = self.sessions.get_mut(&guard.session_id) {
            if entry.generation == guard.generation {
                entry.in_flight = false;
                entry.last_error = Some(message.to_string());
                entry.updated_at = Utc::now();
            }
        }
    }

    /// User-triggered reset. Discards all session state and invalidates any
    /// in-flight request.
    pub fn reset(&self, id: &str) -> Result<ClaimSession> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| ClaimError::SessionNotFound(id.to_string()))?;
        entry.generation += 1;
        entry.in_flight = false;
        entry.clear();
        Ok(entry.clone())
    }

    pub fn remove(&self, id: &str) {
        self.sessions.remove(id);
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
