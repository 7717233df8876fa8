//! Processing state machine
//!
//! `initialized → pending → processing → {completed, error}`. Forward moves
//! are checked here; regressions only happen through the store's reset path,
//! used by [`crate::repository::MessageStore::reset_to_pending`] and by
//! caption edits.

use chrono::{DateTime, Duration, Utc};

use crate::error::{IngestError, Result};
use crate::models::{Message, ProcessingState};

/// Reason recorded when repair resets a stalled message
pub const STALLED_RESET_REASON: &str = "Reset from stuck processing state during repair";

/// Extra data accompanying a transition request
#[derive(Debug, Clone, Default)]
pub struct TransitionRequest {
    pub target: ProcessingState,
    pub analyzed_content: Option<serde_json::Value>,
    pub error_message: Option<String>,
    /// Allow `completed` without analysis
    pub allow_empty_completion: bool,
}

impl TransitionRequest {
    /// Plain move to `target`
    #[must_use]
    pub fn to(target: ProcessingState) -> Self {
        Self {
            target,
            ..Self::default()
        }
    }

    /// Complete with `content` as the analysis
    #[must_use]
    pub fn completed(content: serde_json::Value) -> Self {
        Self {
            target: ProcessingState::Completed,
            analyzed_content: Some(content),
            ..Self::default()
        }
    }

    /// Move to `error` recording `reason`
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            target: ProcessingState::Error,
            error_message: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// What a transition request amounts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPlan {
    /// Change state
    Apply,
    /// Already there with nothing new to record
    NoOp,
}

const fn rank(state: ProcessingState) -> u8 {
    match state {
        ProcessingState::Initialized => 0,
        ProcessingState::Pending => 1,
        ProcessingState::Processing => 2,
        ProcessingState::Completed | ProcessingState::Error => 3,
    }
}

/// Decide whether `request` may be applied to `message`
pub fn plan_transition(message: &Message, request: &TransitionRequest) -> Result<TransitionPlan> {
    let from = message.processing_state;
    let to = request.target;

    let content = request.analyzed_content.as_ref().or(message.analyzed_content.as_ref());
    let error = request
        .error_message
        .as_deref()
        .or(message.error_message.as_deref())
        .filter(|e| !e.trim().is_empty());

    if to == ProcessingState::Completed && content.is_none() && !request.allow_empty_completion {
        return Err(IngestError::InvalidTransition(format!(
            "message {} cannot complete without analyzed_content",
            message.id
        )));
    }
    if to == ProcessingState::Error && error.is_none() {
        return Err(IngestError::InvalidTransition(format!(
            "message {} cannot enter error without error_message",
            message.id
        )));
    }

    if from == to {
        let new_content = request
            .analyzed_content
            .as_ref()
            .is_some_and(|c| message.analyzed_content.as_ref() != Some(c));
        let new_error = request
            .error_message
            .as_ref()
            .is_some_and(|e| message.error_message.as_ref() != Some(e));
        return Ok(if new_content || new_error {
            TransitionPlan::Apply
        } else {
            TransitionPlan::NoOp
        });
    }

    if rank(to) <= rank(from) {
        return Err(IngestError::InvalidTransition(format!(
            "message {} cannot move from {from} to {to}",
            message.id
        )));
    }

    Ok(TransitionPlan::Apply)
}

/// When a message stuck in `processing` counts as stalled
#[derive(Debug, Clone, Copy)]
pub struct StallPolicy {
    threshold: Duration,
}

impl StallPolicy {
    #[must_use]
    pub fn from_secs(secs: u64) -> Self {
        Self {
            threshold: Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000)),
        }
    }

    /// Messages that entered processing before this instant are stalled
    #[must_use]
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.threshold
    }

    /// In `processing` without analysis since before the cutoff
    #[must_use]
    pub fn is_stalled(&self, message: &Message, now: DateTime<Utc>) -> bool {
        let started = message.processing_started_at.unwrap_or(message.updated_at);
        message.processing_state == ProcessingState::Processing
            && message.analyzed_content.is_none()
            && started < self.cutoff(now)
    }
}

impl Default for StallPolicy {
    fn default() -> Self {
        Self::from_secs(1800)
    }
}
