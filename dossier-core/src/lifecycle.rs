//! Research job state machine.
//!
//! ```text
//! pending ──Start──▶ running ──Complete──▶ completed
//!    ▲                  │ ▲
//!    │                  │ └─Submitted (records the remote handle)
//!    │                  └──Fail / Cancel──▶ error
//!    └──────────────Retry───────────────────┘
//! ```
//!
//! Every mutation of a [`Research`] after creation is a [`ResearchPatch`]. A
//! patch touches only the fields its transition owns and is rejected whole if
//! the record is not in the required status.

use chrono::{DateTime, Utc};

use crate::error::JobError;
use crate::types::{Research, ResearchCost, ResearchResult, ResearchStatus};

/// Failure message recorded when a job is cancelled by the caller.
pub const CANCELLED_MESSAGE: &str = "Cancelled by user";

/// An explicit, transition-scoped update to a research record.
#[derive(Debug, Clone, PartialEq)]
pub enum ResearchPatch {
    /// `pending → running`. Requires a non-empty prompt.
    Start,
    /// `running → running`, records the remote job handle.
    Submitted { response_id: String },
    /// `running → completed`, sets result and cost together.
    Complete {
        result: ResearchResult,
        cost: ResearchCost,
        completed_at: DateTime<Utc>,
    },
    /// `running → error` after a remote or local failure.
    Fail {
        message: String,
        completed_at: DateTime<Utc>,
    },
    /// `running → error` on caller request.
    Cancel { completed_at: DateTime<Utc> },
    /// `error → pending`, operator-triggered.
    Retry,
}

impl ResearchPatch {
    /// Short operation name, used in error messages and logs.
    pub fn name(&self) -> &'static str {
        match self {
            ResearchPatch::Start => "start",
            ResearchPatch::Submitted { .. } => "submit",
            ResearchPatch::Complete { .. } => "complete",
            ResearchPatch::Fail { .. } => "fail",
            ResearchPatch::Cancel { .. } => "cancel",
            ResearchPatch::Retry => "retry",
        }
    }

    /// The status a record must be in for this patch to apply.
    pub fn required_status(&self) -> ResearchStatus {
        match self {
            ResearchPatch::Start => ResearchStatus::Pending,
            ResearchPatch::Submitted { .. }
            | ResearchPatch::Complete { .. }
            | ResearchPatch::Fail { .. }
            | ResearchPatch::Cancel { .. } => ResearchStatus::Running,
            ResearchPatch::Retry => ResearchStatus::Error,
        }
    }

    /// The status a record is in after this patch applies.
    pub fn target_status(&self) -> ResearchStatus {
        match self {
            ResearchPatch::Start | ResearchPatch::Submitted { .. } => ResearchStatus::Running,
            ResearchPatch::Complete { .. } => ResearchStatus::Completed,
            ResearchPatch::Fail { .. } | ResearchPatch::Cancel { .. } => ResearchStatus::Error,
            ResearchPatch::Retry => ResearchStatus::Pending,
        }
    }
}

impl Research {
    /// Apply a patch, or leave the record untouched and return `InvalidState`.
    pub fn apply(&mut self, patch: ResearchPatch) -> Result<(), JobError> {
        let required = patch.required_status();
        if self.status != required {
            return Err(JobError::InvalidState {
                id: self.id.clone(),
                status: self.status,
                reason: format!("{} requires a {required} job", patch.name()),
            });
        }

        match patch {
            ResearchPatch::Start => {
                if self.prompt.trim().is_empty() {
                    return Err(JobError::InvalidState {
                        id: self.id.clone(),
                        status: self.status,
                        reason: "prompt is empty".into(),
                    });
                }
                self.status = ResearchStatus::Running;
            }
            ResearchPatch::Submitted { response_id } => {
                self.response_id = Some(response_id);
            }
            ResearchPatch::Complete {
                result,
                cost,
                completed_at,
            } => {
                self.status = ResearchStatus::Completed;
                self.result = Some(result);
                self.cost = Some(cost);
                self.completed_at = Some(completed_at);
                self.error = None;
            }
            ResearchPatch::Fail {
                message,
                completed_at,
            } => {
                self.status = ResearchStatus::Error;
                self.completed_at = Some(completed_at);
                self.error = Some(message);
            }
            ResearchPatch::Cancel { completed_at } => {
                self.status = ResearchStatus::Error;
                self.completed_at = Some(completed_at);
                self.error = Some(CANCELLED_MESSAGE.to_string());
            }
            ResearchPatch::Retry => {
                self.status = ResearchStatus::Pending;
                self.completed_at = None;
                self.error = None;
                self.response_id = None;
            }
        }
        Ok(())
    }
}
