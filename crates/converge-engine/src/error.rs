//! Engine error and step outcome types

use converge_common::{AwsError, ResourceKind};
use std::fmt;
use thiserror::Error;

/// A follow-up step of a `put` that runs after the resource exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Write the merged tag set
    ApplyTags,
    /// One of the kind's declared update calls
    Update(&'static str),
    /// Read and diff the attached member set as a whole
    ReconcileAttachments,
    /// Attach one member
    Attach(String),
    /// Detach one member
    Detach(String),
    /// Bind the created object's identifier to the descriptor
    BindIdentifier,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::ApplyTags => f.write_str("apply tags"),
            Step::Update(call) => write!(f, "{call}"),
            Step::ReconcileAttachments => f.write_str("reconcile attachments"),
            Step::Attach(member) => write!(f, "attach {member}"),
            Step::Detach(member) => write!(f, "detach {member}"),
            Step::BindIdentifier => f.write_str("bind identifier"),
        }
    }
}

/// Result of a single step. `error` is `None` on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: Step,
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn from_result<T, E: fmt::Display>(step: Step, result: &Result<T, E>) -> Self {
        Self {
            step,
            error: result.as_ref().err().map(|e| e.to_string()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Errors surfaced by the convergence engine
#[derive(Debug, Error)]
pub enum ConvergeError {
    #[error("{kind} '{key}' not found")]
    NotFound { kind: ResourceKind, key: String },

    #[error("{kind} '{key}' matches {} remote objects: {}", .matches.len(), .matches.join(", "))]
    AmbiguousIdentity {
        kind: ResourceKind,
        key: String,
        matches: Vec<String>,
    },

    #[error("{kind} '{identifier}' is managed by '{owner}', not '{manager}' (use force to take it over)")]
    Ownership {
        kind: ResourceKind,
        identifier: String,
        owner: String,
        manager: String,
    },

    #[error(
        "{kind} '{identifier}' converged partially: {}",
        describe_failures(.outcomes).join("; ")
    )]
    PartialConvergence {
        kind: ResourceKind,
        identifier: String,
        outcomes: Vec<StepOutcome>,
    },

    #[error(transparent)]
    Transport(#[from] AwsError),

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("waiting for {kind} '{identifier}' failed: {reason}")]
    Wait {
        kind: ResourceKind,
        identifier: String,
        reason: String,
    },
}

fn describe_failures(outcomes: &[StepOutcome]) -> Vec<String> {
    outcomes
        .iter()
        .filter_map(|o| o.error.as_ref().map(|e| format!("{} ({e})", o.step)))
        .collect()
}

impl ConvergeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConvergeError::NotFound { .. })
    }

    /// Steps that failed, for a partial convergence
    pub fn failed_steps(&self) -> Vec<&Step> {
        match self {
            ConvergeError::PartialConvergence { outcomes, .. } => outcomes
                .iter()
                .filter(|o| !o.succeeded())
                .map(|o| &o.step)
                .collect(),
            _ => Vec::new(),
        }
    }
}
