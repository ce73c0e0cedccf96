//! Shared error types for the services crate.

use thiserror::Error;

use storage::local::LocalStoreError;
use storage::repository::StorageError;
use survey_core::model::{InvalidStateError, QuestionId, SessionStateError, SurveyId, UserId};

/// Missing, expired, or rejected authentication.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IdentityError {
    #[error("no authenticated user")]
    Unauthenticated,

    #[error("session belongs to {expected}, but {actual} is signed in")]
    UserMismatch { expected: UserId, actual: UserId },

    #[error("remote store denied access: {0}")]
    PermissionDenied(String),
}

/// Errors emitted by the persisted session engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error(transparent)]
    InvalidState(#[from] InvalidStateError),

    #[error(transparent)]
    LocalStore(#[from] LocalStoreError),

    #[error("persisted session is unreadable: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("persisted session is inconsistent: {0}")]
    Inconsistent(#[from] SessionStateError),

    #[error("survey not found: {0}")]
    SurveyNotFound(SurveyId),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by the submission reconciler.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReconcileError {
    #[error("no network connection")]
    Offline,

    /// A participant insert conflicted, yet no winner could be read back.
    #[error("participant for survey {survey_id} conflicted and could not be re-read")]
    ParticipantConflict { survey_id: SurveyId },

    #[error("{} of {attempted} responses failed to submit", .failed.len())]
    Submission {
        attempted: usize,
        failed: Vec<QuestionId>,
    },

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("remote store error: {0}")]
    Remote(StorageError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ReconcileError {
    /// Whether the user can simply retry the same flush.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Offline | Self::ParticipantConflict { .. } | Self::Submission { .. } => true,
            Self::Remote(err) => matches!(err, StorageError::Connection(_)),
            Self::Identity(_) | Self::Session(_) => false,
        }
    }
}

impl From<StorageError> for ReconcileError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::PermissionDenied(reason) => {
                Self::Identity(IdentityError::PermissionDenied(reason))
            }
            other => Self::Remote(other),
        }
    }
}

impl From<InvalidStateError> for ReconcileError {
    fn from(err: InvalidStateError) -> Self {
        Self::Session(SessionError::InvalidState(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_becomes_identity_error() {
        let err = ReconcileError::from(StorageError::PermissionDenied("rls".into()));
        assert!(matches!(
            err,
            ReconcileError::Identity(IdentityError::PermissionDenied(_))
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn transient_failures_are_retryable() {
        assert!(ReconcileError::Offline.is_retryable());
        assert!(ReconcileError::from(StorageError::Connection("reset".into())).is_retryable());
        assert!(
            ReconcileError::Submission {
                attempted: 5,
                failed: vec![QuestionId::new("q3")],
            }
            .is_retryable()
        );
        assert!(!ReconcileError::from(StorageError::Serialization("bad".into())).is_retryable());
    }

    #[test]
    fn submission_error_counts_failures() {
        let err = ReconcileError::Submission {
            attempted: 5,
            failed: vec![QuestionId::new("q3"), QuestionId::new("q4")],
        };
        assert_eq!(err.to_string(), "2 of 5 responses failed to submit");
    }
}
