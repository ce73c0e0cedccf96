use thiserror::Error;

use crate::model::{InvalidStateError, LikertError, SessionStateError, SurveyError};

/// Any domain-level failure, for callers that do not care which rule broke.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Survey(#[from] SurveyError),
    #[error(transparent)]
    Likert(#[from] LikertError),
    #[error(transparent)]
    InvalidState(#[from] InvalidStateError),
    #[error(transparent)]
    SessionState(#[from] SessionStateError),
}
