use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::QuestionId;

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LikertError {
    #[error("invalid likert value: {0} (expected one of -2, -1, 1, 2)")]
    OutOfScale(i64),
}

//
// ─── LIKERT VALUE ─────────────────────────────────────────────────────────────
//

/// Four-point agreement score. There is no neutral option.
///
/// Persisted and transmitted as the integers -2, -1, 1 and 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum LikertValue {
    StronglyDisagree,
    Disagree,
    Agree,
    StronglyAgree,
}

impl LikertValue {
    pub const ALL: [LikertValue; 4] = [
        LikertValue::StronglyDisagree,
        LikertValue::Disagree,
        LikertValue::Agree,
        LikertValue::StronglyAgree,
    ];

    #[must_use]
    pub fn value(self) -> i8 {
        match self {
            LikertValue::StronglyDisagree => -2,
            LikertValue::Disagree => -1,
            LikertValue::Agree => 1,
            LikertValue::StronglyAgree => 2,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            LikertValue::StronglyDisagree => "strongly disagree",
            LikertValue::Disagree => "disagree",
            LikertValue::Agree => "agree",
            LikertValue::StronglyAgree => "strongly agree",
        }
    }
}

impl TryFrom<i64> for LikertValue {
    type Error = LikertError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -2 => Ok(Self::StronglyDisagree),
            -1 => Ok(Self::Disagree),
            1 => Ok(Self::Agree),
            2 => Ok(Self::StronglyAgree),
            other => Err(LikertError::OutOfScale(other)),
        }
    }
}

impl From<LikertValue> for i64 {
    fn from(value: LikertValue) -> Self {
        i64::from(value.value())
    }
}

//
// ─── ANSWER ───────────────────────────────────────────────────────────────────
//

/// A participant's buffered answer to one question.
///
/// `likert` is `None` only while the participant has flagged "don't understand"
/// without picking a scale value; such an answer cannot be submitted or used to
/// advance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: QuestionId,
    pub likert: Option<LikertValue>,
    pub dont_understand: bool,
}

impl Answer {
    #[must_use]
    pub fn new(question_id: QuestionId, likert: Option<LikertValue>, dont_understand: bool) -> Self {
        Self {
            question_id,
            likert,
            dont_understand,
        }
    }

    /// True once a scale value has been chosen.
    #[must_use]
    pub fn is_submittable(&self) -> bool {
        self.likert.is_some()
    }
}
