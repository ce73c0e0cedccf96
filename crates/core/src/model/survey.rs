use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

use crate::model::ids::{ContinuumId, QuestionId, SurveyId};
use crate::model::question::Question;

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SurveyError {
    #[error("survey id must not be empty")]
    EmptyId,

    #[error("question id must not be empty")]
    EmptyQuestionId,

    #[error("duplicate question id: {0}")]
    DuplicateQuestion(QuestionId),

    #[error("question {question} references unknown continuum {continuum}")]
    UnknownContinuum {
        question: QuestionId,
        continuum: ContinuumId,
    },
}

//
// ─── CONTINUUM ────────────────────────────────────────────────────────────────
//

/// Descriptive metadata for a measurement axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuum {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_label: Option<String>,
}

impl Continuum {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            left_label: None,
            right_label: None,
        }
    }
}

//
// ─── SURVEY ───────────────────────────────────────────────────────────────────
//

/// Unvalidated survey document, as read from JSON or storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyDraft {
    pub id: SurveyId,
    #[serde(default)]
    pub title: String,
    pub questions: Vec<Question>,
    #[serde(default)]
    pub continua: BTreeMap<ContinuumId, Continuum>,
}

impl SurveyDraft {
    /// Validate the draft into an immutable `Survey`.
    ///
    /// # Errors
    ///
    /// Returns `SurveyError` for empty ids, duplicate question ids, or a
    /// question whose continuum is missing from `continua`.
    pub fn validate(self) -> Result<Survey, SurveyError> {
        if self.id.is_empty() {
            return Err(SurveyError::EmptyId);
        }

        let mut seen = HashSet::with_capacity(self.questions.len());
        for question in &self.questions {
            if question.id.is_empty() {
                return Err(SurveyError::EmptyQuestionId);
            }
            if !seen.insert(question.id.clone()) {
                return Err(SurveyError::DuplicateQuestion(question.id.clone()));
            }
            if !self.continua.contains_key(&question.continuum) {
                return Err(SurveyError::UnknownContinuum {
                    question: question.id.clone(),
                    continuum: question.continuum.clone(),
                });
            }
        }

        Ok(Survey {
            id: self.id,
            title: self.title,
            questions: self.questions,
            continua: self.continua,
        })
    }
}

/// A loaded survey. Immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SurveyDraft", into = "SurveyDraft")]
pub struct Survey {
    id: SurveyId,
    title: String,
    questions: Vec<Question>,
    continua: BTreeMap<ContinuumId, Continuum>,
}

impl TryFrom<SurveyDraft> for Survey {
    type Error = SurveyError;

    fn try_from(draft: SurveyDraft) -> Result<Self, Self::Error> {
        draft.validate()
    }
}

impl From<Survey> for SurveyDraft {
    fn from(survey: Survey) -> Self {
        Self {
            id: survey.id,
            title: survey.title,
            questions: survey.questions,
            continua: survey.continua,
        }
    }
}

impl Survey {
    #[must_use]
    pub fn id(&self) -> &SurveyId {
        &self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn continua(&self) -> &BTreeMap<ContinuumId, Continuum> {
        &self.continua
    }

    #[must_use]
    pub fn question(&self, id: &QuestionId) -> Option<&Question> {
        self.questions.iter().find(|q| &q.id == id)
    }

    #[must_use]
    pub fn required_count(&self) -> usize {
        self.questions.iter().filter(|q| q.is_required()).count()
    }

    /// Set of question ids, used to check a persisted order still matches.
    #[must_use]
    pub fn question_ids(&self) -> HashSet<&QuestionId> {
        self.questions.iter().map(|q| &q.id).collect()
    }
}
