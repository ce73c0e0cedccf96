use serde::{Deserialize, Serialize};

use crate::model::ids::{ContinuumId, QuestionId};

/// Which pole of its continuum a question leans towards.
///
/// A "right"-aligned statement scores positively on agreement; a "left"-aligned
/// one scores positively on disagreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    Left,
    Right,
}

impl Alignment {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Alignment::Left => "left",
            Alignment::Right => "right",
        }
    }

    /// Parses the persisted representation.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }
}

/// A single Likert statement of a survey. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub text: String,
    pub continuum: ContinuumId,
    pub alignment: Alignment,
    /// `None` when the survey author left the flag out; treated as optional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

impl Question {
    #[must_use]
    pub fn new(
        id: impl Into<QuestionId>,
        text: impl Into<String>,
        continuum: impl Into<ContinuumId>,
        alignment: Alignment,
        required: Option<bool>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            continuum: continuum.into(),
            alignment,
            required,
        }
    }

    /// Only an explicit `required: true` puts a question in the required group.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required == Some(true)
    }
}
