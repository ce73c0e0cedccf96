mod answer;
mod ids;
mod question;
mod session;
mod survey;

pub use answer::{Answer, LikertError, LikertValue};
pub use ids::{CohortId, ContinuumId, ParseIdError, ParticipantId, QuestionId, SurveyId, UserId};
pub use question::{Alignment, Question};
pub use session::{
    InvalidStateError, PhaseTransition, SessionPhase, SessionProgress, SessionState,
    SessionStateError,
};
pub use survey::{Continuum, Survey, SurveyDraft, SurveyError};
