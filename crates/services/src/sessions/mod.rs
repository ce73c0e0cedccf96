mod engine;
mod workflow;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use engine::{SessionOrigin, SurveySession, session_key};
pub use workflow::{StepOutcome, SurveySessionService};
