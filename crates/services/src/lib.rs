#![forbid(unsafe_code)]

pub mod error;
pub mod identity;
pub mod network;
pub mod reconciler;
pub mod sessions;

pub use survey_core::Clock;
pub use sessions as session;

pub use error::{IdentityError, ReconcileError, SessionError};
pub use identity::{IdentityProvider, StaticIdentity};
pub use network::{NetworkStatus, NetworkSwitch};
pub use reconciler::{FlushReport, SubmissionReconciler};

pub use sessions::{SessionOrigin, StepOutcome, SurveySession, SurveySessionService, session_key};
