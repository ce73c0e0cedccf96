use std::sync::Arc;

use storage::local::LocalSessionStore;
use storage::repository::{Storage, SurveyRepository};
use survey_core::Clock;
use survey_core::model::{
    CohortId, InvalidStateError, LikertValue, PhaseTransition, QuestionId, SessionPhase,
    SessionProgress, Survey, SurveyId, UserId,
};

use super::engine::SurveySession;
use crate::error::{IdentityError, ReconcileError, SessionError};
use crate::identity::IdentityProvider;
use crate::network::NetworkStatus;
use crate::reconciler::{FlushReport, SubmissionReconciler};

/// Result of one participant action.
#[derive(Debug)]
pub struct StepOutcome {
    pub transition: Option<PhaseTransition>,
    pub progress: SessionProgress,
    /// Set when this step completed the session and the final flush ran.
    pub final_flush: Option<Result<FlushReport, ReconcileError>>,
}

impl StepOutcome {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.progress.phase == SessionPhase::Completed
    }
}

/// Orchestrates session start, answering, and the flushes each phase change
/// triggers.
#[derive(Clone)]
pub struct SurveySessionService {
    clock: Clock,
    surveys: Arc<dyn SurveyRepository>,
    local: Arc<dyn LocalSessionStore>,
    identity: Arc<dyn IdentityProvider>,
    reconciler: SubmissionReconciler,
    rng_seed: Option<u64>,
}

impl SurveySessionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        storage: &Storage,
        local: Arc<dyn LocalSessionStore>,
        identity: Arc<dyn IdentityProvider>,
        network: Arc<dyn NetworkStatus>,
    ) -> Self {
        Self {
            clock,
            surveys: Arc::clone(&storage.surveys),
            local,
            identity,
            reconciler: SubmissionReconciler::from_storage(clock, storage, network),
            rng_seed: None,
        }
    }

    /// Sequence fresh sessions deterministically.
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    #[must_use]
    pub fn reconciler(&self) -> &SubmissionReconciler {
        &self.reconciler
    }

    /// Load the survey and resume or start the signed-in user's session.
    ///
    /// A survey without questions is already completed on start; callers
    /// finalize it directly.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Identity` when nobody is signed in,
    /// `SurveyNotFound` for an unknown survey, and storage or local store
    /// errors otherwise.
    pub async fn start_session(
        &self,
        survey_id: &SurveyId,
        cohort_id: Option<CohortId>,
    ) -> Result<SurveySession, SessionError> {
        let user_id = self.identity.current_user().await?;
        let survey = self.load_survey(survey_id).await?;
        SurveySession::open(
            Arc::clone(&self.local),
            survey,
            user_id,
            cohort_id,
            self.clock,
            self.rng_seed,
        )
    }

    /// Load the signed-in user's persisted session, if any, without starting one.
    ///
    /// # Errors
    ///
    /// Same as [`Self::start_session`], plus `Corrupt`/`Inconsistent` for an
    /// untrustworthy persisted document.
    pub async fn load_session(
        &self,
        survey_id: &SurveyId,
    ) -> Result<Option<SurveySession>, SessionError> {
        let user_id = self.identity.current_user().await?;
        let survey = self.load_survey(survey_id).await?;
        SurveySession::load(Arc::clone(&self.local), survey, &user_id)
    }

    async fn load_survey(&self, survey_id: &SurveyId) -> Result<Survey, SessionError> {
        self.surveys
            .get_survey(survey_id)
            .await?
            .ok_or_else(|| SessionError::SurveyNotFound(survey_id.clone()))
    }

    /// Record an answer for any question without moving, e.g. a bare
    /// "don't understand" flag.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` for misuse or local store failures.
    pub fn record(
        &self,
        session: &mut SurveySession,
        question_id: &QuestionId,
        likert: Option<LikertValue>,
        dont_understand: bool,
    ) -> Result<SessionProgress, SessionError> {
        session.record_answer(question_id, likert, dont_understand)?;
        Ok(session.progress())
    }

    /// Answer the current question and move on.
    ///
    /// Optional answers are streamed to the remote store as they come; the
    /// step that completes the session runs the final flush.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` when no question is current, and
    /// local store failures. Remote failures never fail the step; see
    /// `StepOutcome::final_flush`.
    pub async fn answer_current(
        &self,
        session: &mut SurveySession,
        likert: LikertValue,
        dont_understand: bool,
    ) -> Result<StepOutcome, SessionError> {
        let Some(question_id) = session.state().current_question_id().cloned() else {
            return Err(InvalidStateError::WrongPhase {
                operation: "answer_current",
                phase: session.state().phase(),
            }
            .into());
        };
        let was_optional = session.state().phase() == SessionPhase::AnsweringOptional;

        session.record_answer(&question_id, Some(likert), dont_understand)?;
        let transition = session.advance()?;

        if was_optional && !session.is_complete() {
            self.reconciler.stream_flush(session, &question_id).await;
        }
        Ok(self.finish_step(session, transition).await)
    }

    /// Step back within the required block.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` once past the required block.
    pub fn retreat(&self, session: &mut SurveySession) -> Result<bool, SessionError> {
        session.retreat()
    }

    /// "Answer more" at the transition screen.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless at the transition screen.
    pub fn answer_more(&self, session: &mut SurveySession) -> Result<StepOutcome, SessionError> {
        let transition = session.answer_more()?;
        Ok(StepOutcome {
            transition: Some(transition),
            progress: session.progress(),
            final_flush: None,
        })
    }

    /// "Go to results" at the transition screen; runs the final flush.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless at the transition screen.
    pub async fn go_to_results(
        &self,
        session: &mut SurveySession,
    ) -> Result<StepOutcome, SessionError> {
        let transition = session.go_to_results()?;
        Ok(self.finish_step(session, Some(transition)).await)
    }

    /// Retry the final flush of a completed session.
    ///
    /// Safe to call any number of times: responses already stored are never
    /// sent twice.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::Identity` if the signed-in user changed or
    /// signed out, and any error of `SubmissionReconciler::final_flush`.
    pub async fn finalize(
        &self,
        session: &mut SurveySession,
    ) -> Result<FlushReport, ReconcileError> {
        let current = self.identity.current_user().await?;
        ensure_same_user(session.state().user_id(), current)?;
        self.reconciler.final_flush(session).await
    }

    async fn finish_step(
        &self,
        session: &mut SurveySession,
        transition: Option<PhaseTransition>,
    ) -> StepOutcome {
        let final_flush = match transition {
            Some(t) if t.completes() => Some(self.finalize(session).await),
            _ => None,
        };
        StepOutcome {
            transition,
            progress: session.progress(),
            final_flush,
        }
    }
}

fn ensure_same_user(expected: &UserId, actual: UserId) -> Result<(), IdentityError> {
    if *expected == actual {
        Ok(())
    } else {
        Err(IdentityError::UserMismatch {
            expected: expected.clone(),
            actual,
        })
    }
}
