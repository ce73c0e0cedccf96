use std::fmt;
use std::sync::Arc;

use storage::local::LocalSessionStore;
use survey_core::model::{
    Answer, CohortId, InvalidStateError, LikertValue, ParticipantId, PhaseTransition, Question,
    QuestionId, SessionProgress, SessionState, Survey, SurveyId, UserId,
};
use survey_core::{Clock, sequence};

use crate::error::SessionError;

/// Local store key holding the session of one user for one survey.
#[must_use]
pub fn session_key(survey_id: &SurveyId, user_id: &UserId) -> String {
    format!("survey-session:{survey_id}:{user_id}")
}

/// How a session came to be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    Fresh,
    Resumed,
    /// A persisted session existed but no longer fit the survey or user.
    ReplacedStale,
}

/// A `SessionState` bound to its local store entry.
///
/// Every mutation is applied to a copy, written to the store, and only then
/// committed in memory. A failed write leaves both sides unchanged.
pub struct SurveySession {
    survey: Survey,
    state: SessionState,
    store: Arc<dyn LocalSessionStore>,
    key: String,
    origin: SessionOrigin,
}

impl fmt::Debug for SurveySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurveySession")
            .field("key", &self.key)
            .field("state", &self.state)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl SurveySession {
    /// Resume the persisted session for this user and survey, or start a fresh
    /// one when there is none or it no longer fits.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::LocalStore` if the store cannot be read or written.
    pub fn open(
        store: Arc<dyn LocalSessionStore>,
        survey: Survey,
        user_id: UserId,
        cohort_id: Option<CohortId>,
        clock: Clock,
        seed: Option<u64>,
    ) -> Result<Self, SessionError> {
        let key = session_key(survey.id(), &user_id);

        let origin = match Self::read_state(store.as_ref(), &key) {
            Ok(Some(state)) if fits(&state, &survey, &user_id) => {
                tracing::info!(
                    survey_id = %survey.id(),
                    cursor = state.cursor(),
                    phase = %state.phase(),
                    "resuming survey session"
                );
                return Ok(Self {
                    survey,
                    state,
                    store,
                    key,
                    origin: SessionOrigin::Resumed,
                });
            }
            Ok(Some(_)) => {
                tracing::warn!(survey_id = %survey.id(), "discarding session that no longer fits the survey");
                SessionOrigin::ReplacedStale
            }
            Ok(None) => SessionOrigin::Fresh,
            Err(SessionError::Corrupt(err)) => {
                tracing::warn!(survey_id = %survey.id(), error = %err, "discarding unreadable session");
                SessionOrigin::ReplacedStale
            }
            Err(SessionError::Inconsistent(err)) => {
                tracing::warn!(survey_id = %survey.id(), error = %err, "discarding inconsistent session");
                SessionOrigin::ReplacedStale
            }
            Err(other) => return Err(other),
        };

        let order = sequence(survey.questions(), seed);
        let state = SessionState::new(
            survey.id().clone(),
            user_id,
            cohort_id,
            order,
            clock.now(),
        );
        let session = Self {
            survey,
            state,
            store,
            key,
            origin,
        };
        session.persist(&session.state)?;
        tracing::info!(
            survey_id = %session.survey.id(),
            questions = session.state.ordered_question_ids().len(),
            required = session.state.required_count(),
            "started survey session"
        );
        Ok(session)
    }

    /// Load a persisted session without creating one.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Corrupt` or `Inconsistent` for a persisted
    /// document that cannot be trusted, and `LocalStore` for read failures.
    pub fn load(
        store: Arc<dyn LocalSessionStore>,
        survey: Survey,
        user_id: &UserId,
    ) -> Result<Option<Self>, SessionError> {
        let key = session_key(survey.id(), user_id);
        let Some(state) = Self::read_state(store.as_ref(), &key)? else {
            return Ok(None);
        };
        if !fits(&state, &survey, user_id) {
            return Ok(None);
        }
        Ok(Some(Self {
            survey,
            state,
            store,
            key,
            origin: SessionOrigin::Resumed,
        }))
    }

    fn read_state(
        store: &dyn LocalSessionStore,
        key: &str,
    ) -> Result<Option<SessionState>, SessionError> {
        let Some(raw) = store.get(key)? else {
            return Ok(None);
        };
        let state: SessionState = serde_json::from_str(&raw)?;
        state.check_invariants()?;
        Ok(Some(state))
    }

    #[must_use]
    pub fn survey(&self) -> &Survey {
        &self.survey
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn origin(&self) -> SessionOrigin {
        self.origin
    }

    #[must_use]
    pub fn progress(&self) -> SessionProgress {
        self.state.progress()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    /// The question to display, if the session is on one.
    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        self.state
            .current_question_id()
            .and_then(|id| self.survey.question(id))
    }

    /// Upsert an answer and persist.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` for misuse (unknown question, empty
    /// answer, a question out of reach or already settled) and `LocalStore`
    /// if persisting fails.
    pub fn record_answer(
        &mut self,
        question_id: &QuestionId,
        likert: Option<LikertValue>,
        dont_understand: bool,
    ) -> Result<Answer, SessionError> {
        self.mutate(|state| {
            state
                .record_answer(question_id, likert, dont_understand)
                .cloned()
        })
    }

    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` when the current question has no
    /// likert value, and `LocalStore` if persisting fails.
    pub fn advance(&mut self) -> Result<Option<PhaseTransition>, SessionError> {
        self.mutate(SessionState::advance)
    }

    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` outside the required block.
    pub fn retreat(&mut self) -> Result<bool, SessionError> {
        self.mutate(SessionState::retreat)
    }

    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless at the transition screen.
    pub fn answer_more(&mut self) -> Result<PhaseTransition, SessionError> {
        self.mutate(SessionState::answer_more)
    }

    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless at the transition screen.
    pub fn go_to_results(&mut self) -> Result<PhaseTransition, SessionError> {
        self.mutate(SessionState::go_to_results)
    }

    /// Persist the server-assigned participant id.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` if a different id is bound.
    pub fn bind_participant(&mut self, id: ParticipantId) -> Result<(), SessionError> {
        if self.state.remote_participant_id() == Some(&id) {
            return Ok(());
        }
        self.mutate(|state| state.bind_participant(id))
    }

    /// Forget a participant id the remote store has shown to be dead.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::LocalStore` if persisting fails.
    pub fn release_stale_participant(&mut self) -> Result<Option<ParticipantId>, SessionError> {
        self.mutate(|state| Ok(state.release_stale_participant()))
    }

    /// Remove the persisted session. The in-memory state stays readable.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::LocalStore` if the entry cannot be removed.
    pub fn clear(&self) -> Result<(), SessionError> {
        self.store.remove(&self.key)?;
        tracing::debug!(key = %self.key, "cleared local session");
        Ok(())
    }

    fn mutate<T>(
        &mut self,
        apply: impl FnOnce(&mut SessionState) -> Result<T, InvalidStateError>,
    ) -> Result<T, SessionError> {
        let mut next = self.state.clone();
        let out = apply(&mut next)?;
        self.persist(&next)?;
        self.state = next;
        Ok(out)
    }

    fn persist(&self, state: &SessionState) -> Result<(), SessionError> {
        let raw = serde_json::to_string(state)?;
        self.store.set(&self.key, &raw)?;
        Ok(())
    }
}

/// A persisted state fits when it belongs to this user and its order is still
/// a required-first permutation of the survey's questions.
fn fits(state: &SessionState, survey: &Survey, user_id: &UserId) -> bool {
    if state.survey_id() != survey.id() || state.user_id() != user_id {
        return false;
    }
    let ids = state.ordered_question_ids();
    if ids.len() != survey.questions().len() || state.required_count() != survey.required_count()
    {
        return false;
    }
    ids.iter().enumerate().all(|(idx, id)| {
        survey
            .question(id)
            .is_some_and(|q| q.is_required() == (idx < state.required_count()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use storage::local::{InMemorySessionStore, LocalStoreError};
    use survey_core::model::{Alignment, Continuum, ContinuumId, SessionPhase, SurveyDraft};
    use survey_core::time::fixed_now;

    fn survey(required: usize, optional: usize) -> Survey {
        let mut questions = Vec::new();
        for i in 0..required {
            questions.push(Question::new(format!("r{i}"), "R", "c", Alignment::Left, Some(true)));
        }
        for i in 0..optional {
            questions.push(Question::new(format!("o{i}"), "O", "c", Alignment::Right, Some(false)));
        }
        let mut continua = BTreeMap::new();
        continua.insert(ContinuumId::new("c"), Continuum::named("C"));
        SurveyDraft {
            id: SurveyId::new("s1"),
            title: "Test".into(),
            questions,
            continua,
        }
        .validate()
        .unwrap()
    }

    fn open(store: &InMemorySessionStore, survey: Survey) -> SurveySession {
        SurveySession::open(
            Arc::new(store.clone()),
            survey,
            UserId::new("u1"),
            None,
            Clock::fixed(fixed_now()),
            Some(7),
        )
        .unwrap()
    }

    fn answer_current(session: &mut SurveySession, likert: LikertValue) {
        let id = session.state().current_question_id().unwrap().clone();
        session.record_answer(&id, Some(likert), false).unwrap();
        session.advance().unwrap();
    }

    /// Accepts reads, fails every write.
    struct ReadOnlyStore(InMemorySessionStore);

    impl LocalSessionStore for ReadOnlyStore {
        fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
            self.0.get(key)
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), LocalStoreError> {
            Err(LocalStoreError::Unavailable("quota exceeded".into()))
        }
        fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
            self.0.remove(key)
        }
    }

    #[test]
    fn fresh_session_is_persisted_immediately() {
        let store = InMemorySessionStore::new();
        let session = open(&store, survey(3, 2));
        assert_eq!(session.origin(), SessionOrigin::Fresh);
        assert!(store.get(session.key()).unwrap().is_some());
    }

    #[test]
    fn reload_resumes_without_reshuffling() {
        let store = InMemorySessionStore::new();
        let mut first = open(&store, survey(3, 2));
        answer_current(&mut first, LikertValue::Agree);
        answer_current(&mut first, LikertValue::StronglyDisagree);

        // A different seed would reorder a fresh session.
        let resumed = SurveySession::open(
            Arc::new(store.clone()),
            survey(3, 2),
            UserId::new("u1"),
            None,
            Clock::system(),
            Some(99),
        )
        .unwrap();

        assert_eq!(resumed.origin(), SessionOrigin::Resumed);
        assert_eq!(resumed.state(), first.state());
        assert_eq!(
            serde_json::to_string(resumed.state()).unwrap(),
            serde_json::to_string(first.state()).unwrap()
        );
    }

    #[test]
    fn session_for_changed_survey_is_replaced() {
        let store = InMemorySessionStore::new();
        let mut first = open(&store, survey(3, 2));
        answer_current(&mut first, LikertValue::Agree);

        let replaced = open(&store, survey(4, 2));
        assert_eq!(replaced.origin(), SessionOrigin::ReplacedStale);
        assert_eq!(replaced.state().cursor(), 0);
        assert!(replaced.state().answers().is_empty());
    }

    #[test]
    fn unreadable_session_is_replaced() {
        let store = InMemorySessionStore::new();
        let key = session_key(&SurveyId::new("s1"), &UserId::new("u1"));
        store.set(&key, "{not json").unwrap();

        let session = open(&store, survey(2, 0));
        assert_eq!(session.origin(), SessionOrigin::ReplacedStale);

        store.set(&key, "{not json").unwrap();
        let err = SurveySession::load(Arc::new(store.clone()), survey(2, 0), &UserId::new("u1"))
            .unwrap_err();
        assert!(matches!(err, SessionError::Corrupt(_)));
    }

    #[test]
    fn failed_write_leaves_state_untouched() {
        let inner = InMemorySessionStore::new();
        let session = open(&inner, survey(2, 1));
        let before = session.state().clone();

        let mut session = SurveySession::load(
            Arc::new(ReadOnlyStore(inner.clone())),
            survey(2, 1),
            &UserId::new("u1"),
        )
        .unwrap()
        .unwrap();
        let id = session.state().current_question_id().unwrap().clone();
        let err = session
            .record_answer(&id, Some(LikertValue::Agree), false)
            .unwrap_err();

        assert!(matches!(err, SessionError::LocalStore(_)));
        assert_eq!(session.state(), &before);
        assert_eq!(
            inner.get(session.key()).unwrap().unwrap(),
            serde_json::to_string(&before).unwrap()
        );
    }

    #[test]
    fn invalid_operations_are_not_persisted() {
        let store = InMemorySessionStore::new();
        let mut session = open(&store, survey(2, 1));
        let persisted = store.get(session.key()).unwrap();

        assert!(matches!(
            session.advance(),
            Err(SessionError::InvalidState(InvalidStateError::Unanswered(_)))
        ));
        assert!(matches!(
            session.record_answer(&QuestionId::new("nope"), Some(LikertValue::Agree), false),
            Err(SessionError::InvalidState(InvalidStateError::UnknownQuestion(_)))
        ));
        assert_eq!(store.get(session.key()).unwrap(), persisted);
    }

    #[test]
    fn transition_screen_is_skipped_after_reload() {
        let store = InMemorySessionStore::new();
        let mut session = open(&store, survey(1, 2));
        answer_current(&mut session, LikertValue::Agree);
        assert_eq!(session.state().phase(), SessionPhase::TransitionPending);
        session.answer_more().unwrap();

        let resumed = open(&store, survey(1, 2));
        assert_eq!(resumed.state().phase(), SessionPhase::AnsweringOptional);
        assert!(resumed.state().skip_transition_screen());
        assert_eq!(resumed.state().cursor(), 1);
        assert!(resumed.current_question().is_some_and(|q| q.required == Some(false)));
    }

    #[test]
    fn clear_removes_the_entry() {
        let store = InMemorySessionStore::new();
        let session = open(&store, survey(1, 0));
        session.clear().unwrap();
        assert!(store.is_empty().unwrap());
        assert!(
            SurveySession::load(Arc::new(store.clone()), survey(1, 0), &UserId::new("u1"))
                .unwrap()
                .is_none()
        );
    }
}
