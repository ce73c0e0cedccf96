use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use thiserror::Error;

use crate::model::answer::{Answer, LikertValue};
use crate::model::ids::{CohortId, ParticipantId, QuestionId, SurveyId, UserId};
use crate::sequencer::QuestionOrder;

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

/// Caller misuse of the session state machine.
///
/// These indicate a stale or buggy front-end and are never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidStateError {
    #[error("question {0} is not part of this session")]
    UnknownQuestion(QuestionId),

    #[error("cursor {cursor} is out of range for {len} questions")]
    CursorOutOfRange { cursor: usize, len: usize },

    #[error("question {0} has no likert value yet")]
    Unanswered(QuestionId),

    #[error("answer for {0} needs a likert value or a don't-understand flag")]
    EmptyAnswer(QuestionId),

    #[error("answer for {0} is already settled and cannot be changed that way")]
    AnswerLocked(QuestionId),

    #[error("{operation} is not allowed while {phase}")]
    WrongPhase {
        operation: &'static str,
        phase: SessionPhase,
    },

    #[error("session is already bound to participant {bound}, refusing {offered}")]
    ParticipantAlreadyBound {
        bound: ParticipantId,
        offered: ParticipantId,
    },
}

/// A persisted session that violates the state invariants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionStateError {
    #[error("cursor {cursor} exceeds {len} questions")]
    CursorOutOfBounds { cursor: usize, len: usize },

    #[error("required block of {required} exceeds {len} questions")]
    RequiredCountOutOfBounds { required: usize, len: usize },

    #[error("question {0} appears twice in the session order")]
    DuplicateQuestion(QuestionId),

    #[error("answer stored for question {0} outside the session order")]
    UnknownAnswer(QuestionId),

    #[error("answer keyed under {key} belongs to {actual}")]
    MismatchedAnswerKey { key: QuestionId, actual: QuestionId },

    #[error("cursor {cursor} is inconsistent with phase {phase}")]
    PhaseCursorMismatch { phase: SessionPhase, cursor: usize },

    #[error("question {0} lies behind the cursor without a likert value")]
    UnansweredBehindCursor(QuestionId),
}

//
// ─── PHASE ────────────────────────────────────────────────────────────────────
//

/// Where the participant is in the two-phase flow. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    AnsweringRequired,
    /// All required questions answered; waiting for "answer more" or "go to results".
    TransitionPending,
    AnsweringOptional,
    Completed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionPhase::AnsweringRequired => "answering required questions",
            SessionPhase::TransitionPending => "waiting at the transition screen",
            SessionPhase::AnsweringOptional => "answering optional questions",
            SessionPhase::Completed => "completed",
        };
        f.write_str(label)
    }
}

/// A phase change caused by a state-machine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransition {
    pub from: SessionPhase,
    pub to: SessionPhase,
}

impl PhaseTransition {
    #[must_use]
    pub fn completes(&self) -> bool {
        self.to == SessionPhase::Completed
    }
}

/// Aggregated view of session progress, useful for UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProgress {
    pub total: usize,
    pub required_total: usize,
    pub answered: usize,
    pub cursor: usize,
    pub phase: SessionPhase,
}

//
// ─── SESSION STATE ────────────────────────────────────────────────────────────
//

/// Everything needed to resume a participant's in-progress survey.
///
/// This is a plain value: every transition is a method on it, and the caller
/// decides when to persist. It serializes to a stable JSON document (answers
/// are kept in a `BTreeMap`) so a persisted state rehydrates byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    survey_id: SurveyId,
    user_id: UserId,
    #[serde(default)]
    cohort_id: Option<CohortId>,
    started_at: DateTime<Utc>,
    ordered_question_ids: Vec<QuestionId>,
    required_count: usize,
    cursor: usize,
    answers: BTreeMap<QuestionId, Answer>,
    phase: SessionPhase,
    remote_participant_id: Option<ParticipantId>,
    skip_transition_screen: bool,
}

impl SessionState {
    /// Start a fresh session over a sequenced question order.
    ///
    /// A survey without required questions starts directly in the optional
    /// phase, and a survey without any questions starts completed.
    #[must_use]
    pub fn new(
        survey_id: SurveyId,
        user_id: UserId,
        cohort_id: Option<CohortId>,
        order: QuestionOrder,
        started_at: DateTime<Utc>,
    ) -> Self {
        let phase = if order.is_empty() {
            SessionPhase::Completed
        } else if order.required_count == 0 {
            SessionPhase::AnsweringOptional
        } else {
            SessionPhase::AnsweringRequired
        };

        Self {
            survey_id,
            user_id,
            cohort_id,
            started_at,
            required_count: order.required_count,
            ordered_question_ids: order.ids,
            cursor: 0,
            answers: BTreeMap::new(),
            phase,
            remote_participant_id: None,
            skip_transition_screen: false,
        }
    }

    /// Check the invariants a rehydrated state must satisfy.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError` describing the first violated invariant.
    pub fn check_invariants(&self) -> Result<(), SessionStateError> {
        let len = self.ordered_question_ids.len();
        if self.cursor > len {
            return Err(SessionStateError::CursorOutOfBounds {
                cursor: self.cursor,
                len,
            });
        }
        if self.required_count > len {
            return Err(SessionStateError::RequiredCountOutOfBounds {
                required: self.required_count,
                len,
            });
        }

        let mut seen = HashSet::with_capacity(len);
        for id in &self.ordered_question_ids {
            if !seen.insert(id) {
                return Err(SessionStateError::DuplicateQuestion(id.clone()));
            }
        }
        for (key, answer) in &self.answers {
            if !seen.contains(key) {
                return Err(SessionStateError::UnknownAnswer(key.clone()));
            }
            if &answer.question_id != key {
                return Err(SessionStateError::MismatchedAnswerKey {
                    key: key.clone(),
                    actual: answer.question_id.clone(),
                });
            }
        }

        let consistent = match self.phase {
            SessionPhase::AnsweringRequired => self.cursor < self.required_count,
            SessionPhase::TransitionPending => {
                self.cursor == self.required_count && self.optional_count() > 0
            }
            SessionPhase::AnsweringOptional => {
                self.cursor >= self.required_count && self.cursor < len
            }
            SessionPhase::Completed => true,
        };
        if !consistent {
            return Err(SessionStateError::PhaseCursorMismatch {
                phase: self.phase,
                cursor: self.cursor,
            });
        }

        // Everything the cursor has passed was answered with a scale value.
        let passed = self.cursor.min(len);
        for id in &self.ordered_question_ids[..passed] {
            if !self.answers.get(id).is_some_and(Answer::is_submittable) {
                return Err(SessionStateError::UnansweredBehindCursor(id.clone()));
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn survey_id(&self) -> &SurveyId {
        &self.survey_id
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    #[must_use]
    pub fn cohort_id(&self) -> Option<&CohortId> {
        self.cohort_id.as_ref()
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn ordered_question_ids(&self) -> &[QuestionId] {
        &self.ordered_question_ids
    }

    #[must_use]
    pub fn required_count(&self) -> usize {
        self.required_count
    }

    #[must_use]
    pub fn optional_count(&self) -> usize {
        self.ordered_question_ids.len() - self.required_count
    }

    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn answers(&self) -> &BTreeMap<QuestionId, Answer> {
        &self.answers
    }

    #[must_use]
    pub fn answer(&self, question_id: &QuestionId) -> Option<&Answer> {
        self.answers.get(question_id)
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    #[must_use]
    pub fn remote_participant_id(&self) -> Option<&ParticipantId> {
        self.remote_participant_id.as_ref()
    }

    #[must_use]
    pub fn skip_transition_screen(&self) -> bool {
        self.skip_transition_screen
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.phase == SessionPhase::Completed
    }

    /// The question the participant is looking at, if any.
    ///
    /// `None` at the transition screen and once completed.
    #[must_use]
    pub fn current_question_id(&self) -> Option<&QuestionId> {
        match self.phase {
            SessionPhase::AnsweringRequired | SessionPhase::AnsweringOptional => {
                self.ordered_question_ids.get(self.cursor)
            }
            SessionPhase::TransitionPending | SessionPhase::Completed => None,
        }
    }

    /// True if the question sits in the optional block of the order.
    #[must_use]
    pub fn is_optional(&self, question_id: &QuestionId) -> bool {
        self.position_of(question_id)
            .is_some_and(|idx| idx >= self.required_count)
    }

    #[must_use]
    pub fn position_of(&self, question_id: &QuestionId) -> Option<usize> {
        self.ordered_question_ids
            .iter()
            .position(|id| id == question_id)
    }

    /// Answers that carry a likert value, in session order.
    pub fn submittable_answers(&self) -> impl Iterator<Item = &Answer> {
        self.ordered_question_ids
            .iter()
            .filter_map(|id| self.answers.get(id))
            .filter(|answer| answer.is_submittable())
    }

    #[must_use]
    pub fn progress(&self) -> SessionProgress {
        SessionProgress {
            total: self.ordered_question_ids.len(),
            required_total: self.required_count,
            answered: self.submittable_answers().count(),
            cursor: self.cursor,
            phase: self.phase,
        }
    }

    /// Upsert the answer for a question (last write wins).
    ///
    /// Only questions still in reach can change. While answering required
    /// questions that is the required block, where an answer the cursor has
    /// already passed keeps its scale value. While answering optional
    /// questions it is the current question and those after it; answers
    /// behind the cursor may already be on the server.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateError::UnknownQuestion` for ids outside the order,
    /// `EmptyAnswer` when neither a value nor the don't-understand flag is
    /// given, `AnswerLocked` for a settled answer, and `WrongPhase` for a
    /// question outside the block being answered (always at the transition
    /// screen and once completed).
    pub fn record_answer(
        &mut self,
        question_id: &QuestionId,
        likert: Option<LikertValue>,
        dont_understand: bool,
    ) -> Result<&Answer, InvalidStateError> {
        if self.phase == SessionPhase::Completed {
            return Err(InvalidStateError::WrongPhase {
                operation: "record_answer",
                phase: self.phase,
            });
        }
        let Some(position) = self.position_of(question_id) else {
            return Err(InvalidStateError::UnknownQuestion(question_id.clone()));
        };
        if likert.is_none() && !dont_understand {
            return Err(InvalidStateError::EmptyAnswer(question_id.clone()));
        }
        self.ensure_editable(question_id, position, likert.is_some())?;

        let answer = Answer::new(question_id.clone(), likert, dont_understand);
        self.answers.insert(question_id.clone(), answer);
        self.answers
            .get(question_id)
            .ok_or_else(|| InvalidStateError::UnknownQuestion(question_id.clone()))
    }

    fn ensure_editable(
        &self,
        question_id: &QuestionId,
        position: usize,
        submittable: bool,
    ) -> Result<(), InvalidStateError> {
        let out_of_block = match self.phase {
            SessionPhase::AnsweringRequired => position >= self.required_count,
            SessionPhase::AnsweringOptional => position < self.required_count,
            SessionPhase::TransitionPending | SessionPhase::Completed => true,
        };
        if out_of_block {
            return Err(InvalidStateError::WrongPhase {
                operation: "record_answer",
                phase: self.phase,
            });
        }

        let behind = position < self.cursor;
        let locked = match self.phase {
            SessionPhase::AnsweringOptional => behind,
            _ => behind && !submittable,
        };
        if locked {
            return Err(InvalidStateError::AnswerLocked(question_id.clone()));
        }
        Ok(())
    }

    /// Move past the current question, which must carry a likert value.
    ///
    /// Returns the phase transition this caused, if any.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateError::Unanswered` when the current question has no
    /// likert value (a don't-understand flag alone is not enough), and
    /// `WrongPhase` outside the two answering phases.
    pub fn advance(&mut self) -> Result<Option<PhaseTransition>, InvalidStateError> {
        if !matches!(
            self.phase,
            SessionPhase::AnsweringRequired | SessionPhase::AnsweringOptional
        ) {
            return Err(InvalidStateError::WrongPhase {
                operation: "advance",
                phase: self.phase,
            });
        }

        let len = self.ordered_question_ids.len();
        let Some(current) = self.ordered_question_ids.get(self.cursor) else {
            return Err(InvalidStateError::CursorOutOfRange {
                cursor: self.cursor,
                len,
            });
        };
        if !self.answers.get(current).is_some_and(Answer::is_submittable) {
            return Err(InvalidStateError::Unanswered(current.clone()));
        }

        self.cursor += 1;

        let next = match self.phase {
            SessionPhase::AnsweringRequired if self.cursor >= self.required_count => {
                if self.optional_count() == 0 {
                    SessionPhase::Completed
                } else if self.skip_transition_screen {
                    SessionPhase::AnsweringOptional
                } else {
                    SessionPhase::TransitionPending
                }
            }
            SessionPhase::AnsweringOptional if self.cursor >= len => SessionPhase::Completed,
            _ => return Ok(None),
        };

        Ok(Some(self.move_to(next)))
    }

    /// Step back one question within the required block.
    ///
    /// Returns `false` when already at the first question.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateError::WrongPhase` once the required block has been
    /// left (transition screen, optional block, completed).
    pub fn retreat(&mut self) -> Result<bool, InvalidStateError> {
        if self.phase != SessionPhase::AnsweringRequired {
            return Err(InvalidStateError::WrongPhase {
                operation: "retreat",
                phase: self.phase,
            });
        }
        if self.cursor == 0 {
            return Ok(false);
        }
        self.cursor -= 1;
        Ok(true)
    }

    /// "Answer more": enter the optional block at its first question.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateError::WrongPhase` unless at the transition screen.
    pub fn answer_more(&mut self) -> Result<PhaseTransition, InvalidStateError> {
        self.require_phase("answer_more", SessionPhase::TransitionPending)?;
        self.cursor = self.required_count;
        self.skip_transition_screen = true;
        Ok(self.move_to(SessionPhase::AnsweringOptional))
    }

    /// "Go to results": finish without answering optional questions.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateError::WrongPhase` unless at the transition screen.
    pub fn go_to_results(&mut self) -> Result<PhaseTransition, InvalidStateError> {
        self.require_phase("go_to_results", SessionPhase::TransitionPending)?;
        Ok(self.move_to(SessionPhase::Completed))
    }

    /// Record the server-side participant id.
    ///
    /// Re-binding the same id is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateError::ParticipantAlreadyBound` when a different id
    /// is already bound.
    pub fn bind_participant(&mut self, id: ParticipantId) -> Result<(), InvalidStateError> {
        match &self.remote_participant_id {
            Some(bound) if *bound == id => Ok(()),
            Some(bound) => Err(InvalidStateError::ParticipantAlreadyBound {
                bound: bound.clone(),
                offered: id,
            }),
            None => {
                self.remote_participant_id = Some(id);
                Ok(())
            }
        }
    }

    /// Drop a participant id the remote store no longer recognizes.
    ///
    /// Only for references verified to be dead; a live binding is never
    /// replaced.
    pub fn release_stale_participant(&mut self) -> Option<ParticipantId> {
        self.remote_participant_id.take()
    }

    fn require_phase(
        &self,
        operation: &'static str,
        expected: SessionPhase,
    ) -> Result<(), InvalidStateError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(InvalidStateError::WrongPhase {
                operation,
                phase: self.phase,
            })
        }
    }

    fn move_to(&mut self, next: SessionPhase) -> PhaseTransition {
        debug_assert!(next >= self.phase, "phase must not move backwards");
        let transition = PhaseTransition {
            from: self.phase,
            to: next,
        };
        self.phase = next;
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn order(required: &[&str], optional: &[&str]) -> QuestionOrder {
        let ids = required
            .iter()
            .chain(optional.iter())
            .map(|id| QuestionId::new(*id))
            .collect();
        QuestionOrder {
            ids,
            required_count: required.len(),
        }
    }

    fn state(required: &[&str], optional: &[&str]) -> SessionState {
        SessionState::new(
            SurveyId::new("s1"),
            UserId::new("u1"),
            None,
            order(required, optional),
            fixed_now(),
        )
    }

    fn answer_and_advance(
        state: &mut SessionState,
        value: LikertValue,
    ) -> Option<PhaseTransition> {
        let id = state.current_question_id().cloned().unwrap();
        state.record_answer(&id, Some(value), false).unwrap();
        state.advance().unwrap()
    }

    #[test]
    fn three_required_answers_reach_transition_then_results() {
        let mut s = state(&["r1", "r2", "r3"], &["o1", "o2"]);
        assert_eq!(s.phase(), SessionPhase::AnsweringRequired);

        assert_eq!(answer_and_advance(&mut s, LikertValue::Agree), None);
        assert_eq!(answer_and_advance(&mut s, LikertValue::Disagree), None);
        let t = answer_and_advance(&mut s, LikertValue::StronglyAgree).unwrap();
        assert_eq!(t.to, SessionPhase::TransitionPending);
        assert_eq!(s.current_question_id(), None);

        let t = s.go_to_results().unwrap();
        assert!(t.completes());
        assert_eq!(s.answers().len(), 3);
    }

    #[test]
    fn answer_more_jumps_to_first_optional_and_completes() {
        let mut s = state(&["r1", "r2", "r3"], &["o1", "o2"]);
        for _ in 0..3 {
            answer_and_advance(&mut s, LikertValue::Agree);
        }

        s.answer_more().unwrap();
        assert!(s.skip_transition_screen());
        assert_eq!(s.phase(), SessionPhase::AnsweringOptional);
        assert_eq!(s.current_question_id(), Some(&QuestionId::new("o1")));

        assert_eq!(answer_and_advance(&mut s, LikertValue::Agree), None);
        let t = answer_and_advance(&mut s, LikertValue::Disagree).unwrap();
        assert_eq!(t.to, SessionPhase::Completed);
        assert_eq!(s.answers().len(), 5);
        assert_eq!(s.cursor(), 5);
    }

    #[test]
    fn no_optional_questions_completes_directly() {
        let mut s = state(&["r1"], &[]);
        let t = answer_and_advance(&mut s, LikertValue::Agree).unwrap();
        assert_eq!(t.from, SessionPhase::AnsweringRequired);
        assert_eq!(t.to, SessionPhase::Completed);
    }

    #[test]
    fn no_required_questions_start_in_optional_block() {
        let s = state(&[], &["o1"]);
        assert_eq!(s.phase(), SessionPhase::AnsweringOptional);
        let s = state(&[], &[]);
        assert_eq!(s.phase(), SessionPhase::Completed);
    }

    #[test]
    fn advance_requires_a_likert_value() {
        let mut s = state(&["r1", "r2"], &[]);
        let err = s.advance().unwrap_err();
        assert_eq!(err, InvalidStateError::Unanswered(QuestionId::new("r1")));

        s.record_answer(&QuestionId::new("r1"), None, true).unwrap();
        assert!(matches!(s.advance(), Err(InvalidStateError::Unanswered(_))));
        assert_eq!(s.cursor(), 0);

        s.record_answer(&QuestionId::new("r1"), Some(LikertValue::Agree), true)
            .unwrap();
        s.advance().unwrap();
        assert_eq!(s.cursor(), 1);
    }

    #[test]
    fn record_answer_rejects_unknown_and_empty() {
        let mut s = state(&["r1"], &["o1"]);
        assert!(matches!(
            s.record_answer(&QuestionId::new("nope"), Some(LikertValue::Agree), false),
            Err(InvalidStateError::UnknownQuestion(_))
        ));
        assert!(matches!(
            s.record_answer(&QuestionId::new("r1"), None, false),
            Err(InvalidStateError::EmptyAnswer(_))
        ));
        assert!(s.answers().is_empty());
    }

    #[test]
    fn record_answer_is_last_write_wins() {
        let mut s = state(&["r1"], &[]);
        let id = QuestionId::new("r1");
        s.record_answer(&id, Some(LikertValue::Agree), false).unwrap();
        s.record_answer(&id, Some(LikertValue::StronglyDisagree), false)
            .unwrap();
        assert_eq!(s.answers().len(), 1);
        assert_eq!(
            s.answer(&id).unwrap().likert,
            Some(LikertValue::StronglyDisagree)
        );
    }

    #[test]
    fn retreat_only_within_required_block() {
        let mut s = state(&["r1", "r2"], &["o1", "o2"]);
        assert_eq!(s.retreat(), Ok(false));

        answer_and_advance(&mut s, LikertValue::Agree);
        assert_eq!(s.retreat(), Ok(true));
        assert_eq!(s.cursor(), 0);

        answer_and_advance(&mut s, LikertValue::Agree);
        answer_and_advance(&mut s, LikertValue::Agree);
        assert!(matches!(
            s.retreat(),
            Err(InvalidStateError::WrongPhase { .. })
        ));

        s.answer_more().unwrap();
        answer_and_advance(&mut s, LikertValue::Agree);
        assert!(matches!(
            s.retreat(),
            Err(InvalidStateError::WrongPhase { .. })
        ));
        assert_eq!(s.cursor(), 3);
    }

    #[test]
    fn completed_session_rejects_further_answers() {
        let mut s = state(&["r1"], &[]);
        answer_and_advance(&mut s, LikertValue::Agree);
        assert!(s.is_complete());
        assert!(s.advance().is_err());
        assert!(
            s.record_answer(&QuestionId::new("r1"), Some(LikertValue::Agree), false)
                .is_err()
        );
    }

    #[test]
    fn cursor_never_exceeds_question_count() {
        let mut s = state(&["r1", "r2"], &["o1"]);
        for _ in 0..10 {
            if let Some(id) = s.current_question_id().cloned() {
                s.record_answer(&id, Some(LikertValue::Agree), false).unwrap();
            }
            let _ = s.advance();
            let _ = s.answer_more();
            assert!(s.cursor() <= s.ordered_question_ids().len());
        }
        assert!(s.is_complete());
    }

    #[test]
    fn transition_screen_skipped_once_acknowledged() {
        let mut s = state(&["r1"], &["o1"]);
        s.skip_transition_screen = true;
        let t = answer_and_advance(&mut s, LikertValue::Agree).unwrap();
        assert_eq!(t.to, SessionPhase::AnsweringOptional);
    }

    #[test]
    fn participant_binding_is_write_once() {
        let mut s = state(&["r1"], &[]);
        s.bind_participant(ParticipantId::new("p1")).unwrap();
        s.bind_participant(ParticipantId::new("p1")).unwrap();
        assert!(matches!(
            s.bind_participant(ParticipantId::new("p2")),
            Err(InvalidStateError::ParticipantAlreadyBound { .. })
        ));
        assert_eq!(s.remote_participant_id(), Some(&ParticipantId::new("p1")));
    }

    #[test]
    fn json_round_trip_is_exact() {
        let mut s = state(&["r1", "r2"], &["o1"]);
        answer_and_advance(&mut s, LikertValue::Agree);
        s.record_answer(&QuestionId::new("r2"), None, true).unwrap();

        let json = serde_json::to_string(&s).unwrap();
        let back: SessionState = serde_json::from_str(&json).unwrap();
        back.check_invariants().unwrap();
        assert_eq!(back, s);
        assert_eq!(serde_json::to_string(&back).unwrap(), json);
    }

    #[test]
    fn invariant_check_catches_foreign_answers() {
        let mut s = state(&["r1"], &[]);
        s.answers.insert(
            QuestionId::new("zz"),
            Answer::new(QuestionId::new("zz"), Some(LikertValue::Agree), false),
        );
        assert_eq!(
            s.check_invariants(),
            Err(SessionStateError::UnknownAnswer(QuestionId::new("zz")))
        );
    }

    #[test]
    fn required_answers_are_out_of_reach_after_transition() {
        let mut s = state(&["r1", "r2"], &["o1", "o2"]);
        answer_and_advance(&mut s, LikertValue::Agree);
        answer_and_advance(&mut s, LikertValue::Agree);
        assert_eq!(s.phase(), SessionPhase::TransitionPending);

        let r1 = QuestionId::new("r1");
        assert!(matches!(
            s.record_answer(&r1, None, true),
            Err(InvalidStateError::WrongPhase { .. })
        ));

        s.answer_more().unwrap();
        assert!(matches!(
            s.record_answer(&r1, Some(LikertValue::Disagree), false),
            Err(InvalidStateError::WrongPhase { .. })
        ));
        assert_eq!(s.answer(&r1).unwrap().likert, Some(LikertValue::Agree));
        assert_eq!(s.submittable_answers().count(), 2);
    }

    #[test]
    fn passed_required_answer_keeps_its_value() {
        let mut s = state(&["r1", "r2"], &["o1"]);
        answer_and_advance(&mut s, LikertValue::Agree);

        let r1 = QuestionId::new("r1");
        assert_eq!(
            s.record_answer(&r1, None, true),
            Err(InvalidStateError::AnswerLocked(r1.clone()))
        );
        s.record_answer(&r1, Some(LikertValue::StronglyAgree), true)
            .unwrap();
        assert!(s.answer(&r1).unwrap().dont_understand);

        assert!(matches!(
            s.record_answer(&QuestionId::new("o1"), Some(LikertValue::Agree), false),
            Err(InvalidStateError::WrongPhase { .. })
        ));

        answer_and_advance(&mut s, LikertValue::Agree);
        assert_eq!(s.phase(), SessionPhase::TransitionPending);
        assert_eq!(s.submittable_answers().count(), 2);
    }

    #[test]
    fn passed_optional_answers_are_settled() {
        let mut s = state(&["r1"], &["o1", "o2"]);
        answer_and_advance(&mut s, LikertValue::Agree);
        s.answer_more().unwrap();
        answer_and_advance(&mut s, LikertValue::StronglyDisagree);

        let o1 = QuestionId::new("o1");
        assert_eq!(
            s.record_answer(&o1, Some(LikertValue::StronglyAgree), false),
            Err(InvalidStateError::AnswerLocked(o1.clone()))
        );
        assert_eq!(
            s.answer(&o1).unwrap().likert,
            Some(LikertValue::StronglyDisagree)
        );
        s.record_answer(&QuestionId::new("o2"), None, true).unwrap();
    }

    #[test]
    fn invariant_check_rejects_states_the_machine_cannot_reach() {
        let mut s = state(&["r1"], &[]);
        answer_and_advance(&mut s, LikertValue::Agree);
        s.phase = SessionPhase::TransitionPending;
        assert!(matches!(
            s.check_invariants(),
            Err(SessionStateError::PhaseCursorMismatch { .. })
        ));

        let mut s = state(&["r1", "r2"], &["o1"]);
        answer_and_advance(&mut s, LikertValue::Agree);
        s.answers.insert(
            QuestionId::new("r1"),
            Answer::new(QuestionId::new("r1"), None, true),
        );
        assert_eq!(
            s.check_invariants(),
            Err(SessionStateError::UnansweredBehindCursor(QuestionId::new("r1")))
        );
    }

    #[test]
    fn invariant_check_catches_phase_cursor_mismatch() {
        let mut s = state(&["r1"], &["o1"]);
        s.phase = SessionPhase::TransitionPending;
        assert!(matches!(
            s.check_invariants(),
            Err(SessionStateError::PhaseCursorMismatch { .. })
        ));
    }
}
