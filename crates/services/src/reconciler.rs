//! Moves buffered answers into the remote store exactly once.
//!
//! Participant creation is an upsert keyed by `(user_id, survey_id)`: look up,
//! insert when missing, and on a uniqueness conflict adopt whichever record
//! won. Responses are re-checked against the remote store before every flush,
//! so a flush that failed half-way can simply be run again.

use std::collections::HashSet;
use std::sync::Arc;

use storage::repository::{
    NewParticipantRecord, ParticipantRepository, ResponseRecord, ResponseRepository, Storage,
    StorageError,
};
use survey_core::Clock;
use survey_core::model::{InvalidStateError, ParticipantId, QuestionId};

use crate::error::ReconcileError;
use crate::network::NetworkStatus;
use crate::sessions::SurveySession;

/// What a successful final flush did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub participant_id: ParticipantId,
    /// Responses written by this flush.
    pub submitted: usize,
    /// Responses a previous flush had already written.
    pub already_present: usize,
    /// Buffered answers without a likert value, which are never sent.
    pub skipped: usize,
}

#[derive(Clone)]
pub struct SubmissionReconciler {
    clock: Clock,
    participants: Arc<dyn ParticipantRepository>,
    responses: Arc<dyn ResponseRepository>,
    network: Arc<dyn NetworkStatus>,
}

impl SubmissionReconciler {
    #[must_use]
    pub fn new(
        clock: Clock,
        participants: Arc<dyn ParticipantRepository>,
        responses: Arc<dyn ResponseRepository>,
        network: Arc<dyn NetworkStatus>,
    ) -> Self {
        Self {
            clock,
            participants,
            responses,
            network,
        }
    }

    #[must_use]
    pub fn from_storage(clock: Clock, storage: &Storage, network: Arc<dyn NetworkStatus>) -> Self {
        Self::new(
            clock,
            Arc::clone(&storage.participants),
            Arc::clone(&storage.responses),
            network,
        )
    }

    /// Submit every buffered answer of a completed session, then clear the
    /// local copy.
    ///
    /// On any failure the local session is kept as it was (apart from a newly
    /// bound participant id), so the call can be repeated.
    ///
    /// # Errors
    ///
    /// - `ReconcileError::Offline` without a connection; nothing is sent.
    /// - `ReconcileError::Submission` when some responses failed to write.
    /// - `ReconcileError::Identity` when the remote store denies access.
    /// - `ReconcileError::Session` if the session is not completed or cannot
    ///   be persisted. Failing to clear the local copy after a complete
    ///   submission is logged, not returned.
    pub async fn final_flush(
        &self,
        session: &mut SurveySession,
    ) -> Result<FlushReport, ReconcileError> {
        if !self.network.is_online() {
            return Err(ReconcileError::Offline);
        }
        if !session.is_complete() {
            return Err(InvalidStateError::WrongPhase {
                operation: "final_flush",
                phase: session.state().phase(),
            }
            .into());
        }

        let participant_id = self.resolve_participant(session, true).await?;

        let present: HashSet<QuestionId> = self
            .responses
            .list_responses(&participant_id)
            .await?
            .into_iter()
            .map(|r| r.question_id)
            .collect();

        let now = self.clock.now();
        let mut attempted = 0;
        let mut submitted = 0;
        let mut already_present = 0;
        let mut failed = Vec::new();
        for answer in session.state().submittable_answers() {
            if present.contains(&answer.question_id) {
                already_present += 1;
                continue;
            }
            let Some(record) = ResponseRecord::from_answer(&participant_id, answer, now) else {
                continue;
            };
            attempted += 1;
            match self.submit(record).await {
                Ok(true) => submitted += 1,
                Ok(false) => already_present += 1,
                Err(StorageError::PermissionDenied(reason)) => {
                    return Err(StorageError::PermissionDenied(reason).into());
                }
                Err(err) => {
                    tracing::warn!(
                        question_id = %answer.question_id,
                        error = %err,
                        "response submission failed"
                    );
                    failed.push(answer.question_id.clone());
                }
            }
        }

        if !failed.is_empty() {
            tracing::warn!(
                participant_id = %participant_id,
                attempted,
                failed = failed.len(),
                "final flush incomplete; local session kept"
            );
            return Err(ReconcileError::Submission { attempted, failed });
        }

        let skipped =
            session.state().answers().len() - session.state().submittable_answers().count();
        // Every response is stored; a leftover local copy only costs a
        // no-op flush next time.
        if let Err(err) = session.clear() {
            tracing::warn!(
                participant_id = %participant_id,
                error = %err,
                "submitted, but the local session could not be cleared"
            );
        }
        tracing::info!(
            participant_id = %participant_id,
            submitted,
            already_present,
            skipped,
            "final flush complete"
        );
        Ok(FlushReport {
            participant_id,
            submitted,
            already_present,
            skipped,
        })
    }

    /// Best-effort submission of one optional answer while the participant
    /// keeps going. Skipped offline; failures are logged and left to the
    /// final flush.
    ///
    /// Returns `true` when the response is known to be stored remotely.
    pub async fn stream_flush(&self, session: &mut SurveySession, question_id: &QuestionId) -> bool {
        if !self.network.is_online() {
            tracing::debug!(question_id = %question_id, "offline; streaming flush skipped");
            return false;
        }
        match self.stream_one(session, question_id).await {
            Ok(stored) => stored,
            Err(err) => {
                tracing::warn!(
                    question_id = %question_id,
                    error = %err,
                    "streaming flush failed; final flush will retry"
                );
                false
            }
        }
    }

    async fn stream_one(
        &self,
        session: &mut SurveySession,
        question_id: &QuestionId,
    ) -> Result<bool, ReconcileError> {
        let Some(answer) = session.state().answer(question_id).cloned() else {
            return Ok(false);
        };
        if !answer.is_submittable() {
            return Ok(false);
        }
        let participant_id = self.resolve_participant(session, false).await?;
        let Some(record) = ResponseRecord::from_answer(&participant_id, &answer, self.clock.now())
        else {
            return Ok(false);
        };
        self.submit(record).await?;
        Ok(true)
    }

    /// Insert one response; `Ok(false)` when it was already there.
    async fn submit(&self, record: ResponseRecord) -> Result<bool, StorageError> {
        let question_id = record.question_id.clone();
        match self.responses.insert_response(record).await {
            Ok(()) => {
                tracing::debug!(question_id = %question_id, "response submitted");
                Ok(true)
            }
            Err(StorageError::Conflict) => {
                tracing::debug!(question_id = %question_id, "response already present");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Find or create the participant for this session and bind it.
    ///
    /// With `verify`, an already bound id is checked against the remote store
    /// and released when it no longer refers to this user's attempt.
    async fn resolve_participant(
        &self,
        session: &mut SurveySession,
        verify: bool,
    ) -> Result<ParticipantId, ReconcileError> {
        if let Some(bound) = session.state().remote_participant_id().cloned() {
            if !verify {
                return Ok(bound);
            }
            let state = session.state();
            let live = match self.participants.get_participant(&bound).await {
                Ok(Some(record)) => {
                    &record.user_id == state.user_id() && &record.survey_id == state.survey_id()
                }
                Ok(None) | Err(StorageError::NotFound) => false,
                Err(err) => return Err(err.into()),
            };
            if live {
                return Ok(bound);
            }
            tracing::warn!(participant_id = %bound, "stored participant is stale; re-resolving");
            session.release_stale_participant()?;
        }

        let user_id = session.state().user_id().clone();
        let survey_id = session.state().survey_id().clone();

        let existing = self
            .participants
            .find_participant(&user_id, &survey_id)
            .await?;
        let participant_id = match existing {
            Some(existing) => existing.id,
            None => {
                let record = NewParticipantRecord {
                    user_id: user_id.clone(),
                    survey_id: survey_id.clone(),
                    cohort_id: session.state().cohort_id().cloned(),
                    created_at: self.clock.now(),
                };
                match self.participants.insert_participant(record).await {
                    Ok(created) => {
                        tracing::info!(participant_id = %created.id, survey_id = %survey_id, "participant created");
                        created.id
                    }
                    Err(StorageError::Conflict) => {
                        tracing::debug!(survey_id = %survey_id, "participant insert lost a race; adopting winner");
                        self.participants
                            .find_participant(&user_id, &survey_id)
                            .await?
                            .map(|winner| winner.id)
                            .ok_or(ReconcileError::ParticipantConflict { survey_id })?
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        };

        session.bind_participant(participant_id.clone())?;
        Ok(participant_id)
    }
}
