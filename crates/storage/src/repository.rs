use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use survey_core::model::{
    Answer, CohortId, LikertValue, ParticipantId, QuestionId, Survey, SurveyId, UserId,
};
use thiserror::Error;

/// Errors surfaced by remote store adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    /// A uniqueness constraint rejected the write.
    #[error("conflict")]
    Conflict,

    /// The store's access-control layer rejected the request.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Persisted shape of a participant: one user's attempt at one survey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantRecord {
    pub id: ParticipantId,
    pub user_id: UserId,
    pub survey_id: SurveyId,
    pub cohort_id: Option<CohortId>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a participant; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewParticipantRecord {
    pub user_id: UserId,
    pub survey_id: SurveyId,
    pub cohort_id: Option<CohortId>,
    pub created_at: DateTime<Utc>,
}

/// One submitted answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRecord {
    pub participant_id: ParticipantId,
    pub question_id: QuestionId,
    pub likert: LikertValue,
    pub dont_understand: bool,
    pub created_at: DateTime<Utc>,
}

impl ResponseRecord {
    /// Build the record for a buffered answer, `None` if it has no likert value.
    #[must_use]
    pub fn from_answer(
        participant_id: &ParticipantId,
        answer: &Answer,
        created_at: DateTime<Utc>,
    ) -> Option<Self> {
        Some(Self {
            participant_id: participant_id.clone(),
            question_id: answer.question_id.clone(),
            likert: answer.likert?,
            dont_understand: answer.dont_understand,
            created_at,
        })
    }
}

/// Survey catalog.
#[async_trait]
pub trait SurveyRepository: Send + Sync {
    /// Persist or replace a survey with its questions and continua.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the survey cannot be stored.
    async fn upsert_survey(&self, survey: &Survey) -> Result<(), StorageError>;

    /// Fetch a survey by ID, `None` if missing.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` for connection or mapping failures.
    async fn get_survey(&self, id: &SurveyId) -> Result<Option<Survey>, StorageError>;
}

/// Participant collection, unique on `(user_id, survey_id)`.
#[async_trait]
pub trait ParticipantRepository: Send + Sync {
    /// Look up the participant for a user's attempt at a survey.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` for connection or access failures.
    async fn find_participant(
        &self,
        user_id: &UserId,
        survey_id: &SurveyId,
    ) -> Result<Option<ParticipantRecord>, StorageError>;

    /// Fetch a participant by its server-assigned id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` for connection or access failures.
    async fn get_participant(
        &self,
        id: &ParticipantId,
    ) -> Result<Option<ParticipantRecord>, StorageError>;

    /// Create a participant.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if a participant already exists for
    /// the same `(user_id, survey_id)`, or other storage errors.
    async fn insert_participant(
        &self,
        record: NewParticipantRecord,
    ) -> Result<ParticipantRecord, StorageError>;
}

/// Response collection, keyed by participant and question.
#[async_trait]
pub trait ResponseRepository: Send + Sync {
    /// All responses recorded under a participant.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` for connection or access failures.
    async fn list_responses(
        &self,
        participant_id: &ParticipantId,
    ) -> Result<Vec<ResponseRecord>, StorageError>;

    /// Record a response.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if a response for the same
    /// `(participant_id, question_id)` already exists, or other storage errors.
    async fn insert_response(&self, record: ResponseRecord) -> Result<(), StorageError>;
}

//
// ─── IN-MEMORY ────────────────────────────────────────────────────────────────
//

#[derive(Default)]
struct Tables {
    surveys: HashMap<SurveyId, Survey>,
    participants: HashMap<ParticipantId, ParticipantRecord>,
    responses: HashMap<(ParticipantId, QuestionId), ResponseRecord>,
    /// Participants another writer will create just before our next insert.
    pending_races: Vec<(UserId, SurveyId)>,
    /// Remaining response inserts allowed to succeed; `None` means unlimited.
    response_budget: Option<usize>,
    /// Every insert attempt, including failed ones, in call order.
    response_attempts: Vec<QuestionId>,
}

/// Simple in-memory remote store for testing and prototyping.
///
/// Enforces the same uniqueness rules as the SQL schema and can inject the
/// races and partial failures the reconciler has to survive.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    tables: Arc<Mutex<Tables>>,
    deny_access: Arc<AtomicBool>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StorageError> {
        if self.deny_access.load(Ordering::SeqCst) {
            return Err(StorageError::PermissionDenied(
                "row-level policy rejected the request".into(),
            ));
        }
        self.tables
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn lock_unchecked(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Make the next `insert_participant` for this key lose a race: another
    /// writer creates the record first, and the insert sees a conflict.
    pub fn race_next_participant_insert(&self, user_id: &UserId, survey_id: &SurveyId) {
        self.lock_unchecked()
            .pending_races
            .push((user_id.clone(), survey_id.clone()));
    }

    /// Allow `n` more response inserts, then fail every following one.
    pub fn fail_responses_after(&self, n: usize) {
        self.lock_unchecked().response_budget = Some(n);
    }

    /// Stop injecting response failures.
    pub fn heal(&self) {
        self.lock_unchecked().response_budget = None;
    }

    /// Reject every request as an access-control violation.
    pub fn set_deny_access(&self, deny: bool) {
        self.deny_access.store(deny, Ordering::SeqCst);
    }

    /// Delete a participant and its responses, as an admin cleanup would.
    pub fn delete_participant(&self, id: &ParticipantId) {
        let mut tables = self.lock_unchecked();
        tables.participants.remove(id);
        tables.responses.retain(|(pid, _), _| pid != id);
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.lock_unchecked().participants.len()
    }

    #[must_use]
    pub fn participants_for(&self, user_id: &UserId, survey_id: &SurveyId) -> usize {
        self.lock_unchecked()
            .participants
            .values()
            .filter(|p| &p.user_id == user_id && &p.survey_id == survey_id)
            .count()
    }

    #[must_use]
    pub fn response_count(&self, participant_id: &ParticipantId) -> usize {
        self.lock_unchecked()
            .responses
            .keys()
            .filter(|(pid, _)| pid == participant_id)
            .count()
    }

    /// Question ids of every response insert attempted so far.
    #[must_use]
    pub fn response_attempts(&self) -> Vec<QuestionId> {
        self.lock_unchecked().response_attempts.clone()
    }
}

fn find_by_key<'a>(
    tables: &'a Tables,
    user_id: &UserId,
    survey_id: &SurveyId,
) -> Option<&'a ParticipantRecord> {
    tables
        .participants
        .values()
        .find(|p| &p.user_id == user_id && &p.survey_id == survey_id)
}

#[async_trait]
impl SurveyRepository for InMemoryRepository {
    async fn upsert_survey(&self, survey: &Survey) -> Result<(), StorageError> {
        let mut tables = self.lock()?;
        tables.surveys.insert(survey.id().clone(), survey.clone());
        Ok(())
    }

    async fn get_survey(&self, id: &SurveyId) -> Result<Option<Survey>, StorageError> {
        Ok(self.lock()?.surveys.get(id).cloned())
    }
}

#[async_trait]
impl ParticipantRepository for InMemoryRepository {
    async fn find_participant(
        &self,
        user_id: &UserId,
        survey_id: &SurveyId,
    ) -> Result<Option<ParticipantRecord>, StorageError> {
        let tables = self.lock()?;
        Ok(find_by_key(&tables, user_id, survey_id).cloned())
    }

    async fn get_participant(
        &self,
        id: &ParticipantId,
    ) -> Result<Option<ParticipantRecord>, StorageError> {
        Ok(self.lock()?.participants.get(id).cloned())
    }

    async fn insert_participant(
        &self,
        record: NewParticipantRecord,
    ) -> Result<ParticipantRecord, StorageError> {
        let mut tables = self.lock()?;

        let key = (record.user_id.clone(), record.survey_id.clone());
        if let Some(pos) = tables.pending_races.iter().position(|race| *race == key) {
            tables.pending_races.remove(pos);
            let winner = ParticipantRecord {
                id: ParticipantId::generate(),
                user_id: record.user_id.clone(),
                survey_id: record.survey_id.clone(),
                cohort_id: record.cohort_id.clone(),
                created_at: record.created_at,
            };
            tables.participants.insert(winner.id.clone(), winner);
        }

        if find_by_key(&tables, &record.user_id, &record.survey_id).is_some() {
            return Err(StorageError::Conflict);
        }

        let created = ParticipantRecord {
            id: ParticipantId::generate(),
            user_id: record.user_id,
            survey_id: record.survey_id,
            cohort_id: record.cohort_id,
            created_at: record.created_at,
        };
        tables
            .participants
            .insert(created.id.clone(), created.clone());
        Ok(created)
    }
}

#[async_trait]
impl ResponseRepository for InMemoryRepository {
    async fn list_responses(
        &self,
        participant_id: &ParticipantId,
    ) -> Result<Vec<ResponseRecord>, StorageError> {
        let tables = self.lock()?;
        let mut out: Vec<ResponseRecord> = tables
            .responses
            .values()
            .filter(|r| &r.participant_id == participant_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.question_id.cmp(&b.question_id));
        Ok(out)
    }

    async fn insert_response(&self, record: ResponseRecord) -> Result<(), StorageError> {
        let mut tables = self.lock()?;
        tables.response_attempts.push(record.question_id.clone());

        if let Some(budget) = tables.response_budget.as_mut() {
            if *budget == 0 {
                return Err(StorageError::Connection("injected response failure".into()));
            }
            *budget -= 1;
        }

        if !tables.participants.contains_key(&record.participant_id) {
            return Err(StorageError::NotFound);
        }

        let key = (record.participant_id.clone(), record.question_id.clone());
        if tables.responses.contains_key(&key) {
            return Err(StorageError::Conflict);
        }
        tables.responses.insert(key, record);
        Ok(())
    }
}

/// Aggregates the remote repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub surveys: Arc<dyn SurveyRepository>,
    pub participants: Arc<dyn ParticipantRepository>,
    pub responses: Arc<dyn ResponseRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_in_memory(&InMemoryRepository::new())
    }

    /// Wrap an existing in-memory repository, keeping a handle for inspection.
    #[must_use]
    pub fn from_in_memory(repo: &InMemoryRepository) -> Self {
        let surveys: Arc<dyn SurveyRepository> = Arc::new(repo.clone());
        let participants: Arc<dyn ParticipantRepository> = Arc::new(repo.clone());
        let responses: Arc<dyn ResponseRepository> = Arc::new(repo.clone());
        Self {
            surveys,
            participants,
            responses,
        }
    }
}
