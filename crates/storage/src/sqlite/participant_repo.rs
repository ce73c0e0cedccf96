use survey_core::model::{ParticipantId, SurveyId, UserId};

use super::SqliteRepository;
use super::mapping::{map_participant_row, map_read_error, map_write_error};
use crate::repository::{
    NewParticipantRecord, ParticipantRecord, ParticipantRepository, StorageError,
};

#[async_trait::async_trait]
impl ParticipantRepository for SqliteRepository {
    async fn find_participant(
        &self,
        user_id: &UserId,
        survey_id: &SurveyId,
    ) -> Result<Option<ParticipantRecord>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, survey_id, cohort_id, created_at
            FROM participants
            WHERE user_id = ?1 AND survey_id = ?2
            ",
        )
        .bind(user_id.as_str())
        .bind(survey_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_read_error)?;

        row.as_ref().map(map_participant_row).transpose()
    }

    async fn get_participant(
        &self,
        id: &ParticipantId,
    ) -> Result<Option<ParticipantRecord>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, survey_id, cohort_id, created_at
            FROM participants
            WHERE id = ?1
            ",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_read_error)?;

        row.as_ref().map(map_participant_row).transpose()
    }

    async fn insert_participant(
        &self,
        record: NewParticipantRecord,
    ) -> Result<ParticipantRecord, StorageError> {
        let created = ParticipantRecord {
            id: ParticipantId::generate(),
            user_id: record.user_id,
            survey_id: record.survey_id,
            cohort_id: record.cohort_id,
            created_at: record.created_at,
        };

        sqlx::query(
            r"
            INSERT INTO participants (id, user_id, survey_id, cohort_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(created.id.as_str())
        .bind(created.user_id.as_str())
        .bind(created.survey_id.as_str())
        .bind(created.cohort_id.as_ref().map(|c| c.as_str()))
        .bind(created.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(created)
    }
}
