use survey_core::model::ParticipantId;

use super::SqliteRepository;
use super::mapping::{map_read_error, map_response_row, map_write_error};
use crate::repository::{ResponseRecord, ResponseRepository, StorageError};

#[async_trait::async_trait]
impl ResponseRepository for SqliteRepository {
    async fn list_responses(
        &self,
        participant_id: &ParticipantId,
    ) -> Result<Vec<ResponseRecord>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT participant_id, question_id, likert_value, dont_understand, created_at
            FROM responses
            WHERE participant_id = ?1
            ORDER BY question_id ASC
            ",
        )
        .bind(participant_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_read_error)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(map_response_row(row)?);
        }
        Ok(out)
    }

    async fn insert_response(&self, record: ResponseRecord) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO responses (
                participant_id, question_id, likert_value, dont_understand, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(record.participant_id.as_str())
        .bind(record.question_id.as_str())
        .bind(i64::from(record.likert))
        .bind(i64::from(record.dont_understand))
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(())
    }
}
