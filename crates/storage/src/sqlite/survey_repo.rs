use std::collections::BTreeMap;

use sqlx::Row;
use survey_core::model::{Survey, SurveyDraft, SurveyId};

use super::SqliteRepository;
use super::mapping::{
    map_continuum_row, map_question_row, map_read_error, map_write_error, required_to_i64, ser,
};
use crate::repository::{StorageError, SurveyRepository};

#[async_trait::async_trait]
impl SurveyRepository for SqliteRepository {
    async fn upsert_survey(&self, survey: &Survey) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(map_read_error)?;
        let survey_id = survey.id().as_str();

        sqlx::query(
            r"
            INSERT INTO surveys (id, title)
            VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET title = excluded.title
            ",
        )
        .bind(survey_id)
        .bind(survey.title())
        .execute(&mut *tx)
        .await
        .map_err(map_write_error)?;

        // Questions reference continua, so clear them first and insert them last.
        sqlx::query("DELETE FROM questions WHERE survey_id = ?1")
            .bind(survey_id)
            .execute(&mut *tx)
            .await
            .map_err(map_write_error)?;
        sqlx::query("DELETE FROM continua WHERE survey_id = ?1")
            .bind(survey_id)
            .execute(&mut *tx)
            .await
            .map_err(map_write_error)?;

        for (id, continuum) in survey.continua() {
            sqlx::query(
                r"
                INSERT INTO continua (survey_id, id, name, description, left_label, right_label)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ",
            )
            .bind(survey_id)
            .bind(id.as_str())
            .bind(continuum.name.as_str())
            .bind(continuum.description.as_deref())
            .bind(continuum.left_label.as_deref())
            .bind(continuum.right_label.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(map_write_error)?;
        }

        for (position, question) in survey.questions().iter().enumerate() {
            let position = i64::try_from(position)
                .map_err(|_| StorageError::Serialization("position overflow".into()))?;
            sqlx::query(
                r"
                INSERT INTO questions (
                    survey_id, id, position, text, continuum_id, alignment, required
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ",
            )
            .bind(survey_id)
            .bind(question.id.as_str())
            .bind(position)
            .bind(question.text.as_str())
            .bind(question.continuum.as_str())
            .bind(question.alignment.as_str())
            .bind(required_to_i64(question.required))
            .execute(&mut *tx)
            .await
            .map_err(map_write_error)?;
        }

        tx.commit().await.map_err(map_write_error)?;
        tracing::debug!(survey_id, questions = survey.questions().len(), "survey stored");
        Ok(())
    }

    async fn get_survey(&self, id: &SurveyId) -> Result<Option<Survey>, StorageError> {
        let Some(row) = sqlx::query("SELECT id, title FROM surveys WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_read_error)?
        else {
            return Ok(None);
        };
        let title: String = row.try_get("title").map_err(ser)?;

        let continuum_rows = sqlx::query(
            r"
            SELECT id, name, description, left_label, right_label
            FROM continua
            WHERE survey_id = ?1
            ",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_read_error)?;

        let mut continua = BTreeMap::new();
        for row in &continuum_rows {
            let (continuum_id, continuum) = map_continuum_row(row)?;
            continua.insert(continuum_id, continuum);
        }

        let question_rows = sqlx::query(
            r"
            SELECT id, text, continuum_id, alignment, required
            FROM questions
            WHERE survey_id = ?1
            ORDER BY position ASC
            ",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_read_error)?;

        let mut questions = Vec::with_capacity(question_rows.len());
        for row in &question_rows {
            questions.push(map_question_row(row)?);
        }

        SurveyDraft {
            id: id.clone(),
            title,
            questions,
            continua,
        }
        .validate()
        .map(Some)
        .map_err(ser)
    }
}
