use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use survey_core::model::{
    Alignment, CohortId, Continuum, ContinuumId, LikertValue, ParticipantId, Question,
    QuestionId, SurveyId, UserId,
};

use crate::repository::{ParticipantRecord, ResponseRecord, StorageError};

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Classify a failed statement: uniqueness violations become `Conflict`,
/// dangling references become `NotFound`, anything else is a connection error.
pub(crate) fn map_write_error(err: sqlx::Error) -> StorageError {
    if let Some(db) = err.as_database_error() {
        if db.is_unique_violation() {
            return StorageError::Conflict;
        }
        if db.is_foreign_key_violation() {
            return StorageError::NotFound;
        }
    }
    StorageError::Connection(err.to_string())
}

pub(crate) fn map_read_error(err: sqlx::Error) -> StorageError {
    StorageError::Connection(err.to_string())
}

pub(crate) fn required_to_i64(required: Option<bool>) -> Option<i64> {
    required.map(i64::from)
}

pub(crate) fn required_from_i64(raw: Option<i64>) -> Result<Option<bool>, StorageError> {
    match raw {
        None => Ok(None),
        Some(0) => Ok(Some(false)),
        Some(1) => Ok(Some(true)),
        Some(other) => Err(StorageError::Serialization(format!(
            "invalid required flag: {other}"
        ))),
    }
}

pub(crate) fn parse_alignment(raw: &str) -> Result<Alignment, StorageError> {
    Alignment::parse(raw)
        .ok_or_else(|| StorageError::Serialization(format!("invalid alignment: {raw}")))
}

pub(crate) fn map_question_row(row: &SqliteRow) -> Result<Question, StorageError> {
    let alignment: String = row.try_get("alignment").map_err(ser)?;
    Ok(Question {
        id: QuestionId::new(row.try_get::<String, _>("id").map_err(ser)?),
        text: row.try_get("text").map_err(ser)?,
        continuum: ContinuumId::new(row.try_get::<String, _>("continuum_id").map_err(ser)?),
        alignment: parse_alignment(&alignment)?,
        required: required_from_i64(row.try_get("required").map_err(ser)?)?,
    })
}

pub(crate) fn map_continuum_row(row: &SqliteRow) -> Result<(ContinuumId, Continuum), StorageError> {
    let id = ContinuumId::new(row.try_get::<String, _>("id").map_err(ser)?);
    let continuum = Continuum {
        name: row.try_get("name").map_err(ser)?,
        description: row.try_get("description").map_err(ser)?,
        left_label: row.try_get("left_label").map_err(ser)?,
        right_label: row.try_get("right_label").map_err(ser)?,
    };
    Ok((id, continuum))
}

pub(crate) fn map_participant_row(row: &SqliteRow) -> Result<ParticipantRecord, StorageError> {
    Ok(ParticipantRecord {
        id: ParticipantId::new(row.try_get::<String, _>("id").map_err(ser)?),
        user_id: UserId::new(row.try_get::<String, _>("user_id").map_err(ser)?),
        survey_id: SurveyId::new(row.try_get::<String, _>("survey_id").map_err(ser)?),
        cohort_id: row
            .try_get::<Option<String>, _>("cohort_id")
            .map_err(ser)?
            .map(CohortId::new),
        created_at: row.try_get("created_at").map_err(ser)?,
    })
}

pub(crate) fn map_response_row(row: &SqliteRow) -> Result<ResponseRecord, StorageError> {
    let raw: i64 = row.try_get("likert_value").map_err(ser)?;
    let dont_understand: i64 = row.try_get("dont_understand").map_err(ser)?;
    Ok(ResponseRecord {
        participant_id: ParticipantId::new(row.try_get::<String, _>("participant_id").map_err(ser)?),
        question_id: QuestionId::new(row.try_get::<String, _>("question_id").map_err(ser)?),
        likert: LikertValue::try_from(raw).map_err(ser)?,
        dont_understand: dont_understand != 0,
        created_at: row.try_get("created_at").map_err(ser)?,
    })
}
