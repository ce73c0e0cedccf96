use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs the versioned schema migrations.
///
/// Version 1 creates surveys, continua, questions, participants and responses.
/// The two uniqueness constraints (`participants(user_id, survey_id)` and
/// `responses(participant_id, question_id)`) are what submission reconciliation
/// relies on.
#[allow(clippy::too_many_lines)]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS surveys (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS continua (
                    survey_id TEXT NOT NULL,
                    id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    description TEXT,
                    left_label TEXT,
                    right_label TEXT,
                    PRIMARY KEY (survey_id, id),
                    FOREIGN KEY (survey_id) REFERENCES surveys(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS questions (
                    survey_id TEXT NOT NULL,
                    id TEXT NOT NULL,
                    position INTEGER NOT NULL CHECK (position >= 0),
                    text TEXT NOT NULL,
                    continuum_id TEXT NOT NULL,
                    alignment TEXT NOT NULL CHECK (alignment IN ('left', 'right')),
                    required INTEGER CHECK (required IN (0, 1)),
                    PRIMARY KEY (survey_id, id),
                    FOREIGN KEY (survey_id) REFERENCES surveys(id) ON DELETE CASCADE,
                    FOREIGN KEY (survey_id, continuum_id) REFERENCES continua(survey_id, id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS participants (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    survey_id TEXT NOT NULL,
                    cohort_id TEXT,
                    created_at TEXT NOT NULL,
                    UNIQUE (user_id, survey_id),
                    FOREIGN KEY (survey_id) REFERENCES surveys(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS responses (
                    id INTEGER PRIMARY KEY,
                    participant_id TEXT NOT NULL,
                    question_id TEXT NOT NULL,
                    likert_value INTEGER NOT NULL CHECK (likert_value IN (-2, -1, 1, 2)),
                    dont_understand INTEGER NOT NULL CHECK (dont_understand IN (0, 1)),
                    created_at TEXT NOT NULL,
                    UNIQUE (participant_id, question_id),
                    FOREIGN KEY (participant_id) REFERENCES participants(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_questions_survey_position
                    ON questions (survey_id, position);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_participants_survey_cohort
                    ON participants (survey_id, cohort_id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
