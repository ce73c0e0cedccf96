//! HTTP adapter for a PostgREST-style remote store.
//!
//! Row-level access control lives on the server; this adapter only maps its
//! answers onto `StorageError` (409 is a uniqueness conflict, 401/403 an
//! access-control rejection).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use survey_core::model::{CohortId, LikertValue, ParticipantId, QuestionId, SurveyId, UserId};

use crate::repository::{
    NewParticipantRecord, ParticipantRecord, ParticipantRepository, ResponseRecord,
    ResponseRepository, StorageError,
};

const PARTICIPANTS: &str = "participants";
const RESPONSES: &str = "responses";

#[derive(Debug, Serialize, Deserialize)]
struct ParticipantRow {
    id: String,
    user_id: String,
    survey_id: String,
    #[serde(default)]
    cohort_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ParticipantRow> for ParticipantRecord {
    fn from(row: ParticipantRow) -> Self {
        Self {
            id: ParticipantId::new(row.id),
            user_id: UserId::new(row.user_id),
            survey_id: SurveyId::new(row.survey_id),
            cohort_id: row.cohort_id.map(CohortId::new),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct NewParticipantRow<'a> {
    user_id: &'a str,
    survey_id: &'a str,
    cohort_id: Option<&'a str>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResponseRow {
    participant_id: String,
    question_id: String,
    likert_value: i64,
    dont_understand: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<ResponseRow> for ResponseRecord {
    type Error = StorageError;

    fn try_from(row: ResponseRow) -> Result<Self, Self::Error> {
        Ok(Self {
            participant_id: ParticipantId::new(row.participant_id),
            question_id: QuestionId::new(row.question_id),
            likert: LikertValue::try_from(row.likert_value)
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
            dont_understand: row.dont_understand,
            created_at: row.created_at,
        })
    }
}

/// Map a non-success HTTP status onto the storage error taxonomy.
pub(crate) fn status_error(status: StatusCode, body: &str) -> StorageError {
    match status {
        StatusCode::CONFLICT => StorageError::Conflict,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            StorageError::PermissionDenied(body.to_owned())
        }
        StatusCode::NOT_FOUND => StorageError::NotFound,
        other => StorageError::Connection(format!("{other}: {body}")),
    }
}

fn transport(err: reqwest::Error) -> StorageError {
    StorageError::Connection(err.to_string())
}

async fn check(response: Response) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

/// A body that arrived but does not parse is a contract problem, not a
/// connection problem.
fn decode<T: DeserializeOwned>(body: &str) -> Result<T, StorageError> {
    serde_json::from_str(body).map_err(|e| StorageError::Serialization(e.to_string()))
}

async fn fetch<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, StorageError> {
    let response = request.send().await.map_err(transport)?;
    let body = check(response).await?.text().await.map_err(transport)?;
    decode(&body)
}

/// Participant and response collections served over HTTP.
#[derive(Clone)]
pub struct RestRemoteStore {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
}

impl RestRemoteStore {
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
            access_token: None,
        }
    }

    /// Send requests on behalf of an authenticated user.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn url(&self, table: &str) -> String {
        format!("{}/{table}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        request.header("apikey", &self.api_key).bearer_auth(bearer)
    }

    fn select_participant_request(&self, filters: &[(&str, String)]) -> RequestBuilder {
        self.authorize(self.client.get(self.url(PARTICIPANTS)))
            .query(filters)
            .query(&[("select", "*"), ("limit", "1")])
    }

    fn insert_participant_request(&self, record: &NewParticipantRecord) -> RequestBuilder {
        let body = NewParticipantRow {
            user_id: record.user_id.as_str(),
            survey_id: record.survey_id.as_str(),
            cohort_id: record.cohort_id.as_ref().map(CohortId::as_str),
            created_at: record.created_at,
        };
        self.authorize(self.client.post(self.url(PARTICIPANTS)))
            .header("Prefer", "return=representation")
            .json(&body)
    }

    fn list_responses_request(&self, participant_id: &ParticipantId) -> RequestBuilder {
        self.authorize(self.client.get(self.url(RESPONSES))).query(&[
            ("participant_id", format!("eq.{participant_id}")),
            ("select", "*".to_owned()),
        ])
    }

    fn insert_response_request(&self, record: &ResponseRecord) -> RequestBuilder {
        let body = ResponseRow {
            participant_id: record.participant_id.to_string(),
            question_id: record.question_id.to_string(),
            likert_value: i64::from(record.likert),
            dont_understand: record.dont_understand,
            created_at: record.created_at,
        };
        self.authorize(self.client.post(self.url(RESPONSES)))
            .header("Prefer", "return=minimal")
            .json(&body)
    }

    async fn select_participant(
        &self,
        filters: &[(&str, String)],
    ) -> Result<Option<ParticipantRecord>, StorageError> {
        let rows: Vec<ParticipantRow> = fetch(self.select_participant_request(filters)).await?;
        Ok(rows.into_iter().next().map(ParticipantRecord::from))
    }
}

#[async_trait]
impl ParticipantRepository for RestRemoteStore {
    async fn find_participant(
        &self,
        user_id: &UserId,
        survey_id: &SurveyId,
    ) -> Result<Option<ParticipantRecord>, StorageError> {
        self.select_participant(&[
            ("user_id", format!("eq.{user_id}")),
            ("survey_id", format!("eq.{survey_id}")),
        ])
        .await
    }

    async fn get_participant(
        &self,
        id: &ParticipantId,
    ) -> Result<Option<ParticipantRecord>, StorageError> {
        self.select_participant(&[("id", format!("eq.{id}"))]).await
    }

    async fn insert_participant(
        &self,
        record: NewParticipantRecord,
    ) -> Result<ParticipantRecord, StorageError> {
        let rows: Vec<ParticipantRow> = fetch(self.insert_participant_request(&record)).await?;
        rows.into_iter()
            .next()
            .map(ParticipantRecord::from)
            .ok_or_else(|| StorageError::Serialization("insert returned no participant".into()))
    }
}

#[async_trait]
impl ResponseRepository for RestRemoteStore {
    async fn list_responses(
        &self,
        participant_id: &ParticipantId,
    ) -> Result<Vec<ResponseRecord>, StorageError> {
        let rows: Vec<ResponseRow> = fetch(self.list_responses_request(participant_id)).await?;
        rows.into_iter().map(ResponseRecord::try_from).collect()
    }

    async fn insert_response(&self, record: ResponseRecord) -> Result<(), StorageError> {
        let response = self
            .insert_response_request(&record)
            .send()
            .await
            .map_err(transport)?;
        check(response).await?;
        Ok(())
    }
}
