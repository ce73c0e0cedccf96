#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use services::{NetworkSwitch, StaticIdentity, SurveySession, SurveySessionService};
use storage::local::InMemorySessionStore;
use storage::repository::{InMemoryRepository, Storage, SurveyRepository};
use survey_core::Clock;
use survey_core::model::{
    Alignment, Continuum, ContinuumId, LikertValue, Question, Survey, SurveyDraft, SurveyId,
    UserId,
};
use survey_core::time::fixed_now;

pub const SURVEY: &str = "values-2024";
pub const USER: &str = "user-1";

pub fn build_survey(required: usize, optional: usize) -> Survey {
    let mut continua = BTreeMap::new();
    continua.insert(ContinuumId::new("trust"), Continuum::named("Trust"));
    continua.insert(ContinuumId::new("pace"), Continuum::named("Pace"));

    let mut questions = Vec::new();
    for i in 0..required {
        questions.push(Question::new(
            format!("req-{i}"),
            format!("Required statement {i}"),
            "trust",
            Alignment::Right,
            Some(true),
        ));
    }
    for i in 0..optional {
        questions.push(Question::new(
            format!("opt-{i}"),
            format!("Optional statement {i}"),
            "pace",
            Alignment::Left,
            Some(false),
        ));
    }

    SurveyDraft {
        id: SurveyId::new(SURVEY),
        title: "Values".into(),
        questions,
        continua,
    }
    .validate()
    .unwrap()
}

/// A service over in-memory fakes, with handles to inspect them.
pub struct Harness {
    pub repo: InMemoryRepository,
    pub local: InMemorySessionStore,
    pub network: NetworkSwitch,
    pub service: SurveySessionService,
}

impl Harness {
    pub async fn new(survey: Survey) -> Self {
        Self::with_identity(survey, StaticIdentity::new(UserId::new(USER))).await
    }

    pub async fn with_identity(survey: Survey, identity: StaticIdentity) -> Self {
        let repo = InMemoryRepository::new();
        repo.upsert_survey(&survey).await.unwrap();
        Self::over(repo, InMemorySessionStore::new(), identity, 11)
    }

    /// Another engine instance over the same stores, as after a page reload.
    pub fn reload(&self, seed: u64) -> Self {
        Self::over(
            self.repo.clone(),
            self.local.clone(),
            StaticIdentity::new(UserId::new(USER)),
            seed,
        )
    }

    fn over(
        repo: InMemoryRepository,
        local: InMemorySessionStore,
        identity: StaticIdentity,
        seed: u64,
    ) -> Self {
        let network = NetworkSwitch::online();
        let service = SurveySessionService::new(
            Clock::fixed(fixed_now()),
            &Storage::from_in_memory(&repo),
            Arc::new(local.clone()),
            Arc::new(identity),
            Arc::new(network.clone()),
        )
        .with_rng_seed(seed);
        Self {
            repo,
            local,
            network,
            service,
        }
    }

    pub async fn start(&self) -> SurveySession {
        self.service
            .start_session(&SurveyId::new(SURVEY), None)
            .await
            .unwrap()
    }

    pub fn has_local_session(&self) -> bool {
        !self.local.is_empty().unwrap()
    }
}

pub const SCALE: [LikertValue; 4] = LikertValue::ALL;

/// Answer `n` questions in sequencer order.
pub async fn answer_n(harness: &Harness, session: &mut SurveySession, n: usize) {
    for i in 0..n {
        harness
            .service
            .answer_current(session, SCALE[i % SCALE.len()], false)
            .await
            .unwrap();
    }
}
