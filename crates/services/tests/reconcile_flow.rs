mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{Harness, SURVEY, USER, answer_n, build_survey};
use services::{
    Clock, IdentityError, NetworkSwitch, ReconcileError, StaticIdentity, SurveySessionService,
};
use storage::local::{InMemorySessionStore, LocalSessionStore, LocalStoreError};
use storage::repository::{InMemoryRepository, ParticipantRepository, Storage, SurveyRepository};
use survey_core::model::{LikertValue, QuestionId, SurveyId, UserId};
use survey_core::time::fixed_now;

fn survey_id() -> SurveyId {
    SurveyId::new(SURVEY)
}

fn user_id() -> UserId {
    UserId::new(USER)
}

#[tokio::test]
async fn concurrent_participant_is_adopted() {
    let harness = Harness::new(build_survey(2, 0)).await;
    let mut session = harness.start().await;
    answer_n(&harness, &mut session, 1).await;

    // Another tab creates the participant between our lookup and insert.
    harness
        .repo
        .race_next_participant_insert(&user_id(), &survey_id());
    let outcome = harness
        .service
        .answer_current(&mut session, LikertValue::Agree, false)
        .await
        .unwrap();
    let report = outcome.final_flush.unwrap().unwrap();

    let winner = harness
        .repo
        .find_participant(&user_id(), &survey_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.participant_id, winner.id);
    assert_eq!(harness.repo.participants_for(&user_id(), &survey_id()), 1);
    assert_eq!(harness.repo.response_count(&winner.id), 2);
}

#[tokio::test]
async fn partial_failure_is_retried_without_duplicates() {
    let harness = Harness::new(build_survey(5, 0)).await;
    let mut session = harness.start().await;
    answer_n(&harness, &mut session, 4).await;

    harness.repo.fail_responses_after(2);
    let outcome = harness
        .service
        .answer_current(&mut session, LikertValue::Disagree, false)
        .await
        .unwrap();
    match outcome.final_flush.unwrap() {
        Err(ReconcileError::Submission { attempted, failed }) => {
            assert_eq!(attempted, 5);
            assert_eq!(failed.len(), 3);
        }
        other => panic!("expected submission error, got {other:?}"),
    }
    assert!(harness.has_local_session());
    assert_eq!(session.state().answers().len(), 5);

    let first_round: Vec<QuestionId> = harness.repo.response_attempts();
    let stored_first: HashSet<QuestionId> = first_round[..2].iter().cloned().collect();

    harness.repo.heal();
    let report = harness.service.finalize(&mut session).await.unwrap();
    assert_eq!(report.submitted, 3);
    assert_eq!(report.already_present, 2);

    let retry_round = &harness.repo.response_attempts()[5..];
    assert_eq!(retry_round.len(), 3);
    assert!(retry_round.iter().all(|id| !stored_first.contains(id)));
    assert_eq!(harness.repo.response_count(&report.participant_id), 5);
    assert!(!harness.has_local_session());
}

#[tokio::test]
async fn finalizing_twice_writes_nothing_new() {
    let harness = Harness::new(build_survey(3, 0)).await;
    let mut session = harness.start().await;
    answer_n(&harness, &mut session, 3).await;

    let again = harness.service.finalize(&mut session).await.unwrap();
    assert_eq!(again.submitted, 0);
    assert_eq!(again.already_present, 3);
    assert_eq!(harness.repo.participant_count(), 1);
    assert_eq!(harness.repo.response_count(&again.participant_id), 3);
    assert!(!harness.has_local_session());
}

#[tokio::test]
async fn offline_final_flush_keeps_everything_local() {
    let harness = Harness::new(build_survey(2, 0)).await;
    let mut session = harness.start().await;
    harness.network.set_online(false);
    answer_n(&harness, &mut session, 2).await;

    let err = harness.service.finalize(&mut session).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Offline));
    assert!(err.is_retryable());
    assert_eq!(harness.repo.participant_count(), 0);
    assert!(harness.has_local_session());

    harness.network.set_online(true);
    let report = harness.service.finalize(&mut session).await.unwrap();
    assert_eq!(report.submitted, 2);
}

#[tokio::test]
async fn optional_answers_stream_as_they_come() {
    let harness = Harness::new(build_survey(2, 2)).await;
    let mut session = harness.start().await;
    answer_n(&harness, &mut session, 2).await;
    harness.service.answer_more(&mut session).unwrap();
    answer_n(&harness, &mut session, 1).await;

    let participant = session
        .state()
        .remote_participant_id()
        .cloned()
        .expect("streaming bound a participant");
    assert_eq!(harness.repo.response_count(&participant), 1);

    let outcome = harness
        .service
        .answer_current(&mut session, LikertValue::Agree, false)
        .await
        .unwrap();
    let report = outcome.final_flush.unwrap().unwrap();
    assert_eq!(report.participant_id, participant);
    assert_eq!(report.already_present, 1);
    assert_eq!(report.submitted, 3);
}

#[tokio::test]
async fn streaming_is_skipped_offline_and_failures_are_swallowed() {
    let harness = Harness::new(build_survey(1, 3)).await;
    let mut session = harness.start().await;
    answer_n(&harness, &mut session, 1).await;
    harness.service.answer_more(&mut session).unwrap();

    harness.network.set_online(false);
    answer_n(&harness, &mut session, 1).await;
    assert_eq!(harness.repo.participant_count(), 0);

    harness.network.set_online(true);
    harness.repo.fail_responses_after(0);
    answer_n(&harness, &mut session, 1).await;
    assert_eq!(session.state().cursor(), 3);

    harness.repo.heal();
    let outcome = harness
        .service
        .answer_current(&mut session, LikertValue::Agree, false)
        .await
        .unwrap();
    let report = outcome.final_flush.unwrap().unwrap();
    assert_eq!(report.submitted, 4);
}

#[tokio::test]
async fn stale_participant_is_re_resolved() {
    let harness = Harness::new(build_survey(2, 0)).await;
    let mut session = harness.start().await;
    harness.repo.fail_responses_after(0);
    answer_n(&harness, &mut session, 2).await;

    let stale = session.state().remote_participant_id().cloned().unwrap();
    harness.repo.delete_participant(&stale);
    harness.repo.heal();

    let report = harness.service.finalize(&mut session).await.unwrap();
    assert_ne!(report.participant_id, stale);
    assert_eq!(report.submitted, 2);
    assert_eq!(harness.repo.participants_for(&user_id(), &survey_id()), 1);
}

#[tokio::test]
async fn access_denial_surfaces_as_identity_error() {
    let harness = Harness::new(build_survey(1, 0)).await;
    let mut session = harness.start().await;
    harness.repo.set_deny_access(true);
    answer_n(&harness, &mut session, 1).await;

    let err = harness.service.finalize(&mut session).await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Identity(IdentityError::PermissionDenied(_))
    ));
    assert!(!err.is_retryable());
    assert!(harness.has_local_session());
}

#[tokio::test]
async fn finalizing_an_unfinished_session_is_misuse() {
    let harness = Harness::new(build_survey(2, 0)).await;
    let mut session = harness.start().await;
    let err = harness.service.finalize(&mut session).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Session(_)));
    assert_eq!(harness.repo.participant_count(), 0);
}

#[tokio::test]
async fn signed_in_user_must_match_the_session() {
    let harness = Harness::new(build_survey(1, 0)).await;
    let mut session = harness.start().await;
    harness.network.set_online(false);
    answer_n(&harness, &mut session, 1).await;

    let other = Harness::with_identity(
        build_survey(1, 0),
        services::StaticIdentity::new(UserId::new("someone-else")),
    )
    .await;
    other.network.set_online(true);
    let err = other.service.finalize(&mut session).await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Identity(IdentityError::UserMismatch { .. })
    ));
}

/// Keeps entries forever: every removal fails.
struct UndeletableStore(InMemorySessionStore);

impl LocalSessionStore for UndeletableStore {
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
        self.0.get(key)
    }
    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError> {
        self.0.set(key, value)
    }
    fn remove(&self, _key: &str) -> Result<(), LocalStoreError> {
        Err(LocalStoreError::Unavailable("storage locked".into()))
    }
}

#[tokio::test]
async fn stored_submission_succeeds_even_if_local_copy_lingers() {
    let repo = InMemoryRepository::new();
    repo.upsert_survey(&build_survey(2, 0)).await.unwrap();
    let local = InMemorySessionStore::new();
    let service = SurveySessionService::new(
        Clock::fixed(fixed_now()),
        &Storage::from_in_memory(&repo),
        Arc::new(UndeletableStore(local.clone())),
        Arc::new(StaticIdentity::new(user_id())),
        Arc::new(NetworkSwitch::online()),
    );

    let mut session = service.start_session(&survey_id(), None).await.unwrap();
    service
        .answer_current(&mut session, LikertValue::Agree, false)
        .await
        .unwrap();
    let outcome = service
        .answer_current(&mut session, LikertValue::Disagree, false)
        .await
        .unwrap();
    let report = outcome.final_flush.unwrap().unwrap();
    assert_eq!(report.submitted, 2);
    assert!(!local.is_empty().unwrap());

    let again = service.finalize(&mut session).await.unwrap();
    assert_eq!(again.submitted, 0);
    assert_eq!(again.already_present, 2);
    assert_eq!(repo.response_count(&report.participant_id), 2);
}
