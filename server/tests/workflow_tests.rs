//! End-to-end workflow tests over the in-process store: the payment
//! gate, the single-vote guarantee under concurrency, and admin
//! operations. These run the same code paths as the Redis backend; only
//! the CAS implementation differs.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use ballot::auth;
use ballot::config::{Config, StoreBackend};
use ballot::error::AppError;
use ballot::ledger;
use ballot::models::{PaymentStatus, Session};
use ballot::polls::{self, NewCandidate};
use ballot::state::AppState;
use ballot::store::{DocStore, MemoryStore, StoreError, Subscription, VersionedDoc};

fn test_config() -> Config {
    Config {
        port: 0,
        redis_url: String::new(),
        store_backend: StoreBackend::Memory,
        admin_email: "admin@naotems.edu".to_string(),
        fee_amount: "N500".to_string(),
        session_ttl_secs: 3600,
        cast_attempts: 5,
        password_pepper: "pepper".to_string(),
    }
}

fn test_state() -> Arc<AppState> {
    AppState::with_store(test_config(), Arc::new(MemoryStore::new()))
}

async fn admin(state: &AppState) -> Session {
    let (session, _) = auth::sign_up(state, "admin@naotems.edu", "hunter22", "STAFF/1")
        .await
        .unwrap();
    session
}

async fn student(state: &AppState, n: usize) -> Session {
    let email = format!("student{n}@naotems.edu");
    let (session, _) = auth::sign_up(state, &email, "hunter22", &format!("MAT/{n:03}"))
        .await
        .unwrap();
    session
}

async fn approve(state: &AppState, admin: &Session, student: &Session) {
    let record = ledger::submit_proof(state, student, "proof.png").await.unwrap();
    ledger::set_status(state, admin, record.id, PaymentStatus::Approved)
        .await
        .unwrap();
}

fn two_candidates() -> Vec<NewCandidate> {
    vec![
        NewCandidate {
            name: "Ada".to_string(),
            post: Some("President".to_string()),
        },
        NewCandidate {
            name: "Bayo".to_string(),
            post: None,
        },
    ]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_votes_all_counted() {
    let state = test_state();
    let admin = admin(&state).await;
    let poll = polls::create_poll(&state, &admin, "Class Rep", two_candidates())
        .await
        .unwrap();

    let n = 24;
    let mut sessions = Vec::new();
    for i in 0..n {
        let session = student(&state, i).await;
        approve(&state, &admin, &session).await;
        sessions.push(session);
    }

    let mut handles = Vec::new();
    for (i, session) in sessions.into_iter().enumerate() {
        let state = state.clone();
        let poll_id = poll.id;
        let candidate = if i % 3 == 0 { 2 } else { 1 };
        handles.push(tokio::spawn(async move {
            polls::cast_vote(&state, &session, poll_id, candidate).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().expect("every eligible vote must land");
    }

    // The core regression: no lost updates under contention.
    let poll = polls::get_poll(&state, poll.id).await.unwrap();
    assert_eq!(poll.total_votes(), n as u64);
    assert_eq!(poll.voters.len(), n);
    assert_eq!(poll.tally[&2], (n as u64).div_ceil(3));
    assert_eq!(poll.tally[&1], n as u64 - poll.tally[&2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_user_races_itself_to_one_vote() {
    let state = test_state();
    let admin = admin(&state).await;
    let poll = polls::create_poll(&state, &admin, "Class Rep", two_candidates())
        .await
        .unwrap();
    let session = student(&state, 0).await;
    approve(&state, &admin, &session).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let state = state.clone();
        let session = session.clone();
        let poll_id = poll.id;
        handles.push(tokio::spawn(async move {
            polls::cast_vote(&state, &session, poll_id, 1).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(AppError::AlreadyVoted) | Err(AppError::ConflictRetryExhausted) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(successes, 1);

    let poll = polls::get_poll(&state, poll.id).await.unwrap();
    assert_eq!(poll.total_votes(), 1);
    assert_eq!(poll.voters.len(), 1);
}

#[tokio::test]
async fn test_vote_requires_approved_payment() {
    let state = test_state();
    let admin = admin(&state).await;
    let poll = polls::create_poll(&state, &admin, "Class Rep", two_candidates())
        .await
        .unwrap();
    let session = student(&state, 0).await;

    // No payment at all.
    assert!(matches!(
        polls::cast_vote(&state, &session, poll.id, 1).await,
        Err(AppError::PaymentRequired)
    ));

    // Pending is not enough.
    let record = ledger::submit_proof(&state, &session, "proof.png").await.unwrap();
    assert!(matches!(
        polls::cast_vote(&state, &session, poll.id, 1).await,
        Err(AppError::PaymentRequired)
    ));

    // Rejected is not enough either.
    ledger::set_status(&state, &admin, record.id, PaymentStatus::Rejected)
        .await
        .unwrap();
    assert!(matches!(
        polls::cast_vote(&state, &session, poll.id, 1).await,
        Err(AppError::PaymentRequired)
    ));
}

#[tokio::test]
async fn test_single_vote_scenario_with_percentages() {
    let state = test_state();
    let admin = admin(&state).await;
    let poll = polls::create_poll(&state, &admin, "Class Rep", two_candidates())
        .await
        .unwrap();
    let session = student(&state, 0).await;
    approve(&state, &admin, &session).await;

    polls::cast_vote(&state, &session, poll.id, 1).await.unwrap();

    let views = polls::list_polls(&state, session.user_id).await.unwrap();
    let view = views.iter().find(|v| v.id == poll.id).unwrap();
    assert!(view.has_voted);
    assert_eq!(view.total_votes, 1);
    assert_eq!(view.results[0].candidate.id, 1);
    assert_eq!(view.results[0].percentage, 100.0);
    assert!(view.results[0].winner);
    assert_eq!(view.results[1].percentage, 0.0);
    assert!(!view.results[1].winner);

    // Repeat submission is refused outright.
    assert!(matches!(
        polls::cast_vote(&state, &session, poll.id, 2).await,
        Err(AppError::AlreadyVoted)
    ));
}

#[tokio::test]
async fn test_unknown_candidate_rejected() {
    let state = test_state();
    let admin = admin(&state).await;
    let poll = polls::create_poll(&state, &admin, "Class Rep", two_candidates())
        .await
        .unwrap();
    let session = student(&state, 0).await;
    approve(&state, &admin, &session).await;

    assert!(matches!(
        polls::cast_vote(&state, &session, poll.id, 7).await,
        Err(AppError::UnknownCandidate)
    ));
}

#[tokio::test]
async fn test_payment_lifecycle_and_resubmission() {
    let state = test_state();
    let admin = admin(&state).await;
    let session = student(&state, 0).await;

    let first = ledger::submit_proof(&state, &session, "proof-1.png").await.unwrap();
    assert_eq!(first.status, PaymentStatus::Pending);
    assert_eq!(first.amount, "N500");

    // Second submission while pending is a duplicate.
    assert!(matches!(
        ledger::submit_proof(&state, &session, "proof-2.png").await,
        Err(AppError::DuplicatePayment("pending"))
    ));

    // Approved still blocks resubmission.
    ledger::set_status(&state, &admin, first.id, PaymentStatus::Approved)
        .await
        .unwrap();
    assert!(matches!(
        ledger::submit_proof(&state, &session, "proof-2.png").await,
        Err(AppError::DuplicatePayment("approved"))
    ));

    // Rejection unblocks a fresh pending record.
    ledger::set_status(&state, &admin, first.id, PaymentStatus::Rejected)
        .await
        .unwrap();
    let second = ledger::submit_proof(&state, &session, "proof-2.png").await.unwrap();
    assert_eq!(second.status, PaymentStatus::Pending);
    assert_ne!(second.id, first.id);

    let records = ledger::records_for(&state, session.user_id).await.unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn test_rejection_does_not_revoke_cast_vote() {
    let state = test_state();
    let admin = admin(&state).await;
    let poll = polls::create_poll(&state, &admin, "Class Rep", two_candidates())
        .await
        .unwrap();
    let session = student(&state, 0).await;

    let record = ledger::submit_proof(&state, &session, "proof.png").await.unwrap();
    ledger::set_status(&state, &admin, record.id, PaymentStatus::Approved)
        .await
        .unwrap();
    polls::cast_vote(&state, &session, poll.id, 1).await.unwrap();

    ledger::set_status(&state, &admin, record.id, PaymentStatus::Rejected)
        .await
        .unwrap();

    let poll = polls::get_poll(&state, poll.id).await.unwrap();
    assert_eq!(poll.total_votes(), 1);
    assert!(poll.voters.contains(&session.user_id));
}

#[tokio::test]
async fn test_deactivate_is_idempotent_and_blocks_votes() {
    let state = test_state();
    let admin = admin(&state).await;
    let poll = polls::create_poll(&state, &admin, "Class Rep", two_candidates())
        .await
        .unwrap();
    let session = student(&state, 0).await;
    approve(&state, &admin, &session).await;
    polls::cast_vote(&state, &session, poll.id, 1).await.unwrap();

    let first = polls::deactivate_poll(&state, &admin, poll.id).await.unwrap();
    assert!(!first.active);
    let second = polls::deactivate_poll(&state, &admin, poll.id).await.unwrap();
    assert!(!second.active);
    assert_eq!(second.total_votes(), 1);
    assert_eq!(second.voters, first.voters);

    let late = student(&state, 1).await;
    approve(&state, &admin, &late).await;
    assert!(matches!(
        polls::cast_vote(&state, &late, poll.id, 1).await,
        Err(AppError::PollInactive)
    ));
}

#[tokio::test]
async fn test_anonymous_session_cannot_pay_or_vote() {
    let state = test_state();
    let admin = admin(&state).await;
    let poll = polls::create_poll(&state, &admin, "Class Rep", two_candidates())
        .await
        .unwrap();

    let session = auth::bootstrap(&state).await.unwrap();
    assert!(matches!(
        ledger::submit_proof(&state, &session, "proof.png").await,
        Err(AppError::Unauthorized)
    ));
    assert!(matches!(
        polls::cast_vote(&state, &session, poll.id, 1).await,
        Err(AppError::PaymentRequired)
    ));

    // Browsing is allowed.
    assert_eq!(polls::list_polls(&state, session.user_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_admin_operations_forbidden_for_students() {
    let state = test_state();
    let admin = admin(&state).await;
    let poll = polls::create_poll(&state, &admin, "Class Rep", two_candidates())
        .await
        .unwrap();
    let session = student(&state, 0).await;
    let record = ledger::submit_proof(&state, &session, "proof.png").await.unwrap();

    assert!(matches!(
        polls::create_poll(&state, &session, "Rogue", two_candidates()).await,
        Err(AppError::Forbidden)
    ));
    assert!(matches!(
        polls::deactivate_poll(&state, &session, poll.id).await,
        Err(AppError::Forbidden)
    ));
    assert!(matches!(
        ledger::set_status(&state, &session, record.id, PaymentStatus::Approved).await,
        Err(AppError::Forbidden)
    ));
}

#[tokio::test]
async fn test_poll_validation() {
    let state = test_state();
    let admin = admin(&state).await;

    assert!(matches!(
        polls::create_poll(&state, &admin, "  ", two_candidates()).await,
        Err(AppError::MalformedPayload)
    ));
    assert!(matches!(
        polls::create_poll(&state, &admin, "Empty", vec![]).await,
        Err(AppError::MalformedPayload)
    ));
    assert!(matches!(
        polls::create_poll(
            &state,
            &admin,
            "Blank name",
            vec![NewCandidate {
                name: " ".to_string(),
                post: None
            }]
        )
        .await,
        Err(AppError::MalformedPayload)
    ));
}

/// Store wrapper whose conditional writes always lose, to drive the
/// retry loop to exhaustion.
struct AlwaysConflicting {
    inner: MemoryStore,
}

#[async_trait]
impl DocStore for AlwaysConflicting {
    async fn get(&self, path: &str) -> Result<Option<VersionedDoc>, StoreError> {
        self.inner.get(path).await
    }

    async fn insert(&self, path: &str, value: Value) -> Result<u64, StoreError> {
        self.inner.insert(path, value).await
    }

    async fn put_if(&self, _path: &str, _value: Value, _expected: u64) -> Result<u64, StoreError> {
        Err(StoreError::Conflict)
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.inner.remove(path).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<VersionedDoc>, StoreError> {
        self.inner.list(prefix).await
    }

    fn subscribe(&self, prefix: &str) -> Subscription {
        self.inner.subscribe(prefix)
    }
}

#[tokio::test]
async fn test_retry_exhaustion_surfaces() {
    let state = AppState::with_store(
        test_config(),
        Arc::new(AlwaysConflicting {
            inner: MemoryStore::new(),
        }),
    );
    let admin = admin(&state).await;
    let poll = polls::create_poll(&state, &admin, "Class Rep", two_candidates())
        .await
        .unwrap();
    let session = student(&state, 0).await;

    // Approval cannot go through put_if here, so vote with a hand-made
    // approved record inserted directly.
    let record = state.policy.new_payment_record(
        session.user_id,
        session.email.clone(),
        "proof.png".to_string(),
        chrono::Utc::now(),
    );
    let mut approved = record;
    approved.status = PaymentStatus::Approved;
    state
        .store
        .insert(
            &ballot::store::payment_path(approved.id),
            serde_json::to_value(&approved).unwrap(),
        )
        .await
        .unwrap();

    assert!(matches!(
        polls::cast_vote(&state, &session, poll.id, 1).await,
        Err(AppError::ConflictRetryExhausted)
    ));
}

#[tokio::test]
async fn test_change_feed_reports_poll_writes() {
    let state = test_state();
    let admin = admin(&state).await;

    let mut sub = state.store.subscribe(ballot::store::POLLS_PREFIX);
    let poll = polls::create_poll(&state, &admin, "Class Rep", two_candidates())
        .await
        .unwrap();

    let changed = sub.changed().await.unwrap();
    assert_eq!(changed, ballot::store::poll_path(poll.id));
}

#[tokio::test]
async fn test_admin_sees_all_payments_students_see_own() {
    let state = test_state();
    let admin_session = admin(&state).await;
    let a = student(&state, 0).await;
    let b = student(&state, 1).await;
    ledger::submit_proof(&state, &a, "a.png").await.unwrap();
    ledger::submit_proof(&state, &b, "b.png").await.unwrap();

    assert_eq!(ledger::all_records(&state).await.unwrap().len(), 2);
    let own = ledger::records_for(&state, a.user_id).await.unwrap();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].user_id, a.user_id);
    assert_eq!(
        ledger::records_for(&state, admin_session.user_id)
            .await
            .unwrap()
            .len(),
        0
    );
}

#[tokio::test]
async fn test_policy_config_is_injected_not_hardcoded() {
    let mut config = test_config();
    config.fee_amount = "N1000".to_string();
    let state = AppState::with_store(config, Arc::new(MemoryStore::new()));
    let session = student(&state, 0).await;

    let record = ledger::submit_proof(&state, &session, "proof.png").await.unwrap();
    assert_eq!(record.amount, "N1000");
}
