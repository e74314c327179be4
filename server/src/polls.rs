//! Poll store workflow: creation, deactivation, and the vote path.
//!
//! The poll document is the only contended record in the system. Every
//! mutation here is a bounded optimistic loop over [`DocStore::put_if`]:
//! read a snapshot, decide, write back only if the version is unchanged.
//! The eligibility checks re-run on every attempt, so a second submission
//! from the same user (two tabs, double click) loses the race cleanly
//! with `AlreadyVoted` instead of double-counting.
//!
//! [`DocStore::put_if`]: crate::store::DocStore::put_if

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    auth,
    error::AppError,
    ledger,
    models::{Candidate, CandidateResult, Poll, Session},
    policy,
    state::AppState,
    store::{POLLS_PREFIX, StoreError, poll_path},
};

#[derive(Debug, Deserialize)]
pub struct NewCandidate {
    pub name: String,
    #[serde(default)]
    pub post: Option<String>,
}

/// Poll plus its display projection for the requesting user.
#[derive(Debug, Serialize)]
pub struct PollView {
    pub id: Uuid,
    pub title: String,
    pub active: bool,
    pub created_at: chrono::DateTime<Utc>,
    pub total_votes: u64,
    pub results: Vec<CandidateResult>,
    pub has_voted: bool,
}

impl PollView {
    fn project(poll: &Poll, viewer: Uuid) -> Self {
        Self {
            id: poll.id,
            title: poll.title.clone(),
            active: poll.active,
            created_at: poll.created_at,
            total_votes: poll.total_votes(),
            results: policy::results(poll),
            has_voted: poll.voters.contains(&viewer),
        }
    }
}

pub async fn create_poll(
    state: &AppState,
    session: &Session,
    title: &str,
    candidates: Vec<NewCandidate>,
) -> Result<Poll, AppError> {
    auth::require_admin(session)?;

    let title = title.trim();
    if title.is_empty() || candidates.is_empty() {
        return Err(AppError::MalformedPayload);
    }
    if candidates.iter().any(|c| c.name.trim().is_empty()) {
        return Err(AppError::MalformedPayload);
    }

    let candidates: Vec<Candidate> = candidates
        .into_iter()
        .enumerate()
        .map(|(i, c)| Candidate {
            id: i as u32 + 1,
            name: c.name.trim().to_string(),
            post: c.post.filter(|p| !p.trim().is_empty()),
        })
        .collect();

    let poll = Poll {
        id: Uuid::new_v4(),
        title: title.to_string(),
        tally: candidates.iter().map(|c| (c.id, 0)).collect::<BTreeMap<_, _>>(),
        candidates,
        voters: BTreeSet::new(),
        active: true,
        created_at: Utc::now(),
    };

    state
        .store
        .insert(&poll_path(poll.id), serde_json::to_value(&poll)?)
        .await?;

    info!("Poll {} created: {}", poll.id, poll.title);
    Ok(poll)
}

/// Soft delete: the poll stays on record with `active = false`.
/// Deactivating an already-inactive poll is a no-op success.
pub async fn deactivate_poll(
    state: &AppState,
    session: &Session,
    poll_id: Uuid,
) -> Result<Poll, AppError> {
    auth::require_admin(session)?;

    let path = poll_path(poll_id);
    for _ in 0..state.config.cast_attempts {
        let Some(doc) = state.store.get(&path).await? else {
            return Err(AppError::NotFound);
        };
        let mut poll: Poll = serde_json::from_value(doc.value)?;
        if !poll.active {
            return Ok(poll);
        }
        poll.active = false;

        match state
            .store
            .put_if(&path, serde_json::to_value(&poll)?, doc.version)
            .await
        {
            Ok(_) => {
                info!("Poll {poll_id} deactivated");
                return Ok(poll);
            }
            Err(StoreError::Conflict) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(AppError::ConflictRetryExhausted)
}

/// Cast one vote, serialized per poll by the store's version check.
///
/// Each attempt re-reads the poll and the voter's ledger, re-evaluates
/// eligibility, applies the increment and writes back conditionally.
/// Policy failures surface immediately; only version conflicts retry,
/// up to the configured bound.
pub async fn cast_vote(
    state: &AppState,
    session: &Session,
    poll_id: Uuid,
    candidate_id: u32,
) -> Result<Poll, AppError> {
    let path = poll_path(poll_id);

    for attempt in 0..state.config.cast_attempts {
        let Some(doc) = state.store.get(&path).await? else {
            return Err(AppError::NotFound);
        };
        let mut poll: Poll = serde_json::from_value(doc.value)?;
        let snapshot = ledger::records_for(state, session.user_id).await?;

        let mutation =
            state
                .policy
                .evaluate_vote(session.user_id, &poll, &snapshot, candidate_id)?;
        mutation.apply(&mut poll);

        match state
            .store
            .put_if(&path, serde_json::to_value(&poll)?, doc.version)
            .await
        {
            Ok(_) => {
                info!(
                    "Vote recorded: poll {poll_id}, candidate {candidate_id}, voter {}",
                    session.user_id
                );
                return Ok(poll);
            }
            Err(StoreError::Conflict) => {
                debug!("Vote conflict on poll {poll_id}, attempt {attempt}");
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(AppError::ConflictRetryExhausted)
}

pub async fn get_poll(state: &AppState, poll_id: Uuid) -> Result<Poll, AppError> {
    let Some(doc) = state.store.get(&poll_path(poll_id)).await? else {
        return Err(AppError::NotFound);
    };
    Ok(serde_json::from_value(doc.value)?)
}

/// All polls, newest first, projected for the viewer.
pub async fn list_polls(state: &AppState, viewer: Uuid) -> Result<Vec<PollView>, AppError> {
    let docs = state.store.list(POLLS_PREFIX).await?;
    let mut polls: Vec<Poll> = Vec::with_capacity(docs.len());
    for doc in docs {
        polls.push(serde_json::from_value(doc.value)?);
    }
    polls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(polls.iter().map(|p| PollView::project(p, viewer)).collect())
}
