use std::{convert::Infallible, sync::Arc};

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, header::AUTHORIZATION},
    response::sse::{Event, KeepAlive, Sse},
};
use serde::{Deserialize, Serialize};
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use crate::{
    auth,
    error::AppError,
    ledger,
    models::{PaymentRecord, PaymentStatus, Poll, Session, User},
    polls::{self, NewCandidate, PollView},
    state::AppState,
};

#[derive(Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub matric_number: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct CreatePollRequest {
    pub title: String,
    pub candidates: Vec<NewCandidate>,
}

#[derive(Deserialize)]
pub struct VoteRequest {
    pub candidate_id: u32,
}

#[derive(Deserialize)]
pub struct ProofRequest {
    pub proof_ref: String,
}

#[derive(Deserialize)]
pub struct ReviewRequest {
    pub status: PaymentStatus,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

/// Resolve the bearer token on the request to session claims.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Session, AppError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    auth::current(state, token).await
}

pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SignupRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let (session, user) = auth::sign_up(
        &state,
        &payload.email,
        &payload.password,
        &payload.matric_number,
    )
    .await?;

    Ok(Json(SessionResponse {
        token: session.token,
        user: Some(user),
    }))
}

pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let (session, user) = auth::sign_in(&state, &payload.email, &payload.password).await?;

    Ok(Json(SessionResponse {
        token: session.token,
        user: Some(user),
    }))
}

pub async fn anonymous_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = auth::bootstrap(&state).await?;

    Ok(Json(SessionResponse {
        token: session.token,
        user: None,
    }))
}

pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<()>, AppError> {
    let session = authenticate(&state, &headers).await?;
    auth::sign_out(&state, &session.token).await?;
    Ok(Json(()))
}

pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Session>, AppError> {
    Ok(Json(authenticate(&state, &headers).await?))
}

pub async fn list_polls_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<PollView>>, AppError> {
    let session = authenticate(&state, &headers).await?;
    Ok(Json(polls::list_polls(&state, session.user_id).await?))
}

pub async fn create_poll_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreatePollRequest>,
) -> Result<Json<Poll>, AppError> {
    let session = authenticate(&state, &headers).await?;
    let poll = polls::create_poll(&state, &session, &payload.title, payload.candidates).await?;
    Ok(Json(poll))
}

pub async fn deactivate_poll_handler(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Poll>, AppError> {
    let session = authenticate(&state, &headers).await?;
    Ok(Json(polls::deactivate_poll(&state, &session, poll_id).await?))
}

pub async fn vote_handler(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<VoteRequest>,
) -> Result<Json<PollView>, AppError> {
    let session = authenticate(&state, &headers).await?;
    polls::cast_vote(&state, &session, poll_id, payload.candidate_id).await?;

    // Fresh read so the caller sees the tally including any concurrent
    // votes that landed around theirs.
    let poll = polls::get_poll(&state, poll_id).await?;
    let views = polls::list_polls(&state, session.user_id).await?;
    let view = views
        .into_iter()
        .find(|v| v.id == poll.id)
        .ok_or(AppError::NotFound)?;
    Ok(Json(view))
}

pub async fn list_payments_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<PaymentRecord>>, AppError> {
    let session = authenticate(&state, &headers).await?;

    let records = if session.role == crate::models::Role::Admin {
        ledger::all_records(&state).await?
    } else {
        ledger::records_for(&state, session.user_id).await?
    };
    Ok(Json(records))
}

pub async fn submit_proof_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<ProofRequest>,
) -> Result<Json<PaymentRecord>, AppError> {
    let session = authenticate(&state, &headers).await?;
    Ok(Json(
        ledger::submit_proof(&state, &session, &payload.proof_ref).await?,
    ))
}

pub async fn review_payment_handler(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<ReviewRequest>,
) -> Result<Json<PaymentRecord>, AppError> {
    let session = authenticate(&state, &headers).await?;
    Ok(Json(
        ledger::set_status(&state, &session, payment_id, payload.status).await?,
    ))
}

/// SSE feed of changed document paths. Clients re-fetch on change rather
/// than trusting the event payload, matching the snapshot model.
pub async fn events_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    authenticate(&state, &headers).await?;

    let stream = state
        .store
        .subscribe("vote:")
        .into_stream()
        .map(|path| Ok(Event::default().event("change").data(path)));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
