//! Payment ledger workflow.
//!
//! Students submit one proof at a time; the admin flips it to approved or
//! rejected. A later rejection never touches votes already cast — the
//! ledger only gates future votes.

use tracing::info;
use uuid::Uuid;

use crate::{
    auth,
    error::AppError,
    models::{PaymentRecord, PaymentStatus, Session},
    policy::PaymentError,
    state::AppState,
    store::{PAYMENTS_PREFIX, StoreError, payment_path},
};

pub async fn records_for(state: &AppState, user_id: Uuid) -> Result<Vec<PaymentRecord>, AppError> {
    Ok(all_records(state)
        .await?
        .into_iter()
        .filter(|r| r.user_id == user_id)
        .collect())
}

pub async fn all_records(state: &AppState) -> Result<Vec<PaymentRecord>, AppError> {
    let docs = state.store.list(PAYMENTS_PREFIX).await?;
    let mut records = Vec::with_capacity(docs.len());
    for doc in docs {
        records.push(serde_json::from_value(doc.value)?);
    }
    Ok(records)
}

/// Submit a payment proof, creating a Pending record.
///
/// Anonymous sessions cannot pay; a registered account is the unit the
/// ledger is keyed on.
pub async fn submit_proof(
    state: &AppState,
    session: &Session,
    proof_ref: &str,
) -> Result<PaymentRecord, AppError> {
    if session.anonymous {
        return Err(AppError::Unauthorized);
    }
    if proof_ref.trim().is_empty() {
        return Err(AppError::MalformedPayload);
    }

    let existing = records_for(state, session.user_id).await?;
    state
        .policy
        .check_submit_proof(&existing)
        .map_err(|PaymentError::Duplicate(status)| AppError::DuplicatePayment(status))?;

    let record = state.policy.new_payment_record(
        session.user_id,
        session.email.clone(),
        proof_ref.trim().to_string(),
        chrono::Utc::now(),
    );

    state
        .store
        .insert(&payment_path(record.id), serde_json::to_value(&record)?)
        .await?;

    info!("Payment {} submitted by {}", record.id, session.user_id);
    Ok(record)
}

/// Admin review: overwrite the status to approved or rejected.
pub async fn set_status(
    state: &AppState,
    session: &Session,
    payment_id: Uuid,
    status: PaymentStatus,
) -> Result<PaymentRecord, AppError> {
    auth::require_admin(session)?;
    if status == PaymentStatus::Pending {
        return Err(AppError::MalformedPayload);
    }

    let path = payment_path(payment_id);
    for _ in 0..state.config.cast_attempts {
        let Some(doc) = state.store.get(&path).await? else {
            return Err(AppError::NotFound);
        };
        let mut record: PaymentRecord = serde_json::from_value(doc.value)?;
        record.status = status;

        match state
            .store
            .put_if(&path, serde_json::to_value(&record)?, doc.version)
            .await
        {
            Ok(_) => {
                info!("Payment {payment_id} marked {status:?}");
                return Ok(record);
            }
            Err(StoreError::Conflict) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(AppError::ConflictRetryExhausted)
}
