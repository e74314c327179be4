//! Identity and sessions.
//!
//! The role claim is decided once, when the account is created or signs
//! in, by comparing the email against the configured admin address. After
//! that every request trusts the claim carried by the session document,
//! never the email string.

use chrono::{Duration, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{Credential, Role, Session, User, UserRecord},
    state::AppState,
    store::{StoreError, email_path, session_path, user_path},
};

pub async fn sign_up(
    state: &AppState,
    email: &str,
    password: &str,
    matric_number: &str,
) -> Result<(Session, User), AppError> {
    let email = email.trim().to_lowercase();
    if !email.contains('@') || password.is_empty() || matric_number.trim().is_empty() {
        return Err(AppError::MalformedPayload);
    }

    let user_id = Uuid::new_v4();

    // The email document doubles as the uniqueness lock: whoever inserts
    // it first owns the address.
    match state
        .store
        .insert(&email_path(&email), json!({ "user_id": user_id }))
        .await
    {
        Ok(_) => {}
        Err(StoreError::Conflict) => return Err(AppError::EmailTaken),
        Err(e) => return Err(e.into()),
    }

    let role = derive_role(state, &email);
    let salt = Uuid::new_v4().simple().to_string();
    let user = User {
        id: user_id,
        email: Some(email.clone()),
        matric_number: Some(matric_number.trim().to_string()),
        role,
        created_at: Utc::now(),
    };
    let record = UserRecord {
        user: user.clone(),
        credential: Some(Credential {
            digest: digest(&state.config.password_pepper, &salt, password),
            salt,
        }),
    };

    state
        .store
        .insert(&user_path(user_id), serde_json::to_value(&record)?)
        .await?;

    info!("Registered {email} as {role:?}");
    let session = issue_session(state, &user, false).await?;
    Ok((session, user))
}

pub async fn sign_in(
    state: &AppState,
    email: &str,
    password: &str,
) -> Result<(Session, User), AppError> {
    let email = email.trim().to_lowercase();

    let Some(owner) = state.store.get(&email_path(&email)).await? else {
        return Err(AppError::Unauthorized);
    };
    let user_id: Uuid = serde_json::from_value(owner.value["user_id"].clone())?;

    let Some(doc) = state.store.get(&user_path(user_id)).await? else {
        return Err(AppError::Unauthorized);
    };
    let record: UserRecord = serde_json::from_value(doc.value)?;

    let Some(credential) = &record.credential else {
        return Err(AppError::Unauthorized);
    };
    if digest(&state.config.password_pepper, &credential.salt, password) != credential.digest {
        return Err(AppError::Unauthorized);
    }

    let session = issue_session(state, &record.user, false).await?;
    Ok((session, record.user))
}

/// Anonymous bootstrap session: may browse polls, cannot pay or vote.
pub async fn bootstrap(state: &AppState) -> Result<Session, AppError> {
    let user = User {
        id: Uuid::new_v4(),
        email: None,
        matric_number: None,
        role: Role::Student,
        created_at: Utc::now(),
    };
    let record = UserRecord {
        user: user.clone(),
        credential: None,
    };
    state
        .store
        .insert(&user_path(user.id), serde_json::to_value(&record)?)
        .await?;

    issue_session(state, &user, true).await
}

pub async fn sign_out(state: &AppState, token: &str) -> Result<(), AppError> {
    state.store.remove(&session_path(token)).await?;
    Ok(())
}

/// Resolve a bearer token to its claims. Expired sessions read as absent.
pub async fn current(state: &AppState, token: &str) -> Result<Session, AppError> {
    let Some(doc) = state.store.get(&session_path(token)).await? else {
        return Err(AppError::Unauthorized);
    };
    let session: Session = serde_json::from_value(doc.value)?;

    if session.expires_at <= Utc::now() {
        state.store.remove(&session_path(token)).await?;
        return Err(AppError::Unauthorized);
    }
    Ok(session)
}

/// Gate for admin-only operations. Checks the session claim, never the
/// email string.
pub fn require_admin(session: &Session) -> Result<(), AppError> {
    if session.role == Role::Admin {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

fn derive_role(state: &AppState, email: &str) -> Role {
    if email == state.config.admin_email.to_lowercase() {
        Role::Admin
    } else {
        Role::Student
    }
}

async fn issue_session(
    state: &AppState,
    user: &User,
    anonymous: bool,
) -> Result<Session, AppError> {
    let session = Session {
        token: Uuid::new_v4().simple().to_string(),
        user_id: user.id,
        email: user.email.clone(),
        role: user.role,
        anonymous,
        expires_at: Utc::now() + Duration::seconds(state.config.session_ttl_secs as i64),
    };

    state
        .store
        .insert(&session_path(&session.token), serde_json::to_value(&session)?)
        .await?;
    Ok(session)
}

fn digest(pepper: &str, salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(pepper.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::{Config, StoreBackend},
        store::MemoryStore,
    };

    fn test_state(session_ttl_secs: u64) -> Arc<AppState> {
        let config = Config {
            port: 0,
            redis_url: String::new(),
            store_backend: StoreBackend::Memory,
            admin_email: "admin@naotems.edu".to_string(),
            fee_amount: "N500".to_string(),
            session_ttl_secs,
            cast_attempts: 5,
            password_pepper: "pepper".to_string(),
        };
        AppState::with_store(config, Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_signup_then_login() {
        let state = test_state(3600);
        let (_, user) = sign_up(&state, "u@naotems.edu", "hunter22", "MAT/001")
            .await
            .unwrap();
        assert_eq!(user.role, Role::Student);

        let (session, _) = sign_in(&state, "U@naotems.edu", "hunter22").await.unwrap();
        let claims = current(&state, &session.token).await.unwrap();
        assert_eq!(claims.user_id, user.id);
        assert!(!claims.anonymous);
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let state = test_state(3600);
        sign_up(&state, "u@naotems.edu", "hunter22", "MAT/001")
            .await
            .unwrap();
        assert!(matches!(
            sign_in(&state, "u@naotems.edu", "wrong").await,
            Err(AppError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let state = test_state(3600);
        sign_up(&state, "u@naotems.edu", "hunter22", "MAT/001")
            .await
            .unwrap();
        assert!(matches!(
            sign_up(&state, "u@naotems.edu", "other", "MAT/002").await,
            Err(AppError::EmailTaken)
        ));
    }

    #[tokio::test]
    async fn test_admin_claim_derived_at_signup() {
        let state = test_state(3600);
        let (session, user) = sign_up(&state, "admin@naotems.edu", "hunter22", "STAFF/1")
            .await
            .unwrap();
        assert_eq!(user.role, Role::Admin);
        assert_eq!(current(&state, &session.token).await.unwrap().role, Role::Admin);
    }

    #[tokio::test]
    async fn test_expired_session_reads_as_absent() {
        let state = test_state(0);
        let (session, _) = sign_up(&state, "u@naotems.edu", "hunter22", "MAT/001")
            .await
            .unwrap();
        assert!(matches!(
            current(&state, &session.token).await,
            Err(AppError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_sign_out_invalidates_token() {
        let state = test_state(3600);
        let (session, _) = sign_up(&state, "u@naotems.edu", "hunter22", "MAT/001")
            .await
            .unwrap();
        sign_out(&state, &session.token).await.unwrap();
        assert!(matches!(
            current(&state, &session.token).await,
            Err(AppError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_session_is_anonymous_student() {
        let state = test_state(3600);
        let session = bootstrap(&state).await.unwrap();
        let claims = current(&state, &session.token).await.unwrap();
        assert!(claims.anonymous);
        assert_eq!(claims.role, Role::Student);
        assert!(claims.email.is_none());
    }
}
