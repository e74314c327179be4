//! Domain records stored as documents.
//!
//! Every struct here round-trips through JSON into the document store.
//! Credential material lives in [`UserRecord`], which never leaves the
//! server; outward responses carry [`User`] only.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Absent for anonymous bootstrap sessions.
    pub email: Option<String>,
    pub matric_number: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Salted, peppered SHA-256 digest of a password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub salt: String,
    pub digest: String,
}

/// The stored shape of a user: public identity plus credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub user: User,
    pub credential: Option<Credential>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_email: Option<String>,
    /// Opaque display string, e.g. "N500". The policy never parses it.
    pub amount: String,
    /// Opaque pointer to the uploaded proof artifact.
    pub proof_ref: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Sequential within the owning poll, starting at 1.
    pub id: u32,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: Uuid,
    pub title: String,
    pub candidates: Vec<Candidate>,
    /// candidate id -> vote count. Every key is a candidate id.
    pub tally: BTreeMap<u32, u64>,
    /// Append-only while the poll exists.
    pub voters: BTreeSet<Uuid>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Poll {
    pub fn total_votes(&self) -> u64 {
        self.tally.values().sum()
    }

    pub fn candidate(&self, id: u32) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.id == id)
    }
}

/// Display projection of one candidate's standing within a poll.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateResult {
    pub candidate: Candidate,
    pub count: u64,
    /// Share of the total, one decimal place. 0.0 when the poll is empty.
    pub percentage: f64,
    /// Set only once at least one vote exists.
    pub winner: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: Role,
    pub anonymous: bool,
    pub expires_at: DateTime<Utc>,
}
