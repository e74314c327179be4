//! Vote and payment eligibility decisions.
//!
//! Pure module: every function takes snapshots and returns either a
//! decision error or a mutation value. Nothing here touches the store,
//! so the rules are testable without Redis. The caller is responsible
//! for applying the returned mutation atomically (see `polls::cast_vote`).

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Candidate, CandidateResult, PaymentRecord, PaymentStatus, Poll};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VoteError {
    #[error("Poll is no longer active")]
    PollInactive,

    #[error("Unknown candidate")]
    UnknownCandidate,

    #[error("You have already voted in this poll")]
    AlreadyVoted,

    #[error("An approved payment is required to vote")]
    PaymentRequired,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaymentError {
    #[error("A payment is already {0}")]
    Duplicate(&'static str),
}

/// Values the decision rules depend on, injected so tests can vary them.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub fee_amount: String,
}

/// The one increment a successful vote is allowed to make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteMutation {
    pub poll_id: Uuid,
    pub candidate_id: u32,
    pub voter: Uuid,
}

impl VoteMutation {
    pub fn apply(&self, poll: &mut Poll) {
        *poll.tally.entry(self.candidate_id).or_insert(0) += 1;
        poll.voters.insert(self.voter);
    }
}

pub struct Policy {
    config: PolicyConfig,
}

impl Policy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    /// Decide a vote attempt against one consistent snapshot.
    ///
    /// Checks run in order and short-circuit on the first failure:
    /// active poll, known candidate, not already voted, approved payment.
    pub fn evaluate_vote(
        &self,
        voter: Uuid,
        poll: &Poll,
        ledger: &[PaymentRecord],
        candidate_id: u32,
    ) -> Result<VoteMutation, VoteError> {
        if !poll.active {
            return Err(VoteError::PollInactive);
        }
        if poll.candidate(candidate_id).is_none() {
            return Err(VoteError::UnknownCandidate);
        }
        if poll.voters.contains(&voter) {
            return Err(VoteError::AlreadyVoted);
        }
        let approved = ledger
            .iter()
            .any(|r| r.user_id == voter && r.status == PaymentStatus::Approved);
        if !approved {
            return Err(VoteError::PaymentRequired);
        }

        Ok(VoteMutation {
            poll_id: poll.id,
            candidate_id,
            voter,
        })
    }

    /// A user may hold at most one non-rejected payment at a time.
    /// A rejected record never blocks resubmission.
    pub fn check_submit_proof(&self, records: &[PaymentRecord]) -> Result<(), PaymentError> {
        for record in records {
            match record.status {
                PaymentStatus::Pending => return Err(PaymentError::Duplicate("pending")),
                PaymentStatus::Approved => return Err(PaymentError::Duplicate("approved")),
                PaymentStatus::Rejected => {}
            }
        }
        Ok(())
    }

    /// Build the Pending record for a fresh proof submission.
    pub fn new_payment_record(
        &self,
        user_id: Uuid,
        user_email: Option<String>,
        proof_ref: String,
        now: DateTime<Utc>,
    ) -> PaymentRecord {
        PaymentRecord {
            id: Uuid::new_v4(),
            user_id,
            user_email,
            amount: self.config.fee_amount.clone(),
            proof_ref,
            status: PaymentStatus::Pending,
            created_at: now,
        }
    }
}

/// Per-candidate counts and percentages, sorted by count descending
/// (ties broken by candidate id). Percentages are one decimal place and
/// all zero while the poll has no votes.
pub fn results(poll: &Poll) -> Vec<CandidateResult> {
    let total = poll.total_votes();
    let max = poll
        .candidates
        .iter()
        .map(|c| count_for(poll, c))
        .max()
        .unwrap_or(0);

    let mut out: Vec<CandidateResult> = poll
        .candidates
        .iter()
        .map(|c| {
            let count = count_for(poll, c);
            CandidateResult {
                candidate: c.clone(),
                count,
                percentage: percentage(count, total),
                winner: total > 0 && count == max,
            }
        })
        .collect();

    out.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then(a.candidate.id.cmp(&b.candidate.id))
    });
    out
}

fn count_for(poll: &Poll, candidate: &Candidate) -> u64 {
    poll.tally.get(&candidate.id).copied().unwrap_or(0)
}

fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 / total as f64 * 1000.0).round() / 10.0
}
