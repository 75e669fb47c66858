//! Immutable audit records of request transitions

use crate::request::{Action, RequestStatus, TimeStamp};
use chrono::Utc;

/// One audit record of a single transition. Written in the same atomic
/// commit as the status change it describes; never mutated or deleted.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct RequestHistoryEntry {
    #[n(0)]
    pub request_id: u64,
    #[n(1)]
    pub action: Action,
    #[n(2)]
    pub status_from: RequestStatus,
    #[n(3)]
    pub status_to: RequestStatus,
    #[n(4)]
    pub remarks: Option<String>,
    #[n(5)]
    pub performed_by: String,
    #[n(6)]
    pub performed_at: TimeStamp<Utc>,
}

/// Check the audit chain over entries ordered oldest-first: the first
/// entry starts from Pending, every entry picks up where the previous one
/// left off, and each recorded outcome matches its action.
pub fn verify_chain(entries: &[RequestHistoryEntry]) -> bool {
    let mut expected = RequestStatus::Pending;
    for entry in entries {
        if entry.status_from != expected {
            return false;
        }
        if entry.status_to != entry.action.resulting_status() {
            return false;
        }
        expected = entry.status_to;
    }
    true
}
