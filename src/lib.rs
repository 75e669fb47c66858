//! Certificate request workflow for a barangay resident portal:
//! intake validation, the request lifecycle state machine, certificate
//! generation, notification fan-out, and the audit trail over sled.

pub mod account;
pub mod certificate;
pub mod error;
pub mod history;
pub mod notify;
pub mod request;
pub mod service;
pub mod store;
pub mod utils;
