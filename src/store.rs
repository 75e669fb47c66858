//! sled-backed persistence for the workflow's four tables plus the
//! boundary registries (accounts, templates) and artifact bytes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};

use crate::account::UserAccount;
use crate::certificate::{CertificateTemplate, GeneratedCertificate};
use crate::error::WorkflowError;
use crate::history::RequestHistoryEntry;
use crate::notify::Notification;
use crate::request::{Action, CertificateRequest, CertificateType, TimeStamp};

fn encode_record<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, WorkflowError> {
    minicbor::to_vec(value).map_err(|e| WorkflowError::Codec(e.to_string()))
}

fn decode_record<T>(bytes: &[u8]) -> Result<T, WorkflowError>
where
    for<'b> T: minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).map_err(|e| WorkflowError::Codec(e.to_string()))
}

fn request_key(id: u64) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

// request id ++ sequence number, both big-endian, so a prefix scan walks
// one request's entries in insertion order
fn history_key(request_id: u64, seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&request_id.to_be_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn notification_key(recipient_id: &str, id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(recipient_id.len() + 9);
    key.extend_from_slice(recipient_id.as_bytes());
    key.push(0);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn notification_prefix(recipient_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(recipient_id.len() + 1);
    key.extend_from_slice(recipient_id.as_bytes());
    key.push(0);
    key
}

#[derive(Clone)]
pub struct Store {
    db: Arc<Db>,
    requests: Tree,
    history: Tree,
    certificates: Tree,
    notifications: Tree,
    accounts: Tree,
    templates: Tree,
    artifacts: Tree,
}

impl Store {
    pub fn open(db: Arc<Db>) -> Result<Self, WorkflowError> {
        Ok(Self {
            requests: db.open_tree("requests")?,
            history: db.open_tree("request_history")?,
            certificates: db.open_tree("generated_certificates")?,
            notifications: db.open_tree("notifications")?,
            accounts: db.open_tree("accounts")?,
            templates: db.open_tree("certificate_templates")?,
            artifacts: db.open_tree("artifacts")?,
            db,
        })
    }

    // REQUESTS

    pub fn next_request_id(&self) -> Result<u64, WorkflowError> {
        // monotonic and unique; shifted so ids start at 1
        Ok(self.db.generate_id()? + 1)
    }

    pub fn insert_request(&self, request: &CertificateRequest) -> Result<(), WorkflowError> {
        self.requests
            .insert(request_key(request.id), encode_record(request)?)?;
        Ok(())
    }

    pub fn request(&self, id: u64) -> Result<Option<CertificateRequest>, WorkflowError> {
        match self.requests.get(request_key(id))? {
            Some(raw) => Ok(Some(decode_record(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn all_requests(&self) -> Result<Vec<CertificateRequest>, WorkflowError> {
        let mut requests = Vec::new();
        for kv in self.requests.iter() {
            let (_, raw) = kv?;
            requests.push(decode_record(&raw)?);
        }
        Ok(requests)
    }

    /// Apply one transition atomically: validate against the action
    /// table, update the request, and append the audit entry, all in a
    /// single cross-tree transaction. Racing operators serialize here;
    /// the loser re-reads the winner's committed status and fails the
    /// legality check.
    pub fn commit_transition(
        &self,
        request_id: u64,
        action: Action,
        performed_by: &str,
        remarks: Option<&str>,
    ) -> Result<CertificateRequest, WorkflowError> {
        let now = TimeStamp::new();
        let outcome = (&self.requests, &self.history).transaction(|(requests, history)| {
            let raw = requests.get(request_key(request_id))?.ok_or(
                ConflictableTransactionError::Abort(WorkflowError::NotFound(request_id)),
            )?;
            let mut request: CertificateRequest =
                decode_record(&raw).map_err(ConflictableTransactionError::Abort)?;

            if !action.valid_from(request.status) {
                return Err(ConflictableTransactionError::Abort(
                    WorkflowError::InvalidTransition {
                        action,
                        status: request.status,
                    },
                ));
            }

            let status_from = request.status;
            request.status = action.resulting_status();
            request.admin_remarks = remarks.map(str::to_owned);
            request.processed_by = Some(performed_by.to_owned());
            request.processed_at = Some(now.clone());

            let entry = RequestHistoryEntry {
                request_id,
                action,
                status_from,
                status_to: request.status,
                remarks: remarks.map(str::to_owned),
                performed_by: performed_by.to_owned(),
                performed_at: now.clone(),
            };
            let seq = request.history_len;
            request.history_len += 1;

            requests.insert(
                request_key(request_id),
                encode_record(&request).map_err(ConflictableTransactionError::Abort)?,
            )?;
            history.insert(
                history_key(request_id, seq),
                encode_record(&entry).map_err(ConflictableTransactionError::Abort)?,
            )?;

            Ok(request)
        });

        match outcome {
            Ok(request) => Ok(request),
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(err.into()),
        }
    }

    /// One request's audit entries, oldest first.
    pub fn history(&self, request_id: u64) -> Result<Vec<RequestHistoryEntry>, WorkflowError> {
        let mut entries = Vec::new();
        for kv in self.history.scan_prefix(request_key(request_id)) {
            let (_, raw) = kv?;
            entries.push(decode_record(&raw)?);
        }
        Ok(entries)
    }

    // CERTIFICATES

    /// Persist the certificate record together with its artifact bytes.
    /// Overwrites any earlier generation for the same request.
    pub fn put_certificate(
        &self,
        certificate: &GeneratedCertificate,
        artifact: &[u8],
    ) -> Result<(), WorkflowError> {
        let outcome =
            (&self.certificates, &self.artifacts).transaction(|(certificates, artifacts)| {
                certificates.insert(
                    request_key(certificate.request_id),
                    encode_record(certificate).map_err(ConflictableTransactionError::Abort)?,
                )?;
                artifacts.insert(certificate.storage_ref.as_bytes().to_vec(), artifact.to_vec())?;
                Ok(())
            });

        match outcome {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(err.into()),
        }
    }

    pub fn certificate(&self, request_id: u64) -> Result<Option<GeneratedCertificate>, WorkflowError> {
        match self.certificates.get(request_key(request_id))? {
            Some(raw) => Ok(Some(decode_record(&raw)?)),
            None => Ok(None),
        }
    }

    /// Update a certificate record in place (download flag only).
    pub fn update_certificate(&self, certificate: &GeneratedCertificate) -> Result<(), WorkflowError> {
        self.certificates
            .insert(request_key(certificate.request_id), encode_record(certificate)?)?;
        Ok(())
    }

    pub fn artifact(&self, storage_ref: &str) -> Result<Option<Vec<u8>>, WorkflowError> {
        Ok(self
            .artifacts
            .get(storage_ref.as_bytes())?
            .map(|raw| raw.to_vec()))
    }

    // NOTIFICATIONS

    /// Assigns an id and persists the notification; returns the stored
    /// record.
    pub fn insert_notification(
        &self,
        mut notification: Notification,
    ) -> Result<Notification, WorkflowError> {
        notification.id = self.db.generate_id()? + 1;
        let key = notification_key(&notification.recipient_id, notification.id);
        self.notifications.insert(key, encode_record(&notification)?)?;
        Ok(notification)
    }

    pub fn notification(
        &self,
        recipient_id: &str,
        id: u64,
    ) -> Result<Option<Notification>, WorkflowError> {
        match self.notifications.get(notification_key(recipient_id, id))? {
            Some(raw) => Ok(Some(decode_record(&raw)?)),
            None => Ok(None),
        }
    }

    /// One user's notifications, oldest first.
    pub fn user_notifications(&self, recipient_id: &str) -> Result<Vec<Notification>, WorkflowError> {
        let mut notifications = Vec::new();
        for kv in self.notifications.scan_prefix(notification_prefix(recipient_id)) {
            let (_, raw) = kv?;
            notifications.push(decode_record(&raw)?);
        }
        Ok(notifications)
    }

    pub fn put_notification(&self, notification: &Notification) -> Result<(), WorkflowError> {
        let key = notification_key(&notification.recipient_id, notification.id);
        self.notifications.insert(key, encode_record(notification)?)?;
        Ok(())
    }

    /// Retention sweep: drop notifications that are already read and were
    /// created before the cutoff. Unread rows are never touched.
    pub fn purge_read_notifications_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, WorkflowError> {
        let mut removed = 0;
        for kv in self.notifications.iter() {
            let (key, raw) = kv?;
            let notification: Notification = decode_record(&raw)?;
            if notification.is_read && notification.created_at.to_datetime_utc() < cutoff {
                self.notifications.remove(key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ACCOUNTS

    pub fn upsert_account(&self, account: &UserAccount) -> Result<(), WorkflowError> {
        self.accounts
            .insert(account.id.as_bytes(), encode_record(account)?)?;
        Ok(())
    }

    pub fn account(&self, id: &str) -> Result<Option<UserAccount>, WorkflowError> {
        match self.accounts.get(id.as_bytes())? {
            Some(raw) => Ok(Some(decode_record(&raw)?)),
            None => Ok(None),
        }
    }

    /// Every active account that may process requests. Resolved fresh on
    /// each call so role changes take effect immediately.
    pub fn staff_accounts(&self) -> Result<Vec<UserAccount>, WorkflowError> {
        let mut staff = Vec::new();
        for kv in self.accounts.iter() {
            let (_, raw) = kv?;
            let account: UserAccount = decode_record(&raw)?;
            if account.is_active && account.role.can_process_requests() {
                staff.push(account);
            }
        }
        Ok(staff)
    }

    // TEMPLATES

    pub fn upsert_template(&self, template: &CertificateTemplate) -> Result<(), WorkflowError> {
        self.templates
            .insert(template.certificate_type.label().as_bytes(), encode_record(template)?)?;
        Ok(())
    }

    /// The template for a type, only if it is marked active.
    pub fn active_template(
        &self,
        certificate_type: CertificateType,
    ) -> Result<Option<CertificateTemplate>, WorkflowError> {
        match self.templates.get(certificate_type.label().as_bytes())? {
            Some(raw) => {
                let template: CertificateTemplate = decode_record(&raw)?;
                Ok(template.is_active.then_some(template))
            }
            None => Ok(None),
        }
    }
}
