//! The workflow facade: intake, lifecycle transitions, generation,
//! download, and the operator/requester queries.

use std::sync::Arc;

use sled::Db;

use crate::certificate::{self, GeneratedCertificate, Jurisdiction};
use crate::error::{ValidationError, WorkflowError};
use crate::notify::{Dispatcher, LogMailer, MailTransport};
use crate::request::{
    Action, AttachmentPolicy, CertificateRequest, RequestDraft, RequestStatus, TimeStamp,
    SYSTEM_ACTOR,
};
use crate::history::RequestHistoryEntry;
use crate::store::Store;

/// Knobs owned by the surrounding portal's configuration layer.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub attachments: AttachmentPolicy,
    pub jurisdiction: Jurisdiction,
}

pub struct RequestService {
    store: Store,
    dispatcher: Dispatcher,
    config: ServiceConfig,
}

impl RequestService {
    pub fn new(db: Arc<Db>) -> Result<Self, WorkflowError> {
        Self::with_mailer(db, Arc::new(LogMailer))
    }

    pub fn with_mailer(
        db: Arc<Db>,
        mailer: Arc<dyn MailTransport>,
    ) -> Result<Self, WorkflowError> {
        let store = Store::open(db)?;
        let dispatcher = Dispatcher::new(store.clone(), mailer);
        Ok(Self {
            store,
            dispatcher,
            config: ServiceConfig::default(),
        })
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn notifications(&self) -> &Dispatcher {
        &self.dispatcher
    }

    // INTAKE

    /// Validate and persist a new request. On failure nothing is
    /// persisted and the error carries every violated constraint at
    /// once. On success the new-request fan-out to staff is best-effort.
    pub fn submit(&self, draft: RequestDraft) -> Result<CertificateRequest, WorkflowError> {
        let mut errors = ValidationError::default();
        draft.check(&self.config.attachments, &mut errors);

        if let Some(requester_id) = draft.requester_id() {
            match self.store.account(requester_id)? {
                Some(account) if account.is_active => {}
                Some(_) => errors.push("requester_id", "requester account is deactivated"),
                None => errors.push("requester_id", "requester account does not exist"),
            }
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }
        let parts = draft.into_parts()?;

        let request = CertificateRequest {
            id: self.store.next_request_id()?,
            requester_id: parts.requester_id,
            certificate_type: parts.certificate_type,
            purpose: parts.purpose,
            remarks: parts.remarks,
            attachments: parts.attachments,
            status: RequestStatus::Pending,
            requested_at: TimeStamp::new(),
            processed_at: None,
            processed_by: None,
            admin_remarks: None,
            history_len: 0,
        };
        self.store.insert_request(&request)?;

        if !self.dispatcher.notify_admins(request.id) {
            tracing::warn!(request_id = request.id, "new-request fan-out incomplete");
        }

        Ok(request)
    }

    // LIFECYCLE

    /// Apply one operator action. The transition and its audit entry
    /// commit atomically; notifications and the approve-triggered
    /// generation run after the commit and never undo it.
    pub fn apply_action(
        &self,
        request_id: u64,
        action: Action,
        operator_id: &str,
        remarks: Option<&str>,
    ) -> Result<CertificateRequest, WorkflowError> {
        let request = self
            .store
            .commit_transition(request_id, action, operator_id, remarks)?;

        if !self
            .dispatcher
            .notify_status_change(request_id, request.status, remarks)
        {
            tracing::warn!(request_id, status = %request.status, "status notification incomplete");
        }

        if request.status == RequestStatus::Approved {
            match self.generate(request_id, operator_id) {
                Ok(certificate) => {
                    tracing::info!(
                        request_id,
                        certificate_number = %certificate.certificate_number,
                        "certificate generated on approval"
                    );
                }
                Err(err) => {
                    // the approval itself stands; generation can be retried
                    tracing::warn!(request_id, error = %err, "generation failed, request stays Approved");
                }
            }
        }

        self.request(request_id)
    }

    // GENERATION

    /// Render and persist the certificate for an approved request, then
    /// complete the request under the system actor. A failure after the
    /// artifact is stored leaves the request Approved for retry.
    pub fn generate(
        &self,
        request_id: u64,
        operator_id: &str,
    ) -> Result<GeneratedCertificate, WorkflowError> {
        let request = self.request(request_id)?;
        if request.status != RequestStatus::Approved {
            return Err(WorkflowError::Generation(format!(
                "request {request_id} is {}, only Approved requests can be generated",
                request.status
            )));
        }
        let requester = self
            .store
            .account(&request.requester_id)?
            .ok_or_else(|| {
                WorkflowError::Generation(format!(
                    "requester account '{}' is missing",
                    request.requester_id
                ))
            })?;
        let template = self
            .store
            .active_template(request.certificate_type)?
            .ok_or_else(|| {
                WorkflowError::TemplateNotFound(request.certificate_type.label().to_owned())
            })?;

        let artifact =
            certificate::render(&request, &requester, &template, &self.config.jurisdiction)
                .map_err(|e| WorkflowError::Generation(e.to_string()))?;

        let generated = GeneratedCertificate {
            request_id,
            certificate_number: certificate::certificate_number(
                request.certificate_type,
                request_id,
            ),
            storage_ref: artifact.storage_ref,
            byte_size: artifact.bytes.len() as u64,
            generated_by: operator_id.to_owned(),
            generated_at: TimeStamp::new(),
            is_downloaded: false,
            downloaded_at: None,
        };
        self.store.put_certificate(&generated, &artifact.bytes)?;

        match self
            .store
            .commit_transition(request_id, Action::Complete, SYSTEM_ACTOR, None)
        {
            Ok(completed) => {
                if !self.dispatcher.notify_certificate_ready(request_id) {
                    tracing::warn!(request_id, "certificate-ready notification incomplete");
                }
                tracing::info!(request_id, status = %completed.status, "request completed");
            }
            Err(err) => {
                tracing::warn!(request_id, error = %err, "auto-complete after generation failed");
            }
        }

        Ok(generated)
    }

    /// Hand out the stored artifact. The first download stamps the
    /// record; later downloads return the same bytes unchanged.
    pub fn download(
        &self,
        request_id: u64,
    ) -> Result<(GeneratedCertificate, Vec<u8>), WorkflowError> {
        let mut certificate = self
            .store
            .certificate(request_id)?
            .ok_or(WorkflowError::NotFound(request_id))?;
        let bytes = self
            .store
            .artifact(&certificate.storage_ref)?
            .ok_or(WorkflowError::NotFound(request_id))?;

        if !certificate.is_downloaded {
            certificate.is_downloaded = true;
            certificate.downloaded_at = Some(TimeStamp::new());
            self.store.update_certificate(&certificate)?;
        }

        Ok((certificate, bytes))
    }

    // QUERIES

    pub fn request(&self, request_id: u64) -> Result<CertificateRequest, WorkflowError> {
        self.store
            .request(request_id)?
            .ok_or(WorkflowError::NotFound(request_id))
    }

    /// One request's audit trail, most recent transition first.
    pub fn history(&self, request_id: u64) -> Result<Vec<RequestHistoryEntry>, WorkflowError> {
        let mut entries = self.store.history(request_id)?;
        entries.reverse();
        Ok(entries)
    }

    /// The operator queue: everything still awaiting a decision, oldest
    /// submission first.
    pub fn open_requests(&self) -> Result<Vec<CertificateRequest>, WorkflowError> {
        let mut open: Vec<_> = self
            .store
            .all_requests()?
            .into_iter()
            .filter(|r| {
                matches!(r.status, RequestStatus::Pending | RequestStatus::Processing)
            })
            .collect();
        open.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        Ok(open)
    }

    /// Recently decided requests, most recent decision first.
    pub fn recently_processed(
        &self,
        limit: usize,
    ) -> Result<Vec<CertificateRequest>, WorkflowError> {
        let mut processed: Vec<_> = self
            .store
            .all_requests()?
            .into_iter()
            .filter(|r| {
                r.processed_at.is_some()
                    && matches!(
                        r.status,
                        RequestStatus::Approved | RequestStatus::Rejected | RequestStatus::Completed
                    )
            })
            .collect();
        processed.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
        processed.truncate(limit);
        Ok(processed)
    }

    /// Everything one requester has submitted, newest first.
    pub fn requests_for(
        &self,
        requester_id: &str,
    ) -> Result<Vec<CertificateRequest>, WorkflowError> {
        let mut requests: Vec<_> = self
            .store
            .all_requests()?
            .into_iter()
            .filter(|r| r.requester_id == requester_id)
            .collect();
        // id breaks timestamp ties so the ordering is deterministic
        requests.sort_by(|a, b| (&b.requested_at, b.id).cmp(&(&a.requested_at, a.id)));
        Ok(requests)
    }

    /// The resident tracking view: each of their requests paired with the
    /// generated certificate, where one exists.
    pub fn track(
        &self,
        requester_id: &str,
    ) -> Result<Vec<(CertificateRequest, Option<GeneratedCertificate>)>, WorkflowError> {
        self.requests_for(requester_id)?
            .into_iter()
            .map(|request| {
                let certificate = self.store.certificate(request.id)?;
                Ok((request, certificate))
            })
            .collect()
    }
}
