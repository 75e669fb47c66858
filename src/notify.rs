//! Status-change notifications: in-app rows plus best-effort email.
//!
//! The two channels are deliberately decoupled. A mail-transport outage
//! must not block the in-app row and vice versa; every failure here is
//! logged and swallowed so the caller's primary operation never depends
//! on notification delivery.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::error::WorkflowError;
use crate::request::{CertificateRequest, RequestStatus, TimeStamp};
use crate::store::Store;
use crate::account::UserAccount;

/// Deep-link hints handed to the presentation layer in the payload.
pub const TRACK_URL: &str = "/certificates/track";
pub const PROCESS_URL: &str = "/admin/process-requests";

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    #[n(0)]
    CertificateRequest,
    #[n(1)]
    NewRequest,
    #[n(2)]
    Announcement,
    #[n(3)]
    System,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::CertificateRequest => "certificate_request",
            NotificationType::NewRequest => "new_request",
            NotificationType::Announcement => "announcement",
            NotificationType::System => "system",
        }
    }
}

/// An in-app message for one user. Only ever mutated to flip the read
/// flag; `read_at` is set iff `is_read` is true.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub recipient_id: String,
    #[n(2)]
    pub kind: NotificationType,
    #[n(3)]
    pub title: String,
    #[n(4)]
    pub body: String,
    #[n(5)]
    pub payload: BTreeMap<String, String>,
    #[n(6)]
    pub is_read: bool,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
    #[n(8)]
    pub read_at: Option<TimeStamp<Utc>>,
}

impl Notification {
    pub fn new(
        recipient_id: &str,
        kind: NotificationType,
        title: &str,
        body: String,
        payload: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: 0, // assigned by the store on insert
            recipient_id: recipient_id.to_owned(),
            kind,
            title: title.to_owned(),
            body,
            payload,
            is_read: false,
            created_at: TimeStamp::new(),
            read_at: None,
        }
    }
}

/// Outbound email seam. The real SMTP client lives in the surrounding
/// portal; this core only needs something to hand a message to.
pub trait MailTransport: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Default transport: logs the message instead of sending it.
pub struct LogMailer;

impl MailTransport for LogMailer {
    fn send(&self, to: &str, subject: &str, _body: &str) -> anyhow::Result<()> {
        tracing::info!(recipient = to, subject, "outbound mail (log only)");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Records outbound mail in memory. Used by tests and local runs.
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<SentMail>>,
}

impl MemoryMailer {
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().expect("mailer mutex poisoned").clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("mailer mutex poisoned").len()
    }
}

impl MailTransport for MemoryMailer {
    fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        self.sent.lock().expect("mailer mutex poisoned").push(SentMail {
            to: to.to_owned(),
            subject: subject.to_owned(),
            body: body.to_owned(),
        });
        Ok(())
    }
}

/// Subject line for a status-change email.
pub fn status_subject(status: RequestStatus, request: &CertificateRequest) -> String {
    format!(
        "Certificate Request Update - {} ({status})",
        request.certificate_type.label()
    )
}

/// Display tone for a status, informational only.
pub fn status_tone(status: RequestStatus) -> &'static str {
    match status {
        RequestStatus::Approved => "#28a745",
        RequestStatus::Rejected => "#dc3545",
        RequestStatus::Processing => "#ffc107",
        RequestStatus::Completed => "#17a2b8",
        RequestStatus::Pending => "#6c757d",
    }
}

fn status_body(
    request: &CertificateRequest,
    requester: &UserAccount,
    status: RequestStatus,
    remarks: Option<&str>,
) -> String {
    let mut body = format!(
        "Dear {name},\n\n\
         Your certificate request has been updated.\n\n\
         Status: {status}\n\
         Request ID: #{id}\n\
         Certificate Type: {kind}\n\
         Purpose: {purpose}\n",
        name = requester.name,
        id = request.id,
        kind = request.certificate_type.label(),
        purpose = request.purpose,
    );
    if let Some(remarks) = remarks.filter(|r| !r.is_empty()) {
        body.push_str(&format!("Remarks: {remarks}\n"));
    }
    body.push_str("\nYou can track your request from the resident portal.\n");
    body
}

/// Fans out status changes and new-request alerts. All methods return
/// false rather than raising on internal failure.
#[derive(Clone)]
pub struct Dispatcher {
    store: Store,
    mailer: Arc<dyn MailTransport>,
}

impl Dispatcher {
    pub fn new(store: Store, mailer: Arc<dyn MailTransport>) -> Self {
        Self { store, mailer }
    }

    fn request_with_requester(
        &self,
        request_id: u64,
    ) -> Result<(CertificateRequest, UserAccount), WorkflowError> {
        let request = self
            .store
            .request(request_id)?
            .ok_or(WorkflowError::NotFound(request_id))?;
        let requester = self
            .store
            .account(&request.requester_id)?
            .ok_or(WorkflowError::NotFound(request_id))?;
        Ok((request, requester))
    }

    /// Tell the requester their request moved to `status`. Email and
    /// in-app row are independent best-effort side effects.
    pub fn notify_status_change(
        &self,
        request_id: u64,
        status: RequestStatus,
        remarks: Option<&str>,
    ) -> bool {
        let (request, requester) = match self.request_with_requester(request_id) {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(request_id, error = %err, "status notification skipped");
                return false;
            }
        };

        let mut delivered = true;

        let subject = status_subject(status, &request);
        let body = status_body(&request, &requester, status, remarks);
        if let Err(err) = self.mailer.send(&requester.email, &subject, &body) {
            tracing::warn!(
                request_id,
                recipient = %requester.email,
                channel = "email",
                error = %err,
                "status email failed"
            );
            delivered = false;
        }

        let mut payload = BTreeMap::new();
        payload.insert("request_id".to_owned(), request_id.to_string());
        payload.insert(
            "certificate_type".to_owned(),
            request.certificate_type.label().to_owned(),
        );
        payload.insert("status".to_owned(), status.as_str().to_owned());
        payload.insert("action_url".to_owned(), TRACK_URL.to_owned());
        let notification = Notification::new(
            &requester.id,
            NotificationType::CertificateRequest,
            "Certificate Request Update",
            format!(
                "Your {} request has been {status}.",
                request.certificate_type.label()
            ),
            payload,
        );
        if let Err(err) = self.store.insert_notification(notification) {
            tracing::warn!(
                request_id,
                recipient = %requester.id,
                channel = "in-app",
                error = %err,
                "status notification row failed"
            );
            delivered = false;
        }

        delivered
    }

    /// Alert every active administrator and staff member about a new
    /// request. Membership is resolved fresh on each call.
    pub fn notify_admins(&self, request_id: u64) -> bool {
        let (request, requester) = match self.request_with_requester(request_id) {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(request_id, error = %err, "admin notification skipped");
                return false;
            }
        };
        let staff = match self.store.staff_accounts() {
            Ok(staff) => staff,
            Err(err) => {
                tracing::warn!(request_id, error = %err, "admin lookup failed");
                return false;
            }
        };

        let mut delivered = true;
        for admin in staff {
            let mut payload = BTreeMap::new();
            payload.insert("request_id".to_owned(), request_id.to_string());
            payload.insert("resident_name".to_owned(), requester.name.clone());
            payload.insert(
                "certificate_type".to_owned(),
                request.certificate_type.label().to_owned(),
            );
            payload.insert("action_url".to_owned(), PROCESS_URL.to_owned());
            let notification = Notification::new(
                &admin.id,
                NotificationType::NewRequest,
                "New Certificate Request",
                format!(
                    "New {} request from {}.",
                    request.certificate_type.label(),
                    requester.name
                ),
                payload,
            );
            if let Err(err) = self.store.insert_notification(notification) {
                tracing::warn!(
                    request_id,
                    recipient = %admin.id,
                    channel = "in-app",
                    error = %err,
                    "admin notification row failed"
                );
                delivered = false;
            }
        }
        delivered
    }

    /// Tell the requester their certificate can be downloaded.
    pub fn notify_certificate_ready(&self, request_id: u64) -> bool {
        let (request, requester) = match self.request_with_requester(request_id) {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(request_id, error = %err, "certificate-ready notification skipped");
                return false;
            }
        };

        let mut delivered = true;

        let subject = format!(
            "Certificate Ready for Download - {}",
            request.certificate_type.label()
        );
        let body = format!(
            "Dear {},\n\nYour {} is ready. You can download it from your \
             account dashboard.\n",
            requester.name,
            request.certificate_type.label()
        );
        if let Err(err) = self.mailer.send(&requester.email, &subject, &body) {
            tracing::warn!(
                request_id,
                recipient = %requester.email,
                channel = "email",
                error = %err,
                "certificate-ready email failed"
            );
            delivered = false;
        }

        let mut payload = BTreeMap::new();
        payload.insert("request_id".to_owned(), request_id.to_string());
        payload.insert(
            "certificate_type".to_owned(),
            request.certificate_type.label().to_owned(),
        );
        payload.insert("action_url".to_owned(), TRACK_URL.to_owned());
        if let Ok(Some(certificate)) = self.store.certificate(request_id) {
            payload.insert(
                "certificate_number".to_owned(),
                certificate.certificate_number,
            );
        }
        let notification = Notification::new(
            &requester.id,
            NotificationType::CertificateRequest,
            "Certificate Ready",
            format!(
                "Your {} is ready for download.",
                request.certificate_type.label()
            ),
            payload,
        );
        if let Err(err) = self.store.insert_notification(notification) {
            tracing::warn!(
                request_id,
                recipient = %requester.id,
                channel = "in-app",
                error = %err,
                "certificate-ready notification row failed"
            );
            delivered = false;
        }

        delivered
    }

    // READ SIDE

    /// Flip one notification to read. Returns true if it was unread.
    pub fn mark_read(
        &self,
        recipient_id: &str,
        notification_id: u64,
    ) -> Result<bool, WorkflowError> {
        match self.store.notification(recipient_id, notification_id)? {
            Some(mut notification) if !notification.is_read => {
                notification.is_read = true;
                notification.read_at = Some(TimeStamp::new());
                self.store.put_notification(&notification)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Flip every unread notification for a user; returns how many.
    pub fn mark_all_read(&self, recipient_id: &str) -> Result<u64, WorkflowError> {
        let mut flipped = 0;
        for mut notification in self.store.user_notifications(recipient_id)? {
            if !notification.is_read {
                notification.is_read = true;
                notification.read_at = Some(TimeStamp::new());
                self.store.put_notification(&notification)?;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    pub fn unread_count(&self, recipient_id: &str) -> Result<u64, WorkflowError> {
        let count = self
            .store
            .user_notifications(recipient_id)?
            .iter()
            .filter(|n| !n.is_read)
            .count();
        Ok(count as u64)
    }

    /// A user's most recent notifications, newest first.
    pub fn recent(
        &self,
        recipient_id: &str,
        limit: usize,
    ) -> Result<Vec<Notification>, WorkflowError> {
        let mut notifications = self.store.user_notifications(recipient_id)?;
        notifications.reverse();
        notifications.truncate(limit);
        Ok(notifications)
    }

    /// Drop read notifications older than the retention window.
    pub fn clean_old(&self, days: i64) -> Result<u64, WorkflowError> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        self.store.purge_read_notifications_before(cutoff)
    }
}
