//! Core certificate request types and intake validation

use crate::error::ValidationError;
use chrono::{DateTime, TimeZone, Utc};

/// Performer id recorded on transitions the workflow runs autonomously,
/// as opposed to an operator-invoked action.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

// hand-written rather than derived: deriving would bound T itself on Ord,
// which chrono's zone markers do not implement
impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// The closed set of documents a resident can apply for.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertificateType {
    #[n(0)]
    Clearance,
    #[n(1)]
    Indigency,
    #[n(2)]
    Residency,
    #[n(3)]
    BusinessPermit,
}

impl CertificateType {
    pub const ALL: [CertificateType; 4] = [
        CertificateType::Clearance,
        CertificateType::Indigency,
        CertificateType::Residency,
        CertificateType::BusinessPermit,
    ];

    /// Short label printed on the certificate and used in notifications.
    pub fn label(&self) -> &'static str {
        match self {
            CertificateType::Clearance => "Barangay Clearance",
            CertificateType::Indigency => "Indigency Certificate",
            CertificateType::Residency => "Residency Certificate",
            CertificateType::BusinessPermit => "Business Permit",
        }
    }

    /// First three letters of the label, upper-cased. This is the TYPE3
    /// part of the certificate number grammar.
    pub fn number_prefix(&self) -> String {
        self.label().chars().take(3).collect::<String>().to_uppercase()
    }
}

impl std::fmt::Display for CertificateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for CertificateType {
    type Err = ValidationError;

    // accepts the canonical labels plus the request-form spellings
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Barangay Clearance" => Ok(CertificateType::Clearance),
            "Indigency Certificate" | "Certificate of Indigency" => Ok(CertificateType::Indigency),
            "Residency Certificate" | "Certificate of Residency" => Ok(CertificateType::Residency),
            "Business Permit" => Ok(CertificateType::BusinessPermit),
            other => Err(ValidationError::single(
                "certificate_type",
                format!("unknown certificate type '{other}'"),
            )),
        }
    }
}

/// Where a request sits in its lifecycle. The exact strings below are
/// both the persisted values and the wire-level labels.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Processing,
    #[n(2)]
    Approved,
    #[n(3)]
    Rejected,
    #[n(4)]
    Completed,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 5] = [
        RequestStatus::Pending,
        RequestStatus::Processing,
        RequestStatus::Approved,
        RequestStatus::Rejected,
        RequestStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "Pending",
            RequestStatus::Processing => "Processing",
            RequestStatus::Approved => "Approved",
            RequestStatus::Rejected => "Rejected",
            RequestStatus::Completed => "Completed",
        }
    }

    /// No further transitions are valid from a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Rejected | RequestStatus::Completed)
    }

    /// Display color used by operator-facing timelines and badges.
    pub fn badge_color(&self) -> &'static str {
        match self {
            RequestStatus::Approved => "success",
            RequestStatus::Rejected => "danger",
            RequestStatus::Processing => "warning",
            RequestStatus::Completed => "primary",
            RequestStatus::Pending => "secondary",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RequestStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                ValidationError::single("status", format!("unknown status '{s}'"))
            })
    }
}

/// Operator-invoked transitions.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    #[n(0)]
    Process,
    #[n(1)]
    Approve,
    #[n(2)]
    Reject,
    #[n(3)]
    Complete,
}

impl Action {
    pub const ALL: [Action; 4] = [
        Action::Process,
        Action::Approve,
        Action::Reject,
        Action::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Process => "process",
            Action::Approve => "approve",
            Action::Reject => "reject",
            Action::Complete => "complete",
        }
    }

    /// Status a request lands in after this action.
    pub fn resulting_status(&self) -> RequestStatus {
        match self {
            Action::Process => RequestStatus::Processing,
            Action::Approve => RequestStatus::Approved,
            Action::Reject => RequestStatus::Rejected,
            Action::Complete => RequestStatus::Completed,
        }
    }

    /// The transition table. This is the single authority on which action
    /// is legal from which status; both the operator path and the
    /// system-driven completion consult it.
    pub fn valid_from(&self, status: RequestStatus) -> bool {
        match self {
            Action::Process => matches!(status, RequestStatus::Pending),
            Action::Approve | Action::Reject => {
                matches!(status, RequestStatus::Pending | RequestStatus::Processing)
            }
            Action::Complete => matches!(status, RequestStatus::Approved),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| ValidationError::single("action", format!("unknown action '{s}'")))
    }
}

/// Metadata for one supporting document attached at intake. The bytes
/// themselves are handled by the upload collaborator.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    #[n(0)]
    pub file_name: String,
    #[n(1)]
    pub byte_size: u64,
}

impl Attachment {
    fn extension(&self) -> Option<String> {
        let (stem, ext) = self.file_name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_lowercase())
    }
}

/// Allow-list and size cap for supporting documents. Owned by
/// configuration; the defaults mirror the portal's upload limits.
#[derive(Debug, Clone)]
pub struct AttachmentPolicy {
    pub allowed_extensions: Vec<String>,
    pub max_bytes: u64,
}

impl Default for AttachmentPolicy {
    fn default() -> Self {
        Self {
            allowed_extensions: vec!["pdf".into(), "doc".into(), "docx".into()],
            max_bytes: 5 * 1024 * 1024,
        }
    }
}

impl AttachmentPolicy {
    fn check(&self, attachment: &Attachment, errors: &mut ValidationError) {
        match attachment.extension() {
            Some(ext) if self.allowed_extensions.contains(&ext) => {}
            _ => errors.push(
                "attachments",
                format!(
                    "'{}' has a disallowed file type (allowed: {})",
                    attachment.file_name,
                    self.allowed_extensions.join(", ")
                ),
            ),
        }
        if attachment.byte_size > self.max_bytes {
            errors.push(
                "attachments",
                format!(
                    "'{}' exceeds the maximum size of {} bytes",
                    attachment.file_name, self.max_bytes
                ),
            );
        }
    }
}

/// One resident's application for a document. Created by intake in state
/// Pending, mutated only through the lifecycle transitions, never deleted.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub requester_id: String,
    #[n(2)]
    pub certificate_type: CertificateType,
    #[n(3)]
    pub purpose: String,
    #[n(4)]
    pub remarks: Option<String>,
    #[n(5)]
    pub attachments: Vec<Attachment>,
    #[n(6)]
    pub status: RequestStatus,
    #[n(7)]
    pub requested_at: TimeStamp<Utc>,
    #[n(8)]
    pub processed_at: Option<TimeStamp<Utc>>,
    #[n(9)]
    pub processed_by: Option<String>,
    #[n(10)]
    pub admin_remarks: Option<String>,
    // number of audit entries written so far; keys the append-only log
    #[n(11)]
    pub history_len: u64,
}

/// Builder for a new request, validated as a whole at submit time.
#[derive(Debug, Default, Clone)]
pub struct RequestDraft {
    requester_id: Option<String>,
    certificate_type: Option<CertificateType>,
    purpose: Option<String>,
    remarks: Option<String>,
    attachments: Vec<Attachment>,
}

/// The fields of a draft that passed validation, ready to persist.
#[derive(Debug)]
pub struct ValidatedDraft {
    pub requester_id: String,
    pub certificate_type: CertificateType,
    pub purpose: String,
    pub remarks: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl RequestDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn requester(mut self, id: &str) -> Self {
        self.requester_id = Some(id.to_owned());
        self
    }
    pub fn certificate_type(mut self, certificate_type: CertificateType) -> Self {
        self.certificate_type = Some(certificate_type);
        self
    }
    pub fn purpose(mut self, purpose: &str) -> Self {
        self.purpose = Some(purpose.to_owned());
        self
    }
    pub fn remarks(mut self, remarks: &str) -> Self {
        self.remarks = Some(remarks.to_owned());
        self
    }
    pub fn attach(mut self, file_name: &str, byte_size: u64) -> Self {
        self.attachments.push(Attachment {
            file_name: file_name.to_owned(),
            byte_size,
        });
        self
    }

    pub fn requester_id(&self) -> Option<&str> {
        self.requester_id.as_deref()
    }

    /// Collect every violated shape constraint into `errors`. Requester
    /// existence is checked by the service, which has registry access.
    pub fn check(&self, policy: &AttachmentPolicy, errors: &mut ValidationError) {
        if self.requester_id.is_none() {
            errors.push("requester_id", "requester is required");
        }
        if self.certificate_type.is_none() {
            errors.push("certificate_type", "certificate type is required");
        }
        match &self.purpose {
            Some(purpose) if !purpose.trim().is_empty() => {}
            _ => errors.push("purpose", "purpose is required"),
        }
        for attachment in &self.attachments {
            policy.check(attachment, errors);
        }
    }

    pub fn into_parts(self) -> Result<ValidatedDraft, ValidationError> {
        let mut errors = ValidationError::default();
        if self.requester_id.is_none() {
            errors.push("requester_id", "requester is required");
        }
        if self.certificate_type.is_none() {
            errors.push("certificate_type", "certificate type is required");
        }
        let purpose = self
            .purpose
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());
        if purpose.is_none() {
            errors.push("purpose", "purpose is required");
        }
        match (self.requester_id, self.certificate_type, purpose) {
            (Some(requester_id), Some(certificate_type), Some(purpose)) => Ok(ValidatedDraft {
                requester_id,
                certificate_type,
                purpose: purpose.to_owned(),
                remarks: self.remarks,
                attachments: self.attachments,
            }),
            _ => Err(errors),
        }
    }
}
