//! Certificate templates, artifact rendering, and generated records

use crate::account::UserAccount;
use crate::request::{CertificateRequest, CertificateType, TimeStamp};
use crate::utils;
use chrono::Utc;

/// Template body for one certificate type. Placeholders in square
/// brackets are substituted at render time. Read-only from this core;
/// the portal's configuration side owns the table.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct CertificateTemplate {
    #[n(0)]
    pub certificate_type: CertificateType,
    #[n(1)]
    pub body: String,
    #[n(2)]
    pub is_active: bool,
}

impl CertificateTemplate {
    pub fn new(certificate_type: CertificateType, body: &str) -> Self {
        Self {
            certificate_type,
            body: body.to_owned(),
            is_active: true,
        }
    }
}

/// The artifact record produced when an approved request is generated.
/// At most one is authoritative per request; regeneration overwrites.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct GeneratedCertificate {
    #[n(0)]
    pub request_id: u64,
    #[n(1)]
    pub certificate_number: String,
    #[n(2)]
    pub storage_ref: String, // sha256 of the artifact bytes
    #[n(3)]
    pub byte_size: u64,
    #[n(4)]
    pub generated_by: String,
    #[n(5)]
    pub generated_at: TimeStamp<Utc>,
    #[n(6)]
    pub is_downloaded: bool,
    #[n(7)]
    pub downloaded_at: Option<TimeStamp<Utc>>,
}

/// Identity block printed at the top of every certificate.
#[derive(Debug, Clone)]
pub struct Jurisdiction {
    pub barangay: String,
    pub municipality: String,
    pub province: String,
}

impl Default for Jurisdiction {
    fn default() -> Self {
        Self {
            barangay: "San Joaquin".into(),
            municipality: "Palo".into(),
            province: "Leyte".into(),
        }
    }
}

/// `{TYPE3}-{SEQ4}`: three-letter type prefix plus the request id
/// zero-padded to four digits. Deterministic from the request id alone.
pub fn certificate_number(certificate_type: CertificateType, request_id: u64) -> String {
    format!("{}-{:04}", certificate_type.number_prefix(), request_id)
}

/// Payload embedded in the artifact for the external verification
/// collaborator. Opaque to this core once encoded.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct VerificationPayload {
    #[n(0)]
    pub request_id: u64,
    #[n(1)]
    pub resident_name: String,
    #[n(2)]
    pub certificate_type: String,
    #[n(3)]
    pub issue_date: String,
    #[n(4)]
    pub barangay: String,
    #[n(5)]
    pub municipality: String,
    #[n(6)]
    pub province: String,
}

/// A rendered artifact ready to persist: the bytes, their
/// content-addressed storage reference, and the signature reference id.
#[derive(Debug)]
pub struct RenderedArtifact {
    pub bytes: Vec<u8>,
    pub storage_ref: String,
    pub reference_id: String,
}

fn substitute_placeholders(
    body: &str,
    request: &CertificateRequest,
    requester: &UserAccount,
    issued: &TimeStamp<Utc>,
) -> String {
    body.replace("[RESIDENT_NAME]", &requester.name)
        .replace("[PURPOSE]", &request.purpose)
        .replace("[DATE]", &issued.to_datetime_utc().format("%B %-d, %Y").to_string())
        .replace("[ADDRESS]", &requester.address)
        .replace("[PUROK]", &requester.purok)
}

/// Compose the printable artifact: jurisdiction header, substituted
/// template body, hex-encoded verification payload, signature block.
pub fn render(
    request: &CertificateRequest,
    requester: &UserAccount,
    template: &CertificateTemplate,
    jurisdiction: &Jurisdiction,
) -> anyhow::Result<RenderedArtifact> {
    let issued = TimeStamp::new();
    let reference_id = utils::new_certificate_ref()?;

    let payload = VerificationPayload {
        request_id: request.id,
        resident_name: requester.name.clone(),
        certificate_type: request.certificate_type.label().to_owned(),
        issue_date: issued.to_datetime_utc().format("%Y-%m-%d").to_string(),
        barangay: jurisdiction.barangay.clone(),
        municipality: jurisdiction.municipality.clone(),
        province: jurisdiction.province.clone(),
    };
    let payload_hex = hex::encode(minicbor::to_vec(&payload)?);

    let body = substitute_placeholders(&template.body, request, requester, &issued);

    let text = format!(
        "REPUBLIC OF THE PHILIPPINES\n\
         PROVINCE OF {province}\n\
         MUNICIPALITY OF {municipality}\n\
         BARANGAY {barangay}\n\
         \n\
         {title}\n\
         \n\
         {body}\n\
         \n\
         Verification: {payload_hex}\n\
         \n\
         _________________________\n\
         Punong Barangay\n\
         \n\
         Digitally signed on: {signed_at}\n\
         Certificate Ref: {reference_id}\n\
         \n\
         This certificate is computer-generated and is valid without signature.\n",
        province = jurisdiction.province.to_uppercase(),
        municipality = jurisdiction.municipality.to_uppercase(),
        barangay = jurisdiction.barangay.to_uppercase(),
        title = request.certificate_type.label().to_uppercase(),
        signed_at = issued.to_datetime_utc().format("%Y-%m-%d %H:%M:%S"),
    );

    let bytes = text.into_bytes();
    let storage_ref = sha256::digest(&bytes);

    Ok(RenderedArtifact {
        bytes,
        storage_ref,
        reference_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Role;
    use crate::request::RequestStatus;

    fn fixture() -> (CertificateRequest, UserAccount) {
        let requester = UserAccount::new("Maria Santos", "maria@example.com", Role::Resident)
            .unwrap()
            .with_address("123 Rizal St.", "Purok 2");
        let request = CertificateRequest {
            id: 7,
            requester_id: requester.id.clone(),
            certificate_type: CertificateType::Clearance,
            purpose: "employment".into(),
            remarks: None,
            attachments: vec![],
            status: RequestStatus::Approved,
            requested_at: TimeStamp::new(),
            processed_at: None,
            processed_by: None,
            admin_remarks: None,
            history_len: 0,
        };
        (request, requester)
    }

    #[test]
    fn number_grammar_examples() {
        assert_eq!(certificate_number(CertificateType::Clearance, 7), "BAR-0007");
        assert_eq!(certificate_number(CertificateType::Residency, 42), "RES-0042");
        assert_eq!(certificate_number(CertificateType::Indigency, 10), "IND-0010");
        assert_eq!(certificate_number(CertificateType::BusinessPermit, 12345), "BUS-12345");
    }

    #[test]
    fn render_substitutes_placeholders() {
        let (request, requester) = fixture();
        let template = CertificateTemplate::new(
            CertificateType::Clearance,
            "This certifies that [RESIDENT_NAME] of [ADDRESS], [PUROK], \
             requests this clearance for [PURPOSE] on [DATE].",
        );

        let artifact = render(&request, &requester, &template, &Jurisdiction::default()).unwrap();
        let text = String::from_utf8(artifact.bytes).unwrap();

        assert!(text.contains("Maria Santos"));
        assert!(text.contains("123 Rizal St."));
        assert!(text.contains("Purok 2"));
        assert!(text.contains("employment"));
        assert!(!text.contains("[RESIDENT_NAME]"));
        assert!(text.contains("BARANGAY SAN JOAQUIN"));
        assert!(artifact.reference_id.starts_with("cert1"));
    }

    #[test]
    fn verification_payload_decodes_from_the_artifact() {
        let (request, requester) = fixture();
        let template = CertificateTemplate::new(CertificateType::Clearance, "[RESIDENT_NAME]");

        let artifact = render(&request, &requester, &template, &Jurisdiction::default()).unwrap();
        let text = String::from_utf8(artifact.bytes).unwrap();

        let line = text
            .lines()
            .find(|l| l.starts_with("Verification: "))
            .unwrap();
        let raw = hex::decode(line.trim_start_matches("Verification: ")).unwrap();
        let payload: VerificationPayload = minicbor::decode(&raw).unwrap();

        assert_eq!(payload.request_id, 7);
        assert_eq!(payload.resident_name, "Maria Santos");
        assert_eq!(payload.certificate_type, "Barangay Clearance");
        assert_eq!(payload.barangay, "San Joaquin");
    }

    #[test]
    fn storage_ref_is_the_content_hash() {
        let (request, requester) = fixture();
        let template = CertificateTemplate::new(CertificateType::Clearance, "[PURPOSE]");

        let artifact = render(&request, &requester, &template, &Jurisdiction::default()).unwrap();
        assert_eq!(artifact.storage_ref, sha256::digest(&artifact.bytes));
    }
}
