//! Smoke-screen unit tests spanning the crate's components.
//!
//! These test behavior in isolation from the end-to-end scenarios:
//! intake validation, the certificate number grammar, notification
//! plumbing, and the vocabulary strings the portal depends on.

use std::sync::Arc;

use barangay_certs::{
    account::{Role, UserAccount},
    certificate::certificate_number,
    error::WorkflowError,
    notify::{status_subject, status_tone, MailTransport, MemoryMailer},
    request::{CertificateType, RequestDraft, RequestStatus},
    service::RequestService,
};
use tempfile::tempdir;

fn service_with_resident(db_name: &str) -> anyhow::Result<(RequestService, UserAccount, tempfile::TempDir)> {
    let temp_dir = tempdir()?;
    let db = Arc::new(sled::open(temp_dir.path().join(db_name))?);
    db.clear()?;
    let service = RequestService::new(db)?;
    let resident = UserAccount::new("Maria Santos", "maria@example.com", Role::Resident)?
        .with_address("123 Rizal St.", "Purok 2");
    service.store().upsert_account(&resident)?;
    Ok((service, resident, temp_dir))
}

// INTAKE VALIDATION

mod intake_tests {
    use super::*;

    #[test]
    fn empty_purpose_is_rejected_and_nothing_persists() -> anyhow::Result<()> {
        let (service, resident, _dir) = service_with_resident("purpose.db")?;

        let err = service
            .submit(
                RequestDraft::new()
                    .requester(&resident.id)
                    .certificate_type(CertificateType::Clearance)
                    .purpose("   "),
            )
            .unwrap_err();

        match err {
            WorkflowError::Validation(errors) => {
                assert!(errors.mentions("purpose"));
            }
            other => panic!("expected a validation error, got {other}"),
        }
        assert!(service.store().all_requests()?.is_empty());
        Ok(())
    }

    #[test]
    fn all_violations_are_reported_together() -> anyhow::Result<()> {
        let (service, _resident, _dir) = service_with_resident("union.db")?;

        // unknown requester, missing purpose, bad attachment
        let err = service
            .submit(
                RequestDraft::new()
                    .requester("user1unknown")
                    .certificate_type(CertificateType::Residency)
                    .attach("payload.exe", 1024),
            )
            .unwrap_err();

        match err {
            WorkflowError::Validation(errors) => {
                assert!(errors.mentions("requester_id"));
                assert!(errors.mentions("purpose"));
                assert!(errors.mentions("attachments"));
            }
            other => panic!("expected a validation error, got {other}"),
        }
        Ok(())
    }

    #[test]
    fn oversized_attachment_is_rejected() -> anyhow::Result<()> {
        let (service, resident, _dir) = service_with_resident("oversize.db")?;

        let err = service
            .submit(
                RequestDraft::new()
                    .requester(&resident.id)
                    .certificate_type(CertificateType::Clearance)
                    .purpose("employment")
                    .attach("proof.pdf", 6 * 1024 * 1024),
            )
            .unwrap_err();

        match err {
            WorkflowError::Validation(errors) => assert!(errors.mentions("attachments")),
            other => panic!("expected a validation error, got {other}"),
        }
        Ok(())
    }

    #[test]
    fn deactivated_requester_is_rejected() -> anyhow::Result<()> {
        let (service, _resident, _dir) = service_with_resident("inactive.db")?;
        let retired = UserAccount::new("Luz Garcia", "luz@example.com", Role::Resident)?
            .deactivated();
        service.store().upsert_account(&retired)?;

        let err = service
            .submit(
                RequestDraft::new()
                    .requester(&retired.id)
                    .certificate_type(CertificateType::Clearance)
                    .purpose("employment"),
            )
            .unwrap_err();

        match err {
            WorkflowError::Validation(errors) => assert!(errors.mentions("requester_id")),
            other => panic!("expected a validation error, got {other}"),
        }
        Ok(())
    }
}

// VOCABULARY AND GRAMMAR

mod vocabulary_tests {
    use super::*;

    #[test]
    fn certificate_number_grammar() {
        assert_eq!(certificate_number(CertificateType::Clearance, 1), "BAR-0001");
        assert_eq!(certificate_number(CertificateType::Indigency, 99), "IND-0099");
        assert_eq!(certificate_number(CertificateType::Residency, 1234), "RES-1234");
        assert_eq!(
            certificate_number(CertificateType::BusinessPermit, 99999),
            "BUS-99999"
        );
    }

    #[test]
    fn request_form_spellings_parse() {
        assert_eq!(
            "Certificate of Indigency".parse::<CertificateType>().unwrap(),
            CertificateType::Indigency
        );
        assert_eq!(
            "Certificate of Residency".parse::<CertificateType>().unwrap(),
            CertificateType::Residency
        );
        assert!("Cedula".parse::<CertificateType>().is_err());
    }

    #[test]
    fn status_badges_match_the_timeline_classes() {
        assert_eq!(RequestStatus::Approved.badge_color(), "success");
        assert_eq!(RequestStatus::Rejected.badge_color(), "danger");
        assert_eq!(RequestStatus::Processing.badge_color(), "warning");
        assert_eq!(RequestStatus::Completed.badge_color(), "primary");
        assert_eq!(RequestStatus::Pending.badge_color(), "secondary");
    }

    #[test]
    fn status_tones_match_the_portal_palette() {
        assert_eq!(status_tone(RequestStatus::Approved), "#28a745");
        assert_eq!(status_tone(RequestStatus::Rejected), "#dc3545");
        assert_eq!(status_tone(RequestStatus::Processing), "#ffc107");
        assert_eq!(status_tone(RequestStatus::Completed), "#17a2b8");
        assert_eq!(status_tone(RequestStatus::Pending), "#6c757d");
    }
}

// NOTIFICATIONS

mod notification_tests {
    use super::*;
    use barangay_certs::request::Action;

    #[test]
    fn memory_mailer_records_messages() {
        let mailer = MemoryMailer::default();
        mailer
            .send("maria@example.com", "hello", "body")
            .unwrap();

        assert_eq!(mailer.sent_count(), 1);
        let sent = mailer.sent();
        assert_eq!(sent[0].to, "maria@example.com");
        assert_eq!(sent[0].subject, "hello");
    }

    #[test]
    fn status_change_payload_carries_the_tracking_link() -> anyhow::Result<()> {
        let (service, resident, _dir) = service_with_resident("payload.db")?;
        let operator = UserAccount::new("Ana Reyes", "ana@example.com", Role::Administrator)?;
        service.store().upsert_account(&operator)?;

        let request = service.submit(
            RequestDraft::new()
                .requester(&resident.id)
                .certificate_type(CertificateType::Clearance)
                .purpose("employment"),
        )?;
        service.apply_action(request.id, Action::Process, &operator.id, None)?;

        let inbox = service.notifications().recent(&resident.id, 10)?;
        assert_eq!(inbox.len(), 1);
        assert_eq!(
            inbox[0].payload.get("request_id"),
            Some(&request.id.to_string())
        );
        assert_eq!(
            inbox[0].payload.get("action_url"),
            Some(&"/certificates/track".to_string())
        );
        assert_eq!(inbox[0].payload.get("status"), Some(&"Processing".to_string()));
        Ok(())
    }

    #[test]
    fn subject_line_names_the_type_and_status() -> anyhow::Result<()> {
        let (service, resident, _dir) = service_with_resident("subject.db")?;
        let request = service.submit(
            RequestDraft::new()
                .requester(&resident.id)
                .certificate_type(CertificateType::BusinessPermit)
                .purpose("opening a sari-sari store"),
        )?;

        assert_eq!(
            status_subject(RequestStatus::Approved, &request),
            "Certificate Request Update - Business Permit (Approved)"
        );
        Ok(())
    }

    #[test]
    fn read_flags_flip_exactly_once() -> anyhow::Result<()> {
        let (service, resident, _dir) = service_with_resident("read.db")?;
        let operator = UserAccount::new("Ana Reyes", "ana@example.com", Role::Administrator)?;
        service.store().upsert_account(&operator)?;

        let request = service.submit(
            RequestDraft::new()
                .requester(&resident.id)
                .certificate_type(CertificateType::Clearance)
                .purpose("employment"),
        )?;
        service.apply_action(request.id, Action::Process, &operator.id, None)?;

        let notifications = service.notifications();
        let inbox = notifications.recent(&resident.id, 10)?;
        let id = inbox[0].id;

        assert_eq!(notifications.unread_count(&resident.id)?, 1);
        assert!(notifications.mark_read(&resident.id, id)?);
        assert!(!notifications.mark_read(&resident.id, id)?);
        assert_eq!(notifications.unread_count(&resident.id)?, 0);

        let read = notifications.recent(&resident.id, 10)?;
        assert!(read[0].is_read);
        assert!(read[0].read_at.is_some());
        Ok(())
    }

    #[test]
    fn mark_all_read_counts_only_unread_rows() -> anyhow::Result<()> {
        let (service, resident, _dir) = service_with_resident("mark_all.db")?;
        let operator = UserAccount::new("Ana Reyes", "ana@example.com", Role::Administrator)?;
        service.store().upsert_account(&operator)?;

        let request = service.submit(
            RequestDraft::new()
                .requester(&resident.id)
                .certificate_type(CertificateType::Clearance)
                .purpose("employment"),
        )?;
        service.apply_action(request.id, Action::Process, &operator.id, None)?;
        service.apply_action(request.id, Action::Reject, &operator.id, Some("duplicate"))?;

        let notifications = service.notifications();
        assert_eq!(notifications.unread_count(&resident.id)?, 2);
        assert_eq!(notifications.mark_all_read(&resident.id)?, 2);
        assert_eq!(notifications.mark_all_read(&resident.id)?, 0);
        Ok(())
    }

    #[test]
    fn retention_sweep_never_deletes_unread_rows() -> anyhow::Result<()> {
        let (service, resident, _dir) = service_with_resident("retention.db")?;
        let operator = UserAccount::new("Ana Reyes", "ana@example.com", Role::Administrator)?;
        service.store().upsert_account(&operator)?;

        let request = service.submit(
            RequestDraft::new()
                .requester(&resident.id)
                .certificate_type(CertificateType::Clearance)
                .purpose("employment"),
        )?;
        service.apply_action(request.id, Action::Process, &operator.id, None)?;

        let notifications = service.notifications();
        // everything here was created just now, so even a zero-day window
        // only removes rows that are both old and read
        assert_eq!(notifications.clean_old(30)?, 0);
        assert_eq!(notifications.unread_count(&resident.id)?, 1);

        notifications.mark_all_read(&resident.id)?;
        assert_eq!(notifications.clean_old(30)?, 0);

        // a cutoff in the future removes the read row, never the unread one
        let removed = service
            .store()
            .purge_read_notifications_before(chrono::Utc::now() + chrono::Duration::days(1))?;
        assert_eq!(removed, 1);
        Ok(())
    }
}
