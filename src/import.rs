use crate::audit::{AuditEntry, AuditLogType, AuditRecorder};
use crate::authz::Actor;
use crate::database::Database;
use crate::errors::Result;
use crate::models::{ImportError, ImportSummary};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Record type marker, first field of every import line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportRecordType {
    Driver,
    Sponsor,
}

impl ImportRecordType {
    pub fn role(&self) -> &'static str {
        match self {
            ImportRecordType::Driver => "driver",
            ImportRecordType::Sponsor => "sponsor",
        }
    }
}

/// One parsed import record
#[derive(Debug, Clone)]
pub struct ImportLine {
    pub record_type: ImportRecordType,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// Parse one pipe-separated line: `TYPE|ORG|FIRST|LAST|EMAIL`.
///
/// The split is capped at five fields, so a stray separator in the
/// final field shows up as an embedded `|` instead of an extra field.
/// Checks run in a fixed order and the first failure wins.
pub fn parse_line(line: &str) -> std::result::Result<ImportLine, String> {
    let fields: Vec<&str> = line.splitn(5, '|').map(|f| f.trim()).collect();

    if fields.len() != 5 {
        return Err(format!("expected 5 fields, found {}", fields.len()));
    }

    let record_type = match fields[0] {
        "D" => ImportRecordType::Driver,
        "S" => ImportRecordType::Sponsor,
        other => return Err(format!("unknown record type '{}'", other)),
    };

    if !fields[1].is_empty() {
        return Err("organization field must be empty".to_string());
    }

    for (name, value) in [
        ("first name", fields[2]),
        ("last name", fields[3]),
        ("email", fields[4]),
    ] {
        if value.contains('|') {
            return Err(format!("{} contains a '|' separator", name));
        }
    }

    if !validator::validate_email(fields[4]) {
        return Err(format!("invalid email address '{}'", fields[4]));
    }

    Ok(ImportLine {
        record_type,
        first_name: fields[2].to_string(),
        last_name: fields[3].to_string(),
        email: fields[4].to_string(),
    })
}

/// Username for an imported account: the email local part
pub fn derive_username(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_lowercase()
}

/// Random credential no login path accepts. Imported accounts must go
/// through a reset flow before first use.
pub fn placeholder_credential() -> String {
    format!("!{}", Uuid::new_v4())
}

/// Line-by-line membership importer. Lines are processed independently;
/// one bad line never aborts the batch.
pub struct BulkImporter {
    db: Arc<Database>,
    audit: AuditRecorder,
}

impl BulkImporter {
    pub fn new(db: Arc<Database>, audit: AuditRecorder) -> Self {
        BulkImporter { db, audit }
    }

    /// Run a whole batch against the target organization and collect
    /// every line outcome into a summary. The batch always completes.
    pub async fn run(&self, org_id: i64, payload: &[u8], actor: &Actor) -> Result<ImportSummary> {
        let batch_id = Uuid::new_v4();

        self.audit
            .record(AuditEntry {
                performed_by: actor.user_id,
                org_id: Some(org_id),
                details: Some(json!({ "batch_id": batch_id })),
                ..AuditEntry::new(AuditLogType::BulkUploadStarted)
            })
            .await;

        let text = String::from_utf8_lossy(payload);

        let mut total = 0usize;
        let mut successful = 0usize;
        let mut errors: Vec<ImportError> = Vec::new();

        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            if raw_line.trim().is_empty() {
                continue;
            }
            total += 1;

            match self.process_line(org_id, raw_line).await {
                Ok(()) => {
                    successful += 1;
                    crate::metrics::IMPORT_LINES.with_label_values(&["success"]).inc();
                }
                Err(message) => {
                    crate::metrics::IMPORT_LINES.with_label_values(&["failure"]).inc();
                    errors.push(ImportError {
                        line: line_no,
                        message,
                    });
                }
            }
        }

        let failed = errors.len();
        let summary = ImportSummary {
            batch_id,
            total,
            successful,
            failed,
            errors,
        };

        info!(
            "Bulk import {} for org {}: {} total, {} successful, {} failed",
            batch_id, org_id, summary.total, summary.successful, summary.failed
        );

        self.audit
            .record(AuditEntry {
                performed_by: actor.user_id,
                org_id: Some(org_id),
                details: Some(json!({
                    "batch_id": batch_id,
                    "total": summary.total,
                    "successful": summary.successful,
                    "failed": summary.failed,
                })),
                ..AuditEntry::new(AuditLogType::BulkUploadCompleted)
            })
            .await;

        Ok(summary)
    }

    /// Handle one line. Every failure, validation or storage, comes
    /// back as a message so the caller can keep going.
    async fn process_line(&self, org_id: i64, raw_line: &str) -> std::result::Result<(), String> {
        let line = parse_line(raw_line)?;

        match self
            .db
            .get_user_by_email(&line.email)
            .await
            .map_err(|e| e.to_string())?
        {
            Some(existing) => {
                let membership = self
                    .db
                    .get_membership(existing.id, org_id)
                    .await
                    .map_err(|e| e.to_string())?;
                if membership.is_some() {
                    return Err(format!(
                        "user '{}' is already assigned to this organization",
                        line.email
                    ));
                }
                self.db
                    .create_membership(existing.id, org_id)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            None => {
                self.db
                    .create_user_with_membership(
                        &derive_username(&line.email),
                        &line.email,
                        line.record_type.role(),
                        &placeholder_credential(),
                        &line.first_name,
                        &line.last_name,
                        Some(org_id),
                    )
                    .await
                    .map_err(|e| e.to_string())?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_driver_line_parses() {
        let line = parse_line("D||Ricky|Bobby|ricky.bobby@example.com").unwrap();
        assert_eq!(line.record_type, ImportRecordType::Driver);
        assert_eq!(line.first_name, "Ricky");
        assert_eq!(line.last_name, "Bobby");
        assert_eq!(line.email, "ricky.bobby@example.com");
    }

    #[test]
    fn well_formed_sponsor_line_parses() {
        let line = parse_line("S||Cal|Naughton|cal@example.com").unwrap();
        assert_eq!(line.record_type, ImportRecordType::Sponsor);
        assert_eq!(line.record_type.role(), "sponsor");
    }

    #[test]
    fn too_few_fields_is_the_first_failure() {
        let err = parse_line("D||Ricky|ricky@example.com").unwrap_err();
        assert!(err.contains("expected 5 fields"), "{}", err);
    }

    #[test]
    fn unknown_record_type_is_rejected() {
        let err = parse_line("X||Ricky|Bobby|ricky@example.com").unwrap_err();
        assert!(err.contains("unknown record type"), "{}", err);
    }

    #[test]
    fn reserved_org_field_must_be_empty() {
        let err = parse_line("D|Dennit Racing|Ricky|Bobby|ricky@example.com").unwrap_err();
        assert!(err.contains("organization field"), "{}", err);
    }

    #[test]
    fn extra_separator_lands_in_the_email_field() {
        // splitn caps the field count, so a sixth chunk stays glued to
        // the email and trips the separator check instead of the count.
        let err = parse_line("D||Ricky|Bobby|ricky@example.com|extra").unwrap_err();
        assert!(err.contains("separator"), "{}", err);
    }

    #[test]
    fn invalid_email_is_rejected() {
        let err = parse_line("D||Ricky|Bobby|not-an-email").unwrap_err();
        assert!(err.contains("invalid email"), "{}", err);
    }

    #[test]
    fn validation_order_is_stable() {
        // Both the type and the email are wrong; the type check fires
        // first.
        let err = parse_line("Q||Ricky|Bobby|not-an-email").unwrap_err();
        assert!(err.contains("unknown record type"), "{}", err);
    }

    #[test]
    fn fields_are_trimmed() {
        let line = parse_line("D| |Ricky | Bobby|ricky@example.com ").unwrap();
        assert_eq!(line.first_name, "Ricky");
        assert_eq!(line.last_name, "Bobby");
        assert_eq!(line.email, "ricky@example.com");
    }

    #[test]
    fn username_derives_from_email_local_part() {
        assert_eq!(derive_username("Ricky.Bobby@example.com"), "ricky.bobby");
        assert_eq!(derive_username("shake-n-bake@pit.example"), "shake-n-bake");
    }

    #[test]
    fn placeholder_credentials_are_unique_and_marked() {
        let a = placeholder_credential();
        let b = placeholder_credential();
        assert!(a.starts_with('!'));
        assert_ne!(a, b);
    }
}
