use crate::database::Database;
use crate::errors::Result;
use crate::models::{AuditLog, AuditQuery};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

/// Audit trail entry type vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditLogType {
    LoginSuccess,
    LoginFailure,
    UserCreated,
    UserUpdated,
    OrgCreated,
    OrgUpdated,
    PointsAdded,
    PointsDeducted,
    RuleCreated,
    RuleDeleted,
    InviteSent,
    MemberAdded,
    MemberRemoved,
    BulkUploadStarted,
    BulkUploadCompleted,
}

impl AuditLogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditLogType::LoginSuccess => "LOGIN_SUCCESS",
            AuditLogType::LoginFailure => "LOGIN_FAILURE",
            AuditLogType::UserCreated => "USER_CREATED",
            AuditLogType::UserUpdated => "USER_UPDATED",
            AuditLogType::OrgCreated => "ORG_CREATED",
            AuditLogType::OrgUpdated => "ORG_UPDATED",
            AuditLogType::PointsAdded => "POINTS_ADDED",
            AuditLogType::PointsDeducted => "POINTS_DEDUCTED",
            AuditLogType::RuleCreated => "RULE_CREATED",
            AuditLogType::RuleDeleted => "RULE_DELETED",
            AuditLogType::InviteSent => "INVITE_SENT",
            AuditLogType::MemberAdded => "MEMBER_ADDED",
            AuditLogType::MemberRemoved => "MEMBER_REMOVED",
            AuditLogType::BulkUploadStarted => "BULK_UPLOAD_STARTED",
            AuditLogType::BulkUploadCompleted => "BULK_UPLOAD_COMPLETED",
        }
    }
}

/// One audit trail entry, before it is stamped and appended
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub log_type: AuditLogType,
    pub performed_by: Option<i64>,
    pub target_user: Option<i64>,
    pub org_id: Option<i64>,
    pub trans_id: Option<i64>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub ip_address: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl AuditEntry {
    pub fn new(log_type: AuditLogType) -> Self {
        AuditEntry {
            log_type,
            performed_by: None,
            target_user: None,
            org_id: None,
            trans_id: None,
            old_value: None,
            new_value: None,
            ip_address: None,
            details: None,
        }
    }
}

/// Single write path for the audit trail.
///
/// Recording never fails the caller. A failed append is logged and
/// dropped; business state always outranks audit completeness.
#[derive(Clone)]
pub struct AuditRecorder {
    db: Arc<Database>,
    default_query_limit: i64,
    max_query_limit: i64,
}

impl AuditRecorder {
    pub fn new(db: Arc<Database>, default_query_limit: i64, max_query_limit: i64) -> Self {
        AuditRecorder {
            db,
            default_query_limit,
            max_query_limit,
        }
    }

    pub async fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.db.insert_audit_log(&entry).await {
            crate::metrics::AUDIT_WRITE_FAILURES.inc();
            error!(
                "Failed to record audit entry {}: {}",
                entry.log_type.as_str(),
                e
            );
        }
    }

    /// Filtered newest-first page with a clamped size
    pub async fn search(&self, query: &AuditQuery) -> Result<Vec<AuditLog>> {
        let limit = effective_limit(
            query.limit,
            self.default_query_limit,
            self.max_query_limit,
        );
        self.db.query_audit_log(query, limit).await
    }
}

fn effective_limit(requested: Option<i64>, default_limit: i64, max_limit: i64) -> i64 {
    match requested {
        Some(n) if n > 0 => n.min(max_limit),
        _ => default_limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn log_types_serialize_to_storage_vocabulary() {
        assert_eq!(AuditLogType::PointsAdded.as_str(), "POINTS_ADDED");
        assert_eq!(AuditLogType::BulkUploadCompleted.as_str(), "BULK_UPLOAD_COMPLETED");

        let json = serde_json::to_string(&AuditLogType::MemberRemoved).unwrap();
        assert_eq!(json, "\"MEMBER_REMOVED\"");
    }

    #[test]
    fn log_type_vocabulary_is_distinct() {
        let all = [
            AuditLogType::LoginSuccess,
            AuditLogType::LoginFailure,
            AuditLogType::UserCreated,
            AuditLogType::UserUpdated,
            AuditLogType::OrgCreated,
            AuditLogType::OrgUpdated,
            AuditLogType::PointsAdded,
            AuditLogType::PointsDeducted,
            AuditLogType::RuleCreated,
            AuditLogType::RuleDeleted,
            AuditLogType::InviteSent,
            AuditLogType::MemberAdded,
            AuditLogType::MemberRemoved,
            AuditLogType::BulkUploadStarted,
            AuditLogType::BulkUploadCompleted,
        ];
        let names: HashSet<&str> = all.iter().map(|t| t.as_str()).collect();
        assert_eq!(names.len(), all.len());
    }

    #[test]
    fn query_limit_is_clamped() {
        assert_eq!(effective_limit(None, 100, 500), 100);
        assert_eq!(effective_limit(Some(50), 100, 500), 50);
        assert_eq!(effective_limit(Some(9999), 100, 500), 500);
        assert_eq!(effective_limit(Some(0), 100, 500), 100);
        assert_eq!(effective_limit(Some(-5), 100, 500), 100);
    }
}
