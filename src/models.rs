use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Account role enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Driver,
    Sponsor,
    Admin,
    Manager,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Driver => "driver",
            UserRole::Sponsor => "sponsor",
            UserRole::Admin => "admin",
            UserRole::Manager => "manager",
        }
    }

    pub fn parse(s: &str) -> Option<UserRole> {
        match s {
            "driver" => Some(UserRole::Driver),
            "sponsor" => Some(UserRole::Sponsor),
            "admin" => Some(UserRole::Admin),
            "manager" => Some(UserRole::Manager),
            _ => None,
        }
    }
}

/// User account row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: String,
    #[serde(skip_serializing)]
    pub credential_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub legacy_points: i64,
    pub created_at: DateTime<Utc>,
}

/// Sponsor organization row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Organization {
    pub id: i64,
    pub name: String,
    pub leader_id: i64,
    pub catalog_products: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// User-organization membership carrying the authoritative balance
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Membership {
    pub user_id: i64,
    pub org_id: i64,
    pub points: i64,
    pub joined_at: DateTime<Utc>,
}

/// Reusable point adjustment template; org_id NULL means global
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PointRule {
    pub id: i64,
    pub org_id: Option<i64>,
    pub rule_type: String,
    pub pt_change: i64,
    pub created_at: DateTime<Utc>,
}

/// Append-only ledger entry; pt_change keeps the requested delta
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PointTransaction {
    pub id: i64,
    pub user_id: i64,
    pub org_id: i64,
    pub rule_id: Option<i64>,
    pub pt_change: i64,
    pub trans_date: DateTime<Utc>,
}

/// Append-only audit trail entry
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLog {
    pub id: i64,
    pub log_type: String,
    pub performed_by: Option<i64>,
    pub target_user: Option<i64>,
    pub org_id: Option<i64>,
    pub trans_id: Option<i64>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub ip_address: Option<String>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Manual point adjustment request
#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct AdjustPointsRequest {
    pub user_id: i64,
    pub org_id: i64,
    pub pt_change: i64,
    #[validate(length(max = 256))]
    pub reason: Option<String>,
}

/// Rule application request
#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct ApplyRuleRequest {
    pub user_id: i64,
    pub org_id: i64,
    pub rule_id: i64,
}

/// Absolute balance override request
#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct SetBalanceRequest {
    pub user_id: i64,
    pub org_id: i64,
    pub new_balance: i64,
    #[validate(length(max = 256))]
    pub reason: Option<String>,
}

/// Catalog checkout request
#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct CheckoutRequest {
    pub user_id: i64,
    pub org_id: i64,
    #[validate(length(min = 1, max = 20))]
    pub product_ids: Vec<String>,
}

/// Account enrollment request
#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 3, max = 30))]
    pub username: String,
    #[validate(email)]
    pub email: String,
    pub role: UserRole,
    #[validate(length(max = 64))]
    pub first_name: String,
    #[validate(length(max = 64))]
    pub last_name: String,
    pub org_id: Option<i64>,
}

/// Organization creation request
#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct CreateOrganizationRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub leader_id: i64,
}

/// Membership attachment request
#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct AddMemberRequest {
    pub user_id: i64,
}

/// Rule creation request
#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct CreateRuleRequest {
    pub org_id: Option<i64>,
    #[validate(length(min = 1, max = 64))]
    pub rule_type: String,
    pub pt_change: i64,
}

/// Balance lookup response
#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub user_id: i64,
    pub org_id: i64,
    pub points: i64,
    pub joined_at: DateTime<Utc>,
}

/// Ledger mutation response
#[derive(Debug, Serialize, Deserialize)]
pub struct LedgerResponse {
    pub trans_id: i64,
    pub user_id: i64,
    pub org_id: i64,
    pub rule_id: Option<i64>,
    pub pt_change: i64,
    pub new_balance: i64,
    pub trans_date: DateTime<Utc>,
}

/// Checkout response
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub trans_id: i64,
    pub user_id: i64,
    pub org_id: i64,
    pub total_cost: i64,
    pub new_balance: i64,
    pub product_ids: Vec<String>,
}

/// Per-line import failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportError {
    pub line: usize,
    pub message: String,
}

/// Bulk import batch summary
#[derive(Debug, Serialize, Deserialize)]
pub struct ImportSummary {
    pub batch_id: uuid::Uuid,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<ImportError>,
}

/// Audit trail query filters
#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub log_type: Option<String>,
    pub performed_by: Option<i64>,
    pub org_id: Option<i64>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// Notification recipient scope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    User(i64),
    Organization(i64),
    Users(Vec<i64>),
    All,
}

/// Ledger event for NATS
#[derive(Debug, Serialize, Deserialize)]
pub struct PointsEvent {
    pub event_type: PointsEventType,
    pub recipient: Recipient,
    pub user_id: i64,
    pub org_id: i64,
    pub pt_change: i64,
    pub balance: i64,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum PointsEventType {
    Adjusted,
    RuleApplied,
    Redeemed,
    BalanceSet,
    MemberAdded,
    MemberRemoved,
}
