use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RewardsEngineError>;

#[derive(Error, Debug)]
pub enum RewardsEngineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("User not found: {0}")]
    UserNotFound(i64),

    #[error("Organization not found: {0}")]
    OrgNotFound(i64),

    #[error("Membership not found: user {user_id} in organization {org_id}")]
    MembershipNotFound { user_id: i64, org_id: i64 },

    #[error("Point rule not found: {0}")]
    RuleNotFound(i64),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("Membership already exists: user {user_id} in organization {org_id}")]
    DuplicateMembership { user_id: i64, org_id: i64 },

    #[error("Username already taken: {0}")]
    DuplicateUser(String),

    #[error("Organization name already taken: {0}")]
    DuplicateOrganization(String),

    #[error("Sponsor {0} already leads an organization")]
    SponsorAlreadyLeads(i64),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unauthorized access")]
    Unauthorized,

    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

// Implement From for async_nats errors. Every operation error in
// async-nats is an alias of error::Error<Kind>, so one impl covers
// connect, publish, and flush.
impl<T> From<async_nats::error::Error<T>> for RewardsEngineError
where
    T: std::fmt::Debug + std::fmt::Display + Clone + PartialEq,
{
    fn from(err: async_nats::error::Error<T>) -> Self {
        RewardsEngineError::Nats(format!("NATS error: {:?}", err))
    }
}

// PublishError is a newtype around a boxed error in async-nats 0.33,
// not an alias of error::Error<Kind>, so it needs its own impl.
impl From<async_nats::client::PublishError> for RewardsEngineError {
    fn from(err: async_nats::client::PublishError) -> Self {
        RewardsEngineError::Nats(format!("NATS error: {:?}", err))
    }
}

impl From<serde_json::Error> for RewardsEngineError {
    fn from(err: serde_json::Error) -> Self {
        RewardsEngineError::Internal(format!("JSON serialization error: {}", err))
    }
}

impl From<reqwest::Error> for RewardsEngineError {
    fn from(err: reqwest::Error) -> Self {
        RewardsEngineError::CatalogUnavailable(err.to_string())
    }
}

impl ResponseError for RewardsEngineError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let error_message = self.to_string();

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": error_message,
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            RewardsEngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RewardsEngineError::Nats(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RewardsEngineError::Validation(_) => StatusCode::BAD_REQUEST,
            RewardsEngineError::UserNotFound(_) => StatusCode::NOT_FOUND,
            RewardsEngineError::OrgNotFound(_) => StatusCode::NOT_FOUND,
            RewardsEngineError::MembershipNotFound { .. } => StatusCode::NOT_FOUND,
            RewardsEngineError::RuleNotFound(_) => StatusCode::NOT_FOUND,
            RewardsEngineError::ProductNotFound(_) => StatusCode::NOT_FOUND,
            RewardsEngineError::InsufficientBalance { .. } => StatusCode::BAD_REQUEST,
            RewardsEngineError::DuplicateMembership { .. } => StatusCode::CONFLICT,
            RewardsEngineError::DuplicateUser(_) => StatusCode::CONFLICT,
            RewardsEngineError::DuplicateOrganization(_) => StatusCode::CONFLICT,
            RewardsEngineError::SponsorAlreadyLeads(_) => StatusCode::CONFLICT,
            RewardsEngineError::Forbidden(_) => StatusCode::FORBIDDEN,
            RewardsEngineError::Unauthorized => StatusCode::UNAUTHORIZED,
            RewardsEngineError::CatalogUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RewardsEngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl RewardsEngineError {
    fn error_type(&self) -> &str {
        match self {
            RewardsEngineError::Database(_) => "database_error",
            RewardsEngineError::Nats(_) => "messaging_error",
            RewardsEngineError::Validation(_) => "validation_error",
            RewardsEngineError::UserNotFound(_) => "not_found",
            RewardsEngineError::OrgNotFound(_) => "not_found",
            RewardsEngineError::MembershipNotFound { .. } => "not_found",
            RewardsEngineError::RuleNotFound(_) => "not_found",
            RewardsEngineError::ProductNotFound(_) => "not_found",
            RewardsEngineError::InsufficientBalance { .. } => "insufficient_balance",
            RewardsEngineError::DuplicateMembership { .. } => "duplicate_error",
            RewardsEngineError::DuplicateUser(_) => "duplicate_error",
            RewardsEngineError::DuplicateOrganization(_) => "duplicate_error",
            RewardsEngineError::SponsorAlreadyLeads(_) => "duplicate_error",
            RewardsEngineError::Forbidden(_) => "forbidden",
            RewardsEngineError::Unauthorized => "unauthorized",
            RewardsEngineError::CatalogUnavailable(_) => "catalog_unavailable",
            RewardsEngineError::Internal(_) => "internal_error",
        }
    }
}
