use crate::errors::RewardsEngineError;
use crate::ledger::LedgerService;
use crate::metrics;
use crate::models::{
    AddMemberRequest, AdjustPointsRequest, ApplyRuleRequest, AuditQuery, CheckoutRequest,
    CreateOrganizationRequest, CreateRuleRequest, CreateUserRequest, SetBalanceRequest,
};
use crate::security_middleware::Claims;
use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use serde_json::json;
use std::sync::Arc;

/// Health check endpoint
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "rewards-engine",
        "version": "1.0.0"
    }))
}

/// Resolves the calling user from the claims the auth middleware stored
/// on the request. The subject claim carries the user id.
fn claims_user_id(req: &HttpRequest) -> Result<i64, RewardsEngineError> {
    let extensions = req.extensions();
    let claims = extensions
        .get::<Claims>()
        .ok_or(RewardsEngineError::Unauthorized)?;
    claims
        .sub
        .parse()
        .map_err(|_| RewardsEngineError::Unauthorized)
}

/// Adjust points endpoint
pub async fn adjust_points(
    service: web::Data<Arc<LedgerService>>,
    request: web::Json<AdjustPointsRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, RewardsEngineError> {
    let actor = service.resolve_actor(claims_user_id(&req)?).await?;
    let response = service.adjust_points(request.into_inner(), &actor).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Apply rule endpoint
pub async fn apply_rule(
    service: web::Data<Arc<LedgerService>>,
    request: web::Json<ApplyRuleRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, RewardsEngineError> {
    let actor = service.resolve_actor(claims_user_id(&req)?).await?;
    let response = service.apply_rule(request.into_inner(), &actor).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Set balance endpoint
pub async fn set_balance(
    service: web::Data<Arc<LedgerService>>,
    request: web::Json<SetBalanceRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, RewardsEngineError> {
    let actor = service.resolve_actor(claims_user_id(&req)?).await?;
    let response = service.set_balance(request.into_inner(), &actor).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Get balance endpoint
pub async fn get_balance(
    service: web::Data<Arc<LedgerService>>,
    path: web::Path<(i64, i64)>,
    req: HttpRequest,
) -> Result<HttpResponse, RewardsEngineError> {
    let (user_id, org_id) = path.into_inner();
    let actor = service.resolve_actor(claims_user_id(&req)?).await?;
    let response = service.get_balance(user_id, org_id, &actor).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Checkout endpoint
pub async fn checkout(
    service: web::Data<Arc<LedgerService>>,
    request: web::Json<CheckoutRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, RewardsEngineError> {
    let actor = service.resolve_actor(claims_user_id(&req)?).await?;
    let response = service.checkout(request.into_inner(), &actor).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Create organization endpoint
pub async fn create_organization(
    service: web::Data<Arc<LedgerService>>,
    request: web::Json<CreateOrganizationRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, RewardsEngineError> {
    let actor = service.resolve_actor(claims_user_id(&req)?).await?;
    let organization = service
        .create_organization(request.into_inner(), &actor)
        .await?;
    Ok(HttpResponse::Ok().json(organization))
}

/// Add member endpoint
pub async fn add_member(
    service: web::Data<Arc<LedgerService>>,
    org_id: web::Path<i64>,
    request: web::Json<AddMemberRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, RewardsEngineError> {
    let actor = service.resolve_actor(claims_user_id(&req)?).await?;
    let membership = service
        .add_member(org_id.into_inner(), request.into_inner(), &actor)
        .await?;
    Ok(HttpResponse::Ok().json(membership))
}

/// Remove member endpoint
pub async fn remove_member(
    service: web::Data<Arc<LedgerService>>,
    path: web::Path<(i64, i64)>,
    req: HttpRequest,
) -> Result<HttpResponse, RewardsEngineError> {
    let (org_id, user_id) = path.into_inner();
    let actor = service.resolve_actor(claims_user_id(&req)?).await?;
    service.remove_member(org_id, user_id, &actor).await?;
    Ok(HttpResponse::Ok().json(json!({
        "org_id": org_id,
        "user_id": user_id,
        "status": "removed"
    })))
}

/// Bulk import endpoint
pub async fn import_members(
    service: web::Data<Arc<LedgerService>>,
    org_id: web::Path<i64>,
    payload: web::Bytes,
    req: HttpRequest,
) -> Result<HttpResponse, RewardsEngineError> {
    let actor = service.resolve_actor(claims_user_id(&req)?).await?;
    let summary = service
        .bulk_import(org_id.into_inner(), &payload, &actor)
        .await?;
    Ok(HttpResponse::Ok().json(summary))
}

/// Create user endpoint
pub async fn create_user(
    service: web::Data<Arc<LedgerService>>,
    request: web::Json<CreateUserRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, RewardsEngineError> {
    let actor = service.resolve_actor(claims_user_id(&req)?).await?;
    let user = service.enroll_user(request.into_inner(), &actor).await?;
    Ok(HttpResponse::Ok().json(user))
}

/// Create rule endpoint
pub async fn create_rule(
    service: web::Data<Arc<LedgerService>>,
    request: web::Json<CreateRuleRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, RewardsEngineError> {
    let actor = service.resolve_actor(claims_user_id(&req)?).await?;
    let rule = service.create_rule(request.into_inner(), &actor).await?;
    Ok(HttpResponse::Ok().json(rule))
}

/// Delete rule endpoint
pub async fn delete_rule(
    service: web::Data<Arc<LedgerService>>,
    rule_id: web::Path<i64>,
    req: HttpRequest,
) -> Result<HttpResponse, RewardsEngineError> {
    let rule_id = rule_id.into_inner();
    let actor = service.resolve_actor(claims_user_id(&req)?).await?;
    service.delete_rule(rule_id, &actor).await?;
    Ok(HttpResponse::Ok().json(json!({
        "rule_id": rule_id,
        "status": "deleted"
    })))
}

/// List rules endpoint
pub async fn list_rules(
    service: web::Data<Arc<LedgerService>>,
    req: HttpRequest,
) -> Result<HttpResponse, RewardsEngineError> {
    let actor = service.resolve_actor(claims_user_id(&req)?).await?;
    let rules = service.list_rules(&actor).await?;
    let count = rules.len();
    Ok(HttpResponse::Ok().json(json!({
        "rules": rules,
        "count": count
    })))
}

/// Audit search endpoint
pub async fn search_audit(
    service: web::Data<Arc<LedgerService>>,
    query: web::Query<AuditQuery>,
    req: HttpRequest,
) -> Result<HttpResponse, RewardsEngineError> {
    let actor = service.resolve_actor(claims_user_id(&req)?).await?;
    let entries = service.search_audit(&query, &actor).await?;
    let count = entries.len();
    Ok(HttpResponse::Ok().json(json!({
        "entries": entries,
        "count": count
    })))
}

/// Prometheus metrics endpoint
pub async fn metrics_endpoint() -> HttpResponse {
    match metrics::metrics_output() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "error": "Failed to gather metrics",
            "details": e.to_string()
        })),
    }
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/points/adjust", web::post().to(adjust_points))
            .route("/points/apply-rule", web::post().to(apply_rule))
            .route("/points/set-balance", web::post().to(set_balance))
            .route("/points/{user_id}/{org_id}", web::get().to(get_balance))
            .route("/checkout", web::post().to(checkout))
            .route("/organizations", web::post().to(create_organization))
            .route(
                "/organizations/{org_id}/members",
                web::post().to(add_member),
            )
            .route(
                "/organizations/{org_id}/members/{user_id}",
                web::delete().to(remove_member),
            )
            .route(
                "/organizations/{org_id}/import",
                web::post().to(import_members),
            )
            .route("/users", web::post().to(create_user))
            .route("/rules", web::post().to(create_rule))
            .route("/rules", web::get().to(list_rules))
            .route("/rules/{rule_id}", web::delete().to(delete_rule))
            .route("/audit", web::get().to(search_audit)),
    )
    .route("/metrics", web::get().to(metrics_endpoint))
    .route("/health", web::get().to(health_check));
}
