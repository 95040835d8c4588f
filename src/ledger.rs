use crate::audit::{AuditEntry, AuditLogType, AuditRecorder};
use crate::authz::{authorize, Action, Actor, Target};
use crate::catalog::CatalogClient;
use crate::database::Database;
use crate::errors::{Result, RewardsEngineError};
use crate::import::{placeholder_credential, BulkImporter};
use crate::metrics;
use crate::models::{
    AddMemberRequest, AdjustPointsRequest, ApplyRuleRequest, AuditLog, AuditQuery,
    BalanceResponse, CheckoutRequest, CheckoutResponse, CreateOrganizationRequest,
    CreateRuleRequest, CreateUserRequest, ImportSummary, LedgerResponse, Membership,
    Organization, PointRule, PointsEvent, PointsEventType, Recipient, SetBalanceRequest, User,
    UserRole,
};
use crate::notify::NatsProducer;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

/// A rule may be applied inside its own organization; a global rule
/// (no organization) may be applied anywhere.
fn rule_applies_to(rule: &PointRule, org_id: i64) -> Result<()> {
    match rule.org_id {
        Some(rule_org) if rule_org != org_id => Err(RewardsEngineError::Forbidden(format!(
            "rule {} belongs to a different organization",
            rule.id
        ))),
        _ => Ok(()),
    }
}

/// Every balance mutation, membership change, and rule operation goes
/// through this service. Each entry point validates its input, consults
/// the capability check, applies the change through the store, then
/// records audit and notification side effects.
pub struct LedgerService {
    db: Arc<Database>,
    audit: AuditRecorder,
    nats: Arc<NatsProducer>,
    catalog: CatalogClient,
    importer: BulkImporter,
}

impl LedgerService {
    pub fn new(
        db: Arc<Database>,
        audit: AuditRecorder,
        nats: Arc<NatsProducer>,
        catalog: CatalogClient,
    ) -> Self {
        let importer = BulkImporter::new(db.clone(), audit.clone());
        LedgerService {
            db,
            audit,
            nats,
            catalog,
            importer,
        }
    }

    /// Resolve an authenticated user id into an actor with its role and
    /// led organization. Roles come from the store, not the token.
    pub async fn resolve_actor(&self, user_id: i64) -> Result<Actor> {
        let user = self
            .db
            .get_user(user_id)
            .await?
            .ok_or(RewardsEngineError::Unauthorized)?;

        let role = UserRole::parse(&user.role).ok_or_else(|| {
            RewardsEngineError::Internal(format!("unknown role '{}' for user {}", user.role, user.id))
        })?;

        let led_org = if role == UserRole::Sponsor {
            self.db
                .get_organization_by_leader(user.id)
                .await?
                .map(|org| org.id)
        } else {
            None
        };

        Ok(Actor {
            user_id: Some(user.id),
            role,
            led_org,
        })
    }

    /// Apply a signed delta to a membership balance
    pub async fn adjust_points(
        &self,
        request: AdjustPointsRequest,
        actor: &Actor,
    ) -> Result<LedgerResponse> {
        // Validate request
        validator::Validate::validate(&request)
            .map_err(|e| RewardsEngineError::Validation(e.to_string()))?;

        if request.pt_change == 0 {
            return Err(RewardsEngineError::Validation(
                "pt_change must be non-zero".to_string(),
            ));
        }

        authorize(
            actor,
            Action::AdjustPoints,
            Target::membership(request.user_id, request.org_id),
        )?;

        let (trans, old_balance, new_balance) = self
            .db
            .adjust_points(request.user_id, request.org_id, request.pt_change, None)
            .await?;

        metrics::LEDGER_MUTATIONS.with_label_values(&["adjust"]).inc();
        metrics::POINTS_DELTA.observe(request.pt_change.unsigned_abs() as f64);
        if old_balance + request.pt_change != new_balance {
            metrics::BALANCE_CLAMPS.inc();
        }

        let log_type = if request.pt_change > 0 {
            AuditLogType::PointsAdded
        } else {
            AuditLogType::PointsDeducted
        };
        self.audit
            .record(AuditEntry {
                performed_by: actor.user_id,
                target_user: Some(request.user_id),
                org_id: Some(request.org_id),
                trans_id: Some(trans.id),
                old_value: Some(old_balance.to_string()),
                new_value: Some(new_balance.to_string()),
                details: request
                    .reason
                    .as_ref()
                    .map(|r| serde_json::json!({ "reason": r })),
                ..AuditEntry::new(log_type)
            })
            .await;

        let event = PointsEvent {
            event_type: PointsEventType::Adjusted,
            recipient: Recipient::User(request.user_id),
            user_id: request.user_id,
            org_id: request.org_id,
            pt_change: request.pt_change,
            balance: new_balance,
            reason: request.reason.clone(),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.nats.publish_points_event(&event).await {
            error!("Failed to publish adjustment event: {}", e);
        }

        info!(
            "Adjusted points for user {} in org {}: {} ({} -> {})",
            request.user_id, request.org_id, request.pt_change, old_balance, new_balance
        );

        Ok(LedgerResponse {
            trans_id: trans.id,
            user_id: trans.user_id,
            org_id: trans.org_id,
            rule_id: None,
            pt_change: trans.pt_change,
            new_balance,
            trans_date: trans.trans_date,
        })
    }

    /// Apply a stored rule's delta to a membership
    pub async fn apply_rule(
        &self,
        request: ApplyRuleRequest,
        actor: &Actor,
    ) -> Result<LedgerResponse> {
        validator::Validate::validate(&request)
            .map_err(|e| RewardsEngineError::Validation(e.to_string()))?;

        authorize(
            actor,
            Action::ApplyRule,
            Target::membership(request.user_id, request.org_id),
        )?;

        let rule = self
            .db
            .get_rule(request.rule_id)
            .await?
            .ok_or(RewardsEngineError::RuleNotFound(request.rule_id))?;

        rule_applies_to(&rule, request.org_id)?;

        let (trans, old_balance, new_balance) = self
            .db
            .adjust_points(
                request.user_id,
                request.org_id,
                rule.pt_change,
                Some(rule.id),
            )
            .await?;

        metrics::LEDGER_MUTATIONS
            .with_label_values(&["apply_rule"])
            .inc();
        metrics::POINTS_DELTA.observe(rule.pt_change.unsigned_abs() as f64);
        if old_balance + rule.pt_change != new_balance {
            metrics::BALANCE_CLAMPS.inc();
        }

        let log_type = if rule.pt_change > 0 {
            AuditLogType::PointsAdded
        } else {
            AuditLogType::PointsDeducted
        };
        self.audit
            .record(AuditEntry {
                performed_by: actor.user_id,
                target_user: Some(request.user_id),
                org_id: Some(request.org_id),
                trans_id: Some(trans.id),
                old_value: Some(old_balance.to_string()),
                new_value: Some(new_balance.to_string()),
                details: Some(serde_json::json!({
                    "rule_id": rule.id,
                    "rule_type": rule.rule_type,
                })),
                ..AuditEntry::new(log_type)
            })
            .await;

        let event = PointsEvent {
            event_type: PointsEventType::RuleApplied,
            recipient: Recipient::User(request.user_id),
            user_id: request.user_id,
            org_id: request.org_id,
            pt_change: rule.pt_change,
            balance: new_balance,
            reason: Some(rule.rule_type.clone()),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.nats.publish_points_event(&event).await {
            error!("Failed to publish rule event: {}", e);
        }

        info!(
            "Applied rule {} ({}) to user {} in org {}: {} ({} -> {})",
            rule.id,
            rule.rule_type,
            request.user_id,
            request.org_id,
            rule.pt_change,
            old_balance,
            new_balance
        );

        Ok(LedgerResponse {
            trans_id: trans.id,
            user_id: trans.user_id,
            org_id: trans.org_id,
            rule_id: Some(rule.id),
            pt_change: trans.pt_change,
            new_balance,
            trans_date: trans.trans_date,
        })
    }

    /// Redeem catalog products against a membership balance.
    ///
    /// The debit happens only when the full cost is covered; an
    /// insufficient balance rejects the checkout and changes nothing.
    pub async fn checkout(
        &self,
        request: CheckoutRequest,
        actor: &Actor,
    ) -> Result<CheckoutResponse> {
        validator::Validate::validate(&request)
            .map_err(|e| RewardsEngineError::Validation(e.to_string()))?;

        authorize(
            actor,
            Action::Redeem,
            Target::membership(request.user_id, request.org_id),
        )?;

        // Price the cart before touching the ledger
        let mut total_cost: i64 = 0;
        let mut titles = Vec::with_capacity(request.product_ids.len());
        for product_id in &request.product_ids {
            let product = self.catalog.fetch_product(product_id).await?;
            let cost = self.catalog.cost_of(&product)?;
            total_cost = total_cost.checked_add(cost).ok_or_else(|| {
                RewardsEngineError::Validation("checkout total overflows".to_string())
            })?;
            titles.push(product.title);
        }

        if total_cost <= 0 {
            return Err(RewardsEngineError::Validation(
                "checkout total must be positive".to_string(),
            ));
        }

        let (trans, old_balance, new_balance) = match self
            .db
            .redeem_points(request.user_id, request.org_id, total_cost)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                if matches!(e, RewardsEngineError::InsufficientBalance { .. }) {
                    metrics::REDEMPTIONS_REJECTED.inc();
                }
                return Err(e);
            }
        };

        metrics::LEDGER_MUTATIONS.with_label_values(&["redeem"]).inc();

        self.audit
            .record(AuditEntry {
                performed_by: actor.user_id,
                target_user: Some(request.user_id),
                org_id: Some(request.org_id),
                trans_id: Some(trans.id),
                old_value: Some(old_balance.to_string()),
                new_value: Some(new_balance.to_string()),
                details: Some(serde_json::json!({
                    "product_ids": request.product_ids,
                    "titles": titles,
                    "total_cost": total_cost,
                })),
                ..AuditEntry::new(AuditLogType::PointsDeducted)
            })
            .await;

        let event = PointsEvent {
            event_type: PointsEventType::Redeemed,
            recipient: Recipient::User(request.user_id),
            user_id: request.user_id,
            org_id: request.org_id,
            pt_change: -total_cost,
            balance: new_balance,
            reason: None,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.nats.publish_points_event(&event).await {
            error!("Failed to publish redemption event: {}", e);
        }

        info!(
            "Redeemed {} points for user {} in org {} ({} products, {} -> {})",
            total_cost,
            request.user_id,
            request.org_id,
            request.product_ids.len(),
            old_balance,
            new_balance
        );

        Ok(CheckoutResponse {
            trans_id: trans.id,
            user_id: request.user_id,
            org_id: request.org_id,
            total_cost,
            new_balance,
            product_ids: request.product_ids,
        })
    }

    /// Overwrite a balance with an absolute value
    pub async fn set_balance(
        &self,
        request: SetBalanceRequest,
        actor: &Actor,
    ) -> Result<LedgerResponse> {
        validator::Validate::validate(&request)
            .map_err(|e| RewardsEngineError::Validation(e.to_string()))?;

        if request.new_balance < 0 {
            return Err(RewardsEngineError::Validation(
                "new_balance cannot be negative".to_string(),
            ));
        }

        authorize(
            actor,
            Action::SetBalance,
            Target::membership(request.user_id, request.org_id),
        )?;

        let (trans, old_balance, new_balance) = self
            .db
            .set_points(request.user_id, request.org_id, request.new_balance)
            .await?;

        metrics::LEDGER_MUTATIONS
            .with_label_values(&["set_balance"])
            .inc();

        self.audit
            .record(AuditEntry {
                performed_by: actor.user_id,
                target_user: Some(request.user_id),
                org_id: Some(request.org_id),
                trans_id: Some(trans.id),
                old_value: Some(old_balance.to_string()),
                new_value: Some(new_balance.to_string()),
                details: request
                    .reason
                    .as_ref()
                    .map(|r| serde_json::json!({ "reason": r })),
                ..AuditEntry::new(AuditLogType::UserUpdated)
            })
            .await;

        let event = PointsEvent {
            event_type: PointsEventType::BalanceSet,
            recipient: Recipient::User(request.user_id),
            user_id: request.user_id,
            org_id: request.org_id,
            pt_change: trans.pt_change,
            balance: new_balance,
            reason: request.reason.clone(),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.nats.publish_points_event(&event).await {
            error!("Failed to publish balance override event: {}", e);
        }

        info!(
            "Set balance for user {} in org {}: {} -> {}",
            request.user_id, request.org_id, old_balance, new_balance
        );

        Ok(LedgerResponse {
            trans_id: trans.id,
            user_id: trans.user_id,
            org_id: trans.org_id,
            rule_id: None,
            pt_change: trans.pt_change,
            new_balance,
            trans_date: trans.trans_date,
        })
    }

    /// Current balance of one membership
    pub async fn get_balance(
        &self,
        user_id: i64,
        org_id: i64,
        actor: &Actor,
    ) -> Result<BalanceResponse> {
        authorize(actor, Action::ViewBalance, Target::membership(user_id, org_id))?;

        let membership = self
            .db
            .get_membership(user_id, org_id)
            .await?
            .ok_or(RewardsEngineError::MembershipNotFound { user_id, org_id })?;

        Ok(BalanceResponse {
            user_id: membership.user_id,
            org_id: membership.org_id,
            points: membership.points,
            joined_at: membership.joined_at,
        })
    }

    /// Create an account and, when an organization is given, attach it
    pub async fn enroll_user(&self, request: CreateUserRequest, actor: &Actor) -> Result<User> {
        validator::Validate::validate(&request)
            .map_err(|e| RewardsEngineError::Validation(e.to_string()))?;

        authorize(
            actor,
            Action::EnrollUser,
            Target {
                user_id: None,
                org_id: request.org_id,
            },
        )?;

        if let Some(org_id) = request.org_id {
            self.db
                .get_organization(org_id)
                .await?
                .ok_or(RewardsEngineError::OrgNotFound(org_id))?;
        }

        let (user, membership) = self
            .db
            .create_user_with_membership(
                &request.username,
                &request.email,
                request.role.as_str(),
                &placeholder_credential(),
                &request.first_name,
                &request.last_name,
                request.org_id,
            )
            .await?;

        self.audit
            .record(AuditEntry {
                performed_by: actor.user_id,
                target_user: Some(user.id),
                org_id: request.org_id,
                details: Some(serde_json::json!({
                    "username": user.username,
                    "role": user.role,
                })),
                ..AuditEntry::new(AuditLogType::UserCreated)
            })
            .await;

        if let Some(membership) = &membership {
            self.audit
                .record(AuditEntry {
                    performed_by: actor.user_id,
                    target_user: Some(user.id),
                    org_id: Some(membership.org_id),
                    ..AuditEntry::new(AuditLogType::MemberAdded)
                })
                .await;
        }

        info!(
            "Enrolled user {} ({}) with role {}{}",
            user.id,
            user.username,
            user.role,
            membership
                .as_ref()
                .map(|m| format!(" into org {}", m.org_id))
                .unwrap_or_default()
        );

        Ok(user)
    }

    /// Attach an existing user to an organization with a zero balance
    pub async fn add_member(
        &self,
        org_id: i64,
        request: AddMemberRequest,
        actor: &Actor,
    ) -> Result<Membership> {
        validator::Validate::validate(&request)
            .map_err(|e| RewardsEngineError::Validation(e.to_string()))?;

        authorize(
            actor,
            Action::ManageMembers,
            Target::membership(request.user_id, org_id),
        )?;

        self.db
            .get_user(request.user_id)
            .await?
            .ok_or(RewardsEngineError::UserNotFound(request.user_id))?;
        self.db
            .get_organization(org_id)
            .await?
            .ok_or(RewardsEngineError::OrgNotFound(org_id))?;

        let membership = self.db.create_membership(request.user_id, org_id).await?;

        self.audit
            .record(AuditEntry {
                performed_by: actor.user_id,
                target_user: Some(request.user_id),
                org_id: Some(org_id),
                ..AuditEntry::new(AuditLogType::MemberAdded)
            })
            .await;

        let event = PointsEvent {
            event_type: PointsEventType::MemberAdded,
            recipient: Recipient::User(request.user_id),
            user_id: request.user_id,
            org_id,
            pt_change: 0,
            balance: membership.points,
            reason: None,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.nats.publish_points_event(&event).await {
            error!("Failed to publish membership event: {}", e);
        }

        info!("Added user {} to org {}", request.user_id, org_id);

        Ok(membership)
    }

    /// Detach a user from an organization, discarding the balance
    pub async fn remove_member(&self, org_id: i64, user_id: i64, actor: &Actor) -> Result<()> {
        authorize(actor, Action::ManageMembers, Target::membership(user_id, org_id))?;

        let membership = self
            .db
            .get_membership(user_id, org_id)
            .await?
            .ok_or(RewardsEngineError::MembershipNotFound { user_id, org_id })?;

        self.db.delete_membership(user_id, org_id).await?;

        self.audit
            .record(AuditEntry {
                performed_by: actor.user_id,
                target_user: Some(user_id),
                org_id: Some(org_id),
                old_value: Some(membership.points.to_string()),
                details: Some(serde_json::json!({ "discarded_points": membership.points })),
                ..AuditEntry::new(AuditLogType::MemberRemoved)
            })
            .await;

        let event = PointsEvent {
            event_type: PointsEventType::MemberRemoved,
            recipient: Recipient::User(user_id),
            user_id,
            org_id,
            pt_change: 0,
            balance: 0,
            reason: None,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.nats.publish_points_event(&event).await {
            error!("Failed to publish membership event: {}", e);
        }

        info!(
            "Removed user {} from org {} (discarded {} points)",
            user_id, org_id, membership.points
        );

        Ok(())
    }

    /// Create an organization led by a sponsor
    pub async fn create_organization(
        &self,
        request: CreateOrganizationRequest,
        actor: &Actor,
    ) -> Result<Organization> {
        validator::Validate::validate(&request)
            .map_err(|e| RewardsEngineError::Validation(e.to_string()))?;

        authorize(actor, Action::CreateOrganization, Target::none())?;

        let leader = self
            .db
            .get_user(request.leader_id)
            .await?
            .ok_or(RewardsEngineError::UserNotFound(request.leader_id))?;

        if leader.role != UserRole::Sponsor.as_str() {
            return Err(RewardsEngineError::Validation(
                "organization leader must hold the sponsor role".to_string(),
            ));
        }

        // The unique index on leader_id enforces this at insert time too
        if self
            .db
            .get_organization_by_leader(request.leader_id)
            .await?
            .is_some()
        {
            return Err(RewardsEngineError::SponsorAlreadyLeads(request.leader_id));
        }

        let org = self
            .db
            .create_organization(&request.name, request.leader_id)
            .await?;

        self.audit
            .record(AuditEntry {
                performed_by: actor.user_id,
                target_user: Some(request.leader_id),
                org_id: Some(org.id),
                new_value: Some(org.name.clone()),
                ..AuditEntry::new(AuditLogType::OrgCreated)
            })
            .await;

        info!("Created org {} ({}) led by user {}", org.id, org.name, org.leader_id);

        Ok(org)
    }

    /// Create a point rule; a missing org_id makes it global
    pub async fn create_rule(
        &self,
        request: CreateRuleRequest,
        actor: &Actor,
    ) -> Result<PointRule> {
        validator::Validate::validate(&request)
            .map_err(|e| RewardsEngineError::Validation(e.to_string()))?;

        if request.pt_change == 0 {
            return Err(RewardsEngineError::Validation(
                "pt_change must be non-zero".to_string(),
            ));
        }

        authorize(
            actor,
            Action::ManageRules,
            Target {
                user_id: None,
                org_id: request.org_id,
            },
        )?;

        if let Some(org_id) = request.org_id {
            self.db
                .get_organization(org_id)
                .await?
                .ok_or(RewardsEngineError::OrgNotFound(org_id))?;
        }

        let rule = self
            .db
            .create_rule(request.org_id, &request.rule_type, request.pt_change)
            .await?;

        self.audit
            .record(AuditEntry {
                performed_by: actor.user_id,
                org_id: rule.org_id,
                new_value: Some(rule.pt_change.to_string()),
                details: Some(serde_json::json!({ "rule_type": rule.rule_type })),
                ..AuditEntry::new(AuditLogType::RuleCreated)
            })
            .await;

        info!(
            "Created rule {} ({}, {:+}) for {}",
            rule.id,
            rule.rule_type,
            rule.pt_change,
            rule.org_id
                .map(|o| format!("org {}", o))
                .unwrap_or_else(|| "all orgs".to_string())
        );

        Ok(rule)
    }

    /// Delete a rule, leaving applied history untouched
    pub async fn delete_rule(&self, rule_id: i64, actor: &Actor) -> Result<()> {
        let rule = self
            .db
            .get_rule(rule_id)
            .await?
            .ok_or(RewardsEngineError::RuleNotFound(rule_id))?;

        authorize(
            actor,
            Action::ManageRules,
            Target {
                user_id: None,
                org_id: rule.org_id,
            },
        )?;

        self.db.delete_rule(rule_id).await?;

        self.audit
            .record(AuditEntry {
                performed_by: actor.user_id,
                org_id: rule.org_id,
                old_value: Some(rule.pt_change.to_string()),
                details: Some(serde_json::json!({ "rule_type": rule.rule_type })),
                ..AuditEntry::new(AuditLogType::RuleDeleted)
            })
            .await;

        info!("Deleted rule {} ({})", rule.id, rule.rule_type);

        Ok(())
    }

    /// Rules visible to the caller: everything for admins, own plus
    /// global for sponsors
    pub async fn list_rules(&self, actor: &Actor) -> Result<Vec<PointRule>> {
        let scope = match actor.role {
            UserRole::Admin => None,
            _ => {
                let org_id = actor.led_org.ok_or_else(|| {
                    RewardsEngineError::Forbidden(
                        "only admins and sponsors may list rules".to_string(),
                    )
                })?;
                authorize(actor, Action::ManageRules, Target::organization(org_id))?;
                Some(org_id)
            }
        };

        self.db.list_rules(scope).await
    }

    /// Run a bulk membership import against an organization
    pub async fn bulk_import(
        &self,
        org_id: i64,
        payload: &[u8],
        actor: &Actor,
    ) -> Result<ImportSummary> {
        self.db
            .get_organization(org_id)
            .await?
            .ok_or(RewardsEngineError::OrgNotFound(org_id))?;

        authorize(actor, Action::BulkImport, Target::organization(org_id))?;

        self.importer.run(org_id, payload, actor).await
    }

    /// Filtered audit trail page, admin only
    pub async fn search_audit(&self, query: &AuditQuery, actor: &Actor) -> Result<Vec<AuditLog>> {
        authorize(actor, Action::ViewAudit, Target::none())?;

        self.audit.search(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(org_id: Option<i64>) -> PointRule {
        PointRule {
            id: 11,
            org_id,
            rule_type: "race_win".to_string(),
            pt_change: 40,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn rule_applies_inside_its_own_organization() {
        assert!(rule_applies_to(&rule(Some(3)), 3).is_ok());
    }

    #[test]
    fn foreign_organization_rule_is_forbidden() {
        let err = rule_applies_to(&rule(Some(3)), 4).unwrap_err();
        assert!(matches!(err, RewardsEngineError::Forbidden(_)));
    }

    #[test]
    fn global_rule_applies_anywhere() {
        assert!(rule_applies_to(&rule(None), 3).is_ok());
        assert!(rule_applies_to(&rule(None), 4).is_ok());
    }
}
