use crate::audit::AuditEntry;
use crate::errors::{Result, RewardsEngineError};
use crate::models::{
    AuditLog, AuditQuery, Membership, Organization, PointRule, PointTransaction, User,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Pool, Postgres};
use std::time::Duration;

pub struct Database {
    pool: Pool<Postgres>,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err.as_database_error().map(|db| db.kind()),
        Some(sqlx::error::ErrorKind::UniqueViolation)
    )
}

fn violated_constraint(err: &sqlx::Error) -> Option<&str> {
    err.as_database_error().and_then(|db| db.constraint())
}

impl Database {
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        Ok(Database { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RewardsEngineError::Internal(format!("Migration failed: {}", e)))?;
        Ok(())
    }

    /// Create a user and, when an organization is given, its membership.
    /// Both inserts share one transaction.
    pub async fn create_user_with_membership(
        &self,
        username: &str,
        email: &str,
        role: &str,
        credential_hash: &str,
        first_name: &str,
        last_name: &str,
        org_id: Option<i64>,
    ) -> Result<(User, Option<Membership>)> {
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, role, credential_hash, first_name, last_name)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(username)
        .bind(email)
        .bind(role)
        .bind(credential_hash)
        .bind(first_name)
        .bind(last_name)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                match violated_constraint(&err) {
                    Some("users_email_key") => RewardsEngineError::DuplicateUser(email.to_string()),
                    _ => RewardsEngineError::DuplicateUser(username.to_string()),
                }
            } else {
                err.into()
            }
        })?;

        let membership = match org_id {
            Some(org_id) => {
                let membership = sqlx::query_as::<_, Membership>(
                    r#"
                    INSERT INTO memberships (user_id, org_id)
                    VALUES ($1, $2)
                    RETURNING *
                    "#,
                )
                .bind(user.id)
                .bind(org_id)
                .fetch_one(&mut *tx)
                .await?;
                Some(membership)
            }
            None => None,
        };

        tx.commit().await?;

        Ok((user, membership))
    }

    /// Get user by ID
    pub async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Get user by email
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Create an organization led by the given sponsor
    pub async fn create_organization(&self, name: &str, leader_id: i64) -> Result<Organization> {
        let org = sqlx::query_as::<_, Organization>(
            r#"
            INSERT INTO organizations (name, leader_id)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(leader_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                match violated_constraint(&err) {
                    Some("organizations_leader_id_key") => {
                        RewardsEngineError::SponsorAlreadyLeads(leader_id)
                    }
                    _ => RewardsEngineError::DuplicateOrganization(name.to_string()),
                }
            } else {
                err.into()
            }
        })?;

        Ok(org)
    }

    /// Get organization by ID
    pub async fn get_organization(&self, org_id: i64) -> Result<Option<Organization>> {
        let org = sqlx::query_as::<_, Organization>(
            r#"
            SELECT * FROM organizations WHERE id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(org)
    }

    /// Get the organization a sponsor leads, if any
    pub async fn get_organization_by_leader(&self, leader_id: i64) -> Result<Option<Organization>> {
        let org = sqlx::query_as::<_, Organization>(
            r#"
            SELECT * FROM organizations WHERE leader_id = $1
            "#,
        )
        .bind(leader_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(org)
    }

    /// Attach a user to an organization with a zero balance
    pub async fn create_membership(&self, user_id: i64, org_id: i64) -> Result<Membership> {
        let membership = sqlx::query_as::<_, Membership>(
            r#"
            INSERT INTO memberships (user_id, org_id)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(org_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                RewardsEngineError::DuplicateMembership { user_id, org_id }
            } else {
                err.into()
            }
        })?;

        Ok(membership)
    }

    /// Get membership by pair
    pub async fn get_membership(&self, user_id: i64, org_id: i64) -> Result<Option<Membership>> {
        let membership = sqlx::query_as::<_, Membership>(
            r#"
            SELECT * FROM memberships WHERE user_id = $1 AND org_id = $2
            "#,
        )
        .bind(user_id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(membership)
    }

    /// Remove a membership, discarding its balance
    pub async fn delete_membership(&self, user_id: i64, org_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM memberships WHERE user_id = $1 AND org_id = $2
            "#,
        )
        .bind(user_id)
        .bind(org_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Apply a signed point delta with a zero floor.
    ///
    /// The row lock serializes concurrent deltas against the same
    /// membership and the arithmetic stays in SQL, so no update is lost.
    /// The ledger entry keeps the requested delta even when the floor
    /// clamps the resulting balance. Returns the entry and the balances
    /// before and after.
    pub async fn adjust_points(
        &self,
        user_id: i64,
        org_id: i64,
        pt_change: i64,
        rule_id: Option<i64>,
    ) -> Result<(PointTransaction, i64, i64)> {
        let mut tx = self.pool.begin().await?;

        let before = sqlx::query_as::<_, Membership>(
            r#"
            SELECT * FROM memberships WHERE user_id = $1 AND org_id = $2 FOR UPDATE
            "#,
        )
        .bind(user_id)
        .bind(org_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RewardsEngineError::MembershipNotFound { user_id, org_id })?;

        let after = sqlx::query_as::<_, Membership>(
            r#"
            UPDATE memberships
            SET points = GREATEST(0, points + $3)
            WHERE user_id = $1 AND org_id = $2
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(org_id)
        .bind(pt_change)
        .fetch_one(&mut *tx)
        .await?;

        let trans = sqlx::query_as::<_, PointTransaction>(
            r#"
            INSERT INTO point_transactions (user_id, org_id, rule_id, pt_change)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(org_id)
        .bind(rule_id)
        .bind(pt_change)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((trans, before.points, after.points))
    }

    /// Debit a redemption cost under the strict sufficiency contract.
    ///
    /// An insufficient balance aborts before any write and leaves the
    /// membership untouched.
    pub async fn redeem_points(
        &self,
        user_id: i64,
        org_id: i64,
        cost: i64,
    ) -> Result<(PointTransaction, i64, i64)> {
        let mut tx = self.pool.begin().await?;

        let before = sqlx::query_as::<_, Membership>(
            r#"
            SELECT * FROM memberships WHERE user_id = $1 AND org_id = $2 FOR UPDATE
            "#,
        )
        .bind(user_id)
        .bind(org_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RewardsEngineError::MembershipNotFound { user_id, org_id })?;

        if before.points < cost {
            return Err(RewardsEngineError::InsufficientBalance {
                required: cost,
                available: before.points,
            });
        }

        let after = sqlx::query_as::<_, Membership>(
            r#"
            UPDATE memberships
            SET points = points - $3
            WHERE user_id = $1 AND org_id = $2 AND points >= $3
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(org_id)
        .bind(cost)
        .fetch_one(&mut *tx)
        .await?;

        let trans = sqlx::query_as::<_, PointTransaction>(
            r#"
            INSERT INTO point_transactions (user_id, org_id, rule_id, pt_change)
            VALUES ($1, $2, NULL, $3)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(org_id)
        .bind(-cost)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((trans, before.points, after.points))
    }

    /// Overwrite a balance with an absolute value, recording the
    /// difference in the ledger.
    pub async fn set_points(
        &self,
        user_id: i64,
        org_id: i64,
        new_balance: i64,
    ) -> Result<(PointTransaction, i64, i64)> {
        let mut tx = self.pool.begin().await?;

        let before = sqlx::query_as::<_, Membership>(
            r#"
            SELECT * FROM memberships WHERE user_id = $1 AND org_id = $2 FOR UPDATE
            "#,
        )
        .bind(user_id)
        .bind(org_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RewardsEngineError::MembershipNotFound { user_id, org_id })?;

        let after = sqlx::query_as::<_, Membership>(
            r#"
            UPDATE memberships
            SET points = $3
            WHERE user_id = $1 AND org_id = $2
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(org_id)
        .bind(new_balance)
        .fetch_one(&mut *tx)
        .await?;

        let trans = sqlx::query_as::<_, PointTransaction>(
            r#"
            INSERT INTO point_transactions (user_id, org_id, rule_id, pt_change)
            VALUES ($1, $2, NULL, $3)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(org_id)
        .bind(after.points - before.points)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((trans, before.points, after.points))
    }

    /// Create a point rule; org_id NULL makes it global
    pub async fn create_rule(
        &self,
        org_id: Option<i64>,
        rule_type: &str,
        pt_change: i64,
    ) -> Result<PointRule> {
        let rule = sqlx::query_as::<_, PointRule>(
            r#"
            INSERT INTO point_rules (org_id, rule_type, pt_change)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(org_id)
        .bind(rule_type)
        .bind(pt_change)
        .fetch_one(&self.pool)
        .await?;

        Ok(rule)
    }

    /// Get rule by ID
    pub async fn get_rule(&self, rule_id: i64) -> Result<Option<PointRule>> {
        let rule = sqlx::query_as::<_, PointRule>(
            r#"
            SELECT * FROM point_rules WHERE id = $1
            "#,
        )
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(rule)
    }

    /// Delete a rule. History keeps its applied deltas; the rule_id
    /// references are nulled by the FK.
    pub async fn delete_rule(&self, rule_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM point_rules WHERE id = $1
            "#,
        )
        .bind(rule_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// List rules visible to a scope: all rules when org_scope is None
    /// (admin view), otherwise the organization's own plus global rules.
    pub async fn list_rules(&self, org_scope: Option<i64>) -> Result<Vec<PointRule>> {
        let query = if let Some(org_id) = org_scope {
            sqlx::query_as::<_, PointRule>(
                r#"
                SELECT * FROM point_rules
                WHERE org_id = $1 OR org_id IS NULL
                ORDER BY id
                "#,
            )
            .bind(org_id)
        } else {
            sqlx::query_as::<_, PointRule>(
                r#"
                SELECT * FROM point_rules ORDER BY id
                "#,
            )
        };

        let rules = query.fetch_all(&self.pool).await?;

        Ok(rules)
    }

    /// Random membership for background activity
    pub async fn random_membership(&self) -> Result<Option<Membership>> {
        let membership = sqlx::query_as::<_, Membership>(
            r#"
            SELECT * FROM memberships ORDER BY random() LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(membership)
    }

    /// Random organization for background activity
    pub async fn random_organization(&self) -> Result<Option<Organization>> {
        let org = sqlx::query_as::<_, Organization>(
            r#"
            SELECT * FROM organizations ORDER BY random() LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(org)
    }

    /// Random driver holding no membership
    pub async fn random_unassigned_driver(&self) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.* FROM users u
            WHERE u.role = 'driver'
              AND NOT EXISTS (SELECT 1 FROM memberships m WHERE m.user_id = u.id)
            ORDER BY random()
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Append an audit trail entry
    pub async fn insert_audit_log(&self, entry: &AuditEntry) -> Result<AuditLog> {
        let log = sqlx::query_as::<_, AuditLog>(
            r#"
            INSERT INTO audit_log
                (log_type, performed_by, target_user, org_id, trans_id,
                 old_value, new_value, ip_address, details)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(entry.log_type.as_str())
        .bind(entry.performed_by)
        .bind(entry.target_user)
        .bind(entry.org_id)
        .bind(entry.trans_id)
        .bind(&entry.old_value)
        .bind(&entry.new_value)
        .bind(&entry.ip_address)
        .bind(entry.details.as_ref().map(|v| v.to_string()))
        .fetch_one(&self.pool)
        .await?;

        Ok(log)
    }

    /// Filtered audit trail page, newest first
    pub async fn query_audit_log(&self, query: &AuditQuery, limit: i64) -> Result<Vec<AuditLog>> {
        let logs = sqlx::query_as::<_, AuditLog>(
            r#"
            SELECT * FROM audit_log
            WHERE ($1::TEXT IS NULL OR log_type = $1)
              AND ($2::BIGINT IS NULL OR performed_by = $2)
              AND ($3::BIGINT IS NULL OR org_id = $3)
              AND ($4::TIMESTAMPTZ IS NULL OR created_at >= $4)
              AND ($5::TIMESTAMPTZ IS NULL OR created_at <= $5)
            ORDER BY created_at DESC, id DESC
            LIMIT $6
            "#,
        )
        .bind(&query.log_type)
        .bind(query.performed_by)
        .bind(query.org_id)
        .bind(query.since)
        .bind(query.until)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(logs)
    }
}
