use crate::errors::{Result, RewardsEngineError};
use crate::models::UserRole;

/// Resolved caller identity. `led_org` is the organization the caller
/// leads, set only for sponsors.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: Option<i64>,
    pub role: UserRole,
    pub led_org: Option<i64>,
}

impl Actor {
    /// Internal actor for background work. Holds every capability and
    /// shows up in the audit trail with no performing user.
    pub fn system() -> Self {
        Actor {
            user_id: None,
            role: UserRole::Admin,
            led_org: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    AdjustPoints,
    ApplyRule,
    SetBalance,
    Redeem,
    ViewBalance,
    ManageMembers,
    BulkImport,
    CreateOrganization,
    EnrollUser,
    ManageRules,
    ViewAudit,
}

/// Scope an action is aimed at. Either part may be absent for
/// organization-less or user-less actions.
#[derive(Debug, Clone, Copy)]
pub struct Target {
    pub user_id: Option<i64>,
    pub org_id: Option<i64>,
}

impl Target {
    pub fn membership(user_id: i64, org_id: i64) -> Self {
        Target {
            user_id: Some(user_id),
            org_id: Some(org_id),
        }
    }

    pub fn organization(org_id: i64) -> Self {
        Target {
            user_id: None,
            org_id: Some(org_id),
        }
    }

    pub fn none() -> Self {
        Target {
            user_id: None,
            org_id: None,
        }
    }
}

/// Single capability check consulted by every mutation entry point.
///
/// Admins hold every capability. Sponsors act only inside the
/// organization they lead. Drivers may redeem and view their own
/// membership. Managers hold no ledger capabilities.
pub fn authorize(actor: &Actor, action: Action, target: Target) -> Result<()> {
    let allowed = match actor.role {
        UserRole::Admin => true,
        UserRole::Sponsor => match action {
            Action::AdjustPoints
            | Action::ApplyRule
            | Action::ViewBalance
            | Action::ManageMembers
            | Action::BulkImport
            | Action::ManageRules => actor.led_org.is_some() && actor.led_org == target.org_id,
            Action::SetBalance
            | Action::Redeem
            | Action::CreateOrganization
            | Action::EnrollUser
            | Action::ViewAudit => false,
        },
        UserRole::Driver => match action {
            Action::Redeem | Action::ViewBalance => {
                actor.user_id.is_some() && actor.user_id == target.user_id
            }
            _ => false,
        },
        UserRole::Manager => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(RewardsEngineError::Forbidden(format!(
            "{} is not permitted to perform {:?} on this target",
            actor.role.as_str(),
            action
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sponsor_of(org_id: i64) -> Actor {
        Actor {
            user_id: Some(10),
            role: UserRole::Sponsor,
            led_org: Some(org_id),
        }
    }

    fn driver(user_id: i64) -> Actor {
        Actor {
            user_id: Some(user_id),
            role: UserRole::Driver,
            led_org: None,
        }
    }

    #[test]
    fn admin_can_do_everything() {
        let admin = Actor {
            user_id: Some(1),
            role: UserRole::Admin,
            led_org: None,
        };
        for action in [
            Action::AdjustPoints,
            Action::SetBalance,
            Action::CreateOrganization,
            Action::ViewAudit,
            Action::BulkImport,
        ] {
            assert!(authorize(&admin, action, Target::membership(7, 3)).is_ok());
        }
    }

    #[test]
    fn sponsor_acts_only_in_led_organization() {
        let sponsor = sponsor_of(3);
        assert!(authorize(&sponsor, Action::AdjustPoints, Target::membership(7, 3)).is_ok());
        assert!(authorize(&sponsor, Action::AdjustPoints, Target::membership(7, 4)).is_err());
        assert!(authorize(&sponsor, Action::BulkImport, Target::organization(3)).is_ok());
        assert!(authorize(&sponsor, Action::BulkImport, Target::organization(4)).is_err());
    }

    #[test]
    fn sponsor_without_organization_is_denied() {
        let sponsor = Actor {
            user_id: Some(10),
            role: UserRole::Sponsor,
            led_org: None,
        };
        assert!(authorize(&sponsor, Action::AdjustPoints, Target::membership(7, 3)).is_err());
    }

    #[test]
    fn sponsor_cannot_override_balances_or_read_audit() {
        let sponsor = sponsor_of(3);
        assert!(authorize(&sponsor, Action::SetBalance, Target::membership(7, 3)).is_err());
        assert!(authorize(&sponsor, Action::ViewAudit, Target::none()).is_err());
    }

    #[test]
    fn driver_redeems_only_own_membership() {
        assert!(authorize(&driver(7), Action::Redeem, Target::membership(7, 3)).is_ok());
        assert!(authorize(&driver(7), Action::Redeem, Target::membership(8, 3)).is_err());
        assert!(authorize(&driver(7), Action::AdjustPoints, Target::membership(7, 3)).is_err());
    }

    #[test]
    fn manager_holds_no_ledger_capabilities() {
        let manager = Actor {
            user_id: Some(20),
            role: UserRole::Manager,
            led_org: None,
        };
        for action in [
            Action::AdjustPoints,
            Action::Redeem,
            Action::ViewBalance,
            Action::ViewAudit,
        ] {
            assert!(authorize(&manager, action, Target::membership(7, 3)).is_err());
        }
    }

    #[test]
    fn system_actor_passes_every_check() {
        let system = Actor::system();
        assert!(authorize(&system, Action::AdjustPoints, Target::membership(7, 3)).is_ok());
        assert!(authorize(&system, Action::EnrollUser, Target::none()).is_ok());
    }
}
