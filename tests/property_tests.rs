//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify:
//! - Import line parsing never panics and accepts exactly the documented shape
//! - Catalog cost conversion is positive, bounded, and monotonic
//! - The authorization table honors role scoping
//! - Tick planning maps every roll onto one weighting band

use proptest::prelude::*;
use rewards_engine::authz::{authorize, Action, Actor, Target};
use rewards_engine::catalog::points_cost;
use rewards_engine::import::{derive_username, parse_line, ImportRecordType};
use rewards_engine::models::UserRole;
use rewards_engine::simulator::{action_for_roll, TickAction};
use rust_decimal::Decimal;

/// Strategy for generating actions
fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::AdjustPoints),
        Just(Action::ApplyRule),
        Just(Action::SetBalance),
        Just(Action::Redeem),
        Just(Action::ViewBalance),
        Just(Action::ManageMembers),
        Just(Action::BulkImport),
        Just(Action::CreateOrganization),
        Just(Action::EnrollUser),
        Just(Action::ManageRules),
        Just(Action::ViewAudit),
    ]
}

/// Strategy for generating action targets, with either part absent
fn target_strategy() -> impl Strategy<Value = Target> {
    (prop::option::of(1i64..1000), prop::option::of(1i64..1000))
        .prop_map(|(user_id, org_id)| Target { user_id, org_id })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: arbitrary input never panics the line parser
    #[test]
    fn prop_parse_line_never_panics(line in ".*") {
        let _ = parse_line(&line);
    }

    /// Property: well-formed lines parse into their fields
    #[test]
    fn prop_well_formed_lines_parse(
        first in "[A-Za-z]{1,12}",
        last in "[A-Za-z]{1,12}",
        local in "[a-z][a-z0-9]{0,15}",
        domain in "[a-z]{2,10}",
    ) {
        let line = format!("D||{first}|{last}|{local}@{domain}.com");
        let parsed = parse_line(&line).expect("well-formed line");
        prop_assert_eq!(parsed.record_type, ImportRecordType::Driver);
        prop_assert_eq!(parsed.first_name, first);
        prop_assert_eq!(parsed.last_name, last);
        prop_assert_eq!(parsed.email, format!("{local}@{domain}.com"));
    }

    /// Property: cost conversion stays within one point of the exact product
    #[test]
    fn prop_points_cost_positive_and_bounded(
        cents in 1i64..10_000_00,
        ppu in 1i64..1000,
    ) {
        let price = Decimal::new(cents, 2);
        let cost = points_cost(price, ppu).expect("positive inputs convert");
        prop_assert!(cost >= 1);

        let exact = price * Decimal::from(ppu);
        prop_assert!(Decimal::from(cost) >= exact);
        prop_assert!(Decimal::from(cost) < exact + Decimal::ONE);
    }

    /// Property: cost conversion is monotonic in price
    #[test]
    fn prop_points_cost_monotonic(
        cents_a in 1i64..10_000_00,
        cents_b in 1i64..10_000_00,
        ppu in 1i64..1000,
    ) {
        let (lo, hi) = if cents_a <= cents_b {
            (cents_a, cents_b)
        } else {
            (cents_b, cents_a)
        };
        let cost_lo = points_cost(Decimal::new(lo, 2), ppu).expect("convert lo");
        let cost_hi = points_cost(Decimal::new(hi, 2), ppu).expect("convert hi");
        prop_assert!(cost_lo <= cost_hi);
    }

    /// Property: admins pass every capability check
    #[test]
    fn prop_admin_always_authorized(
        action in action_strategy(),
        target in target_strategy(),
    ) {
        let admin = Actor {
            user_id: Some(1),
            role: UserRole::Admin,
            led_org: None,
        };
        prop_assert!(authorize(&admin, action, target).is_ok());
    }

    /// Property: drivers act only on their own membership, and only to
    /// view or redeem
    #[test]
    fn prop_driver_scoped_to_own_user(
        own in 1i64..500,
        other in 501i64..1000,
        org in 1i64..1000,
    ) {
        let driver = Actor {
            user_id: Some(own),
            role: UserRole::Driver,
            led_org: None,
        };
        prop_assert!(authorize(&driver, Action::ViewBalance, Target::membership(own, org)).is_ok());
        prop_assert!(authorize(&driver, Action::Redeem, Target::membership(own, org)).is_ok());
        prop_assert!(authorize(&driver, Action::ViewBalance, Target::membership(other, org)).is_err());
        prop_assert!(authorize(&driver, Action::Redeem, Target::membership(other, org)).is_err());
        prop_assert!(authorize(&driver, Action::AdjustPoints, Target::membership(own, org)).is_err());
    }

    /// Property: sponsors act only inside the organization they lead
    #[test]
    fn prop_sponsor_scoped_to_led_org(
        led in 1i64..500,
        other in 501i64..1000,
        user in 1i64..1000,
    ) {
        let sponsor = Actor {
            user_id: Some(7),
            role: UserRole::Sponsor,
            led_org: Some(led),
        };
        prop_assert!(authorize(&sponsor, Action::AdjustPoints, Target::membership(user, led)).is_ok());
        prop_assert!(authorize(&sponsor, Action::AdjustPoints, Target::membership(user, other)).is_err());
        prop_assert!(authorize(&sponsor, Action::SetBalance, Target::membership(user, led)).is_err());
        prop_assert!(authorize(&sponsor, Action::ViewAudit, Target::none()).is_err());
    }

    /// Property: every roll lands in exactly one weighting band
    #[test]
    fn prop_rolls_map_to_weighting_bands(roll in 0u32..100) {
        let action = action_for_roll(roll, 5, false, false);
        match roll {
            0..=69 => prop_assert_eq!(action, TickAction::AdjustRandomMembership { delta: 5 }),
            70..=89 => prop_assert_eq!(action, TickAction::AssignUnassignedDriver),
            _ => prop_assert_eq!(
                action,
                TickAction::CreateAccount {
                    sponsor: false,
                    attach: false
                }
            ),
        }
    }

    /// Property: derived usernames are the lowercased email local part
    #[test]
    fn prop_derived_usernames_are_lowercase(
        local in "[A-Za-z0-9]{1,16}",
        domain in "[a-z]{2,8}",
    ) {
        let username = derive_username(&format!("{local}@{domain}.com"));
        prop_assert_eq!(username, local.to_lowercase());
    }
}
