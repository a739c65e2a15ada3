//! Subscription state machine.
//!
//! [`validate`] turns a company record into a validity verdict. The checks run in
//! a fixed order and the first match wins: company-level flags (inactive,
//! suspended) are evaluated *before* the subscription status, so a suspended
//! company never keeps active-looking access. Do not reorder them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::principal::Company;

/// Warning attached to a `past_due` verdict. Access stays granted (grace period).
pub const PAYMENT_OVERDUE_WARNING: &str = "payment overdue";

/// Billing status of a company as stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubscriptionStatus {
    Trial,
    Active,
    PastDue,
    Cancelled,
    Suspended,
    /// Any status this layer does not recognize (kept verbatim for diagnostics).
    Unrecognized(String),
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SubscriptionStatus::Trial => "trial",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Suspended => "suspended",
            SubscriptionStatus::Unrecognized(raw) => raw,
        }
    }
}

impl From<String> for SubscriptionStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "trial" => SubscriptionStatus::Trial,
            "active" => SubscriptionStatus::Active,
            "past_due" => SubscriptionStatus::PastDue,
            "cancelled" => SubscriptionStatus::Cancelled,
            "suspended" => SubscriptionStatus::Suspended,
            _ => SubscriptionStatus::Unrecognized(value),
        }
    }
}

impl From<SubscriptionStatus> for String {
    fn from(value: SubscriptionStatus) -> Self {
        match value {
            SubscriptionStatus::Unrecognized(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

impl core::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a *valid* subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionType {
    Trial,
    Active,
    PastDue,
}

/// Why a subscription is not valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    NoCompany,
    CompanyInactive,
    CompanySuspended,
    TrialExpired,
    SubscriptionCancelled,
    SubscriptionSuspended,
    UnknownStatus,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidReason::NoCompany => "no company",
            InvalidReason::CompanyInactive => "company inactive",
            InvalidReason::CompanySuspended => "company suspended",
            InvalidReason::TrialExpired => "trial expired",
            InvalidReason::SubscriptionCancelled => "subscription cancelled",
            InvalidReason::SubscriptionSuspended => "subscription suspended",
            InvalidReason::UnknownStatus => "unknown subscription status",
        }
    }

    /// Human-readable form for display (e.g. "Trial expired").
    pub fn message(&self) -> String {
        let reason = self.as_str();
        let mut chars = reason.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl core::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionVerdict {
    pub valid: bool,
    pub reason: Option<InvalidReason>,
    #[serde(rename = "type")]
    pub subscription_type: Option<SubscriptionType>,
    pub warning: Option<String>,
}

impl SubscriptionVerdict {
    pub fn valid(subscription_type: SubscriptionType) -> Self {
        Self {
            valid: true,
            reason: None,
            subscription_type: Some(subscription_type),
            warning: None,
        }
    }

    pub fn invalid(reason: InvalidReason) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
            subscription_type: None,
            warning: None,
        }
    }

    fn with_warning(mut self, warning: &str) -> Self {
        self.warning = Some(warning.to_string());
        self
    }
}

/// Derive a company's subscription verdict at `now`.
pub fn validate(company: Option<&Company>, now: DateTime<Utc>) -> SubscriptionVerdict {
    let Some(company) = company else {
        return SubscriptionVerdict::invalid(InvalidReason::NoCompany);
    };

    if !company.is_active {
        return SubscriptionVerdict::invalid(InvalidReason::CompanyInactive);
    }
    if company.is_suspended {
        return SubscriptionVerdict::invalid(InvalidReason::CompanySuspended);
    }

    match &company.subscription_status {
        SubscriptionStatus::Trial => match company.trial_ends_at {
            Some(ends_at) if now <= ends_at => SubscriptionVerdict::valid(SubscriptionType::Trial),
            _ => SubscriptionVerdict::invalid(InvalidReason::TrialExpired),
        },
        SubscriptionStatus::Active => SubscriptionVerdict::valid(SubscriptionType::Active),
        SubscriptionStatus::PastDue => {
            SubscriptionVerdict::valid(SubscriptionType::PastDue).with_warning(PAYMENT_OVERDUE_WARNING)
        }
        SubscriptionStatus::Cancelled => SubscriptionVerdict::invalid(InvalidReason::SubscriptionCancelled),
        SubscriptionStatus::Suspended => SubscriptionVerdict::invalid(InvalidReason::SubscriptionSuspended),
        SubscriptionStatus::Unrecognized(_) => SubscriptionVerdict::invalid(InvalidReason::UnknownStatus),
    }
}

/// Whole days left in a trial, rounded up; `Some(0)` once it has expired.
///
/// `None` when the company is not on a trial or has no trial end date.
pub fn trial_days_remaining(company: &Company, now: DateTime<Utc>) -> Option<i64> {
    if company.subscription_status != SubscriptionStatus::Trial {
        return None;
    }
    let ends_at = company.trial_ends_at?;
    let remaining = (ends_at - now).num_seconds();
    if remaining <= 0 {
        return Some(0);
    }
    Some((remaining + 86_399) / 86_400)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use sitegate_core::CompanyId;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn company(status: SubscriptionStatus) -> Company {
        Company::new(CompanyId::new(), "Acme Builders", "acme", status)
    }

    #[test]
    fn absent_company_is_invalid() {
        assert_eq!(validate(None, now()), SubscriptionVerdict::invalid(InvalidReason::NoCompany));
    }

    #[test]
    fn inactive_outranks_suspended_and_status() {
        let mut c = company(SubscriptionStatus::Active);
        c.is_active = false;
        c.is_suspended = true;
        assert_eq!(validate(Some(&c), now()).reason, Some(InvalidReason::CompanyInactive));
    }

    #[test]
    fn trial_boundary_is_inclusive() {
        let mut c = company(SubscriptionStatus::Trial);
        c.trial_ends_at = Some(now());

        let before = validate(Some(&c), now() - Duration::seconds(1));
        assert!(before.valid);
        assert_eq!(before.subscription_type, Some(SubscriptionType::Trial));

        assert!(validate(Some(&c), now()).valid);

        let after = validate(Some(&c), now() + Duration::seconds(1));
        assert!(!after.valid);
        assert_eq!(after.reason, Some(InvalidReason::TrialExpired));
    }

    #[test]
    fn trial_without_end_date_is_expired() {
        let c = company(SubscriptionStatus::Trial);
        assert_eq!(validate(Some(&c), now()).reason, Some(InvalidReason::TrialExpired));
    }

    #[test]
    fn past_due_is_valid_with_warning() {
        let verdict = validate(Some(&company(SubscriptionStatus::PastDue)), now());
        assert!(verdict.valid);
        assert_eq!(verdict.subscription_type, Some(SubscriptionType::PastDue));
        assert_eq!(verdict.warning.as_deref(), Some(PAYMENT_OVERDUE_WARNING));
    }

    #[test]
    fn terminal_statuses_name_themselves() {
        let cancelled = validate(Some(&company(SubscriptionStatus::Cancelled)), now());
        assert_eq!(cancelled.reason.map(|r| r.to_string()).as_deref(), Some("subscription cancelled"));

        let suspended = validate(Some(&company(SubscriptionStatus::Suspended)), now());
        assert_eq!(suspended.reason.map(|r| r.to_string()).as_deref(), Some("subscription suspended"));
    }

    #[test]
    fn unrecognized_status_is_invalid() {
        let c: Company = serde_json::from_value(serde_json::json!({
            "id": CompanyId::new(),
            "name": "Legacy Co",
            "slug": "legacy",
            "subscription_status": "grandfathered",
            "is_active": true
        }))
        .unwrap();
        assert_eq!(
            c.subscription_status,
            SubscriptionStatus::Unrecognized("grandfathered".to_string())
        );
        assert_eq!(validate(Some(&c), now()).reason, Some(InvalidReason::UnknownStatus));
    }

    #[test]
    fn reason_message_is_capitalized() {
        assert_eq!(InvalidReason::TrialExpired.message(), "Trial expired");
        assert_eq!(InvalidReason::UnknownStatus.message(), "Unknown subscription status");
    }

    #[test]
    fn trial_days_round_up() {
        let mut c = company(SubscriptionStatus::Trial);
        c.trial_ends_at = Some(now() + Duration::hours(36));
        assert_eq!(trial_days_remaining(&c, now()), Some(2));

        c.trial_ends_at = Some(now() - Duration::hours(1));
        assert_eq!(trial_days_remaining(&c, now()), Some(0));

        let active = company(SubscriptionStatus::Active);
        assert_eq!(trial_days_remaining(&active, now()), None);
    }

    fn any_status() -> impl Strategy<Value = SubscriptionStatus> {
        prop_oneof![
            Just(SubscriptionStatus::Trial),
            Just(SubscriptionStatus::Active),
            Just(SubscriptionStatus::PastDue),
            Just(SubscriptionStatus::Cancelled),
            Just(SubscriptionStatus::Suspended),
            "[a-z_]{1,12}".prop_map(SubscriptionStatus::from),
        ]
    }

    proptest! {
        #[test]
        fn suspension_overrides_every_status(
            status in any_status(),
            trial_offset_hours in -1000i64..1000,
        ) {
            let mut c = company(status);
            c.is_suspended = true;
            c.trial_ends_at = Some(now() + Duration::hours(trial_offset_hours));

            let verdict = validate(Some(&c), now());
            prop_assert!(!verdict.valid);
            prop_assert_eq!(verdict.reason, Some(InvalidReason::CompanySuspended));
        }
    }
}
