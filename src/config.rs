//! Engine configuration

use serde::{Deserialize, Serialize};

use crate::penalty::PenaltyPolicy;
use crate::types::*;

/// Order in which a payment settles the two parts of a single obligation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationOrder {
    /// Accrued penalty is settled before the base charge
    #[default]
    PenaltyFirst,
    /// Base charge is settled before any penalty
    BaseFirst,
}

/// Configuration shared by every operation of a [`crate::PaymentEngine`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Penalty terms for accounts without their own policy
    pub default_penalty_policy: PenaltyPolicy,
    pub allocation_order: AllocationOrder,
    pub max_idempotency_key_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_penalty_policy: PenaltyPolicy::default(),
            allocation_order: AllocationOrder::default(),
            max_idempotency_key_len: 64,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON configuration document; missing fields take defaults
    pub fn from_json(json: &str) -> BillingResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BillingError::Config(format!("Invalid engine configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BillingResult<()> {
        self.default_penalty_policy.validate()?;
        if self.max_idempotency_key_len == 0 {
            return Err(BillingError::Config(
                "max_idempotency_key_len must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Penalty policy in force for `account`
    pub fn penalty_policy_for<'a>(&'a self, account: &'a Account) -> &'a PenaltyPolicy {
        account
            .penalty_policy
            .as_ref()
            .unwrap_or(&self.default_penalty_policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_penalty_policy.grace_days, 10);
        assert_eq!(
            config.default_penalty_policy.monthly_rate_percent,
            BigDecimal::from(5)
        );
        assert_eq!(config.allocation_order, AllocationOrder::PenaltyFirst);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial_document() {
        let config = EngineConfig::from_json(
            r#"{
                "default_penalty_policy": { "grace_days": 15, "monthly_rate_percent": "2.5" },
                "allocation_order": "base_first"
            }"#,
        )
        .unwrap();

        assert_eq!(config.default_penalty_policy.grace_days, 15);
        assert_eq!(
            config.default_penalty_policy.monthly_rate_percent,
            "2.5".parse::<BigDecimal>().unwrap()
        );
        assert_eq!(config.allocation_order, AllocationOrder::BaseFirst);
        assert_eq!(config.max_idempotency_key_len, 64);
    }

    #[test]
    fn test_from_json_rejects_bad_values() {
        assert!(matches!(
            EngineConfig::from_json(r#"{ "max_idempotency_key_len": 0 }"#),
            Err(BillingError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_json(
                r#"{ "default_penalty_policy": { "grace_days": 1, "monthly_rate_percent": "150" } }"#
            ),
            Err(BillingError::Config(_))
        ));
        assert!(EngineConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_account_policy_overrides_default() {
        let config = EngineConfig::default();
        let account = Account::new("unit-1".to_string(), "Unit 1".to_string())
            .with_penalty_policy(PenaltyPolicy::none());
        assert_eq!(config.penalty_policy_for(&account), &PenaltyPolicy::none());
    }
}
