//! Compounding late-penalty calculator

use bigdecimal::{BigDecimal, One, Zero};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::money::Centavos;
use crate::types::*;

/// Length of one compounding month in days
pub const DAYS_PER_MONTH: i64 = 30;

/// Penalty terms applied to overdue obligations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyPolicy {
    /// Days after the due date before any penalty applies
    pub grace_days: u32,
    /// Monthly compounding rate as a percentage (e.g. 5 for 5%)
    pub monthly_rate_percent: BigDecimal,
}

impl PenaltyPolicy {
    pub fn new(grace_days: u32, monthly_rate_percent: BigDecimal) -> Self {
        Self {
            grace_days,
            monthly_rate_percent,
        }
    }

    /// A policy that never charges penalties
    pub fn none() -> Self {
        Self::new(0, BigDecimal::zero())
    }

    /// Validate that the rate is a usable percentage
    pub fn validate(&self) -> BillingResult<()> {
        if self.monthly_rate_percent < BigDecimal::zero() {
            return Err(BillingError::Config(format!(
                "Monthly penalty rate cannot be negative: {}",
                self.monthly_rate_percent
            )));
        }
        if self.monthly_rate_percent > BigDecimal::from(100) {
            return Err(BillingError::Config(format!(
                "Monthly penalty rate cannot exceed 100%: {}",
                self.monthly_rate_percent
            )));
        }
        Ok(())
    }
}

impl Default for PenaltyPolicy {
    fn default() -> Self {
        Self::new(10, BigDecimal::from(5))
    }
}

/// Penalty calculation engine
#[derive(Debug, Clone)]
pub struct PenaltyCalculator {
    policy: PenaltyPolicy,
}

impl PenaltyCalculator {
    /// Create a calculator for the given policy
    pub fn new(policy: PenaltyPolicy) -> BillingResult<Self> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &PenaltyPolicy {
        &self.policy
    }

    /// Number of monthly compounding periods charged as of `as_of`.
    ///
    /// Zero while inside the grace window. Once past it, one period per full
    /// 30-day month elapsed since the due date, so 60 days overdue is always
    /// two periods whatever the calendar month lengths.
    pub fn compounding_periods(&self, due_date: NaiveDate, as_of: NaiveDate) -> u32 {
        let days_overdue = (as_of - due_date).num_days();
        if days_overdue <= i64::from(self.policy.grace_days) {
            return 0;
        }
        u32::try_from(days_overdue / DAYS_PER_MONTH).unwrap_or(u32::MAX)
    }

    /// Penalty on the outstanding base of `obligation` as of `as_of`.
    ///
    /// The outstanding base is compounded by `(1 + rate)` per period and the
    /// difference is rounded half-up once, so repeated calls never drift.
    pub fn compute_penalty(
        &self,
        obligation: &Obligation,
        as_of: NaiveDate,
    ) -> BillingResult<Centavos> {
        let base = obligation.base_remaining();
        if !base.is_positive() || self.policy.monthly_rate_percent.is_zero() {
            return Ok(Centavos::ZERO);
        }

        let periods = self.compounding_periods(obligation.due_date, as_of);
        if periods == 0 {
            return Ok(Centavos::ZERO);
        }

        let growth = BigDecimal::one() + &self.policy.monthly_rate_percent / BigDecimal::from(100);
        let mut factor = BigDecimal::one();
        for _ in 0..periods {
            factor *= &growth;
        }

        let compounded = base.to_decimal() * factor;
        let penalty = Centavos::round_half_up(&compounded)? - base;
        Ok(penalty.positive_part())
    }

    /// Penalty the obligation should carry as of `as_of`.
    ///
    /// Accrued penalty never decreases: once the base is settled the penalty
    /// is frozen, otherwise it is the larger of what is already on record and
    /// the freshly computed amount.
    pub fn assess(&self, obligation: &Obligation, as_of: NaiveDate) -> BillingResult<Centavos> {
        if !obligation.base_remaining().is_positive() {
            return Ok(obligation.penalty);
        }
        let computed = self.compute_penalty(obligation, as_of)?;
        Ok(computed.max(obligation.penalty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn overdue_dues(base: i64, due_date: NaiveDate) -> Obligation {
        Obligation::new(
            "dues-2024-03".to_string(),
            "unit-1".to_string(),
            ObligationKind::Dues,
            Period::containing(due_date),
            due_date,
            Centavos::new(base),
        )
    }

    #[test]
    fn test_no_penalty_within_grace() {
        let calculator = PenaltyCalculator::new(PenaltyPolicy::default()).unwrap();
        let obligation = overdue_dues(95_000, date(2024, 3, 1));

        assert_eq!(
            calculator.compute_penalty(&obligation, date(2024, 3, 11)).unwrap(),
            Centavos::ZERO
        );
        assert_eq!(
            calculator.compute_penalty(&obligation, date(2024, 2, 20)).unwrap(),
            Centavos::ZERO
        );
    }

    #[test]
    fn test_no_month_charged_until_one_has_elapsed() {
        let calculator = PenaltyCalculator::new(PenaltyPolicy::default()).unwrap();
        let obligation = overdue_dues(95_000, date(2024, 3, 1));

        // First day after grace, no full month yet.
        assert_eq!(calculator.compounding_periods(obligation.due_date, date(2024, 3, 12)), 0);
        assert_eq!(
            calculator.compute_penalty(&obligation, date(2024, 3, 12)).unwrap(),
            Centavos::ZERO
        );

        // 30 days overdue: 5% of 950.00
        assert_eq!(
            calculator.compute_penalty(&obligation, date(2024, 3, 31)).unwrap(),
            Centavos::new(4_750)
        );
    }

    #[test]
    fn test_sixty_days_overdue_compounds_twice() {
        let calculator = PenaltyCalculator::new(PenaltyPolicy::default()).unwrap();
        let obligation = overdue_dues(95_000, date(2024, 3, 1));

        // 950.00 * 1.05^2 = 1047.375, penalty 97.375 rounds half-up to 97.38
        let as_of = date(2024, 4, 30);
        assert_eq!(calculator.compounding_periods(obligation.due_date, as_of), 2);
        assert_eq!(
            calculator.compute_penalty(&obligation, as_of).unwrap(),
            Centavos::new(9_738)
        );
    }

    #[test]
    fn test_penalty_is_stable_across_calls() {
        let calculator = PenaltyCalculator::new(PenaltyPolicy::default()).unwrap();
        let obligation = overdue_dues(123_457, date(2023, 1, 31));
        let as_of = date(2024, 6, 15);

        let first = calculator.compute_penalty(&obligation, as_of).unwrap();
        for _ in 0..10 {
            assert_eq!(calculator.compute_penalty(&obligation, as_of).unwrap(), first);
        }
        assert!(first.is_positive());
    }

    #[test]
    fn test_zero_base_never_penalized() {
        let calculator = PenaltyCalculator::new(PenaltyPolicy::default()).unwrap();
        let adjustment = overdue_dues(0, date(2020, 1, 1));
        assert_eq!(
            calculator.compute_penalty(&adjustment, date(2024, 1, 1)).unwrap(),
            Centavos::ZERO
        );
    }

    #[test]
    fn test_assess_never_lowers_recorded_penalty() {
        let calculator = PenaltyCalculator::new(PenaltyPolicy::default()).unwrap();
        let mut obligation = overdue_dues(95_000, date(2024, 3, 1));
        obligation.penalty = Centavos::new(20_000);

        assert_eq!(
            calculator.assess(&obligation, date(2024, 3, 12)).unwrap(),
            Centavos::new(20_000)
        );

        obligation.base_paid = obligation.base_charge;
        assert_eq!(
            calculator.assess(&obligation, date(2026, 1, 1)).unwrap(),
            Centavos::new(20_000)
        );
    }

    #[test]
    fn test_sixty_days_is_two_periods_for_any_due_date() {
        let calculator = PenaltyCalculator::new(PenaltyPolicy::default()).unwrap();
        let anchors = [
            date(2024, 1, 1),
            date(2024, 1, 31),
            date(2024, 2, 29),
            date(2024, 3, 1),
            date(2023, 12, 15),
            date(2023, 2, 1),
        ];
        for due in anchors {
            let as_of = due + chrono::Days::new(60);
            assert_eq!(calculator.compounding_periods(due, as_of), 2, "due {}", due);
            assert_eq!(
                calculator.compute_penalty(&overdue_dues(95_000, due), as_of).unwrap(),
                Centavos::new(9_738),
                "due {}",
                due
            );
        }
    }

    #[test]
    fn test_period_boundaries() {
        let calculator = PenaltyCalculator::new(PenaltyPolicy::default()).unwrap();
        let due = date(2024, 1, 1);
        let after = |days: u64| due + chrono::Days::new(days);

        assert_eq!(calculator.compounding_periods(due, after(10)), 0);
        assert_eq!(calculator.compounding_periods(due, after(29)), 0);
        assert_eq!(calculator.compounding_periods(due, after(30)), 1);
        assert_eq!(calculator.compounding_periods(due, after(59)), 1);
        assert_eq!(calculator.compounding_periods(due, after(90)), 3);
        assert_eq!(calculator.compounding_periods(due, date(2023, 12, 1)), 0);
    }

    #[test]
    fn test_long_grace_suppresses_early_months() {
        let calculator =
            PenaltyCalculator::new(PenaltyPolicy::new(45, BigDecimal::from(5))).unwrap();
        let due = date(2024, 1, 1);

        assert_eq!(calculator.compounding_periods(due, due + chrono::Days::new(40)), 0);
        assert_eq!(calculator.compounding_periods(due, due + chrono::Days::new(46)), 1);
    }

    #[test]
    fn test_invalid_rates_rejected() {
        assert!(PenaltyCalculator::new(PenaltyPolicy::new(0, BigDecimal::from(-1))).is_err());
        assert!(PenaltyCalculator::new(PenaltyPolicy::new(0, BigDecimal::from(101))).is_err());
    }
}
