//! Multi-pass priority allocation of a payment across obligations.
//!
//! The planner is pure: it takes a snapshot of an account and its
//! obligations and returns a [`DistributionPlan`] without touching storage.
//! Identical inputs always yield identical plans, which is what lets a
//! preview stand in for the commit that follows it.

use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::config::{AllocationOrder, EngineConfig};
use crate::money::Centavos;
use crate::penalty::PenaltyCalculator;
use crate::types::*;

/// Priority groups, settled strictly in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PriorityTier {
    /// Overdue dues, oldest due date first
    PastDueDues,
    /// Overdue utility bills, oldest due date first
    PastDueUtility,
    /// Not yet due, in or before the payment's period
    Current,
    /// Pre-payment of later periods, earliest period first
    Future,
}

impl PriorityTier {
    /// Tier of `obligation` for a payment made on `payment_date`
    pub fn classify(obligation: &Obligation, payment_date: NaiveDate) -> Self {
        if obligation.due_date < payment_date {
            return match obligation.stream() {
                StreamType::Dues => PriorityTier::PastDueDues,
                StreamType::Utility => PriorityTier::PastDueUtility,
            };
        }
        if obligation.period <= Period::containing(payment_date) {
            PriorityTier::Current
        } else {
            PriorityTier::Future
        }
    }
}

/// Version tokens observed when a plan was built
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedVersions {
    pub account: u64,
    pub obligations: BTreeMap<String, u64>,
}

/// Output of the planner; nothing in it has been persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionPlan {
    pub account_id: String,
    pub payment_amount: Centavos,
    pub payment_date: NaiveDate,
    pub scope: Option<ScopeFilter>,
    /// Line items in priority order
    pub allocations: Vec<Allocation>,
    /// Touched obligations as they were in the snapshot
    pub obligations_before: Vec<Obligation>,
    /// Touched obligations as they will be once the plan is applied
    pub obligations_after: Vec<Obligation>,
    pub previous_credit_balance: Centavos,
    pub resulting_credit_balance: Centavos,
    pub net_credit_delta: Centavos,
    /// Funds beyond anything owed; the positive part of the credit delta
    pub overpayment_amount: Centavos,
    pub expected_versions: ExpectedVersions,
}

impl DistributionPlan {
    pub fn allocated_total(&self) -> Centavos {
        self.allocations.iter().map(Allocation::total).sum()
    }

    /// Re-check the money invariants of the plan.
    ///
    /// Payment = allocations + credit delta, no negative line items, and
    /// no resulting obligation paid beyond what it owes.
    pub fn verify(&self) -> BillingResult<()> {
        for allocation in &self.allocations {
            if allocation.base_amount.is_negative() || allocation.penalty_amount.is_negative() {
                return Err(BillingError::InvariantViolation(format!(
                    "Negative allocation to obligation {}: base {}, penalty {}",
                    allocation.obligation_id, allocation.base_amount, allocation.penalty_amount
                )));
            }
        }

        let allocated = self
            .allocations
            .iter()
            .try_fold(Centavos::ZERO, |sum, allocation| {
                allocation
                    .base_amount
                    .checked_add(allocation.penalty_amount)
                    .and_then(|total| sum.checked_add(total))
            })
            .ok_or_else(|| {
                BillingError::InvariantViolation(format!(
                    "Allocations for payment {} overflow",
                    self.payment_amount
                ))
            })?;
        if allocated.checked_add(self.net_credit_delta) != Some(self.payment_amount) {
            return Err(BillingError::InvariantViolation(format!(
                "Payment {} does not reconcile: allocated {} + credit delta {}",
                self.payment_amount, allocated, self.net_credit_delta
            )));
        }

        if self
            .resulting_credit_balance
            .checked_sub(self.previous_credit_balance)
            != Some(self.net_credit_delta)
        {
            return Err(BillingError::InvariantViolation(format!(
                "Credit delta {} does not match balance change {} -> {}",
                self.net_credit_delta, self.previous_credit_balance, self.resulting_credit_balance
            )));
        }

        if self.overpayment_amount != self.net_credit_delta.positive_part() {
            return Err(BillingError::InvariantViolation(format!(
                "Overpayment {} does not match credit delta {}",
                self.overpayment_amount, self.net_credit_delta
            )));
        }

        for obligation in &self.obligations_after {
            obligation.check_invariants()?;
        }

        Ok(())
    }
}

/// Obligation under consideration, with penalty already reassessed
#[derive(Debug)]
struct Candidate {
    tier: PriorityTier,
    original: Obligation,
    working: Obligation,
}

impl Candidate {
    fn priority_cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (&self.working, &other.working);
        self.tier
            .cmp(&other.tier)
            .then_with(|| match self.tier {
                PriorityTier::Future => a.period.cmp(&b.period).then(a.due_date.cmp(&b.due_date)),
                _ => a.due_date.cmp(&b.due_date),
            })
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Distribution planner bound to one account's penalty terms
#[derive(Debug, Clone)]
pub struct DistributionPlanner {
    calculator: PenaltyCalculator,
    order: AllocationOrder,
}

impl DistributionPlanner {
    /// Create a planner with an explicit penalty calculator and order
    pub fn new(calculator: PenaltyCalculator, order: AllocationOrder) -> Self {
        Self { calculator, order }
    }

    /// Create a planner using the penalty policy in force for `account`
    pub fn for_account(config: &EngineConfig, account: &Account) -> BillingResult<Self> {
        let calculator = PenaltyCalculator::new(config.penalty_policy_for(account).clone())?;
        Ok(Self::new(calculator, config.allocation_order))
    }

    /// Plan how `amount` paid on `date` settles the given obligations.
    pub fn plan(
        &self,
        account: &Account,
        obligations: &[Obligation],
        amount: Centavos,
        date: NaiveDate,
        scope: Option<&ScopeFilter>,
    ) -> BillingResult<DistributionPlan> {
        if !amount.is_positive() {
            return Err(BillingError::Validation(format!(
                "Payment amount must be positive, got {}",
                amount
            )));
        }
        if let Some(filter) = scope {
            filter.validate()?;
        }

        let mut expected_versions = ExpectedVersions {
            account: account.version,
            obligations: BTreeMap::new(),
        };
        let mut candidates = Vec::new();

        for obligation in obligations {
            if obligation.account_id != account.id {
                return Err(BillingError::Validation(format!(
                    "Obligation {} belongs to account {}, not {}",
                    obligation.id, obligation.account_id, account.id
                )));
            }
            if !account.bills_stream(obligation.stream())
                || !scope.is_none_or(|filter| filter.matches(obligation))
            {
                continue;
            }
            obligation.check_invariants()?;
            if expected_versions
                .obligations
                .insert(obligation.id.clone(), obligation.version)
                .is_some()
            {
                return Err(BillingError::Validation(format!(
                    "Obligation {} appears more than once",
                    obligation.id
                )));
            }

            let mut working = obligation.clone();
            working.penalty = self.calculator.assess(obligation, date)?;
            working.refresh_status();
            if !working.owed_remaining().is_positive() {
                continue;
            }

            candidates.push(Candidate {
                tier: PriorityTier::classify(obligation, date),
                original: obligation.clone(),
                working,
            });
        }

        candidates.sort_by(Candidate::priority_cmp);

        let previous_credit_balance = account.credit_balance;
        let available = amount.checked_add(previous_credit_balance).ok_or_else(|| {
            BillingError::Validation(format!(
                "Payment {} plus credit balance {} is out of range",
                amount, previous_credit_balance
            ))
        })?;
        let mut remaining = available.positive_part();
        let mut settled: Vec<(usize, Centavos)> = Vec::new();

        let mut start = 0;
        while start < candidates.len() && remaining.is_positive() {
            let tier = candidates[start].tier;
            let end = candidates[start..]
                .iter()
                .position(|c| c.tier != tier)
                .map_or(candidates.len(), |offset| start + offset);

            // First pass: settle everything in the tier that still fits.
            let mut unsettled = Vec::new();
            for (index, candidate) in candidates.iter().enumerate().take(end).skip(start) {
                let owed = candidate.working.owed_remaining();
                if owed <= remaining {
                    remaining -= owed;
                    settled.push((index, owed));
                } else {
                    unsettled.push(index);
                }
            }

            // Second pass: leftover goes to the first obligation that did not fit.
            if let Some(&index) = unsettled.first() {
                if remaining.is_positive() {
                    settled.push((index, remaining));
                    remaining = Centavos::ZERO;
                }
                break;
            }

            debug!(
                "Tier {:?} fully settled for account {}, {} remaining",
                tier, account.id, remaining
            );
            start = end;
        }

        settled.sort_by_key(|(index, _)| *index);

        let mut allocations = Vec::with_capacity(settled.len());
        let mut obligations_before = Vec::with_capacity(settled.len());
        let mut obligations_after = Vec::with_capacity(settled.len());

        for (index, paid) in settled {
            let candidate = &candidates[index];
            let mut after = candidate.working.clone();
            let (base_amount, penalty_amount) = self.split(&after, paid);

            after.base_paid += base_amount;
            after.penalty_paid += penalty_amount;
            after.refresh_status();

            allocations.push(Allocation {
                obligation_id: after.id.clone(),
                stream: after.stream(),
                period: after.period,
                base_amount,
                penalty_amount,
                penalty_assessed: after.penalty,
                resulting_status: after.status,
            });
            obligations_before.push(candidate.original.clone());
            obligations_after.push(after);
        }

        let allocated: Centavos = allocations.iter().map(Allocation::total).sum();
        let resulting_credit_balance = available - allocated;
        let net_credit_delta = resulting_credit_balance - previous_credit_balance;

        let plan = DistributionPlan {
            account_id: account.id.clone(),
            payment_amount: amount,
            payment_date: date,
            scope: scope.cloned(),
            allocations,
            obligations_before,
            obligations_after,
            previous_credit_balance,
            resulting_credit_balance,
            net_credit_delta,
            overpayment_amount: net_credit_delta.positive_part(),
            expected_versions,
        };
        plan.verify()?;

        debug!(
            "Planned {} for account {}: {} allocations, credit delta {}",
            amount,
            account.id,
            plan.allocations.len(),
            plan.net_credit_delta
        );

        Ok(plan)
    }

    /// Split a payment to one obligation into (base, penalty) parts
    fn split(&self, obligation: &Obligation, paid: Centavos) -> (Centavos, Centavos) {
        match self.order {
            AllocationOrder::PenaltyFirst => {
                let penalty = paid.min(obligation.penalty_remaining());
                (paid - penalty, penalty)
            }
            AllocationOrder::BaseFirst => {
                let base = paid.min(obligation.base_remaining());
                (base, paid - base)
            }
        }
    }
}
