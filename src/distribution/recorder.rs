//! Atomic persistence of distribution plans

use log::{error, info, warn};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::distribution::planner::{DistributionPlan, ExpectedVersions};
use crate::traits::*;
use crate::types::*;

/// Applies plans to storage as one batch per payment
pub struct PaymentRecorder<S: BillingStorage> {
    storage: S,
}

impl<S: BillingStorage> PaymentRecorder<S> {
    /// Create a new payment recorder
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Persist `plan`, provided nothing it was built from has changed.
    ///
    /// Every obligation listed in `expected` and the account itself must
    /// still carry the version recorded there; otherwise the commit fails
    /// with a retryable conflict and nothing is written.
    pub async fn commit(
        &mut self,
        plan: &DistributionPlan,
        expected: &ExpectedVersions,
        idempotency_key: Option<String>,
    ) -> BillingResult<TransactionRecord> {
        if let Err(e) = plan.verify() {
            error!("Refusing to commit plan for account {}: {}", plan.account_id, e);
            return Err(e);
        }

        if let Err(e) = self.check_versions(&plan.account_id, expected).await {
            if e.is_retryable() {
                warn!("Commit for account {} is stale: {}", plan.account_id, e);
            }
            return Err(e);
        }

        let now = chrono::Utc::now().naive_utc();
        let transaction_id = Uuid::new_v4().to_string();
        let mut batch = WriteBatch::new();
        let mut obligation_versions = BTreeMap::new();

        for after in &plan.obligations_after {
            let expected_version = *expected.obligations.get(&after.id).ok_or_else(|| {
                BillingError::InvariantViolation(format!(
                    "Obligation {} is allocated but was not part of the plan snapshot",
                    after.id
                ))
            })?;
            let mut written = after.clone();
            written.version = expected_version + 1;
            obligation_versions.insert(written.id.clone(), written.version);
            batch.push(WriteOp::PutObligation {
                obligation: written,
                expected_version,
            });
        }

        // Untouched obligations are still part of what the plan was built from.
        for (obligation_id, version) in &expected.obligations {
            if !obligation_versions.contains_key(obligation_id) {
                batch.push(WriteOp::CheckObligation {
                    obligation_id: obligation_id.clone(),
                    expected_version: *version,
                });
            }
        }

        batch.push(WriteOp::UpdateCredit {
            account_id: plan.account_id.clone(),
            expected_version: expected.account,
            credit_balance: plan.resulting_credit_balance,
        });

        batch.push(WriteOp::AppendCreditEntry(CreditLedgerEntry {
            id: Uuid::new_v4().to_string(),
            account_id: plan.account_id.clone(),
            transaction_id: transaction_id.clone(),
            kind: CreditEntryKind::Payment,
            amount: plan.net_credit_delta,
            balance_after: plan.resulting_credit_balance,
            recorded_at: now,
        }));

        let record = TransactionRecord {
            id: transaction_id,
            account_id: plan.account_id.clone(),
            idempotency_key,
            payment_amount: plan.payment_amount,
            payment_date: plan.payment_date,
            scope: plan.scope.clone(),
            allocations: plan.allocations.clone(),
            net_credit_delta: plan.net_credit_delta,
            resulting_credit_balance: plan.resulting_credit_balance,
            obligations_before: plan
                .obligations_before
                .iter()
                .map(Obligation::snapshot)
                .collect(),
            obligation_versions,
            created_at: now,
        };
        batch.push(WriteOp::InsertTransaction(record.clone()));

        if let Err(e) = self.storage.apply_batch(batch).await {
            if e.is_retryable() {
                warn!("Commit for account {} lost a race: {}", plan.account_id, e);
            }
            return Err(e);
        }

        info!(
            "Recorded transaction {} for account {}: {} across {} obligations, credit delta {}",
            record.id,
            record.account_id,
            record.payment_amount,
            record.allocations.len(),
            record.net_credit_delta
        );

        Ok(record)
    }

    /// Early version check so obvious conflicts fail before a batch is built
    async fn check_versions(
        &self,
        account_id: &str,
        expected: &ExpectedVersions,
    ) -> BillingResult<()> {
        let account = self
            .storage
            .get_account(account_id)
            .await?
            .ok_or_else(|| BillingError::AccountNotFound(account_id.to_string()))?;
        if account.version != expected.account {
            return Err(BillingError::Conflict {
                entity: format!("account {}", account_id),
                expected: expected.account,
                found: account.version,
            });
        }

        for (obligation_id, version) in &expected.obligations {
            let obligation = self
                .storage
                .get_obligation(obligation_id)
                .await?
                .ok_or_else(|| BillingError::ObligationNotFound(obligation_id.clone()))?;
            if obligation.version != *version {
                return Err(BillingError::Conflict {
                    entity: format!("obligation {}", obligation_id),
                    expected: *version,
                    found: obligation.version,
                });
            }
        }

        Ok(())
    }
}
