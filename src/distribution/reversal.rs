//! Exact reversal of recorded payments

use log::{error, info, warn};
use uuid::Uuid;

use crate::money::Centavos;
use crate::traits::*;
use crate::types::*;

/// Undoes a recorded transaction as one atomic batch
pub struct ReversalCoordinator<S: BillingStorage> {
    storage: S,
}

impl<S: BillingStorage> ReversalCoordinator<S> {
    /// Create a new reversal coordinator
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Reverse `transaction_id`, returning the restored credit balance.
    ///
    /// Fails with a conflict if any obligation the transaction touched has
    /// been written since; a transaction is never partially reversed.
    pub async fn reverse(&mut self, transaction_id: &str) -> BillingResult<Centavos> {
        let record = self
            .storage
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| BillingError::TransactionNotFound(transaction_id.to_string()))?;

        let account = self
            .storage
            .get_account(&record.account_id)
            .await?
            .ok_or_else(|| BillingError::AccountNotFound(record.account_id.clone()))?;

        let mut batch = WriteBatch::new();

        for allocation in &record.allocations {
            let current = self
                .storage
                .get_obligation(&allocation.obligation_id)
                .await?
                .ok_or_else(|| BillingError::ObligationNotFound(allocation.obligation_id.clone()))?;

            let committed_version = *record
                .obligation_versions
                .get(&allocation.obligation_id)
                .ok_or_else(|| {
                    BillingError::InvariantViolation(format!(
                        "Transaction {} has no committed version for obligation {}",
                        record.id, allocation.obligation_id
                    ))
                })?;
            if current.version != committed_version {
                let conflict = BillingError::Conflict {
                    entity: format!("obligation {}", current.id),
                    expected: committed_version,
                    found: current.version,
                };
                warn!("Cannot reverse transaction {}: {}", record.id, conflict);
                return Err(conflict);
            }

            let before = record
                .obligations_before
                .iter()
                .find(|snapshot| snapshot.obligation_id == allocation.obligation_id)
                .ok_or_else(|| {
                    BillingError::InvariantViolation(format!(
                        "Transaction {} has no snapshot for obligation {}",
                        record.id, allocation.obligation_id
                    ))
                })?;

            let restored = Self::invert(&current, allocation, before)?;
            batch.push(WriteOp::PutObligation {
                obligation: restored,
                expected_version: committed_version,
            });
        }

        let restored_credit = account
            .credit_balance
            .checked_sub(record.net_credit_delta)
            .ok_or_else(|| {
                BillingError::InvariantViolation(format!(
                    "Reversing transaction {} moves credit balance {} out of range",
                    record.id, account.credit_balance
                ))
            })?;
        if restored_credit.is_negative() {
            warn!(
                "Reversing transaction {} leaves account {} with negative credit {}; \
                 later payments already spent the credit it created",
                record.id, account.id, restored_credit
            );
        }

        batch.push(WriteOp::UpdateCredit {
            account_id: account.id.clone(),
            expected_version: account.version,
            credit_balance: restored_credit,
        });
        batch.push(WriteOp::AppendCreditEntry(CreditLedgerEntry {
            id: Uuid::new_v4().to_string(),
            account_id: account.id.clone(),
            transaction_id: record.id.clone(),
            kind: CreditEntryKind::Reversal,
            amount: -record.net_credit_delta,
            balance_after: restored_credit,
            recorded_at: chrono::Utc::now().naive_utc(),
        }));
        batch.push(WriteOp::DeleteTransaction {
            transaction_id: record.id.clone(),
        });

        self.storage.apply_batch(batch).await?;

        info!(
            "Reversed transaction {} for account {}: credit balance restored to {}",
            record.id, account.id, restored_credit
        );

        Ok(restored_credit)
    }

    /// Subtract one allocation from the obligation it was applied to.
    ///
    /// The restored record takes back its pre-commit version token: its state
    /// is identical to what that token described, so an earlier transaction
    /// committed against it can still be reversed afterwards.
    fn invert(
        current: &Obligation,
        allocation: &Allocation,
        before: &ObligationSnapshot,
    ) -> BillingResult<Obligation> {
        let mut restored = current.clone();
        restored.base_paid -= allocation.base_amount;
        restored.penalty_paid -= allocation.penalty_amount;
        restored.penalty = before.penalty;
        restored.version = before.version;
        restored.refresh_status();

        if !restored.matches_snapshot(before) {
            let violation = BillingError::InvariantViolation(format!(
                "Reversing allocation to obligation {} does not restore its prior state",
                current.id
            ));
            error!("{}", violation);
            return Err(violation);
        }
        restored.check_invariants()?;

        Ok(restored)
    }
}
