//! In-memory storage implementation for testing

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::traits::*;
use crate::types::*;

#[derive(Debug, Clone, Default)]
struct State {
    accounts: HashMap<String, Account>,
    obligations: HashMap<String, Obligation>,
    transactions: HashMap<String, TransactionRecord>,
    /// (account id, idempotency key) -> transaction id
    idempotency_keys: HashMap<(String, String), String>,
    credit_entries: Vec<CreditLedgerEntry>,
}

impl State {
    fn apply(&mut self, op: &WriteOp) -> BillingResult<()> {
        match op {
            WriteOp::UpdateCredit {
                account_id,
                expected_version,
                credit_balance,
            } => {
                let account = self
                    .accounts
                    .get_mut(account_id)
                    .ok_or_else(|| BillingError::AccountNotFound(account_id.clone()))?;
                if account.version != *expected_version {
                    return Err(BillingError::Conflict {
                        entity: format!("account {}", account_id),
                        expected: *expected_version,
                        found: account.version,
                    });
                }
                account.credit_balance = *credit_balance;
                account.version += 1;
                account.updated_at = chrono::Utc::now().naive_utc();
            }
            WriteOp::PutObligation {
                obligation,
                expected_version,
            } => {
                let current = self.check_obligation(&obligation.id, *expected_version)?;
                if current.account_id != obligation.account_id {
                    return Err(BillingError::InvariantViolation(format!(
                        "Obligation {} cannot move from account {} to {}",
                        obligation.id, current.account_id, obligation.account_id
                    )));
                }
                self.obligations
                    .insert(obligation.id.clone(), obligation.clone());
            }
            WriteOp::CheckObligation {
                obligation_id,
                expected_version,
            } => {
                self.check_obligation(obligation_id, *expected_version)?;
            }
            WriteOp::AppendCreditEntry(entry) => {
                self.credit_entries.push(entry.clone());
            }
            WriteOp::InsertTransaction(record) => {
                if self.transactions.contains_key(&record.id) {
                    return Err(BillingError::Storage(format!(
                        "Transaction {} already exists",
                        record.id
                    )));
                }
                if let Some(key) = &record.idempotency_key {
                    let index = (record.account_id.clone(), key.clone());
                    if self.idempotency_keys.contains_key(&index) {
                        return Err(BillingError::Conflict {
                            entity: format!("idempotency key {}", key),
                            expected: 0,
                            found: 1,
                        });
                    }
                    self.idempotency_keys.insert(index, record.id.clone());
                }
                self.transactions.insert(record.id.clone(), record.clone());
            }
            WriteOp::DeleteTransaction { transaction_id } => {
                let record = self
                    .transactions
                    .remove(transaction_id)
                    .ok_or_else(|| BillingError::TransactionNotFound(transaction_id.clone()))?;
                if let Some(key) = record.idempotency_key {
                    self.idempotency_keys.remove(&(record.account_id, key));
                }
            }
        }
        Ok(())
    }

    fn check_obligation(&self, obligation_id: &str, expected_version: u64) -> BillingResult<&Obligation> {
        let current = self
            .obligations
            .get(obligation_id)
            .ok_or_else(|| BillingError::ObligationNotFound(obligation_id.to_string()))?;
        if current.version != expected_version {
            return Err(BillingError::Conflict {
                entity: format!("obligation {}", obligation_id),
                expected: expected_version,
                found: current.version,
            });
        }
        Ok(current)
    }
}

/// In-memory storage implementation for testing and development
///
/// Clones share the same underlying state, so several engines built from
/// one `MemoryStorage` behave like concurrent clients of one database.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    state: Arc<RwLock<State>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
        }
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) -> BillingResult<()> {
        *self.write()? = State::default();
        Ok(())
    }

    fn read(&self) -> BillingResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|e| BillingError::Storage(format!("Storage lock poisoned: {}", e)))
    }

    fn write(&self) -> BillingResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|e| BillingError::Storage(format!("Storage lock poisoned: {}", e)))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BillingStorage for MemoryStorage {
    async fn save_account(&mut self, account: &Account) -> BillingResult<()> {
        let mut state = self.write()?;
        if state.accounts.contains_key(&account.id) {
            return Err(BillingError::Validation(format!(
                "Account with ID '{}' already exists",
                account.id
            )));
        }
        state.accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn get_account(&self, account_id: &str) -> BillingResult<Option<Account>> {
        Ok(self.read()?.accounts.get(account_id).cloned())
    }

    async fn save_obligation(&mut self, obligation: &Obligation) -> BillingResult<()> {
        let mut state = self.write()?;
        if state.obligations.contains_key(&obligation.id) {
            return Err(BillingError::Validation(format!(
                "Obligation with ID '{}' already exists",
                obligation.id
            )));
        }
        state
            .obligations
            .insert(obligation.id.clone(), obligation.clone());
        Ok(())
    }

    async fn get_obligation(&self, obligation_id: &str) -> BillingResult<Option<Obligation>> {
        Ok(self.read()?.obligations.get(obligation_id).cloned())
    }

    async fn list_obligations(&self, account_id: &str) -> BillingResult<Vec<Obligation>> {
        let state = self.read()?;
        let mut obligations: Vec<Obligation> = state
            .obligations
            .values()
            .filter(|obligation| obligation.account_id == account_id)
            .cloned()
            .collect();
        obligations.sort_by(|a, b| a.period.cmp(&b.period).then_with(|| a.id.cmp(&b.id)));
        Ok(obligations)
    }

    async fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> BillingResult<Option<TransactionRecord>> {
        Ok(self.read()?.transactions.get(transaction_id).cloned())
    }

    async fn find_transaction_by_key(
        &self,
        account_id: &str,
        idempotency_key: &str,
    ) -> BillingResult<Option<TransactionRecord>> {
        let state = self.read()?;
        let index = (account_id.to_string(), idempotency_key.to_string());
        Ok(state
            .idempotency_keys
            .get(&index)
            .and_then(|transaction_id| state.transactions.get(transaction_id))
            .cloned())
    }

    async fn list_transactions(&self, account_id: &str) -> BillingResult<Vec<TransactionRecord>> {
        let state = self.read()?;
        let mut transactions: Vec<TransactionRecord> = state
            .transactions
            .values()
            .filter(|record| record.account_id == account_id)
            .cloned()
            .collect();
        transactions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(transactions)
    }

    async fn list_credit_entries(
        &self,
        account_id: &str,
    ) -> BillingResult<Vec<CreditLedgerEntry>> {
        Ok(self
            .read()?
            .credit_entries
            .iter()
            .filter(|entry| entry.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn apply_batch(&mut self, batch: WriteBatch) -> BillingResult<()> {
        let mut state = self.write()?;
        let mut staged = state.clone();
        for op in batch.ops() {
            staged.apply(op)?;
        }
        *state = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Centavos;
    use chrono::NaiveDate;

    fn obligation(id: &str) -> Obligation {
        Obligation::new(
            id.to_string(),
            "unit-1".to_string(),
            ObligationKind::Dues,
            Period::new(2024, 3).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            Centavos::new(95_000),
        )
    }

    #[tokio::test]
    async fn test_batch_applies_versions() {
        let mut storage = MemoryStorage::new();
        storage
            .save_account(&Account::new("unit-1".to_string(), "Unit 1".to_string()))
            .await
            .unwrap();
        storage.save_obligation(&obligation("ob1")).await.unwrap();

        let mut paid = obligation("ob1");
        paid.base_paid = paid.base_charge;
        paid.refresh_status();
        paid.version = 2;

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutObligation {
            obligation: paid,
            expected_version: 1,
        });
        batch.push(WriteOp::UpdateCredit {
            account_id: "unit-1".to_string(),
            expected_version: 1,
            credit_balance: Centavos::new(500),
        });
        storage.apply_batch(batch).await.unwrap();

        let stored = storage.get_obligation("ob1").await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.status, ObligationStatus::Paid);

        let account = storage.get_account("unit-1").await.unwrap().unwrap();
        assert_eq!(account.version, 2);
        assert_eq!(account.credit_balance, Centavos::new(500));
    }

    #[tokio::test]
    async fn test_failed_batch_writes_nothing() {
        let mut storage = MemoryStorage::new();
        storage
            .save_account(&Account::new("unit-1".to_string(), "Unit 1".to_string()))
            .await
            .unwrap();
        storage.save_obligation(&obligation("ob1")).await.unwrap();

        let mut paid = obligation("ob1");
        paid.base_paid = paid.base_charge;
        paid.refresh_status();

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutObligation {
            obligation: paid,
            expected_version: 1,
        });
        // Stale account version fails the whole batch.
        batch.push(WriteOp::UpdateCredit {
            account_id: "unit-1".to_string(),
            expected_version: 7,
            credit_balance: Centavos::new(500),
        });

        let result = storage.apply_batch(batch).await;
        assert!(matches!(result, Err(BillingError::Conflict { .. })));

        let stored = storage.get_obligation("ob1").await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.base_paid, Centavos::ZERO);
    }

    #[tokio::test]
    async fn test_stale_untouched_obligation_fails_batch() {
        let mut storage = MemoryStorage::new();
        storage
            .save_account(&Account::new("unit-1".to_string(), "Unit 1".to_string()))
            .await
            .unwrap();
        storage.save_obligation(&obligation("ob1")).await.unwrap();
        let mut moved_on = obligation("ob2");
        moved_on.version = 3;
        storage.save_obligation(&moved_on).await.unwrap();

        let mut paid = obligation("ob1");
        paid.base_paid = paid.base_charge;
        paid.refresh_status();
        paid.version = 2;

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutObligation {
            obligation: paid,
            expected_version: 1,
        });
        batch.push(WriteOp::CheckObligation {
            obligation_id: "ob2".to_string(),
            expected_version: 1,
        });
        batch.push(WriteOp::UpdateCredit {
            account_id: "unit-1".to_string(),
            expected_version: 1,
            credit_balance: Centavos::new(500),
        });
        batch.push(WriteOp::AppendCreditEntry(CreditLedgerEntry {
            id: "entry-1".to_string(),
            account_id: "unit-1".to_string(),
            transaction_id: "tx-1".to_string(),
            kind: CreditEntryKind::Payment,
            amount: Centavos::new(500),
            balance_after: Centavos::new(500),
            recorded_at: chrono::Utc::now().naive_utc(),
        }));

        match storage.apply_batch(batch).await {
            Err(BillingError::Conflict {
                entity,
                expected,
                found,
            }) => {
                assert!(entity.contains("ob2"), "conflict on {}", entity);
                assert_eq!(expected, 1);
                assert_eq!(found, 3);
            }
            other => panic!("expected conflict, got {:?}", other),
        }

        let stored = storage.get_obligation("ob1").await.unwrap().unwrap();
        assert_eq!(stored, obligation("ob1"));
        let account = storage.get_account("unit-1").await.unwrap().unwrap();
        assert_eq!(account.version, 1);
        assert_eq!(account.credit_balance, Centavos::ZERO);
        assert!(storage.list_credit_entries("unit-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_account_rejected() {
        let mut storage = MemoryStorage::new();
        let account = Account::new("unit-1".to_string(), "Unit 1".to_string());
        storage.save_account(&account).await.unwrap();
        assert!(storage.save_account(&account).await.is_err());

        storage.clear().unwrap();
        assert!(storage.get_account("unit-1").await.unwrap().is_none());
    }
}
