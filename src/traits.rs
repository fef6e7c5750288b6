//! Traits for storage abstraction and extensibility

use async_trait::async_trait;

use crate::money::Centavos;
use crate::types::*;

/// A single mutation inside a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Set the account credit balance if its version still matches
    UpdateCredit {
        account_id: String,
        expected_version: u64,
        credit_balance: Centavos,
    },
    /// Replace an obligation if the stored version still matches
    /// `expected_version`; the version carried by `obligation` is written as is
    PutObligation {
        obligation: Obligation,
        expected_version: u64,
    },
    /// Fail the batch unless the obligation still has this version
    CheckObligation {
        obligation_id: String,
        expected_version: u64,
    },
    AppendCreditEntry(CreditLedgerEntry),
    /// Insert a transaction; fails if its id or idempotency key is taken
    InsertTransaction(TransactionRecord),
    DeleteTransaction { transaction_id: String },
}

/// All mutations of one commit or reversal, described as data and applied
/// by [`BillingStorage::apply_batch`] as a single all-or-nothing write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Storage abstraction for the billing system
///
/// This trait allows the engine to work with any storage backend
/// (PostgreSQL, SQLite, in-memory, etc.) that can apply a [`WriteBatch`]
/// atomically and compare version tokens inside that write.
#[async_trait]
pub trait BillingStorage: Send + Sync {
    /// Insert a new account
    async fn save_account(&mut self, account: &Account) -> BillingResult<()>;

    /// Get an account by ID
    async fn get_account(&self, account_id: &str) -> BillingResult<Option<Account>>;

    /// Insert a new obligation (billing-cycle generation)
    async fn save_obligation(&mut self, obligation: &Obligation) -> BillingResult<()>;

    /// Get an obligation by ID
    async fn get_obligation(&self, obligation_id: &str) -> BillingResult<Option<Obligation>>;

    /// List every obligation of an account
    async fn list_obligations(&self, account_id: &str) -> BillingResult<Vec<Obligation>>;

    /// Get a transaction by ID
    async fn get_transaction(&self, transaction_id: &str)
        -> BillingResult<Option<TransactionRecord>>;

    /// Find a transaction of an account by idempotency key
    async fn find_transaction_by_key(
        &self,
        account_id: &str,
        idempotency_key: &str,
    ) -> BillingResult<Option<TransactionRecord>>;

    /// List the transactions of an account, oldest first
    async fn list_transactions(&self, account_id: &str) -> BillingResult<Vec<TransactionRecord>>;

    /// List credit ledger entries of an account, oldest first
    async fn list_credit_entries(&self, account_id: &str)
        -> BillingResult<Vec<CreditLedgerEntry>>;

    /// Apply every operation of the batch or none of them.
    ///
    /// Must fail with [`BillingError::Conflict`] when any expected version
    /// no longer matches, leaving storage untouched.
    async fn apply_batch(&mut self, batch: WriteBatch) -> BillingResult<()>;
}

/// Trait for implementing custom payment validation rules
pub trait PaymentValidator: Send + Sync {
    /// Validate a payment request before anything is read from storage
    fn validate_payment(&self, request: &PaymentRequest) -> BillingResult<()>;

    /// Validate a scope filter
    fn validate_scope(&self, scope: &ScopeFilter) -> BillingResult<()>;
}

/// Default payment validator with basic rules
pub struct DefaultPaymentValidator;

impl PaymentValidator for DefaultPaymentValidator {
    fn validate_payment(&self, request: &PaymentRequest) -> BillingResult<()> {
        if request.account_id.trim().is_empty() {
            return Err(BillingError::Validation(
                "Account ID cannot be empty".to_string(),
            ));
        }

        if !request.amount.is_positive() {
            return Err(BillingError::Validation(format!(
                "Payment amount must be positive, got {}",
                request.amount
            )));
        }

        if let Some(scope) = &request.scope {
            self.validate_scope(scope)?;
        }

        Ok(())
    }

    fn validate_scope(&self, scope: &ScopeFilter) -> BillingResult<()> {
        scope.validate()
    }
}
