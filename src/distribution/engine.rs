//! Payment engine orchestrating preview, commit and reversal

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::distribution::{DistributionPlan, DistributionPlanner, PaymentRecorder, ReversalCoordinator};
use crate::money::Centavos;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation;

/// Result of a preview; nothing is persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub allocations: Vec<Allocation>,
    pub net_credit_delta: Centavos,
    pub overpayment_amount: Centavos,
    pub obligations_after: Vec<Obligation>,
}

impl From<DistributionPlan> for PreviewResponse {
    fn from(plan: DistributionPlan) -> Self {
        Self {
            allocations: plan.allocations,
            net_credit_delta: plan.net_credit_delta,
            overpayment_amount: plan.overpayment_amount,
            obligations_after: plan.obligations_after,
        }
    }
}

/// Result of a successful commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitResponse {
    pub transaction_id: String,
    pub allocations: Vec<Allocation>,
    pub resulting_credit_balance: Centavos,
}

impl From<TransactionRecord> for CommitResponse {
    fn from(record: TransactionRecord) -> Self {
        Self {
            transaction_id: record.id,
            allocations: record.allocations,
            resulting_credit_balance: record.resulting_credit_balance,
        }
    }
}

/// Result of a successful reversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReversalResponse {
    pub restored_credit_balance: Centavos,
}

/// Main engine that orchestrates all payment operations
pub struct PaymentEngine<S: BillingStorage> {
    storage: S,
    config: EngineConfig,
    validator: Box<dyn PaymentValidator>,
    recorder: PaymentRecorder<S>,
    reversals: ReversalCoordinator<S>,
}

impl<S: BillingStorage + Clone> PaymentEngine<S> {
    /// Create a new engine with the default configuration
    pub fn new(storage: S) -> Self {
        Self {
            recorder: PaymentRecorder::new(storage.clone()),
            reversals: ReversalCoordinator::new(storage.clone()),
            storage,
            config: EngineConfig::default(),
            validator: Box::new(DefaultPaymentValidator),
        }
    }

    /// Create a new engine with a custom configuration
    pub fn with_config(storage: S, config: EngineConfig) -> BillingResult<Self> {
        config.validate()?;
        let mut engine = Self::new(storage);
        engine.config = config;
        Ok(engine)
    }

    /// Create a new engine with a custom configuration and validator
    pub fn with_validator(
        storage: S,
        config: EngineConfig,
        validator: Box<dyn PaymentValidator>,
    ) -> BillingResult<Self> {
        let mut engine = Self::with_config(storage, config)?;
        engine.validator = validator;
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // Account and obligation operations
    /// Register a new account
    pub async fn register_account(&mut self, account: Account) -> BillingResult<Account> {
        validation::validate_account_id(&account.id)?;
        validation::validate_account_name(&account.name)?;
        if let Some(policy) = &account.penalty_policy {
            policy.validate()?;
        }

        if self.storage.get_account(&account.id).await?.is_some() {
            return Err(BillingError::Validation(format!(
                "Account with ID '{}' already exists",
                account.id
            )));
        }

        self.storage.save_account(&account).await?;
        Ok(account)
    }

    /// Get an account by ID
    pub async fn get_account(&self, account_id: &str) -> BillingResult<Option<Account>> {
        self.storage.get_account(account_id).await
    }

    /// Get an account by ID, returning an error if not found
    pub async fn get_account_required(&self, account_id: &str) -> BillingResult<Account> {
        self.storage
            .get_account(account_id)
            .await?
            .ok_or_else(|| BillingError::AccountNotFound(account_id.to_string()))
    }

    /// Add a billed obligation to an existing account
    pub async fn add_obligation(&mut self, obligation: Obligation) -> BillingResult<Obligation> {
        validation::validate_obligation(&obligation)?;
        self.get_account_required(&obligation.account_id).await?;

        let existing = self.storage.list_obligations(&obligation.account_id).await?;
        if let Some(clash) = existing.iter().find(|o| {
            o.id == obligation.id
                || (o.stream() == obligation.stream() && o.period == obligation.period)
        }) {
            return Err(BillingError::Validation(format!(
                "Account {} already has obligation {} for {} {}",
                obligation.account_id,
                clash.id,
                clash.stream(),
                clash.period
            )));
        }

        self.storage.save_obligation(&obligation).await?;
        Ok(obligation)
    }

    /// List every obligation of an account
    pub async fn list_obligations(&self, account_id: &str) -> BillingResult<Vec<Obligation>> {
        self.storage.list_obligations(account_id).await
    }

    // Payment operations
    /// Build the distribution plan for a request against current storage
    pub async fn plan_payment(&self, request: &PaymentRequest) -> BillingResult<DistributionPlan> {
        if let Err(e) = self.validator.validate_payment(request) {
            warn!("Rejected payment for account {}: {}", request.account_id, e);
            return Err(e);
        }

        let account = self.get_account_required(&request.account_id).await?;
        let obligations = self.storage.list_obligations(&account.id).await?;

        DistributionPlanner::for_account(&self.config, &account)?.plan(
            &account,
            &obligations,
            request.amount,
            request.date,
            request.scope.as_ref(),
        )
    }

    /// Show how a payment would be distributed without recording it
    pub async fn preview(&self, request: &PaymentRequest) -> BillingResult<PreviewResponse> {
        self.plan_payment(request).await.map(PreviewResponse::from)
    }

    /// Distribute a payment and record it atomically.
    ///
    /// A request carrying an idempotency key that was already committed for
    /// the same payment returns the original transaction unchanged.
    pub async fn commit(&mut self, request: &PaymentRequest) -> BillingResult<CommitResponse> {
        if let Some(key) = &request.idempotency_key {
            validation::validate_idempotency_key(key, self.config.max_idempotency_key_len)?;
            if let Some(existing) = self
                .storage
                .find_transaction_by_key(&request.account_id, key)
                .await?
            {
                if !existing.same_payment_as(request) {
                    return Err(BillingError::Validation(format!(
                        "Idempotency key '{}' was already used for a different payment",
                        key
                    )));
                }
                info!(
                    "Replaying transaction {} for idempotency key '{}'",
                    existing.id, key
                );
                return Ok(existing.into());
            }
        }

        let plan = self.plan_payment(request).await?;
        let record = self
            .recorder
            .commit(&plan, &plan.expected_versions, request.idempotency_key.clone())
            .await?;
        Ok(record.into())
    }

    /// Undo a committed payment
    pub async fn reverse(&mut self, transaction_id: &str) -> BillingResult<ReversalResponse> {
        let restored_credit_balance = self.reversals.reverse(transaction_id).await?;
        Ok(ReversalResponse {
            restored_credit_balance,
        })
    }

    // Transaction and credit history
    /// Get a transaction by ID
    pub async fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> BillingResult<Option<TransactionRecord>> {
        self.storage.get_transaction(transaction_id).await
    }

    /// List recorded transactions of an account
    pub async fn list_transactions(&self, account_id: &str) -> BillingResult<Vec<TransactionRecord>> {
        self.storage.list_transactions(account_id).await
    }

    /// Credit balance movements of an account, oldest first
    pub async fn credit_history(&self, account_id: &str) -> BillingResult<Vec<CreditLedgerEntry>> {
        self.storage.list_credit_entries(account_id).await
    }
}
