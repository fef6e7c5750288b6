//! # Billing Core
//!
//! Payment distribution engine for shared-property finances: recurring dues,
//! metered utility bills and compounding late penalties, settled from a
//! single lump-sum payment per request.
//!
//! ## Features
//!
//! - **Integer money**: every amount is whole centavos, rounded half-up once
//! - **Penalty calculation**: grace period plus monthly compounding rate
//! - **Priority distribution**: overdue dues, overdue utilities, current and
//!   future periods, with unapplied funds carried as account credit
//! - **Preview / commit / reverse**: identical plans for preview and commit,
//!   atomic writes guarded by version tokens, exact reversal
//! - **Storage abstraction**: any backend that can apply a write batch atomically
//!
//! ## Quick Start
//!
//! ```rust
//! use billing_core::{Centavos, PaymentRequest};
//! use chrono::NaiveDate;
//!
//! // let storage = billing_core::utils::MemoryStorage::new();
//! // let mut engine = billing_core::PaymentEngine::new(storage);
//! let request = PaymentRequest::new(
//!     "unit-4b".to_string(),
//!     "950.00".parse::<Centavos>().unwrap(),
//!     NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
//! );
//! assert_eq!(request.amount, Centavos::new(95_000));
//! ```

pub mod config;
pub mod distribution;
pub mod money;
pub mod penalty;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use distribution::*;
pub use money::*;
pub use penalty::*;
pub use traits::*;
pub use types::*;
