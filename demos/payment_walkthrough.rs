//! Walkthrough of preview, commit and reversal for one unit
//!
//! Run with `RUST_LOG=debug cargo run --example payment_walkthrough`

use billing_core::{
    utils::MemoryStorage, Account, Centavos, EngineConfig, MeterReading, Obligation,
    ObligationKind, PaymentEngine, PaymentRequest, Period,
};
use chrono::NaiveDate;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = EngineConfig::from_json(
        r#"{
            "default_penalty_policy": { "grace_days": 10, "monthly_rate_percent": "5" },
            "allocation_order": "penalty_first"
        }"#,
    )?;
    let mut engine = PaymentEngine::with_config(MemoryStorage::new(), config)?;

    engine
        .register_account(
            Account::new("unit-4b".to_string(), "Unit 4B".to_string())
                .with_credit("120.00".parse()?),
        )
        .await?;

    let obligations = [
        Obligation::new(
            "dues-2024-01".to_string(),
            "unit-4b".to_string(),
            ObligationKind::Dues,
            Period::new(2024, 1)?,
            NaiveDate::from_ymd_opt(2024, 1, 15).ok_or("bad date")?,
            "950.00".parse()?,
        ),
        Obligation::new(
            "water-2024-02".to_string(),
            "unit-4b".to_string(),
            ObligationKind::Utility(MeterReading {
                meter_id: "W-4B".to_string(),
                previous_reading: 1_200,
                current_reading: 1_236,
            }),
            Period::new(2024, 2)?,
            NaiveDate::from_ymd_opt(2024, 2, 20).ok_or("bad date")?,
            "312.45".parse()?,
        ),
        Obligation::new(
            "dues-2024-03".to_string(),
            "unit-4b".to_string(),
            ObligationKind::Dues,
            Period::new(2024, 3)?,
            NaiveDate::from_ymd_opt(2024, 3, 15).ok_or("bad date")?,
            "950.00".parse()?,
        ),
    ];
    for obligation in obligations {
        engine.add_obligation(obligation).await?;
    }

    let request = PaymentRequest::new(
        "unit-4b".to_string(),
        "1500.00".parse::<Centavos>()?,
        NaiveDate::from_ymd_opt(2024, 3, 10).ok_or("bad date")?,
    )
    .with_idempotency_key("OR-2024-0042".to_string());

    println!("=== Preview ===");
    let preview = engine.preview(&request).await?;
    for allocation in &preview.allocations {
        println!(
            "{:<16} {:>10} base {:>10} penalty -> {:?}",
            allocation.obligation_id,
            allocation.base_amount,
            allocation.penalty_amount,
            allocation.resulting_status
        );
    }
    println!("Credit delta: {}", preview.net_credit_delta);

    println!("\n=== Commit ===");
    let committed = engine.commit(&request).await?;
    println!("Transaction: {}", committed.transaction_id);
    println!("Credit balance: {}", committed.resulting_credit_balance);

    println!("\n=== Reverse ===");
    let reversed = engine.reverse(&committed.transaction_id).await?;
    println!("Credit balance restored to {}", reversed.restored_credit_balance);

    Ok(())
}
