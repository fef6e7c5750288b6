//! Late-payment penalty assessment

pub mod calculator;

pub use calculator::*;
