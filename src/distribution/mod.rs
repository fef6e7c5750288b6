//! Payment distribution: planning, recording and reversal

pub mod engine;
pub mod planner;
pub mod recorder;
pub mod reversal;

pub use engine::*;
pub use planner::*;
pub use recorder::*;
pub use reversal::*;
