//! Scheduler module facade.
//!
//! The scheduler core lives in `roundrobin.rs`, process lifecycle calls in
//! `lifecycle.rs`; both are re-exported here so `crate::scheduler::*` call
//! sites stay clean.

mod lifecycle;
mod roundrobin;
pub mod runqueue;

pub use lifecycle::WaitOutcome;
pub use roundrobin::Scheduler;
pub use runqueue::{PidQueue, RunQueue};
