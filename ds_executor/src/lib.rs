//! ABOUTME: Executor process — job intake (C9), subprocess runner (C10), heartbeat (C11)
//! ABOUTME: Runs arbitrary shell commands; deploy only where that is acceptable

pub mod heartbeat;
pub mod intake;
pub mod runner;

pub use heartbeat::Heartbeat;
pub use intake::{CancelSet, Intake, RunnerQueue};
pub use runner::Runner;
