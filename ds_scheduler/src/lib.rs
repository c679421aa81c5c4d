//! ABOUTME: Leader-only scheduling engine — placement (C4), dispatch queue (C5),
//! ABOUTME: tick loop + reconciler (C6), lost-execution reaper, stats accumulator

pub mod engine;
pub mod lock_sweep;
pub mod placement;
pub mod queue;
pub mod reaper;
pub mod stats;

pub use engine::{ResultReconciler, SchedulingEngine, DEFAULT_BATCH_SIZE};
pub use lock_sweep::LockSweeper;
pub use placement::{Placed, Placement};
pub use queue::DispatchQueue;
pub use reaper::LostExecutionReaper;
pub use stats::{StatsAccumulator, StatsSnapshot};
