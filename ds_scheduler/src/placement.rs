//! ABOUTME: Placement policy — picks an executor from the live set
//! ABOUTME: Process-wide strategy, swappable at runtime via `Placement::set_strategy`

use ds_config::SelectionStrategy;
use ds_db::ExecutorNode;
use rand::Rng;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;

/// `(executor_id, "host:port")`.
pub type Placed = (String, String);

fn address(node: &ExecutorNode) -> String {
    format!("{}:{}", node.host, node.port)
}

/// Picks one executor out of a live candidate set. Round-robin keeps a
/// shared cursor; least-load and random need no cross-call state.
pub struct Placement {
    strategy: RwLock<SelectionStrategy>,
    round_robin_cursor: AtomicUsize,
    picks_made: AtomicU64,
}

impl Placement {
    pub fn new(strategy: SelectionStrategy) -> Self {
        Self {
            strategy: RwLock::new(strategy),
            round_robin_cursor: AtomicUsize::new(0),
            picks_made: AtomicU64::new(0),
        }
    }

    pub fn strategy(&self) -> SelectionStrategy {
        *self.strategy.read().expect("placement lock poisoned")
    }

    pub fn set_strategy(&self, strategy: SelectionStrategy) {
        *self.strategy.write().expect("placement lock poisoned") = strategy;
    }

    /// Selects one executor from `live`, or `None` if the set is empty, or
    /// for `LEAST_LOAD`, every candidate is saturated.
    pub fn pick(&self, live: &[ExecutorNode]) -> Option<Placed> {
        if live.is_empty() {
            return None;
        }
        let picked = match self.strategy() {
            SelectionStrategy::Random => self.pick_random(live),
            SelectionStrategy::RoundRobin => self.pick_round_robin(live),
            SelectionStrategy::LeastLoad => self.pick_least_load(live),
        };
        if picked.is_some() {
            self.picks_made.fetch_add(1, Ordering::Relaxed);
        }
        picked
    }

    fn pick_random(&self, live: &[ExecutorNode]) -> Option<Placed> {
        let idx = rand::thread_rng().gen_range(0..live.len());
        let node = &live[idx];
        Some((node.executor_id.clone(), address(node)))
    }

    /// Advances a shared cursor modulo the live-set size. Stable under set
    /// changes only in a weak sense: shrinkage of the live set may skip one
    /// candidate the cursor would otherwise have landed on.
    fn pick_round_robin(&self, live: &[ExecutorNode]) -> Option<Placed> {
        let idx = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % live.len();
        let node = &live[idx];
        Some((node.executor_id.clone(), address(node)))
    }

    /// Minimizes `current_load / max_load`; rejects the winner if it is
    /// already saturated (`current_load >= max_load`). Ties resolve to the
    /// first candidate seen.
    fn pick_least_load(&self, live: &[ExecutorNode]) -> Option<Placed> {
        let winner = live.iter().min_by(|a, b| {
            let ratio = |n: &ExecutorNode| n.current_load as f64 / n.max_load.max(1) as f64;
            ratio(a)
                .partial_cmp(&ratio(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if !winner.has_capacity() {
            return None;
        }
        Some((winner.executor_id.clone(), address(winner)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, current_load: i64, max_load: i64) -> ExecutorNode {
        ExecutorNode {
            executor_id: id.to_string(),
            host: "127.0.0.1".to_string(),
            port: 9000,
            status: ds_db::ExecutorStatus::Online,
            max_load,
            current_load,
            total_tasks_executed: 0,
            last_heartbeat: ds_core::time::now_iso8601(),
            register_time: ds_core::time::now_iso8601(),
        }
    }

    #[test]
    fn empty_set_yields_none_for_every_strategy() {
        for strategy in [
            SelectionStrategy::Random,
            SelectionStrategy::RoundRobin,
            SelectionStrategy::LeastLoad,
        ] {
            let placement = Placement::new(strategy);
            assert!(placement.pick(&[]).is_none());
        }
    }

    #[test]
    fn round_robin_advances_and_wraps() {
        let placement = Placement::new(SelectionStrategy::RoundRobin);
        let live = vec![node("a", 0, 10), node("b", 0, 10)];
        let first = placement.pick(&live).unwrap().0;
        let second = placement.pick(&live).unwrap().0;
        let third = placement.pick(&live).unwrap().0;
        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn least_load_picks_lowest_ratio() {
        let placement = Placement::new(SelectionStrategy::LeastLoad);
        let live = vec![node("busy", 8, 10), node("idle", 1, 10)];
        let (picked, _) = placement.pick(&live).unwrap();
        assert_eq!(picked, "idle");
    }

    #[test]
    fn least_load_rejects_when_all_saturated() {
        let placement = Placement::new(SelectionStrategy::LeastLoad);
        let live = vec![node("full-a", 10, 10), node("full-b", 5, 5)];
        assert!(placement.pick(&live).is_none());
    }
}
