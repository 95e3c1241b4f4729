use crate::search::Limits;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::time::Duration;

// Plan time management at most this many moves ahead.
const MOVE_HORIZON: u32 = 50;

// When in trouble, we can step over the reserved time with this ratio.
const MAX_RATIO: f64 = 7.3;

// But we must not steal time from the remaining moves over this ratio.
const STEAL_RATIO: f64 = 0.34;

const MIN_THINK_TIME: u64 = 20;
const MOVE_OVERHEAD: u64 = 30;

// importance() is a skew-logistic function based on naive statistical
// analysis of "how many games are still undecided after n half moves".
fn importance(ply: i32) -> f64 {
    const XSCALE: f64 = 6.85;
    const XSHIFT: f64 = 64.5;
    const SKEW: f64 = 0.171;

    (1.0 + ((ply as f64 - XSHIFT) / XSCALE).exp()).powf(-SKEW) + f64::MIN_POSITIVE
}

fn remaining(my_time: u64, movestogo: u32, ply: i32, steal: bool) -> u64 {
    let max_ratio = if steal { MAX_RATIO } else { 1.0 };
    let steal_ratio = if steal { STEAL_RATIO } else { 0.0 };

    let move_importance = importance(ply);
    let mut other_moves_importance = 0.0;

    for i in 1..movestogo as i32 {
        other_moves_importance += importance(ply + 2 * i);
    }

    let ratio1 =
        (max_ratio * move_importance) / (max_ratio * move_importance + other_moves_importance);
    let ratio2 = (move_importance + steal_ratio * other_moves_importance)
        / (move_importance + other_moves_importance);

    (my_time as f64 * ratio1.min(ratio2)) as u64
}

/// Allocates thinking time for one search.
///
/// Computes an optimum and a hard maximum budget from the clock, the
/// increment and the moves to the next time control; the optimum grows
/// while the best move is unstable.
#[derive(Debug)]
pub struct TimeManager {
    optimum: u64,
    maximum: u64,
    extra: AtomicU64,
}

impl TimeManager {
    /// Plans the time budget for a search starting at game ply `ply`.
    pub fn new(limits: &Limits, ply: i32) -> Self {
        let time = limits.time.map_or(0, |t| t.as_millis() as u64);
        let increment = limits.increment.map_or(0, |t| t.as_millis() as u64);

        let mut optimum = time.max(MIN_THINK_TIME);
        let mut maximum = optimum;

        let max_mtg = limits.moves_to_go.map_or(MOVE_HORIZON, |mtg| {
            mtg.clamp(1, MOVE_HORIZON)
        });

        // Pick the minimum over all hypothetical "moves to go" horizons;
        // usually the longest horizon yields it.
        for mtg in 1..=max_mtg {
            let budget = (time + increment * (mtg as u64 - 1))
                .saturating_sub(MOVE_OVERHEAD * (2 + mtg.min(40) as u64));

            let t1 = MIN_THINK_TIME + remaining(budget, mtg, ply, false);
            let t2 = MIN_THINK_TIME + remaining(budget, mtg, ply, true);

            optimum = optimum.min(t1);
            maximum = maximum.min(t2);
        }

        if limits.ponder {
            optimum += optimum / 4;
        }

        TimeManager {
            optimum,
            maximum,
            extra: AtomicU64::new(0),
        }
    }

    /// Grows the budget when the best move keeps changing.
    pub fn pv_instability(&self, changes_now: u32, changes_prev: u32) {
        let extra = changes_now as u64 * (self.optimum / 2) + changes_prev as u64 * (self.optimum / 3);
        self.extra.store(extra, Relaxed);
    }

    /// The time the search should aim to consume.
    pub fn available_time(&self) -> Duration {
        Duration::from_millis(self.optimum + self.extra.load(Relaxed))
    }

    /// The hard ceiling on search time.
    pub fn maximum_time(&self) -> Duration {
        Duration::from_millis(self.maximum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budgets_are_bounded_by_the_clock() {
        let limits = Limits::clock(Duration::from_secs(60), Duration::ZERO);
        let tm = TimeManager::new(&limits, 0);

        assert!(tm.available_time() <= Duration::from_secs(60));
        assert!(tm.available_time() <= tm.maximum_time());
    }

    #[test]
    fn increment_raises_the_budget() {
        let poor = TimeManager::new(&Limits::clock(Duration::from_secs(10), Duration::ZERO), 20);
        let rich = TimeManager::new(
            &Limits::clock(Duration::from_secs(10), Duration::from_secs(1)),
            20,
        );

        assert!(rich.available_time() >= poor.available_time());
    }

    #[test]
    fn instability_extends_the_optimum_budget() {
        let limits = Limits::clock(Duration::from_secs(60), Duration::ZERO);
        let tm = TimeManager::new(&limits, 0);
        let before = tm.available_time();

        let ceiling = tm.maximum_time();
        tm.pv_instability(2, 1);
        assert!(tm.available_time() > before);
        assert_eq!(tm.maximum_time(), ceiling);
    }

    #[test]
    fn few_moves_to_go_concentrate_the_budget() {
        let mut sudden_death = Limits::clock(Duration::from_secs(60), Duration::ZERO);
        let mut last_move = sudden_death.clone();
        sudden_death.moves_to_go = None;
        last_move.moves_to_go = Some(1);

        let spread = TimeManager::new(&sudden_death, 0);
        let all_in = TimeManager::new(&last_move, 0);
        assert!(all_in.available_time() >= spread.available_time());
    }
}
