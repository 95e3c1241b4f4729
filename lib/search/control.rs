use crate::search::{Limits, TimeManager};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering::Relaxed};
use std::time::{Duration, Instant};

/// Controls the search flow.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ControlFlow {
    /// Keep searching.
    Continue,
    /// Wind down as soon as possible.
    Abort,
}

/// The shared state steering an ongoing search.
///
/// Workers report visited nodes through [`Self::visit`]; the budget
/// checks run on a cadence tuned to the time budget so that a search
/// under time pressure does not lag its deadline.
#[derive(Debug)]
pub struct Control {
    limits: Limits,
    clock: Option<TimeManager>,
    started: Instant,
    nodes: AtomicU64,
    poll_every: u64,
    stop: AtomicBool,
    ponder: AtomicBool,
    stop_on_ponderhit: AtomicBool,
    fail_low: AtomicBool,
    first_root_move: AtomicBool,
    seldepth: AtomicI32,
}

impl Control {
    /// Sets up the control for a new search from game ply `ply`.
    pub fn new(limits: Limits, ply: i32) -> Self {
        let clock = limits
            .use_time_management()
            .then(|| TimeManager::new(&limits, ply));

        let poll_every = match (limits.nodes, limits.move_time) {
            (Some(n), _) => n.clamp(1, 30000),
            (None, Some(t)) if t < Duration::from_secs(1) => 1000,
            (None, Some(t)) if t < Duration::from_secs(5) => 5000,
            _ => 30000,
        };

        Control {
            ponder: AtomicBool::new(limits.ponder),
            limits,
            clock,
            started: Instant::now(),
            nodes: AtomicU64::new(0),
            poll_every,
            stop: AtomicBool::new(false),
            stop_on_ponderhit: AtomicBool::new(false),
            fail_low: AtomicBool::new(false),
            first_root_move: AtomicBool::new(false),
            seldepth: AtomicI32::new(0),
        }
    }

    /// The limits this search runs under.
    #[inline(always)]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// The time manager, present only for clock-driven searches.
    #[inline(always)]
    pub fn clock(&self) -> Option<&TimeManager> {
        self.clock.as_ref()
    }

    /// The time elapsed since the search started.
    #[inline(always)]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// The nodes visited so far.
    #[inline(always)]
    pub fn nodes(&self) -> u64 {
        self.nodes.load(Relaxed)
    }

    /// Counts a visited node and checks the budgets once per polling
    /// interval.
    #[inline(always)]
    pub fn visit(&self) -> ControlFlow {
        let count = self.nodes.fetch_add(1, Relaxed) + 1;

        if count % self.poll_every == 0 {
            self.poll();
        }

        if self.stop.load(Relaxed) {
            ControlFlow::Abort
        } else {
            ControlFlow::Continue
        }
    }

    fn poll(&self) {
        // While pondering the clock is not ours to spend.
        if self.ponder.load(Relaxed) {
            return;
        }

        let elapsed = self.elapsed();

        if let Some(clock) = &self.clock {
            let still_at_first_move = self.first_root_move.load(Relaxed)
                && !self.fail_low.load(Relaxed)
                && elapsed > clock.available_time();

            if elapsed > clock.maximum_time() || still_at_first_move {
                self.stop.store(true, Relaxed);
            }
        }

        if let Some(t) = self.limits.move_time {
            if elapsed >= t {
                self.stop.store(true, Relaxed);
            }
        }

        if let Some(n) = self.limits.nodes {
            if self.nodes() >= n {
                self.stop.store(true, Relaxed);
            }
        }
    }

    /// Whether the search has been told to wind down.
    #[inline(always)]
    pub fn aborted(&self) -> bool {
        self.stop.load(Relaxed)
    }

    /// Requests the search to wind down.
    #[inline(always)]
    pub fn request_stop(&self) {
        self.ponder.store(false, Relaxed);
        self.stop.store(true, Relaxed);
    }

    /// Whether the search is pondering.
    #[inline(always)]
    pub fn pondering(&self) -> bool {
        self.ponder.load(Relaxed)
    }

    /// Leaves ponder mode; the search now owns the clock.
    #[inline(always)]
    pub fn ponderhit(&self) {
        self.ponder.store(false, Relaxed);

        if self.stop_on_ponderhit.load(Relaxed) {
            self.stop.store(true, Relaxed);
        }
    }

    /// Arms or disarms the deferred stop used while pondering.
    #[inline(always)]
    pub fn set_stop_on_ponderhit(&self, value: bool) {
        self.stop_on_ponderhit.store(value, Relaxed);
    }

    /// Records whether the first root move is still being searched.
    #[inline(always)]
    pub fn set_first_root_move(&self, value: bool) {
        self.first_root_move.store(value, Relaxed);
    }

    /// Records an aspiration fail low, delaying the early-stop rules.
    #[inline(always)]
    pub fn set_fail_low(&self, value: bool) {
        self.fail_low.store(value, Relaxed);
    }

    /// Raises the maximum selective depth reached.
    #[inline(always)]
    pub fn update_seldepth(&self, ply: i32) {
        self.seldepth.fetch_max(ply, Relaxed);
    }

    /// The maximum selective depth reached so far.
    #[inline(always)]
    pub fn seldepth(&self) -> i32 {
        self.seldepth.load(Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn counts_visited_nodes() {
        let ctrl = Control::new(Limits::none(), 0);
        assert_eq!(ctrl.nodes(), 0);
        assert_eq!(ctrl.visit(), ControlFlow::Continue);
        assert_eq!(ctrl.nodes(), 1);
    }

    #[test]
    fn aborts_once_the_node_limit_is_reached() {
        let ctrl = Control::new(Limits::nodes(2), 0);
        let mut flow = ControlFlow::Continue;

        for _ in 0..4 {
            flow = ctrl.visit();
        }

        assert_eq!(flow, ControlFlow::Abort);
        assert_eq!(ctrl.visit(), ControlFlow::Abort);
    }

    #[test]
    fn aborts_once_the_move_time_is_up() {
        let ctrl = Control::new(Limits::move_time(Duration::ZERO), 0);
        thread::sleep(Duration::from_millis(1));

        let mut flow = ControlFlow::Continue;
        for _ in 0..2000 {
            flow = ctrl.visit();
        }

        assert_eq!(flow, ControlFlow::Abort);
    }

    #[test]
    fn aborts_upon_request() {
        let ctrl = Control::new(Limits::none(), 0);
        ctrl.request_stop();
        assert_eq!(ctrl.visit(), ControlFlow::Abort);
        assert!(ctrl.aborted());
    }

    #[test]
    fn pondering_suspends_the_budgets() {
        let mut limits = Limits::move_time(Duration::ZERO);
        limits.ponder = true;

        let ctrl = Control::new(limits, 0);
        thread::sleep(Duration::from_millis(1));

        for _ in 0..2000 {
            assert_eq!(ctrl.visit(), ControlFlow::Continue);
        }
    }

    #[test]
    fn ponderhit_triggers_a_deferred_stop() {
        let mut limits = Limits::none();
        limits.ponder = true;

        let ctrl = Control::new(limits, 0);
        ctrl.set_stop_on_ponderhit(true);
        assert!(!ctrl.aborted());

        ctrl.ponderhit();
        assert!(!ctrl.pondering());
        assert!(ctrl.aborted());
    }

    #[test]
    fn seldepth_only_grows() {
        let ctrl = Control::new(Limits::none(), 0);
        ctrl.update_seldepth(5);
        ctrl.update_seldepth(3);
        assert_eq!(ctrl.seldepth(), 5);
    }
}
