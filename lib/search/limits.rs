use shakmaty::uci::UciMove;
use std::time::Duration;

/// The limits under which a search runs.
///
/// All restrictions apply simultaneously; the search stops when the first
/// one is reached. An empty set of limits means the search runs until it
/// is told to stop.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Limits {
    /// The maximum number of plies to search.
    pub depth: Option<i32>,

    /// The maximum number of nodes to search.
    pub nodes: Option<u64>,

    /// The exact amount of time to spend searching.
    pub move_time: Option<Duration>,

    /// The remaining clock time of the side to move.
    pub time: Option<Duration>,

    /// The increment per move of the side to move.
    pub increment: Option<Duration>,

    /// The number of moves to the next time control.
    pub moves_to_go: Option<u32>,

    /// Restricts the search to these root moves.
    pub search_moves: Vec<UciMove>,

    /// Whether the search runs in ponder mode.
    pub ponder: bool,

    /// Whether the search runs until explicitly stopped.
    pub infinite: bool,

    /// A request to search for a mate in this many moves.
    pub mate: Option<u32>,
}

impl Limits {
    /// Unrestricted limits.
    #[inline(always)]
    pub fn none() -> Self {
        Self::default()
    }

    /// Limits with only a depth restriction.
    #[inline(always)]
    pub fn depth(depth: i32) -> Self {
        Self {
            depth: Some(depth),
            ..Self::default()
        }
    }

    /// Limits with only a node count restriction.
    #[inline(always)]
    pub fn nodes(nodes: u64) -> Self {
        Self {
            nodes: Some(nodes),
            ..Self::default()
        }
    }

    /// Limits with only a movetime restriction.
    #[inline(always)]
    pub fn move_time(time: Duration) -> Self {
        Self {
            move_time: Some(time),
            ..Self::default()
        }
    }

    /// Limits playing with the given clock and increment.
    #[inline(always)]
    pub fn clock(time: Duration, increment: Duration) -> Self {
        Self {
            time: Some(time),
            increment: Some(increment),
            ..Self::default()
        }
    }

    /// Whether the clock drives the stop decision.
    #[inline(always)]
    pub fn use_time_management(&self) -> bool {
        !self.infinite
            && self.time.is_some()
            && self.move_time.is_none()
            && self.depth.is_none()
            && self.nodes.is_none()
    }

    /// The effective maximum depth, in plies.
    #[inline(always)]
    pub fn max_depth(&self) -> i32 {
        self.depth.unwrap_or(crate::search::PLY_MAX)
    }

    /// The effective maximum number of nodes.
    #[inline(always)]
    pub fn max_nodes(&self) -> u64 {
        self.nodes.unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::PLY_MAX;

    #[test]
    fn default_limits_are_unrestricted() {
        let limits = Limits::none();
        assert_eq!(limits.max_depth(), PLY_MAX);
        assert_eq!(limits.max_nodes(), u64::MAX);
        assert!(!limits.use_time_management());
    }

    #[test]
    fn clock_limits_enable_time_management() {
        let limits = Limits::clock(Duration::from_secs(60), Duration::from_secs(1));
        assert!(limits.use_time_management());
    }

    #[test]
    fn explicit_limits_disable_time_management() {
        let mut limits = Limits::clock(Duration::from_secs(60), Duration::ZERO);
        limits.depth = Some(8);
        assert!(!limits.use_time_management());
        assert_eq!(limits.max_depth(), 8);
    }

    #[test]
    fn infinite_disables_time_management() {
        let mut limits = Limits::clock(Duration::from_secs(60), Duration::ZERO);
        limits.infinite = true;
        assert!(!limits.use_time_management());
    }
}
