use crate::search::{Depth, Score, ONE_PLY};
use once_cell::sync::Lazy;

/// Maximum depth at which razoring applies.
pub const RAZOR_DEPTH: Depth = Depth::new(4 * Depth::GRAIN);

/// Maximum depth for dynamic threat detection after a failed null search.
pub const THREAT_DEPTH: Depth = Depth::new(5 * Depth::GRAIN);

/// Minimum depth for internal iterative deepening, by node kind.
pub const IID_DEPTH: [Depth; 2] = [
    Depth::new(8 * Depth::GRAIN),
    Depth::new(5 * Depth::GRAIN),
];

/// At non-PV nodes internal iterative deepening requires the static
/// evaluation to be at most this far below beta.
pub const IID_MARGIN: Score = Score::new(0x100);

/// Minimum depth for the singular extension search, by node kind.
pub const SINGULAR_DEPTH: [Depth; 2] = [
    Depth::new(8 * Depth::GRAIN),
    Depth::new(6 * Depth::GRAIN),
];

/// Futility margin used by the quiescence search.
pub const FUTILITY_MARGIN_QS: Score = Score::new(0x80);

/// An easy move candidate must beat the second best move by this much.
pub const EASY_MOVE_MARGIN: Score = Score::new(0x200);

/// Extension granted for checking moves, by node kind.
pub const CHECK_EXTENSION: [Depth; 2] = [Depth::new(Depth::GRAIN / 2), ONE_PLY];

/// Extension granted for entering a pure pawn endgame, by node kind.
pub const PAWN_ENDGAME_EXTENSION: [Depth; 2] = [ONE_PLY, ONE_PLY];

/// Extension granted for a pawn push to the seventh rank, by node kind.
pub const PAWN_PUSH_TO_7TH_EXTENSION: [Depth; 2] =
    [Depth::new(Depth::GRAIN / 2), Depth::new(Depth::GRAIN / 2)];

/// Extension granted for creating a passed pawn, by node kind.
pub const PASSED_PAWN_EXTENSION: [Depth; 2] = [Depth::ZERO, Depth::new(Depth::GRAIN / 2)];

/// Dynamic razoring margin.
#[inline(always)]
pub fn razor_margin(depth: Depth) -> Score {
    Score::new(0x200 + 0x10 * depth.get())
}

static FUTILITY_MARGINS: Lazy<[[i32; 64]; 16]> = Lazy::new(|| {
    let mut margins = [[0; 64]; 16];

    for (d, row) in margins.iter_mut().enumerate().skip(1) {
        for (mc, margin) in row.iter_mut().enumerate() {
            let base = ((d * d) as f64 / 2.0).log2() + 1.001;
            *margin = 112 * base as i32 - 8 * mc as i32 + 45;
        }
    }

    margins
});

static FUTILITY_MOVE_COUNTS: Lazy<[usize; 32]> = Lazy::new(|| {
    let mut counts = [0; 32];

    for (d, count) in counts.iter_mut().enumerate() {
        *count = (3.001 + 0.25 * (d as f64).powi(2)) as usize;
    }

    counts
});

static REDUCTIONS: Lazy<[[[i32; 64]; 64]; 2]> = Lazy::new(|| {
    let mut reductions = [[[0; 64]; 64]; 2];

    for hd in 1..64 {
        for mc in 1..64 {
            let pv = (hd as f64).ln() * (mc as f64).ln() / 3.0;
            let non_pv = 0.33 + (hd as f64).ln() * (mc as f64).ln() / 2.25;

            reductions[1][hd][mc] = if pv >= 1.0 {
                (pv * Depth::GRAIN as f64) as i32
            } else {
                0
            };

            reductions[0][hd][mc] = if non_pv >= 1.0 {
                (non_pv * Depth::GRAIN as f64) as i32
            } else {
                0
            };
        }
    }

    reductions
});

/// The futility margin at a given depth and move count.
#[inline(always)]
pub fn futility_margin(depth: Depth, move_count: usize) -> Score {
    if depth < Depth::from_plies(7) {
        let d = depth.get().max(1) as usize;
        Score::new(FUTILITY_MARGINS[d.min(15)][move_count.min(63)])
    } else {
        Score::INFINITE + Score::INFINITE.get()
    }
}

/// The number of moves after which move count based pruning kicks in.
#[inline(always)]
pub fn futility_move_count(depth: Depth) -> usize {
    if depth < Depth::from_plies(16) {
        FUTILITY_MOVE_COUNTS[depth.get().max(0) as usize]
    } else {
        usize::MAX
    }
}

/// The late move reduction at a given depth and move count.
#[inline(always)]
pub fn reduction(pv: bool, depth: Depth, move_count: usize) -> Depth {
    let hd = (depth.get() / Depth::GRAIN).clamp(0, 63) as usize;
    Depth::new(REDUCTIONS[pv as usize][hd][move_count.min(63)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn razor_margin_grows_with_depth() {
        assert!(razor_margin(Depth::from_plies(3)) > razor_margin(ONE_PLY));
        assert_eq!(razor_margin(Depth::ZERO), Score::new(0x200));
    }

    #[test]
    fn futility_margin_shrinks_with_move_count() {
        let d = Depth::from_plies(2);
        assert!(futility_margin(d, 0) > futility_margin(d, 10));
    }

    #[test]
    fn futility_margin_is_infinite_at_high_depths() {
        assert!(futility_margin(Depth::from_plies(7), 0) > Score::INFINITE);
    }

    #[test]
    fn futility_move_count_grows_quadratically() {
        assert_eq!(futility_move_count(Depth::ZERO), 3);
        assert!(futility_move_count(Depth::from_plies(4)) > 16);
    }

    #[test]
    fn reductions_grow_with_depth_and_move_count() {
        let shallow = reduction(false, Depth::from_plies(4), 4);
        let deep = reduction(false, Depth::from_plies(24), 24);
        assert!(deep > shallow);
        assert!(shallow >= Depth::ZERO);
    }

    #[test]
    fn pv_nodes_are_reduced_less_than_others() {
        let d = Depth::from_plies(12);
        assert!(reduction(true, d, 20) <= reduction(false, d, 20));
    }
}
