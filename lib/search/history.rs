use crate::search::Depth;
use shakmaty::{Color, Move, Role, Square};
use std::array;
use std::sync::atomic::{AtomicI32, Ordering::Relaxed};

/// The cap on accumulated history bonuses.
const HISTORY_MAX: i32 = 2000;

/// Historical statistics about quiet moves.
///
/// Indexed by moving piece and destination square. The tables are shared
/// by all workers and written without synchronization; the heuristics
/// tolerate the resulting score fluctuations.
#[derive(Debug)]
pub struct History {
    score: [[AtomicI32; 64]; 12],
    gain: [[AtomicI32; 64]; 12],
}

impl Default for History {
    fn default() -> Self {
        History {
            score: array::from_fn(|_| array::from_fn(|_| AtomicI32::new(0))),
            gain: array::from_fn(|_| array::from_fn(|_| AtomicI32::new(0))),
        }
    }
}

#[inline(always)]
fn index(color: Color, role: Role) -> usize {
    (color as usize) * 6 + role as usize - 1
}

impl History {
    /// Forgets all accumulated statistics.
    pub fn clear(&self) {
        for table in [&self.score, &self.gain] {
            for row in table {
                for cell in row {
                    cell.store(0, Relaxed);
                }
            }
        }
    }

    /// The accumulated score of a move.
    #[inline(always)]
    pub fn get(&self, color: Color, m: Move) -> i32 {
        self.score[index(color, m.role())][m.to() as usize].load(Relaxed)
    }

    /// Registers a cut-off bonus or a failure malus for a move.
    #[inline(always)]
    pub fn update(&self, color: Color, m: Move, bonus: i32) {
        let cell = &self.score[index(color, m.role())][m.to() as usize];
        let value = cell.load(Relaxed);

        if (value + bonus).abs() < HISTORY_MAX {
            cell.store(value + bonus, Relaxed);
        }
    }

    /// The largest static evaluation swing this move has produced.
    #[inline(always)]
    pub fn gain(&self, color: Color, role: Role, to: Square) -> i32 {
        self.gain[index(color, role)][to as usize].load(Relaxed)
    }

    /// Updates the gain statistic with a new evaluation swing.
    #[inline(always)]
    pub fn update_gain(&self, color: Color, role: Role, to: Square, delta: i32) {
        let cell = &self.gain[index(color, role)][to as usize];
        let value = cell.load(Relaxed);
        cell.store(delta.max(value - 1), Relaxed);
    }

    /// The bonus a cut-off at this depth is worth.
    #[inline(always)]
    pub fn bonus(depth: Depth) -> i32 {
        let d = depth.get();
        d * d
    }
}
