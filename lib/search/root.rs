use crate::chess::Position;
use crate::eval::evaluate;
use crate::search::{Bound, MoveCode, Score, TranspositionTable, PLY_MAX};
use shakmaty::{uci::UciMove, Move};

/// A candidate move at the root of the search tree.
///
/// The principal variation doubles as a refutation line for moves that
/// fail low. Moves that are not the current principal variation carry a
/// score of negative infinity, so that stable sorting leaves their
/// relative order untouched.
#[derive(Debug, Clone)]
pub struct RootMove {
    pub pv: Vec<Move>,
    pub score: Score,
    pub prev_score: Score,
    pub nodes: u64,
}

impl RootMove {
    fn new(m: Move) -> Self {
        RootMove {
            pv: vec![m],
            score: -Score::INFINITE,
            prev_score: -Score::INFINITE,
            nodes: 0,
        }
    }

    /// The move itself.
    #[inline(always)]
    pub fn head(&self) -> Move {
        self.pv[0].clone()
    }

    /// The reply the engine expects, if the line is long enough.
    #[inline(always)]
    pub fn ponder(&self) -> Option<Move> {
        self.pv.get(1).cloned()
    }
}

/// The ordered list of root moves.
#[derive(Debug, Clone, Default)]
pub struct RootMoves {
    moves: Vec<RootMove>,
    pub best_move_changes: u32,
}

impl RootMoves {
    /// Collects the legal root moves, keeping only those listed in
    /// `search_moves` when the restriction is present.
    pub fn init(pos: &Position, search_moves: &[UciMove]) -> Self {
        let moves = pos
            .legal_moves()
            .into_iter()
            .filter(|m| search_moves.is_empty() || search_moves.contains(&pos.uci(m.clone())))
            .map(RootMove::new)
            .collect();

        RootMoves {
            moves,
            best_move_changes: 0,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.moves.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    #[inline(always)]
    pub fn get(&self, idx: usize) -> &RootMove {
        &self.moves[idx]
    }

    #[inline(always)]
    pub fn get_mut(&mut self, idx: usize) -> &mut RootMove {
        &mut self.moves[idx]
    }

    /// The position of a move in the list, searching from `from` on.
    #[inline(always)]
    pub fn find(&self, m: Move, from: usize) -> Option<usize> {
        self.moves[from..]
            .iter()
            .position(|rm| rm.head() == m)
            .map(|i| i + from)
    }

    /// Remembers the scores of the previous iteration.
    pub fn snapshot_prev_scores(&mut self) {
        for rm in &mut self.moves {
            rm.prev_score = rm.score;
        }
    }

    /// Sorts the tail of the list descending by score.
    ///
    /// Sorting is stable so the moves scored negative infinity keep
    /// their relative order and only the newly elevated best move rises.
    pub fn sort_from(&mut self, from: usize) {
        self.moves[from..].sort_by(|a, b| b.score.cmp(&a.score));
    }

    /// Sorts the already searched multipv lines descending by score.
    pub fn sort_prefix(&mut self, end: usize) {
        self.moves[..end].sort_by(|a, b| b.score.cmp(&a.score));
    }

    /// Rebuilds a root move's principal variation from the table.
    pub fn extract_pv_from_tt(&mut self, idx: usize, pos: &mut Position, tt: &TranspositionTable) {
        let head = self.moves[idx].head();
        let mut pv = vec![head.clone()];

        pos.do_move(head);

        while let Some(m) = tt
            .probe(pos.key())
            .map(|t| t.best())
            .and_then(|code| code.resolve(&pos.legal_moves()))
        {
            if pv.len() as i32 >= PLY_MAX || (pos.is_draw(false) && pv.len() >= 2) {
                break;
            }

            pv.push(m.clone());
            pos.do_move(m);
        }

        for _ in 0..pv.len() {
            pos.undo_move();
        }

        self.moves[idx].pv = pv;
    }

    /// Seeds the table with a root move's principal variation, so the
    /// line is searched first even if its entries have been replaced.
    pub fn insert_pv_in_tt(&self, idx: usize, pos: &mut Position, tt: &TranspositionTable) {
        let pv = &self.moves[idx].pv;

        for m in pv {
            let m = m.clone();
            let overwrite = match tt.probe(pos.key()) {
                None => true,
                Some(t) => !t.best().matches(m.clone()),
            };

            if overwrite {
                let (eval, margin) = if pos.in_check() {
                    (None, Score::DRAW)
                } else {
                    let (value, margin_val) = evaluate(pos);
                    (Some(value), margin_val)
                };

                tt.store(
                    pos.key(),
                    Score::DRAW,
                    Bound::None,
                    crate::search::Depth::NONE,
                    MoveCode::new(m.clone()),
                    eval,
                    margin,
                );
            }

            pos.do_move(m);
        }

        for _ in 0..pv.len() {
            pos.undo_move();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::HashSize;

    #[test]
    fn init_collects_all_legal_moves() {
        let pos = Position::default();
        let rml = RootMoves::init(&pos, &[]);
        assert_eq!(rml.len(), 20);
    }

    #[test]
    fn search_moves_restrict_the_list() {
        let pos = Position::default();
        let only: UciMove = "e2e4".parse().expect("valid uci");
        let rml = RootMoves::init(&pos, &[only]);

        assert_eq!(rml.len(), 1);
        assert_eq!(pos.uci(rml.get(0).head()), only);
    }

    #[test]
    fn sorting_is_stable_for_unsearched_moves() {
        let pos = Position::default();
        let mut rml = RootMoves::init(&pos, &[]);
        let order: Vec<_> = (0..rml.len()).map(|i| rml.get(i).head()).collect();

        rml.get_mut(rml.len() - 1).score = Score::new(100);
        let best = rml.get(rml.len() - 1).head();
        rml.sort_from(0);

        assert_eq!(rml.get(0).head(), best);
        let rest: Vec<_> = (1..rml.len()).map(|i| rml.get(i).head()).collect();
        let expected: Vec<_> = order.into_iter().filter(|&m| m != best).collect();
        assert_eq!(rest, expected);
    }

    #[test]
    fn pv_round_trips_through_the_table() {
        let mut pos = Position::default();
        let tt = TranspositionTable::new(HashSize::new(1));
        let mut rml = RootMoves::init(&pos, &[]);

        rml.insert_pv_in_tt(0, &mut pos, &tt);
        rml.extract_pv_from_tt(0, &mut pos, &tt);

        assert!(!rml.get(0).pv.is_empty());
        assert_eq!(pos.game_ply(), 0);
    }
}
