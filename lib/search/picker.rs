use crate::chess::Position;
use crate::eval::piece_value;
use crate::search::{Depth, History};
use arrayvec::ArrayVec;
use shakmaty::{Move, Role, Square};

type Scored = ArrayVec<(Move, i32), 256>;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Stage {
    TtMove,
    GoodCaptures,
    Killers,
    Quiets,
    BadCaptures,
    Flat,
    Done,
}

/// Picks one move at a time, most promising first.
///
/// The main line staging is: table move, winning captures, killers,
/// quiet moves ordered by history, losing captures. Evasions, the
/// quiescence move set and the ProbCut capture set collapse into a
/// single pre-ordered stage.
#[derive(Debug)]
pub struct MovePicker {
    stage: Stage,
    tt_move: Option<Move>,
    killers: [Option<Move>; 2],
    good: Scored,
    quiets: Scored,
    bad: Scored,
    flat: Scored,
    idx: usize,
    killer_idx: usize,
}

fn capture_score(m: Move) -> i32 {
    let victim = match m {
        Move::EnPassant { .. } => piece_value(Role::Pawn),
        _ => m.capture().map_or(0, piece_value),
    };

    let promotion = match m.promotion() {
        Some(Role::Queen) => piece_value(Role::Queen),
        _ => 0,
    };

    victim + promotion - m.role() as i32
}

fn sort_desc(list: &mut Scored) {
    list.sort_unstable_by_key(|&(_, score)| -score);
}

impl MovePicker {
    fn empty(tt_move: Option<Move>) -> Self {
        MovePicker {
            stage: Stage::TtMove,
            tt_move,
            killers: [None; 2],
            good: ArrayVec::new(),
            quiets: ArrayVec::new(),
            bad: ArrayVec::new(),
            flat: ArrayVec::new(),
            idx: 0,
            killer_idx: 0,
        }
    }

    /// A picker for the main search at a node.
    pub fn main(
        pos: &Position,
        tt_move: Option<Move>,
        history: &History,
        killers: [Option<Move>; 2],
    ) -> Self {
        if pos.in_check() {
            return Self::evasions(pos, tt_move, history);
        }

        let mut picker = Self::empty(tt_move);
        let turn = pos.turn();

        for m in pos.legal_moves() {
            if pos.is_capture_or_promotion(m) {
                let scored = (m, capture_score(m));
                if pos.see_sign(m) >= 0 {
                    let _ = picker.good.try_push(scored);
                } else {
                    let _ = picker.bad.try_push(scored);
                }
            } else {
                let _ = picker.quiets.try_push((m, history.get(turn, m)));
            }
        }

        sort_desc(&mut picker.good);
        sort_desc(&mut picker.quiets);
        sort_desc(&mut picker.bad);

        for killer in killers {
            let valid = killer
                .filter(|&k| Some(k) != tt_move)
                .filter(|&k| picker.quiets.iter().any(|&(m, _)| m == k));

            if let Some(k) = valid {
                picker.killers[picker.killer_idx] = Some(k);
                picker.killer_idx += 1;
            }
        }

        picker.killer_idx = 0;
        picker
    }

    fn evasions(pos: &Position, tt_move: Option<Move>, history: &History) -> Self {
        let mut picker = Self::empty(None);
        let turn = pos.turn();

        for m in pos.legal_moves() {
            let score = if Some(m) == tt_move {
                i32::MAX
            } else if pos.is_capture(m) {
                capture_score(m) + (1 << 20)
            } else {
                history.get(turn, m)
            };

            let _ = picker.flat.try_push((m, score));
        }

        sort_desc(&mut picker.flat);
        picker.stage = Stage::Flat;
        picker
    }

    /// A picker for the quiescence search.
    ///
    /// Yields captures and queen promotions, checks when the depth still
    /// allows them, and only recaptures once far beyond the horizon.
    pub fn quiescence(
        pos: &Position,
        tt_move: Option<Move>,
        history: &History,
        depth: Depth,
        recapture: Option<Square>,
    ) -> Self {
        if pos.in_check() {
            return Self::evasions(pos, tt_move, history);
        }

        let mut picker = Self::empty(None);
        let with_checks = depth >= Depth::QS_CHECKS;
        let recaptures_only = depth < Depth::QS_RECAPTURES;

        for m in pos.legal_moves() {
            let tactical = m.is_capture() || m.promotion() == Some(Role::Queen);

            let keep = if recaptures_only {
                m.is_capture() && Some(m.to()) == recapture
            } else {
                tactical || (with_checks && pos.gives_check(m))
            };

            if keep {
                let score = if Some(m) == tt_move {
                    i32::MAX
                } else if tactical {
                    capture_score(m)
                } else {
                    history.get(pos.turn(), m)
                };

                let _ = picker.flat.try_push((m, score));
            }
        }

        sort_desc(&mut picker.flat);
        picker.stage = Stage::Flat;
        picker
    }

    /// A picker for the ProbCut search: captures winning more than a
    /// threshold according to static exchange evaluation.
    pub fn probcut(pos: &Position, tt_move: Option<Move>, threshold: i32) -> Self {
        let mut picker = Self::empty(None);

        for m in pos.legal_moves() {
            if pos.is_capture(m) && pos.see(m) > threshold {
                let score = if Some(m) == tt_move {
                    i32::MAX
                } else {
                    capture_score(m)
                };

                let _ = picker.flat.try_push((m, score));
            }
        }

        sort_desc(&mut picker.flat);
        picker.stage = Stage::Flat;
        picker
    }

    fn is_killer(&self, m: Move) -> bool {
        self.killers[0] == Some(m) || self.killers[1] == Some(m)
    }

    /// The next most promising move, if any remain.
    pub fn next(&mut self) -> Option<Move> {
        loop {
            match self.stage {
                Stage::TtMove => {
                    self.stage = Stage::GoodCaptures;
                    self.idx = 0;

                    if let Some(m) = self.tt_move {
                        return Some(m);
                    }
                }

                Stage::GoodCaptures => match self.good.get(self.idx) {
                    Some(&(m, _)) => {
                        self.idx += 1;
                        if Some(m) != self.tt_move {
                            return Some(m);
                        }
                    }
                    None => {
                        self.stage = Stage::Killers;
                        self.killer_idx = 0;
                    }
                },

                Stage::Killers => match self.killers.get(self.killer_idx) {
                    Some(&Some(m)) => {
                        self.killer_idx += 1;
                        return Some(m);
                    }
                    Some(&None) => self.killer_idx += 1,
                    None => {
                        self.stage = Stage::Quiets;
                        self.idx = 0;
                    }
                },

                Stage::Quiets => match self.quiets.get(self.idx) {
                    Some(&(m, _)) => {
                        self.idx += 1;
                        if Some(m) != self.tt_move && !self.is_killer(m) {
                            return Some(m);
                        }
                    }
                    None => {
                        self.stage = Stage::BadCaptures;
                        self.idx = 0;
                    }
                },

                Stage::BadCaptures => match self.bad.get(self.idx) {
                    Some(&(m, _)) => {
                        self.idx += 1;
                        if Some(m) != self.tt_move {
                            return Some(m);
                        }
                    }
                    None => self.stage = Stage::Done,
                },

                Stage::Flat => match self.flat.get(self.idx) {
                    Some(&(m, _)) => {
                        self.idx += 1;
                        return Some(m);
                    }
                    None => self.stage = Stage::Done,
                },

                Stage::Done => return None,
            }
        }
    }
}
