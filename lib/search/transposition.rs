use crate::search::{Depth, Score};
use shakmaty::Move;

/// Whether a transposed score is exact or a one-sided bound.
///
/// Lower and upper are independent bits so that an exact score carries
/// both; probing code tests the side it needs.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(test, derive(test_strategy::Arbitrary))]
#[repr(u8)]
pub enum Bound {
    #[default]
    None = 0,
    Lower = 1,
    Upper = 2,
    Exact = 3,
}

impl Bound {
    #[inline(always)]
    pub fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            1 => Bound::Lower,
            2 => Bound::Upper,
            3 => Bound::Exact,
            _ => Bound::None,
        }
    }

    /// Whether the score is a valid lower bound.
    #[inline(always)]
    pub fn is_lower(&self) -> bool {
        *self as u8 & Bound::Lower as u8 != 0
    }

    /// Whether the score is a valid upper bound.
    #[inline(always)]
    pub fn is_upper(&self) -> bool {
        *self as u8 & Bound::Upper as u8 != 0
    }
}

/// A compact encoding of a move's geometry.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(test, derive(test_strategy::Arbitrary))]
pub struct MoveCode(u16);

impl MoveCode {
    pub const NONE: Self = MoveCode(0);

    #[inline(always)]
    pub fn new(m: Move) -> Self {
        let from = m.from().map_or(0, |sq| sq as u16);
        let to = m.to() as u16;
        let promotion = m.promotion().map_or(0, |r| r as u16);
        MoveCode(from | to << 6 | promotion << 12)
    }

    #[inline(always)]
    pub fn from_bits(bits: u16) -> Self {
        MoveCode(bits)
    }

    #[inline(always)]
    pub fn bits(&self) -> u16 {
        self.0
    }

    /// Whether this code denotes a move at all.
    #[inline(always)]
    pub fn is_some(&self) -> bool {
        self.0 != 0
    }

    /// Whether this code denotes the given move.
    #[inline(always)]
    pub fn matches(&self, m: Move) -> bool {
        self.is_some() && *self == Self::new(m)
    }

    /// Resolves this code against a list of legal moves.
    #[inline(always)]
    pub fn resolve<'a, I: IntoIterator<Item = &'a Move>>(&self, moves: I) -> Option<Move> {
        if !self.is_some() {
            return None;
        }

        moves.into_iter().cloned().find(|m| self.matches(m.clone()))
    }
}

/// A partial search result cached in the transposition table.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Transposition {
    mv: MoveCode,
    value: Score,
    bound: Bound,
    depth: Depth,
    eval: Option<Score>,
    margin: Score,
}

impl Transposition {
    #[inline(always)]
    pub fn new(
        mv: MoveCode,
        value: Score,
        bound: Bound,
        depth: Depth,
        eval: Option<Score>,
        margin: Score,
    ) -> Self {
        Transposition {
            mv,
            value,
            bound,
            depth,
            eval,
            margin,
        }
    }

    /// The best move found, as stored.
    #[inline(always)]
    pub fn best(&self) -> MoveCode {
        self.mv
    }

    /// The stored score, normalized relative to the entry.
    #[inline(always)]
    pub fn value(&self) -> Score {
        self.value
    }

    /// The kind of bound the stored score represents.
    #[inline(always)]
    pub fn bound(&self) -> Bound {
        self.bound
    }

    /// The depth the entry was searched to.
    #[inline(always)]
    pub fn depth(&self) -> Depth {
        self.depth
    }

    /// The cached static evaluation, absent when the position was in check.
    #[inline(always)]
    pub fn eval(&self) -> Option<Score> {
        self.eval
    }

    /// The cached static evaluation margin.
    #[inline(always)]
    pub fn margin(&self) -> Score {
        self.margin
    }

    /// Whether this entry terminates the search of a node.
    ///
    /// Mate band scores cut off regardless of the entry's depth since
    /// they are final; everything else requires sufficient depth and a
    /// bound on the right side of beta.
    #[inline(always)]
    pub fn can_cutoff(&self, depth: Depth, beta: Score, ply: i32) -> bool {
        let v = self.value.from_tt(ply);

        (self.depth >= depth
            || v >= Score::MATE_IN_MAX.max(beta)
            || v < Score::MATED_IN_MAX.min(beta))
            && ((self.bound.is_lower() && v >= beta) || (self.bound.is_upper() && v < beta))
    }

    /// Refines a static evaluation with the stored bound.
    #[inline(always)]
    pub fn refine_eval(&self, eval: Score, ply: i32) -> Score {
        let v = self.value.from_tt(ply);

        if (self.bound.is_lower() && v >= eval) || (self.bound.is_upper() && v < eval) {
            v
        } else {
            eval
        }
    }

    const EVAL_NONE: i16 = i16::MIN;

    #[inline(always)]
    pub(super) fn to_bits(self) -> u64 {
        let eval = self.eval.map_or(Self::EVAL_NONE, |e| e.get() as i16);

        self.mv.bits() as u64
            | (self.value.get() as i16 as u16 as u64) << 16
            | (eval as u16 as u64) << 32
            | (self.margin.get() as i16 as u16 as u64) << 48
    }

    #[inline(always)]
    pub(super) fn from_bits(data: u64, depth: Depth, bound: Bound) -> Self {
        let eval = (data >> 32) as u16 as i16;

        Transposition {
            mv: MoveCode::from_bits(data as u16),
            value: Score::new((data >> 16) as u16 as i16 as i32),
            bound,
            depth,
            eval: (eval != Self::EVAL_NONE).then(|| Score::new(eval as i32)),
            margin: Score::new((data >> 48) as u16 as i16 as i32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::Position;
    use test_strategy::proptest;

    #[test]
    fn move_codes_resolve_against_legal_moves() {
        let pos = Position::default();
        let moves = pos.legal_moves();
        let m = moves[7];

        let code = MoveCode::new(m);
        assert!(code.matches(m));
        assert_eq!(code.resolve(&moves), Some(m));
        assert_eq!(MoveCode::NONE.resolve(&moves), None);
    }

    #[proptest]
    fn bound_bits_round_trip(b: Bound) {
        assert_eq!(Bound::from_bits(b as u8), b);
    }

    #[proptest]
    fn entry_bits_round_trip(
        mv: MoveCode,
        #[strategy(-30000i32..=30000)] v: i32,
        b: Bound,
        #[strategy(-254i32..=200)] d: i32,
        #[strategy(-10000i32..=10000)] e: i32,
        eval_present: bool,
    ) {
        let entry = Transposition::new(
            mv,
            Score::new(v),
            b,
            Depth::new(d),
            eval_present.then(|| Score::new(e)),
            Score::DRAW,
        );

        let decoded = Transposition::from_bits(entry.to_bits(), Depth::new(d), b);
        assert_eq!(decoded, entry);
    }

    #[test]
    fn deep_lower_bounds_cut_off_above_beta() {
        let entry = Transposition::new(
            MoveCode::NONE,
            Score::new(100),
            Bound::Lower,
            Depth::from_plies(10),
            None,
            Score::DRAW,
        );

        assert!(entry.can_cutoff(Depth::from_plies(5), Score::new(50), 0));
        assert!(!entry.can_cutoff(Depth::from_plies(5), Score::new(150), 0));
        assert!(!entry.can_cutoff(Depth::from_plies(20), Score::new(50), 0));
    }

    #[test]
    fn mate_scores_cut_off_regardless_of_depth() {
        let entry = Transposition::new(
            MoveCode::NONE,
            Score::mate_in(3),
            Bound::Lower,
            Depth::ZERO,
            None,
            Score::DRAW,
        );

        assert!(entry.can_cutoff(Depth::from_plies(40), Score::new(50), 0));
    }

    #[test]
    fn refine_eval_respects_the_bound_side() {
        let lower = Transposition::new(
            MoveCode::NONE,
            Score::new(200),
            Bound::Lower,
            Depth::ZERO,
            None,
            Score::DRAW,
        );

        assert_eq!(lower.refine_eval(Score::new(100), 0), Score::new(200));
        assert_eq!(lower.refine_eval(Score::new(300), 0), Score::new(300));

        let upper = Transposition::new(
            MoveCode::NONE,
            Score::new(-50),
            Bound::Upper,
            Depth::ZERO,
            None,
            Score::DRAW,
        );

        assert_eq!(upper.refine_eval(Score::new(100), 0), Score::new(-50));
        assert_eq!(upper.refine_eval(Score::new(-100), 0), Score::new(-100));
    }
}
