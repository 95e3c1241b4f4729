use crate::chess::Position;
use crate::search::Score;
use shakmaty::{Color, Role, Square};

/// Midgame piece values, in the engine's internal units.
const MIDGAME: [i32; 6] = [198, 817, 836, 1270, 2521, 0];

/// Endgame piece values.
const ENDGAME: [i32; 6] = [258, 846, 857, 1278, 2558, 0];

/// The value of a pawn, used to scale scores to centipawns.
pub const PAWN_MID: i32 = MIDGAME[0];

/// The endgame value of a pawn.
pub const PAWN_END: i32 = ENDGAME[0];

/// The midgame value of a rook.
pub const ROOK_MID: i32 = MIDGAME[3];

/// The midgame value of a piece.
pub fn piece_value(role: Role) -> i32 {
    MIDGAME[role as usize - 1]
}

/// The endgame value of a piece.
pub fn piece_value_eg(role: Role) -> i32 {
    ENDGAME[role as usize - 1]
}

#[rustfmt::skip]
const PAWN_SQ: [i32; 64] = [
      0,   0,   0,   0,   0,   0,   0,   0,
      5,  10,  10, -20, -20,  10,  10,   5,
      5,  -5, -10,   0,   0, -10,  -5,   5,
      0,   0,   0,  20,  20,   0,   0,   0,
      5,   5,  10,  25,  25,  10,   5,   5,
     10,  10,  20,  30,  30,  20,  10,  10,
     50,  50,  50,  50,  50,  50,  50,  50,
      0,   0,   0,   0,   0,   0,   0,   0,
];

#[rustfmt::skip]
const KNIGHT_SQ: [i32; 64] = [
    -50, -40, -30, -30, -30, -30, -40, -50,
    -40, -20,   0,   5,   5,   0, -20, -40,
    -30,   5,  10,  15,  15,  10,   5, -30,
    -30,   0,  15,  20,  20,  15,   0, -30,
    -30,   5,  15,  20,  20,  15,   5, -30,
    -30,   0,  10,  15,  15,  10,   0, -30,
    -40, -20,   0,   0,   0,   0, -20, -40,
    -50, -40, -30, -30, -30, -30, -40, -50,
];

#[rustfmt::skip]
const BISHOP_SQ: [i32; 64] = [
    -20, -10, -10, -10, -10, -10, -10, -20,
    -10,   5,   0,   0,   0,   0,   5, -10,
    -10,  10,  10,  10,  10,  10,  10, -10,
    -10,   0,  10,  10,  10,  10,   0, -10,
    -10,   5,   5,  10,  10,   5,   5, -10,
    -10,   0,   5,  10,  10,   5,   0, -10,
    -10,   0,   0,   0,   0,   0,   0, -10,
    -20, -10, -10, -10, -10, -10, -10, -20,
];

#[rustfmt::skip]
const ROOK_SQ: [i32; 64] = [
      0,   0,   0,   5,   5,   0,   0,   0,
     -5,   0,   0,   0,   0,   0,   0,  -5,
     -5,   0,   0,   0,   0,   0,   0,  -5,
     -5,   0,   0,   0,   0,   0,   0,  -5,
     -5,   0,   0,   0,   0,   0,   0,  -5,
     -5,   0,   0,   0,   0,   0,   0,  -5,
      5,  10,  10,  10,  10,  10,  10,   5,
      0,   0,   0,   0,   0,   0,   0,   0,
];

#[rustfmt::skip]
const QUEEN_SQ: [i32; 64] = [
    -20, -10, -10,  -5,  -5, -10, -10, -20,
    -10,   0,   5,   0,   0,   0,   0, -10,
    -10,   5,   5,   5,   5,   5,   0, -10,
      0,   0,   5,   5,   5,   5,   0,  -5,
     -5,   0,   5,   5,   5,   5,   0,  -5,
    -10,   0,   5,   5,   5,   5,   0, -10,
    -10,   0,   0,   0,   0,   0,   0, -10,
    -20, -10, -10,  -5,  -5, -10, -10, -20,
];

#[rustfmt::skip]
const KING_MID_SQ: [i32; 64] = [
     20,  30,  10,   0,   0,  10,  30,  20,
     20,  20,   0,   0,   0,   0,  20,  20,
    -10, -20, -20, -20, -20, -20, -20, -10,
    -20, -30, -30, -40, -40, -30, -30, -20,
    -30, -40, -40, -50, -50, -40, -40, -30,
    -30, -40, -40, -50, -50, -40, -40, -30,
    -30, -40, -40, -50, -50, -40, -40, -30,
    -30, -40, -40, -50, -50, -40, -40, -30,
];

#[rustfmt::skip]
const KING_END_SQ: [i32; 64] = [
    -50, -30, -30, -30, -30, -30, -30, -50,
    -30, -30,   0,   0,   0,   0, -30, -30,
    -30, -10,  20,  30,  30,  20, -10, -30,
    -30, -10,  30,  40,  40,  30, -10, -30,
    -30, -10,  30,  40,  40,  30, -10, -30,
    -30, -10,  20,  30,  30,  20, -10, -30,
    -30, -20, -10,   0,   0, -10, -20, -30,
    -50, -40, -30, -20, -20, -30, -40, -50,
];

/// The game phase weight of a piece, out of a total of 24.
const PHASE: [i32; 6] = [0, 1, 1, 2, 4, 0];

/// The bonus for having the move.
const TEMPO: i32 = 10;

fn square_bonus(role: Role, sq: Square, color: Color, endgame: bool) -> i32 {
    let idx = match color {
        Color::White => sq as usize,
        Color::Black => sq.flip_vertical() as usize,
    };

    match (role, endgame) {
        (Role::Pawn, _) => PAWN_SQ[idx],
        (Role::Knight, _) => KNIGHT_SQ[idx],
        (Role::Bishop, _) => BISHOP_SQ[idx],
        (Role::Rook, _) => ROOK_SQ[idx],
        (Role::Queen, _) => QUEEN_SQ[idx],
        (Role::King, false) => KING_MID_SQ[idx],
        (Role::King, true) => KING_END_SQ[idx],
    }
}

/// Evaluates a position from the point of view of the side to move.
///
/// Returns the score together with an uncertainty margin the search may
/// use as a safety buffer in its forward-pruning decisions.
pub fn evaluate(pos: &Position) -> (Score, Score) {
    let board = pos.board();
    let mut midgame = 0;
    let mut endgame = 0;
    let mut phase = 0;

    for sq in board.occupied() {
        let Some(piece) = board.piece_at(sq) else {
            continue;
        };

        let sign = if piece.color == Color::White { 1 } else { -1 };
        let role = piece.role as usize - 1;

        phase += PHASE[role];
        midgame += sign * (MIDGAME[role] + square_bonus(piece.role, sq, piece.color, false));
        endgame += sign * (ENDGAME[role] + square_bonus(piece.role, sq, piece.color, true));
    }

    let phase = phase.min(24);
    let blended = (midgame * phase + endgame * (24 - phase)) / 24;
    let value = match pos.turn() {
        Color::White => blended + TEMPO,
        Color::Black => -blended + TEMPO,
    };

    (Score::new(value), Score::new(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startpos_is_roughly_balanced() {
        let pos = Position::default();
        let (value, _) = evaluate(&pos);
        assert!(value.get().abs() <= 2 * TEMPO);
    }

    #[test]
    fn evaluation_is_symmetric_in_the_side_to_move() {
        let white = Position::from_fen(
            "r1bqkbnr/pppp1ppp/2n5/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq - 2 3",
            false,
        )
        .expect("fen");

        let black = Position::from_fen(
            "rnbqkb1r/pppp1ppp/5n2/4p3/4P3/2N5/PPPP1PPP/R1BQKBNR b KQkq - 2 3",
            false,
        )
        .expect("fen");

        assert_eq!(evaluate(&white).0, evaluate(&black).0);
    }

    #[test]
    fn an_extra_queen_dominates_the_evaluation() {
        let pos = Position::from_fen("3qk3/8/8/8/8/8/8/4K3 w - - 0 1", false).expect("fen");
        let (value, _) = evaluate(&pos);
        assert!(value.get() < -Score::new(2000).get());
    }
}
