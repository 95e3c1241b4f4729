use crate::eval::piece_value;
use arrayvec::ArrayVec;
use derive_more::with_trait::{Display, Error};
use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{attacks, fen::Fen, uci::UciMove, CastlingMode, EnPassantMode};
use shakmaty::{Bitboard, Chess, Color, Move, MoveList, Piece, Position as _, Role, Square};

/// The reasons why parsing a position or a move can fail.
#[derive(Debug, Display, Copy, Clone, Eq, PartialEq, Hash, Error)]
pub enum IllegalPosition {
    #[display("invalid fen string")]
    InvalidFen,
    #[display("illegal position")]
    Unreachable,
    #[display("invalid move token")]
    InvalidMove,
    #[display("illegal move")]
    IllegalMove,
}

/// A key used to probe the transposition table for exclusion searches.
const EXCLUSION: u64 = 0x9e37_79b9_7f4a_7c15;

#[derive(Debug, Clone)]
struct Undo {
    chess: Chess,
    captured: Option<Role>,
}

/// The view of the game the search operates on.
///
/// Wraps the board provider with the undo stack, the key history for
/// repetition detection, and the handful of static queries the search
/// recipe consumes.
#[derive(Debug, Clone)]
pub struct Position {
    chess: Chess,
    mode: CastlingMode,
    keys: Vec<u64>,
    stack: Vec<Undo>,
}

impl Default for Position {
    fn default() -> Self {
        Self::new(Chess::default(), CastlingMode::Standard)
    }
}

impl Position {
    fn new(chess: Chess, mode: CastlingMode) -> Self {
        let key = chess.zobrist_hash::<Zobrist64>(EnPassantMode::Legal).0;

        Position {
            chess,
            mode,
            keys: vec![key],
            stack: Vec::with_capacity(128),
        }
    }

    /// Sets up a position from a FEN string.
    pub fn from_fen(fen: &str, chess960: bool) -> Result<Self, IllegalPosition> {
        let mode = if chess960 {
            CastlingMode::Chess960
        } else {
            CastlingMode::Standard
        };

        let fen: Fen = fen.parse().map_err(|_| IllegalPosition::InvalidFen)?;
        let chess = fen
            .into_position(mode)
            .map_err(|_| IllegalPosition::Unreachable)?;

        Ok(Self::new(chess, mode))
    }

    /// Plays a move given in UCI notation.
    pub fn play_uci(&mut self, token: &str) -> Result<Move, IllegalPosition> {
        let uci: UciMove = token.parse().map_err(|_| IllegalPosition::InvalidMove)?;
        let m = uci
            .to_move(&self.chess)
            .map_err(|_| IllegalPosition::IllegalMove)?;

        self.do_move(m.clone());
        self.stack.clear();
        Ok(m)
    }

    /// Formats a move in UCI notation, honoring the castling convention.
    pub fn uci(&self, m: Move) -> UciMove {
        m.to_uci(self.mode)
    }

    /// The side to move.
    pub fn turn(&self) -> Color {
        self.chess.turn()
    }

    /// The number of half-moves played since the game started.
    pub fn game_ply(&self) -> i32 {
        let moves = self.chess.fullmoves().get() as i32 - 1;
        2 * moves + (self.chess.turn() == Color::Black) as i32
    }

    /// The position key.
    pub fn key(&self) -> u64 {
        *self.keys.last().unwrap_or(&0)
    }

    /// The position key for excluded-move searches.
    pub fn exclusion_key(&self) -> u64 {
        self.key() ^ EXCLUSION
    }

    /// All legal moves.
    pub fn legal_moves(&self) -> MoveList {
        self.chess.legal_moves()
    }

    /// Whether the side to move is in check.
    pub fn in_check(&self) -> bool {
        self.chess.is_check()
    }

    /// Whether a move gives check.
    pub fn gives_check(&self, m: Move) -> bool {
        let mut next = self.chess.clone();
        next.play_unchecked(&m);
        next.is_check()
    }

    /// Whether the position is drawn by rule.
    ///
    /// Repetition inspects the key history and a single recurrence counts
    /// as a draw inside the search tree.
    pub fn is_draw(&self, skip_repetition: bool) -> bool {
        if self.chess.halfmoves() >= 100 {
            return true;
        }

        if self.chess.is_insufficient_material() {
            return true;
        }

        if skip_repetition {
            return false;
        }

        let current = self.key();
        let span = (self.chess.halfmoves() as usize).min(self.keys.len() - 1);
        self.keys[self.keys.len() - 1 - span..self.keys.len() - 1]
            .iter()
            .rev()
            .skip(1)
            .step_by(2)
            .any(|&k| k == current)
    }

    /// Makes a move on the board.
    pub fn do_move(&mut self, m: Move) {
        self.stack.push(Undo {
            chess: self.chess.clone(),
            captured: match m {
                Move::EnPassant { .. } => Some(Role::Pawn),
                _ => m.capture(),
            },
        });

        self.chess.play_unchecked(&m);
        self.keys
            .push(self.chess.zobrist_hash::<Zobrist64>(EnPassantMode::Legal).0);
    }

    /// Takes back the last move made with [`Self::do_move`] or [`Self::do_null_move`].
    pub fn undo_move(&mut self) {
        if let Some(undo) = self.stack.pop() {
            self.chess = undo.chess;
            self.keys.pop();
        }
    }

    /// Passes the turn. Only valid when not in check.
    pub fn do_null_move(&mut self) -> bool {
        match self.chess.clone().swap_turn() {
            Err(_) => false,
            Ok(next) => {
                self.stack.push(Undo {
                    chess: self.chess.clone(),
                    captured: None,
                });

                self.chess = next;
                self.keys
                    .push(self.chess.zobrist_hash::<Zobrist64>(EnPassantMode::Legal).0);

                true
            }
        }
    }

    /// The piece captured by the last move, if any.
    pub fn captured_piece(&self) -> Option<Role> {
        self.stack.last().and_then(|u| u.captured)
    }

    /// The piece on a square.
    pub fn piece_on(&self, sq: Square) -> Option<Piece> {
        self.chess.board().piece_at(sq)
    }

    /// All occupied squares.
    pub fn occupied(&self) -> Bitboard {
        self.chess.board().occupied()
    }

    /// The pieces of one side.
    pub fn pieces(&self, color: Color) -> Bitboard {
        self.chess.board().by_color(color)
    }

    /// The king square of one side.
    pub fn king_of(&self, color: Color) -> Option<Square> {
        self.chess.board().king_of(color)
    }

    /// The board itself, for evaluation.
    pub fn board(&self) -> &shakmaty::Board {
        self.chess.board()
    }

    /// Whether the side still has castling rights.
    pub fn can_castle(&self, color: Color) -> bool {
        let back_rank = match color {
            Color::White => Bitboard(0x0000_0000_0000_00FF),
            Color::Black => Bitboard(0xFF00_0000_0000_0000),
        };

        !(self.chess.castles().castling_rights() & back_rank).is_empty()
    }

    /// The total value of one side's pieces, pawns and king excluded.
    pub fn non_pawn_material(&self, color: Color) -> i32 {
        let board = self.chess.board();
        let us = board.by_color(color);

        [Role::Knight, Role::Bishop, Role::Rook, Role::Queen]
            .into_iter()
            .map(|r| piece_value(r) * (board.by_role(r) & us).count() as i32)
            .sum()
    }

    /// Whether the side has a pawn on the seventh rank, from its own view.
    pub fn has_pawn_on_7th(&self, color: Color) -> bool {
        let board = self.chess.board();
        let rank = match color {
            Color::White => Bitboard(0x00FF_0000_0000_0000),
            Color::Black => Bitboard(0x0000_0000_0000_FF00),
        };

        !(board.pawns() & board.by_color(color) & rank).is_empty()
    }

    /// Whether a move pushes a pawn past all enemy pawns.
    pub fn is_passed_pawn_push(&self, m: Move) -> bool {
        if m.role() != Role::Pawn || m.capture().is_some() {
            return false;
        }

        let board = self.chess.board();
        let them = board.pawns() & board.by_color(!self.turn());
        (them & passed_mask(self.turn(), m.to())).is_empty()
    }

    /// Whether a move captures.
    pub fn is_capture(&self, m: Move) -> bool {
        m.is_capture()
    }

    /// Whether a move captures or promotes.
    pub fn is_capture_or_promotion(&self, m: Move) -> bool {
        m.is_capture() || m.is_promotion()
    }

    /// Whether a move castles.
    pub fn is_castle(&self, m: Move) -> bool {
        matches!(m, Move::Castle { .. })
    }

    /// Attacks of a piece from a square given an occupancy.
    pub fn attacks_from(&self, piece: Piece, sq: Square, occupied: Bitboard) -> Bitboard {
        attacks::attacks(sq, piece, occupied)
    }

    /// The squares strictly between two squares on a line.
    pub fn between(&self, a: Square, b: Square) -> Bitboard {
        attacks::between(a, b)
    }

    /// All pieces of one side attacking a square under the given occupancy.
    fn attackers_to(&self, sq: Square, color: Color, occupied: Bitboard) -> Bitboard {
        let board = self.chess.board();
        let them = board.by_color(color) & occupied;
        let diagonal = board.bishops() | board.queens();
        let straight = board.rooks() | board.queens();

        let mut attackers = attacks::pawn_attacks(!color, sq) & board.pawns();
        attackers |= attacks::knight_attacks(sq) & board.knights();
        attackers |= attacks::bishop_attacks(sq, occupied) & diagonal;
        attackers |= attacks::rook_attacks(sq, occupied) & straight;
        attackers |= attacks::king_attacks(sq) & board.kings();
        attackers & them
    }

    fn least_attacker(
        &self,
        sq: Square,
        color: Color,
        occupied: Bitboard,
    ) -> Option<(Square, Role)> {
        let board = self.chess.board();
        let attackers = self.attackers_to(sq, color, occupied);

        for role in [
            Role::Pawn,
            Role::Knight,
            Role::Bishop,
            Role::Rook,
            Role::Queen,
            Role::King,
        ] {
            if let Some(sq) = (attackers & board.by_role(role)).first() {
                return Some((sq, role));
            }
        }

        None
    }

    /// The static exchange evaluation of a move.
    pub fn see(&self, m: Move) -> i32 {
        let Some(from) = m.from() else { return 0 };
        if self.is_castle(m.clone()) {
            return 0;
        }

        let to = m.to();
        let mut occupied = self.occupied() ^ Bitboard::from_square(from);
        let mut gains: ArrayVec<i32, 32> = ArrayVec::new();

        match m {
            Move::EnPassant { .. } => {
                let victim = Square::from_coords(to.file(), from.rank());
                occupied ^= Bitboard::from_square(victim);
                gains.push(piece_value(Role::Pawn));
            }
            _ => gains.push(m.capture().map_or(0, piece_value)),
        }

        let mut on_target = m.role();
        let mut side = !self.turn();

        while let Some((sq, role)) = self.least_attacker(to, side, occupied) {
            // A king may not recapture into a defended square.
            if role == Role::King
                && !self
                    .attackers_to(to, !side, occupied ^ Bitboard::from_square(sq))
                    .is_empty()
            {
                break;
            }

            let d = gains.len();
            if gains.try_push(piece_value(on_target) - gains[d - 1]).is_err() {
                break;
            }

            on_target = role;
            occupied ^= Bitboard::from_square(sq);
            side = !side;
        }

        while gains.len() > 1 {
            let last = gains.pop().unwrap_or(0);
            let d = gains.len();
            gains[d - 1] = -(-gains[d - 1]).max(last);
        }

        gains.first().copied().unwrap_or(0)
    }

    /// The sign of the static exchange evaluation of a move.
    pub fn see_sign(&self, m: Move) -> i32 {
        // A lower valued piece capturing a higher valued one can't lose material.
        if let (Some(victim), role) = (m.capture(), m.role()) {
            if piece_value(role) <= piece_value(victim) {
                return 1;
            }
        }

        self.see(m)
    }

    /// Counts the leaf nodes of the move generation tree.
    pub fn perft(&self, depth: u32) -> u64 {
        shakmaty::perft(&self.chess, depth)
    }
}

fn passed_mask(color: Color, sq: Square) -> Bitboard {
    let file = sq.file() as i32;
    let mut mask = 0u64;

    for f in (file - 1).max(0)..=(file + 1).min(7) {
        mask |= 0x0101_0101_0101_0101 << f;
    }

    let rank = sq.rank() as i32;
    let ahead = match color {
        Color::White => !0u64 << (8 * (rank + 1)).min(63),
        Color::Black => !0u64 >> (8 * (8 - rank)).min(63),
    };

    if color == Color::White && rank >= 7 || color == Color::Black && rank == 0 {
        return Bitboard(0);
    }

    Bitboard(mask & ahead)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startpos_has_twenty_legal_moves() {
        let pos = Position::default();
        assert_eq!(pos.legal_moves().len(), 20);
        assert!(!pos.in_check());
    }

    #[test]
    fn do_and_undo_restore_the_key() {
        let mut pos = Position::default();
        let key = pos.key();
        let m = pos.legal_moves()[0];

        pos.do_move(m);
        assert_ne!(pos.key(), key);

        pos.undo_move();
        assert_eq!(pos.key(), key);
    }

    #[test]
    fn null_move_swaps_the_side_to_move() {
        let mut pos = Position::default();
        assert!(pos.do_null_move());
        assert_eq!(pos.turn(), Color::Black);

        pos.undo_move();
        assert_eq!(pos.turn(), Color::White);
    }

    #[test]
    fn repetition_is_detected() {
        let mut pos = Position::default();

        for token in ["g1f3", "g8f6", "f3g1", "f6g8"] {
            pos.play_uci(token).expect("legal");
        }

        assert!(pos.is_draw(false));
        assert!(!pos.is_draw(true));
    }

    #[test]
    fn fen_round_trips_through_legal_moves() {
        let pos =
            Position::from_fen("8/8/8/8/8/3k4/3p4/3K4 w - - 0 1", false).expect("valid fen");

        assert!(!pos.in_check());
        assert_eq!(pos.turn(), Color::White);
        assert_eq!(pos.non_pawn_material(Color::White), 0);
    }

    #[test]
    fn see_wins_an_undefended_pawn() {
        let pos = Position::from_fen("1k6/8/8/3p4/4P3/8/8/1K6 w - - 0 1", false).expect("fen");
        let m = pos
            .legal_moves()
            .into_iter()
            .find(|m| m.is_capture())
            .expect("exd5 exists");

        assert_eq!(pos.see(m), piece_value(Role::Pawn));
        assert!(pos.see_sign(m) > 0);
    }

    #[test]
    fn see_loses_a_rook_for_a_pawn() {
        let pos = Position::from_fen("1k6/8/2p5/3p4/8/8/3R4/1K6 w - - 0 1", false).expect("fen");
        let m = pos
            .legal_moves()
            .into_iter()
            .find(|m| m.is_capture())
            .expect("Rxd5 exists");

        assert_eq!(pos.see(m), piece_value(Role::Pawn) - piece_value(Role::Rook));
        assert!(pos.see_sign(m) < 0);
    }

    #[test]
    fn passed_pawn_pushes_are_recognized() {
        let pos = Position::from_fen("1k6/8/8/8/3P4/8/6p1/1K6 w - - 0 1", false).expect("fen");
        let push = pos
            .legal_moves()
            .into_iter()
            .find(|m| m.role() == Role::Pawn)
            .expect("d5 exists");

        assert!(pos.is_passed_pawn_push(push));
    }

    #[test]
    fn gives_check_is_detected() {
        let pos = Position::from_fen("1k6/8/8/8/8/8/8/KR6 w - - 0 1", false).expect("fen");
        let check = pos
            .legal_moves()
            .into_iter()
            .find(|m| pos.gives_check(*m))
            .expect("Rb8+ exists");

        assert_eq!(check.role(), Role::Rook);
    }

    #[test]
    fn kiwipete_perft_matches_reference_counts() {
        let pos = Position::from_fen(
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            false,
        )
        .expect("fen");

        assert_eq!(pos.perft(1), 48);
        assert_eq!(pos.perft(2), 2039);
        assert_eq!(pos.perft(3), 97862);
        assert_eq!(pos.perft(4), 4085603);
    }
}
