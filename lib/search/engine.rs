use crate::chess::Position;
use crate::eval::{evaluate, piece_value, piece_value_eg, PAWN_END, PAWN_MID, ROOK_MID};
use crate::search::params::*;
use crate::search::{Bound, Control, ControlFlow, Depth, Frame, HashSize, History, Info, Limits};
use crate::search::{MoveCode, MovePicker, MultiPv, NodeKind, Options, Pool, RootMoves, Score};
use crate::search::{ScoreKind, SearchShared, SkillLevel, SplitPoint, SplitShared, ThreadCount};
use crate::search::{TranspositionTable, PLY_MAX};
use derive_more::with_trait::{Display, Error};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::stream::FusedStream;
use futures::{Stream, StreamExt};
use rand::Rng;
use shakmaty::uci::UciMove;
use shakmaty::{Color, Move, Role, Square};
use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use std::time::Duration;

/// Indicates the search was aborted.
#[derive(Debug, Display, Copy, Clone, Eq, PartialEq, Hash, Error)]
#[display("the search was aborted")]
pub struct Aborted;

/// The final verdict of a search.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct Conclusion {
    pub best: Option<UciMove>,
    pub ponder: Option<UciMove>,
}

fn piece_is_slider(role: Role) -> bool {
    matches!(role, Role::Bishop | Role::Rook | Role::Queen)
}

fn is_special(m: Move) -> bool {
    m.is_promotion() || matches!(m, Move::EnPassant { .. } | Move::Castle { .. })
}

fn relative_rank(color: Color, sq: Square) -> u32 {
    match color {
        Color::White => sq.rank() as u32,
        Color::Black => 7 - sq.rank() as u32,
    }
}

#[derive(Debug, Clone)]
struct NodeCtx {
    kind: NodeKind,
    ply: i32,
    depth: Depth,
    beta: Score,
    in_check: bool,
    futility_base: Score,
    tt_move: Option<Move>,
    excluded: Option<Move>,
    threat: Option<Move>,
    singular_node: bool,
    tt_value: Score,
    single_pv: bool,
}

#[derive(Debug)]
enum Tried {
    /// The move was discarded by forward pruning, possibly raising the
    /// best value to its futility estimate.
    Pruned(Option<Score>),
    Searched(Score),
}

pub(crate) struct DeepenCfg {
    pub multi_pv: usize,
    pub uci_multi_pv: usize,
    pub skill: SkillLevel,
}

/// One search thread.
#[derive(Debug)]
struct Worker {
    shared: Arc<SearchShared>,
    thread: usize,
    frames: Vec<Frame>,
    sp: Option<Arc<SplitPoint>>,
    tx: Option<UnboundedSender<Info>>,
    multipv_idx: usize,
    single_pv: bool,
    nodes: u64,
}

impl Worker {
    fn new(
        shared: Arc<SearchShared>,
        thread: usize,
        tx: Option<UnboundedSender<Info>>,
    ) -> Self {
        Worker {
            shared,
            thread,
            frames: vec![Frame::default(); PLY_MAX as usize + 4],
            sp: None,
            tx,
            multipv_idx: 0,
            single_pv: true,
            nodes: 0,
        }
    }

    /// The entry point of a helper assigned to a split point.
    fn run_split(thread: usize, sp: Arc<SplitPoint>) {
        let mut worker = Worker::new(sp.ctx.clone(), thread, None);
        worker.multipv_idx = sp.multipv_idx;
        worker.single_pv = sp.single_pv;
        worker.sp = Some(sp.clone());
        worker.frames[sp.ply as usize] = sp.frame.clone();

        let mut pos = sp.pos.clone();
        let _ = worker.split_loop(&sp, &mut pos);
    }

    #[inline(always)]
    fn visit(&mut self) -> Result<(), Aborted> {
        self.nodes += 1;

        match self.shared.ctrl.visit() {
            ControlFlow::Continue => Ok(()),
            ControlFlow::Abort => Err(Aborted),
        }
    }

    #[inline(always)]
    fn cutoff_occurred(&self) -> bool {
        self.sp.as_ref().is_some_and(|sp| sp.cutoff_occurred())
    }

    fn emit(&self, info: Info) {
        if let Some(tx) = &self.tx {
            let _ = tx.unbounded_send(info);
        }
    }

    /// Decides whether a move deserves extra depth, and whether it is
    /// too dangerous to forward prune regardless.
    fn extension(
        &self,
        pos: &Position,
        m: Move,
        capture_or_promotion: bool,
        gives_check: bool,
        pv: bool,
    ) -> (Depth, bool) {
        let mut result = Depth::ZERO;
        let mut dangerous = gives_check;

        if gives_check && pos.see_sign(m.clone()) >= 0 {
            result = result + CHECK_EXTENSION[pv as usize];
        }

        if m.role() == Role::Pawn {
            if relative_rank(pos.turn(), m.to()) == 6 {
                result = result + PAWN_PUSH_TO_7TH_EXTENSION[pv as usize];
                dangerous = true;
            }

            if pos.is_passed_pawn_push(m.clone()) {
                result = result + PASSED_PAWN_EXTENSION[pv as usize];
                dangerous = true;
            }
        }

        if capture_or_promotion && !is_special(m.clone()) {
            if let Some(victim) = pos.piece_on(m.to()) {
                let remaining = pos.non_pawn_material(Color::White)
                    + pos.non_pawn_material(Color::Black)
                    - piece_value(victim.role);

                if victim.role != Role::Pawn && remaining == 0 {
                    result = result + PAWN_ENDGAME_EXTENSION[pv as usize];
                    dangerous = true;
                }
            }
        }

        (result.min(crate::search::ONE_PLY), dangerous)
    }

    /// The main recursive search. See the numbered steps inline.
    #[allow(clippy::too_many_lines)]
    fn search(
        &mut self,
        pos: &mut Position,
        mut alpha: Score,
        mut beta: Score,
        depth: Depth,
        ply: i32,
        kind: NodeKind,
    ) -> Result<Score, Aborted> {
        use crate::search::ONE_PLY;

        let shared = self.shared.clone();
        let pv_node = kind.is_pv();
        let root = kind.is_root();
        let ply_idx = ply as usize;

        // Step 1. Initialize this node and the frames below it.
        self.frames[ply_idx].current = None;
        self.frames[ply_idx].best = None;
        self.frames[ply_idx + 1].excluded = None;
        self.frames[ply_idx + 1].skip_null = false;
        self.frames[ply_idx + 1].reduction = Depth::ZERO;
        self.frames[ply_idx + 2].killers = [const { None }; 2];

        if pv_node {
            shared.ctrl.update_seldepth(ply);
        }

        self.visit()?;

        // Step 2. Aborted searches and immediate draws, never at root.
        if !root && (pos.is_draw(false) || ply > PLY_MAX) {
            return Ok(Score::DRAW);
        }

        // Step 3. Mate distance pruning.
        if !root {
            alpha = alpha.max(Score::mated_in(ply));
            beta = beta.min(Score::mate_in(ply + 1));

            if alpha >= beta {
                return Ok(alpha);
            }
        }

        // Step 4. Transposition table lookup. An excluded move probes
        // under a different key so a partial search never overwrites
        // the full one.
        let excluded = self.frames[ply_idx].excluded;
        let pos_key = if excluded.is_some() {
            pos.exclusion_key()
        } else {
            pos.key()
        };

        let mut tte = shared.tt.probe(pos_key);
        let mut tt_move = if root {
            let rml = self.shared.root.lock().ok();
            rml.map(|r| r.get(self.multipv_idx).head())
        } else {
            tte.and_then(|t| t.best().resolve(&pos.legal_moves()))
        };

        if !root {
            if let Some(t) = tte {
                let usable = if pv_node {
                    t.depth() >= depth && t.bound() == Bound::Exact
                } else {
                    t.can_cutoff(depth, beta, ply)
                };

                if usable {
                    shared.tt.refresh(pos_key);
                    let value = t.value().from_tt(ply);
                    self.frames[ply_idx].best = tt_move;

                    if value >= beta {
                        if let Some(m) = tt_move {
                            if !pos.is_capture_or_promotion(m) {
                                self.frames[ply_idx].insert_killer(m);
                            }
                        }
                    }

                    return Ok(value);
                }
            }
        }

        // Step 5. Static evaluation, refined by the table, plus the
        // gain update for the parent's quiet move.
        let in_check = pos.in_check();
        let mut refined = -Score::INFINITE;

        if in_check {
            self.frames[ply_idx].eval = None;
            self.frames[ply_idx].margin = Score::DRAW;
        } else if let Some(t) = tte {
            let eval = t.eval().unwrap_or_else(|| evaluate(pos).0);
            self.frames[ply_idx].eval = Some(eval);
            self.frames[ply_idx].margin = t.margin();
            refined = t.refine_eval(eval, ply);
        } else {
            let (eval, margin) = evaluate(pos);
            self.frames[ply_idx].eval = Some(eval);
            self.frames[ply_idx].margin = margin;
            refined = eval;

            shared.tt.store(
                pos_key,
                Score::DRAW,
                Bound::None,
                Depth::NONE,
                MoveCode::NONE,
                Some(eval),
                margin,
            );
        }

        if ply > 0 {
            let parent = self.frames[ply_idx - 1].clone();

            if let (Some(m), Some(parent_eval), Some(eval), false) =
                (parent.current, parent.eval, self.frames[ply_idx].eval, parent.null_move)
            {
                if pos.captured_piece().is_none() && !is_special(m) {
                    if let Some(piece) = pos.piece_on(m.to()) {
                        let delta = (-parent_eval - eval).get();
                        shared.history.update_gain(piece.color, piece.role, m.to(), delta);
                    }
                }
            }
        }

        let mate_band = beta.abs() < Score::MATE_IN_MAX;
        let skip_null = self.frames[ply_idx].skip_null;
        let mut threat_move: Option<Move> = None;

        // Step 6. Razoring.
        if !pv_node
            && !in_check
            && depth < RAZOR_DEPTH
            && tt_move.is_none()
            && mate_band
            && refined + razor_margin(depth) < beta
            && !pos.has_pawn_on_7th(pos.turn())
        {
            let rbeta = beta - razor_margin(depth);
            let v = self.qsearch(pos, rbeta - 1, rbeta, Depth::ZERO, ply, NodeKind::NonPv)?;

            if v < rbeta {
                // Returning v + razor_margin(depth) would be the sound
                // choice, but it tested weaker.
                return Ok(v);
            }
        }

        // Step 7. Static null move pruning.
        if !pv_node
            && !skip_null
            && !in_check
            && depth < RAZOR_DEPTH
            && mate_band
            && refined - futility_margin(depth, 0) >= beta
            && pos.non_pawn_material(pos.turn()) > 0
        {
            return Ok(refined - futility_margin(depth, 0));
        }

        // Step 8. Null move search with verification at high depths.
        if !pv_node
            && !skip_null
            && !in_check
            && depth > ONE_PLY
            && mate_band
            && refined >= beta
            && pos.non_pawn_material(pos.turn()) > 0
        {
            self.frames[ply_idx].current = None;
            self.frames[ply_idx].null_move = true;

            let mut r = 3 + if depth >= Depth::from_plies(5) {
                depth.get() / 8
            } else {
                0
            };

            if refined - PAWN_MID > beta {
                r += 1;
            }

            if pos.do_null_move() {
                let reduced = depth - Depth::from_plies(r);
                self.frames[ply_idx + 1].skip_null = true;

                let null_value = if reduced < ONE_PLY {
                    -self.qsearch(pos, -beta, -alpha, Depth::ZERO, ply + 1, NodeKind::NonPv)?
                } else {
                    -self.search(pos, -beta, -alpha, reduced, ply + 1, NodeKind::NonPv)?
                };

                self.frames[ply_idx + 1].skip_null = false;
                pos.undo_move();
                self.frames[ply_idx].null_move = false;

                if null_value >= beta {
                    // Do not return unproven mate scores.
                    let null_value = if null_value >= Score::MATE_IN_MAX {
                        beta
                    } else {
                        null_value
                    };

                    if depth < Depth::from_plies(6) {
                        return Ok(null_value);
                    }

                    self.frames[ply_idx].skip_null = true;
                    let v = self.search(pos, alpha, beta, reduced, ply, NodeKind::NonPv)?;
                    self.frames[ply_idx].skip_null = false;

                    if v >= beta {
                        return Ok(null_value);
                    }
                } else {
                    // The refutation of the null move hints at a threat.
                    // If the parent move was reduced and is connected to
                    // it, fail low to force a full-depth re-search there.
                    threat_move = self.frames[ply_idx + 1].best;

                    if depth < THREAT_DEPTH && ply > 0 {
                        let parent = self.frames[ply_idx - 1].clone();

                        if let (Some(pm), Some(tm)) = (parent.current, threat_move) {
                            if parent.reduction > Depth::ZERO
                                && connected_moves(pos, pm, tm)
                            {
                                return Ok(beta - 1);
                            }
                        }
                    }
                }
            } else {
                self.frames[ply_idx].null_move = false;
            }
        }

        // Step 9. ProbCut: a very good capture confirmed by a reduced
        // search far above beta prunes the node.
        if !pv_node
            && !in_check
            && !skip_null
            && excluded.is_none()
            && mate_band
            && depth >= RAZOR_DEPTH + ONE_PLY
        {
            let rbeta = beta + 200;
            let rdepth = depth - Depth::from_plies(4);
            let threshold = pos.captured_piece().map_or(0, piece_value);

            let mut picker = MovePicker::probcut(pos, tt_move, threshold);
            while let Some(m) = picker.next() {
                self.frames[ply_idx].current = Some(m);
                self.frames[ply_idx].null_move = false;
                pos.do_move(m);
                let v = -self.search(pos, -rbeta, -rbeta + 1, rdepth, ply + 1, NodeKind::NonPv)?;
                pos.undo_move();

                if v >= rbeta {
                    return Ok(v);
                }
            }
        }

        // Step 10. Internal iterative deepening.
        if tt_move.is_none()
            && depth >= IID_DEPTH[pv_node as usize]
            && (pv_node
                || (!in_check
                    && self.frames[ply_idx].eval.unwrap_or(-Score::INFINITE) + IID_MARGIN >= beta))
        {
            let d = if pv_node {
                depth - Depth::from_plies(2)
            } else {
                depth / 2
            };

            self.frames[ply_idx].skip_null = true;
            let kind = if pv_node { NodeKind::Pv } else { NodeKind::NonPv };
            self.search(pos, alpha, beta, d, ply, kind)?;
            self.frames[ply_idx].skip_null = skip_null;

            tte = shared.tt.probe(pos_key);
            tt_move = tte.and_then(|t| t.best().resolve(&pos.legal_moves()));
        }

        // Step 11. Loop through the moves.
        let singular_node = !root
            && depth >= SINGULAR_DEPTH[pv_node as usize]
            && tt_move.is_some()
            && excluded.is_none()
            && tte.is_some_and(|t| {
                t.bound().is_lower() && t.depth() >= depth - Depth::from_plies(3)
            });

        let ctx = NodeCtx {
            kind,
            ply,
            depth,
            beta,
            in_check,
            futility_base: self.frames[ply_idx].eval.unwrap_or(-Score::INFINITE)
                + self.frames[ply_idx].margin,
            tt_move,
            excluded,
            threat: threat_move,
            singular_node,
            tt_value: tte.map_or(Score::DRAW, |t| t.value().from_tt(ply)),
            single_pv: self.single_pv,
        };

        let mut picker = MovePicker::main(pos, tt_move, &shared.history, self.frames[ply_idx].killers);
        let old_alpha = alpha;
        let mut best_value = -Score::INFINITE;
        let mut move_count = 0usize;
        let mut quiets: arrayvec::ArrayVec<Move, 96> = arrayvec::ArrayVec::new();

        while best_value < beta && !self.cutoff_occurred() {
            let Some(m) = picker.next() else { break };

            if Some(m) == excluded {
                continue;
            }

            if root {
                let listed = self
                    .shared
                    .root
                    .lock()
                    .ok()
                    .and_then(|r| r.find(m, self.multipv_idx));

                if listed.is_none() {
                    continue;
                }
            }

            move_count += 1;
            let nodes_before = self.nodes;

            if root {
                shared.ctrl.set_first_root_move(move_count == 1);

                if self.tx.is_some() && shared.ctrl.elapsed() > Duration::from_secs(2) {
                    self.emit(Info::CurrMove {
                        depth: depth.plies(),
                        currmove: pos.uci(m),
                        number: move_count + self.multipv_idx,
                    });
                }
            }

            let is_pv_move = pv_node && (move_count == 1 || (root && depth <= ONE_PLY));
            let tried = self.try_move(pos, &ctx, m, move_count, alpha, best_value, is_pv_move)?;

            let value = match tried {
                Tried::Pruned(Some(fv)) => {
                    best_value = best_value.max(fv);
                    continue;
                }
                Tried::Pruned(None) => continue,
                Tried::Searched(v) => v,
            };

            if !pos.is_capture_or_promotion(m) {
                let _ = quiets.try_push(m);
            }

            // Root bookkeeping: remember effort and score per move so
            // the list can be reordered and reported.
            if root && !shared.ctrl.aborted() {
                if let Ok(mut rml) = self.shared.root.lock() {
                    if let Some(idx) = rml.find(m, 0) {
                        rml.get_mut(idx).nodes += self.nodes - nodes_before;

                        if is_pv_move || value > alpha {
                            rml.get_mut(idx).score = value;
                            rml.extract_pv_from_tt(idx, pos, &shared.tt);

                            if !is_pv_move && ctx.single_pv {
                                rml.best_move_changes += 1;
                            }
                        } else {
                            rml.get_mut(idx).score = -Score::INFINITE;
                        }
                    }
                }
            }

            if value > best_value {
                best_value = value;
                self.frames[ply_idx].best = Some(m);

                if pv_node && value > alpha && value < beta {
                    alpha = value;
                }
            }

            // Step 19. Delegate the remaining moves to idle workers.
            if depth >= shared.pool.min_split_depth()
                && best_value < beta
                && shared.pool.available_slave_exists()
                && !shared.ctrl.aborted()
                && !self.cutoff_occurred()
            {
                let (bv, bm) = self.split(
                    pos,
                    picker,
                    &ctx,
                    alpha,
                    best_value,
                    self.frames[ply_idx].best,
                    move_count,
                )?;

                best_value = bv;
                if let Some(bm) = bm {
                    self.frames[ply_idx].best = Some(bm);
                }

                break;
            }
        }

        // Step 20. No moves tried: mate, stalemate, or a failed
        // exclusion search.
        if move_count == 0 {
            return Ok(if excluded.is_some() {
                old_alpha
            } else if in_check {
                Score::mated_in(ply)
            } else {
                Score::DRAW
            });
        }

        // Step 21. Store the result and reward the quiet move that
        // failed high.
        if !shared.ctrl.aborted() && !self.cutoff_occurred() {
            let best = self.frames[ply_idx].best;
            let (mv, bound) = if best_value <= old_alpha {
                (MoveCode::NONE, Bound::Upper)
            } else if best_value >= beta {
                (best.map_or(MoveCode::NONE, MoveCode::new), Bound::Lower)
            } else {
                (best.map_or(MoveCode::NONE, MoveCode::new), Bound::Exact)
            };

            shared.tt.store(
                pos_key,
                best_value.to_tt(ply),
                bound,
                depth,
                mv,
                self.frames[ply_idx].eval,
                self.frames[ply_idx].margin,
            );

            if best_value >= beta {
                if let Some(best) = best {
                    if !pos.is_capture_or_promotion(best) {
                        self.frames[ply_idx].insert_killer(best);

                        let bonus = History::bonus(depth);
                        shared.history.update(pos.turn(), best, bonus);

                        for &q in quiets.iter().filter(|&&q| q != best) {
                            shared.history.update(pos.turn(), q, -bonus);
                        }
                    }
                }
            }
        }

        Ok(best_value)
    }

    /// Extends, prunes, makes and searches one move; the shared tail of
    /// the regular and split-point move loops.
    #[allow(clippy::too_many_arguments)]
    fn try_move(
        &mut self,
        pos: &mut Position,
        ctx: &NodeCtx,
        m: Move,
        move_count: usize,
        alpha: Score,
        best_value: Score,
        is_pv_move: bool,
    ) -> Result<Tried, Aborted> {
        use crate::search::ONE_PLY;

        let pv_node = ctx.kind.is_pv();
        let ply_idx = ctx.ply as usize;
        let gives_check = pos.gives_check(m.clone());
        let capture_or_promotion = pos.is_capture_or_promotion(m.clone());

        // Step 12. Decide the new search depth.
        let (mut ext, dangerous) =
            self.extension(pos, m.clone(), capture_or_promotion, gives_check, pv_node);

        // Singular extension: if every alternative fails well below the
        // table move's score, that move is singular and gets a full ply.
        if ctx.singular_node
            && Some(m.clone()) == ctx.tt_move
            && ext < ONE_PLY
            && ctx.tt_value.abs() < Score::KNOWN_WIN
        {
            let rbeta = ctx.tt_value - ctx.depth.get();
            self.frames[ply_idx].excluded = Some(m.clone());
            self.frames[ply_idx].skip_null = true;
            let v = self.search(pos, rbeta - 1, rbeta, ctx.depth / 2, ctx.ply, NodeKind::NonPv)?;
            self.frames[ply_idx].skip_null = false;
            self.frames[ply_idx].excluded = None;
            self.frames[ply_idx].best = None;

            if v < rbeta {
                ext = ONE_PLY;
            }
        }

        let new_depth = ctx.depth - ONE_PLY + ext;

        // Step 13. Futility pruning.
        if !pv_node
            && !capture_or_promotion
            && !ctx.in_check
            && !dangerous
            && Some(m.clone()) != ctx.tt_move
            && !pos.is_castle(m.clone())
        {
            // Move count based pruning.
            if move_count >= futility_move_count(ctx.depth)
                && best_value > Score::MATED_IN_MAX
                && ctx
                    .threat
                    .clone()
                    .is_none_or(|threat| !connected_threat(pos, m.clone(), threat))
            {
                return Ok(Tried::Pruned(None));
            }

            // Value based pruning. The reduction is applied to the new
            // depth here without the late-move depth guard; fixing that
            // tested weaker.
            let predicted = new_depth - reduction(pv_node, ctx.depth, move_count);
            let gain = self
                .shared
                .history
                .gain(pos.turn(), m.role(), m.to());
            let futility_value =
                ctx.futility_base + futility_margin(predicted, move_count) + gain;

            if futility_value < ctx.beta {
                return Ok(Tried::Pruned(Some(futility_value)));
            }

            // Losing captures cannot rescue the move this late.
            if predicted < Depth::from_plies(2)
                && best_value > Score::MATED_IN_MAX
                && pos.see_sign(m.clone()) < 0
            {
                return Ok(Tried::Pruned(None));
            }
        }

        // Step 14. Make the move.
        self.frames[ply_idx].current = Some(m.clone());
        self.frames[ply_idx].null_move = false;
        pos.do_move(m.clone());

        let value = if is_pv_move {
            if new_depth < ONE_PLY {
                -self.qsearch(pos, -ctx.beta, -alpha, Depth::ZERO, ctx.ply + 1, NodeKind::Pv)?
            } else {
                -self.search(pos, -ctx.beta, -alpha, new_depth, ctx.ply + 1, NodeKind::Pv)?
            }
        } else {
            // Step 15. Late move reduction; a fail high is re-searched
            // at full depth.
            let mut value = Score::DRAW;
            let r = reduction(pv_node, ctx.depth, move_count);
            let mut do_full = true;

            if ctx.depth > Depth::from_plies(3)
                && !capture_or_promotion
                && !dangerous
                && !pos.is_castle(m.clone())
                && !self.frames[ply_idx].is_killer(m)
                && r > Depth::ZERO
            {
                self.frames[ply_idx].reduction = r;
                let d = new_depth - r;

                value = if d < ONE_PLY {
                    -self.qsearch(pos, -(alpha + 1), -alpha, Depth::ZERO, ctx.ply + 1, NodeKind::NonPv)?
                } else {
                    -self.search(pos, -(alpha + 1), -alpha, d, ctx.ply + 1, NodeKind::NonPv)?
                };

                self.frames[ply_idx].reduction = Depth::ZERO;
                do_full = value > alpha;
            }

            // Step 16. Full depth zero-window search, then a full
            // window re-search for new PV candidates.
            if do_full {
                value = if new_depth < ONE_PLY {
                    -self.qsearch(pos, -(alpha + 1), -alpha, Depth::ZERO, ctx.ply + 1, NodeKind::NonPv)?
                } else {
                    -self.search(pos, -(alpha + 1), -alpha, new_depth, ctx.ply + 1, NodeKind::NonPv)?
                };

                if pv_node && value > alpha && (ctx.kind.is_root() || value < ctx.beta) {
                    value = if new_depth < ONE_PLY {
                        -self.qsearch(pos, -ctx.beta, -alpha, Depth::ZERO, ctx.ply + 1, NodeKind::Pv)?
                    } else {
                        -self.search(pos, -ctx.beta, -alpha, new_depth, ctx.ply + 1, NodeKind::Pv)?
                    };
                }
            }

            value
        };

        // Step 17. Take the move back.
        pos.undo_move();

        Ok(Tried::Searched(value))
    }

    /// Opens a split point and works it together with the assigned
    /// slaves, returning the merged result once all of them are done.
    #[allow(clippy::too_many_arguments)]
    fn split(
        &mut self,
        pos: &Position,
        picker: MovePicker,
        ctx: &NodeCtx,
        alpha: Score,
        best_value: Score,
        best: Option<Move>,
        move_count: usize,
    ) -> Result<(Score, Option<Move>), Aborted> {
        let shared = self.shared.clone();

        let sp = Arc::new(SplitPoint {
            ctx: shared.clone(),
            parent: self.sp.clone(),
            master: self.thread,
            kind: ctx.kind,
            depth: ctx.depth,
            beta: ctx.beta,
            ply: ctx.ply,
            multipv_idx: self.multipv_idx,
            single_pv: ctx.single_pv,
            threat: ctx.threat.clone(),
            frame: self.frames[ctx.ply as usize].clone(),
            pos: pos.clone(),
            cutoff: AtomicBool::new(false),
            shared: Mutex::new(SplitShared {
                picker,
                alpha,
                best_value,
                best,
                move_count,
                slaves: 0,
            }),
            done: Condvar::new(),
        });

        shared.pool.assign_slaves(&sp);

        let previous = self.sp.replace(sp.clone());
        let mut work_pos = pos.clone();
        let result = self.split_loop(&sp, &mut work_pos);
        self.sp = previous;

        shared.pool.wait_for_slaves(&sp);
        result?;

        let merged = match sp.shared.lock() {
            Ok(s) => (s.best_value, s.best.clone()),
            Err(poisoned) => {
                let s = poisoned.into_inner();
                (s.best_value, s.best.clone())
            }
        };

        Ok(merged)
    }

    /// The move loop run at a split point, by the master and every
    /// slave alike, drawing moves from the shared picker.
    fn split_loop(&mut self, sp: &Arc<SplitPoint>, pos: &mut Position) -> Result<(), Aborted> {
        let shared = self.shared.clone();
        let ply_idx = sp.ply as usize;
        let root = sp.kind.is_root();

        let ctx = NodeCtx {
            kind: sp.kind,
            ply: sp.ply,
            depth: sp.depth,
            beta: sp.beta,
            in_check: pos.in_check(),
            futility_base: self.frames[ply_idx].eval.unwrap_or(-Score::INFINITE)
                + self.frames[ply_idx].margin,
            tt_move: None,
            excluded: None,
            threat: sp.threat.clone(),
            singular_node: false,
            tt_value: Score::DRAW,
            single_pv: sp.single_pv,
        };

        loop {
            if shared.ctrl.aborted() || sp.cutoff_occurred() {
                return Ok(());
            }

            let (m, move_count, alpha, best_value) = {
                let mut state = match sp.shared.lock() {
                    Ok(state) => state,
                    Err(poisoned) => poisoned.into_inner(),
                };

                if state.best_value >= sp.beta {
                    return Ok(());
                }

                let m = loop {
                    match state.picker.next() {
                        None => return Ok(()),
                        Some(m) => {
                            if root {
                                let listed = shared
                                    .root
                                    .lock()
                                    .ok()
                                    .and_then(|r| r.find(m.clone(), sp.multipv_idx));

                                if listed.is_none() {
                                    continue;
                                }
                            }

                            break m;
                        }
                    }
                };

                state.move_count += 1;
                (m, state.move_count, state.alpha, state.best_value)
            };

            let nodes_before = self.nodes;

            if root {
                shared.ctrl.set_first_root_move(move_count == 1);
            }

            let tried = self.try_move(pos, &ctx, m.clone(), move_count, alpha, best_value, false)?;

            match tried {
                Tried::Pruned(Some(fv)) => {
                    if let Ok(mut state) = sp.shared.lock() {
                        if fv > state.best_value {
                            state.best_value = fv;
                        }
                    }
                }

                Tried::Pruned(None) => {}

                Tried::Searched(value) => {
                    if root && !shared.ctrl.aborted() {
                        if let Ok(mut rml) = shared.root.lock() {
                            if let Some(idx) = rml.find(m.clone(), 0) {
                                rml.get_mut(idx).nodes += self.nodes - nodes_before;

                                if value > alpha {
                                    rml.get_mut(idx).score = value;
                                    rml.extract_pv_from_tt(idx, pos, &shared.tt);

                                    if sp.single_pv {
                                        rml.best_move_changes += 1;
                                    }
                                } else {
                                    rml.get_mut(idx).score = -Score::INFINITE;
                                }
                            }
                        }
                    }

                    let mut state = match sp.shared.lock() {
                        Ok(state) => state,
                        Err(poisoned) => poisoned.into_inner(),
                    };

                    if value > state.best_value && !sp.cutoff_occurred() {
                        state.best_value = value;
                        state.best = Some(m);

                        if sp.kind.is_pv() && value > state.alpha && value < sp.beta {
                            state.alpha = value;
                        }

                        if value >= sp.beta {
                            sp.cutoff.store(true, std::sync::atomic::Ordering::Relaxed);
                        }
                    }
                }
            }
        }
    }

    /// The quiescence search: tactical moves only, at zero or negative
    /// depth, with the stand pat option when not in check.
    fn qsearch(
        &mut self,
        pos: &mut Position,
        mut alpha: Score,
        beta: Score,
        depth: Depth,
        ply: i32,
        kind: NodeKind,
    ) -> Result<Score, Aborted> {
        use crate::search::ONE_PLY;

        let shared = self.shared.clone();
        let pv_node = kind.is_pv();
        let ply_idx = ply as usize;

        self.frames[ply_idx].current = None;
        self.frames[ply_idx].best = None;
        self.visit()?;

        if pos.is_draw(true) || ply > PLY_MAX {
            return Ok(Score::DRAW);
        }

        let in_check = pos.in_check();
        let tt_depth = if in_check || depth >= Depth::QS_CHECKS {
            Depth::QS_CHECKS
        } else {
            Depth::QS_NO_CHECKS
        };

        let tte = shared.tt.probe(pos.key());
        let tt_move = tte.and_then(|t| t.best().resolve(&pos.legal_moves()));

        if !pv_node {
            if let Some(t) = tte {
                if t.can_cutoff(tt_depth, beta, ply) {
                    self.frames[ply_idx].best = tt_move;
                    return Ok(t.value().from_tt(ply));
                }
            }
        }

        let old_alpha = alpha;
        let mut best_value;
        let futility_base;
        let enough_material;

        if in_check {
            best_value = -Score::INFINITE;
            futility_base = -Score::INFINITE;
            enough_material = false;
            self.frames[ply_idx].eval = None;
            self.frames[ply_idx].margin = Score::DRAW;
        } else {
            let (eval, margin) = match tte {
                Some(t) => (t.eval().unwrap_or_else(|| evaluate(pos).0), t.margin()),
                None => evaluate(pos),
            };

            self.frames[ply_idx].eval = Some(eval);
            self.frames[ply_idx].margin = margin;
            best_value = eval;

            // Stand pat.
            if best_value >= beta {
                if tte.is_none() {
                    shared.tt.store(
                        pos.key(),
                        best_value.to_tt(ply),
                        Bound::Lower,
                        Depth::NONE,
                        MoveCode::NONE,
                        Some(eval),
                        margin,
                    );
                }

                return Ok(best_value);
            }

            if pv_node && best_value > alpha {
                alpha = best_value;
            }

            futility_base = eval + margin + FUTILITY_MARGIN_QS;
            enough_material = pos.non_pawn_material(pos.turn()) > ROOK_MID;
        }

        let recapture = self.frames[ply_idx - 1].current.clone().map(|m| m.to());
        let mut picker =
            MovePicker::quiescence(pos, tt_move.clone(), &shared.history, depth, recapture);

        while best_value < beta {
            let Some(m) = picker.next() else { break };
            let gives_check = pos.gives_check(m.clone());

            // Futility pruning on the captured material.
            if !pv_node
                && !in_check
                && !gives_check
                && Some(m.clone()) != tt_move
                && enough_material
                && !m.is_promotion()
                && !pos.is_passed_pawn_push(m.clone())
            {
                let captured = match m {
                    Move::EnPassant { .. } => PAWN_END,
                    _ => m.capture().map_or(0, piece_value_eg),
                };

                let futility_value = futility_base + captured;

                if futility_value < beta {
                    best_value = best_value.max(futility_value);
                    continue;
                }

                if futility_base < beta && depth < Depth::ZERO && pos.see(m.clone()) <= 0 {
                    continue;
                }
            }

            // Prunable evasions: quiet replies to the check that cannot
            // raise a best value already above the mated band.
            let evasion_prunable = !pv_node
                && in_check
                && best_value > Score::MATED_IN_MAX
                && !pos.is_capture(m.clone())
                && !pos.can_castle(pos.turn());

            if !pv_node
                && (!in_check || evasion_prunable)
                && Some(m.clone()) != tt_move
                && !m.is_promotion()
                && pos.see_sign(m.clone()) < 0
            {
                continue;
            }

            // Checks that attack nothing new are not worth the nodes.
            if !pv_node && !in_check && gives_check && Some(m.clone()) != tt_move {
                if !pos.is_capture_or_promotion(m.clone()) {
                    let bound = self.frames[ply_idx].eval.unwrap_or(-Score::INFINITE)
                        + PAWN_MID / 4;

                    if bound < beta
                        && !check_is_dangerous(pos, m.clone(), futility_base, beta, &mut best_value)
                    {
                        best_value = best_value.max(bound);
                        continue;
                    }
                }
            }

            self.frames[ply_idx].current = Some(m.clone());
            self.frames[ply_idx].null_move = false;
            pos.do_move(m.clone());
            let value = -self.qsearch(pos, -beta, -alpha, depth - ONE_PLY, ply + 1, kind)?;
            pos.undo_move();

            if value > best_value {
                best_value = value;
                self.frames[ply_idx].best = Some(m);

                if pv_node && value > alpha && value < beta {
                    alpha = value;
                }
            }
        }

        if in_check && best_value == -Score::INFINITE {
            return Ok(Score::mated_in(ply));
        }

        let best = self.frames[ply_idx].best;
        let (mv, bound) = if best_value <= old_alpha {
            (MoveCode::NONE, Bound::Upper)
        } else if best_value >= beta {
            (best.map_or(MoveCode::NONE, MoveCode::new), Bound::Lower)
        } else {
            (best.map_or(MoveCode::NONE, MoveCode::new), Bound::Exact)
        };

        shared.tt.store(
            pos.key(),
            best_value.to_tt(ply),
            bound,
            tt_depth,
            mv,
            self.frames[ply_idx].eval,
            self.frames[ply_idx].margin,
        );

        Ok(best_value)
    }
}

/// Tests whether the first move made the second one possible, in the
/// sense relevant for threat detection after a failed null search.
fn connected_moves(pos: &Position, m1: Move, m2: Move) -> bool {
    let (Some(f1), Some(f2)) = (m1.from(), m2.from()) else {
        return false;
    };

    let (t1, t2) = (m1.to(), m2.to());

    // The same piece moves again, or m2 goes through the vacated square.
    if f2 == t1 || t2 == f1 {
        return true;
    }

    if let Some(p2) = pos.piece_on(f2) {
        if piece_is_slider(p2.role) && pos.between(f2, t2).contains(f1) {
            return true;
        }
    }

    let Some(p1) = pos.piece_on(t1) else {
        return false;
    };

    if pos.attacks_from(p1, t1, pos.occupied()).contains(t2) {
        return true;
    }

    // Discovered check through the square m2 vacates.
    if let Some(ksq) = pos.king_of(pos.turn()) {
        if piece_is_slider(p1.role) && pos.between(t1, ksq).contains(f2) {
            let occupied = pos.occupied() ^ shakmaty::Bitboard::from_square(f2);
            if pos.attacks_from(p1, t1, occupied).contains(ksq) {
                return true;
            }
        }
    }

    false
}

/// Tests whether forward pruning a move is unsafe because it interacts
/// with the threat discovered by the null search.
fn connected_threat(pos: &Position, m: Move, threat: Move) -> bool {
    let (Some(mfrom), Some(tfrom)) = (m.from(), threat.from()) else {
        return false;
    };

    let (mto, tto) = (m.to(), threat.to());

    // Moving the threatened piece out of the line of fire.
    if mfrom == tto {
        return true;
    }

    // Defending a piece that is attacked by an equal or stronger one.
    let defends = pos.is_capture(threat)
        && pos
            .piece_on(tfrom)
            .zip(pos.piece_on(tto))
            .is_some_and(|(attacker, victim)| {
                piece_value(attacker.role) >= piece_value(victim.role)
                    || attacker.role == Role::King
            });

    if defends {
        let occupied =
            pos.occupied() ^ shakmaty::Bitboard::from_square(mfrom)
                | shakmaty::Bitboard::from_square(mto);

        if let Some(piece) = pos.piece_on(mfrom) {
            if pos.attacks_from(piece, mto, occupied).contains(tto) {
                return true;
            }
        }
    }

    // Safely interposing on a slider's ray.
    if let Some(attacker) = pos.piece_on(tfrom) {
        if piece_is_slider(attacker.role)
            && pos.between(tfrom, tto).contains(mto)
            && pos.see_sign(m) >= 0
        {
            return true;
        }
    }

    false
}

/// Tests whether a checking move is too dangerous to prune in the
/// quiescence search. The best value is only raised when the check is
/// deemed prunable.
fn check_is_dangerous(
    pos: &Position,
    m: Move,
    futility_base: Score,
    beta: Score,
    best_value: &mut Score,
) -> bool {
    use shakmaty::Bitboard;

    let Some(from) = m.from() else { return true };
    let to = m.to();
    let them = !pos.turn();

    let Some(ksq) = pos.king_of(them) else {
        return true;
    };

    let Some(piece) = pos.piece_on(from) else {
        return true;
    };

    let king = shakmaty::Piece {
        color: them,
        role: Role::King,
    };

    let king_att = pos.attacks_from(king, ksq, pos.occupied());
    let occupied =
        pos.occupied() ^ Bitboard::from_square(from) ^ Bitboard::from_square(ksq);
    let old_att = pos.attacks_from(piece, from, occupied);
    let new_att = pos.attacks_from(piece, to, occupied);

    // Checks that leave the king at most one escape square.
    let escapes = king_att & !pos.pieces(them) & !new_att & !Bitboard::from_square(to);
    if escapes.count() <= 1 {
        return true;
    }

    // Queen contact checks.
    if piece.role == Role::Queen && king_att.contains(to) {
        return true;
    }

    // Checks creating a new threat worth at least beta.
    let victims = pos.pieces(them) & new_att & !old_att & !Bitboard::from_square(ksq);
    let mut raised = *best_value;

    for victim_sq in victims {
        let Some(victim) = pos.piece_on(victim_sq) else {
            continue;
        };

        let futility_value = futility_base + piece_value_eg(victim.role);

        if futility_value >= beta {
            let capture = Move::Normal {
                role: piece.role,
                from,
                capture: Some(victim.role),
                to: victim_sq,
                promotion: None,
            };

            if pos.see_sign(capture) >= 0 {
                return true;
            }
        }

        if futility_value > raised {
            raised = futility_value;
        }
    }

    *best_value = raised;
    false
}

impl Worker {
    /// The iterative deepening loop: aspiration windows, MultiPV,
    /// reporting, and the stop decisions fed by the time manager.
    fn deepen(&mut self, pos: &mut Position, cfg: &DeepenCfg) -> Conclusion {
        let shared = self.shared.clone();
        let limits = shared.ctrl.limits().clone();

        shared.tt.new_search();
        shared.history.clear();
        self.frames[0].null_move = true;

        let rml = RootMoves::init(pos, &limits.search_moves);

        if rml.is_empty() {
            let score = if pos.in_check() {
                Score::mated_in(0)
            } else {
                Score::DRAW
            };

            self.emit(Info::Pv {
                depth: 0,
                seldepth: 0,
                multipv: 1,
                score,
                kind: ScoreKind::Exact,
                nodes: 0,
                time: shared.ctrl.elapsed(),
                pv: Vec::new(),
            });

            return Conclusion::default();
        }

        if let Ok(mut r) = shared.root.lock() {
            *r = rml;
        }

        let mut best_values = vec![Score::DRAW; PLY_MAX as usize + 2];
        let mut change_history = vec![0u32; PLY_MAX as usize + 2];
        let mut easy_move: Option<Move> = None;
        let mut skill_pick: Option<Conclusion> = None;
        let skill_enabled = cfg.skill.get() < SkillLevel::MAX;

        let mut depth = 0usize;
        let mut value = Score::DRAW;

        while !shared.ctrl.aborted() && {
            depth += 1;
            depth as i32 <= PLY_MAX.min(limits.max_depth())
        } {
            if let Ok(mut r) = shared.root.lock() {
                r.snapshot_prev_scores();
                r.best_move_changes = 0;
            }

            let rml_len = shared.root.lock().map_or(0, |r| r.len());

            for multipv_idx in 0..cfg.multi_pv.min(rml_len) {
                self.multipv_idx = multipv_idx;

                // Aspiration window around the previous score.
                let prev = shared
                    .root
                    .lock()
                    .map_or(Score::DRAW, |r| r.get(multipv_idx).prev_score);

                let mut delta = 0i32;
                let (mut alpha, mut beta) = if depth >= 5 && prev.abs() < Score::KNOWN_WIN {
                    let d1 = (best_values[depth - 1] - best_values[depth - 2]).get();
                    let d2 = (best_values[depth - 2] - best_values[depth - 3]).get();

                    delta = (d1.abs() + d2.abs() / 2).clamp(16, 24);
                    delta = (delta + 7) / 8 * 8;

                    (
                        (prev - delta).max(-Score::INFINITE),
                        (prev + delta).min(Score::INFINITE),
                    )
                } else {
                    (-Score::INFINITE, Score::INFINITE)
                };

                // Re-search with a widening window until the score is
                // no longer clamped to it.
                loop {
                    let mut search_pos = pos.clone();
                    let result = self.search(
                        &mut search_pos,
                        alpha,
                        beta,
                        Depth::from_plies(depth as i32),
                        0,
                        NodeKind::Root,
                    );

                    if let Ok(mut r) = shared.root.lock() {
                        r.sort_from(multipv_idx);
                    }

                    let exact = match result {
                        Err(Aborted) => break,
                        Ok(v) => {
                            value = v;
                            v > alpha && v < beta
                        }
                    };

                    if multipv_idx > 0 && exact {
                        if let Ok(mut r) = shared.root.lock() {
                            r.sort_prefix(multipv_idx);
                        }
                    }

                    for i in 0..=multipv_idx {
                        if let Ok(mut r) = shared.root.lock() {
                            if i < r.len() {
                                r.insert_pv_in_tt(i, pos, &shared.tt);
                            }
                        }
                    }

                    if shared.ctrl.aborted() {
                        break;
                    }

                    if exact || shared.ctrl.elapsed() > Duration::from_secs(2) {
                        self.report(pos, cfg, depth as i32, multipv_idx, alpha, beta);
                    }

                    if value >= beta {
                        beta = (beta + delta).min(Score::INFINITE);
                        delta += delta / 2;
                    } else if value <= alpha {
                        shared.ctrl.set_fail_low(true);
                        shared.ctrl.set_stop_on_ponderhit(false);
                        alpha = (alpha - delta).max(-Score::INFINITE);
                        delta += delta / 2;
                    } else {
                        break;
                    }

                    if value.abs() >= Score::KNOWN_WIN {
                        break;
                    }
                }
            }

            let (best, second_score, best_score, best_nodes) = match shared.root.lock() {
                Err(_) => break,
                Ok(r) => (
                    r.get(0).head(),
                    (r.len() > 1).then(|| r.get(1).score),
                    r.get(0).score,
                    r.get(0).nodes,
                ),
            };

            best_values[depth] = value;
            change_history[depth] = shared.root.lock().map_or(0, |r| r.best_move_changes);

            if skill_enabled && depth as i32 == 1 + cfg.skill.get() {
                skill_pick = Some(self.pick_skill_move(pos, cfg));
            }

            // An easy move is one that dominated from the start; it
            // lets the search stop early once confirmed.
            if depth == 1
                && (rml_len == 1
                    || second_score.is_none_or(|s| best_score > s + EASY_MOVE_MARGIN))
            {
                easy_move = Some(best);
            } else if easy_move != Some(best) {
                easy_move = None;
            }

            if !shared.ctrl.aborted() {
                if let Some(clock) = shared.ctrl.clock() {
                    let elapsed = shared.ctrl.elapsed();
                    let available = clock.available_time();
                    let mut stop = false;

                    if depth >= 7 && easy_move == Some(best) {
                        let total = shared.ctrl.nodes().max(1);

                        if rml_len == 1
                            || (best_nodes > total * 85 / 100 && elapsed > available / 16)
                            || (best_nodes > total * 98 / 100 && elapsed > available / 32)
                        {
                            stop = true;
                        }
                    }

                    if depth > 4 && depth < 50 {
                        clock.pv_instability(change_history[depth], change_history[depth - 1]);
                    }

                    if elapsed > clock.available_time() * 62 / 100 {
                        stop = true;
                    }

                    if stop {
                        if shared.ctrl.pondering() {
                            shared.ctrl.set_stop_on_ponderhit(true);
                        } else {
                            shared.ctrl.request_stop();
                        }
                    }
                }
            }
        }

        if skill_enabled {
            return skill_pick.unwrap_or_else(|| self.pick_skill_move(pos, cfg));
        }

        match shared.root.lock() {
            Err(_) => Conclusion::default(),
            Ok(r) => Conclusion {
                best: Some(pos.uci(r.get(0).head())),
                ponder: r.get(0).ponder().map(|m| pos.uci(m)),
            },
        }
    }

    /// Sends the multipv report lines for one finished window.
    fn report(
        &self,
        pos: &Position,
        cfg: &DeepenCfg,
        depth: i32,
        multipv_idx: usize,
        alpha: Score,
        beta: Score,
    ) {
        let shared = &self.shared;
        let Ok(rml) = shared.root.lock() else { return };

        for i in 0..cfg.uci_multi_pv.min(rml.len()) {
            let updated = i <= multipv_idx;

            if depth == 1 && !updated {
                continue;
            }

            let rm = rml.get(i);
            let score = if updated { rm.score } else { rm.prev_score };
            let kind = if i == multipv_idx && score >= beta {
                ScoreKind::LowerBound
            } else if i == multipv_idx && score <= alpha {
                ScoreKind::UpperBound
            } else {
                ScoreKind::Exact
            };

            self.emit(Info::Pv {
                depth: if updated { depth } else { depth - 1 },
                seldepth: shared.ctrl.seldepth(),
                multipv: i + 1,
                score,
                kind,
                nodes: shared.ctrl.nodes(),
                time: shared.ctrl.elapsed(),
                pv: rm.pv.iter().map(|&m| pos.uci(m)).collect(),
            });
        }
    }

    /// Picks a deliberately sub-optimal move from the MultiPV set, the
    /// weaker the skill level the more random the choice.
    fn pick_skill_move(&self, pos: &Position, cfg: &DeepenCfg) -> Conclusion {
        let Ok(rml) = self.shared.root.lock() else {
            return Conclusion::default();
        };

        if rml.is_empty() {
            return Conclusion::default();
        }

        let size = cfg.multi_pv.min(rml.len());
        let top = rml.get(0).score.get();
        let worst = rml.get(size - 1).score.get();
        let variance = (top - worst).min(PAWN_MID);
        let weakness = 120 - 2 * cfg.skill.get();

        let mut rng = rand::rng();
        let mut best_so_far = i32::MIN;
        let mut pick = rml.get(0);

        for i in 0..size {
            let rm = rml.get(i);
            let score = rm.score.get();

            // No crazy blunders, even at the lowest levels.
            if i > 0 && rml.get(i - 1).score > rm.score + EASY_MOVE_MARGIN {
                break;
            }

            let adjusted = score
                + ((top - score) * weakness + variance * rng.random_range(0..weakness)) / 128;

            if adjusted > best_so_far {
                best_so_far = adjusted;
                pick = rm;
            }
        }

        Conclusion {
            best: Some(pos.uci(pick.head())),
            ponder: pick.ponder().map(|m| pos.uci(m)),
        }
    }
}

/// A handle to an ongoing search, streaming progress reports.
#[derive(Debug)]
pub struct Search {
    shared: Arc<SearchShared>,
    rx: UnboundedReceiver<Info>,
    handle: Option<JoinHandle<Conclusion>>,
}

impl Search {
    /// Requests the search to stop; a best move is still concluded.
    pub fn stop(&self) {
        self.shared.ctrl.request_stop();
    }

    /// Tells the search the expected ponder move was played.
    pub fn ponderhit(&self) {
        self.shared.ctrl.ponderhit();
    }

    /// Whether the search is still in ponder mode.
    pub fn pondering(&self) -> bool {
        self.shared.ctrl.pondering()
    }

    /// Waits for the search to finish and returns its verdict.
    pub fn conclude(mut self) -> Conclusion {
        match self.handle.take() {
            None => Conclusion::default(),
            Some(handle) => handle.join().unwrap_or_default(),
        }
    }
}

impl Drop for Search {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.shared.ctrl.request_stop();
            let _ = handle.join();
        }
    }
}

impl Stream for Search {
    type Item = Info;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_next_unpin(cx)
    }
}

impl FusedStream for Search {
    fn is_terminated(&self) -> bool {
        self.rx.is_terminated()
    }
}

/// A chess engine.
#[derive(Debug)]
pub struct Engine {
    options: Options,
    tt: Arc<TranspositionTable>,
    pool: Arc<Pool>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Initializes the engine with the default [`Options`].
    pub fn new() -> Self {
        Self::with_options(&Options::default())
    }

    /// Initializes the engine with the given [`Options`].
    pub fn with_options(options: &Options) -> Self {
        Engine {
            options: options.clone(),
            tt: Arc::new(TranspositionTable::new(options.hash)),
            pool: Pool::with_fake_split(
                options.threads,
                Arc::new(Worker::run_split),
                options.fake_split,
            ),
        }
    }

    /// The active configuration.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Mutable access to the inert option registry.
    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    /// Resizes the transposition table, discarding its contents.
    pub fn set_hash(&mut self, hash: HashSize) {
        self.options.hash = hash;

        match Arc::get_mut(&mut self.tt) {
            Some(tt) => tt.resize(hash),
            None => self.tt = Arc::new(TranspositionTable::new(hash)),
        }
    }

    /// Resizes the worker pool.
    pub fn set_threads(&mut self, threads: ThreadCount) {
        self.options.threads = threads;
        self.rebuild_pool();
    }

    /// Toggles the fake split debug mode.
    pub fn set_fake_split(&mut self, fake: bool) {
        self.options.fake_split = fake;
        self.rebuild_pool();
    }

    fn rebuild_pool(&mut self) {
        self.pool = Pool::with_fake_split(
            self.options.threads,
            Arc::new(Worker::run_split),
            self.options.fake_split,
        );
    }

    /// Forgets everything learned from previous games.
    pub fn new_game(&self) {
        self.tt.clear();
    }

    /// Starts searching a position under the given limits.
    pub fn search(&mut self, pos: &Position, limits: Limits) -> Search {
        let (tx, rx) = unbounded();

        let multi_pv = self.options.multi_pv.get();
        let skill = self.options.skill;
        let skill_enabled = skill.get() < SkillLevel::MAX;

        let cfg = DeepenCfg {
            multi_pv: if skill_enabled {
                multi_pv.max(MultiPv::new(4).get())
            } else {
                multi_pv
            },
            uci_multi_pv: multi_pv,
            skill,
        };

        let shared = Arc::new(SearchShared {
            ctrl: Control::new(limits, pos.game_ply()),
            tt: self.tt.clone(),
            history: History::default(),
            root: Mutex::new(RootMoves::default()),
            pool: self.pool.clone(),
        });

        let handle = {
            let shared = shared.clone();
            let mut pos = pos.clone();

            crate::util::thread::spawn(move || {
                let mut worker = Worker::new(shared, 0, Some(tx));
                worker.deepen(&mut pos, &cfg)
            })
        };

        Search {
            shared,
            rx,
            handle: Some(handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn conclude(engine: &mut Engine, pos: &Position, limits: Limits) -> Conclusion {
        let mut search = engine.search(pos, limits);
        block_on(async {
            while search.next().await.is_some() {}
        });

        search.conclude()
    }

    #[test]
    fn depth_one_from_startpos_returns_a_legal_move() {
        let mut engine = Engine::new();
        let pos = Position::default();
        let conclusion = conclude(&mut engine, &pos, Limits::depth(1));

        let best = conclusion.best.expect("a best move");
        let legal: Vec<_> = pos.legal_moves().iter().map(|&m| pos.uci(m)).collect();
        assert!(legal.contains(&best));
    }

    #[test]
    fn a_mated_position_concludes_without_a_move() {
        let mut engine = Engine::new();
        let pos = Position::from_fen(
            "r1bqkb1r/pppp1Qpp/2n2n2/4p3/2B1P3/8/PPPP1PPP/RNB1K1NR b KQkq - 0 4",
            false,
        )
        .expect("fen");

        assert!(pos.legal_moves().is_empty());
        let conclusion = conclude(&mut engine, &pos, Limits::depth(4));
        assert_eq!(conclusion, Conclusion::default());
    }

    #[test]
    fn a_stalemated_position_reports_a_draw_and_no_move() {
        let mut engine = Engine::new();
        let pos =
            Position::from_fen("8/8/8/8/8/3k4/3p4/3K4 w - - 0 1", false).expect("fen");

        assert!(pos.legal_moves().is_empty());
        assert!(!pos.in_check());

        let mut search = engine.search(&pos, Limits::depth(10));
        let mut reported = None;

        block_on(async {
            while let Some(info) = search.next().await {
                if let Info::Pv { score, .. } = info {
                    reported = Some(score);
                }
            }
        });

        assert_eq!(search.conclude(), Conclusion::default());
        assert_eq!(reported, Some(Score::DRAW));
    }

    #[test]
    fn a_cornered_king_is_seen_mated_in_time() {
        // King and rook versus the lone king; the defender must report
        // the incoming mate from its own point of view.
        let mut engine = Engine::new();
        let pos = Position::from_fen("8/8/8/8/8/5k2/5r2/7K w - - 0 1", false).expect("fen");

        let mut search = engine.search(&pos, Limits::depth(12));
        let mut mated = false;

        block_on(async {
            while let Some(info) = search.next().await {
                if let Info::Pv { score, .. } = info {
                    if let crate::search::Mate::Mated(n) = score.mate() {
                        mated = n <= 12;
                    }
                }
            }
        });

        let conclusion = search.conclude();
        assert!(conclusion.best.is_some());
        assert!(mated, "the defender should see the mate coming");
    }

    #[test]
    fn a_quiet_opening_position_stays_within_a_pawn() {
        let mut engine = Engine::new();
        let pos = Position::from_fen(
            "r1bqkbnr/1ppp1ppp/p1n5/1B2p3/4P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 0 4",
            false,
        )
        .expect("fen");

        let mut search = engine.search(&pos, Limits::depth(8));
        let mut last_cp = None;

        block_on(async {
            while let Some(info) = search.next().await {
                if let Info::Pv { score, kind: ScoreKind::Exact, .. } = info {
                    last_cp = Some(score.get() * 100 / PAWN_MID);
                }
            }
        });

        let conclusion = search.conclude();
        assert!(conclusion.best.is_some());
        let cp = last_cp.expect("at least one exact score");
        assert!(cp.abs() < 100, "score {cp} is out of the expected band");
    }

    #[test]
    fn identical_searches_are_deterministic_with_one_thread() {
        let pos = Position::from_fen(
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            false,
        )
        .expect("fen");

        let run = || {
            let mut engine = Engine::new();
            conclude(&mut engine, &pos, Limits::depth(6))
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn helpers_join_the_search_without_breaking_it() {
        let mut options = Options::default();
        options.threads = ThreadCount::new(4);

        let mut engine = Engine::with_options(&options);
        let pos = Position::default();
        let conclusion = conclude(&mut engine, &pos, Limits::depth(7));

        let best = conclusion.best.expect("a best move");
        let legal: Vec<_> = pos.legal_moves().iter().map(|&m| pos.uci(m)).collect();
        assert!(legal.contains(&best));
    }

    #[test]
    fn fake_split_mode_still_finds_a_legal_move() {
        let mut options = Options::default();
        options.threads = ThreadCount::new(4);
        options.fake_split = true;

        let mut engine = Engine::with_options(&options);
        let pos = Position::default();
        let conclusion = conclude(&mut engine, &pos, Limits::depth(6));

        let best = conclusion.best.expect("a best move");
        let legal: Vec<_> = pos.legal_moves().iter().map(|&m| pos.uci(m)).collect();
        assert!(legal.contains(&best));
    }

    #[test]
    fn stop_concludes_promptly_during_an_infinite_search() {
        let mut engine = Engine::new();
        let pos = Position::default();

        let mut limits = Limits::none();
        limits.infinite = true;

        let search = engine.search(&pos, limits);
        std::thread::sleep(Duration::from_millis(200));

        let started = std::time::Instant::now();
        search.stop();
        let conclusion = search.conclude();

        assert!(conclusion.best.is_some());
        assert!(started.elapsed() < Duration::from_millis(300));
    }

    #[test]
    fn skill_handicap_still_plays_a_legal_move() {
        let mut options = Options::default();
        options.skill = SkillLevel::new(5);

        let mut engine = Engine::with_options(&options);
        let pos = Position::default();
        let conclusion = conclude(&mut engine, &pos, Limits::depth(6));

        let best = conclusion.best.expect("a best move");
        let legal: Vec<_> = pos.legal_moves().iter().map(|&m| pos.uci(m)).collect();
        assert!(legal.contains(&best));
    }

    #[test]
    fn multipv_reports_multiple_lines() {
        let mut options = Options::default();
        options.multi_pv = MultiPv::new(3);

        let mut engine = Engine::with_options(&options);
        let pos = Position::default();
        let mut search = engine.search(&pos, Limits::depth(4));

        let mut seen = std::collections::HashSet::new();
        block_on(async {
            while let Some(info) = search.next().await {
                if let Info::Pv { multipv, .. } = info {
                    seen.insert(multipv);
                }
            }
        });

        drop(search);
        assert!(seen.contains(&1));
        assert!(seen.contains(&2));
        assert!(seen.contains(&3));
    }
}
