mod inbound;
mod outbound;

pub use inbound::*;
pub use outbound::*;

use crate::chess::Position;
use crate::search::{Engine, Limits};
use crate::warn;
use futures::{prelude::*, select_biased as select, stream::FusedStream};
use shakmaty::Color;
use std::time::Instant;

/// The FEN of the standard starting position.
const STARTPOS: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// A basic UCI server.
#[derive(Debug)]
pub struct Uci<I, O> {
    input: I,
    output: O,
    engine: Engine,
    pos: Position,
}

impl<I, O> Uci<I, O> {
    /// Constructs a new uci server instance.
    pub fn new(input: I, output: O) -> Self {
        Self {
            input,
            output,
            engine: Engine::new(),
            pos: Position::default(),
        }
    }

    fn startpos(&self) -> Position {
        let chess960 = self.engine.options().chess960;
        Position::from_fen(STARTPOS, chess960).unwrap_or_default()
    }

    fn set_position(&mut self, spec: &PositionSpec) {
        let chess960 = self.engine.options().chess960;

        let mut pos = match &spec.fen {
            None => self.startpos(),
            Some(fen) => match Position::from_fen(fen, chess960) {
                Ok(pos) => pos,
                Err(e) => return warn!("ignored position command, {e}"),
            },
        };

        for token in &spec.moves {
            if let Err(e) = pos.play_uci(token) {
                warn!("ignored move `{token}`, {e}");
                break;
            }
        }

        self.pos = pos;
    }

    fn apply_option(&mut self, option: EngineOption) {
        match option {
            EngineOption::Hash(hash) => self.engine.set_hash(hash),
            EngineOption::ClearHash => self.engine.new_game(),
            EngineOption::Threads(threads) => self.engine.set_threads(threads),
            EngineOption::MultiPv(multi_pv) => self.engine.options_mut().multi_pv = multi_pv,
            EngineOption::SkillLevel(skill) => self.engine.options_mut().skill = skill,
            EngineOption::Chess960(v) => self.engine.options_mut().chess960 = v,
            EngineOption::Ponder(v) => self.engine.options_mut().ponder = v,
            EngineOption::FakeSplit(v) => self.engine.set_fake_split(v),
            EngineOption::OwnBook(v) => self.engine.options_mut().book.own_book = v,
            EngineOption::BookFile(v) => self.engine.options_mut().book.book_file = v,
            EngineOption::BestBookMove(v) => self.engine.options_mut().book.best_book_move = v,
            EngineOption::UseSearchLog(v) => self.engine.options_mut().book.use_search_log = v,
            EngineOption::SearchLogFilename(v) => {
                self.engine.options_mut().book.search_log_filename = v
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn limits(
        &self,
        depth: Option<i32>,
        nodes: Option<u64>,
        move_time: Option<std::time::Duration>,
        wtime: Option<std::time::Duration>,
        btime: Option<std::time::Duration>,
        winc: Option<std::time::Duration>,
        binc: Option<std::time::Duration>,
        movestogo: Option<u32>,
        mate: Option<u32>,
        search_moves: &[String],
        ponder: bool,
        infinite: bool,
    ) -> Limits {
        let (time, increment) = match self.pos.turn() {
            Color::White => (wtime, winc),
            Color::Black => (btime, binc),
        };

        Limits {
            depth,
            nodes,
            move_time,
            time,
            increment,
            moves_to_go: movestogo,
            search_moves: search_moves
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect(),
            ponder,
            infinite,
            mate,
        }
    }
}

impl<I, O> Uci<I, O>
where
    I: FusedStream<Item = Inbound> + Unpin,
    O: Sink<Outbound> + Unpin,
{
    /// Runs the UCI server.
    pub async fn run(&mut self) -> Result<(), O::Error> {
        'quit: while let Some(inbound) = self.input.next().await {
            match inbound {
                Inbound::Position(spec) => self.set_position(&spec),

                Inbound::UciNewGame => {
                    self.pos = self.startpos();
                    self.engine.new_game();
                }

                Inbound::Go {
                    depth,
                    nodes,
                    move_time,
                    wtime,
                    btime,
                    winc,
                    binc,
                    movestogo,
                    mate,
                    search_moves,
                    ponder,
                    infinite,
                } => {
                    let limits = self.limits(
                        depth,
                        nodes,
                        move_time,
                        wtime,
                        btime,
                        winc,
                        binc,
                        movestogo,
                        mate,
                        &search_moves,
                        ponder,
                        infinite,
                    );

                    let mut search = self.engine.search(&self.pos, limits);
                    let mut quitting = false;

                    loop {
                        select! {
                            info = search.next() => match info {
                                Some(i) => self.output.send(i.into()).await?,
                                None => break,
                            },

                            inbound = self.input.next() => match inbound {
                                None | Some(Inbound::Quit) => {
                                    search.stop();
                                    quitting = true;
                                }
                                Some(Inbound::Stop) => search.stop(),
                                Some(Inbound::PonderHit) => search.ponderhit(),
                                Some(Inbound::IsReady) => {
                                    self.output.send(Outbound::ReadyOk).await?
                                }
                                _ => warn!("ignored unexpected command"),
                            }
                        }
                    }

                    // When pondering, the best move is withheld until
                    // the front end releases the search.
                    while search.pondering() && !quitting {
                        match self.input.next().await {
                            None | Some(Inbound::Quit) => quitting = true,
                            Some(Inbound::PonderHit) => search.ponderhit(),
                            Some(Inbound::Stop) => search.stop(),
                            Some(Inbound::IsReady) => {
                                self.output.send(Outbound::ReadyOk).await?
                            }
                            _ => warn!("ignored unexpected command"),
                        }
                    }

                    let conclusion = search.conclude();
                    self.output.send(conclusion.into()).await?;

                    if quitting {
                        break 'quit;
                    }
                }

                Inbound::Perft(depth) => {
                    let timer = Instant::now();
                    let nodes = self.pos.perft(depth);

                    let report = Outbound::Perft {
                        depth,
                        nodes,
                        time: timer.elapsed(),
                    };

                    self.output.send(report).await?;
                }

                Inbound::SetOption(option) => self.apply_option(option),
                Inbound::IsReady => self.output.send(Outbound::ReadyOk).await?,
                Inbound::Uci => self.output.send(Outbound::UciOk).await?,
                Inbound::Quit => break 'quit,
                Inbound::Stop | Inbound::PonderHit => continue,
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{Conclusion, Info};
    use futures::executor::block_on;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    #[derive(Debug, Default, Clone, Eq, PartialEq)]
    struct MockStream(VecDeque<Inbound>);

    impl MockStream {
        fn new<T: IntoIterator<Item = Inbound>>(items: T) -> Self {
            Self(VecDeque::from_iter(items))
        }
    }

    impl Stream for MockStream {
        type Item = Inbound;

        fn poll_next(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Ready(self.0.pop_front())
        }
    }

    impl FusedStream for MockStream {
        fn is_terminated(&self) -> bool {
            self.0.is_empty()
        }
    }

    type MockSink = Vec<Outbound>;
    type MockUci = Uci<MockStream, MockSink>;

    fn parsed(cmd: &str) -> Inbound {
        UciParser.parse(cmd).expect("valid command")
    }

    fn run(commands: &[&str]) -> Vec<Outbound> {
        let input = MockStream::new(commands.iter().map(|c| parsed(c)));
        let mut uci = MockUci::new(input, Vec::new());
        block_on(uci.run()).expect("runs cleanly");
        uci.output
    }

    fn best_move_of(output: &[Outbound]) -> Option<&Conclusion> {
        match output.last() {
            Some(Outbound::BestMove(conclusion)) => Some(conclusion),
            _ => None,
        }
    }

    #[test]
    fn handles_uci_and_isready() {
        let output = run(&["uci", "isready"]);
        assert_eq!(output, vec![Outbound::UciOk, Outbound::ReadyOk]);
    }

    #[test]
    fn go_depth_one_from_startpos_answers_with_a_legal_move() {
        let output = run(&["position startpos", "go depth 1"]);
        let conclusion = best_move_of(&output).expect("a bestmove line");
        let best = conclusion.best.clone().expect("a move").to_string();

        let legal = [
            "a2a3", "a2a4", "b1a3", "b1c3", "b2b3", "b2b4", "c2c3", "c2c4", "d2d3", "d2d4",
            "e2e3", "e2e4", "f2f3", "f2f4", "g1f3", "g1h3", "g2g3", "g2g4", "h2h3", "h2h4",
        ];

        assert!(legal.contains(&best.as_str()));
    }

    #[test]
    fn a_position_with_no_legal_moves_still_answers() {
        let output = run(&[
            "position fen r1bqkb1r/pppp1Qpp/2n2n2/4p3/2B1P3/8/PPPP1PPP/RNB1K1NR b KQkq - 0 4",
            "go movetime 100",
        ]);

        assert_eq!(best_move_of(&output), Some(&Conclusion::default()));

        let reported_mate = output.iter().any(|o| match o {
            Outbound::Info(Info::Pv { score, .. }) => {
                matches!(score.mate(), crate::search::Mate::Mated(0))
            }
            _ => false,
        });

        assert!(reported_mate, "the mated side reports the mate 0 score");
    }

    #[test]
    fn stop_during_an_infinite_search_still_concludes() {
        let output = run(&["position startpos", "go infinite", "stop"]);
        let conclusion = best_move_of(&output).expect("a bestmove line");
        assert!(conclusion.best.is_some());

        let lines = output
            .iter()
            .filter(|o| matches!(o, Outbound::BestMove(_)))
            .count();

        assert_eq!(lines, 1, "exactly one bestmove line is emitted");
    }

    #[test]
    fn quit_during_a_search_concludes_and_exits() {
        let output = run(&["position startpos", "go infinite", "quit"]);
        assert!(best_move_of(&output).is_some());
    }

    #[test]
    fn ponderhit_releases_a_pondering_search() {
        let output = run(&[
            "position startpos",
            "go ponder wtime 50 btime 50 winc 0 binc 0",
            "ponderhit",
        ]);

        let conclusion = best_move_of(&output).expect("a bestmove line");
        assert!(conclusion.best.is_some());
    }

    #[test]
    fn a_pondering_search_never_concludes_before_its_release() {
        let output = run(&[
            "position startpos",
            "go ponder depth 1",
            "isready",
            "stop",
        ]);

        // The depth-limited ponder search finishes on its own, yet the
        // best move must wait for the release.
        let before_stop = output
            .iter()
            .position(|o| o == &Outbound::ReadyOk)
            .expect("readyok is answered during ponder");

        let bestmove = output
            .iter()
            .position(|o| matches!(o, Outbound::BestMove(_)))
            .expect("a bestmove line");

        assert!(before_stop < bestmove);
    }

    #[test]
    fn searchmoves_restricts_the_reply() {
        let output = run(&["position startpos", "go depth 3 searchmoves e2e4"]);
        let conclusion = best_move_of(&output).expect("a bestmove line");
        assert_eq!(conclusion.best.clone().map(|m| m.to_string()), Some("e2e4".to_owned()));
    }

    #[test]
    fn perft_reports_reference_counts() {
        let output = run(&["position startpos", "perft 3"]);

        match output.last() {
            Some(Outbound::Perft { nodes, depth, .. }) => {
                assert_eq!(*depth, 3);
                assert_eq!(*nodes, 8902);
            }
            other => panic!("expected a perft report, got {other:?}"),
        }
    }

    #[test]
    fn options_are_applied_between_searches() {
        let input = MockStream::new([
            parsed("setoption name Hash value 8"),
            parsed("setoption name MultiPV value 2"),
            parsed("setoption name UCI_Chess960 value true"),
            parsed("setoption name FakeSplit value true"),
        ]);

        let mut uci = MockUci::new(input, Vec::new());
        block_on(uci.run()).expect("runs cleanly");

        assert_eq!(uci.engine.options().hash.get(), 8);
        assert_eq!(uci.engine.options().multi_pv.get(), 2);
        assert!(uci.engine.options().chess960);
        assert!(uci.engine.options().fake_split);
    }

    #[test]
    fn moves_after_startpos_are_applied() {
        let input = MockStream::new([parsed("position startpos moves e2e4 e7e5 g1f3")]);
        let mut uci = MockUci::new(input, Vec::new());
        block_on(uci.run()).expect("runs cleanly");

        assert_eq!(uci.pos.game_ply(), 3);
        assert_eq!(uci.pos.turn(), Color::Black);
    }

    #[test]
    fn illegal_moves_are_rejected_without_corrupting_the_state() {
        let input = MockStream::new([parsed("position startpos moves e2e5")]);
        let mut uci = MockUci::new(input, Vec::new());
        block_on(uci.run()).expect("runs cleanly");

        assert_eq!(uci.pos.game_ply(), 0);
    }
}
