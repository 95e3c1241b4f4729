use crate::search::{HashSize, MultiPv, SkillLevel, ThreadCount};
use crate::util::parsers::*;
use derive_more::with_trait::{Display, Error, From};
use nom::error::Error as ParseError;
use nom::{branch::*, bytes::complete::*, combinator::*, sequence::*, *};
use std::time::Duration;

/// A position command, before it is resolved against the board state.
///
/// Move tokens are validated later, once the castling convention in
/// effect is known.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct PositionSpec {
    pub fen: Option<String>,
    pub moves: Vec<String>,
}

/// A `setoption` command.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum EngineOption {
    Hash(HashSize),
    ClearHash,
    Threads(ThreadCount),
    MultiPv(MultiPv),
    SkillLevel(SkillLevel),
    Chess960(bool),
    Ponder(bool),
    FakeSplit(bool),
    OwnBook(bool),
    BookFile(String),
    BestBookMove(bool),
    UseSearchLog(bool),
    SearchLogFilename(String),
}

/// A command received from the front end.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Inbound {
    Position(PositionSpec),
    Go {
        depth: Option<i32>,
        nodes: Option<u64>,
        move_time: Option<Duration>,
        wtime: Option<Duration>,
        btime: Option<Duration>,
        winc: Option<Duration>,
        binc: Option<Duration>,
        movestogo: Option<u32>,
        mate: Option<u32>,
        search_moves: Vec<String>,
        ponder: bool,
        infinite: bool,
    },
    SetOption(EngineOption),
    Perft(u32),
    IsReady,
    UciNewGame,
    Uci,
    Stop,
    PonderHit,
    Quit,
}

impl Inbound {
    pub fn go_infinite() -> Self {
        Self::Go {
            depth: None,
            nodes: None,
            move_time: None,
            wtime: None,
            btime: None,
            winc: None,
            binc: None,
            movestogo: None,
            mate: None,
            search_moves: Vec::new(),
            ponder: false,
            infinite: true,
        }
    }
}

#[derive(Debug, Display, Clone, Eq, PartialEq, Error, From)]
pub enum ParseUciError<'s> {
    #[display("unrecognized sequence `{}`", _0.input)]
    Unrecognized(#[error(not(source))] ParseError<&'s str>),
    #[display("no such option `{_0}`")]
    UnknownOption(#[error(not(source))] &'s str),
}

fn boolean(input: &str) -> Result<bool, std::str::ParseBoolError> {
    input.trim().parse()
}

#[derive(Debug, Default)]
pub struct UciParser;

impl UciParser {
    pub fn parse<'s>(&mut self, s: &'s str) -> Result<Inbound, ParseUciError<'s>> {
        let mut cmd = t(alt((
            tag("position"),
            tag("go"),
            tag("setoption"),
            tag("perft"),
            tag("isready"),
            tag("ucinewgame"),
            tag("uci"),
            tag("stop"),
            tag("ponderhit"),
            tag("quit"),
        )));

        match cmd.parse(s).finish()? {
            (args, "position") => {
                let word6 = (word, t(word), t(word), t(word), t(word), word);
                let fen = field("fen", t(recognize(word6))).map(|s: &str| Some(s.to_owned()));
                let startpos = t(tag("startpos")).map(|_| None);
                let moves = opt(field("moves", rest));

                let mut position = terminated((alt((startpos, fen)), moves), eof);
                let (_, (fen, moves)) = position.parse(args).finish()?;

                Ok(Inbound::Position(PositionSpec {
                    fen,
                    moves: moves
                        .unwrap_or_default()
                        .split_ascii_whitespace()
                        .map(str::to_owned)
                        .collect(),
                }))
            }

            (args, "go") => {
                let wtime = field("wtime", millis);
                let winc = field("winc", millis);
                let btime = field("btime", millis);
                let binc = field("binc", millis);
                let time = field("movetime", millis);
                let nodes = field("nodes", int);
                let depth = field("depth", int);
                let mate = field("mate", int);
                let mtg = field("movestogo", int);
                let moves = field("searchmoves", rest);
                let ponder = t(tag("ponder"));
                let inf = t(tag("infinite"));

                let params = gather((
                    wtime, winc, btime, binc, time, nodes, depth, mate, mtg, moves, ponder, inf,
                ));

                let mut go = terminated(opt(params), eof).map(Option::unwrap_or_default);
                let (_, (wtime, winc, btime, binc, time, nodes, depth, mate, mtg, moves, p, inf)) =
                    go.parse(args).finish()?;

                Ok(Inbound::Go {
                    depth,
                    nodes,
                    move_time: time,
                    wtime,
                    btime,
                    winc,
                    binc,
                    movestogo: mtg,
                    mate,
                    search_moves: moves
                        .unwrap_or_default()
                        .split_ascii_whitespace()
                        .map(str::to_owned)
                        .collect(),
                    ponder: p.is_some(),
                    infinite: inf.is_some(),
                })
            }

            (args, "setoption") => {
                let option = |n| preceded((t(tag("name")), tag_no_case(n), t(tag("value"))), rest);
                let button = |n| terminated((t(tag("name")), t(tag_no_case(n))), eof);

                use EngineOption::*;
                let options = alt((
                    option("hash").map_res(str::parse).map(Hash),
                    option("threads").map_res(str::parse).map(Threads),
                    option("multipv").map_res(str::parse).map(MultiPv),
                    option("skill level").map_res(str::parse).map(SkillLevel),
                    option("uci_chess960").map_res(boolean).map(Chess960),
                    option("ponder").map_res(boolean).map(Ponder),
                    option("fakesplit").map_res(boolean).map(FakeSplit),
                    option("ownbook").map_res(boolean).map(OwnBook),
                    option("book file").map(|s: &str| BookFile(s.trim().to_owned())),
                    option("best book move").map_res(boolean).map(BestBookMove),
                    option("use search log").map_res(boolean).map(UseSearchLog),
                    option("search log filename")
                        .map(|s: &str| SearchLogFilename(s.trim().to_owned())),
                    button("clear hash").map(|_| ClearHash),
                ));

                let mut setoption = terminated(options, eof);
                match setoption.parse(args).finish() {
                    Ok((_, option)) => Ok(Inbound::SetOption(option)),
                    Err(_) => Err(ParseUciError::UnknownOption(args.trim())),
                }
            }

            (args, "perft") => {
                let mut perft = terminated(t(int).map(Inbound::Perft), eof);
                let (_, uci) = perft.parse(args).finish()?;
                Ok(uci)
            }

            ("", "isready") => Ok(Inbound::IsReady),
            ("", "ucinewgame") => Ok(Inbound::UciNewGame),
            ("", "uci") => Ok(Inbound::Uci),
            ("", "stop") => Ok(Inbound::Stop),
            ("", "ponderhit") => Ok(Inbound::PonderHit),
            ("", "quit") => Ok(Inbound::Quit),

            #[expect(clippy::unreachable)]
            _ => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsing_position_with_startpos_succeeds() {
        let mut p = UciParser;

        assert_eq!(
            p.parse("position startpos"),
            Ok(Inbound::Position(PositionSpec::default()))
        );
    }

    #[test]
    fn parsing_position_with_startpos_and_moves_succeeds() {
        let mut p = UciParser;

        assert_eq!(
            p.parse("position startpos moves e2e4 e7e5"),
            Ok(Inbound::Position(PositionSpec {
                fen: None,
                moves: vec!["e2e4".to_owned(), "e7e5".to_owned()],
            }))
        );
    }

    #[test]
    fn parsing_position_with_fen_succeeds() {
        let mut p = UciParser;
        let fen = "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1";

        assert_eq!(
            p.parse(&format!("position fen {fen}")),
            Ok(Inbound::Position(PositionSpec {
                fen: Some(fen.to_owned()),
                moves: Vec::new(),
            }))
        );
    }

    #[test]
    fn parsing_go_collects_clock_fields_in_any_order() {
        let mut p = UciParser;

        let Ok(Inbound::Go {
            wtime,
            btime,
            winc,
            binc,
            movestogo,
            ..
        }) = p.parse("go btime 2000 wtime 1000 winc 30 binc 40 movestogo 20")
        else {
            panic!("expected a go command");
        };

        assert_eq!(wtime, Some(Duration::from_millis(1000)));
        assert_eq!(btime, Some(Duration::from_millis(2000)));
        assert_eq!(winc, Some(Duration::from_millis(30)));
        assert_eq!(binc, Some(Duration::from_millis(40)));
        assert_eq!(movestogo, Some(20));
    }

    #[test]
    fn parsing_go_with_no_arguments_runs_forever() {
        let mut p = UciParser;

        let Ok(Inbound::Go {
            depth,
            nodes,
            move_time,
            infinite,
            ..
        }) = p.parse("go")
        else {
            panic!("expected a go command");
        };

        assert_eq!(depth, None);
        assert_eq!(nodes, None);
        assert_eq!(move_time, None);
        assert!(!infinite);
    }

    #[test]
    fn parsing_go_flags_and_search_moves_succeeds() {
        let mut p = UciParser;

        let Ok(Inbound::Go {
            ponder,
            search_moves,
            ..
        }) = p.parse("go ponder searchmoves e2e4 d2d4")
        else {
            panic!("expected a go command");
        };

        assert!(ponder);
        assert_eq!(search_moves, vec!["e2e4".to_owned(), "d2d4".to_owned()]);
    }

    #[test]
    fn parsing_go_infinite_succeeds() {
        let mut p = UciParser;
        assert_eq!(p.parse("go infinite"), Ok(Inbound::go_infinite()));
    }

    #[test]
    fn parsing_known_options_succeeds() {
        let mut p = UciParser;

        assert_eq!(
            p.parse("setoption name Hash value 64"),
            Ok(Inbound::SetOption(EngineOption::Hash(HashSize::new(64))))
        );

        assert_eq!(
            p.parse("setoption name Skill Level value 10"),
            Ok(Inbound::SetOption(EngineOption::SkillLevel(
                SkillLevel::new(10)
            )))
        );

        assert_eq!(
            p.parse("setoption name UCI_Chess960 value true"),
            Ok(Inbound::SetOption(EngineOption::Chess960(true)))
        );

        assert_eq!(
            p.parse("setoption name Clear Hash"),
            Ok(Inbound::SetOption(EngineOption::ClearHash))
        );

        assert_eq!(
            p.parse("setoption name FakeSplit value true"),
            Ok(Inbound::SetOption(EngineOption::FakeSplit(true)))
        );

        assert_eq!(
            p.parse("setoption name Book File value book.bin"),
            Ok(Inbound::SetOption(EngineOption::BookFile(
                "book.bin".to_owned()
            )))
        );
    }

    #[test]
    fn parsing_unknown_options_reports_them() {
        let mut p = UciParser;

        assert_eq!(
            p.parse("setoption name Bogus value 1"),
            Err(ParseUciError::UnknownOption("name Bogus value 1"))
        );
    }

    #[test]
    fn parsing_out_of_range_option_values_fails() {
        let mut p = UciParser;
        assert!(p.parse("setoption name Hash value 1000000").is_err());
    }

    #[test]
    fn parsing_bare_commands_succeeds() {
        let mut p = UciParser;

        assert_eq!(p.parse("uci"), Ok(Inbound::Uci));
        assert_eq!(p.parse("ucinewgame"), Ok(Inbound::UciNewGame));
        assert_eq!(p.parse("isready"), Ok(Inbound::IsReady));
        assert_eq!(p.parse("stop"), Ok(Inbound::Stop));
        assert_eq!(p.parse("ponderhit"), Ok(Inbound::PonderHit));
        assert_eq!(p.parse("quit"), Ok(Inbound::Quit));
        assert_eq!(p.parse("perft 3"), Ok(Inbound::Perft(3)));
    }

    #[test]
    fn parsing_unknown_commands_fails() {
        let mut p = UciParser;
        assert!(p.parse("xyzzy").is_err());
    }
}
