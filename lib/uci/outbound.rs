use crate::eval::PAWN_MID;
use crate::search::{Conclusion, HashSize, Info, Mate, MultiPv, ScoreKind, SkillLevel};
use crate::search::ThreadCount;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

/// A message sent to the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    UciOk,
    ReadyOk,
    Info(Info),
    Perft {
        depth: u32,
        nodes: u64,
        time: Duration,
    },
    BestMove(Conclusion),
}

impl From<Info> for Outbound {
    fn from(info: Info) -> Self {
        Outbound::Info(info)
    }
}

impl From<Conclusion> for Outbound {
    fn from(conclusion: Conclusion) -> Self {
        Outbound::BestMove(conclusion)
    }
}

impl Display for Outbound {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Outbound::ReadyOk => f.write_str("readyok"),

            Outbound::BestMove(Conclusion { best: None, .. }) => f.write_str("bestmove 0000"),

            Outbound::BestMove(Conclusion {
                best: Some(best),
                ponder,
            }) => {
                write!(f, "bestmove {best}")?;

                // The protocol treats the ponder move as optional, so
                // it is simply omitted when there is none.
                if let Some(ponder) = ponder {
                    write!(f, " ponder {ponder}")?;
                }

                Ok(())
            }

            Outbound::Info(Info::Pv {
                depth,
                seldepth,
                multipv,
                score,
                kind,
                nodes,
                time,
                pv,
            }) => {
                let millis = time.as_millis().max(1) as u64;

                write!(f, "info depth {depth} seldepth {seldepth} multipv {multipv}")?;

                match score.mate() {
                    Mate::None => write!(f, " score cp {}", score.get() * 100 / PAWN_MID)?,
                    Mate::Mating(p) => write!(f, " score mate {}", (p + 1) / 2)?,
                    Mate::Mated(p) => write!(f, " score mate {}", -(p / 2))?,
                }

                match kind {
                    ScoreKind::Exact => {}
                    ScoreKind::LowerBound => f.write_str(" lowerbound")?,
                    ScoreKind::UpperBound => f.write_str(" upperbound")?,
                }

                write!(
                    f,
                    " nodes {nodes} nps {} time {millis}",
                    nodes * 1000 / millis
                )?;

                if !pv.is_empty() {
                    f.write_str(" pv")?;
                    for m in pv {
                        write!(f, " {m}")?;
                    }
                }

                Ok(())
            }

            Outbound::Info(Info::CurrMove {
                depth,
                currmove,
                number,
            }) => {
                write!(
                    f,
                    "info depth {depth} currmove {currmove} currmovenumber {number}"
                )
            }

            Outbound::Perft { depth, nodes, time } => {
                let millis = time.as_millis().max(1) as u64;

                write!(
                    f,
                    "info depth {depth} nodes {nodes} nps {} time {millis}",
                    nodes * 1000 / millis
                )
            }

            Outbound::UciOk => {
                writeln!(f, "id name Ember {}", env!("CARGO_PKG_VERSION"))?;
                writeln!(f, "id author the Ember developers")?;

                writeln!(
                    f,
                    "option name Hash type spin default {} min {} max {}",
                    HashSize::default(),
                    HashSize::MIN,
                    HashSize::MAX
                )?;

                writeln!(f, "option name Clear Hash type button")?;

                writeln!(
                    f,
                    "option name Threads type spin default {} min {} max {}",
                    ThreadCount::default(),
                    ThreadCount::MIN,
                    ThreadCount::MAX
                )?;

                writeln!(
                    f,
                    "option name MultiPV type spin default {} min {} max {}",
                    MultiPv::default(),
                    MultiPv::MIN,
                    MultiPv::MAX
                )?;

                writeln!(
                    f,
                    "option name Skill Level type spin default {} min {} max {}",
                    SkillLevel::default(),
                    SkillLevel::MIN,
                    SkillLevel::MAX
                )?;

                writeln!(f, "option name Ponder type check default false")?;
                writeln!(f, "option name UCI_Chess960 type check default false")?;
                writeln!(f, "option name FakeSplit type check default false")?;
                writeln!(f, "option name OwnBook type check default false")?;
                writeln!(f, "option name Book File type string default book.bin")?;
                writeln!(f, "option name Best Book Move type check default false")?;
                writeln!(f, "option name Use Search Log type check default false")?;
                writeln!(
                    f,
                    "option name Search Log Filename type string default SearchLog.txt"
                )?;

                f.write_str("uciok")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::Score;

    #[test]
    fn bestmove_formats_with_and_without_ponder() {
        let both = Conclusion {
            best: "e2e4".parse().ok(),
            ponder: "e7e5".parse().ok(),
        };

        assert_eq!(
            Outbound::BestMove(both).to_string(),
            "bestmove e2e4 ponder e7e5"
        );

        let none = Conclusion::default();
        assert_eq!(Outbound::BestMove(none).to_string(), "bestmove 0000");
    }

    #[test]
    fn info_lines_carry_the_expected_fields() {
        let info = Info::Pv {
            depth: 7,
            seldepth: 12,
            multipv: 1,
            score: Score::new(PAWN_MID),
            kind: ScoreKind::Exact,
            nodes: 5000,
            time: Duration::from_millis(500),
            pv: vec!["e2e4".parse().unwrap(), "e7e5".parse().unwrap()],
        };

        assert_eq!(
            Outbound::Info(info).to_string(),
            "info depth 7 seldepth 12 multipv 1 score cp 100 nodes 5000 nps 10000 time 500 pv e2e4 e7e5"
        );
    }

    #[test]
    fn mate_scores_are_reported_in_full_moves() {
        let mate = |score| Outbound::Info(Info::Pv {
            depth: 5,
            seldepth: 5,
            multipv: 1,
            score,
            kind: ScoreKind::Exact,
            nodes: 1,
            time: Duration::from_millis(1),
            pv: Vec::new(),
        })
        .to_string();

        assert!(mate(Score::mate_in(3)).contains("score mate 2"));
        assert!(mate(Score::mated_in(4)).contains("score mate -2"));
        assert!(mate(Score::mated_in(0)).contains("score mate 0"));
    }

    #[test]
    fn bound_markers_follow_the_score() {
        let info = Info::Pv {
            depth: 3,
            seldepth: 3,
            multipv: 1,
            score: Score::new(50),
            kind: ScoreKind::LowerBound,
            nodes: 1,
            time: Duration::from_millis(1),
            pv: Vec::new(),
        };

        assert!(Outbound::Info(info)
            .to_string()
            .contains("score cp 25 lowerbound"));
    }

    #[test]
    fn uciok_advertises_the_options() {
        let advert = Outbound::UciOk.to_string();

        assert!(advert.contains("option name Hash type spin"));
        assert!(advert.contains("option name MultiPV type spin"));
        assert!(advert.contains("option name Skill Level type spin"));
        assert!(advert.contains("option name UCI_Chess960 type check"));
        assert!(advert.ends_with("uciok"));
    }
}
