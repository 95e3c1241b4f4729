use crate::search::Score;
use shakmaty::uci::UciMove;
use std::time::Duration;

/// Whether a reported score is exact or fell outside the window.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ScoreKind {
    Exact,
    LowerBound,
    UpperBound,
}

/// A progress report emitted during the search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Info {
    /// A principal variation report.
    Pv {
        depth: i32,
        seldepth: i32,
        multipv: usize,
        score: Score,
        kind: ScoreKind,
        nodes: u64,
        time: Duration,
        pv: Vec<UciMove>,
    },

    /// The root move currently being searched.
    CurrMove {
        depth: i32,
        currmove: UciMove,
        number: usize,
    },
}

impl Info {
    /// The nodes searched per second, when the report carries them.
    pub fn nps(&self) -> Option<u64> {
        match self {
            Info::Pv { nodes, time, .. } => {
                let millis = time.as_millis().max(1) as u64;
                Some(nodes * 1000 / millis)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nps_scales_nodes_by_elapsed_time() {
        let info = Info::Pv {
            depth: 1,
            seldepth: 1,
            multipv: 1,
            score: Score::DRAW,
            kind: ScoreKind::Exact,
            nodes: 5000,
            time: Duration::from_millis(500),
            pv: Vec::new(),
        };

        assert_eq!(info.nps(), Some(10000));
    }
}
