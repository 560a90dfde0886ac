//! Records flowing through the aggregation pipeline.
//!
//! A [`PositionRecord`] is produced once per extracted position and never
//! mutated. Merge workers fold records sharing a FEN key into an
//! [`AggregateRecord`], which is finally routed to an occurrence [`Bucket`].

use std::{fmt, num::NonZeroU32, str::FromStr};

use shakmaty::{fen::Fen, Chess, Color, EnPassantMode, Outcome, Position};

/// Final result of a game, as recorded in the movetext terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameResult {
    WhiteWin,
    BlackWin,
    Draw,
}

impl GameResult {
    pub fn as_str(self) -> &'static str {
        match self {
            GameResult::WhiteWin => "1-0",
            GameResult::BlackWin => "0-1",
            GameResult::Draw => "1/2-1/2",
        }
    }

    pub fn from_outcome(outcome: Outcome) -> GameResult {
        match outcome {
            Outcome::Decisive { winner: Color::White } => GameResult::WhiteWin,
            Outcome::Decisive { winner: Color::Black } => GameResult::BlackWin,
            Outcome::Draw => GameResult::Draw,
        }
    }
}

impl fmt::Display for GameResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameResult {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1-0" => Ok(GameResult::WhiteWin),
            "0-1" => Ok(GameResult::BlackWin),
            "1/2-1/2" => Ok(GameResult::Draw),
            _ => Err(()),
        }
    }
}

/// One position seen in one game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionRecord {
    pub fen: String,
    pub result: GameResult,
    pub game_id: String,
}

/// Normalized FEN of a position: the four semantic fields followed by a
/// fixed `0 1` move-count suffix, so transpositions reached at different
/// move numbers share a key.
pub fn normalized_fen(position: &Chess) -> String {
    let mut setup = position.clone().into_setup(EnPassantMode::Legal);
    setup.halfmoves = 0;
    setup.fullmoves = NonZeroU32::MIN;
    Fen::from_setup(setup).to_string()
}

/// Aggregated statistics for one FEN key.
///
/// Invariant: `occurrence == white + black + draw`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AggregateRecord {
    pub fen: String,
    pub occurrence: u64,
    pub white: u64,
    pub black: u64,
    pub draw: u64,
}

impl AggregateRecord {
    pub fn empty(fen: String) -> Self {
        Self {
            fen,
            occurrence: 0,
            white: 0,
            black: 0,
            draw: 0,
        }
    }

    /// Count one raw occurrence of this position.
    pub fn add_result(&mut self, result: GameResult) {
        self.occurrence += 1;
        match result {
            GameResult::WhiteWin => self.white += 1,
            GameResult::BlackWin => self.black += 1,
            GameResult::Draw => self.draw += 1,
        }
    }

    /// Fold in counts already aggregated by an earlier phase.
    pub fn add_counts(&mut self, counts: &Counts) {
        self.occurrence += counts.occurrence;
        self.white += counts.white;
        self.black += counts.black;
        self.draw += counts.draw;
    }

    pub fn is_consistent(&self) -> bool {
        self.occurrence == self.white + self.black + self.draw
    }
}

/// Numeric fields of an aggregate line, decoded without its key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub occurrence: u64,
    pub white: u64,
    pub black: u64,
    pub draw: u64,
}

/// Partition of final aggregates by occurrence count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    /// Exactly this many occurrences, 1 through 9.
    Exact(u8),
    /// Ten or more occurrences.
    TenPlus,
}

impl Bucket {
    pub const COUNT: usize = 10;

    /// Every bucket in publication order: 1..9 then 10+.
    pub fn all() -> impl Iterator<Item = Bucket> {
        (1..=9).map(Bucket::Exact).chain(std::iter::once(Bucket::TenPlus))
    }

    pub fn for_occurrence(occurrence: u64) -> Bucket {
        match occurrence {
            n @ 1..=9 => Bucket::Exact(n as u8),
            _ => Bucket::TenPlus,
        }
    }

    /// Slot of this bucket in an array ordered like [`Bucket::all`].
    pub fn slot(self) -> usize {
        match self {
            Bucket::Exact(n) => usize::from(n) - 1,
            Bucket::TenPlus => 9,
        }
    }

    pub fn min_occurrence(self) -> u64 {
        match self {
            Bucket::Exact(n) => u64::from(n),
            Bucket::TenPlus => 10,
        }
    }

    pub fn file_name(self) -> String {
        match self {
            Bucket::Exact(n) => format!("{}occ.tmp", n),
            Bucket::TenPlus => "10plusocc.tmp".to_string(),
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bucket::Exact(n) => write!(f, "{}", n),
            Bucket::TenPlus => f.write_str("10+"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shakmaty::san::San;

    fn play(moves: &[&str]) -> Chess {
        let mut pos = Chess::default();
        for token in moves {
            let san: San = token.parse().unwrap();
            let mv = san.to_move(&pos).unwrap();
            pos.play_unchecked(&mv);
        }
        pos
    }

    #[test]
    fn normalized_fen_fixes_move_counters() {
        let pos = play(&["Nf3", "Nf6", "Ng1", "Ng8"]);
        assert_eq!(
            normalized_fen(&pos),
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"
        );
        assert_eq!(normalized_fen(&pos), normalized_fen(&Chess::default()));
    }

    #[test]
    fn normalized_fen_omits_unusable_en_passant() {
        let pos = play(&["e4"]);
        assert_eq!(
            normalized_fen(&pos),
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1"
        );
    }

    #[test]
    fn results_round_trip_through_pgn_tokens() {
        for result in [GameResult::WhiteWin, GameResult::BlackWin, GameResult::Draw] {
            assert_eq!(result.as_str().parse::<GameResult>(), Ok(result));
        }
        assert!("*".parse::<GameResult>().is_err());
    }

    #[test]
    fn bucket_boundaries() {
        assert_eq!(Bucket::for_occurrence(1), Bucket::Exact(1));
        assert_eq!(Bucket::for_occurrence(9), Bucket::Exact(9));
        assert_eq!(Bucket::for_occurrence(10), Bucket::TenPlus);
        assert_eq!(Bucket::for_occurrence(12_345), Bucket::TenPlus);
        assert_eq!(Bucket::TenPlus.file_name(), "10plusocc.tmp");
        assert_eq!(Bucket::Exact(3).file_name(), "3occ.tmp");
    }

    #[test]
    fn bucket_slots_follow_publication_order() {
        let slots: Vec<usize> = Bucket::all().map(Bucket::slot).collect();
        assert_eq!(slots, (0..Bucket::COUNT).collect::<Vec<_>>());
    }

    #[test]
    fn aggregate_tracks_results() {
        let mut agg = AggregateRecord::empty("x".to_string());
        agg.add_result(GameResult::WhiteWin);
        agg.add_result(GameResult::Draw);
        agg.add_counts(&Counts {
            occurrence: 3,
            white: 1,
            black: 2,
            draw: 0,
        });
        assert_eq!(agg.occurrence, 5);
        assert_eq!((agg.white, agg.black, agg.draw), (2, 2, 1));
        assert!(agg.is_consistent());
    }
}
