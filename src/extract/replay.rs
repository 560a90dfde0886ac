//! Mainline replay of one PGN game with `pgn-reader` and `shakmaty`.

use std::mem;

use pgn_reader::{BufferedReader, RawHeader, SanPlus, Skip, Visitor};
use shakmaty::{fen::Fen, CastlingMode, Chess, Outcome, Position};

use crate::record::{normalized_fen, GameResult};

/// Tags the extractor cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameTags {
    pub id: Option<String>,
    pub site: Option<String>,
    pub date: Option<String>,
    pub white_elo: Option<u32>,
    pub black_elo: Option<u32>,
    /// Set for games from a non-standard starting position.
    pub fen: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayedGame {
    pub tags: GameTags,
    pub result: GameResult,
    /// Normalized FEN before every mainline ply, then the final position.
    pub positions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    #[error("no game found")]
    Empty,
    #[error("invalid FEN tag: {0}")]
    InvalidFen(String),
    #[error("illegal move {san} at ply {ply}")]
    IllegalMove { san: String, ply: usize },
    #[error("game has no decisive or drawn result")]
    Unfinished,
}

#[derive(Default)]
struct GameReplay {
    tags: GameTags,
    position: Chess,
    positions: Vec<String>,
    outcome: Option<Outcome>,
    error: Option<ReplayError>,
}

fn decode(value: RawHeader<'_>) -> Option<String> {
    value.decode_utf8().ok().map(|s| s.into_owned())
}

impl Visitor for GameReplay {
    type Result = std::result::Result<ReplayedGame, ReplayError>;

    fn begin_game(&mut self) {
        *self = GameReplay::default();
    }

    fn header(&mut self, key: &[u8], value: RawHeader<'_>) {
        match key {
            b"ID" => self.tags.id = decode(value).filter(|id| !id.trim().is_empty()),
            b"Site" => self.tags.site = decode(value),
            b"Date" => self.tags.date = decode(value),
            b"WhiteElo" => self.tags.white_elo = btoi::btou(value.as_bytes()).ok(),
            b"BlackElo" => self.tags.black_elo = btoi::btou(value.as_bytes()).ok(),
            b"FEN" => {
                let text = String::from_utf8_lossy(value.as_bytes()).into_owned();
                let parsed = Fen::from_ascii(value.as_bytes())
                    .ok()
                    .and_then(|fen| fen.into_position(CastlingMode::Chess960).ok());
                match parsed {
                    Some(position) => self.position = position,
                    None => self.error = Some(ReplayError::InvalidFen(text.clone())),
                }
                self.tags.fen = Some(text);
            }
            _ => {}
        }
    }

    fn end_headers(&mut self) -> Skip {
        Skip(self.error.is_some())
    }

    fn san(&mut self, san_plus: SanPlus) {
        if self.error.is_some() {
            return;
        }
        match san_plus.san.to_move(&self.position) {
            Ok(mv) => {
                self.positions.push(normalized_fen(&self.position));
                self.position.play_unchecked(&mv);
            }
            Err(_) => {
                self.error = Some(ReplayError::IllegalMove {
                    san: san_plus.to_string(),
                    ply: self.positions.len() + 1,
                });
            }
        }
    }

    fn begin_variation(&mut self) -> Skip {
        Skip(true)
    }

    fn outcome(&mut self, outcome: Option<Outcome>) {
        self.outcome = outcome;
    }

    fn end_game(&mut self) -> Self::Result {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        let result = self
            .outcome
            .map(GameResult::from_outcome)
            .ok_or(ReplayError::Unfinished)?;
        let mut positions = mem::take(&mut self.positions);
        positions.push(normalized_fen(&self.position));
        Ok(ReplayedGame {
            tags: mem::take(&mut self.tags),
            result,
            positions,
        })
    }
}

/// Replay the first game in `text`.
///
/// Every position is collected before the result is known, so a game that
/// turns out to be illegal or unfinished yields nothing at all.
pub fn replay_game(text: &str) -> Result<ReplayedGame, ReplayError> {
    let mut reader = BufferedReader::new(text.as_bytes());
    let mut visitor = GameReplay::default();
    match reader.read_game(&mut visitor) {
        Ok(Some(result)) => result,
        Ok(None) | Err(_) => Err(ReplayError::Empty),
    }
}
