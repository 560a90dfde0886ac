use std::ops::AddAssign;

use log::trace;

use crate::{
    extract::replay::{replay_game, ReplayError},
    record::PositionRecord,
};

/// Games skipped before replay. A game is rejected when its text contains
/// every marker of at least one rule.
#[derive(Debug, Clone, Default)]
pub struct GameFilter {
    rules: Vec<Vec<String>>,
}

impl GameFilter {
    pub fn new(rules: Vec<Vec<String>>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| rule.into_iter().filter(|m| !m.is_empty()).collect::<Vec<_>>())
            .filter(|rule| !rule.is_empty())
            .collect();
        Self { rules }
    }

    pub fn rejects(&self, game: &str) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.iter().all(|marker| game.contains(marker.as_str())))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub games: u64,
    pub accepted: u64,
    pub missing_id: u64,
    pub rejected: u64,
    pub unfinished: u64,
    pub invalid: u64,
    pub positions: u64,
}

impl AddAssign for ExtractStats {
    fn add_assign(&mut self, other: Self) {
        self.games += other.games;
        self.accepted += other.accepted;
        self.missing_id += other.missing_id;
        self.rejected += other.rejected;
        self.unfinished += other.unfinished;
        self.invalid += other.invalid;
        self.positions += other.positions;
    }
}

#[derive(Debug, Default)]
pub struct BatchOutput {
    pub records: Vec<PositionRecord>,
    pub stats: ExtractStats,
}

/// Turn a batch of game texts into position records. Pure: no I/O.
pub fn extract_batch(games: &[String], filter: &GameFilter) -> BatchOutput {
    let mut output = BatchOutput::default();
    for text in games {
        output.stats.games += 1;
        if filter.rejects(text) {
            output.stats.rejected += 1;
            continue;
        }

        let game = match replay_game(text) {
            Ok(game) => game,
            Err(ReplayError::Unfinished) => {
                output.stats.unfinished += 1;
                continue;
            }
            Err(err) => {
                trace!("Skipping game: {}", err);
                output.stats.invalid += 1;
                continue;
            }
        };
        let Some(id) = game.tags.id else {
            output.stats.missing_id += 1;
            continue;
        };

        output.stats.accepted += 1;
        output.stats.positions += game.positions.len() as u64;
        output
            .records
            .extend(game.positions.into_iter().map(|fen| PositionRecord {
                fen,
                result: game.result,
                game_id: id.clone(),
            }));
    }
    output
}
