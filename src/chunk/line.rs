//! Line formats of the temporary files.
//!
//! Raw chunk lines are `fen|result`; every file produced by a merge holds
//! aggregate lines `fen\tocc\twhite\tblack\tdraw`. Each format has exactly
//! one decoder and one encoder here.

use std::io::{self, Write};

use crate::record::{AggregateRecord, Counts, GameResult, PositionRecord};

pub const RAW_DELIMITER: u8 = b'|';
pub const AGGREGATE_DELIMITER: u8 = b'\t';

/// Header shared by the published TSV files.
pub const AGGREGATE_HEADER: &str = "fen\toccurrence\twhite\tblack\tdraw";
pub const INDEX_HEADER: &str = "fen\tgame_id";

/// Format of the lines a merge reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineFormat {
    /// `fen|result`, produced by extraction and the chunk sorter.
    Raw,
    /// `fen\tocc\twhite\tblack\tdraw`, produced by every merge.
    Aggregate,
}

impl LineFormat {
    pub fn name(self) -> &'static str {
        match self {
            LineFormat::Raw => "raw",
            LineFormat::Aggregate => "aggregate",
        }
    }

    /// Sort/merge key of a line in this format: the bytes before the first delimiter.
    pub fn key(self, line: &[u8]) -> &[u8] {
        let delimiter = match self {
            LineFormat::Raw => RAW_DELIMITER,
            LineFormat::Aggregate => AGGREGATE_DELIMITER,
        };
        match line.iter().position(|&b| b == delimiter) {
            Some(end) => &line[..end],
            None => line,
        }
    }
}

/// Decode a raw chunk line into its key and result.
pub fn decode_raw(line: &[u8]) -> Option<(&[u8], GameResult)> {
    let split = line.iter().position(|&b| b == RAW_DELIMITER)?;
    let result = std::str::from_utf8(&line[split + 1..]).ok()?.parse().ok()?;
    Some((&line[..split], result))
}

/// Decode an aggregate line into its key and counts.
pub fn decode_aggregate(line: &[u8]) -> Option<(&[u8], Counts)> {
    let mut fields = line.split(|&b| b == AGGREGATE_DELIMITER);
    let fen = fields.next()?;
    let counts = Counts {
        occurrence: btoi::btou(fields.next()?).ok()?,
        white: btoi::btou(fields.next()?).ok()?,
        black: btoi::btou(fields.next()?).ok()?,
        draw: btoi::btou(fields.next()?).ok()?,
    };
    if fields.next().is_some() || fen.is_empty() {
        return None;
    }
    let total = counts.white.checked_add(counts.black)?.checked_add(counts.draw)?;
    if counts.occurrence == 0 || counts.occurrence != total {
        return None;
    }
    Some((fen, counts))
}

/// Decode an aggregate line into an owned record.
pub fn parse_aggregate(line: &str) -> Option<AggregateRecord> {
    let (fen, counts) = decode_aggregate(line.as_bytes())?;
    let mut record = AggregateRecord::empty(String::from_utf8_lossy(fen).into_owned());
    record.add_counts(&counts);
    Some(record)
}

pub fn write_raw<W: Write>(out: &mut W, record: &PositionRecord) -> io::Result<()> {
    writeln!(out, "{}|{}", record.fen, record.result)
}

pub fn write_aggregate<W: Write>(out: &mut W, record: &AggregateRecord) -> io::Result<()> {
    writeln!(
        out,
        "{}\t{}\t{}\t{}\t{}",
        record.fen, record.occurrence, record.white, record.black, record.draw
    )
}

pub fn write_index<W: Write>(out: &mut W, record: &PositionRecord) -> io::Result<()> {
    writeln!(out, "{}\t{}", record.fen, record.game_id)
}
