//! Disk-backed GROUP-BY over chess positions.
//!
//! Every position of every finished game in a PGN corpus is written to
//! bounded chunk files, each chunk is sorted in memory, and the sorted chunks
//! are reduced by bounded fan-in K-way merges into per-position counts of
//! occurrences and results. The final merge partitions positions by
//! occurrence, from which three TSV files (seen at least 1, 2 and 10 times)
//! are assembled.

pub mod chunk;
pub mod config;
pub mod error;
pub mod extract;
pub mod manifest;
pub mod merge;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod record;

pub use {
    config::Config,
    error::{Error, Result},
    pipeline::{Pipeline, RunSummary},
    record::{AggregateRecord, Bucket, GameResult, PositionRecord},
};
