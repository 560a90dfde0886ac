//! Multi-phase bounded fan-in merge of sorted chunks.
//!
//! Phase 1 converts raw `fen|result` chunks into aggregate chunks; later
//! phases keep merging groups of at most `fan_in` chunks until few enough
//! remain for the final merge, which partitions the aggregates into
//! occurrence buckets.

pub mod kway;
pub mod partition;
pub mod phase;
pub mod reader;

pub use {
    kway::{merge_files, merge_readers, merge_to_chunk, AggregateSink, ChunkSink, MergeStats},
    partition::{final_merge, BucketFiles, BucketSink},
    phase::{PhaseReducer, ReducerInput, Reduction},
    reader::ChunkReader,
};

/// Buffering used by every chunk reader of a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Bytes requested per block read.
    pub block_size: usize,
    /// Lines decoded ahead of the merge cursor.
    pub read_ahead: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            block_size: 64 * 1024,
            read_ahead: 4096,
        }
    }
}
