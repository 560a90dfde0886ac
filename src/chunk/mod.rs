//! Bounded chunk files: rotation on write, in-memory sort per chunk, and the
//! line formats they carry.

pub mod line;
pub mod sorter;
pub mod writer;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use {
    line::LineFormat,
    sorter::{sort_chunk, sort_chunks},
    writer::ChunkWriter,
};

/// A finished chunk on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFile {
    pub index: usize,
    pub path: PathBuf,
    pub records: usize,
}

pub fn raw_chunk_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("chunk_{}.tmp", index))
}

pub fn sorted_chunk_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("chunk_{}_sorted.tmp", index))
}

pub fn phase_dir(dir: &Path, phase: usize) -> PathBuf {
    dir.join(format!("phase{}", phase))
}

pub fn phase_chunk_path(dir: &Path, phase: usize, index: usize) -> PathBuf {
    phase_dir(dir, phase).join(format!("chunk_{}.tmp", index))
}
