//! Run configuration: defaults, TOML file loading and validation.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    merge::ReaderOptions,
};

pub const DEFAULT_CHUNK_SIZE: usize = 3_000_000;
pub const DEFAULT_FAN_IN: usize = 6;

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_reject_markers() -> Vec<Vec<String>> {
    vec![
        vec!["[WhiteIsComp \"Yes\"]".to_string(), "[BlackIsComp \"Yes\"]".to_string()],
        vec!["[Event \"CCRL".to_string()],
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Derivative)]
#[derivative(Default)]
#[serde(default)]
pub struct Config {
    /// PGN file to read; `.zst`, `.bz2` and `.gz` are decompressed.
    pub input: PathBuf,
    /// Where the three final TSVs are published.
    #[derivative(Default(value = "PathBuf::from(\".\")"))]
    pub output_dir: PathBuf,
    /// Chunks, phase directories, buckets and the manifest.
    #[derivative(Default(value = "PathBuf::from(\"tmp\")"))]
    pub temp_dir: PathBuf,

    /// Positions per chunk file.
    #[derivative(Default(value = "DEFAULT_CHUNK_SIZE"))]
    pub chunk_size: usize,
    /// Chunks merged by one merge task.
    #[derivative(Default(value = "DEFAULT_FAN_IN"))]
    pub fan_in: usize,
    /// Threads in the extraction pool and in the merge pool.
    #[derivative(Default(value = "default_pool_size()"))]
    pub pool_size: usize,
    /// Skip extraction and continue from the checkpoint manifest.
    pub resume: bool,

    /// Games per extraction batch.
    #[derivative(Default(value = "1000"))]
    pub batch_size: usize,
    /// Pending batches before the input stream pauses; 0 means 4x `pool_size`.
    pub max_queue_size: usize,
    #[derivative(Default(value = "2"))]
    pub sort_parallelism: usize,
    /// Keep `chunk_<n>_sorted.tmp` after phase 1 consumed them.
    pub retain_sorted_chunks: bool,
    /// Leave the temp directory in place after a successful run.
    pub keep_temp: bool,

    #[derivative(Default(value = "true"))]
    pub write_index: bool,
    /// Defaults to `positions_index.tsv` in `output_dir`.
    pub index_path: Option<PathBuf>,
    /// Reject rules. A game is skipped when its text contains every marker
    /// of any one rule; the defaults drop computer-vs-computer games and
    /// CCRL engine events, so a human playing an engine is kept.
    #[derivative(Default(value = "default_reject_markers()"))]
    pub reject_markers: Vec<Vec<String>>,

    #[derivative(Default(value = "2"))]
    pub merge_retries: usize,
    #[derivative(Default(value = "64 * 1024"))]
    pub read_buffer_size: usize,
    #[derivative(Default(value = "4096"))]
    pub read_ahead_lines: usize,
    #[derivative(Default(value = "10"))]
    pub progress_interval_secs: u64,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));
        if self.chunk_size == 0 {
            return invalid("chunk_size must be positive".into());
        }
        if self.fan_in < 2 {
            return invalid(format!("fan_in must be at least 2, got {}", self.fan_in));
        }
        if self.pool_size == 0 {
            return invalid("pool_size must be positive".into());
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be positive".into());
        }
        if self.read_buffer_size == 0 || self.read_ahead_lines == 0 {
            return invalid("read_buffer_size and read_ahead_lines must be positive".into());
        }
        if !self.resume && self.input.as_os_str().is_empty() {
            return invalid("no input file given".into());
        }
        Ok(())
    }

    pub fn effective_max_queue_size(&self) -> usize {
        if self.max_queue_size == 0 {
            self.pool_size * 4
        } else {
            self.max_queue_size
        }
    }

    pub fn index_path(&self) -> Option<PathBuf> {
        if !self.write_index {
            return None;
        }
        Some(
            self.index_path
                .clone()
                .unwrap_or_else(|| self.output_dir.join("positions_index.tsv")),
        )
    }

    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            block_size: self.read_buffer_size,
            read_ahead: self.read_ahead_lines,
        }
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.chunk_size, 3_000_000);
        assert_eq!(config.fan_in, 6);
        assert!(config.pool_size >= 1);
        assert!(!config.resume);
        assert!(config.write_index);
        assert_eq!(config.effective_max_queue_size(), config.pool_size * 4);
        assert_eq!(config.reader_options(), ReaderOptions::default());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("census.toml");
        fs::write(
            &path,
            "input = \"games.pgn.zst\"\nchunk_size = 500\nfan_in = 3\nreject_markers = []\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.input, PathBuf::from("games.pgn.zst"));
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.fan_in, 3);
        assert!(config.reject_markers.is_empty());
        assert_eq!(config.batch_size, 1000);
        config.validate().unwrap();
    }

    #[test]
    fn unknown_value_types_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("census.toml");
        fs::write(&path, "fan_in = \"six\"\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(Error::ConfigParse(_))));
    }

    #[test]
    fn validation_rejects_degenerate_values() {
        let base = Config {
            input: PathBuf::from("games.pgn"),
            ..Config::default()
        };
        base.validate().unwrap();

        for broken in [
            Config { chunk_size: 0, ..base.clone() },
            Config { fan_in: 1, ..base.clone() },
            Config { pool_size: 0, ..base.clone() },
            Config { input: PathBuf::new(), ..base.clone() },
        ] {
            assert!(matches!(broken.validate(), Err(Error::InvalidConfig(_))));
        }

        let resume = Config {
            input: PathBuf::new(),
            resume: true,
            ..base
        };
        resume.validate().unwrap();
    }

    #[test]
    fn index_path_follows_output_dir() {
        let config = Config {
            output_dir: PathBuf::from("out"),
            ..Config::default()
        };
        assert_eq!(config.index_path(), Some(PathBuf::from("out/positions_index.tsv")));
        let off = Config {
            write_index: false,
            ..config
        };
        assert_eq!(off.index_path(), None);
    }
}
