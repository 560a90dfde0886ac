//! Checkpoint manifest recording the last completed stage of a run.
//!
//! The manifest is rewritten (write to a temporary name, then rename) after
//! sorting, after every merge phase and after the final merge. A resumed run
//! starts from whatever it records instead of guessing from file names.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    merge::BucketFiles,
};

pub const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    /// Extraction finished and every chunk is sorted; nothing merged yet.
    Sorted { chunks: Vec<PathBuf> },
    /// Merge phase `phase` finished; `chunks` are its aggregate outputs.
    Merged { phase: usize, chunks: Vec<PathBuf> },
    /// Final merge finished; only output assembly remains.
    Partitioned { buckets: BucketFiles },
}

impl Stage {
    pub fn describe(&self) -> String {
        match self {
            Stage::Sorted { chunks } => format!("{} sorted chunks", chunks.len()),
            Stage::Merged { phase, chunks } => {
                format!("phase {} complete, {} chunks", phase, chunks.len())
            }
            Stage::Partitioned { buckets } => {
                format!("final merge complete, {} positions", buckets.total())
            }
        }
    }

    /// Files this stage depends on.
    fn files(&self) -> Vec<&Path> {
        match self {
            Stage::Sorted { chunks } | Stage::Merged { chunks, .. } => {
                chunks.iter().map(PathBuf::as_path).collect()
            }
            Stage::Partitioned { buckets } => {
                crate::record::Bucket::all().map(|b| buckets.path(b)).collect()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub stage: Stage,
}

impl Manifest {
    pub fn new(stage: Stage) -> Self {
        Self {
            version: MANIFEST_VERSION,
            updated_at: Utc::now(),
            stage,
        }
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }

    pub fn load(dir: &Path) -> Result<Option<Manifest>> {
        let path = Self::path(dir);
        if !path.exists() {
            return Ok(None);
        }
        let manifest: Manifest = serde_json::from_slice(&fs::read(&path)?)?;
        if manifest.version != MANIFEST_VERSION {
            return Err(Error::InvalidCheckpoint(format!(
                "{} has version {}, expected {}",
                path.display(),
                manifest.version,
                MANIFEST_VERSION
            )));
        }
        Ok(Some(manifest))
    }

    /// Check every file the stage refers to is still on disk.
    pub fn verify(&self) -> Result<()> {
        if let Stage::Partitioned { buckets } = &self.stage {
            if !buckets.is_complete() {
                return Err(Error::InvalidCheckpoint(format!(
                    "expected {} occurrence buckets",
                    crate::record::Bucket::COUNT
                )));
            }
        }
        for file in self.stage.files() {
            if !file.exists() {
                return Err(Error::InvalidCheckpoint(format!(
                    "{} is missing",
                    file.display()
                )));
            }
        }
        Ok(())
    }

    /// Atomically record `stage` as the latest completed stage in `dir`.
    pub fn record(dir: &Path, stage: Stage) -> Result<Manifest> {
        let manifest = Manifest::new(stage);
        let path = Self::path(dir);
        let staging = path.with_extension("json.partial");
        fs::write(&staging, serde_json::to_vec_pretty(&manifest)?)?;
        fs::rename(&staging, &path)?;
        debug!("Checkpoint: {}", manifest.stage.describe());
        Ok(manifest)
    }

    pub fn remove(dir: &Path) -> Result<()> {
        let path = Self::path(dir);
        if path.exists() {
            info!("Discarding checkpoint {}", path.display());
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
