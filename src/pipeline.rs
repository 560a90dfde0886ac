//! End-to-end run: extract, sort, reduce, publish, clean up.

use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use log::{debug, info};

use crate::{
    chunk::sort_chunks,
    config::Config,
    error::{Error, Result},
    extract::{extract_to_chunks, ExtractionSummary},
    manifest::{Manifest, Stage, MANIFEST_FILE},
    merge::{PhaseReducer, ReducerInput},
    output::{assemble, sort_recurrent_bucket, PublishedFiles, SORTED_RECURRENT_FILE},
    progress::format_duration,
    record::Bucket,
};

#[derive(Debug, Clone)]
pub struct RunSummary {
    /// `None` when the run resumed from a checkpoint.
    pub extraction: Option<ExtractionSummary>,
    pub phases_run: usize,
    pub distinct_positions: u64,
    pub published: PublishedFiles,
    pub elapsed: Duration,
}

pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn run(&self) -> Result<RunSummary> {
        let start = Instant::now();
        let temp_dir = &self.config.temp_dir;
        fs::create_dir_all(temp_dir)?;
        fs::create_dir_all(&self.config.output_dir)?;

        let (stage, extraction) = if self.config.resume {
            let manifest =
                Manifest::load(temp_dir)?.ok_or_else(|| Error::NothingToResume(temp_dir.clone()))?;
            manifest.verify()?;
            info!(
                "Resuming from checkpoint written {}: {}",
                manifest.updated_at.format("%Y-%m-%d %H:%M:%S UTC"),
                manifest.stage.describe()
            );
            (manifest.stage, None)
        } else {
            let (chunks, summary) = self.extract_and_sort()?;
            (Stage::Sorted { chunks }, Some(summary))
        };

        let (buckets, phases_run, distinct_positions) = match stage {
            Stage::Sorted { chunks } => self.reduce(ReducerInput::Sorted(chunks))?,
            Stage::Merged { phase, chunks } => self.reduce(ReducerInput::Merged { phase, chunks })?,
            Stage::Partitioned { buckets } => {
                let total = buckets.total();
                (buckets, 0, total)
            }
        };

        let sorted = temp_dir.join(SORTED_RECURRENT_FILE);
        sort_recurrent_bucket(buckets.path(Bucket::TenPlus), &sorted)?;
        let published = assemble(&buckets, &sorted, &self.config.output_dir)?;

        if self.config.keep_temp {
            info!("Keeping temporary files in {}", temp_dir.display());
        } else {
            remove_artifacts(temp_dir)?;
        }

        let elapsed = start.elapsed();
        info!(
            "Done in {}: {} distinct positions after {} merge phases",
            format_duration(elapsed),
            distinct_positions,
            phases_run
        );
        Ok(RunSummary {
            extraction,
            phases_run,
            distinct_positions,
            published,
            elapsed,
        })
    }

    /// Extract the input into raw chunks, sort them, and checkpoint the
    /// sorted set. Any checkpoint from an earlier run is discarded first.
    pub fn extract_and_sort(&self) -> Result<(Vec<PathBuf>, ExtractionSummary)> {
        let config = &self.config;
        fs::create_dir_all(&config.temp_dir)?;
        if let Some(index) = config.index_path() {
            if let Some(parent) = index.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
        }
        Manifest::remove(&config.temp_dir)?;

        let summary = extract_to_chunks(config)?;
        let sorted = sort_chunks(&summary.chunks, config.chunk_size, config.sort_parallelism)?;
        let chunks: Vec<PathBuf> = sorted.into_iter().map(|chunk| chunk.path).collect();
        Manifest::record(
            &config.temp_dir,
            Stage::Sorted {
                chunks: chunks.clone(),
            },
        )?;
        Ok((chunks, summary))
    }

    fn reduce(&self, input: ReducerInput) -> Result<(crate::merge::BucketFiles, usize, u64)> {
        let config = &self.config;
        let reduction = PhaseReducer::new(&config.temp_dir, config.fan_in, config.pool_size)?
            .retries(config.merge_retries)
            .retain_sorted_chunks(config.retain_sorted_chunks)
            .reader_options(config.reader_options())
            .progress_interval(config.progress_interval())
            .run(input)?;
        Ok((
            reduction.buckets,
            reduction.phases_run,
            reduction.distinct_positions,
        ))
    }
}

/// Whether `name` is a file this crate writes into the temp directory.
fn is_artifact(name: &str) -> bool {
    if name == MANIFEST_FILE || name == SORTED_RECURRENT_FILE {
        return true;
    }
    if let Some(rest) = name.strip_prefix("chunk_") {
        let index = rest
            .strip_suffix("_sorted.tmp")
            .or_else(|| rest.strip_suffix(".tmp"));
        return index.is_some_and(|i| !i.is_empty() && i.bytes().all(|b| b.is_ascii_digit()));
    }
    Bucket::all().any(|bucket| bucket.file_name() == name)
}

fn is_phase_dir(name: &str) -> bool {
    name.strip_prefix("phase")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Delete known artifacts from `dir`, then `dir` itself if nothing else is
/// left in it.
fn remove_artifacts(dir: &Path) -> Result<()> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            if is_phase_dir(name) {
                fs::remove_dir_all(&path)?;
                removed += 1;
            }
        } else if is_artifact(name) {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    debug!("Removed {} temporary files from {}", removed, dir.display());
    if fs::read_dir(dir)?.next().is_none() {
        fs::remove_dir(dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_only_its_own_artifacts() {
        for name in [
            "chunk_0.tmp",
            "chunk_12_sorted.tmp",
            "3occ.tmp",
            "10plusocc.tmp",
            "10plusocc_sorted.tmp",
            "manifest.json",
        ] {
            assert!(is_artifact(name), "{}", name);
        }
        for name in ["chunk_.tmp", "chunk_a.tmp", "notes.txt", "games.pgn", "11occ.tmp"] {
            assert!(!is_artifact(name), "{}", name);
        }
        assert!(is_phase_dir("phase3"));
        assert!(!is_phase_dir("phases"));
    }

    #[test]
    fn cleanup_keeps_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("work");
        fs::create_dir_all(temp.join("phase1")).unwrap();
        fs::write(temp.join("phase1").join("chunk_0.tmp"), "").unwrap();
        fs::write(temp.join("chunk_0_sorted.tmp"), "").unwrap();
        fs::write(temp.join("keep.me"), "").unwrap();

        remove_artifacts(&temp).unwrap();
        assert!(temp.join("keep.me").exists());
        assert!(!temp.join("phase1").exists());
        assert!(!temp.join("chunk_0_sorted.tmp").exists());

        fs::remove_file(temp.join("keep.me")).unwrap();
        remove_artifacts(&temp).unwrap();
        assert!(!temp.exists());
    }

    #[test]
    fn resume_without_checkpoint_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(Config {
            temp_dir: dir.path().join("tmp"),
            output_dir: dir.path().join("out"),
            resume: true,
            ..Config::default()
        })
        .unwrap();
        assert!(matches!(pipeline.run(), Err(Error::NothingToResume(_))));
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let result = Pipeline::new(Config {
            input: PathBuf::from("games.pgn"),
            fan_in: 1,
            ..Config::default()
        });
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
