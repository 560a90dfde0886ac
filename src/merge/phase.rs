use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::{
    chunk::{line::LineFormat, phase_chunk_path, phase_dir},
    error::{Error, Result},
    manifest::{Manifest, Stage},
    merge::{
        kway::{merge_to_chunk, MergeStats},
        partition::{final_merge, BucketFiles},
        ReaderOptions,
    },
    progress::Progress,
};

/// Where the reduction starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReducerInput {
    /// Sorted raw chunks straight from the sorter.
    Sorted(Vec<PathBuf>),
    /// Aggregate chunks left by a completed phase.
    Merged { phase: usize, chunks: Vec<PathBuf> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingChunks,
    MergingPhase(usize),
    Reducing,
    FinalMerging,
    Done,
}

/// Outcome of a full reduction.
#[derive(Debug, Clone)]
pub struct Reduction {
    pub buckets: BucketFiles,
    /// Bounded merge phases run by this reducer (excluding the final merge).
    pub phases_run: usize,
    pub distinct_positions: u64,
}

/// Drives merge phases over a shrinking chunk set until at most `fan_in`
/// chunks remain, then partitions them into occurrence buckets.
pub struct PhaseReducer {
    temp_dir: PathBuf,
    fan_in: usize,
    retries: usize,
    retain_sorted_chunks: bool,
    options: ReaderOptions,
    progress_interval: Duration,
    pool: rayon::ThreadPool,
}

impl PhaseReducer {
    pub fn new(temp_dir: &Path, fan_in: usize, pool_size: usize) -> Result<Self> {
        if fan_in < 2 {
            return Err(Error::InvalidConfig(format!(
                "fan_in must be at least 2, got {}",
                fan_in
            )));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(pool_size.max(1))
            .thread_name(|i| format!("merge-{}", i))
            .build()?;
        Ok(Self {
            temp_dir: temp_dir.to_path_buf(),
            fan_in,
            retries: 2,
            retain_sorted_chunks: false,
            options: ReaderOptions::default(),
            progress_interval: Duration::from_secs(10),
            pool,
        })
    }

    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn retain_sorted_chunks(mut self, retain: bool) -> Self {
        self.retain_sorted_chunks = retain;
        self
    }

    pub fn reader_options(mut self, options: ReaderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn run(&self, input: ReducerInput) -> Result<Reduction> {
        let (mut chunks, mut phase, mut format) = match input {
            ReducerInput::Sorted(chunks) => (chunks, 0, LineFormat::Raw),
            ReducerInput::Merged { phase, chunks } => (chunks, phase, LineFormat::Aggregate),
        };
        let mut phases_run = 0;
        let mut reduction = None;
        let mut state = State::AwaitingChunks;

        while state != State::Done {
            let next = match state {
                // Phase 1 converts raw lines, so it runs even for a single chunk.
                State::AwaitingChunks if phase == 0 => State::MergingPhase(1),
                State::AwaitingChunks => State::Reducing,
                State::MergingPhase(n) => {
                    chunks = self.merge_phase(n, &chunks, format)?;
                    phase = n;
                    format = LineFormat::Aggregate;
                    phases_run += 1;
                    State::Reducing
                }
                State::Reducing if chunks.len() > self.fan_in => State::MergingPhase(phase + 1),
                State::Reducing => State::FinalMerging,
                State::FinalMerging => {
                    let (buckets, stats) =
                        final_merge(&chunks, &self.temp_dir, format, &self.options)?;
                    Manifest::record(
                        &self.temp_dir,
                        Stage::Partitioned {
                            buckets: buckets.clone(),
                        },
                    )?;
                    self.discard(&chunks, phase)?;
                    reduction = Some(Reduction {
                        buckets,
                        phases_run,
                        distinct_positions: stats.positions_written,
                    });
                    State::Done
                }
                State::Done => State::Done,
            };
            debug!("Reducer: {:?} -> {:?}", state, next);
            state = next;
        }

        reduction.ok_or_else(|| Error::InvalidCheckpoint("reduction ended without a final merge".into()))
    }

    /// Merge `inputs` in groups of `fan_in` into `phase<n>/`, record the
    /// phase, then delete its inputs.
    fn merge_phase(&self, n: usize, inputs: &[PathBuf], format: LineFormat) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(phase_dir(&self.temp_dir, n))?;
        let groups: Vec<&[PathBuf]> = inputs.chunks(self.fan_in).collect();
        info!(
            "Phase {}: merging {} chunks in {} groups of at most {}",
            n,
            inputs.len(),
            groups.len(),
            self.fan_in
        );

        let progress = Progress::new(
            format!("phase {}", n),
            "tasks",
            Some(groups.len() as u64),
            self.progress_interval,
        );
        let merged = self.pool.install(|| {
            groups
                .par_iter()
                .enumerate()
                .map(|(m, group)| {
                    let output = phase_chunk_path(&self.temp_dir, n, m);
                    let stats = self.merge_task(group, &output, format)?;
                    progress.add(1);
                    Ok((output, stats))
                })
                .collect::<Result<Vec<(PathBuf, MergeStats)>>>()
        })?;

        let lines: u64 = merged.iter().map(|(_, s)| s.lines_read).sum();
        let written: u64 = merged.iter().map(|(_, s)| s.positions_written).sum();
        progress.finish(&format!("{} lines in, {} aggregates out", lines, written));

        let outputs: Vec<PathBuf> = merged.into_iter().map(|(path, _)| path).collect();
        Manifest::record(
            &self.temp_dir,
            Stage::Merged {
                phase: n,
                chunks: outputs.clone(),
            },
        )?;
        if format == LineFormat::Raw && self.retain_sorted_chunks {
            info!("Keeping {} sorted chunks", inputs.len());
        } else {
            self.discard(inputs, n - 1)?;
        }
        Ok(outputs)
    }

    /// One merge task. Only I/O failures are retried: the output is
    /// recreated from scratch and the inputs are untouched until the phase
    /// is recorded.
    fn merge_task(&self, group: &[PathBuf], output: &Path, format: LineFormat) -> Result<MergeStats> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match merge_to_chunk(group, output, format, &self.options) {
                Ok(stats) => return Ok(stats),
                Err(err @ Error::Io(_)) if attempts <= self.retries => {
                    warn!(
                        "Merge into {} failed (attempt {}): {}, retrying",
                        output.display(),
                        attempts,
                        err
                    );
                }
                Err(err) => {
                    return Err(Error::MergeFailed {
                        output: output.to_path_buf(),
                        attempts,
                        source: Box::new(err),
                    })
                }
            }
        }
    }

    /// Delete consumed chunks, and their phase directory once empty.
    fn discard(&self, chunks: &[PathBuf], phase: usize) -> Result<()> {
        for chunk in chunks {
            fs::remove_file(chunk)?;
        }
        if phase > 0 {
            let dir = phase_dir(&self.temp_dir, phase);
            if dir.is_dir() && fs::read_dir(&dir)?.next().is_none() {
                fs::remove_dir(&dir)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chunk::line::parse_aggregate, record::Bucket};

    fn sorted_chunk(dir: &Path, index: usize, lines: &[&str]) -> PathBuf {
        let path = crate::chunk::sorted_chunk_path(dir, index);
        let mut body = lines.join("\n");
        body.push('\n');
        fs::write(&path, body).unwrap();
        path
    }

    fn reducer(dir: &Path, fan_in: usize) -> PhaseReducer {
        PhaseReducer::new(dir, fan_in, 2)
            .unwrap()
            .progress_interval(Duration::from_secs(3600))
    }

    fn bucket_fens(files: &BucketFiles, bucket: Bucket) -> Vec<(String, u64)> {
        fs::read_to_string(files.path(bucket))
            .unwrap()
            .lines()
            .map(|l| {
                let r = parse_aggregate(l).unwrap();
                (r.fen, r.occurrence)
            })
            .collect()
    }

    #[test]
    fn single_chunk_still_runs_phase_one() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = sorted_chunk(dir.path(), 0, &["a|1-0", "a|0-1", "b|1/2-1/2"]);

        let reduction = reducer(dir.path(), 6)
            .run(ReducerInput::Sorted(vec![chunk.clone()]))
            .unwrap();

        assert_eq!(reduction.phases_run, 1);
        assert_eq!(reduction.distinct_positions, 2);
        assert_eq!(bucket_fens(&reduction.buckets, Bucket::Exact(2)), vec![("a".into(), 2)]);
        assert_eq!(bucket_fens(&reduction.buckets, Bucket::Exact(1)), vec![("b".into(), 1)]);
        assert!(!chunk.exists());
        assert!(!phase_dir(dir.path(), 1).exists());
    }

    #[test]
    fn reduces_until_fan_in_is_reached() {
        let dir = tempfile::tempdir().unwrap();
        // Seven chunks at fan-in 2: 7 -> 4 -> 2, then the final merge.
        let chunks: Vec<PathBuf> = (0..7)
            .map(|i| sorted_chunk(dir.path(), i, &["common|1-0", "x|0-1"]))
            .collect();

        let reduction = reducer(dir.path(), 2)
            .run(ReducerInput::Sorted(chunks))
            .unwrap();

        assert_eq!(reduction.phases_run, 2);
        assert_eq!(
            bucket_fens(&reduction.buckets, Bucket::Exact(7)),
            vec![("common".into(), 7), ("x".into(), 7)]
        );
        let manifest = Manifest::load(dir.path()).unwrap().unwrap();
        assert!(matches!(manifest.stage, Stage::Partitioned { .. }));
    }

    #[test]
    fn retained_sorted_chunks_survive() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = vec![
            sorted_chunk(dir.path(), 0, &["a|1-0"]),
            sorted_chunk(dir.path(), 1, &["a|0-1"]),
        ];
        reducer(dir.path(), 6)
            .retain_sorted_chunks(true)
            .run(ReducerInput::Sorted(chunks.clone()))
            .unwrap();
        assert!(chunks.iter().all(|c| c.exists()));
    }

    #[test]
    fn resumes_from_a_merged_phase() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(phase_dir(dir.path(), 3)).unwrap();
        let a = phase_chunk_path(dir.path(), 3, 0);
        let b = phase_chunk_path(dir.path(), 3, 1);
        fs::write(&a, "p\t6\t6\t0\t0\n").unwrap();
        fs::write(&b, "p\t5\t0\t5\t0\nq\t1\t0\t0\t1\n").unwrap();

        let reduction = reducer(dir.path(), 6)
            .run(ReducerInput::Merged {
                phase: 3,
                chunks: vec![a, b],
            })
            .unwrap();

        assert_eq!(reduction.phases_run, 0);
        assert_eq!(bucket_fens(&reduction.buckets, Bucket::TenPlus), vec![("p".into(), 11)]);
        assert!(!phase_dir(dir.path(), 3).exists());
    }

    #[test]
    fn io_failures_are_retried_then_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("chunk_0_sorted.tmp");

        let err = reducer(dir.path(), 6)
            .retries(2)
            .run(ReducerInput::Sorted(vec![missing]))
            .unwrap_err();
        assert!(matches!(err, Error::MergeFailed { attempts: 3, .. }));
    }

    #[test]
    fn decode_failures_are_not_retried_and_keep_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = sorted_chunk(dir.path(), 0, &["a|bogus"]);

        let err = reducer(dir.path(), 6)
            .run(ReducerInput::Sorted(vec![chunk.clone()]))
            .unwrap_err();
        match err {
            Error::MergeFailed {
                attempts, source, ..
            } => {
                assert_eq!(attempts, 1);
                assert!(matches!(*source, Error::MalformedLine { .. }));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(chunk.exists());
    }

    #[test]
    fn rejects_fan_in_below_two() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            PhaseReducer::new(dir.path(), 1, 1),
            Err(Error::InvalidConfig(_))
        ));
    }
}
