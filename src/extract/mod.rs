//! Parallel extraction of positions from a PGN stream into raw chunk files.
//!
//! The calling thread reads the input and queues batches of game texts.
//! `pool_size` named worker threads replay the games, and a single writer
//! thread owns the [`ChunkWriter`], so chunk rotation never races.

pub mod queue;
pub mod replay;
pub mod source;
pub mod worker;

use std::{
    mem,
    panic::{self, AssertUnwindSafe},
    sync::atomic::{AtomicU64, Ordering},
    thread,
};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{info, warn};

pub use {
    queue::BatchQueue,
    replay::{replay_game, GameTags, ReplayError, ReplayedGame},
    source::{open_input, GameSplitter, InputSource},
    worker::{extract_batch, BatchOutput, ExtractStats, GameFilter},
};

use crate::{
    chunk::{ChunkFile, ChunkWriter},
    config::Config,
    error::{Error, Result},
    progress::Progress,
};

type Batch = Vec<String>;

#[derive(Debug, Clone)]
pub struct ExtractionSummary {
    pub chunks: Vec<ChunkFile>,
    pub stats: ExtractStats,
    /// Batches dropped because a worker panicked on them.
    pub lost_batches: u64,
    pub queue_pauses: u64,
}

pub fn extract_to_chunks(config: &Config) -> Result<ExtractionSummary> {
    let filter = GameFilter::new(config.reject_markers.clone());
    extract_with(config, |batch| extract_batch(batch, &filter))
}

/// Run the extraction pool with `extract` applied to every batch. A batch
/// whose `extract` call panics is dropped and counted in `lost_batches`.
pub fn extract_with<F>(config: &Config, extract: F) -> Result<ExtractionSummary>
where
    F: Fn(&[String]) -> BatchOutput + Sync,
{
    let source = open_input(&config.input)?;
    let index_path = config.index_path();
    let writer = ChunkWriter::new(&config.temp_dir, config.chunk_size, index_path.as_deref())?;
    let queue = BatchQueue::new(config.effective_max_queue_size());
    let lost = AtomicU64::new(0);
    let progress = Progress::new(
        "extract",
        "bytes",
        Some(source.total_bytes),
        config.progress_interval(),
    );
    info!(
        "Extracting with {} workers, {} games per batch, queue pausing at {} batches",
        config.pool_size,
        config.batch_size,
        config.effective_max_queue_size()
    );

    let (queue, extract, lost, progress) = (&queue, &extract, &lost, &progress);
    let (produced, written) = thread::scope(|scope| -> Result<_> {
        let (results_tx, results_rx) = bounded::<BatchOutput>(config.pool_size * 2);
        let writer_thread = thread::Builder::new()
            .name("chunk-writer".to_string())
            .spawn_scoped(scope, move || write_chunks(writer, results_rx, queue))?;

        let mut spawned = Ok(());
        for i in 0..config.pool_size {
            let results = results_tx.clone();
            let worker = thread::Builder::new()
                .name(format!("extract-{}", i))
                .spawn_scoped(scope, move || run_worker(i, queue, extract, results, lost));
            if let Err(err) = worker {
                spawned = Err(Error::from(err));
                break;
            }
        }
        drop(results_tx);

        let produced = spawned.and_then(|()| produce(source, config.batch_size, queue, progress));
        queue.close();
        let written = writer_thread
            .join()
            .map_err(|_| Error::ThreadPanicked("chunk-writer".to_string()))?;
        Ok((produced, written))
    })?;

    let games = produced?;
    let (chunks, stats) = written?;
    let lost_batches = lost.load(Ordering::Relaxed);
    progress.finish(&format!("{} games, {} positions", games, stats.positions));
    info!(
        "Extraction: {} games read, {} accepted, {} rejected by marker, {} without ID, {} unfinished, {} unreplayable",
        stats.games, stats.accepted, stats.rejected, stats.missing_id, stats.unfinished, stats.invalid
    );
    if lost_batches > 0 {
        warn!("{} batches were lost to worker panics", lost_batches);
    }

    Ok(ExtractionSummary {
        chunks,
        stats,
        lost_batches,
        queue_pauses: queue.pauses(),
    })
}

/// Read games and queue them in batches. Stops early, without error, when
/// the queue is closed by a failing writer.
fn produce(
    source: InputSource,
    batch_size: usize,
    queue: &BatchQueue<Batch>,
    progress: &Progress,
) -> Result<u64> {
    let InputSource {
        reader, bytes_read, ..
    } = source;
    let mut games = 0u64;
    let mut batch = Vec::with_capacity(batch_size);

    for game in GameSplitter::new(reader) {
        batch.push(game?);
        games += 1;
        if batch.len() < batch_size {
            continue;
        }
        let full = mem::replace(&mut batch, Vec::with_capacity(batch_size));
        if queue.push(full).is_err() {
            return Ok(games);
        }
        progress.set_with(bytes_read.load(Ordering::Relaxed), || {
            format!("{} games, {} batches pending", games, queue.len())
        });
    }
    if !batch.is_empty() && queue.push(batch).is_err() {
        return Ok(games);
    }
    progress.set_with(bytes_read.load(Ordering::Relaxed), String::new);
    Ok(games)
}

fn run_worker<F>(
    id: usize,
    queue: &BatchQueue<Batch>,
    extract: &F,
    results: Sender<BatchOutput>,
    lost: &AtomicU64,
) where
    F: Fn(&[String]) -> BatchOutput + Sync,
{
    while let Some(batch) = queue.pull() {
        match panic::catch_unwind(AssertUnwindSafe(|| extract(&batch))) {
            Ok(output) => {
                // The writer is gone; it reports its own error.
                if results.send(output).is_err() {
                    break;
                }
            }
            Err(_) => {
                lost.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Worker extract-{} panicked; dropped a batch of {} games",
                    id,
                    batch.len()
                );
            }
        }
    }
}

fn write_chunks(
    mut writer: ChunkWriter,
    results: Receiver<BatchOutput>,
    queue: &BatchQueue<Batch>,
) -> Result<(Vec<ChunkFile>, ExtractStats)> {
    let mut stats = ExtractStats::default();
    for output in results {
        if let Err(err) = writer.write(&output.records) {
            queue.close();
            return Err(err);
        }
        stats += output.stats;
    }
    Ok((writer.finish()?, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, path::Path, time::Duration};

    fn corpus(dir: &Path) -> std::path::PathBuf {
        let mut text = String::new();
        for i in 0..25 {
            text.push_str(&format!("[Event \"Test\"]\n[ID \"g{}\"]\n\n1. e4 e5 2. Nf3 1-0\n\n", i));
        }
        text.push_str("[ID \"bad\"]\n\n1. e4 e5 2. Ke3 1-0\n\n");
        text.push_str("[ID \"cc\"]\n[WhiteIsComp \"Yes\"]\n[BlackIsComp \"Yes\"]\n\n1. d4 0-1\n");
        let path = dir.join("games.pgn");
        fs::write(&path, text).unwrap();
        path
    }

    fn config(dir: &Path) -> Config {
        Config {
            input: corpus(dir),
            temp_dir: dir.to_path_buf(),
            output_dir: dir.to_path_buf(),
            chunk_size: 7,
            pool_size: 3,
            batch_size: 4,
            max_queue_size: 2,
            progress_interval_secs: 3600,
            ..Config::default()
        }
    }

    #[test]
    fn extracts_every_position_into_bounded_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let summary = extract_to_chunks(&config(dir.path())).unwrap();

        assert_eq!(summary.stats.games, 27);
        assert_eq!(summary.stats.accepted, 25);
        assert_eq!(summary.stats.invalid, 1);
        assert_eq!(summary.stats.rejected, 1);
        assert_eq!(summary.stats.positions, 100);
        assert_eq!(summary.lost_batches, 0);

        let sizes: Vec<usize> = summary.chunks.iter().map(|c| c.records).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 100);
        assert!(sizes[..sizes.len() - 1].iter().all(|&n| n == 7));
        for chunk in &summary.chunks {
            let body = fs::read_to_string(&chunk.path).unwrap();
            assert_eq!(body.lines().count(), chunk.records);
        }

        let index = fs::read_to_string(dir.path().join("positions_index.tsv")).unwrap();
        assert_eq!(index.lines().count(), 101);
        assert!(!index.contains("\tbad\n"));
    }

    #[test]
    fn panicking_batch_is_dropped_and_the_rest_written() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let filter = GameFilter::new(config.reject_markers.clone());

        // Batches hold four games, so g0..g3 go down together.
        let summary = extract_with(&config, |batch| {
            if batch.iter().any(|game| game.contains("[ID \"g0\"]")) {
                panic!("replay blew up");
            }
            extract_batch(batch, &filter)
        })
        .unwrap();

        assert_eq!(summary.lost_batches, 1);
        assert_eq!(summary.stats.games, 23);
        assert_eq!(summary.stats.accepted, 21);
        assert_eq!(summary.stats.positions, 84);
        assert_eq!(summary.chunks.iter().map(|c| c.records).sum::<usize>(), 84);

        let index = fs::read_to_string(dir.path().join("positions_index.tsv")).unwrap();
        assert_eq!(index.lines().count(), 85);
        assert!(!index.contains("\tg0\n"));
        assert!(index.contains("\tg4\n"));
    }

    #[test]
    fn missing_input_is_reported_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            input: dir.path().join("absent.pgn"),
            ..config(dir.path())
        };
        assert!(matches!(extract_to_chunks(&config), Err(Error::MissingInput(_))));
        assert!(!dir.path().join("chunk_0.tmp").exists());
    }

    #[test]
    fn progress_interval_zero_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            progress_interval_secs: 0,
            ..config(dir.path())
        };
        let summary = extract_to_chunks(&config).unwrap();
        assert_eq!(summary.stats.accepted, 25);
        assert!(config.progress_interval() < Duration::from_secs(1));
    }
}
