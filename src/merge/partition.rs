use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::Instant,
};

use log::info;

use crate::{
    chunk::line::{write_aggregate, LineFormat},
    error::Result,
    merge::{
        kway::{merge_files, AggregateSink, MergeStats},
        ReaderOptions,
    },
    record::{AggregateRecord, Bucket},
};

/// Paths of the occurrence bucket files, indexed by [`Bucket::slot`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BucketFiles {
    paths: Vec<PathBuf>,
    counts: Vec<u64>,
}

impl BucketFiles {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            paths: Bucket::all().map(|b| dir.join(b.file_name())).collect(),
            counts: vec![0; Bucket::COUNT],
        }
    }

    /// Whether every bucket has a path and a count. Only a hand-edited or
    /// truncated checkpoint can fail this.
    pub fn is_complete(&self) -> bool {
        self.paths.len() == Bucket::COUNT && self.counts.len() == Bucket::COUNT
    }

    pub fn path(&self, bucket: Bucket) -> &Path {
        &self.paths[bucket.slot()]
    }

    /// Records routed to `bucket` during the final merge.
    pub fn count(&self, bucket: Bucket) -> u64 {
        self.counts[bucket.slot()]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Sink routing every finished aggregate to the bucket matching its
/// occurrence count.
pub struct BucketSink {
    files: BucketFiles,
    writers: Vec<BufWriter<File>>,
}

impl BucketSink {
    /// Create (truncating) every bucket file in `dir`.
    pub fn create(dir: &Path) -> Result<Self> {
        let files = BucketFiles::in_dir(dir);
        let writers = Bucket::all()
            .map(|bucket| Ok(BufWriter::new(File::create(files.path(bucket))?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { files, writers })
    }

    pub fn into_files(self) -> BucketFiles {
        self.files
    }
}

impl AggregateSink for BucketSink {
    fn accept(&mut self, record: AggregateRecord) -> Result<()> {
        let slot = Bucket::for_occurrence(record.occurrence).slot();
        write_aggregate(&mut self.writers[slot], &record)?;
        self.files.counts[slot] += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        for writer in self.writers.iter_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Merge the last `<= fan_in` chunks in one pass, writing the bucket files
/// into `dir`. Runs on the calling thread: there is a single global merge
/// cursor.
pub fn final_merge(
    inputs: &[PathBuf],
    dir: &Path,
    format: LineFormat,
    options: &ReaderOptions,
) -> Result<(BucketFiles, MergeStats)> {
    let start = Instant::now();
    info!("Final merge of {} chunks into occurrence buckets", inputs.len());

    let mut sink = BucketSink::create(dir)?;
    let stats = merge_files(inputs, format, options, &mut sink)?;
    let files = sink.into_files();

    for bucket in Bucket::all() {
        info!("  bucket {:>3}: {} positions", bucket.to_string(), files.count(bucket));
    }
    info!(
        "Final merge wrote {} distinct positions in {:?}",
        stats.positions_written,
        start.elapsed()
    );
    Ok((files, stats))
}
