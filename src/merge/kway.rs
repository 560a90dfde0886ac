//! Streaming K-way merge with aggregation of equal keys.

use std::{
    fs::File,
    io::{BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use log::debug;

use crate::{
    chunk::line::{decode_aggregate, decode_raw, write_aggregate, LineFormat},
    error::{Error, Result},
    merge::{reader::ChunkReader, ReaderOptions},
    record::AggregateRecord,
};

/// Destination for finished aggregates, fed in non-decreasing key order.
pub trait AggregateSink {
    fn accept(&mut self, record: AggregateRecord) -> Result<()>;

    /// Flush and close. Called once, after the last record.
    fn finish(&mut self) -> Result<()>;
}

/// Sink writing aggregate lines to an intermediate chunk.
pub struct ChunkSink {
    writer: BufWriter<File>,
}

impl ChunkSink {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }
}

impl AggregateSink for ChunkSink {
    fn accept(&mut self, record: AggregateRecord) -> Result<()> {
        write_aggregate(&mut self.writer, &record)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub lines_read: u64,
    pub positions_written: u64,
}

/// Merge sorted `inputs` in `format` into a single aggregate chunk at `output`.
pub fn merge_to_chunk(
    inputs: &[PathBuf],
    output: &Path,
    format: LineFormat,
    options: &ReaderOptions,
) -> Result<MergeStats> {
    let mut sink = ChunkSink::create(output)?;
    let stats = merge_files(inputs, format, options, &mut sink)?;
    debug!(
        "Merged {} inputs into {}: {} lines in, {} positions out",
        inputs.len(),
        output.display(),
        stats.lines_read,
        stats.positions_written
    );
    Ok(stats)
}

pub fn merge_files<S: AggregateSink>(
    inputs: &[PathBuf],
    format: LineFormat,
    options: &ReaderOptions,
    sink: &mut S,
) -> Result<MergeStats> {
    let readers = inputs
        .iter()
        .map(|path| ChunkReader::open(path, options.block_size, options.read_ahead))
        .collect::<Result<Vec<_>>>()?;
    merge_readers(readers, format, sink)
}

/// Core merge loop.
///
/// Each iteration picks the minimal head key across live readers and
/// advances every reader whose head carries that key, folding the lines into
/// the pending aggregate. The pending aggregate is handed to the sink as soon
/// as the minimal key moves past it, and once more when every reader is
/// exhausted.
pub fn merge_readers<R: Read, S: AggregateSink>(
    mut readers: Vec<ChunkReader<R>>,
    format: LineFormat,
    sink: &mut S,
) -> Result<MergeStats> {
    let mut stats = MergeStats::default();
    let mut pending: Option<AggregateRecord> = None;

    loop {
        let mut i = 0;
        while i < readers.len() {
            if readers[i].fill()? {
                i += 1;
            } else {
                stats.lines_read += readers[i].lines_read();
                readers.swap_remove(i);
            }
        }
        if readers.is_empty() {
            break;
        }

        let mut min = 0;
        for i in 1..readers.len() {
            if head_key(&readers[i], format) < head_key(&readers[min], format) {
                min = i;
            }
        }
        let key = head_key(&readers[min], format).to_vec();

        if let Some(current) = pending.as_ref() {
            match current.fen.as_bytes().cmp(key.as_slice()) {
                std::cmp::Ordering::Equal => {}
                std::cmp::Ordering::Less => {
                    if let Some(done) = pending.take() {
                        sink.accept(done)?;
                        stats.positions_written += 1;
                    }
                }
                std::cmp::Ordering::Greater => {
                    return Err(Error::UnsortedInput(readers[min].path().to_path_buf()));
                }
            }
        }

        if pending.is_none() {
            let fen = String::from_utf8(key).map_err(|e| Error::MalformedLine {
                format: format.name(),
                path: readers[min].path().to_path_buf(),
                line: String::from_utf8_lossy(e.as_bytes()).into_owned(),
            })?;
            pending = Some(AggregateRecord::empty(fen));
        }
        let Some(record) = pending.as_mut() else {
            continue;
        };

        for reader in readers.iter_mut() {
            let Some(line) = reader.head() else {
                continue;
            };
            if format.key(line) != record.fen.as_bytes() {
                continue;
            }
            fold_line(record, line, format).ok_or_else(|| Error::MalformedLine {
                format: format.name(),
                path: reader.path().to_path_buf(),
                line: String::from_utf8_lossy(line).into_owned(),
            })?;
            reader.advance();
        }
    }

    if let Some(done) = pending.take() {
        sink.accept(done)?;
        stats.positions_written += 1;
    }
    sink.finish()?;
    Ok(stats)
}

fn head_key<R: Read>(reader: &ChunkReader<R>, format: LineFormat) -> &[u8] {
    reader.head().map(|line| format.key(line)).unwrap_or_default()
}

fn fold_line(record: &mut AggregateRecord, line: &[u8], format: LineFormat) -> Option<()> {
    match format {
        LineFormat::Raw => {
            let (_, result) = decode_raw(line)?;
            record.add_result(result);
        }
        LineFormat::Aggregate => {
            let (_, counts) = decode_aggregate(line)?;
            record.add_counts(&counts);
        }
    }
    Some(())
}
