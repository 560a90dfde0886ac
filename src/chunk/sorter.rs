use std::{
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    time::Instant,
};

use log::{debug, info};
use rayon::prelude::*;

use crate::{
    chunk::{line::LineFormat, sorted_chunk_path, ChunkFile},
    error::{Error, Result},
};

/// Sort one raw chunk by FEN key and replace it with `chunk_<n>_sorted.tmp`.
///
/// The whole chunk is held in memory, which is only acceptable because the
/// writer caps chunks at `chunk_size` records; larger files are refused.
pub fn sort_chunk(chunk: &ChunkFile, chunk_size: usize) -> Result<ChunkFile> {
    if chunk.records > chunk_size {
        return Err(over_capacity(&chunk.path, chunk_size));
    }
    let dir = chunk.path.parent().unwrap_or_else(|| Path::new("."));
    let output = sorted_chunk_path(dir, chunk.index);
    let records = sort_file(&chunk.path, &output, chunk_size)?;
    fs::remove_file(&chunk.path)?;
    Ok(ChunkFile {
        index: chunk.index,
        path: output,
        records,
    })
}

/// Sort `input` into `output`, returning the number of lines.
///
/// Reading stops at the first line past `chunk_size`.
pub fn sort_file(input: &Path, output: &Path, chunk_size: usize) -> Result<usize> {
    let mut lines: Vec<Vec<u8>> = Vec::new();
    for line in BufReader::new(File::open(input)?).split(b'\n') {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        if lines.len() == chunk_size {
            return Err(over_capacity(input, chunk_size));
        }
        lines.push(line);
    }

    // Stable, so re-sorting a sorted chunk is byte-identical.
    lines.par_sort_by(|a, b| LineFormat::Raw.key(a).cmp(LineFormat::Raw.key(b)));

    let mut writer = BufWriter::new(File::create(output)?);
    for line in &lines {
        writer.write_all(line)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    debug!("Sorted {} lines into {}", lines.len(), output.display());
    Ok(lines.len())
}

fn over_capacity(path: &Path, limit: usize) -> Error {
    Error::ChunkOverCapacity {
        path: path.to_path_buf(),
        limit,
    }
}

/// Sort every chunk, at most `parallelism` at a time.
///
/// The first failure is returned; chunks already sorted stay on disk.
pub fn sort_chunks(
    chunks: &[ChunkFile],
    chunk_size: usize,
    parallelism: usize,
) -> Result<Vec<ChunkFile>> {
    let start = Instant::now();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallelism.max(1))
        .thread_name(|i| format!("chunk-sort-{}", i))
        .build()?;

    let sorted = pool.install(|| {
        chunks
            .par_iter()
            .with_max_len(1)
            .map(|chunk| sort_chunk(chunk, chunk_size))
            .collect::<Result<Vec<_>>>()
    })?;

    info!(
        "Sorted {} chunks in {:?} ({} in parallel)",
        sorted.len(),
        start.elapsed(),
        parallelism
    );
    Ok(sorted)
}
