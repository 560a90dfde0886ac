use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use log::{debug, info};

use crate::{
    chunk::{
        line::{write_index, write_raw, INDEX_HEADER},
        raw_chunk_path, ChunkFile,
    },
    error::Result,
    record::PositionRecord,
};

/// Rotating writer for raw chunk files.
///
/// Exactly one chunk is open at a time. When it holds `chunk_size` records it
/// is closed and `chunk_<n+1>.tmp` is opened before the next record is
/// written, so every finished chunk except possibly the last is full.
pub struct ChunkWriter {
    dir: PathBuf,
    chunk_size: usize,
    next_index: usize,
    current: Option<OpenChunk>,
    finished: Vec<ChunkFile>,
    index: Option<BufWriter<File>>,
    records_written: u64,
}

struct OpenChunk {
    index: usize,
    path: PathBuf,
    writer: BufWriter<File>,
    records: usize,
}

impl ChunkWriter {
    /// Create a writer placing chunks in `dir`. When `index_path` is given,
    /// every record's `(fen, game_id)` is also appended there.
    pub fn new(dir: &Path, chunk_size: usize, index_path: Option<&Path>) -> Result<Self> {
        let index = match index_path {
            Some(path) => {
                let mut writer = BufWriter::new(File::create(path)?);
                writeln!(writer, "{}", INDEX_HEADER)?;
                info!("Writing position index to {}", path.display());
                Some(writer)
            }
            None => None,
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            chunk_size,
            next_index: 0,
            current: None,
            finished: Vec::new(),
            index,
            records_written: 0,
        })
    }

    pub fn write(&mut self, records: &[PositionRecord]) -> Result<()> {
        for record in records {
            self.ensure_room()?;
            if let Some(chunk) = self.current.as_mut() {
                write_raw(&mut chunk.writer, record)?;
                chunk.records += 1;
            }

            if let Some(index) = self.index.as_mut() {
                write_index(index, record)?;
            }
            self.records_written += 1;
        }
        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Close the open chunk and the index, returning every finished chunk in
    /// creation order.
    pub fn finish(mut self) -> Result<Vec<ChunkFile>> {
        self.close_current()?;
        if let Some(mut index) = self.index.take() {
            index.flush()?;
        }
        info!(
            "Wrote {} positions into {} chunks",
            self.records_written,
            self.finished.len()
        );
        Ok(self.finished)
    }

    fn ensure_room(&mut self) -> Result<()> {
        let full = matches!(&self.current, Some(chunk) if chunk.records >= self.chunk_size);
        if full {
            self.close_current()?;
        }
        if self.current.is_none() {
            let index = self.next_index;
            self.next_index += 1;
            let path = raw_chunk_path(&self.dir, index);
            debug!("Opening chunk {}", path.display());
            self.current = Some(OpenChunk {
                index,
                writer: BufWriter::new(File::create(&path)?),
                path,
                records: 0,
            });
        }
        Ok(())
    }

    fn close_current(&mut self) -> Result<()> {
        if let Some(mut chunk) = self.current.take() {
            chunk.writer.flush()?;
            debug!("Closed chunk {} with {} records", chunk.path.display(), chunk.records);
            self.finished.push(ChunkFile {
                index: chunk.index,
                path: chunk.path,
                records: chunk.records,
            });
        }
        Ok(())
    }
}
