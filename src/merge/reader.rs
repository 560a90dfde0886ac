use std::{
    collections::VecDeque,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use crate::error::Result;

/// Streaming line reader over one sorted chunk.
///
/// Blocks of `block_size` bytes are read and split on newlines into a small
/// read-ahead queue. A line cut by a block boundary is kept in `carry` until
/// the next block completes it; at end of stream a non-empty remainder is
/// yielded as the final line.
pub struct ChunkReader<R = File> {
    path: PathBuf,
    source: Option<R>,
    block: Vec<u8>,
    carry: Vec<u8>,
    pending: VecDeque<Vec<u8>>,
    read_ahead: usize,
    lines_read: u64,
}

impl ChunkReader<File> {
    pub fn open(path: &Path, block_size: usize, read_ahead: usize) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(path, file, block_size, read_ahead))
    }
}

impl<R: Read> ChunkReader<R> {
    pub fn new(path: &Path, source: R, block_size: usize, read_ahead: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            source: Some(source),
            block: vec![0; block_size.max(1)],
            carry: Vec::new(),
            pending: VecDeque::with_capacity(read_ahead.max(1)),
            read_ahead: read_ahead.max(1),
            lines_read: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// Make sure a head line is buffered. Returns `false` once the chunk is
    /// exhausted, at which point the source and buffers have been released.
    pub fn fill(&mut self) -> Result<bool> {
        if !self.pending.is_empty() {
            return Ok(true);
        }

        while self.pending.len() < self.read_ahead {
            let Some(source) = self.source.as_mut() else {
                break;
            };

            let n = source.read(&mut self.block)?;
            if n == 0 {
                if !self.carry.is_empty() {
                    self.pending.push_back(std::mem::take(&mut self.carry));
                }
                self.release();
                break;
            }
            self.split_block(n);
        }
        Ok(!self.pending.is_empty())
    }

    /// Current head line, if [`fill`](Self::fill) reported one.
    pub fn head(&self) -> Option<&[u8]> {
        self.pending.front().map(Vec::as_slice)
    }

    /// Drop the head line.
    pub fn advance(&mut self) {
        if self.pending.pop_front().is_some() {
            self.lines_read += 1;
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.source.is_none() && self.pending.is_empty()
    }

    fn split_block(&mut self, n: usize) {
        let mut rest = &self.block[..n];
        while let Some(newline) = rest.iter().position(|&b| b == b'\n') {
            let piece = &rest[..newline];
            rest = &rest[newline + 1..];
            let line = if self.carry.is_empty() {
                piece.to_vec()
            } else {
                let mut line = std::mem::take(&mut self.carry);
                line.extend_from_slice(piece);
                line
            };
            if !line.is_empty() {
                self.pending.push_back(line);
            }
        }
        self.carry.extend_from_slice(rest);
    }

    fn release(&mut self) {
        self.source = None;
        self.block = Vec::new();
        self.carry = Vec::new();
    }
}
