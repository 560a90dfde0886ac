use std::{
    fs::File,
    io::{self, BufRead, BufReader, Read},
    mem,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use log::info;

use crate::error::{Error, Result};

/// Counts bytes pulled from the underlying file, before decompression.
struct CountingReader<R> {
    inner: R,
    count: Arc<AtomicU64>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// An opened PGN input, decompressed according to its extension.
pub struct InputSource {
    pub reader: Box<dyn BufRead + Send>,
    /// Compressed bytes consumed so far.
    pub bytes_read: Arc<AtomicU64>,
    /// Size of the file on disk.
    pub total_bytes: u64,
}

pub fn open_input(path: &Path) -> Result<InputSource> {
    if !path.is_file() {
        return Err(Error::MissingInput(path.to_path_buf()));
    }
    let file = File::open(path)?;
    let total_bytes = file.metadata()?.len();
    let bytes_read = Arc::new(AtomicU64::new(0));
    let counted = CountingReader {
        inner: file,
        count: bytes_read.clone(),
    };

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    let reader: Box<dyn BufRead + Send> = match extension {
        "zst" => Box::new(BufReader::new(zstd::stream::read::Decoder::new(counted)?)),
        "bz2" => Box::new(BufReader::new(bzip2::read::MultiBzDecoder::new(counted))),
        "gz" => Box::new(BufReader::new(flate2::read::MultiGzDecoder::new(counted))),
        _ => Box::new(BufReader::new(counted)),
    };
    info!(
        "Reading {} ({} bytes{})",
        path.display(),
        total_bytes,
        if extension.is_empty() || extension == "pgn" {
            String::new()
        } else {
            format!(", {} compressed", extension)
        }
    );

    Ok(InputSource {
        reader,
        bytes_read,
        total_bytes,
    })
}

/// Splits a PGN stream into the text of individual games.
///
/// A game ends where a tag line follows movetext, or at end of input.
/// Bytes that are not valid UTF-8 are replaced rather than rejected.
pub struct GameSplitter<R> {
    reader: R,
    line: Vec<u8>,
    current: String,
    in_movetext: bool,
}

impl<R: BufRead> GameSplitter<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            current: String::new(),
            in_movetext: false,
        }
    }
}

fn is_tag_line(line: &str) -> bool {
    let mut chars = line.trim_start().chars();
    chars.next() == Some('[') && chars.next().is_some_and(|c| c.is_ascii_alphabetic())
}

impl<R: BufRead> Iterator for GameSplitter<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => {
                    self.in_movetext = false;
                    let game = mem::take(&mut self.current);
                    return (!game.trim().is_empty()).then_some(Ok(game));
                }
                Ok(_) => {}
                Err(e) => return Some(Err(e)),
            }

            let text = String::from_utf8_lossy(&self.line);
            let tag = is_tag_line(&text);
            if tag && self.in_movetext {
                self.in_movetext = false;
                let game = mem::replace(&mut self.current, text.into_owned());
                return Some(Ok(game));
            }
            if !tag && !text.trim().is_empty() {
                self.in_movetext = true;
            }
            self.current.push_str(&text);
        }
    }
}
