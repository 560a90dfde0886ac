use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Input file not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Nothing to resume: no checkpoint manifest in {}", .0.display())]
    NothingToResume(PathBuf),

    #[error("Checkpoint cannot be resumed: {0}")]
    InvalidCheckpoint(String),

    #[error("Malformed {format} line in {}: {line:?}", .path.display())]
    MalformedLine {
        format: &'static str,
        path: PathBuf,
        line: String,
    },

    #[error("Input {} is not sorted by key", .0.display())]
    UnsortedInput(PathBuf),

    #[error("Chunk {} holds more than {limit} records", .path.display())]
    ChunkOverCapacity { path: PathBuf, limit: usize },

    #[error("Merge into {} failed after {attempts} attempts: {source}", .output.display())]
    MergeFailed {
        output: PathBuf,
        attempts: usize,
        source: Box<Error>,
    },

    #[error("A pipeline thread panicked: {0}")]
    ThreadPanicked(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
