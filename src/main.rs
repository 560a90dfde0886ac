use std::{io::Write, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use position_census::{Config, Pipeline};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// PGN input (.pgn, .pgn.zst, .pgn.bz2 or .pgn.gz)
    input: Option<PathBuf>,

    /// TOML configuration file; flags override its values
    #[arg(short, long, env = "POSITION_CENSUS_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for the published TSV files
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Directory for chunks, merge phases and the checkpoint
    #[arg(short, long)]
    temp_dir: Option<PathBuf>,

    /// Positions per chunk file
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Chunks merged per merge task
    #[arg(long)]
    fan_in: Option<usize>,

    /// Extraction and merge threads (default: CPU count)
    #[arg(short = 'j', long)]
    pool_size: Option<usize>,

    /// Games per extraction batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Pending batches before reading pauses
    #[arg(long)]
    max_queue_size: Option<usize>,

    /// Chunks sorted concurrently
    #[arg(long)]
    sort_parallelism: Option<usize>,

    /// Retries for a failed merge task
    #[arg(long)]
    merge_retries: Option<usize>,

    /// Where to write the position index (default: <output-dir>/positions_index.tsv)
    #[arg(long)]
    index_path: Option<PathBuf>,

    /// Do not write the position index
    #[arg(long)]
    no_index: bool,

    /// Continue from the checkpoint in the temp directory
    #[arg(long)]
    resume: bool,

    /// Keep sorted chunks after the first merge phase
    #[arg(long)]
    retain_sorted_chunks: bool,

    /// Leave temporary files in place after a successful run
    #[arg(long)]
    keep_temp: bool,

    /// Seconds between progress lines
    #[arg(long)]
    progress_interval: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(input) = self.input {
            config.input = input;
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if let Some(dir) = self.temp_dir {
            config.temp_dir = dir;
        }
        config.chunk_size = self.chunk_size.unwrap_or(config.chunk_size);
        config.fan_in = self.fan_in.unwrap_or(config.fan_in);
        config.pool_size = self.pool_size.unwrap_or(config.pool_size);
        config.batch_size = self.batch_size.unwrap_or(config.batch_size);
        config.max_queue_size = self.max_queue_size.unwrap_or(config.max_queue_size);
        config.sort_parallelism = self.sort_parallelism.unwrap_or(config.sort_parallelism);
        config.merge_retries = self.merge_retries.unwrap_or(config.merge_retries);
        config.progress_interval_secs = self.progress_interval.unwrap_or(config.progress_interval_secs);
        if self.index_path.is_some() {
            config.index_path = self.index_path;
        }
        config.write_index &= !self.no_index;
        config.resume |= self.resume;
        config.retain_sorted_chunks |= self.retain_sorted_chunks;
        config.keep_temp |= self.keep_temp;
        Ok(config)
    }
}

fn main() {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    )
    .format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {}",
            buf.timestamp_seconds(),
            record.level(),
            record.args()
        )
    })
    .init();

    if let Err(e) = run(args) {
        log::error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = args.into_config()?;
    let pipeline = Pipeline::new(config).context("invalid configuration")?;
    let summary = pipeline.run().with_context(|| {
        format!(
            "run failed; temporary files kept in {}",
            pipeline.config().temp_dir.display()
        )
    })?;

    if let Some(extraction) = &summary.extraction {
        log::info!(
            "{} games accepted, {} positions extracted into {} chunks",
            extraction.stats.accepted,
            extraction.stats.positions,
            extraction.chunks.len()
        );
    }
    for (path, rows) in [
        (&summary.published.all, summary.published.all_rows),
        (&summary.published.min2, summary.published.min2_rows),
        (&summary.published.min10, summary.published.min10_rows),
    ] {
        println!("{}\t{}", path.display(), rows);
    }
    Ok(())
}
