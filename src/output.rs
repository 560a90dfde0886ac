//! Recurrent-bucket sort and assembly of the published TSV files.

use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::info;

use crate::{
    chunk::line::AGGREGATE_HEADER,
    error::Result,
    merge::BucketFiles,
    record::{AggregateRecord, Bucket},
};

pub const ALL_FILE: &str = "positions_all.tsv";
pub const MIN2_FILE: &str = "positions_min2.tsv";
pub const MIN10_FILE: &str = "positions_min10.tsv";
pub const SORTED_RECURRENT_FILE: &str = "10plusocc_sorted.tmp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedFiles {
    pub all: PathBuf,
    pub min2: PathBuf,
    pub min10: PathBuf,
    pub all_rows: u64,
    pub min2_rows: u64,
    pub min10_rows: u64,
}

/// Sort the `10+` bucket by occurrence, most frequent first, and write it
/// with the aggregate header. Ties keep their FEN order.
pub fn sort_recurrent_bucket(input: &Path, output: &Path) -> Result<u64> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .quoting(false)
        .from_path(input)?;
    let mut records = reader
        .deserialize()
        .collect::<std::result::Result<Vec<AggregateRecord>, _>>()?;
    records.sort_by(|a, b| b.occurrence.cmp(&a.occurrence));

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .has_headers(false)
        .from_path(output)?;
    writer.write_record(AGGREGATE_HEADER.split('\t'))?;
    for record in &records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    info!("Sorted {} recurrent positions by occurrence", records.len());
    Ok(records.len() as u64)
}

/// Write the three published files into `output_dir`.
///
/// Each file is assembled under a `.partial` name and renamed into place,
/// so a failed run never leaves a truncated output behind.
pub fn assemble(buckets: &BucketFiles, sorted_recurrent: &Path, output_dir: &Path) -> Result<PublishedFiles> {
    fs::create_dir_all(output_dir)?;
    let at_least = |threshold: u64| Bucket::all().filter(move |b| b.min_occurrence() >= threshold);

    let all = output_dir.join(ALL_FILE);
    let sources: Vec<&Path> = at_least(1).map(|b| buckets.path(b)).collect();
    publish(&all, &sources, true)?;

    let min2 = output_dir.join(MIN2_FILE);
    let sources: Vec<&Path> = at_least(2).map(|b| buckets.path(b)).collect();
    publish(&min2, &sources, true)?;

    // Only the 10+ bucket is sorted by occurrence.
    let min10 = output_dir.join(MIN10_FILE);
    publish(&min10, &[sorted_recurrent], false)?;

    let files = PublishedFiles {
        all,
        min2,
        min10,
        all_rows: buckets.total(),
        min2_rows: at_least(2).map(|b| buckets.count(b)).sum(),
        min10_rows: buckets.count(Bucket::TenPlus),
    };
    info!(
        "Published {} ({} rows), {} ({} rows), {} ({} rows)",
        files.all.display(),
        files.all_rows,
        files.min2.display(),
        files.min2_rows,
        files.min10.display(),
        files.min10_rows
    );
    Ok(files)
}

fn publish(target: &Path, sources: &[&Path], with_header: bool) -> Result<()> {
    let partial = target.with_extension("tsv.partial");
    let mut out = BufWriter::new(File::create(&partial)?);
    if with_header {
        writeln!(out, "{}", AGGREGATE_HEADER)?;
    }
    for source in sources {
        io::copy(&mut File::open(source)?, &mut out)?;
    }
    out.flush()?;
    drop(out);
    fs::rename(&partial, target)?;
    Ok(())
}
