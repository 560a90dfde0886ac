use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use position_census::{
    manifest::{Manifest, Stage},
    Config, Error, Pipeline,
};

const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
const AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1";

/// Twelve 1. e4 games (so the start and e4 positions reach the 10+ bucket),
/// a few 1. d4 games, and games that must contribute nothing.
fn write_corpus(dir: &Path) -> PathBuf {
    let mut pgn = String::new();
    for i in 0..12 {
        let result = match i % 3 {
            0 => "1-0",
            1 => "0-1",
            _ => "1/2-1/2",
        };
        pgn.push_str(&format!(
            "[Event \"Club\"]\n[ID \"e{i}\"]\n[WhiteElo \"1800\"]\n\n1. e4 e5 2. Nf3 Nc6 {result}\n\n"
        ));
    }
    for i in 0..3 {
        pgn.push_str(&format!("[ID \"d{i}\"]\n\n1. d4 d5 1-0\n\n"));
    }
    pgn.push_str("[ID \"illegal\"]\n\n1. e4 e5 2. Ke3 1-0\n\n");
    pgn.push_str("[ID \"open\"]\n\n1. e4 *\n\n");
    pgn.push_str("[Event \"no id\"]\n\n1. c4 1-0\n\n");
    pgn.push_str("[ID \"engine\"]\n[WhiteIsComp \"Yes\"]\n[BlackIsComp \"Yes\"]\n\n1. c4 1-0\n");

    let path = dir.join("games.pgn");
    fs::write(&path, pgn).unwrap();
    path
}

fn config(root: &Path, input: &Path, run: &str) -> Config {
    Config {
        input: input.to_path_buf(),
        output_dir: root.join(run).join("out"),
        temp_dir: root.join(run).join("tmp"),
        chunk_size: 5,
        fan_in: 2,
        pool_size: 2,
        batch_size: 2,
        max_queue_size: 2,
        sort_parallelism: 2,
        progress_interval_secs: 3600,
        read_buffer_size: 16,
        read_ahead_lines: 3,
        ..Config::default()
    }
}

/// `fen -> (occurrence, white, black, draw)` rows of a published file.
fn rows(path: &Path) -> BTreeMap<String, (u64, u64, u64, u64)> {
    let text = fs::read_to_string(path).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("fen\toccurrence\twhite\tblack\tdraw"));
    lines
        .map(|line| {
            let f: Vec<&str> = line.split('\t').collect();
            assert_eq!(f.len(), 5, "{line}");
            let n = |i: usize| f[i].parse::<u64>().unwrap();
            assert_eq!(n(1), n(2) + n(3) + n(4));
            (f[0].to_string(), (n(1), n(2), n(3), n(4)))
        })
        .collect()
}

#[test]
fn full_run_publishes_three_thresholds() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_corpus(dir.path());
    let config = config(dir.path(), &input, "full");
    let temp_dir = config.temp_dir.clone();
    let index = config.index_path().unwrap();

    let summary = Pipeline::new(config).unwrap().run().unwrap();

    let extraction = summary.extraction.as_ref().unwrap();
    assert_eq!(extraction.stats.games, 19);
    assert_eq!(extraction.stats.accepted, 15);
    assert_eq!(extraction.stats.positions, 12 * 5 + 3 * 3);
    assert_eq!(extraction.chunks.len(), 14);
    assert!(summary.phases_run >= 2);

    let all = rows(&summary.published.all);
    assert_eq!(all[START], (15, 7, 4, 4));
    assert_eq!(all[AFTER_E4], (12, 4, 4, 4));
    assert_eq!(all.values().map(|r| r.0).sum::<u64>(), 69);
    assert_eq!(all.len() as u64, summary.distinct_positions);

    let min2 = rows(&summary.published.min2);
    assert!(min2.values().all(|r| r.0 >= 2));
    let min10 = rows(&summary.published.min10);
    assert!(min10.values().all(|r| r.0 >= 10));
    assert_eq!(min10.len(), 5);

    // Most frequent first.
    let min10_text = fs::read_to_string(&summary.published.min10).unwrap();
    let first = min10_text.lines().nth(1).unwrap();
    assert!(first.starts_with(START));

    let index_text = fs::read_to_string(index).unwrap();
    assert_eq!(index_text.lines().count(), 1 + 69);
    assert!(!index_text.contains("illegal"));

    assert!(!temp_dir.exists(), "temporary files are removed on success");
}

#[test]
fn resume_from_sorted_chunks_matches_full_run() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_corpus(dir.path());

    let full = Pipeline::new(config(dir.path(), &input, "full"))
        .unwrap()
        .run()
        .unwrap();

    // Stop after sorting, as if the run had died in the first merge phase.
    let interrupted = config(dir.path(), &input, "resumed");
    let (chunks, _) = Pipeline::new(interrupted.clone())
        .unwrap()
        .extract_and_sort()
        .unwrap();
    assert!(chunks.iter().all(|c| c.exists()));
    let manifest = Manifest::load(&interrupted.temp_dir).unwrap().unwrap();
    assert_eq!(manifest.stage, Stage::Sorted { chunks });

    let resumed = Pipeline::new(Config {
        input: PathBuf::new(),
        resume: true,
        ..interrupted
    })
    .unwrap()
    .run()
    .unwrap();

    assert!(resumed.extraction.is_none());
    for (a, b) in [
        (&full.published.all, &resumed.published.all),
        (&full.published.min2, &resumed.published.min2),
        (&full.published.min10, &resumed.published.min10),
    ] {
        assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap());
    }
}

#[test]
fn keep_temp_and_retained_chunks_leave_state_behind() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_corpus(dir.path());
    let config = Config {
        keep_temp: true,
        retain_sorted_chunks: true,
        write_index: false,
        ..config(dir.path(), &input, "kept")
    };
    let temp_dir = config.temp_dir.clone();
    Pipeline::new(config.clone()).unwrap().run().unwrap();

    assert!(temp_dir.join("chunk_0_sorted.tmp").exists());
    assert!(temp_dir.join("10plusocc.tmp").exists());
    assert!(!config.output_dir.join("positions_index.tsv").exists());
    let manifest = Manifest::load(&temp_dir).unwrap().unwrap();
    assert!(matches!(manifest.stage, Stage::Partitioned { .. }));

    // The checkpoint is enough to republish without merging again.
    let again = Pipeline::new(Config {
        resume: true,
        ..config
    })
    .unwrap()
    .run()
    .unwrap();
    assert_eq!(again.phases_run, 0);
    assert_eq!(rows(&again.published.all).len() as u64, again.distinct_positions);
}

#[test]
fn compressed_input_gives_the_same_result() {
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let plain = write_corpus(dir.path());
    let compressed = dir.path().join("games.pgn.zst");
    let mut encoder = zstd::stream::write::Encoder::new(fs::File::create(&compressed).unwrap(), 3).unwrap();
    encoder.write_all(&fs::read(&plain).unwrap()).unwrap();
    encoder.finish().unwrap();

    let a = Pipeline::new(config(dir.path(), &plain, "plain")).unwrap().run().unwrap();
    let b = Pipeline::new(config(dir.path(), &compressed, "zst")).unwrap().run().unwrap();
    assert_eq!(
        fs::read(&a.published.all).unwrap(),
        fs::read(&b.published.all).unwrap()
    );
}

#[test]
fn missing_input_fails_before_processing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), &dir.path().join("absent.pgn"), "missing");
    let temp_dir = config.temp_dir.clone();
    let err = Pipeline::new(config).unwrap().run().unwrap_err();
    assert!(matches!(err, Error::MissingInput(_)));
    assert!(!temp_dir.join("chunk_0.tmp").exists());
}
