//! Periodic progress lines: counts, rate, elapsed time and ETA.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::{Duration, Instant},
};

use log::info;

pub struct Progress {
    label: String,
    unit: &'static str,
    total: Option<u64>,
    done: AtomicU64,
    start: Instant,
    interval: Duration,
    last_report: Mutex<Instant>,
}

impl Progress {
    pub fn new(label: impl Into<String>, unit: &'static str, total: Option<u64>, interval: Duration) -> Self {
        let start = Instant::now();
        Self {
            label: label.into(),
            unit,
            total,
            done: AtomicU64::new(0),
            start,
            interval,
            last_report: Mutex::new(start),
        }
    }

    pub fn add(&self, n: u64) {
        let done = self.done.fetch_add(n, Ordering::Relaxed) + n;
        self.maybe_report(done, String::new);
    }

    /// Record an absolute position, attaching `detail` if a line is due.
    pub fn set_with(&self, done: u64, detail: impl FnOnce() -> String) {
        self.done.store(done, Ordering::Relaxed);
        self.maybe_report(done, detail);
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish(&self, detail: &str) {
        let done = self.done.load(Ordering::Relaxed);
        info!(
            "{}: done, {} {} in {}{}",
            self.label,
            done,
            self.unit,
            format_duration(self.start.elapsed()),
            suffix(detail)
        );
    }

    fn maybe_report(&self, done: u64, detail: impl FnOnce() -> String) {
        // Another thread is already reporting.
        let Ok(mut last) = self.last_report.try_lock() else {
            return;
        };
        if last.elapsed() < self.interval {
            return;
        }
        *last = Instant::now();
        drop(last);

        let elapsed = self.start.elapsed();
        let rate = done as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
        let detail = detail();
        match self.total {
            Some(total) => {
                let eta = estimate_remaining(done, total, elapsed)
                    .map(format_duration)
                    .unwrap_or_else(|| "?".to_string());
                info!(
                    "{}: {}/{} {} ({:.1}%), {:.0}/s, elapsed {}, ETA {}{}",
                    self.label,
                    done,
                    total,
                    self.unit,
                    percent(done, total),
                    rate,
                    format_duration(elapsed),
                    eta,
                    suffix(&detail)
                );
            }
            None => info!(
                "{}: {} {}, {:.0}/s, elapsed {}{}",
                self.label,
                done,
                self.unit,
                rate,
                format_duration(elapsed),
                suffix(&detail)
            ),
        }
    }
}

fn suffix(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(" [{}]", detail)
    }
}

fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (done as f64 / total as f64 * 100.0).min(100.0)
}

/// Linear extrapolation of the remaining time.
pub fn estimate_remaining(done: u64, total: u64, elapsed: Duration) -> Option<Duration> {
    if done == 0 || done > total {
        return None;
    }
    let per_unit = elapsed.as_secs_f64() / done as f64;
    Some(Duration::from_secs_f64(per_unit * (total - done) as f64))
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h{:02}m{:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m{:02}s", m, s)
    } else {
        format!("{}.{:01}s", s, d.subsec_millis() / 100)
    }
}
