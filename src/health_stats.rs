//! Scrape statistics reported on the /health endpoint.

use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use opcache_exporter::PollReport;

#[derive(Clone, Copy, Default)]
struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    fn add(&mut self, value: f64) {
        if self.count == 0 {
            *self = RunningStat {
                count: 1,
                sum: value,
                min: value,
                max: value,
                last: value,
            };
            return;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

#[derive(Default)]
struct Stat {
    inner: Mutex<RunningStat>,
}

impl Stat {
    fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    /// (current, average, max, min, count)
    fn snapshot(&self) -> (f64, f64, f64, f64, u64) {
        if let Ok(s) = self.inner.lock() {
            (s.last, s.avg(), s.max, s.min, s.count)
        } else {
            (0.0, 0.0, 0.0, 0.0, 0)
        }
    }
}

pub struct HealthStats {
    started: Instant,
    scrape_duration_seconds: Stat,
    http_requests: AtomicU64,
}

impl Default for HealthStats {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            scrape_duration_seconds: Stat::default(),
            http_requests: AtomicU64::new(0),
        }
    }
}

impl HealthStats {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn record_scrape(&self, duration_seconds: f64) {
        self.scrape_duration_seconds.add_sample(duration_seconds);
    }

    pub fn record_http_request(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Renders scrape timings and per-target poll counters as plain text.
    pub fn render_table(&self, targets: &[PollReport]) -> String {
        let (cur, avg, max, min, count) = self.scrape_duration_seconds.snapshot();

        let left_col = 26usize;
        let col_w = 12usize;

        let mut out = String::new();

        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "metric",
            "current",
            "average",
            "max",
            "min",
            left = left_col,
            col = col_w
        )
        .ok();
        writeln!(out, "{}", "-".repeat(left_col + 3 + (col_w + 3) * 4)).ok();
        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "scrape duration (s)",
            format!("{:.3}", cur),
            format!("{:.3}", avg),
            format!("{:.3}", max),
            format!("{:.3}", min),
            left = left_col,
            col = col_w
        )
        .ok();

        writeln!(out).ok();
        writeln!(out, "number of scrapes: {}", count).ok();
        writeln!(
            out,
            "http requests: {}",
            self.http_requests.load(Ordering::Relaxed)
        )
        .ok();
        writeln!(out, "uptime (s): {}", self.uptime_seconds()).ok();

        writeln!(out).ok();
        writeln!(out, "TARGETS").ok();
        writeln!(out, "=======").ok();
        writeln!(out).ok();
        writeln!(
            out,
            "{:40} | {:>8} | {:>8} | {:>6}",
            "fcgi_uri", "polls", "failures", "last"
        )
        .ok();
        writeln!(out, "{}", "-".repeat(71)).ok();
        for target in targets {
            writeln!(
                out,
                "{:40} | {:>8} | {:>8} | {:>6}",
                target.uri,
                target.polls,
                target.failures,
                if target.last_poll_failed { "FAIL" } else { "OK" }
            )
            .ok();
            if let Some(err) = &target.last_error {
                writeln!(out, "  last error: {}", err).ok();
            }
        }

        out
    }
}
