//! Prometheus collector for one OPcache target.
//!
//! Each scrape polls the target and republishes the snapshot as 25 gauges
//! labelled with `fcgi_uri`. A failed poll is logged and published as an
//! all-zero snapshot, so the series set never changes shape.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Gauge, Opts};
use tracing::{debug, error};

use crate::client::{FcgiStatusClient, StatusSource};
use crate::error::Result;
use crate::status::StatusSnapshot;
use crate::target::Target;

/// Metric name prefix.
pub const NAMESPACE: &str = "opcache";

/// Label carrying the target URI as configured.
pub const URI_LABEL: &str = "fcgi_uri";

/// How one exported gauge is read from a snapshot.
pub struct MetricSpec {
    /// Name without the `opcache_` prefix.
    pub name: &'static str,
    pub help: &'static str,
    value: fn(&StatusSnapshot) -> f64,
}

impl MetricSpec {
    pub fn value(&self, status: &StatusSnapshot) -> f64 {
        (self.value)(status)
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// The exported schema. Descriptors and values are both derived from this
/// table, in this order.
pub static METRICS: [MetricSpec; 25] = [
    MetricSpec {
        name: "enabled",
        help: "Is OPcache enabled.",
        value: |s| flag(s.opcache_enabled),
    },
    MetricSpec {
        name: "cache_full",
        help: "Is OPcache full.",
        value: |s| flag(s.cache_full),
    },
    MetricSpec {
        name: "restart_pending",
        help: "Is restart pending.",
        value: |s| flag(s.restart_pending),
    },
    MetricSpec {
        name: "restart_in_progress",
        help: "Is restart in progress.",
        value: |s| flag(s.restart_in_progress),
    },
    MetricSpec {
        name: "memory_usage_used_memory",
        help: "OPcache used memory.",
        value: |s| s.memory_usage.used_memory as f64,
    },
    MetricSpec {
        name: "memory_usage_free_memory",
        help: "OPcache free memory.",
        value: |s| s.memory_usage.free_memory as f64,
    },
    MetricSpec {
        name: "memory_usage_wasted_memory",
        help: "OPcache wasted memory.",
        value: |s| s.memory_usage.wasted_memory as f64,
    },
    MetricSpec {
        name: "memory_usage_current_wasted_percentage",
        help: "OPcache current wasted percentage.",
        value: |s| s.memory_usage.current_wasted_percentage,
    },
    MetricSpec {
        name: "interned_strings_usage_buffer_size",
        help: "OPcache interned string buffer size.",
        value: |s| s.interned_strings_usage.buffer_size as f64,
    },
    MetricSpec {
        name: "interned_strings_usage_used_memory",
        help: "OPcache interned string used memory.",
        value: |s| s.interned_strings_usage.used_memory as f64,
    },
    MetricSpec {
        name: "interned_strings_usage_free_memory",
        help: "OPcache interned string free memory.",
        value: |s| s.interned_strings_usage.free_memory as f64,
    },
    MetricSpec {
        name: "interned_strings_usage_number_of_strings",
        help: "OPcache interned string number of strings.",
        value: |s| s.interned_strings_usage.number_of_strings as f64,
    },
    MetricSpec {
        name: "statistics_num_cached_scripts",
        help: "OPcache statistics, number of cached scripts.",
        value: |s| s.opcache_statistics.num_cached_scripts as f64,
    },
    MetricSpec {
        name: "statistics_num_cached_keys",
        help: "OPcache statistics, number of cached keys.",
        value: |s| s.opcache_statistics.num_cached_keys as f64,
    },
    MetricSpec {
        name: "statistics_max_cached_keys",
        help: "OPcache statistics, max cached keys.",
        value: |s| s.opcache_statistics.max_cached_keys as f64,
    },
    MetricSpec {
        name: "statistics_hits",
        help: "OPcache statistics, hits.",
        value: |s| s.opcache_statistics.hits as f64,
    },
    MetricSpec {
        name: "statistics_start_time",
        help: "OPcache statistics, start time.",
        value: |s| s.opcache_statistics.start_time as f64,
    },
    MetricSpec {
        name: "statistics_last_restart_time",
        help: "OPcache statistics, last restart time.",
        value: |s| s.opcache_statistics.last_restart_time as f64,
    },
    MetricSpec {
        name: "statistics_oom_restarts",
        help: "OPcache statistics, oom restarts.",
        value: |s| s.opcache_statistics.oom_restarts as f64,
    },
    MetricSpec {
        name: "statistics_hash_restarts",
        help: "OPcache statistics, hash restarts.",
        value: |s| s.opcache_statistics.hash_restarts as f64,
    },
    MetricSpec {
        name: "statistics_manual_restarts",
        help: "OPcache statistics, manual restarts.",
        value: |s| s.opcache_statistics.manual_restarts as f64,
    },
    MetricSpec {
        name: "statistics_misses",
        help: "OPcache statistics, misses.",
        value: |s| s.opcache_statistics.misses as f64,
    },
    MetricSpec {
        name: "statistics_blacklist_misses",
        help: "OPcache statistics, blacklist misses.",
        value: |s| s.opcache_statistics.blacklist_misses as f64,
    },
    MetricSpec {
        name: "statistics_blacklist_miss_ratio",
        help: "OPcache statistics, blacklist miss ratio.",
        value: |s| s.opcache_statistics.blacklist_miss_ratio,
    },
    MetricSpec {
        name: "statistics_hit_rate",
        help: "OPcache statistics, opcache hit rate.",
        value: |s| s.opcache_statistics.opcache_hit_rate,
    },
];

/// Poll counters of one collector, reported on `/health`.
#[derive(Debug, Clone, Default)]
pub struct PollReport {
    pub uri: String,
    pub polls: u64,
    pub failures: u64,
    pub last_poll_failed: bool,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct PollStats {
    polls: AtomicU64,
    failures: AtomicU64,
    last_failed: AtomicBool,
    last_error: Mutex<Option<String>>,
}

/// Collector bound to one target.
///
/// The gauges are only reachable through the mutex, so a scrape polls and
/// publishes as one step and overlapping scrapes of the same target queue up
/// instead of interleaving.
pub struct OpcacheCollector {
    uri: String,
    source: Box<dyn StatusSource>,
    descs: Vec<Desc>,
    gauges: Mutex<Vec<Gauge>>,
    stats: PollStats,
}

impl OpcacheCollector {
    /// Builds a collector polling `target` over FastCGI.
    pub fn new(target: Target, timeout: Option<Duration>) -> Result<Self> {
        let uri = target.uri().to_string();
        Self::with_source(uri, FcgiStatusClient::new(target, timeout))
    }

    /// Builds a collector labelled `uri` that reads snapshots from `source`.
    pub fn with_source(
        uri: impl Into<String>,
        source: impl StatusSource + 'static,
    ) -> Result<Self> {
        let uri = uri.into();

        let gauges = METRICS
            .iter()
            .map(|spec| {
                Gauge::with_opts(
                    Opts::new(spec.name, spec.help)
                        .namespace(NAMESPACE)
                        .const_label(URI_LABEL, uri.as_str()),
                )
            })
            .collect::<prometheus::Result<Vec<_>>>()?;

        let descs = gauges
            .iter()
            .flat_map(|g| g.desc().into_iter().cloned())
            .collect();

        Ok(Self {
            uri,
            source: Box::new(source),
            descs,
            gauges: Mutex::new(gauges),
            stats: PollStats::default(),
        })
    }

    /// The `fcgi_uri` label value.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn report(&self) -> PollReport {
        PollReport {
            uri: self.uri.clone(),
            polls: self.stats.polls.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            last_poll_failed: self.stats.last_failed.load(Ordering::Relaxed),
            last_error: self
                .stats
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    /// Fetches a snapshot, substituting zeros on failure.
    fn poll(&self) -> StatusSnapshot {
        self.stats.polls.fetch_add(1, Ordering::Relaxed);

        match self.source.fetch() {
            Ok(status) => {
                debug!(fcgi_uri = %self.uri, "Polled OPcache status");
                self.stats.last_failed.store(false, Ordering::Relaxed);
                status
            }
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                self.stats.last_failed.store(true, Ordering::Relaxed);
                error!(fcgi_uri = %self.uri, "Failed to poll OPcache status: {}", e);
                *self
                    .stats
                    .last_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(e.to_string());
                StatusSnapshot::default()
            }
        }
    }
}

impl Collector for OpcacheCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        // A panic in an earlier scrape must not take this target offline
        let gauges = self.gauges.lock().unwrap_or_else(PoisonError::into_inner);

        let status = self.poll();

        let mut families = Vec::with_capacity(METRICS.len());
        for (spec, gauge) in METRICS.iter().zip(gauges.iter()) {
            gauge.set(spec.value(&status));
            families.extend(gauge.collect());
        }
        families
    }
}

/// Collects every target at once on the blocking pool and merges the result
/// into one family per metric name, as `Registry::gather` would.
///
/// A scrape takes as long as the slowest target rather than the sum of all.
pub async fn gather_targets(collectors: &[Arc<OpcacheCollector>]) -> Vec<MetricFamily> {
    let tasks: Vec<_> = collectors
        .iter()
        .map(|collector| {
            let collector = Arc::clone(collector);
            tokio::task::spawn_blocking(move || collector.collect())
        })
        .collect();

    let mut families = Vec::with_capacity(collectors.len() * METRICS.len());
    for (collector, task) in collectors.iter().zip(tasks) {
        match task.await {
            Ok(collected) => families.extend(collected),
            Err(e) => error!(fcgi_uri = %collector.uri(), "Collect task failed: {}", e),
        }
    }

    merge_families(families)
}

/// Merges families sharing a name, sorted by name and then by label values.
pub fn merge_families(families: Vec<MetricFamily>) -> Vec<MetricFamily> {
    let mut by_name: BTreeMap<String, MetricFamily> = BTreeMap::new();

    for mut family in families {
        if family.get_metric().is_empty() {
            continue;
        }
        match by_name.entry(family.name().to_owned()) {
            Entry::Vacant(entry) => {
                entry.insert(family);
            }
            Entry::Occupied(mut entry) => {
                entry.get_mut().mut_metric().extend(family.take_metric());
            }
        }
    }

    for family in by_name.values_mut() {
        family.mut_metric().sort_by(|a, b| {
            let a = a.get_label().iter().map(|l| l.value());
            let b = b.get_label().iter().map(|l| l.value());
            a.cmp(b)
        });
    }

    by_name.into_values().collect()
}
