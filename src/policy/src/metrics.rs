//! Metrics collection for policy engine observability

use dashmap::DashMap;
use overlay_core::DenormCollection;
use parking_lot::RwLock;
use std::time::Duration;

/// Counters gathered while one mutation runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationStats {
    /// First-hop links added
    pub matched: u64,

    /// First-hop links removed
    pub unmatched: u64,

    /// Second-hop count increments
    pub increments: u64,

    /// Second-hop count decrements
    pub decrements: u64,

    /// Decrements clamped at zero instead of failing
    pub clamped: u64,
}

/// Engine metrics snapshot
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    /// Committed write transactions
    pub committed_mutations: u64,

    /// Rolled-back write transactions
    pub rolled_back_mutations: u64,

    pub matched_transitions: u64,
    pub unmatched_transitions: u64,
    pub ref_increments: u64,
    pub ref_decrements: u64,
    pub clamped_ref_counts: u64,

    /// Access checks served from the second-hop counts
    pub access_checks: u64,

    /// Access checks that found a positive count
    pub access_granted: u64,

    pub integrity_runs: u64,
    pub discrepancies_found: u64,
    pub discrepancies_fixed: u64,

    /// Mutation latency percentiles
    pub latency_p50_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p99_ms: f64,

    /// Average mutation latency
    pub avg_latency_ms: f64,
}

impl EngineMetrics {
    /// Fraction of access checks that were granted
    pub fn grant_rate(&self) -> f64 {
        if self.access_checks == 0 {
            0.0
        } else {
            self.access_granted as f64 / self.access_checks as f64
        }
    }
}

/// Per-collection access check counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessCounters {
    pub checks: u64,
    pub granted: u64,
}

/// Metrics collector
pub struct MetricsCollector {
    metrics: RwLock<EngineMetrics>,

    /// Latency samples for percentile calculation
    latency_samples: RwLock<Vec<f64>>,

    /// Maximum samples to keep
    max_samples: usize,

    access: DashMap<DenormCollection, AccessCounters>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_max_samples(10_000)
    }

    pub fn with_max_samples(max_samples: usize) -> Self {
        Self {
            metrics: RwLock::new(EngineMetrics::default()),
            latency_samples: RwLock::new(Vec::with_capacity(max_samples.min(10_000))),
            max_samples: max_samples.max(1),
            access: DashMap::new(),
        }
    }

    /// Record a committed mutation
    pub fn record_commit(&self, stats: &MutationStats, latency: Duration) {
        {
            let mut metrics = self.metrics.write();
            metrics.committed_mutations += 1;
            metrics.matched_transitions += stats.matched;
            metrics.unmatched_transitions += stats.unmatched;
            metrics.ref_increments += stats.increments;
            metrics.ref_decrements += stats.decrements;
            metrics.clamped_ref_counts += stats.clamped;
        }
        self.record_latency(latency);
    }

    /// Record a rolled-back mutation
    pub fn record_rollback(&self) {
        self.metrics.write().rolled_back_mutations += 1;
    }

    /// Record an access check against a collection
    pub fn record_access_check(&self, collection: DenormCollection, granted: bool) {
        {
            let mut counters = self.access.entry(collection).or_default();
            counters.checks += 1;
            if granted {
                counters.granted += 1;
            }
        }

        let mut metrics = self.metrics.write();
        metrics.access_checks += 1;
        if granted {
            metrics.access_granted += 1;
        }
    }

    /// Record an integrity check run
    pub fn record_integrity_run(&self, found: usize, fixed: usize) {
        let mut metrics = self.metrics.write();
        metrics.integrity_runs += 1;
        metrics.discrepancies_found += found as u64;
        metrics.discrepancies_fixed += fixed as u64;
    }

    fn record_latency(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut samples = self.latency_samples.write();
        samples.push(latency_ms);
        if samples.len() > self.max_samples {
            let excess = samples.len() - self.max_samples;
            samples.drain(0..excess);
        }

        let mut sorted = samples.clone();
        drop(samples);
        sorted.sort_by(|a, b| a.total_cmp(b));

        let mut metrics = self.metrics.write();
        metrics.avg_latency_ms = sorted.iter().sum::<f64>() / sorted.len() as f64;
        metrics.latency_p50_ms = Self::percentile(&sorted, 0.50);
        metrics.latency_p90_ms = Self::percentile(&sorted, 0.90);
        metrics.latency_p99_ms = Self::percentile(&sorted, 0.99);
    }

    /// Current metrics snapshot
    pub fn get_metrics(&self) -> EngineMetrics {
        self.metrics.read().clone()
    }

    /// Access counters for one collection
    pub fn access_counters(&self, collection: DenormCollection) -> AccessCounters {
        self.access
            .get(&collection)
            .map(|c| *c)
            .unwrap_or_default()
    }

    pub fn reset(&self) {
        *self.metrics.write() = EngineMetrics::default();
        self.latency_samples.write().clear();
        self.access.clear();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let metrics = self.get_metrics();

        let mut out = format!(
            r#"# HELP policy_mutations_total Write transactions by outcome
# TYPE policy_mutations_total counter
policy_mutations_total{{outcome="committed"}} {}
policy_mutations_total{{outcome="rolled_back"}} {}

# HELP policy_transitions_total First-hop link transitions
# TYPE policy_transitions_total counter
policy_transitions_total{{transition="matched"}} {}
policy_transitions_total{{transition="unmatched"}} {}

# HELP policy_ref_updates_total Second-hop ref count updates
# TYPE policy_ref_updates_total counter
policy_ref_updates_total{{op="increment"}} {}
policy_ref_updates_total{{op="decrement"}} {}
policy_ref_updates_total{{op="clamped"}} {}

# HELP policy_integrity_discrepancies_total Integrity check discrepancies
# TYPE policy_integrity_discrepancies_total counter
policy_integrity_discrepancies_total{{state="found"}} {}
policy_integrity_discrepancies_total{{state="fixed"}} {}

# HELP policy_mutation_latency_seconds Mutation latency percentiles
# TYPE policy_mutation_latency_seconds summary
policy_mutation_latency_seconds{{quantile="0.5"}} {}
policy_mutation_latency_seconds{{quantile="0.9"}} {}
policy_mutation_latency_seconds{{quantile="0.99"}} {}

# HELP policy_access_checks_total Access checks by collection
# TYPE policy_access_checks_total counter
"#,
            metrics.committed_mutations,
            metrics.rolled_back_mutations,
            metrics.matched_transitions,
            metrics.unmatched_transitions,
            metrics.ref_increments,
            metrics.ref_decrements,
            metrics.clamped_ref_counts,
            metrics.discrepancies_found,
            metrics.discrepancies_fixed,
            metrics.latency_p50_ms / 1000.0,
            metrics.latency_p90_ms / 1000.0,
            metrics.latency_p99_ms / 1000.0,
        );

        for collection in DenormCollection::ALL {
            let counters = self.access_counters(collection);
            out.push_str(&format!(
                "policy_access_checks_total{{collection=\"{}\",result=\"granted\"}} {}\n",
                collection.name(),
                counters.granted
            ));
            out.push_str(&format!(
                "policy_access_checks_total{{collection=\"{}\",result=\"denied\"}} {}\n",
                collection.name(),
                counters.checks - counters.granted
            ));
        }
        out
    }

    /// Percentile from sorted data
    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = ((sorted.len() as f64) * p) as usize;
        let idx = idx.min(sorted.len() - 1);
        sorted[idx]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
