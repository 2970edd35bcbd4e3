use prometheus::{Counter, Gauge, Histogram, HistogramOpts, Opts, Registry};
use std::sync::Arc;

/// Prometheus metrics for one index
#[derive(Clone)]
pub struct IndexMetrics {
    // Counters
    pub documents_added: Counter,
    pub deletes_applied: Counter,
    pub commits: Counter,
    pub rollbacks: Counter,
    pub merges: Counter,
    pub searches: Counter,

    // Gauges
    pub live_documents: Gauge,
    pub segments: Gauge,

    // Histograms
    pub commit_latency: Histogram,
    pub search_latency: Histogram,

    registry: Arc<Registry>,
}

impl IndexMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let documents_added = Counter::with_opts(Opts::new(
            "loupe_documents_added_total",
            "Total number of documents handed to the writer",
        ))?;
        registry.register(Box::new(documents_added.clone()))?;

        let deletes_applied = Counter::with_opts(Opts::new(
            "loupe_deletes_applied_total",
            "Total number of documents deleted by commits",
        ))?;
        registry.register(Box::new(deletes_applied.clone()))?;

        let commits = Counter::with_opts(Opts::new(
            "loupe_commits_total",
            "Total number of successful commits",
        ))?;
        registry.register(Box::new(commits.clone()))?;

        let rollbacks = Counter::with_opts(Opts::new(
            "loupe_rollbacks_total",
            "Total number of writer rollbacks",
        ))?;
        registry.register(Box::new(rollbacks.clone()))?;

        let merges = Counter::with_opts(Opts::new(
            "loupe_merges_total",
            "Total number of published segment merges",
        ))?;
        registry.register(Box::new(merges.clone()))?;

        let searches = Counter::with_opts(Opts::new(
            "loupe_searches_total",
            "Total number of executed searches",
        ))?;
        registry.register(Box::new(searches.clone()))?;

        let live_documents = Gauge::with_opts(Opts::new(
            "loupe_live_documents",
            "Live documents in the current generation",
        ))?;
        registry.register(Box::new(live_documents.clone()))?;

        let segments = Gauge::with_opts(Opts::new(
            "loupe_segments",
            "Segments in the current generation",
        ))?;
        registry.register(Box::new(segments.clone()))?;

        let commit_latency = Histogram::with_opts(
            HistogramOpts::new("loupe_commit_latency_seconds", "Commit latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(commit_latency.clone()))?;

        let search_latency = Histogram::with_opts(
            HistogramOpts::new("loupe_search_latency_seconds", "Search latency")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5]),
        )?;
        registry.register(Box::new(search_latency.clone()))?;

        Ok(Self {
            documents_added,
            deletes_applied,
            commits,
            rollbacks,
            merges,
            searches,
            live_documents,
            segments,
            commit_latency,
            search_latency,
            registry: Arc::new(registry),
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn record_commit(&self, duration_secs: f64, deletes: u64) {
        self.commits.inc();
        self.deletes_applied.inc_by(deletes as f64);
        self.commit_latency.observe(duration_secs);
    }

    pub fn record_search(&self, duration_secs: f64) {
        self.searches.inc();
        self.search_latency.observe(duration_secs);
    }

    /// Update the gauges after a generation is published
    pub fn set_generation_stats(&self, live_documents: u64, segments: usize) {
        self.live_documents.set(live_documents as f64);
        self.segments.set(segments as f64);
    }
}

impl std::fmt::Debug for IndexMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexMetrics")
            .field("commits", &self.commits.get())
            .field("live_documents", &self.live_documents.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registered() {
        let metrics = IndexMetrics::new().unwrap();
        metrics.record_commit(0.01, 3);
        metrics.record_search(0.001);
        metrics.set_generation_stats(10, 2);

        assert_eq!(metrics.commits.get(), 1.0);
        assert_eq!(metrics.deletes_applied.get(), 3.0);
        assert_eq!(metrics.segments.get(), 2.0);
        let families = metrics.registry().gather();
        assert!(families.iter().any(|f| f.get_name() == "loupe_commits_total"));
    }

    #[test]
    fn test_separate_registries() {
        // Two indexes in one process must not collide
        let a = IndexMetrics::new().unwrap();
        let b = IndexMetrics::new().unwrap();
        a.commits.inc();
        assert_eq!(b.commits.get(), 0.0);
    }
}
