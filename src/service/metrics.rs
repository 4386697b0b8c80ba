use anyhow::Result;
use prometheus::{Counter, Encoder, Opts, Registry, TextEncoder};

/// Prometheus counters for service observability.
///
/// Operational tallies only; aggregate business data is served by the
/// counts endpoint, never duplicated here.
pub struct ServiceMetrics {
    registry: Registry,

    /// Submissions accepted and counted.
    pub submissions_accepted: Counter,
    /// Submissions rejected by validation.
    pub submissions_rejected: Counter,
    /// Individual counter increments committed to the store.
    pub counter_increments: Counter,
    /// Snapshot queries served.
    pub snapshot_queries: Counter,
}

impl ServiceMetrics {
    /// Creates a metrics instance with all counters registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let submissions_accepted = Counter::with_opts(
            Opts::new(
                "submissions_accepted_total",
                "Submissions accepted and counted.",
            )
            .namespace("ergopulse"),
        )?;
        let submissions_rejected = Counter::with_opts(
            Opts::new(
                "submissions_rejected_total",
                "Submissions rejected by validation.",
            )
            .namespace("ergopulse"),
        )?;
        let counter_increments = Counter::with_opts(
            Opts::new(
                "counter_increments_total",
                "Individual counter increments committed to the store.",
            )
            .namespace("ergopulse"),
        )?;
        let snapshot_queries = Counter::with_opts(
            Opts::new("snapshot_queries_total", "Snapshot queries served.")
                .namespace("ergopulse"),
        )?;

        registry.register(Box::new(submissions_accepted.clone()))?;
        registry.register(Box::new(submissions_rejected.clone()))?;
        registry.register(Box::new(counter_increments.clone()))?;
        registry.register(Box::new(snapshot_queries.clone()))?;

        Ok(Self {
            registry,
            submissions_accepted,
            submissions_rejected,
            counter_increments,
            snapshot_queries,
        })
    }

    /// Renders the registry in Prometheus text format.
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
