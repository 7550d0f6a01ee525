use serde::Serialize;
use std::time::Duration;

/// Read-only view of query counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMetrics {
    pub total_queries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub index_hits: u64,
    pub total_latency_micros: u64,
}

impl QueryMetrics {
    pub(crate) fn record(&mut self, latency: Duration) {
        self.total_queries += 1;
        self.total_latency_micros += latency.as_micros() as u64;
    }

    pub fn average_latency_ms(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.total_latency_micros as f64 / self.total_queries as f64 / 1000.0
        }
    }

    /// Hits over hits plus misses, 0 when nothing was looked up.
    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}
