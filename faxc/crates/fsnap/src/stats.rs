//! Pass Statistics
//!
//! Counters collected by one read or write pass, and their running totals
//! per isolate group. Exported as flat name/value metrics.

use indexmap::IndexMap;
use serde::Serialize;

/// Counters of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    /// Objects written or read with a body
    pub objects: u64,
    pub back_references: u64,
    /// Split objects sent through the forward list
    pub deferred: u64,
    /// Stream size
    pub bytes: u64,
    /// Bytes copied into out-of-line blocks
    pub externalized_bytes: u64,
    /// Bytes moved with transferable buffers
    pub transferred_bytes: u64,
    pub canonical_hits: u64,
    pub canonical_misses: u64,
    /// Postprocessing entries drained after a read
    pub postprocessed: u64,
    /// Deepest inline nesting reached
    pub max_depth: u64,
}

impl PassStats {
    /// Fold another pass into running totals
    ///
    /// Counters add up; `max_depth` keeps the maximum.
    pub fn merge(&mut self, other: &PassStats) {
        self.objects += other.objects;
        self.back_references += other.back_references;
        self.deferred += other.deferred;
        self.bytes += other.bytes;
        self.externalized_bytes += other.externalized_bytes;
        self.transferred_bytes += other.transferred_bytes;
        self.canonical_hits += other.canonical_hits;
        self.canonical_misses += other.canonical_misses;
        self.postprocessed += other.postprocessed;
        self.max_depth = self.max_depth.max(other.max_depth);
    }

    /// Export as `<prefix>_<counter>` metrics, in declaration order
    pub fn to_metrics(&self, prefix: &str) -> IndexMap<String, u64> {
        let mut metrics = IndexMap::new();
        let mut put = |name: &str, value: u64| {
            metrics.insert(format!("{}_{}", prefix, name), value);
        };
        put("objects", self.objects);
        put("back_references", self.back_references);
        put("deferred", self.deferred);
        put("bytes", self.bytes);
        put("externalized_bytes", self.externalized_bytes);
        put("transferred_bytes", self.transferred_bytes);
        put("canonical_hits", self.canonical_hits);
        put("canonical_misses", self.canonical_misses);
        put("postprocessed", self.postprocessed);
        put("max_depth", self.max_depth);
        metrics
    }

    /// Export in Prometheus text format
    pub fn to_prometheus(&self, prefix: &str) -> String {
        self.to_metrics(prefix)
            .iter()
            .map(|(name, value)| format!("{} {}\n", name, value))
            .collect()
    }
}
