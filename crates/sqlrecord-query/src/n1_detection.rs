//! N+1 query detection for lazy relation loads.
//!
//! Every lazy `Model::relation` call that actually hits the data source is
//! recorded per (model class, relation). Once a pair reaches the threshold
//! a warning is logged on the `sqlrecord::n1` target, pointing at eager
//! loading with `with()` as the batch alternative.
//!
//! ```ignore
//! for customer in &customers {
//!     customer.relation(&session, "orders")?; // one query per customer
//! }
//!
//! // one query for all customers
//! session.find("Customer")?.with(&["orders"]).all(&session)?;
//! ```

use std::collections::HashMap;
use std::time::Instant;

/// Tracks lazy loads for N+1 detection.
#[derive(Debug)]
pub struct N1QueryTracker {
    /// (model class, relation name) -> load count
    counts: HashMap<(String, String), usize>,
    threshold: usize,
    enabled: bool,
    call_sites: Vec<CallSite>,
}

impl Default for N1QueryTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a lazy load was triggered.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub parent_type: String,
    pub relationship: String,
    pub file: &'static str,
    pub line: u32,
    pub timestamp: Instant,
}

/// Summary of recorded lazy loads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct N1Stats {
    /// Total number of lazy loads recorded
    pub total_loads: usize,
    /// Number of distinct (model, relation) pairs loaded
    pub relationships_loaded: usize,
    /// Number of pairs at or above the threshold
    pub potential_n1: usize,
}

impl N1QueryTracker {
    /// A tracker with the default threshold (3).
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
            threshold: 3,
            enabled: true,
            call_sites: Vec::new(),
        }
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Record one lazy load of `relationship` on a `parent_type` model.
    ///
    /// Warns exactly once per pair, when its count reaches the threshold.
    #[track_caller]
    pub fn record_load(&mut self, parent_type: &str, relationship: &str) {
        if !self.enabled {
            return;
        }

        let count = {
            let entry = self
                .counts
                .entry((parent_type.to_string(), relationship.to_string()))
                .or_insert(0);
            *entry += 1;
            *entry
        };

        let caller = std::panic::Location::caller();
        self.call_sites.push(CallSite {
            parent_type: parent_type.to_string(),
            relationship: relationship.to_string(),
            file: caller.file(),
            line: caller.line(),
            timestamp: Instant::now(),
        });

        if count == self.threshold {
            self.emit_warning(parent_type, relationship, count);
        }
    }

    fn emit_warning(&self, parent_type: &str, relationship: &str, count: usize) {
        tracing::warn!(
            target: "sqlrecord::n1",
            parent = parent_type,
            relationship = relationship,
            queries = count,
            threshold = self.threshold,
            "N+1 query pattern detected; load the relation eagerly with with()"
        );

        let sites = self
            .call_sites
            .iter()
            .filter(|s| s.parent_type == parent_type && s.relationship == relationship)
            .take(5);
        for (i, site) in sites.enumerate() {
            tracing::debug!(
                target: "sqlrecord::n1",
                index = i,
                file = site.file,
                line = site.line,
                "  [{}] {}:{}",
                i,
                site.file,
                site.line
            );
        }
    }

    /// Forget all counts and call sites.
    pub fn reset(&mut self) {
        self.counts.clear();
        self.call_sites.clear();
    }

    pub fn count_for(&self, parent_type: &str, relationship: &str) -> usize {
        self.counts
            .get(&(parent_type.to_string(), relationship.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn stats(&self) -> N1Stats {
        N1Stats {
            total_loads: self.counts.values().sum(),
            relationships_loaded: self.counts.len(),
            potential_n1: self
                .counts
                .values()
                .filter(|&&count| count >= self.threshold)
                .count(),
        }
    }

    pub fn call_sites(&self) -> &[CallSite] {
        &self.call_sites
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_new_defaults() {
        let tracker = N1QueryTracker::new();
        assert_eq!(tracker.threshold(), 3);
        assert!(tracker.is_enabled());
        assert_eq!(tracker.stats(), N1Stats::default());
    }

    #[test]
    fn test_tracker_counts_per_pair() {
        let mut tracker = N1QueryTracker::new();
        tracker.record_load("Customer", "orders");
        tracker.record_load("Customer", "orders");
        tracker.record_load("Customer", "profile");
        tracker.record_load("Order", "items");

        assert_eq!(tracker.count_for("Customer", "orders"), 2);
        assert_eq!(tracker.count_for("Customer", "profile"), 1);
        assert_eq!(tracker.count_for("Order", "items"), 1);
        assert_eq!(tracker.count_for("Order", "customer"), 0);
    }

    #[test]
    fn test_tracker_disabled_no_recording() {
        let mut tracker = N1QueryTracker::new();
        tracker.disable();
        tracker.record_load("Customer", "orders");
        assert_eq!(tracker.count_for("Customer", "orders"), 0);
        assert!(tracker.call_sites().is_empty());

        tracker.enable();
        tracker.record_load("Customer", "orders");
        assert_eq!(tracker.count_for("Customer", "orders"), 1);
    }

    #[test]
    fn test_stats_flag_pairs_at_threshold() {
        let mut tracker = N1QueryTracker::new().with_threshold(2);
        tracker.record_load("Customer", "orders");
        tracker.record_load("Customer", "orders");
        tracker.record_load("Order", "items");

        let stats = tracker.stats();
        assert_eq!(stats.total_loads, 3);
        assert_eq!(stats.relationships_loaded, 2);
        assert_eq!(stats.potential_n1, 1);
    }

    #[test]
    fn test_call_site_captures_location() {
        let mut tracker = N1QueryTracker::new();
        tracker.record_load("Customer", "orders");
        let site = &tracker.call_sites()[0];
        assert!(site.file.ends_with("n1_detection.rs"));
        assert_eq!(site.parent_type, "Customer");
        assert_eq!(site.relationship, "orders");
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut tracker = N1QueryTracker::new();
        tracker.record_load("Customer", "orders");
        tracker.reset();
        assert_eq!(tracker.count_for("Customer", "orders"), 0);
        assert!(tracker.call_sites().is_empty());
    }
}
