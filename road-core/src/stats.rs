use std::collections::HashMap;

/// A monotonic counter registry, specialized from the ambient
/// metric-type/labels pattern down to plain named counters — this layer has
/// no gauges or histograms, only "how many times did X happen".
#[derive(Debug, Default, Clone)]
pub struct Stats {
    counters: HashMap<String, u64>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&mut self, key: &str) {
        *self.counters.entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, key: &str) -> u64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.counters.clone()
    }

    pub fn clear(&mut self) {
        self.counters.clear();
    }

    /// The per-class failure stat key, e.g. `joiner_transaction_failure`.
    pub fn failure_key(class_name: &str) -> String {
        format!("{}_transaction_failure", class_name.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate_per_key() {
        let mut stats = Stats::new();
        stats.inc("redo_join");
        stats.inc("redo_join");
        stats.inc("redo_accept");
        assert_eq!(stats.get("redo_join"), 2);
        assert_eq!(stats.get("redo_accept"), 1);
        assert_eq!(stats.get("unseen"), 0);
    }

    #[test]
    fn failure_key_is_lowercased_classname_suffixed() {
        assert_eq!(Stats::failure_key("Joiner"), "joiner_transaction_failure");
    }
}
