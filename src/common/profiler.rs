//! Section timer for the filter cycle.
//!
//! Each stage of a cycle is bracketed by [`Profiler::enter`] /
//! [`Profiler::leave`] under a stable section name. When disabled, both calls
//! are no-ops and `leave` reports zero elapsed time.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Instant;

/// Accumulated statistics for one named section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectionStats {
    /// Number of completed enter/leave pairs
    pub count: usize,
    /// Total elapsed time in seconds
    pub total: f64,
    /// Shortest single run in seconds
    pub min: f64,
    /// Longest single run in seconds
    pub max: f64,
}

impl SectionStats {
    fn record(&mut self, elapsed: f64) {
        self.count += 1;
        self.total += elapsed;
        self.min = self.min.min(elapsed);
        self.max = self.max.max(elapsed);
    }

    /// Mean run time in seconds.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

impl Default for SectionStats {
    fn default() -> Self {
        Self {
            count: 0,
            total: 0.0,
            min: f64::INFINITY,
            max: 0.0,
        }
    }
}

/// Named-section profiler.
#[derive(Debug, Default)]
pub struct Profiler {
    enabled: bool,
    open: HashMap<&'static str, Instant>,
    stats: HashMap<&'static str, SectionStats>,
}

impl Profiler {
    /// Create a profiler, enabled or not.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Default::default()
        }
    }

    /// Enable or disable timing. Disabling drops any open sections.
    pub fn enable(&mut self, enabled: bool) {
        if !enabled {
            self.open.clear();
        }
        self.enabled = enabled;
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Start timing `section`.
    pub fn enter(&mut self, section: &'static str) {
        if self.enabled {
            self.open.insert(section, Instant::now());
        }
    }

    /// Stop timing `section`, returning the elapsed seconds.
    ///
    /// Returns 0 when disabled or when the section was never entered.
    pub fn leave(&mut self, section: &'static str) -> f64 {
        if !self.enabled {
            return 0.0;
        }
        match self.open.remove(section) {
            Some(start) => {
                let elapsed = start.elapsed().as_secs_f64();
                self.stats.entry(section).or_default().record(elapsed);
                elapsed
            }
            None => 0.0,
        }
    }

    /// Statistics for one section.
    pub fn stats(&self, section: &str) -> Option<&SectionStats> {
        self.stats.get(section)
    }

    /// Names of all sections recorded so far, sorted.
    pub fn sections(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.stats.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Forget all accumulated statistics.
    pub fn clear(&mut self) {
        self.open.clear();
        self.stats.clear();
    }

    /// Human-readable table of all sections.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<40} {:>8} {:>12} {:>12} {:>12}",
            "section", "count", "mean [ms]", "min [ms]", "max [ms]"
        );
        for name in self.sections() {
            let s = &self.stats[name];
            let _ = writeln!(
                out,
                "{:<40} {:>8} {:>12.4} {:>12.4} {:>12.4}",
                name,
                s.count,
                1e3 * s.mean(),
                1e3 * s.min,
                1e3 * s.max
            );
        }
        out
    }
}
