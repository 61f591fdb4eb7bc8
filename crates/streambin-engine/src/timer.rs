use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Collector of per-category processing times across workers.
///
/// Passed explicitly through the orchestrator and workers; the disabled
/// variant skips all bookkeeping so timed code pays nothing. Totals are
/// kept per `(category, worker)` so the report can show how many workers
/// contributed to each category.
pub struct Timer {
    enabled: bool,
    times: Mutex<BTreeMap<(String, String), Duration>>,
}

impl Timer {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            times: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record time elapsed since `start` under the given category, for
    /// the given worker label.
    pub fn add(&self, category: &str, worker: &str, start: Instant) {
        if !self.enabled {
            return;
        }
        let elapsed = start.elapsed();
        let mut times = self.times.lock().unwrap();
        *times
            .entry((category.to_string(), worker.to_string()))
            .or_insert(Duration::ZERO) += elapsed;
    }
}

impl std::fmt::Display for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.enabled {
            return write!(f, "Timings: disabled");
        }

        // Fold per-worker entries into per-category totals.
        let times = self.times.lock().unwrap();
        let mut by_category: BTreeMap<&str, (Duration, usize)> = BTreeMap::new();
        for ((category, _worker), duration) in times.iter() {
            let entry = by_category.entry(category).or_insert((Duration::ZERO, 0));
            entry.0 += *duration;
            entry.1 += 1;
        }

        write!(f, "Timings:")?;
        for (category, (total, workers)) in by_category {
            write!(
                f,
                "\n\t{category} - time: {} - workers: {workers}",
                format_duration(total)
            )?;
        }
        Ok(())
    }
}

fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = duration.subsec_millis();
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_timer_reports_nothing() {
        let timer = Timer::disabled();
        timer.add("read", "t1", Instant::now());
        assert_eq!(timer.to_string(), "Timings: disabled");
    }

    #[test]
    fn test_enabled_timer_accumulates() {
        let timer = Timer::new(true);
        timer.add("read", "t1", Instant::now());
        timer.add("read", "t2", Instant::now());
        timer.add("write", "t1", Instant::now());

        let report = timer.to_string();
        assert!(report.starts_with("Timings:"));
        assert!(report.contains("read - time: "));
        assert!(report.contains("read - time: 00:00:00"));
        assert!(report.contains("- workers: 2"));
        assert!(report.contains("write - time: "));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "00:00:00.000");
        assert_eq!(
            format_duration(Duration::from_millis(3_661_042)),
            "01:01:01.042"
        );
    }
}
