//! Sliding-window summary collector.
//!
//! Quantiles are computed over the observations of the last `max_age`;
//! `_count` and `_sum` are cumulative over the process lifetime, as the
//! Prometheus summary type defines them.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use prometheus::core::{Collector, Desc, Describer};
use prometheus::proto::{Metric, MetricFamily, MetricType, Quantile, Summary};
use prometheus::Opts;

#[derive(Debug, Default)]
struct Window {
    samples: VecDeque<(Instant, f64)>,
    count: u64,
    sum: f64,
}

impl Window {
    fn prune(&mut self, now: Instant, max_age: Duration) {
        while let Some((at, _)) = self.samples.front() {
            if now.duration_since(*at) > max_age {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Summary metric with fixed quantile objectives.
#[derive(Clone)]
pub struct DurationSummary {
    desc: Desc,
    objectives: Vec<f64>,
    max_age: Duration,
    window: Arc<Mutex<Window>>,
}

impl DurationSummary {
    /// Creates a summary reporting `objectives` (each in `0.0..=1.0`).
    pub fn new(opts: Opts, objectives: &[f64], max_age: Duration) -> Result<Self, prometheus::Error> {
        if let Some(q) = objectives.iter().find(|q| !(0.0..=1.0).contains(*q)) {
            return Err(prometheus::Error::Msg(format!(
                "quantile objective {} out of range [0, 1]",
                q
            )));
        }
        let mut objectives = objectives.to_vec();
        objectives.sort_by(f64::total_cmp);

        Ok(Self {
            desc: opts.describe()?,
            objectives,
            max_age,
            window: Arc::new(Mutex::new(Window::default())),
        })
    }

    pub fn observe(&self, value: f64) {
        self.observe_at(value, Instant::now());
    }

    fn observe_at(&self, value: f64, now: Instant) {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.prune(now, self.max_age);
        window.samples.push_back((now, value));
        window.count += 1;
        window.sum += value;
    }

    /// Returns `(count, sum, [(objective, value)])` as of `now`. Quantiles
    /// over an empty window are NaN.
    fn snapshot_at(&self, now: Instant) -> (u64, f64, Vec<(f64, f64)>) {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.prune(now, self.max_age);

        let mut values: Vec<f64> = window.samples.iter().map(|(_, v)| *v).collect();
        values.sort_by(f64::total_cmp);

        let quantiles = self
            .objectives
            .iter()
            .map(|q| (*q, nearest_rank(&values, *q)))
            .collect();

        (window.count, window.sum, quantiles)
    }
}

fn nearest_rank(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

impl Collector for DurationSummary {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let (count, sum, quantiles) = self.snapshot_at(Instant::now());

        let mut summary = Summary::default();
        summary.set_sample_count(count);
        summary.set_sample_sum(sum);
        for (objective, value) in quantiles {
            let mut quantile = Quantile::default();
            quantile.set_quantile(objective);
            quantile.set_value(value);
            summary.mut_quantile().push(quantile);
        }

        let mut metric = Metric::default();
        metric.set_summary(summary);

        let mut family = MetricFamily::default();
        family.set_name(self.desc.fq_name.clone());
        family.set_help(self.desc.help.clone());
        family.set_field_type(MetricType::SUMMARY);
        family.mut_metric().push(metric);
        vec![family]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> DurationSummary {
        DurationSummary::new(
            Opts::new("test_duration_seconds", "test"),
            &[0.5, 0.9, 0.1],
            Duration::from_secs(600),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_bad_objective() {
        let result = DurationSummary::new(Opts::new("x", "x"), &[1.5], Duration::from_secs(1));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_window_is_nan() {
        let s = summary();
        let (count, sum, q) = s.snapshot_at(Instant::now());
        assert_eq!(count, 0);
        assert_eq!(sum, 0.0);
        assert_eq!(q.len(), 3);
        assert!(q.iter().all(|(_, v)| v.is_nan()));
    }

    #[test]
    fn test_quantiles_sorted_objectives() {
        let s = summary();
        let now = Instant::now();
        for v in 1..=10 {
            s.observe_at(v as f64, now);
        }
        let (count, sum, q) = s.snapshot_at(now);
        assert_eq!(count, 10);
        assert_eq!(sum, 55.0);
        assert_eq!(q, vec![(0.1, 1.0), (0.5, 5.0), (0.9, 9.0)]);
    }

    #[test]
    fn test_old_samples_expire_but_count_stays() {
        let s = DurationSummary::new(Opts::new("x", "x"), &[0.5], Duration::from_secs(10)).unwrap();
        let start = Instant::now();
        s.observe_at(100.0, start);
        s.observe_at(1.0, start + Duration::from_secs(20));

        let (count, sum, q) = s.snapshot_at(start + Duration::from_secs(20));
        assert_eq!(count, 2);
        assert_eq!(sum, 101.0);
        assert_eq!(q, vec![(0.5, 1.0)]);
    }

    #[test]
    fn test_collect_family_shape() {
        let s = summary();
        s.observe(2.0);
        let families = s.collect();
        assert_eq!(families.len(), 1);
        let family = &families[0];
        assert_eq!(family.get_name(), "test_duration_seconds");
        assert_eq!(family.get_field_type(), MetricType::SUMMARY);
        let summary = family.get_metric()[0].get_summary();
        assert_eq!(summary.get_sample_count(), 1);
        assert_eq!(summary.get_quantile().len(), 3);
    }
}
