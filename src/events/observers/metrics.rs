//! Metrics Observer
//!
//! Counts what the engine did, Prometheus-style:
//! - Counters: allocations, batches, samples, early stops, verifier failures
//! - Gauges: budget spent, last agreement
//! - Histogram: batch latency

use crate::events::{EventBus, PipelineEvent};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

/// Histogram bucket boundaries for batch latency (milliseconds)
pub const LATENCY_BUCKETS: [u64; 7] = [10, 50, 100, 500, 1000, 5000, 10000];

/// Metrics collected from pipeline events
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    /// Allocations, by difficulty label
    pub allocations_total: BTreeMap<String, u64>,
    /// Allocations refused by the global limit
    pub budget_exhausted_total: u64,
    /// Cost of the last allocation's budgeter state
    pub budget_used: f64,
    /// Sampling batches completed
    pub batches_total: u64,
    /// Candidates requested and produced across batches
    pub samples_requested: u64,
    pub samples_succeeded: u64,
    /// Batch latency histogram (bucket -> count)
    pub latency_histogram: BTreeMap<u64, u64>,
    pub latency_sum_ms: u64,
    pub latency_count: u64,
    /// Consensus checks run, and how many failed outright
    pub consensus_checks: u64,
    pub consensus_failures: u64,
    pub last_agreement: Option<f64>,
    /// Self-consistency runs finished, and how many stopped early
    pub runs_finished: u64,
    pub early_stops: u64,
    pub aggregation_errors: u64,
    /// Verifier outcomes, by verifier id
    pub verifier_completed: BTreeMap<String, u64>,
    pub verifier_failed: BTreeMap<String, u64>,
    pub verifications_finished: u64,
    /// Timeouts, by stage
    pub timeouts_total: BTreeMap<String, u64>,
}

fn bump(map: &mut BTreeMap<String, u64>, key: &str) {
    *map.entry(key.to_string()).or_insert(0) += 1;
}

impl Metrics {
    /// All counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record batch latency
    pub fn record_latency(&mut self, latency_ms: u64) {
        let last = LATENCY_BUCKETS[LATENCY_BUCKETS.len() - 1];
        let bucket = LATENCY_BUCKETS
            .iter()
            .copied()
            .find(|&b| latency_ms <= b)
            .unwrap_or(last);
        *self.latency_histogram.entry(bucket).or_insert(0) += 1;
        self.latency_sum_ms += latency_ms;
        self.latency_count += 1;
    }

    /// Update counters for one event
    pub fn record(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::BudgetAllocated {
                difficulty,
                used_budget,
                ..
            } => {
                bump(&mut self.allocations_total, difficulty);
                self.budget_used = *used_budget;
            }
            PipelineEvent::BudgetExhausted { .. } => self.budget_exhausted_total += 1,
            PipelineEvent::BatchGenerated {
                requested,
                succeeded,
                latency_ms,
                ..
            } => {
                self.batches_total += 1;
                self.samples_requested += *requested as u64;
                self.samples_succeeded += *succeeded as u64;
                self.record_latency(*latency_ms);
            }
            PipelineEvent::ConsensusChecked { agreement, .. } => {
                self.consensus_checks += 1;
                match agreement {
                    Some(a) => self.last_agreement = Some(*a),
                    None => self.consensus_failures += 1,
                }
            }
            PipelineEvent::SamplingFinished {
                early_stopped,
                aggregation_error,
                ..
            } => {
                self.runs_finished += 1;
                if *early_stopped {
                    self.early_stops += 1;
                }
                if *aggregation_error {
                    self.aggregation_errors += 1;
                }
            }
            PipelineEvent::VerifierCompleted { verifier_id, .. } => {
                bump(&mut self.verifier_completed, verifier_id);
            }
            PipelineEvent::VerifierFailed { verifier_id, .. } => {
                bump(&mut self.verifier_failed, verifier_id);
            }
            PipelineEvent::VerificationFinished { .. } => self.verifications_finished += 1,
            PipelineEvent::TimedOut { stage, .. } => bump(&mut self.timeouts_total, stage),
        }
    }

    /// Get average batch latency in milliseconds
    pub fn avg_latency_ms(&self) -> f64 {
        if self.latency_count == 0 {
            0.0
        } else {
            self.latency_sum_ms as f64 / self.latency_count as f64
        }
    }

    /// Fraction of finished runs that stopped early
    pub fn early_stop_rate(&self) -> f64 {
        if self.runs_finished == 0 {
            0.0
        } else {
            self.early_stops as f64 / self.runs_finished as f64
        }
    }

    /// Prometheus exposition text, every metric prefixed `convergence_`
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP convergence_allocations_total Budgets allocated\n");
        output.push_str("# TYPE convergence_allocations_total counter\n");
        for (difficulty, count) in &self.allocations_total {
            output.push_str(&format!(
                "convergence_allocations_total{{difficulty=\"{}\"}} {}\n",
                difficulty, count
            ));
        }

        output.push_str("# HELP convergence_budget_used Budget spent by the budgeter\n");
        output.push_str("# TYPE convergence_budget_used gauge\n");
        output.push_str(&format!("convergence_budget_used {}\n", self.budget_used));

        output.push_str("# HELP convergence_samples_total Candidates generated\n");
        output.push_str("# TYPE convergence_samples_total counter\n");
        output.push_str(&format!(
            "convergence_samples_total{{outcome=\"ok\"}} {}\n",
            self.samples_succeeded
        ));
        output.push_str(&format!(
            "convergence_samples_total{{outcome=\"failed\"}} {}\n",
            self.samples_requested.saturating_sub(self.samples_succeeded)
        ));

        output.push_str("# HELP convergence_batch_latency_ms Batch latency in milliseconds\n");
        output.push_str("# TYPE convergence_batch_latency_ms histogram\n");
        let mut cumulative = 0u64;
        for &bucket in &LATENCY_BUCKETS {
            cumulative += self.latency_histogram.get(&bucket).copied().unwrap_or(0);
            output.push_str(&format!(
                "convergence_batch_latency_ms_bucket{{le=\"{}\"}} {}\n",
                bucket, cumulative
            ));
        }
        output.push_str(&format!(
            "convergence_batch_latency_ms_bucket{{le=\"+Inf\"}} {}\n",
            self.latency_count
        ));
        output.push_str(&format!(
            "convergence_batch_latency_ms_sum {}\n",
            self.latency_sum_ms
        ));
        output.push_str(&format!(
            "convergence_batch_latency_ms_count {}\n",
            self.latency_count
        ));

        output.push_str("# HELP convergence_early_stops_total Runs stopped by consensus\n");
        output.push_str("# TYPE convergence_early_stops_total counter\n");
        output.push_str(&format!(
            "convergence_early_stops_total {}\n",
            self.early_stops
        ));

        output.push_str("# HELP convergence_verifier_failures_total Verifier failures\n");
        output.push_str("# TYPE convergence_verifier_failures_total counter\n");
        for (verifier, count) in &self.verifier_failed {
            output.push_str(&format!(
                "convergence_verifier_failures_total{{verifier=\"{}\"}} {}\n",
                verifier, count
            ));
        }

        output
    }

    /// Multi-line summary for terminal output
    pub fn report(&self) -> String {
        let mut output = String::new();

        output.push_str("=== Convergence Metrics Report ===\n\n");

        output.push_str("Allocations:\n");
        for (difficulty, count) in &self.allocations_total {
            output.push_str(&format!("  {}: {}\n", difficulty, count));
        }
        output.push_str(&format!(
            "  exhausted: {}, budget used: {:.2}\n",
            self.budget_exhausted_total, self.budget_used
        ));

        output.push_str(&format!(
            "\nSampling: runs={}, early stops={} ({:.0}%), batches={}, samples={}/{}\n",
            self.runs_finished,
            self.early_stops,
            self.early_stop_rate() * 100.0,
            self.batches_total,
            self.samples_succeeded,
            self.samples_requested
        ));
        output.push_str(&format!(
            "Batch latency: avg={:.1}ms, count={}\n",
            self.avg_latency_ms(),
            self.latency_count
        ));

        output.push_str("\nVerifier failures:\n");
        for (verifier, count) in &self.verifier_failed {
            output.push_str(&format!("  {}: {}\n", verifier, count));
        }

        output
    }
}

/// Observer that collects metrics from pipeline events
pub struct MetricsObserver {
    receiver: broadcast::Receiver<PipelineEvent>,
    metrics: Arc<Mutex<Metrics>>,
}

impl MetricsObserver {
    /// Subscribe a fresh, empty metrics set to `bus`
    pub fn new(bus: &EventBus) -> Self {
        Self {
            receiver: bus.subscribe(),
            metrics: Arc::new(Mutex::new(Metrics::new())),
        }
    }

    /// Shared handle; lock it to read
    pub fn metrics(&self) -> Arc<Mutex<Metrics>> {
        Arc::clone(&self.metrics)
    }

    /// Record events until every bus handle is dropped
    pub async fn run(mut self) {
        loop {
            match self.receiver.recv().await {
                Ok(event) => self.process_event(&event),
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    }

    /// Drain every event already buffered, without waiting
    pub fn drain(&mut self) {
        while let Ok(event) = self.receiver.try_recv() {
            self.process_event(&event);
        }
    }

    fn process_event(&self, event: &PipelineEvent) {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // ==========================================
    // Metrics Recording Tests
    // ==========================================

    #[test]
    fn test_record_allocations() {
        let mut metrics = Metrics::new();
        metrics.record(&PipelineEvent::budget_allocated("easy", 3, 3.0, 3.0));
        metrics.record(&PipelineEvent::budget_allocated("easy", 3, 3.0, 6.0));
        metrics.record(&PipelineEvent::budget_allocated("hard", 10, 17.5, 23.5));
        metrics.record(&PipelineEvent::budget_exhausted(17.5, 23.5, 30.0));

        assert_eq!(metrics.allocations_total.get("easy"), Some(&2));
        assert_eq!(metrics.allocations_total.get("hard"), Some(&1));
        assert_eq!(metrics.budget_used, 23.5);
        assert_eq!(metrics.budget_exhausted_total, 1);
    }

    #[test]
    fn test_record_latency_histogram() {
        let mut metrics = Metrics::new();
        metrics.record_latency(5);
        metrics.record_latency(75);
        metrics.record_latency(20000);

        assert_eq!(metrics.latency_histogram.get(&10), Some(&1));
        assert_eq!(metrics.latency_histogram.get(&100), Some(&1));
        assert_eq!(metrics.latency_histogram.get(&10000), Some(&1));
        assert_eq!(metrics.latency_count, 3);
    }

    #[test]
    fn test_sampling_counters() {
        let mut metrics = Metrics::new();
        metrics.record(&PipelineEvent::batch_generated(0, 3, 2, 2, Duration::ZERO));
        metrics.record(&PipelineEvent::consensus_checked(2, None, false));
        metrics.record(&PipelineEvent::consensus_checked(5, Some(0.8), true));
        metrics.record(&PipelineEvent::sampling_finished(
            5,
            true,
            Some(0.8),
            false,
            Duration::ZERO,
        ));
        metrics.record(&PipelineEvent::sampling_finished(
            10,
            false,
            None,
            true,
            Duration::ZERO,
        ));

        assert_eq!(metrics.samples_requested, 3);
        assert_eq!(metrics.samples_succeeded, 2);
        assert_eq!(metrics.consensus_failures, 1);
        assert_eq!(metrics.last_agreement, Some(0.8));
        assert_eq!(metrics.early_stop_rate(), 0.5);
        assert_eq!(metrics.aggregation_errors, 1);
    }

    #[test]
    fn test_prometheus_output() {
        let mut metrics = Metrics::new();
        metrics.record(&PipelineEvent::budget_allocated("medium", 5, 8.5, 8.5));
        metrics.record(&PipelineEvent::verifier_failed("prm", "boom"));

        let text = metrics.to_prometheus();
        assert!(text.contains("convergence_allocations_total{difficulty=\"medium\"} 1"));
        assert!(text.contains("convergence_verifier_failures_total{verifier=\"prm\"} 1"));
        assert!(text.contains("convergence_batch_latency_ms_bucket{le=\"+Inf\"} 0"));
    }

    #[test]
    fn test_report_mentions_sections() {
        let report = Metrics::new().report();
        assert!(report.contains("Allocations:"));
        assert!(report.contains("Sampling:"));
    }

    // ==========================================
    // Observer Tests
    // ==========================================

    #[tokio::test]
    async fn test_observer_drain() {
        let bus = EventBus::new(100);
        let mut observer = MetricsObserver::new(&bus);
        let metrics = observer.metrics();

        bus.emit(PipelineEvent::verifier_completed("score", "c", 1.0, Duration::ZERO));
        bus.emit(PipelineEvent::timed_out("sampling", Duration::from_secs(1)));
        observer.drain();

        let m = metrics.lock().unwrap();
        assert_eq!(m.verifier_completed.get("score"), Some(&1));
        assert_eq!(m.timeouts_total.get("sampling"), Some(&1));
    }

    #[tokio::test]
    async fn test_observer_run_until_closed() {
        let bus = EventBus::new(100);
        let observer = MetricsObserver::new(&bus);
        let metrics = observer.metrics();

        bus.emit(PipelineEvent::verification_finished(
            "c",
            0.7,
            0.6,
            2,
            Duration::ZERO,
        ));
        drop(bus);

        tokio::time::timeout(Duration::from_secs(2), observer.run())
            .await
            .expect("observer should stop");
        assert_eq!(metrics.lock().unwrap().verifications_finished, 1);
    }
}
