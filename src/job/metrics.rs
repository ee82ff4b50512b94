//! Prometheus metrics for the job pipeline

use crate::domain::{JobStatus, JobType};
use crate::error::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Job counters and timings, registered in a private registry
pub struct JobMetrics {
    registry: Registry,
    jobs_total: IntCounterVec,
    rollbacks_total: IntCounterVec,
    aborts_total: IntCounter,
    abort_failures_total: IntCounter,
    queue_depth: IntGauge,
    duration_seconds: HistogramVec,
}

impl JobMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let jobs_total = IntCounterVec::new(
            Opts::new("storage_jobs_total", "Finished jobs by type and status"),
            &["job_type", "status"],
        )?;
        let rollbacks_total = IntCounterVec::new(
            Opts::new("storage_job_rollbacks_total", "Jobs routed to rollback, by failed phase"),
            &["job_type", "phase"],
        )?;
        let aborts_total = IntCounter::new(
            "storage_job_transaction_aborts_total",
            "Transactions aborted by rollback",
        )?;
        let abort_failures_total = IntCounter::new(
            "storage_job_transaction_abort_failures_total",
            "Transaction aborts the database refused",
        )?;
        let queue_depth = IntGauge::new("storage_job_queue_depth", "Jobs waiting to run")?;
        let duration_seconds = HistogramVec::new(
            HistogramOpts::new("storage_job_duration_seconds", "Job run time by type")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
            &["job_type"],
        )?;

        registry.register(Box::new(jobs_total.clone()))?;
        registry.register(Box::new(rollbacks_total.clone()))?;
        registry.register(Box::new(aborts_total.clone()))?;
        registry.register(Box::new(abort_failures_total.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(duration_seconds.clone()))?;

        Ok(Self {
            registry,
            jobs_total,
            rollbacks_total,
            aborts_total,
            abort_failures_total,
            queue_depth,
            duration_seconds,
        })
    }

    pub fn record_finished(&self, job_type: JobType, status: JobStatus, elapsed: Duration) {
        self.jobs_total
            .with_label_values(&[job_type.as_str(), &status.to_string()])
            .inc();
        self.duration_seconds
            .with_label_values(&[job_type.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_rollback(&self, job_type: JobType, phase: &str) {
        self.rollbacks_total
            .with_label_values(&[job_type.as_str(), phase])
            .inc();
    }

    pub fn record_abort(&self, succeeded: bool) {
        self.aborts_total.inc();
        if !succeeded {
            self.abort_failures_total.inc();
        }
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as i64);
    }

    pub fn jobs_finished(&self, job_type: JobType, status: JobStatus) -> u64 {
        self.jobs_total
            .with_label_values(&[job_type.as_str(), &status.to_string()])
            .get()
    }

    pub fn aborts(&self) -> u64 {
        self.aborts_total.get()
    }

    /// Text exposition of every metric in the registry
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_encode() {
        let metrics = JobMetrics::new().unwrap();
        metrics.record_finished(JobType::LunCreate, JobStatus::Ok, Duration::from_millis(20));
        metrics.record_rollback(JobType::LunCreate, "persist");
        metrics.record_abort(false);

        assert_eq!(metrics.jobs_finished(JobType::LunCreate, JobStatus::Ok), 1);
        assert_eq!(metrics.aborts(), 1);

        let (content_type, body) = metrics.encode().unwrap();
        assert!(content_type.starts_with("text/plain"));
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("storage_jobs_total"));
        assert!(text.contains("storage_job_transaction_abort_failures_total 1"));
    }
}
