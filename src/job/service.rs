//! Job service: numbering, queueing and result tracking
//!
//! A single worker drains a FIFO queue and runs each job through the state
//! machine, so at most one job holds a database transaction at a time.
//! Finished records are broadcast to anyone waiting on a job number.

use super::metrics::JobMetrics;
use super::state_machine::JobStateMachine;
use crate::config::OrchestratorConfig;
use crate::domain::{
    JobActionState, JobCommand, JobNumber, JobQueueElement, JobStatus, JobType, ObjectId,
};
use crate::error::{Error, JobErrorCode, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the service remembers about a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_number: JobNumber,
    pub job_type: JobType,
    pub state: JobActionState,
    pub status: JobStatus,
    pub error_code: JobErrorCode,
    pub object_id: ObjectId,
    pub failure: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    fn queued(element: &JobQueueElement) -> Self {
        Self {
            job_number: element.job_number,
            job_type: element.job_type,
            state: element.current_state,
            status: element.status,
            error_code: element.error_code,
            object_id: element.object_id,
            failure: None,
            queued_at: element.queued_at,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    fn finish(&mut self, element: &JobQueueElement) {
        self.state = element.current_state;
        self.status = element.status;
        self.error_code = element.error_code;
        self.object_id = element.object_id;
        self.failure = element.failure.clone();
        self.finished_at = Some(Utc::now());
    }
}

pub struct JobService {
    tx: mpsc::Sender<JobQueueElement>,
    next_job_number: AtomicU64,
    records: Arc<DashMap<JobNumber, JobRecord>>,
    completed: broadcast::Sender<JobRecord>,
    queued: Arc<AtomicUsize>,
    metrics: Arc<JobMetrics>,
    wait_timeout: Duration,
    cancel: CancellationToken,
}

impl JobService {
    /// Start the worker; it stops when `cancel` fires or the service is dropped
    pub fn spawn(
        machine: JobStateMachine,
        config: &OrchestratorConfig,
        metrics: Arc<JobMetrics>,
        cancel: CancellationToken,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.job_service.queue_depth);
        let (completed, _) = broadcast::channel(config.notifications.broadcast_capacity);
        let records = Arc::new(DashMap::new());
        let queued = Arc::new(AtomicUsize::new(0));

        let worker = Worker {
            machine: machine.with_metrics(Arc::clone(&metrics)),
            records: Arc::clone(&records),
            completed: completed.clone(),
            queued: Arc::clone(&queued),
            metrics: Arc::clone(&metrics),
        };
        let handle = tokio::spawn(worker.run(rx, cancel.clone()));

        let service = Arc::new(Self {
            tx,
            next_job_number: AtomicU64::new(1),
            records,
            completed,
            queued,
            metrics,
            wait_timeout: Duration::from_millis(config.job_service.wait_timeout_ms),
            cancel,
        });
        (service, handle)
    }

    /// Queue a job and return its number
    pub async fn enqueue(&self, command: JobCommand) -> Result<JobNumber> {
        let job_number = JobNumber(self.next_job_number.fetch_add(1, Ordering::SeqCst));
        let element = JobQueueElement::new(job_number, command);
        self.records.insert(job_number, JobRecord::queued(&element));

        let depth = self.queued.fetch_add(1, Ordering::SeqCst) + 1;
        self.metrics.set_queue_depth(depth);

        if self.tx.send(element).await.is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            self.records.remove(&job_number);
            return Err(Error::Internal("job service is not running".into()));
        }
        info!(%job_number, depth, "Job queued");
        Ok(job_number)
    }

    /// Wait for a job to finish, bounded by the configured wait timeout
    pub async fn wait_for(&self, job_number: JobNumber) -> Result<JobRecord> {
        self.wait_for_timeout(job_number, self.wait_timeout).await
    }

    pub async fn wait_for_timeout(
        &self,
        job_number: JobNumber,
        timeout: Duration,
    ) -> Result<JobRecord> {
        // subscribe before looking, so a job finishing in between is not missed
        let mut rx = self.completed.subscribe();
        if let Some(record) = self.job_record(job_number) {
            if record.is_finished() {
                return Ok(record);
            }
        } else {
            return Err(Error::Validation {
                code: JobErrorCode::UnknownId,
                reason: format!("no job {}", job_number),
            });
        }

        let waited = tokio::time::timeout(timeout, async {
            loop {
                match rx.recv().await {
                    Ok(record) if record.job_number == job_number => return Ok(record),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(%job_number, skipped, "Completion feed lagged");
                        if let Some(record) = self.job_record(job_number) {
                            if record.is_finished() {
                                return Ok(record);
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(Error::Internal("job service stopped".into()));
                    }
                }
            }
        })
        .await;

        match waited {
            Ok(result) => result,
            Err(_) => Err(Error::WaitTimeout {
                what: format!("job {}", job_number),
                after: timeout,
            }),
        }
    }

    pub fn job_record(&self, job_number: JobNumber) -> Option<JobRecord> {
        self.records.get(&job_number).map(|r| r.value().clone())
    }

    /// Jobs queued but not yet started
    pub fn queue_len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobRecord> {
        self.completed.subscribe()
    }

    pub fn metrics(&self) -> &Arc<JobMetrics> {
        &self.metrics
    }

    pub fn shutdown(&self) {
        info!("Shutting down job service");
        self.cancel.cancel();
    }
}

struct Worker {
    machine: JobStateMachine,
    records: Arc<DashMap<JobNumber, JobRecord>>,
    completed: broadcast::Sender<JobRecord>,
    queued: Arc<AtomicUsize>,
    metrics: Arc<JobMetrics>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<JobQueueElement>, cancel: CancellationToken) {
        info!("Job worker started");
        loop {
            let element = tokio::select! {
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(element) => element,
                    None => break,
                },
            };

            let depth = self.queued.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
            self.metrics.set_queue_depth(depth);

            let job_number = element.job_number;
            if let Some(mut record) = self.records.get_mut(&job_number) {
                record.started_at = Some(Utc::now());
            }

            let finished = self.machine.run(element).await;

            let record = match self.records.get_mut(&job_number) {
                Some(mut record) => {
                    record.finish(&finished);
                    record.clone()
                }
                None => {
                    warn!(%job_number, "Finished job has no record");
                    let mut record = JobRecord::queued(&finished);
                    record.finish(&finished);
                    record
                }
            };
            // nobody waiting is fine
            let _ = self.completed.send(record);
        }
        info!("Job worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::domain::{LunCreateRequest, LunNumber, RaidGroupNumber, RaidGroupDestroyRequest};
    use crate::graph::GraphClient;
    use crate::job::notify::{InMemoryNotifier, NotifyingKeyManager};
    use crate::sim::SimulatedArray;
    use crate::transport::ChannelTransport;

    fn service(sim: Arc<SimulatedArray>) -> (Arc<JobService>, Arc<InMemoryNotifier>) {
        let cancel = CancellationToken::new();
        let config = Arc::new(OrchestratorConfig::default());
        let (transport, _) = ChannelTransport::spawn(sim, &TransportConfig::default(), cancel.clone());
        let notifier = Arc::new(InMemoryNotifier::new());
        let keys = Arc::new(NotifyingKeyManager::new(notifier.clone()));
        let machine = JobStateMachine::new(
            GraphClient::new(transport),
            notifier.clone(),
            keys,
            Arc::clone(&config),
        );
        let metrics = Arc::new(JobMetrics::new().unwrap());
        let (service, _) = JobService::spawn(machine, &config, metrics, cancel);
        (service, notifier)
    }

    #[tokio::test]
    async fn test_jobs_numbered_from_one_and_run_in_order() {
        let sim = Arc::new(SimulatedArray::demo());
        let (service, notifier) = service(Arc::clone(&sim));

        let first = service
            .enqueue(JobCommand::LunCreate(LunCreateRequest::new(
                RaidGroupNumber(5),
                LunNumber(20),
                0x800,
            )))
            .await
            .unwrap();
        let second = service
            .enqueue(JobCommand::RaidGroupDestroy(RaidGroupDestroyRequest::new(
                RaidGroupNumber(5),
            )))
            .await
            .unwrap();
        assert_eq!(first, JobNumber(1));
        assert_eq!(second, JobNumber(2));

        let lun = service.wait_for(first).await.unwrap();
        assert_eq!(lun.status, JobStatus::Ok);
        assert!(lun.started_at.is_some());

        // the LUN bound by job 1 blocks the destroy
        let destroy = service.wait_for(second).await.unwrap();
        assert_eq!(destroy.status, JobStatus::Failure);
        assert_eq!(destroy.error_code, JobErrorCode::RequestObjectHasUpstreamEdges);

        assert_eq!(notifier.len(), 2);
        assert_eq!(service.queue_len(), 0);
        assert_eq!(
            service.metrics().jobs_finished(JobType::LunCreate, JobStatus::Ok),
            1
        );
    }

    #[tokio::test]
    async fn test_wait_for_unknown_job() {
        let sim = Arc::new(SimulatedArray::demo());
        let (service, _) = service(sim);
        let err = service.wait_for(JobNumber(42)).await.unwrap_err();
        assert_eq!(err.job_error_code(), JobErrorCode::UnknownId);
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_fails() {
        let sim = Arc::new(SimulatedArray::demo());
        let (service, _) = service(sim);
        service.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = service
            .enqueue(JobCommand::RaidGroupDestroy(RaidGroupDestroyRequest::new(
                RaidGroupNumber(5),
            )))
            .await;
        assert!(result.is_err());
    }
}
