//! Shared wiring for the integration tests: a simulated array behind the
//! channel transport, an in-memory notifier and a runner or a job service

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use storage_job_orchestrator::domain::{
    JobCommand, JobNumber, JobQueueElement, Lba, LunCreateRequest, LunNumber, RaidGroupNumber,
};
use storage_job_orchestrator::{
    ChannelTransport, GraphClient, InMemoryNotifier, JobMetrics, JobService, JobStateMachine,
    NotifyingKeyManager, OrchestratorConfig, SimulatedArray,
};
use tokio_util::sync::CancellationToken;

pub struct Pipeline {
    pub sim: Arc<SimulatedArray>,
    pub graph: GraphClient,
    pub notifier: Arc<InMemoryNotifier>,
    pub config: Arc<OrchestratorConfig>,
    cancel: CancellationToken,
    next_job: AtomicU64,
}

impl Pipeline {
    pub fn new(sim: SimulatedArray) -> Self {
        Self::with_config(sim, OrchestratorConfig::default())
    }

    pub fn with_config(sim: SimulatedArray, config: OrchestratorConfig) -> Self {
        let sim = Arc::new(sim);
        let cancel = CancellationToken::new();
        let (transport, _) =
            ChannelTransport::spawn(sim.clone(), &config.transport, cancel.child_token());
        Self {
            sim,
            graph: GraphClient::new(transport),
            notifier: Arc::new(InMemoryNotifier::new()),
            config: Arc::new(config),
            cancel,
            next_job: AtomicU64::new(1),
        }
    }

    pub fn machine(&self) -> JobStateMachine {
        let keys = Arc::new(NotifyingKeyManager::new(self.notifier.clone()));
        JobStateMachine::new(
            self.graph.clone(),
            self.notifier.clone(),
            keys,
            Arc::clone(&self.config),
        )
    }

    /// Run one job directly through a fresh runner
    pub async fn run(&self, command: JobCommand) -> JobQueueElement {
        let number = JobNumber(self.next_job.fetch_add(1, Ordering::SeqCst));
        self.machine()
            .run(JobQueueElement::new(number, command))
            .await
    }

    pub fn service(&self) -> Arc<JobService> {
        let metrics = Arc::new(JobMetrics::new().expect("metrics register"));
        let (service, _) =
            JobService::spawn(self.machine(), &self.config, metrics, self.cancel.child_token());
        service
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Orchestrator config with short retry and wait intervals
pub fn fast_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.retry.delay_ms = 1;
    config.reinit.edge_wait_timeout_ms = 200;
    config.reinit.edge_poll_interval_ms = 10;
    config.reinit.key_wait_timeout_ms = 200;
    config.reinit.key_poll_interval_ms = 10;
    config
}

pub fn lun_create(raid_group: u32, lun: u32, capacity: Lba) -> JobCommand {
    JobCommand::LunCreate(LunCreateRequest::new(
        RaidGroupNumber(raid_group),
        LunNumber(lun),
        capacity,
    ))
}
