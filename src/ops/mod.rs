//! Operation algorithms, one per job type
//!
//! [`JobKind`] is the closed set of operations the runner knows how to
//! drive. Each variant owns its typed request and whatever it learned in
//! earlier phases.

pub mod ext_pool_lun_create;
pub mod lun_create;
pub mod pvd_destroy;
pub mod pvd_reinit;
pub mod raid_group_destroy;
pub mod update_block_size;
pub mod update_pvd;

pub use ext_pool_lun_create::ExtPoolLunCreate;
pub use lun_create::LunCreate;
pub use pvd_destroy::ProvisionDriveDestroy;
pub use pvd_reinit::ProvisionDriveReinit;
pub use raid_group_destroy::RaidGroupDestroy;
pub use update_block_size::UpdateBlockSize;
pub use update_pvd::UpdateProvisionDrive;

use crate::domain::{ClassId, JobCommand, JobType};
use crate::error::Result;
use crate::job::{JobContext, JobOperation};
use async_trait::async_trait;

pub enum JobKind {
    LunCreate(LunCreate),
    ExtPoolLunCreate(ExtPoolLunCreate),
    RaidGroupDestroy(RaidGroupDestroy),
    ProvisionDriveDestroy(ProvisionDriveDestroy),
    ProvisionDriveReinitialize(ProvisionDriveReinit),
    UpdateBlockSize(UpdateBlockSize),
    UpdateProvisionDrive(UpdateProvisionDrive),
}

impl JobKind {
    pub fn from_command(command: &JobCommand) -> Self {
        match command {
            JobCommand::LunCreate(req) => JobKind::LunCreate(LunCreate::new(req.clone())),
            JobCommand::ExtPoolLunCreate(req) => {
                JobKind::ExtPoolLunCreate(ExtPoolLunCreate::new(req.clone()))
            }
            JobCommand::RaidGroupDestroy(req) => {
                JobKind::RaidGroupDestroy(RaidGroupDestroy::new(req.clone()))
            }
            JobCommand::ProvisionDriveDestroy(req) => {
                JobKind::ProvisionDriveDestroy(ProvisionDriveDestroy::new(req.clone()))
            }
            JobCommand::ProvisionDriveReinitialize(req) => {
                JobKind::ProvisionDriveReinitialize(ProvisionDriveReinit::new(req.clone()))
            }
            JobCommand::UpdateProvisionDriveBlockSize(req) => {
                JobKind::UpdateBlockSize(UpdateBlockSize::new(req.clone()))
            }
            JobCommand::UpdateProvisionDrive(req) => {
                JobKind::UpdateProvisionDrive(UpdateProvisionDrive::new(req.clone()))
            }
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $op:ident => $body:expr) => {
        match $self {
            JobKind::LunCreate($op) => $body,
            JobKind::ExtPoolLunCreate($op) => $body,
            JobKind::RaidGroupDestroy($op) => $body,
            JobKind::ProvisionDriveDestroy($op) => $body,
            JobKind::ProvisionDriveReinitialize($op) => $body,
            JobKind::UpdateBlockSize($op) => $body,
            JobKind::UpdateProvisionDrive($op) => $body,
        }
    };
}

#[async_trait]
impl JobOperation for JobKind {
    fn job_type(&self) -> JobType {
        dispatch!(self, op => op.job_type())
    }

    fn class_id(&self) -> ClassId {
        dispatch!(self, op => op.class_id())
    }

    async fn validate(&mut self, ctx: &mut JobContext) -> Result<()> {
        dispatch!(self, op => op.validate(ctx).await)
    }

    async fn update_in_memory(&mut self, ctx: &mut JobContext) -> Result<()> {
        dispatch!(self, op => op.update_in_memory(ctx).await)
    }

    async fn persist(&mut self, ctx: &mut JobContext) -> Result<()> {
        dispatch!(self, op => op.persist(ctx).await)
    }

    async fn commit(&mut self, ctx: &mut JobContext) -> Result<()> {
        dispatch!(self, op => op.commit(ctx).await)
    }

    async fn rollback(&mut self, ctx: &mut JobContext) -> Result<()> {
        dispatch!(self, op => op.rollback(ctx).await)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::OrchestratorConfig;
    use crate::domain::{JobCommand, JobNumber, JobQueueElement};
    use crate::graph::GraphClient;
    use crate::job::{InMemoryNotifier, JobStateMachine, NotifyingKeyManager};
    use crate::sim::SimulatedArray;
    use crate::transport::ChannelTransport;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    /// Simulated array wired to a runner
    pub struct Harness {
        pub sim: Arc<SimulatedArray>,
        pub notifier: Arc<InMemoryNotifier>,
        pub graph: GraphClient,
        machine: JobStateMachine,
        next_job: AtomicU64,
    }

    impl Harness {
        pub fn new(sim: SimulatedArray) -> Self {
            Self::with_config(sim, OrchestratorConfig::default())
        }

        pub fn with_config(sim: SimulatedArray, config: OrchestratorConfig) -> Self {
            let sim = Arc::new(sim);
            let (transport, _) = ChannelTransport::spawn(
                sim.clone(),
                &config.transport,
                CancellationToken::new(),
            );
            let graph = GraphClient::new(transport);
            let notifier = Arc::new(InMemoryNotifier::new());
            let keys = Arc::new(NotifyingKeyManager::new(notifier.clone()));
            let machine =
                JobStateMachine::new(graph.clone(), notifier.clone(), keys, Arc::new(config));
            Self {
                sim,
                notifier,
                graph,
                machine,
                next_job: AtomicU64::new(1),
            }
        }

        pub async fn run(&self, command: JobCommand) -> JobQueueElement {
            let number = JobNumber(self.next_job.fetch_add(1, Ordering::SeqCst));
            self.machine
                .run(JobQueueElement::new(number, command))
                .await
        }
    }
}
