//! End-to-end job runs against the simulated array

mod common;

use std::collections::HashSet;

use assert_matches::assert_matches;
use common::{lun_create, Pipeline};
use storage_job_orchestrator::domain::{
    ExtPoolLunCreateRequest, JobActionState, JobCommand, JobStatus, JobType, LifecycleState,
    LunCreateRequest, LunNumber, ObjectId, PoolId, ProvisionDriveDestroyRequest,
    RaidGroupDestroyRequest, RaidGroupNumber, UpdateBlockSizeRequest,
};
use storage_job_orchestrator::ops::lun_create::capacity::imported_capacity;
use storage_job_orchestrator::{Error, JobErrorCode, SimulatedArray};

fn destroy_rg(number: u32) -> JobCommand {
    JobCommand::RaidGroupDestroy(RaidGroupDestroyRequest::new(RaidGroupNumber(number)))
}

#[tokio::test]
async fn test_lun_create_binds_at_start_of_group() {
    let pipeline = Pipeline::new(SimulatedArray::demo());
    let rg7 = pipeline.graph.lookup_raid_group(RaidGroupNumber(7)).await.unwrap();
    for lun in 100..110 {
        pipeline.sim.add_lun(rg7, LunNumber(lun), 0x100);
    }

    let done = pipeline.run(lun_create(5, 1, 0x1000)).await;

    assert_eq!(done.status, JobStatus::Ok);
    assert_eq!(done.error_code, JobErrorCode::NoError);
    let edges = pipeline.graph.downstream_edges(done.object_id).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].offset, 0);
    assert!(edges[0].capacity >= 0x1000);
    assert_eq!(edges[0].capacity % 8, 0);
    assert_eq!(edges[0].capacity, imported_capacity(0x1000, 8).unwrap());

    let events = pipeline.notifier.events();
    assert_eq!(events.len(), 1);
    let job = events[0].as_job().unwrap();
    assert_eq!(job.status, JobStatus::Ok);
    assert_eq!(job.object_id, done.object_id);
}

#[tokio::test]
async fn test_lun_limit_fails_validation_without_transaction() {
    let pipeline = Pipeline::new(SimulatedArray::demo());
    let rg7 = pipeline.graph.lookup_raid_group(RaidGroupNumber(7)).await.unwrap();
    pipeline.sim.add_lun(rg7, LunNumber(100), 0x100);
    pipeline.sim.add_lun(rg7, LunNumber(101), 0x100);
    pipeline.sim.set_max_user_luns(2);

    let done = pipeline.run(lun_create(5, 1, 0x1000)).await;

    assert_eq!(done.error_code, JobErrorCode::SystemLimitsExceeded);
    assert!(pipeline.sim.transaction_starts().is_empty());
    assert_eq!(pipeline.sim.opcode_count("transaction_abort"), 0);
    assert_eq!(pipeline.sim.opcode_count("create_lun"), 0);

    let events = pipeline.notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].as_job().unwrap().status, JobStatus::Failure);
}

#[tokio::test]
async fn test_raid_group_with_bound_lun_is_not_destroyed() {
    let pipeline = Pipeline::new(SimulatedArray::demo());
    let rg = pipeline.graph.lookup_raid_group(RaidGroupNumber(5)).await.unwrap();
    pipeline.sim.add_lun(rg, LunNumber(3), 0x100);

    let done = pipeline.run(destroy_rg(5)).await;

    assert_eq!(done.error_code, JobErrorCode::RequestObjectHasUpstreamEdges);
    assert!(pipeline.sim.transaction_starts().is_empty());
    assert_eq!(pipeline.sim.opcode_count("destroy_object"), 0);
    assert!(pipeline.sim.exists(rg));
}

#[tokio::test]
async fn test_ready_wait_timeout_keeps_persisted_lun() {
    let pipeline = Pipeline::new(SimulatedArray::demo());
    pipeline.sim.set_promote_on_commit(false);

    let mut request = LunCreateRequest::new(RaidGroupNumber(5), LunNumber(4), 0x1000);
    request.wait_ready = true;
    request.ready_timeout_ms = 100;
    let done = pipeline.run(JobCommand::LunCreate(request)).await;

    assert_eq!(done.status, JobStatus::Failure);
    assert_eq!(done.error_code, JobErrorCode::Timeout);
    assert_eq!(pipeline.notifier.len(), 1);

    // the commit stands
    assert_eq!(pipeline.sim.committed_transactions().len(), 1);
    assert!(pipeline.sim.aborted_transactions().is_empty());
    assert!(pipeline.sim.exists(done.object_id));
    assert_eq!(
        pipeline.graph.lookup_lun(LunNumber(4)).await.unwrap(),
        Some(done.object_id)
    );
    assert_eq!(
        pipeline.graph.lifecycle_state(done.object_id).await.unwrap(),
        LifecycleState::Specialize
    );
}

#[tokio::test]
async fn test_abort_only_after_transaction_phases() {
    let pipeline = Pipeline::new(SimulatedArray::demo());

    // validation failures of every kind never touch the transaction
    let rejected = [
        lun_create(99, 1, 0x1000),
        destroy_rg(99),
        JobCommand::ProvisionDriveDestroy(ProvisionDriveDestroyRequest {
            object_id: ObjectId(0x7777),
            wait_destroy: false,
            destroy_timeout_ms: 1000,
        }),
        JobCommand::UpdateProvisionDriveBlockSize(UpdateBlockSizeRequest {
            object_id: ObjectId(0x7777),
            block_size: 520,
        }),
        JobCommand::ExtPoolLunCreate(ExtPoolLunCreateRequest {
            pool_id: PoolId(42),
            lun_id: 1,
            capacity: 0x100,
            world_wide_name: String::new(),
            user_defined_name: String::new(),
            wait_ready: false,
            ready_timeout_ms: 1000,
        }),
    ];
    for command in rejected {
        let done = pipeline.run(command).await;
        assert_eq!(done.status, JobStatus::Failure);
    }
    assert!(pipeline.sim.transaction_starts().is_empty());
    assert_eq!(pipeline.sim.opcode_count("transaction_abort"), 0);

    // an UpdateInMemory failure aborts
    pipeline.sim.fail_next("create_edge", 1);
    let done = pipeline.run(lun_create(5, 1, 0x1000)).await;
    assert_eq!(done.error_code, JobErrorCode::InternalError);
    assert_eq!(pipeline.sim.transaction_starts().len(), 1);
    assert_eq!(pipeline.sim.aborted_transactions().len(), 1);

    // so does a Persist failure
    pipeline.sim.fail_next("transaction_commit", 1);
    let done = pipeline.run(lun_create(5, 1, 0x1000)).await;
    assert_eq!(done.error_code, JobErrorCode::InternalError);
    assert_eq!(pipeline.sim.transaction_starts().len(), 2);
    assert_eq!(pipeline.sim.aborted_transactions().len(), 2);
    assert!(!pipeline.sim.transaction_open());

    assert_eq!(pipeline.notifier.len(), 7);
}

#[tokio::test]
async fn test_one_transaction_start_per_job() {
    let pipeline = Pipeline::new(SimulatedArray::demo());

    let mut jobs = Vec::new();
    for lun in 1..=3 {
        jobs.push(pipeline.run(lun_create(5, lun, 0x1000)).await);
    }
    jobs.push(pipeline.run(destroy_rg(7)).await);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Ok));

    let starts = pipeline.sim.transaction_starts();
    assert_eq!(starts.len(), jobs.len());
    let distinct: HashSet<_> = starts.iter().copied().collect();
    assert_eq!(distinct.len(), starts.len());
    for job in &jobs {
        assert!(starts.contains(&job.job_number));
    }
}

#[tokio::test]
async fn test_consecutive_luns_pack_at_aligned_offsets() {
    let pipeline = Pipeline::new(SimulatedArray::demo());
    assert_eq!(imported_capacity(0x1000, 8).unwrap(), 0x1008);

    let mut offsets = Vec::new();
    for lun in 1..=3 {
        let done = pipeline.run(lun_create(5, lun, 0x1000)).await;
        assert_eq!(done.status, JobStatus::Ok);
        let edge = &pipeline.graph.downstream_edges(done.object_id).await.unwrap()[0];
        assert_eq!(edge.capacity, 0x1008);
        offsets.push(edge.offset);
    }
    offsets.sort_unstable();
    assert_eq!(offsets, vec![0, 0x1008, 0x2010]);
}

#[tokio::test]
async fn test_unknown_raid_group_is_idempotent() {
    let pipeline = Pipeline::new(SimulatedArray::demo());
    let objects = pipeline.sim.object_count();

    for _ in 0..2 {
        let done = pipeline.run(lun_create(404, 1, 0x1000)).await;
        assert_eq!(done.error_code, JobErrorCode::UnknownId);
        assert_eq!(done.object_id, ObjectId::INVALID);
    }
    assert_eq!(pipeline.sim.object_count(), objects);
    assert!(pipeline.sim.transaction_starts().is_empty());

    assert_matches!(
        pipeline.graph.lookup_raid_group(RaidGroupNumber(404)).await,
        Err(Error::UnknownNumber { number: 404, .. })
    );
}

#[tokio::test]
async fn test_raid10_destroy_counts_candidates() {
    let pipeline = Pipeline::new(SimulatedArray::demo());
    let rg = pipeline.graph.lookup_raid_group(RaidGroupNumber(7)).await.unwrap();
    let mirrors = pipeline.sim.downstream_objects(rg);
    assert_eq!(mirrors.len(), 2);
    let mut vds = Vec::new();
    for mirror in &mirrors {
        vds.extend(pipeline.sim.downstream_objects(*mirror));
    }
    assert_eq!(vds.len(), 4);
    pipeline.sim.set_removal_override(vds[1], Some(false));

    let done = pipeline.run(destroy_rg(7)).await;
    assert_eq!(done.status, JobStatus::Ok);

    // 1 striper + 2 mirrors + 3 of 4 virtual drives
    let committed = pipeline.sim.committed_transactions();
    let destroyed: Vec<_> = committed[0]
        .entries
        .iter()
        .filter(|e| e.opcode == "destroy_object")
        .map(|e| e.object_id)
        .collect();
    assert_eq!(destroyed.len(), 6);
    assert_eq!(destroyed[0], rg);
    assert!(pipeline.sim.exists(vds[1]));
    assert!(!destroyed.contains(&vds[1]));
}

#[tokio::test]
async fn test_service_runs_jobs_in_submission_order() {
    let pipeline = Pipeline::new(SimulatedArray::demo());
    let service = pipeline.service();

    let mut numbers = Vec::new();
    for lun in 1..=3 {
        numbers.push(service.enqueue(lun_create(5, lun, 0x1000)).await.unwrap());
    }
    numbers.push(service.enqueue(destroy_rg(5)).await.unwrap());

    let mut finished = Vec::new();
    for number in &numbers {
        let record = service.wait_for(*number).await.unwrap();
        assert_eq!(record.state, JobActionState::Done);
        finished.push(record);
    }

    assert!(finished[..3].iter().all(|r| r.status == JobStatus::Ok));
    assert_eq!(finished[3].job_type, JobType::RaidGroupDestroy);
    assert_eq!(finished[3].error_code, JobErrorCode::RequestObjectHasUpstreamEdges);
    assert_eq!(pipeline.sim.transaction_starts(), numbers[..3].to_vec());
    assert_eq!(
        service.metrics().jobs_finished(JobType::LunCreate, JobStatus::Ok),
        3
    );
}
