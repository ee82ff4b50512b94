//! Provision drive jobs: drive replacement and configuration updates

mod common;

use common::{fast_config, Pipeline};
use storage_job_orchestrator::domain::{
    DriveLocation, DriveType, EncryptionMode, JobCommand, JobStatus, KeyState, Lba, ObjectId,
    ProvisionDriveReinitRequest, PvdConfigType, PvdUpdate, RaidGroupNumber,
    UpdateProvisionDriveRequest,
};
use storage_job_orchestrator::layout::DEFAULT_PVD_EXPORTED_OFFSET;
use storage_job_orchestrator::sim::{PvdSpec, SIM_DRIVE_CAPACITY};
use storage_job_orchestrator::{JobErrorCode, SimulatedArray};

fn reinit(object_id: ObjectId, serial: &str) -> JobCommand {
    JobCommand::ProvisionDriveReinitialize(ProvisionDriveReinitRequest {
        object_id,
        serial_number: serial.into(),
        configured_capacity: SIM_DRIVE_CAPACITY - DEFAULT_PVD_EXPORTED_OFFSET,
        configured_block_size: 520,
    })
}

/// Pull the drive under USR-0001 and return its provision drive
async fn pull_user_drive(pipeline: &Pipeline) -> ObjectId {
    let pvd = pipeline
        .graph
        .lookup_pvd_by_serial("USR-0001")
        .await
        .unwrap()
        .unwrap();
    let old_pdo = pipeline.sim.downstream_objects(pvd)[0];
    pipeline.sim.remove_physical_drive(old_pdo);
    pvd
}

fn insert_drive(pipeline: &Pipeline, serial: &str) -> ObjectId {
    pipeline.sim.add_physical_drive(
        DriveLocation::new(0, 1, 1),
        serial,
        DriveType::Sas,
        SIM_DRIVE_CAPACITY,
    )
}

#[tokio::test]
async fn test_stale_drive_and_identity_share_one_transaction() {
    let pipeline = Pipeline::with_config(SimulatedArray::demo(), fast_config());
    let pvd = pull_user_drive(&pipeline).await;
    let stale = pipeline
        .sim
        .add_provision_drive(PvdSpec::new(DriveLocation::new(0, 1, 12), "NEW-0101"));
    let pdo = insert_drive(&pipeline, "NEW-0101");

    let done = pipeline.run(reinit(pvd, "NEW-0101")).await;
    assert_eq!(done.status, JobStatus::Ok, "{:?}", done.failure);
    assert!(!pipeline.sim.exists(stale));

    assert_eq!(pipeline.sim.transaction_starts(), vec![done.job_number]);
    let committed = pipeline.sim.committed_transactions();
    assert_eq!(committed.len(), 1);
    let txn = &committed[0];
    assert!(txn
        .entries
        .iter()
        .any(|e| e.opcode == "destroy_object" && e.object_id == stale));
    assert!(txn
        .entries
        .iter()
        .any(|e| e.opcode == "update_provision_drive" && e.object_id == pvd));
    assert!(txn.entries.iter().all(|e| e.txn == txn.id));

    let info = pipeline.graph.provision_drive_info(pvd).await.unwrap();
    assert_eq!(info.serial_number, "NEW-0101");
    assert_eq!(pipeline.sim.downstream_objects(pvd), vec![pdo]);
    assert_eq!(pipeline.notifier.len(), 1);
}

#[tokio::test]
async fn test_encrypted_user_drive_swaps_keys_for_its_raid_group() {
    let sim = SimulatedArray::demo();
    sim.set_encryption_mode(EncryptionMode::Encrypted);
    let pipeline = Pipeline::with_config(sim, fast_config());
    let pvd = pull_user_drive(&pipeline).await;
    insert_drive(&pipeline, "NEW-0101");

    let done = pipeline.run(reinit(pvd, "NEW-0101")).await;
    assert_eq!(done.status, JobStatus::Ok, "{:?}", done.failure);

    let rg = pipeline.graph.lookup_raid_group(RaidGroupNumber(5)).await.unwrap();
    let requests = pipeline.notifier.key_requests();
    let states: Vec<_> = requests.iter().map(|r| r.state).collect();
    assert_eq!(
        states,
        vec![KeyState::OldKeyNeedsRemoval, KeyState::NewKeyRequired]
    );
    for request in &requests {
        assert_eq!(request.raid_group_id, rg);
        assert_eq!(request.control_number, Some(RaidGroupNumber(5)));
        assert_eq!(request.position, 1);
    }
    assert_eq!(pipeline.sim.needs_rebuild_marks(rg), vec![pvd]);
}

#[tokio::test]
async fn test_wrong_drive_type_fails_swap_validation() {
    let pipeline = Pipeline::with_config(SimulatedArray::demo(), fast_config());
    let pvd = pull_user_drive(&pipeline).await;
    let pdo = pipeline.sim.add_physical_drive(
        DriveLocation::new(0, 1, 1),
        "NEW-0101",
        DriveType::SasNl,
        SIM_DRIVE_CAPACITY,
    );

    let done = pipeline.run(reinit(pvd, "NEW-0101")).await;
    assert_eq!(done.error_code, JobErrorCode::SwapValidationFail);
    assert!(pipeline.sim.transaction_starts().is_empty());
    assert!(pipeline.sim.fault_lit(pdo));

    let info = pipeline.graph.provision_drive_info(pvd).await.unwrap();
    assert_eq!(info.serial_number, "USR-0001");
}

#[tokio::test]
async fn test_config_updates_through_the_service() {
    let pipeline = Pipeline::new(SimulatedArray::demo());
    let service = pipeline.service();
    let free = pipeline
        .graph
        .lookup_pvd_by_serial("USR-0008")
        .await
        .unwrap()
        .unwrap();
    let consumed = pipeline
        .graph
        .lookup_pvd_by_serial("USR-0000")
        .await
        .unwrap()
        .unwrap();

    let update = |object_id, config_type| {
        JobCommand::UpdateProvisionDrive(UpdateProvisionDriveRequest {
            object_id,
            update: PvdUpdate::ConfigType(config_type),
        })
    };

    let to_spare = service.enqueue(update(free, PvdConfigType::TestReservedSpare)).await.unwrap();
    let again = service.enqueue(update(free, PvdConfigType::TestReservedSpare)).await.unwrap();
    let in_use = service.enqueue(update(consumed, PvdConfigType::Unconsumed)).await.unwrap();

    let record = service.wait_for(to_spare).await.unwrap();
    assert_eq!(record.status, JobStatus::Ok);
    assert_eq!(record.object_id, free);

    let record = service.wait_for(again).await.unwrap();
    assert_eq!(record.error_code, JobErrorCode::PvdIsConfiguredAsSpare);

    let record = service.wait_for(in_use).await.unwrap();
    assert_eq!(record.error_code, JobErrorCode::PvdIsInUseForRaidGroup);

    let info = pipeline.graph.provision_drive_info(free).await.unwrap();
    assert_eq!(info.config_type, PvdConfigType::TestReservedSpare);
    assert_eq!(pipeline.sim.committed_transactions().len(), 1);
    assert_eq!(pipeline.notifier.len(), 3);
}

#[tokio::test]
async fn test_capacity_request_is_clamped_to_the_new_drive() {
    let pipeline = Pipeline::with_config(SimulatedArray::demo(), fast_config());
    let pvd = pull_user_drive(&pipeline).await;
    insert_drive(&pipeline, "NEW-0101");

    let requested: Lba = SIM_DRIVE_CAPACITY * 2;
    let done = pipeline
        .run(JobCommand::ProvisionDriveReinitialize(ProvisionDriveReinitRequest {
            object_id: pvd,
            serial_number: "NEW-0101".into(),
            configured_capacity: requested,
            configured_block_size: 520,
        }))
        .await;
    assert_eq!(done.status, JobStatus::Ok, "{:?}", done.failure);

    let info = pipeline.graph.provision_drive_info(pvd).await.unwrap();
    assert_eq!(
        info.configured_capacity,
        SIM_DRIVE_CAPACITY - DEFAULT_PVD_EXPORTED_OFFSET
    );
}

#[tokio::test]
async fn test_system_drive_serial_is_never_stale() {
    let pipeline = Pipeline::with_config(SimulatedArray::demo(), fast_config());
    let system_pvd = pipeline
        .graph
        .lookup_pvd_by_serial("SYS-0002")
        .await
        .unwrap()
        .unwrap();
    let consumers = pipeline.sim.upstream_objects(system_pvd);
    assert_eq!(consumers.len(), 2);

    let pvd = pull_user_drive(&pipeline).await;
    insert_drive(&pipeline, "SYS-0002");

    let done = pipeline.run(reinit(pvd, "SYS-0002")).await;
    assert_eq!(done.status, JobStatus::Ok, "{:?}", done.failure);

    assert!(pipeline.sim.exists(system_pvd));
    assert_eq!(pipeline.sim.upstream_objects(system_pvd), consumers);
    let committed = pipeline.sim.committed_transactions();
    assert!(committed[0]
        .entries
        .iter()
        .all(|e| e.opcode != "destroy_object" && e.opcode != "destroy_edge"));
}
