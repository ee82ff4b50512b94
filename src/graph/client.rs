//! Typed graph query and mutation client
//!
//! Wraps the packet transport with one method per request kind, translating
//! reply statuses into [`Error`] values.

use crate::domain::{
    CapacityPlacement, ClassId, DatabaseStats, DownstreamHealth, DriveLocation, Edge, EdgeIndex,
    EncryptionMode, JobNumber, LifecycleState, LunNumber, ObjectId, PhysicalDriveInfo, PoolId,
    ProvisionDriveInfo, RaidGroupInfo, RaidGroupNumber, TransactionId,
};
use crate::error::{Error, Result};
use crate::transport::{
    CapacityQuery, EdgeSpec, EventLogEntry, ExtPoolLunObjectConfig, FruDescriptor,
    GraphTransportRef, LunObjectConfig, PacketStatus, Payload, PvdConfigUpdate, Response, Target,
};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Client for the array's database, topology and physical services
#[derive(Clone)]
pub struct GraphClient {
    transport: GraphTransportRef,
}

fn unexpected(opcode: &str, response: Response) -> Error {
    Error::UnexpectedResponse {
        opcode: opcode.to_string(),
        response: format!("{:?}", response),
    }
}

impl GraphClient {
    pub fn new(transport: GraphTransportRef) -> Self {
        Self { transport }
    }

    /// Requests sent but not yet answered
    pub fn in_flight(&self) -> usize {
        self.transport.in_flight()
    }

    async fn call(&self, target: Target, payload: Payload) -> Result<Response> {
        let opcode = payload.opcode();
        let reply = self.transport.request(target, payload).await?;
        match reply.status {
            PacketStatus::Ok => Ok(reply.response),
            PacketStatus::NoObject => match target {
                Target::Object(id) => Err(Error::NoSuchObject(id)),
                _ => Err(Error::RequestFailed {
                    opcode: opcode.to_string(),
                    reason: "no such object".into(),
                }),
            },
            PacketStatus::Busy => Err(Error::Busy {
                opcode: opcode.to_string(),
            }),
            PacketStatus::Failed(reason) => Err(Error::RequestFailed {
                opcode: opcode.to_string(),
                reason,
            }),
        }
    }

    async fn call_done(&self, target: Target, payload: Payload) -> Result<()> {
        let opcode = payload.opcode();
        match self.call(target, payload).await? {
            Response::Done => Ok(()),
            other => Err(unexpected(opcode, other)),
        }
    }

    async fn call_flag(&self, target: Target, payload: Payload) -> Result<bool> {
        let opcode = payload.opcode();
        match self.call(target, payload).await? {
            Response::Flag(flag) => Ok(flag),
            other => Err(unexpected(opcode, other)),
        }
    }

    async fn call_maybe_object(&self, payload: Payload) -> Result<Option<ObjectId>> {
        let opcode = payload.opcode();
        match self.call(Target::Database, payload).await? {
            Response::MaybeObject(id) => Ok(id),
            other => Err(unexpected(opcode, other)),
        }
    }

    async fn call_objects(&self, id: ObjectId, payload: Payload) -> Result<Vec<ObjectId>> {
        let opcode = payload.opcode();
        match self.call(Target::Object(id), payload).await? {
            Response::Objects(ids) => Ok(ids),
            other => Err(unexpected(opcode, other)),
        }
    }

    async fn call_edges(&self, id: ObjectId, payload: Payload) -> Result<Vec<Edge>> {
        let opcode = payload.opcode();
        match self.call(Target::Object(id), payload).await? {
            Response::Edges(edges) => Ok(edges),
            other => Err(unexpected(opcode, other)),
        }
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    pub async fn start_transaction(&self, job_number: JobNumber) -> Result<TransactionId> {
        let payload = Payload::TransactionStart { job_number };
        let opcode = payload.opcode();
        match self.call(Target::Database, payload).await? {
            Response::Transaction(txn) => Ok(txn),
            other => Err(unexpected(opcode, other)),
        }
    }

    pub async fn commit_transaction(&self, txn: TransactionId) -> Result<()> {
        self.call_done(Target::Database, Payload::TransactionCommit { txn })
            .await
    }

    pub async fn abort_transaction(&self, txn: TransactionId) -> Result<()> {
        self.call_done(Target::Database, Payload::TransactionAbort { txn })
            .await
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Resolve a RAID group number; unknown numbers fail with `UnknownNumber`
    pub async fn lookup_raid_group(&self, number: RaidGroupNumber) -> Result<ObjectId> {
        self.call_maybe_object(Payload::LookupRaidGroup { number })
            .await?
            .ok_or(Error::UnknownNumber {
                kind: "raid group",
                number: number.0 as u64,
            })
    }

    /// Object bound to a LUN number, if any
    pub async fn lookup_lun(&self, number: LunNumber) -> Result<Option<ObjectId>> {
        self.call_maybe_object(Payload::LookupLun { number }).await
    }

    pub async fn lookup_ext_pool(&self, pool_id: PoolId) -> Result<ObjectId> {
        self.call_maybe_object(Payload::LookupExtPool { pool_id })
            .await?
            .ok_or(Error::UnknownNumber {
                kind: "extent pool",
                number: pool_id.0 as u64,
            })
    }

    pub async fn lookup_ext_pool_lun(&self, pool_id: PoolId, lun_id: u32) -> Result<Option<ObjectId>> {
        self.call_maybe_object(Payload::LookupExtPoolLun { pool_id, lun_id })
            .await
    }

    pub async fn lookup_pvd_by_serial(&self, serial_number: &str) -> Result<Option<ObjectId>> {
        self.call_maybe_object(Payload::LookupProvisionDriveBySerial {
            serial_number: serial_number.to_string(),
        })
        .await
    }

    /// Control number of a RAID group object (user or system)
    pub async fn raid_group_number(&self, object_id: ObjectId) -> Result<Option<RaidGroupNumber>> {
        let payload = Payload::LookupRaidGroupNumber { object_id };
        let opcode = payload.opcode();
        match self.call(Target::Database, payload).await? {
            Response::RaidGroupNumber(number) => Ok(number),
            other => Err(unexpected(opcode, other)),
        }
    }

    pub async fn database_stats(&self) -> Result<DatabaseStats> {
        let payload = Payload::GetDatabaseStats;
        let opcode = payload.opcode();
        match self.call(Target::Database, payload).await? {
            Response::Stats(stats) => Ok(stats),
            other => Err(unexpected(opcode, other)),
        }
    }

    pub async fn encryption_mode(&self) -> Result<EncryptionMode> {
        let payload = Payload::GetEncryptionMode;
        let opcode = payload.opcode();
        match self.call(Target::Database, payload).await? {
            Response::Encryption(mode) => Ok(mode),
            other => Err(unexpected(opcode, other)),
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    pub async fn create_lun(&self, txn: TransactionId, config: LunObjectConfig) -> Result<ObjectId> {
        let payload = Payload::CreateLun { txn, config };
        let opcode = payload.opcode();
        match self.call(Target::Database, payload).await? {
            Response::Object(id) => Ok(id),
            other => Err(unexpected(opcode, other)),
        }
    }

    pub async fn create_ext_pool_lun(
        &self,
        txn: TransactionId,
        config: ExtPoolLunObjectConfig,
    ) -> Result<ObjectId> {
        let payload = Payload::CreateExtPoolLun { txn, config };
        let opcode = payload.opcode();
        match self.call(Target::Database, payload).await? {
            Response::Object(id) => Ok(id),
            other => Err(unexpected(opcode, other)),
        }
    }

    pub async fn destroy_object(&self, txn: TransactionId, object_id: ObjectId) -> Result<()> {
        debug!(%txn, %object_id, "Destroying object");
        self.call_done(Target::Database, Payload::DestroyObject { txn, object_id })
            .await
    }

    pub async fn create_edge(&self, txn: TransactionId, edge: EdgeSpec) -> Result<()> {
        debug!(
            %txn,
            server = %edge.server_id,
            client = %edge.client_id,
            index = edge.client_index,
            "Creating edge"
        );
        self.call_done(Target::Database, Payload::CreateEdge { txn, edge })
            .await
    }

    pub async fn destroy_edge(
        &self,
        txn: TransactionId,
        client_id: ObjectId,
        client_index: EdgeIndex,
    ) -> Result<()> {
        self.call_done(
            Target::Database,
            Payload::DestroyEdge {
                txn,
                client_id,
                client_index,
            },
        )
        .await
    }

    pub async fn update_provision_drive(
        &self,
        txn: TransactionId,
        object_id: ObjectId,
        update: PvdConfigUpdate,
    ) -> Result<()> {
        self.call_done(
            Target::Database,
            Payload::UpdateProvisionDrive {
                txn,
                object_id,
                update,
            },
        )
        .await
    }

    /// Ask the database to attach provision drives to their physical drives
    pub async fn connect_drives(&self, object_ids: Vec<ObjectId>) -> Result<()> {
        self.call_done(Target::Database, Payload::ConnectDrives { object_ids })
            .await
    }

    pub async fn fru_descriptor(&self) -> Result<FruDescriptor> {
        let payload = Payload::GetFruDescriptor;
        let opcode = payload.opcode();
        match self.call(Target::Database, payload).await? {
            Response::Fru(descriptor) => Ok(descriptor),
            other => Err(unexpected(opcode, other)),
        }
    }

    pub async fn set_fru_descriptor(&self, descriptor: FruDescriptor) -> Result<()> {
        self.call_done(Target::Database, Payload::SetFruDescriptor { descriptor })
            .await
    }

    pub async fn stamp_fru_signature(&self, location: DriveLocation) -> Result<()> {
        self.call_done(Target::Database, Payload::StampFruSignature { location })
            .await
    }

    // =========================================================================
    // Topology Queries
    // =========================================================================

    pub async fn class_of(&self, id: ObjectId) -> Result<ClassId> {
        let payload = Payload::GetClass;
        let opcode = payload.opcode();
        match self.call(Target::Object(id), payload).await? {
            Response::Class(class) => Ok(class),
            other => Err(unexpected(opcode, other)),
        }
    }

    /// Lifecycle of a live object; a missing object reads as `NotExist`
    pub async fn lifecycle_state(&self, id: ObjectId) -> Result<LifecycleState> {
        let payload = Payload::GetLifecycleState;
        let opcode = payload.opcode();
        match self.call(Target::Object(id), payload).await {
            Ok(Response::Lifecycle(state)) => Ok(state),
            Ok(other) => Err(unexpected(opcode, other)),
            Err(Error::NoSuchObject(_)) => Ok(LifecycleState::NotExist),
            Err(err) => Err(err),
        }
    }

    pub async fn upstream_objects(&self, id: ObjectId) -> Result<Vec<ObjectId>> {
        self.call_objects(id, Payload::GetUpstreamObjects).await
    }

    pub async fn downstream_objects(&self, id: ObjectId) -> Result<Vec<ObjectId>> {
        self.call_objects(id, Payload::GetDownstreamObjects).await
    }

    pub async fn upstream_edges(&self, id: ObjectId) -> Result<Vec<Edge>> {
        self.call_edges(id, Payload::GetUpstreamEdges).await
    }

    pub async fn downstream_edges(&self, id: ObjectId) -> Result<Vec<Edge>> {
        self.call_edges(id, Payload::GetDownstreamEdges).await
    }

    pub async fn validate_capacity(
        &self,
        server_id: ObjectId,
        query: CapacityQuery,
    ) -> Result<CapacityPlacement> {
        let payload = Payload::ValidateCapacity(query);
        let opcode = payload.opcode();
        match self.call(Target::Object(server_id), payload).await? {
            Response::Placement(placement) => Ok(placement),
            other => Err(unexpected(opcode, other)),
        }
    }

    pub async fn raid_group_info(&self, id: ObjectId) -> Result<RaidGroupInfo> {
        let payload = Payload::GetRaidGroupInfo;
        let opcode = payload.opcode();
        match self.call(Target::Object(id), payload).await? {
            Response::RaidGroup(info) => Ok(info),
            other => Err(unexpected(opcode, other)),
        }
    }

    pub async fn downstream_health(&self, id: ObjectId) -> Result<DownstreamHealth> {
        let payload = Payload::GetDownstreamHealth;
        let opcode = payload.opcode();
        match self.call(Target::Object(id), payload).await? {
            Response::Health(health) => Ok(health),
            other => Err(unexpected(opcode, other)),
        }
    }

    /// Whether `id` can go away once `upstream_id` no longer consumes it
    pub async fn can_object_be_removed(&self, id: ObjectId, upstream_id: ObjectId) -> Result<bool> {
        self.call_flag(Target::Object(id), Payload::CanObjectBeRemoved { upstream_id })
            .await
    }

    pub async fn can_pvd_get_reinitialized(&self, rg_id: ObjectId, pvd_id: ObjectId) -> Result<bool> {
        self.call_flag(Target::Object(rg_id), Payload::CanPvdGetReinitialized { pvd_id })
            .await
    }

    /// Returns the RAID group's acceptance of the request
    pub async fn mark_needs_rebuild(
        &self,
        rg_id: ObjectId,
        vd_id: Option<ObjectId>,
        pvd_id: ObjectId,
    ) -> Result<bool> {
        self.call_flag(Target::Object(rg_id), Payload::MarkNeedsRebuild { vd_id, pvd_id })
            .await
    }

    pub async fn drive_position_by_server(
        &self,
        rg_id: ObjectId,
        server_id: ObjectId,
    ) -> Result<Option<EdgeIndex>> {
        let payload = Payload::GetDrivePositionByServer { server_id };
        let opcode = payload.opcode();
        match self.call(Target::Object(rg_id), payload).await? {
            Response::Position(position) => Ok(position),
            other => Err(unexpected(opcode, other)),
        }
    }

    pub async fn provision_drive_info(&self, pvd_id: ObjectId) -> Result<ProvisionDriveInfo> {
        let payload = Payload::GetProvisionDriveInfo;
        let opcode = payload.opcode();
        match self.call(Target::Object(pvd_id), payload).await? {
            Response::ProvisionDrive(info) => Ok(info),
            other => Err(unexpected(opcode, other)),
        }
    }

    // =========================================================================
    // Physical Drives & Event Log
    // =========================================================================

    pub async fn physical_drive_by_location(&self, location: DriveLocation) -> Result<Option<ObjectId>> {
        let payload = Payload::GetPhysicalDriveByLocation { location };
        let opcode = payload.opcode();
        match self.call(Target::Physical, payload).await? {
            Response::MaybeObject(id) => Ok(id),
            other => Err(unexpected(opcode, other)),
        }
    }

    pub async fn physical_drive_by_serial(&self, serial_number: &str) -> Result<Option<ObjectId>> {
        let payload = Payload::GetPhysicalDriveBySerial {
            serial_number: serial_number.to_string(),
        };
        let opcode = payload.opcode();
        match self.call(Target::Physical, payload).await? {
            Response::MaybeObject(id) => Ok(id),
            other => Err(unexpected(opcode, other)),
        }
    }

    pub async fn physical_drive_info(&self, pdo_id: ObjectId) -> Result<PhysicalDriveInfo> {
        let payload = Payload::GetPhysicalDriveInfo;
        let opcode = payload.opcode();
        match self.call(Target::Object(pdo_id), payload).await? {
            Response::PhysicalDrive(info) => Ok(info),
            other => Err(unexpected(opcode, other)),
        }
    }

    pub async fn set_drive_fault(&self, pdo_id: ObjectId) -> Result<()> {
        self.call_done(Target::Object(pdo_id), Payload::SetDriveFault)
            .await
    }

    pub async fn log_event(&self, entry: EventLogEntry) -> Result<()> {
        self.call_done(Target::EventLog, Payload::LogEvent(entry)).await
    }

    // =========================================================================
    // Lifecycle Waits
    // =========================================================================

    /// Poll until the object reaches `expected` or `timeout` elapses
    pub async fn wait_for_lifecycle(
        &self,
        id: ObjectId,
        expected: LifecycleState,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<()> {
        self.wait_for_any_lifecycle(id, &[expected], timeout, poll_interval)
            .await
            .map(|_| ())
            .map_err(|err| match err {
                Error::WaitTimeout { after, .. } => Error::LifecycleTimeout {
                    object_id: id,
                    expected,
                    after,
                },
                other => other,
            })
    }

    /// Poll until the object reaches one of `accepted`; returns the state seen
    pub async fn wait_for_any_lifecycle(
        &self,
        id: ObjectId,
        accepted: &[LifecycleState],
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<LifecycleState> {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.lifecycle_state(id).await?;
            if accepted.contains(&state) {
                return Ok(state);
            }
            if Instant::now() >= deadline {
                return Err(Error::WaitTimeout {
                    what: format!("{} lifecycle in {:?} (last {})", id, accepted, state),
                    after: timeout,
                });
            }
            trace!(object_id = %id, %state, "Waiting for lifecycle change");
            tokio::time::sleep(poll_interval).await;
        }
    }
}
