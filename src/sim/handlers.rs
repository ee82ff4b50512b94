//! Packet processing for the simulated array

use super::arena::{ArrayObject, ObjectKind};
use super::SimState;
use crate::domain::{
    CapacityPlacement, ClassId, DatabaseStats, Edge, LifecycleState, ObjectId, PathState, Placement,
    RaidGroupInfo, LBA_INVALID,
};
use crate::layout::PrivateSpaceLayout;
use crate::transport::{CapacityQuery, Packet, Payload, PvdConfigUpdate, Reply, Response, Target};
use tracing::trace;

impl SimState {
    pub(super) fn process(&mut self, packet: Packet) -> Reply {
        let opcode = packet.payload.opcode();
        *self.opcode_counts.entry(opcode).or_default() += 1;
        if let Some(reply) = self.injected_fault(opcode) {
            trace!(opcode, "Injected fault");
            return reply;
        }

        match packet.target {
            Target::Object(id) => self.process_object(id, packet.payload),
            _ => self.process_service(packet.payload),
        }
    }

    fn process_service(&mut self, payload: Payload) -> Reply {
        let opcode = payload.opcode();
        match payload {
            // -- transactions --
            Payload::TransactionStart { job_number } => match self.txns.start(job_number, &self.arena) {
                Ok(txn) => Reply::ok(Response::Transaction(txn)),
                Err(reason) => Reply::failed(reason),
            },
            Payload::TransactionCommit { txn } => match self.txns.commit(txn) {
                Ok(created) => {
                    if self.promote_on_commit {
                        for id in created {
                            if let Some(object) = self.arena.get_mut(id) {
                                if object.lifecycle == LifecycleState::Specialize {
                                    object.lifecycle = LifecycleState::Ready;
                                }
                            }
                        }
                    }
                    Reply::done()
                }
                Err(reason) => Reply::failed(reason),
            },
            Payload::TransactionAbort { txn } => match self.txns.abort(txn) {
                Ok(snapshot) => {
                    self.arena = snapshot;
                    Reply::done()
                }
                Err(reason) => Reply::failed(reason),
            },

            // -- transactional mutations --
            Payload::CreateLun { txn, config } => {
                if let Err(reason) = self.txns.check(txn) {
                    return Reply::failed(reason);
                }
                let id = config.object_id.unwrap_or_else(|| self.arena.allocate_id());
                if self.arena.contains(id) {
                    return Reply::failed(format!("{} already exists", id));
                }
                self.arena.insert(ArrayObject {
                    id,
                    class: ClassId::Lun,
                    lifecycle: LifecycleState::Specialize,
                    kind: ObjectKind::Lun(config),
                });
                self.txns.record_created(txn, id);
                self.txns.record(txn, opcode, id);
                Reply::ok(Response::Object(id))
            }
            Payload::CreateExtPoolLun { txn, config } => {
                if let Err(reason) = self.txns.check(txn) {
                    return Reply::failed(reason);
                }
                let id = self.arena.allocate_id();
                self.arena.insert(ArrayObject {
                    id,
                    class: ClassId::ExtentPoolLun,
                    lifecycle: LifecycleState::Specialize,
                    kind: ObjectKind::ExtPoolLun(config),
                });
                self.txns.record_created(txn, id);
                self.txns.record(txn, opcode, id);
                Reply::ok(Response::Object(id))
            }
            Payload::DestroyObject { txn, object_id } => {
                if let Err(reason) = self.txns.check(txn) {
                    return Reply::failed(reason);
                }
                match self.arena.remove(object_id) {
                    Ok(_) => {
                        self.txns.record(txn, opcode, object_id);
                        Reply::done()
                    }
                    Err(reason) => Reply::failed(reason),
                }
            }
            Payload::CreateEdge { txn, edge } => {
                if let Err(reason) = self.txns.check(txn) {
                    return Reply::failed(reason);
                }
                let client = edge.client_id;
                let edge = Edge {
                    server_id: edge.server_id,
                    client_id: edge.client_id,
                    client_index: edge.client_index,
                    capacity: edge.capacity,
                    offset: edge.offset,
                    flags: edge.flags,
                    path_state: PathState::Enabled,
                };
                match self.arena.add_edge(edge) {
                    Ok(()) => {
                        self.txns.record(txn, opcode, client);
                        Reply::done()
                    }
                    Err(reason) => Reply::failed(reason),
                }
            }
            Payload::DestroyEdge {
                txn,
                client_id,
                client_index,
            } => {
                if let Err(reason) = self.txns.check(txn) {
                    return Reply::failed(reason);
                }
                match self.arena.remove_edge(client_id, client_index) {
                    Some(_) => {
                        self.txns.record(txn, opcode, client_id);
                        Reply::done()
                    }
                    None => Reply::failed(format!(
                        "{} has no edge at index {}",
                        client_id, client_index
                    )),
                }
            }
            Payload::UpdateProvisionDrive {
                txn,
                object_id,
                update,
            } => {
                if let Err(reason) = self.txns.check(txn) {
                    return Reply::failed(reason);
                }
                match self.update_provision_drive(object_id, update) {
                    Ok(()) => {
                        self.txns.record(txn, opcode, object_id);
                        Reply::done()
                    }
                    Err(reason) => Reply::failed(reason),
                }
            }

            // -- lookups --
            Payload::LookupRaidGroup { number } => Reply::ok(Response::MaybeObject(
                self.find(|o| o.raid_group().and_then(|rg| rg.number) == Some(number)),
            )),
            Payload::LookupLun { number } => Reply::ok(Response::MaybeObject(self.find(|o| {
                matches!(&o.kind, ObjectKind::Lun(config) if config.lun_number == number)
            }))),
            Payload::LookupExtPool { pool_id } => Reply::ok(Response::MaybeObject(self.find(|o| {
                matches!(&o.kind, ObjectKind::ExtPool(pool) if pool.pool_id == pool_id)
            }))),
            Payload::LookupExtPoolLun { pool_id, lun_id } => {
                Reply::ok(Response::MaybeObject(self.find(|o| {
                    matches!(&o.kind, ObjectKind::ExtPoolLun(config)
                        if config.pool_id == pool_id && config.lun_id == lun_id)
                })))
            }
            Payload::LookupProvisionDriveBySerial { serial_number } => {
                Reply::ok(Response::MaybeObject(self.find(|o| {
                    o.provision_drive()
                        .map(|info| info.serial_number == serial_number)
                        .unwrap_or(false)
                })))
            }
            Payload::LookupRaidGroupNumber { object_id } => Reply::ok(Response::RaidGroupNumber(
                self.arena
                    .get(object_id)
                    .and_then(|o| o.raid_group())
                    .and_then(|rg| rg.number),
            )),
            Payload::GetDatabaseStats => {
                let layout = PrivateSpaceLayout::standard();
                let user_luns = self
                    .arena
                    .objects()
                    .filter(|o| match o.class {
                        ClassId::Lun => !layout.is_system_lun(o.id),
                        ClassId::ExtentPoolLun => true,
                        _ => false,
                    })
                    .count() as u32;
                Reply::ok(Response::Stats(DatabaseStats {
                    user_luns,
                    max_user_luns: self.max_user_luns,
                }))
            }
            Payload::GetEncryptionMode => Reply::ok(Response::Encryption(self.encryption_mode)),

            // -- drive binding and chassis records --
            Payload::ConnectDrives { object_ids } => {
                for pvd_id in object_ids {
                    self.connect_drive(pvd_id);
                }
                Reply::done()
            }
            Payload::GetFruDescriptor => Reply::ok(Response::Fru(self.fru.clone())),
            Payload::SetFruDescriptor { descriptor } => {
                self.fru = descriptor;
                Reply::done()
            }
            Payload::StampFruSignature { location } => {
                if !self.fru_signatures.contains(&location) {
                    self.fru_signatures.push(location);
                }
                Reply::done()
            }

            // -- physical --
            Payload::GetPhysicalDriveByLocation { location } => {
                Reply::ok(Response::MaybeObject(self.find(|o| {
                    o.physical_drive()
                        .map(|pdo| pdo.info.location == location)
                        .unwrap_or(false)
                })))
            }
            Payload::GetPhysicalDriveBySerial { serial_number } => {
                Reply::ok(Response::MaybeObject(self.find(|o| {
                    o.physical_drive()
                        .map(|pdo| pdo.info.serial_number == serial_number)
                        .unwrap_or(false)
                })))
            }
            Payload::LogEvent(entry) => {
                self.event_log.push(entry);
                Reply::done()
            }

            other => Reply::failed(format!("{} must target an object", other.opcode())),
        }
    }

    fn process_object(&mut self, id: ObjectId, payload: Payload) -> Reply {
        if !self.arena.contains(id) {
            return Reply::no_object();
        }

        match payload {
            Payload::GetClass => self.with_object(id, |o| Reply::ok(Response::Class(o.class))),
            Payload::GetLifecycleState => {
                self.with_object(id, |o| Reply::ok(Response::Lifecycle(o.lifecycle)))
            }
            Payload::GetUpstreamObjects => {
                Reply::ok(Response::Objects(self.arena.upstream_objects(id)))
            }
            Payload::GetDownstreamObjects => {
                Reply::ok(Response::Objects(self.arena.downstream_objects(id)))
            }
            Payload::GetUpstreamEdges => Reply::ok(Response::Edges(self.arena.upstream_edges(id))),
            Payload::GetDownstreamEdges => {
                Reply::ok(Response::Edges(self.arena.downstream_edges(id)))
            }
            Payload::ValidateCapacity(query) => match self.validate_capacity(id, query) {
                Ok(placement) => Reply::ok(Response::Placement(placement)),
                Err(reason) => Reply::failed(reason),
            },
            Payload::GetRaidGroupInfo => self.with_object(id, |o| match o.raid_group() {
                Some(rg) => Reply::ok(Response::RaidGroup(RaidGroupInfo {
                    raid_type: rg.raid_type,
                    width: rg.width,
                    exported_capacity: rg.exported_capacity,
                    lun_align_size: rg.lun_align_size,
                    rebuild_checkpoints: rg.rebuild_checkpoints.clone(),
                    raid_group_number: rg.number,
                })),
                None => Reply::failed(format!("{} is not a raid group", o.id)),
            }),
            Payload::GetDownstreamHealth => self.with_object(id, |o| match o.raid_group() {
                Some(rg) => Reply::ok(Response::Health(rg.health)),
                None => Reply::failed(format!("{} is not a raid group", o.id)),
            }),
            Payload::CanObjectBeRemoved { upstream_id } => {
                let shared = self
                    .arena
                    .upstream_edges(id)
                    .iter()
                    .any(|e| e.client_id != upstream_id);
                self.with_object(id, |o| match &o.kind {
                    ObjectKind::VirtualDrive {
                        removal_override: Some(answer),
                    } => Reply::ok(Response::Flag(*answer)),
                    _ => Reply::ok(Response::Flag(!shared)),
                })
            }
            Payload::CanPvdGetReinitialized { .. } => self.with_object(id, |o| match o.raid_group() {
                Some(rg) => Reply::ok(Response::Flag(rg.allow_pvd_reinit)),
                None => Reply::failed(format!("{} is not a raid group", o.id)),
            }),
            Payload::MarkNeedsRebuild { pvd_id, .. } => {
                let Some(rg) = self.arena.get_mut(id).and_then(|o| o.raid_group_mut()) else {
                    return Reply::failed(format!("{} is not a raid group", id));
                };
                if rg.nr_busy > 0 {
                    rg.nr_busy -= 1;
                    return Reply::busy();
                }
                if rg.nr_refusals > 0 {
                    rg.nr_refusals -= 1;
                    return Reply::ok(Response::Flag(false));
                }
                rg.marked_needs_rebuild.push(pvd_id);
                Reply::ok(Response::Flag(true))
            }
            Payload::GetDrivePositionByServer { server_id } => Reply::ok(Response::Position(
                self.arena
                    .downstream_edges(id)
                    .iter()
                    .find(|e| e.server_id == server_id)
                    .map(|e| e.client_index),
            )),
            Payload::GetProvisionDriveInfo => self.with_object(id, |o| match o.provision_drive() {
                Some(info) => Reply::ok(Response::ProvisionDrive(info.clone())),
                None => Reply::failed(format!("{} is not a provision drive", o.id)),
            }),
            Payload::GetPhysicalDriveInfo => self.with_object(id, |o| match o.physical_drive() {
                Some(pdo) => Reply::ok(Response::PhysicalDrive(pdo.info.clone())),
                None => Reply::failed(format!("{} is not a physical drive", o.id)),
            }),
            Payload::SetDriveFault => match self.arena.get_mut(id).map(|o| &mut o.kind) {
                Some(ObjectKind::PhysicalDrive(pdo)) => {
                    pdo.fault_lit = true;
                    Reply::done()
                }
                _ => Reply::failed(format!("{} is not a physical drive", id)),
            },
            other => Reply::failed(format!("{} cannot target an object", other.opcode())),
        }
    }

    fn with_object(&self, id: ObjectId, f: impl FnOnce(&ArrayObject) -> Reply) -> Reply {
        match self.arena.get(id) {
            Some(object) => f(object),
            None => Reply::no_object(),
        }
    }

    fn find(&self, pred: impl Fn(&ArrayObject) -> bool) -> Option<ObjectId> {
        self.arena.objects().find(|o| pred(o)).map(|o| o.id)
    }

    fn update_provision_drive(&mut self, id: ObjectId, update: PvdConfigUpdate) -> Result<(), String> {
        let rebinding = matches!(update, PvdConfigUpdate::Identity { .. });
        let info = self
            .arena
            .get_mut(id)
            .and_then(|o| o.provision_drive_mut())
            .ok_or_else(|| format!("{} is not a provision drive", id))?;

        match update {
            PvdConfigUpdate::ConfigType(config_type) => info.config_type = config_type,
            PvdConfigUpdate::SniffVerify(enabled) => info.sniff_verify = enabled,
            PvdConfigUpdate::PoolId(pool_id) => info.pool_id = pool_id,
            PvdConfigUpdate::SerialNumber(serial) => info.serial_number = serial,
            PvdConfigUpdate::BlockSize(block_size) => info.configured_block_size = block_size,
            PvdConfigUpdate::Identity {
                configured_capacity,
                configured_block_size,
                serial_number,
            } => {
                info.configured_capacity = configured_capacity;
                info.configured_block_size = configured_block_size;
                info.serial_number = serial_number;
                info.end_of_life = false;
                info.slf = false;
            }
        }

        if rebinding {
            // the old physical drive is gone; drop the stale binding
            for edge in self.arena.downstream_edges(id) {
                self.arena.remove_edge(edge.client_id, edge.client_index);
            }
            if let Some(object) = self.arena.get_mut(id) {
                object.lifecycle = LifecycleState::Activate;
            }
        }
        Ok(())
    }

    fn connect_drive(&mut self, pvd_id: ObjectId) {
        if !self.arena.downstream_edges(pvd_id).is_empty() {
            return;
        }
        let Some(serial) = self
            .arena
            .get(pvd_id)
            .and_then(|o| o.provision_drive())
            .map(|info| info.serial_number.clone())
        else {
            return;
        };
        let pdo = self.arena.objects().find_map(|o| {
            o.physical_drive()
                .filter(|pdo| pdo.info.serial_number == serial)
                .map(|pdo| (o.id, pdo.info.gross_capacity))
        });
        if let Some((pdo_id, capacity)) = pdo {
            let edge = Edge {
                server_id: pdo_id,
                client_id: pvd_id,
                client_index: 0,
                capacity,
                offset: 0,
                flags: Default::default(),
                path_state: PathState::Enabled,
            };
            if self.arena.add_edge(edge).is_ok() {
                if let Some(object) = self.arena.get_mut(pvd_id) {
                    object.lifecycle = LifecycleState::Ready;
                }
            }
        }
    }

    fn validate_capacity(&self, server: ObjectId, query: CapacityQuery) -> Result<CapacityPlacement, String> {
        let total = self
            .arena
            .get(server)
            .and_then(|o| o.exported_capacity())
            .ok_or_else(|| format!("{} exports no capacity", server))?;

        let mut used: Vec<(u64, u64)> = self
            .arena
            .upstream_edges(server)
            .iter()
            .map(|e| (e.offset, e.offset + e.capacity))
            .collect();
        used.sort_unstable();

        let mut gaps = Vec::new();
        let mut cursor = 0;
        for (start, end) in used {
            if start > cursor {
                gaps.push((cursor, start));
            }
            cursor = cursor.max(end);
        }
        if cursor < total {
            gaps.push((cursor, total));
        }

        let first_fit = query.placement == Placement::FirstFit || query.ignore_offset;
        if first_fit {
            let fit = gaps
                .iter()
                .find(|(start, end)| end - start >= query.requested_capacity);
            Ok(match fit {
                Some((start, end)) => CapacityPlacement {
                    offset: *start,
                    client_index: 0,
                    available_capacity: end - start,
                },
                None => CapacityPlacement {
                    offset: LBA_INVALID,
                    client_index: 0,
                    available_capacity: gaps.iter().map(|(s, e)| e - s).max().unwrap_or(0),
                },
            })
        } else {
            gaps.iter()
                .find(|(start, end)| *start <= query.offset && query.offset < *end)
                .map(|(_, end)| CapacityPlacement {
                    offset: query.offset,
                    client_index: 0,
                    available_capacity: end - query.offset,
                })
                .ok_or_else(|| format!("offset {:#x} of {} is not free", query.offset, server))
        }
    }
}
