//! Simulated array
//!
//! An in-process stand-in for the array's database, topology and physical
//! services. It answers packets from the transport, keeps a single open
//! transaction with an undo snapshot, promotes created objects to Ready on
//! commit and lets tests inject faults per opcode.

pub mod arena;
pub mod builder;
pub mod database;
mod handlers;

pub use arena::{ArrayObject, ObjectArena, ObjectKind, RaidGroupRecord};
pub use builder::{PvdSpec, RaidGroupTopology, SIM_DRIVE_CAPACITY};
pub use database::{CommittedTransaction, JournalEntry, TransactionLog};

use crate::domain::{
    DownstreamHealth, DriveLocation, EncryptionMode, JobNumber, Lba, LifecycleState, ObjectId,
    TransactionId,
};
use crate::transport::{EventLogEntry, FruDescriptor, Packet, PacketHandler, Reply};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaultKind {
    Fail,
    Busy,
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    kind: FaultKind,
    remaining: u32,
}

pub(crate) struct SimState {
    arena: ObjectArena,
    txns: TransactionLog,
    fru: FruDescriptor,
    fru_signatures: Vec<DriveLocation>,
    event_log: Vec<EventLogEntry>,
    encryption_mode: EncryptionMode,
    max_user_luns: u32,
    promote_on_commit: bool,
    faults: HashMap<&'static str, Fault>,
    opcode_counts: HashMap<&'static str, usize>,
}

impl SimState {
    fn injected_fault(&mut self, opcode: &str) -> Option<Reply> {
        let fault = self.faults.get_mut(opcode)?;
        if fault.remaining == 0 {
            return None;
        }
        fault.remaining -= 1;
        Some(match fault.kind {
            FaultKind::Fail => Reply::failed(format!("injected failure of {}", opcode)),
            FaultKind::Busy => Reply::busy(),
        })
    }
}

/// In-process array answering graph packets
pub struct SimulatedArray {
    state: Mutex<SimState>,
    latency: Duration,
}

impl Default for SimulatedArray {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedArray {
    /// Empty array: no objects, no system drives
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                arena: ObjectArena::new(),
                txns: TransactionLog::default(),
                fru: FruDescriptor::default(),
                fru_signatures: Vec::new(),
                event_log: Vec::new(),
                encryption_mode: EncryptionMode::Unencrypted,
                max_user_luns: 1000,
                promote_on_commit: true,
                faults: HashMap::new(),
                opcode_counts: HashMap::new(),
            }),
            latency: Duration::ZERO,
        }
    }

    /// Delay every reply by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    // =========================================================================
    // Knobs
    // =========================================================================

    pub fn set_max_user_luns(&self, max: u32) {
        self.state.lock().max_user_luns = max;
    }

    pub fn set_encryption_mode(&self, mode: EncryptionMode) {
        self.state.lock().encryption_mode = mode;
    }

    /// Whether objects created in a transaction become Ready on commit
    pub fn set_promote_on_commit(&self, promote: bool) {
        self.state.lock().promote_on_commit = promote;
    }

    pub fn set_lifecycle(&self, id: ObjectId, lifecycle: LifecycleState) {
        if let Some(object) = self.state.lock().arena.get_mut(id) {
            object.lifecycle = lifecycle;
        }
    }

    pub fn set_health(&self, rg: ObjectId, health: DownstreamHealth) {
        self.with_raid_group(rg, |record| record.health = health);
    }

    pub fn set_rebuild_checkpoints(&self, rg: ObjectId, checkpoints: Vec<Lba>) {
        self.with_raid_group(rg, |record| record.rebuild_checkpoints = checkpoints);
    }

    pub fn set_allow_pvd_reinit(&self, rg: ObjectId, allow: bool) {
        self.with_raid_group(rg, |record| record.allow_pvd_reinit = allow);
    }

    /// Answer the next `busy` mark-needs-rebuild requests with Busy and the
    /// following `refusals` with "not accepted"
    pub fn set_needs_rebuild_refusals(&self, rg: ObjectId, busy: u32, refusals: u32) {
        self.with_raid_group(rg, |record| {
            record.nr_busy = busy;
            record.nr_refusals = refusals;
        });
    }

    pub fn set_end_of_life(&self, pvd: ObjectId, end_of_life: bool) {
        if let Some(info) = self
            .state
            .lock()
            .arena
            .get_mut(pvd)
            .and_then(|o| o.provision_drive_mut())
        {
            info.end_of_life = end_of_life;
        }
    }

    /// Force the answer of a virtual drive's removal-safety check
    pub fn set_removal_override(&self, vd: ObjectId, answer: Option<bool>) {
        if let Some(object) = self.state.lock().arena.get_mut(vd) {
            if let ObjectKind::VirtualDrive { removal_override } = &mut object.kind {
                *removal_override = answer;
            }
        }
    }

    /// Fail the next `times` requests with this opcode
    pub fn fail_next(&self, opcode: &'static str, times: u32) {
        self.state.lock().faults.insert(
            opcode,
            Fault {
                kind: FaultKind::Fail,
                remaining: times,
            },
        );
    }

    /// Answer the next `times` requests with this opcode with Busy
    pub fn busy_next(&self, opcode: &'static str, times: u32) {
        self.state.lock().faults.insert(
            opcode,
            Fault {
                kind: FaultKind::Busy,
                remaining: times,
            },
        );
    }

    fn with_raid_group(&self, rg: ObjectId, f: impl FnOnce(&mut RaidGroupRecord)) {
        if let Some(record) = self
            .state
            .lock()
            .arena
            .get_mut(rg)
            .and_then(|o| o.raid_group_mut())
        {
            f(record);
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn object(&self, id: ObjectId) -> Option<ArrayObject> {
        self.state.lock().arena.get(id).cloned()
    }

    pub fn exists(&self, id: ObjectId) -> bool {
        self.state.lock().arena.contains(id)
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().arena.ids().count()
    }

    pub fn upstream_objects(&self, id: ObjectId) -> Vec<ObjectId> {
        self.state.lock().arena.upstream_objects(id)
    }

    pub fn downstream_objects(&self, id: ObjectId) -> Vec<ObjectId> {
        self.state.lock().arena.downstream_objects(id)
    }

    pub fn upstream_edge_count(&self, id: ObjectId) -> usize {
        self.state.lock().arena.upstream_edges(id).len()
    }

    /// Job numbers that started a transaction, in order
    pub fn transaction_starts(&self) -> Vec<JobNumber> {
        self.state.lock().txns.starts().to_vec()
    }

    pub fn committed_transactions(&self) -> Vec<CommittedTransaction> {
        self.state.lock().txns.committed().to_vec()
    }

    pub fn aborted_transactions(&self) -> Vec<TransactionId> {
        self.state.lock().txns.aborted().to_vec()
    }

    pub fn transaction_open(&self) -> bool {
        self.state.lock().txns.is_open()
    }

    pub fn opcode_count(&self, opcode: &str) -> usize {
        self.state
            .lock()
            .opcode_counts
            .get(opcode)
            .copied()
            .unwrap_or(0)
    }

    pub fn event_log(&self) -> Vec<EventLogEntry> {
        self.state.lock().event_log.clone()
    }

    pub fn fru_descriptor(&self) -> FruDescriptor {
        self.state.lock().fru.clone()
    }

    pub fn fru_signatures(&self) -> Vec<DriveLocation> {
        self.state.lock().fru_signatures.clone()
    }

    pub fn fault_lit(&self, pdo: ObjectId) -> bool {
        self.state
            .lock()
            .arena
            .get(pdo)
            .and_then(|o| o.physical_drive())
            .map(|record| record.fault_lit)
            .unwrap_or(false)
    }

    pub fn needs_rebuild_marks(&self, rg: ObjectId) -> Vec<ObjectId> {
        self.state
            .lock()
            .arena
            .get(rg)
            .and_then(|o| o.raid_group())
            .map(|record| record.marked_needs_rebuild.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PacketHandler for SimulatedArray {
    async fn handle(&self, packet: Packet) -> Reply {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.state.lock().process(packet)
    }
}
