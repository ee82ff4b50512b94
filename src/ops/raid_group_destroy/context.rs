//! Per-request state of a RAID group destroy

use crate::domain::{ObjectId, RaidType, TransactionId};
use indexmap::IndexMap;

/// A virtual drive under the RAID group and the verdict on removing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDriveCandidate {
    /// Object the drive feeds inside this RAID group: the group itself or a
    /// RAID10 mirror
    pub parent: ObjectId,
    pub destroy: bool,
    pub provision_drives: Vec<ObjectId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaidGroupDestroyContext {
    pub raid_group: ObjectId,
    pub raid_type: RaidType,
    /// RAID10 mid-tier mirrors in striper position order
    pub mirrors: Vec<ObjectId>,
    pub virtual_drives: IndexMap<ObjectId, VirtualDriveCandidate>,
    pub transaction: Option<TransactionId>,
    /// Objects the job will destroy, for notification tracking
    pub total_objects: usize,
}

impl RaidGroupDestroyContext {
    pub fn new(raid_group: ObjectId, raid_type: RaidType) -> Self {
        Self {
            raid_group,
            raid_type,
            mirrors: Vec::new(),
            virtual_drives: IndexMap::new(),
            transaction: None,
            total_objects: 1,
        }
    }

    pub fn add_virtual_drive(&mut self, vd: ObjectId, candidate: VirtualDriveCandidate) {
        self.virtual_drives.insert(vd, candidate);
        self.total_objects = self.destroy_list().len();
    }

    pub fn add_mirror(&mut self, mirror: ObjectId) {
        self.mirrors.push(mirror);
        self.total_objects = self.destroy_list().len();
    }

    /// Virtual drives whose parent agreed to their removal
    pub fn flagged(&self) -> impl Iterator<Item = (&ObjectId, &VirtualDriveCandidate)> {
        self.virtual_drives.iter().filter(|(_, c)| c.destroy)
    }

    /// Virtual drives still consumed elsewhere
    pub fn retained(&self) -> impl Iterator<Item = (&ObjectId, &VirtualDriveCandidate)> {
        self.virtual_drives.iter().filter(|(_, c)| !c.destroy)
    }

    /// Every object to destroy, in destroy order: the group, its mirrors,
    /// then the flagged virtual drives
    pub fn destroy_list(&self) -> Vec<ObjectId> {
        std::iter::once(self.raid_group)
            .chain(self.mirrors.iter().copied())
            .chain(self.flagged().map(|(vd, _)| *vd))
            .collect()
    }
}
