//! Object arena: topology objects keyed by id with an explicit edge table

use crate::domain::{
    ClassId, DownstreamHealth, Edge, EdgeIndex, Lba, LifecycleState, ObjectId, PhysicalDriveInfo,
    PoolId, ProvisionDriveInfo, RaidGroupNumber, RaidType,
};
use crate::layout::FIRST_USER_OBJECT_ID;
use crate::transport::{ExtPoolLunObjectConfig, LunObjectConfig};
use std::collections::BTreeMap;

/// RAID group state held by the simulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaidGroupRecord {
    pub number: Option<RaidGroupNumber>,
    pub raid_type: RaidType,
    pub width: u32,
    pub exported_capacity: Lba,
    pub lun_align_size: Lba,
    pub rebuild_checkpoints: Vec<Lba>,
    pub health: DownstreamHealth,
    /// Mirror under a RAID10 striper
    pub mid_tier: bool,
    pub allow_pvd_reinit: bool,
    /// Mark-needs-rebuild requests answered busy before accepting
    pub nr_busy: u32,
    /// Mark-needs-rebuild requests answered "not accepted" before accepting
    pub nr_refusals: u32,
    pub marked_needs_rebuild: Vec<ObjectId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtPoolRecord {
    pub pool_id: PoolId,
    pub capacity: Lba,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalDriveRecord {
    pub info: PhysicalDriveInfo,
    pub fault_lit: bool,
}

/// Class-specific payload of an arena object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectKind {
    Lun(LunObjectConfig),
    ExtPoolLun(ExtPoolLunObjectConfig),
    ExtPool(ExtPoolRecord),
    RaidGroup(RaidGroupRecord),
    VirtualDrive { removal_override: Option<bool> },
    ProvisionDrive(ProvisionDriveInfo),
    PhysicalDrive(PhysicalDriveRecord),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayObject {
    pub id: ObjectId,
    pub class: ClassId,
    pub lifecycle: LifecycleState,
    pub kind: ObjectKind,
}

impl ArrayObject {
    pub fn raid_group(&self) -> Option<&RaidGroupRecord> {
        match &self.kind {
            ObjectKind::RaidGroup(rg) => Some(rg),
            _ => None,
        }
    }

    pub fn raid_group_mut(&mut self) -> Option<&mut RaidGroupRecord> {
        match &mut self.kind {
            ObjectKind::RaidGroup(rg) => Some(rg),
            _ => None,
        }
    }

    pub fn provision_drive(&self) -> Option<&ProvisionDriveInfo> {
        match &self.kind {
            ObjectKind::ProvisionDrive(info) => Some(info),
            _ => None,
        }
    }

    pub fn provision_drive_mut(&mut self) -> Option<&mut ProvisionDriveInfo> {
        match &mut self.kind {
            ObjectKind::ProvisionDrive(info) => Some(info),
            _ => None,
        }
    }

    pub fn physical_drive(&self) -> Option<&PhysicalDriveRecord> {
        match &self.kind {
            ObjectKind::PhysicalDrive(record) => Some(record),
            _ => None,
        }
    }

    /// Capacity this object exports to its clients, if it exports any
    pub fn exported_capacity(&self) -> Option<Lba> {
        match &self.kind {
            ObjectKind::RaidGroup(rg) => Some(rg.exported_capacity),
            ObjectKind::ExtPool(pool) => Some(pool.capacity),
            ObjectKind::ProvisionDrive(info) => Some(info.configured_capacity),
            ObjectKind::PhysicalDrive(record) => Some(record.info.gross_capacity),
            _ => None,
        }
    }
}

/// All objects and edges of the simulated array
#[derive(Debug, Clone, Default)]
pub struct ObjectArena {
    objects: BTreeMap<ObjectId, ArrayObject>,
    /// Keyed by (client, client index)
    edges: BTreeMap<(ObjectId, EdgeIndex), Edge>,
    next_user_id: u32,
}

impl ObjectArena {
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            edges: BTreeMap::new(),
            next_user_id: FIRST_USER_OBJECT_ID.0,
        }
    }

    pub fn allocate_id(&mut self) -> ObjectId {
        let id = ObjectId(self.next_user_id);
        self.next_user_id += 1;
        id
    }

    pub fn insert(&mut self, object: ArrayObject) {
        if object.id.0 >= self.next_user_id {
            self.next_user_id = object.id.0 + 1;
        }
        self.objects.insert(object.id, object);
    }

    pub fn get(&self, id: ObjectId) -> Option<&ArrayObject> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut ArrayObject> {
        self.objects.get_mut(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.objects.keys().copied()
    }

    pub fn objects(&self) -> impl Iterator<Item = &ArrayObject> {
        self.objects.values()
    }

    /// Remove an object with its downstream edges. Refused while any client
    /// still imports from it.
    pub fn remove(&mut self, id: ObjectId) -> Result<ArrayObject, String> {
        let upstream = self.upstream_edges(id).len();
        if upstream > 0 {
            return Err(format!("{} still has {} upstream edge(s)", id, upstream));
        }
        let object = self
            .objects
            .remove(&id)
            .ok_or_else(|| format!("{} does not exist", id))?;
        self.edges.retain(|(client, _), _| *client != id);
        Ok(object)
    }

    pub fn add_edge(&mut self, edge: Edge) -> Result<(), String> {
        if !self.contains(edge.server_id) {
            return Err(format!("server {} does not exist", edge.server_id));
        }
        if !self.contains(edge.client_id) {
            return Err(format!("client {} does not exist", edge.client_id));
        }
        let key = (edge.client_id, edge.client_index);
        if self.edges.contains_key(&key) {
            return Err(format!(
                "client {} already has an edge at index {}",
                edge.client_id, edge.client_index
            ));
        }
        self.edges.insert(key, edge);
        Ok(())
    }

    pub fn remove_edge(&mut self, client_id: ObjectId, client_index: EdgeIndex) -> Option<Edge> {
        self.edges.remove(&(client_id, client_index))
    }

    /// Edges whose server is `id`
    pub fn upstream_edges(&self, id: ObjectId) -> Vec<Edge> {
        self.edges
            .values()
            .filter(|e| e.server_id == id)
            .cloned()
            .collect()
    }

    /// Edges whose client is `id`, in client-index order
    pub fn downstream_edges(&self, id: ObjectId) -> Vec<Edge> {
        self.edges
            .range((id, 0)..=(id, EdgeIndex::MAX))
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn upstream_objects(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut clients: Vec<ObjectId> = self
            .upstream_edges(id)
            .into_iter()
            .map(|e| e.client_id)
            .collect();
        clients.dedup();
        clients
    }

    pub fn downstream_objects(&self, id: ObjectId) -> Vec<ObjectId> {
        self.downstream_edges(id)
            .into_iter()
            .map(|e| e.server_id)
            .collect()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EdgeFlags, PathState};

    fn vd(id: u32) -> ArrayObject {
        ArrayObject {
            id: ObjectId(id),
            class: ClassId::VirtualDrive,
            lifecycle: LifecycleState::Ready,
            kind: ObjectKind::VirtualDrive {
                removal_override: None,
            },
        }
    }

    fn edge(server: u32, client: u32, index: EdgeIndex) -> Edge {
        Edge {
            server_id: ObjectId(server),
            client_id: ObjectId(client),
            client_index: index,
            capacity: 0x100,
            offset: 0,
            flags: EdgeFlags::NONE,
            path_state: PathState::Enabled,
        }
    }

    #[test]
    fn test_remove_refused_with_upstream_edges() {
        let mut arena = ObjectArena::new();
        arena.insert(vd(0x100));
        arena.insert(vd(0x101));
        arena.add_edge(edge(0x100, 0x101, 0)).unwrap();

        assert!(arena.remove(ObjectId(0x100)).is_err());
        arena.remove(ObjectId(0x101)).unwrap();
        assert_eq!(arena.edge_count(), 0);
        arena.remove(ObjectId(0x100)).unwrap();
    }

    #[test]
    fn test_edge_queries() {
        let mut arena = ObjectArena::new();
        for id in 0x100..0x104 {
            arena.insert(vd(id));
        }
        arena.add_edge(edge(0x101, 0x100, 1)).unwrap();
        arena.add_edge(edge(0x102, 0x100, 0)).unwrap();
        arena.add_edge(edge(0x102, 0x103, 0)).unwrap();

        assert_eq!(
            arena.downstream_objects(ObjectId(0x100)),
            vec![ObjectId(0x102), ObjectId(0x101)]
        );
        assert_eq!(
            arena.upstream_objects(ObjectId(0x102)),
            vec![ObjectId(0x100), ObjectId(0x103)]
        );
        assert!(arena.add_edge(edge(0x101, 0x100, 1)).is_err());
    }

    #[test]
    fn test_allocate_skips_inserted_ids() {
        let mut arena = ObjectArena::new();
        arena.insert(vd(FIRST_USER_OBJECT_ID.0 + 4));
        assert_eq!(arena.allocate_id(), ObjectId(FIRST_USER_OBJECT_ID.0 + 5));
    }
}
