#![allow(dead_code)]
use neo_mesh::accelerator::{
    BlockRange, DeviceReducePolicy, DeviceRuntime, ExecutionPolicy, HostStream, KernelGrid,
    MemoryAdvice, MemoryRegion, RunQueueEvent, RunQueueStream, TimerEvent,
};
use neo_mesh::prelude::*;
use parking_lot::Mutex;

pub const CELL_FAMILY: &str = "CellFamily";
pub const FACE_FAMILY: &str = "FaceFamily";
pub const NODE_FAMILY: &str = "NodeFamily";

pub fn r3(x: f64, y: f64, z: f64) -> Real3 {
    Real3::new(x, y, z)
}

pub fn lids(raw: &[i32]) -> Vec<Lid> {
    raw.iter().copied().map(Lid::new).collect()
}

/// Families and ranges of the reference mesh: 4 quads, 12 nodes, 10 faces.
pub struct EvolutiveMesh {
    pub mesh: Mesh,
    pub cells: FamilyId,
    pub nodes: FamilyId,
    pub faces: FamilyId,
    pub new_cells: ItemRange,
    pub new_nodes: ItemRange,
    pub new_faces: ItemRange,
}

pub fn node_coords() -> Vec<Real3> {
    let row = [
        r3(0., 0., -2.),
        r3(0., 2., -2.),
        r3(0., 2., -2.),
        r3(0., 3., -2.),
        r3(0., 4., -2.),
        r3(0., 5., -2.),
    ];
    row.iter().chain(row.iter()).copied().collect()
}

pub const CELL_NODES: [i64; 16] = [0, 1, 7, 6, 2, 3, 9, 8, 3, 4, 10, 9, 4, 5, 11, 10];
pub const FACE_NODES: [i64; 20] = [6, 7, 8, 9, 9, 10, 10, 11, 1, 7, 2, 8, 0, 1, 2, 3, 3, 4, 4, 5];

pub fn create_mesh() -> EvolutiveMesh {
    let mut mesh = Mesh::new("evolutive_neo_mesh");
    let cells = mesh.add_family(ItemKind::Cell, CELL_FAMILY).unwrap();
    let nodes = mesh.add_family(ItemKind::Node, NODE_FAMILY).unwrap();
    let faces = mesh.add_family(ItemKind::Face, FACE_FAMILY).unwrap();

    let added_cells = mesh.schedule_add_items(cells, 0i64..4);
    let added_nodes = mesh.schedule_add_items(nodes, 0i64..12);
    let added_faces = mesh.schedule_add_items(faces, 0i64..10);
    mesh.schedule_set_item_coords(nodes, &added_nodes, node_coords());
    mesh.schedule_add_connectivity(cells, &added_cells, nodes, 4, CELL_NODES, "cell_to_nodes");
    mesh.schedule_add_connectivity(faces, &added_faces, nodes, 2, FACE_NODES, "face_to_nodes");
    let state = mesh.apply_scheduled_operations().unwrap();

    EvolutiveMesh {
        new_cells: added_cells.get(&state),
        new_nodes: added_nodes.get(&state),
        new_faces: added_faces.get(&state),
        mesh,
        cells,
        nodes,
        faces,
    }
}

/// Host-emulated device: runs blocks in order on the calling thread and
/// records every memory advice it receives.
pub struct FakeDevice {
    pub policy: ExecutionPolicy,
    pub reduce_policy: DeviceReducePolicy,
    pub advice: Mutex<Vec<(MemoryRegion, MemoryAdvice)>>,
    pub launches: Mutex<Vec<KernelGrid>>,
}

impl FakeDevice {
    pub fn new(policy: ExecutionPolicy) -> Self {
        Self {
            policy,
            reduce_policy: DeviceReducePolicy::Grid,
            advice: Mutex::new(Vec::new()),
            launches: Mutex::new(Vec::new()),
        }
    }
}

impl DeviceRuntime for FakeDevice {
    fn policy(&self) -> ExecutionPolicy {
        self.policy
    }

    fn create_stream(&self) -> Box<dyn RunQueueStream> {
        Box::new(HostStream)
    }

    fn create_event(&self) -> Box<dyn RunQueueEvent> {
        Box::new(TimerEvent::default())
    }

    fn launch(
        &self,
        _stream: &dyn RunQueueStream,
        grid: KernelGrid,
        kernel: &(dyn Fn(BlockRange) + Sync),
    ) {
        self.launches.lock().push(grid);
        // Reverse block order: completion order must not matter.
        for b in (0..grid.nb_block).rev() {
            kernel(grid.block(b));
        }
    }

    fn set_memory_advice(&self, region: MemoryRegion, advice: MemoryAdvice) {
        self.advice.lock().push((region, advice));
    }

    fn reduce_policy(&self) -> DeviceReducePolicy {
        self.reduce_policy
    }
}
