use crate::collab::coordination::NodeAddress;
use crate::collab::sharding::{chunk_key, model_key, owns, project_key};
use crate::topology::{ModelId, ProjectId, ProjectTopology};
use arc_swap::ArcSwap;
use log::{error, info};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Point-in-time view of the cluster and of what this node serves.
///
/// Never mutated once built: [`StateManager`] publishes a new snapshot on every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    pub nodes: Vec<NodeAddress>,
    /// `None` when this node is not part of `nodes`, in which case it serves nothing.
    pub my_index: Option<usize>,
    pub version: String,
    pub topology: Arc<ProjectTopology>,
    pub projects_to_serve: BTreeSet<ProjectId>,
    pub models_to_serve: BTreeSet<String>,
    pub chunks_to_serve: BTreeSet<String>,
}

impl StateSnapshot {
    pub fn empty() -> Self {
        Self::compute(None, Vec::new(), String::new(), Arc::default())
    }

    pub fn compute(
        my_index: Option<usize>,
        nodes: Vec<NodeAddress>,
        version: String,
        topology: Arc<ProjectTopology>,
    ) -> Self {
        let mut projects_to_serve = BTreeSet::new();
        let mut models_to_serve = BTreeSet::new();
        let mut chunks_to_serve = BTreeSet::new();

        if let Some(my_index) = my_index {
            let node_count = nodes.len();

            for (project_id, models) in topology.iter() {
                if owns(&project_key(*project_id), my_index, node_count) {
                    projects_to_serve.insert(*project_id);
                }

                for (model_id, model) in models {
                    let key = model_key(*project_id, *model_id);
                    if owns(&key, my_index, node_count) {
                        models_to_serve.insert(key);
                    }

                    for chunk_id in &model.chunks {
                        let key = chunk_key(*project_id, *model_id, chunk_id);
                        if owns(&key, my_index, node_count) {
                            chunks_to_serve.insert(key);
                        }
                    }
                }
            }
        }

        Self {
            nodes,
            my_index,
            version,
            topology,
            projects_to_serve,
            models_to_serve,
            chunks_to_serve,
        }
    }

    pub fn serves_project(&self, project_id: ProjectId) -> bool {
        self.projects_to_serve.contains(&project_id)
    }

    pub fn serves_model(&self, project_id: ProjectId, model_id: ModelId) -> bool {
        self.models_to_serve
            .contains(&model_key(project_id, model_id))
    }

    pub fn serves_chunk(&self, project_id: ProjectId, model_id: ModelId, chunk_id: &str) -> bool {
        self.chunks_to_serve
            .contains(&chunk_key(project_id, model_id, chunk_id))
    }

    /// Chunks of the model this node is authoritative for, in topology order.
    pub fn owned_chunks(&self, project_id: ProjectId, model_id: ModelId) -> Vec<String> {
        self.topology
            .get(&project_id)
            .and_then(|models| models.get(&model_id))
            .map(|model| {
                model
                    .chunks
                    .iter()
                    .filter(|chunk_id| self.serves_chunk(project_id, model_id, chunk_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Position of `address` in the ordered node list.
pub fn calculate_my_index(address: &str, nodes: &[NodeAddress]) -> Option<usize> {
    nodes.iter().position(|node| node == address)
}

/// Owns the published [`StateSnapshot`] of one server.
pub struct StateManager {
    address: NodeAddress,
    snapshot: ArcSwap<StateSnapshot>,
}

impl StateManager {
    pub fn new(address: NodeAddress) -> Self {
        Self {
            address,
            snapshot: ArcSwap::from_pointee(StateSnapshot::empty()),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn snapshot(&self) -> Arc<StateSnapshot> {
        self.snapshot.load_full()
    }

    /// Recomputes ownership and atomically replaces the published snapshot.
    pub fn set_state(
        &self,
        nodes: Vec<NodeAddress>,
        version: String,
        topology: Arc<ProjectTopology>,
    ) -> Arc<StateSnapshot> {
        let my_index = calculate_my_index(&self.address, &nodes);
        if my_index.is_none() {
            error!(
                "{} is not in the registered node list {:?}, serving nothing",
                self.address, nodes
            );
        }

        let snapshot = Arc::new(StateSnapshot::compute(my_index, nodes, version, topology));

        info!(
            "Publishing state: index={:?}/{} version='{}' projects={} models={} chunks={}",
            snapshot.my_index,
            snapshot.nodes.len(),
            snapshot.version,
            snapshot.projects_to_serve.len(),
            snapshot.models_to_serve.len(),
            snapshot.chunks_to_serve.len()
        );

        self.snapshot.store(snapshot.clone());
        snapshot
    }

    pub fn set_nodes(&self, nodes: Vec<NodeAddress>) -> Arc<StateSnapshot> {
        let current = self.snapshot();
        self.set_state(nodes, current.version.clone(), current.topology.clone())
    }

    pub fn set_topology(&self, version: String, topology: ProjectTopology) -> Arc<StateSnapshot> {
        let current = self.snapshot();
        self.set_state(current.nodes.clone(), version, Arc::new(topology))
    }
}
