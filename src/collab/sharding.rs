use crate::topology::{ModelId, ProjectId};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

pub const ID_SEPARATOR: &str = ":";

/// 64-bit FNV-1a over the UTF-8 bytes of `key`.
pub fn hash64(key: &str) -> u64 {
    key.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
    })
}

/// Whether the node at `my_index` owns `key` in a cluster of `node_count` nodes.
///
/// Always `false` for an empty cluster.
pub fn owns(key: &str, my_index: usize, node_count: usize) -> bool {
    if node_count == 0 {
        return false;
    }

    let node_count = node_count as u64;
    hash64(key) % node_count == my_index as u64 % node_count
}

pub fn project_key(project_id: ProjectId) -> String {
    project_id.to_string()
}

pub fn model_key(project_id: ProjectId, model_id: ModelId) -> String {
    format!("{project_id}{ID_SEPARATOR}{model_id}")
}

pub fn chunk_key(project_id: ProjectId, model_id: ModelId, chunk_id: &str) -> String {
    format!("{}{ID_SEPARATOR}{chunk_id}", model_key(project_id, model_id))
}
