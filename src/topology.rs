//! Per-project model/chunk topology.
//!
//! The source of truth is the `project_model_metadata` table written by the offline mining
//! jobs. It is consumed read-only: by the state manager to derive chunk ownership and by the RPC
//! handlers to resolve a project's latest model.

use crate::database::{Database, preparer::CachedPreparedStatement};
use anyhow::{Result, anyhow};
use itertools::Itertools;
use log::error;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use utoipa::ToSchema;

pub type ProjectId = u64;
pub type ModelId = u64;
pub type ChunkId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ModelData {
    pub model_type: String,
    pub chunks: Vec<ChunkId>,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
}

pub type ModelChunkMapping = BTreeMap<ModelId, ModelData>;

pub type ProjectTopology = BTreeMap<ProjectId, ModelChunkMapping>;

/// One row of the metadata source. `chunks` is a comma separated list of chunk ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectModelMetadata {
    pub project_id: ProjectId,
    pub model_id: ModelId,
    pub model_type: String,
    pub start_time: i64,
    pub end_time: i64,
    pub chunks: String,
}

/// Interval covered by a model, as returned to RPC callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ModelInfo {
    #[serde(rename = "mid")]
    pub model_id: ModelId,
    #[serde(rename = "mt")]
    pub model_type: String,
    #[serde(rename = "st")]
    pub start_timestamp: i64,
    #[serde(rename = "et")]
    pub end_timestamp: i64,
}

fn split_chunks(chunks: &str) -> Vec<ChunkId> {
    chunks
        .split(',')
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn make_project_model_chunk_lookup(metadata: &[ProjectModelMetadata]) -> ProjectTopology {
    let mut lookup = ProjectTopology::new();

    for row in metadata {
        lookup.entry(row.project_id).or_default().insert(
            row.model_id,
            ModelData {
                model_type: row.model_type.clone(),
                chunks: split_chunks(&row.chunks),
                start_timestamp: row.start_time,
                end_timestamp: row.end_time,
            },
        );
    }

    lookup
}

/// Latest model is the one with the greatest end timestamp, ties broken by the greatest id.
pub fn latest_model(models: &ModelChunkMapping) -> Option<ModelInfo> {
    models
        .iter()
        .max_by_key(|(model_id, data)| (data.end_timestamp, **model_id))
        .map(|(model_id, data)| model_info(*model_id, data))
}

pub fn model_info(model_id: ModelId, data: &ModelData) -> ModelInfo {
    ModelInfo {
        model_id,
        model_type: data.model_type.clone(),
        start_timestamp: data.start_timestamp,
        end_timestamp: data.end_timestamp,
    }
}

pub trait TopologySource {
    fn project_model_metadata(
        &self,
    ) -> impl Future<Output = Result<Vec<ProjectModelMetadata>>> + Send;

    fn latest_model_interval(
        &self,
        project_id: ProjectId,
    ) -> impl Future<Output = Result<ModelInfo>> + Send;
}

static ALL_METADATA_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    SELECT project_id,
           model_id,
           model_type,
           start_time,
           end_time,
           chunks
    FROM project_model_metadata
    ",
);

static PROJECT_METADATA_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    SELECT project_id,
           model_id,
           model_type,
           start_time,
           end_time,
           chunks
    FROM project_model_metadata
    WHERE project_id = ?
    ",
);

type MetadataRow = (i64, i64, String, i64, i64, Option<String>);

/// Project ids are stored as `bigint`.
fn project_key(project_id: ProjectId) -> Result<i64> {
    i64::try_from(project_id).map_err(|_| anyhow!("project id {project_id} out of range"))
}

fn parse_metadata_row(row: MetadataRow) -> Result<ProjectModelMetadata> {
    let (project_id, model_id, model_type, start_time, end_time, chunks) = row;

    Ok(ProjectModelMetadata {
        project_id: u64::try_from(project_id)
            .map_err(|_| anyhow!("negative project id {project_id}"))?,
        model_id: u64::try_from(model_id).map_err(|_| anyhow!("negative model id {model_id}"))?,
        model_type,
        start_time,
        end_time,
        chunks: chunks.unwrap_or_default(),
    })
}

fn collect_metadata_rows(
    rows: impl Iterator<Item = Result<ProjectModelMetadata>>,
) -> Vec<ProjectModelMetadata> {
    let (metadata, errors): (Vec<_>, Vec<_>) = rows.partition_result();

    if !errors.is_empty() {
        error!(
            "Failed to parse [{}] model metadata rows. First 3 errors: {}",
            errors.len(),
            errors
                .iter()
                .take(3)
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    metadata
}

pub struct ScyllaTopology {
    session: Arc<Database>,
}

impl ScyllaTopology {
    pub async fn new(session: Arc<Database>) -> Result<Self> {
        ALL_METADATA_QUERY.optimistically_prepare(&session).await?;
        PROJECT_METADATA_QUERY
            .optimistically_prepare(&session)
            .await?;

        Ok(Self { session })
    }
}

impl TopologySource for ScyllaTopology {
    async fn project_model_metadata(&self) -> Result<Vec<ProjectModelMetadata>> {
        // Spans every project, so it is read page by page
        let rows: Vec<MetadataRow> = ALL_METADATA_QUERY.query_all(&self.session, ()).await?;

        Ok(collect_metadata_rows(rows.into_iter().map(parse_metadata_row)))
    }

    async fn latest_model_interval(&self, project_id: ProjectId) -> Result<ModelInfo> {
        let rows = PROJECT_METADATA_QUERY
            .execute_unpaged(&self.session, (project_key(project_id)?,))
            .await?
            .into_rows_result()?;

        let parsed = rows
            .rows::<MetadataRow>()?
            .map(|row| parse_metadata_row(row?));

        let lookup = make_project_model_chunk_lookup(&collect_metadata_rows(parsed));

        lookup
            .get(&project_id)
            .and_then(latest_model)
            .ok_or_else(|| anyhow!("no model found for project {project_id}"))
    }
}

/// Topology held in memory, used in development and tests.
#[derive(Default)]
pub struct InMemoryTopology {
    metadata: RwLock<Vec<ProjectModelMetadata>>,
}

impl InMemoryTopology {
    pub fn new(metadata: Vec<ProjectModelMetadata>) -> Self {
        Self {
            metadata: RwLock::new(metadata),
        }
    }

    pub fn replace(&self, metadata: Vec<ProjectModelMetadata>) {
        *self.metadata.write() = metadata;
    }
}

impl TopologySource for InMemoryTopology {
    async fn project_model_metadata(&self) -> Result<Vec<ProjectModelMetadata>> {
        Ok(self.metadata.read().clone())
    }

    async fn latest_model_interval(&self, project_id: ProjectId) -> Result<ModelInfo> {
        let lookup = make_project_model_chunk_lookup(&self.metadata.read());

        lookup
            .get(&project_id)
            .and_then(latest_model)
            .ok_or_else(|| anyhow!("no model found for project {project_id}"))
    }
}

/// Runtime selection of the metadata backend.
pub enum Topology {
    Scylla(ScyllaTopology),
    InMemory(InMemoryTopology),
}

impl TopologySource for Topology {
    async fn project_model_metadata(&self) -> Result<Vec<ProjectModelMetadata>> {
        match self {
            Topology::Scylla(t) => t.project_model_metadata().await,
            Topology::InMemory(t) => t.project_model_metadata().await,
        }
    }

    async fn latest_model_interval(&self, project_id: ProjectId) -> Result<ModelInfo> {
        match self {
            Topology::Scylla(t) => t.latest_model_interval(project_id).await,
            Topology::InMemory(t) => t.latest_model_interval(project_id).await,
        }
    }
}

impl ProjectModelMetadata {
    #[cfg(test)]
    pub fn example(project_id: ProjectId, model_id: ModelId, chunks: &str) -> Self {
        Self {
            project_id,
            model_id,
            model_type: "m".to_string(),
            start_time: 1_600_000_000,
            end_time: 1_600_000_000 + model_id as i64,
            chunks: chunks.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::create_test_database;

    #[test]
    fn test_make_project_model_chunk_lookup() {
        let metadata = vec![
            ProjectModelMetadata::example(1, 10, "1,2,3"),
            ProjectModelMetadata::example(1, 11, "1"),
            ProjectModelMetadata::example(2, 10, ""),
        ];

        let lookup = make_project_model_chunk_lookup(&metadata);

        assert_eq!(lookup.len(), 2);
        assert_eq!(lookup[&1].len(), 2);
        assert_eq!(lookup[&1][&10].chunks, vec!["1", "2", "3"]);
        assert_eq!(lookup[&1][&11].chunks, vec!["1"]);
        assert!(lookup[&2][&10].chunks.is_empty());
    }

    #[test]
    fn test_project_key_rejects_out_of_range_ids() {
        assert_eq!(project_key(42).unwrap(), 42);
        assert_eq!(project_key(i64::MAX as u64).unwrap(), i64::MAX);
        assert!(project_key(u64::MAX).is_err());
    }

    #[test]
    fn test_split_chunks_ignores_blanks() {
        assert_eq!(split_chunks(" 1, 2,,3 ,"), vec!["1", "2", "3"]);
        assert!(split_chunks("").is_empty());
    }

    #[test]
    fn test_latest_model_prefers_end_timestamp() {
        let mut older = ProjectModelMetadata::example(1, 50, "1");
        older.end_time = 100;
        let mut newer = ProjectModelMetadata::example(1, 20, "1");
        newer.end_time = 200;

        let lookup = make_project_model_chunk_lookup(&[older, newer]);
        let latest = latest_model(&lookup[&1]).unwrap();

        assert_eq!(latest.model_id, 20);
        assert_eq!(latest.end_timestamp, 200);
    }

    #[tokio::test]
    async fn test_in_memory_latest_model_interval() -> Result<()> {
        let topology = InMemoryTopology::new(vec![
            ProjectModelMetadata::example(1, 10, "1"),
            ProjectModelMetadata::example(1, 12, "1"),
        ]);

        assert_eq!(topology.latest_model_interval(1).await?.model_id, 12);
        assert!(topology.latest_model_interval(2).await.is_err());

        topology.replace(vec![ProjectModelMetadata::example(2, 3, "1")]);
        assert_eq!(topology.latest_model_interval(2).await?.model_id, 3);
        assert!(topology.latest_model_interval(1).await.is_err());

        Ok(())
    }

    #[test]
    fn test_model_info_wire_names() {
        let info = ModelInfo {
            model_id: 1,
            model_type: "w".to_string(),
            start_timestamp: 2,
            end_timestamp: 3,
        };

        assert_eq!(
            serde_json::to_value(&info).unwrap(),
            serde_json::json!({"mid": 1, "mt": "w", "st": 2, "et": 3})
        );
    }

    const FIXTURES: &str = "
        INSERT INTO project_model_metadata (project_id, model_id, model_type, start_time, end_time, chunks)
        VALUES (1, 10, 'w', 100, 200, '1,2');
        INSERT INTO project_model_metadata (project_id, model_id, model_type, start_time, end_time, chunks)
        VALUES (1, 11, 'w', 200, 300, '1,2,3');
        INSERT INTO project_model_metadata (project_id, model_id, model_type, start_time, end_time, chunks)
        VALUES (2, 10, 'm', 100, 400, '1');
    ";

    #[tokio::test]
    #[ignore = "requires a running Scylla cluster"]
    async fn test_scylla_topology() -> Result<()> {
        let (session, _) = create_test_database(Some(FIXTURES)).await?;
        let topology = ScyllaTopology::new(Arc::new(session)).await?;

        let metadata = topology.project_model_metadata().await?;
        assert_eq!(metadata.len(), 3);

        let latest = topology.latest_model_interval(1).await?;
        assert_eq!(latest.model_id, 11);
        assert_eq!(latest.start_timestamp, 200);

        assert!(topology.latest_model_interval(3).await.is_err());

        Ok(())
    }
}
