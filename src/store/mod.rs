//! Pattern store: bounded caches in front of tiered file storage.
//!
//! Reads try the local disk tier first. A file missing there is read from the cloud tier and
//! written back to disk so the next miss stays local. Projects being migrated are pinned to the
//! second cloud backend.

pub mod cache;
pub mod error;
pub mod files;
pub mod scanner;

use crate::pattern::{PatternWithMeta, UserAndEventsInfo};
use crate::store::cache::BoundedCache;
use crate::store::error::StoreError;
use crate::store::files::{
    FileManager, Storage, chunk_file_path_and_name, event_info_file_path_and_name,
};
use crate::store::scanner::{encode_lines, read_event_info, read_patterns_with_meta};
use crate::topology::{ChunkId, ModelId, ProjectId};
use log::{debug, error, info};
use std::collections::BTreeSet;
use std::sync::Arc;

pub type ChunkPatterns = Arc<Vec<PatternWithMeta>>;

/// Projects whose files are read from the second cloud backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectSelection {
    All,
    Only(BTreeSet<ProjectId>),
}

impl Default for ProjectSelection {
    fn default() -> Self {
        ProjectSelection::Only(BTreeSet::new())
    }
}

impl ProjectSelection {
    pub fn contains(&self, project_id: ProjectId) -> bool {
        match self {
            ProjectSelection::All => true,
            ProjectSelection::Only(ids) => ids.contains(&project_id),
        }
    }
}

impl std::fmt::Display for ProjectSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectSelection::All => write!(f, "all projects"),
            ProjectSelection::Only(ids) => write!(f, "{} projects", ids.len()),
        }
    }
}

impl FromIterator<ProjectId> for ProjectSelection {
    fn from_iter<I: IntoIterator<Item = ProjectId>>(iter: I) -> Self {
        ProjectSelection::Only(iter.into_iter().collect())
    }
}

/// Parses a comma separated project id list, ignoring blanks. `*` selects every project.
pub fn parse_project_ids(ids: &str) -> anyhow::Result<ProjectSelection> {
    if ids.trim() == "*" {
        return Ok(ProjectSelection::All);
    }

    ids.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse::<ProjectId>()
                .map_err(|e| anyhow::anyhow!("invalid project id '{id}': {e}"))
        })
        .collect()
}

/// Buckets behind the two cloud backends. Pinned projects only reach the v2 bucket when
/// `use_bucket_v2` is set, otherwise both backends read `bucket`.
pub fn cloud_bucket_names<'a>(
    bucket: &'a str,
    bucket_v2: &'a str,
    use_bucket_v2: bool,
) -> (&'a str, &'a str) {
    if use_bucket_v2 {
        (bucket, bucket_v2)
    } else {
        (bucket, bucket)
    }
}

pub struct PatternStore<F = Storage> {
    disk: Arc<F>,
    cloud: Arc<F>,
    cloud_v2: Arc<F>,
    project_ids_v2: ProjectSelection,
    chunks: BoundedCache<(ProjectId, ModelId, ChunkId), ChunkPatterns>,
    event_infos: BoundedCache<(ProjectId, ModelId), Arc<UserAndEventsInfo>>,
}

impl<F> PatternStore<F>
where
    F: FileManager + Send + Sync + 'static,
{
    pub fn new(
        chunk_cache_size: usize,
        event_info_cache_size: usize,
        disk: F,
        cloud: F,
        cloud_v2: F,
        project_ids_v2: ProjectSelection,
    ) -> Self {
        info!(
            "Pattern store: chunk cache {}, event info cache {}, {} pinned to v2",
            chunk_cache_size, event_info_cache_size, project_ids_v2
        );

        Self {
            disk: Arc::new(disk),
            cloud: Arc::new(cloud),
            cloud_v2: Arc::new(cloud_v2),
            project_ids_v2,
            chunks: BoundedCache::new("chunk", chunk_cache_size),
            event_infos: BoundedCache::new("event info", event_info_cache_size),
        }
    }

    fn cloud_manager(&self, project_id: ProjectId) -> Arc<F> {
        if self.project_ids_v2.contains(project_id) {
            self.cloud_v2.clone()
        } else {
            self.cloud.clone()
        }
    }

    /// Parsed lines of one chunk, in file order.
    pub async fn get_patterns_with_meta(
        &self,
        project_id: ProjectId,
        model_id: ModelId,
        chunk_id: &str,
    ) -> Result<ChunkPatterns, StoreError> {
        let disk = self.disk.clone();
        let cloud = self.cloud_manager(project_id);
        let (path, name) = chunk_file_path_and_name(project_id, model_id, chunk_id);

        self.chunks
            .get_or_load((project_id, model_id, chunk_id.to_string()), async move {
                let patterns = match disk.get(&path, &name).await {
                    Ok(reader) => read_patterns_with_meta(reader).await?,
                    Err(e) if e.is_not_found() => {
                        debug!("{path}/{name} not on disk, reading from cloud");
                        let reader = cloud.get(&path, &name).await?;
                        let patterns = read_patterns_with_meta(reader).await?;

                        match encode_lines(&patterns) {
                            Ok(content) => write_back(&*disk, &path, &name, content).await,
                            Err(e) => error!("Failed to encode {path}/{name} for disk: {e}"),
                        }

                        patterns
                    }
                    Err(e) => return Err(e),
                };

                Ok::<_, StoreError>(Arc::new(patterns))
            })
            .await
    }

    /// Property summary of one model.
    pub async fn get_model_event_info(
        &self,
        project_id: ProjectId,
        model_id: ModelId,
    ) -> Result<Arc<UserAndEventsInfo>, StoreError> {
        let disk = self.disk.clone();
        let cloud = self.cloud_manager(project_id);
        let (path, name) = event_info_file_path_and_name(project_id, model_id);

        self.event_infos
            .get_or_load((project_id, model_id), async move {
                let event_info = match disk.get(&path, &name).await {
                    Ok(reader) => read_event_info(reader).await?,
                    Err(e) if e.is_not_found() => {
                        debug!("{path}/{name} not on disk, reading from cloud");
                        let event_info = read_event_info(cloud.get(&path, &name).await?).await?;

                        match serde_json::to_vec(&event_info) {
                            Ok(content) => write_back(&*disk, &path, &name, content).await,
                            Err(e) => error!("Failed to encode {path}/{name} for disk: {e}"),
                        }

                        event_info
                    }
                    Err(e) => return Err(e),
                };

                Ok::<_, StoreError>(Arc::new(event_info))
            })
            .await
    }

    /// Files the disk tier holds for a project.
    pub async fn disk_files(&self, project_id: ProjectId) -> Result<Vec<String>, StoreError> {
        self.disk.list(&format!("projects/{project_id}/")).await
    }

    pub fn cached_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn cached_event_infos(&self) -> usize {
        self.event_infos.len()
    }
}

async fn write_back<F: FileManager>(disk: &F, path: &str, name: &str, content: Vec<u8>) {
    if let Err(e) = disk.create(path, name, content).await {
        error!("Failed to write {path}/{name} back to disk: {e}");
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::store::files::{DiskStore, FileReader, temp_dir};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Disk backed file manager that counts reads.
    #[derive(Clone)]
    pub struct CountingStore {
        pub inner: DiskStore,
        gets: Arc<AtomicUsize>,
    }

    impl CountingStore {
        pub fn new() -> Self {
            Self {
                inner: DiskStore::new(temp_dir()),
                gets: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn gets(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
        }

        pub async fn put_chunk(
            &self,
            project_id: ProjectId,
            model_id: ModelId,
            chunk_id: &str,
            lines: &[&str],
        ) {
            let (path, name) = chunk_file_path_and_name(project_id, model_id, chunk_id);
            let content = lines.iter().map(|line| format!("{line}\n")).collect::<String>();
            self.inner
                .create(&path, &name, content.into_bytes())
                .await
                .expect("failed to write chunk");
        }

        pub async fn put_event_info(
            &self,
            project_id: ProjectId,
            model_id: ModelId,
            content: &str,
        ) {
            let (path, name) = event_info_file_path_and_name(project_id, model_id);
            self.inner
                .create(&path, &name, content.as_bytes().to_vec())
                .await
                .expect("failed to write event info");
        }
    }

    impl FileManager for CountingStore {
        async fn get(&self, path: &str, name: &str) -> Result<FileReader, StoreError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(path, name).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
            self.inner.list(prefix).await
        }

        async fn create(&self, path: &str, name: &str, content: Vec<u8>) -> Result<(), StoreError> {
            self.inner.create(path, name, content).await
        }
    }

    pub struct TestStore {
        pub disk: CountingStore,
        pub cloud: CountingStore,
        pub cloud_v2: CountingStore,
        pub store: PatternStore<CountingStore>,
    }

    pub fn test_store(chunk_cache_size: usize, project_ids_v2: &[ProjectId]) -> TestStore {
        let disk = CountingStore::new();
        let cloud = CountingStore::new();
        let cloud_v2 = CountingStore::new();

        let store = PatternStore::new(
            chunk_cache_size,
            10,
            disk.clone(),
            cloud.clone(),
            cloud_v2.clone(),
            project_ids_v2.iter().copied().collect(),
        );

        TestStore {
            disk,
            cloud,
            cloud_v2,
            store,
        }
    }
}
