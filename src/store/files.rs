//! File storage backends for chunk and event info files.

use crate::store::error::StoreError;
use crate::topology::{ModelId, ProjectId};
use log::debug;
use serde::Deserialize;
use futures::TryStreamExt;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::{AsyncBufRead, AsyncWriteExt, BufReader};
use tokio_util::io::StreamReader;
use url::Url;
use uuid::Uuid;

pub type FileReader = Box<dyn AsyncBufRead + Send + Unpin>;

pub fn chunk_file_path_and_name(
    project_id: ProjectId,
    model_id: ModelId,
    chunk_id: &str,
) -> (String, String) {
    (
        format!("projects/{project_id}/models/{model_id}/chunks"),
        format!("chunk_{chunk_id}.txt"),
    )
}

pub fn event_info_file_path_and_name(project_id: ProjectId, model_id: ModelId) -> (String, String) {
    (
        format!("projects/{project_id}/models/{model_id}"),
        format!("event_info_{model_id}.txt"),
    )
}

fn object_name(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", path.trim_end_matches('/'), name)
    }
}

pub trait FileManager {
    /// Opens `path/name` for streaming. A missing file is [`StoreError::NotFound`].
    fn get(
        &self,
        path: &str,
        name: &str,
    ) -> impl Future<Output = Result<FileReader, StoreError>> + Send;

    /// Every file below `prefix`, as `path/name` relative to the backend root, sorted.
    fn list(&self, prefix: &str) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    fn create(
        &self,
        path: &str,
        name: &str,
        content: Vec<u8>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Files under a local directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    base_dir: PathBuf,
}

impl DiskStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }
}

impl FileManager for DiskStore {
    async fn get(&self, path: &str, name: &str) -> Result<FileReader, StoreError> {
        let full_path = self.base_dir.join(path).join(name);

        match fs::File::open(&full_path).await {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(
                full_path.to_string_lossy().into_owned(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut files = Vec::new();
        let mut pending = vec![prefix.trim_end_matches('/').to_string()];

        while let Some(relative) = pending.pop() {
            let mut entries = match fs::read_dir(self.base_dir.join(&relative)).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let child = object_name(&relative, &name);

                if entry.file_type().await?.is_dir() {
                    pending.push(child);
                } else {
                    files.push(child);
                }
            }
        }

        files.sort();
        Ok(files)
    }

    async fn create(&self, path: &str, name: &str, content: Vec<u8>) -> Result<(), StoreError> {
        let dir = self.base_dir.join(path);
        fs::create_dir_all(&dir).await?;

        // Readers never see a partially written file
        let tmp_path = dir.join(format!(".{name}.{}", Uuid::new_v4()));
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&content).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, dir.join(name)).await?;

        debug!("Wrote {} bytes to {}/{}", content.len(), path, name);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectItem {
    name: String,
}

/// Objects in a Cloud Storage bucket, through the JSON API.
#[derive(Debug, Clone)]
pub struct CloudStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    access_token: Option<String>,
}

impl CloudStore {
    pub fn new(endpoint: &str, bucket: &str, access_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            access_token: access_token.filter(|token| !token.is_empty()),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn url(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.endpoint)?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn list_page(
        &self,
        prefix: &str,
        page_token: Option<&str>,
    ) -> Result<ObjectList, StoreError> {
        let mut url = self.url(&["storage", "v1", "b", &self.bucket, "o"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("prefix", prefix);
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }

        let response = self.authorize(self.client.get(url)).send().await?;
        if !response.status().is_success() {
            return Err(StoreError::CloudStatus {
                status: response.status(),
                object: prefix.to_string(),
            });
        }

        Ok(response.json().await?)
    }
}

impl FileManager for CloudStore {
    async fn get(&self, path: &str, name: &str) -> Result<FileReader, StoreError> {
        let object = object_name(path, name);
        let mut url = self.url(&["storage", "v1", "b", &self.bucket, "o", &object])?;
        url.query_pairs_mut().append_pair("alt", "media");

        let response = self.authorize(self.client.get(url)).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(format!("gs://{}/{}", self.bucket, object)));
        }
        if !status.is_success() {
            return Err(StoreError::CloudStatus { status, object });
        }

        debug!(
            "Streaming gs://{}/{} ({:?} bytes)",
            self.bucket,
            object,
            response.content_length()
        );
        let body = response.bytes_stream().map_err(std::io::Error::other);

        Ok(Box::new(StreamReader::new(Box::pin(body))))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self.list_page(prefix, page_token.as_deref()).await?;
            names.extend(page.items.into_iter().map(|item| item.name));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        names.sort();
        Ok(names)
    }

    async fn create(&self, path: &str, name: &str, content: Vec<u8>) -> Result<(), StoreError> {
        let object = object_name(path, name);
        let mut url = self.url(&["upload", "storage", "v1", "b", &self.bucket, "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", &object);

        let response = self
            .authorize(self.client.post(url))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::CloudStatus {
                status: response.status(),
                object,
            });
        }

        Ok(())
    }
}

/// Runtime selection of a backend. In development the cloud tiers are local directories too.
#[derive(Debug, Clone)]
pub enum Storage {
    Disk(DiskStore),
    Cloud(CloudStore),
}

impl FileManager for Storage {
    async fn get(&self, path: &str, name: &str) -> Result<FileReader, StoreError> {
        match self {
            Storage::Disk(s) => s.get(path, name).await,
            Storage::Cloud(s) => s.get(path, name).await,
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        match self {
            Storage::Disk(s) => s.list(prefix).await,
            Storage::Cloud(s) => s.list(prefix).await,
        }
    }

    async fn create(&self, path: &str, name: &str, content: Vec<u8>) -> Result<(), StoreError> {
        match self {
            Storage::Disk(s) => s.create(path, name, content).await,
            Storage::Cloud(s) => s.create(path, name, content).await,
        }
    }
}

#[cfg(test)]
pub fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("pattern-server-{}", Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use tokio::io::AsyncReadExt;

    async fn read_all(mut reader: FileReader) -> String {
        let mut content = String::new();
        reader.read_to_string(&mut content).await.unwrap();
        content
    }

    #[test]
    fn test_file_layout() {
        assert_eq!(
            chunk_file_path_and_name(1, 20, "3"),
            (
                "projects/1/models/20/chunks".to_string(),
                "chunk_3.txt".to_string()
            )
        );
        assert_eq!(
            event_info_file_path_and_name(1, 20),
            (
                "projects/1/models/20".to_string(),
                "event_info_20.txt".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_disk_store_round_trip() {
        let store = DiskStore::new(temp_dir());
        let (path, name) = chunk_file_path_and_name(1, 2, "3");

        let missing = store.get(&path, &name).await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));

        store.create(&path, &name, b"line\n".to_vec()).await.unwrap();
        let (info_path, info_name) = event_info_file_path_and_name(1, 2);
        store.create(&info_path, &info_name, b"{}".to_vec()).await.unwrap();

        assert_eq!(read_all(store.get(&path, &name).await.unwrap()).await, "line\n");
        assert_eq!(
            store.list("projects/1").await.unwrap(),
            vec![
                "projects/1/models/2/chunks/chunk_3.txt",
                "projects/1/models/2/event_info_2.txt",
            ]
        );
        assert!(store.list("projects/9").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cloud_store_get() {
        let server = MockServer::start();
        let found = server.mock(|when, then| {
            when.method(GET)
                .path_prefix("/storage/v1/b/models/o/projects")
                .path_suffix("chunk_3.txt")
                .query_param("alt", "media")
                .header("authorization", "Bearer secret");
            then.status(200).body("content");
        });
        let missing = server.mock(|when, then| {
            when.method(GET)
                .path_prefix("/storage/v1/b/models/o/projects")
                .path_suffix("chunk_4.txt");
            then.status(404);
        });
        let failing = server.mock(|when, then| {
            when.method(GET)
                .path_prefix("/storage/v1/b/models/o/projects")
                .path_suffix("chunk_5.txt");
            then.status(503);
        });

        let store = CloudStore::new(&server.base_url(), "models", Some("secret".to_string()));
        let path = "projects/1/models/2/chunks";

        let reader = store.get(path, "chunk_3.txt").await.unwrap();
        assert_eq!(read_all(reader).await, "content");

        let result = store.get(path, "chunk_4.txt").await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));

        match store.get(path, "chunk_5.txt").await {
            Err(StoreError::CloudStatus { status, .. }) => {
                assert_eq!(status, reqwest::StatusCode::SERVICE_UNAVAILABLE)
            }
            _ => panic!("expected a cloud status error"),
        }

        found.assert();
        missing.assert();
        failing.assert();
    }

    #[tokio::test]
    async fn test_cloud_store_streams_large_objects() {
        let line = r#"{"pe":["a","b"],"rp":{"en":["a","b"],"c":2}}"#;
        let body = format!("{line}\n").repeat(20_000);

        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path_suffix("chunk_1.txt")
                .query_param("alt", "media");
            then.status(200).body(body.as_str());
        });

        let store = CloudStore::new(&server.base_url(), "models", None);
        let reader = store
            .get("projects/1/models/2/chunks", "chunk_1.txt")
            .await
            .unwrap();

        let patterns = crate::store::scanner::read_patterns_with_meta(reader)
            .await
            .unwrap();
        assert_eq!(patterns.len(), 20_000);
        assert_eq!(patterns[19_999].pattern_events, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_cloud_store_list_follows_pages() {
        let server = MockServer::start();
        let second = server.mock(|when, then| {
            when.method(GET)
                .path("/storage/v1/b/models/o")
                .query_param("prefix", "projects/1/")
                .query_param("pageToken", "next");
            then.status(200)
                .json_body(serde_json::json!({"items": [{"name": "projects/1/a.txt"}]}));
        });
        let first = server.mock(|when, then| {
            when.method(GET)
                .path("/storage/v1/b/models/o")
                .query_param("prefix", "projects/1/")
                .query_param_missing("pageToken");
            then.status(200).json_body(serde_json::json!({
                "items": [{"name": "projects/1/b.txt"}],
                "nextPageToken": "next"
            }));
        });

        let store = CloudStore::new(&server.base_url(), "models", None);
        let names = store.list("projects/1/").await.unwrap();

        assert_eq!(names, vec!["projects/1/a.txt", "projects/1/b.txt"]);
        first.assert();
        second.assert();
    }

    #[tokio::test]
    async fn test_cloud_store_create() {
        let server = MockServer::start();
        let upload = server.mock(|when, then| {
            when.method(POST)
                .path("/upload/storage/v1/b/models/o")
                .query_param("uploadType", "media")
                .query_param("name", "projects/1/models/2/event_info_2.txt")
                .body("{}");
            then.status(200).json_body(serde_json::json!({}));
        });

        let store = CloudStore::new(&server.base_url(), "models", None);
        store
            .create("projects/1/models/2", "event_info_2.txt", b"{}".to_vec())
            .await
            .unwrap();

        upload.assert();
    }
}
