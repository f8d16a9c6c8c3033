use crate::database::Database;
use crate::database::preparer::CachedPreparedStatement;
use anyhow::{Result, bail};
use chrono::Utc;
use log::{error, info};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// `ip:port` of a pattern server's RPC listener.
pub type NodeAddress = String;

pub const PROJECTS_VERSION_KEY: &str = "projects_version";
pub const INITIAL_PROJECTS_VERSION: &str = "version1";

/// Read side of the coordination service, shared by servers and the scatter/gather client.
pub trait Coordinator {
    /// Registered node addresses, ordered by registration key.
    fn registered_nodes(&self) -> impl Future<Output = Result<Vec<NodeAddress>>> + Send;

    /// Current version tag of the per-project data topology, if one was ever published.
    fn project_data_version(&self) -> impl Future<Output = Result<Option<String>>> + Send;
}

static INSERT_REGISTRATION_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    INSERT INTO node_registrations (prefix,
                                    address,
                                    lease_id,
                                    registered_at)
    VALUES (?, ?, ?, ?)
    USING TTL ?
    ",
);

static GET_REGISTRATIONS_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    SELECT address
    FROM node_registrations
    WHERE prefix = ?
    ",
);

static GET_REGISTRATION_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    SELECT lease_id
    FROM node_registrations
    WHERE prefix = ?
      AND address = ?
    ",
);

static DELETE_REGISTRATION_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    DELETE FROM node_registrations
    WHERE prefix = ?
      AND address = ?
    ",
);

static GET_KEY_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    SELECT value
    FROM coordination_keys
    WHERE key = ?
    ",
);

static SET_KEY_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    INSERT INTO coordination_keys (key, value)
    VALUES (?, ?)
    ",
);

async fn insert_registration(
    session: &Database,
    prefix: &str,
    address: &str,
    lease_id: Uuid,
    ttl: Duration,
) -> Result<()> {
    INSERT_REGISTRATION_QUERY
        .execute_unpaged(
            session,
            (prefix, address, lease_id, Utc::now(), ttl.as_secs() as i32),
        )
        .await?;

    Ok(())
}

async fn get_registered_nodes(session: &Database, prefix: &str) -> Result<Vec<NodeAddress>> {
    let rows = GET_REGISTRATIONS_QUERY
        .execute_unpaged(session, (prefix,))
        .await?
        .into_rows_result()?;

    let mut nodes = Vec::new();
    for row in rows.rows::<(String,)>()? {
        let (address,) = row?;
        nodes.push(address);
    }

    // Clustering order already sorts by address, keep it explicit for the sharding index
    nodes.sort();

    Ok(nodes)
}

async fn get_key(session: &Database, key: &str) -> Result<Option<String>> {
    let rows = GET_KEY_QUERY
        .execute_unpaged(session, (key,))
        .await?
        .into_rows_result()?;

    let value = rows
        .maybe_first_row::<(Option<String>,)>()?
        .and_then(|(value,)| value);

    Ok(value)
}

async fn set_key(session: &Database, key: &str, value: &str) -> Result<()> {
    SET_KEY_QUERY.execute_unpaged(session, (key, value)).await?;
    Ok(())
}

/// Node registration and discovery backed by Scylla.
///
/// Each node owns one row under a shared `prefix`, written with a TTL and refreshed by a
/// keep-alive task. A node that stops refreshing disappears once the TTL expires.
pub struct ScyllaCoordinator {
    prefix: String,
    address: NodeAddress,
    lease_id: Uuid,
    ttl: Duration,
    session: Arc<Database>,
    task_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ScyllaCoordinator {
    pub async fn new(
        session: Arc<Database>,
        prefix: String,
        address: NodeAddress,
        ttl: Duration,
    ) -> Result<Self> {
        for statement in [
            &INSERT_REGISTRATION_QUERY,
            &GET_REGISTRATIONS_QUERY,
            &GET_REGISTRATION_QUERY,
            &DELETE_REGISTRATION_QUERY,
            &GET_KEY_QUERY,
            &SET_KEY_QUERY,
        ] {
            statement.optimistically_prepare(&session).await?;
        }

        Ok(Self {
            prefix,
            address,
            lease_id: Uuid::new_v4(),
            ttl,
            session,
            task_handle: Arc::new(Mutex::new(None)),
        })
    }

    pub fn lease_id(&self) -> Uuid {
        self.lease_id
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether some process currently holds a registration for this node's address.
    pub async fn is_registered(&self) -> Result<bool> {
        let rows = GET_REGISTRATION_QUERY
            .execute_unpaged(&self.session, (self.prefix.as_str(), self.address.as_str()))
            .await?
            .into_rows_result()?;

        Ok(rows.rows_num() > 0)
    }

    /// Registers this node. Fails if the address is still held by a previous lease.
    pub async fn register(&self) -> Result<()> {
        if self.is_registered().await? {
            bail!(
                "pattern server already registered with address [ {} ]",
                self.address
            );
        }

        insert_registration(
            &self.session,
            &self.prefix,
            &self.address,
            self.lease_id,
            self.ttl,
        )
        .await?;

        info!(
            "Registered {} under '{}' with lease {} (ttl {:?})",
            self.address, self.prefix, self.lease_id, self.ttl
        );

        Ok(())
    }

    /// Starts refreshing the registration every half TTL.
    pub async fn start(&self) {
        let mut handle = self.task_handle.lock().await;

        if handle.is_some() {
            return;
        }

        let prefix = self.prefix.clone();
        let address = self.address.clone();
        let lease_id = self.lease_id;
        let ttl = self.ttl;
        let session = self.session.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ttl / 2);
            loop {
                ticker.tick().await;

                let result = insert_registration(&session, &prefix, &address, lease_id, ttl).await;

                if let Err(e) = result {
                    error!("failed to keep registration alive: {e}");
                }
            }
        });

        *handle = Some(task);

        info!("Registration keep-alive started")
    }

    /// Stops the keep-alive and removes the registration.
    pub async fn stop(&self) {
        let mut handle = self.task_handle.lock().await;

        if let Some(task) = handle.take() {
            task.abort();
            info!("Registration keep-alive stopped")
        }

        let result = DELETE_REGISTRATION_QUERY
            .execute_unpaged(&self.session, (self.prefix.as_str(), self.address.as_str()))
            .await;

        if let Err(e) = result {
            error!("failed to deregister {}: {e}", self.address);
        }
    }

    pub async fn set_project_data_version(&self, version: &str) -> Result<()> {
        set_key(&self.session, PROJECTS_VERSION_KEY, version).await
    }

    /// Returns the current version, initialising it if it was never published.
    pub async fn ensure_project_data_version(&self) -> Result<String> {
        if let Some(version) = get_key(&self.session, PROJECTS_VERSION_KEY).await? {
            return Ok(version);
        }

        info!("No projects version found, initialising to '{INITIAL_PROJECTS_VERSION}'");
        self.set_project_data_version(INITIAL_PROJECTS_VERSION)
            .await?;

        Ok(INITIAL_PROJECTS_VERSION.to_string())
    }
}

impl Coordinator for ScyllaCoordinator {
    async fn registered_nodes(&self) -> Result<Vec<NodeAddress>> {
        get_registered_nodes(&self.session, &self.prefix).await
    }

    async fn project_data_version(&self) -> Result<Option<String>> {
        get_key(&self.session, PROJECTS_VERSION_KEY).await
    }
}

/// Fixed membership, used by clients with a static fleet and in tests.
#[derive(Default)]
pub struct StaticCoordinator {
    nodes: RwLock<Vec<NodeAddress>>,
    version: RwLock<Option<String>>,
}

impl StaticCoordinator {
    pub fn new(nodes: Vec<NodeAddress>, version: Option<String>) -> Self {
        let coordinator = Self::default();
        coordinator.set_nodes(nodes);
        *coordinator.version.write() = version;
        coordinator
    }

    pub fn set_nodes(&self, mut nodes: Vec<NodeAddress>) {
        nodes.sort();
        nodes.dedup();
        *self.nodes.write() = nodes;
    }

    pub fn set_version(&self, version: &str) {
        *self.version.write() = Some(version.to_string());
    }
}

impl Coordinator for StaticCoordinator {
    async fn registered_nodes(&self) -> Result<Vec<NodeAddress>> {
        Ok(self.nodes.read().clone())
    }

    async fn project_data_version(&self) -> Result<Option<String>> {
        Ok(self.version.read().clone())
    }
}
