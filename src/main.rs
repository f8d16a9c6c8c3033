use pattern_server::{
    collab::{
        coordination::ScyllaCoordinator, network::advertised_address, state::StateManager,
        watcher::ClusterWatcher,
    },
    database::{connect_db, parse_database_urls},
    eager_env::{self, check_env},
    environment::Environment,
    rpc::handlers::PatternService,
    server::{AppStateInner, start_rpc_server, start_status_server},
    store::{
        PatternStore, cloud_bucket_names,
        files::{CloudStore, DiskStore, Storage},
        parse_project_ids,
    },
    topology::{ScyllaTopology, Topology},
};
use log::{LevelFilter, info};
use std::{net::TcpListener, path::Path, sync::Arc, time::Duration};

/// Cloud tier backend. In development buckets are directories next to the disk tier.
fn cloud_storage(environment: Environment, bucket: &str) -> Storage {
    if environment.is_development() {
        let dir = Path::new(&*eager_env::DISK_BASE_DIR)
            .join("cloud")
            .join(bucket);
        return Storage::Disk(DiskStore::new(dir));
    }

    Storage::Cloud(CloudStore::new(
        &eager_env::CLOUD_STORAGE_ENDPOINT,
        bucket,
        Some(eager_env::CLOUD_STORAGE_TOKEN.clone()),
    ))
}

#[tokio::main]
async fn main() {
    let environment: Environment = eager_env::ENVIRONMENT
        .parse()
        .expect("Invalid ENVIRONMENT");

    let mut logger = env_logger::builder();
    logger.format_timestamp(Some(env_logger::TimestampPrecision::Millis));
    if environment.is_development() {
        logger.filter_level(LevelFilter::Debug);
    }
    logger.parse_default_env().init();
    check_env();

    let address = advertised_address(&eager_env::IP, *eager_env::RPC_PORT)
        .expect("Failed to determine the advertised address")
        .to_string();
    info!("Starting pattern server {address} in {environment}");

    let node_urls = parse_database_urls(&eager_env::DATABASE_NODE_URLS);
    let database = connect_db(&node_urls, &eager_env::DATABASE_KEYSPACE)
        .await
        .expect("failed to connect to the database");
    let database = Arc::new(database);

    let coordinator = ScyllaCoordinator::new(
        database.clone(),
        eager_env::REGISTRATION_PREFIX.clone(),
        address.clone(),
        Duration::from_secs(*eager_env::LEASE_TTL_SECONDS),
    )
    .await
    .expect("failed to prepare coordination statements");
    let coordinator = Arc::new(coordinator);

    coordinator
        .register()
        .await
        .expect("failed to register with the coordination service");
    coordinator.start().await;

    let version = coordinator
        .ensure_project_data_version()
        .await
        .expect("failed to read the projects version");
    info!("Projects version '{version}'");

    let topology = ScyllaTopology::new(database.clone())
        .await
        .expect("failed to prepare topology statements");
    let topology = Arc::new(Topology::Scylla(topology));

    let (bucket, bucket_v2) = cloud_bucket_names(
        &eager_env::BUCKET_NAME,
        &eager_env::BUCKET_NAME_V2,
        *eager_env::USE_BUCKET_V2,
    );
    let store = PatternStore::new(
        *eager_env::CHUNK_CACHE_SIZE,
        *eager_env::EVENT_INFO_CACHE_SIZE,
        Storage::Disk(DiskStore::new(&*eager_env::DISK_BASE_DIR)),
        cloud_storage(environment, bucket),
        cloud_storage(environment, bucket_v2),
        parse_project_ids(&eager_env::PROJECT_IDS_V2).expect("Invalid PROJECT_IDS_V2"),
    );

    let state = Arc::new(StateManager::new(address.clone()));

    let watcher = ClusterWatcher::new(coordinator.clone(), topology.clone(), state.clone());
    let (stop_watcher, mut cluster_updates) = watcher
        .start(Duration::from_secs(*eager_env::WATCH_INTERVAL_SECONDS))
        .await;

    // The first refresh runs right away, serving starts once it is published
    if cluster_updates.changed().await.is_ok() {
        let view = cluster_updates.borrow_and_update().clone();
        info!("Initial cluster: {:?} at version {:?}", view.nodes, view.version);
    }

    let app_state = Arc::new(AppStateInner {
        service: PatternService::new(state, Arc::new(store), topology),
        lease_id: Some(coordinator.lease_id()),
    });

    let rpc_listener = TcpListener::bind(format!("0.0.0.0:{}", *eager_env::RPC_PORT))
        .expect("Failed to bind RPC_PORT");
    let status_listener = TcpListener::bind(format!("0.0.0.0:{}", *eager_env::HTTP_PORT))
        .expect("Failed to bind HTTP_PORT");

    info!(
        "Listening on {} (rpc) and {} (status)",
        rpc_listener.local_addr().expect("Failed to get local address"),
        status_listener
            .local_addr()
            .expect("Failed to get local address")
    );

    let result = tokio::try_join!(
        start_rpc_server(app_state.clone(), rpc_listener),
        start_status_server(app_state, status_listener),
    );
    if let Err(e) = result {
        log::error!("error while running servers: {e}");
    }

    stop_watcher();
    coordinator.stop().await;
}
