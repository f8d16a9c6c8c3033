mod health;
mod openapi;
mod rpc;
mod state;


use crate::{
    rpc::handlers::PatternService,
    server::{health::*, openapi::ApiDoc},
};
use actix_cors::Cors;
use actix_web::{
    App, HttpServer,
    web::{Data, PayloadConfig},
};
use std::{net::TcpListener, sync::Arc};
use utoipa::OpenApi;
use utoipa_actix_web::AppExt;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

/// Largest accepted RPC request body.
const MAX_RPC_BODY_BYTES: usize = 16 * 1024 * 1024;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub service: PatternService,
    /// Lease held in the coordination keyspace, `None` without a registration.
    pub lease_id: Option<Uuid>,
}

/// Serves the `ps` service on `listener`.
pub async fn start_rpc_server(state: AppState, listener: TcpListener) -> std::io::Result<()> {
    let data = Data::new(state);

    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .app_data(PayloadConfig::new(MAX_RPC_BODY_BYTES))
            .service(health)
            .configure(rpc::configure_routes)
    })
    .listen(listener)
    .expect("Failed to bind port")
    .run()
    .await
}

/// Serves the health, state and OpenAPI endpoints on `listener`.
pub async fn start_status_server(state: AppState, listener: TcpListener) -> std::io::Result<()> {
    let data = Data::new(state);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET"])
            .allowed_headers(vec!["Content-Type"])
            .max_age(60 * 60 * 12);

        App::new()
            .wrap(cors)
            .into_utoipa_app()
            .openapi(ApiDoc::openapi())
            .service(home)
            .service(health)
            .service(status)
            .configure(state::configure_routes)
            .app_data(data.clone())
            .openapi_service(|api| {
                SwaggerUi::new("/swagger-ui/{_:.*}").url("/api/openapi.json", api)
            })
            .into_app()
    })
    .listen(listener)
    .expect("Failed to bind port")
    .run()
    .await
}

#[cfg(test)]
pub struct TestServer {
    /// Registered `ip:port` of the node, its RPC address.
    pub address: String,
    pub rpc_port: u16,
    pub status_port: u16,
    /// Disk tier shared by every node of the test cluster.
    pub disk: crate::store::files::DiskStore,
    pub state: AppState,
}

/// Starts `node_count` nodes that all see each other and `metadata`, backed by one disk directory.
#[cfg(test)]
pub async fn start_cluster_test(
    node_count: usize,
    metadata: Vec<crate::topology::ProjectModelMetadata>,
) -> Vec<TestServer> {
    use crate::collab::state::StateManager;
    use crate::store::PatternStore;
    use crate::store::files::{DiskStore, Storage, temp_dir};
    use crate::topology::{InMemoryTopology, Topology, make_project_model_chunk_lookup};

    let disk = DiskStore::new(temp_dir());
    let lookup = Arc::new(make_project_model_chunk_lookup(&metadata));

    let rpc_listeners: Vec<TcpListener> = (0..node_count)
        .map(|_| TcpListener::bind("127.0.0.1:0").expect("failed to bind to random port"))
        .collect();
    let mut addresses: Vec<String> = rpc_listeners
        .iter()
        .map(|l| l.local_addr().expect("failed to get local addr").to_string())
        .collect();
    let mut nodes = addresses.clone();
    nodes.sort();

    let mut servers = Vec::new();
    for listener in rpc_listeners {
        let address = addresses.remove(0);

        let manager = Arc::new(StateManager::new(address.clone()));
        manager.set_state(nodes.clone(), "v1".to_string(), lookup.clone());

        let store = PatternStore::new(
            5,
            5,
            Storage::Disk(disk.clone()),
            Storage::Disk(DiskStore::new(temp_dir())),
            Storage::Disk(DiskStore::new(temp_dir())),
            Default::default(),
        );
        let topology = Topology::InMemory(InMemoryTopology::new(metadata.clone()));

        let state = Arc::new(AppStateInner {
            service: PatternService::new(manager, Arc::new(store), Arc::new(topology)),
            lease_id: Some(Uuid::new_v4()),
        });

        let rpc_port = listener.local_addr().expect("failed to get local addr").port();
        let status_listener =
            TcpListener::bind("0.0.0.0:0").expect("failed to bind to random port");
        let status_port = status_listener
            .local_addr()
            .expect("failed to get local addr")
            .port();

        let rpc_state = state.clone();
        tokio::spawn(async move {
            start_rpc_server(rpc_state, listener).await.unwrap();
        });
        let status_state = state.clone();
        tokio::spawn(async move {
            start_status_server(status_state, status_listener)
                .await
                .unwrap();
        });

        servers.push(TestServer {
            address,
            rpc_port,
            status_port,
            disk: disk.clone(),
            state,
        });
    }

    servers
}

#[cfg(test)]
pub async fn start_server_test(metadata: Vec<crate::topology::ProjectModelMetadata>) -> TestServer {
    start_cluster_test(1, metadata)
        .await
        .pop()
        .expect("cluster has one node")
}
