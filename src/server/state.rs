use crate::server::AppState;
use crate::topology::ProjectId;
use actix_web::{
    Error, HttpResponse,
    error::ErrorInternalServerError,
    get,
    web::{Data, Json, Path},
};
use log::error;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_actix_web::service_config::ServiceConfig;
use uuid::Uuid;

pub fn configure_routes(config: &mut ServiceConfig) {
    config.service(state).service(disk_files);
}

/// What this node currently serves, as published by its state manager.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StateView {
    pub address: String,
    pub lease_id: Option<Uuid>,
    pub nodes: Vec<String>,
    /// Absent when the node is not in the registered node list.
    pub my_index: Option<usize>,
    pub version: String,
    pub projects_to_serve: Vec<ProjectId>,
    pub models_to_serve: Vec<String>,
    pub chunks_to_serve: Vec<String>,
    pub cached_chunks: usize,
    pub cached_event_infos: usize,
}

#[utoipa::path(
    summary = "Current state",
    description = "Membership, this node's index and the project/model/chunk keys it is authoritative for",
    responses(
        (status = 200, description = "State of this node", body = StateView),
    ),
    tags = ["state"],
    operation_id = "getState"
)]
#[get("/state")]
async fn state(app_state: Data<AppState>) -> Json<StateView> {
    let service = &app_state.service;
    let snapshot = service.state().snapshot();

    Json(StateView {
        address: service.state().address().to_string(),
        lease_id: app_state.lease_id,
        nodes: snapshot.nodes.clone(),
        my_index: snapshot.my_index,
        version: snapshot.version.clone(),
        projects_to_serve: snapshot.projects_to_serve.iter().copied().collect(),
        models_to_serve: snapshot.models_to_serve.iter().cloned().collect(),
        chunks_to_serve: snapshot.chunks_to_serve.iter().cloned().collect(),
        cached_chunks: service.store().cached_chunks(),
        cached_event_infos: service.store().cached_event_infos(),
    })
}

#[utoipa::path(
    summary = "Disk tier files of a project",
    responses(
        (status = 200, description = "Files on the local disk tier", body = Vec<String>),
        (status = 500, description = "Disk could not be listed"),
    ),
    tags = ["state"],
    operation_id = "getDiskFiles"
)]
#[get("/disk/{project_id}")]
async fn disk_files(
    project_id: Path<ProjectId>,
    app_state: Data<AppState>,
) -> Result<HttpResponse, Error> {
    let project_id = project_id.into_inner();

    let files = app_state
        .service
        .store()
        .disk_files(project_id)
        .await
        .map_err(|e| {
            error!("Failed to list disk files of project {project_id}: {e}");
            ErrorInternalServerError("Failed to list disk files")
        })?;

    Ok(HttpResponse::Ok().json(files))
}
