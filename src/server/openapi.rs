use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "pattern-server",
        description = "Debug and health endpoints of a pattern server node."
    ),
    tags(
        (name = "health", description = "Health-related endpoints."),
        (name = "state", description = "Cluster membership, ownership and cache state of this node."),
    )
)]
pub struct ApiDoc;
