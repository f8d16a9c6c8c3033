use crate::rpc::envelope::{decode_request, failure, success};
use crate::rpc::{REQUEST_ID_HEADER, RPC_ENDPOINT};
use crate::server::AppState;
use actix_web::{HttpRequest, HttpResponse, web, web::Bytes, web::Data};
use log::{info, warn};
use serde_json::Value;
use std::time::Instant;

pub fn configure_routes(config: &mut web::ServiceConfig) {
    config.route(RPC_ENDPOINT, web::post().to(rpc));
}

/// Entry point of the `ps` service.
///
/// Handler failures travel inside the envelope with HTTP 200. Only calls that cannot be routed at
/// all get a 400.
pub async fn rpc(req: HttpRequest, app_state: Data<AppState>, body: Bytes) -> HttpResponse {
    let started = Instant::now();
    let req_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let envelope = match decode_request(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("rpc req_id={req_id}: rejected malformed envelope: {e}");
            return HttpResponse::BadRequest().json(failure(Value::Null, e));
        }
    };

    info!("rpc {} req_id={req_id}: started", envelope.method);

    let (response, outcome) = match app_state.service.dispatch(&envelope).await {
        Ok(Ok(result)) => {
            let outcome = if result.header.ignored { "ignored" } else { "ok" };
            (
                HttpResponse::Ok().json(success(envelope.id.clone(), result.body)),
                outcome,
            )
        }
        Ok(Err(e)) => {
            warn!("rpc {} req_id={req_id}: {e}", envelope.method);
            (
                HttpResponse::Ok().json(failure(envelope.id.clone(), e)),
                "error",
            )
        }
        Err(e) => {
            warn!("rpc {} req_id={req_id}: rejected: {e}", envelope.method);
            (
                HttpResponse::BadRequest().json(failure(envelope.id.clone(), e)),
                "rejected",
            )
        }
    };

    info!(
        "rpc {} req_id={req_id}: {outcome} status={} in {}ms",
        envelope.method,
        response.status().as_u16(),
        started.elapsed().as_millis()
    );

    response
}
