use super::error::err;
use super::handlers;
use super::types::{AppState, Request};
use tracing::debug;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    debug!(id = %req.id, method = %req.method, "request");

    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::students::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::catalog::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::class_records::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::overrides::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::credentials::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::progression::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
