use std::collections::BTreeMap;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use lib_eventsub::PoolSnapshot;
use serde::Serialize;
use serde_json::{Value, json};

use crate::eventsub_logic::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBody {
    pub pools: BTreeMap<String, PoolSnapshot>,
    pub listener_count: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn status(State(state): State<AppState>) -> Json<StatusBody> {
    Json(StatusBody {
        pools: state.manager.status(),
        listener_count: state.bus.listener_count(),
    })
}
