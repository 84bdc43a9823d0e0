//! /nodes handler: the last published catalogue.

use axum::extract::State;
use axum::Json;

use crawl_services::NodeSet;

use super::ApiState;

pub async fn handle_nodes(State(state): State<ApiState>) -> Json<NodeSet> {
    Json(state.latest.read().clone())
}
