//! /status handler.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crawl_core::forkid::EnrEntry;
use crawl_core::genesis::NodeInfo;

use super::ApiState;

#[derive(Serialize)]
pub struct StatusResponse {
    pub node: NodeInfo,
    pub enr_key: &'static str,
    pub enr: EnrEntry,
    pub peers_connected: usize,
    pub nodes_known: usize,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let enr = state.engine.enr_entry();
    Json(StatusResponse {
        node: state.engine.node_info(),
        enr_key: enr.key(),
        enr,
        peers_connected: state.engine.peers().len(),
        nodes_known: state.latest.read().len(),
    })
}
