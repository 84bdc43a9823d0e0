//! /peers handlers: live probe sessions.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crawl_services::PeerInfo;

use super::{parse_node_id, ApiState};

#[derive(Serialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerInfo>,
}

pub async fn handle_peers(State(state): State<ApiState>) -> Json<PeersResponse> {
    let mut peers: Vec<PeerInfo> = state
        .engine
        .peers()
        .snapshot()
        .iter()
        .map(|s| s.info())
        .collect();
    peers.sort_by_key(|p| p.connected_secs);
    Json(PeersResponse { peers })
}

pub async fn handle_peer(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<PeerInfo>, (StatusCode, String)> {
    let id = parse_node_id(&id)?;
    state
        .engine
        .peer_info(&id)
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "peer not connected".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crawl_core::Node;
    use crawl_services::PeerSession;

    use crate::handlers::test_support;

    #[tokio::test]
    async fn lists_registered_sessions() {
        let (state, _rx) = test_support::state();
        let node = Node::new([3; 32], "127.0.0.1:5050".parse().unwrap());
        let session = Arc::new(PeerSession::new(node, "go-opera", 63, false, true));
        state.engine.peers().register(Arc::clone(&session)).unwrap();

        let Json(resp) = handle_peers(State(state.clone())).await;
        assert_eq!(resp.peers.len(), 1);
        assert_eq!(resp.peers[0].name, "go-opera");

        let Json(one) = handle_peer(State(state), Path(session.id.to_string())).await.unwrap();
        assert_eq!(one.id, session.id);
    }

    #[tokio::test]
    async fn unknown_or_malformed_id() {
        let (state, _rx) = test_support::state();
        let err = handle_peer(State(state.clone()), Path("zz".into())).await.unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);

        let id = Node::new([4; 32], "127.0.0.1:5050".parse().unwrap()).id();
        let err = handle_peer(State(state), Path(id.to_string())).await.unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }
}
