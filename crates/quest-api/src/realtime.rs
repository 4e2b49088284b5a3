use axum::{
    extract::{Query, State, WebSocketUpgrade, rejection::QueryRejection},
    http::HeaderMap,
    response::IntoResponse,
};
use tracing::warn;

use quest_gateway::auth::{HandshakeQuery, extract_token, verify_token};
use quest_gateway::connection;

use crate::AppState;

/// GET /ws. Authenticates the upgrade request, then hands the socket to the
/// gateway. Unauthenticated sockets are upgraded only to be closed with 1008.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    query: Result<Query<HandshakeQuery>, QueryRejection>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let query_token = query.ok().and_then(|Query(q)| q.token);
    let claims = extract_token(query_token.as_deref(), &headers)
        .and_then(|token| verify_token(&token, &state.jwt_secret));

    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| async move {
        match claims {
            Some(claims) => {
                connection::handle_connection(socket, gateway, claims.sub, claims.username).await
            }
            None => {
                warn!("Realtime handshake without a valid token, closing");
                connection::reject(socket).await
            }
        }
    })
}
