use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info, warn};

use super::hub::{CollabHub, SignalKind};
use crate::models::ClientMessage;
use crate::services::auth_service;

/// WebSocket upgrade handler. Authentication happens here, before the
/// upgrade: a connection without a valid token never reaches the hub.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(hub): State<Arc<CollabHub>>,
) -> Response {
    let token = match auth_service::get_auth_token(&headers, Some(&params)) {
        Ok(token) => token,
        Err(e) => {
            warn!("WebSocket connection rejected: {}", e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let identity = match auth_service::authenticate(&token) {
        Ok(identity) => identity,
        Err(e) => {
            warn!("WebSocket authentication failed: {}", e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, identity, hub))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, identity: crate::models::Identity, hub: Arc<CollabHub>) {
    let (conn_id, mut events) = hub.connect(identity).await;
    info!("WebSocket connection established with connection_id: {}", conn_id);

    // Split the socket into sender and receiver
    let (mut sender, mut receiver) = socket.split();

    // Forward hub events to the client
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize server event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Read client messages and dispatch them to the hub
    let hub_rx = hub.clone();
    let conn_rx = conn_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(Message::Text(msg))) = receiver.next().await {
            let parsed: ClientMessage = match serde_json::from_str(&msg) {
                Ok(parsed) => parsed,
                Err(e) => {
                    error!("Failed to parse message from {}: {}", conn_rx, e);
                    continue;
                }
            };
            dispatch(&hub_rx, &conn_rx, parsed).await;
        }
    });

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    // Transport is gone; run the cleanup cascade exactly once
    hub.disconnect(&conn_id).await;
    info!("WebSocket connection {} terminated", conn_id);
}

/// Single dispatch point for everything a client can ask for.
async fn dispatch(hub: &CollabHub, conn_id: &str, msg: ClientMessage) {
    match msg {
        ClientMessage::FormJoin { work_order_id } => {
            hub.join_form(conn_id, &work_order_id).await;
        }
        ClientMessage::FormLock {
            work_order_id,
            entry_id,
            field,
        } => {
            hub.lock_field(conn_id, &work_order_id, &entry_id, &field).await;
        }
        ClientMessage::FormUnlock {
            work_order_id,
            entry_id,
            field,
        } => {
            hub.unlock_field(conn_id, &work_order_id, &entry_id, &field).await;
        }
        ClientMessage::FormUpdate {
            work_order_id,
            entry_id,
            field,
            value,
        } => {
            hub.update_field(conn_id, &work_order_id, &entry_id, &field, value)
                .await;
        }
        ClientMessage::FormScreenshot {
            work_order_id,
            entry_id,
            data_url,
        } => {
            hub.add_screenshot(conn_id, &work_order_id, &entry_id, data_url)
                .await;
        }
        ClientMessage::FormComplete {
            work_order_id,
            entry_id,
        } => {
            hub.complete_entry(conn_id, &work_order_id, &entry_id).await;
        }
        ClientMessage::RoomJoin { work_order_id } => {
            hub.join_video(conn_id, &work_order_id).await;
        }
        ClientMessage::RoomLeave { work_order_id } => {
            hub.leave_video(conn_id, &work_order_id).await;
        }
        ClientMessage::SignalOffer {
            target_connection_id,
            payload,
        } => {
            hub.relay_signal(conn_id, SignalKind::Offer, &target_connection_id, payload)
                .await;
        }
        ClientMessage::SignalAnswer {
            target_connection_id,
            payload,
        } => {
            hub.relay_signal(conn_id, SignalKind::Answer, &target_connection_id, payload)
                .await;
        }
        ClientMessage::SignalIceCandidate {
            target_connection_id,
            payload,
        } => {
            hub.relay_signal(
                conn_id,
                SignalKind::IceCandidate,
                &target_connection_id,
                payload,
            )
            .await;
        }
    }
}
