//! FMDM WebSocket feed (C10, §4.7, §6).
//!
//! On connect, the server sends the full FMDM snapshot, then forwards every
//! fresh snapshot the [`Broadcaster`] fans out. A client may also push
//! `add_folder`/`remove_folder` control messages; the daemon applies them and
//! the next broadcast carries the result, so there is no separate
//! request/response framing for folder mutation.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::lifecycle::Daemon;

pub fn router(daemon: Arc<Daemon>) -> Router {
  Router::new().route("/api/v1/ws", get(handler)).with_state(daemon)
}

async fn handler(ws: WebSocketUpgrade, State(daemon): State<Arc<Daemon>>) -> impl IntoResponse {
  ws.on_upgrade(move |socket| run(socket, daemon))
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
  AddFolder { path: PathBuf, model_id: String },
  RemoveFolder { path: PathBuf },
}

async fn run(mut socket: WebSocket, daemon: Arc<Daemon>) {
  daemon.touch_activity();
  let (snapshot, mut rx) = daemon.broadcaster.subscribe(&daemon.fmdm);

  let Ok(initial) = serde_json::to_string(&*snapshot) else { return };
  if socket.send(Message::Text(initial)).await.is_err() {
    return;
  }

  let shutdown = daemon.shutdown_token();
  loop {
    tokio::select! {
      _ = shutdown.cancelled() => return,

      snapshot = rx.recv() => {
        let Ok(snapshot) = snapshot else { return };
        let Ok(text) = serde_json::to_string(&*snapshot) else { continue };
        if socket.send(Message::Text(text)).await.is_err() {
          return;
        }
      }

      incoming = socket.recv() => {
        match incoming {
          Some(Ok(Message::Text(text))) => handle_client_message(&text, &daemon).await,
          Some(Ok(Message::Close(_))) | None => return,
          Some(Err(e)) => {
            warn!(error = %e, "websocket receive error");
            return;
          }
          _ => {}
        }
        daemon.touch_activity();
      }
    }
  }
}

async fn handle_client_message(text: &str, daemon: &Arc<Daemon>) {
  let message: ClientMessage = match serde_json::from_str(text) {
    Ok(m) => m,
    Err(e) => {
      debug!(error = %e, "ignoring malformed websocket message");
      return;
    }
  };

  match message {
    ClientMessage::AddFolder { path, model_id } => {
      if let Err(e) = daemon.add_folder(path, model_id).await {
        warn!(error = %e, "add_folder failed");
      }
    }
    ClientMessage::RemoveFolder { path } => {
      let id = fmcp_core::folder::FolderId::from_path(&path);
      daemon.remove_folder(&id).await;
    }
  }
}
