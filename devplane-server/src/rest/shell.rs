//! `AttachShell` — upgrades to a WebSocket and pipes bytes between the
//! client and the hypervisor's interactive shell stream. Query-param
//! token auth only (browsers cannot set `Authorization` on a WS upgrade),
//! per this gateway's stream-upgrade auth carve-out.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::state::AppState;

pub async fn attach(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle(socket, state, username))
}

async fn handle(mut socket: WebSocket, state: AppState, username: String) {
    let container_name = devplane_core::lifecycle::container_name(&username);
    let mut shell = match state.hypervisor.attach_shell(&container_name).await {
        Ok(shell) => shell,
        Err(err) => {
            let _ = socket
                .send(Message::Text(format!("failed to attach shell: {err}")))
                .await;
            return;
        }
    };

    let mut read_buf = [0u8; 4096];
    loop {
        tokio::select! {
            result = shell.read(&mut read_buf) => {
                match result {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if socket.send(Message::Binary(read_buf[..n].to_vec())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Binary(bytes))) => {
                        if shell.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if shell.write_all(text.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
}
