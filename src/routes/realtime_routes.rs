//! WebSockets
//!
//! `GET /ws/:module?token=<jwt>`. Al conectar, el socket queda suscrito al
//! tópico de su módulo; el cliente puede además seguir trámites puntuales
//! (`subscribe` / `unsubscribe`) y hacer `ping`.
//!
//! `GET /ws/users/online?token=<jwt>`. Presencia: cualquier usuario
//! autenticado recibe `users_update` cada vez que alguien entra o sale, y
//! puede pedir la lista con `get_connected_users`.
//!
//! Cada conexión tiene una tarea lectora y una escritora; cuando cualquiera
//! termina se cierra la otra y se da de baja al suscriptor del bus.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::middleware::auth::{authenticate, AuthenticatedUser};
use crate::models::tramite::Module;
use crate::services::notification_bus::{NotificationBus, SubscriberId, Topic};
use crate::services::presence::{OnlineUser, PresenceRegistry};
use crate::state::AppState;
use crate::utils::errors::{AppError, AppResult};

pub fn create_realtime_router() -> Router<AppState> {
    Router::new()
        .route("/ws/users/online", get(presence_handler))
        .route("/ws/:module", get(ws_handler))
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    token: Option<String>,
}

/// Mensajes que envía el cliente
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Ping,
    Subscribe { tramite_id: i64 },
    Unsubscribe { tramite_id: i64 },
    GetConnectedUsers,
}

/// Respuestas de control; los eventos del bus viajan como `EventEnvelope`
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    ConnectionEstablished {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        module: Option<Module>,
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    Subscribed {
        tramite_id: i64,
        timestamp: DateTime<Utc>,
    },
    Unsubscribed {
        tramite_id: i64,
        timestamp: DateTime<Utc>,
    },
    UsersUpdate {
        users: Vec<OnlineUser>,
        total: usize,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(params): Query<WsParams>,
) -> AppResult<Response> {
    let module = Module::from_slug(&slug)
        .ok_or_else(|| AppError::NotFound(format!("Módulo '{}' no existe", slug)))?;
    let user = authenticate_params(&state, params)?;
    state.guard.authorize(&user)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, Some(module), user)))
}

async fn presence_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> AppResult<Response> {
    // la presencia no exige rol de personal
    let user = authenticate_params(&state, params)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, None, user)))
}

fn authenticate_params(state: &AppState, params: WsParams) -> AppResult<AuthenticatedUser> {
    let token = params
        .token
        .ok_or_else(|| AppError::Unauthorized("Token requerido en ?token=".to_string()))?;
    authenticate(&token, &state.config.jwt_secret)
}

/// Con `module` el socket sigue ese módulo; sin él es un socket de presencia
async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    module: Option<Module>,
    user: AuthenticatedUser,
) {
    let (mut sink, mut stream) = socket.split();
    let (id, mut events) = state.bus.register().await;
    let topic = match module {
        Some(module) => Topic::Module(module),
        None => Topic::Presence,
    };
    if let Err(e) = state.bus.subscribe(topic, id).await {
        warn!("⚠️ No se pudo suscribir el socket: {}", e);
        state.bus.unsubscribe_all(id).await;
        return;
    }
    info!("🔌 {} conectado a {} ({})", user.username, topic, id);

    let (control_tx, mut control_rx) = mpsc::channel::<ServerMessage>(16);
    let send_timeout = state.config.notify_send_timeout;

    let welcome = ServerMessage::ConnectionEstablished {
        message: match module {
            Some(module) => format!("Conectado al módulo {}", module),
            None => "Conectado a usuarios en línea".to_string(),
        },
        module,
        timestamp: Utc::now(),
    };

    let mut writer = tokio::spawn(async move {
        let Some(text) = control_frame(&welcome) else {
            return;
        };
        if !send_frame(&mut sink, Message::Text(text), send_timeout).await {
            return;
        }

        loop {
            let text = tokio::select! {
                event = events.recv() => match event {
                    Some(envelope) => serde_json::to_string(envelope.as_ref()).ok(),
                    // el bus dio de baja al suscriptor
                    None => break,
                },
                reply = control_rx.recv() => match reply {
                    Some(reply) => control_frame(&reply),
                    None => break,
                },
            };

            let Some(text) = text else { continue };
            if !send_frame(&mut sink, Message::Text(text), send_timeout).await {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // tras el saludo, para que el primer users_update llegue ya suscrito
    if module.is_none() {
        state
            .presence
            .join(id, OnlineUser::new(&user.username, user.role.as_str()))
            .await;
    }

    let bus = state.bus.clone();
    let presence = state.presence.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => {
                    let reply = handle_client_message(&bus, &presence, id, &text).await;
                    if control_tx.send(reply).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    if module.is_none() {
        state.presence.leave(id).await;
    }
    state.bus.unsubscribe_all(id).await;
    info!("🔌 {} desconectado de {}", user.username, topic);
}

fn control_frame(message: &ServerMessage) -> Option<String> {
    serde_json::to_string(message).ok()
}

/// Envía un frame con límite de tiempo; `false` si hay que cerrar la conexión
async fn send_frame<S>(sink: &mut S, frame: Message, send_timeout: Duration) -> bool
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    match tokio::time::timeout(send_timeout, sink.send(frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!("🔌 Error enviando frame: {}", e);
            false
        }
        Err(_) => {
            warn!("⚠️ Cliente WebSocket sin leer por {:?}; se cierra", send_timeout);
            false
        }
    }
}

async fn handle_client_message(
    bus: &NotificationBus,
    presence: &PresenceRegistry,
    id: SubscriberId,
    text: &str,
) -> ServerMessage {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            return ServerMessage::Error {
                message: format!("Mensaje inválido: {}", e),
            }
        }
    };

    match message {
        ClientMessage::Ping => ServerMessage::Pong {
            timestamp: Utc::now(),
        },
        ClientMessage::Subscribe { tramite_id } => {
            match bus.subscribe(Topic::Record(tramite_id), id).await {
                Ok(()) => ServerMessage::Subscribed {
                    tramite_id,
                    timestamp: Utc::now(),
                },
                Err(e) => ServerMessage::Error {
                    message: e.to_string(),
                },
            }
        }
        ClientMessage::Unsubscribe { tramite_id } => {
            bus.unsubscribe(Topic::Record(tramite_id), id).await;
            ServerMessage::Unsubscribed {
                tramite_id,
                timestamp: Utc::now(),
            }
        }
        ClientMessage::GetConnectedUsers => {
            let users = presence.users().await;
            ServerMessage::UsersUpdate {
                total: users.len(),
                users,
                timestamp: Utc::now(),
            }
        }
    }
}
