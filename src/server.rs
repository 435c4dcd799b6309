use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::book::stream::ChannelState;
use crate::book::types::{Side, StreamMessage};
use crate::error::BookError;
use crate::session::{BookSession, SessionStats};

pub type SharedSession = Arc<BookSession>;

/// Read and write surface for the presentation layer.
pub fn router(session: SharedSession) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/book", get(get_book))
        .route("/book/refresh", post(refresh_book))
        .route("/orders", post(submit_order))
        .route("/stats", get(get_stats))
        .route("/ws", get(ws_handler))
        .with_state(session)
}

impl IntoResponse for BookError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            BookError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            BookError::Transport(_) => (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR"),
            BookError::Format(_) => (StatusCode::BAD_GATEWAY, "FORMAT_ERROR"),
            BookError::ChannelExhausted { .. } | BookError::AlreadySubscribed => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let body = Json(json!({
            "error": code,
            "message": self.to_string()
        }));

        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct BookQuery {
    view: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitOrder {
    order_type: Side,
    price: f64,
    amount: f64,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    stats: SessionStats,
    channel: ChannelState,
}

async fn health_check() -> &'static str {
    "OK"
}

async fn get_book(
    State(session): State<SharedSession>,
    Query(query): Query<BookQuery>,
) -> Response {
    let book = session.current_book().await;
    match query.view.as_deref() {
        Some("price") => Json(book.by_price_priority()).into_response(),
        _ => Json(book.as_ref().clone()).into_response(),
    }
}

async fn refresh_book(State(session): State<SharedSession>) -> Result<impl IntoResponse, BookError> {
    let book = session.refresh().await?;
    Ok(Json(book.as_ref().clone()))
}

async fn submit_order(
    State(session): State<SharedSession>,
    Json(request): Json<SubmitOrder>,
) -> Result<impl IntoResponse, BookError> {
    let id = session
        .submit(request.order_type, request.price, request.amount)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn get_stats(State(session): State<SharedSession>) -> impl IntoResponse {
    Json(StatsResponse {
        stats: session.stats().await,
        channel: session.channel_state(),
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(session): State<SharedSession>,
) -> impl IntoResponse {
    info!("👤 New viewer connecting...");
    ws.on_upgrade(|socket| handle_socket(socket, session))
}

async fn handle_socket(mut socket: WebSocket, session: SharedSession) {
    info!("✅ Viewer connected");
    let mut rx = session.updates();

    loop {
        tokio::select! {
            update = rx.recv() => match update {
                Ok(order) => {
                    let frame = StreamMessage::NewOrder { order };
                    if let Ok(json) = serde_json::to_string(&frame) {
                        if socket.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Viewer lagging behind, skipped updates");
                }
                Err(RecvError::Closed) => break,
            },

            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {
                    // Pings are answered by the socket; viewers send nothing else
                }
                Some(Err(e)) => {
                    debug!("Viewer socket error: {}", e);
                    break;
                }
            },
        }
    }

    // Flushes the close reply queued by the socket
    let _ = socket.close().await;
    info!("❌ Viewer disconnected");
}
