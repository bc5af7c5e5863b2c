use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post},
};
use tracing::error;

use partyline_gateway::{ChannelHub, HubError};
use partyline_types::api::{ErrorResponse, SendMessageRequest, SendMessageResponse};
use partyline_types::events::InboundMessage;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn hub_error(e: HubError) -> ApiError {
    error!("Hub request failed: {:#}", anyhow::Error::from(e));
    api_error(StatusCode::SERVICE_UNAVAILABLE, "channel is unavailable, try again")
}

pub fn router(hub: ChannelHub) -> Router {
    Router::new()
        .route("/channels/{name}/messages", post(send_message))
        .route("/channels/{name}", delete(delete_channel))
        .with_state(hub)
}

/// Every reply comes back in the response; there is no push channel.
pub async fn send_message(
    State(hub): State<ChannelHub>,
    Path(name): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    if name.trim().is_empty() || req.sender.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "channel and sender are required"));
    }

    let message = InboundMessage {
        channel: name,
        sender: req.sender,
        text: req.text,
    };
    let outbound = hub
        .handle(message, chrono::Utc::now())
        .await
        .map_err(hub_error)?;

    Ok(Json(SendMessageResponse { outbound }))
}

pub async fn delete_channel(
    State(hub): State<ChannelHub>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    hub.delete_channel(&name).await.map_err(hub_error)?;
    Ok(StatusCode::NO_CONTENT)
}
