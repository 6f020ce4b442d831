/// REST diagnostics handlers for the UART bridge
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use tracing::{error, info};

use crate::{
    api::dto::{CallbackCountResponse, CloseResponse, ErrorResponse, MuxRequest, SuccessResponse},
    app_state::AppState,
};

/// List every device slot
pub async fn list_uarts(State(state): State<AppState>) -> impl IntoResponse {
    let slots = state.devices().snapshot().await;
    (StatusCode::OK, Json(slots))
}

/// Ask the session bridged onto a device to end
pub async fn close_uart(
    State(state): State<AppState>,
    Path(device): Path<usize>,
) -> impl IntoResponse {
    info!("REST close request for UART {}", device);

    if device >= state.devices().device_count() {
        let error_response = ErrorResponse {
            error: true,
            message: format!("UART device not found: {}", device),
            code: Some(404),
        };
        return (StatusCode::NOT_FOUND, Json(json!(error_response)));
    }

    let was_open = state.bridge.close(device).await;
    (
        StatusCode::OK,
        Json(json!(CloseResponse { device, was_open })),
    )
}

/// Switch the B45/B67 line multiplexer
pub async fn set_mux(
    State(state): State<AppState>,
    Json(req): Json<MuxRequest>,
) -> impl IntoResponse {
    info!("REST mux request: {}", if req.on { "on" } else { "off" });

    match state.bridge.set_mux(req.on).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!(SuccessResponse {
                success: true,
                message: format!("Mux switched {}", if req.on { "on" } else { "off" }),
            })),
        ),
        Err(e) => {
            error!("REST mux request failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!(ErrorResponse {
                    error: true,
                    message: e.to_string(),
                    code: Some(500),
                })),
            )
        }
    }
}

/// Read and reset the receive-callback counter
pub async fn take_callbacks(State(state): State<AppState>) -> impl IntoResponse {
    let count = state.bridge.take_callback_count();
    (StatusCode::OK, Json(CallbackCountResponse { count }))
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(SuccessResponse {
            success: true,
            message: "Health check passed".to_string(),
        }),
    )
}
