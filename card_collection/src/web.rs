//! HTTP API for the collection service
//!
//! - `POST /analyze` (multipart: `user_clerk_id`, `file`)
//! - `DELETE /delete_card?user_clerk_id=..&card_name=..`
//! - `GET /cards?user_clerk_id=..`

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::collection::{Collection, CollectionService, DetectionOutcome};
use crate::error::{CollectionError, Result};

/// Default cap on upload size (10 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

type AppState = Arc<CollectionService>;

#[derive(Debug, Deserialize)]
struct UserParams {
    user_clerk_id: String,
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    user_clerk_id: String,
    card_name: String,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: String,
}

/// POST /analyze
async fn analyze_handler(
    State(service): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<DetectionOutcome>> {
    let mut user: Option<String> = None;
    let mut file: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CollectionError::Multipart(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "user_clerk_id" => {
                user = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| CollectionError::Multipart(e.to_string()))?,
                );
            }
            "file" => {
                file = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| CollectionError::Multipart(e.to_string()))?
                        .to_vec(),
                );
            }
            other => log::debug!("Ignoring multipart field {:?}", other),
        }
    }

    let user = user.ok_or(CollectionError::MissingField("user_clerk_id"))?;
    let file = file.ok_or(CollectionError::MissingField("file"))?;

    let outcome = service.record_detection(&user, &file).await?;
    Ok(Json(outcome))
}

/// DELETE /delete_card
async fn delete_card_handler(
    State(service): State<AppState>,
    Query(params): Query<DeleteParams>,
) -> Result<Json<MessageResponse>> {
    let message = service
        .remove_ownership(&params.user_clerk_id, &params.card_name)
        .await?;
    Ok(Json(MessageResponse { message }))
}

/// GET /cards
async fn cards_handler(
    State(service): State<AppState>,
    Query(params): Query<UserParams>,
) -> Result<Json<Collection>> {
    Ok(Json(service.list_ownership(&params.user_clerk_id).await?))
}

/// Build the web server router
pub fn create_router(service: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/analyze", post(analyze_handler))
        .route("/delete_card", delete(delete_card_handler))
        .route("/cards", get(cards_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(service)
}

/// Start the web server (async)
///
/// Binds to 0.0.0.0 (all interfaces) to work with Docker port mapping.
pub async fn serve(router: Router, port: u16) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{}", port);

    log::info!("Collection API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await
}
