use crate::error::ApiError;
use crate::handlers::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use vigil_notify::Subscriber;

pub async fn create_subscriber(
    State(state): State<AppState>,
    Json(subscriber): Json<Subscriber>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if subscriber.name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "subscriber name must not be empty".to_string(),
        ));
    }
    if subscriber.addresses.is_empty() {
        return Err(ApiError::BadRequest(
            "subscriber must have at least one channel address".to_string(),
        ));
    }
    let subscriber_id = state.subscribers.save(subscriber).await;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "subscriber_id": subscriber_id })),
    ))
}

pub async fn list_subscribers(State(state): State<AppState>) -> Json<Vec<Subscriber>> {
    Json(state.subscribers.list().await)
}

pub async fn get_subscriber(
    State(state): State<AppState>,
    Path(subscriber_id): Path<String>,
) -> Result<Json<Subscriber>, ApiError> {
    state
        .subscribers
        .get(&subscriber_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Subscriber {} not found", subscriber_id)))
}

pub async fn delete_subscriber(
    State(state): State<AppState>,
    Path(subscriber_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.subscribers.delete(&subscriber_id).await {
        return Err(ApiError::NotFound(format!(
            "Subscriber {} not found",
            subscriber_id
        )));
    }
    Ok(Json(serde_json::json!({
        "message": "Subscriber deleted",
        "subscriber_id": subscriber_id,
    })))
}
