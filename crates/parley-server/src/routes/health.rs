use crate::state::{AppState, ChatOptions};
use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

async fn handler(State(state): State<AppState>) -> Json<Value> {
    let selection = state.select_model(&ChatOptions::default());
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "provider": selection.provider,
        "model": selection.model,
    }))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handler))
        .with_state(state)
}
