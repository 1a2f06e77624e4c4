use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
};

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::BusinessContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Rebuild every read model of the caller's business from its event history.
pub async fn rebuild_read_models(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
) -> axum::response::Response {
    match services.backend().rebuild_read_models(business.business_id()) {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "business_id": business.business_id().to_string(),
                "rebuilt": true,
            })),
        )
            .into_response(),
        Err(e) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "rebuild_failed", e.to_string()),
    }
}
