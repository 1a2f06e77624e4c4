use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use fieldstock_infra::services::ledger::written_movement;
use fieldstock_inventory::{ApproveMovement, MovementId, ProductId, ReverseMovement};

use crate::app::dto::{self, PostingResponse, ProductSnapshot};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::{ActorContext, BusinessContext};

pub fn router() -> Router {
    Router::new()
        .route("/:id", get(get_movement))
        .route("/:id/approve", post(approve_movement))
        .route("/:id/reverse", post(reverse_movement))
}

/// Movement id from the path, plus the product it was posted against.
fn locate(
    services: &AppServices,
    business: BusinessContext,
    id: &str,
) -> Result<(MovementId, ProductId), axum::response::Response> {
    let movement_id: MovementId = errors::parse_id(id, "movement id")?;
    services
        .ledger
        .movement(business.business_id(), movement_id)
        .map(|entry| (movement_id, entry.movement.product_id))
        .ok_or_else(|| errors::not_found("movement"))
}

pub async fn get_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let movement_id: MovementId = match errors::parse_id(&id, "movement id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.ledger.movement(business.business_id(), movement_id) {
        Some(entry) => Json(entry).into_response(),
        None => errors::not_found("movement"),
    }
}

pub async fn approve_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let (movement_id, product_id) = match locate(&services, business, &id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(approver_id) = actor.user_id() else {
        return errors::json_error(StatusCode::BAD_REQUEST, "missing_user", "X-User-Id header is required to approve");
    };

    let cmd = ApproveMovement {
        business_id: business.business_id(),
        product_id,
        movement_id,
        approver_id,
        occurred_at: Utc::now(),
    };
    match services.run(|| services.ledger.approve_movement(cmd.clone())) {
        Ok(d) => {
            let movement = services
                .ledger
                .movement(business.business_id(), movement_id)
                .map(|e| e.movement);
            Json(PostingResponse {
                movement,
                product: ProductSnapshot::from(&d.aggregate),
            })
            .into_response()
        }
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn reverse_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReverseMovementRequest>,
) -> axum::response::Response {
    let (movement_id, product_id) = match locate(&services, business, &id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = ReverseMovement {
        business_id: business.business_id(),
        product_id,
        movement_id,
        reversal_id: MovementId::generate(),
        reason: body.reason.unwrap_or_else(|| "reversed".to_string()),
        posted_by: actor.user_id(),
        occurred_at: Utc::now(),
    };
    match services.run(|| services.ledger.reverse_movement(cmd.clone())) {
        Ok(d) => (
            StatusCode::CREATED,
            Json(PostingResponse {
                movement: written_movement(&d.events).cloned(),
                product: ProductSnapshot::from(&d.aggregate),
            }),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
