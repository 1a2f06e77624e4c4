use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use chrono::Utc;

use fieldstock_infra::services::ledger::written_movement;
use fieldstock_infra::{DispatchError, Dispatched};
use fieldstock_inventory::{
    ChangeCostingMethod, CostingMethod, CreateProduct, DeactivateProduct, MovementId, MovementReference,
    PostMovement, Product, ProductId, RecountStock, ReleaseReservation, ReserveStock, UpdateReorderSettings,
};

use crate::app::dto::{self, PostingResponse, ProductSnapshot};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::{ActorContext, BusinessContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_product).get(list_products))
        .route("/reorder-candidates", get(reorder_candidates))
        .route("/:id", get(get_product))
        .route("/:id/movements", post(post_movement).get(list_movements))
        .route("/:id/recount", post(recount_stock))
        .route("/:id/reserve", post(reserve_stock))
        .route("/:id/release", post(release_reservation))
        .route("/:id/reorder-settings", put(update_reorder_settings))
        .route("/:id/costing-method", put(change_costing_method))
        .route("/:id/deactivate", post(deactivate_product))
}

fn posting_response(status: StatusCode, dispatched: Result<Dispatched<Product>, DispatchError>) -> axum::response::Response {
    match dispatched {
        Ok(d) => (
            status,
            Json(PostingResponse {
                movement: written_movement(&d.events).cloned(),
                product: ProductSnapshot::from(&d.aggregate),
            }),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Json(body): Json<dto::CreateProductRequest>,
) -> axum::response::Response {
    let costing_method = match body.costing_method.as_deref() {
        Some(raw) => match errors::parse_field::<CostingMethod>(raw) {
            Ok(m) => m,
            Err(resp) => return resp,
        },
        None => CostingMethod::default(),
    };

    let cmd = CreateProduct {
        business_id: business.business_id(),
        product_id: ProductId::generate(),
        sku: body.sku,
        name: body.name,
        costing_method,
        standard_cost: body.standard_cost,
        reorder_point: body.reorder_point,
        reorder_quantity: body.reorder_quantity,
        occurred_at: Utc::now(),
    };

    match services.run(|| services.ledger.create_product(cmd.clone())) {
        Ok(d) => (StatusCode::CREATED, Json(ProductSnapshot::from(&d.aggregate))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
) -> axum::response::Response {
    Json(services.ledger.products(business.business_id())).into_response()
}

pub async fn reorder_candidates(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
) -> axum::response::Response {
    Json(services.ledger.reorder_candidates(business.business_id())).into_response()
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.ledger.product(business.business_id(), product_id) {
        Some(rm) => Json(rm).into_response(),
        None => errors::not_found("product"),
    }
}

pub async fn post_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::PostMovementRequest>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let movement_type = match errors::parse_field(&body.movement_type) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let cost_lot = match body.cost_lot.as_deref().map(|raw| errors::parse_id::<MovementId>(raw, "cost lot")) {
        Some(Ok(lot)) => Some(lot),
        Some(Err(resp)) => return resp,
        None => None,
    };

    let cmd = PostMovement {
        business_id: business.business_id(),
        product_id,
        movement_id: MovementId::generate(),
        movement_type,
        quantity: body.quantity,
        unit_cost: body.unit_cost,
        cost_lot,
        reference: body
            .reference_type
            .map(|t| MovementReference::new(t, body.reference_id)),
        requires_approval: body.requires_approval,
        posted_by: actor.user_id(),
        notes: body.notes,
        occurred_at: Utc::now(),
    };

    posting_response(
        StatusCode::CREATED,
        services.run(|| services.ledger.post_movement(cmd.clone())),
    )
}

pub async fn list_movements(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let business_id = business.business_id();
    if services.ledger.product(business_id, product_id).is_none() {
        return errors::not_found("product");
    }
    Json(serde_json::json!({
        "product_id": product_id.to_string(),
        "replayed_stock": services.ledger.replay_stock(business_id, product_id),
        "movements": services.ledger.movements_for_product(business_id, product_id),
    }))
    .into_response()
}

pub async fn recount_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RecountRequest>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = RecountStock {
        business_id: business.business_id(),
        product_id,
        movement_id: MovementId::generate(),
        counted_quantity: body.counted_quantity,
        requires_approval: body.requires_approval,
        posted_by: actor.user_id(),
        notes: body.notes,
        occurred_at: Utc::now(),
    };
    posting_response(
        StatusCode::CREATED,
        services.run(|| services.ledger.recount_stock(cmd.clone())),
    )
}

pub async fn reserve_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::QuantityRequest>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = ReserveStock {
        business_id: business.business_id(),
        product_id,
        quantity: body.quantity,
        occurred_at: Utc::now(),
    };
    posting_response(StatusCode::OK, services.run(|| services.ledger.reserve_stock(cmd.clone())))
}

pub async fn release_reservation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::QuantityRequest>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = ReleaseReservation {
        business_id: business.business_id(),
        product_id,
        quantity: body.quantity,
        occurred_at: Utc::now(),
    };
    posting_response(
        StatusCode::OK,
        services.run(|| services.ledger.release_reservation(cmd.clone())),
    )
}

pub async fn update_reorder_settings(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReorderSettingsRequest>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = UpdateReorderSettings {
        business_id: business.business_id(),
        product_id,
        reorder_point: body.reorder_point,
        reorder_quantity: body.reorder_quantity,
        occurred_at: Utc::now(),
    };
    posting_response(
        StatusCode::OK,
        services.run(|| services.ledger.update_reorder_settings(cmd.clone())),
    )
}

pub async fn change_costing_method(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::CostingMethodRequest>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let costing_method = match errors::parse_field(&body.costing_method) {
        Ok(m) => m,
        Err(resp) => return resp,
    };
    let cmd = ChangeCostingMethod {
        business_id: business.business_id(),
        product_id,
        costing_method,
        standard_cost: body.standard_cost,
        opening_lot_id: MovementId::generate(),
        recost: body.recost,
        occurred_at: Utc::now(),
    };
    posting_response(
        StatusCode::OK,
        services.run(|| services.ledger.change_costing_method(cmd.clone())),
    )
}

pub async fn deactivate_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = DeactivateProduct {
        business_id: business.business_id(),
        product_id,
        occurred_at: Utc::now(),
    };
    posting_response(
        StatusCode::OK,
        services.run(|| services.ledger.deactivate_product(cmd.clone())),
    )
}
