use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use fieldstock_purchasing::{RegisterSupplier, SupplierId};

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::BusinessContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(register_supplier).get(list_suppliers))
        .route("/:id", get(get_supplier))
        .route("/:id/purchase-orders", get(list_supplier_orders))
}

pub async fn register_supplier(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Json(body): Json<dto::RegisterSupplierRequest>,
) -> axum::response::Response {
    let supplier_id = SupplierId::generate();
    let cmd = RegisterSupplier {
        business_id: business.business_id(),
        supplier_id,
        name: body.name,
        contact: body.contact,
        payment_terms: body.payment_terms,
        occurred_at: Utc::now(),
    };

    match services.run(|| services.procurement.register_supplier(cmd.clone())) {
        Ok(d) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "id": supplier_id.to_string(),
                "name": d.aggregate.name(),
            })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn list_suppliers(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
) -> axum::response::Response {
    Json(services.procurement.suppliers(business.business_id())).into_response()
}

pub async fn get_supplier(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let supplier_id: SupplierId = match errors::parse_id(&id, "supplier id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.procurement.supplier(business.business_id(), supplier_id) {
        Some(rm) => Json(rm).into_response(),
        None => errors::not_found("supplier"),
    }
}

pub async fn list_supplier_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let supplier_id: SupplierId = match errors::parse_id(&id, "supplier id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    Json(
        services
            .procurement
            .orders_for_supplier(business.business_id(), supplier_id),
    )
    .into_response()
}
