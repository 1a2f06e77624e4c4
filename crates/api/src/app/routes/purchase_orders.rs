use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use chrono::Utc;

use fieldstock_infra::{DispatchError, Dispatched};
use fieldstock_inventory::{MovementId, ProductId};
use fieldstock_purchasing::{
    AddLineItem, ApprovalAssignment, ApprovePurchaseOrder, CancelPurchaseOrder, ClosePurchaseOrder,
    ConfirmPurchaseOrder, CreatePurchaseOrder, LineItemId, PurchaseOrder, PurchaseOrderId, ReceiveLineItem,
    RejectPurchaseOrder, RemoveLineItem, SendPurchaseOrder, SetCharges, SubmitForApproval, SupplierId,
    UpdateLineItem,
};

use crate::app::dto::{self, OrderSnapshot, ReceiptResponse};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::{ActorContext, BusinessContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_purchase_order).get(list_purchase_orders))
        .route("/:id", get(get_purchase_order))
        .route("/:id/lines", post(add_line_item))
        .route("/:id/lines/:line_id", put(update_line_item).delete(remove_line_item))
        .route("/:id/lines/:line_id/receive", post(receive_line_item))
        .route("/:id/charges", put(set_charges))
        .route("/:id/submit", post(submit_for_approval))
        .route("/:id/approve", post(approve_purchase_order))
        .route("/:id/reject", post(reject_purchase_order))
        .route("/:id/send", post(send_purchase_order))
        .route("/:id/confirm", post(confirm_purchase_order))
        .route("/:id/cancel", post(cancel_purchase_order))
        .route("/:id/close", post(close_purchase_order))
}

fn order_response(status: StatusCode, result: Result<Dispatched<PurchaseOrder>, DispatchError>) -> axum::response::Response {
    match result {
        Ok(d) => (status, Json(OrderSnapshot::from(&d.aggregate))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

fn require_user(actor: ActorContext, action: &str) -> Result<fieldstock_core::UserId, axum::response::Response> {
    actor.user_id().ok_or_else(|| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "missing_user",
            format!("X-User-Id header is required to {action}"),
        )
    })
}

fn add_line_command(
    business: BusinessContext,
    order_id: PurchaseOrderId,
    line: dto::PurchaseOrderLineRequest,
) -> Result<AddLineItem, axum::response::Response> {
    let product_id: ProductId = errors::parse_id(&line.product_id, "product id")?;
    Ok(AddLineItem {
        business_id: business.business_id(),
        order_id,
        line_id: LineItemId::generate(),
        product_id,
        description: line.description,
        quantity_ordered: line.quantity_ordered,
        unit_cost: line.unit_cost,
        occurred_at: Utc::now(),
    })
}

pub async fn create_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Json(body): Json<dto::CreatePurchaseOrderRequest>,
) -> axum::response::Response {
    let supplier_id: SupplierId = match errors::parse_id(&body.supplier_id, "supplier_id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let order_id = PurchaseOrderId::generate();

    // 1) Create order
    let cmd = CreatePurchaseOrder {
        business_id: business.business_id(),
        order_id,
        supplier_id,
        order_number: body.order_number,
        order_date: body.order_date,
        expected_delivery_date: body.expected_delivery_date,
        required_approval_levels: body.required_approval_levels,
        notes: body.notes,
        occurred_at: Utc::now(),
    };
    let mut last = match services.run(|| services.procurement.create_purchase_order(cmd.clone())) {
        Ok(d) => d,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    // 2) Add lines
    for line in body.lines {
        let add = match add_line_command(business, order_id, line) {
            Ok(c) => c,
            Err(resp) => return resp,
        };
        last = match services.run(|| services.procurement.add_line_item(add.clone())) {
            Ok(d) => d,
            Err(e) => return errors::dispatch_error_to_response(e),
        };
    }

    (StatusCode::CREATED, Json(OrderSnapshot::from(&last.aggregate))).into_response()
}

pub async fn list_purchase_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Query(query): Query<dto::PurchaseOrderQuery>,
) -> axum::response::Response {
    Json(
        services
            .procurement
            .purchase_orders(business.business_id(), query.status),
    )
    .into_response()
}

pub async fn get_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id: PurchaseOrderId = match errors::parse_id(&id, "purchase order id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.procurement.purchase_order(business.business_id(), order_id) {
        Some(rm) => Json(rm).into_response(),
        None => errors::not_found("purchase order"),
    }
}

pub async fn add_line_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::PurchaseOrderLineRequest>,
) -> axum::response::Response {
    let order_id: PurchaseOrderId = match errors::parse_id(&id, "purchase order id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = match add_line_command(business, order_id, body) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    order_response(
        StatusCode::CREATED,
        services.run(|| services.procurement.add_line_item(cmd.clone())),
    )
}

pub async fn update_line_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Path((id, line_id)): Path<(String, String)>,
    Json(body): Json<dto::UpdateLineRequest>,
) -> axum::response::Response {
    let (order_id, line_id) = match parse_line_path(&id, &line_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = UpdateLineItem {
        business_id: business.business_id(),
        order_id,
        line_id,
        quantity_ordered: body.quantity_ordered,
        unit_cost: body.unit_cost,
        occurred_at: Utc::now(),
    };
    order_response(
        StatusCode::OK,
        services.run(|| services.procurement.update_line_item(cmd.clone())),
    )
}

pub async fn remove_line_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Path((id, line_id)): Path<(String, String)>,
) -> axum::response::Response {
    let (order_id, line_id) = match parse_line_path(&id, &line_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = RemoveLineItem {
        business_id: business.business_id(),
        order_id,
        line_id,
        occurred_at: Utc::now(),
    };
    order_response(
        StatusCode::OK,
        services.run(|| services.procurement.remove_line_item(cmd.clone())),
    )
}

fn parse_line_path(id: &str, line_id: &str) -> Result<(PurchaseOrderId, LineItemId), axum::response::Response> {
    Ok((
        errors::parse_id(id, "purchase order id")?,
        errors::parse_id(line_id, "line item id")?,
    ))
}

pub async fn set_charges(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ChargesRequest>,
) -> axum::response::Response {
    let order_id: PurchaseOrderId = match errors::parse_id(&id, "purchase order id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = SetCharges {
        business_id: business.business_id(),
        order_id,
        tax_rate: body.tax_rate,
        shipping_amount: body.shipping_amount,
        occurred_at: Utc::now(),
    };
    order_response(StatusCode::OK, services.run(|| services.procurement.set_charges(cmd.clone())))
}

pub async fn submit_for_approval(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::SubmitForApprovalRequest>,
) -> axum::response::Response {
    let order_id: PurchaseOrderId = match errors::parse_id(&id, "purchase order id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let mut assignments = Vec::with_capacity(body.assignments.len());
    for a in body.assignments {
        match errors::parse_id(&a.approver_id, "approver id") {
            Ok(approver_id) => assignments.push(ApprovalAssignment {
                level: a.level,
                approver_id,
            }),
            Err(resp) => return resp,
        }
    }
    let cmd = SubmitForApproval {
        business_id: business.business_id(),
        order_id,
        assignments,
        occurred_at: Utc::now(),
    };
    order_response(
        StatusCode::OK,
        services.run(|| services.procurement.submit_for_approval(cmd.clone())),
    )
}

pub async fn approve_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::ApproveRequest>>,
) -> axum::response::Response {
    let order_id: PurchaseOrderId = match errors::parse_id(&id, "purchase order id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let approver_id = match require_user(actor, "approve") {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let cmd = ApprovePurchaseOrder {
        business_id: business.business_id(),
        order_id,
        approver_id,
        comments: body.comments,
        occurred_at: Utc::now(),
    };
    order_response(StatusCode::OK, services.run(|| services.procurement.approve(cmd.clone())))
}

pub async fn reject_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RejectRequest>,
) -> axum::response::Response {
    let order_id: PurchaseOrderId = match errors::parse_id(&id, "purchase order id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let approver_id = match require_user(actor, "reject") {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let cmd = RejectPurchaseOrder {
        business_id: business.business_id(),
        order_id,
        approver_id,
        reason: body.reason,
        occurred_at: Utc::now(),
    };
    order_response(StatusCode::OK, services.run(|| services.procurement.reject(cmd.clone())))
}

pub async fn send_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id: PurchaseOrderId = match errors::parse_id(&id, "purchase order id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = SendPurchaseOrder {
        business_id: business.business_id(),
        order_id,
        sent_by: actor.user_id(),
        occurred_at: Utc::now(),
    };
    order_response(StatusCode::OK, services.run(|| services.procurement.send(cmd.clone())))
}

pub async fn confirm_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::ConfirmRequest>>,
) -> axum::response::Response {
    let order_id: PurchaseOrderId = match errors::parse_id(&id, "purchase order id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let cmd = ConfirmPurchaseOrder {
        business_id: business.business_id(),
        order_id,
        expected_delivery_date: body.expected_delivery_date,
        occurred_at: Utc::now(),
    };
    order_response(StatusCode::OK, services.run(|| services.procurement.confirm(cmd.clone())))
}

pub async fn cancel_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::CancelRequest>>,
) -> axum::response::Response {
    let order_id: PurchaseOrderId = match errors::parse_id(&id, "purchase order id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let cmd = CancelPurchaseOrder {
        business_id: business.business_id(),
        order_id,
        reason: body.reason,
        occurred_at: Utc::now(),
    };
    order_response(StatusCode::OK, services.run(|| services.procurement.cancel(cmd.clone())))
}

pub async fn close_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id: PurchaseOrderId = match errors::parse_id(&id, "purchase order id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = ClosePurchaseOrder {
        business_id: business.business_id(),
        order_id,
        occurred_at: Utc::now(),
    };
    match services.run(|| services.procurement.close(cmd.clone())) {
        Ok(closed) => Json(serde_json::json!({
            "order": OrderSnapshot::from(&closed.order),
            "supplier_id": closed.supplier.id_typed().to_string(),
            "supplier_performance": closed.supplier.performance(),
        }))
        .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

/// Receive against one line: the line and the stock ledger move together.
pub async fn receive_line_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(business): Extension<BusinessContext>,
    Extension(actor): Extension<ActorContext>,
    Path((id, line_id)): Path<(String, String)>,
    Json(body): Json<dto::ReceiveRequest>,
) -> axum::response::Response {
    let (order_id, line_id) = match parse_line_path(&id, &line_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let now = Utc::now();
    let cmd = ReceiveLineItem {
        business_id: business.business_id(),
        order_id,
        line_id,
        quantity: body.quantity,
        unit_cost: body.unit_cost,
        movement_id: MovementId::generate(),
        received_on: body.received_on.unwrap_or_else(|| now.date_naive()),
        occurred_at: now,
    };
    match services.run(|| services.receiving.receive_line_item(cmd.clone(), actor.user_id())) {
        Ok(receipt) => (StatusCode::CREATED, Json(ReceiptResponse::from(&receipt))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
