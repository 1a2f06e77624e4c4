use axum::{Router, routing::post};

pub mod movements;
pub mod products;
pub mod purchase_orders;
pub mod suppliers;
pub mod system;

/// Router for all business-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/admin/rebuild", post(system::rebuild_read_models))
        .nest("/products", products::router())
        .nest("/movements", movements::router())
        .nest("/suppliers", suppliers::router())
        .nest("/purchase-orders", purchase_orders::router())
}
