use fieldstock_core::{BusinessId, UserId};
use fieldstock_infra::{Config, InventoryPolicy};
use fieldstock_inventory::MovementType;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{Value, json};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(config: Config) -> Self {
        fieldstock_observability::init_for_tests();

        // Same router as prod, bound to an ephemeral port.
        let app = fieldstock_api::app::build_app(config);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A client bound to one business (and optionally one acting user).
struct Session {
    client: reqwest::Client,
    base_url: String,
    business_id: BusinessId,
    user_id: Option<UserId>,
}

impl Session {
    fn new(srv: &TestServer, business_id: BusinessId) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: srv.base_url.clone(),
            business_id,
            user_id: None,
        }
    }

    fn as_user(&self, user_id: UserId) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            business_id: self.business_id,
            user_id: Some(user_id),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header("X-Business-Id", self.business_id.to_string());
        if let Some(user) = self.user_id {
            req = req.header("X-User-Id", user.to_string());
        }
        req
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let res = self.request(reqwest::Method::GET, path).send().await.unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .request(reqwest::Method::POST, path)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn put(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .request(reqwest::Method::PUT, path)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }
}

fn decimal(v: &Value) -> Decimal {
    match v {
        Value::String(s) => s.parse().unwrap(),
        other => other.to_string().parse().unwrap(),
    }
}

async fn create_product(s: &Session, sku: &str, reorder_point: i64) -> String {
    let (status, body) = s
        .post(
            "/products",
            json!({
                "sku": sku,
                "name": format!("Part {sku}"),
                "costing_method": "weighted_average",
                "reorder_point": reorder_point,
                "reorder_quantity": 12,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["product_id"].as_str().unwrap().to_string()
}

async fn register_supplier(s: &Session) -> String {
    let (status, body) = s
        .post(
            "/suppliers",
            json!({ "name": "Coastal HVAC Supply", "payment_terms": "net 30" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_is_public_and_domain_routes_need_a_business() {
    let srv = TestServer::spawn(Config::default()).await;
    let client = reqwest::Client::new();

    let res = client.get(format!("{}/health", srv.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.get(format!("{}/products", srv.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "missing_business");

    let res = client
        .get(format!("{}/products", srv.base_url))
        .header("X-Business-Id", "not-a-uuid")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn weighted_average_costing_over_http() {
    let srv = TestServer::spawn(Config::default()).await;
    let s = Session::new(&srv, BusinessId::new());
    let product_id = create_product(&s, "TXV-3T", 0).await;

    for cost in ["5", "7"] {
        let (status, body) = s
            .post(
                &format!("/products/{product_id}/movements"),
                json!({ "movement_type": "purchase", "quantity": 10, "unit_cost": cost }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
    }

    let (status, product) = s.get(&format!("/products/{product_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(product["current_stock"], 20);
    assert_eq!(decimal(&product["weighted_average_cost"]), dec!(6));

    let (_, ledger) = s.get(&format!("/products/{product_id}/movements")).await;
    assert_eq!(ledger["replayed_stock"], 20);
    assert_eq!(ledger["movements"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn oversized_purchase_and_idle_costing_change_are_refused() {
    let srv = TestServer::spawn(Config::default()).await;
    let s = Session::new(&srv, BusinessId::new());
    let product_id = create_product(&s, "CMP-4T", 0).await;

    let (status, body) = s
        .post(
            &format!("/products/{product_id}/movements"),
            json!({ "movement_type": "purchase", "quantity": 9_000_000_000_000_000_000i64, "unit_cost": "10000000000" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let path = format!("/products/{product_id}/costing-method");
    let (status, body) = s.put(&path, json!({ "costing_method": "weighted_average" })).await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    let (status, body) = s
        .put(&path, json!({ "costing_method": "weighted_average", "recost": true }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn overdrawing_sale_is_rejected_with_invalid_movement() {
    let srv = TestServer::spawn(Config::default()).await;
    let s = Session::new(&srv, BusinessId::new());
    let product_id = create_product(&s, "CAP-45", 0).await;
    s.post(
        &format!("/products/{product_id}/movements"),
        json!({ "movement_type": "purchase", "quantity": 3, "unit_cost": "2.50" }),
    )
    .await;

    let (status, body) = s
        .post(
            &format!("/products/{product_id}/movements"),
            json!({ "movement_type": "sale", "quantity": -5 }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "invalid_movement");

    let (_, product) = s.get(&format!("/products/{product_id}")).await;
    assert_eq!(product["current_stock"], 3);
}

#[tokio::test]
async fn reversal_restores_stock_and_cannot_repeat() {
    let srv = TestServer::spawn(Config::default()).await;
    let s = Session::new(&srv, BusinessId::new());
    let product_id = create_product(&s, "FUSE-30", 0).await;
    let (_, posted) = s
        .post(
            &format!("/products/{product_id}/movements"),
            json!({ "movement_type": "purchase", "quantity": 8, "unit_cost": "1.25" }),
        )
        .await;
    let movement_id = posted["movement"]["movement_id"].as_str().unwrap().to_string();

    let (status, body) = s
        .post(&format!("/movements/{movement_id}/reverse"), json!({ "reason": "keyed twice" }))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["product"]["current_stock"], 0);

    let (status, body) = s
        .post(&format!("/movements/{movement_id}/reverse"), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_reversed");

    let (_, original) = s.get(&format!("/movements/{movement_id}")).await;
    assert_eq!(original["is_reversed"], true);
}

#[tokio::test]
async fn configured_types_wait_for_approval() {
    let config = Config {
        policy: InventoryPolicy::new([MovementType::Damage]),
        ..Config::default()
    };
    let srv = TestServer::spawn(config).await;
    let s = Session::new(&srv, BusinessId::new());
    let product_id = create_product(&s, "COIL-A", 0).await;
    s.post(
        &format!("/products/{product_id}/movements"),
        json!({ "movement_type": "purchase", "quantity": 6, "unit_cost": "40" }),
    )
    .await;

    let (status, pending) = s
        .post(
            &format!("/products/{product_id}/movements"),
            json!({ "movement_type": "damage", "quantity": -2 }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(pending["movement"]["requires_approval"], true);
    assert_eq!(pending["product"]["current_stock"], 6);
    let movement_id = pending["movement"]["movement_id"].as_str().unwrap().to_string();

    let (status, body) = s.post(&format!("/movements/{movement_id}/approve"), json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "missing_user");

    let manager = s.as_user(UserId::new());
    let (status, approved) = manager
        .post(&format!("/movements/{movement_id}/approve"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK, "{approved}");
    assert_eq!(approved["product"]["current_stock"], 4);
    assert_eq!(approved["movement"]["is_approved"], true);
}

#[tokio::test]
async fn two_level_approval_then_partial_receiving() {
    let srv = TestServer::spawn(Config::default()).await;
    let s = Session::new(&srv, BusinessId::new());
    let product_id = create_product(&s, "CONDENSER-3T", 0).await;
    let supplier_id = register_supplier(&s).await;

    let (status, order) = s
        .post(
            "/purchase-orders",
            json!({
                "supplier_id": supplier_id,
                "order_number": "PO-1001",
                "order_date": "2024-03-01",
                "expected_delivery_date": "2024-03-10",
                "required_approval_levels": 2,
                "lines": [
                    { "product_id": product_id, "quantity_ordered": 10, "unit_cost": "5.00" }
                ]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    let order_id = order["order_id"].as_str().unwrap().to_string();
    let line_id = order["lines"][0]["line_id"].as_str().unwrap().to_string();

    let (first, second) = (UserId::new(), UserId::new());
    let (status, _) = s
        .post(
            &format!("/purchase-orders/{order_id}/submit"),
            json!({ "assignments": [
                { "level": 1, "approver_id": first.to_string() },
                { "level": 2, "approver_id": second.to_string() }
            ]}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = s.as_user(first).post(&format!("/purchase-orders/{order_id}/approve"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["approval_status"], "pending");

    let (status, body) = s.post(&format!("/purchase-orders/{order_id}/send"), json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "approval_pending");

    let (_, body) = s.as_user(second).post(&format!("/purchase-orders/{order_id}/approve"), json!({})).await;
    assert_eq!(body["approval_status"], "approved");
    let (status, body) = s.post(&format!("/purchase-orders/{order_id}/send"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "sent");

    let receive = format!("/purchase-orders/{order_id}/lines/{line_id}/receive");
    let (status, body) = s.post(&receive, json!({ "quantity": 6, "received_on": "2024-03-08" })).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["order"]["status"], "partially_received");
    assert_eq!(body["product"]["current_stock"], 6);

    let (status, body) = s.post(&receive, json!({ "quantity": 5 })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "over_receipt");

    let (status, body) = s.post(&receive, json!({ "quantity": 4, "received_on": "2024-03-09" })).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["is_fully_received"], true);
    assert_eq!(body["order"]["status"], "received");

    let (_, product) = s.get(&format!("/products/{product_id}")).await;
    assert_eq!(product["current_stock"], 10);

    let (status, closed) = s.post(&format!("/purchase-orders/{order_id}/close"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{closed}");
    assert_eq!(closed["order"]["status"], "closed");

    let (_, supplier) = s.get(&format!("/suppliers/{supplier_id}")).await;
    assert_eq!(supplier["performance"]["orders_closed"], 1);
    assert_eq!(supplier["performance"]["performance_grade"], "A");

    let (_, received) = s.get("/purchase-orders?status=closed").await;
    assert_eq!(received.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn businesses_never_see_each_other() {
    let srv = TestServer::spawn(Config::default()).await;
    let a = Session::new(&srv, BusinessId::new());
    let b = Session::new(&srv, BusinessId::new());

    let product_id = create_product(&a, "SHARED-SKU", 0).await;
    create_product(&b, "SHARED-SKU", 0).await;

    let (status, _) = b.get(&format!("/products/{product_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = a
        .post("/products", json!({ "sku": "shared-sku", "name": "dup" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (_, listed) = b.get("/products").await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
}
