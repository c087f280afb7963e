use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use storefront_api::{
    app_router, auth, db,
    entities::{address, coupon, product},
    errors::ServiceError,
    events,
    gateway::{GatewayOrder, PaymentGateway},
    services::AppServices,
    AppConfig, AppState,
};
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const TEST_KEY_SECRET: &str = "rzp_test_key_secret";
pub const TEST_WEBHOOK_SECRET: &str = "rzp_test_webhook_secret";

/// Gateway double that hands out deterministic order ids without any
/// network traffic.
pub struct StubGateway {
    counter: AtomicU64,
}

impl StubGateway {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        _receipt: &str,
    ) -> Result<GatewayOrder, ServiceError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayOrder {
            id: format!("order_test_{n}"),
            amount: amount_minor,
            currency: currency.to_string(),
        })
    }
}

/// Helper harness for spinning up an application backed by an
/// in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub user_id: Uuid,
    token: String,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let cfg = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            host: "127.0.0.1".to_string(),
            port: 18_080,
            environment: "test".to_string(),
            log_level: "warn".to_string(),
            log_json: false,
            auto_migrate: true,
            jwt_secret: TEST_JWT_SECRET.to_string(),
            db_max_connections: 1,
            db_min_connections: 1,
            currency: "INR".to_string(),
            razorpay_key_id: "rzp_test_key_id".to_string(),
            razorpay_key_secret: TEST_KEY_SECRET.to_string(),
            razorpay_webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
            gateway_base_url: "http://127.0.0.1:0".to_string(),
            gateway_timeout_secs: 1,
        };

        let db_config = db::DbConfig {
            url: cfg.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let pool = db::establish_connection_with_config(&db_config)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_sender, event_rx) = events::event_channel(256);
        let event_sender = Arc::new(event_sender);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(StubGateway::new());
        let services = AppServices::new(db_arc.clone(), event_sender.clone(), gateway, &cfg);

        let user_id = Uuid::new_v4();
        let token =
            auth::issue_token(user_id, &cfg.jwt_secret, 1).expect("issue test bearer token");

        let state = AppState {
            db: db_arc,
            config: Arc::new(cfg),
            event_sender,
            services,
        };
        let router = app_router(state.clone());

        Self {
            router,
            state,
            user_id,
            token,
            _event_task: event_task,
        }
    }

    /// Access the bearer token for the default test user.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Issue a token for a different user.
    pub fn token_for(&self, user_id: Uuid) -> String {
        auth::issue_token(user_id, &self.state.config.jwt_secret, 1)
            .expect("issue test bearer token")
    }

    /// Issue a staff token carrying the admin role.
    pub fn admin_token(&self) -> String {
        auth::issue_admin_token(Uuid::new_v4(), &self.state.config.jwt_secret, 1)
            .expect("issue test admin token")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {tok}"));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Convenience helper for authenticated JSON requests.
    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(self.token())).await
    }

    /// Raw request with arbitrary headers, used by the webhook tests.
    pub async fn request_raw(
        &self,
        method: Method,
        uri: &str,
        body: Vec<u8>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = builder.body(Body::from(body)).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            sku: Set(format!("sku-{}", Uuid::new_v4())),
            price: Set(price),
            stock: Set(stock),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed product for tests")
    }

    pub async fn seed_address(&self, user_id: Uuid) -> address::Model {
        let now = Utc::now();
        address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            recipient: Set("Test Buyer".to_string()),
            line1: Set("1 Test Street".to_string()),
            line2: Set(None),
            city: Set("Mumbai".to_string()),
            state: Set(Some("MH".to_string())),
            postal_code: Set("400001".to_string()),
            country: Set("IN".to_string()),
            phone: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed address for tests")
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn seed_coupon(
        &self,
        code: &str,
        kind: coupon::CouponKind,
        value: Decimal,
        min_subtotal: Option<Decimal>,
        max_discount: Option<Decimal>,
        starts_at: Option<DateTime<Utc>>,
        ends_at: Option<DateTime<Utc>>,
    ) -> coupon::Model {
        let now = Utc::now();
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            kind: Set(kind),
            value: Set(value),
            min_subtotal: Set(min_subtotal),
            max_discount: Set(max_discount),
            starts_at: Set(starts_at),
            ends_at: Set(ends_at),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed coupon for tests")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Parses a JSON money field into a `Decimal`. Serialized scale varies
/// by backend, so tests compare parsed values rather than strings.
pub fn money(value: &Value) -> Decimal {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    text.parse()
        .unwrap_or_else(|_| panic!("not a money value: {value}"))
}

/// Reads a response body into JSON.
pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read response body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("response body is not valid json")
}
