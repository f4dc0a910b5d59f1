#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use spiderd_api::config::ServerConfig;
use spiderd_api::routes;
use spiderd_api::state::AppState;
use spiderd_worker::dispatcher::TaskDispatcher;
use spiderd_worker::logs::LogGateway;
use spiderd_worker::store::{JobStore, PgJobStore};
use spiderd_worker::testing::{FakeDriver, MemoryCommandQueue};

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        command_max_attempts: 2,
    }
}

/// A pool that never connects unless a handler touches the database.
pub fn lazy_pool() -> PgPool {
    PgPoolOptions::new()
        .acquire_timeout(Duration::from_secs(1))
        .connect_lazy("postgres://localhost/spiderd_test")
        .unwrap()
}

/// The app plus the in-memory collaborators behind it.
pub struct TestApp {
    pub router: Router,
    pub driver: Arc<FakeDriver>,
    pub queue: Arc<MemoryCommandQueue>,
}

impl TestApp {
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

/// App over a real database, with a fake engine and an in-memory queue.
pub fn build_test_app(pool: PgPool) -> TestApp {
    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    build_test_app_with_store(pool, store)
}

/// App whose log gateway reads jobs from `store`.
pub fn build_test_app_with_store(pool: PgPool, store: Arc<dyn JobStore>) -> TestApp {
    let driver = Arc::new(FakeDriver::default());
    let queue = Arc::new(MemoryCommandQueue::default());
    let config = test_config();

    let state = AppState {
        pool,
        dispatcher: TaskDispatcher::new(queue.clone(), config.command_max_attempts),
        logs: LogGateway::new(store, driver.clone()),
        driver: driver.clone(),
    };

    let cors = CorsLayer::new()
        .allow_origin(["http://localhost:5173".parse().unwrap()])
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::PATCH])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    let request_id_header = HeaderName::from_static("x-request-id");

    let router = Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes())
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .with_state(state);

    TestApp {
        router,
        driver,
        queue,
    }
}

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn delete(app: Router, uri: &str) -> Response {
    app.oneshot(Request::delete(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn send_json(
    app: Router,
    method: Method,
    uri: &str,
    body: serde_json::Value,
) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
