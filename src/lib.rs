use std::sync::Arc;

use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method,
    },
    routing::{get, post},
    Extension, Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

pub mod auth;
pub mod config;
pub mod database;
pub mod email;
pub mod error;
pub mod handlers;
pub mod processor;
pub mod stripe_webhook;
pub mod workflows;

use auth::AuthVerifier;
use config::Config;
use database::RecordStore;
use email::Mailer;
use processor::PaymentProcessor;

/// Everything a request handler needs. Cheap to clone; each collaborator sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn RecordStore>,
    pub processor: Arc<dyn PaymentProcessor>,
    pub auth: Arc<dyn AuthVerifier>,
    pub mailer: Arc<dyn Mailer>,
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("apikey"),
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("stripe-signature"),
        ]);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(
            origins.iter().filter_map(|o| o.parse::<HeaderValue>().ok()),
        ))
    }
}

/// Routes behind CORS and request tracing. The CORS layer answers every
/// OPTIONS request itself.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);
    Router::new()
        .route("/health", get(handlers::health_handler))
        .route(
            "/stripe-payments",
            get(handlers::payments_get_handler).post(handlers::payments_post_handler),
        )
        .route("/stripe-webhook", post(stripe_webhook::webhook_handler))
        .route("/send-email", post(handlers::send_email_handler))
        .layer(Extension(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
