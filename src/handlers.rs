use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::Query,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::{
    auth::authenticate,
    email::{send_email, SendEmailRequest},
    error::AppError,
    workflows::{
        account_session, account_status, checkout, connect_account, payments, products,
        transfers,
    },
    AppState,
};

/// Operations reachable through the `action` field of `/stripe-payments`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreatePaymentIntent,
    CreateCheckoutSession,
    CreateConnectAccount,
    GetConnectAccountStatus,
    VerifyConnectAccount,
    CreateAccountSession,
    CreateProduct,
    UpdateProduct,
    DeleteProduct,
    ListProducts,
    TransferToConnect,
}

impl Action {
    pub fn parse(raw: &str) -> Option<Self> {
        let action = match raw {
            "create-payment-intent" => Self::CreatePaymentIntent,
            "create-checkout-session" => Self::CreateCheckoutSession,
            "create-connect-account" => Self::CreateConnectAccount,
            "get-connect-account-status" | "get-account-status" => Self::GetConnectAccountStatus,
            "verify-connect-account" => Self::VerifyConnectAccount,
            "create-account-session" => Self::CreateAccountSession,
            "create-product" => Self::CreateProduct,
            "update-product" => Self::UpdateProduct,
            "delete-product" => Self::DeleteProduct,
            "list-products" => Self::ListProducts,
            "transfer-to-connect" => Self::TransferToConnect,
            _ => return None,
        };
        Some(action)
    }

    /// Read-only actions that may also arrive as a GET with query parameters.
    pub fn allows_get(&self) -> bool {
        matches!(self, Self::GetConnectAccountStatus)
    }
}

fn parse_action(raw: Option<&str>) -> Result<Action, AppError> {
    let raw = raw
        .filter(|a| !a.is_empty())
        .ok_or_else(|| AppError::missing_field("action"))?;
    Action::parse(raw).ok_or_else(|| AppError::Validation(format!("Invalid action: {raw}")))
}

fn parse_body<T: DeserializeOwned>(body: Value) -> Result<T, AppError> {
    serde_json::from_value(body).map_err(|e| AppError::Validation(format!("Invalid request: {e}")))
}

fn ok<T: Serialize>(value: T) -> Response {
    Json(value).into_response()
}

async fn dispatch(
    state: &AppState,
    headers: &HeaderMap,
    action: Action,
    body: Value,
) -> Result<Response, AppError> {
    info!("Dispatching action {action:?}");
    let response = match action {
        Action::CreatePaymentIntent => {
            let caller = authenticate(state.auth.as_ref(), headers).await?;
            ok(payments::create_payment_intent(state, &caller, parse_body(body)?).await?)
        }
        Action::CreateCheckoutSession => {
            let caller = authenticate(state.auth.as_ref(), headers).await?;
            ok(checkout::create_checkout_session(state, &caller, parse_body(body)?).await?)
        }
        Action::CreateConnectAccount => {
            let caller = authenticate(state.auth.as_ref(), headers).await?;
            ok(connect_account::create_connect_account(state, &caller, parse_body(body)?).await?)
        }
        Action::GetConnectAccountStatus => {
            let caller = authenticate(state.auth.as_ref(), headers).await?;
            ok(account_status::sync_account_status(state, &caller, parse_body(body)?).await?)
        }
        Action::VerifyConnectAccount => {
            let caller = authenticate(state.auth.as_ref(), headers).await?;
            ok(account_status::verify_connect_account(state, &caller, parse_body(body)?).await?)
        }
        Action::CreateAccountSession => {
            let caller = authenticate(state.auth.as_ref(), headers).await?;
            ok(account_session::create_account_session(state, &caller, parse_body(body)?).await?)
        }
        Action::CreateProduct => {
            let caller = authenticate(state.auth.as_ref(), headers).await?;
            ok(products::create_product(state, &caller, parse_body(body)?).await?)
        }
        Action::UpdateProduct => {
            let caller = authenticate(state.auth.as_ref(), headers).await?;
            ok(products::update_product(state, &caller, parse_body(body)?).await?)
        }
        Action::DeleteProduct => {
            let caller = authenticate(state.auth.as_ref(), headers).await?;
            ok(products::delete_product(state, &caller, parse_body(body)?).await?)
        }
        Action::ListProducts => ok(products::list_products(state, parse_body(body)?).await?),
        Action::TransferToConnect => {
            let caller = authenticate(state.auth.as_ref(), headers).await?;
            ok(transfers::transfer_to_connect(state, &caller, parse_body(body)?).await?)
        }
    };
    Ok(response)
}

/// POST /stripe-payments dispatches on the body's `action` field.
#[tracing::instrument(skip_all)]
pub async fn payments_post_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let body: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("Invalid JSON body: {e}")))?;
    let action = parse_action(body.get("action").and_then(Value::as_str))?;
    dispatch(&state, &headers, action, body).await
}

/// GET /stripe-payments takes the action and its fields from the query string.
#[tracing::instrument(skip_all)]
pub async fn payments_get_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let action = parse_action(params.get("action").map(String::as_str))?;
    if !action.allows_get() {
        warn!("Rejected GET for action {action:?}");
        return Err(AppError::Validation(format!(
            "Action {action:?} requires a POST request"
        )));
    }
    let body: Map<String, Value> = params
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    dispatch(&state, &headers, action, Value::Object(body)).await
}

/// POST /send-email renders and delivers one transactional email.
#[tracing::instrument(skip_all)]
pub async fn send_email_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    authenticate(state.auth.as_ref(), &headers).await?;
    let request: SendEmailRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("Invalid request: {e}")))?;
    Ok(ok(send_email(&state, request).await?))
}

/// GET /health endpoint returns a simple liveness payload.
#[tracing::instrument]
pub async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
