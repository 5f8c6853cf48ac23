use std::collections::HashMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::{practitioner_account_id, require, require_text};
use crate::{
    auth::AuthUser,
    database::models::{CheckoutSession, CheckoutSessionStatus, NewCheckoutSession},
    error::AppError,
    processor::{FeeSplit, NewCheckout, ProcessorError},
    AppState,
};

/// Platform share of every split checkout, in basis points (0.5%).
pub const PLATFORM_FEE_BASIS_POINTS: i64 = 50;

/// How far back a completed session with the same key is reused.
pub fn reuse_window() -> Duration {
    Duration::hours(1)
}

/// Fee in minor units, rounded half up.
pub fn platform_fee(amount: i64) -> i64 {
    (amount * PLATFORM_FEE_BASIS_POINTS + 5_000) / 10_000
}

/// Key used when the caller sends none. It changes every minute, so two
/// retries straddling a minute boundary are not deduplicated.
pub fn derived_idempotency_key(practitioner_id: Uuid, client_email: &str, now: DateTime<Utc>) -> String {
    format!(
        "checkout_{practitioner_id}_{}_{}",
        client_email.to_lowercase(),
        now.timestamp() / 60
    )
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub practitioner_id: Option<Uuid>,
    #[serde(default)]
    pub price_id: Option<String>,
    #[serde(default)]
    pub client_email: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub checkout_url: String,
    pub session_id: String,
    pub application_fee_amount: i64,
    pub practitioner_amount: i64,
}

impl From<&CheckoutSession> for CheckoutResponse {
    fn from(row: &CheckoutSession) -> Self {
        Self {
            checkout_url: row.checkout_url.clone(),
            session_id: row.stripe_session_id.clone(),
            application_fee_amount: row.application_fee_amount,
            practitioner_amount: row.amount - row.application_fee_amount,
        }
    }
}

/// Creates a hosted checkout that pays the practitioner minus the platform fee.
#[tracing::instrument(skip(state, request), fields(user_id = %caller.id))]
pub async fn create_checkout_session(
    state: &AppState,
    caller: &AuthUser,
    request: CheckoutRequest,
) -> Result<CheckoutResponse, AppError> {
    let practitioner_id = require(request.practitioner_id, "practitioner_id")?;
    let price_id = require_text(request.price_id, "price_id")?;
    let client_email = require_text(request.client_email, "client_email")?;

    let now = Utc::now();
    let idempotency_key = request
        .idempotency_key
        .filter(|key| !key.trim().is_empty())
        .unwrap_or_else(|| derived_idempotency_key(practitioner_id, &client_email, now));

    if let Some(previous) = state
        .store
        .completed_checkout_session(&idempotency_key, now - reuse_window())
        .await?
    {
        info!(
            "Reusing completed checkout session {} for key {idempotency_key}",
            previous.stripe_session_id
        );
        return Ok(CheckoutResponse::from(&previous));
    }

    let destination = practitioner_account_id(state, practitioner_id).await?;

    let product = state
        .store
        .product_by_price(practitioner_id, &price_id)
        .await?
        .filter(|p| p.is_active)
        .ok_or(AppError::ProductNotFound)?;

    let application_fee_amount = platform_fee(product.price_amount);
    let practitioner_amount = product.price_amount - application_fee_amount;

    let mut metadata = HashMap::from([
        ("practitioner_id".to_string(), practitioner_id.to_string()),
        ("product_id".to_string(), product.id.to_string()),
        ("client_email".to_string(), client_email.clone()),
        ("client_user_id".to_string(), caller.id.to_string()),
        ("idempotency_key".to_string(), idempotency_key.clone()),
        (
            "duration_minutes".to_string(),
            product.duration_minutes.to_string(),
        ),
    ]);
    if let Some(name) = request.client_name.filter(|n| !n.trim().is_empty()) {
        metadata.insert("client_name".to_string(), name);
    }

    // Inline price data: the stored price lives on the practitioner's account,
    // while a session carrying a fee transfer must be created on the platform.
    let session = state
        .processor
        .create_checkout_session(NewCheckout {
            amount: product.price_amount,
            currency: product.currency.clone(),
            product_name: product.name.clone(),
            product_description: product.description.clone(),
            customer_email: Some(client_email.clone()),
            success_url: format!(
                "{}/booking/success?session_id={{CHECKOUT_SESSION_ID}}",
                state.config.app_url
            ),
            cancel_url: format!(
                "{}/booking/cancel?practitioner_id={practitioner_id}",
                state.config.app_url
            ),
            split: Some(FeeSplit {
                application_fee_amount,
                destination,
            }),
            metadata,
            idempotency_key: Some(idempotency_key.clone()),
        })
        .await?;

    let checkout_url = session.url.clone().ok_or_else(|| {
        ProcessorError::Transport(format!("checkout session {} has no url", session.id))
    })?;

    let record = NewCheckoutSession {
        id: Uuid::new_v4(),
        practitioner_id,
        client_email,
        client_user_id: Some(caller.id),
        idempotency_key,
        stripe_session_id: session.id.clone(),
        checkout_url: checkout_url.clone(),
        amount: product.price_amount,
        application_fee_amount,
        currency: product.currency.clone(),
        status: CheckoutSessionStatus::Pending,
        expires_at: session
            .expires_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
    };
    if let Err(e) = state.store.insert_checkout_session(record).await {
        warn!(
            "Failed to record checkout session {}; returning it anyway: {e}",
            session.id
        );
    }

    Ok(CheckoutResponse {
        checkout_url,
        session_id: session.id,
        application_fee_amount,
        practitioner_amount,
    })
}
