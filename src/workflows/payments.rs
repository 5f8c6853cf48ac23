use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::{ensure_owner, parse_currency, require, require_text, MIN_CHARGE_AMOUNT};
use crate::{
    auth::AuthUser,
    database::{
        models::{NewPayment, Payment, PaymentStatus},
        StoreError,
    },
    error::AppError,
    processor::{NewCheckout, ProcessorError},
    AppState,
};

pub const SESSION_PAYMENT: &str = "session_payment";

#[derive(Debug, Default, Deserialize)]
pub struct PaymentMetadata {
    #[serde(default)]
    pub practitioner_name: Option<String>,
    #[serde(default)]
    pub client_user_id: Option<Uuid>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentIntentRequest {
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub practitioner_id: Option<Uuid>,
    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub metadata: Option<PaymentMetadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentIntentResponse {
    pub payment_id: Option<Uuid>,
    pub checkout_url: Option<String>,
    pub checkout_session_id: Option<String>,
    pub status: PaymentStatus,
}

impl From<&Payment> for PaymentIntentResponse {
    fn from(payment: &Payment) -> Self {
        Self {
            payment_id: Some(payment.id),
            checkout_url: payment.checkout_url().map(str::to_owned),
            checkout_session_id: payment.stripe_checkout_session_id.clone(),
            status: payment.status,
        }
    }
}

/// Stable key for a client paying for one booked session.
pub fn session_idempotency_key(session_id: Uuid, client_user_id: Uuid) -> String {
    format!("session_{session_id}_{client_user_id}")
}

fn metadata_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Starts a hosted payment for a booked session. Replays with the same key
/// return the stored payment instead of creating another.
#[tracing::instrument(skip(state, request), fields(user_id = %caller.id))]
pub async fn create_payment_intent(
    state: &AppState,
    caller: &AuthUser,
    request: PaymentIntentRequest,
) -> Result<PaymentIntentResponse, AppError> {
    let amount = require(request.amount, "amount")?;
    let currency = parse_currency(&require_text(request.currency, "currency")?)?;
    let session_id = require(request.session_id, "session_id")?;
    let metadata = request.metadata.unwrap_or_default();
    let practitioner_name =
        require_text(metadata.practitioner_name, "metadata.practitioner_name")?;
    let client_user_id = require(metadata.client_user_id, "metadata.client_user_id")?;

    if amount < MIN_CHARGE_AMOUNT {
        return Err(AppError::Validation(format!(
            "amount must be at least {MIN_CHARGE_AMOUNT}"
        )));
    }
    ensure_owner(caller.id, client_user_id)?;

    let idempotency_key = request
        .idempotency_key
        .filter(|key| !key.trim().is_empty())
        .unwrap_or_else(|| session_idempotency_key(session_id, client_user_id));

    if let Some(existing) = state
        .store
        .payment_by_idempotency_key(&idempotency_key)
        .await?
    {
        info!("Replaying payment {} for key {idempotency_key}", existing.id);
        return Ok(PaymentIntentResponse::from(&existing));
    }

    let mut processor_metadata: HashMap<String, String> = metadata
        .extra
        .iter()
        .map(|(k, v)| (k.clone(), metadata_string(v)))
        .collect();
    processor_metadata.extend([
        ("session_id".to_string(), session_id.to_string()),
        ("client_user_id".to_string(), client_user_id.to_string()),
        ("practitioner_name".to_string(), practitioner_name.clone()),
        ("idempotency_key".to_string(), idempotency_key.clone()),
    ]);
    if let Some(practitioner_id) = request.practitioner_id {
        processor_metadata.insert("practitioner_id".to_string(), practitioner_id.to_string());
    }

    let session = state
        .processor
        .create_checkout_session(NewCheckout {
            amount,
            currency: currency.to_string(),
            product_name: format!("Session with {practitioner_name}"),
            product_description: None,
            customer_email: caller.email.clone(),
            success_url: format!(
                "{}/payment/success?session_id={{CHECKOUT_SESSION_ID}}",
                state.config.app_url
            ),
            cancel_url: format!("{}/payment/cancel?session={session_id}", state.config.app_url),
            split: None,
            metadata: processor_metadata,
            idempotency_key: Some(idempotency_key.clone()),
        })
        .await?;

    let checkout_url = session.url.clone().ok_or_else(|| {
        ProcessorError::Transport(format!("checkout session {} has no url", session.id))
    })?;

    let mut stored_metadata = metadata.extra;
    stored_metadata.insert("checkout_url".into(), Value::String(checkout_url.clone()));
    stored_metadata.insert(
        "practitioner_name".into(),
        Value::String(practitioner_name),
    );

    let new_payment = NewPayment {
        id: Uuid::new_v4(),
        stripe_payment_intent_id: session.payment_intent.clone(),
        stripe_checkout_session_id: Some(session.id.clone()),
        amount,
        currency: currency.to_string(),
        status: PaymentStatus::Pending,
        payment_type: SESSION_PAYMENT.to_string(),
        user_id: client_user_id,
        practitioner_id: request.practitioner_id,
        project_id: request.project_id,
        session_id: Some(session_id),
        idempotency_key: idempotency_key.clone(),
        metadata: Value::Object(stored_metadata),
    };

    match state.store.insert_payment(new_payment).await {
        Ok(payment) => Ok(PaymentIntentResponse::from(&payment)),
        Err(StoreError::UniqueViolation(_)) => {
            let winner = state
                .store
                .payment_by_idempotency_key(&idempotency_key)
                .await?
                .ok_or(StoreError::NotFound)?;
            Ok(PaymentIntentResponse::from(&winner))
        }
        Err(e) => {
            warn!(
                "Failed to record payment for checkout session {}; returning it anyway: {e}",
                session.id
            );
            Ok(PaymentIntentResponse {
                payment_id: None,
                checkout_url: Some(checkout_url),
                checkout_session_id: Some(session.id),
                status: PaymentStatus::Pending,
            })
        }
    }
}
