use axum::{
    body::Body,
    extract::{FromRequest, Request},
    response::{IntoResponse, Response},
    Extension,
};
use hyper::StatusCode;
use stripe::{Event, EventObject, EventType, Webhook};
use tracing::{error, info, trace, warn};

use crate::{
    database::models::{CheckoutSessionStatus, PaymentStatus, PaymentUpdate},
    error::AppError,
    workflows::account_status::refresh_account,
    AppState,
};

/// Custom extractor for Stripe webhook events.
pub struct StripeEvent(pub Event);

impl<S> FromRequest<S> for StripeEvent
where
    S: Send + Sync,
{
    type Rejection = Response;

    #[tracing::instrument(skip_all)]
    async fn from_request(req: Request<Body>, state: &S) -> Result<Self, Self::Rejection> {
        trace!("Received webhook event");
        let app_state = req
            .extensions()
            .get::<AppState>()
            .ok_or_else(|| StatusCode::INTERNAL_SERVER_ERROR.into_response())?
            .clone();
        let webhook_secret = app_state.config.stripe_webhook_secret.clone();

        let signature = req
            .headers()
            .get("stripe-signature")
            .ok_or_else(|| StatusCode::BAD_REQUEST.into_response())?
            .to_str()
            .map_err(|e| {
                error!("Error converting signature to string: {e}");
                StatusCode::BAD_REQUEST.into_response()
            })?
            .to_string();

        let payload = String::from_request(req, state).await.map_err(|e| {
            error!("Encountered error {e:?} when converting request to payload as string");
            e.into_response()
        })?;

        let event =
            Webhook::construct_event(&payload, &signature, &webhook_secret).map_err(|e| {
                error!("Error constructing event: {e:?}");
                StatusCode::BAD_REQUEST.into_response()
            })?;
        trace!("Event: {}", event.type_);
        Ok(Self(event))
    }
}

/// The part of a verified event this service acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookUpdate {
    CheckoutCompleted {
        session_id: String,
        payment_intent_id: Option<String>,
    },
    CheckoutExpired {
        session_id: String,
    },
    PaymentIntent {
        payment_intent_id: String,
        status: PaymentStatus,
    },
    AccountUpdated {
        account_id: String,
    },
    Ignored,
}

fn intent_status(event_type: &EventType) -> Option<PaymentStatus> {
    match event_type {
        EventType::PaymentIntentSucceeded => Some(PaymentStatus::Succeeded),
        EventType::PaymentIntentPaymentFailed => Some(PaymentStatus::Failed),
        EventType::PaymentIntentCanceled => Some(PaymentStatus::Canceled),
        EventType::PaymentIntentProcessing => Some(PaymentStatus::Processing),
        _ => None,
    }
}

pub fn classify(event: &Event) -> WebhookUpdate {
    match (&event.type_, &event.data.object) {
        (EventType::CheckoutSessionCompleted, EventObject::CheckoutSession(session)) => {
            WebhookUpdate::CheckoutCompleted {
                session_id: session.id.to_string(),
                payment_intent_id: session.payment_intent.as_ref().map(|pi| pi.id().to_string()),
            }
        }
        (EventType::CheckoutSessionExpired, EventObject::CheckoutSession(session)) => {
            WebhookUpdate::CheckoutExpired {
                session_id: session.id.to_string(),
            }
        }
        (event_type, EventObject::PaymentIntent(intent)) => match intent_status(event_type) {
            Some(status) => WebhookUpdate::PaymentIntent {
                payment_intent_id: intent.id.to_string(),
                status,
            },
            None => WebhookUpdate::Ignored,
        },
        (EventType::AccountUpdated, EventObject::Account(account)) => {
            WebhookUpdate::AccountUpdated {
                account_id: account.id.to_string(),
            }
        }
        _ => WebhookUpdate::Ignored,
    }
}

/// Applies one update to local records. Payments already in a terminal state
/// are left alone.
#[tracing::instrument(skip(state))]
pub async fn apply_update(state: &AppState, update: WebhookUpdate) -> Result<(), AppError> {
    match update {
        WebhookUpdate::CheckoutCompleted {
            session_id,
            payment_intent_id,
        } => {
            state
                .store
                .set_checkout_session_status(&session_id, CheckoutSessionStatus::Completed)
                .await?;
            settle_checkout_payment(state, &session_id, PaymentStatus::Succeeded, payment_intent_id)
                .await
        }
        WebhookUpdate::CheckoutExpired { session_id } => {
            state
                .store
                .set_checkout_session_status(&session_id, CheckoutSessionStatus::Expired)
                .await?;
            settle_checkout_payment(state, &session_id, PaymentStatus::Canceled, None).await
        }
        WebhookUpdate::PaymentIntent {
            payment_intent_id,
            status,
        } => {
            let Some(payment) = state.store.payment_by_intent(&payment_intent_id).await? else {
                info!("No payment recorded for intent {payment_intent_id}");
                return Ok(());
            };
            if payment.status.is_terminal() {
                info!(
                    "Payment {} already {}, ignoring {}",
                    payment.id,
                    payment.status.as_str(),
                    status.as_str()
                );
                return Ok(());
            }
            state
                .store
                .update_payment(
                    payment.id,
                    PaymentUpdate {
                        status: Some(status),
                        ..Default::default()
                    },
                )
                .await?;
            Ok(())
        }
        WebhookUpdate::AccountUpdated { account_id } => {
            match refresh_account(state, &account_id).await {
                Ok(status) => {
                    info!("Synced account {account_id}: {}", status.status.as_str());
                    Ok(())
                }
                Err(AppError::AccountNotFound) => {
                    warn!("account.updated for unknown account {account_id}");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        WebhookUpdate::Ignored => Ok(()),
    }
}

async fn settle_checkout_payment(
    state: &AppState,
    session_id: &str,
    status: PaymentStatus,
    payment_intent_id: Option<String>,
) -> Result<(), AppError> {
    let Some(payment) = state.store.payment_by_checkout_session(session_id).await? else {
        return Ok(());
    };
    if payment.status.is_terminal() {
        return Ok(());
    }
    state
        .store
        .update_payment(
            payment.id,
            PaymentUpdate {
                status: Some(status),
                stripe_payment_intent_id: payment_intent_id,
                metadata: None,
            },
        )
        .await?;
    info!("Payment {} marked {}", payment.id, status.as_str());
    Ok(())
}

/// Webhook handler that processes Stripe events.
#[tracing::instrument(skip_all)]
pub async fn webhook_handler(
    Extension(state): Extension<AppState>,
    StripeEvent(stripe_event): StripeEvent,
) -> Response {
    let update = classify(&stripe_event);
    if update == WebhookUpdate::Ignored {
        info!("Unhandled event type: {}", stripe_event.type_);
        return (StatusCode::OK, "Webhook received").into_response();
    }

    match apply_update(&state, update).await {
        Ok(()) => (StatusCode::OK, "Webhook received").into_response(),
        Err(e) => {
            error!("Failed to apply {} event {}: {e}", stripe_event.type_, stripe_event.id);
            e.into_response()
        }
    }
}
