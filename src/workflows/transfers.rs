use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{parse_currency, require, require_text};
use crate::{
    auth::AuthUser,
    error::AppError,
    processor::{NewTransfer, ProcessorError},
    AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct TransferRequest {
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub connect_account_id: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferResponse {
    pub transfer_id: String,
    pub status: &'static str,
    pub amount: i64,
    pub currency: String,
}

/// Moves platform balance to a practitioner's account. Only configured
/// transfer operators may call it.
#[tracing::instrument(skip(state, request), fields(user_id = %caller.id))]
pub async fn transfer_to_connect(
    state: &AppState,
    caller: &AuthUser,
    request: TransferRequest,
) -> Result<TransferResponse, AppError> {
    if !state.config.transfer_operators.contains(&caller.id) {
        warn!("User {} attempted a transfer without operator rights", caller.id);
        return Err(AppError::Forbidden(
            "Only platform operators may transfer funds".into(),
        ));
    }
    let amount = require(request.amount, "amount")?;
    let currency = parse_currency(&require_text(request.currency, "currency")?)?;
    let destination = require_text(request.connect_account_id, "connect_account_id")?;
    if amount < 1 {
        return Err(AppError::Validation("amount must be positive".into()));
    }

    let local = state
        .store
        .connect_account_by_stripe_id(&destination)
        .await?
        .ok_or(AppError::AccountNotFound)?;

    let live = state
        .processor
        .retrieve_account(&local.stripe_account_id)
        .await
        .map_err(|e| match e {
            ProcessorError::NotFound(_) => AppError::AccountNotFound,
            other => AppError::Processor(other),
        })?;
    if !live.payouts_enabled {
        return Err(AppError::Validation(
            "Connect account cannot receive payouts yet".into(),
        ));
    }

    let mut metadata = request.metadata.unwrap_or_default();
    metadata.insert("initiated_by".to_string(), caller.id.to_string());
    metadata.insert("practitioner_id".to_string(), local.user_id.to_string());

    let transfer = state
        .processor
        .create_transfer(NewTransfer {
            amount,
            currency: currency.to_string(),
            destination: local.stripe_account_id.clone(),
            metadata,
            idempotency_key: request.idempotency_key.filter(|k| !k.trim().is_empty()),
        })
        .await?;

    info!(
        "Transferred {} {} to {} ({})",
        transfer.amount, transfer.currency, local.stripe_account_id, transfer.id
    );

    Ok(TransferResponse {
        status: if transfer.reversed { "reversed" } else { "completed" },
        transfer_id: transfer.id,
        amount: transfer.amount,
        currency: transfer.currency,
    })
}
