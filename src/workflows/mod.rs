//! Request-scoped payment workflows. Each one reads the record store, calls the
//! processor in sequence, and returns a serializable response.

use stripe::Currency;
use tracing::warn;
use uuid::Uuid;

use crate::{database::models::UserProfile, error::AppError, AppState};

pub mod account_session;
pub mod account_status;
pub mod checkout;
pub mod connect_account;
pub mod payments;
pub mod products;
pub mod transfers;

/// Smallest amount the processor will charge, in minor units.
pub const MIN_CHARGE_AMOUNT: i64 = 50;

pub fn require<T>(value: Option<T>, field: &str) -> Result<T, AppError> {
    value.ok_or_else(|| AppError::missing_field(field))
}

pub fn require_text(value: Option<String>, field: &str) -> Result<String, AppError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AppError::missing_field(field)),
    }
}

pub fn parse_currency(raw: &str) -> Result<Currency, AppError> {
    match raw.trim().to_lowercase().as_str() {
        "usd" => Ok(Currency::USD),
        "eur" => Ok(Currency::EUR),
        "gbp" => Ok(Currency::GBP),
        "cad" => Ok(Currency::CAD),
        "aud" => Ok(Currency::AUD),
        other => Err(AppError::Validation(format!("Unsupported currency: {other}"))),
    }
}

pub fn ensure_owner(caller: Uuid, owner: Uuid) -> Result<(), AppError> {
    if caller != owner {
        return Err(AppError::Forbidden(
            "You are not allowed to act on behalf of this user".into(),
        ));
    }
    Ok(())
}

/// The practitioner's processor account id as cached on their profile.
pub async fn practitioner_account_id(
    state: &AppState,
    practitioner_id: Uuid,
) -> Result<String, AppError> {
    let profile = state
        .store
        .find_user(practitioner_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Practitioner not found".into()))?;
    profile
        .stripe_connect_account_id
        .filter(|id| !id.is_empty())
        .ok_or(AppError::PractitionerNotConnected)
}

/// Keeps the profile's cached account pointer in step. Failures only warn.
pub async fn backfill_user_pointer(state: &AppState, profile: &UserProfile, stripe_account_id: &str) {
    if profile.stripe_connect_account_id.as_deref() == Some(stripe_account_id) {
        return;
    }
    if let Err(e) = state
        .store
        .set_user_connect_account_id(profile.id, stripe_account_id)
        .await
    {
        warn!(
            "Failed to update stripe_connect_account_id for user {}: {e}",
            profile.id
        );
    }
}
