use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::{backfill_user_pointer, ensure_owner};
use crate::{
    auth::AuthUser,
    database::{
        models::{ConnectAccount, ConnectAccountStatus, UserProfile},
        StoreError,
    },
    error::AppError,
    processor::{NewAccount, ProcessorError},
    AppState,
};

pub const LEGACY_CONFIG_NOTE: &str = "legacy_config";

#[derive(Debug, Default, Deserialize)]
pub struct CreateConnectAccountRequest {
    #[serde(default, alias = "userId")]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "firstName")]
    pub first_name: Option<String>,
    #[serde(default, alias = "lastName")]
    pub last_name: Option<String>,
    #[serde(default, alias = "businessType")]
    pub business_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectAccountResponse {
    pub connect_account_id: Uuid,
    pub stripe_account_id: String,
    pub status: ConnectAccountStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<&'static str>,
}

impl From<&ConnectAccount> for ConnectAccountResponse {
    fn from(row: &ConnectAccount) -> Self {
        Self {
            connect_account_id: row.id,
            stripe_account_id: row.stripe_account_id.clone(),
            status: row.status,
            note: None,
        }
    }
}

enum Reconciled {
    Keep(ConnectAccountResponse),
    Replace,
}

/// Find-or-create the caller's processor account. Converges on one
/// platform-controlled account per user; accounts that already moved money
/// are never deleted, whatever their configuration.
#[tracing::instrument(skip(state, request), fields(user_id = %caller.id))]
pub async fn create_connect_account(
    state: &AppState,
    caller: &AuthUser,
    request: CreateConnectAccountRequest,
) -> Result<ConnectAccountResponse, AppError> {
    if let Some(claimed) = request.user_id {
        ensure_owner(caller.id, claimed)?;
    }

    let profile = state
        .store
        .find_user(caller.id)
        .await?
        .ok_or(AppError::ProfileNotFound)?;

    let existing = state
        .store
        .connect_accounts_for_user(caller.id)
        .await?
        .into_iter()
        .next();

    if let Some(existing) = existing {
        if let Reconciled::Keep(response) = reconcile_existing(state, &existing).await? {
            backfill_user_pointer(state, &profile, &response.stripe_account_id).await;
            return Ok(response);
        }
    }

    create_fresh(state, caller, &profile, request).await
}

async fn reconcile_existing(
    state: &AppState,
    existing: &ConnectAccount,
) -> Result<Reconciled, AppError> {
    let live = match state
        .processor
        .retrieve_account(&existing.stripe_account_id)
        .await
    {
        Ok(account) => account,
        Err(ProcessorError::NotFound(reason)) => {
            warn!(
                "Connect account {} no longer exists at the processor ({reason}); replacing",
                existing.stripe_account_id
            );
            state.store.delete_connect_account(existing.id).await?;
            return Ok(Reconciled::Replace);
        }
        Err(e) => return Err(e.into()),
    };

    if !live.is_platform_controlled() {
        if live.has_completed_onboarding() {
            warn!(
                "Connect account {} uses a legacy configuration but is onboarded; keeping it",
                live.id
            );
            return Ok(Reconciled::Keep(ConnectAccountResponse {
                status: ConnectAccountStatus::Active,
                note: Some(LEGACY_CONFIG_NOTE),
                ..ConnectAccountResponse::from(existing)
            }));
        }

        info!(
            "Connect account {} is misconfigured and not onboarded; recreating",
            live.id
        );
        if let Err(e) = state.processor.delete_account(&live.id).await {
            warn!("Failed to delete misconfigured account {}: {e}", live.id);
        }
        state.store.delete_connect_account(existing.id).await?;
        return Ok(Reconciled::Replace);
    }

    let missing = live.missing_capabilities();
    if !missing.is_empty() {
        match state.processor.request_capabilities(&live.id, &missing).await {
            Ok(_) => info!("Requested capabilities {missing:?} on account {}", live.id),
            Err(e) => warn!(
                "Failed to request capabilities {missing:?} on account {}: {e}",
                live.id
            ),
        }
    }

    Ok(Reconciled::Keep(ConnectAccountResponse::from(existing)))
}

async fn create_fresh(
    state: &AppState,
    caller: &AuthUser,
    profile: &UserProfile,
    request: CreateConnectAccountRequest,
) -> Result<ConnectAccountResponse, AppError> {
    let business_type = request
        .business_type
        .unwrap_or_else(|| "individual".to_string());
    let email = request
        .email
        .or_else(|| caller.email.clone())
        .or_else(|| profile.email.clone());

    let account = state
        .processor
        .create_account(NewAccount {
            email,
            country: state.config.account_country.clone(),
            business_type: Some(business_type.clone()),
            first_name: request.first_name.or_else(|| profile.first_name.clone()),
            last_name: request.last_name.or_else(|| profile.last_name.clone()),
            metadata: HashMap::from([("user_id".to_string(), caller.id.to_string())]),
        })
        .await?;

    let new_row = ConnectAccount::new(
        caller.id,
        account.id.clone(),
        account.flags(),
        Some(business_type),
    );

    let row = match state.store.insert_connect_account(new_row).await {
        Ok(row) => row,
        Err(StoreError::UniqueViolation(_)) => {
            warn!(
                "Connect account for user {} was created concurrently; using the stored one",
                caller.id
            );
            let winner = state
                .store
                .connect_accounts_for_user(caller.id)
                .await?
                .into_iter()
                .next()
                .ok_or(StoreError::NotFound)?;
            if winner.stripe_account_id != account.id {
                if let Err(e) = state.processor.delete_account(&account.id).await {
                    warn!("Failed to delete duplicate account {}: {e}", account.id);
                }
            }
            backfill_user_pointer(state, profile, &winner.stripe_account_id).await;
            return Ok(ConnectAccountResponse::from(&winner));
        }
        Err(e) => return Err(e.into()),
    };

    info!(
        "Stored connect account {} for user {}",
        row.stripe_account_id, row.user_id
    );
    backfill_user_pointer(state, profile, &row.stripe_account_id).await;
    Ok(ConnectAccountResponse::from(&row))
}
