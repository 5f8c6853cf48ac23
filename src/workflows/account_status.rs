use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::{backfill_user_pointer, ensure_owner};
use crate::{
    auth::AuthUser,
    database::{
        models::{ConnectAccount, ConnectAccountStatus},
        StoreError,
    },
    error::AppError,
    processor::{ProcessorAccount, ProcessorError},
    AppState,
};

#[derive(Debug, Default, Clone, Deserialize)]
pub struct AccountStatusRequest {
    #[serde(default, alias = "userId")]
    pub user_id: Option<Uuid>,
    #[serde(default, alias = "accountId")]
    pub account_id: Option<String>,
}

/// Local row id merged with the processor's live flags.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatusResponse {
    pub connect_account_id: Option<Uuid>,
    pub account_id: String,
    pub status: ConnectAccountStatus,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    pub requirements_currently_due: Vec<String>,
    pub is_fully_onboarded: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyAccountRequest {
    #[serde(default)]
    pub therapist_connect_account_id: Option<String>,
    #[serde(default)]
    pub practitioner_id: Option<Uuid>,
    #[serde(default, alias = "userId")]
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyAccountResponse {
    pub verified: bool,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
}

/// Reconciles the caller's cached connect account row with the processor,
/// which is always authoritative. The caller must own the account, either
/// through its local row or the owner recorded on the processor account.
#[tracing::instrument(skip(state, request), fields(user_id = %caller.id))]
pub async fn sync_account_status(
    state: &AppState,
    caller: &AuthUser,
    request: AccountStatusRequest,
) -> Result<AccountStatusResponse, AppError> {
    if let Some(user_id) = request.user_id {
        ensure_owner(caller.id, user_id)?;
    }
    let account_id = resolve_account_id(state, &request).await?;
    let live = fetch_live(state, &account_id).await?;
    let existing = state.store.connect_account_by_stripe_id(&live.id).await?;

    let owner = existing
        .as_ref()
        .map(|row| row.user_id)
        .or_else(|| recorded_owner(&live));
    match owner {
        Some(owner) => ensure_owner(caller.id, owner)?,
        None => {
            warn!("Connect account {} has no known owner", live.id);
            return Err(AppError::Forbidden(
                "Connect account is not linked to this user".into(),
            ));
        }
    }

    reconcile(state, live, existing).await
}

/// Status sync driven by the processor itself, as for signed webhook events.
#[tracing::instrument(skip(state))]
pub async fn refresh_account(
    state: &AppState,
    account_id: &str,
) -> Result<AccountStatusResponse, AppError> {
    let live = fetch_live(state, account_id).await?;
    let existing = state.store.connect_account_by_stripe_id(&live.id).await?;
    reconcile(state, live, existing).await
}

/// `verify-connect-account`: status sync answered as a single verified bit.
/// Anyone but the owner gets the live flags without touching local records.
#[tracing::instrument(skip(state, request), fields(user_id = %caller.id))]
pub async fn verify_connect_account(
    state: &AppState,
    caller: &AuthUser,
    request: VerifyAccountRequest,
) -> Result<VerifyAccountResponse, AppError> {
    let request = AccountStatusRequest {
        user_id: request.practitioner_id.or(request.user_id),
        account_id: request.therapist_connect_account_id,
    };
    let status = match sync_account_status(state, caller, request.clone()).await {
        Err(AppError::Forbidden(_)) => read_live_status(state, &request).await?,
        other => other?,
    };

    Ok(VerifyAccountResponse {
        verified: status.is_fully_onboarded,
        charges_enabled: status.charges_enabled,
        payouts_enabled: status.payouts_enabled,
        details_submitted: status.details_submitted,
    })
}

async fn read_live_status(
    state: &AppState,
    request: &AccountStatusRequest,
) -> Result<AccountStatusResponse, AppError> {
    let account_id = resolve_account_id(state, request).await?;
    let live = fetch_live(state, &account_id).await?;
    let existing = state.store.connect_account_by_stripe_id(&live.id).await?;
    Ok(merge(existing.as_ref(), &live))
}

async fn resolve_account_id(
    state: &AppState,
    request: &AccountStatusRequest,
) -> Result<String, AppError> {
    match (request.account_id.as_deref(), request.user_id) {
        (Some(id), _) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        (_, Some(user_id)) => account_id_for_user(state, user_id).await,
        _ => Err(AppError::Validation(
            "Either userId or account_id is required".into(),
        )),
    }
}

async fn fetch_live(state: &AppState, account_id: &str) -> Result<ProcessorAccount, AppError> {
    state
        .processor
        .retrieve_account(account_id)
        .await
        .map_err(|e| match e {
            ProcessorError::NotFound(_) => AppError::AccountNotFound,
            other => AppError::Processor(other),
        })
}

/// Owner stamped on the account when this platform created it.
fn recorded_owner(live: &ProcessorAccount) -> Option<Uuid> {
    live.metadata
        .get("user_id")
        .and_then(|raw| raw.parse::<Uuid>().ok())
}

/// Writes live flags to the row tracking `live`, creating it when missing.
/// Rows tracking other processor accounts are never touched.
async fn reconcile(
    state: &AppState,
    live: ProcessorAccount,
    existing: Option<ConnectAccount>,
) -> Result<AccountStatusResponse, AppError> {
    let row = match existing {
        Some(row) => Some(row),
        None => create_missing_row(state, &live).await?,
    };
    let local = match row {
        Some(row) => Some(state.store.update_connect_account_flags(row.id, live.flags()).await?),
        None => None,
    };

    if let Some(row) = &local {
        if let Some(profile) = state.store.find_user(row.user_id).await? {
            backfill_user_pointer(state, &profile, &row.stripe_account_id).await;
        }
    }

    Ok(merge(local.as_ref(), &live))
}

/// The pointer on the profile first, then the user's most recent row.
async fn account_id_for_user(state: &AppState, user_id: Uuid) -> Result<String, AppError> {
    let pointer = state
        .store
        .find_user(user_id)
        .await?
        .and_then(|profile| profile.stripe_connect_account_id)
        .filter(|id| !id.is_empty());
    if let Some(id) = pointer {
        return Ok(id);
    }

    let rows = state.store.connect_accounts_for_user(user_id).await?;
    if rows.len() > 1 {
        warn!(
            "User {user_id} has {} connect account rows; using the most recent",
            rows.len()
        );
    }
    rows.into_iter()
        .next()
        .map(|row| row.stripe_account_id)
        .ok_or(AppError::AccountNotFound)
}

async fn create_missing_row(
    state: &AppState,
    live: &ProcessorAccount,
) -> Result<Option<ConnectAccount>, AppError> {
    let Some(owner) = recorded_owner(live) else {
        warn!("No local row or owner for connect account {}", live.id);
        return Ok(None);
    };

    if let Some(tracked) = state.store.connect_accounts_for_user(owner).await?.first() {
        warn!(
            "User {owner} already tracks connect account {}; not caching {}",
            tracked.stripe_account_id, live.id
        );
        return Ok(None);
    }

    if state.store.find_user(owner).await?.is_none() {
        warn!("Connect account {} belongs to unknown user {owner}", live.id);
        return Ok(None);
    }

    let new_row = ConnectAccount::new(
        owner,
        live.id.clone(),
        live.flags(),
        live.business_type.clone(),
    );
    match state.store.insert_connect_account(new_row).await {
        Ok(row) => {
            info!("Created missing local row for connect account {}", live.id);
            Ok(Some(row))
        }
        Err(StoreError::UniqueViolation(_)) => Ok(state
            .store
            .connect_account_by_stripe_id(&live.id)
            .await?),
        Err(e) => Err(e.into()),
    }
}

fn merge(local: Option<&ConnectAccount>, live: &ProcessorAccount) -> AccountStatusResponse {
    let flags = live.flags();
    AccountStatusResponse {
        connect_account_id: local.map(|row| row.id),
        account_id: live.id.clone(),
        status: flags.status(),
        charges_enabled: flags.charges_enabled,
        payouts_enabled: flags.payouts_enabled,
        details_submitted: flags.details_submitted,
        requirements_currently_due: live.currently_due().to_vec(),
        is_fully_onboarded: flags.is_fully_onboarded(),
    }
}
