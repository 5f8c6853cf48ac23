use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    auth::AuthUser,
    error::AppError,
    processor::{ComponentConfig, ProcessorError},
    AppState,
};

/// Embedded components a session token may be scoped to.
pub const EMBEDDED_COMPONENTS: [&str; 6] = [
    "account_onboarding",
    "account_management",
    "payouts",
    "payments",
    "balances",
    "disputes_list",
];

/// Skips the processor's own login step; only valid on platform-controlled accounts.
pub const DISABLE_USER_AUTH: &str = "disable_stripe_user_authentication";

#[derive(Debug, Default, Deserialize)]
pub struct AccountSessionRequest {
    #[serde(default, alias = "stripeAccountId", alias = "account_id")]
    pub stripe_account_id: Option<String>,
    #[serde(default)]
    pub components: Option<BTreeMap<String, ComponentConfig>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountSessionResponse {
    pub client_secret: String,
    pub expires_at: i64,
    pub account_id: String,
}

fn features(names: &[&str]) -> BTreeMap<String, bool> {
    names.iter().map(|name| (name.to_string(), true)).collect()
}

pub fn default_components() -> BTreeMap<String, ComponentConfig> {
    let defaults: [(&str, &[&str]); 6] = [
        (
            "account_onboarding",
            &["external_account_collection", DISABLE_USER_AUTH],
        ),
        (
            "account_management",
            &["external_account_collection", DISABLE_USER_AUTH],
        ),
        (
            "payouts",
            &[
                "instant_payouts",
                "standard_payouts",
                "edit_payout_schedule",
                "external_account_collection",
                DISABLE_USER_AUTH,
            ],
        ),
        (
            "payments",
            &["refund_management", "dispute_management", "capture_payments"],
        ),
        (
            "balances",
            &[
                "instant_payouts",
                "standard_payouts",
                "edit_payout_schedule",
                DISABLE_USER_AUTH,
            ],
        ),
        (
            "disputes_list",
            &["refund_management", "dispute_management", "capture_payments"],
        ),
    ];
    defaults.into_iter()
        .map(|(name, feats)| {
            (
                name.to_string(),
                ComponentConfig {
                    enabled: true,
                    features: features(feats),
                },
            )
        })
        .collect()
}

/// Keeps only allow-listed components and strips the auth bypass when the
/// account cannot use it.
pub fn scope_components(
    requested: Option<BTreeMap<String, ComponentConfig>>,
    platform_controlled: bool,
) -> BTreeMap<String, ComponentConfig> {
    let mut components = match requested {
        Some(requested) if !requested.is_empty() => requested
            .into_iter()
            .filter(|(name, _)| {
                let allowed = EMBEDDED_COMPONENTS.contains(&name.as_str());
                if !allowed {
                    warn!("Dropping unsupported embedded component {name}");
                }
                allowed
            })
            .collect(),
        _ => default_components(),
    };
    if !platform_controlled {
        for config in components.values_mut() {
            config.features.remove(DISABLE_USER_AUTH);
        }
    }
    components
}

/// Issues a short-lived client secret for the embedded account UI.
#[tracing::instrument(skip(state, request), fields(user_id = %caller.id))]
pub async fn create_account_session(
    state: &AppState,
    caller: &AuthUser,
    request: AccountSessionRequest,
) -> Result<AccountSessionResponse, AppError> {
    let account_id = match request.stripe_account_id.filter(|id| !id.is_empty()) {
        Some(id) => {
            let row = state
                .store
                .connect_account_by_stripe_id(&id)
                .await?
                .ok_or(AppError::AccountNotFound)?;
            if row.user_id != caller.id {
                return Err(AppError::Forbidden(
                    "Connect account belongs to another user".into(),
                ));
            }
            id
        }
        None => state
            .store
            .connect_accounts_for_user(caller.id)
            .await?
            .into_iter()
            .next()
            .map(|row| row.stripe_account_id)
            .ok_or(AppError::AccountNotFound)?,
    };

    let live = state
        .processor
        .retrieve_account(&account_id)
        .await
        .map_err(|e| match e {
            ProcessorError::NotFound(_) => AppError::AccountNotFound,
            other => AppError::Processor(other),
        })?;

    let platform_controlled = live.is_platform_controlled();
    if !platform_controlled {
        info!("Account {account_id} is not platform controlled; auth bypass disabled");
    }
    let components = scope_components(request.components, platform_controlled);

    let session = state
        .processor
        .create_account_session(&account_id, components)
        .await?;

    Ok(AccountSessionResponse {
        client_secret: session.client_secret,
        expires_at: session.expires_at,
        account_id: session.account,
    })
}
