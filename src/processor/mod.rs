//! The external payment processor, seen through the narrow set of calls the
//! workflows make.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::database::models::CapabilityFlags;

mod stripe_client;

pub use stripe_client::StripeProcessor;

/// Who owns fees, losses and the dashboard on a platform-controlled account.
pub const APPLICATION: &str = "application";
pub const DASHBOARD_NONE: &str = "none";

/// Capabilities requested on every new account and upgraded in place on existing ones.
pub const REQUIRED_CAPABILITIES: [&str; 2] = ["card_payments", "transfers"];

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// The processor does not know the object, or it is no longer reachable from the platform.
    #[error("{0}")]
    NotFound(String),
    #[error("{message}")]
    Api {
        status: u16,
        message: String,
        error_type: String,
        code: Option<String>,
    },
    #[error("payment processor unavailable: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ControllerFees {
    #[serde(default)]
    pub payer: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ControllerLosses {
    #[serde(default)]
    pub payments: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ControllerDashboard {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AccountController {
    #[serde(default)]
    pub fees: Option<ControllerFees>,
    #[serde(default)]
    pub losses: Option<ControllerLosses>,
    #[serde(default)]
    pub stripe_dashboard: Option<ControllerDashboard>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AccountRequirements {
    #[serde(default)]
    pub currently_due: Vec<String>,
    #[serde(default)]
    pub disabled_reason: Option<String>,
}

/// Live account state as the processor reports it.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProcessorAccount {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub charges_enabled: bool,
    #[serde(default)]
    pub payouts_enabled: bool,
    #[serde(default)]
    pub details_submitted: bool,
    #[serde(default)]
    pub business_type: Option<String>,
    #[serde(default)]
    pub controller: Option<AccountController>,
    #[serde(default)]
    pub requirements: Option<AccountRequirements>,
    /// capability name → `active | inactive | pending`
    #[serde(default)]
    pub capabilities: HashMap<String, String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ProcessorAccount {
    pub fn flags(&self) -> CapabilityFlags {
        CapabilityFlags {
            charges_enabled: self.charges_enabled,
            payouts_enabled: self.payouts_enabled,
            details_submitted: self.details_submitted,
        }
    }

    pub fn currently_due(&self) -> &[String] {
        self.requirements
            .as_ref()
            .map(|r| r.currently_due.as_slice())
            .unwrap_or_default()
    }

    /// True when the platform owns fees and losses and the account has no processor dashboard.
    pub fn is_platform_controlled(&self) -> bool {
        let Some(controller) = &self.controller else {
            return false;
        };
        let fees = controller.fees.as_ref().and_then(|f| f.payer.as_deref());
        let losses = controller.losses.as_ref().and_then(|l| l.payments.as_deref());
        let dashboard = controller
            .stripe_dashboard
            .as_ref()
            .and_then(|d| d.kind.as_deref());
        fees == Some(APPLICATION) && losses == Some(APPLICATION) && dashboard == Some(DASHBOARD_NONE)
    }

    /// Onboarding is over once nothing is due, or once every capability flag is on.
    pub fn has_completed_onboarding(&self) -> bool {
        (self.details_submitted && self.currently_due().is_empty())
            || self.flags().is_fully_onboarded()
    }

    /// Required capabilities that are neither active nor already requested.
    pub fn missing_capabilities(&self) -> Vec<&'static str> {
        REQUIRED_CAPABILITIES
            .into_iter()
            .filter(|name| {
                !matches!(
                    self.capabilities.get(*name).map(String::as_str),
                    Some("active") | Some("pending")
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: Option<String>,
    pub country: String,
    pub business_type: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct NewCheckout {
    pub amount: i64,
    pub currency: String,
    pub product_name: String,
    pub product_description: Option<String>,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    /// Platform fee and destination account for a split payment.
    pub split: Option<FeeSplit>,
    pub metadata: HashMap<String, String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeSplit {
    pub application_fee_amount: i64,
    pub destination: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessorCheckout {
    pub id: String,
    pub url: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ComponentConfig {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub features: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessorAccountSession {
    pub client_secret: String,
    pub expires_at: i64,
    pub account: String,
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub description: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessorProduct {
    pub id: String,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessorPrice {
    pub id: String,
    #[serde(default)]
    pub unit_amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub amount: i64,
    pub currency: String,
    pub destination: String,
    pub metadata: HashMap<String, String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessorTransfer {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub reversed: bool,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn retrieve_account(&self, account_id: &str) -> Result<ProcessorAccount, ProcessorError>;
    /// Creates a platform-controlled account requesting [`REQUIRED_CAPABILITIES`].
    async fn create_account(&self, account: NewAccount) -> Result<ProcessorAccount, ProcessorError>;
    async fn request_capabilities(
        &self,
        account_id: &str,
        capabilities: &[&str],
    ) -> Result<ProcessorAccount, ProcessorError>;
    async fn delete_account(&self, account_id: &str) -> Result<(), ProcessorError>;

    async fn create_checkout_session(
        &self,
        checkout: NewCheckout,
    ) -> Result<ProcessorCheckout, ProcessorError>;

    async fn create_account_session(
        &self,
        account_id: &str,
        components: BTreeMap<String, ComponentConfig>,
    ) -> Result<ProcessorAccountSession, ProcessorError>;

    /// Product and price calls run on the connected account named by `account_id`.
    async fn create_product(
        &self,
        account_id: &str,
        product: NewProduct,
    ) -> Result<ProcessorProduct, ProcessorError>;
    async fn update_product(
        &self,
        account_id: &str,
        product_id: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<ProcessorProduct, ProcessorError>;
    async fn archive_product(
        &self,
        account_id: &str,
        product_id: &str,
    ) -> Result<ProcessorProduct, ProcessorError>;
    async fn delete_product(&self, account_id: &str, product_id: &str)
        -> Result<(), ProcessorError>;
    async fn create_price(
        &self,
        account_id: &str,
        product_id: &str,
        unit_amount: i64,
        currency: &str,
    ) -> Result<ProcessorPrice, ProcessorError>;
    async fn deactivate_price(&self, account_id: &str, price_id: &str)
        -> Result<(), ProcessorError>;

    async fn create_transfer(
        &self,
        transfer: NewTransfer,
    ) -> Result<ProcessorTransfer, ProcessorError>;
}
