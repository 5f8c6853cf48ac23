use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stripe::{AccountId, Client, ErrorCode, ErrorType, RequestStrategy, StripeError};
use tracing::{error, info};

use super::{
    ComponentConfig, NewAccount, NewCheckout, NewProduct, NewTransfer, PaymentProcessor,
    ProcessorAccount, ProcessorAccountSession, ProcessorCheckout, ProcessorError,
    ProcessorPrice, ProcessorProduct, ProcessorTransfer, APPLICATION, DASHBOARD_NONE,
    REQUIRED_CAPABILITIES,
};

/// `PaymentProcessor` backed by the Stripe API through `async-stripe`'s client.
#[derive(Clone)]
pub struct StripeProcessor {
    client: Client,
}

impl StripeProcessor {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(secret_key.into()),
        }
    }

    fn on_account(&self, account_id: &str) -> Result<Client, ProcessorError> {
        let id = account_id
            .parse::<AccountId>()
            .map_err(|_| ProcessorError::NotFound(format!("invalid account id {account_id}")))?;
        Ok(self.client.clone().with_stripe_account(id))
    }

    fn idempotent(&self, key: Option<&str>) -> Client {
        match key {
            Some(key) => self
                .client
                .clone()
                .with_strategy(RequestStrategy::Idempotent(key.to_string())),
            None => self.client.clone(),
        }
    }
}

/// Stripe's wire name for an error type, as sent in the `type` field.
fn wire_type(error_type: &ErrorType) -> &'static str {
    match error_type {
        ErrorType::Api => "api_error",
        ErrorType::Connection => "api_connection_error",
        ErrorType::Authentication => "authentication_error",
        ErrorType::Card => "card_error",
        ErrorType::IdempotencyError => "idempotency_error",
        ErrorType::InvalidRequest => "invalid_request_error",
        ErrorType::RateLimit => "rate_limit_error",
        ErrorType::Validation => "validation_error",
        ErrorType::Unknown => "unknown_error",
    }
}

fn wire_code(code: &ErrorCode) -> Option<String> {
    match serde_json::to_value(code) {
        Ok(serde_json::Value::String(name)) => Some(name),
        _ => None,
    }
}

impl From<StripeError> for ProcessorError {
    fn from(e: StripeError) -> Self {
        match e {
            StripeError::Stripe(req) => {
                let code = req.code.as_ref().and_then(wire_code);
                let message = req.message.clone().unwrap_or_else(|| "Stripe error".into());
                if req.http_status == 404 || req.code == Some(ErrorCode::ResourceMissing) {
                    return ProcessorError::NotFound(message);
                }
                ProcessorError::Api {
                    status: req.http_status,
                    message,
                    error_type: wire_type(&req.error_type).to_string(),
                    code,
                }
            }
            other => ProcessorError::Transport(other.to_string()),
        }
    }
}

/// Account lookups also treat 403 as missing: accounts detached from the
/// platform come back as permission errors.
fn account_lookup_error(e: StripeError) -> ProcessorError {
    match ProcessorError::from(e) {
        ProcessorError::Api {
            status: 403,
            message,
            ..
        } => ProcessorError::NotFound(message),
        other => other,
    }
}

#[derive(Serialize)]
struct Requested {
    requested: bool,
}

#[derive(Serialize)]
struct ControllerForm {
    fees: FeesForm,
    losses: LossesForm,
    stripe_dashboard: DashboardForm,
}

#[derive(Serialize)]
struct FeesForm {
    payer: &'static str,
}

#[derive(Serialize)]
struct LossesForm {
    payments: &'static str,
}

#[derive(Serialize)]
struct DashboardForm {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct IndividualForm<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    first_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
}

#[derive(Serialize)]
struct CreateAccountForm<'a> {
    country: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    business_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    individual: Option<IndividualForm<'a>>,
    controller: ControllerForm,
    capabilities: BTreeMap<&'static str, Requested>,
    metadata: &'a HashMap<String, String>,
}

#[derive(Serialize)]
struct CapabilitiesForm<'a> {
    capabilities: BTreeMap<&'a str, Requested>,
}

#[derive(Deserialize)]
struct Deleted {
    deleted: bool,
}

#[derive(Serialize)]
struct ProductData<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Serialize)]
struct PriceData<'a> {
    currency: &'a str,
    unit_amount: i64,
    product_data: ProductData<'a>,
}

#[derive(Serialize)]
struct LineItem<'a> {
    quantity: u32,
    price_data: PriceData<'a>,
}

#[derive(Serialize)]
struct TransferData<'a> {
    destination: &'a str,
}

#[derive(Serialize)]
struct PaymentIntentData<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    application_fee_amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transfer_data: Option<TransferData<'a>>,
    metadata: &'a HashMap<String, String>,
}

#[derive(Serialize)]
struct CheckoutForm<'a> {
    mode: &'static str,
    success_url: &'a str,
    cancel_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_email: Option<&'a str>,
    line_items: Vec<LineItem<'a>>,
    payment_intent_data: PaymentIntentData<'a>,
    metadata: &'a HashMap<String, String>,
}

#[derive(Serialize)]
struct AccountSessionForm<'a> {
    account: &'a str,
    components: &'a BTreeMap<String, ComponentConfig>,
}

#[derive(Serialize)]
struct ProductForm<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a HashMap<String, String>>,
}

#[derive(Serialize)]
struct PriceForm<'a> {
    product: &'a str,
    unit_amount: i64,
    currency: &'a str,
}

#[derive(Serialize)]
struct DeactivateForm {
    active: bool,
}

#[derive(Serialize)]
struct TransferForm<'a> {
    amount: i64,
    currency: &'a str,
    destination: &'a str,
    metadata: &'a HashMap<String, String>,
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    #[tracing::instrument(skip(self))]
    async fn retrieve_account(&self, account_id: &str) -> Result<ProcessorAccount, ProcessorError> {
        self.client
            .get::<ProcessorAccount>(&format!("/accounts/{account_id}"))
            .await
            .map_err(account_lookup_error)
    }

    #[tracing::instrument(skip(self, account), fields(business_type = ?account.business_type))]
    async fn create_account(&self, account: NewAccount) -> Result<ProcessorAccount, ProcessorError> {
        let individual = match account.business_type.as_deref() {
            Some("individual") => Some(IndividualForm {
                first_name: account.first_name.as_deref(),
                last_name: account.last_name.as_deref(),
                email: account.email.as_deref(),
            }),
            _ => None,
        };
        let form = CreateAccountForm {
            country: &account.country,
            email: account.email.as_deref(),
            business_type: account.business_type.as_deref(),
            individual,
            controller: ControllerForm {
                fees: FeesForm { payer: APPLICATION },
                losses: LossesForm {
                    payments: APPLICATION,
                },
                stripe_dashboard: DashboardForm {
                    kind: DASHBOARD_NONE,
                },
            },
            capabilities: REQUIRED_CAPABILITIES
                .into_iter()
                .map(|name| (name, Requested { requested: true }))
                .collect(),
            metadata: &account.metadata,
        };
        let created: ProcessorAccount = self
            .client
            .post_form("/accounts", form)
            .await
            .map_err(|e| {
                error!("Error creating connect account: {e:?}");
                ProcessorError::from(e)
            })?;
        info!("Created connect account with id: {}", created.id);
        Ok(created)
    }

    #[tracing::instrument(skip(self))]
    async fn request_capabilities(
        &self,
        account_id: &str,
        capabilities: &[&str],
    ) -> Result<ProcessorAccount, ProcessorError> {
        let form = CapabilitiesForm {
            capabilities: capabilities
                .iter()
                .map(|name| (*name, Requested { requested: true }))
                .collect(),
        };
        Ok(self
            .client
            .post_form(&format!("/accounts/{account_id}"), form)
            .await?)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_account(&self, account_id: &str) -> Result<(), ProcessorError> {
        let deleted: Deleted = self
            .client
            .delete(&format!("/accounts/{account_id}"))
            .await?;
        if !deleted.deleted {
            return Err(ProcessorError::Transport(format!(
                "account {account_id} was not deleted"
            )));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, checkout), fields(amount = checkout.amount))]
    async fn create_checkout_session(
        &self,
        checkout: NewCheckout,
    ) -> Result<ProcessorCheckout, ProcessorError> {
        let form = CheckoutForm {
            mode: "payment",
            success_url: &checkout.success_url,
            cancel_url: &checkout.cancel_url,
            customer_email: checkout.customer_email.as_deref(),
            line_items: vec![LineItem {
                quantity: 1,
                price_data: PriceData {
                    currency: &checkout.currency,
                    unit_amount: checkout.amount,
                    product_data: ProductData {
                        name: &checkout.product_name,
                        description: checkout.product_description.as_deref(),
                    },
                },
            }],
            payment_intent_data: PaymentIntentData {
                application_fee_amount: checkout.split.as_ref().map(|s| s.application_fee_amount),
                transfer_data: checkout.split.as_ref().map(|s| TransferData {
                    destination: &s.destination,
                }),
                metadata: &checkout.metadata,
            },
            metadata: &checkout.metadata,
        };
        let session: ProcessorCheckout = self
            .idempotent(checkout.idempotency_key.as_deref())
            .post_form("/checkout/sessions", form)
            .await
            .map_err(|e| {
                error!("Error creating checkout session: {e:?}");
                ProcessorError::from(e)
            })?;
        info!("Created checkout session with id: {}", session.id);
        Ok(session)
    }

    #[tracing::instrument(skip(self, components))]
    async fn create_account_session(
        &self,
        account_id: &str,
        components: BTreeMap<String, ComponentConfig>,
    ) -> Result<ProcessorAccountSession, ProcessorError> {
        let form = AccountSessionForm {
            account: account_id,
            components: &components,
        };
        Ok(self.client.post_form("/account_sessions", form).await?)
    }

    #[tracing::instrument(skip(self, product))]
    async fn create_product(
        &self,
        account_id: &str,
        product: NewProduct,
    ) -> Result<ProcessorProduct, ProcessorError> {
        let form = ProductForm {
            name: Some(&product.name),
            description: product.description.as_deref(),
            active: None,
            metadata: Some(&product.metadata),
        };
        Ok(self
            .on_account(account_id)?
            .post_form("/products", form)
            .await?)
    }

    #[tracing::instrument(skip(self))]
    async fn update_product(
        &self,
        account_id: &str,
        product_id: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<ProcessorProduct, ProcessorError> {
        let form = ProductForm {
            name: name.as_deref(),
            description: description.as_deref(),
            active: None,
            metadata: None,
        };
        Ok(self
            .on_account(account_id)?
            .post_form(&format!("/products/{product_id}"), form)
            .await?)
    }

    #[tracing::instrument(skip(self))]
    async fn archive_product(
        &self,
        account_id: &str,
        product_id: &str,
    ) -> Result<ProcessorProduct, ProcessorError> {
        let form = ProductForm {
            name: None,
            description: None,
            active: Some(false),
            metadata: None,
        };
        Ok(self
            .on_account(account_id)?
            .post_form(&format!("/products/{product_id}"), form)
            .await?)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_product(
        &self,
        account_id: &str,
        product_id: &str,
    ) -> Result<(), ProcessorError> {
        let _: Deleted = self
            .on_account(account_id)?
            .delete(&format!("/products/{product_id}"))
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn create_price(
        &self,
        account_id: &str,
        product_id: &str,
        unit_amount: i64,
        currency: &str,
    ) -> Result<ProcessorPrice, ProcessorError> {
        let form = PriceForm {
            product: product_id,
            unit_amount,
            currency,
        };
        Ok(self
            .on_account(account_id)?
            .post_form("/prices", form)
            .await?)
    }

    #[tracing::instrument(skip(self))]
    async fn deactivate_price(
        &self,
        account_id: &str,
        price_id: &str,
    ) -> Result<(), ProcessorError> {
        let _: ProcessorPrice = self
            .on_account(account_id)?
            .post_form(
                &format!("/prices/{price_id}"),
                DeactivateForm { active: false },
            )
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, transfer), fields(amount = transfer.amount, destination = %transfer.destination))]
    async fn create_transfer(
        &self,
        transfer: NewTransfer,
    ) -> Result<ProcessorTransfer, ProcessorError> {
        let form = TransferForm {
            amount: transfer.amount,
            currency: &transfer.currency,
            destination: &transfer.destination,
            metadata: &transfer.metadata,
        };
        Ok(self
            .idempotent(transfer.idempotency_key.as_deref())
            .post_form("/transfers", form)
            .await?)
    }
}
