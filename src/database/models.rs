use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::database::schema::{
    checkout_sessions, connect_accounts, email_logs, payments, practitioner_products, users,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[ExistingTypePath = "crate::database::schema::sql_types::ConnectAccountStatus"]
#[serde(rename_all = "snake_case")]
pub enum ConnectAccountStatus {
    Pending,
    Active,
    Restricted,
    Disabled,
}

impl ConnectAccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Restricted => "restricted",
            Self::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[ExistingTypePath = "crate::database::schema::sql_types::PaymentStatus"]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl PaymentStatus {
    /// Terminal rows only accept metadata enrichment.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Succeeded | Self::Failed | Self::Canceled => true,
            Self::Pending | Self::Processing => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[ExistingTypePath = "crate::database::schema::sql_types::CheckoutSessionStatus"]
#[serde(rename_all = "snake_case")]
pub enum CheckoutSessionStatus {
    Pending,
    Completed,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[ExistingTypePath = "crate::database::schema::sql_types::EmailStatus"]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Sent,
    Failed,
}

/// The three processor capability booleans cached on a connect account row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityFlags {
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
}

impl CapabilityFlags {
    pub fn is_fully_onboarded(&self) -> bool {
        self.charges_enabled && self.payouts_enabled && self.details_submitted
    }

    /// `active` iff every capability is on; anything less is `pending`.
    pub fn status(&self) -> ConnectAccountStatus {
        if self.is_fully_onboarded() {
            ConnectAccountStatus::Active
        } else {
            ConnectAccountStatus::Pending
        }
    }
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserProfile {
    pub id: Uuid,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub stripe_connect_account_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = connect_accounts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ConnectAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub stripe_account_id: String,
    pub status: ConnectAccountStatus,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    pub business_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectAccount {
    pub fn flags(&self) -> CapabilityFlags {
        CapabilityFlags {
            charges_enabled: self.charges_enabled,
            payouts_enabled: self.payouts_enabled,
            details_submitted: self.details_submitted,
        }
    }

    pub fn new(
        user_id: Uuid,
        stripe_account_id: String,
        flags: CapabilityFlags,
        business_type: Option<String>,
    ) -> NewConnectAccount {
        NewConnectAccount {
            id: Uuid::new_v4(),
            user_id,
            stripe_account_id,
            status: flags.status(),
            charges_enabled: flags.charges_enabled,
            payouts_enabled: flags.payouts_enabled,
            details_submitted: flags.details_submitted,
            business_type,
        }
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = connect_accounts)]
pub struct NewConnectAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub stripe_account_id: String,
    pub status: ConnectAccountStatus,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    pub business_type: Option<String>,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Payment {
    pub id: Uuid,
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_checkout_session_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_type: String,
    pub user_id: Uuid,
    pub practitioner_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub idempotency_key: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn checkout_url(&self) -> Option<&str> {
        self.metadata.get("checkout_url").and_then(Value::as_str)
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = payments)]
pub struct NewPayment {
    pub id: Uuid,
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_checkout_session_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_type: String,
    pub user_id: Uuid,
    pub practitioner_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub idempotency_key: String,
    pub metadata: Value,
}

#[derive(AsChangeset, Debug, Clone, Default)]
#[diesel(table_name = payments)]
pub struct PaymentUpdate {
    pub status: Option<PaymentStatus>,
    pub stripe_payment_intent_id: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = checkout_sessions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CheckoutSession {
    pub id: Uuid,
    pub practitioner_id: Uuid,
    pub client_email: String,
    pub client_user_id: Option<Uuid>,
    pub idempotency_key: String,
    pub stripe_session_id: String,
    pub checkout_url: String,
    pub amount: i64,
    pub application_fee_amount: i64,
    pub currency: String,
    pub status: CheckoutSessionStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = checkout_sessions)]
pub struct NewCheckoutSession {
    pub id: Uuid,
    pub practitioner_id: Uuid,
    pub client_email: String,
    pub client_user_id: Option<Uuid>,
    pub idempotency_key: String,
    pub stripe_session_id: String,
    pub checkout_url: String,
    pub amount: i64,
    pub application_fee_amount: i64,
    pub currency: String,
    pub status: CheckoutSessionStatus,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = practitioner_products)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PractitionerProduct {
    pub id: Uuid,
    pub practitioner_id: Uuid,
    pub stripe_product_id: String,
    pub stripe_price_id: String,
    pub name: String,
    pub description: Option<String>,
    pub price_amount: i64,
    pub currency: String,
    pub duration_minutes: i32,
    pub category: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = practitioner_products)]
pub struct NewPractitionerProduct {
    pub id: Uuid,
    pub practitioner_id: Uuid,
    pub stripe_product_id: String,
    pub stripe_price_id: String,
    pub name: String,
    pub description: Option<String>,
    pub price_amount: i64,
    pub currency: String,
    pub duration_minutes: i32,
    pub category: Option<String>,
    pub is_active: bool,
}

#[derive(AsChangeset, Debug, Clone, Default)]
#[diesel(table_name = practitioner_products)]
pub struct ProductChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_amount: Option<i64>,
    pub stripe_price_id: Option<String>,
    pub duration_minutes: Option<i32>,
    pub category: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = email_logs)]
pub struct NewEmailLog {
    pub id: Uuid,
    pub email_type: String,
    pub recipient: String,
    pub subject: String,
    pub status: EmailStatus,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
}
