//! In-memory collaborators for exercising workflows without Postgres,
//! the processor, the auth service, or the mail provider.

#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use practitioner_payments_lambda::{
    auth::{AuthUser, AuthVerifier},
    config::Config,
    database::{
        models::{
            CapabilityFlags, CheckoutSession, CheckoutSessionStatus, ConnectAccount,
            NewCheckoutSession, NewConnectAccount, NewEmailLog, NewPayment,
            NewPractitionerProduct, Payment, PaymentUpdate, PractitionerProduct, ProductChanges,
            UserProfile,
        },
        RecordStore, StoreError,
    },
    email::{EmailError, Mailer, OutgoingEmail},
    error::AppError,
    processor::{
        AccountController, ComponentConfig, ControllerDashboard, ControllerFees,
        ControllerLosses, NewAccount, NewCheckout, NewProduct, NewTransfer, PaymentProcessor,
        ProcessorAccount, ProcessorAccountSession, ProcessorCheckout, ProcessorError,
        ProcessorPrice, ProcessorProduct, ProcessorTransfer,
    },
    AppState,
};
use uuid::Uuid;

pub const OPERATOR_ID: &str = "0b7e2f7c-52a4-4d3e-9a51-6c0c7f1d9e01";

pub fn operator() -> AuthUser {
    caller(OPERATOR_ID.parse().expect("operator id is a uuid"))
}

pub fn test_config() -> Config {
    let vars = HashMap::from([
        ("DATABASE_URL", "postgres://localhost/test"),
        ("STRIPE_SECRET_KEY", "sk_test_fake"),
        ("STRIPE_WEBHOOK_SECRET", "whsec_fake"),
        ("SUPABASE_URL", "https://auth.test"),
        ("SUPABASE_ANON_KEY", "anon"),
        ("RESEND_API_KEY", "re_fake"),
        ("APP_URL", "https://app.test"),
        ("TRANSFER_OPERATOR_IDS", OPERATOR_ID),
    ]);
    Config::from_lookup(|name| vars.get(name).map(|v| v.to_string()))
        .expect("test config is complete")
}

pub fn user(id: Uuid) -> UserProfile {
    UserProfile {
        id,
        email: Some(format!("{id}@example.com")),
        first_name: Some("Robin".into()),
        last_name: Some("Hale".into()),
        stripe_connect_account_id: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn caller(id: Uuid) -> AuthUser {
    AuthUser {
        id,
        email: Some(format!("{id}@example.com")),
    }
}

pub fn platform_controller() -> AccountController {
    AccountController {
        fees: Some(ControllerFees {
            payer: Some("application".into()),
        }),
        losses: Some(ControllerLosses {
            payments: Some("application".into()),
        }),
        stripe_dashboard: Some(ControllerDashboard {
            kind: Some("none".into()),
        }),
    }
}

pub fn legacy_controller() -> AccountController {
    AccountController {
        fees: Some(ControllerFees {
            payer: Some("account".into()),
        }),
        losses: Some(ControllerLosses {
            payments: Some("stripe".into()),
        }),
        stripe_dashboard: Some(ControllerDashboard {
            kind: Some("express".into()),
        }),
    }
}

pub fn live_account(id: &str, owner: Uuid, flags: CapabilityFlags) -> ProcessorAccount {
    ProcessorAccount {
        id: id.to_string(),
        charges_enabled: flags.charges_enabled,
        payouts_enabled: flags.payouts_enabled,
        details_submitted: flags.details_submitted,
        business_type: Some("individual".into()),
        controller: Some(platform_controller()),
        capabilities: HashMap::from([
            ("card_payments".to_string(), "active".to_string()),
            ("transfers".to_string(), "active".to_string()),
        ]),
        metadata: HashMap::from([("user_id".to_string(), owner.to_string())]),
        ..Default::default()
    }
}

pub const ALL_ON: CapabilityFlags = CapabilityFlags {
    charges_enabled: true,
    payouts_enabled: true,
    details_submitted: true,
};

#[derive(Default)]
struct StoreInner {
    users: Vec<UserProfile>,
    connect_accounts: Vec<ConnectAccount>,
    payments: Vec<Payment>,
    checkout_sessions: Vec<CheckoutSession>,
    products: Vec<PractitionerProduct>,
    email_logs: Vec<NewEmailLog>,
    /// Inserted just before the next connect account insert, as if another
    /// request had committed first.
    race_winner: Option<NewConnectAccount>,
    fail_checkout_insert: bool,
    fail_product_insert: bool,
}

#[derive(Default)]
pub struct FakeStore {
    inner: Mutex<StoreInner>,
}

fn connect_row(new: NewConnectAccount, created_at: DateTime<Utc>) -> ConnectAccount {
    ConnectAccount {
        id: new.id,
        user_id: new.user_id,
        stripe_account_id: new.stripe_account_id,
        status: new.status,
        charges_enabled: new.charges_enabled,
        payouts_enabled: new.payouts_enabled,
        details_submitted: new.details_submitted,
        business_type: new.business_type,
        created_at,
        updated_at: created_at,
    }
}

impl FakeStore {
    pub fn add_user(&self, profile: UserProfile) {
        self.inner.lock().unwrap().users.push(profile);
    }

    pub fn user(&self, id: Uuid) -> Option<UserProfile> {
        self.inner
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.id == id)
            .cloned()
    }

    /// Bypasses uniqueness so tests can stage states a live database would refuse.
    pub fn seed_connect_account(&self, new: NewConnectAccount, age: Duration) -> ConnectAccount {
        let row = connect_row(new, Utc::now() - age);
        self.inner.lock().unwrap().connect_accounts.push(row.clone());
        row
    }

    pub fn connect_accounts(&self) -> Vec<ConnectAccount> {
        self.inner.lock().unwrap().connect_accounts.clone()
    }

    pub fn seed_payment(&self, payment: Payment) {
        self.inner.lock().unwrap().payments.push(payment);
    }

    pub fn payments(&self) -> Vec<Payment> {
        self.inner.lock().unwrap().payments.clone()
    }

    pub fn seed_checkout_session(&self, session: CheckoutSession) {
        self.inner.lock().unwrap().checkout_sessions.push(session);
    }

    pub fn checkout_sessions(&self) -> Vec<CheckoutSession> {
        self.inner.lock().unwrap().checkout_sessions.clone()
    }

    pub fn seed_product(&self, product: PractitionerProduct) {
        self.inner.lock().unwrap().products.push(product);
    }

    pub fn products(&self) -> Vec<PractitionerProduct> {
        self.inner.lock().unwrap().products.clone()
    }

    pub fn email_logs(&self) -> Vec<NewEmailLog> {
        self.inner.lock().unwrap().email_logs.clone()
    }

    pub fn stage_race_winner(&self, winner: NewConnectAccount) {
        self.inner.lock().unwrap().race_winner = Some(winner);
    }

    pub fn fail_checkout_insert(&self) {
        self.inner.lock().unwrap().fail_checkout_insert = true;
    }

    pub fn fail_product_insert(&self) {
        self.inner.lock().unwrap().fail_product_insert = true;
    }
}

#[async_trait]
impl RecordStore for FakeStore {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.user(user_id))
    }

    async fn set_user_connect_account_id(
        &self,
        user_id: Uuid,
        stripe_account_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let profile = inner
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(StoreError::NotFound)?;
        profile.stripe_connect_account_id = Some(stripe_account_id.to_string());
        Ok(())
    }

    async fn connect_accounts_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConnectAccount>, StoreError> {
        let mut rows: Vec<_> = self
            .inner
            .lock()
            .unwrap()
            .connect_accounts
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn connect_account_by_stripe_id(
        &self,
        stripe_account_id: &str,
    ) -> Result<Option<ConnectAccount>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .connect_accounts
            .iter()
            .find(|a| a.stripe_account_id == stripe_account_id)
            .cloned())
    }

    async fn insert_connect_account(
        &self,
        account: NewConnectAccount,
    ) -> Result<ConnectAccount, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(winner) = inner.race_winner.take() {
            inner
                .connect_accounts
                .push(connect_row(winner, Utc::now() - Duration::seconds(1)));
        }
        if inner
            .connect_accounts
            .iter()
            .any(|a| a.user_id == account.user_id || a.stripe_account_id == account.stripe_account_id)
        {
            return Err(StoreError::UniqueViolation("connect_accounts".into()));
        }
        let row = connect_row(account, Utc::now());
        inner.connect_accounts.push(row.clone());
        Ok(row)
    }

    async fn delete_connect_account(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .connect_accounts
            .retain(|a| a.id != id);
        Ok(())
    }

    async fn update_connect_account_flags(
        &self,
        id: Uuid,
        flags: CapabilityFlags,
    ) -> Result<ConnectAccount, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let row = inner
            .connect_accounts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(StoreError::NotFound)?;
        row.charges_enabled = flags.charges_enabled;
        row.payouts_enabled = flags.payouts_enabled;
        row.details_submitted = flags.details_submitted;
        row.status = flags.status();
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn payment_by_idempotency_key(&self, key: &str) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .payments
            .iter()
            .find(|p| p.idempotency_key == key)
            .cloned())
    }

    async fn payment_by_checkout_session(
        &self,
        stripe_session_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .payments
            .iter()
            .find(|p| p.stripe_checkout_session_id.as_deref() == Some(stripe_session_id))
            .cloned())
    }

    async fn payment_by_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .payments
            .iter()
            .find(|p| p.stripe_payment_intent_id.as_deref() == Some(payment_intent_id))
            .cloned())
    }

    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .payments
            .iter()
            .any(|p| p.idempotency_key == payment.idempotency_key)
        {
            return Err(StoreError::UniqueViolation("payments_idempotency_key".into()));
        }
        let now = Utc::now();
        let row = Payment {
            id: payment.id,
            stripe_payment_intent_id: payment.stripe_payment_intent_id,
            stripe_checkout_session_id: payment.stripe_checkout_session_id,
            amount: payment.amount,
            currency: payment.currency,
            status: payment.status,
            payment_type: payment.payment_type,
            user_id: payment.user_id,
            practitioner_id: payment.practitioner_id,
            project_id: payment.project_id,
            session_id: payment.session_id,
            idempotency_key: payment.idempotency_key,
            metadata: payment.metadata,
            created_at: now,
            updated_at: now,
        };
        inner.payments.push(row.clone());
        Ok(row)
    }

    async fn update_payment(
        &self,
        id: Uuid,
        update: PaymentUpdate,
    ) -> Result<Payment, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let row = inner
            .payments
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(StoreError::NotFound)?;
        if let Some(status) = update.status {
            row.status = status;
        }
        if let Some(intent) = update.stripe_payment_intent_id {
            row.stripe_payment_intent_id = Some(intent);
        }
        if let Some(metadata) = update.metadata {
            row.metadata = metadata;
        }
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn completed_checkout_session(
        &self,
        idempotency_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<CheckoutSession>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .checkout_sessions
            .iter()
            .filter(|s| {
                s.idempotency_key == idempotency_key
                    && s.status == CheckoutSessionStatus::Completed
                    && s.created_at >= since
            })
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn insert_checkout_session(
        &self,
        session: NewCheckoutSession,
    ) -> Result<CheckoutSession, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_checkout_insert {
            return Err(StoreError::NotFound);
        }
        let now = Utc::now();
        let row = CheckoutSession {
            id: session.id,
            practitioner_id: session.practitioner_id,
            client_email: session.client_email,
            client_user_id: session.client_user_id,
            idempotency_key: session.idempotency_key,
            stripe_session_id: session.stripe_session_id,
            checkout_url: session.checkout_url,
            amount: session.amount,
            application_fee_amount: session.application_fee_amount,
            currency: session.currency,
            status: session.status,
            expires_at: session.expires_at,
            created_at: now,
            updated_at: now,
        };
        inner.checkout_sessions.push(row.clone());
        Ok(row)
    }

    async fn set_checkout_session_status(
        &self,
        stripe_session_id: &str,
        status: CheckoutSessionStatus,
    ) -> Result<Option<CheckoutSession>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner
            .checkout_sessions
            .iter_mut()
            .find(|s| s.stripe_session_id == stripe_session_id)
            .map(|s| {
                s.status = status;
                s.updated_at = Utc::now();
                s.clone()
            }))
    }

    async fn insert_product(
        &self,
        product: NewPractitionerProduct,
    ) -> Result<PractitionerProduct, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_product_insert {
            return Err(StoreError::NotFound);
        }
        let now = Utc::now();
        let row = PractitionerProduct {
            id: product.id,
            practitioner_id: product.practitioner_id,
            stripe_product_id: product.stripe_product_id,
            stripe_price_id: product.stripe_price_id,
            name: product.name,
            description: product.description,
            price_amount: product.price_amount,
            currency: product.currency,
            duration_minutes: product.duration_minutes,
            category: product.category,
            is_active: product.is_active,
            created_at: now,
            updated_at: now,
        };
        inner.products.push(row.clone());
        Ok(row)
    }

    async fn product_by_id(&self, id: Uuid) -> Result<Option<PractitionerProduct>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .products
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn product_by_price(
        &self,
        practitioner_id: Uuid,
        stripe_price_id: &str,
    ) -> Result<Option<PractitionerProduct>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .products
            .iter()
            .find(|p| p.practitioner_id == practitioner_id && p.stripe_price_id == stripe_price_id)
            .cloned())
    }

    async fn update_product(
        &self,
        id: Uuid,
        changes: ProductChanges,
    ) -> Result<PractitionerProduct, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let row = inner
            .products
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(StoreError::NotFound)?;
        if let Some(name) = changes.name {
            row.name = name;
        }
        if let Some(description) = changes.description {
            row.description = Some(description);
        }
        if let Some(amount) = changes.price_amount {
            row.price_amount = amount;
        }
        if let Some(price_id) = changes.stripe_price_id {
            row.stripe_price_id = price_id;
        }
        if let Some(minutes) = changes.duration_minutes {
            row.duration_minutes = minutes;
        }
        if let Some(category) = changes.category {
            row.category = Some(category);
        }
        if let Some(active) = changes.is_active {
            row.is_active = active;
        }
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn list_products(
        &self,
        practitioner_id: Uuid,
        include_inactive: bool,
    ) -> Result<Vec<PractitionerProduct>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .products
            .iter()
            .filter(|p| p.practitioner_id == practitioner_id && (include_inactive || p.is_active))
            .cloned()
            .collect())
    }

    async fn insert_email_log(&self, log: NewEmailLog) -> Result<(), StoreError> {
        self.inner.lock().unwrap().email_logs.push(log);
        Ok(())
    }
}

#[derive(Default)]
struct ProcessorInner {
    accounts: HashMap<String, ProcessorAccount>,
    calls: Vec<String>,
    next_id: u32,
    checkouts: Vec<NewCheckout>,
    transfers: Vec<NewTransfer>,
    deleted_products: Vec<String>,
    archived_products: Vec<String>,
    deactivated_prices: Vec<String>,
    session_components: Option<BTreeMap<String, ComponentConfig>>,
    fail_price: bool,
}

#[derive(Default)]
pub struct FakeProcessor {
    inner: Mutex<ProcessorInner>,
}

impl FakeProcessor {
    pub fn add_account(&self, account: ProcessorAccount) {
        self.inner
            .lock()
            .unwrap()
            .accounts
            .insert(account.id.clone(), account);
    }

    pub fn account(&self, id: &str) -> Option<ProcessorAccount> {
        self.inner.lock().unwrap().accounts.get(id).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == method).count()
    }

    pub fn checkouts(&self) -> Vec<NewCheckout> {
        self.inner.lock().unwrap().checkouts.clone()
    }

    pub fn transfers(&self) -> Vec<NewTransfer> {
        self.inner.lock().unwrap().transfers.clone()
    }

    pub fn deleted_products(&self) -> Vec<String> {
        self.inner.lock().unwrap().deleted_products.clone()
    }

    pub fn archived_products(&self) -> Vec<String> {
        self.inner.lock().unwrap().archived_products.clone()
    }

    pub fn deactivated_prices(&self) -> Vec<String> {
        self.inner.lock().unwrap().deactivated_prices.clone()
    }

    pub fn session_components(&self) -> Option<BTreeMap<String, ComponentConfig>> {
        self.inner.lock().unwrap().session_components.clone()
    }

    pub fn fail_price(&self) {
        self.inner.lock().unwrap().fail_price = true;
    }

    fn record(&self, method: &str) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(method.to_string());
        inner.next_id += 1;
        inner.next_id
    }

    fn known(&self, account_id: &str) -> Result<ProcessorAccount, ProcessorError> {
        self.account(account_id)
            .ok_or_else(|| ProcessorError::NotFound(format!("No such account: '{account_id}'")))
    }
}

#[async_trait]
impl PaymentProcessor for FakeProcessor {
    async fn retrieve_account(&self, account_id: &str) -> Result<ProcessorAccount, ProcessorError> {
        self.record("retrieve_account");
        self.known(account_id)
    }

    async fn create_account(&self, account: NewAccount) -> Result<ProcessorAccount, ProcessorError> {
        let n = self.record("create_account");
        let created = ProcessorAccount {
            id: format!("acct_fake{n}"),
            email: account.email,
            business_type: account.business_type,
            controller: Some(platform_controller()),
            capabilities: HashMap::from([
                ("card_payments".to_string(), "inactive".to_string()),
                ("transfers".to_string(), "inactive".to_string()),
            ]),
            metadata: account.metadata,
            ..Default::default()
        };
        self.add_account(created.clone());
        Ok(created)
    }

    async fn request_capabilities(
        &self,
        account_id: &str,
        capabilities: &[&str],
    ) -> Result<ProcessorAccount, ProcessorError> {
        self.record("request_capabilities");
        let mut inner = self.inner.lock().unwrap();
        let account = inner
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| ProcessorError::NotFound(account_id.to_string()))?;
        for name in capabilities {
            account
                .capabilities
                .insert(name.to_string(), "pending".to_string());
        }
        Ok(account.clone())
    }

    async fn delete_account(&self, account_id: &str) -> Result<(), ProcessorError> {
        self.record("delete_account");
        self.inner
            .lock()
            .unwrap()
            .accounts
            .remove(account_id)
            .map(|_| ())
            .ok_or_else(|| ProcessorError::NotFound(account_id.to_string()))
    }

    async fn create_checkout_session(
        &self,
        checkout: NewCheckout,
    ) -> Result<ProcessorCheckout, ProcessorError> {
        let n = self.record("create_checkout_session");
        self.inner.lock().unwrap().checkouts.push(checkout);
        Ok(ProcessorCheckout {
            id: format!("cs_fake{n}"),
            url: Some(format!("https://checkout.test/cs_fake{n}")),
            payment_intent: None,
            expires_at: Some(Utc::now().timestamp() + 1800),
        })
    }

    async fn create_account_session(
        &self,
        account_id: &str,
        components: BTreeMap<String, ComponentConfig>,
    ) -> Result<ProcessorAccountSession, ProcessorError> {
        let n = self.record("create_account_session");
        self.known(account_id)?;
        self.inner.lock().unwrap().session_components = Some(components);
        Ok(ProcessorAccountSession {
            client_secret: format!("accs_secret_{n}"),
            expires_at: Utc::now().timestamp() + 3600,
            account: account_id.to_string(),
        })
    }

    async fn create_product(
        &self,
        _account_id: &str,
        _product: NewProduct,
    ) -> Result<ProcessorProduct, ProcessorError> {
        let n = self.record("create_product");
        Ok(ProcessorProduct {
            id: format!("prod_fake{n}"),
            active: true,
        })
    }

    async fn update_product(
        &self,
        _account_id: &str,
        product_id: &str,
        _name: Option<String>,
        _description: Option<String>,
    ) -> Result<ProcessorProduct, ProcessorError> {
        self.record("update_product");
        Ok(ProcessorProduct {
            id: product_id.to_string(),
            active: true,
        })
    }

    async fn archive_product(
        &self,
        _account_id: &str,
        product_id: &str,
    ) -> Result<ProcessorProduct, ProcessorError> {
        self.record("archive_product");
        self.inner
            .lock()
            .unwrap()
            .archived_products
            .push(product_id.to_string());
        Ok(ProcessorProduct {
            id: product_id.to_string(),
            active: false,
        })
    }

    async fn delete_product(&self, _account_id: &str, product_id: &str) -> Result<(), ProcessorError> {
        self.record("delete_product");
        self.inner
            .lock()
            .unwrap()
            .deleted_products
            .push(product_id.to_string());
        Ok(())
    }

    async fn create_price(
        &self,
        _account_id: &str,
        _product_id: &str,
        unit_amount: i64,
        currency: &str,
    ) -> Result<ProcessorPrice, ProcessorError> {
        let n = self.record("create_price");
        if self.inner.lock().unwrap().fail_price {
            return Err(ProcessorError::Api {
                status: 400,
                message: "Invalid currency".into(),
                error_type: "invalid_request_error".into(),
                code: None,
            });
        }
        Ok(ProcessorPrice {
            id: format!("price_fake{n}"),
            unit_amount: Some(unit_amount),
            currency: Some(currency.to_string()),
        })
    }

    async fn deactivate_price(&self, _account_id: &str, price_id: &str) -> Result<(), ProcessorError> {
        self.record("deactivate_price");
        self.inner
            .lock()
            .unwrap()
            .deactivated_prices
            .push(price_id.to_string());
        Ok(())
    }

    async fn create_transfer(
        &self,
        transfer: NewTransfer,
    ) -> Result<ProcessorTransfer, ProcessorError> {
        let n = self.record("create_transfer");
        let created = ProcessorTransfer {
            id: format!("tr_fake{n}"),
            amount: transfer.amount,
            currency: transfer.currency.clone(),
            reversed: false,
        };
        self.inner.lock().unwrap().transfers.push(transfer);
        Ok(created)
    }
}

/// Accepts `token-<uuid>` and nothing else.
pub struct FakeAuth;

#[async_trait]
impl AuthVerifier for FakeAuth {
    async fn verify(&self, token: &str) -> Result<AuthUser, AppError> {
        token
            .strip_prefix("token-")
            .and_then(|raw| raw.parse::<Uuid>().ok())
            .map(caller)
            .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".into()))
    }
}

#[derive(Default)]
pub struct FakeMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
    fail: bool,
}

impl FakeMailer {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<String, EmailError> {
        if self.fail {
            return Err(EmailError::Api {
                status: 422,
                body: "invalid from address".into(),
            });
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(email.clone());
        Ok(format!("email_{}", sent.len()))
    }
}

pub struct Harness {
    pub store: Arc<FakeStore>,
    pub processor: Arc<FakeProcessor>,
    pub mailer: Arc<FakeMailer>,
    pub state: AppState,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_mailer(FakeMailer::default())
    }

    pub fn with_mailer(mailer: FakeMailer) -> Self {
        let store = Arc::new(FakeStore::default());
        let processor = Arc::new(FakeProcessor::default());
        let mailer = Arc::new(mailer);
        let state = AppState {
            config: Arc::new(test_config()),
            store: store.clone(),
            processor: processor.clone(),
            auth: Arc::new(FakeAuth),
            mailer: mailer.clone(),
        };
        Self {
            store,
            processor,
            mailer,
            state,
        }
    }

    /// A practitioner with a profile pointer and a live, fully onboarded account.
    pub fn connected_practitioner(&self, account_id: &str) -> Uuid {
        let id = Uuid::new_v4();
        let mut profile = user(id);
        profile.stripe_connect_account_id = Some(account_id.to_string());
        self.store.add_user(profile);
        self.store.seed_connect_account(
            ConnectAccount::new(id, account_id.to_string(), ALL_ON, Some("individual".into())),
            Duration::days(30),
        );
        self.processor.add_account(live_account(account_id, id, ALL_ON));
        id
    }

    pub fn product(&self, practitioner_id: Uuid, price_id: &str, amount: i64) -> PractitionerProduct {
        let now = Utc::now();
        let product = PractitionerProduct {
            id: Uuid::new_v4(),
            practitioner_id,
            stripe_product_id: format!("prod_for_{price_id}"),
            stripe_price_id: price_id.to_string(),
            name: "Individual therapy".into(),
            description: Some("One-to-one session".into()),
            price_amount: amount,
            currency: "usd".into(),
            duration_minutes: 60,
            category: Some("therapy".into()),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.store.seed_product(product.clone());
        product
    }
}
