use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use super::models::{
    CapabilityFlags, CheckoutSession, CheckoutSessionStatus, ConnectAccount, NewCheckoutSession,
    NewConnectAccount, NewEmailLog, NewPayment, NewPractitionerProduct, Payment, PaymentUpdate,
    PractitionerProduct, ProductChanges, UserProfile,
};
use super::schema::{
    checkout_sessions, connect_accounts, email_logs, payments, practitioner_products, users,
};
use super::{get_conn, PgPool, RecordStore, StoreError};

/// Postgres-backed record store. Diesel is synchronous, so every query runs on
/// the blocking pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, query: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            query(&mut conn)
        })
        .await?
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        self.run(move |conn| {
            Ok(users::table
                .find(user_id)
                .select(UserProfile::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn set_user_connect_account_id(
        &self,
        user_id: Uuid,
        stripe_account_id: &str,
    ) -> Result<(), StoreError> {
        let stripe_account_id = stripe_account_id.to_string();
        self.run(move |conn| {
            diesel::update(users::table.find(user_id))
                .set((
                    users::stripe_connect_account_id.eq(stripe_account_id),
                    users::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn connect_accounts_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConnectAccount>, StoreError> {
        self.run(move |conn| {
            Ok(connect_accounts::table
                .filter(connect_accounts::user_id.eq(user_id))
                .order_by(connect_accounts::created_at.desc())
                .select(ConnectAccount::as_select())
                .load(conn)?)
        })
        .await
    }

    async fn connect_account_by_stripe_id(
        &self,
        stripe_account_id: &str,
    ) -> Result<Option<ConnectAccount>, StoreError> {
        let stripe_account_id = stripe_account_id.to_string();
        self.run(move |conn| {
            Ok(connect_accounts::table
                .filter(connect_accounts::stripe_account_id.eq(stripe_account_id))
                .select(ConnectAccount::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn insert_connect_account(
        &self,
        account: NewConnectAccount,
    ) -> Result<ConnectAccount, StoreError> {
        self.run(move |conn| {
            Ok(diesel::insert_into(connect_accounts::table)
                .values(&account)
                .returning(ConnectAccount::as_returning())
                .get_result(conn)?)
        })
        .await
    }

    async fn delete_connect_account(&self, id: Uuid) -> Result<(), StoreError> {
        self.run(move |conn| {
            diesel::delete(connect_accounts::table.find(id)).execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn update_connect_account_flags(
        &self,
        id: Uuid,
        flags: CapabilityFlags,
    ) -> Result<ConnectAccount, StoreError> {
        self.run(move |conn| {
            Ok(diesel::update(connect_accounts::table.find(id))
                .set((
                    connect_accounts::charges_enabled.eq(flags.charges_enabled),
                    connect_accounts::payouts_enabled.eq(flags.payouts_enabled),
                    connect_accounts::details_submitted.eq(flags.details_submitted),
                    connect_accounts::status.eq(flags.status()),
                    connect_accounts::updated_at.eq(Utc::now()),
                ))
                .returning(ConnectAccount::as_returning())
                .get_result(conn)?)
        })
        .await
    }

    async fn payment_by_idempotency_key(&self, key: &str) -> Result<Option<Payment>, StoreError> {
        let key = key.to_string();
        self.run(move |conn| {
            Ok(payments::table
                .filter(payments::idempotency_key.eq(key))
                .select(Payment::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn payment_by_checkout_session(
        &self,
        stripe_session_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let stripe_session_id = stripe_session_id.to_string();
        self.run(move |conn| {
            Ok(payments::table
                .filter(payments::stripe_checkout_session_id.eq(stripe_session_id))
                .select(Payment::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn payment_by_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let payment_intent_id = payment_intent_id.to_string();
        self.run(move |conn| {
            Ok(payments::table
                .filter(payments::stripe_payment_intent_id.eq(payment_intent_id))
                .select(Payment::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, StoreError> {
        self.run(move |conn| {
            Ok(diesel::insert_into(payments::table)
                .values(&payment)
                .returning(Payment::as_returning())
                .get_result(conn)?)
        })
        .await
    }

    async fn update_payment(
        &self,
        id: Uuid,
        update: PaymentUpdate,
    ) -> Result<Payment, StoreError> {
        self.run(move |conn| {
            Ok(diesel::update(payments::table.find(id))
                .set((&update, payments::updated_at.eq(Utc::now())))
                .returning(Payment::as_returning())
                .get_result(conn)?)
        })
        .await
    }

    async fn completed_checkout_session(
        &self,
        idempotency_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<CheckoutSession>, StoreError> {
        let idempotency_key = idempotency_key.to_string();
        self.run(move |conn| {
            Ok(checkout_sessions::table
                .filter(checkout_sessions::idempotency_key.eq(idempotency_key))
                .filter(checkout_sessions::status.eq(CheckoutSessionStatus::Completed))
                .filter(checkout_sessions::created_at.ge(since))
                .order_by(checkout_sessions::created_at.desc())
                .select(CheckoutSession::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn insert_checkout_session(
        &self,
        session: NewCheckoutSession,
    ) -> Result<CheckoutSession, StoreError> {
        self.run(move |conn| {
            Ok(diesel::insert_into(checkout_sessions::table)
                .values(&session)
                .returning(CheckoutSession::as_returning())
                .get_result(conn)?)
        })
        .await
    }

    async fn set_checkout_session_status(
        &self,
        stripe_session_id: &str,
        status: CheckoutSessionStatus,
    ) -> Result<Option<CheckoutSession>, StoreError> {
        let stripe_session_id = stripe_session_id.to_string();
        self.run(move |conn| {
            Ok(diesel::update(
                checkout_sessions::table
                    .filter(checkout_sessions::stripe_session_id.eq(stripe_session_id)),
            )
            .set((
                checkout_sessions::status.eq(status),
                checkout_sessions::updated_at.eq(Utc::now()),
            ))
            .returning(CheckoutSession::as_returning())
            .get_result(conn)
            .optional()?)
        })
        .await
    }

    async fn insert_product(
        &self,
        product: NewPractitionerProduct,
    ) -> Result<PractitionerProduct, StoreError> {
        self.run(move |conn| {
            Ok(diesel::insert_into(practitioner_products::table)
                .values(&product)
                .returning(PractitionerProduct::as_returning())
                .get_result(conn)?)
        })
        .await
    }

    async fn product_by_id(&self, id: Uuid) -> Result<Option<PractitionerProduct>, StoreError> {
        self.run(move |conn| {
            Ok(practitioner_products::table
                .find(id)
                .select(PractitionerProduct::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn product_by_price(
        &self,
        practitioner_id: Uuid,
        stripe_price_id: &str,
    ) -> Result<Option<PractitionerProduct>, StoreError> {
        let stripe_price_id = stripe_price_id.to_string();
        self.run(move |conn| {
            Ok(practitioner_products::table
                .filter(practitioner_products::practitioner_id.eq(practitioner_id))
                .filter(practitioner_products::stripe_price_id.eq(stripe_price_id))
                .select(PractitionerProduct::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn update_product(
        &self,
        id: Uuid,
        changes: ProductChanges,
    ) -> Result<PractitionerProduct, StoreError> {
        self.run(move |conn| {
            Ok(diesel::update(practitioner_products::table.find(id))
                .set((&changes, practitioner_products::updated_at.eq(Utc::now())))
                .returning(PractitionerProduct::as_returning())
                .get_result(conn)?)
        })
        .await
    }

    async fn list_products(
        &self,
        practitioner_id: Uuid,
        include_inactive: bool,
    ) -> Result<Vec<PractitionerProduct>, StoreError> {
        self.run(move |conn| {
            let mut query = practitioner_products::table
                .filter(practitioner_products::practitioner_id.eq(practitioner_id))
                .order_by(practitioner_products::created_at.desc())
                .select(PractitionerProduct::as_select())
                .into_boxed();
            if !include_inactive {
                query = query.filter(practitioner_products::is_active.eq(true));
            }
            Ok(query.load(conn)?)
        })
        .await
    }

    async fn insert_email_log(&self, log: NewEmailLog) -> Result<(), StoreError> {
        self.run(move |conn| {
            diesel::insert_into(email_logs::table)
                .values(&log)
                .execute(conn)?;
            Ok(())
        })
        .await
    }
}
