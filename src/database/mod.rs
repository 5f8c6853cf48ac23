use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;

pub mod models;
mod pg_store;
pub mod schema;

pub use pg_store::PgStore;

use models::{
    CapabilityFlags, CheckoutSession, CheckoutSessionStatus, ConnectAccount, NewCheckoutSession,
    NewConnectAccount, NewEmailLog, NewPayment, NewPractitionerProduct, Payment, PaymentUpdate,
    PractitionerProduct, ProductChanges, UserProfile,
};

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("record not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<diesel::result::Error> for StoreError {
    fn from(e: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};
        match e {
            Error::NotFound => Self::NotFound,
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                Self::UniqueViolation(info.message().to_string())
            }
            other => Self::Database(other),
        }
    }
}

/// The persisted record store. Accessed with a service-level credential, so
/// ownership checks live in the workflows, not here.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserProfile>, StoreError>;
    async fn set_user_connect_account_id(
        &self,
        user_id: Uuid,
        stripe_account_id: &str,
    ) -> Result<(), StoreError>;

    /// Newest first.
    async fn connect_accounts_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConnectAccount>, StoreError>;
    async fn connect_account_by_stripe_id(
        &self,
        stripe_account_id: &str,
    ) -> Result<Option<ConnectAccount>, StoreError>;
    async fn insert_connect_account(
        &self,
        account: NewConnectAccount,
    ) -> Result<ConnectAccount, StoreError>;
    async fn delete_connect_account(&self, id: Uuid) -> Result<(), StoreError>;
    async fn update_connect_account_flags(
        &self,
        id: Uuid,
        flags: CapabilityFlags,
    ) -> Result<ConnectAccount, StoreError>;

    async fn payment_by_idempotency_key(&self, key: &str) -> Result<Option<Payment>, StoreError>;
    async fn payment_by_checkout_session(
        &self,
        stripe_session_id: &str,
    ) -> Result<Option<Payment>, StoreError>;
    async fn payment_by_intent(&self, payment_intent_id: &str)
        -> Result<Option<Payment>, StoreError>;
    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, StoreError>;
    async fn update_payment(&self, id: Uuid, update: PaymentUpdate)
        -> Result<Payment, StoreError>;

    async fn completed_checkout_session(
        &self,
        idempotency_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<CheckoutSession>, StoreError>;
    async fn insert_checkout_session(
        &self,
        session: NewCheckoutSession,
    ) -> Result<CheckoutSession, StoreError>;
    async fn set_checkout_session_status(
        &self,
        stripe_session_id: &str,
        status: CheckoutSessionStatus,
    ) -> Result<Option<CheckoutSession>, StoreError>;

    async fn insert_product(
        &self,
        product: NewPractitionerProduct,
    ) -> Result<PractitionerProduct, StoreError>;
    async fn product_by_id(&self, id: Uuid) -> Result<Option<PractitionerProduct>, StoreError>;
    async fn product_by_price(
        &self,
        practitioner_id: Uuid,
        stripe_price_id: &str,
    ) -> Result<Option<PractitionerProduct>, StoreError>;
    async fn update_product(
        &self,
        id: Uuid,
        changes: ProductChanges,
    ) -> Result<PractitionerProduct, StoreError>;
    async fn list_products(
        &self,
        practitioner_id: Uuid,
        include_inactive: bool,
    ) -> Result<Vec<PractitionerProduct>, StoreError>;

    async fn insert_email_log(&self, log: NewEmailLog) -> Result<(), StoreError>;
}

pub fn create_db_pool(config: &Config) -> Result<PgPool, StoreError> {
    info!("Connecting to database");

    let manager = ConnectionManager::<PgConnection>::new(config.database_url.clone());
    let pool = Pool::builder()
        .max_size(config.database_pool_size)
        .build(manager)
        .map_err(|e| {
            error!("Failed to create database connection pool: {}", e);
            e
        })?;

    // Verify connection works
    let _conn = get_conn(&pool)?;

    info!("Successfully connected to database");
    Ok(pool)
}

pub fn get_conn(pool: &PgPool) -> Result<PgPooledConnection, StoreError> {
    pool.get().map_err(|e| {
        error!("Failed to get database connection from pool: {}", e);
        StoreError::Pool(e)
    })
}
