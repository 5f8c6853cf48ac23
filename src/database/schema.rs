use diesel::{allow_tables_to_appear_in_same_query, joinable, table};

// Defines database schema for diesel to use
pub mod sql_types {
    #[derive(diesel::query_builder::QueryId, diesel::sql_types::SqlType)]
    #[diesel(postgres_type(name = "connect_account_status"))]
    pub struct ConnectAccountStatus;

    #[derive(diesel::query_builder::QueryId, diesel::sql_types::SqlType)]
    #[diesel(postgres_type(name = "payment_status"))]
    pub struct PaymentStatus;

    #[derive(diesel::query_builder::QueryId, diesel::sql_types::SqlType)]
    #[diesel(postgres_type(name = "checkout_session_status"))]
    pub struct CheckoutSessionStatus;

    #[derive(diesel::query_builder::QueryId, diesel::sql_types::SqlType)]
    #[diesel(postgres_type(name = "email_status"))]
    pub struct EmailStatus;
}

table! {
    users (id) {
        id -> Uuid,
        email -> Nullable<Text>,
        first_name -> Nullable<Text>,
        last_name -> Nullable<Text>,
        stripe_connect_account_id -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    use diesel::sql_types::*;
    use super::sql_types::ConnectAccountStatus;

    connect_accounts (id) {
        id -> Uuid,
        user_id -> Uuid,
        stripe_account_id -> Text,
        status -> ConnectAccountStatus,
        charges_enabled -> Bool,
        payouts_enabled -> Bool,
        details_submitted -> Bool,
        business_type -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    use diesel::sql_types::*;
    use super::sql_types::PaymentStatus;

    payments (id) {
        id -> Uuid,
        stripe_payment_intent_id -> Nullable<Text>,
        stripe_checkout_session_id -> Nullable<Text>,
        amount -> Int8,
        currency -> Text,
        status -> PaymentStatus,
        payment_type -> Text,
        user_id -> Uuid,
        practitioner_id -> Nullable<Uuid>,
        project_id -> Nullable<Uuid>,
        session_id -> Nullable<Uuid>,
        idempotency_key -> Text,
        metadata -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    use diesel::sql_types::*;
    use super::sql_types::CheckoutSessionStatus;

    checkout_sessions (id) {
        id -> Uuid,
        practitioner_id -> Uuid,
        client_email -> Text,
        client_user_id -> Nullable<Uuid>,
        idempotency_key -> Text,
        stripe_session_id -> Text,
        checkout_url -> Text,
        amount -> Int8,
        application_fee_amount -> Int8,
        currency -> Text,
        status -> CheckoutSessionStatus,
        expires_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    practitioner_products (id) {
        id -> Uuid,
        practitioner_id -> Uuid,
        stripe_product_id -> Text,
        stripe_price_id -> Text,
        name -> Text,
        description -> Nullable<Text>,
        price_amount -> Int8,
        currency -> Text,
        duration_minutes -> Int4,
        category -> Nullable<Text>,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    use diesel::sql_types::*;
    use super::sql_types::EmailStatus;

    email_logs (id) {
        id -> Uuid,
        email_type -> Text,
        recipient -> Text,
        subject -> Text,
        status -> EmailStatus,
        provider_message_id -> Nullable<Text>,
        error_message -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

joinable!(connect_accounts -> users (user_id));
joinable!(payments -> users (user_id));
joinable!(practitioner_products -> users (practitioner_id));

allow_tables_to_appear_in_same_query!(
    users,
    connect_accounts,
    payments,
    checkout_sessions,
    practitioner_products,
    email_logs,
);
