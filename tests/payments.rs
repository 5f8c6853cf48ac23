mod support;

use practitioner_payments_lambda::{
    database::models::{CapabilityFlags, ConnectAccount, PaymentStatus},
    error::AppError,
    workflows::{
        payments::{create_payment_intent, session_idempotency_key, PaymentIntentRequest},
        transfers::{transfer_to_connect, TransferRequest},
    },
};
use serde_json::json;
use support::{caller, live_account, operator, Harness};
use uuid::Uuid;

fn intent_request(client: Uuid, session: Uuid) -> PaymentIntentRequest {
    serde_json::from_value(json!({
        "amount": 9000,
        "currency": "usd",
        "session_id": session,
        "metadata": {
            "practitioner_name": "Dr. Okafor",
            "client_user_id": client,
            "booking_ref": "B-7"
        }
    }))
    .unwrap()
}

#[tokio::test]
async fn payment_is_recorded_pending_with_its_checkout() {
    let h = Harness::new();
    let client = Uuid::new_v4();
    let session = Uuid::new_v4();

    let response = create_payment_intent(&h.state, &caller(client), intent_request(client, session))
        .await
        .unwrap();

    assert_eq!(response.status, PaymentStatus::Pending);
    assert!(response.payment_id.is_some());
    let stored = h.store.payments();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].idempotency_key, session_idempotency_key(session, client));
    assert_eq!(stored[0].metadata["booking_ref"], "B-7");
    assert_eq!(stored[0].checkout_url(), response.checkout_url.as_deref());

    let sent = h.processor.checkouts();
    assert!(sent[0].split.is_none());
    assert_eq!(sent[0].metadata["booking_ref"], "B-7");
}

#[tokio::test]
async fn replay_with_the_same_key_returns_the_stored_payment() {
    let h = Harness::new();
    let client = Uuid::new_v4();
    let session = Uuid::new_v4();

    let first = create_payment_intent(&h.state, &caller(client), intent_request(client, session))
        .await
        .unwrap();
    let second = create_payment_intent(&h.state, &caller(client), intent_request(client, session))
        .await
        .unwrap();

    assert_eq!(first.payment_id, second.payment_id);
    assert_eq!(first.checkout_session_id, second.checkout_session_id);
    assert_eq!(h.processor.count("create_checkout_session"), 1);
    assert_eq!(h.store.payments().len(), 1);
}

#[tokio::test]
async fn paying_on_behalf_of_someone_else_is_forbidden() {
    let h = Harness::new();
    let client = Uuid::new_v4();

    let err = create_payment_intent(
        &h.state,
        &caller(Uuid::new_v4()),
        intent_request(client, Uuid::new_v4()),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, AppError::Forbidden(_)));
    assert!(h.processor.calls().is_empty());
}

#[tokio::test]
async fn amount_below_the_minimum_is_rejected() {
    let h = Harness::new();
    let client = Uuid::new_v4();
    let mut request = intent_request(client, Uuid::new_v4());
    request.amount = Some(10);

    let err = create_payment_intent(&h.state, &caller(client), request)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn transfer_requires_payouts_enabled() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    h.store.seed_connect_account(
        ConnectAccount::new(owner, "acct_new".into(), CapabilityFlags::default(), None),
        chrono::Duration::hours(1),
    );
    h.processor
        .add_account(live_account("acct_new", owner, CapabilityFlags::default()));

    let err = transfer_to_connect(
        &h.state,
        &operator(),
        TransferRequest {
            amount: Some(5_000),
            currency: Some("usd".into()),
            connect_account_id: Some("acct_new".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert!(h.processor.transfers().is_empty());
}

#[tokio::test]
async fn transfer_to_an_onboarded_account() {
    let h = Harness::new();
    let practitioner = h.connected_practitioner("acct_paid");

    let response = transfer_to_connect(
        &h.state,
        &operator(),
        TransferRequest {
            amount: Some(5_000),
            currency: Some("USD".into()),
            connect_account_id: Some("acct_paid".into()),
            idempotency_key: Some("payout-1".into()),
            metadata: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(response.status, "completed");
    assert_eq!(response.amount, 5_000);
    let sent = h.processor.transfers();
    assert_eq!(sent[0].destination, "acct_paid");
    assert_eq!(sent[0].currency, "usd");
    assert_eq!(sent[0].idempotency_key.as_deref(), Some("payout-1"));
    assert_eq!(sent[0].metadata["practitioner_id"], practitioner.to_string());
}

#[tokio::test]
async fn transfer_to_an_unknown_account_is_not_found() {
    let h = Harness::new();
    let err = transfer_to_connect(
        &h.state,
        &operator(),
        TransferRequest {
            amount: Some(5_000),
            currency: Some("usd".into()),
            connect_account_id: Some("acct_nobody".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::AccountNotFound));
}

#[tokio::test]
async fn only_operators_may_transfer() {
    let h = Harness::new();
    let practitioner = h.connected_practitioner("acct_target");

    for outsider in [caller(Uuid::new_v4()), caller(practitioner)] {
        let err = transfer_to_connect(
            &h.state,
            &outsider,
            TransferRequest {
                amount: Some(5_000),
                currency: Some("usd".into()),
                connect_account_id: Some("acct_target".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    assert!(h.processor.transfers().is_empty());
    assert_eq!(h.processor.count("retrieve_account"), 0);
}
