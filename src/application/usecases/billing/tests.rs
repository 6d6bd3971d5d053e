use super::*;

use chrono::Duration as ChronoDuration;
use mockall::Sequence;
use mockall::predicate::eq;

use crate::domain::repositories::organizations::MockOrganizationRepository;
use crate::payments::stripe_client::{
    StripePrice, StripeSubscriptionItem, StripeSubscriptionItems,
};

const PERIOD_END_TS: i64 = 1_893_456_000; // 2030-01-01T00:00:00Z

fn sample_org(id: Uuid) -> OrganizationEntity {
    let now = Utc::now();
    OrganizationEntity {
        id,
        name: "Acme".to_string(),
        slug: "acme".to_string(),
        plan_key: None,
        billing_interval: None,
        subscription_status: None,
        trial_ends_at: None,
        current_period_end: None,
        seats_limit: None,
        stripe_customer_id: Some("cus_123".to_string()),
        stripe_subscription_id: None,
        created_at: now,
        updated_at: now,
    }
}

fn catalog() -> PriceCatalog {
    PriceCatalog::from_entries([
        (
            PlanKey::Solo,
            BillingInterval::Monthly,
            "price_solo_m".to_string(),
        ),
        (
            PlanKey::Team5,
            BillingInterval::Monthly,
            "price_t5_m".to_string(),
        ),
        (
            PlanKey::Team5,
            BillingInterval::Annual,
            "price_t5_a".to_string(),
        ),
    ])
}

fn sample_session(org_id: Uuid) -> StripeCheckoutSession {
    StripeCheckoutSession {
        id: Some("cs_123".to_string()),
        mode: Some("subscription".to_string()),
        client_reference_id: Some(org_id.to_string()),
        customer: Some(Expandable::Id("cus_123".to_string())),
        subscription: Some(Expandable::Id("sub_123".to_string())),
        metadata: None,
    }
}

fn sample_subscription(
    status: &str,
    price_id: &str,
    period_end: Option<i64>,
) -> StripeSubscription {
    StripeSubscription {
        id: Some("sub_123".to_string()),
        status: Some(status.to_string()),
        customer: Some(Expandable::Id("cus_123".to_string())),
        current_period_end: period_end,
        trial_end: None,
        billing_cycle_anchor: None,
        deleted: false,
        metadata: None,
        items: StripeSubscriptionItems {
            data: vec![StripeSubscriptionItem {
                current_period_end: None,
                price: Some(StripePrice {
                    id: price_id.to_string(),
                }),
            }],
        },
    }
}

fn use_case(
    org_repo: MockOrganizationRepository,
    gateway: MockStripeGateway,
) -> BillingUseCase<MockOrganizationRepository, MockStripeGateway> {
    BillingUseCase::new(Arc::new(org_repo), Arc::new(gateway), catalog())
}

fn expected_sync_patch() -> UpdateOrganizationBilling {
    UpdateOrganizationBilling {
        plan_key: Some("team_5".to_string()),
        billing_interval: Some("monthly".to_string()),
        subscription_status: Some("active".to_string()),
        trial_ends_at: Some(None),
        current_period_end: ts_to_datetime(PERIOD_END_TS),
        seats_limit: Some(Some(5)),
        stripe_customer_id: Some("cus_123".to_string()),
        stripe_subscription_id: Some("sub_123".to_string()),
    }
}

#[tokio::test]
async fn sync_maps_checkout_session_to_billing_state() {
    let org_id = Uuid::new_v4();

    let mut org_repo = MockOrganizationRepository::new();
    let mut gateway = MockStripeGateway::new();

    let session = sample_session(org_id);
    gateway
        .expect_retrieve_checkout_session()
        .with(eq("cs_123"))
        .returning(move |_| Ok(Some(session.clone())));
    gateway
        .expect_retrieve_subscription()
        .with(eq("sub_123"))
        .returning(|_| Ok(sample_subscription("active", "price_t5_m", Some(PERIOD_END_TS))));

    let org = sample_org(org_id);
    org_repo
        .expect_find_by_id()
        .with(eq(org_id))
        .returning(move |_| Ok(Some(org.clone())));
    org_repo
        .expect_update_billing()
        .with(eq(org_id), eq(expected_sync_patch()))
        .times(1)
        .returning(|_, _| Ok(()));

    let result = use_case(org_repo, gateway)
        .sync_from_checkout_session("cs_123")
        .await
        .unwrap();

    assert_eq!(result.org_id, org_id);
    assert_eq!(result.plan_key, PlanKey::Team5);
    assert_eq!(result.interval, BillingInterval::Monthly);
    assert_eq!(result.subscription_status, SubscriptionStatus::Active);
    assert_eq!(result.seats_limit, Some(5));
    assert_eq!(result.current_period_end, ts_to_datetime(PERIOD_END_TS));
}

#[tokio::test]
async fn sync_is_idempotent_for_replayed_sessions() {
    let org_id = Uuid::new_v4();

    let mut org_repo = MockOrganizationRepository::new();
    let mut gateway = MockStripeGateway::new();

    let session = sample_session(org_id);
    gateway
        .expect_retrieve_checkout_session()
        .times(2)
        .returning(move |_| Ok(Some(session.clone())));
    gateway
        .expect_retrieve_subscription()
        .times(2)
        .returning(|_| Ok(sample_subscription("active", "price_t5_m", Some(PERIOD_END_TS))));

    let org = sample_org(org_id);
    org_repo
        .expect_find_by_id()
        .times(2)
        .returning(move |_| Ok(Some(org.clone())));
    // Both replays must write the exact same state.
    org_repo
        .expect_update_billing()
        .with(eq(org_id), eq(expected_sync_patch()))
        .times(2)
        .returning(|_, _| Ok(()));

    let uc = use_case(org_repo, gateway);
    let first = uc.sync_from_checkout_session("cs_123").await.unwrap();
    let second = uc.sync_from_checkout_session("cs_123").await.unwrap();

    assert_eq!(first.plan_key, second.plan_key);
    assert_eq!(first.subscription_status, second.subscription_status);
    assert_eq!(first.current_period_end, second.current_period_end);
}

#[tokio::test]
async fn sync_omits_period_end_when_provider_never_reports_it() {
    let org_id = Uuid::new_v4();

    let mut org_repo = MockOrganizationRepository::new();
    let mut gateway = MockStripeGateway::new();

    let session = sample_session(org_id);
    gateway
        .expect_retrieve_checkout_session()
        .returning(move |_| Ok(Some(session.clone())));
    // Period end missing on every attempt; all retries are consumed.
    gateway
        .expect_retrieve_subscription()
        .times(3)
        .returning(|_| Ok(sample_subscription("active", "price_t5_m", None)));

    let org = sample_org(org_id);
    org_repo
        .expect_find_by_id()
        .returning(move |_| Ok(Some(org.clone())));
    org_repo
        .expect_update_billing()
        .withf(|_, patch| patch.current_period_end.is_none())
        .times(1)
        .returning(|_, _| Ok(()));

    let result = use_case(org_repo, gateway)
        .sync_from_checkout_session("cs_123")
        .await
        .unwrap();

    assert_eq!(result.current_period_end, None);
    assert_eq!(result.subscription_status, SubscriptionStatus::Active);
}

#[tokio::test]
async fn sync_stops_retrying_once_period_end_appears() {
    let org_id = Uuid::new_v4();

    let mut org_repo = MockOrganizationRepository::new();
    let mut gateway = MockStripeGateway::new();
    let mut seq = Sequence::new();

    let session = sample_session(org_id);
    gateway
        .expect_retrieve_checkout_session()
        .returning(move |_| Ok(Some(session.clone())));
    gateway
        .expect_retrieve_subscription()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(sample_subscription("active", "price_t5_m", None)));
    gateway
        .expect_retrieve_subscription()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(sample_subscription("active", "price_t5_m", Some(PERIOD_END_TS))));

    let org = sample_org(org_id);
    org_repo
        .expect_find_by_id()
        .returning(move |_| Ok(Some(org.clone())));
    org_repo
        .expect_update_billing()
        .returning(|_, _| Ok(()));

    let result = use_case(org_repo, gateway)
        .sync_from_checkout_session("cs_123")
        .await
        .unwrap();

    assert_eq!(result.current_period_end, ts_to_datetime(PERIOD_END_TS));
}

#[tokio::test]
async fn sync_rejects_non_subscription_mode_without_touching_org() {
    let mut org_repo = MockOrganizationRepository::new();
    let mut gateway = MockStripeGateway::new();

    let mut session = sample_session(Uuid::new_v4());
    session.mode = Some("payment".to_string());
    gateway
        .expect_retrieve_checkout_session()
        .returning(move |_| Ok(Some(session.clone())));
    org_repo.expect_find_by_id().times(0);
    org_repo.expect_update_billing().times(0);

    let err = use_case(org_repo, gateway)
        .sync_from_checkout_session("cs_123")
        .await
        .unwrap_err();

    assert_eq!(err.code(), "INVALID_SESSION_MODE");
    assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sync_surfaces_missing_session_as_not_found() {
    let org_repo = MockOrganizationRepository::new();
    let mut gateway = MockStripeGateway::new();

    gateway
        .expect_retrieve_checkout_session()
        .returning(|_| Ok(None));

    let err = use_case(org_repo, gateway)
        .sync_from_checkout_session("cs_gone")
        .await
        .unwrap_err();

    assert_eq!(err.code(), "SESSION_NOT_FOUND");
    assert_eq!(err.status_code(), axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sync_rejects_deleted_subscription() {
    let org_id = Uuid::new_v4();

    let mut org_repo = MockOrganizationRepository::new();
    let mut gateway = MockStripeGateway::new();

    let session = sample_session(org_id);
    gateway
        .expect_retrieve_checkout_session()
        .returning(move |_| Ok(Some(session.clone())));
    gateway.expect_retrieve_subscription().returning(|_| {
        let mut subscription = sample_subscription("canceled", "price_t5_m", Some(PERIOD_END_TS));
        subscription.deleted = true;
        Ok(subscription)
    });

    let org = sample_org(org_id);
    org_repo
        .expect_find_by_id()
        .returning(move |_| Ok(Some(org.clone())));
    org_repo.expect_update_billing().times(0);

    let err = use_case(org_repo, gateway)
        .sync_from_checkout_session("cs_123")
        .await
        .unwrap_err();

    assert_eq!(err.code(), "SUBSCRIPTION_DELETED");
}

#[tokio::test]
async fn webhook_skips_non_subscription_checkout() {
    let org_repo = MockOrganizationRepository::new();
    let gateway = MockStripeGateway::new();

    let outcome = use_case(org_repo, gateway)
        .handle_provider_event(ProviderEvent::CheckoutCompleted {
            session_id: "cs_123".to_string(),
            mode: Some("payment".to_string()),
        })
        .await;

    assert!(matches!(
        outcome,
        WebhookOutcome::Skipped(SkipReason::NotSubscriptionMode)
    ));
}

#[tokio::test]
async fn webhook_soft_fails_when_checkout_sync_errors() {
    let org_repo = MockOrganizationRepository::new();
    let mut gateway = MockStripeGateway::new();

    gateway
        .expect_retrieve_checkout_session()
        .returning(|_| Ok(None));

    let outcome = use_case(org_repo, gateway)
        .handle_provider_event(ProviderEvent::CheckoutCompleted {
            session_id: "cs_gone".to_string(),
            mode: Some("subscription".to_string()),
        })
        .await;

    assert!(matches!(
        outcome,
        WebhookOutcome::SoftFailed {
            code: "SESSION_NOT_FOUND"
        }
    ));
}

#[tokio::test]
async fn webhook_applies_subscription_update() {
    let org_id = Uuid::new_v4();

    let mut org_repo = MockOrganizationRepository::new();
    let gateway = MockStripeGateway::new();

    let org = sample_org(org_id);
    org_repo
        .expect_find_by_stripe_customer_id()
        .with(eq("cus_123"))
        .returning(move |_| Ok(Some(org.clone())));
    org_repo
        .expect_update_billing()
        .with(eq(org_id), eq(expected_sync_patch()))
        .times(1)
        .returning(|_, _| Ok(()));

    let outcome = use_case(org_repo, gateway)
        .handle_provider_event(ProviderEvent::SubscriptionUpdated(sample_subscription(
            "active",
            "price_t5_m",
            Some(PERIOD_END_TS),
        )))
        .await;

    assert!(matches!(outcome, WebhookOutcome::Applied { org_id: id } if id == org_id));
}

#[tokio::test]
async fn webhook_resolves_org_via_metadata_when_customer_is_unknown() {
    let org_id = Uuid::new_v4();

    let mut org_repo = MockOrganizationRepository::new();
    let gateway = MockStripeGateway::new();

    let mut subscription = sample_subscription("active", "price_t5_m", Some(PERIOD_END_TS));
    subscription.metadata = Some(HashMap::from([(
        "org_id".to_string(),
        org_id.to_string(),
    )]));

    org_repo
        .expect_find_by_stripe_customer_id()
        .returning(|_| Ok(None));
    let org = sample_org(org_id);
    org_repo
        .expect_find_by_id()
        .with(eq(org_id))
        .returning(move |_| Ok(Some(org.clone())));
    org_repo
        .expect_update_billing()
        .times(1)
        .returning(|_, _| Ok(()));

    let outcome = use_case(org_repo, gateway)
        .handle_provider_event(ProviderEvent::SubscriptionCreated(subscription))
        .await;

    assert!(matches!(outcome, WebhookOutcome::Applied { org_id: id } if id == org_id));
}

#[tokio::test]
async fn webhook_skips_subscription_with_unknown_price() {
    let mut org_repo = MockOrganizationRepository::new();
    let gateway = MockStripeGateway::new();

    let org = sample_org(Uuid::new_v4());
    org_repo
        .expect_find_by_stripe_customer_id()
        .returning(move |_| Ok(Some(org.clone())));
    org_repo.expect_update_billing().times(0);

    let outcome = use_case(org_repo, gateway)
        .handle_provider_event(ProviderEvent::SubscriptionUpdated(sample_subscription(
            "active",
            "price_unmapped",
            Some(PERIOD_END_TS),
        )))
        .await;

    assert!(matches!(
        outcome,
        WebhookOutcome::Skipped(SkipReason::UnknownPriceId)
    ));
}

#[tokio::test]
async fn webhook_invoice_updates_status_and_period_only() {
    let org_id = Uuid::new_v4();

    let mut org_repo = MockOrganizationRepository::new();
    let mut gateway = MockStripeGateway::new();

    gateway
        .expect_retrieve_subscription()
        .with(eq("sub_123"))
        .returning(|_| Ok(sample_subscription("active", "price_t5_m", Some(PERIOD_END_TS))));

    let org = sample_org(org_id);
    org_repo
        .expect_find_by_stripe_subscription_id()
        .with(eq("sub_123"))
        .returning(move |_| Ok(Some(org.clone())));
    org_repo
        .expect_update_billing()
        .withf(move |id, patch| {
            *id == org_id
                && patch.plan_key.is_none()
                && patch.billing_interval.is_none()
                && patch.seats_limit.is_none()
                && patch.trial_ends_at.is_none()
                && patch.subscription_status == Some("active".to_string())
                && patch.current_period_end == ts_to_datetime(PERIOD_END_TS)
        })
        .times(1)
        .returning(|_, _| Ok(()));

    let outcome = use_case(org_repo, gateway)
        .handle_provider_event(ProviderEvent::InvoicePaid {
            invoice_id: Some("in_123".to_string()),
            subscription_id: Some("sub_123".to_string()),
        })
        .await;

    assert!(matches!(outcome, WebhookOutcome::Applied { .. }));
}

#[tokio::test]
async fn webhook_skips_invoice_without_subscription() {
    let org_repo = MockOrganizationRepository::new();
    let gateway = MockStripeGateway::new();

    let outcome = use_case(org_repo, gateway)
        .handle_provider_event(ProviderEvent::InvoicePaid {
            invoice_id: Some("in_123".to_string()),
            subscription_id: None,
        })
        .await;

    assert!(matches!(
        outcome,
        WebhookOutcome::Skipped(SkipReason::MissingSubscriptionId)
    ));
}

#[tokio::test]
async fn webhook_subscription_deleted_marks_canceled_only() {
    let org_id = Uuid::new_v4();

    let mut org_repo = MockOrganizationRepository::new();
    let gateway = MockStripeGateway::new();

    let org = sample_org(org_id);
    org_repo
        .expect_find_by_stripe_customer_id()
        .with(eq("cus_123"))
        .returning(move |_| Ok(Some(org.clone())));
    org_repo
        .expect_update_billing()
        .withf(move |id, patch| {
            *id == org_id
                && patch.subscription_status == Some("canceled".to_string())
                && patch.plan_key.is_none()
                && patch.current_period_end.is_none()
                && patch.trial_ends_at.is_none()
                && patch.seats_limit.is_none()
        })
        .times(1)
        .returning(|_, _| Ok(()));

    let outcome = use_case(org_repo, gateway)
        .handle_provider_event(ProviderEvent::SubscriptionDeleted {
            subscription_id: Some("sub_123".to_string()),
            customer_id: Some("cus_123".to_string()),
        })
        .await;

    assert!(matches!(outcome, WebhookOutcome::Applied { org_id: id } if id == org_id));
}

#[tokio::test]
async fn webhook_passes_through_ignored_events() {
    let org_repo = MockOrganizationRepository::new();
    let gateway = MockStripeGateway::new();

    let outcome = use_case(org_repo, gateway)
        .handle_provider_event(ProviderEvent::Ignored {
            event_type: "customer.updated".to_string(),
        })
        .await;

    assert!(
        matches!(outcome, WebhookOutcome::Ignored { event_type } if event_type == "customer.updated")
    );
}

#[tokio::test]
async fn checkout_creates_and_persists_customer_when_missing() {
    let org_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();

    let mut org_repo = MockOrganizationRepository::new();
    let mut gateway = MockStripeGateway::new();

    let mut org = sample_org(org_id);
    org.stripe_customer_id = None;
    org_repo
        .expect_find_by_id()
        .with(eq(org_id))
        .returning(move |_| Ok(Some(org.clone())));

    gateway
        .expect_create_customer()
        .with(eq("Acme"), eq(org_id))
        .times(1)
        .returning(|_, _| Ok("cus_new".to_string()));
    org_repo
        .expect_set_stripe_customer_id()
        .with(eq(org_id), eq("cus_new"))
        .times(1)
        .returning(|_, _| Ok(()));

    gateway
        .expect_create_checkout_session()
        .withf(move |price_id, customer_id, client_reference_id, metadata| {
            price_id == "price_t5_m"
                && customer_id == "cus_new"
                && client_reference_id == org_id.to_string()
                && metadata.get("plan_key").map(String::as_str) == Some("team_5")
                && metadata.get("interval").map(String::as_str) == Some("monthly")
                && metadata.get("org_id").map(String::as_str) == Some(org_id.to_string().as_str())
        })
        .returning(|_, _, _, _| Ok("https://checkout.example/session".to_string()));

    let url = use_case(org_repo, gateway)
        .create_checkout_session(org_id, user_id, PlanKey::Team5, BillingInterval::Monthly)
        .await
        .unwrap();

    assert_eq!(url, "https://checkout.example/session");
}

#[tokio::test]
async fn checkout_rejects_non_purchasable_plan() {
    let org_repo = MockOrganizationRepository::new();
    let gateway = MockStripeGateway::new();

    let err = use_case(org_repo, gateway)
        .create_checkout_session(
            Uuid::new_v4(),
            Uuid::new_v4(),
            PlanKey::Trial,
            BillingInterval::Monthly,
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), "INVALID_PLAN_KEY");
}

#[tokio::test]
async fn portal_requires_existing_customer() {
    let org_id = Uuid::new_v4();

    let mut org_repo = MockOrganizationRepository::new();
    let gateway = MockStripeGateway::new();

    let mut org = sample_org(org_id);
    org.stripe_customer_id = None;
    org_repo
        .expect_find_by_id()
        .returning(move |_| Ok(Some(org.clone())));

    let err = use_case(org_repo, gateway)
        .create_billing_portal_session(org_id)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "NO_STRIPE_CUSTOMER");
}

#[tokio::test]
async fn billing_state_reports_active_subscription_as_allowed() {
    let org_id = Uuid::new_v4();

    let mut org_repo = MockOrganizationRepository::new();
    let gateway = MockStripeGateway::new();

    let mut org = sample_org(org_id);
    org.plan_key = Some("team_5".to_string());
    org.billing_interval = Some("monthly".to_string());
    org.subscription_status = Some("active".to_string());
    org.seats_limit = Some(5);
    org_repo
        .expect_find_by_id()
        .returning(move |_| Ok(Some(org.clone())));

    let state = use_case(org_repo, gateway)
        .get_billing_state(org_id)
        .await
        .unwrap();

    assert!(state.allowed);
    assert!(!state.billing_required);
    assert!(!state.is_trial);
    assert_eq!(state.trial_days_left, 0);
    assert_eq!(state.plan_key, Some(PlanKey::Team5));
}

#[tokio::test]
async fn billing_state_counts_remaining_trial_days() {
    let org_id = Uuid::new_v4();

    let mut org_repo = MockOrganizationRepository::new();
    let gateway = MockStripeGateway::new();

    let mut org = sample_org(org_id);
    org.plan_key = Some("trial".to_string());
    org.subscription_status = Some("trialing".to_string());
    org.trial_ends_at = Some(Utc::now() + ChronoDuration::days(5));
    org_repo
        .expect_find_by_id()
        .returning(move |_| Ok(Some(org.clone())));

    let state = use_case(org_repo, gateway)
        .get_billing_state(org_id)
        .await
        .unwrap();

    assert!(state.allowed);
    assert!(state.is_trial);
    assert_eq!(state.trial_days_left, 5);
}

#[tokio::test]
async fn ensure_entitled_rejects_expired_trial_with_payment_required() {
    let org_id = Uuid::new_v4();

    let mut org_repo = MockOrganizationRepository::new();
    let gateway = MockStripeGateway::new();

    let mut org = sample_org(org_id);
    org.plan_key = Some("trial".to_string());
    org.subscription_status = Some("trialing".to_string());
    org.trial_ends_at = Some(Utc::now() - ChronoDuration::days(1));
    org_repo
        .expect_find_by_id()
        .returning(move |_| Ok(Some(org.clone())));

    let err = use_case(org_repo, gateway)
        .ensure_entitled(org_id)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "BILLING_REQUIRED");
    assert_eq!(err.status_code(), axum::http::StatusCode::PAYMENT_REQUIRED);
}
