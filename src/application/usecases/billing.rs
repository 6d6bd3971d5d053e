use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        entities::organizations::{OrganizationEntity, UpdateOrganizationBilling},
        repositories::organizations::OrganizationRepository,
        value_objects::{
            billing::{BillingStateDto, BillingSyncResult, PriceCatalog},
            entitlement,
            enums::{
                billing_intervals::BillingInterval, plan_keys::PlanKey,
                subscription_statuses::SubscriptionStatus,
            },
        },
    },
    payments::{
        events::ProviderEvent,
        stripe_client::{Expandable, StripeCheckoutSession, StripeClient, StripeEvent,
            StripeSubscription},
    },
};

const RETRIEVE_SUBSCRIPTION_ATTEMPTS: u32 = 3;
const RETRIEVE_BACKOFF_BASE_MS: u64 = 250;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StripeGateway: Send + Sync {
    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> AnyResult<Option<StripeCheckoutSession>>;

    async fn retrieve_subscription(&self, subscription_id: &str) -> AnyResult<StripeSubscription>;

    async fn create_customer(&self, name: &str, org_id: Uuid) -> AnyResult<String>;

    async fn create_checkout_session(
        &self,
        price_id: &str,
        customer_id: &str,
        client_reference_id: &str,
        metadata: HashMap<String, String>,
    ) -> AnyResult<String>;

    async fn create_portal_session(&self, customer_id: &str) -> AnyResult<String>;

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> AnyResult<StripeEvent>;
}

#[async_trait]
impl StripeGateway for StripeClient {
    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> AnyResult<Option<StripeCheckoutSession>> {
        self.retrieve_checkout_session(session_id).await
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> AnyResult<StripeSubscription> {
        self.retrieve_subscription(subscription_id).await
    }

    async fn create_customer(&self, name: &str, org_id: Uuid) -> AnyResult<String> {
        self.create_customer(name, org_id).await
    }

    async fn create_checkout_session(
        &self,
        price_id: &str,
        customer_id: &str,
        client_reference_id: &str,
        metadata: HashMap<String, String>,
    ) -> AnyResult<String> {
        self.create_checkout_session(price_id, customer_id, client_reference_id, metadata)
            .await
    }

    async fn create_portal_session(&self, customer_id: &str) -> AnyResult<String> {
        self.create_portal_session(customer_id).await
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> AnyResult<StripeEvent> {
        self.verify_webhook_signature(payload, signature)
    }
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("organization not found")]
    OrgNotFound,
    #[error("plan key is not purchasable")]
    InvalidPlanKey,
    #[error("no price configured for plan/interval")]
    PriceNotFound,
    #[error("organization has no billing customer yet")]
    NoStripeCustomer,
    #[error("checkout session not found")]
    SessionNotFound,
    #[error("checkout session is not in subscription mode")]
    InvalidSessionMode,
    #[error("checkout session carries no organization reference")]
    MissingClientReferenceId,
    #[error("checkout session carries no customer id")]
    MissingCustomerId,
    #[error("checkout session carries no subscription")]
    MissingSubscription,
    #[error("subscription was deleted at the provider")]
    SubscriptionDeleted,
    #[error("subscription carries no price")]
    NoPriceOnSubscription,
    #[error("price id is not in the catalog")]
    UnknownPriceId,
    #[error("active subscription or trial required")]
    BillingRequired {
        plan_key: Option<String>,
        subscription_status: Option<String>,
        trial_ends_at: Option<DateTime<Utc>>,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl BillingError {
    /// Stable machine-readable code surfaced in API responses.
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::OrgNotFound => "ORG_NOT_FOUND",
            BillingError::InvalidPlanKey => "INVALID_PLAN_KEY",
            BillingError::PriceNotFound => "PRICE_NOT_FOUND",
            BillingError::NoStripeCustomer => "NO_STRIPE_CUSTOMER",
            BillingError::SessionNotFound => "SESSION_NOT_FOUND",
            BillingError::InvalidSessionMode => "INVALID_SESSION_MODE",
            BillingError::MissingClientReferenceId => "MISSING_CLIENT_REFERENCE_ID",
            BillingError::MissingCustomerId => "MISSING_CUSTOMER_ID",
            BillingError::MissingSubscription => "MISSING_SUBSCRIPTION",
            BillingError::SubscriptionDeleted => "SUBSCRIPTION_DELETED",
            BillingError::NoPriceOnSubscription => "NO_PRICE_ON_SUBSCRIPTION",
            BillingError::UnknownPriceId => "UNKNOWN_PRICE_ID",
            BillingError::BillingRequired { .. } => "BILLING_REQUIRED",
            BillingError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            BillingError::OrgNotFound | BillingError::SessionNotFound => StatusCode::NOT_FOUND,
            BillingError::BillingRequired { .. } => StatusCode::PAYMENT_REQUIRED,
            BillingError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, BillingError>;

/// Why a webhook event produced no state change. Returned instead of
/// an error so the ingress can always acknowledge delivery while
/// tests (and logs) still see the reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotSubscriptionMode,
    OrgNotFound,
    MissingCustomerId,
    MissingSubscriptionId,
    MissingPriceId,
    UnknownPriceId,
}

#[derive(Debug)]
pub enum WebhookOutcome {
    Applied { org_id: Uuid },
    Skipped(SkipReason),
    SoftFailed { code: &'static str },
    Ignored { event_type: String },
}

pub struct BillingUseCase<O, Stripe>
where
    O: OrganizationRepository + 'static,
    Stripe: StripeGateway + 'static,
{
    org_repo: Arc<O>,
    stripe_client: Arc<Stripe>,
    catalog: PriceCatalog,
}

impl<O, Stripe> BillingUseCase<O, Stripe>
where
    O: OrganizationRepository + 'static,
    Stripe: StripeGateway + 'static,
{
    pub fn new(org_repo: Arc<O>, stripe_client: Arc<Stripe>, catalog: PriceCatalog) -> Self {
        Self {
            org_repo,
            stripe_client,
            catalog,
        }
    }

    /// Pure read: derives the entitlement view from the organization
    /// record without touching the provider.
    pub async fn get_billing_state(&self, org_id: Uuid) -> UseCaseResult<BillingStateDto> {
        let org = self.load_org(org_id).await?;

        let status = org
            .subscription_status
            .as_deref()
            .and_then(SubscriptionStatus::from_str);
        let allowed = entitlement::is_allowed(status, org.trial_ends_at);
        let is_trial = status == Some(SubscriptionStatus::Trialing);

        Ok(BillingStateDto {
            org_id: org.id,
            plan_key: org.plan_key.as_deref().and_then(PlanKey::from_str),
            billing_interval: org
                .billing_interval
                .as_deref()
                .map(BillingInterval::from_str),
            subscription_status: status,
            trial_ends_at: org.trial_ends_at,
            current_period_end: org.current_period_end,
            seats_limit: org.seats_limit,
            allowed,
            is_trial,
            trial_days_left: if is_trial {
                entitlement::trial_days_left(org.trial_ends_at)
            } else {
                0
            },
            billing_required: !allowed,
        })
    }

    /// Access gate shared by every billing-protected surface. Uses the
    /// same predicate as `get_billing_state`.
    pub async fn ensure_entitled(&self, org_id: Uuid) -> UseCaseResult<()> {
        let org = self.load_org(org_id).await?;

        let status = org
            .subscription_status
            .as_deref()
            .and_then(SubscriptionStatus::from_str);
        if entitlement::is_allowed(status, org.trial_ends_at) {
            return Ok(());
        }

        let err = BillingError::BillingRequired {
            plan_key: org.plan_key.clone(),
            subscription_status: org.subscription_status.clone(),
            trial_ends_at: org.trial_ends_at,
        };
        warn!(
            %org_id,
            subscription_status = ?org.subscription_status,
            status = err.status_code().as_u16(),
            "billing: organization is not entitled"
        );
        Err(err)
    }

    pub async fn create_checkout_session(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        plan_key: PlanKey,
        interval: BillingInterval,
    ) -> UseCaseResult<String> {
        info!(
            %org_id,
            %user_id,
            plan_key = %plan_key,
            interval = %interval,
            "billing: create checkout session requested"
        );

        if !plan_key.is_purchasable() {
            let err = BillingError::InvalidPlanKey;
            warn!(
                %org_id,
                plan_key = %plan_key,
                status = err.status_code().as_u16(),
                "billing: plan is not purchasable via checkout"
            );
            return Err(err);
        }

        let org = self.load_org(org_id).await?;

        let price_id = self
            .catalog
            .price_id(plan_key, interval)
            .ok_or_else(|| {
                let err = BillingError::PriceNotFound;
                warn!(
                    %org_id,
                    plan_key = %plan_key,
                    interval = %interval,
                    status = err.status_code().as_u16(),
                    "billing: no price configured for plan/interval"
                );
                err
            })?
            .to_string();

        let customer_id = match org.stripe_customer_id.clone() {
            Some(customer_id) => customer_id,
            None => {
                let customer_id = self
                    .stripe_client
                    .create_customer(&org.name, org.id)
                    .await
                    .map_err(|err| {
                        error!(
                            %org_id,
                            error = ?err,
                            "billing: failed to create stripe customer"
                        );
                        BillingError::Internal(err)
                    })?;

                // Persist before creating the session so a retried
                // checkout reuses this customer instead of minting
                // another one.
                self.org_repo
                    .set_stripe_customer_id(org.id, &customer_id)
                    .await
                    .map_err(|err| {
                        error!(
                            %org_id,
                            customer_id = %customer_id,
                            db_error = ?err,
                            "billing: failed to persist stripe customer id"
                        );
                        BillingError::Internal(err)
                    })?;

                customer_id
            }
        };

        let metadata = HashMap::from([
            ("org_id".to_string(), org.id.to_string()),
            ("user_id".to_string(), user_id.to_string()),
            ("plan_key".to_string(), plan_key.to_string()),
            ("interval".to_string(), interval.to_string()),
        ]);

        let checkout_url = self
            .stripe_client
            .create_checkout_session(&price_id, &customer_id, &org.id.to_string(), metadata)
            .await
            .map_err(|err| {
                error!(
                    %org_id,
                    price_id = %price_id,
                    customer_id = %customer_id,
                    error = ?err,
                    "billing: stripe checkout session creation failed"
                );
                BillingError::Internal(err)
            })?;

        info!(%org_id, plan_key = %plan_key, "billing: checkout session created");
        Ok(checkout_url)
    }

    pub async fn create_billing_portal_session(&self, org_id: Uuid) -> UseCaseResult<String> {
        let org = self.load_org(org_id).await?;

        let customer_id = org.stripe_customer_id.ok_or_else(|| {
            let err = BillingError::NoStripeCustomer;
            warn!(
                %org_id,
                status = err.status_code().as_u16(),
                "billing: portal requested before any purchase"
            );
            err
        })?;

        let portal_url = self
            .stripe_client
            .create_portal_session(&customer_id)
            .await
            .map_err(|err| {
                error!(
                    %org_id,
                    customer_id = %customer_id,
                    error = ?err,
                    "billing: stripe portal session creation failed"
                );
                BillingError::Internal(err)
            })?;

        info!(%org_id, "billing: portal session created");
        Ok(portal_url)
    }

    pub fn verify_webhook(&self, payload: &[u8], signature: &str) -> AnyResult<StripeEvent> {
        self.stripe_client.verify_webhook_signature(payload, signature)
    }

    /// Reconciles an organization's billing fields from a completed
    /// checkout session. Idempotent: replaying the same session
    /// converges to the same stored state.
    pub async fn sync_from_checkout_session(
        &self,
        session_id: &str,
    ) -> UseCaseResult<BillingSyncResult> {
        info!(session_id, "billing: syncing from checkout session");

        let session = self
            .stripe_client
            .retrieve_checkout_session(session_id)
            .await
            .map_err(|err| {
                error!(
                    session_id,
                    error = ?err,
                    "billing: failed to retrieve checkout session"
                );
                BillingError::Internal(err)
            })?
            .ok_or(BillingError::SessionNotFound)?;

        if session.mode.as_deref() != Some("subscription") {
            warn!(
                session_id,
                mode = ?session.mode,
                "billing: checkout session is not a subscription"
            );
            return Err(BillingError::InvalidSessionMode);
        }

        let org_id = session
            .client_reference_id
            .as_deref()
            .and_then(|value| Uuid::parse_str(value).ok())
            .ok_or(BillingError::MissingClientReferenceId)?;

        let org = self.load_org(org_id).await?;

        let customer_id = session
            .customer
            .as_ref()
            .map(Expandable::id)
            .ok_or(BillingError::MissingCustomerId)?
            .to_string();

        let subscription_id = session
            .subscription
            .as_ref()
            .map(Expandable::id)
            .ok_or(BillingError::MissingSubscription)?
            .to_string();

        let subscription = self
            .retrieve_subscription_with_retry(&subscription_id)
            .await
            .map_err(|err| {
                error!(
                    session_id,
                    %subscription_id,
                    error = ?err,
                    "billing: failed to retrieve subscription"
                );
                BillingError::Internal(err)
            })?;

        if subscription.deleted {
            return Err(BillingError::SubscriptionDeleted);
        }

        let price_id = subscription
            .price_id()
            .ok_or(BillingError::NoPriceOnSubscription)?;

        let (plan_key, interval) = self.catalog.plan_for_price(price_id).ok_or_else(|| {
            warn!(
                session_id,
                price_id, "billing: price id not in catalog during sync"
            );
            BillingError::UnknownPriceId
        })?;

        let status =
            SubscriptionStatus::from_provider(subscription.status.as_deref().unwrap_or_default());
        let trial_ends_at = trial_ends_at(status, subscription.trial_end);
        let current_period_end = subscription.period_end().and_then(ts_to_datetime);

        if current_period_end.is_none() {
            warn!(
                session_id,
                %subscription_id,
                "billing: period end unavailable after retries; leaving stored value untouched"
            );
        }

        let patch = UpdateOrganizationBilling {
            plan_key: Some(plan_key.to_string()),
            billing_interval: Some(interval.to_string()),
            subscription_status: Some(status.to_string()),
            trial_ends_at: Some(trial_ends_at),
            current_period_end,
            seats_limit: Some(plan_key.seats_limit()),
            stripe_customer_id: Some(customer_id),
            stripe_subscription_id: Some(subscription_id.clone()),
        };

        self.org_repo
            .update_billing(org.id, patch)
            .await
            .map_err(|err| {
                error!(
                    %org_id,
                    %subscription_id,
                    db_error = ?err,
                    "billing: failed to apply billing update after sync"
                );
                BillingError::Internal(err)
            })?;

        info!(
            %org_id,
            plan_key = %plan_key,
            interval = %interval,
            subscription_status = %status,
            "billing: checkout session reconciled"
        );

        Ok(BillingSyncResult {
            org_id: org.id,
            plan_key,
            interval,
            subscription_status: status,
            trial_ends_at,
            current_period_end,
            seats_limit: plan_key.seats_limit(),
        })
    }

    /// Reconciles from a provider webhook event. Never fails the
    /// delivery: problems become `Skipped`/`SoftFailed` outcomes and
    /// a later event (or provider redelivery) self-heals the state.
    pub async fn handle_provider_event(&self, event: ProviderEvent) -> WebhookOutcome {
        match event {
            ProviderEvent::CheckoutCompleted { session_id, mode } => {
                if mode.as_deref() != Some("subscription") {
                    debug!(session_id, ?mode, "billing: non-subscription checkout ignored");
                    return WebhookOutcome::Skipped(SkipReason::NotSubscriptionMode);
                }

                match self.sync_from_checkout_session(&session_id).await {
                    Ok(result) => WebhookOutcome::Applied {
                        org_id: result.org_id,
                    },
                    Err(err) => {
                        warn!(
                            session_id,
                            code = err.code(),
                            error = %err,
                            "billing: checkout.session.completed sync failed; acknowledging anyway"
                        );
                        WebhookOutcome::SoftFailed { code: err.code() }
                    }
                }
            }
            ProviderEvent::SubscriptionCreated(subscription)
            | ProviderEvent::SubscriptionUpdated(subscription) => {
                self.apply_subscription_event(subscription).await
            }
            ProviderEvent::InvoicePaid {
                invoice_id,
                subscription_id,
            } => self.apply_invoice_event(invoice_id, subscription_id).await,
            ProviderEvent::SubscriptionDeleted {
                subscription_id,
                customer_id,
            } => {
                self.apply_subscription_deleted(subscription_id, customer_id)
                    .await
            }
            ProviderEvent::Ignored { event_type } => {
                debug!(event_type, "billing: unhandled provider event type");
                WebhookOutcome::Ignored { event_type }
            }
        }
    }

    async fn apply_subscription_event(&self, subscription: StripeSubscription) -> WebhookOutcome {
        let customer_id = subscription.customer_id().map(str::to_string);

        let org = match self
            .resolve_org(
                None,
                customer_id.as_deref(),
                subscription.metadata_org_id(),
            )
            .await
        {
            Ok(Some(org)) => org,
            Ok(None) => {
                warn!(
                    subscription_id = ?subscription.id,
                    customer_id = ?customer_id,
                    "billing: subscription event matched no organization"
                );
                return WebhookOutcome::Skipped(SkipReason::OrgNotFound);
            }
            Err(err) => {
                error!(error = ?err, "billing: organization lookup failed");
                return WebhookOutcome::SoftFailed {
                    code: "INTERNAL_SERVER_ERROR",
                };
            }
        };

        let Some(price_id) = subscription.price_id().map(str::to_string) else {
            warn!(
                subscription_id = ?subscription.id,
                org_id = %org.id,
                "billing: subscription event carries no price id"
            );
            return WebhookOutcome::Skipped(SkipReason::MissingPriceId);
        };

        let Some((plan_key, interval)) = self.catalog.plan_for_price(&price_id) else {
            warn!(
                subscription_id = ?subscription.id,
                org_id = %org.id,
                price_id = %price_id,
                "billing: subscription event price id not in catalog"
            );
            return WebhookOutcome::Skipped(SkipReason::UnknownPriceId);
        };

        let status =
            SubscriptionStatus::from_provider(subscription.status.as_deref().unwrap_or_default());
        let trial = trial_ends_at(status, subscription.trial_end);

        // Prefer the period end embedded in the event; fall back to one
        // fresh provider lookup. If still absent, omit the field so a
        // previously stored value survives.
        let mut period_end_ts = subscription.period_end();
        if period_end_ts.is_none() {
            if let Some(subscription_id) = subscription.id.as_deref() {
                match self.stripe_client.retrieve_subscription(subscription_id).await {
                    Ok(fresh) => period_end_ts = fresh.period_end(),
                    Err(err) => {
                        warn!(
                            %subscription_id,
                            error = ?err,
                            "billing: fresh subscription lookup for period end failed"
                        );
                    }
                }
            }
        }
        let current_period_end = period_end_ts.and_then(ts_to_datetime);

        let patch = UpdateOrganizationBilling {
            plan_key: Some(plan_key.to_string()),
            billing_interval: Some(interval.to_string()),
            subscription_status: Some(status.to_string()),
            trial_ends_at: Some(trial),
            current_period_end,
            seats_limit: Some(plan_key.seats_limit()),
            stripe_customer_id: customer_id,
            stripe_subscription_id: subscription.id.clone(),
        };

        if let Err(err) = self.org_repo.update_billing(org.id, patch).await {
            error!(
                org_id = %org.id,
                db_error = ?err,
                "billing: failed to apply subscription event update"
            );
            return WebhookOutcome::SoftFailed {
                code: "INTERNAL_SERVER_ERROR",
            };
        }

        info!(
            org_id = %org.id,
            plan_key = %plan_key,
            interval = %interval,
            subscription_status = %status,
            "billing: subscription event reconciled"
        );
        WebhookOutcome::Applied { org_id: org.id }
    }

    async fn apply_invoice_event(
        &self,
        invoice_id: Option<String>,
        subscription_id: Option<String>,
    ) -> WebhookOutcome {
        let Some(subscription_id) = subscription_id else {
            warn!(
                invoice_id = ?invoice_id,
                "billing: invoice event carries no subscription id"
            );
            return WebhookOutcome::Skipped(SkipReason::MissingSubscriptionId);
        };

        // Invoices do not carry full subscription state; the live
        // subscription is the source of truth for status and period.
        let subscription = match self
            .stripe_client
            .retrieve_subscription(&subscription_id)
            .await
        {
            Ok(subscription) => subscription,
            Err(err) => {
                warn!(
                    %subscription_id,
                    error = ?err,
                    "billing: subscription retrieve for invoice event failed"
                );
                return WebhookOutcome::SoftFailed {
                    code: "SUBSCRIPTION_RETRIEVE_FAILED",
                };
            }
        };

        let customer_id = subscription.customer_id().map(str::to_string);
        let org = match self
            .resolve_org(
                subscription.id.as_deref().or(Some(subscription_id.as_str())),
                customer_id.as_deref(),
                subscription.metadata_org_id(),
            )
            .await
        {
            Ok(Some(org)) => org,
            Ok(None) => {
                warn!(
                    %subscription_id,
                    customer_id = ?customer_id,
                    "billing: invoice event matched no organization"
                );
                return WebhookOutcome::Skipped(SkipReason::OrgNotFound);
            }
            Err(err) => {
                error!(error = ?err, "billing: organization lookup failed");
                return WebhookOutcome::SoftFailed {
                    code: "INTERNAL_SERVER_ERROR",
                };
            }
        };

        let status =
            SubscriptionStatus::from_provider(subscription.status.as_deref().unwrap_or_default());

        // An invoice is not authoritative for plan selection: only the
        // status, refs and (when known) the period boundary move.
        let patch = UpdateOrganizationBilling {
            subscription_status: Some(status.to_string()),
            current_period_end: subscription.period_end().and_then(ts_to_datetime),
            stripe_customer_id: customer_id,
            stripe_subscription_id: subscription.id.clone().or(Some(subscription_id.clone())),
            ..Default::default()
        };

        if let Err(err) = self.org_repo.update_billing(org.id, patch).await {
            error!(
                org_id = %org.id,
                %subscription_id,
                db_error = ?err,
                "billing: failed to apply invoice event update"
            );
            return WebhookOutcome::SoftFailed {
                code: "INTERNAL_SERVER_ERROR",
            };
        }

        info!(
            org_id = %org.id,
            %subscription_id,
            subscription_status = %status,
            "billing: invoice event reconciled"
        );
        WebhookOutcome::Applied { org_id: org.id }
    }

    async fn apply_subscription_deleted(
        &self,
        subscription_id: Option<String>,
        customer_id: Option<String>,
    ) -> WebhookOutcome {
        let Some(customer_id) = customer_id else {
            warn!(
                subscription_id = ?subscription_id,
                "billing: subscription.deleted carries no customer id"
            );
            return WebhookOutcome::Skipped(SkipReason::MissingCustomerId);
        };

        let org = match self.org_repo.find_by_stripe_customer_id(&customer_id).await {
            Ok(Some(org)) => org,
            Ok(None) => {
                warn!(
                    customer_id = %customer_id,
                    subscription_id = ?subscription_id,
                    "billing: subscription.deleted matched no organization"
                );
                return WebhookOutcome::Skipped(SkipReason::OrgNotFound);
            }
            Err(err) => {
                error!(error = ?err, "billing: organization lookup failed");
                return WebhookOutcome::SoftFailed {
                    code: "INTERNAL_SERVER_ERROR",
                };
            }
        };

        let patch = UpdateOrganizationBilling {
            subscription_status: Some(SubscriptionStatus::Canceled.to_string()),
            ..Default::default()
        };

        if let Err(err) = self.org_repo.update_billing(org.id, patch).await {
            error!(
                org_id = %org.id,
                db_error = ?err,
                "billing: failed to mark subscription canceled"
            );
            return WebhookOutcome::SoftFailed {
                code: "INTERNAL_SERVER_ERROR",
            };
        }

        info!(org_id = %org.id, "billing: subscription marked canceled");
        WebhookOutcome::Applied { org_id: org.id }
    }

    /// Resolution order: stored subscription ref, stored customer ref,
    /// then the org id embedded in provider metadata.
    async fn resolve_org(
        &self,
        subscription_id: Option<&str>,
        customer_id: Option<&str>,
        metadata_org_id: Option<&str>,
    ) -> AnyResult<Option<OrganizationEntity>> {
        if let Some(subscription_id) = subscription_id {
            if let Some(org) = self
                .org_repo
                .find_by_stripe_subscription_id(subscription_id)
                .await?
            {
                return Ok(Some(org));
            }
        }

        if let Some(customer_id) = customer_id {
            if let Some(org) = self.org_repo.find_by_stripe_customer_id(customer_id).await? {
                return Ok(Some(org));
            }
        }

        if let Some(org_id) = metadata_org_id.and_then(|value| Uuid::parse_str(value).ok()) {
            if let Some(org) = self.org_repo.find_by_id(org_id).await? {
                return Ok(Some(org));
            }
        }

        Ok(None)
    }

    /// The provider can return a subscription snapshot before its
    /// lifecycle fields are populated; retry briefly for the period
    /// end and settle for the last snapshot when it never shows up.
    async fn retrieve_subscription_with_retry(
        &self,
        subscription_id: &str,
    ) -> AnyResult<StripeSubscription> {
        let mut last: Option<StripeSubscription> = None;

        for attempt in 1..=RETRIEVE_SUBSCRIPTION_ATTEMPTS {
            let subscription = self.stripe_client.retrieve_subscription(subscription_id).await?;

            debug!(
                %subscription_id,
                attempt,
                status = ?subscription.status,
                current_period_end = ?subscription.period_end(),
                "billing: subscription snapshot retrieved"
            );

            if subscription.period_end().is_some() {
                return Ok(subscription);
            }
            last = Some(subscription);

            if attempt < RETRIEVE_SUBSCRIPTION_ATTEMPTS {
                let backoff = RETRIEVE_BACKOFF_BASE_MS * 2u64.pow(attempt - 1);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }

        // Unreachable only if attempts were zero; the loop always sets `last`.
        last.ok_or_else(|| anyhow::anyhow!("no subscription snapshot retrieved"))
    }

    async fn load_org(&self, org_id: Uuid) -> UseCaseResult<OrganizationEntity> {
        self.org_repo
            .find_by_id(org_id)
            .await
            .map_err(|err| {
                error!(%org_id, db_error = ?err, "billing: failed to load organization");
                BillingError::Internal(err)
            })?
            .ok_or(BillingError::OrgNotFound)
    }
}

fn trial_ends_at(status: SubscriptionStatus, trial_end: Option<i64>) -> Option<DateTime<Utc>> {
    if status == SubscriptionStatus::Trialing {
        trial_end.and_then(ts_to_datetime)
    } else {
        None
    }
}

fn ts_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

#[cfg(test)]
mod tests;
