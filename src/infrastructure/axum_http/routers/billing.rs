use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::{
    application::usecases::billing::{BillingError, BillingUseCase, StripeGateway},
    domain::{
        repositories::organizations::OrganizationRepository,
        value_objects::{
            billing::{BillingStateDto, BillingSyncResult, PriceCatalog},
            enums::{billing_intervals::BillingInterval, plan_keys::PlanKey},
        },
    },
    infrastructure::{
        axum_http::{auth::AuthUser, error_responses::ApiError},
        postgres::{
            postgres_connection::PgPoolSquad, repositories::organizations::OrganizationPostgres,
        },
    },
    payments::stripe_client::StripeClient,
};

pub fn routes(
    db_pool: Arc<PgPoolSquad>,
    stripe_client: Arc<StripeClient>,
    catalog: PriceCatalog,
) -> Router {
    let organization_repository = OrganizationPostgres::new(Arc::clone(&db_pool));
    let billing_usecase =
        BillingUseCase::new(Arc::new(organization_repository), stripe_client, catalog);

    Router::new()
        .route("/status", get(billing_status))
        .route("/checkout", post(create_checkout))
        .route("/portal", post(create_portal))
        .route("/sync", post(sync_checkout_session))
        .with_state(Arc::new(billing_usecase))
}

#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    pub plan_key: String,
    pub interval: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SyncCheckoutRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct UrlResponse {
    pub ok: bool,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct BillingStateResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub state: BillingStateDto,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub result: BillingSyncResult,
}

pub async fn billing_status<O, S>(
    State(billing_usecase): State<Arc<BillingUseCase<O, S>>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ApiError>
where
    O: OrganizationRepository + 'static,
    S: StripeGateway + 'static,
{
    let state = billing_usecase.get_billing_state(auth.org_id).await?;
    Ok(Json(BillingStateResponse { ok: true, state }))
}

pub async fn create_checkout<O, S>(
    State(billing_usecase): State<Arc<BillingUseCase<O, S>>>,
    auth: AuthUser,
    Json(body): Json<CreateCheckoutRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    O: OrganizationRepository + 'static,
    S: StripeGateway + 'static,
{
    let plan_key = PlanKey::from_str(&body.plan_key).ok_or(BillingError::InvalidPlanKey)?;
    let interval = BillingInterval::from_str(body.interval.as_deref().unwrap_or_default());

    let url = billing_usecase
        .create_checkout_session(auth.org_id, auth.user_id, plan_key, interval)
        .await?;

    Ok(Json(UrlResponse { ok: true, url }))
}

pub async fn create_portal<O, S>(
    State(billing_usecase): State<Arc<BillingUseCase<O, S>>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ApiError>
where
    O: OrganizationRepository + 'static,
    S: StripeGateway + 'static,
{
    let url = billing_usecase
        .create_billing_portal_session(auth.org_id)
        .await?;

    Ok(Json(UrlResponse { ok: true, url }))
}

/// Success-page fallback: the frontend posts the session id back so
/// entitlements are live even when the webhook is delayed.
pub async fn sync_checkout_session<O, S>(
    State(billing_usecase): State<Arc<BillingUseCase<O, S>>>,
    _auth: AuthUser,
    Json(body): Json<SyncCheckoutRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    O: OrganizationRepository + 'static,
    S: StripeGateway + 'static,
{
    let result = billing_usecase
        .sync_from_checkout_session(&body.session_id)
        .await?;

    Ok(Json(SyncResponse { ok: true, result }))
}
