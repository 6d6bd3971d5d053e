use std::sync::Arc;

use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use serde::Serialize;

use crate::{
    application::usecases::{
        billing::{BillingUseCase, StripeGateway},
        seats::SeatUseCase,
    },
    domain::{
        repositories::{
            organization_members::OrganizationMemberRepository,
            organizations::OrganizationRepository,
        },
        value_objects::billing::{PriceCatalog, SeatAvailability},
    },
    infrastructure::{
        axum_http::{auth::AuthUser, error_responses::ApiError},
        postgres::{
            postgres_connection::PgPoolSquad,
            repositories::{
                organization_members::OrganizationMemberPostgres,
                organizations::OrganizationPostgres,
            },
        },
    },
    payments::stripe_client::StripeClient,
};

pub struct SeatsState<O, S, M>
where
    O: OrganizationRepository + 'static,
    S: StripeGateway + 'static,
    M: OrganizationMemberRepository + 'static,
{
    billing_usecase: BillingUseCase<O, S>,
    seat_usecase: SeatUseCase<O, M>,
}

pub fn routes(
    db_pool: Arc<PgPoolSquad>,
    stripe_client: Arc<StripeClient>,
    catalog: PriceCatalog,
) -> Router {
    let organization_repository = Arc::new(OrganizationPostgres::new(Arc::clone(&db_pool)));
    let member_repository = Arc::new(OrganizationMemberPostgres::new(Arc::clone(&db_pool)));

    let state = SeatsState {
        billing_usecase: BillingUseCase::new(
            Arc::clone(&organization_repository),
            stripe_client,
            catalog,
        ),
        seat_usecase: SeatUseCase::new(organization_repository, member_repository),
    };

    Router::new()
        .route("/seats", get(seat_availability))
        .with_state(Arc::new(state))
}

#[derive(Debug, Serialize)]
pub struct SeatAvailabilityResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub availability: SeatAvailability,
}

/// Billing-gated: an organization past its trial with no active
/// subscription gets 402 before any seat math happens.
pub async fn seat_availability<O, S, M>(
    State(state): State<Arc<SeatsState<O, S, M>>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ApiError>
where
    O: OrganizationRepository + 'static,
    S: StripeGateway + 'static,
    M: OrganizationMemberRepository + 'static,
{
    state.billing_usecase.ensure_entitled(auth.org_id).await?;

    let availability = state.seat_usecase.seat_availability(auth.org_id).await?;
    Ok(Json(SeatAvailabilityResponse {
        ok: true,
        availability,
    }))
}
