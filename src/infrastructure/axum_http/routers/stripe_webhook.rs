use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use serde_json::json;
use tracing::{info, warn};

use crate::{
    application::usecases::billing::{BillingUseCase, StripeGateway, WebhookOutcome},
    domain::{
        repositories::organizations::OrganizationRepository, value_objects::billing::PriceCatalog,
    },
    infrastructure::postgres::{
        postgres_connection::PgPoolSquad, repositories::organizations::OrganizationPostgres,
    },
    payments::{events::ProviderEvent, stripe_client::StripeClient},
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
        .route("/", post(receive_webhook))
        .with_state(Arc::new(billing_usecase))
}

/// Stripe webhook ingress. Rejects only bad signatures; every other
/// problem is logged and acknowledged so the provider does not retry
/// events we can never apply.
pub async fn receive_webhook<O, S>(
    State(billing_usecase): State<Arc<BillingUseCase<O, S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse
where
    O: OrganizationRepository + 'static,
    S: StripeGateway + 'static,
{
    let Some(signature) = headers
        .get("Stripe-Signature")
        .and_then(|value| value.to_str().ok())
    else {
        warn!("webhook: missing Stripe-Signature header");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing signature" })),
        );
    };

    let event = match billing_usecase.verify_webhook(&body, signature) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "webhook: signature verification failed");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid signature" })),
            );
        }
    };

    let event_type = event.type_.clone();
    let provider_event = match ProviderEvent::from_event(&event) {
        Ok(provider_event) => provider_event,
        Err(err) => {
            // Malformed payload for a known type; redelivery would not
            // help, so acknowledge it.
            warn!(event_type, error = %err, "webhook: unparseable event payload");
            return (StatusCode::OK, Json(json!({ "received": true })));
        }
    };

    match billing_usecase.handle_provider_event(provider_event).await {
        WebhookOutcome::Applied { org_id } => {
            info!(event_type, %org_id, "webhook: event applied");
        }
        WebhookOutcome::Skipped(reason) => {
            info!(event_type, ?reason, "webhook: event skipped");
        }
        WebhookOutcome::SoftFailed { code } => {
            warn!(event_type, code, "webhook: event failed; acknowledged anyway");
        }
        WebhookOutcome::Ignored { .. } => {}
    }

    (StatusCode::OK, Json(json!({ "received": true })))
}
