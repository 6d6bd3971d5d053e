use anyhow::{Context, Result};
use serde::Deserialize;

use super::stripe_client::{Expandable, StripeEvent, StripeSubscription};

/// Closed union of the provider events the reconciler reacts to. Each
/// variant carries only the fields the reconciler actually reads;
/// everything else the provider sends is `Ignored`.
#[derive(Debug)]
pub enum ProviderEvent {
    CheckoutCompleted {
        session_id: String,
        mode: Option<String>,
    },
    SubscriptionCreated(StripeSubscription),
    SubscriptionUpdated(StripeSubscription),
    InvoicePaid {
        invoice_id: Option<String>,
        subscription_id: Option<String>,
    },
    SubscriptionDeleted {
        subscription_id: Option<String>,
        customer_id: Option<String>,
    },
    Ignored {
        event_type: String,
    },
}

impl ProviderEvent {
    pub fn from_event(event: &StripeEvent) -> Result<Self> {
        match event.type_.as_str() {
            "checkout.session.completed" => {
                #[derive(Deserialize)]
                struct SessionObject {
                    id: String,
                    mode: Option<String>,
                }

                let session: SessionObject = serde_json::from_value(event.data.object.clone())
                    .context("invalid checkout session payload")?;
                Ok(ProviderEvent::CheckoutCompleted {
                    session_id: session.id,
                    mode: session.mode,
                })
            }
            "customer.subscription.created" | "customer.subscription.updated" => {
                let subscription: StripeSubscription =
                    serde_json::from_value(event.data.object.clone())
                        .context("invalid subscription payload")?;
                if event.type_ == "customer.subscription.created" {
                    Ok(ProviderEvent::SubscriptionCreated(subscription))
                } else {
                    Ok(ProviderEvent::SubscriptionUpdated(subscription))
                }
            }
            "invoice.payment_succeeded" | "invoice.paid" => {
                #[derive(Deserialize)]
                struct InvoiceObject {
                    id: Option<String>,
                    subscription: Option<Expandable>,
                }

                let invoice: InvoiceObject = serde_json::from_value(event.data.object.clone())
                    .context("invalid invoice payload")?;
                Ok(ProviderEvent::InvoicePaid {
                    invoice_id: invoice.id,
                    subscription_id: invoice
                        .subscription
                        .map(|value| value.id().to_string()),
                })
            }
            "customer.subscription.deleted" => {
                #[derive(Deserialize)]
                struct SubscriptionObject {
                    id: Option<String>,
                    customer: Option<Expandable>,
                }

                let subscription: SubscriptionObject =
                    serde_json::from_value(event.data.object.clone())
                        .context("invalid subscription payload")?;
                Ok(ProviderEvent::SubscriptionDeleted {
                    subscription_id: subscription.id,
                    customer_id: subscription.customer.map(|value| value.id().to_string()),
                })
            }
            other => Ok(ProviderEvent::Ignored {
                event_type: other.to_string(),
            }),
        }
    }
}
