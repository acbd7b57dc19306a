//! Stripe Webhook Handling
//!
//! Verifies signatures and maps the hosted-checkout lifecycle events into
//! [`WebhookEvent`]. Acting on them (clearing a shopper's cart) is left to
//! the caller, which owns the cart store.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use stripe::{Event, EventObject, EventType, Webhook};

use crate::error::{PaymentError, Result};

/// Metadata key tying a hosted checkout to the shopper session that created it
pub const CART_SESSION_KEY: &str = "cart_session";

/// Parsed webhook event
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookEvent {
    /// Hosted checkout paid
    CheckoutCompleted {
        session_id: String,
        cart_session: Option<String>,
        customer_email: Option<String>,
        amount_total: Option<i64>,
    },

    /// Hosted checkout expired without payment
    CheckoutExpired {
        session_id: String,
        cart_session: Option<String>,
    },

    /// Payment attempt failed
    PaymentFailed {
        payment_intent_id: String,
        amount: i64,
    },

    /// Unhandled event type
    Other { event_type: String },
}

/// Webhook handler
pub struct WebhookHandler {
    secret: String,
}

impl WebhookHandler {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Verify signature and parse in one step
    pub fn handle(&self, payload: &str, signature: &str) -> Result<WebhookEvent> {
        let event = self.verify(payload, signature)?;
        let parsed = parse_webhook_event(&event)?;

        match &parsed {
            WebhookEvent::CheckoutCompleted {
                session_id,
                cart_session,
                amount_total,
                ..
            } => {
                tracing::info!(
                    session_id = %session_id,
                    cart_session = ?cart_session,
                    amount_total = ?amount_total,
                    "Hosted checkout completed"
                );
            }
            WebhookEvent::CheckoutExpired { session_id, .. } => {
                tracing::info!(session_id = %session_id, "Hosted checkout expired");
            }
            WebhookEvent::PaymentFailed {
                payment_intent_id,
                amount,
            } => {
                tracing::warn!(
                    payment_intent = %payment_intent_id,
                    amount,
                    "Payment failed"
                );
            }
            WebhookEvent::Other { event_type } => {
                tracing::debug!(event_type = %event_type, "Unhandled webhook event");
            }
        }

        Ok(parsed)
    }

    /// Verify webhook signature and decode the event
    pub fn verify(&self, payload: &str, signature: &str) -> Result<Event> {
        Webhook::construct_event(payload, signature, &self.secret)
            .map_err(|e| PaymentError::WebhookSignature(e.to_string()))
    }

    /// `Stripe-Signature` value for `payload` signed at `timestamp`, for
    /// replaying events against a local endpoint
    pub fn sign(&self, payload: &str, timestamp: i64) -> Result<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.as_bytes())
            .map_err(|e| PaymentError::Config(format!("webhook secret: {}", e)))?;
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        Ok(format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes())))
    }
}

/// Parse Stripe event into our event type
fn parse_webhook_event(event: &Event) -> Result<WebhookEvent> {
    match event.type_ {
        EventType::CheckoutSessionCompleted | EventType::CheckoutSessionExpired => {
            let EventObject::CheckoutSession(session) = &event.data.object else {
                return Err(PaymentError::WebhookParse("Invalid checkout session data".into()));
            };

            let session_id = session.id.to_string();
            let cart_session = session
                .metadata
                .as_ref()
                .and_then(|m| m.get(CART_SESSION_KEY))
                .cloned();

            if event.type_ == EventType::CheckoutSessionCompleted {
                Ok(WebhookEvent::CheckoutCompleted {
                    session_id,
                    cart_session,
                    customer_email: session.customer_email.clone(),
                    amount_total: session.amount_total,
                })
            } else {
                Ok(WebhookEvent::CheckoutExpired {
                    session_id,
                    cart_session,
                })
            }
        }

        EventType::PaymentIntentPaymentFailed => {
            let EventObject::PaymentIntent(intent) = &event.data.object else {
                return Err(PaymentError::WebhookParse("Invalid payment intent data".into()));
            };

            Ok(WebhookEvent::PaymentFailed {
                payment_intent_id: intent.id.to_string(),
                amount: intent.amount,
            })
        }

        _ => Ok(WebhookEvent::Other {
            event_type: format!("{:?}", event.type_),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn now() -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
    }

    fn checkout_event(event_type: &str, cart_session: &str) -> String {
        json!({
            "id": "evt_test_1",
            "object": "event",
            "api_version": "2023-10-16",
            "created": 1_700_000_000,
            "livemode": false,
            "pending_webhooks": 1,
            "request": null,
            "type": event_type,
            "data": {
                "object": {
                    "id": "cs_test_1",
                    "object": "checkout.session",
                    "amount_total": 5800,
                    "currency": "usd",
                    "automatic_tax": {"enabled": false},
                    "created": 1_700_000_000,
                    "custom_fields": [],
                    "custom_text": {},
                    "customer_email": "ada@example.com",
                    "expires_at": 1_700_086_400,
                    "livemode": false,
                    "metadata": {"cart_session": cart_session},
                    "mode": "payment",
                    "payment_method_types": ["card"],
                    "payment_status": "paid",
                    "shipping_options": [],
                    "status": "complete"
                }
            }
        })
        .to_string()
    }

    #[test]
    fn test_signed_checkout_completion_carries_cart_session() {
        let handler = WebhookHandler::new("whsec_test");
        let payload = checkout_event("checkout.session.completed", "alice");
        let signature = handler.sign(&payload, now()).unwrap();

        let event = handler.handle(&payload, &signature).unwrap();

        assert_eq!(
            event,
            WebhookEvent::CheckoutCompleted {
                session_id: "cs_test_1".into(),
                cart_session: Some("alice".into()),
                customer_email: Some("ada@example.com".into()),
                amount_total: Some(5_800),
            }
        );
    }

    #[test]
    fn test_expired_checkout_and_tampered_payload() {
        let handler = WebhookHandler::new("whsec_test");
        let payload = checkout_event("checkout.session.expired", "bob");
        let signature = handler.sign(&payload, now()).unwrap();

        assert!(matches!(
            handler.handle(&payload, &signature).unwrap(),
            WebhookEvent::CheckoutExpired { cart_session: Some(ref s), .. } if s == "bob"
        ));

        let tampered = payload.replace("bob", "eve");
        assert!(matches!(
            handler.handle(&tampered, &signature),
            Err(PaymentError::WebhookSignature(_))
        ));

        let other = WebhookHandler::new("whsec_other");
        assert!(handler.handle(&payload, &other.sign(&payload, now()).unwrap()).is_err());
    }

    #[test]
    fn test_bad_signature_is_rejected() {
        let handler = WebhookHandler::new("whsec_test");
        let err = handler
            .handle(r#"{"id": "evt_1"}"#, "t=1,v1=deadbeef")
            .unwrap_err();
        assert!(matches!(err, PaymentError::WebhookSignature(_)));
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = WebhookEvent::CheckoutExpired {
            session_id: "cs_1".into(),
            cart_session: Some("shopper-1".into()),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "checkout_expired");
        assert_eq!(value["cart_session"], "shopper-1");
    }
}
