//! Payment Error Types

use agent_core::Retryable;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payment and merchant-protocol errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Stripe rejected the request
    #[error("Stripe error: {0}")]
    Stripe(String),

    /// Stripe unreachable, timed out, or answered 5xx/429
    #[error("Stripe unavailable: {0}")]
    StripeUnavailable(String),

    /// Merchant answered a UCP call with a non-success status
    #[error("UCP request failed with status {status}: {body}")]
    Ucp { status: u16, body: String },

    /// Merchant does not advertise UCP
    #[error("Merchant does not support UCP: {0}")]
    UcpUnsupported(String),

    /// Transport failure talking to a vendor (connect, timeout, reset)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Payment token amount differs from the checkout total
    #[error("Payment amount {token_amount} does not match checkout total {checkout_total}")]
    AmountMismatch {
        checkout_total: i64,
        token_amount: i64,
    },

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Requested object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Webhook signature verification failed
    #[error("Webhook signature invalid: {0}")]
    WebhookSignature(String),

    /// Webhook payload parsing failed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PaymentError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::StripeUnavailable(_) | PaymentError::Http(_) => true,
            PaymentError::Ucp { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Failure reported by Stripe or a merchant, as opposed to a local check
    pub fn is_vendor_failure(&self) -> bool {
        matches!(
            self,
            PaymentError::Stripe(_)
                | PaymentError::StripeUnavailable(_)
                | PaymentError::Ucp { .. }
                | PaymentError::Http(_)
        )
    }

    /// Message safe to show the shopper. Vendor failures keep their status
    /// and body; local checks get friendlier text.
    pub fn user_message(&self) -> String {
        if self.is_vendor_failure() {
            return self.to_string();
        }
        match self {
            PaymentError::UcpUnsupported(_) => "This merchant does not support agentic checkout.".into(),
            PaymentError::AmountMismatch { .. } => "The checkout total changed. Please review it again.".into(),
            PaymentError::NotFound(_) => "The requested order was not found.".into(),
            PaymentError::Config(_) => "Service configuration error.".into(),
            _ => "An error occurred processing your request.".into(),
        }
    }
}

impl Retryable for PaymentError {
    fn is_retryable(&self) -> bool {
        PaymentError::is_retryable(self)
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            PaymentError::Decode(e.to_string())
        } else {
            PaymentError::Http(e.to_string())
        }
    }
}

impl From<stripe::StripeError> for PaymentError {
    fn from(e: stripe::StripeError) -> Self {
        match &e {
            stripe::StripeError::Stripe(req) if req.http_status >= 500 || req.http_status == 429 => {
                PaymentError::StripeUnavailable(e.to_string())
            }
            stripe::StripeError::Timeout | stripe::StripeError::ClientError(_) => {
                PaymentError::StripeUnavailable(e.to_string())
            }
            _ => PaymentError::Stripe(e.to_string()),
        }
    }
}
