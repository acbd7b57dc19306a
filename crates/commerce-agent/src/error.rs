//! Error Types for Commerce Agent

use agent_payments::PaymentError;
use thiserror::Error;

use crate::browser::BrowserError;

pub type Result<T> = std::result::Result<T, CommerceError>;

#[derive(Error, Debug)]
pub enum CommerceError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("No active checkout")]
    NoActiveCheckout,

    #[error("Checkout {actual} does not match the active checkout {expected}")]
    CheckoutMismatch { expected: String, actual: String },

    #[error("Checkout {id} is {status} and can no longer change")]
    CheckoutClosed { id: String, status: String },

    #[error("{0} is not configured")]
    NotConfigured(String),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("Browser automation error: {0}")]
    Browser(#[from] BrowserError),
}

impl CommerceError {
    /// Transient vendor failures the caller may retry
    pub fn is_retryable(&self) -> bool {
        match self {
            CommerceError::Payment(e) => e.is_retryable(),
            CommerceError::Browser(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Whether a missing dependency caused this, rather than the request
    pub fn is_unconfigured(&self) -> bool {
        matches!(self, CommerceError::NotConfigured(_))
    }

    pub fn user_message(&self) -> String {
        match self {
            CommerceError::Validation(msg) => msg.clone(),
            CommerceError::EmptyCart => "Your cart is empty. Add items before checking out.".into(),
            CommerceError::NoActiveCheckout => "There is no checkout in progress.".into(),
            CommerceError::CheckoutMismatch { .. } => {
                "That checkout is not the one in progress for this cart.".into()
            }
            CommerceError::CheckoutClosed { status, .. } => {
                format!("This checkout is already {}.", status)
            }
            CommerceError::NotConfigured(what) => format!("{} is not available right now.", what),
            CommerceError::Payment(e) => e.user_message(),
            CommerceError::Browser(_) => "Automated checkout failed. Please check out manually.".into(),
        }
    }
}
