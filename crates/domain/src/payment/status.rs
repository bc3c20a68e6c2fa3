//! Payment attempt state machine and provider enumeration.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The status of a single payment attempt.
///
/// State transitions:
/// ```text
/// Pending ──┬──► Processing ──┬──► Completed
///           │                 └──► Failed
///           └──► Failed
/// ```
/// A retry after failure is a new attempt, never a transition out of `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Row created, gateway not yet called.
    #[default]
    Pending,

    /// Gateway accepted the request; waiting for its callback.
    Processing,

    /// Funds captured (terminal state).
    Completed,

    /// Gateway refused or the customer declined (terminal state).
    Failed,
}

impl PaymentStatus {
    /// Returns true if the attempt may move from `self` to `next`.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing | Failed) | (Processing, Completed | Failed)
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "processing" => Ok(PaymentStatus::Processing),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(DomainError::UnknownVariant {
                kind: "payment status",
                value: other.to_string(),
            }),
        }
    }
}

/// Payment provider a payment attempt was made with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    /// Mobile-money STK push.
    Mpesa,
    /// Card payments through hosted payment intents.
    Stripe,
    /// Collected by the courier; no gateway involved.
    CashOnDelivery,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Mpesa => "mpesa",
            PaymentProvider::Stripe => "stripe",
            PaymentProvider::CashOnDelivery => "cash_on_delivery",
        }
    }
}

impl std::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentProvider {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mpesa" => Ok(PaymentProvider::Mpesa),
            "stripe" => Ok(PaymentProvider::Stripe),
            "cash_on_delivery" => Ok(PaymentProvider::CashOnDelivery),
            other => Err(DomainError::UnknownVariant {
                kind: "payment provider",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use PaymentStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(!PaymentStatus::Processing.is_terminal());
        assert!(PaymentStatus::Completed.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
    }

    #[test]
    fn test_provider_round_trip() {
        for provider in [
            PaymentProvider::Mpesa,
            PaymentProvider::Stripe,
            PaymentProvider::CashOnDelivery,
        ] {
            assert_eq!(provider.as_str().parse::<PaymentProvider>().unwrap(), provider);
        }
        assert!("paypal".parse::<PaymentProvider>().is_err());
    }
}
