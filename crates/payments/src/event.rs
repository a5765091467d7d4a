use serde::{Deserialize, Serialize};

use sketchforge_core::OwnerId;

/// Kind of provider event. Unknown kinds are accepted and ignored so the
/// provider does not retry them forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentEventKind {
    /// Checkout finished; grants credits.
    #[serde(rename = "checkout.completed")]
    CheckoutCompleted,

    /// Provider-side failure callback; corrects a record's status.
    #[serde(rename = "payment.failed")]
    PaymentFailed,

    #[serde(other)]
    Unknown,
}

/// A payment-provider webhook event (already signature-verified).
///
/// `transaction_id` is the idempotency key; `owner_id` is absent for guest
/// purchases, which are recorded but credit no account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    /// Provider event id (distinct from the transaction: one transaction may
    /// arrive through several delivery attempts and event ids).
    pub id: String,

    #[serde(rename = "type")]
    pub kind: PaymentEventKind,

    /// External transaction id (e.g. the checkout session id).
    pub transaction_id: String,

    #[serde(default)]
    pub owner_id: Option<OwnerId>,

    #[serde(default)]
    pub amount_cents: i64,

    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default)]
    pub credits: i64,

    #[serde(default)]
    pub customer_email: Option<String>,
}

fn default_currency() -> String {
    "usd".to_string()
}
