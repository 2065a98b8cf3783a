use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod db;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl From<PaymentStatus> for bson::Bson {
    fn from(value: PaymentStatus) -> Self {
        let name = match value {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        };
        bson::Bson::String(name.to_string())
    }
}

/// Payment record of one checkout.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Subscription {
    #[serde(rename = "_id", with = "crate::data::uuid_str")]
    pub id: Uuid,
    #[serde(with = "crate::data::uuid_str")]
    pub student: Uuid,
    #[serde(with = "crate::data::uuid_str")]
    pub level: Uuid,
    /// Batch chosen at checkout, or the personal batch created on payment.
    #[serde(default, with = "crate::data::uuid_str::option")]
    pub batch: Option<Uuid>,
    pub order_id: String,
    #[serde(default)]
    pub payment_id: Option<String>,
    /// Minor currency units.
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn pending(
        student: Uuid,
        level: Uuid,
        batch: Option<Uuid>,
        order_id: String,
        amount: i64,
        currency: String,
    ) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            student,
            level,
            batch,
            order_id,
            payment_id: None,
            amount,
            currency,
            status: PaymentStatus::Pending,
            created: Utc::now(),
            paid_at: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CheckoutData {
    pub level: Uuid,
    #[serde(default)]
    pub batch: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub subscription: Uuid,
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
    /// Public gateway key the client needs to open its payment form.
    pub key_id: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct VerifyPaymentData {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct Revenue {
    pub currency: String,
    pub total: i64,
    pub payments: u64,
}
