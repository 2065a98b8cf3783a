//! Client for the hosted payment gateway: order creation and verification of
//! the signature the gateway hands back to the browser after payment.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::PaymentConfig;
use crate::error::PaymentError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Order {
    pub id: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
}

#[derive(Debug, Clone)]
pub struct PaymentGateway {
    client: reqwest::Client,
    config: PaymentConfig,
}

impl PaymentGateway {
    pub fn new(config: PaymentConfig) -> PaymentGateway {
        PaymentGateway {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn key_id(&self) -> &str {
        &self.config.key_id
    }

    pub fn default_currency(&self) -> &str {
        &self.config.currency
    }

    fn ensure_configured(&self) -> Result<(), PaymentError> {
        if self.config.is_configured() {
            Ok(())
        } else {
            Err(PaymentError::NotConfigured)
        }
    }

    /// Registers an order of `amount` minor units with the gateway.
    #[tracing::instrument(skip(self))]
    pub async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<Order, PaymentError> {
        self.ensure_configured()?;

        let url = format!("{}/orders", self.config.api_base.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(&OrderRequest {
                amount,
                currency,
                receipt,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Payment gateway refused order: {} {}", status, body);
            return Err(PaymentError::Gateway {
                status: status.as_u16(),
                body,
            });
        }

        let order: Order = response.json().await?;
        tracing::info!("Created payment order {}", order.id);
        Ok(order)
    }

    /// Checks the hex HMAC-SHA256 of `"{order_id}|{payment_id}"`.
    pub fn verify_signature(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<(), PaymentError> {
        self.ensure_configured()?;
        verify_signature(
            self.config.key_secret.as_bytes(),
            order_id,
            payment_id,
            signature,
        )
    }
}

fn payment_mac(secret: &[u8], order_id: &str, payment_id: &str) -> Result<HmacSha256, PaymentError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| PaymentError::NotConfigured)?;
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    Ok(mac)
}

#[cfg(test)]
fn sign(secret: &[u8], order_id: &str, payment_id: &str) -> Result<String, PaymentError> {
    let mac = payment_mac(secret, order_id, payment_id)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_signature(
    secret: &[u8],
    order_id: &str,
    payment_id: &str,
    signature: &str,
) -> Result<(), PaymentError> {
    let expected = hex::decode(signature.trim()).map_err(|_| PaymentError::BadSignature)?;
    payment_mac(secret, order_id, payment_id)?
        .verify_slice(&expected)
        .map_err(|_| PaymentError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"gateway_test_secret";

    fn gateway(key_id: &str, key_secret: &str) -> PaymentGateway {
        PaymentGateway::new(PaymentConfig {
            api_base: "http://127.0.0.1:9".to_string(),
            key_id: key_id.to_string(),
            key_secret: key_secret.to_string(),
            currency: "INR".to_string(),
        })
    }

    #[test]
    fn signature_round_trip() {
        let signature = sign(SECRET, "order_abc", "pay_123").unwrap();
        assert_eq!(signature.len(), 64);
        assert!(verify_signature(SECRET, "order_abc", "pay_123", &signature).is_ok());
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let signature = sign(SECRET, "order_abc", "pay_123").unwrap();

        let other_payment = verify_signature(SECRET, "order_abc", "pay_999", &signature);
        assert!(matches!(other_payment, Err(PaymentError::BadSignature)));

        let not_hex = verify_signature(SECRET, "order_abc", "pay_123", "zz");
        assert!(matches!(not_hex, Err(PaymentError::BadSignature)));
    }

    #[test]
    fn unconfigured_gateway_refuses() {
        let gateway = gateway("", "");
        assert!(matches!(
            gateway.verify_signature("order", "pay", "00"),
            Err(PaymentError::NotConfigured)
        ));
    }

    #[rocket::async_test]
    async fn unconfigured_gateway_makes_no_request() {
        let result = gateway("", "").create_order(100, "INR", "receipt").await;
        assert!(matches!(result, Err(PaymentError::NotConfigured)));
    }

    #[test]
    fn configured_gateway_checks_signature() {
        let gateway = gateway("rzp_test", "gateway_test_secret");
        let signature = sign(SECRET, "order_1", "pay_1").unwrap();
        assert!(gateway.verify_signature("order_1", "pay_1", &signature).is_ok());
        assert_eq!(gateway.key_id(), "rzp_test");
    }
}
