//! Checkout-provider client and webhook verification.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::config::Payment;
use crate::error::{Result, ServerError};
use crate::tour::Tour;
use crate::user::User;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_CURRENCY: &str = "usd";
/// Webhook timestamps older than this are replays.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Hosted checkout session returned by the provider.
#[derive(Debug, Deserialize, Serialize)]
pub struct CheckoutSession {
    pub id: String,
    /// Hosted payment page the client is redirected to.
    pub url: String,
}

/// Webhook event sent by the provider once a session completes.
#[derive(Debug, Deserialize)]
pub struct CheckoutEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: CheckoutEventData,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutEventData {
    pub object: CompletedSession,
}

#[derive(Debug, Deserialize)]
pub struct CompletedSession {
    /// Tour bought, carried through `client_reference_id`.
    pub client_reference_id: Uuid,
    pub customer_email: String,
    /// Total in cents.
    pub amount_total: i64,
}

#[derive(Debug, Serialize)]
struct CreateSession<'a> {
    client_reference_id: Uuid,
    customer_email: &'a str,
    currency: &'a str,
    /// Price in cents.
    unit_amount: i64,
    quantity: u32,
    name: &'a str,
    description: &'a str,
    images: Vec<String>,
    success_url: &'a str,
    cancel_url: &'a str,
    mode: &'static str,
}

/// Client for the hosted checkout provider. Without credentials every call
/// fails with an operational error instead of reaching the network.
#[derive(Clone, Debug, Default)]
pub struct CheckoutClient {
    http: reqwest::Client,
    api_url: String,
    secret_key: String,
    webhook_secret: String,
    currency: String,
}

impl CheckoutClient {
    pub fn new(config: &Payment) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: config.api_url.trim_end_matches('/').to_owned(),
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            currency: config
                .currency
                .clone()
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_owned()),
        }
    }

    /// Open a hosted checkout session for one tour seat.
    pub async fn create_session(
        &self,
        tour: &Tour,
        user: &User,
        base_url: &str,
        cover_url: String,
    ) -> Result<CheckoutSession> {
        if self.secret_key.is_empty() {
            return Err(ServerError::Payment(
                "checkout provider is not configured".to_owned(),
            ));
        }

        let base = base_url.trim_end_matches('/');
        let success_url = format!("{base}/my-tours?alert=booking");
        let cancel_url = format!("{base}/tour/{}", tour.slug);
        let name = format!("{} Tour", tour.name);
        let body = CreateSession {
            client_reference_id: tour.id,
            customer_email: &user.email,
            currency: &self.currency,
            unit_amount: (tour.price * 100.0).round() as i64,
            quantity: 1,
            name: &name,
            description: &tour.summary,
            images: vec![cover_url],
            success_url: &success_url,
            cancel_url: &cancel_url,
            mode: "payment",
        };

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_url))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| ServerError::Payment(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ServerError::Payment(format!(
                "provider answered {}",
                response.status()
            )));
        }

        response
            .json::<CheckoutSession>()
            .await
            .map_err(|err| ServerError::Payment(err.to_string()))
    }

    /// Check a webhook `Signature` header of the form `t=<unix>,v1=<hex>`,
    /// where `v1` is the HMAC-SHA256 of `"{t}.{body}"` under the shared
    /// webhook secret.
    pub fn verify_signature(
        &self,
        header: &str,
        body: &[u8],
    ) -> Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| ServerError::Internal {
                details: "system clock before unix epoch".into(),
                source: Some(Box::new(err)),
            })?
            .as_secs() as i64;

        self.verify_signature_at(header, body, now)
    }

    fn verify_signature_at(
        &self,
        header: &str,
        body: &[u8],
        now: i64,
    ) -> Result<()> {
        // Without a shared secret every signature would verify against an
        // empty HMAC key, so nothing gets accepted at all.
        if self.webhook_secret.is_empty() {
            return Err(ServerError::Payment(
                "webhook secret is not configured".to_owned(),
            ));
        }

        let invalid = || {
            ServerError::BadRequest("invalid webhook signature".to_owned())
        };

        let mut timestamp = None;
        let mut signature = None;
        for pair in header.split(',') {
            match pair.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => signature = Some(value),
                _ => {},
            }
        }

        let timestamp: i64 = timestamp
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(invalid)?;
        let signature =
            hex::decode(signature.ok_or_else(invalid)?)
                .map_err(|_| invalid())?;

        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(ServerError::BadRequest(
                "webhook signature timestamp out of tolerance".to_owned(),
            ));
        }

        let mut mac =
            HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
                .map_err(|_| invalid())?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);

        mac.verify_slice(&signature).map_err(|_| invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> CheckoutClient {
        CheckoutClient::new(&Payment {
            api_url: "https://pay.example.com".into(),
            secret_key: "sk_test".into(),
            webhook_secret: "whsec_test".into(),
            currency: None,
        })
    }

    fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(body);
        let digest = hex::encode(mac.finalize().into_bytes());
        format!("t={timestamp},v1={digest}")
    }

    #[test]
    fn test_valid_signature() {
        let client = client();
        let body = br#"{"type":"checkout.session.completed"}"#;
        let header = sign("whsec_test", 1_700_000_000, body);

        assert!(client
            .verify_signature_at(&header, body, 1_700_000_000)
            .is_ok());
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let client = client();
        let header = sign("whsec_test", 1_700_000_000, b"original");

        assert!(client
            .verify_signature_at(&header, b"tampered", 1_700_000_000)
            .is_err());
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let client = client();
        let body = b"payload";
        let header = sign("whsec_other", 1_700_000_000, body);

        assert!(client
            .verify_signature_at(&header, body, 1_700_000_000)
            .is_err());
    }

    #[test]
    fn test_stale_timestamp_is_rejected() {
        let client = client();
        let body = b"payload";
        let header = sign("whsec_test", 1_700_000_000, body);

        assert!(client
            .verify_signature_at(&header, body, 1_700_000_000 + 3600)
            .is_err());
    }

    #[test]
    fn test_unconfigured_secret_rejects_everything() {
        // A client without a webhook secret must not fall back to the
        // empty HMAC key, which anyone could sign with.
        let client = CheckoutClient::default();
        let body = br#"{"type":"checkout.session.completed"}"#;
        let forged = sign("", 1_700_000_000, body);

        assert!(client
            .verify_signature_at(&forged, body, 1_700_000_000)
            .is_err());
    }

    #[test]
    fn test_bad_signature_is_a_client_error() {
        let client = client();
        let err = client
            .verify_signature_at("t=1700000000,v1=00", b"payload", 1_700_000_000)
            .unwrap_err();
        assert_eq!(
            err.status_code(),
            axum::http::StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_malformed_header_is_rejected() {
        let client = client();
        assert!(client
            .verify_signature_at("nonsense", b"payload", 1_700_000_000)
            .is_err());
        assert!(client
            .verify_signature_at("t=abc,v1=zz", b"payload", 1_700_000_000)
            .is_err());
    }
}
