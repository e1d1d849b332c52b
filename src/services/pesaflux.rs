// services/pesaflux.rs
use std::time::Duration;

use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::models::transaction::gateway_code;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const PUSH_ATTEMPTS: u32 = 3;
const PUSH_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
struct StkPushPayload<'a> {
    api_key: &'a str,
    email: &'a str,
    amount: String,
    msisdn: &'a str,
    reference: &'a str,
}

#[derive(Debug, Serialize)]
struct StatusPayload<'a> {
    api_key: &'a str,
    email: &'a str,
    transaction_request_id: &'a str,
}

/// Raw initiation acknowledgement. `success` is "200" as a string or number
/// depending on the gateway's mood, and the message field is misspelled
/// ("massage") on some responses.
#[derive(Debug, Deserialize)]
struct StkPushAck {
    #[serde(default)]
    success: Value,
    #[serde(default)]
    massage: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    transaction_request_id: Option<String>,
}

/// Synchronous confirmation that the push was dispatched. This is NOT the
/// payment result; the webhook or a status poll carries that.
#[derive(Debug, Clone)]
pub struct PushAccepted {
    pub request_id: String,
    pub message: String,
}

#[derive(Clone)]
pub struct PesaFluxService {
    api_key: String,
    email: String,
    stk_push_url: String,
    status_url: String,
    client: Client,
}

impl PesaFluxService {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| AppError::service(format!("Failed to create HTTP client: {}", e)))?;

        Ok(PesaFluxService {
            api_key: config.pesaflux_api_key.clone(),
            email: config.pesaflux_email.clone(),
            stk_push_url: config.stk_push_url(),
            status_url: config.transaction_status_url(),
            client,
        })
    }

    /// Sends the STK push against the single configured endpoint, retrying
    /// transport failures with backoff. HTTP-level errors are not retried.
    pub async fn initiate_stk_push(
        &self,
        msisdn: &str,
        amount: f64,
        email: &str,
        reference: &str,
    ) -> Result<PushAccepted> {
        info!("STK push for {} - KES {}", msisdn, amount);

        let payload = StkPushPayload {
            api_key: &self.api_key,
            email,
            amount: amount.to_string(),
            msisdn,
            reference,
        };

        let mut delay = PUSH_BACKOFF;
        let mut response = None;
        for attempt in 1..=PUSH_ATTEMPTS {
            match self
                .client
                .post(&self.stk_push_url)
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::ACCEPT, "application/json")
                .json(&payload)
                .send()
                .await
            {
                Ok(resp) => {
                    response = Some(resp);
                    break;
                }
                Err(e) if attempt < PUSH_ATTEMPTS && (e.is_connect() || e.is_timeout()) => {
                    warn!("STK push attempt {} failed: {}, retrying", attempt, e);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e.into()),
            }
        }
        let response = response.ok_or_else(|| AppError::gateway("Payment gateway unreachable"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("STK push failed: {} - {}", status, body);
            return Err(AppError::gateway(format!(
                "Payment gateway returned {}",
                status
            )));
        }

        let body = response.text().await?;
        let ack: StkPushAck = serde_json::from_str(&body).map_err(|_| {
            error!("unparseable STK push response: {}", body);
            AppError::gateway("Invalid response from payment service")
        })?;

        if gateway_code(&ack.success) != Some(200) {
            let reason = ack
                .massage
                .or(ack.message)
                .unwrap_or_else(|| "Payment initiation failed".to_string());
            error!("STK push rejected: {}", reason);
            return Err(AppError::gateway(reason));
        }

        let request_id = ack.transaction_request_id.ok_or_else(|| {
            AppError::gateway("Payment service did not return a transaction request id")
        })?;
        info!("STK push dispatched: {}", request_id);

        Ok(PushAccepted {
            request_id,
            message: ack
                .massage
                .or(ack.message)
                .unwrap_or_else(|| "Request sent successfully".to_string()),
        })
    }

    /// Queries the gateway for the current state of a push request. Returns
    /// the raw JSON; callers classify it.
    pub async fn query_status(&self, request_id: &str) -> Result<Value> {
        let payload = StatusPayload {
            api_key: &self.api_key,
            email: &self.email,
            transaction_request_id: request_id,
        };

        let response = self
            .client
            .post(&self.status_url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("status query failed: {} - {}", status, body);
            return Err(AppError::gateway(format!(
                "Payment gateway returned {}",
                status
            )));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|_| {
            error!("unparseable status response: {}", body);
            AppError::gateway("Invalid response from payment service")
        })
    }
}
