// handlers/payment_handlers.rs
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use validator::Validate;

use crate::database::TransactionStore;
use crate::errors::{AppError, Result};
use crate::models::transaction::{NewTransaction, Transaction, TransactionStatus, WebhookPayload};
use crate::services::poller::{self, PollerConfig};
use crate::services::reconciler;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct InitiatePaymentRequest {
    pub msisdn: String,

    #[validate(range(min = 1.0, message = "Amount must be at least KES 1"))]
    pub amount: f64,

    #[validate(email(message = "Invalid email address"))]
    pub email: String,

    #[validate(length(min = 1, message = "Reference is required"))]
    pub reference: String,
}

/// Status poll body. Old clients also send api_key/email; those are ignored,
/// the server holds its own gateway credentials.
#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub transaction_request_id: String,
}

/// Status payload in the gateway's PascalCase dialect, which the browser
/// poller already speaks. Pending rows carry a null ResultCode.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(rename = "ResultCode")]
    pub result_code: Option<String>,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
    #[serde(rename = "TransactionStatus")]
    pub transaction_status: String,
    #[serde(rename = "TransactionReceipt")]
    pub receipt: Option<String>,
    #[serde(rename = "TransactionAmount")]
    pub amount: Option<f64>,
    #[serde(rename = "TransactionDate")]
    pub date: Option<String>,
    #[serde(rename = "TransactionReference")]
    pub reference: Option<String>,
    #[serde(rename = "Msisdn")]
    pub msisdn: Option<String>,
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "TransactionID")]
    pub transaction_id: Option<String>,
}

impl StatusResponse {
    pub fn pending() -> Self {
        StatusResponse {
            result_code: None,
            result_desc: "pending".to_string(),
            transaction_status: TransactionStatus::Pending.as_str().to_string(),
            receipt: None,
            amount: None,
            date: None,
            reference: None,
            msisdn: None,
            merchant_request_id: None,
            checkout_request_id: None,
            transaction_id: None,
        }
    }

    pub fn from_transaction(tx: &Transaction) -> Self {
        let result_code = match tx.status {
            TransactionStatus::Pending => None,
            TransactionStatus::Success => Some("200".to_string()),
            TransactionStatus::Cancelled => {
                Some(tx.result_code.clone().unwrap_or_else(|| "1032".to_string()))
            }
            TransactionStatus::Failed => {
                Some(tx.result_code.clone().unwrap_or_else(|| "1".to_string()))
            }
        };
        let transaction_status = match tx.status {
            TransactionStatus::Success => "Completed".to_string(),
            other => other.as_str().to_string(),
        };
        StatusResponse {
            result_code,
            result_desc: tx
                .result_description
                .clone()
                .unwrap_or_else(|| tx.status.as_str().to_string()),
            transaction_status,
            receipt: tx.receipt_number.clone(),
            amount: Some(tx.amount),
            date: tx.transaction_date.clone(),
            reference: Some(tx.reference.clone()),
            msisdn: Some(tx.phone.clone()),
            merchant_request_id: tx.merchant_request_id.clone(),
            checkout_request_id: tx.checkout_request_id.clone(),
            transaction_id: tx.transaction_id.clone(),
        }
    }
}

/// Local-format msisdn: country code 254 followed by 9 digits.
pub fn is_valid_msisdn(msisdn: &str) -> bool {
    msisdn.len() == 12 && msisdn.starts_with("254") && msisdn.bytes().all(|b| b.is_ascii_digit())
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<Json<Value>> {
    request
        .validate()
        .map_err(|e| AppError::validation(e.to_string()))?;
    if !is_valid_msisdn(&request.msisdn) {
        return Err(AppError::validation(
            "Invalid phone number format. Must be 254XXXXXXXXX",
        ));
    }

    let push = state
        .gateway
        .initiate_stk_push(&request.msisdn, request.amount, &request.email, &request.reference)
        .await?;

    // The push already went out; a storage fault here degrades to a record
    // the webhook can no longer resolve, which is logged, not surfaced.
    match state
        .store
        .create(NewTransaction {
            request_id: push.request_id.clone(),
            amount: request.amount,
            phone: request.msisdn.clone(),
            email: request.email.clone(),
            reference: request.reference.clone(),
        })
        .await
    {
        Ok(tx) => info!("created pending transaction {}", tx.request_id),
        Err(e) => error!("failed to persist transaction {}: {}", push.request_id, e),
    }

    poller::spawn_watcher(
        state.store.clone(),
        state.gateway.clone(),
        push.request_id.clone(),
        PollerConfig::default(),
    );

    Ok(Json(json!({
        "success": "200",
        "message": push.message,
        "transaction_request_id": push.request_id,
    })))
}

pub async fn check_payment_status(
    State(state): State<AppState>,
    Json(request): Json<StatusRequest>,
) -> Json<StatusResponse> {
    match state
        .store
        .find_by_request_id(&request.transaction_request_id)
        .await
    {
        Ok(Some(tx)) => Json(StatusResponse::from_transaction(&tx)),
        // No row yet: the webhook may simply not have arrived.
        Ok(None) => Json(StatusResponse::pending()),
        Err(e) => {
            error!(
                "status lookup failed for {}: {}",
                request.transaction_request_id, e
            );
            Json(StatusResponse::pending())
        }
    }
}

/// Relays a status query straight to the gateway, using the server's
/// credentials rather than anything the client sent.
pub async fn gateway_status(
    State(state): State<AppState>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<Value>> {
    let data = state
        .gateway
        .query_status(&request.transaction_request_id)
        .await?;
    Ok(Json(data))
}

/// Gateway webhook. Whatever happens internally, the gateway gets a success
/// acknowledgement; anything else triggers indefinite redelivery.
pub async fn payment_webhook(
    State(state): State<AppState>,
    payload: std::result::Result<Json<WebhookPayload>, JsonRejection>,
) -> Json<Value> {
    match payload {
        Ok(Json(payload)) => {
            info!(
                "webhook received: code={:?} amount={:?} merchant={:?} reference={:?}",
                payload.response_code,
                payload.transaction_amount,
                payload.merchant_request_id,
                payload.transaction_reference
            );
            if let Err(e) = reconciler::apply_callback(state.store.as_ref(), &payload).await {
                error!("webhook reconciliation failed: {}", e);
            }
        }
        Err(rejection) => {
            warn!("discarding malformed webhook body: {}", rejection);
        }
    }

    Json(json!({
        "ResultCode": 0,
        "ResultDesc": "Success",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::database::memory::InMemoryStore;
    use crate::services::pesaflux::PesaFluxService;
    use std::sync::Arc;

    fn test_state() -> AppState {
        let config = AppConfig {
            pesaflux_api_key: "test-key".to_string(),
            pesaflux_email: "merchant@example.com".to_string(),
            pesaflux_base_url: "http://127.0.0.1:9".to_string(),
            database_url: String::new(),
            host: "127.0.0.1".parse().unwrap(),
            port: 0,
        };
        AppState::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(PesaFluxService::new(&config).unwrap()),
        )
    }

    #[test]
    fn msisdn_format_is_country_code_plus_nine_digits() {
        assert!(is_valid_msisdn("254712345678"));
        assert!(!is_valid_msisdn("0712345678"));
        assert!(!is_valid_msisdn("25471234567"));
        assert!(!is_valid_msisdn("2547123456789"));
        assert!(!is_valid_msisdn("255712345678"));
        assert!(!is_valid_msisdn("25471234567a"));
        assert!(!is_valid_msisdn(""));
    }

    #[test]
    fn initiate_request_validation_rejects_bad_fields() {
        let bad_amount = InitiatePaymentRequest {
            msisdn: "254712345678".to_string(),
            amount: 0.5,
            email: "payer@example.com".to_string(),
            reference: "PAY1".to_string(),
        };
        assert!(bad_amount.validate().is_err());

        let bad_email = InitiatePaymentRequest {
            msisdn: "254712345678".to_string(),
            amount: 10.0,
            email: "not-an-email".to_string(),
            reference: "PAY1".to_string(),
        };
        assert!(bad_email.validate().is_err());

        let ok = InitiatePaymentRequest {
            msisdn: "254712345678".to_string(),
            amount: 10.0,
            email: "payer@example.com".to_string(),
            reference: "PAY1".to_string(),
        };
        assert!(ok.validate().is_ok());
    }

    #[tokio::test]
    async fn bad_msisdn_is_rejected_before_any_gateway_call() {
        // The test gateway address is unreachable, so anything that got past
        // validation would surface as a Gateway error instead.
        let state = test_state();
        let result = initiate_payment(
            State(state),
            Json(InitiatePaymentRequest {
                msisdn: "0712345678".to_string(),
                amount: 10.0,
                email: "payer@example.com".to_string(),
                reference: "PAY1".to_string(),
            }),
        )
        .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn unknown_request_id_polls_as_pending() {
        let state = test_state();
        let response = check_payment_status(
            State(state),
            Json(StatusRequest {
                transaction_request_id: "missing".to_string(),
            }),
        )
        .await;
        assert_eq!(response.0.transaction_status, "pending");
        assert!(response.0.result_code.is_none());
    }

    #[tokio::test]
    async fn resolved_transaction_polls_with_gateway_dialect() {
        let state = test_state();
        state
            .store
            .create(NewTransaction {
                request_id: "REQ1".to_string(),
                amount: 150.0,
                phone: "254712345678".to_string(),
                email: "payer@example.com".to_string(),
                reference: "PAY1".to_string(),
            })
            .await
            .unwrap();
        let callback: WebhookPayload = serde_json::from_value(serde_json::json!({
            "ResponseCode": 0,
            "ResponseDescription": "The service request is processed successfully.",
            "TransactionReceipt": "QAB12CD34E",
            "TransactionReference": "PAY1",
        }))
        .unwrap();
        reconciler::apply_callback(state.store.as_ref(), &callback)
            .await
            .unwrap();

        let response = check_payment_status(
            State(state),
            Json(StatusRequest {
                transaction_request_id: "REQ1".to_string(),
            }),
        )
        .await;
        assert_eq!(response.0.result_code.as_deref(), Some("200"));
        assert_eq!(response.0.transaction_status, "Completed");
        assert_eq!(response.0.receipt.as_deref(), Some("QAB12CD34E"));
        assert_eq!(response.0.amount, Some(150.0));
    }

    #[tokio::test]
    async fn webhook_always_acknowledges_success() {
        let state = test_state();
        // No matching transaction at all; the ack must still be a success.
        let payload: WebhookPayload = serde_json::from_value(serde_json::json!({
            "ResponseCode": 7,
            "ResponseDescription": "whatever",
            "Msisdn": "254700000000",
        }))
        .unwrap();
        let ack = payment_webhook(State(state), Ok(Json(payload))).await;
        assert_eq!(ack.0["ResultCode"], 0);
        assert_eq!(ack.0["ResultDesc"], "Success");
    }
}
