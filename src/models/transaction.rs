use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle of a checkout. Pending is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransactionStatus::Pending),
            "success" => Some(TransactionStatus::Success),
            "failed" => Some(TransactionStatus::Failed),
            "cancelled" => Some(TransactionStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    /// Gateway request id returned at initiation; the id clients poll with.
    pub request_id: String,
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: Option<String>,
    pub transaction_id: Option<String>,
    pub status: TransactionStatus,
    pub amount: f64,
    pub phone: String,
    pub email: String,
    pub reference: String,
    pub result_code: Option<String>,
    pub result_description: Option<String>,
    pub receipt_number: Option<String>,
    pub transaction_date: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub request_id: String,
    pub amount: f64,
    pub phone: String,
    pub email: String,
    pub reference: String,
}

/// Terminal outcome applied to a stored transaction. The status only lands
/// while the row is still pending; the remaining fields refresh regardless.
#[derive(Debug, Clone)]
pub struct TransactionOutcome {
    pub status: TransactionStatus,
    pub result_code: Option<String>,
    pub result_description: Option<String>,
    pub receipt_number: Option<String>,
    pub transaction_id: Option<String>,
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: Option<String>,
    pub transaction_date: Option<String>,
}

/// Gateway webhook payload. PesaFlux sends PascalCase keys and is not
/// consistent about numeric vs string codes, so codes come in as raw values.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    #[serde(rename = "ResponseCode", default)]
    pub response_code: Value,

    #[serde(rename = "ResponseDescription", default)]
    pub response_description: Option<String>,

    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,

    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: Option<String>,

    #[serde(rename = "TransactionID", default)]
    pub transaction_id: Option<String>,

    #[serde(rename = "TransactionAmount", default)]
    pub transaction_amount: Value,

    #[serde(rename = "TransactionReceipt", default)]
    pub transaction_receipt: Option<String>,

    #[serde(rename = "TransactionDate", default)]
    pub transaction_date: Value,

    #[serde(rename = "TransactionReference", default)]
    pub transaction_reference: Option<String>,

    #[serde(rename = "Msisdn", default)]
    pub msisdn: Option<String>,
}

impl WebhookPayload {
    pub fn response_code_i64(&self) -> Option<i64> {
        gateway_code(&self.response_code)
    }

    pub fn transaction_date_string(&self) -> Option<String> {
        match &self.transaction_date {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Reads a gateway result code that may arrive as a JSON number or a string.
pub fn gateway_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
