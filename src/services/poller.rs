// services/poller.rs
//
// Bounded status poll loop. The browser UI used to run this as a 5s timer
// with a 2 minute cap; here it runs server-side as a per-transaction watcher
// so a lost webhook still resolves the stored record.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::database::TransactionStore;
use crate::errors::Result;
use crate::models::transaction::{gateway_code, TransactionOutcome, TransactionStatus};
use crate::services::pesaflux::PesaFluxService;

pub const TIMEOUT_MESSAGE: &str = "Transaction timeout. Please try again.";

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        PollerConfig {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(120),
        }
    }
}

/// The fields a poll response may carry, picked out of the gateway's JSON.
/// Codes stay as raw values; the gateway mixes strings and numbers.
#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    pub result_code: Option<Value>,
    pub transaction_code: Option<Value>,
    pub status_label: Option<String>,
    pub description: Option<String>,
    pub receipt: Option<String>,
    pub transaction_id: Option<String>,
}

impl StatusSnapshot {
    pub fn from_value(value: &Value) -> Self {
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        StatusSnapshot {
            result_code: value.get("ResultCode").cloned(),
            transaction_code: value.get("TransactionCode").cloned(),
            status_label: text("TransactionStatus"),
            description: text("ResultDesc").or_else(|| text("ResponseDescription")),
            receipt: text("TransactionReceipt"),
            transaction_id: text("TransactionID"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Verdict {
    pub status: TransactionStatus,
    pub code: Option<i64>,
    pub message: String,
    pub receipt: Option<String>,
    pub transaction_id: Option<String>,
}

/// Classifies a poll response, or `None` while the payment is still pending.
///
/// 0/200 or a "Completed" label means paid; 1031/1032 or a description
/// mentioning cancellation means the user cancelled; any other code is a
/// failure. Code 1 (insufficient funds) counts as failure, not cancellation.
pub fn classify(snapshot: &StatusSnapshot) -> Option<Verdict> {
    let code = snapshot
        .result_code
        .as_ref()
        .and_then(gateway_code)
        .or_else(|| snapshot.transaction_code.as_ref().and_then(gateway_code));
    let label = snapshot.status_label.as_deref().unwrap_or("");
    let description = snapshot.description.as_deref().unwrap_or("");

    if matches!(code, Some(0) | Some(200)) || label.eq_ignore_ascii_case("completed") {
        return Some(Verdict {
            status: TransactionStatus::Success,
            code,
            message: non_blank(description, "Payment completed successfully"),
            receipt: snapshot.receipt.clone(),
            transaction_id: snapshot.transaction_id.clone(),
        });
    }

    // No code yet and no completion label: the prompt is still open.
    let code = code?;

    let haystack = format!("{} {}", label, description).to_lowercase();
    let status = if code == 1031 || code == 1032 || haystack.contains("cancel") {
        TransactionStatus::Cancelled
    } else {
        TransactionStatus::Failed
    };
    let fallback = if status == TransactionStatus::Cancelled {
        "Payment was cancelled"
    } else {
        "Payment failed"
    };
    Some(Verdict {
        status,
        code: Some(code),
        message: non_blank(description, fallback),
        receipt: snapshot.receipt.clone(),
        transaction_id: snapshot.transaction_id.clone(),
    })
}

fn non_blank(text: &str, fallback: &str) -> String {
    if text.trim().is_empty() {
        fallback.to_string()
    } else {
        text.to_string()
    }
}

/// Polls `fetch` every `config.interval` until a terminal classification or
/// the bounded timeout, whichever comes first. Fetch errors are logged and
/// the loop keeps going; the timeout verdict is failed. Returning tears the
/// timers down, so nothing keeps firing afterwards.
pub async fn poll_until_terminal<F, Fut>(config: &PollerConfig, mut fetch: F) -> Verdict
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<StatusSnapshot>>,
{
    let deadline = Instant::now() + config.timeout;
    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = sleep_until(deadline) => {
                return Verdict {
                    status: TransactionStatus::Failed,
                    code: None,
                    message: TIMEOUT_MESSAGE.to_string(),
                    receipt: None,
                    transaction_id: None,
                };
            }
            _ = ticker.tick() => {
                match fetch().await {
                    Ok(snapshot) => {
                        if let Some(verdict) = classify(&snapshot) {
                            return verdict;
                        }
                    }
                    Err(e) => warn!("status check failed: {}", e),
                }
            }
        }
    }
}

/// Watches one push request to completion and records the outcome. The store
/// guard makes the final write a no-op if the webhook resolved the
/// transaction first.
pub fn spawn_watcher(
    store: Arc<dyn TransactionStore>,
    gateway: Arc<PesaFluxService>,
    request_id: String,
    config: PollerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let verdict = poll_until_terminal(&config, || {
            let gateway = gateway.clone();
            let request_id = request_id.clone();
            async move {
                gateway
                    .query_status(&request_id)
                    .await
                    .map(|v| StatusSnapshot::from_value(&v))
            }
        })
        .await;

        info!(
            "watcher for {} finished: {} ({})",
            request_id,
            verdict.status.as_str(),
            verdict.message
        );

        if let Err(e) = record_verdict(store.as_ref(), &request_id, verdict).await {
            error!("failed to record watcher outcome for {}: {}", request_id, e);
        }
    })
}

/// Writes a watcher verdict, unless the webhook already resolved the row; a
/// timeout verdict has nothing to add to a terminal transaction, and writing
/// it would overwrite the stored description and receipt.
async fn record_verdict(
    store: &dyn TransactionStore,
    request_id: &str,
    verdict: Verdict,
) -> Result<()> {
    if let Some(tx) = store.find_by_request_id(request_id).await? {
        if tx.status.is_terminal() {
            info!(
                "transaction {} already {}, skipping watcher outcome",
                request_id,
                tx.status.as_str()
            );
            return Ok(());
        }
    }

    let outcome = TransactionOutcome {
        status: verdict.status,
        result_code: verdict.code.map(|c| c.to_string()),
        result_description: Some(verdict.message),
        receipt_number: verdict.receipt,
        transaction_id: verdict.transaction_id,
        merchant_request_id: None,
        checkout_request_id: None,
        transaction_date: None,
    };
    store.record_outcome(request_id, outcome).await?;
    Ok(())
}
