// services/reconciler.rs
//
// Maps gateway webhooks onto stored transactions. A callback may carry any
// subset of {merchant id, checkout id, reference, phone}, so resolution walks
// an ordered fallback chain and the first hit wins. Callers must acknowledge
// the gateway regardless of what happens in here.

use tracing::{info, warn};

use crate::database::TransactionStore;
use crate::errors::Result;
use crate::models::transaction::{Transaction, TransactionOutcome, TransactionStatus, WebhookPayload};

/// Gateway response code mapping: 0 paid, 1031/1032 cancelled by the user,
/// everything else failed with the gateway's description kept as the reason.
pub fn status_for_code(code: i64) -> TransactionStatus {
    match code {
        0 => TransactionStatus::Success,
        1031 | 1032 => TransactionStatus::Cancelled,
        _ => TransactionStatus::Failed,
    }
}

/// Applies a webhook to the matching stored transaction, if any. `Ok(None)`
/// means no match was found; that is logged, not an error, because the
/// gateway retries on anything but success.
pub async fn apply_callback(
    store: &dyn TransactionStore,
    payload: &WebhookPayload,
) -> Result<Option<Transaction>> {
    let Some(tx) = resolve(store, payload).await? else {
        warn!(
            "webhook matched no transaction (merchant={:?} checkout={:?} reference={:?} msisdn={:?})",
            payload.merchant_request_id,
            payload.checkout_request_id,
            payload.transaction_reference,
            payload.msisdn,
        );
        return Ok(None);
    };

    let Some(code) = payload.response_code_i64() else {
        warn!(
            "webhook for {} carried no usable response code, leaving status {}",
            tx.request_id,
            tx.status.as_str()
        );
        return Ok(Some(tx));
    };

    let status = status_for_code(code);
    if tx.status.is_terminal() && tx.status != status {
        warn!(
            "webhook for {} wants {} but transaction is already {}; keeping stored status",
            tx.request_id,
            status.as_str(),
            tx.status.as_str()
        );
    } else {
        info!(
            "webhook for {}: code {} -> {}",
            tx.request_id,
            code,
            status.as_str()
        );
    }

    let outcome = TransactionOutcome {
        status,
        result_code: Some(code.to_string()),
        result_description: payload.response_description.clone(),
        receipt_number: payload.transaction_receipt.clone(),
        transaction_id: payload.transaction_id.clone(),
        merchant_request_id: payload.merchant_request_id.clone(),
        checkout_request_id: payload.checkout_request_id.clone(),
        transaction_date: payload.transaction_date_string(),
    };
    store.record_outcome(&tx.request_id, outcome).await
}

/// Ordered fallback lookup: merchant id, then checkout id, then reference,
/// then the most recent pending transaction for the phone number.
async fn resolve(
    store: &dyn TransactionStore,
    payload: &WebhookPayload,
) -> Result<Option<Transaction>> {
    if let Some(id) = nonempty(&payload.merchant_request_id) {
        if let Some(tx) = store.find_by_merchant_request_id(id).await? {
            return Ok(Some(tx));
        }
    }
    if let Some(id) = nonempty(&payload.checkout_request_id) {
        if let Some(tx) = store.find_by_checkout_request_id(id).await? {
            return Ok(Some(tx));
        }
    }
    if let Some(reference) = nonempty(&payload.transaction_reference) {
        if let Some(tx) = store.find_by_reference(reference).await? {
            return Ok(Some(tx));
        }
    }
    if let Some(phone) = nonempty(&payload.msisdn) {
        if let Some(tx) = store.find_latest_pending_by_phone(phone).await? {
            return Ok(Some(tx));
        }
    }
    Ok(None)
}

fn nonempty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}
