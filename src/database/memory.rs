use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::database::TransactionStore;
use crate::errors::{AppError, Result};
use crate::models::transaction::{
    NewTransaction, Transaction, TransactionOutcome, TransactionStatus,
};

/// In-memory store with the same guard semantics as the Postgres
/// implementation, so reconciliation logic can be tested without a database.
#[derive(Default)]
pub struct InMemoryStore {
    rows: RwLock<Vec<Transaction>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn find(&self, pred: impl Fn(&Transaction) -> bool) -> Option<Transaction> {
        self.rows.read().await.iter().find(|t| pred(t)).cloned()
    }
}

#[async_trait]
impl TransactionStore for InMemoryStore {
    async fn create(&self, new: NewTransaction) -> Result<Transaction> {
        let mut rows = self.rows.write().await;
        if rows.iter().any(|t| t.request_id == new.request_id) {
            return Err(AppError::service(format!(
                "transaction {} already exists",
                new.request_id
            )));
        }
        let now = Utc::now();
        let tx = Transaction {
            id: Uuid::new_v4(),
            request_id: new.request_id,
            merchant_request_id: None,
            checkout_request_id: None,
            transaction_id: None,
            status: TransactionStatus::Pending,
            amount: new.amount,
            phone: new.phone,
            email: new.email,
            reference: new.reference,
            result_code: None,
            result_description: None,
            receipt_number: None,
            transaction_date: None,
            created_at: now,
            updated_at: now,
        };
        rows.push(tx.clone());
        Ok(tx)
    }

    async fn find_by_request_id(&self, request_id: &str) -> Result<Option<Transaction>> {
        Ok(self.find(|t| t.request_id == request_id).await)
    }

    async fn find_by_merchant_request_id(&self, id: &str) -> Result<Option<Transaction>> {
        Ok(self
            .find(|t| t.merchant_request_id.as_deref() == Some(id))
            .await)
    }

    async fn find_by_checkout_request_id(&self, id: &str) -> Result<Option<Transaction>> {
        Ok(self
            .find(|t| t.checkout_request_id.as_deref() == Some(id))
            .await)
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Transaction>> {
        // Same tie-break as the Postgres query: a reference reused across
        // retries resolves to the pending attempt, newest first.
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .rev()
            .find(|t| t.reference == reference && t.status == TransactionStatus::Pending)
            .or_else(|| rows.iter().rev().find(|t| t.reference == reference))
            .cloned())
    }

    async fn find_latest_pending_by_phone(&self, phone: &str) -> Result<Option<Transaction>> {
        // Insertion order stands in for created_at; creates within the same
        // millisecond would otherwise tie.
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .rev()
            .find(|t| t.phone == phone && t.status == TransactionStatus::Pending)
            .cloned())
    }

    async fn record_outcome(
        &self,
        request_id: &str,
        outcome: TransactionOutcome,
    ) -> Result<Option<Transaction>> {
        let mut rows = self.rows.write().await;
        let Some(tx) = rows.iter_mut().find(|t| t.request_id == request_id) else {
            return Ok(None);
        };

        if tx.status == TransactionStatus::Pending {
            tx.status = outcome.status;
        }
        if outcome.result_code.is_some() {
            tx.result_code = outcome.result_code;
        }
        if outcome.result_description.is_some() {
            tx.result_description = outcome.result_description;
        }
        if outcome.receipt_number.is_some() {
            tx.receipt_number = outcome.receipt_number;
        }
        if outcome.transaction_id.is_some() {
            tx.transaction_id = outcome.transaction_id;
        }
        if outcome.merchant_request_id.is_some() {
            tx.merchant_request_id = outcome.merchant_request_id;
        }
        if outcome.checkout_request_id.is_some() {
            tx.checkout_request_id = outcome.checkout_request_id;
        }
        if outcome.transaction_date.is_some() {
            tx.transaction_date = outcome.transaction_date;
        }
        tx.updated_at = Utc::now();
        Ok(Some(tx.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_tx(request_id: &str, phone: &str) -> NewTransaction {
        NewTransaction {
            request_id: request_id.to_string(),
            amount: 100.0,
            phone: phone.to_string(),
            email: "payer@example.com".to_string(),
            reference: format!("REF-{}", request_id),
        }
    }

    fn outcome(status: TransactionStatus) -> TransactionOutcome {
        TransactionOutcome {
            status,
            result_code: Some("0".to_string()),
            result_description: Some("done".to_string()),
            receipt_number: None,
            transaction_id: None,
            merchant_request_id: None,
            checkout_request_id: None,
            transaction_date: None,
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_request_ids() {
        let store = InMemoryStore::new();
        store.create(new_tx("REQ1", "254712345678")).await.unwrap();
        assert!(store.create(new_tx("REQ1", "254712345678")).await.is_err());
    }

    #[tokio::test]
    async fn unknown_request_id_is_none_not_error() {
        let store = InMemoryStore::new();
        assert!(store.find_by_request_id("missing").await.unwrap().is_none());
        assert!(store
            .record_outcome("missing", outcome(TransactionStatus::Success))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn terminal_status_is_never_overwritten() {
        let store = InMemoryStore::new();
        store.create(new_tx("REQ1", "254712345678")).await.unwrap();

        let tx = store
            .record_outcome("REQ1", outcome(TransactionStatus::Success))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Success);

        let mut late = outcome(TransactionStatus::Failed);
        late.result_description = Some("late redelivery".to_string());
        let tx = store.record_outcome("REQ1", late).await.unwrap().unwrap();
        assert_eq!(tx.status, TransactionStatus::Success);
        // Descriptive fields still refresh.
        assert_eq!(tx.result_description.as_deref(), Some("late redelivery"));
    }

    #[tokio::test]
    async fn reference_lookup_prefers_pending_then_newest() {
        let store = InMemoryStore::new();
        for request_id in ["REQ1", "REQ2"] {
            store
                .create(NewTransaction {
                    request_id: request_id.to_string(),
                    amount: 100.0,
                    phone: "254712345678".to_string(),
                    email: "payer@example.com".to_string(),
                    reference: "PAY1".to_string(),
                })
                .await
                .unwrap();
        }

        // Both pending: the newest attempt wins.
        let found = store.find_by_reference("PAY1").await.unwrap().unwrap();
        assert_eq!(found.request_id, "REQ2");

        // Newest is terminal but an older attempt is still open.
        store
            .record_outcome("REQ2", outcome(TransactionStatus::Cancelled))
            .await
            .unwrap();
        let found = store.find_by_reference("PAY1").await.unwrap().unwrap();
        assert_eq!(found.request_id, "REQ1");

        // All terminal: fall back to the newest.
        store
            .record_outcome("REQ1", outcome(TransactionStatus::Failed))
            .await
            .unwrap();
        let found = store.find_by_reference("PAY1").await.unwrap().unwrap();
        assert_eq!(found.request_id, "REQ2");
    }

    #[tokio::test]
    async fn latest_pending_by_phone_skips_terminal_rows() {
        let store = InMemoryStore::new();
        store.create(new_tx("REQ1", "254712345678")).await.unwrap();
        store.create(new_tx("REQ2", "254712345678")).await.unwrap();
        store.create(new_tx("REQ3", "254700000000")).await.unwrap();

        let found = store
            .find_latest_pending_by_phone("254712345678")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.request_id, "REQ2");

        store
            .record_outcome("REQ2", outcome(TransactionStatus::Cancelled))
            .await
            .unwrap();
        let found = store
            .find_latest_pending_by_phone("254712345678")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.request_id, "REQ1");
    }
}
