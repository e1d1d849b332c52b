#[cfg(test)]
pub(crate) mod memory;
pub(crate) mod postgres;

use async_trait::async_trait;

use crate::errors::Result;
use crate::models::transaction::{NewTransaction, Transaction, TransactionOutcome};

/// Canonical transaction storage. The webhook reconciler and the status poll
/// both go through this handle, so "no row yet" has to be an ordinary answer
/// rather than an error.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn create(&self, new: NewTransaction) -> Result<Transaction>;

    async fn find_by_request_id(&self, request_id: &str) -> Result<Option<Transaction>>;

    async fn find_by_merchant_request_id(&self, id: &str) -> Result<Option<Transaction>>;

    async fn find_by_checkout_request_id(&self, id: &str) -> Result<Option<Transaction>>;

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Transaction>>;

    async fn find_latest_pending_by_phone(&self, phone: &str) -> Result<Option<Transaction>>;

    /// Applies a terminal outcome. The status lands only while the row is
    /// still pending, so a redelivered webhook can refresh the description
    /// and receipt but can never regress or flip a terminal transaction.
    async fn record_outcome(
        &self,
        request_id: &str,
        outcome: TransactionOutcome,
    ) -> Result<Option<Transaction>>;
}
