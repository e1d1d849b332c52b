use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::warn;
use uuid::Uuid;

use crate::database::TransactionStore;
use crate::errors::Result;
use crate::models::transaction::{
    NewTransaction, Transaction, TransactionOutcome, TransactionStatus,
};

const SELECT_COLUMNS: &str = "id, request_id, merchant_request_id, checkout_request_id, \
     transaction_id, status, amount, phone, email, reference, result_code, \
     result_description, receipt_number, transaction_date, created_at, updated_at";

/// Postgres-backed store. Connected once at process start and handed to the
/// router through `AppState`; there is no global client.
#[derive(Clone)]
pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(PgTransactionStore { pool })
    }

    async fn find_where(&self, column: &str, value: &str) -> Result<Option<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE {} = $1 LIMIT 1",
            SELECT_COLUMNS, column
        );
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_transaction(&r)).transpose()
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn create(&self, new: NewTransaction) -> Result<Transaction> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO transactions \
                 (id, request_id, status, amount, phone, email, reference, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) \
             RETURNING {}",
            SELECT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.request_id)
            .bind(TransactionStatus::Pending.as_str())
            .bind(new.amount)
            .bind(&new.phone)
            .bind(&new.email)
            .bind(&new.reference)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        row_to_transaction(&row)
    }

    async fn find_by_request_id(&self, request_id: &str) -> Result<Option<Transaction>> {
        self.find_where("request_id", request_id).await
    }

    async fn find_by_merchant_request_id(&self, id: &str) -> Result<Option<Transaction>> {
        self.find_where("merchant_request_id", id).await
    }

    async fn find_by_checkout_request_id(&self, id: &str) -> Result<Option<Transaction>> {
        self.find_where("checkout_request_id", id).await
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Transaction>> {
        // Callers reuse references across retries, so prefer the attempt
        // still waiting for an outcome, newest first.
        let sql = format!(
            "SELECT {} FROM transactions WHERE reference = $1 \
             ORDER BY (status = 'pending') DESC, created_at DESC LIMIT 1",
            SELECT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_transaction(&r)).transpose()
    }

    async fn find_latest_pending_by_phone(&self, phone: &str) -> Result<Option<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions \
             WHERE phone = $1 AND status = 'pending' \
             ORDER BY created_at DESC LIMIT 1",
            SELECT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_transaction(&r)).transpose()
    }

    async fn record_outcome(
        &self,
        request_id: &str,
        outcome: TransactionOutcome,
    ) -> Result<Option<Transaction>> {
        // Status guard lives in SQL so concurrent webhook redelivery resolves
        // in the database rather than in racing readers.
        let sql = format!(
            "UPDATE transactions SET \
                 status = CASE WHEN status = 'pending' THEN $2 ELSE status END, \
                 result_code = COALESCE($3, result_code), \
                 result_description = COALESCE($4, result_description), \
                 receipt_number = COALESCE($5, receipt_number), \
                 transaction_id = COALESCE($6, transaction_id), \
                 merchant_request_id = COALESCE($7, merchant_request_id), \
                 checkout_request_id = COALESCE($8, checkout_request_id), \
                 transaction_date = COALESCE($9, transaction_date), \
                 updated_at = $10 \
             WHERE request_id = $1 \
             RETURNING {}",
            SELECT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(request_id)
            .bind(outcome.status.as_str())
            .bind(&outcome.result_code)
            .bind(&outcome.result_description)
            .bind(&outcome.receipt_number)
            .bind(&outcome.transaction_id)
            .bind(&outcome.merchant_request_id)
            .bind(&outcome.checkout_request_id)
            .bind(&outcome.transaction_date)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_transaction(&r)).transpose()
    }
}

fn row_to_transaction(row: &PgRow) -> Result<Transaction> {
    let status_text: String = row.try_get("status")?;
    let status = TransactionStatus::from_str(&status_text).unwrap_or_else(|| {
        warn!("unknown transaction status '{}' in store, treating as pending", status_text);
        TransactionStatus::Pending
    });

    Ok(Transaction {
        id: row.try_get("id")?,
        request_id: row.try_get("request_id")?,
        merchant_request_id: row.try_get("merchant_request_id")?,
        checkout_request_id: row.try_get("checkout_request_id")?,
        transaction_id: row.try_get("transaction_id")?,
        status,
        amount: row.try_get("amount")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        reference: row.try_get("reference")?,
        result_code: row.try_get("result_code")?,
        result_description: row.try_get("result_description")?,
        receipt_number: row.try_get("receipt_number")?,
        transaction_date: row.try_get("transaction_date")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
