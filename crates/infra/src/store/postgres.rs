//! Postgres-backed document store.
//!
//! Every record lives in one `storefront_documents` table as a JSONB body keyed
//! by `(kind, id)` with a `version` column. A change set is written inside one
//! SQL transaction; each write is a compare-and-swap on `version`, so a lost
//! update shows up as a zero-row write and rolls the whole transaction back.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Concurrency` |
//! | Database (serialization failure) | `40001` | `Concurrency` |
//! | Database (query canceled, e.g. statement timeout) | `57014` | `Timeout` |
//! | PoolTimedOut | N/A | `Timeout` |
//! | Anything else | Any other | `Backend` |
//!
//! ## Runtime
//!
//! The `CommerceStore` trait is synchronous. The trait impl bridges into async
//! with `block_in_place`, which needs a multi-threaded tokio runtime.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use tracing::{Span, instrument};
use uuid::Uuid;

use storefront_core::{
    AddressId, ExpectedVersion, OrderId, ProductId, UserId, VariantId, VoucherId,
};
use storefront_inventory::Variant;
use storefront_products::Product;
use storefront_sales::{Cart, Order, OrderFilter, ShippingAddress, Voucher};

use super::r#trait::{ChangeSet, CommerceStore, Document, StoreError};

/// DDL for the documents table. Idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS storefront_documents (
    kind        TEXT        NOT NULL,
    id          UUID        NOT NULL,
    version     BIGINT      NOT NULL CHECK (version >= 0),
    body        JSONB       NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (kind, id)
)
"#;

const KIND_PRODUCT: &str = "product";
const KIND_ADDRESS: &str = "address";

/// Postgres-backed versioned document store.
#[derive(Debug, Clone)]
pub struct PostgresCommerceStore {
    pool: Arc<PgPool>,
    statement_timeout: Duration,
}

impl PostgresCommerceStore {
    /// `statement_timeout` bounds every statement of a commit so no
    /// transaction waits on a row lock indefinitely.
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            statement_timeout,
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    /// Upsert a catalog product (reference data, unversioned).
    pub async fn put_product(&self, product: &Product) -> Result<(), StoreError> {
        self.upsert(KIND_PRODUCT, *product.id_typed().as_uuid(), 1, encode(product)?)
            .await
    }

    /// Upsert a shipping address (reference data, unversioned).
    pub async fn put_address(&self, address: &ShippingAddress) -> Result<(), StoreError> {
        self.upsert(KIND_ADDRESS, *address.id_typed().as_uuid(), 1, encode(address)?)
            .await
    }

    /// Upsert a versioned document without a version check (seeding/admin use).
    pub async fn put_document(&self, document: &Document) -> Result<(), StoreError> {
        let key = document.key();
        self.upsert(key.kind(), key.id(), to_db_version(document.version())?, encode_document(document)?)
            .await
    }

    async fn upsert(&self, kind: &str, id: Uuid, version: i64, body: JsonValue) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO storefront_documents (kind, id, version, body)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (kind, id)
            DO UPDATE SET version = EXCLUDED.version, body = EXCLUDED.body, updated_at = NOW()
            "#,
        )
        .bind(kind)
        .bind(id)
        .bind(version)
        .bind(body)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn fetch<T>(&self, kind: &'static str, id: Uuid) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned,
    {
        let row = sqlx::query("SELECT body FROM storefront_documents WHERE kind = $1 AND id = $2")
            .bind(kind)
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch", e))?;

        match row {
            Some(row) => {
                let body: JsonValue = row
                    .try_get("body")
                    .map_err(|e| StoreError::Corrupt(format!("failed to read body: {e}")))?;
                decode(body).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Orders matching `filter`'s record-level criteria, newest first.
    #[instrument(skip(self, filter), fields(order_count = tracing::field::Empty), err)]
    pub async fn fetch_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let user_param = filter.user_id.map(|u| u.to_string());
        let status_param = filter.status.map(|s| s.as_str().to_string());

        let rows = sqlx::query(
            r#"
            SELECT body
            FROM storefront_documents
            WHERE kind = 'order'
                AND ($1::text IS NULL OR body->>'user_id' = $1)
                AND ($2::text IS NULL OR body->>'status' = $2)
            "#,
        )
        .bind(user_param)
        .bind(status_param)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_orders", e))?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let body: JsonValue = row
                .try_get("body")
                .map_err(|e| StoreError::Corrupt(format!("failed to read body: {e}")))?;
            let order: Order = decode(body)?;
            if filter.matches_record(&order) {
                orders.push(order);
            }
        }
        orders.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id_typed().cmp(&a.id_typed()))
        });

        Span::current().record("order_count", orders.len());
        Ok(orders)
    }

    /// Write a change set atomically with per-document compare-and-swap.
    #[instrument(skip(self, changes), fields(writes = changes.len()), err)]
    pub async fn commit_changes(&self, changes: ChangeSet) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let set_timeout = format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout.as_millis()
        );
        sqlx::query(&set_timeout)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_statement_timeout", e))?;

        for write in changes.into_writes() {
            let key = write.document.key();
            let body = encode_document(&write.document)?;
            let version = to_db_version(write.document.version())?;

            let result = match write.expected {
                ExpectedVersion::Exact(0) => {
                    sqlx::query(
                        r#"
                        INSERT INTO storefront_documents (kind, id, version, body)
                        VALUES ($1, $2, $3, $4)
                        ON CONFLICT (kind, id) DO NOTHING
                        "#,
                    )
                    .bind(key.kind())
                    .bind(key.id())
                    .bind(version)
                    .bind(body)
                    .execute(&mut *tx)
                    .await
                }
                ExpectedVersion::Exact(expected) => {
                    sqlx::query(
                        r#"
                        UPDATE storefront_documents
                        SET version = $3, body = $4, updated_at = NOW()
                        WHERE kind = $1 AND id = $2 AND version = $5
                        "#,
                    )
                    .bind(key.kind())
                    .bind(key.id())
                    .bind(version)
                    .bind(body)
                    .bind(to_db_version(expected)?)
                    .execute(&mut *tx)
                    .await
                }
                ExpectedVersion::Any => {
                    sqlx::query(
                        r#"
                        INSERT INTO storefront_documents (kind, id, version, body)
                        VALUES ($1, $2, $3, $4)
                        ON CONFLICT (kind, id)
                        DO UPDATE SET version = EXCLUDED.version, body = EXCLUDED.body, updated_at = NOW()
                        "#,
                    )
                    .bind(key.kind())
                    .bind(key.id())
                    .bind(version)
                    .bind(body)
                    .execute(&mut *tx)
                    .await
                }
            }
            .map_err(|e| map_sqlx_error("write_document", e))?;

            if result.rows_affected() == 0 {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(StoreError::Concurrency(format!(
                    "{key}: expected {:?}",
                    write.expected
                )));
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    fn block_on<F, T>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            StoreError::Backend(
                "PostgresCommerceStore requires a tokio runtime; call it from within one".to_string(),
            )
        })?;
        tokio::task::block_in_place(|| handle.block_on(fut))
    }
}

fn encode<T: Serialize>(value: &T) -> Result<JsonValue, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Corrupt(format!("failed to encode: {e}")))
}

fn encode_document(document: &Document) -> Result<JsonValue, StoreError> {
    match document {
        Document::Variant(v) => encode(v),
        Document::Order(o) => encode(o),
        Document::Voucher(v) => encode(v),
        Document::Cart(c) => encode(c),
    }
}

fn decode<T: DeserializeOwned>(body: JsonValue) -> Result<T, StoreError> {
    serde_json::from_value(body).map_err(|e| StoreError::Corrupt(format!("failed to decode: {e}")))
}

fn to_db_version(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::Corrupt(format!("version {version} out of range")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") => StoreError::Concurrency(msg),
                Some("57014") => StoreError::Timeout(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Timeout(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

impl CommerceStore for PostgresCommerceStore {
    fn load_variant(&self, id: VariantId) -> Result<Option<Variant>, StoreError> {
        self.block_on(self.fetch("variant", *id.as_uuid()))
    }

    fn load_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        self.block_on(self.fetch(KIND_PRODUCT, *id.as_uuid()))
    }

    fn load_voucher(&self, id: VoucherId) -> Result<Option<Voucher>, StoreError> {
        self.block_on(self.fetch("voucher", *id.as_uuid()))
    }

    fn load_address(&self, id: AddressId) -> Result<Option<ShippingAddress>, StoreError> {
        self.block_on(self.fetch(KIND_ADDRESS, *id.as_uuid()))
    }

    fn load_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        self.block_on(self.fetch("order", *id.as_uuid()))
    }

    fn load_cart(&self, user_id: UserId) -> Result<Option<Cart>, StoreError> {
        self.block_on(self.fetch("cart", *user_id.as_uuid()))
    }

    fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        self.block_on(self.fetch_orders(filter))
    }

    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        self.block_on(self.commit_changes(changes))
    }
}
