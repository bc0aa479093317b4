//! Postgres-backed unit of work and outbox store.
//!
//! Each save runs in one transaction:
//! 1. lock the aggregate row (`SELECT version ... FOR UPDATE`) and check the version
//! 2. upsert the aggregate row with the next version
//! 3. insert new stock movements
//! 4. insert one outbox row per pending event
//! 5. commit
//!
//! Any failure before the commit rolls everything back, outbox rows included.
//!
//! ## Error Mapping
//!
//! | Failure | PersistenceError |
//! |---|---|
//! | version mismatch | `Concurrency` |
//! | unique violation (`23505`, e.g. second live inventory for a place) | `Concurrency` |
//! | foreign key violation (`23503`, inventory for a missing product) | `NotFound` |
//! | unknown status / movement type in a row | `Serialization` |
//! | other database, pool, or network errors | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{Span, field, instrument};
use uuid::Uuid;

use stockroom_core::{AggregateId, AuditInfo, LocationId, UserId};
use stockroom_inventory::{
    Inventory, InventoryId, InventorySnapshot, MovementId, MovementType, StockMovement,
};
use stockroom_products::{Product, ProductId, ProductSnapshot, ProductStatus};

use super::{UnitOfWork, check_version};
use crate::error::{PersistenceError, map_sqlx_error};
use crate::outbox::capture::Staged;
use crate::outbox::{OutboxMessage, OutboxStore};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self, PersistenceError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the tables if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), PersistenceError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn load_movements(
        &self,
        inventory_id: InventoryId,
    ) -> Result<Vec<StockMovement>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT id, movement_type, quantity, reason, completed, occurred_at
            FROM stock_movements
            WHERE inventory_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(inventory_id.0.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_movements", e))?;

        rows.iter()
            .map(|row| {
                let row =
                    MovementRow::from_row(row).map_err(|e| map_sqlx_error("load_movements", e))?;
                StockMovement::try_from(row)
            })
            .collect()
    }

    async fn inventory_from_row(&self, row: &PgRow) -> Result<Inventory, PersistenceError> {
        let row = InventoryRow::from_row(row).map_err(|e| map_sqlx_error("load_inventory", e))?;
        let id = InventoryId::new(AggregateId::from_uuid(row.id));
        let movements = self.load_movements(id).await?;

        Ok(Inventory::from_snapshot(InventorySnapshot {
            id,
            product_id: ProductId::new(AggregateId::from_uuid(row.product_id)),
            location_id: LocationId::from_uuid(row.location_id),
            quantity_on_hand: row.quantity_on_hand,
            reorder_level: row.reorder_level,
            max_level: row.max_level,
            deleted: row.is_deleted,
            audit: row.audit,
            version: to_version(row.version)?,
            movements,
        }))
    }
}

#[async_trait]
impl UnitOfWork for PostgresStore {
    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, PersistenceError> {
        let row = sqlx::query(
            r#"
            SELECT id, sku, name, status, version,
                   created_by, created_at, updated_by, updated_at, deleted_by, deleted_at
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(id.0.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_product", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let row = ProductRow::from_row(&row).map_err(|e| map_sqlx_error("get_product", e))?;
        let status: ProductStatus = row
            .status
            .parse()
            .map_err(|e| PersistenceError::Serialization(format!("product {id}: {e}")))?;

        Ok(Some(Product::from_snapshot(ProductSnapshot {
            id,
            sku: row.sku,
            name: row.name,
            status,
            audit: row.audit,
            version: to_version(row.version)?,
        })))
    }

    #[instrument(
        skip(self, product, actor),
        fields(product_id = %product.id_typed(), outbox_rows = field::Empty),
        err
    )]
    async fn save_product(
        &self,
        product: &mut Product,
        actor: Option<UserId>,
    ) -> Result<(), PersistenceError> {
        let staged = Staged::prepare(product, actor, Utc::now())?;
        let id = product.id_typed();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let stored: Option<i64> =
            sqlx::query_scalar("SELECT version FROM products WHERE id = $1 FOR UPDATE")
                .bind(id.0.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("lock_product", e))?;

        let stored = stored.map(to_version).transpose()?;
        if let Err(e) = check_version("product", id, staged.expected_version, stored) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(e);
        }

        let snapshot = staged.aggregate.snapshot();
        let audit = &snapshot.audit;
        sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, name, status, version,
                created_by, created_at, updated_by, updated_at, deleted_by, deleted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                sku = EXCLUDED.sku,
                name = EXCLUDED.name,
                status = EXCLUDED.status,
                version = EXCLUDED.version,
                updated_by = EXCLUDED.updated_by,
                updated_at = EXCLUDED.updated_at,
                deleted_by = EXCLUDED.deleted_by,
                deleted_at = EXCLUDED.deleted_at
            "#,
        )
        .bind(id.0.as_uuid())
        .bind(&snapshot.sku)
        .bind(&snapshot.name)
        .bind(snapshot.status.as_str())
        .bind(staged.next_version() as i64)
        .bind(user_uuid(audit.created_by))
        .bind(audit.created_at)
        .bind(user_uuid(audit.updated_by))
        .bind(audit.updated_at)
        .bind(user_uuid(audit.deleted_by))
        .bind(audit.deleted_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_product", e))?;

        insert_outbox_rows(&mut tx, &staged.messages).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("outbox_rows", staged.messages.len());
        staged.commit_into(product);
        Ok(())
    }

    #[instrument(skip(self), fields(inventory_id = %id), err)]
    async fn get_inventory(&self, id: InventoryId) -> Result<Option<Inventory>, PersistenceError> {
        let row = sqlx::query(&format!("{INVENTORY_COLUMNS} WHERE id = $1"))
            .bind(id.0.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_inventory", e))?;

        match row {
            Some(row) => self.inventory_from_row(&row).await.map(Some),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(product_id = %product_id, location_id = %location_id), err)]
    async fn find_inventory(
        &self,
        product_id: ProductId,
        location_id: LocationId,
    ) -> Result<Option<Inventory>, PersistenceError> {
        let row = sqlx::query(&format!(
            "{INVENTORY_COLUMNS} WHERE product_id = $1 AND location_id = $2 AND NOT is_deleted"
        ))
        .bind(product_id.0.as_uuid())
        .bind(location_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_inventory", e))?;

        match row {
            Some(row) => self.inventory_from_row(&row).await.map(Some),
            None => Ok(None),
        }
    }

    #[instrument(
        skip(self, inventory, actor),
        fields(
            inventory_id = %inventory.id_typed(),
            movements = field::Empty,
            outbox_rows = field::Empty
        ),
        err
    )]
    async fn save_inventory(
        &self,
        inventory: &mut Inventory,
        actor: Option<UserId>,
    ) -> Result<(), PersistenceError> {
        let staged = Staged::prepare(inventory, actor, Utc::now())?;
        let id = inventory.id_typed();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let stored: Option<i64> =
            sqlx::query_scalar("SELECT version FROM inventories WHERE id = $1 FOR UPDATE")
                .bind(id.0.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("lock_inventory", e))?;

        let stored = stored.map(to_version).transpose()?;
        if let Err(e) = check_version("inventory", id, staged.expected_version, stored) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(e);
        }

        let snapshot = staged.aggregate.snapshot();
        let audit = &snapshot.audit;
        sqlx::query(
            r#"
            INSERT INTO inventories (
                id, product_id, location_id,
                quantity_on_hand, reorder_level, max_level, is_deleted, version,
                created_by, created_at, updated_by, updated_at, deleted_by, deleted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                quantity_on_hand = EXCLUDED.quantity_on_hand,
                reorder_level = EXCLUDED.reorder_level,
                max_level = EXCLUDED.max_level,
                is_deleted = EXCLUDED.is_deleted,
                version = EXCLUDED.version,
                updated_by = EXCLUDED.updated_by,
                updated_at = EXCLUDED.updated_at,
                deleted_by = EXCLUDED.deleted_by,
                deleted_at = EXCLUDED.deleted_at
            "#,
        )
        .bind(id.0.as_uuid())
        .bind(snapshot.product_id.0.as_uuid())
        .bind(snapshot.location_id.as_uuid())
        .bind(snapshot.quantity_on_hand)
        .bind(snapshot.reorder_level)
        .bind(snapshot.max_level)
        .bind(snapshot.deleted)
        .bind(staged.next_version() as i64)
        .bind(user_uuid(audit.created_by))
        .bind(audit.created_at)
        .bind(user_uuid(audit.updated_by))
        .bind(audit.updated_at)
        .bind(user_uuid(audit.deleted_by))
        .bind(audit.deleted_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_inventory", e))?;

        let unsaved = staged.aggregate.unsaved_movements();
        let first_position = staged.aggregate.movements().len() - unsaved.len();
        for (offset, movement) in unsaved.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO stock_movements (
                    id, inventory_id, position, movement_type, quantity, reason, completed, occurred_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(movement.id.0)
            .bind(id.0.as_uuid())
            .bind((first_position + offset) as i32)
            .bind(movement.movement_type.as_str())
            .bind(movement.quantity)
            .bind(&movement.reason)
            .bind(movement.completed)
            .bind(movement.occurred_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_movement", e))?;
        }

        insert_outbox_rows(&mut tx, &staged.messages).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        let span = Span::current();
        span.record("movements", unsaved.len());
        span.record("outbox_rows", staged.messages.len());

        staged.commit_into(inventory);
        inventory.mark_movements_saved();
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PostgresStore {
    #[instrument(skip(self), err)]
    async fn fetch_unprocessed(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxMessage>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, payload, created_at, processed_at, error, attempts
            FROM outbox_messages
            WHERE processed_at IS NULL AND attempts < $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(max_attempts as i32)
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_unprocessed", e))?;

        decode_outbox_rows(&rows, "fetch_unprocessed")
    }

    #[instrument(skip(self), err)]
    async fn mark_processed(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), PersistenceError> {
        let result = sqlx::query("UPDATE outbox_messages SET processed_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("mark_processed", e))?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::NotFound(format!("outbox message {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self, error), err)]
    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        attempts: u32,
    ) -> Result<(), PersistenceError> {
        let result =
            sqlx::query("UPDATE outbox_messages SET error = $2, attempts = $3 WHERE id = $1")
                .bind(id)
                .bind(error)
                .bind(attempts as i32)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("record_failure", e))?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::NotFound(format!("outbox message {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn dead_letters(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxMessage>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, payload, created_at, processed_at, error, attempts
            FROM outbox_messages
            WHERE processed_at IS NULL AND attempts >= $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(max_attempts as i32)
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("dead_letters", e))?;

        decode_outbox_rows(&rows, "dead_letters")
    }
}

const INVENTORY_COLUMNS: &str = r#"
    SELECT id, product_id, location_id,
           quantity_on_hand, reorder_level, max_level, is_deleted, version,
           created_by, created_at, updated_by, updated_at, deleted_by, deleted_at
    FROM inventories
"#;

async fn insert_outbox_rows(
    tx: &mut Transaction<'_, Postgres>,
    messages: &[OutboxMessage],
) -> Result<(), PersistenceError> {
    for message in messages {
        sqlx::query(
            r#"
            INSERT INTO outbox_messages (id, event_type, payload, created_at, processed_at, error, attempts)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(message.id)
        .bind(&message.event_type)
        .bind(&message.payload)
        .bind(message.created_at)
        .bind(message.processed_at)
        .bind(&message.error)
        .bind(message.attempts as i32)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_outbox", e))?;
    }
    Ok(())
}

fn decode_outbox_rows(rows: &[PgRow], operation: &str) -> Result<Vec<OutboxMessage>, PersistenceError> {
    rows.iter()
        .map(|row| {
            let row = OutboxRow::from_row(row).map_err(|e| map_sqlx_error(operation, e))?;
            Ok(OutboxMessage {
                id: row.id,
                event_type: row.event_type,
                payload: row.payload,
                created_at: row.created_at,
                processed_at: row.processed_at,
                error: row.error,
                attempts: u32::try_from(row.attempts).map_err(|_| {
                    PersistenceError::Serialization(format!(
                        "outbox message {}: negative attempts",
                        row.id
                    ))
                })?,
            })
        })
        .collect()
}

fn to_version(version: i64) -> Result<u64, PersistenceError> {
    u64::try_from(version)
        .map_err(|_| PersistenceError::Serialization(format!("negative version {version}")))
}

fn user_uuid(user: Option<UserId>) -> Option<Uuid> {
    user.map(|u| *u.as_uuid())
}

fn audit_from_row(row: &PgRow) -> Result<AuditInfo, sqlx::Error> {
    let user = |column: &str| -> Result<Option<UserId>, sqlx::Error> {
        Ok(row.try_get::<Option<Uuid>, _>(column)?.map(UserId::from_uuid))
    };

    Ok(AuditInfo {
        created_by: user("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_by: user("updated_by")?,
        updated_at: row.try_get("updated_at")?,
        deleted_by: user("deleted_by")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

#[derive(Debug)]
struct ProductRow {
    sku: String,
    name: String,
    status: String,
    version: i64,
    audit: AuditInfo,
}

impl<'r> FromRow<'r, PgRow> for ProductRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProductRow {
            sku: row.try_get("sku")?,
            name: row.try_get("name")?,
            status: row.try_get("status")?,
            version: row.try_get("version")?,
            audit: audit_from_row(row)?,
        })
    }
}

#[derive(Debug)]
struct InventoryRow {
    id: Uuid,
    product_id: Uuid,
    location_id: Uuid,
    quantity_on_hand: Decimal,
    reorder_level: Decimal,
    max_level: Decimal,
    is_deleted: bool,
    version: i64,
    audit: AuditInfo,
}

impl<'r> FromRow<'r, PgRow> for InventoryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(InventoryRow {
            id: row.try_get("id")?,
            product_id: row.try_get("product_id")?,
            location_id: row.try_get("location_id")?,
            quantity_on_hand: row.try_get("quantity_on_hand")?,
            reorder_level: row.try_get("reorder_level")?,
            max_level: row.try_get("max_level")?,
            is_deleted: row.try_get("is_deleted")?,
            version: row.try_get("version")?,
            audit: audit_from_row(row)?,
        })
    }
}

#[derive(Debug)]
struct MovementRow {
    id: Uuid,
    movement_type: String,
    quantity: Decimal,
    reason: String,
    completed: bool,
    occurred_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for MovementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            id: row.try_get("id")?,
            movement_type: row.try_get("movement_type")?,
            quantity: row.try_get("quantity")?,
            reason: row.try_get("reason")?,
            completed: row.try_get("completed")?,
            occurred_at: row.try_get("occurred_at")?,
        })
    }
}

impl TryFrom<MovementRow> for StockMovement {
    type Error = PersistenceError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        let movement_type: MovementType = row
            .movement_type
            .parse()
            .map_err(|e| PersistenceError::Serialization(format!("movement {}: {e}", row.id)))?;

        Ok(StockMovement {
            id: MovementId(row.id),
            movement_type,
            quantity: row.quantity,
            reason: row.reason,
            completed: row.completed,
            occurred_at: row.occurred_at,
        })
    }
}

#[derive(Debug)]
struct OutboxRow {
    id: Uuid,
    event_type: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    attempts: i32,
}

impl<'r> FromRow<'r, PgRow> for OutboxRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(OutboxRow {
            id: row.try_get("id")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
            error: row.try_get("error")?,
            attempts: row.try_get("attempts")?,
        })
    }
}
