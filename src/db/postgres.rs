use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use crate::db::store::RentalStore;
use crate::error::{AppError, AppResult, Entity, Precondition};
use crate::models::{
    Closure, InvariantViolation, ItemFilter, ItemRecord, ItemStatus, NewItem, NewRequester,
    OpenTransaction, Page, RequesterRecord, TransactionFilter, TransactionRecord,
    TransactionStatus,
};
use crate::services::workflow::{self, Plan};

const ITEM_COLUMNS: &str = "id, name, status, owner_id, stock, created_at, updated_at";
const REQUESTER_COLUMNS: &str = "id, name, active, delinquent, created_at";
const TRANSACTION_COLUMNS: &str =
    "id, item_id, requester_id, status, quantity, opened_at, closed_at";

/// PostgreSQL store. Row locks (`FOR UPDATE`) are taken inside one
/// `sqlx::Transaction` per mutation and released at commit or rollback.
#[derive(Debug, Clone)]
pub struct PgRentalStore {
    pool: PgPool,
}

impl PgRentalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// The partial unique index on ongoing transactions backs up the locked
/// check; hitting it means another open won.
fn map_open_conflict(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Precondition::ItemNotAvailable.into()
        }
        _ => err.into(),
    }
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len() + 2);
    escaped.push('%');
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

async fn lock_item(conn: &mut PgConnection, id: i64) -> AppResult<ItemRecord> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = $1 FOR UPDATE");
    sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound(Entity::Item))
}

async fn lock_requester(conn: &mut PgConnection, id: i64) -> AppResult<RequesterRecord> {
    let sql = format!("SELECT {REQUESTER_COLUMNS} FROM requesters WHERE id = $1 FOR UPDATE");
    sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound(Entity::Requester))
}

async fn lock_transaction(conn: &mut PgConnection, id: i64) -> AppResult<TransactionRecord> {
    let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1 FOR UPDATE");
    sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound(Entity::Transaction))
}

/// `item_id` never changes, so it can be read before any lock is held.
async fn transaction_item_id(conn: &mut PgConnection, id: i64) -> AppResult<i64> {
    sqlx::query_scalar("SELECT item_id FROM transactions WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound(Entity::Transaction))
}

async fn transaction_parties(conn: &mut PgConnection, id: i64) -> AppResult<(i64, i64)> {
    sqlx::query_as("SELECT requester_id, item_id FROM transactions WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound(Entity::Transaction))
}

async fn ongoing_count(conn: &mut PgConnection, item_id: i64, except: Option<i64>) -> AppResult<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM transactions \
         WHERE item_id = $1 AND status = 'ongoing' AND ($2::bigint IS NULL OR id <> $2)",
    )
    .bind(item_id)
    .bind(except)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

async fn write_item(
    conn: &mut PgConnection,
    id: i64,
    status: ItemStatus,
    stock: Option<i32>,
) -> AppResult<ItemRecord> {
    let sql = format!(
        "UPDATE items SET status = $1, stock = $2, updated_at = NOW() \
         WHERE id = $3 RETURNING {ITEM_COLUMNS}"
    );
    let item = sqlx::query_as(&sql)
        .bind(status)
        .bind(stock)
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(item)
}

#[async_trait]
impl RentalStore for PgRentalStore {
    async fn create_item(&self, item: NewItem) -> AppResult<ItemRecord> {
        let sql = format!(
            "INSERT INTO items (name, owner_id, stock) VALUES ($1, $2, $3) RETURNING {ITEM_COLUMNS}"
        );
        let record = sqlx::query_as(&sql)
            .bind(&item.name)
            .bind(item.owner_id)
            .bind(item.stock)
            .fetch_one(&self.pool)
            .await?;
        Ok(record)
    }

    async fn get_item(&self, id: i64) -> AppResult<ItemRecord> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = $1");
        sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound(Entity::Item))
    }

    async fn set_item_status(&self, id: i64, status: ItemStatus) -> AppResult<ItemRecord> {
        let mut tx = self.pool.begin().await?;
        let item = lock_item(&mut tx, id).await?;
        let has_ongoing = ongoing_count(&mut tx, id, None).await? > 0;
        workflow::check_force_status(has_ongoing, status)?;

        let updated = write_item(&mut tx, id, status, item.stock).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn list_items(&self, filter: &ItemFilter, page: Page) -> AppResult<Vec<ItemRecord>> {
        // Build dynamic WHERE clause
        let mut conditions = Vec::new();
        let mut param_idx = 1u32;

        if filter.status.is_some() {
            conditions.push(format!("status = ${}", param_idx));
            param_idx += 1;
        }
        if filter.name.is_some() {
            conditions.push(format!("name ILIKE ${}", param_idx));
            param_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items {} ORDER BY id ASC LIMIT ${} OFFSET ${}",
            where_clause,
            param_idx,
            param_idx + 1
        );

        let mut query = sqlx::query_as::<_, ItemRecord>(&sql);
        if let Some(status) = filter.status {
            query = query.bind(status);
        }
        if let Some(name) = &filter.name {
            query = query.bind(escape_like(name));
        }

        let items = query
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    async fn create_requester(&self, requester: NewRequester) -> AppResult<RequesterRecord> {
        let sql = format!(
            "INSERT INTO requesters (name, active, delinquent) VALUES ($1, $2, $3) \
             RETURNING {REQUESTER_COLUMNS}"
        );
        let record = sqlx::query_as(&sql)
            .bind(&requester.name)
            .bind(requester.active)
            .bind(requester.delinquent)
            .fetch_one(&self.pool)
            .await?;
        Ok(record)
    }

    async fn get_requester(&self, id: i64) -> AppResult<RequesterRecord> {
        let sql = format!("SELECT {REQUESTER_COLUMNS} FROM requesters WHERE id = $1");
        sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound(Entity::Requester))
    }

    async fn set_requester_active(&self, id: i64, active: bool) -> AppResult<RequesterRecord> {
        let sql = format!(
            "UPDATE requesters SET active = $1 WHERE id = $2 RETURNING {REQUESTER_COLUMNS}"
        );
        sqlx::query_as(&sql)
            .bind(active)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound(Entity::Requester))
    }

    async fn set_requester_delinquent(
        &self,
        id: i64,
        delinquent: bool,
    ) -> AppResult<RequesterRecord> {
        let sql = format!(
            "UPDATE requesters SET delinquent = $1 WHERE id = $2 RETURNING {REQUESTER_COLUMNS}"
        );
        sqlx::query_as(&sql)
            .bind(delinquent)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound(Entity::Requester))
    }

    async fn list_requesters(
        &self,
        name: Option<&str>,
        page: Page,
    ) -> AppResult<Vec<RequesterRecord>> {
        let sql = format!(
            "SELECT {REQUESTER_COLUMNS} FROM requesters \
             WHERE ($1::text IS NULL OR name ILIKE $1) \
             ORDER BY id ASC LIMIT $2 OFFSET $3"
        );
        let requesters = sqlx::query_as(&sql)
            .bind(name.map(escape_like))
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;
        Ok(requesters)
    }

    async fn open_transaction(&self, open: OpenTransaction) -> AppResult<TransactionRecord> {
        let mut tx = self.pool.begin().await?;

        // requester first, then item
        let requester = lock_requester(&mut tx, open.requester_id).await?;
        let item = lock_item(&mut tx, open.item_id).await?;
        let has_ongoing = ongoing_count(&mut tx, item.id, None).await? > 0;
        workflow::check_open(&requester, &item, has_ongoing, open.quantity)?;

        let sql = format!(
            "INSERT INTO transactions (item_id, requester_id, status, quantity) \
             VALUES ($1, $2, $3, $4) RETURNING {TRANSACTION_COLUMNS}"
        );
        let record: TransactionRecord = sqlx::query_as(&sql)
            .bind(item.id)
            .bind(requester.id)
            .bind(TransactionStatus::Ongoing)
            .bind(open.quantity)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_open_conflict)?;

        write_item(
            &mut tx,
            item.id,
            ItemStatus::Reserved,
            workflow::stock_after_open(&item, open.quantity),
        )
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn close_transaction(&self, id: i64, closure: Closure) -> AppResult<TransactionRecord> {
        let mut tx = self.pool.begin().await?;
        let item_id = transaction_item_id(&mut tx, id).await?;
        let item = lock_item(&mut tx, item_id).await?;
        let current = lock_transaction(&mut tx, id).await?;

        if workflow::plan_close(&current, closure)? == Plan::Unchanged {
            tx.commit().await?;
            return Ok(current);
        }

        let sql = format!(
            "UPDATE transactions SET status = $1, closed_at = COALESCE(closed_at, NOW()) \
             WHERE id = $2 RETURNING {TRANSACTION_COLUMNS}"
        );
        let closed: TransactionRecord = sqlx::query_as(&sql)
            .bind(closure.target())
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        write_item(
            &mut tx,
            item.id,
            ItemStatus::Available,
            workflow::stock_after_close(&item, &current, closure),
        )
        .await?;

        tx.commit().await?;
        Ok(closed)
    }

    async fn reopen_transaction(&self, id: i64) -> AppResult<TransactionRecord> {
        let mut tx = self.pool.begin().await?;
        let (requester_id, item_id) = transaction_parties(&mut tx, id).await?;
        let requester = lock_requester(&mut tx, requester_id).await?;
        let item = lock_item(&mut tx, item_id).await?;
        let current = lock_transaction(&mut tx, id).await?;
        let other_ongoing = ongoing_count(&mut tx, item.id, Some(id)).await? > 0;

        if workflow::plan_reopen(&current, &requester, &item, other_ongoing)? == Plan::Unchanged {
            tx.commit().await?;
            return Ok(current);
        }

        let sql = format!(
            "UPDATE transactions SET status = 'ongoing', closed_at = NULL \
             WHERE id = $1 RETURNING {TRANSACTION_COLUMNS}"
        );
        let reopened: TransactionRecord = sqlx::query_as(&sql)
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_open_conflict)?;

        write_item(
            &mut tx,
            item.id,
            ItemStatus::Reserved,
            workflow::stock_after_open(&item, reopened.quantity),
        )
        .await?;

        tx.commit().await?;
        Ok(reopened)
    }

    async fn get_transaction(&self, id: i64) -> AppResult<TransactionRecord> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1");
        sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound(Entity::Transaction))
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: Page,
    ) -> AppResult<Vec<TransactionRecord>> {
        let mut conditions = Vec::new();
        let mut param_idx = 1u32;

        if filter.status.is_some() {
            conditions.push(format!("status = ${}", param_idx));
            param_idx += 1;
        }
        if filter.requester_id.is_some() {
            conditions.push(format!("requester_id = ${}", param_idx));
            param_idx += 1;
        }
        if filter.item_id.is_some() {
            conditions.push(format!("item_id = ${}", param_idx));
            param_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions {} ORDER BY id ASC LIMIT ${} OFFSET ${}",
            where_clause,
            param_idx,
            param_idx + 1
        );

        let mut query = sqlx::query_as::<_, TransactionRecord>(&sql);
        if let Some(status) = filter.status {
            query = query.bind(status);
        }
        if let Some(requester_id) = filter.requester_id {
            query = query.bind(requester_id);
        }
        if let Some(item_id) = filter.item_id {
            query = query.bind(item_id);
        }

        let rows = query
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn audit_items(&self) -> AppResult<Vec<InvariantViolation>> {
        let rows = sqlx::query_as(
            "SELECT i.id AS item_id, i.status, COUNT(t.id) AS ongoing \
             FROM items i \
             LEFT JOIN transactions t ON t.item_id = i.id AND t.status = 'ongoing' \
             GROUP BY i.id, i.status \
             HAVING (i.status = 'reserved') <> (COUNT(t.id) > 0) OR COUNT(t.id) > 1 \
             ORDER BY i.id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
